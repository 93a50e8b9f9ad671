//! Wall-clock instants as carried on the wire.
//!
//! MessagePack's timestamp extension only covers UTC instants; the engine
//! additionally records a [`DateTimeKind`] so that local/unspecified times
//! can round-trip through the hi-fi tuple escape.

use core::fmt;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};

/// Interpretation of a wall-clock instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DateTimeKind {
    /// No kind information was carried.
    #[default]
    Unspecified,
    /// The instant is in UTC.
    Utc,
    /// The instant is in the producer's local time zone.
    Local,
}

impl DateTimeKind {
    /// Stable wire value for the hi-fi tuple form.
    pub const fn wire_value(self) -> u8 {
        match self {
            DateTimeKind::Unspecified => 0,
            DateTimeKind::Utc => 1,
            DateTimeKind::Local => 2,
        }
    }

    /// Inverse of [`DateTimeKind::wire_value`].
    pub const fn from_wire_value(value: u8) -> Option<Self> {
        match value {
            0 => Some(DateTimeKind::Unspecified),
            1 => Some(DateTimeKind::Utc),
            2 => Some(DateTimeKind::Local),
            _ => None,
        }
    }
}

/// An instant with second/nanosecond precision and a [`DateTimeKind`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Timestamp {
    /// Whole seconds since the Unix epoch (may be negative).
    pub secs: i64,
    /// Sub-second nanoseconds, `0..1_000_000_000`.
    pub nanos: u32,
    /// How the instant should be interpreted.
    pub kind: DateTimeKind,
}

/// Nanoseconds per second, used by the tick conversions.
const NANOS_PER_SEC: i64 = 1_000_000_000;

impl Timestamp {
    /// The Unix epoch, UTC.
    pub const UNIX_EPOCH: Timestamp = Timestamp {
        secs: 0,
        nanos: 0,
        kind: DateTimeKind::Utc,
    };

    /// A UTC instant from seconds and nanoseconds since the epoch.
    pub const fn utc(secs: i64, nanos: u32) -> Self {
        Timestamp {
            secs,
            nanos,
            kind: DateTimeKind::Utc,
        }
    }

    /// An instant with an explicit kind.
    pub const fn with_kind(secs: i64, nanos: u32, kind: DateTimeKind) -> Self {
        Timestamp { secs, nanos, kind }
    }

    /// Total nanoseconds since the epoch ("ticks" in the hi-fi tuple form).
    ///
    /// Saturates at the `i64` range; instants further than ~292 years from
    /// the epoch lose precision in the tuple escape.
    pub fn ticks(&self) -> i64 {
        self.secs
            .saturating_mul(NANOS_PER_SEC)
            .saturating_add(self.nanos as i64)
    }

    /// Rebuild an instant from tuple-form ticks.
    pub fn from_ticks(ticks: i64, kind: DateTimeKind) -> Self {
        let secs = ticks.div_euclid(NANOS_PER_SEC);
        let nanos = ticks.rem_euclid(NANOS_PER_SEC) as u32;
        Timestamp { secs, nanos, kind }
    }

    /// The same instant with a different kind attached.
    pub const fn assume_kind(mut self, kind: DateTimeKind) -> Self {
        self.kind = kind;
        self
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({}s {}ns {:?})", self.secs, self.nanos, self.kind)
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(dt: DateTime<Utc>) -> Self {
        Timestamp::utc(dt.timestamp(), dt.timestamp_subsec_nanos())
    }
}

impl From<NaiveDateTime> for Timestamp {
    fn from(dt: NaiveDateTime) -> Self {
        let utc = dt.and_utc();
        Timestamp::with_kind(
            utc.timestamp(),
            utc.timestamp_subsec_nanos(),
            DateTimeKind::Unspecified,
        )
    }
}

impl TryFrom<Timestamp> for DateTime<Utc> {
    type Error = OutOfRangeError;

    fn try_from(ts: Timestamp) -> Result<Self, Self::Error> {
        Utc.timestamp_opt(ts.secs, ts.nanos)
            .single()
            .ok_or(OutOfRangeError)
    }
}

/// The instant does not fit the target calendar type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutOfRangeError;

impl fmt::Display for OutOfRangeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("timestamp out of range for chrono::DateTime")
    }
}

impl std::error::Error for OutOfRangeError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticks_round_trip() {
        let ts = Timestamp::with_kind(1_700_000_000, 123_456_789, DateTimeKind::Local);
        let back = Timestamp::from_ticks(ts.ticks(), DateTimeKind::Local);
        assert_eq!(ts, back);
    }

    #[test]
    fn negative_seconds_round_trip() {
        let ts = Timestamp::utc(-5, 250_000_000);
        let back = Timestamp::from_ticks(ts.ticks(), DateTimeKind::Utc);
        assert_eq!(ts, back);
    }

    #[test]
    fn chrono_conversion() {
        let dt = Utc.with_ymd_and_hms(2024, 5, 17, 12, 30, 45).unwrap();
        let ts = Timestamp::from(dt);
        assert_eq!(ts.kind, DateTimeKind::Utc);
        let back = DateTime::<Utc>::try_from(ts).unwrap();
        assert_eq!(dt, back);
    }
}
