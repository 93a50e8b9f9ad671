//! A small bitflags macro for option flag sets.
//!
//! Generates a transparent wrapper struct with associated flag constants
//! and the usual set operations, without pulling in the `bitflags` crate.

/// Defines a bitflags struct with the given flags.
///
/// Generates a `#[repr(transparent)]` struct with `Copy`, `Clone`,
/// `Default`, `PartialEq`, `Eq`, `Hash`, associated constants for each
/// flag, `empty()`/`all()`, `contains`/`insert`/`remove`, and the bitwise
/// operators `|`, `&`, `!`. `Debug` lists the names of the set flags.
#[macro_export]
macro_rules! bitflags {
    (
        $(#[$outer:meta])*
        $vis:vis struct $Name:ident : $T:ty {
            $(
                $(#[$inner:meta])*
                const $FLAG:ident = $value:expr;
            )*
        }
    ) => {
        $(#[$outer])*
        #[derive(Copy, Clone, Default, PartialEq, Eq, Hash)]
        #[repr(transparent)]
        $vis struct $Name($T);

        impl $Name {
            $(
                $(#[$inner])*
                pub const $FLAG: Self = Self($value);
            )*

            /// An empty set of flags.
            #[inline]
            pub const fn empty() -> Self {
                Self(0)
            }

            /// The union of every declared flag.
            #[inline]
            pub const fn all() -> Self {
                Self(0 $(| $value)*)
            }

            /// Returns `true` if no flags are set.
            #[inline]
            pub const fn is_empty(self) -> bool {
                self.0 == 0
            }

            /// Returns `true` if all flags in `other` are contained in `self`.
            #[inline]
            pub const fn contains(self, other: Self) -> bool {
                (self.0 & other.0) == other.0
            }

            /// Returns `true` if any flag in `other` is contained in `self`.
            #[inline]
            pub const fn intersects(self, other: Self) -> bool {
                (self.0 & other.0) != 0
            }

            /// Inserts the flags in `other` into `self`.
            #[inline]
            pub const fn insert(&mut self, other: Self) {
                self.0 |= other.0;
            }

            /// Removes the flags in `other` from `self`.
            #[inline]
            pub const fn remove(&mut self, other: Self) {
                self.0 &= !other.0;
            }
        }

        impl core::ops::BitOr for $Name {
            type Output = Self;
            #[inline]
            fn bitor(self, rhs: Self) -> Self {
                Self(self.0 | rhs.0)
            }
        }

        impl core::ops::BitOrAssign for $Name {
            #[inline]
            fn bitor_assign(&mut self, rhs: Self) {
                self.0 |= rhs.0;
            }
        }

        impl core::ops::BitAnd for $Name {
            type Output = Self;
            #[inline]
            fn bitand(self, rhs: Self) -> Self {
                Self(self.0 & rhs.0)
            }
        }

        impl core::ops::Not for $Name {
            type Output = Self;
            #[inline]
            fn not(self) -> Self {
                Self(!self.0 & Self::all().0)
            }
        }

        impl core::fmt::Debug for $Name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, concat!(stringify!($Name), "("))?;
                let mut first = true;
                $(
                    if $value != 0 && self.contains(Self::$FLAG) {
                        if !first {
                            write!(f, " | ")?;
                        }
                        write!(f, stringify!($FLAG))?;
                        first = false;
                    }
                )*
                if first {
                    write!(f, "empty")?;
                }
                write!(f, ")")
            }
        }
    };
}
