//! 64-bit trace and span identifiers
//!
//! Identifiers travel as base-10 strings whenever they leave the process
//! (carrier maps, environment variables), so `Display` and `FromStr` are
//! the canonical text forms.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Draw a random non-zero 64-bit id (zero means "no id" on the wire)
fn random_nonzero() -> u64 {
    loop {
        let (high, _) = Uuid::new_v4().as_u64_pair();
        if high != 0 {
            return high;
        }
    }
}

macro_rules! id_type {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl $name {
            pub fn random() -> Self {
                Self(random_nonzero())
            }

            pub fn as_u64(&self) -> u64 {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::num::ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.trim().parse::<u64>().map(Self)
            }
        }
    };
}

id_type!(TraceId, "Identifier shared by every span of one trace");
id_type!(SpanId, "Identifier of a single span");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_ids_are_nonzero_and_distinct() {
        let a = SpanId::random();
        let b = SpanId::random();
        assert_ne!(a.as_u64(), 0);
        assert_ne!(a, b);
    }

    #[test]
    fn test_decimal_text_form() {
        let id = TraceId(18_446_744_073_709_551_615);
        assert_eq!(id.to_string(), "18446744073709551615");
        assert_eq!("18446744073709551615".parse::<TraceId>().unwrap(), id);
        assert!("0xff".parse::<SpanId>().is_err());
    }
}
