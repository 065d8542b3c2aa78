//! Vehicle plate value object.

use std::fmt;

use crate::{DomainError, DomainResult};

/// Number of characters in a plate.
pub const PLATE_LEN: usize = 6;

/// A validated vehicle plate.
///
/// Three ASCII letters followed by three ASCII digits (e.g. "ABC123").
/// Letter case is accepted either way and kept exactly as received, so
/// "abc123" and "ABC123" are different plates.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Plate(String);

impl Plate {
    /// Validates and wraps a plate string.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidPlate` if the input is not exactly
    /// three letters followed by three digits.
    pub fn parse(value: &str) -> DomainResult<Self> {
        if Self::is_valid(value) {
            Ok(Self(value.to_string()))
        } else {
            Err(DomainError::InvalidPlate {
                value: value.to_string(),
            })
        }
    }

    /// Checks the `AAA000` shape without allocating.
    #[must_use]
    pub fn is_valid(value: &str) -> bool {
        let bytes = value.as_bytes();
        if bytes.len() != PLATE_LEN {
            return false;
        }
        let (letters, digits) = bytes.split_at(PLATE_LEN / 2);
        letters.iter().all(u8::is_ascii_alphabetic) && digits.iter().all(u8::is_ascii_digit)
    }

    /// Returns the underlying string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Plate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Plate {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
