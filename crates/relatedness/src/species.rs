use crate::{Error, Result};
use core::fmt;
use serde::{Deserialize, Serialize};

/// Longest accepted species name or sample identifier, in bytes.
pub const MAX_IDENT_LEN: usize = 100;

/// A validated tenant name scoping every row in the shared store.
///
/// Species names arrive as a URL path segment, so they are restricted to
/// ASCII alphanumerics plus `_`, `-` and `.`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Species(String);

impl Species {
    /// Validates and wraps a species name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSpecies`] if the name is empty, longer than
    /// [`MAX_IDENT_LEN`], or contains characters outside `[A-Za-z0-9_.-]`.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(Error::InvalidSpecies {
                reason: "species must not be empty".to_string(),
            });
        }
        if name.len() > MAX_IDENT_LEN {
            return Err(Error::InvalidSpecies {
                reason: format!("species exceeds {MAX_IDENT_LEN} bytes"),
            });
        }
        if let Some(bad) = name
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')))
        {
            return Err(Error::InvalidSpecies {
                reason: format!("illegal character {bad:?} in {name:?}"),
            });
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Species {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Species {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Species> for String {
    fn from(value: Species) -> Self {
        value.0
    }
}

/// Validates a sample identifier (guid).
///
/// Guids are opaque, but they are stored in whitespace-separated files, so
/// they must be non-empty, whitespace-free and at most [`MAX_IDENT_LEN`]
/// bytes.
///
/// # Errors
///
/// Returns [`Error::InvalidGuid`] describing the first violation.
pub fn validate_guid(guid: &str) -> Result<()> {
    if guid.is_empty() {
        return Err(Error::InvalidGuid {
            reason: "guid must not be empty".to_string(),
        });
    }
    if guid.len() > MAX_IDENT_LEN {
        return Err(Error::InvalidGuid {
            reason: format!("guid exceeds {MAX_IDENT_LEN} bytes"),
        });
    }
    if guid.chars().any(char::is_whitespace) {
        return Err(Error::InvalidGuid {
            reason: format!("guid {guid:?} contains whitespace"),
        });
    }
    Ok(())
}
