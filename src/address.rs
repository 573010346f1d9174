//! Peer address parsing and validation.
//!
//! A peer is identified by the hostname of its hidden service: a 16-character
//! base-32 label (letters of either case, `2-7`) followed by the `.onion`
//! suffix. The address
//! is self-certifying in the sense that it is derived from the service's key
//! material by the anonymity network, but this module only checks the format;
//! it never authenticates anything.

use crate::error::{OnionChatError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

/// Length of the base-32 label in a v2 onion hostname.
const LABEL_LEN: usize = 16;

/// Required hostname suffix.
const SUFFIX: &str = ".onion";

/// A format-validated onion service address.
///
/// The received spelling is preserved, because signed content containing an
/// address must re-serialize to the exact bytes the sender signed. Base-32
/// letters are case-insensitive, so comparison, hashing and ordering fold
/// case: `AAAABBBBCCCCDDDD.onion` and `aaaabbbbccccdddd.onion` name the same
/// peer and collide as store keys.
#[derive(Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OnionAddress(String);

impl OnionAddress {
    /// Parses and validates an onion address.
    pub fn parse(s: &str) -> Result<Self> {
        let label = s
            .strip_suffix(SUFFIX)
            .ok_or_else(|| OnionChatError::invalid_address(format!("missing {} suffix", SUFFIX)))?;

        if label.len() != LABEL_LEN {
            return Err(OnionChatError::invalid_address(format!(
                "label must be {} characters, got {}",
                LABEL_LEN,
                label.len()
            )));
        }
        if !label
            .bytes()
            .all(|b| b.is_ascii_alphabetic() || (b'2'..=b'7').contains(&b))
        {
            return Err(OnionChatError::invalid_address(
                "label contains non-base32 characters",
            ));
        }

        Ok(Self(s.to_string()))
    }

    /// Returns true if `s` is a well-formed onion address.
    pub fn is_valid(s: &str) -> bool {
        Self::parse(s).is_ok()
    }

    /// Returns the full hostname, e.g. `abcdefghij234567.onion`.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the base-32 label without the `.onion` suffix.
    pub fn label(&self) -> &str {
        &self.0[..LABEL_LEN]
    }
}

impl PartialEq for OnionAddress {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl Eq for OnionAddress {}

impl Hash for OnionAddress {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for b in self.0.bytes() {
            state.write_u8(b.to_ascii_lowercase());
        }
    }
}

impl PartialOrd for OnionAddress {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OnionAddress {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0
            .bytes()
            .map(|b| b.to_ascii_lowercase())
            .cmp(other.0.bytes().map(|b| b.to_ascii_lowercase()))
    }
}

impl FromStr for OnionAddress {
    type Err = OnionChatError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for OnionAddress {
    type Error = OnionChatError;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<OnionAddress> for String {
    fn from(addr: OnionAddress) -> Self {
        addr.0
    }
}

impl fmt::Display for OnionAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for OnionAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OnionAddress({})", self.0)
    }
}
