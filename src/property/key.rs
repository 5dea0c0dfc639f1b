//! Property key parsing.
//!
//! A key is a base name optionally followed by bracketed append
//! information: `image_property[ch=1]`. The append information carries
//! routing hints (the channel a request targets) and is never part of the
//! identity the store indexes by.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::{Result, SensorwireError};

/// Append-info tag that carries a channel id.
const CHANNEL_TAG: &str = "ch";

/// A parsed property key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyKey {
    base: String,
    append: BTreeMap<String, String>,
}

impl PropertyKey {
    /// Parse a key, validating the bracket layout.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for an empty key, a key that starts with `[`, a
    /// `]` without an opening `[`, or a closing `]` that is not the last
    /// character.
    pub fn parse(key: &str) -> Result<Self> {
        if key.is_empty() {
            return Err(SensorwireError::invalid_argument("empty property key"));
        }

        let open = key.find('[');
        let close = key.rfind(']');

        match (open, close) {
            (None, None) => Ok(Self {
                base: key.to_string(),
                append: BTreeMap::new(),
            }),
            (None, Some(_)) => Err(malformed(key)),
            (Some(0), _) => Err(malformed(key)),
            (Some(_), None) => Err(malformed(key)),
            (Some(open), Some(close)) => {
                if close != key.len() - 1 || close < open {
                    return Err(malformed(key));
                }
                let mut append = BTreeMap::new();
                for element in key[open + 1..close].split(',') {
                    if let Some((tag, value)) = element.split_once('=') {
                        append.insert(tag.to_string(), value.to_string());
                    }
                }
                Ok(Self {
                    base: key[..open].to_string(),
                    append,
                })
            }
        }
    }

    /// Key without append information.
    #[inline]
    pub fn base(&self) -> &str {
        &self.base
    }

    /// Value of an append-info tag.
    pub fn append_value(&self, tag: &str) -> Option<&str> {
        self.append.get(tag).map(String::as_str)
    }

    /// Channel id carried in the `ch=` tag, if present and numeric.
    pub fn channel_id(&self) -> Option<u32> {
        self.append_value(CHANNEL_TAG)?.parse().ok()
    }

    /// Return a copy targeting `channel_id`.
    pub fn with_channel_id(mut self, channel_id: u32) -> Self {
        self.append
            .insert(CHANNEL_TAG.to_string(), channel_id.to_string());
        self
    }

    /// Canonical text form with tags sorted.
    pub fn full_key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for PropertyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.base)?;
        if self.append.is_empty() {
            return Ok(());
        }
        f.write_str("[")?;
        for (i, (tag, value)) in self.append.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}={}", tag, value)?;
        }
        f.write_str("]")
    }
}

fn malformed(key: &str) -> SensorwireError {
    SensorwireError::invalid_argument(format!("malformed property key: {}", key))
}

/// Strip append information, returning the base key.
pub fn base_key(key: &str) -> Result<String> {
    PropertyKey::parse(key).map(|k| k.base)
}
