//! Canonical record identity.

use std::fmt;
use std::str::FromStr;

use crate::error::StoreError;

/// Identity of one stored record: the type name plus a 64-bit id.
///
/// The plain text form is `type:id`. Opaque (`@type:hex`) forms are handled by
/// [`crate::codec::KeyCodec`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key {
    type_name: String,
    id: u64,
}

impl Key {
    pub fn new(type_name: impl Into<String>, id: u64) -> Self {
        Self {
            type_name: type_name.into(),
            id,
        }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.type_name, self.id)
    }
}

impl FromStr for Key {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || StoreError::InvalidKey(format!("'{s}' is not a plain key"));

        if s.starts_with('@') {
            return Err(invalid());
        }

        let (type_name, id) = s.rsplit_once(':').ok_or_else(invalid)?;
        if type_name.is_empty() || id.is_empty() || !id.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }

        let id = id.parse::<u64>().map_err(|_| invalid())?;
        Ok(Self::new(type_name, id))
    }
}
