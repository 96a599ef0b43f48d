//! Request identifiers.
//!
//! IDs are ULIDs: time-ordered, generated without coordination, 128-bit.
//! In the encoded representation an id is the bare ULID string; `Display`
//! adds a `req-` prefix for logs.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

const PREFIX: &str = "req-";

/// Identifier of a queued request. Assigned once, never changed.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Ulid);

impl RequestId {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid)
    }

    pub fn as_ulid(&self) -> Ulid {
        self.0
    }
}

impl From<Ulid> for RequestId {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{PREFIX}{}", self.0)
    }
}

/// Accepts both the bare ULID and the prefixed display form.
impl FromStr for RequestId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix(PREFIX).unwrap_or(s);
        Ulid::from_string(raw).map(Self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_has_prefix_and_parses_back() {
        let id = RequestId::from_ulid(Ulid::new());
        let shown = id.to_string();
        assert!(shown.starts_with("req-"));
        assert_eq!(shown.parse::<RequestId>().unwrap(), id);
    }

    #[test]
    fn bare_ulid_parses() {
        let ulid = Ulid::new();
        let id: RequestId = ulid.to_string().parse().unwrap();
        assert_eq!(id.as_ulid(), ulid);
    }

    #[test]
    fn serializes_as_plain_ulid_string() {
        let ulid = Ulid::new();
        let id = RequestId::from(ulid);
        let json = serde_json::to_value(id).unwrap();
        assert_eq!(json, serde_json::Value::String(ulid.to_string()));
        let back: RequestId = serde_json::from_value(json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn ids_sort_by_creation_time() {
        let a = RequestId::from_ulid(Ulid::new());
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = RequestId::from_ulid(Ulid::new());
        assert!(a < b);
    }

    #[test]
    fn garbage_is_rejected() {
        assert!("req-not-a-ulid".parse::<RequestId>().is_err());
    }
}
