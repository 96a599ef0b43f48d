//! Encoded request representation.
//!
//! A representation is a JSON object carrying a `kind` tag, an `id`, and the
//! kind-specific fields flattened next to them:
//!
//! ```json
//! { "kind": "acme.photos.upload.v1", "id": "01HV...", "path": "/tmp/a.jpg" }
//! ```
//!
//! This is the only shape that reaches the store, so it has to stay readable
//! across library versions.

use std::fmt;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use super::errors::{DecodeError, EncodeError};
use super::ids::RequestId;

pub const KIND_FIELD: &str = "kind";
pub const ID_FIELD: &str = "id";

/// Kind tag used to find a request's decoder.
///
/// Convention: `{namespace}.{domain}.{action}.v{major}`, e.g. `acme.photos.upload.v1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestKind(String);

impl RequestKind {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for RequestKind {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for RequestKind {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Representation {
    kind: RequestKind,
    id: Option<RequestId>,
    fields: Map<String, Value>,
}

impl Representation {
    /// An empty representation of `kind` with no id yet.
    pub fn new(kind: impl Into<RequestKind>) -> Self {
        Self {
            kind: kind.into(),
            id: None,
            fields: Map::new(),
        }
    }

    /// Serialize `payload` as the kind-specific fields.
    ///
    /// The payload must serialize to an object and must not use the reserved
    /// `kind` / `id` keys.
    pub fn from_payload<P: Serialize>(
        kind: impl Into<RequestKind>,
        payload: &P,
    ) -> Result<Self, EncodeError> {
        let Value::Object(fields) = serde_json::to_value(payload)? else {
            return Err(EncodeError::NotAnObject);
        };
        for reserved in [KIND_FIELD, ID_FIELD] {
            if fields.contains_key(reserved) {
                return Err(EncodeError::ReservedField(reserved));
            }
        }
        Ok(Self {
            kind: kind.into(),
            id: None,
            fields,
        })
    }

    /// Parse a stored JSON value, checking the envelope fields.
    pub fn from_value(value: Value) -> Result<Self, DecodeError> {
        let Value::Object(mut fields) = value else {
            return Err(DecodeError::NotAnObject);
        };

        let kind = match fields.remove(KIND_FIELD) {
            Some(Value::String(kind)) => RequestKind::new(kind),
            Some(other) => {
                return Err(DecodeError::InvalidField {
                    field: KIND_FIELD,
                    reason: format!("expected a string, found {other}"),
                });
            }
            None => return Err(DecodeError::MissingField(KIND_FIELD)),
        };

        let id = match fields.remove(ID_FIELD) {
            Some(Value::String(raw)) => {
                Some(raw.parse::<RequestId>().map_err(|e| DecodeError::InvalidField {
                    field: ID_FIELD,
                    reason: e.to_string(),
                })?)
            }
            Some(Value::Null) | None => None,
            Some(other) => {
                return Err(DecodeError::InvalidField {
                    field: ID_FIELD,
                    reason: format!("expected a string, found {other}"),
                });
            }
        };

        Ok(Self { kind, id, fields })
    }

    /// Flatten back into the stored JSON object.
    pub fn to_value(&self) -> Value {
        let mut map = Map::with_capacity(self.fields.len() + 2);
        map.insert(KIND_FIELD.to_string(), Value::String(self.kind.to_string()));
        if let Some(id) = self.id {
            map.insert(ID_FIELD.to_string(), Value::String(id.as_ulid().to_string()));
        }
        for (key, value) in &self.fields {
            map.insert(key.clone(), value.clone());
        }
        Value::Object(map)
    }

    pub fn with_id(mut self, id: RequestId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn kind(&self) -> &RequestKind {
        &self.kind
    }

    pub fn id(&self) -> Option<RequestId> {
        self.id
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// The id, or `MissingField("id")` for a representation that was never enqueued.
    pub fn require_id(&self) -> Result<RequestId, DecodeError> {
        self.id.ok_or(DecodeError::MissingField(ID_FIELD))
    }

    pub fn expect_kind(&self, expected: &str) -> Result<(), DecodeError> {
        if self.kind.as_str() == expected {
            Ok(())
        } else {
            Err(DecodeError::KindMismatch {
                expected: expected.to_string(),
                found: self.kind.to_string(),
            })
        }
    }

    /// Deserialize the kind-specific fields into `P`.
    pub fn payload<P: DeserializeOwned>(&self) -> Result<P, DecodeError> {
        serde_json::from_value(Value::Object(self.fields.clone())).map_err(|source| {
            DecodeError::Payload {
                kind: self.kind.to_string(),
                source,
            }
        })
    }
}
