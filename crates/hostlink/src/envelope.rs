//! Wire protocol types for client-host communication.
//!
//! Every message crossing the channel, in either direction, is an
//! [`Envelope`]: a sender tag, a correlation id, a method name, and an
//! opaque payload. Inbound values are decoded-or-rejected at the channel
//! boundary; nothing downstream sees a partially-valid message.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Sender role carried in the `from` field.
///
/// Closed set: the same channel may carry traffic from parties the bridge
/// has no business with, and the tag is the sole authorization check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Party {
    /// The host process. Inbound envelopes are accepted only with this tag.
    HostSide,
    /// The hosted web view. Stamped on every outgoing envelope.
    ClientSide,
    /// Unrelated traffic sharing the channel.
    Other,
}

impl Party {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HostSide => "host-side",
            Self::ClientSide => "client-side",
            Self::Other => "other",
        }
    }
}

impl std::fmt::Display for Party {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unique identifier correlating a reply with its originating call.
///
/// Wall-clock milliseconds plus a random numeric suffix, so rapid
/// consecutive calls get distinct ids. Unique among currently pending
/// calls only; a value may recur after its entry is consumed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    pub fn generate() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        Self(format!("{}{}", millis, rand::random::<u32>()))
    }

    /// Wrap an id received from the remote side.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Inbound value that does not parse as an [`Envelope`].
#[derive(Debug, thiserror::Error)]
#[error("malformed envelope: {0}")]
pub struct EnvelopeError(#[from] serde_json::Error);

/// The wire message exchanged over the channel, generic over payload shape.
///
/// The bridge itself operates on `Envelope<serde_json::Value>` and passes
/// the payload through verbatim; typed payloads are for embedders that
/// speak a fixed method vocabulary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub from: Party,
    #[serde(rename = "msgId")]
    pub msg_id: CorrelationId,
    pub method: String,
    pub data: T,
}

impl Envelope<serde_json::Value> {
    /// Decode a raw channel value, rejecting anything that is not a
    /// well-formed envelope.
    pub fn from_value(value: serde_json::Value) -> Result<Self, EnvelopeError> {
        Ok(serde_json::from_value(value)?)
    }
}

impl<T> Envelope<T> {
    /// Build an outgoing envelope with a freshly generated correlation id.
    pub fn outgoing(from: Party, method: impl Into<String>, data: T) -> Self {
        Self {
            from,
            msg_id: CorrelationId::generate(),
            method: method.into(),
            data,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn party_tags_serialize_kebab_case() {
        insta::assert_json_snapshot!(
            [Party::HostSide, Party::ClientSide, Party::Other],
            @r###"
        [
          "host-side",
          "client-side",
          "other"
        ]
        "###
        );
    }

    #[test]
    fn envelope_serializes_to_wire_shape() {
        let env = Envelope {
            from: Party::ClientSide,
            msg_id: CorrelationId::from_raw("169912345670042"),
            method: "openExternal".to_string(),
            data: json!({ "url": "https://example.com" }),
        };
        insta::assert_json_snapshot!(env, @r###"
        {
          "from": "client-side",
          "msgId": "169912345670042",
          "method": "openExternal",
          "data": {
            "url": "https://example.com"
          }
        }
        "###);
    }

    #[test]
    fn envelope_roundtrips() {
        let env = Envelope {
            from: Party::HostSide,
            msg_id: CorrelationId::from_raw("42"),
            method: "refresh".to_string(),
            data: json!(["a", "b"]),
        };
        let value = serde_json::to_value(&env).unwrap();
        assert_eq!(
            value,
            json!({
                "from": "host-side",
                "msgId": "42",
                "method": "refresh",
                "data": ["a", "b"],
            })
        );

        let parsed = Envelope::from_value(value).unwrap();
        assert_eq!(parsed.from, Party::HostSide);
        assert_eq!(parsed.msg_id.as_str(), "42");
        assert_eq!(parsed.method, "refresh");
        assert_eq!(parsed.data, json!(["a", "b"]));
    }

    #[test]
    fn from_value_rejects_missing_fields() {
        let result = Envelope::from_value(json!({
            "from": "host-side",
            "method": "refresh",
            "data": null,
        }));
        assert!(result.is_err());
    }

    #[test]
    fn from_value_rejects_unknown_party_tag() {
        let result = Envelope::from_value(json!({
            "from": "somewhere-else",
            "msgId": "1",
            "method": "refresh",
            "data": null,
        }));
        assert!(result.is_err());
    }

    #[test]
    fn from_value_rejects_non_object() {
        assert!(Envelope::from_value(json!("not an envelope")).is_err());
        assert!(Envelope::from_value(json!(17)).is_err());
    }

    #[test]
    fn generated_ids_are_numeric_and_distinct() {
        let a = CorrelationId::generate();
        let b = CorrelationId::generate();

        assert!(!a.as_str().is_empty());
        assert!(a.as_str().chars().all(|c| c.is_ascii_digit()));
        assert_ne!(a, b);
    }

    #[test]
    fn correlation_id_serializes_as_plain_string() {
        let id = CorrelationId::from_raw("abc123");
        assert_eq!(serde_json::to_value(&id).unwrap(), json!("abc123"));
        assert_eq!(format!("{}", id), "abc123");
    }
}
