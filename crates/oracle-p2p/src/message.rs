use oracle_core::{OracleError, SignRequest, SignResponse};
use serde::{Deserialize, Serialize};

/// Wire envelope for messages exchanged over the signing gossip topic.
///
/// Serialized as JSON rather than a binary codec, so the `"type"` discriminant
/// and field names are readable on the wire and stable independent of this
/// crate's internal struct layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Envelope {
    SignRequest {
        #[serde(flatten)]
        request: SignRequest,
    },
    SignResponse {
        #[serde(flatten)]
        response: SignResponse,
    },
}

impl Envelope {
    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("Envelope serialization is infallible")
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, OracleError> {
        serde_json::from_slice(bytes).map_err(|e| OracleError::Parse(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oracle_core::OracleHash;

    #[test]
    fn sign_request_round_trips_with_type_tag() {
        let env = Envelope::SignRequest {
            request: SignRequest::bare(OracleHash::from_bytes([1u8; 32])),
        };
        let bytes = env.to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["type"], "sign_request");

        let decoded = Envelope::from_bytes(&bytes).unwrap();
        matches!(decoded, Envelope::SignRequest { .. });
    }

    #[test]
    fn malformed_bytes_are_a_parse_error_not_a_panic() {
        let err = Envelope::from_bytes(b"not json").unwrap_err();
        assert!(matches!(err, OracleError::Parse(_)));
    }
}
