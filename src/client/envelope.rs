//! The `{success, data, error}` wrapper every proxy response uses

use serde::Deserialize;
use serde_json::Value;

use crate::failure::{Failure, Result};

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Envelope {
    pub success: bool,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub error: Option<String>,
}

impl Envelope {
    /// Parses a response body
    pub fn parse(body: &str) -> Result<Self> {
        serde_json::from_str(body)
            .map_err(|e| Failure::unknown(format!("malformed response envelope: {}", e)))
    }

    /// `data` on success, `General.unknown(error)` otherwise
    pub fn into_data(self) -> Result<Value> {
        if self.success {
            Ok(self.data)
        } else {
            Err(Failure::unknown(
                self.error
                    .unwrap_or_else(|| "request failed without an error message".to_string()),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::failure::{FailureKind, GeneralFailure};
    use serde_json::json;

    #[test]
    fn test_success_returns_data() {
        let envelope = Envelope::parse(r#"{"success":true,"data":[{"id":1}]}"#).unwrap();
        assert_eq!(envelope.into_data().unwrap(), json!([{ "id": 1 }]));
    }

    #[test]
    fn test_missing_data_is_null() {
        let envelope = Envelope::parse(r#"{"success":true}"#).unwrap();
        assert_eq!(envelope.into_data().unwrap(), Value::Null);
    }

    #[test]
    fn test_failure_carries_error_message() {
        let envelope = Envelope::parse(r#"{"success":false,"error":"course locked"}"#).unwrap();
        let failure = envelope.into_data().unwrap_err();
        assert_eq!(failure.kind, FailureKind::General(GeneralFailure::Unknown));
        assert_eq!(failure.message, "course locked");
    }

    #[test]
    fn test_malformed_body() {
        let failure = Envelope::parse("<html>oops</html>").unwrap_err();
        assert_eq!(failure.kind, FailureKind::General(GeneralFailure::Unknown));
        assert!(failure.message.contains("malformed response envelope"));
    }
}
