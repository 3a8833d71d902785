//! The uniform result envelope returned by every CRUD operation.
//!
//! Operations never surface adapter errors as `Err` across the service
//! boundary; the outcome is always an [`Envelope`] value tagged with a
//! `status` of `success`, `error`, or `confirmation_required`.

use crate::error::DbError;
use crate::models::value::ValueMap;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Envelope<T> {
    /// Operation completed; the payload carries operation-specific fields.
    Success(T),
    /// Operation failed. The message never contains connection secrets.
    Error {
        error: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        table: Option<String>,
    },
    /// Destructive operation gated on an explicit confirm flag. Not a
    /// failure: the response echoes the filter that would apply.
    ConfirmationRequired {
        message: String,
        warning: String,
        table: String,
        filter: ValueMap,
    },
}

impl<T> Envelope<T> {
    /// Build an error envelope from a service-level error.
    pub fn from_error(table: impl Into<Option<String>>, err: DbError) -> Self {
        Self::Error {
            error: err.to_string(),
            table: table.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    pub fn is_confirmation_required(&self) -> bool {
        matches!(self, Self::ConfirmationRequired { .. })
    }

    /// The success payload, if any.
    pub fn payload(&self) -> Option<&T> {
        match self {
            Self::Success(payload) => Some(payload),
            _ => None,
        }
    }

    /// The error message, if this is an error envelope.
    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Error { error, .. } => Some(error),
            _ => None,
        }
    }
}

impl<T: Serialize> Envelope<T> {
    /// Serialize for transport. Infallible for the payload types this
    /// crate produces; anything unserializable degrades to JSON null.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Serialize)]
    struct Payload {
        table: String,
        rows_affected: u64,
    }

    #[test]
    fn test_success_envelope_serialization() {
        let envelope = Envelope::Success(Payload {
            table: "users".to_string(),
            rows_affected: 1,
        });
        let json = serde_json::to_string(&envelope).unwrap();
        assert!(json.contains("\"status\":\"success\""));
        assert!(json.contains("\"rows_affected\":1"));
        assert!(envelope.is_success());
        assert_eq!(envelope.payload().unwrap().rows_affected, 1);
    }

    #[test]
    fn test_error_envelope_serialization() {
        let envelope: Envelope<Payload> = Envelope::from_error(
            Some("users".to_string()),
            DbError::query("syntax error near 'FORM'"),
        );
        let json = serde_json::to_string(&envelope).unwrap();
        assert!(json.contains("\"status\":\"error\""));
        assert!(json.contains("\"table\":\"users\""));
        assert!(envelope.is_error());
        assert!(envelope.error_message().unwrap().contains("syntax error"));
    }

    #[test]
    fn test_error_envelope_without_table() {
        let envelope: Envelope<Payload> = Envelope::from_error(None, DbError::connection("down"));
        let json = serde_json::to_string(&envelope).unwrap();
        assert!(!json.contains("\"table\""));
    }

    #[test]
    fn test_confirmation_envelope_serialization() {
        let envelope: Envelope<Payload> = Envelope::ConfirmationRequired {
            message: "This operation requires explicit confirmation".to_string(),
            warning: "records in 'users' matching the filter will be deleted".to_string(),
            table: "users".to_string(),
            filter: ValueMap::new().with("active", false),
        };
        let json = serde_json::to_string(&envelope).unwrap();
        assert!(json.contains("\"status\":\"confirmation_required\""));
        assert!(json.contains("\"filter\":{\"active\":false}"));
        assert!(envelope.is_confirmation_required());
        assert!(envelope.payload().is_none());
    }
}
