//! Call and response envelopes carried on a function's IPC channels.
//!
//! Envelopes travel through the registry as `Value::Map`s:
//!
//! ```json
//! {"args": [21], "transactionId": "5b0e..."}
//! {"response": 42, "transactionId": "5b0e..."}
//! {"error": "boom", "transactionId": "5b0e..."}
//! ```

use openv_registry::Value;
use serde::{Deserialize, Serialize};

use crate::error::{Result, ServiceError};

/// A request to run a function.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallMessage {
    pub args: Vec<Value>,
    pub transaction_id: String,
}

impl CallMessage {
    /// A call with a fresh transaction id.
    pub fn new(args: Vec<Value>) -> Self {
        Self {
            args,
            transaction_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn to_value(&self) -> Result<Value> {
        Ok(openv_registry::to_value(self)?)
    }

    /// Decode a queued call, rejecting malformed ones.
    pub fn from_value(value: &Value) -> Result<Self> {
        let call: Self = openv_registry::from_value(value.clone()).map_err(|e| {
            ServiceError::validation(format!("malformed call message: {}", e))
        })?;
        if call.transaction_id.is_empty() {
            return Err(ServiceError::validation(
                "transaction id must be a non-empty string",
            ));
        }
        Ok(call)
    }
}

/// The answer to a `CallMessage`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseEnvelope {
    pub transaction_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ResponseEnvelope {
    pub fn success(transaction_id: impl Into<String>, response: Value) -> Self {
        Self {
            transaction_id: transaction_id.into(),
            response: Some(response),
            error: None,
        }
    }

    pub fn failure(transaction_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            transaction_id: transaction_id.into(),
            response: None,
            error: Some(error.into()),
        }
    }

    pub fn to_value(&self) -> Result<Value> {
        Ok(openv_registry::to_value(self)?)
    }

    /// Decode a queued response. Anything without a transaction id is
    /// not a response.
    pub fn from_value(value: &Value) -> Option<Self> {
        openv_registry::from_value(value.clone()).ok()
    }

    /// The function's result: its value, or the callee's error message.
    pub fn into_outcome(self) -> std::result::Result<Value, String> {
        match self.error {
            Some(message) => Err(message),
            None => Ok(self.response.unwrap_or_default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn call_survives_the_registry() {
        let call = CallMessage::new(vec![Value::from(21), Value::Bytes(vec![1, 2])]);
        let decoded = CallMessage::from_value(&call.to_value().unwrap()).unwrap();
        assert_eq!(decoded, call);
    }

    #[test]
    fn call_ids_are_fresh() {
        assert_ne!(
            CallMessage::new(vec![]).transaction_id,
            CallMessage::new(vec![]).transaction_id
        );
    }

    #[test]
    fn malformed_calls_are_validation_errors() {
        let no_args = Value::Map(BTreeMap::from([(
            "transactionId".to_string(),
            Value::from("t"),
        )]));
        assert!(matches!(
            CallMessage::from_value(&no_args),
            Err(ServiceError::Validation { .. })
        ));

        let no_id = Value::Map(BTreeMap::from([("args".to_string(), Value::array())]));
        assert!(matches!(
            CallMessage::from_value(&no_id),
            Err(ServiceError::Validation { .. })
        ));

        assert!(CallMessage::from_value(&Value::from(3)).is_err());
    }

    #[test]
    fn response_outcomes() {
        let ok = ResponseEnvelope::success("t", Value::from(42)).to_value().unwrap();
        let ok = ResponseEnvelope::from_value(&ok).unwrap();
        assert_eq!(ok.into_outcome(), Ok(Value::from(42)));

        let failed = ResponseEnvelope::failure("t", "boom").to_value().unwrap();
        let failed = ResponseEnvelope::from_value(&failed).unwrap();
        assert_eq!(failed.into_outcome(), Err("boom".to_string()));

        assert!(ResponseEnvelope::from_value(&Value::Null).is_none());
    }

    #[test]
    fn registry_shape_uses_camel_case() {
        let env = ResponseEnvelope::success("abc", Value::from(1));
        assert_eq!(
            env.to_value().unwrap(),
            Value::Map(BTreeMap::from([
                ("response".to_string(), Value::from(1)),
                ("transactionId".to_string(), Value::from("abc")),
            ]))
        );

        let failed = ResponseEnvelope::failure("abc", "boom").to_value().unwrap();
        assert_eq!(failed.field("response"), None);
        assert_eq!(failed.field("error"), Some(&Value::from("boom")));
    }

    #[test]
    fn empty_transaction_ids_are_rejected() {
        let value = Value::Map(BTreeMap::from([
            ("args".to_string(), Value::array()),
            ("transactionId".to_string(), Value::from("")),
        ]));
        assert!(matches!(
            CallMessage::from_value(&value),
            Err(ServiceError::Validation { .. })
        ));
    }
}
