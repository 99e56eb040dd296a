//! JSON bodies exchanged between [`HttpTransport`](super::HttpTransport) and
//! the invocation endpoint.
//!
//! * request: JSON array of positional arguments
//! * `200 OK`: `{"ret": <value>}`
//! * `204 No Content`: the handler produced no value
//! * failure: `{"Exception": {"message", "type_name", "log"}}`

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::RemoteException;

/// Query parameter marking a fire-and-forget request.
pub const ONEWAY_PARAM: &str = "oneway";

/// Fault type names the endpoint raises itself, as opposed to faults
/// raised by a handler.
pub const NOT_FOUND_FAULT: &str = "NotFound";
pub const BAD_REQUEST_FAULT: &str = "BadRequest";
pub const UNAVAILABLE_FAULT: &str = "Unavailable";

pub const ACTORS_SEGMENT: &str = "actors";
pub const SERVICES_SEGMENT: &str = "services";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReturnEnvelope {
    pub ret: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultEnvelope {
    #[serde(rename = "Exception")]
    pub exception: RemoteException,
}

impl FaultEnvelope {
    pub fn new(exception: RemoteException) -> Self {
        Self { exception }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvokeQuery {
    #[serde(default)]
    pub oneway: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fault_envelope_shape() {
        let envelope = FaultEnvelope::new(RemoteException {
            message: "out of stock".into(),
            type_name: "OutOfStock".into(),
            log: None,
        });
        assert_eq!(
            serde_json::to_value(&envelope).unwrap(),
            json!({"Exception": {"message": "out of stock", "type_name": "OutOfStock"}})
        );
    }
}
