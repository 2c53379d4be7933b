//! JSON-RPC 2.0 wire envelope.
//!
//! Dynamic JSON shapes from the backend are never allowed past this module:
//! every inbound frame is decoded into [`RpcResponse`] and immediately
//! resolved into a typed success value or a [`super::BackendError`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Serialize)]
pub struct RpcRequest {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: String,
    pub params: Value,
}

impl RpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method: method.into(),
            params,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

/// An inbound frame. `id` is absent for notifications, which the reader
/// task ignores outright.
#[derive(Debug, Deserialize)]
pub struct RpcResponse {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<RpcError>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serializes_with_jsonrpc_2_0_envelope() {
        let req = RpcRequest::new(7, "pool.dataset.query", serde_json::json!({"name": "tank/vol"}));
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value["jsonrpc"], "2.0");
        assert_eq!(value["id"], 7);
        assert_eq!(value["method"], "pool.dataset.query");
    }

    #[test]
    fn response_without_id_is_a_notification() {
        let raw = r#"{"jsonrpc":"2.0","method":"pool.dataset.changed","params":{}}"#;
        let resp: RpcResponse = serde_json::from_str(raw).unwrap();
        assert!(resp.id.is_none());
    }

    #[test]
    fn response_decodes_result_and_error_variants() {
        let ok = r#"{"jsonrpc":"2.0","id":1,"result":{"name":"tank/vol"}}"#;
        let resp: RpcResponse = serde_json::from_str(ok).unwrap();
        assert_eq!(resp.id, Some(1));
        assert!(resp.result.is_some());
        assert!(resp.error.is_none());

        let err = r#"{"jsonrpc":"2.0","id":2,"error":{"code":1001,"message":"not found"}}"#;
        let resp: RpcResponse = serde_json::from_str(err).unwrap();
        assert_eq!(resp.id, Some(2));
        assert!(resp.result.is_none());
        assert_eq!(resp.error.unwrap().code, 1001);
    }
}
