// Copyright 2026 BadCompany
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! JSON-RPC 2.0 helpers.
//!
//! The bridge never interprets MCP method semantics, so messages are kept as
//! opaque `serde_json::Value` objects. This module provides the small set of
//! inspections and envelope constructors the transport adapters need.

use serde_json::{json, Value};

/// JSON-RPC 2.0 error codes used by the bridge.
pub mod codes {
    /// Generic server error (bad session, method not allowed).
    pub const ERROR_SERVER: i32 = -32000;
    /// Internal error (standard JSON-RPC)
    pub const ERROR_INTERNAL: i32 = -32603;
    /// Parse error (standard JSON-RPC)
    pub const ERROR_PARSE: i32 = -32700;
}

/// The id of a message, if it carries a non-null one.
pub fn message_id(msg: &Value) -> Option<&Value> {
    msg.get("id").filter(|id| !id.is_null())
}

/// Stable map key for an id: strings keep their content, everything else
/// uses the JSON rendering. `"42"` and `42` must not collide, so string ids
/// are prefixed.
pub fn id_key(id: &Value) -> String {
    match id.as_str() {
        Some(s) => format!("s:{s}"),
        None => id.to_string(),
    }
}

/// A request carries a method and an id.
pub fn is_request(msg: &Value) -> bool {
    msg.get("method").is_some() && message_id(msg).is_some()
}

pub fn is_initialize_request(msg: &Value) -> bool {
    is_request(msg) && msg.get("method").and_then(Value::as_str) == Some("initialize")
}

/// A response carries an id and a result or error, but no method.
pub fn is_response(msg: &Value) -> bool {
    msg.get("method").is_none()
        && message_id(msg).is_some()
        && (msg.get("result").is_some() || msg.get("error").is_some())
}

pub fn notification(method: &str) -> Value {
    json!({ "jsonrpc": "2.0", "method": method })
}

/// JSON-RPC error envelope. `id` is `null` when the offending request id is
/// unknown.
pub fn error_envelope(code: i32, message: &str, id: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "error": { "code": code, "message": message },
        "id": id,
    })
}
