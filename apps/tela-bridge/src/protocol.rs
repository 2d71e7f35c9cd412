//! Envelopes for the extension-facing command protocol.
//!
//! Commands decode into a tagged enum so a bad shape fails at decode time
//! instead of as a runtime type error deep in a handler. Replies echo the
//! request id unchanged; events carry no id at all.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Fixed id of the unsolicited SCID listing pushed after `set_node`.
pub const INIT_SCIDS_ID: &str = "init_scids";

#[derive(Debug, Clone, Deserialize)]
pub struct CommandEnvelope {
    #[serde(default)]
    pub id: Value,
    #[serde(flatten)]
    pub command: Command,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum Command {
    SetNode { params: SetNodeParams },
    DisconnectNode,
    LoadScid { params: LoadScidParams },
    ServerStatus,
    ListScids,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SetNodeParams {
    pub node: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoadScidParams {
    pub scid: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyEnvelope {
    pub ok: bool,
    pub id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ReplyEnvelope {
    pub fn ok(id: Value) -> Self {
        Self { ok: true, id, result: None, error: None }
    }

    pub fn with_result(id: Value, result: Value) -> Self {
        Self { ok: true, id, result: Some(result), error: None }
    }

    pub fn err(id: Value, message: impl Into<String>) -> Self {
        Self { ok: false, id, result: None, error: Some(message.into()) }
    }
}

/// Unsolicited progress messages pushed by the sync orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    NodeUnreachable { node: String },
    SyncProgress { indexed: i64, chain: i64 },
    SyncComplete { height: i64 },
}

/// Everything written to the peer goes through one channel so replies and
/// events keep their causal order.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Outbound {
    Reply(ReplyEnvelope),
    Event(Event),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decode(value: Value) -> CommandEnvelope {
        serde_json::from_value(value).expect("decode envelope")
    }

    #[test]
    fn commands_decode_with_their_params() {
        let envelope = decode(json!({
            "cmd": "set_node",
            "id": "req-9",
            "params": {"node": " 10.0.0.4:10102 "},
        }));
        assert_eq!(envelope.id, json!("req-9"));
        match envelope.command {
            Command::SetNode { params } => assert_eq!(params.node, " 10.0.0.4:10102 "),
            other => panic!("unexpected command: {other:?}"),
        }

        let envelope = decode(json!({"cmd": "list_scids", "id": 3}));
        assert!(matches!(envelope.command, Command::ListScids));

        let envelope = decode(json!({"cmd": "disconnect_node"}));
        assert_eq!(envelope.id, Value::Null);
        assert!(matches!(envelope.command, Command::DisconnectNode));
    }

    #[test]
    fn unrecognized_commands_map_to_unknown() {
        let envelope = decode(json!({"cmd": "open_pod_bay_doors", "id": 1}));
        assert!(matches!(envelope.command, Command::Unknown));
    }

    #[test]
    fn missing_params_is_a_decode_error() {
        let err = serde_json::from_value::<CommandEnvelope>(json!({"cmd": "load_scid", "id": 1}))
            .unwrap_err();
        assert!(err.to_string().contains("params"));
    }

    #[test]
    fn replies_omit_empty_fields() {
        let reply = ReplyEnvelope::ok(json!("a"));
        let encoded = serde_json::to_value(&reply).unwrap();
        assert_eq!(encoded, json!({"ok": true, "id": "a"}));

        let reply = ReplyEnvelope::err(json!(1), "node not set");
        let encoded = serde_json::to_value(&reply).unwrap();
        assert_eq!(encoded, json!({"ok": false, "id": 1, "error": "node not set"}));
    }

    #[test]
    fn events_serialize_flat_with_their_tag() {
        let event = Event::SyncProgress { indexed: 90, chain: 120 };
        let encoded = serde_json::to_value(&event).unwrap();
        assert_eq!(encoded, json!({"event": "sync_progress", "indexed": 90, "chain": 120}));

        let event = Event::NodeUnreachable { node: "http://10.0.0.4:10102".into() };
        let encoded = serde_json::to_value(&event).unwrap();
        assert_eq!(
            encoded,
            json!({"event": "node_unreachable", "node": "http://10.0.0.4:10102"})
        );
    }
}
