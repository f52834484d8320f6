//! Messages between the UI context and the worker context. Everything is plain JSON so it can cross a
//! `postMessage` boundary unchanged.
//!
//! UI → worker: a [`WorkerRequest`], either a write intent or a session control message.
//! Worker → UI: a [`WorkerMessage`], either the echoed write intent (with `error` set on failure) or an
//! untagged [`ChangeEvent`] from the listen stream.

use serde::{Deserialize, Serialize};
use tether::ChangeEvent;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(target_arch = "wasm32", derive(tsify::Tsify))]
#[cfg_attr(target_arch = "wasm32", tsify(into_wasm_abi, from_wasm_abi))]
pub struct WriteDescriptor {
    pub key: String,
    /// The node name shown to the user in feedback messages.
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    /// JSON text of the value to write.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WriteIntent {
    NewNode(WriteDescriptor),
    UpdateData(WriteDescriptor),
    DeleteNode(WriteDescriptor),
}

impl WriteIntent {
    pub fn descriptor(&self) -> &WriteDescriptor {
        match self {
            WriteIntent::NewNode(d) | WriteIntent::UpdateData(d) | WriteIntent::DeleteNode(d) => d,
        }
    }

    pub fn descriptor_mut(&mut self) -> &mut WriteDescriptor {
        match self {
            WriteIntent::NewNode(d) | WriteIntent::UpdateData(d) | WriteIntent::DeleteNode(d) => d,
        }
    }

    pub fn with_error(mut self, error: impl ToString) -> Self {
        self.descriptor_mut().error = Some(error.to_string());
        self
    }
}

/// Sent by the page once the user has signed in (or chosen the guest login).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostPort {
    pub host: String,
    #[serde(default)]
    pub port: String,
    pub protocol: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlRequest {
    SetHostPort(HostPort),
    Connect,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WorkerRequest {
    Write(WriteIntent),
    Control(ControlRequest),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WorkerMessage {
    Echo(WriteIntent),
    Change(ChangeEvent),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_write_intent_is_tagged() {
        let intent = WriteIntent::NewNode(WriteDescriptor {
            key: "team.eng".to_string(),
            text: "eng".to_string(),
            parent: Some("team".to_string()),
            ..Default::default()
        });
        assert_eq!(
            serde_json::to_value(&intent).unwrap(),
            json!({ "type": "new_node", "key": "team.eng", "text": "eng", "parent": "team" })
        );
    }

    #[test]
    fn test_requests_parse() {
        let request: WorkerRequest = serde_json::from_value(json!({
            "type": "set_host_port", "host": "", "port": "", "protocol": "http:"
        }))
        .unwrap();
        assert!(matches!(
            request,
            WorkerRequest::Control(ControlRequest::SetHostPort(HostPort { token: None, .. }))
        ));

        let request: WorkerRequest =
            serde_json::from_value(json!({ "type": "connect" })).unwrap();
        assert_eq!(request, WorkerRequest::Control(ControlRequest::Connect));

        let request: WorkerRequest = serde_json::from_value(json!({
            "type": "update_data", "key": "a", "text": "a", "data": "{\"x\":1}"
        }))
        .unwrap();
        assert!(matches!(request, WorkerRequest::Write(WriteIntent::UpdateData(_))));
    }

    #[test]
    fn test_messages_distinguish_echoes_from_changes() {
        let echo: WorkerMessage = serde_json::from_value(json!({
            "type": "delete_node", "key": "a", "text": "a", "error": "nope"
        }))
        .unwrap();
        let WorkerMessage::Echo(WriteIntent::DeleteNode(descriptor)) = echo else {
            panic!("expected a delete echo");
        };
        assert_eq!(descriptor.error.as_deref(), Some("nope"));

        let change: WorkerMessage = serde_json::from_value(json!({
            "key": "a.b", "data": { "x": 1 }, "acl": "$publicCreate", "exists": true
        }))
        .unwrap();
        assert!(matches!(change, WorkerMessage::Change(ChangeEvent { exists: true, .. })));
    }
}
