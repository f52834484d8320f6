//! # ChangeEvent
//! What a listen stream emits for every key it covers. The same shape is forwarded verbatim as the body of
//! outbound webhook POSTs and as the untagged change messages the data viewer's worker sends to the UI.
//!
//! `data` is absent both for deletions and for ancestors the service created implicitly while writing a
//! deeper key.

pub const DEFAULT_ACL: &str = "$publicCreate";

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ChangeEvent {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    pub acl: String,
    pub exists: bool,
}

impl ChangeEvent {
    pub fn upsert(key: impl Into<String>, data: serde_json::Value, acl: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            data: Some(data),
            acl: acl.into(),
            exists: true,
        }
    }

    pub fn deleted(key: impl Into<String>, acl: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            data: None,
            acl: acl.into(),
            exists: false,
        }
    }
}
