//! Local edit intents on their way to the sync service.
//!
//! A successful write does not touch the tree: the change stream is the only thing that mutates tree state,
//! so success just produces an acknowledgment for the user. A failure produces an error notification and,
//! for node creation, asks the view to reopen inline editing on the node.

use std::collections::HashMap;

use serde_json::Value;

use crate::error::EditError;
use crate::messages::{WorkerRequest, WriteDescriptor, WriteIntent};
use crate::notifications::Notification;

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PendingWriteKind {
    Create,
    /// Written as a create at the new path. The old path disappears through its own delete event.
    Rename,
    UpdateData,
    Delete,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PendingWrite {
    pub target_id: String,
    pub kind: PendingWriteKind,
    pub text: String,
    pub parent: Option<String>,
    pub payload: Option<Value>,
}

impl PendingWrite {
    pub fn create(target_id: String, text: String, parent: Option<String>) -> Self {
        Self {
            target_id,
            kind: PendingWriteKind::Create,
            text,
            parent,
            payload: None,
        }
    }

    pub fn rename(target_id: String, text: String, parent: Option<String>, data: Value) -> Self {
        Self {
            target_id,
            kind: PendingWriteKind::Rename,
            text,
            parent,
            payload: Some(data),
        }
    }

    pub fn update_data(
        target_id: String,
        text: String,
        parent: Option<String>,
        data: Value,
    ) -> Self {
        Self {
            target_id,
            kind: PendingWriteKind::UpdateData,
            text,
            parent,
            payload: Some(data),
        }
    }

    pub fn delete(target_id: String, text: String) -> Self {
        Self {
            target_id,
            kind: PendingWriteKind::Delete,
            text,
            parent: None,
            payload: None,
        }
    }

    pub fn to_intent(&self) -> WriteIntent {
        let descriptor = WriteDescriptor {
            key: self.target_id.clone(),
            text: self.text.clone(),
            parent: self.parent.clone(),
            data: self.payload.as_ref().map(Value::to_string),
            error: None,
        };
        match self.kind {
            PendingWriteKind::Create | PendingWriteKind::Rename => WriteIntent::NewNode(descriptor),
            PendingWriteKind::UpdateData => WriteIntent::UpdateData(descriptor),
            PendingWriteKind::Delete => WriteIntent::DeleteNode(descriptor),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WriteOutcome {
    pub kind: PendingWriteKind,
    pub target_id: String,
    pub succeeded: bool,
    pub notification: Notification,
    /// Inline editing should reopen on `target_id` so the user can pick another name.
    pub reopen_edit: bool,
}

#[derive(Debug, Default)]
pub struct PendingWriteCoordinator {
    in_flight: HashMap<String, PendingWrite>,
    requests: Vec<WorkerRequest>,
}

impl PendingWriteCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues the write for the worker. At most one write per target is in flight.
    pub fn submit(&mut self, write: PendingWrite) -> Result<(), EditError> {
        if self.in_flight.contains_key(&write.target_id) {
            return Err(EditError::WriteInFlight(write.text));
        }
        log::debug!("Submitting {:?} for {:?}", write.kind, write.target_id);
        self.requests.push(WorkerRequest::Write(write.to_intent()));
        self.in_flight.insert(write.target_id.clone(), write);
        Ok(())
    }

    pub fn take_requests(&mut self) -> Vec<WorkerRequest> {
        std::mem::take(&mut self.requests)
    }

    pub fn is_pending(&self, target_id: &str) -> bool {
        self.in_flight.contains_key(target_id)
    }

    pub fn create_in_flight(&self) -> bool {
        self.in_flight
            .values()
            .any(|write| write.kind == PendingWriteKind::Create)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Resolves the echo the worker sent back for a write.
    pub fn complete(&mut self, echo: &WriteIntent) -> WriteOutcome {
        let descriptor = echo.descriptor();
        let submitted = self.in_flight.remove(&descriptor.key).map(|write| write.kind);

        let kind = match (echo, submitted) {
            (WriteIntent::NewNode(_), Some(PendingWriteKind::Rename)) => PendingWriteKind::Rename,
            (WriteIntent::NewNode(_), _) => PendingWriteKind::Create,
            (WriteIntent::UpdateData(_), _) => PendingWriteKind::UpdateData,
            (WriteIntent::DeleteNode(_), _) => PendingWriteKind::Delete,
        };
        let text = &descriptor.text;

        let (succeeded, notification) = match &descriptor.error {
            None => {
                let message = match kind {
                    PendingWriteKind::Create | PendingWriteKind::Rename => {
                        format!("Successfully saved node \"{text}\"")
                    }
                    PendingWriteKind::UpdateData => {
                        format!("Successfully saved data for node \"{text}\"")
                    }
                    PendingWriteKind::Delete => format!("Successfully deleted node \"{text}\""),
                };
                (true, Notification::success(message))
            }
            Some(error) => {
                log::warn!("{kind:?} of {:?} failed: {error}", descriptor.key);
                let message = match kind {
                    PendingWriteKind::Create | PendingWriteKind::Rename => {
                        format!("Could not save node \"{text}\": {error}")
                    }
                    PendingWriteKind::UpdateData => {
                        format!("Could not save data for node \"{text}\": {error}")
                    }
                    PendingWriteKind::Delete => {
                        format!("Could not delete node \"{text}\": {error}")
                    }
                };
                (false, Notification::error(message))
            }
        };

        WriteOutcome {
            kind,
            target_id: descriptor.key.clone(),
            succeeded,
            reopen_edit: !succeeded
                && matches!(kind, PendingWriteKind::Create | PendingWriteKind::Rename),
            notification,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn create(id: &str, text: &str) -> PendingWrite {
        PendingWrite::create(id.to_string(), text.to_string(), None)
    }

    #[test]
    fn test_submit_queues_a_request() {
        let mut writes = PendingWriteCoordinator::new();
        writes.submit(create("team", "team")).unwrap();

        let requests = writes.take_requests();
        assert_eq!(requests.len(), 1);
        let WorkerRequest::Write(WriteIntent::NewNode(descriptor)) = &requests[0] else {
            panic!("expected a new_node request");
        };
        assert_eq!(descriptor.key, "team");
        assert!(writes.take_requests().is_empty());
        assert!(writes.is_pending("team"));
        assert!(writes.create_in_flight());
    }

    #[test]
    fn test_one_write_per_target() {
        let mut writes = PendingWriteCoordinator::new();
        writes.submit(create("a", "a")).unwrap();
        assert_eq!(
            writes.submit(PendingWrite::delete("a".to_string(), "a".to_string())),
            Err(EditError::WriteInFlight("a".to_string()))
        );
        assert_eq!(writes.in_flight(), 1);
    }

    #[test]
    fn test_success_acknowledges() {
        let mut writes = PendingWriteCoordinator::new();
        let write = PendingWrite::update_data(
            "a.b".to_string(),
            "b".to_string(),
            Some("a".to_string()),
            json!({ "x": 1 }),
        );
        let intent = write.to_intent();
        assert_eq!(intent.descriptor().data.as_deref(), Some(r#"{"x":1}"#));
        writes.submit(write).unwrap();

        let outcome = writes.complete(&intent);
        assert!(outcome.succeeded);
        assert!(!outcome.reopen_edit);
        assert_eq!(
            outcome.notification,
            Notification::success("Successfully saved data for node \"b\"")
        );
        assert!(!writes.is_pending("a.b"));
    }

    #[test]
    fn test_failed_create_reopens_editing() {
        let mut writes = PendingWriteCoordinator::new();
        let write = create("bad", "bad");
        let echo = write.to_intent().with_error("key already exists");
        writes.submit(write).unwrap();

        let outcome = writes.complete(&echo);
        assert!(!outcome.succeeded);
        assert!(outcome.reopen_edit);
        assert_eq!(outcome.kind, PendingWriteKind::Create);
        assert_eq!(
            outcome.notification,
            Notification::error("Could not save node \"bad\": key already exists")
        );
        assert!(!writes.create_in_flight());
    }

    #[test]
    fn test_rename_echo_is_recognised() {
        let mut writes = PendingWriteCoordinator::new();
        let write = PendingWrite::rename("b".to_string(), "b".to_string(), None, json!({}));
        let echo = write.to_intent().with_error("denied");
        writes.submit(write).unwrap();

        let outcome = writes.complete(&echo);
        assert_eq!(outcome.kind, PendingWriteKind::Rename);
        assert!(outcome.reopen_edit);
    }

    #[test]
    fn test_failed_delete_does_not_reopen_editing() {
        let mut writes = PendingWriteCoordinator::new();
        let write = PendingWrite::delete("a".to_string(), "a".to_string());
        let echo = write.to_intent().with_error("key \"a\" still has children");
        writes.submit(write).unwrap();

        let outcome = writes.complete(&echo);
        assert!(!outcome.reopen_edit);
        assert_eq!(
            outcome.notification.message,
            "Could not delete node \"a\": key \"a\" still has children"
        );
    }
}
