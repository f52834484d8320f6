mod error;
mod messages;
mod notifications;
mod pending;
mod properties;
mod tree;
#[cfg(target_arch = "wasm32")]
mod utils;
mod view_state;
pub mod worker;

#[cfg(target_arch = "wasm32")]
mod bindings;

use serde::{Deserialize, Serialize};
#[cfg(target_arch = "wasm32")]
use wasm_bindgen::prelude::*;

pub use error::EditError;
pub use messages::{
    ControlRequest, HostPort, WorkerMessage, WorkerRequest, WriteDescriptor, WriteIntent,
};
pub use notifications::Notification;
pub use pending::{PendingWrite, PendingWriteCoordinator, PendingWriteKind, WriteOutcome};
pub use properties::{PropertyPanel, PropertyRow, PropertyViewModel, property_rows};
pub use tree::{
    EditKind, NEW_NODE_NAME, NodeStatus, TreeNode, TreeNotification, TreeReconciler, TreeRow,
};
pub use view_state::TreeViewState;
pub use worker::{ViewerConfig, Worker, WorkerError};

#[cfg_attr(target_arch = "wasm32", wasm_bindgen)]
pub fn get_app_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

/// Which of the add, delete and edit-data buttons can be pressed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(target_arch = "wasm32", derive(tsify::Tsify))]
#[cfg_attr(target_arch = "wasm32", tsify(into_wasm_abi, from_wasm_abi))]
pub struct Controls {
    pub add_node: bool,
    pub delete_node: bool,
    pub edit_data: bool,
}

/// Everything the UI context knows. It never talks to the sync service itself: writes go out through
/// [`DataViewer::take_requests`] and come back, along with remote changes, through
/// [`DataViewer::handle_worker_message`].
#[derive(Debug)]
pub struct DataViewer {
    tree: TreeReconciler,
    writes: PendingWriteCoordinator,
    properties: PropertyViewModel,
    session_requests: Vec<WorkerRequest>,
    notifications: Vec<Notification>,
}

impl DataViewer {
    pub fn new(supports_access_policy: bool, view_state: Option<TreeViewState>) -> Self {
        Self {
            tree: TreeReconciler::new(view_state),
            writes: PendingWriteCoordinator::new(),
            properties: PropertyViewModel::new(supports_access_policy),
            session_requests: Vec::new(),
            notifications: Vec::new(),
        }
    }

    pub fn tree(&self) -> &TreeReconciler {
        &self.tree
    }

    /// Asks the worker to open a session for this page and start listening.
    pub fn start_session(&mut self, page: HostPort) {
        self.session_requests
            .push(WorkerRequest::Control(ControlRequest::SetHostPort(page)));
        self.session_requests
            .push(WorkerRequest::Control(ControlRequest::Connect));
    }

    pub fn handle_worker_message(&mut self, message: WorkerMessage) {
        match message {
            WorkerMessage::Change(change) => self.tree.apply(&change),
            WorkerMessage::Echo(echo) => {
                let outcome = self.writes.complete(&echo);
                if outcome.succeeded {
                    self.tree.settle_write(&outcome.target_id);
                }
                if outcome.reopen_edit && !self.tree.reopen_edit(&outcome.target_id) {
                    log::warn!("Could not reopen editing on {:?}", outcome.target_id);
                }
                self.notifications.push(outcome.notification);
            }
        }
        self.refresh_properties();
    }

    pub fn controls(&self) -> Controls {
        let editing = self.tree.editing().is_some() || self.properties.is_editing();
        let selected = self.tree.selected_node();
        Controls {
            add_node: !editing && !self.writes.create_in_flight(),
            delete_node: !editing && selected.is_some_and(TreeNode::is_leaf),
            edit_data: !editing && selected.is_some(),
        }
    }

    /// Adds a node under the selected one (or at the top level) and starts editing its name.
    pub fn add_node(&mut self) -> Result<String, EditError> {
        if !self.controls().add_node {
            return Err(EditError::EditInProgress);
        }
        let parent = self.tree.selected().map(str::to_string);
        let id = self.tree.begin_create(parent.as_deref())?;
        self.refresh_properties();
        Ok(id)
    }

    pub fn begin_rename(&mut self, id: &str) -> Result<(), EditError> {
        if self.properties.is_editing() {
            return Err(EditError::EditInProgress);
        }
        self.tree.begin_rename(id)
    }

    /// Rejected names are reported as an error notification and leave the edit open.
    pub fn commit_edit(&mut self, text: &str) -> Result<(), EditError> {
        let result = self
            .tree
            .commit_edit(text)
            .and_then(|write| match write {
                Some(write) => self.writes.submit(write),
                None => Ok(()),
            });
        self.refresh_properties();
        self.report(result)
    }

    pub fn cancel_edit(&mut self) -> Result<(), EditError> {
        let result = self.tree.cancel_edit();
        self.refresh_properties();
        result
    }

    /// Ignored while the data of the current selection is being edited.
    pub fn select(&mut self, id: Option<&str>) -> bool {
        if self.properties.is_editing() {
            return false;
        }
        let selected = self.tree.select(id);
        self.refresh_properties();
        selected
    }

    pub fn toggle_open(&mut self, id: &str) -> bool {
        self.tree.toggle_open(id)
    }

    pub fn delete_selected(&mut self) -> Result<(), EditError> {
        let result = self.delete_write().and_then(|write| self.writes.submit(write));
        self.report(result)
    }

    fn delete_write(&self) -> Result<PendingWrite, EditError> {
        if self.tree.editing().is_some() || self.properties.is_editing() {
            return Err(EditError::EditInProgress);
        }
        let Some(node) = self.tree.selected_node() else {
            return Err(EditError::NothingSelected);
        };
        if !node.is_leaf() {
            return Err(EditError::HasChildren(node.segment.clone()));
        }
        Ok(PendingWrite::delete(node.id.clone(), node.segment.clone()))
    }

    pub fn begin_data_edit(&mut self) -> Result<(), EditError> {
        if self.tree.editing().is_some() {
            return Err(EditError::EditInProgress);
        }
        self.properties.begin_edit()
    }

    pub fn save_data(&mut self, text: &str) -> Result<(), EditError> {
        let result = self
            .properties
            .save(text)
            .and_then(|write| self.writes.submit(write));
        self.report(result)
    }

    pub fn cancel_data_edit(&mut self) -> Result<(), EditError> {
        self.properties.cancel()
    }

    pub fn property_panel(&self) -> PropertyPanel {
        self.properties.panel()
    }

    pub fn rows(&self) -> Vec<TreeRow> {
        self.tree.rows()
    }

    pub fn view_state(&self) -> TreeViewState {
        self.tree.view_state()
    }

    /// Everything that has to be posted to the worker, in order.
    pub fn take_requests(&mut self) -> Vec<WorkerRequest> {
        let mut requests = std::mem::take(&mut self.session_requests);
        requests.extend(self.writes.take_requests());
        requests
    }

    pub fn take_notifications(&mut self) -> Vec<Notification> {
        std::mem::take(&mut self.notifications)
    }

    fn refresh_properties(&mut self) {
        if !self.tree.take_notifications().is_empty() {
            self.properties.show(self.tree.selected_node());
        }
    }

    fn report(&mut self, result: Result<(), EditError>) -> Result<(), EditError> {
        if let Err(e) = &result {
            self.notifications.push(Notification::error(e.to_string()));
        }
        result
    }
}
