//! The tree view of the flat key space.
//!
//! Every key path becomes a node whose ancestors are the path's prefixes. Changes arrive one key at a time and in
//! no particular order, so a deep key can show up before its ancestors. Missing ancestors are filled in as
//! `Invalid` placeholders and pruned again once nothing hangs off them.
//!
//! Siblings are kept sorted by [`keypath::compare_paths`]. The change stream is the only thing that makes nodes
//! `Valid`; local edits only move a node the user is editing.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tether::{ChangeEvent, DEFAULT_ACL};

use crate::error::EditError;
use crate::pending::PendingWrite;
use crate::view_state::TreeViewState;

/// Name given to a node the user has just added, before they type a real one.
pub const NEW_NODE_NAME: &str = "Node Name";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NodeStatus {
    Valid,
    /// Only there because a descendant exists.
    Invalid,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TreeNode {
    pub id: String,
    pub segment: String,
    pub parent: Option<String>,
    pub children: Vec<String>,
    pub data: Value,
    pub status: NodeStatus,
    pub acl: String,
    pub open: bool,
}

impl TreeNode {
    fn new(id: &str, data: Value, status: NodeStatus, acl: &str) -> Self {
        Self {
            id: id.to_string(),
            segment: keypath::last_segment(id).to_string(),
            parent: keypath::parent(id).map(str::to_string),
            children: Vec::new(),
            data,
            status,
            acl: acl.to_string(),
            open: false,
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

/// One visible line of the tree, in display order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(target_arch = "wasm32", derive(tsify::Tsify))]
#[cfg_attr(target_arch = "wasm32", tsify(into_wasm_abi, from_wasm_abi))]
pub struct TreeRow {
    pub id: String,
    pub text: String,
    pub depth: usize,
    pub status: NodeStatus,
    pub open: bool,
    pub selected: bool,
    pub editing: bool,
    pub leaf: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TreeNotification {
    /// Also sent when the selected node's data changed, so the property panel re-reads it.
    SelectionChanged(Option<String>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EditKind {
    Create,
    Rename,
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct Editing {
    id: String,
    kind: EditKind,
    /// For a rename, the id the service still has for this node.
    origin: Option<String>,
}

#[derive(Debug, Default)]
pub struct TreeReconciler {
    nodes: im::HashMap<String, TreeNode>,
    roots: Vec<String>,
    selected: Option<String>,
    editing: Option<Editing>,
    /// Renamed id -> id before the rename, until the rename's write completes.
    renames: HashMap<String, String>,
    view_state: Option<TreeViewState>,
    notifications: Vec<TreeNotification>,
}

impl TreeReconciler {
    /// `view_state` is the state saved by an earlier visit. Nodes listed there are reopened and reselected as
    /// they arrive.
    pub fn new(view_state: Option<TreeViewState>) -> Self {
        Self {
            view_state,
            ..Self::default()
        }
    }

    pub fn node(&self, id: &str) -> Option<&TreeNode> {
        self.nodes.get(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn roots(&self) -> &[String] {
        &self.roots
    }

    pub fn selected(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    pub fn selected_node(&self) -> Option<&TreeNode> {
        self.selected.as_deref().and_then(|id| self.nodes.get(id))
    }

    pub fn editing(&self) -> Option<&str> {
        self.editing.as_ref().map(|editing| editing.id.as_str())
    }

    pub fn edit_kind(&self) -> Option<EditKind> {
        self.editing.as_ref().map(|editing| editing.kind)
    }

    pub fn apply(&mut self, change: &ChangeEvent) {
        if let Err(e) = keypath::validate(&change.key) {
            log::warn!("Ignoring change for {:?}: {e}", change.key);
            return;
        }
        if !change.exists {
            self.remove(&change.key);
        } else if self.nodes.contains_key(&change.key) {
            self.update(&change.key, change.data.as_ref(), &change.acl);
        } else {
            self.materialize(&change.key, change.data.clone(), &change.acl);
        }
    }

    fn materialize(&mut self, key: &str, data: Option<Value>, acl: &str) {
        for ancestor in keypath::ancestors(key) {
            if !self.nodes.contains_key(ancestor) {
                self.insert(TreeNode::new(
                    ancestor,
                    Value::Null,
                    NodeStatus::Invalid,
                    acl,
                ));
            }
        }
        self.insert(TreeNode::new(
            key,
            data.unwrap_or(Value::Null),
            NodeStatus::Valid,
            acl,
        ));
    }

    fn update(&mut self, key: &str, data: Option<&Value>, acl: &str) {
        // ancestors written implicitly come without data; they say nothing about an existing node
        let Some(data) = data else {
            log::debug!("Ignoring change without data for {key:?}");
            return;
        };
        let Some(node) = self.nodes.get_mut(key) else {
            return;
        };
        node.data = data.clone();
        node.acl = acl.to_string();
        node.status = NodeStatus::Valid;
        self.refresh_if_selected(key);
    }

    fn remove(&mut self, key: &str) {
        let Some(node) = self.nodes.get_mut(key) else {
            return;
        };
        if !node.is_leaf() {
            // the service refuses such deletes, so this is an event that overtook its children's deletes
            log::warn!("{key:?} was deleted but still has children here, keeping it as a placeholder");
            node.status = NodeStatus::Invalid;
            node.data = Value::Null;
            self.refresh_if_selected(key);
            return;
        }

        if self.editing.as_ref().is_some_and(|editing| editing.id == key) {
            self.editing = None;
        }
        let selection_lost = self.selected.as_deref() == Some(key);

        let mut survivor = self.detach(key).and_then(|node| node.parent);
        while let Some(id) = survivor.as_deref() {
            let prunable = self.nodes.get(id).is_some_and(|node| {
                node.status == NodeStatus::Invalid
                    && node.is_leaf()
                    && (selection_lost || self.selected.as_deref() != Some(id))
            });
            if !prunable {
                break;
            }
            log::debug!("Pruning placeholder {id:?}");
            survivor = self.detach(id).and_then(|node| node.parent);
        }

        if selection_lost {
            self.set_selected(survivor);
        }
    }

    /// Inserts `node` among its siblings, applying any saved view state.
    fn insert(&mut self, mut node: TreeNode) {
        let id = node.id.clone();
        if let Some(state) = &self.view_state {
            node.open = state.is_open(&id);
        }
        self.attach(node);
        self.restore_selection(&id);
    }

    fn attach(&mut self, node: TreeNode) {
        let Some(siblings) = self.siblings_mut(node.parent.as_deref()) else {
            log::error!("Cannot attach {:?}: its parent is missing", node.id);
            return;
        };
        let index = keypath::insertion_index(siblings.as_slice(), &node.id);
        siblings.insert(index, node.id.clone());
        self.nodes.insert(node.id.clone(), node);
    }

    fn detach(&mut self, id: &str) -> Option<TreeNode> {
        let node = self.nodes.remove(id)?;
        if let Some(siblings) = self.siblings_mut(node.parent.as_deref()) {
            siblings.retain(|sibling| sibling != id);
        }
        Some(node)
    }

    fn siblings_mut(&mut self, parent: Option<&str>) -> Option<&mut Vec<String>> {
        match parent {
            Some(parent) => self.nodes.get_mut(parent).map(|node| &mut node.children),
            None => Some(&mut self.roots),
        }
    }

    fn restore_selection(&mut self, id: &str) {
        let Some(state) = &mut self.view_state else {
            return;
        };
        if state.selected() != Some(id) {
            return;
        }
        // only once: later selections are the user's
        state.state.core.selected.clear();
        self.set_selected(Some(id.to_string()));
    }

    fn refresh_if_selected(&mut self, id: &str) {
        if self.selected.as_deref() == Some(id) {
            self.notifications
                .push(TreeNotification::SelectionChanged(Some(id.to_string())));
        }
    }

    fn set_selected(&mut self, id: Option<String>) {
        if self.selected == id {
            return;
        }
        self.selected = id.clone();
        self.notifications
            .push(TreeNotification::SelectionChanged(id));
    }

    /// Unknown ids are ignored. Returns whether the selection was accepted.
    pub fn select(&mut self, id: Option<&str>) -> bool {
        match id {
            Some(id) if !self.nodes.contains_key(id) => {
                log::debug!("Ignoring selection of unknown node {id:?}");
                false
            }
            id => {
                self.set_selected(id.map(str::to_string));
                true
            }
        }
    }

    /// Returns the node's new open state.
    pub fn toggle_open(&mut self, id: &str) -> bool {
        let Some(node) = self.nodes.get_mut(id) else {
            return false;
        };
        node.open = !node.open;
        node.open
    }

    /// Adds a local node named [`NEW_NODE_NAME`] under `parent` and starts editing its name.
    pub fn begin_create(&mut self, parent: Option<&str>) -> Result<String, EditError> {
        if self.editing.is_some() {
            return Err(EditError::EditInProgress);
        }
        if let Some(parent) = parent {
            let Some(node) = self.nodes.get_mut(parent) else {
                return Err(EditError::UnknownNode(parent.to_string()));
            };
            node.open = true;
        }
        let id = keypath::child(parent, NEW_NODE_NAME);
        if self.nodes.contains_key(&id) {
            return Err(EditError::DuplicateId(id));
        }
        self.attach(TreeNode::new(
            &id,
            Value::Object(Default::default()),
            NodeStatus::Valid,
            DEFAULT_ACL,
        ));
        self.editing = Some(Editing {
            id: id.clone(),
            kind: EditKind::Create,
            origin: None,
        });
        Ok(id)
    }

    /// Only leaves can be renamed, since a rename moves one key.
    pub fn begin_rename(&mut self, id: &str) -> Result<(), EditError> {
        if self.editing.is_some() {
            return Err(EditError::EditInProgress);
        }
        let Some(node) = self.nodes.get(id) else {
            return Err(EditError::UnknownNode(id.to_string()));
        };
        if !node.is_leaf() {
            return Err(EditError::HasChildren(node.segment.clone()));
        }
        let origin = self.renames.remove(id).unwrap_or_else(|| id.to_string());
        self.editing = Some(Editing {
            id: id.to_string(),
            kind: EditKind::Rename,
            origin: Some(origin),
        });
        Ok(())
    }

    /// Finishes the open edit with the name the user typed.
    ///
    /// On success the node moves to its new id, becomes selected, and the write to send is returned.
    /// `Ok(None)` means a rename kept the old name and there is nothing to write.
    /// On error the edit stays open so the user can correct the name.
    pub fn commit_edit(&mut self, text: &str) -> Result<Option<PendingWrite>, EditError> {
        let Some(editing) = self.editing.clone() else {
            return Err(EditError::NotEditing);
        };
        let Some(node) = self.nodes.get(&editing.id) else {
            self.editing = None;
            return Err(EditError::UnknownNode(editing.id));
        };
        if !node.is_leaf() {
            return Err(EditError::HasChildren(node.segment.clone()));
        }

        let text = text.trim();
        if text.is_empty() || text == NEW_NODE_NAME {
            return Err(EditError::NameRequired);
        }
        if text.contains(keypath::SEPARATOR) {
            return Err(EditError::NestedName(text.to_string()));
        }
        let parent = node.parent.clone();
        let id = keypath::child(parent.as_deref(), text);
        keypath::validate(&id).map_err(|e| EditError::InvalidName(text.to_string(), e))?;

        if let Some(origin) = editing.origin.as_deref().filter(|origin| *origin == id) {
            // back to the name the service already has
            self.editing = None;
            self.restore(&editing.id, origin);
            return Ok(None);
        }
        if id != editing.id && self.nodes.contains_key(&id) {
            return Err(EditError::DuplicateId(id));
        }

        let data = node.data.clone();
        self.rekey(&editing.id, &id);
        self.editing = None;
        self.set_selected(Some(id.clone()));

        let write = match editing.origin {
            None => PendingWrite::create(id, text.to_string(), parent),
            Some(origin) => {
                self.renames.insert(id.clone(), origin);
                PendingWrite::rename(id, text.to_string(), parent, data)
            }
        };
        Ok(Some(write))
    }

    /// Drops an uncommitted new node. A rename goes back to the id the service has.
    pub fn cancel_edit(&mut self) -> Result<(), EditError> {
        let Some(editing) = self.editing.take() else {
            return Err(EditError::NotEditing);
        };
        match editing.origin {
            None => self.remove(&editing.id),
            Some(origin) => self.restore(&editing.id, &origin),
        }
        Ok(())
    }

    /// Puts a node whose write failed back into name editing.
    ///
    /// A failed create does not exist remotely, so cancelling the reopened edit discards it. A failed rename
    /// is reopened as a rename; cancelling it moves the node back to its old id.
    pub fn reopen_edit(&mut self, id: &str) -> bool {
        let origin = self.renames.remove(id);
        if !self.nodes.get(id).is_some_and(TreeNode::is_leaf) {
            return false;
        }
        if self.editing.is_some() {
            if let Some(origin) = origin {
                self.restore(id, &origin);
            }
            return false;
        }
        let kind = if origin.is_some() {
            EditKind::Rename
        } else {
            EditKind::Create
        };
        self.editing = Some(Editing {
            id: id.to_string(),
            kind,
            origin,
        });
        true
    }

    /// The write for `id` went through, so a rename there is final.
    pub fn settle_write(&mut self, id: &str) {
        self.renames.remove(id);
    }

    /// Moves a renamed node back to `origin`. If `origin` has come back through the change stream meanwhile,
    /// the renamed copy is dropped instead.
    fn restore(&mut self, id: &str, origin: &str) {
        if id == origin {
            return;
        }
        let was_selected = self.selected.as_deref() == Some(id);
        if self.nodes.contains_key(origin) {
            self.remove(id);
        } else {
            self.rekey(id, origin);
        }
        if was_selected {
            self.set_selected(Some(origin.to_string()));
        }
    }

    fn rekey(&mut self, old: &str, new: &str) {
        if old == new {
            return;
        }
        let Some(mut node) = self.detach(old) else {
            return;
        };
        node.id = new.to_string();
        node.segment = keypath::last_segment(new).to_string();
        self.attach(node);
    }

    pub fn view_state(&self) -> TreeViewState {
        let open: BTreeSet<String> = self
            .nodes
            .values()
            .filter(|node| node.open)
            .map(|node| node.id.clone())
            .collect();
        TreeViewState::new(open, self.selected.clone())
    }

    /// Rows of every node whose ancestors are all open, depth first.
    pub fn rows(&self) -> Vec<TreeRow> {
        let mut rows = Vec::new();
        let mut stack: Vec<(&str, usize)> =
            self.roots.iter().rev().map(|id| (id.as_str(), 0)).collect();

        while let Some((id, depth)) = stack.pop() {
            let Some(node) = self.nodes.get(id) else {
                continue;
            };
            rows.push(TreeRow {
                id: node.id.clone(),
                text: node.segment.clone(),
                depth,
                status: node.status,
                open: node.open,
                selected: self.selected.as_deref() == Some(id),
                editing: self.editing().is_some_and(|editing| editing == id),
                leaf: node.is_leaf(),
            });
            if node.open {
                stack.extend(
                    node.children
                        .iter()
                        .rev()
                        .map(|child| (child.as_str(), depth + 1)),
                );
            }
        }
        rows
    }

    pub fn take_notifications(&mut self) -> Vec<TreeNotification> {
        std::mem::take(&mut self.notifications)
    }
}
