//! The property panel next to the tree: the selected node's data as key/value rows, its access policy, and the
//! JSON edit box used to replace the data.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::EditError;
use crate::pending::PendingWrite;
use crate::tree::TreeNode;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(target_arch = "wasm32", derive(tsify::Tsify))]
#[cfg_attr(target_arch = "wasm32", tsify(into_wasm_abi, from_wasm_abi))]
pub struct PropertyRow {
    pub key: String,
    pub value: String,
}

impl PropertyRow {
    fn new(key: &str, value: &Value) -> Self {
        let value = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        Self {
            key: key.to_string(),
            value,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(target_arch = "wasm32", derive(tsify::Tsify))]
#[cfg_attr(target_arch = "wasm32", tsify(into_wasm_abi, from_wasm_abi))]
pub struct PropertyPanel {
    pub has_selection: bool,
    pub rows: Vec<PropertyRow>,
    pub no_data: bool,
    pub acl_label: Option<String>,
    pub edit_box: String,
    pub editing: bool,
}

/// Splits `data` into display rows. `None` means there is nothing to show.
///
/// Objects get one row per key, sorted. Anything else, including an object with a `"0"` key, is shown as a
/// single row labelled with the node's name.
pub fn property_rows(data: &Value, text: &str) -> Option<Vec<PropertyRow>> {
    match data {
        Value::Null => None,
        Value::Object(map) if map.is_empty() => None,
        Value::Array(items) if items.is_empty() => None,
        Value::Object(map) if !map.contains_key("0") => {
            let mut rows: Vec<PropertyRow> = map
                .iter()
                .map(|(key, value)| PropertyRow::new(key, value))
                .collect();
            rows.sort_by(|a, b| a.key.cmp(&b.key));
            Some(rows)
        }
        opaque => Some(vec![PropertyRow::new(text, opaque)]),
    }
}

#[derive(Clone, Debug, PartialEq)]
struct Shown {
    id: String,
    text: String,
    parent: Option<String>,
    data: Value,
    acl: String,
}

#[derive(Debug, Default)]
pub struct PropertyViewModel {
    supports_access_policy: bool,
    shown: Option<Shown>,
    editing: bool,
    edit_box: String,
}

impl PropertyViewModel {
    pub fn new(supports_access_policy: bool) -> Self {
        Self {
            supports_access_policy,
            ..Self::default()
        }
    }

    pub fn supports_access_policy(&self) -> bool {
        self.supports_access_policy
    }

    pub fn is_editing(&self) -> bool {
        self.editing
    }

    /// Shows `node`, or clears the panel. While the same node is being edited, the edit box is left alone.
    pub fn show(&mut self, node: Option<&TreeNode>) {
        let Some(node) = node else {
            self.shown = None;
            self.editing = false;
            self.edit_box.clear();
            return;
        };
        let same_node = self.shown.as_ref().is_some_and(|shown| shown.id == node.id);
        self.shown = Some(Shown {
            id: node.id.clone(),
            text: node.segment.clone(),
            parent: node.parent.clone(),
            data: node.data.clone(),
            acl: node.acl.clone(),
        });
        if self.editing && same_node {
            return;
        }
        self.editing = false;
        self.edit_box = pretty(&node.data);
    }

    pub fn panel(&self) -> PropertyPanel {
        let Some(shown) = &self.shown else {
            return PropertyPanel {
                no_data: true,
                ..PropertyPanel::default()
            };
        };
        let rows = property_rows(&shown.data, &shown.text);
        PropertyPanel {
            has_selection: true,
            no_data: rows.is_none(),
            rows: rows.unwrap_or_default(),
            acl_label: self
                .supports_access_policy
                .then(|| format!("ACL: {}", shown.acl)),
            edit_box: self.edit_box.clone(),
            editing: self.editing,
        }
    }

    pub fn begin_edit(&mut self) -> Result<(), EditError> {
        let Some(shown) = &self.shown else {
            return Err(EditError::NothingSelected);
        };
        if self.editing {
            return Err(EditError::EditInProgress);
        }
        self.edit_box = pretty(&shown.data);
        self.editing = true;
        Ok(())
    }

    /// Ends the edit and produces the data update. Text that is not JSON is saved as a JSON string.
    pub fn save(&mut self, text: &str) -> Result<PendingWrite, EditError> {
        if !self.editing {
            return Err(EditError::NotEditing);
        }
        let Some(shown) = &self.shown else {
            self.editing = false;
            return Err(EditError::NothingSelected);
        };
        let data = serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()));
        let write = PendingWrite::update_data(
            shown.id.clone(),
            shown.text.clone(),
            shown.parent.clone(),
            data,
        );
        self.editing = false;
        self.edit_box = text.to_string();
        Ok(write)
    }

    /// Throws the typed text away and shows the node's data again.
    pub fn cancel(&mut self) -> Result<(), EditError> {
        if !self.editing {
            return Err(EditError::NotEditing);
        }
        self.editing = false;
        self.edit_box = self
            .shown
            .as_ref()
            .map(|shown| pretty(&shown.data))
            .unwrap_or_default();
        Ok(())
    }
}

fn pretty(data: &Value) -> String {
    serde_json::to_string_pretty(data).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pending::PendingWriteKind;
    use crate::tree::TreeReconciler;
    use serde_json::json;
    use tether::ChangeEvent;

    fn rows(data: Value) -> Option<Vec<(String, String)>> {
        property_rows(&data, "node")
            .map(|rows| rows.into_iter().map(|row| (row.key, row.value)).collect())
    }

    fn pair(key: &str, value: &str) -> (String, String) {
        (key.to_string(), value.to_string())
    }

    #[test]
    fn test_empty_data_has_no_rows() {
        assert_eq!(rows(Value::Null), None);
        assert_eq!(rows(json!({})), None);
        assert_eq!(rows(json!([])), None);
    }

    #[test]
    fn test_objects_are_expanded_and_sorted() {
        assert_eq!(
            rows(json!({ "b": "two", "a": 1, "c": { "d": true } })),
            Some(vec![pair("a", "1"), pair("b", "two"), pair("c", r#"{"d":true}"#)])
        );
    }

    #[test]
    fn test_opaque_values_use_the_node_name() {
        assert_eq!(
            rows(json!({ "0": "x", "a": 1 })),
            Some(vec![pair("node", r#"{"0":"x","a":1}"#)])
        );
        assert_eq!(rows(json!("hello")), Some(vec![pair("node", "hello")]));
        assert_eq!(rows(json!(42)), Some(vec![pair("node", "42")]));
        assert_eq!(rows(json!([1, 2])), Some(vec![pair("node", "[1,2]")]));
    }

    fn tree_with(key: &str, data: Value) -> TreeReconciler {
        let mut tree = TreeReconciler::new(None);
        tree.apply(&ChangeEvent::upsert(key, data, "$team"));
        tree.select(Some(key));
        tree
    }

    #[test]
    fn test_acl_label_depends_on_capability() {
        let tree = tree_with("a", json!({ "x": 1 }));

        let mut with_acl = PropertyViewModel::new(true);
        with_acl.show(tree.selected_node());
        assert_eq!(with_acl.panel().acl_label.as_deref(), Some("ACL: $team"));

        let mut without_acl = PropertyViewModel::new(false);
        without_acl.show(tree.selected_node());
        let panel = without_acl.panel();
        assert_eq!(panel.acl_label, None);
        assert_eq!(panel.rows, vec![PropertyRow::new("x", &json!(1))]);
    }

    #[test]
    fn test_nothing_selected() {
        let mut properties = PropertyViewModel::new(true);
        properties.show(None);
        let panel = properties.panel();
        assert!(!panel.has_selection);
        assert!(panel.no_data);
        assert_eq!(properties.begin_edit(), Err(EditError::NothingSelected));
    }

    #[test]
    fn test_edit_and_save() {
        let tree = tree_with("team.alice", json!({ "role": "eng" }));
        let mut properties = PropertyViewModel::new(true);
        properties.show(tree.selected_node());
        assert_eq!(properties.save("{}"), Err(EditError::NotEditing));

        properties.begin_edit().unwrap();
        assert_eq!(properties.begin_edit(), Err(EditError::EditInProgress));
        assert_eq!(properties.panel().edit_box, "{\n  \"role\": \"eng\"\n}");

        let write = properties.save(r#"{ "role": "ops" }"#).unwrap();
        assert_eq!(write.kind, PendingWriteKind::UpdateData);
        assert_eq!(write.target_id, "team.alice");
        assert_eq!(write.text, "alice");
        assert_eq!(write.parent.as_deref(), Some("team"));
        assert_eq!(write.payload, Some(json!({ "role": "ops" })));
        assert!(!properties.is_editing());
    }

    #[test]
    fn test_plain_text_is_saved_as_a_string() {
        let tree = tree_with("a", json!({}));
        let mut properties = PropertyViewModel::new(false);
        properties.show(tree.selected_node());
        properties.begin_edit().unwrap();
        let write = properties.save("just words").unwrap();
        assert_eq!(write.payload, Some(json!("just words")));
    }

    #[test]
    fn test_cancel_restores_the_data() {
        let tree = tree_with("a", json!({ "x": 1 }));
        let mut properties = PropertyViewModel::new(false);
        properties.show(tree.selected_node());
        properties.begin_edit().unwrap();
        properties.cancel().unwrap();
        assert!(!properties.is_editing());
        assert_eq!(properties.panel().edit_box, "{\n  \"x\": 1\n}");
        assert_eq!(properties.cancel(), Err(EditError::NotEditing));
    }

    #[test]
    fn test_refresh_while_editing_keeps_the_edit() {
        let mut tree = tree_with("a", json!({ "x": 1 }));
        let mut properties = PropertyViewModel::new(false);
        properties.show(tree.selected_node());
        properties.begin_edit().unwrap();

        tree.apply(&ChangeEvent::upsert("a", json!({ "x": 2 }), "$team"));
        properties.show(tree.selected_node());
        assert!(properties.is_editing());
        assert_eq!(properties.panel().rows[0].value, "2");
        assert_eq!(properties.panel().edit_box, "{\n  \"x\": 1\n}");
    }
}
