//! The tree view state the page persists between visits: which nodes were open and which was selected.
//! The blob is stored as `{"state": {"core": {"open": [...], "selected": [...]}}}`.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeViewState {
    pub state: StateBlob,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateBlob {
    pub core: CoreState,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoreState {
    #[serde(default)]
    pub open: BTreeSet<String>,
    #[serde(default)]
    pub selected: Vec<String>,
}

impl TreeViewState {
    pub fn new(open: BTreeSet<String>, selected: Option<String>) -> Self {
        Self {
            state: StateBlob {
                core: CoreState {
                    open,
                    selected: selected.into_iter().collect(),
                },
            },
        }
    }

    /// Unreadable blobs are ignored rather than treated as errors.
    pub fn parse(blob: &str) -> Option<Self> {
        serde_json::from_str(blob)
            .inspect_err(|e| log::warn!("Ignoring unreadable tree view state: {e}"))
            .ok()
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn is_open(&self, id: &str) -> bool {
        self.state.core.open.contains(id)
    }

    pub fn selected(&self) -> Option<&str> {
        self.state.core.selected.first().map(String::as_str)
    }
}
