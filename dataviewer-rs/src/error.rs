use keypath::KeyPathError;

/// Why a local edit could not go ahead. The display text is what the user sees.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EditError {
    #[error("Please finish editing. Click Cancel or Save to continue!")]
    EditInProgress,
    #[error("Nothing is being edited")]
    NotEditing,
    #[error("Select a node first")]
    NothingSelected,
    #[error("Node \"{0}\" does not exist")]
    UnknownNode(String),
    #[error("Node \"{0}\" still has children")]
    HasChildren(String),
    #[error("This node already exists: enter a Node Name")]
    DuplicateId(String),
    #[error("Enter a Node Name")]
    NameRequired,
    #[error("\"{0}\" is not a valid node name: {1}")]
    InvalidName(String, KeyPathError),
    #[error("\"{0}\" must not contain \".\"")]
    NestedName(String),
    #[error("Node \"{0}\" is still being saved")]
    WriteInFlight(String),
}
