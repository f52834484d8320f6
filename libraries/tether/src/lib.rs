//! A thin client seam over the always-on key/value sync service that the relay and the data viewer talk to.
//! Persistence and access control live on the service side. This crate only describes what
//! a client can ask for:
//!
//! 1. `write` a JSON value under a key path (missing ancestors are created with no data),
//! 2. `delete` a key that has no children,
//! 3. `listen` to a key pattern, receiving a stream of [`ChangeEvent`](data_model::ChangeEvent)s until the
//!    returned handle is unlistened (or dropped).
//!
//! [`MemorySync`](data_model::MemorySync) is an in-process backend with the same semantics, which is what the
//! relay binary and the tests run against.

pub mod data_model;

use std::future::Future;

pub use data_model::{
    ChangeBuffer, ChangeEvent, ChangeStream, DEFAULT_ACL, Listen, MemoryListenHandle, MemorySync,
    SessionConfig,
};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    #[error("invalid key: {0}")]
    InvalidKey(#[from] keypath::KeyPathError),
    #[error("key {0:?} does not exist")]
    NotFound(String),
    #[error("key {0:?} still has children")]
    HasChildren(String),
    #[error("not connected to the sync service")]
    NotConnected,
    #[error("authentication with provider {0:?} failed")]
    Unauthenticated(String),
    /// Reported by a remote client library, passed through verbatim.
    #[error("{0}")]
    Remote(String),
}

/// Closes a live listen stream. After `unlisten` returns, no further events are sent to the stream.
pub trait Unlisten {
    fn unlisten(&mut self);
}

pub trait SyncService {
    type Handle: Unlisten;

    fn write(
        &self,
        key: &str,
        data: serde_json::Value,
    ) -> impl Future<Output = Result<(), SyncError>>;

    fn delete(&self, key: &str) -> impl Future<Output = Result<(), SyncError>>;

    fn listen(&self, pattern: &str) -> Result<Listen<Self::Handle>, SyncError>;
}
