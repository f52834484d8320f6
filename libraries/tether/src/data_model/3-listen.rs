//! # Listen
//! A live subscription to a key pattern: the stream of changes plus the handle that closes it.
//! Closing is explicit (`Unlisten::unlisten`), but backends also close on drop so that a forgotten handle
//! cannot keep a stream alive.

use futures::channel::mpsc::UnboundedReceiver;

use crate::SyncError;
use crate::data_model::ChangeEvent;

pub type ChangeStream = UnboundedReceiver<Result<ChangeEvent, SyncError>>;

pub struct Listen<Handle> {
    pub events: ChangeStream,
    pub handle: Handle,
}

impl<Handle> Listen<Handle> {
    pub fn into_parts(self) -> (ChangeStream, Handle) {
        (self.events, self.handle)
    }
}
