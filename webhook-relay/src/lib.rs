//! HTTP relay that forwards the sync service's change notifications to externally registered webhooks.
//!
//! - `PUT /webhooks {key, url}` starts listening to `key` and POSTs every change to `url`.
//! - `DELETE /webhooks {key}` stops it again, or answers 404 for an unknown key.
//!
//! The registry is generic over [`tether::SyncService`]. The `webhook-relay` binary runs it against an
//! in-process [`tether::MemorySync`], not a live csync connection: the `SYNC_*` settings are validated and
//! used to authenticate that backend, and nothing outside the process writes to it. Serving real changes
//! means passing a networked `SyncService` to [`WebhookRegistry::spawn`].

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod registry;
pub mod routes;

pub use config::{DeliveryConfig, RelayConfig, WebhookCredential};
pub use dispatcher::{Dispatch, HttpDispatcher};
pub use error::RelayError;
pub use registry::{RegistryHandle, Subscription, SubscriptionState, WebhookRegistry};
pub use routes::router;
