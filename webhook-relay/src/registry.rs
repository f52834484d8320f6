//! The registry owns every webhook subscription. It runs as a single task; HTTP handlers talk to it through
//! a [`RegistryHandle`], so the subscription table has exactly one writer and needs no lock.
//!
//! Each subscription holds one listen stream on the sync service and one delivery task that forwards the
//! stream's changes, in order, to the subscription's callback URL.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::{BoxFuture, Fuse, FusedFuture};
use futures::{FutureExt, StreamExt};
use tether::{ChangeBuffer, ChangeEvent, ChangeStream, SyncService, Unlisten};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::config::DeliveryConfig;
use crate::dispatcher::Dispatch;
use crate::error::RelayError;

const COMMAND_QUEUE: usize = 64;

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct Subscription {
    pub key: String,
    pub remote_key: String,
    pub callback_url: String,
    pub state: SubscriptionState,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SubscriptionState {
    Active,
    Unlistening,
}

enum Command {
    Register {
        key: String,
        remote_key: String,
        callback_url: String,
    },
    Unregister {
        key: String,
        reply: oneshot::Sender<Result<(), RelayError>>,
    },
    List {
        reply: oneshot::Sender<Vec<Subscription>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

#[derive(Clone)]
pub struct RegistryHandle {
    commands: mpsc::Sender<Command>,
}

impl RegistryHandle {
    /// Queues the registration and returns without waiting for the listen stream to attach.
    pub async fn register(
        &self,
        key: String,
        remote_key: String,
        callback_url: String,
    ) -> Result<(), RelayError> {
        self.commands
            .send(Command::Register {
                key,
                remote_key,
                callback_url,
            })
            .await
            .map_err(|_| RelayError::RegistryClosed)
    }

    /// Once this returns `Ok`, no further change is delivered for `key`.
    pub async fn unregister(&self, key: String) -> Result<(), RelayError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Unregister { key, reply })
            .await
            .map_err(|_| RelayError::RegistryClosed)?;
        response.await.map_err(|_| RelayError::RegistryClosed)?
    }

    /// Commands are handled in order, so this also waits for every earlier registration to attach.
    pub async fn subscriptions(&self) -> Result<Vec<Subscription>, RelayError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::List { reply })
            .await
            .map_err(|_| RelayError::RegistryClosed)?;
        response.await.map_err(|_| RelayError::RegistryClosed)
    }

    /// Closes every subscription and stops the registry task.
    pub async fn shutdown(&self) {
        let (reply, response) = oneshot::channel();
        if self.commands.send(Command::Shutdown { reply }).await.is_ok() {
            let _ = response.await;
        }
    }
}

struct ActiveSubscription<Handle> {
    subscription: Subscription,
    listen_handle: Handle,
    delivery: JoinHandle<()>,
}

impl<Handle: Unlisten> ActiveSubscription<Handle> {
    async fn close(mut self) {
        self.subscription.state = SubscriptionState::Unlistening;
        self.listen_handle.unlisten();
        self.delivery.abort();
        // wait until the task is really gone so nothing is delivered after we return
        let _ = self.delivery.await;
        log::info!(
            "Closed webhook {:?} for {:?}",
            self.subscription.key,
            self.subscription.remote_key
        );
    }
}

pub struct WebhookRegistry<S: SyncService, D> {
    sync: S,
    dispatcher: Arc<D>,
    delivery: DeliveryConfig,
    subscriptions: HashMap<String, ActiveSubscription<S::Handle>>,
}

impl<S, D> WebhookRegistry<S, D>
where
    S: SyncService + Send + 'static,
    S::Handle: Send + 'static,
    D: Dispatch,
{
    pub fn spawn(sync: S, dispatcher: D, delivery: DeliveryConfig) -> RegistryHandle {
        let (commands, receiver) = mpsc::channel(COMMAND_QUEUE);
        let registry = Self {
            sync,
            dispatcher: Arc::new(dispatcher),
            delivery,
            subscriptions: HashMap::new(),
        };
        tokio::spawn(registry.run(receiver));
        RegistryHandle { commands }
    }

    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        while let Some(command) = commands.recv().await {
            match command {
                Command::Register {
                    key,
                    remote_key,
                    callback_url,
                } => self.register(key, remote_key, callback_url).await,
                Command::Unregister { key, reply } => {
                    let result = self.unregister(&key).await;
                    let _ = reply.send(result);
                }
                Command::List { reply } => {
                    let _ = reply.send(self.list());
                }
                Command::Shutdown { reply } => {
                    self.close_all().await;
                    let _ = reply.send(());
                    return;
                }
            }
        }
        // every handle is gone
        self.close_all().await;
    }

    async fn register(&mut self, key: String, remote_key: String, callback_url: String) {
        if let Some(previous) = self.subscriptions.remove(&key) {
            log::info!("Replacing existing webhook {key:?}");
            previous.close().await;
        }

        let listen = match self.sync.listen(&remote_key) {
            Ok(listen) => listen,
            Err(e) => {
                log::error!("Error listening to {remote_key:?} for webhook {key:?}: {e}");
                return;
            }
        };
        let (events, listen_handle) = listen.into_parts();

        let delivery = tokio::spawn(deliver_changes(
            key.clone(),
            callback_url.clone(),
            events,
            self.dispatcher.clone(),
            self.delivery,
        ));

        log::info!("Registered webhook {key:?}: {remote_key:?} -> {callback_url}");
        self.subscriptions.insert(
            key.clone(),
            ActiveSubscription {
                subscription: Subscription {
                    key,
                    remote_key,
                    callback_url,
                    state: SubscriptionState::Active,
                },
                listen_handle,
                delivery,
            },
        );
    }

    async fn unregister(&mut self, key: &str) -> Result<(), RelayError> {
        let Some(active) = self.subscriptions.remove(key) else {
            log::info!("Unregister for unknown webhook {key:?}");
            return Err(RelayError::UnknownSubscription(key.to_string()));
        };
        active.close().await;
        Ok(())
    }

    fn list(&self) -> Vec<Subscription> {
        let mut subscriptions: Vec<_> = self
            .subscriptions
            .values()
            .map(|active| active.subscription.clone())
            .collect();
        subscriptions.sort_by(|a, b| a.key.cmp(&b.key));
        subscriptions
    }

    async fn close_all(&mut self) {
        for (_, active) in self.subscriptions.drain() {
            active.close().await;
        }
    }
}

/// Moves changes from the listen stream into a bounded buffer and forwards at most one batch per window. The
/// stream is read while a batch is being delivered, so a slow endpoint costs buffered changes, not memory.
async fn deliver_changes<D: Dispatch>(
    key: String,
    callback_url: String,
    mut events: ChangeStream,
    dispatcher: Arc<D>,
    config: DeliveryConfig,
) {
    let mut buffer = ChangeBuffer::new(config.buffer);
    let mut ticker = tokio::time::interval_at(Instant::now() + config.window, config.window);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut delivery: Fuse<BoxFuture<'static, ()>> = Fuse::terminated();
    let mut listening = true;

    loop {
        tokio::select! {
            biased;

            change = events.next(), if listening => match change {
                Some(Ok(change)) => {
                    buffer.push(change);
                }
                Some(Err(e)) => log::error!("Listen error for webhook {key:?}: {e}"),
                None => listening = false,
            },
            () = &mut delivery, if !delivery.is_terminated() => {}
            _ = ticker.tick(), if delivery.is_terminated() => {
                let batch = buffer.drain(config.batch);
                if !batch.is_empty() {
                    delivery = deliver_batch(dispatcher.clone(), callback_url.clone(), batch)
                        .boxed()
                        .fuse();
                } else if !listening {
                    return;
                }
            }
        }
    }
}

async fn deliver_batch<D: Dispatch>(dispatcher: Arc<D>, url: String, changes: Vec<ChangeEvent>) {
    for change in &changes {
        dispatcher.deliver(&url, change).await;
    }
}
