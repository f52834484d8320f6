//! The worker context. It owns the sync-service session, runs write intents against it, and forwards the listen
//! stream to the UI context at a bounded rate. Changes waiting for a later tick stay queued on the listen
//! stream and are never dropped. It shares no state with the UI context: requests come in as
//! [`WorkerRequest`]s and everything goes back out as [`WorkerMessage`]s.

use std::future::Future;
use std::time::Duration;

use serde_json::Value;
use tether::{ChangeEvent, ChangeStream, SessionConfig, SyncError, SyncService, Unlisten};

use crate::messages::{ControlRequest, HostPort, WorkerMessage, WorkerRequest, WriteIntent};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ViewerConfig {
    /// Used when the page was not served from a host, e.g. opened from disk.
    pub default_host: String,
    pub default_port: u16,
    pub listen_pattern: String,
    /// Changes forwarded per drain window.
    pub batch: usize,
    pub drain_window: Duration,
    pub demo_provider: String,
    pub demo_token: String,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            default_host: "localhost".to_string(),
            default_port: 6005,
            listen_pattern: "#".to_string(),
            batch: 30,
            drain_window: Duration::from_millis(500),
            demo_provider: "demo".to_string(),
            demo_token: "demoToken".to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("port {0:?} is not a number")]
    InvalidPort(String),
    #[error("data is not valid JSON: {0}")]
    InvalidData(String),
    #[error(transparent)]
    Sync(#[from] SyncError),
}

/// Works out where the sync service is from the page's location.
///
/// SSL is used unless the page was loaded over plain `http:`. A page without a host talks to the configured
/// default host and port; otherwise an empty port means the scheme's default port. Without a sign-in token the
/// guest login is used.
pub fn resolve_session(config: &ViewerConfig, page: &HostPort) -> Result<SessionConfig, WorkerError> {
    let use_ssl = page.protocol != "http:";
    let (host, port) = if page.host.is_empty() {
        (config.default_host.clone(), config.default_port)
    } else if page.port.is_empty() {
        (page.host.clone(), if use_ssl { 443 } else { 80 })
    } else {
        let port = page
            .port
            .parse()
            .map_err(|_| WorkerError::InvalidPort(page.port.clone()))?;
        (page.host.clone(), port)
    };

    let (provider, token) = match &page.token {
        Some(token) => (
            page.provider
                .clone()
                .unwrap_or_else(|| config.demo_provider.clone()),
            token.clone(),
        ),
        None => (config.demo_provider.clone(), config.demo_token.clone()),
    };

    Ok(SessionConfig {
        host,
        port,
        use_ssl,
        provider,
        token,
    })
}

pub struct Worker<S: SyncService, C> {
    config: ViewerConfig,
    connect: C,
    session: Option<S>,
    listen: Option<(ChangeStream, S::Handle)>,
}

impl<S, C> Worker<S, C>
where
    S: SyncService + Clone + 'static,
    C: Fn(&SessionConfig) -> Result<S, SyncError>,
{
    /// `connect` opens an authenticated session from the resolved session settings.
    pub fn new(config: ViewerConfig, connect: C) -> Self {
        Self {
            config,
            connect,
            session: None,
            listen: None,
        }
    }

    pub fn config(&self) -> &ViewerConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    pub fn is_listening(&self) -> bool {
        self.listen.is_some()
    }

    /// Handles one request. Writes are answered with their echo; control requests produce no message.
    pub async fn handle(&mut self, request: WorkerRequest) -> Option<WorkerMessage> {
        match request {
            WorkerRequest::Write(intent) => Some(WorkerMessage::Echo(self.perform(intent).await)),
            WorkerRequest::Control(control) => {
                if let Err(e) = self.handle_control(control) {
                    log::error!("Could not set up the sync session: {e}");
                }
                None
            }
        }
    }

    pub fn handle_control(&mut self, request: ControlRequest) -> Result<(), WorkerError> {
        match request {
            ControlRequest::SetHostPort(page) => {
                let session = resolve_session(&self.config, &page)?;
                log::info!(
                    "Connecting to {} as {:?} (user {:?})",
                    session.endpoint(),
                    session.provider,
                    page.user
                );
                let sync = (self.connect)(&session)?;
                self.stop_listening();
                self.session = Some(sync);
                Ok(())
            }
            ControlRequest::Connect => {
                let Some(sync) = &self.session else {
                    return Err(SyncError::NotConnected.into());
                };
                let listen = sync.listen(&self.config.listen_pattern)?;
                self.stop_listening();
                self.listen = Some(listen.into_parts());
                log::info!("Listening to {:?}", self.config.listen_pattern);
                Ok(())
            }
        }
    }

    fn stop_listening(&mut self) {
        if let Some((_, mut handle)) = self.listen.take() {
            handle.unlisten();
        }
    }

    /// Runs a write intent and resolves to its echo, with `error` set if it failed. The future does not borrow the
    /// worker, so several can be in flight at once.
    pub fn perform(
        &self,
        intent: WriteIntent,
    ) -> impl Future<Output = WriteIntent> + 'static + use<S, C> {
        let session = self.session.clone();
        async move {
            let result = match &session {
                Some(sync) => execute(sync, &intent).await,
                None => Err(SyncError::NotConnected.into()),
            };
            let key = &intent.descriptor().key;
            match result {
                Ok(()) => {
                    log::info!("{key:?} written");
                    intent
                }
                Err(e) => {
                    log::warn!("Write to {key:?} failed: {e}");
                    intent.with_error(e)
                }
            }
        }
    }

    /// One drain tick: at most `batch` changes, oldest first.
    pub fn drain(&mut self) -> Vec<ChangeEvent> {
        let mut changes = Vec::new();
        let Some((events, _)) = &mut self.listen else {
            return changes;
        };
        while changes.len() < self.config.batch {
            match events.try_next() {
                Ok(Some(Ok(change))) => changes.push(change),
                Ok(Some(Err(e))) => log::error!("Listen error: {e}"),
                Ok(None) => {
                    log::warn!("Listen stream closed");
                    self.listen = None;
                    break;
                }
                Err(_) => break,
            }
        }
        changes
    }
}

async fn execute<S: SyncService>(sync: &S, intent: &WriteIntent) -> Result<(), WorkerError> {
    match intent {
        WriteIntent::NewNode(descriptor) => {
            // a rename carries the node's data along
            let data = match &descriptor.data {
                Some(text) => parse_data(text)?,
                None => Value::Object(Default::default()),
            };
            sync.write(&descriptor.key, data).await?;
        }
        WriteIntent::UpdateData(descriptor) => {
            let data = parse_data(descriptor.data.as_deref().unwrap_or_default())?;
            sync.write(&descriptor.key, data).await?;
        }
        WriteIntent::DeleteNode(descriptor) => {
            sync.delete(&descriptor.key).await?;
        }
    }
    Ok(())
}

fn parse_data(text: &str) -> Result<Value, WorkerError> {
    serde_json::from_str(text).map_err(|e| WorkerError::InvalidData(e.to_string()))
}
