use std::future::Future;
use std::time::Duration;

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use tether::ChangeEvent;

use crate::config::WebhookCredential;

/// Forwards one change to one webhook URL. Delivery is best-effort: no retries, and the outcome is only
/// logged.
pub trait Dispatch: Send + Sync + 'static {
    fn deliver(&self, url: &str, change: &ChangeEvent) -> impl Future<Output = ()> + Send;
}

#[derive(Clone)]
pub struct HttpDispatcher {
    client: reqwest::Client,
    authorization: String,
}

impl HttpDispatcher {
    /// `timeout` bounds each POST, including a callback URL that never answers.
    pub fn new(credential: &WebhookCredential, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            authorization: credential.authorization(),
        })
    }

    async fn post(&self, url: &str, change: &ChangeEvent) -> Result<String, reqwest::Error> {
        let response = self
            .client
            .post(url)
            .header(AUTHORIZATION, &self.authorization)
            .header(CONTENT_TYPE, "application/json")
            .json(change)
            .send()
            .await?;
        // any status counts as delivered
        response.text().await
    }
}

impl Dispatch for HttpDispatcher {
    async fn deliver(&self, url: &str, change: &ChangeEvent) {
        match self.post(url, change).await {
            Ok(body) => log::info!("Response body from {url}: {body}"),
            Err(e) => log::warn!("Delivering change for {:?} to {url} failed: {e}", change.key),
        }
    }
}
