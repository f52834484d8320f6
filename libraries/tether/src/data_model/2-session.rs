//! # Session
//! Where the sync service lives and who we are when talking to it.

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SessionConfig {
    pub host: String,
    pub port: u16,
    pub use_ssl: bool,
    pub provider: String,
    pub token: String,
}

impl SessionConfig {
    pub fn endpoint(&self) -> String {
        let scheme = if self.use_ssl { "wss" } else { "ws" };
        format!("{scheme}://{}:{}", self.host, self.port)
    }
}
