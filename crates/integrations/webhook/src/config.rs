use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Per-channel configuration for the webhook driver, deserialized from the
/// channel's opaque `config` value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookChannelConfig {
    /// Target URL for the POST.
    pub url: String,
    /// Static headers added to every request.
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_timeout_seconds() -> u64 {
    10
}

impl WebhookChannelConfig {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}
