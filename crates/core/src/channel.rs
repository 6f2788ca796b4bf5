use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Persistent configuration for one notification target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationChannel {
    pub id: Uuid,
    /// Display name (unique among channels by convention, not enforced).
    pub name: String,
    /// Name of the notify driver that handles deliveries for this channel.
    pub driver: String,
    /// Driver-specific configuration, opaque to the orchestrator.
    #[serde(default)]
    pub config: serde_json::Value,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl NotificationChannel {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        driver: impl Into<String>,
        config: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            driver: driver.into(),
            config,
            is_active: true,
            created_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn disabled(mut self) -> Self {
        self.is_active = false;
        self
    }
}

/// Persistent configuration for one intelligence provider.
///
/// At most one provider is active at a time; the local rule engine is the
/// fallback when none is, or when the active one fails.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub id: Uuid,
    /// Provider type name as registered (e.g. `openai`, `local`).
    pub provider_type: String,
    /// Provider-specific configuration (credentials, model, endpoint).
    #[serde(default)]
    pub config: serde_json::Value,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl ProviderConfig {
    #[must_use]
    pub fn new(provider_type: impl Into<String>, config: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            provider_type: provider_type.into(),
            config,
            is_active: true,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_defaults_active() {
        let channel = NotificationChannel::new(
            "ops-webhook",
            "webhook",
            serde_json::json!({"url": "http://localhost:9999/hook"}),
        );
        assert!(channel.is_active);
        assert_eq!(channel.driver, "webhook");
        assert!(!channel.disabled().is_active);
    }

    #[test]
    fn provider_config_serde() {
        let provider = ProviderConfig::new("openai", serde_json::json!({"model": "gpt-4o"}));
        let json = serde_json::to_string(&provider).unwrap();
        let back: ProviderConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.provider_type, "openai");
        assert!(back.is_active);
    }
}
