//! Applied runtime configuration.
//!
//! Turns the raw environment plus the control-plane EDL configuration into
//! what the daemon actually runs with. Bootstrap and config fetch failures
//! are fatal here unless they are permanent-deletion signals, in which case
//! the deployment collapses into the allow-all profile and startup proceeds.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};
use warden_control::bootstrap::decode_claims;
use warden_control::{machine, ConfigClient, DeploymentState, EdlConfig, EdlMode, TokenManager};

use crate::env::EnvConfig;
use crate::error::{DaemonError, DaemonResult};

/// Fallback refresh period when the control plane sends a non-positive one.
const UPDATE_FREQUENCY_FLOOR_FALLBACK: Duration = Duration::from_secs(5 * 60);
/// Refresh period applied to disabled deployments.
const DISABLED_UPDATE_FREQUENCY: Duration = Duration::from_secs(60 * 60);

/// The daemon's applied configuration.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Raw environment settings.
    pub env: EnvConfig,
    /// How the EDL is interpreted.
    pub edl_mode: EdlMode,
    /// Feed URL; empty when disabled.
    pub edl_url: String,
    /// Refresh period for the feed.
    pub update_frequency: Duration,
    /// Whether the EDL is enforced at all.
    pub deployment_enabled: bool,
    /// Deployment-scoped machine fingerprint.
    pub device_id: String,
    /// Token lifecycle owner; shared with the shipper and config client.
    pub token_manager: Arc<TokenManager>,
}

impl RuntimeConfig {
    /// Bootstraps against the control plane and applies the EDL config.
    ///
    /// # Errors
    ///
    /// Returns an error when the bootstrap token is missing or when the
    /// bootstrap/config exchange fails for a non-permanent reason. Permanent
    /// deletion is not an error: the returned config is the disabled
    /// (allow-all) profile.
    pub async fn initialize(env: EnvConfig) -> DaemonResult<Self> {
        if env.bootstrap_token.is_empty() {
            return Err(DaemonError::MissingBootstrapToken);
        }

        // The fingerprint is derived even when the token is malformed; the
        // strict claim validation happens inside the bootstrap exchange.
        let deployment_id = decode_claims(&env.bootstrap_token)
            .map(|claims| claims.deployment_id)
            .unwrap_or_default();
        let device_id = machine::device_id(&deployment_id);

        let token_manager = Arc::new(TokenManager::new(env.bootstrap_token.clone()));

        let mut config = Self {
            env,
            edl_mode: EdlMode::Disabled,
            edl_url: String::new(),
            update_frequency: DISABLED_UPDATE_FREQUENCY,
            deployment_enabled: false,
            device_id,
            token_manager: Arc::clone(&token_manager),
        };

        if let Err(err) = token_manager.initialize().await {
            if err.is_permanent() {
                return Ok(config);
            }
            return Err(DaemonError::Bootstrap(err));
        }

        Arc::clone(&token_manager).start_refresh_loop();

        let edl_config = match ConfigClient::new(Arc::clone(&token_manager))
            .get_edl_config()
            .await
        {
            Ok(edl_config) => edl_config,
            Err(err) => {
                if err.is_permanent() {
                    return Ok(config);
                }
                return Err(DaemonError::ConfigFetch(err));
            }
        };

        config.apply_edl_config(&edl_config);
        Ok(config)
    }

    /// Maps the control-plane config onto the applied profile.
    pub fn apply_edl_config(&mut self, edl_config: &EdlConfig) {
        if !edl_config.enabled {
            self.edl_mode = EdlMode::Disabled;
            self.edl_url = String::new();
            self.update_frequency = DISABLED_UPDATE_FREQUENCY;
            self.deployment_enabled = false;
            info!("deployment is disabled - allowing all traffic");
            return;
        }

        self.deployment_enabled = true;
        self.edl_mode = EdlMode::from_purpose(&edl_config.purpose);

        self.update_frequency = if edl_config.update_frequency_seconds > 0 {
            Duration::from_secs(edl_config.update_frequency_seconds as u64)
        } else {
            UPDATE_FREQUENCY_FLOOR_FALLBACK
        };

        self.edl_url = edl_config
            .urls
            .combined
            .first()
            .cloned()
            .unwrap_or_default();

        debug!(
            url = %self.edl_url,
            mode = %self.edl_mode,
            update_frequency = ?self.update_frequency,
            "EDL configuration applied"
        );
    }

    /// Derived deployment state.
    #[must_use]
    pub fn deployment_state(&self) -> DeploymentState {
        DeploymentState::derive(
            self.deployment_enabled,
            self.token_manager.is_deployment_deleted(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use warden_control::EdlUrls;

    fn base_config() -> RuntimeConfig {
        RuntimeConfig {
            env: EnvConfig {
                bootstrap_token: String::new(),
                port: 8080,
                metrics_port: 9090,
                log_level: "info".into(),
                max_retry_attempts: 3,
                retry_delay: Duration::from_secs(30),
                log_batch_size: 100,
                log_flush_interval: Duration::from_secs(10),
                leaky_bucket_capacity: 1000,
                leaky_bucket_refill_rate: 100,
                log_buffer_size: 10_000,
                ip_header_override: None,
                static_dir: PathBuf::from("/static"),
            },
            edl_mode: EdlMode::Disabled,
            edl_url: String::new(),
            update_frequency: DISABLED_UPDATE_FREQUENCY,
            deployment_enabled: false,
            device_id: "test-device".into(),
            token_manager: Arc::new(TokenManager::new("test")),
        }
    }

    fn enabled_edl(purpose: &str, frequency: i64, urls: Vec<String>) -> EdlConfig {
        EdlConfig {
            purpose: purpose.into(),
            update_frequency_seconds: frequency,
            urls: EdlUrls {
                combined: urls,
                ..EdlUrls::default()
            },
            enabled: true,
            ..EdlConfig::default()
        }
    }

    #[test]
    fn test_apply_allowlist_config() {
        let mut config = base_config();
        config.apply_edl_config(&enabled_edl(
            "allowlist",
            300,
            vec!["https://edl.example.com/a.txt".into()],
        ));

        assert!(config.deployment_enabled);
        assert_eq!(config.edl_mode, EdlMode::Allowlist);
        assert_eq!(config.update_frequency, Duration::from_secs(300));
        assert_eq!(config.edl_url, "https://edl.example.com/a.txt");
    }

    #[test]
    fn test_apply_unknown_purpose_is_blocklist() {
        for purpose in ["blocklist", "other", "others", "mystery"] {
            let mut config = base_config();
            config.apply_edl_config(&enabled_edl(purpose, 300, vec!["u".into()]));
            assert_eq!(config.edl_mode, EdlMode::Blocklist, "purpose {purpose}");
        }
    }

    #[test]
    fn test_apply_non_positive_frequency_floors() {
        for frequency in [0, -5] {
            let mut config = base_config();
            config.apply_edl_config(&enabled_edl("blocklist", frequency, vec!["u".into()]));
            assert_eq!(config.update_frequency, Duration::from_secs(300));
        }
    }

    #[test]
    fn test_apply_first_combined_url_wins() {
        let mut config = base_config();
        config.apply_edl_config(&enabled_edl(
            "blocklist",
            60,
            vec!["first".into(), "second".into()],
        ));
        assert_eq!(config.edl_url, "first");
    }

    #[test]
    fn test_apply_disabled_collapses() {
        let mut config = base_config();
        config.deployment_enabled = true;
        config.edl_mode = EdlMode::Blocklist;
        config.edl_url = "https://edl.example.com/a.txt".into();

        config.apply_edl_config(&EdlConfig::disabled());

        assert!(!config.deployment_enabled);
        assert_eq!(config.edl_mode, EdlMode::Disabled);
        assert!(config.edl_url.is_empty());
        assert_eq!(config.update_frequency, Duration::from_secs(3600));
    }

    #[test]
    fn test_deployment_state_derivation() {
        let mut config = base_config();
        assert_eq!(config.deployment_state(), DeploymentState::Disabled);
        assert!(config.deployment_state().allows_all_traffic());

        config.deployment_enabled = true;
        assert_eq!(config.deployment_state(), DeploymentState::Active);
    }

    #[tokio::test]
    async fn test_initialize_requires_token() {
        let mut env = base_config().env;
        env.bootstrap_token = String::new();

        let result = RuntimeConfig::initialize(env).await;
        assert!(matches!(result, Err(DaemonError::MissingBootstrapToken)));
    }

    fn make_bootstrap_token(iss: &str) -> String {
        #[derive(serde::Serialize)]
        struct TestClaims {
            iss: String,
            deployment_id: String,
            component_type: String,
        }

        jsonwebtoken::encode(
            &jsonwebtoken::Header::default(),
            &TestClaims {
                iss: iss.into(),
                deployment_id: "deploy-1".into(),
                component_type: "forward_auth".into(),
            },
            &jsonwebtoken::EncodingKey::from_secret(b"secret"),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_initialize_deleted_deployment_allows_all() {
        use wiremock::matchers::method;
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(410).set_body_string("deployment deleted"))
            .mount(&server)
            .await;

        let mut env = base_config().env;
        env.bootstrap_token = make_bootstrap_token(&server.uri());

        // A deleted deployment is not a startup failure: the daemon comes up
        // in the allow-all profile.
        let config = RuntimeConfig::initialize(env).await.unwrap();

        assert!(!config.deployment_enabled);
        assert_eq!(config.edl_mode, EdlMode::Disabled);
        assert!(config.edl_url.is_empty());
        assert_eq!(config.deployment_state(), DeploymentState::Deleted);
    }

    #[tokio::test]
    async fn test_initialize_transient_bootstrap_failure_is_fatal() {
        use wiremock::matchers::method;
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let mut env = base_config().env;
        env.bootstrap_token = make_bootstrap_token(&server.uri());

        let result = RuntimeConfig::initialize(env).await;
        assert!(matches!(result, Err(DaemonError::Bootstrap(_))));
    }

    #[tokio::test]
    async fn test_initialize_full_happy_path() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/edl/bootstrap"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "at-1",
                "expires_in": 3600,
                "config_url": format!("{}/config", server.uri()),
                "logs_url": format!("{}/logs", server.uri()),
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/config"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "purpose": "blocklist",
                "update_frequency_seconds": 120,
                "urls": { "combined": ["https://edl.example.com/combined.txt"] },
            })))
            .mount(&server)
            .await;

        let mut env = base_config().env;
        env.bootstrap_token = make_bootstrap_token(&server.uri());

        let config = RuntimeConfig::initialize(env).await.unwrap();

        assert!(config.deployment_enabled);
        assert_eq!(config.edl_mode, EdlMode::Blocklist);
        assert_eq!(config.edl_url, "https://edl.example.com/combined.txt");
        assert_eq!(config.update_frequency, Duration::from_secs(120));
        assert_eq!(config.deployment_state(), DeploymentState::Active);
        assert!(!config.device_id.is_empty());
        assert_eq!(config.token_manager.token(), "at-1");

        config.token_manager.stop();
    }
}
