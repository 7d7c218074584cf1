use serde::Deserialize;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::monitoring::incident::DEFAULT_FAILURE_THRESHOLD;
use crate::monitoring::prober::DEFAULT_CERT_EXPIRY_WARNING_DAYS;
use crate::monitoring::scheduler::SchedulerSettings;
use crate::notifications::senders::RelaySettings;
use crate::notifications::service::NotifierSettings;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub database_url: String,
    pub jwt_secret: String,
    pub listen_addr: SocketAddr,
    pub log_dir: String,
    pub notification_encryption_key: String,
    /// Name of the location this process probes from. `None` probes every monitor.
    pub probe_location: Option<String>,
    pub scheduler_tick_ms: u64,
    pub max_concurrent_probes: usize,
    pub schedule_jitter_ms: u64,
    pub registry_backoff_max_ms: u64,
    pub failure_threshold: u32,
    pub cert_expiry_warning_days: i64,
    pub notification_max_retries: u32,
    pub notification_backoff_ms: u64,
    pub escalation_after_seconds: Option<u64>,
    pub email_relay: Option<RelaySettings>,
    pub sms_relay: Option<RelaySettings>,
}

// Partial config for layering
#[derive(Deserialize, Default, Debug)]
struct PartialServerConfig {
    database_url: Option<String>,
    jwt_secret: Option<String>,
    listen_addr: Option<String>,
    log_dir: Option<String>,
    notification_encryption_key: Option<String>,
    probe_location: Option<String>,
    scheduler_tick_ms: Option<u64>,
    max_concurrent_probes: Option<usize>,
    schedule_jitter_ms: Option<u64>,
    registry_backoff_max_ms: Option<u64>,
    failure_threshold: Option<u32>,
    cert_expiry_warning_days: Option<i64>,
    notification_max_retries: Option<u32>,
    notification_backoff_ms: Option<u64>,
    escalation_after_seconds: Option<u64>,
    email_api_url: Option<String>,
    email_api_key: Option<String>,
    email_from: Option<String>,
    sms_api_url: Option<String>,
    sms_api_key: Option<String>,
    sms_from: Option<String>,
}

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_log_dir() -> String {
    "logs".to_string()
}

fn default_notification_key() -> String {
    // Development only. Override in production.
    "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f".to_string()
}

impl ServerConfig {
    pub fn load(config_path: Option<&str>) -> Result<Self, String> {
        dotenv::dotenv().ok();

        // 1. Load from file (optional)
        let file_config = match config_path {
            Some(path_str) => read_file(Path::new(path_str))?,
            None => PartialServerConfig::default(),
        };

        // 2. Load from environment variables
        let env_config: PartialServerConfig = envy::from_env::<PartialServerConfig>()
            .map_err(|e| format!("Failed to load config from environment: {e}"))?;

        // 3. Merge: environment overrides file
        Self::from_layers(env_config, file_config)
    }

    fn from_layers(env: PartialServerConfig, file: PartialServerConfig) -> Result<Self, String> {
        let listen_addr = env
            .listen_addr
            .or(file.listen_addr)
            .unwrap_or_else(default_listen_addr);
        let listen_addr = listen_addr
            .parse::<SocketAddr>()
            .map_err(|e| format!("LISTEN_ADDR '{listen_addr}' is not a socket address: {e}"))?;

        let notification_encryption_key = env
            .notification_encryption_key
            .or(file.notification_encryption_key)
            .unwrap_or_else(default_notification_key);
        if notification_encryption_key.len() != 64
            || hex::decode(&notification_encryption_key).is_err()
        {
            return Err("NOTIFICATION_ENCRYPTION_KEY must be 64 hex characters".to_string());
        }

        let failure_threshold = env
            .failure_threshold
            .or(file.failure_threshold)
            .unwrap_or(DEFAULT_FAILURE_THRESHOLD);
        if failure_threshold == 0 {
            return Err("FAILURE_THRESHOLD must be at least 1".to_string());
        }

        let max_concurrent_probes = env
            .max_concurrent_probes
            .or(file.max_concurrent_probes)
            .unwrap_or(32);
        if max_concurrent_probes == 0 {
            return Err("MAX_CONCURRENT_PROBES must be at least 1".to_string());
        }

        let scheduler_tick_ms = env.scheduler_tick_ms.or(file.scheduler_tick_ms).unwrap_or(1000);
        if scheduler_tick_ms == 0 {
            return Err("SCHEDULER_TICK_MS must be at least 1".to_string());
        }

        let email_relay = relay(
            "EMAIL",
            env.email_api_url.or(file.email_api_url),
            env.email_api_key.or(file.email_api_key),
            env.email_from.or(file.email_from),
        )?;
        let sms_relay = relay(
            "SMS",
            env.sms_api_url.or(file.sms_api_url),
            env.sms_api_key.or(file.sms_api_key),
            env.sms_from.or(file.sms_from),
        )?;

        Ok(ServerConfig {
            database_url: env
                .database_url
                .or(file.database_url)
                .ok_or("DATABASE_URL is required")?,
            jwt_secret: env
                .jwt_secret
                .or(file.jwt_secret)
                .ok_or("JWT_SECRET is required")?,
            listen_addr,
            log_dir: env.log_dir.or(file.log_dir).unwrap_or_else(default_log_dir),
            notification_encryption_key,
            probe_location: env
                .probe_location
                .or(file.probe_location)
                .map(|l| l.trim().to_string())
                .filter(|l| !l.is_empty()),
            scheduler_tick_ms,
            max_concurrent_probes,
            schedule_jitter_ms: env.schedule_jitter_ms.or(file.schedule_jitter_ms).unwrap_or(2000),
            registry_backoff_max_ms: env
                .registry_backoff_max_ms
                .or(file.registry_backoff_max_ms)
                .unwrap_or(60_000),
            failure_threshold,
            cert_expiry_warning_days: env
                .cert_expiry_warning_days
                .or(file.cert_expiry_warning_days)
                .unwrap_or(DEFAULT_CERT_EXPIRY_WARNING_DAYS),
            notification_max_retries: env
                .notification_max_retries
                .or(file.notification_max_retries)
                .unwrap_or(3),
            notification_backoff_ms: env
                .notification_backoff_ms
                .or(file.notification_backoff_ms)
                .unwrap_or(500),
            escalation_after_seconds: env
                .escalation_after_seconds
                .or(file.escalation_after_seconds)
                .filter(|s| *s > 0),
            email_relay,
            sms_relay,
        })
    }

    pub fn scheduler_settings(&self) -> SchedulerSettings {
        SchedulerSettings {
            tick: Duration::from_millis(self.scheduler_tick_ms),
            max_concurrent_probes: self.max_concurrent_probes,
            jitter: Duration::from_millis(self.schedule_jitter_ms),
            registry_backoff_max: Duration::from_millis(self.registry_backoff_max_ms),
            location: self.probe_location.clone(),
            ..SchedulerSettings::default()
        }
    }

    pub fn notifier_settings(&self) -> NotifierSettings {
        NotifierSettings {
            max_retries: self.notification_max_retries,
            backoff: Duration::from_millis(self.notification_backoff_ms),
            escalation_after: self.escalation_after_seconds.map(Duration::from_secs),
        }
    }
}

fn read_file(path: &Path) -> Result<PartialServerConfig, String> {
    if !path.exists() {
        return Ok(PartialServerConfig::default());
    }
    let contents = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config file at {path:?}: {e}"))?;
    toml::from_str(&contents)
        .map_err(|e| format!("Failed to parse TOML from config file at {path:?}: {e}"))
}

/// A relay is configured when its URL is set; the sender address is then required.
fn relay(
    prefix: &str,
    api_url: Option<String>,
    api_key: Option<String>,
    from: Option<String>,
) -> Result<Option<RelaySettings>, String> {
    let Some(api_url) = api_url else {
        return Ok(None);
    };
    let from = from.ok_or_else(|| format!("{prefix}_FROM is required when {prefix}_API_URL is set"))?;
    Ok(Some(RelaySettings {
        api_url,
        api_key,
        from,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(vars: &[(&str, &str)]) -> PartialServerConfig {
        envy::from_iter(
            vars.iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<Vec<_>>(),
        )
        .unwrap()
    }

    fn file(contents: &str) -> PartialServerConfig {
        toml::from_str(contents).unwrap()
    }

    #[test]
    fn test_defaults_fill_missing_values() {
        let config = ServerConfig::from_layers(
            env(&[("DATABASE_URL", "postgres://localhost/uptime"), ("JWT_SECRET", "s")]),
            PartialServerConfig::default(),
        )
        .unwrap();
        assert_eq!(config.listen_addr, "0.0.0.0:8080".parse().unwrap());
        assert_eq!(config.log_dir, "logs");
        assert_eq!(config.failure_threshold, 2);
        assert_eq!(config.cert_expiry_warning_days, 14);
        assert_eq!(config.probe_location, None);
        assert_eq!(config.escalation_after_seconds, None);
        assert!(config.email_relay.is_none());

        let scheduler = config.scheduler_settings();
        assert_eq!(scheduler.tick, Duration::from_secs(1));
        assert_eq!(scheduler.max_concurrent_probes, 32);
        assert_eq!(scheduler.jitter, Duration::from_secs(2));
        let notifier = config.notifier_settings();
        assert_eq!(notifier.max_retries, 3);
        assert_eq!(notifier.backoff, Duration::from_millis(500));
    }

    #[test]
    fn test_environment_overrides_file() {
        let file = file(
            r#"
            database_url = "postgres://file/db"
            jwt_secret = "from-file"
            probe_location = "eu-west"
            failure_threshold = 4
            escalation_after_seconds = 900
            "#,
        );
        let config = ServerConfig::from_layers(
            env(&[("JWT_SECRET", "from-env"), ("FAILURE_THRESHOLD", "3")]),
            file,
        )
        .unwrap();
        assert_eq!(config.database_url, "postgres://file/db");
        assert_eq!(config.jwt_secret, "from-env");
        assert_eq!(config.failure_threshold, 3);
        assert_eq!(config.probe_location.as_deref(), Some("eu-west"));
        assert_eq!(
            config.notifier_settings().escalation_after,
            Some(Duration::from_secs(900))
        );
    }

    #[test]
    fn test_missing_or_invalid_values_are_rejected() {
        let err = ServerConfig::from_layers(env(&[("JWT_SECRET", "s")]), PartialServerConfig::default())
            .unwrap_err();
        assert!(err.contains("DATABASE_URL"));

        let base = [("DATABASE_URL", "postgres://x"), ("JWT_SECRET", "s")];
        let with = |extra: (&'static str, &'static str)| {
            let mut vars = base.to_vec();
            vars.push(extra);
            ServerConfig::from_layers(env(&vars), PartialServerConfig::default())
        };
        assert!(with(("NOTIFICATION_ENCRYPTION_KEY", "abc")).is_err());
        assert!(with(("LISTEN_ADDR", "not-an-addr")).is_err());
        assert!(with(("FAILURE_THRESHOLD", "0")).is_err());
        assert!(with(("MAX_CONCURRENT_PROBES", "0")).is_err());
        assert!(with(("EMAIL_API_URL", "https://mail.example.com/send"))
            .unwrap_err()
            .contains("EMAIL_FROM"));
    }

    #[test]
    fn test_relays_are_built_when_configured() {
        let config = ServerConfig::from_layers(
            env(&[
                ("DATABASE_URL", "postgres://x"),
                ("JWT_SECRET", "s"),
                ("SMS_API_URL", "https://sms.example.com/send"),
                ("SMS_FROM", "+15550100"),
            ]),
            PartialServerConfig::default(),
        )
        .unwrap();
        assert_eq!(
            config.sms_relay,
            Some(RelaySettings {
                api_url: "https://sms.example.com/send".to_string(),
                api_key: None,
                from: "+15550100".to_string(),
            })
        );
    }

    #[test]
    fn test_missing_file_is_treated_as_empty() {
        let partial = read_file(Path::new("/nonexistent/uptime-monitor.toml")).unwrap();
        assert!(partial.database_url.is_none());
    }
}
