//! Application configuration, loaded once at startup.

use std::collections::HashMap;

use config::{Config as ConfigLoader, ConfigError, Environment, File};
use serde::Deserialize;
use traineehub_notify::SmtpConfig;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub smtp: SmtpConfig,
    pub notifications: NotificationsConfig,
    pub templates: TemplatesConfig,
    pub services: ServicesConfig,
    pub object_store: ObjectStoreConfig,
    pub queues: QueuesConfig,
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct NotificationsConfig {
    /// IANA zone all business dates are anchored in, e.g. `Europe/London`.
    pub timezone: String,
    pub email_enabled: bool,
    pub in_app_enabled: bool,
    /// Minutes to hold an immediate welcome send, absorbing account churn.
    pub immediate_delay_minutes: u64,
    /// Trainee ids that bypass the in-app criteria gate.
    pub whitelist: Vec<String>,
    /// Public URI of the trainee self-service product, for template links.
    pub app_domain: String,
    pub sender_address: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TemplatesConfig {
    pub root: String,
    /// Template version per `{kind}.{channel}` pair.
    pub versions: HashMap<String, String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServicesConfig {
    pub profile_url: String,
    pub directory_url: String,
    pub reference_url: String,
    pub actions_url: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ObjectStoreConfig {
    pub root: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct QueuesConfig {
    pub account_confirmed: String,
    pub account_updated: String,
    pub coj_published: String,
    pub contact_details_updated: String,
    pub email_event: String,
    pub form_updated: String,
    pub gmc_rejected: String,
    pub gmc_updated: String,
    pub ltft_updated: String,
    pub ltft_updated_tpd: String,
    pub placement_updated: String,
    pub placement_deleted: String,
    pub programme_membership_updated: String,
    pub programme_membership_deleted: String,
    pub outbox: String,
    /// Topic queue the history broadcast view is published to.
    pub topic: String,
    pub poll_interval_secs: u64,
    pub visibility_timeout_secs: u64,
    pub max_attempts: i64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SchedulerConfig {
    pub misfire_window_secs: u64,
}

impl Config {
    /// Loads `config/default.toml`, an optional override file, and
    /// `TRAINEEHUB_`-prefixed environment variables, in that order.
    ///
    /// Example environment variable: `TRAINEEHUB_DATABASE__URL=sqlite://...`
    pub fn load(config_path: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigLoader::builder().add_source(File::with_name("config/default"));

        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path));
        }

        builder = builder.add_source(File::with_name("config/dev").required(false));

        let config = builder
            .add_source(Environment::with_prefix("TRAINEEHUB").separator("__"))
            .build()?;

        config.try_deserialize()
    }
}
