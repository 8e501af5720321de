//! Application configuration loaded from environment variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use ports::{BuildMode, TemplateLayout};
use workflow::{PollerConfig, ProvisioningSettings};

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    /// An environment variable has an invalid value.
    #[error("invalid value for {name}: {value:?}")]
    Invalid { name: &'static str, value: String },
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub name: String,
    pub max_connections: u32,
}

impl DatabaseConfig {
    /// Connection URL for the pool.
    pub fn url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.user, self.password, self.host, self.port, self.name
        )
    }
}

/// Where site assets and template sources are stored, and how sites are
/// exposed.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Local directory backing the object store.
    pub object_store_root: PathBuf,
    pub default_s3_web_domain: String,
    pub default_cert_arn: String,
}

#[derive(Debug, Clone)]
pub struct TemplateConfig {
    /// Local working copies of template sources.
    pub templates_folder: PathBuf,
    pub build_folder: String,
    /// Object key prefix of template sources.
    pub templates_path: String,
    pub fields_file_path: String,
    pub fields_file_name: String,
    pub build_command: String,
}

#[derive(Debug, Clone)]
pub struct MailConfig {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub from: String,
}

impl MailConfig {
    pub fn relay(&self) -> String {
        format!("{}:{}", self.smtp_host, self.smtp_port)
    }
}

/// Server configuration.
///
/// Reads from environment variables, see `.env.example` for the full list.
/// Required: `DB_HOST`, `DB_USER`, `DB_PASSWORD`, `DB_NAME`, `BASE_DOMAIN`,
/// `DEFAULT_S3_WEB_DOMAIN`, `DEFAULT_CERT_ARN`, `MAIL_FROM`.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_format: LogFormat,
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub base_domain: String,
    pub templates: TemplateConfig,
    pub mail: MailConfig,
    /// Runs the template change bridge.
    pub queue_enabled: bool,
    pub outbox_limit: i64,
    pub outbox_interval: Duration,
    pub outbox_defer: Duration,
    pub outbox_handler_timeout: Duration,
    /// Time in-flight work gets after a shutdown signal before it is aborted.
    pub shutdown_grace: Duration,
}

impl Config {
    /// Loads configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Loads configuration through `lookup`, which maps a variable name to
    /// its value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env(&lookup);
        let base_domain = env.required("BASE_DOMAIN")?;
        Ok(Self {
            host: env.or("HOST", "0.0.0.0"),
            port: env.parse_or("PORT", 3000)?,
            log_format: match env.or("LOG_FORMAT", "text").as_str() {
                "json" => LogFormat::Json,
                "text" => LogFormat::Text,
                other => {
                    return Err(ConfigError::Invalid {
                        name: "LOG_FORMAT",
                        value: other.to_string(),
                    });
                }
            },
            database: DatabaseConfig {
                host: env.required("DB_HOST")?,
                port: env.parse_or("DB_PORT", 5432)?,
                user: env.required("DB_USER")?,
                password: env.required("DB_PASSWORD")?,
                name: env.required("DB_NAME")?,
                max_connections: env.parse_or("DB_MAX_CONNECTIONS", 10)?,
            },
            storage: StorageConfig {
                object_store_root: env.or("OBJECT_STORE_ROOT", "./objects").into(),
                default_s3_web_domain: env.required("DEFAULT_S3_WEB_DOMAIN")?,
                default_cert_arn: env.required("DEFAULT_CERT_ARN")?,
            },
            templates: TemplateConfig {
                templates_folder: env.or("TEMPLATES_FOLDER", "./templates").into(),
                build_folder: env.or("BUILD_FOLDER", "dist"),
                templates_path: env.or("TEMPLATES_PATH", "templates/"),
                fields_file_path: env.or("FIELDS_FILE_PATH", "src"),
                fields_file_name: env.or("FIELDS_FILE_NAME", "fields.json"),
                build_command: env.or("BUILD_COMMAND", "npm run build"),
            },
            mail: MailConfig {
                smtp_host: env.or("SMTP_HOST", "localhost"),
                smtp_port: env.parse_or("SMTP_PORT", 587)?,
                from: env.required("MAIL_FROM")?,
            },
            base_domain,
            queue_enabled: env.parse_or("QUEUE_ENABLED", false)?,
            outbox_limit: env.parse_or("OUTBOX_LIMIT", 5)?,
            outbox_interval: env.seconds_or("OUTBOX_INTERVAL_SECONDS", 5)?,
            outbox_defer: env.seconds_or("OUTBOX_DEFER_SECONDS", 15)?,
            outbox_handler_timeout: env.seconds_or("OUTBOX_HANDLER_TIMEOUT_SECONDS", 600)?,
            shutdown_grace: env.seconds_or("SHUTDOWN_GRACE_SECONDS", 30)?,
        })
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn provisioning(&self) -> ProvisioningSettings {
        ProvisioningSettings::new(
            &self.base_domain,
            &self.storage.default_s3_web_domain,
            &self.storage.default_cert_arn,
        )
    }

    pub fn poller(&self) -> PollerConfig {
        PollerConfig {
            limit: self.outbox_limit,
            interval: self.outbox_interval,
            defer_delay: self.outbox_defer,
            handler_timeout: self.outbox_handler_timeout,
            ..PollerConfig::default()
        }
    }

    pub fn template_layout(&self) -> TemplateLayout {
        TemplateLayout {
            templates_root: self.templates.templates_folder.clone(),
            templates_prefix: self.templates.templates_path.clone(),
            build_folder: self.templates.build_folder.clone(),
            fields_file_path: self.templates.fields_file_path.clone(),
            fields_file_name: self.templates.fields_file_name.clone(),
        }
    }

    pub fn build_mode(&self) -> BuildMode {
        BuildMode::Command(self.templates.build_command.clone())
    }
}

struct Env<'a, F: Fn(&str) -> Option<String>>(&'a F);

impl<F: Fn(&str) -> Option<String>> Env<'_, F> {
    fn get(&self, name: &str) -> Option<String> {
        (self.0)(name).filter(|v| !v.is_empty())
    }

    fn required(&self, name: &'static str) -> Result<String, ConfigError> {
        self.get(name).ok_or(ConfigError::Missing(name))
    }

    fn or(&self, name: &str, default: &str) -> String {
        self.get(name).unwrap_or_else(|| default.to_string())
    }

    fn parse_or<T: FromStr>(&self, name: &'static str, default: T) -> Result<T, ConfigError> {
        match self.get(name) {
            None => Ok(default),
            Some(value) => value
                .parse()
                .map_err(|_| ConfigError::Invalid { name, value }),
        }
    }

    fn seconds_or(&self, name: &'static str, default: u64) -> Result<Duration, ConfigError> {
        self.parse_or(name, default).map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn required() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            ("DB_HOST", "db"),
            ("DB_USER", "sites"),
            ("DB_PASSWORD", "secret"),
            ("DB_NAME", "sites"),
            ("BASE_DOMAIN", "example.com"),
            ("DEFAULT_S3_WEB_DOMAIN", "bucket.s3-website.test"),
            ("DEFAULT_CERT_ARN", "arn:default"),
            ("MAIL_FROM", "no-reply@example.com"),
        ])
    }

    fn load(vars: &HashMap<&'static str, &'static str>) -> Result<Config, ConfigError> {
        Config::from_lookup(|name| vars.get(name).map(|v| v.to_string()))
    }

    #[test]
    fn test_default_values() {
        let config = load(&required()).unwrap();
        assert_eq!(config.addr(), "0.0.0.0:3000");
        assert_eq!(config.log_format, LogFormat::Text);
        assert_eq!(config.database.url(), "postgres://sites:secret@db:5432/sites");
        assert_eq!(config.database.max_connections, 10);
        assert_eq!(config.templates.build_folder, "dist");
        assert_eq!(config.templates.fields_file_name, "fields.json");
        assert_eq!(config.mail.relay(), "localhost:587");
        assert!(!config.queue_enabled);
        assert_eq!(config.shutdown_grace, Duration::from_secs(30));

        let poller = config.poller();
        assert_eq!(poller.limit, 5);
        assert_eq!(poller.interval, Duration::from_secs(5));
        assert_eq!(poller.defer_delay, Duration::from_secs(15));
        assert_eq!(poller.handler_timeout, Duration::from_secs(600));
    }

    #[test]
    fn test_overrides() {
        let mut vars = required();
        vars.extend([
            ("PORT", "8080"),
            ("LOG_FORMAT", "json"),
            ("QUEUE_ENABLED", "true"),
            ("OUTBOX_LIMIT", "20"),
            ("OUTBOX_DEFER_SECONDS", "0"),
        ]);
        let config = load(&vars).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.log_format, LogFormat::Json);
        assert!(config.queue_enabled);
        assert_eq!(config.poller().limit, 20);
        assert!(config.poller().defer_delay.is_zero());
        assert_eq!(config.provisioning().base_domain, "example.com");
    }

    #[test]
    fn test_missing_required() {
        let mut vars = required();
        vars.remove("DB_HOST");
        assert!(matches!(load(&vars), Err(ConfigError::Missing("DB_HOST"))));
    }

    #[test]
    fn test_invalid_number() {
        let mut vars = required();
        vars.insert("PORT", "eighty");
        assert!(matches!(
            load(&vars),
            Err(ConfigError::Invalid { name: "PORT", .. })
        ));
    }
}
