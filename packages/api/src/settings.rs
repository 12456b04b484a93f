//! # Runtime configuration
//!
//! Layered with the `config` crate, later sources winning:
//!
//! 1. built-in defaults (see [`Settings::builder`]);
//! 2. optional `registry.toml` in the working directory;
//! 3. `REGISTRY__SECTION__KEY` environment variables
//!    (e.g. `REGISTRY__SERVER__PORT=9000`);
//! 4. the conventional `DATABASE_URL` and `SESSION_SECRET` variables.
//!
//! A `.env` file is loaded with `dotenvy` before any of this.

use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;
use store::IdentifierFormat;

/// Session secret used when `SESSION_SECRET` is unset. Development only.
pub const INSECURE_DEV_SESSION_SECRET: &str =
    "insecure-development-session-secret-do-not-use-in-production";

#[derive(Debug, Clone, Deserialize)]
pub struct Server {
    pub host: String,
    pub port: u16,
}

impl Server {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Database {
    /// `None` runs the registry on in-memory stores.
    pub url: Option<String>,
    pub max_connections: u32,
}

#[derive(Clone, Deserialize)]
pub struct Session {
    pub secret: Option<String>,
    pub cookie_name: String,
    pub ttl_hours: i64,
    /// Mark the cookie `Secure`. Off by default for plain-HTTP development.
    pub secure: bool,
    pub prune_interval_secs: u64,
}

impl Session {
    /// The configured secret, or the development fallback with `true`.
    pub fn secret_or_fallback(&self) -> (&str, bool) {
        match self.secret.as_deref() {
            Some(secret) if !secret.is_empty() => (secret, false),
            _ => (INSECURE_DEV_SESSION_SECRET, true),
        }
    }

    pub fn ttl(&self) -> time::Duration {
        time::Duration::hours(self.ttl_hours)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("secret", &self.secret.as_ref().map(|_| "[REDACTED]"))
            .field("cookie_name", &self.cookie_name)
            .field("ttl_hours", &self.ttl_hours)
            .field("secure", &self.secure)
            .field("prune_interval_secs", &self.prune_interval_secs)
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Patients {
    pub identifier_prefix: String,
    pub identifier_digits: usize,
}

impl Patients {
    pub fn identifier_format(&self) -> IdentifierFormat {
        IdentifierFormat::new(self.identifier_prefix.clone(), self.identifier_digits)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub server: Server,
    pub database: Database,
    pub session: Session,
    pub patients: Patients,
}

impl Settings {
    /// Load settings from every source.
    pub fn new() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        Self::builder()?
            .add_source(
                File::with_name("registry.toml")
                    .format(FileFormat::Toml)
                    .required(false),
            )
            .add_source(
                Environment::with_prefix("REGISTRY")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .set_override_option("database.url", std::env::var("DATABASE_URL").ok())?
            .set_override_option("session.secret", std::env::var("SESSION_SECRET").ok())?
            .build()?
            .try_deserialize()
    }

    /// Defaults only.
    pub fn builder() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        Config::builder()
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8080)?
            .set_default("database.max_connections", 5)?
            .set_default("session.cookie_name", "registry_session")?
            .set_default("session.ttl_hours", 24)?
            .set_default("session.secure", false)?
            .set_default("session.prune_interval_secs", 60 * 60 * 24)?
            .set_default("patients.identifier_prefix", "RH")?
            .set_default("patients.identifier_digits", 6)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: Server {
                host: "127.0.0.1".into(),
                port: 8080,
            },
            database: Database {
                url: None,
                max_connections: 5,
            },
            session: Session {
                secret: None,
                cookie_name: "registry_session".into(),
                ttl_hours: 24,
                secure: false,
                prune_interval_secs: 60 * 60 * 24,
            },
            patients: Patients {
                identifier_prefix: "RH".into(),
                identifier_digits: 6,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings: Settings = Settings::builder()
            .unwrap()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(settings.server.address(), "127.0.0.1:8080");
        assert!(settings.database.url.is_none());
        assert_eq!(settings.session.ttl_hours, 24);
        assert!(!settings.session.secure);
        assert_eq!(settings.session.prune_interval_secs, 86_400);
        assert_eq!(
            settings.patients.identifier_format(),
            IdentifierFormat::default()
        );
    }

    #[test]
    fn test_file_overrides_defaults() {
        let toml = r#"
            [server]
            port = 9090

            [session]
            secret = "s3cret"
            secure = true

            [patients]
            identifier_prefix = "VX"
        "#;
        let settings: Settings = Settings::builder()
            .unwrap()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(settings.server.port, 9090);
        assert!(settings.session.secure);
        assert_eq!(settings.session.secret_or_fallback(), ("s3cret", false));
        assert_eq!(settings.patients.identifier_format().issue(7).as_str(), "VX000007");
    }

    #[test]
    fn test_missing_secret_falls_back() {
        let settings = Settings::default();
        let (secret, fallback) = settings.session.secret_or_fallback();
        assert!(fallback);
        assert_eq!(secret, INSECURE_DEV_SESSION_SECRET);
    }

    #[test]
    fn test_debug_redacts_secret() {
        let mut settings = Settings::default();
        settings.session.secret = Some("hunter2".into());
        assert!(!format!("{settings:?}").contains("hunter2"));
    }
}
