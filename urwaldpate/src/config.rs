use serde::Deserialize;
use sponsorship::config::{Config as SponsorshipConfig, ValidationError};
use std::fs::File;

#[derive(Deserialize, Debug)]
pub struct MetricsConfig {
    pub statsd_host: String,
    pub statsd_port: u16,
}

#[derive(Deserialize, Debug)]
pub struct LoggingConfig {
    pub sentry_dsn: String,
}

#[derive(Deserialize, Debug)]
pub struct CommonConfig {
    pub metrics: Option<MetricsConfig>,
    pub logging: Option<LoggingConfig>,
}

#[derive(Deserialize, Debug)]
pub struct Config {
    #[serde(flatten)]
    pub common: CommonConfig,
    pub sponsorship: SponsorshipConfig,
}

impl Config {
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        let config: Config = serde_yaml::from_reader(file)?;
        config.sponsorship.validate()?;

        Ok(config)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("could not load config from file: {0}")]
    LoadError(#[from] std::io::Error),
    #[error("could not parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    ValidationError(#[from] ValidationError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use sponsorship::config::{IdentifierParsing, StoreCredentials, UploadTarget};
    use std::io::Write;

    fn write_tmp_file(s: &str) -> tempfile::NamedTempFile {
        let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
        write!(tmp, "{}", s).expect("write yaml");

        tmp
    }

    #[test]
    fn full_config() {
        let yaml = r#"
            metrics:
                statsd_host: 127.0.0.1
                statsd_port: 8125
            logging:
                sentry_dsn: https://key@sentry.example.com/1
            sponsorship:
                listener:
                    host: 0.0.0.0
                    port: 8080
                identifiers: strict
                store:
                    url: https://urwald.firebaseio.com
                    credentials:
                        type: service_account
                        path: /etc/urwaldpate/service-account.json
                auth:
                    signing_key: secret
                    basic:
                        username: admin
                        password: hunter2
                upload:
                    target:
                        type: relay
                        url: https://uploads.example.com/features.json
            "#;
        let tmp = write_tmp_file(yaml);
        let config = Config::from_file(tmp.path()).expect("load config");

        let metrics = config.common.metrics.expect("metrics config");
        assert_eq!(metrics.statsd_host, "127.0.0.1");
        assert_eq!(metrics.statsd_port, 8125);
        assert!(config.common.logging.is_some());

        let sponsorship = config.sponsorship;
        assert_eq!(sponsorship.listener.port, 8080);
        assert_eq!(sponsorship.identifiers, IdentifierParsing::Strict);
        assert_eq!(
            sponsorship.store.credentials,
            StoreCredentials::ServiceAccount {
                path: "/etc/urwaldpate/service-account.json".into()
            }
        );
        assert!(matches!(sponsorship.upload.target, UploadTarget::Relay { .. }));
    }

    #[test]
    fn minimal_config() {
        let yaml = r#"
            sponsorship:
                store:
                    url: https://urwald.firebaseio.com
                    credentials: {type: none}
                auth:
                    signing_key: secret
                    basic: {username: admin, password: hunter2}
            "#;
        let tmp = write_tmp_file(yaml);
        let config = Config::from_file(tmp.path()).expect("load config");

        assert!(config.common.metrics.is_none());
        assert!(config.common.logging.is_none());
        assert_eq!(config.sponsorship.route_prefix, "/urwaldpate");
    }

    #[test]
    fn invalid_config() {
        let yaml = r#"
            sponsorship:
                store:
                    url: https://urwald.firebaseio.com
                    credentials: {type: none}
                auth:
                    signing_key: ""
                    basic: {username: admin, password: hunter2}
            "#;
        let tmp = write_tmp_file(yaml);
        assert!(matches!(
            Config::from_file(tmp.path()),
            Err(ConfigError::ValidationError(ValidationError::EmptySigningKey))
        ));

        let tmp = write_tmp_file("sponsorship: 12");
        assert!(matches!(
            Config::from_file(tmp.path()),
            Err(ConfigError::ParseError(_))
        ));

        assert!(matches!(
            Config::from_file(std::path::Path::new("/nonexistent/urwaldpate.yaml")),
            Err(ConfigError::LoadError(_))
        ));
    }
}
