use latest_builds::config::Config as ServiceConfig;
use serde::Deserialize;
use std::fs::File;

#[derive(Deserialize, Debug, PartialEq)]
pub struct MetricsConfig {
    pub statsd_host: String,
    pub statsd_port: u16,
    #[serde(default = "default_metrics_prefix")]
    pub prefix: String,
}

fn default_metrics_prefix() -> String {
    "sqlbuilds".into()
}

#[derive(Deserialize, Debug, PartialEq)]
pub struct LoggingConfig {
    pub sentry_dsn: Option<String>,
}

#[derive(Deserialize, Debug, PartialEq)]
pub struct CommonConfig {
    pub metrics: Option<MetricsConfig>,
    pub logging: Option<LoggingConfig>,
}

#[derive(Deserialize, Debug)]
pub struct Config {
    #[serde(flatten)]
    pub common: CommonConfig,
    #[serde(flatten)]
    pub service: ServiceConfig,
}

impl Config {
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        let data = serde_yaml::from_reader(file)?;

        Ok(data)
    }

    pub fn sentry_dsn(&self) -> Option<&str> {
        self.common
            .logging
            .as_ref()
            .and_then(|l| l.sentry_dsn.as_deref())
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("could not load config from file: {0}")]
    LoadError(#[from] std::io::Error),
    #[error("could not parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use latest_builds::config::BlobStoreType;
    use std::io::Write;

    fn write_tmp_file(s: &str) -> tempfile::NamedTempFile {
        let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
        write!(tmp, "{}", s).expect("write yaml");

        tmp
    }

    #[test]
    fn service_config() {
        let yaml = r#"
            metrics:
                statsd_host: 127.0.0.1
                statsd_port: 8125
            logging:
                sentry_dsn: https://key@sentry.example.com/1
            listener:
                host: 0.0.0.0
                port: 8080
            blob_store:
                type: filesystem
                base_dir: /var/lib/sqlbuilds/
            refresh:
                interval_secs: 900
            "#;
        let tmp = write_tmp_file(yaml);
        let config = Config::from_file(tmp.path()).expect("load config");

        assert_eq!(
            config.common.metrics,
            Some(MetricsConfig {
                statsd_host: "127.0.0.1".into(),
                statsd_port: 8125,
                prefix: "sqlbuilds".into(),
            })
        );
        assert_eq!(config.sentry_dsn(), Some("https://key@sentry.example.com/1"));
        assert_eq!(config.service.listener.port, 8080);
        assert_eq!(config.service.refresh.interval_secs, 900);
        assert_eq!(
            config.service.blob_store.r#type,
            BlobStoreType::Filesystem {
                base_dir: "/var/lib/sqlbuilds/".into()
            }
        );
    }

    #[test]
    fn common_sections_optional() {
        let tmp = write_tmp_file("blob_store:\n  type: gcs\n");
        let config = Config::from_file(tmp.path()).expect("load config");
        assert_eq!(config.common.metrics, None);
        assert_eq!(config.sentry_dsn(), None);
        assert_eq!(config.service.blob_store.r#type, BlobStoreType::Gcs);
    }

    #[test]
    fn missing_file() {
        let err = Config::from_file(std::path::Path::new("/nonexistent/sqlbuilds.yaml"))
            .unwrap_err();
        assert!(matches!(err, ConfigError::LoadError(_)));
    }

    #[test]
    fn missing_blob_store() {
        let tmp = write_tmp_file("listener:\n  host: 0.0.0.0\n  port: 8080\n");
        assert!(matches!(
            Config::from_file(tmp.path()),
            Err(ConfigError::ParseError(_))
        ));
    }
}
