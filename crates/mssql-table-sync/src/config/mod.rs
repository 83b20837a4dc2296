//! Configuration loading and validation.

mod types;
mod validation;

pub use types::*;

use crate::error::Result;
use std::path::Path;

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }
}

impl ConnectionConfig {
    /// Whether TLS should be negotiated for this connection.
    pub fn encryption_enabled(&self) -> bool {
        !matches!(
            self.encrypt.to_lowercase().as_str(),
            "false" | "no" | "0" | "disable"
        )
    }

    /// `host:port/database` label used in log lines.
    pub fn endpoint(&self) -> String {
        format!("{}:{}/{}", self.host, self.port, self.database)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
source:
  host: sql.example.net
  database: source_db
  user: sync
  password: secret
destination:
  host: sql.example.net
  database: destination_db
  user: sync
  password: secret
"#;

    #[test]
    fn test_minimal_yaml_applies_defaults() {
        let config = Config::from_yaml(MINIMAL).unwrap();
        assert_eq!(config.source.port, 1433);
        assert_eq!(config.source.schema, "dbo");
        assert_eq!(config.sync.job_name, "tables:copy");
        assert_eq!(config.sync.batch_size, 5);
        assert_eq!(config.sync.max_retries, 3);
        assert_eq!(config.sync.backoff_base, 2);
        assert_eq!(config.sync.staging_prefix, "##sync_");
        assert_eq!(config.sync.dispatch, DispatchMode::Auto);
        assert!(config.sync.suspend_constraints);
    }

    #[test]
    fn test_staging_defaults_to_source_tempdb() {
        let config = Config::from_yaml(MINIMAL).unwrap();
        let staging = config.staging_config();
        assert_eq!(staging.host, "sql.example.net");
        assert_eq!(staging.database, "tempdb");
    }

    #[test]
    fn test_control_defaults_to_destination() {
        let config = Config::from_yaml(MINIMAL).unwrap();
        assert_eq!(config.control_config().database, "destination_db");
    }

    #[test]
    fn test_sync_overrides() {
        let yaml = format!(
            "{}sync:\n  batch_size: 2\n  dispatch: sequential\n  exclude_tables: [Audit]\n",
            MINIMAL
        );
        let config = Config::from_yaml(&yaml).unwrap();
        assert_eq!(config.sync.batch_size, 2);
        assert_eq!(config.sync.dispatch, DispatchMode::Sequential);
        assert!(!config.sync.selects_table("audit"));
        assert!(config.sync.selects_table("Orders"));
    }

    #[test]
    fn test_include_filter() {
        let sync = SyncConfig {
            include_tables: vec!["Orders".into()],
            ..SyncConfig::default()
        };
        assert!(sync.selects_table("ORDERS"));
        assert!(!sync.selects_table("Customers"));
    }

    #[test]
    fn test_encryption_flag() {
        let mut config = Config::from_yaml(MINIMAL).unwrap();
        assert!(config.source.encryption_enabled());
        config.source.encrypt = "disable".into();
        assert!(!config.source.encryption_enabled());
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = Config::load("does/not/exist.yaml").unwrap_err();
        assert_eq!(err.exit_code(), 7);
    }

    #[test]
    fn test_explicit_dispatch_resolves_to_itself() {
        assert_eq!(DispatchMode::Parallel.resolve(), DispatchMode::Parallel);
        assert_eq!(DispatchMode::Sequential.resolve(), DispatchMode::Sequential);
        assert_ne!(DispatchMode::Auto.resolve(), DispatchMode::Auto);
    }
}
