use assignments_block::{EngineConfig, PipelineConfig};
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{name} has invalid value {value:?}: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

/// Settings read once per cold start. Every variable has a default so a bare
/// deployment still starts.
#[derive(Debug, Clone)]
pub struct Config {
    pub table_name: String,
    pub bucket_name: String,
    /// Prefix of the URLs handed out for evidence blobs.
    pub public_blob_base_url: String,
    /// `*` or a comma separated list of origins.
    pub allowed_origins: String,
    pub engine: EngineConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = EngineConfig::default();
        let bucket_name = lookup("S3_BUCKET_NAME").unwrap_or_else(|| "lms-submissions".to_string());
        let public_blob_base_url = lookup("PUBLIC_BLOB_BASE_URL")
            .unwrap_or_else(|| format!("https://{}.s3.amazonaws.com", bucket_name));

        let pipeline = PipelineConfig {
            max_cas_attempts: parse(&lookup, "MAX_CAS_ATTEMPTS", defaults.pipeline.max_cas_attempts)?,
            max_blob_attempts: parse(&lookup, "MAX_BLOB_ATTEMPTS", defaults.pipeline.max_blob_attempts)?,
            allow_resubmission: parse(&lookup, "ALLOW_RESUBMISSION", defaults.pipeline.allow_resubmission)?,
            retain_superseded: parse(&lookup, "RETAIN_SUPERSEDED", defaults.pipeline.retain_superseded)?,
            max_file_bytes: parse(&lookup, "MAX_FILE_BYTES", defaults.pipeline.max_file_bytes)?,
        };
        if pipeline.max_cas_attempts == 0 || pipeline.max_blob_attempts == 0 {
            return Err(ConfigError::Invalid {
                name: "MAX_CAS_ATTEMPTS/MAX_BLOB_ATTEMPTS",
                value: "0".to_string(),
                reason: "at least one attempt is required".to_string(),
            });
        }

        Ok(Self {
            table_name: lookup("TABLE_NAME").unwrap_or_else(|| "lms".to_string()),
            bucket_name,
            public_blob_base_url,
            allowed_origins: lookup("ALLOWED_ORIGINS").unwrap_or_else(|| "*".to_string()),
            engine: EngineConfig {
                max_write_attempts: pipeline.max_cas_attempts,
                pipeline,
                ..defaults
            },
        })
    }
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            reason: e.to_string(),
            value,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[]).unwrap();
        assert_eq!(config.table_name, "lms");
        assert_eq!(config.public_blob_base_url, "https://lms-submissions.s3.amazonaws.com");
        assert!(!config.engine.pipeline.allow_resubmission);
        assert!(config.engine.pipeline.retain_superseded);
        assert_eq!(config.engine.pipeline.max_cas_attempts, 3);
    }

    #[test]
    fn test_overrides() {
        let config = config(&[
            ("TABLE_NAME", "lms-prod"),
            ("ALLOW_RESUBMISSION", "true"),
            ("MAX_CAS_ATTEMPTS", "5"),
            ("MAX_FILE_BYTES", "1024"),
        ])
        .unwrap();
        assert_eq!(config.table_name, "lms-prod");
        assert!(config.engine.pipeline.allow_resubmission);
        assert_eq!(config.engine.pipeline.max_cas_attempts, 5);
        assert_eq!(config.engine.max_write_attempts, 5);
        assert_eq!(config.engine.pipeline.max_file_bytes, 1024);
    }

    #[test]
    fn test_invalid_values() {
        assert!(config(&[("ALLOW_RESUBMISSION", "yes")]).is_err());
        assert!(config(&[("MAX_BLOB_ATTEMPTS", "0")]).is_err());
    }
}
