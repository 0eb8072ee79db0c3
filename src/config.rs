//! Config loading and validation for [`crate::model::BenchmarkConfig`].
//!
//! Mirrors the teacher's `Config::from_file` fail-fast pattern: parse the
//! JSON, then validate before any network traffic can happen.

use std::fs;

use crate::error::{BenchError, Result};
use crate::model::BenchmarkConfig;

impl BenchmarkConfig {
    /// Load and validate a `BenchmarkConfig` from a JSON file on disk.
    pub fn from_file(path: &str) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|source| BenchError::ConfigRead {
            path: path.to_string(),
            source,
        })?;
        let config: BenchmarkConfig =
            serde_json::from_str(&raw).map_err(|source| BenchError::ConfigParse {
                path: path.to_string(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Configuration-error checks from spec.md §7: refuse the run before
    /// any network traffic rather than let it fail mid-flight.
    pub fn validate(&self) -> Result<()> {
        if self.concurrency.is_empty() {
            return Err(BenchError::InvalidConfig(
                "concurrency list must not be empty".to_string(),
            ));
        }
        if self.concurrency.iter().any(|&c| c < 1) {
            return Err(BenchError::InvalidConfig(
                "every concurrency level must be >= 1".to_string(),
            ));
        }
        if self.duration_s.is_none() && self.num_prompts == 0 {
            return Err(BenchError::InvalidConfig(
                "num_prompts must be > 0 when duration_s is not set".to_string(),
            ));
        }
        if self.server_url.trim().is_empty() {
            return Err(BenchError::InvalidConfig(
                "server_url must not be empty".to_string(),
            ));
        }
        if self.timeout_s == 0 {
            return Err(BenchError::InvalidConfig(
                "timeout_s must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::BenchmarkConfig;

    fn base_config() -> BenchmarkConfig {
        BenchmarkConfig {
            server_url: "http://localhost:8000".to_string(),
            model: "test-model".to_string(),
            adapter_kind: "openai".to_string(),
            input_len: 128,
            output_len: 64,
            num_prompts: 10,
            concurrency: vec![1, 2],
            stream: true,
            warmup: 0,
            timeout_s: 30,
            api_key: None,
            duration_s: None,
            goodput_thresholds: None,
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn empty_concurrency_rejected() {
        let mut c = base_config();
        c.concurrency.clear();
        assert!(matches!(
            c.validate(),
            Err(BenchError::InvalidConfig(_))
        ));
    }

    #[test]
    fn zero_concurrency_level_rejected() {
        let mut c = base_config();
        c.concurrency = vec![1, 0];
        assert!(c.validate().is_err());
    }

    #[test]
    fn zero_num_prompts_without_duration_rejected() {
        let mut c = base_config();
        c.num_prompts = 0;
        assert!(c.validate().is_err());
    }

    #[test]
    fn zero_num_prompts_with_duration_allowed() {
        let mut c = base_config();
        c.num_prompts = 0;
        c.duration_s = Some(30);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn from_file_rejects_missing_file() {
        let err = BenchmarkConfig::from_file("/nonexistent/path.json").unwrap_err();
        assert!(matches!(err, BenchError::ConfigRead { .. }));
    }

    #[test]
    fn from_file_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let config = base_config();
        fs::write(&path, serde_json::to_string(&config).unwrap()).unwrap();
        let loaded = BenchmarkConfig::from_file(path.to_str().unwrap()).unwrap();
        assert_eq!(loaded.server_url, config.server_url);
        assert_eq!(loaded.concurrency, config.concurrency);
    }
}
