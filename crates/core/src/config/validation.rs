//! Configuration validation rules.
//!
//! This module provides validation logic for `IconDatabaseConfig` values
//! after they have been loaded from environment, files, or defaults.

use crate::config::IconDatabaseConfig;
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },
}

impl IconDatabaseConfig {
    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if:
    /// - `sync_delay_ms` exceeds 10 minutes
    /// - `icon_expiration_secs`, `read_batch_size` or `pending_sync_soft_limit` is 0
    /// - `database_filename` is empty or contains a path separator
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sync_delay_ms > 600_000 {
            return Err(ConfigError::Invalid {
                field: "sync_delay_ms".into(),
                reason: "must not exceed 10 minutes (600000ms)".into(),
            });
        }

        if self.icon_expiration_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "icon_expiration_secs".into(),
                reason: "must be greater than 0".into(),
            });
        }

        if self.read_batch_size == 0 {
            return Err(ConfigError::Invalid { field: "read_batch_size".into(), reason: "must be greater than 0".into() });
        }

        if self.pending_sync_soft_limit == 0 {
            return Err(ConfigError::Invalid {
                field: "pending_sync_soft_limit".into(),
                reason: "must be greater than 0".into(),
            });
        }

        if self.database_filename.is_empty() {
            return Err(ConfigError::Invalid { field: "database_filename".into(), reason: "must not be empty".into() });
        }
        if self.database_filename.contains(['/', '\\']) {
            return Err(ConfigError::Invalid {
                field: "database_filename".into(),
                reason: "must be a file name, not a path".into(),
            });
        }

        if self.prune_unretained_on_open && self.legacy_import_path.is_some() {
            tracing::warn!(
                "Both prune_unretained_on_open and legacy_import_path are set; \
                 imported bindings nobody retains will be swept right after import"
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_default_config() {
        let config = IconDatabaseConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_sync_delay_exceeds_limit() {
        let config = IconDatabaseConfig { sync_delay_ms: 600_001, ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "sync_delay_ms"));
    }

    #[test]
    fn test_validate_zero_sync_delay_allowed() {
        let config = IconDatabaseConfig { sync_delay_ms: 0, ..Default::default() };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_zero_expiration() {
        let config = IconDatabaseConfig { icon_expiration_secs: 0, ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "icon_expiration_secs"));
    }

    #[test]
    fn test_validate_zero_read_batch() {
        let config = IconDatabaseConfig { read_batch_size: 0, ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "read_batch_size"));
    }

    #[test]
    fn test_validate_zero_soft_limit() {
        let config = IconDatabaseConfig { pending_sync_soft_limit: 0, ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "pending_sync_soft_limit"));
    }

    #[test]
    fn test_validate_filename_with_separator() {
        let config = IconDatabaseConfig { database_filename: "nested/icons.db".into(), ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "database_filename"));
    }

    #[test]
    fn test_validate_empty_filename() {
        let config = IconDatabaseConfig { database_filename: String::new(), ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "database_filename"));
    }
}
