//! Configuration for the write-back layer.

use std::collections::HashMap;

use tracing::debug;

use crate::common::{Error, Result};

/// Default aggregate threshold in bytes (1 MiB).
///
/// Once a session has this many bytes buffered, the run is flushed to the
/// backend as one write.
pub const DEFAULT_AGGREGATE_SIZE: usize = 1024 * 1024;

/// Option key holding the aggregate threshold.
pub const AGGREGATE_SIZE_KEY: &str = "aggregate-size";

/// Tunables for [`WriteBackManager`](crate::buffer::WriteBackManager).
///
/// Supplied once at construction and immutable afterwards.
///
/// # Example
/// ```
/// use writeback::WriteBackConfig;
///
/// let config = WriteBackConfig::new(64 * 1024).unwrap();
/// assert_eq!(config.aggregate_size(), 65536);
///
/// assert!(WriteBackConfig::new(0).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteBackConfig {
    aggregate_size: usize,
}

impl WriteBackConfig {
    /// Create a config with the given aggregate threshold.
    ///
    /// # Errors
    /// - `Error::Configuration` if `aggregate_size` is 0
    pub fn new(aggregate_size: usize) -> Result<Self> {
        if aggregate_size == 0 {
            return Err(Error::Configuration(format!(
                "{} must be a positive integer",
                AGGREGATE_SIZE_KEY
            )));
        }
        Ok(Self { aggregate_size })
    }

    /// Build a config from a string option table.
    ///
    /// Only `aggregate-size` is recognized; when absent the default applies.
    ///
    /// # Errors
    /// - `Error::Configuration` if the value is not a positive integer
    pub fn from_options(options: &HashMap<String, String>) -> Result<Self> {
        let config = match options.get(AGGREGATE_SIZE_KEY) {
            Some(raw) => {
                let size = raw.trim().parse::<usize>().map_err(|e| {
                    Error::Configuration(format!(
                        "invalid {} {:?}: {}",
                        AGGREGATE_SIZE_KEY, raw, e
                    ))
                })?;
                Self::new(size)?
            }
            None => Self::default(),
        };

        debug!(
            aggregate_size = config.aggregate_size,
            "using aggregate-size = {}", config.aggregate_size
        );
        Ok(config)
    }

    /// Threshold in bytes at which a buffered run is flushed.
    #[inline]
    pub fn aggregate_size(&self) -> usize {
        self.aggregate_size
    }
}

impl Default for WriteBackConfig {
    fn default() -> Self {
        Self {
            aggregate_size: DEFAULT_AGGREGATE_SIZE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_default_is_one_mib() {
        assert_eq!(WriteBackConfig::default().aggregate_size(), 1_048_576);
    }

    #[test]
    fn test_zero_rejected() {
        let err = WriteBackConfig::new(0).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_from_options_missing_key_uses_default() {
        let config = WriteBackConfig::from_options(&HashMap::new()).unwrap();
        assert_eq!(config, WriteBackConfig::default());
    }

    #[test]
    fn test_from_options_parses_value() {
        let config = WriteBackConfig::from_options(&options(&[("aggregate-size", " 4096 ")]))
            .unwrap();
        assert_eq!(config.aggregate_size(), 4096);
    }

    #[test]
    fn test_from_options_rejects_garbage() {
        for bad in ["", "abc", "-1", "0", "1.5"] {
            let result = WriteBackConfig::from_options(&options(&[("aggregate-size", bad)]));
            assert!(
                matches!(result, Err(Error::Configuration(_))),
                "{:?} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_unrelated_options_ignored() {
        let config =
            WriteBackConfig::from_options(&options(&[("flush-behind", "on")])).unwrap();
        assert_eq!(config.aggregate_size(), DEFAULT_AGGREGATE_SIZE);
    }
}
