//! Configuration types for chainstore
//!
//! This module defines the tunables shared by the storage engine and the
//! value containers built on it.

use crate::error::{Error, Result};
use crate::types::RecordAddress;
use serde::{Deserialize, Serialize};

/// Storage engine configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Maximum length of one text record (manifest pages, inline values)
    pub page_limit: usize,
    /// Size of one binary segment when a payload is chunked
    pub segment_size: usize,
    /// Inline payloads whose encoded size grows past this become chunked
    pub upper_threshold: usize,
    /// Chunked payloads whose encoded size drops below this become inline
    pub lower_threshold: usize,
    /// Maximum number of resident chunk payloads per chunked store
    /// (`None` = unbounded)
    pub cache_limit: Option<usize>,
    /// Capacity of the per-list element cache
    pub list_cache_entries: usize,
    /// Number of background worker threads
    pub workers: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            page_limit: 3950,
            segment_size: 19_500_000, // just under the attachment limit
            upper_threshold: 3950,
            lower_threshold: 3500,
            cache_limit: None,
            list_cache_entries: 256,
            workers: 8,
        }
    }
}

impl StoreConfig {
    /// Parse a TOML document; missing keys take their defaults
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(s).map_err(|e| Error::configuration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Builder-style override of the chunk segment size
    #[must_use]
    pub const fn with_segment_size(mut self, segment_size: usize) -> Self {
        self.segment_size = segment_size;
        self
    }

    /// Builder-style override of the chunk cache bound
    #[must_use]
    pub const fn with_cache_limit(mut self, cache_limit: Option<usize>) -> Self {
        self.cache_limit = cache_limit;
        self
    }

    /// Builder-style override of the inline/chunked hysteresis band
    #[must_use]
    pub const fn with_thresholds(mut self, lower: usize, upper: usize) -> Self {
        self.lower_threshold = lower;
        self.upper_threshold = upper;
        self
    }

    /// Check the invariants the engine relies on
    pub fn validate(&self) -> Result<()> {
        // two tag bytes, a pointer and one address must fit on a page
        let min_page = 2 + 2 * (RecordAddress::MAX_ENCODED_LEN + 1);
        if self.page_limit < min_page {
            return Err(Error::configuration(format!(
                "page_limit {} is below the minimum of {min_page}",
                self.page_limit
            )));
        }
        if self.segment_size == 0 {
            return Err(Error::configuration("segment_size must be positive"));
        }
        if self.upper_threshold > self.page_limit {
            return Err(Error::configuration(format!(
                "upper_threshold {} exceeds page_limit {}",
                self.upper_threshold, self.page_limit
            )));
        }
        if self.lower_threshold >= self.upper_threshold {
            return Err(Error::configuration(format!(
                "lower_threshold {} must be below upper_threshold {}",
                self.lower_threshold, self.upper_threshold
            )));
        }
        if self.workers == 0 {
            return Err(Error::configuration("workers must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = StoreConfig::default();
        assert_eq!(config.page_limit, 3950);
        assert_eq!(config.cache_limit, None);
        config.validate().unwrap();
    }

    #[test]
    fn test_from_toml() {
        let config = StoreConfig::from_toml_str(
            r"
            segment_size = 4000
            cache_limit = 2
            ",
        )
        .unwrap();
        assert_eq!(config.segment_size, 4000);
        assert_eq!(config.cache_limit, Some(2));
        assert_eq!(config.upper_threshold, 3950);
    }

    #[test]
    fn test_invalid_thresholds() {
        let config = StoreConfig::default().with_thresholds(4000, 3000);
        assert!(matches!(config.validate(), Err(Error::Configuration(_))));

        let config = StoreConfig {
            page_limit: 20,
            ..StoreConfig::default()
        };
        assert!(config.validate().is_err());

        assert!(StoreConfig::from_toml_str("workers = 0").is_err());
    }
}
