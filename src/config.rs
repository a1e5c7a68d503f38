use std::time::Duration;

use thiserror::Error;

/// Application-level constants
pub const APP_NAME: &str = "TaxDoc";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Per-file cap applied to uploads and to every attachment found inside a container.
pub const MAX_FILE_BYTES: usize = 10 * 1024 * 1024;

/// Breadcrumb separator meaning "found inside". Reserved: never produced by a file name.
pub const PATH_SEPARATOR: &str = " > ";

/// Root folder of the original documents inside the audit archive.
pub const SOURCE_DOCUMENTS_DIR: &str = "Source_Documents";

/// Suffix of the sibling folder holding a container's extracted attachments.
pub const ATTACHMENTS_SUFFIX: &str = "_attachments";

/// Fixed name of the workbook at the archive root.
pub const WORKBOOK_FILE_NAME: &str = "Tax_Summary.xlsx";

/// Fixed name of the client email draft at the archive root.
pub const EMAIL_DRAFT_FILE_NAME: &str = "Client_Email_Draft.txt";

/// Relative-path prefixes marking reference-only inputs.
pub const PRIOR_YEAR_PREFIX: &str = "PRIOR";
pub const TEMPLATE_PREFIX: &str = "TEMPLATE";

pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Log filter used when `RUST_LOG` is unset.
pub fn default_log_filter() -> &'static str {
    if is_dev() {
        "taxdoc=debug,info"
    } else {
        "taxdoc=info,warn"
    }
}

pub fn is_dev() -> bool {
    cfg!(debug_assertions)
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("GEMINI_API_KEY is not set")]
    MissingApiKey,

    #[error("Invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },
}

/// Settings for the extraction model client, read once at start-up.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub api_key: String,
    pub model: String,
    pub timeout: Duration,
    pub max_retries: u32,
}

impl ModelConfig {
    /// Read `GEMINI_API_KEY`, `TAXDOC_MODEL`, `TAXDOC_TIMEOUT_SECS` and `TAXDOC_MAX_RETRIES`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let api_key = lookup("GEMINI_API_KEY")
            .filter(|k| !k.trim().is_empty())
            .ok_or(ConfigError::MissingApiKey)?;

        let model = lookup("TAXDOC_MODEL")
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());

        let timeout_secs = parse_or("TAXDOC_TIMEOUT_SECS", &lookup, DEFAULT_TIMEOUT_SECS)?;
        let max_retries = parse_or("TAXDOC_MAX_RETRIES", &lookup, DEFAULT_MAX_RETRIES)?;

        Ok(Self {
            api_key,
            model,
            timeout: Duration::from_secs(timeout_secs),
            max_retries,
        })
    }
}

fn parse_or<T: std::str::FromStr>(
    name: &'static str,
    lookup: &impl Fn(&str) -> Option<String>,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(name) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { name, value }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn missing_api_key_is_an_error() {
        let result = ModelConfig::from_lookup(lookup_from(&[]));
        assert!(matches!(result, Err(ConfigError::MissingApiKey)));
    }

    #[test]
    fn blank_api_key_is_an_error() {
        let result = ModelConfig::from_lookup(lookup_from(&[("GEMINI_API_KEY", "  ")]));
        assert!(matches!(result, Err(ConfigError::MissingApiKey)));
    }

    #[test]
    fn defaults_apply_when_only_key_is_set() {
        let config = ModelConfig::from_lookup(lookup_from(&[("GEMINI_API_KEY", "k")])).unwrap();
        assert_eq!(config.api_key, "k");
        assert_eq!(config.model, DEFAULT_MODEL);
        assert_eq!(config.timeout, Duration::from_secs(DEFAULT_TIMEOUT_SECS));
        assert_eq!(config.max_retries, DEFAULT_MAX_RETRIES);
    }

    #[test]
    fn overrides_are_parsed() {
        let config = ModelConfig::from_lookup(lookup_from(&[
            ("GEMINI_API_KEY", "k"),
            ("TAXDOC_MODEL", "gemini-2.5-pro"),
            ("TAXDOC_TIMEOUT_SECS", "45"),
            ("TAXDOC_MAX_RETRIES", "5"),
        ]))
        .unwrap();
        assert_eq!(config.model, "gemini-2.5-pro");
        assert_eq!(config.timeout, Duration::from_secs(45));
        assert_eq!(config.max_retries, 5);
    }

    #[test]
    fn invalid_number_is_reported() {
        let result = ModelConfig::from_lookup(lookup_from(&[
            ("GEMINI_API_KEY", "k"),
            ("TAXDOC_TIMEOUT_SECS", "soon"),
        ]));
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { name: "TAXDOC_TIMEOUT_SECS", .. })
        ));
    }

    #[test]
    fn max_file_size_is_ten_mebibytes() {
        assert_eq!(MAX_FILE_BYTES, 10_485_760);
    }

    #[test]
    fn app_name_is_taxdoc() {
        assert_eq!(APP_NAME, "TaxDoc");
    }
}
