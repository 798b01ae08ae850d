//! Configuration file loading: `KEY = VALUE` lines, `//` comments,
//! `%ENV_VAR%` substitution, cached by canonical path. See `spec.md` §6.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use lru::LruCache;
use once_cell::sync::Lazy;
use parking_lot::Mutex;

use crate::error::ConfigError;

const CACHE_CAPACITY: usize = 16;

static CONFIG_CACHE: Lazy<Mutex<LruCache<PathBuf, Arc<Config>>>> = Lazy::new(|| {
    Mutex::new(LruCache::new(
        std::num::NonZeroUsize::new(CACHE_CAPACITY).expect("capacity is non-zero"),
    ))
});

/// A parsed configuration file: a flat `KEY -> VALUE` map with environment
/// substitution already applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    values: HashMap<String, String>,
}

impl Config {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn require(&self, key: &str) -> Result<&str, ConfigError> {
        self.get(key).ok_or_else(|| ConfigError::MissingKey {
            key: key.to_string(),
        })
    }

    pub fn require_u64(&self, key: &str) -> Result<u64, ConfigError> {
        let raw = self.require(key)?;
        raw.parse().map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            value: raw.to_string(),
            expected: "an unsigned integer",
        })
    }

    /// Loads and parses `path`, returning a cached copy if this exact
    /// canonical path was loaded before. The cache key is the lowercased
    /// canonical absolute path, so `Config.ini` and `./config.ini` from a
    /// different working directory hit the same entry.
    pub fn load(path: impl AsRef<Path>) -> Result<Arc<Config>, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::MissingFile {
                path: path.display().to_string(),
            });
        }
        let canonical = std::fs::canonicalize(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let cache_key = PathBuf::from(canonical.display().to_string().to_lowercase());

        if let Some(cached) = CONFIG_CACHE.lock().get(&cache_key) {
            return Ok(cached.clone());
        }

        let raw = std::fs::read_to_string(&canonical).map_err(|source| ConfigError::Io {
            path: canonical.display().to_string(),
            source,
        })?;
        let config = Arc::new(parse(&raw));

        CONFIG_CACHE.lock().put(cache_key, config.clone());
        Ok(config)
    }
}

/// Parses `KEY = VALUE` lines. Blank lines and lines starting with `//`
/// (after trimming leading whitespace) are ignored. A value that matches
/// `%NAME%` in its entirety is replaced by the `NAME` environment variable
/// (empty string if unset); a value that only contains a `%NAME%` substring
/// alongside other text is left untouched.
fn parse(raw: &str) -> Config {
    let mut values = HashMap::new();

    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with("//") {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim().to_string();
        let value = substitute_env(value.trim());
        values.insert(key, value);
    }

    Config { values }
}

/// `value` qualifies for substitution only when it's exactly `%NAME%` with
/// no surrounding text, and `NAME` is one or more word/underscore
/// characters.
fn substitute_env(value: &str) -> String {
    let Some(inner) = value.strip_prefix('%').and_then(|v| v.strip_suffix('%')) else {
        return value.to_string();
    };
    if inner.is_empty() || !inner.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return value.to_string();
    }
    std::env::var(inner).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_keys_skipping_comments_and_blank_lines() {
        let raw = "\n// a comment\nFOO = bar\n\nBAZ=qux\n";
        let config = parse(raw);
        assert_eq!(config.get("FOO"), Some("bar"));
        assert_eq!(config.get("BAZ"), Some("qux"));
    }

    #[test]
    fn substitutes_environment_variables_that_match_the_whole_value() {
        std::env::set_var("PARLEY_TEST_VAR", "substituted");
        let config = parse("KEY = %PARLEY_TEST_VAR%\n");
        assert_eq!(config.get("KEY"), Some("substituted"));
        std::env::remove_var("PARLEY_TEST_VAR");
    }

    #[test]
    fn unset_environment_variable_becomes_empty_string() {
        let config = parse("KEY = %PARLEY_DEFINITELY_UNSET_VAR%\n");
        assert_eq!(config.get("KEY"), Some(""));
    }

    #[test]
    fn partial_percent_wrapped_substring_is_left_verbatim() {
        std::env::set_var("PARLEY_TEST_VAR2", "substituted");
        let config = parse("KEY = prefix-%PARLEY_TEST_VAR2%-suffix\n");
        assert_eq!(config.get("KEY"), Some("prefix-%PARLEY_TEST_VAR2%-suffix"));
        std::env::remove_var("PARLEY_TEST_VAR2");
    }

    #[test]
    fn require_u64_rejects_non_numeric_values() {
        let config = parse("PORT = not-a-number\n");
        assert!(config.require_u64("PORT").is_err());
    }

    #[test]
    fn missing_file_is_reported_before_any_io() {
        let err = Config::load("/nonexistent/path/to/config.ini").unwrap_err();
        assert!(matches!(err, ConfigError::MissingFile { .. }));
    }
}
