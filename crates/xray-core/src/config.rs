//! Environment configuration
//!
//! Every xray process (service and instrumented clients) reads its settings
//! from environment variables. `load_environment()` seeds the environment from
//! an env file first, without overriding anything already set.
//!
//! Lookup order:
//! 1. `$XRAY_ENV_FILE`
//! 2. `/etc/xray/environment`
//! 3. `.env` in the working directory

use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

/// Variable naming a custom env file
pub const ENV_FILE_VAR: &str = "XRAY_ENV_FILE";

/// Default env file locations, in priority order
pub const ENV_FILE_PATHS: &[&str] = &["/etc/xray/environment", ".env"];

/// Load variables from the first env file found.
///
/// Returns the path that was loaded, or None if no file was found.
pub fn load_environment() -> Option<String> {
    if let Some(custom_path) = get_config_opt(ENV_FILE_VAR) {
        if let Some(path) = load_env_file(&custom_path) {
            return Some(path);
        }
    }

    let loaded = ENV_FILE_PATHS.iter().find_map(|path| load_env_file(path));
    if loaded.is_none() {
        debug!("No environment file found, using existing environment");
    }
    loaded
}

/// Load one env file. Existing variables win over file entries.
pub fn load_env_file(path: impl AsRef<Path>) -> Option<String> {
    let path = path.as_ref();
    if !path.exists() {
        return None;
    }

    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            warn!("Failed to read environment file {}: {}", path.display(), e);
            return None;
        }
    };

    let mut loaded = 0;
    let mut skipped = 0;
    for (key, value) in content.lines().filter_map(parse_env_line) {
        if std::env::var_os(&key).is_some() {
            skipped += 1;
            continue;
        }
        std::env::set_var(&key, &value);
        loaded += 1;
    }

    info!(
        path = %path.display(),
        loaded,
        skipped,
        "Loaded environment file"
    );
    Some(path.display().to_string())
}

/// Parse `KEY=VALUE`, `KEY="VALUE"` or `KEY='VALUE'`; comments and blanks yield None.
fn parse_env_line(line: &str) -> Option<(String, String)> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }

    let (key, value) = line.split_once('=')?;
    let key = key.trim().trim_start_matches("export ").trim();
    if key.is_empty() {
        return None;
    }

    let value = value.trim();
    let value = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
        .unwrap_or(value);

    Some((key.to_string(), value.to_string()))
}

/// Get a configuration value with a default.
pub fn get_config(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Get an optional configuration value; empty counts as unset.
pub fn get_config_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// Get a boolean configuration value.
pub fn get_config_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes" | "on"))
        .unwrap_or(default)
}

/// Get an integer configuration value.
pub fn get_config_int(key: &str, default: i64) -> i64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_env_line_variants() {
        assert_eq!(
            parse_env_line("FOO=bar"),
            Some(("FOO".to_string(), "bar".to_string()))
        );
        assert_eq!(
            parse_env_line("FOO=\"bar baz\""),
            Some(("FOO".to_string(), "bar baz".to_string()))
        );
        assert_eq!(
            parse_env_line("export FOO='bar'"),
            Some(("FOO".to_string(), "bar".to_string()))
        );
    }

    #[test]
    fn test_parse_env_line_skips_noise() {
        assert!(parse_env_line("").is_none());
        assert!(parse_env_line("# comment").is_none());
        assert!(parse_env_line("=value").is_none());
        assert!(parse_env_line("NO_EQUALS").is_none());
    }

    #[test]
    fn test_load_env_file_does_not_override() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "XRAY_CONFIG_TEST_NEW=from_file").unwrap();
        writeln!(file, "XRAY_CONFIG_TEST_SET=from_file").unwrap();
        std::env::set_var("XRAY_CONFIG_TEST_SET", "from_env");

        let loaded = load_env_file(file.path());
        assert!(loaded.is_some());
        assert_eq!(get_config("XRAY_CONFIG_TEST_NEW", ""), "from_file");
        assert_eq!(get_config("XRAY_CONFIG_TEST_SET", ""), "from_env");
    }

    #[test]
    fn test_typed_getters() {
        std::env::set_var("XRAY_CONFIG_TEST_BOOL", "yes");
        std::env::set_var("XRAY_CONFIG_TEST_INT", " 42 ");
        std::env::set_var("XRAY_CONFIG_TEST_EMPTY", "");

        assert!(get_config_bool("XRAY_CONFIG_TEST_BOOL", false));
        assert!(get_config_bool("XRAY_CONFIG_TEST_MISSING", true));
        assert_eq!(get_config_int("XRAY_CONFIG_TEST_INT", 0), 42);
        assert_eq!(get_config_int("XRAY_CONFIG_TEST_MISSING", 7), 7);
        assert!(get_config_opt("XRAY_CONFIG_TEST_EMPTY").is_none());
    }

    #[test]
    fn test_missing_file_is_none() {
        assert!(load_env_file("/nonexistent/xray/environment").is_none());
    }
}
