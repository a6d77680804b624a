//! Small INI reader for mimewire configuration files
//! Sections, `key = value` pairs, `#`/`;` comments and quoted values

use crate::error::AppError;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Default)]
pub struct IniConfig {
    sections: HashMap<String, HashMap<String, String>>,
}

impl IniConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from file
    pub fn load_file<P: AsRef<Path>>(path: P) -> Result<Self, AppError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            AppError::InvalidConfiguration(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::parse(&content)
    }

    /// Parse INI content. Keys before the first section land in section "".
    pub fn parse(content: &str) -> Result<Self, AppError> {
        let mut config = Self::new();
        let mut section = String::new();

        for (idx, line) in content.lines().enumerate() {
            let line = line.trim();
            let line_number = idx + 1;

            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }

            if let Some(name) = line.strip_prefix('[') {
                let name = name.strip_suffix(']').ok_or_else(|| {
                    AppError::InvalidConfiguration(format!(
                        "unterminated section at line {line_number}: {line}"
                    ))
                })?;
                section = name.trim().to_lowercase();
                if section.is_empty() {
                    return Err(AppError::InvalidConfiguration(format!(
                        "empty section name at line {line_number}"
                    )));
                }
                config.sections.entry(section.clone()).or_default();
                continue;
            }

            let (key, value) = line.split_once('=').ok_or_else(|| {
                AppError::InvalidConfiguration(format!(
                    "invalid syntax at line {line_number}: {line}"
                ))
            })?;
            let key = key.trim().to_lowercase();
            if key.is_empty() {
                return Err(AppError::InvalidConfiguration(format!(
                    "empty key at line {line_number}"
                )));
            }

            config
                .sections
                .entry(section.clone())
                .or_default()
                .insert(key, clean_value(value));
        }

        Ok(config)
    }

    pub fn get_string(&self, section: &str, key: &str) -> Option<String> {
        self.sections.get(section)?.get(key).cloned()
    }

    pub fn get_u16(&self, section: &str, key: &str) -> Option<u16> {
        self.get_string(section, key)?.parse().ok()
    }

    pub fn get_u64(&self, section: &str, key: &str) -> Option<u64> {
        self.get_string(section, key)?.parse().ok()
    }

    pub fn get_usize(&self, section: &str, key: &str) -> Option<usize> {
        self.get_string(section, key)?.parse().ok()
    }

    pub fn get_bool(&self, section: &str, key: &str) -> Option<bool> {
        match self.get_string(section, key)?.to_lowercase().as_str() {
            "true" | "yes" | "1" | "on" => Some(true),
            "false" | "no" | "0" | "off" => Some(false),
            _ => None,
        }
    }

    /// Size with an optional KB/MB/GB/TB suffix
    pub fn get_size(&self, section: &str, key: &str) -> Option<u64> {
        parse_size(&self.get_string(section, key)?)
    }
}

/// Strip an inline comment, then surrounding quotes.
fn clean_value(raw: &str) -> String {
    let value = raw.trim();
    if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
        return value[1..value.len() - 1].to_string();
    }
    let value = match value.find([';', '#']) {
        Some(pos) => value[..pos].trim(),
        None => value,
    };
    value.to_string()
}

/// Parse sizes like "512", "64KB", "1.5MB" into bytes.
pub fn parse_size(value: &str) -> Option<u64> {
    let value = value.trim().to_uppercase();

    if let Ok(num) = value.parse::<u64>() {
        return Some(num);
    }

    let (number, multiplier) = [
        ("TB", 1024u64 * 1024 * 1024 * 1024),
        ("GB", 1024 * 1024 * 1024),
        ("MB", 1024 * 1024),
        ("KB", 1024),
        ("B", 1),
    ]
    .iter()
    .find_map(|(suffix, mult)| value.strip_suffix(*suffix).map(|n| (n.trim(), *mult)))?;

    if let Ok(num) = number.parse::<u64>() {
        return num.checked_mul(multiplier);
    }
    number
        .parse::<f64>()
        .ok()
        .filter(|n| *n >= 0.0)
        .map(|n| (n * multiplier as f64) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("1024"), Some(1024));
        assert_eq!(parse_size("1KB"), Some(1024));
        assert_eq!(parse_size("64mb"), Some(64 * 1024 * 1024));
        assert_eq!(parse_size("2 GB"), Some(2 * 1024 * 1024 * 1024));
        assert_eq!(parse_size("1.5MB"), Some((1.5 * 1024.0 * 1024.0) as u64));
        assert_eq!(parse_size("12B"), Some(12));
        assert_eq!(parse_size("lots"), None);
        assert_eq!(parse_size("-1MB"), None);
    }

    #[test]
    fn test_ini_parsing() {
        let content = r#"
# mimewire settings
debug = true

[Server]
listen = 0.0.0.0   ; bind everywhere
port = 9000

[stream]
wait_timeout = 2

[request]
max_body_size = "16MB"
        "#;

        let config = IniConfig::parse(content).unwrap();
        assert_eq!(config.get_bool("", "debug"), Some(true));
        assert_eq!(config.get_string("server", "listen").as_deref(), Some("0.0.0.0"));
        assert_eq!(config.get_u16("server", "port"), Some(9000));
        assert_eq!(config.get_u64("stream", "wait_timeout"), Some(2));
        assert_eq!(config.get_size("request", "max_body_size"), Some(16 * 1024 * 1024));
        assert_eq!(config.get_string("server", "missing"), None);
    }

    #[test]
    fn test_boolean_parsing() {
        let config = IniConfig::parse("[t]\na=yes\nb=off\nc=maybe\n").unwrap();
        assert_eq!(config.get_bool("t", "a"), Some(true));
        assert_eq!(config.get_bool("t", "b"), Some(false));
        assert_eq!(config.get_bool("t", "c"), None);
    }

    #[test]
    fn test_syntax_errors() {
        assert!(IniConfig::parse("[server\nport=1").is_err());
        assert!(IniConfig::parse("[]\n").is_err());
        assert!(IniConfig::parse("[s]\njust words\n").is_err());
        assert!(IniConfig::parse("[s]\n = 3\n").is_err());
    }
}
