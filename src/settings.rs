use std::io::Read;

use serde::Deserialize;

use crate::error::SettingsError;

/// Runtime knobs for executing graphs.
///
/// ```rust
/// use carpenter::Settings;
///
/// let settings = Settings::from_json_str(r#"{ "workers": 4, "quiet": true }"#).unwrap();
/// assert_eq!(settings.workers, 4);
/// assert!(settings.builtins);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Worker threads for the executor pool, `0` picks one per core.
    pub workers: usize,
    /// Hide progress bars.
    pub quiet: bool,
    /// Preload the builtin functions when a definition stage creates its own
    /// registry.
    pub builtins: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            workers: 0,
            quiet: false,
            builtins: true,
        }
    }
}

impl Settings {
    pub fn from_json_str(text: &str) -> Result<Self, SettingsError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_reader(mut reader: impl Read) -> Result<Self, SettingsError> {
        let mut buffer = String::new();
        reader.read_to_string(&mut buffer)?;
        Self::from_json_str(&buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_missing_fields() {
        assert_eq!(Settings::from_json_str("{}").unwrap(), Settings::default());
    }

    #[test]
    fn test_from_reader() {
        let settings = Settings::from_reader(&br#"{ "builtins": false }"#[..]).unwrap();
        assert!(!settings.builtins);
        assert_eq!(settings.workers, 0);
    }

    #[test]
    fn test_rejects_unknown_fields() {
        assert!(matches!(
            Settings::from_json_str(r#"{ "threads": 2 }"#),
            Err(SettingsError::Json(_))
        ));
    }
}
