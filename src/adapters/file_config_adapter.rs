//! INI file configuration adapter.

use crate::domain::error::RiskcalcError;
use crate::ports::config_port::ConfigPort;
use configparser::ini::Ini;
use std::path::Path;

/// Section and key names are case-insensitive and reported in lower case.
#[derive(Debug)]
pub struct FileConfigAdapter {
    config: Ini,
    source: String,
}

impl FileConfigAdapter {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, RiskcalcError> {
        let source = path.as_ref().display().to_string();
        let mut config = Ini::new();
        config
            .load(path)
            .map_err(|reason| RiskcalcError::ConfigParse {
                file: source.clone(),
                reason,
            })?;
        Ok(Self { config, source })
    }

    pub fn from_string(content: &str) -> Result<Self, RiskcalcError> {
        let mut config = Ini::new();
        config
            .read(content.to_string())
            .map_err(|reason| RiskcalcError::ConfigParse {
                file: "<inline>".into(),
                reason,
            })?;
        Ok(Self {
            config,
            source: "<inline>".into(),
        })
    }

    /// No file at all: every key falls back to its default.
    pub fn defaults() -> Self {
        Self {
            config: Ini::new(),
            source: "<defaults>".into(),
        }
    }

    /// The file the settings came from, for log lines and error messages.
    pub fn source(&self) -> &str {
        &self.source
    }
}

impl ConfigPort for FileConfigAdapter {
    fn get_string(&self, section: &str, key: &str) -> Option<String> {
        self.config.get(section, key)
    }

    fn keys(&self, section: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .config
            .get_map_ref()
            .get(&section.to_lowercase())
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }

    fn sections(&self) -> Vec<String> {
        self.config.sections()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", content).unwrap();
        file
    }

    #[test]
    fn from_string_parses_config() {
        let content = r#"
[risk]
var_method = parametric
confidence_level = 0.99

[sector.tech]
members = AAPL, MSFT
"#;
        let adapter = FileConfigAdapter::from_string(content).unwrap();
        assert_eq!(
            adapter.get_string("risk", "var_method"),
            Some("parametric".to_string())
        );
        assert_eq!(
            adapter.get_list("sector.tech", "members"),
            Some(vec!["AAPL".to_string(), "MSFT".to_string()])
        );
    }

    #[test]
    fn get_string_returns_none_for_missing_key() {
        let adapter = FileConfigAdapter::from_string("[risk]\nhorizon_days = 10\n").unwrap();
        assert_eq!(adapter.get_string("risk", "missing"), None);
        assert_eq!(adapter.get_string("missing_section", "key"), None);
        assert_eq!(adapter.get_list("risk", "missing"), None);
    }

    #[test]
    fn security_keys_are_listed_in_order() {
        let adapter = FileConfigAdapter::from_string(
            "[constraints.security]\nMSFT = , 0.3\naapl = 0.05, 0.4\n",
        )
        .unwrap();
        assert_eq!(adapter.keys("constraints.security"), vec!["aapl", "msft"]);
        assert_eq!(adapter.keys("Constraints.Security"), vec!["aapl", "msft"]);
        assert!(adapter.keys("risk").is_empty());
    }

    #[test]
    fn sections_lists_every_section() {
        let adapter =
            FileConfigAdapter::from_string("[risk]\na = 1\n[Sector.Energy]\nmembers = XOM\n")
                .unwrap();
        let mut sections = adapter.sections();
        sections.sort();
        assert_eq!(sections, vec!["risk", "sector.energy"]);
    }

    #[test]
    fn defaults_have_no_sections() {
        let adapter = FileConfigAdapter::defaults();
        assert!(adapter.sections().is_empty());
        assert_eq!(adapter.source(), "<defaults>");
    }

    #[test]
    fn from_file_reads_config() {
        let file = create_temp_config("[returns]\nconvention = log\n");
        let adapter = FileConfigAdapter::from_file(file.path()).unwrap();
        assert_eq!(
            adapter.get_string("returns", "convention"),
            Some("log".to_string())
        );
        assert_eq!(adapter.source(), file.path().display().to_string());
    }

    #[test]
    fn missing_file_is_a_parse_error_naming_the_file() {
        let err = FileConfigAdapter::from_file("/nonexistent/path/config.ini").unwrap_err();
        assert!(matches!(
            err,
            RiskcalcError::ConfigParse { ref file, .. } if file == "/nonexistent/path/config.ini"
        ));
    }
}
