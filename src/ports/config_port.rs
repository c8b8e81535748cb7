//! Configuration access port trait.

use crate::domain::config_validation::parse_list;

/// Read-only view of INI-style `[section] key = value` settings.
pub trait ConfigPort {
    fn get_string(&self, section: &str, key: &str) -> Option<String>;
    /// Keys present in `section`, sorted; empty when the section is absent.
    fn keys(&self, section: &str) -> Vec<String>;
    /// Names of every section present, in no particular order.
    fn sections(&self) -> Vec<String>;

    /// A comma-separated value such as sector members, blanks dropped.
    fn get_list(&self, section: &str, key: &str) -> Option<Vec<String>> {
        self.get_string(section, key).map(|value| parse_list(&value))
    }
}
