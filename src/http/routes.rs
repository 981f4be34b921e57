//! The digit-prefix action table.
//!
//! Requests whose final path segment begins with a digit select a fixed
//! action instead of a literal file lookup. The mapping is configuration
//! data; digits absent from the table have no defined action and fall
//! through to the filesystem.

use serde::Deserialize;
use std::collections::HashMap;

/// What a digit prefix resolves to.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteAction {
    /// Serve a fixed page from the document root.
    Page(String),
    /// Check the form body against the credential table (POST only).
    Login,
    /// Insert the form body into the credential table (POST only).
    Register,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RouteTable {
    #[serde(with = "serde_yaml::with::singleton_map_recursive")]
    pub actions: HashMap<char, RouteAction>,
    /// Page served after a successful login.
    pub welcome_page: String,
    /// Page served after a failed login.
    pub login_error_page: String,
    /// Page served after a successful registration.
    pub register_ok_page: String,
    /// Page served when the username is already taken.
    pub register_conflict_page: String,
}

impl Default for RouteTable {
    fn default() -> Self {
        let actions = HashMap::from([
            ('0', RouteAction::Page("/register.html".to_string())),
            ('1', RouteAction::Page("/log.html".to_string())),
            ('2', RouteAction::Login),
            ('3', RouteAction::Register),
            ('5', RouteAction::Page("/picture.html".to_string())),
            ('6', RouteAction::Page("/video.html".to_string())),
            ('7', RouteAction::Page("/fans.html".to_string())),
        ]);
        Self {
            actions,
            welcome_page: "/welcome.html".to_string(),
            login_error_page: "/logError.html".to_string(),
            register_ok_page: "/log.html".to_string(),
            register_conflict_page: "/registedError.html".to_string(),
        }
    }
}

impl RouteTable {
    pub fn action(&self, digit: char) -> Option<&RouteAction> {
        self.actions.get(&digit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_table_covers_observed_digits() {
        let table = RouteTable::default();
        assert_eq!(
            table.action('0'),
            Some(&RouteAction::Page("/register.html".to_string()))
        );
        assert_eq!(table.action('2'), Some(&RouteAction::Login));
        assert_eq!(table.action('3'), Some(&RouteAction::Register));
        assert_eq!(table.action('4'), None);
        assert_eq!(table.action('8'), None);
    }

    #[test]
    fn table_deserializes_from_yaml() {
        let yaml = r#"
actions:
  "9": { page: "/nine.html" }
  "2": login
welcome_page: "/in.html"
"#;
        let table: RouteTable = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(
            table.action('9'),
            Some(&RouteAction::Page("/nine.html".to_string()))
        );
        assert_eq!(table.action('2'), Some(&RouteAction::Login));
        assert_eq!(table.action('0'), None);
        assert_eq!(table.welcome_page, "/in.html");
        // Unspecified outcome pages keep their defaults.
        assert_eq!(table.login_error_page, "/logError.html");
    }
}
