//! Rate limit subjects and their storage keys.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The subject being rate limited: a scope (e.g. `user`) and an identifier
/// within it (e.g. an IP address or account id).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Field {
    /// Category of the subject
    pub scope: String,
    /// The subject within the scope
    pub identifier: String,
}

impl Field {
    /// Create a new field.
    pub fn new(scope: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            identifier: identifier.into(),
        }
    }

    /// The key this field is counted under for the limiter called `name`.
    ///
    /// Format: `{name}:{scope}:{identifier}`
    pub fn storage_key(&self, name: &str) -> String {
        format!("{}:{}:{}", name, self.scope, self.identifier)
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.scope, self.identifier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_key() {
        let field = Field::new("user", "127.0.0.1");
        assert_eq!(field.storage_key("login"), "login:user:127.0.0.1");
    }

    #[test]
    fn test_storage_key_keeps_delimiters_in_identifier() {
        let field = Field::new("ip", "::1");
        assert_eq!(field.storage_key("api"), "api:ip:::1");
    }

    #[test]
    fn test_display() {
        let field = Field::new("account", "42");
        assert_eq!(field.to_string(), "account:42");
    }

    #[test]
    fn test_field_equality() {
        assert_eq!(Field::new("user", "a"), Field::new("user", "a"));
        assert_ne!(Field::new("user", "a"), Field::new("user", "b"));
    }
}
