use serde::{Deserialize, Deserializer};
use std::fmt;

/// A configuration value that must never reach logs.
///
/// `Debug` and `Display` print a fixed placeholder; the raw value is only
/// reachable through [`Secret::expose`].
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }

    /// Keeps the first and last two characters, masking the rest.
    pub fn masked(&self) -> String {
        let chars: Vec<char> = self.0.chars().collect();
        if chars.len() <= 4 {
            return "****".to_string();
        }
        let head: String = chars[..2].iter().collect();
        let tail: String = chars[chars.len() - 2..].iter().collect();
        format!("{}****{}", head, tail)
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(****)")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("****")
    }
}

impl From<String> for Secret {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl<'de> Deserialize<'de> for Secret {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        String::deserialize(deserializer).map(Secret)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formatting_never_prints_value() {
        let secret = Secret::new("super-secret-passkey");
        assert!(!format!("{:?}", secret).contains("super"));
        assert!(!format!("{}", secret).contains("super"));
        assert_eq!(secret.expose(), "super-secret-passkey");
    }

    #[test]
    fn masks_all_but_edges() {
        assert_eq!(Secret::new("abcdefgh").masked(), "ab****gh");
        assert_eq!(Secret::new("abc").masked(), "****");
    }
}
