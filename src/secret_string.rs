use serde::Deserialize;
use std::fmt;

/// Wrapper for registry tokens that keeps the raw value out of Debug/Display
/// output and therefore out of logs.
#[derive(Deserialize, Clone, PartialEq, Eq)]
pub struct SecretString(String);

impl SecretString {
    pub fn new(s: String) -> Self {
        SecretString(s)
    }

    /// Access the raw secret if explicitly needed
    pub fn expose_secret(&self) -> &str {
        &self.0
    }

    fn fmt_redacted_secret(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<REDACTED, length {}>", self.0.len())
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_redacted_secret(f)
    }
}

impl fmt::Display for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_redacted_secret(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_and_display_are_redacted() {
        let secret = SecretString::new("hunter2".to_string());
        assert_eq!(format!("{:?}", secret), "<REDACTED, length 7>");
        assert_eq!(format!("{}", secret), "<REDACTED, length 7>");
    }

    #[test]
    fn test_expose_secret_returns_raw_value() {
        let secret = SecretString::new("hunter2".to_string());
        assert_eq!(secret.expose_secret(), "hunter2");
    }
}
