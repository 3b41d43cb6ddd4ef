//! Secret handling.
//!
//! Re-exports the secrecy types used for tokens and connection strings, plus
//! a redacting formatter for config dumps.

pub use secrecy::{ExposeSecret, SecretString};

/// Render an optional secret for logs: `set` or `unset`, never the value.
pub fn presence(secret: Option<&SecretString>) -> &'static str {
    match secret {
        Some(s) if !s.expose_secret().is_empty() => "set",
        _ => "unset",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presence_never_shows_value() {
        let token = SecretString::from("hunter2".to_string());
        assert_eq!(presence(Some(&token)), "set");
        assert_eq!(presence(None), "unset");
    }
}
