//! Secret types for credentials handed to services and stores.
//!
//! Re-exports the [`secrecy`] types used for store passwords. Any struct that
//! derives `Debug` and holds a [`SecretString`] prints `[REDACTED]` in place of
//! the value, so configuration can be logged with `{:?}` or through `tracing`
//! fields without leaking credentials into test output.
//!
//! The value is only reachable through [`ExposeSecret::expose_secret`], which
//! keeps every place a credential leaves the harness (connection options,
//! rendered launch environments) easy to find.
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! let password = SecretString::from("1234");
//! assert!(!format!("{password:?}").contains("1234"));
//! assert_eq!(password.expose_secret(), "1234");
//! ```

pub use secrecy::{ExposeSecret, SecretString};

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn test_store_credentials_debug_is_redacted() {
        #[allow(dead_code)]
        #[derive(Debug)]
        struct StoreCredentials {
            username: String,
            password: SecretString,
        }

        let creds = StoreCredentials {
            username: "postgres".to_string(),
            password: SecretString::from("CHANGEME"),
        };

        let debug = format!("{creds:?}");
        assert!(debug.contains("postgres"));
        assert!(debug.contains("REDACTED"));
        assert!(!debug.contains("CHANGEME"));
    }

    #[test]
    fn test_deserialized_secret_is_exposable() {
        #[derive(Deserialize)]
        struct Credentials {
            password: SecretString,
        }

        let creds: Credentials =
            serde_json::from_str(r#"{"password": "from-fixture"}"#).expect("deserialize");
        assert_eq!(creds.password.expose_secret(), "from-fixture");
    }

    #[test]
    fn test_clone_keeps_value() {
        let secret = SecretString::from("cloneable");
        assert_eq!(secret.clone().expose_secret(), "cloneable");
    }
}
