use std::fmt;

/// Credentials used to authenticate against the metadata service and, for key pairs,
/// to unwrap per-file content keys.
///
/// Immutable for the lifetime of a client.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    /// A long-lived key pair. The access key id authenticates requests; the secret
    /// access key is the key-wrapping secret.
    KeyPair {
        access_key_id: String,
        secret_access_key: String,
    },
    /// A bearer token; carries no key material.
    BearerToken(String),
}

impl Credentials {
    pub fn key_pair(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        Self::KeyPair {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
        }
    }

    pub fn bearer(token: impl Into<String>) -> Self {
        Self::BearerToken(token.into())
    }

    /// The token sent in the `Authorization: Bearer` header.
    pub fn authorization_token(&self) -> &str {
        match self {
            Self::KeyPair { access_key_id, .. } => access_key_id,
            Self::BearerToken(token) => token,
        }
    }

    /// The full value for an `Authorization` header.
    pub fn authorization_header(&self) -> String {
        format!("Bearer {}", self.authorization_token())
    }

    /// The key-wrapping secret, if these credentials carry one.
    pub fn secret(&self) -> Option<&str> {
        match self {
            Self::KeyPair { secret_access_key, .. } => Some(secret_access_key),
            Self::BearerToken(_) => None,
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::KeyPair { access_key_id, .. } => f
                .debug_struct("KeyPair")
                .field("access_key_id", access_key_id)
                .field("secret_access_key", &"<redacted>")
                .finish(),
            Self::BearerToken(_) => f.debug_tuple("BearerToken").field(&"<redacted>").finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authorization_header() {
        let creds = Credentials::key_pair("AKID", "c2VjcmV0");
        assert_eq!(creds.authorization_header(), "Bearer AKID");
        assert_eq!(creds.secret(), Some("c2VjcmV0"));

        let creds = Credentials::bearer("tok");
        assert_eq!(creds.authorization_header(), "Bearer tok");
        assert_eq!(creds.secret(), None);
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let creds = Credentials::key_pair("AKID", "super-secret");
        let printed = format!("{creds:?}");
        assert!(printed.contains("AKID"));
        assert!(!printed.contains("super-secret"));

        let printed = format!("{:?}", Credentials::bearer("super-secret"));
        assert!(!printed.contains("super-secret"));
    }
}
