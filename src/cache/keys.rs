//! Type-safe cache key builders

use std::fmt;

pub const VERSION: &str = "v1";

pub mod credential {
    use super::*;

    pub const NAMESPACE: &str = "credential";

    /// Provider access token shared by every service instance.
    #[derive(Debug, Clone)]
    pub struct AccessTokenKey {
        pub provider: String,
    }

    impl AccessTokenKey {
        pub fn new(provider: impl Into<String>) -> Self {
            Self {
                provider: provider.into(),
            }
        }
    }

    impl fmt::Display for AccessTokenKey {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}:{}:access_token:{}", VERSION, NAMESPACE, self.provider)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::credential::AccessTokenKey;

    #[test]
    fn access_token_key_format() {
        assert_eq!(
            AccessTokenKey::new("clickpesa").to_string(),
            "v1:credential:access_token:clickpesa"
        );
    }
}
