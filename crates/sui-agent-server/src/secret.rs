use std::env;
use std::fmt;

use crate::error::ConfigError;

/// Wallet key handed to the tool server
pub const PRIVATE_KEY_ENV: &str = "SUI_PRIVATE_KEY";

/// A secret that is never printed
#[derive(Clone)]
pub struct PrivateKey(String);

impl PrivateKey {
    /// Read the key and remove it from this process's environment.
    ///
    /// The variable is removed whether or not it holds a usable value.
    pub fn take_from_env() -> Result<Self, ConfigError> {
        Self::take_from_env_var(PRIVATE_KEY_ENV)
    }

    fn take_from_env_var(name: &str) -> Result<Self, ConfigError> {
        let value = env::var(name);
        env::remove_var(name);

        match value {
            Ok(key) if !key.trim().is_empty() => Ok(Self(key)),
            _ => Err(ConfigError::MissingSecret {
                env_var: name.to_string(),
            }),
        }
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    #[cfg(test)]
    pub(crate) fn for_tests(key: &str) -> Self {
        Self(key.to_string())
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKey(<redacted>)")
    }
}
