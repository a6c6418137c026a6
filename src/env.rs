//! Runtime environment detection.
//!
//! Single source of truth for the runtime environment (test, development,
//! production) based on the `STREAMBOT_ENV` environment variable.
//!
//! # Environment Variable
//!
//! Set `STREAMBOT_ENV` to one of:
//! - `test` - Test mode (config and token files live under the repo's `tmp/`)
//! - `development` or `dev` - Development mode
//! - (anything else or unset) - Production mode

/// Runtime environment for the bot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    /// Production environment (default).
    Production,
    /// Development environment.
    Development,
    /// Test environment - file paths are redirected into the repo's `tmp/`.
    Test,
}

impl Environment {
    /// Detect current environment from `STREAMBOT_ENV`.
    #[must_use]
    pub fn current() -> Self {
        match std::env::var("STREAMBOT_ENV").as_deref() {
            Ok("test") => Self::Test,
            Ok("development" | "dev") => Self::Development,
            _ => Self::Production,
        }
    }

    /// Returns `true` if this is the test environment.
    #[must_use]
    pub fn is_test(self) -> bool {
        self == Self::Test
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Production => write!(f, "production"),
            Self::Development => write!(f, "development"),
            Self::Test => write!(f, "test"),
        }
    }
}

/// Convenience function to check if running in test mode.
///
/// Equivalent to `Environment::current().is_test()`.
#[must_use]
pub fn is_test_mode() -> bool {
    Environment::current().is_test()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_display() {
        assert_eq!(Environment::Production.to_string(), "production");
        assert_eq!(Environment::Development.to_string(), "development");
        assert_eq!(Environment::Test.to_string(), "test");
    }

    #[test]
    fn test_only_test_variant_is_test() {
        assert!(Environment::Test.is_test());
        assert!(!Environment::Production.is_test());
        assert!(!Environment::Development.is_test());
    }
}
