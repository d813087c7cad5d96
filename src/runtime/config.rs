//! Runtime configuration.
//!
//! [`RuntimeConfig`] uses consuming setters so a runtime is built in one
//! expression; `from_env` layers process-environment overrides on top of
//! the defaults for deployments that cannot touch code.

use thiserror::Error as ThisError;

/// Which clock drives the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockMode {
    /// Real elapsed time; idle waits sleep the thread.
    Wall,
    /// Virtual time; advances only on request or when the run loop
    /// auto-advances to the next armed deadline.
    Virtual,
}

/// Error raised by [`RuntimeConfig::from_env`].
#[derive(Debug, ThisError, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable held an unparseable value.
    #[error("invalid value for {var}: {value:?}")]
    InvalidValue {
        /// The offending variable.
        var: &'static str,
        /// Its raw value.
        value: String,
    },
}

const ENV_MAX_HANDLES: &str = "RENDEZ_MAX_HANDLES";
const ENV_CLOCK: &str = "RENDEZ_CLOCK";
const ENV_AUTO_ADVANCE: &str = "RENDEZ_AUTO_ADVANCE";

/// Configuration for a [`Runtime`](crate::runtime::Runtime).
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Capacity of the handle table.
    pub max_handles: usize,
    /// Clock mode.
    pub clock: ClockMode,
    /// Under a virtual clock, advance to the next armed deadline when no
    /// task is runnable.
    pub auto_advance: bool,
    /// Upper bound on polls per `run_until_quiescent` call; `None` is
    /// unbounded.
    pub max_steps: Option<u64>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_handles: 1024,
            clock: ClockMode::Wall,
            auto_advance: true,
            max_steps: None,
        }
    }
}

impl RuntimeConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads the default configuration with environment overrides applied.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidValue`] if an override cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Ok(raw) = std::env::var(ENV_MAX_HANDLES) {
            config.max_handles = raw.parse().map_err(|_| ConfigError::InvalidValue {
                var: ENV_MAX_HANDLES,
                value: raw,
            })?;
        }
        if let Ok(raw) = std::env::var(ENV_CLOCK) {
            config.clock = match raw.as_str() {
                "wall" => ClockMode::Wall,
                "virtual" => ClockMode::Virtual,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        var: ENV_CLOCK,
                        value: raw,
                    })
                }
            };
        }
        if let Ok(raw) = std::env::var(ENV_AUTO_ADVANCE) {
            config.auto_advance = match raw.as_str() {
                "1" | "true" => true,
                "0" | "false" => false,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        var: ENV_AUTO_ADVANCE,
                        value: raw,
                    })
                }
            };
        }
        Ok(config)
    }

    /// Sets the handle table capacity.
    #[must_use]
    pub fn max_handles(mut self, max_handles: usize) -> Self {
        self.max_handles = max_handles;
        self
    }

    /// Selects the clock mode.
    #[must_use]
    pub fn clock(mut self, clock: ClockMode) -> Self {
        self.clock = clock;
        self
    }

    /// Shorthand for a virtual clock.
    #[must_use]
    pub fn virtual_time(self) -> Self {
        self.clock(ClockMode::Virtual)
    }

    /// Controls auto-advancing a virtual clock to the next deadline.
    #[must_use]
    pub fn auto_advance(mut self, auto_advance: bool) -> Self {
        self.auto_advance = auto_advance;
        self
    }

    /// Bounds the polls performed per `run_until_quiescent` call.
    #[must_use]
    pub fn max_steps(mut self, max_steps: u64) -> Self {
        self.max_steps = Some(max_steps);
        self
    }

    /// Builds a runtime from this configuration.
    #[must_use]
    pub fn build(self) -> crate::runtime::Runtime {
        crate::runtime::Runtime::with_config(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, OnceLock};

    // Env-var tests share the process environment.
    fn env_lock() -> std::sync::MutexGuard<'static, ()> {
        static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        LOCK.get_or_init(|| Mutex::new(()))
            .lock()
            .expect("env lock poisoned")
    }

    fn clear_env() {
        std::env::remove_var(ENV_MAX_HANDLES);
        std::env::remove_var(ENV_CLOCK);
        std::env::remove_var(ENV_AUTO_ADVANCE);
    }

    #[test]
    fn defaults_are_production_shaped() {
        let config = RuntimeConfig::default();
        assert_eq!(config.max_handles, 1024);
        assert_eq!(config.clock, ClockMode::Wall);
        assert!(config.auto_advance);
        assert_eq!(config.max_steps, None);
    }

    #[test]
    fn setters_compose() {
        let config = RuntimeConfig::new()
            .virtual_time()
            .max_handles(8)
            .auto_advance(false)
            .max_steps(100);
        assert_eq!(config.clock, ClockMode::Virtual);
        assert_eq!(config.max_handles, 8);
        assert!(!config.auto_advance);
        assert_eq!(config.max_steps, Some(100));
    }

    #[test]
    fn env_overrides_apply() {
        let _guard = env_lock();
        clear_env();
        std::env::set_var(ENV_MAX_HANDLES, "32");
        std::env::set_var(ENV_CLOCK, "virtual");
        std::env::set_var(ENV_AUTO_ADVANCE, "0");

        let config = RuntimeConfig::from_env().expect("parse");
        assert_eq!(config.max_handles, 32);
        assert_eq!(config.clock, ClockMode::Virtual);
        assert!(!config.auto_advance);
        clear_env();
    }

    #[test]
    fn invalid_env_value_is_rejected() {
        let _guard = env_lock();
        clear_env();
        std::env::set_var(ENV_CLOCK, "lunar");

        let err = RuntimeConfig::from_env().unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidValue {
                var: ENV_CLOCK,
                value: "lunar".to_string(),
            }
        );
        clear_env();
    }
}
