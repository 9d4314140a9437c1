use serde::Deserialize;
use serde::Serialize;

/// Configuration for the exponential backoff retry strategy used by
/// fallback reads on watch (re)initialization.
#[derive(Debug, Serialize, Deserialize, Clone, Copy)]
pub struct BackoffPolicy {
    /// Maximum number of attempts
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    /// Single attempt timeout (unit: milliseconds)
    #[serde(default = "default_op_timeout_ms")]
    pub timeout_ms: u64,

    /// Backoff base (unit: milliseconds)
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Maximum backoff time (unit: milliseconds)
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            timeout_ms: default_op_timeout_ms(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl BackoffPolicy {
    /// Validates backoff policy parameters
    ///
    /// # Errors
    /// Returns [`ConfigError`](super::ConfigError) when:
    /// - `max_retries` is 0 (infinite retries)
    /// - `timeout_ms` is 0
    /// - Base delay >= max delay
    /// - `max_delay_ms` exceeds the 2 minute ceiling
    pub fn validate(
        &self,
        policy_name: &str,
    ) -> Result<(), super::ConfigError> {
        if self.max_retries == 0 {
            return Err(super::ConfigError::new(format!(
                "{policy_name}: max_retries=0 means infinite retries - dangerous for {policy_name} operations"
            )));
        }

        if self.timeout_ms == 0 {
            return Err(super::ConfigError::new(format!(
                "{policy_name}: timeout_ms cannot be 0"
            )));
        }

        if self.base_delay_ms >= self.max_delay_ms {
            return Err(super::ConfigError::new(format!(
                "{}: base_delay_ms({}) must be less than max_delay_ms({})",
                policy_name, self.base_delay_ms, self.max_delay_ms
            )));
        }

        if self.max_delay_ms > 120_000 {
            return Err(super::ConfigError::new(format!(
                "{}: max_delay_ms({}) exceeds 2min limit",
                policy_name, self.max_delay_ms
            )));
        }

        Ok(())
    }
}

fn default_max_retries() -> usize {
    3
}
fn default_op_timeout_ms() -> u64 {
    100
}
fn default_base_delay_ms() -> u64 {
    50
}
fn default_max_delay_ms() -> u64 {
    1000
}
