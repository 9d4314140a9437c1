//! Store configuration.
//!
//! [`Options`] carries every tunable the store honors: key prefixing, request
//! deadlines, the retry policy for watch-init fallback reads, watch channel
//! lifecycle intervals, and the shadow cache location. Construction-time
//! validation follows the same shape as [`BackoffPolicy::validate`].

mod retry;

pub use retry::BackoffPolicy;


use std::fmt::Debug;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Invalid configuration detected at store construction.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct ConfigError {
    message: String,
}

impl ConfigError {
    pub(crate) fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Resolves the shadow cache file path for a given key prefix.
pub type CacheFileFn = Arc<dyn Fn(&str) -> PathBuf + Send + Sync>;

/// Store configuration parameters.
///
/// # Key Configuration Areas
/// - Key namespace management (prefix applied to every request)
/// - Request/response lifecycle control
/// - Watch channel health (init timeout, proactive reset, liveness ticks)
/// - Shadow cache placement and durability
#[derive(Clone)]
pub struct Options {
    /// Prepended to every caller-supplied key, and present on every key in
    /// events delivered to subscribers.
    pub prefix: String,

    /// Maximum time to wait for a single transport request.
    /// `None` disables the client-side deadline.
    pub request_timeout: Option<Duration>,

    /// Backoff policy for the retried fallback reads performed when a watch
    /// channel (re)initializes with no pending events.
    pub retry_policy: BackoffPolicy,

    /// Cadence of the liveness tick that drives idle-watch teardown.
    /// Default: 10 seconds
    pub watch_check_interval: Duration,

    /// Grace period awaiting the created-notify after opening a watch.
    /// Default: 10 seconds
    pub watch_init_timeout: Duration,

    /// Interval at which healthy watches are proactively torn down and
    /// reopened to shake loose silently-wedged streams.
    /// Default: 10 minutes
    pub watch_reset_interval: Duration,

    /// If positive, newly opened watches start at this store revision.
    pub watch_with_revision: i64,

    /// Permit serializable (possibly stale) reads for `get`/`get_for_prefix`.
    pub enable_fast_gets: bool,

    /// Resolves the shadow cache file from the configured prefix.
    /// `None` disables the on-disk cache entirely.
    pub cache_file_fn: Option<CacheFileFn>,

    /// Unix mode used when creating the cache file's parent directory.
    pub new_directory_mode: u32,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            request_timeout: Some(Duration::from_secs(15)),
            retry_policy: BackoffPolicy::default(),
            watch_check_interval: Duration::from_secs(10),
            watch_init_timeout: Duration::from_secs(10),
            watch_reset_interval: Duration::from_secs(600),
            watch_with_revision: 0,
            enable_fast_gets: false,
            cache_file_fn: None,
            new_directory_mode: 0o755,
        }
    }
}

impl Debug for Options {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("Options")
            .field("prefix", &self.prefix)
            .field("request_timeout", &self.request_timeout)
            .field("retry_policy", &self.retry_policy)
            .field("watch_check_interval", &self.watch_check_interval)
            .field("watch_init_timeout", &self.watch_init_timeout)
            .field("watch_reset_interval", &self.watch_reset_interval)
            .field("watch_with_revision", &self.watch_with_revision)
            .field("enable_fast_gets", &self.enable_fast_gets)
            .field("cache_file", &self.cache_file_fn.is_some())
            .field("new_directory_mode", &format_args!("{:o}", self.new_directory_mode))
            .finish()
    }
}

impl Options {
    /// Set the key prefix.
    pub fn with_prefix(
        mut self,
        prefix: impl Into<String>,
    ) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Set the per-request deadline. `None` disables it.
    pub fn with_request_timeout(
        mut self,
        timeout: Option<Duration>,
    ) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the backoff policy for watch-init fallback reads.
    pub fn with_retry_policy(
        mut self,
        policy: BackoffPolicy,
    ) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Set the liveness tick interval.
    pub fn with_watch_check_interval(
        mut self,
        interval: Duration,
    ) -> Self {
        self.watch_check_interval = interval;
        self
    }

    /// Set the created-notify grace period.
    pub fn with_watch_init_timeout(
        mut self,
        timeout: Duration,
    ) -> Self {
        self.watch_init_timeout = timeout;
        self
    }

    /// Set the proactive watch reset interval.
    pub fn with_watch_reset_interval(
        mut self,
        interval: Duration,
    ) -> Self {
        self.watch_reset_interval = interval;
        self
    }

    /// Start watches at a pinned store revision (0 disables pinning).
    pub fn with_watch_with_revision(
        mut self,
        revision: i64,
    ) -> Self {
        self.watch_with_revision = revision;
        self
    }

    /// Allow serializable reads for gets.
    pub fn with_enable_fast_gets(
        mut self,
        enable: bool,
    ) -> Self {
        self.enable_fast_gets = enable;
        self
    }

    /// Configure the shadow cache file resolver.
    pub fn with_cache_file_fn(
        mut self,
        f: CacheFileFn,
    ) -> Self {
        self.cache_file_fn = Some(f);
        self
    }

    /// Set the mode for cache directory creation.
    pub fn with_new_directory_mode(
        mut self,
        mode: u32,
    ) -> Self {
        self.new_directory_mode = mode;
        self
    }

    /// Fully qualify a caller-supplied key with the configured prefix.
    pub fn apply_prefix(
        &self,
        key: &str,
    ) -> String {
        if self.prefix.is_empty() {
            return key.to_string();
        }
        format!("{}{}", self.prefix, key)
    }

    /// Resolve the cache file path, if the on-disk cache is enabled.
    pub(crate) fn cache_file(&self) -> Option<PathBuf> {
        self.cache_file_fn.as_ref().map(|f| f(&self.prefix))
    }

    /// Validates watch lifecycle intervals and the retry policy.
    ///
    /// # Errors
    /// Returns [`ConfigError`] when any watch interval is zero or the retry
    /// policy fails its own validation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.watch_check_interval.is_zero() {
            return Err(ConfigError::new("watch_check_interval cannot be 0"));
        }

        if self.watch_init_timeout.is_zero() {
            return Err(ConfigError::new("watch_init_timeout cannot be 0"));
        }

        if self.watch_reset_interval.is_zero() {
            return Err(ConfigError::new("watch_reset_interval cannot be 0"));
        }

        if self.watch_with_revision < 0 {
            return Err(ConfigError::new(format!(
                "watch_with_revision({}) cannot be negative",
                self.watch_with_revision
            )));
        }

        self.retry_policy.validate("fallback_read")?;

        Ok(())
    }
}
