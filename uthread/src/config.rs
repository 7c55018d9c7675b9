//! Runtime configuration

use core::time::Duration;

use derive_builder::Builder;
use shared::KiB;
use static_assertions::const_assert;
use thiserror::Error;

/// Default number of thread slots, including the initial thread
pub const DEFAULT_MAX_THREADS: usize = 1024;

/// The upper bound for [RuntimeConfig::max_threads]
pub const MAX_THREADS_LIMIT: usize = 65536;

/// Default size of a thread stack in bytes
pub const DEFAULT_STACK_SIZE: usize = KiB!(256);

/// The smallest stack a thread can be created with
pub const MIN_STACK_SIZE: usize = KiB!(32);

const_assert!(MIN_STACK_SIZE <= DEFAULT_STACK_SIZE);
const_assert!(DEFAULT_MAX_THREADS <= MAX_THREADS_LIMIT);

/// Configuration used by [init](crate::init)
#[derive(Debug, Clone, PartialEq, Eq, Builder)]
#[builder(
    pattern = "owned",
    build_fn(validate = "Self::validate", error = "ConfigError")
)]
pub struct RuntimeConfig {
    /// The number of thread slots, including the initial thread.
    #[builder(default = "DEFAULT_MAX_THREADS")]
    pub max_threads: usize,

    /// The usable stack size of each created thread in bytes.
    ///
    /// Rounded up to whole pages.
    #[builder(default = "DEFAULT_STACK_SIZE")]
    pub stack_size: usize,

    /// Whether to map an inaccessible guard page below each stack
    #[builder(default = "true")]
    pub stack_guard: bool,

    /// Interval of the preemption timer. `None` disables preemption and
    /// threads only switch at explicit suspension points.
    #[builder(default, setter(strip_option))]
    pub preempt_interval: Option<Duration>,
}

/// Invalid [RuntimeConfig]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("field \"{0}\" not initialized in RuntimeConfigBuilder")]
    UninitializedField(&'static str),
    #[error("max_threads must be between 1 and 65536, got {0}")]
    MaxThreads(usize),
    #[error("stack_size must be at least 32 KiB, got {0} bytes")]
    StackTooSmall(usize),
    #[error("preempt_interval must not be zero")]
    ZeroInterval,
}

impl From<derive_builder::UninitializedFieldError> for ConfigError {
    fn from(value: derive_builder::UninitializedFieldError) -> Self {
        Self::UninitializedField(value.field_name())
    }
}

impl RuntimeConfigBuilder {
    fn validate(&self) -> Result<(), ConfigError> {
        if let Some(max_threads) = self.max_threads {
            if max_threads == 0 || max_threads > MAX_THREADS_LIMIT {
                return Err(ConfigError::MaxThreads(max_threads));
            }
        }
        if let Some(stack_size) = self.stack_size {
            if stack_size < MIN_STACK_SIZE {
                return Err(ConfigError::StackTooSmall(stack_size));
            }
        }
        if let Some(Some(interval)) = self.preempt_interval {
            if interval.is_zero() {
                return Err(ConfigError::ZeroInterval);
            }
        }
        Ok(())
    }
}

impl RuntimeConfig {
    /// creates a [RuntimeConfigBuilder]
    pub fn builder() -> RuntimeConfigBuilder {
        RuntimeConfigBuilder::default()
    }

    /// Checks the invariants the builder enforces, for configs constructed
    /// directly.
    pub fn validate(&self) -> Result<(), ConfigError> {
        RuntimeConfigBuilder::default()
            .max_threads(self.max_threads)
            .stack_size(self.stack_size)
            .validate()?;
        if self.preempt_interval.is_some_and(|d| d.is_zero()) {
            return Err(ConfigError::ZeroInterval);
        }
        Ok(())
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_threads: DEFAULT_MAX_THREADS,
            stack_size: DEFAULT_STACK_SIZE,
            stack_guard: true,
            preempt_interval: None,
        }
    }
}
