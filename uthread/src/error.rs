//! Error types of the thread runtime
//!
//! Recoverable conditions (no capacity, invalid arguments, nothing to switch
//! to) are reported through these types. Protocol violations, like releasing a
//! [Lock](crate::Lock) that the caller does not own, are not errors. They panic.

use thiserror::Error;

use crate::config::ConfigError;

/// The result of a failed thread operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum ThreadError {
    /// There is no other thread that is ready to run.
    #[error("no other thread is ready to run")]
    NoneReady,
    /// The requested thread or wait queue does not exist.
    #[error("invalid thread or wait queue")]
    Invalid,
    /// The operation can not be executed in the current context.
    #[error("operation failed")]
    Failed,
    /// The stack for a new thread could not be allocated.
    #[error("failed to allocate thread stack")]
    NoMemory,
    /// Every slot of the thread table is in use.
    #[error("no more thread slots available")]
    NoMoreCapacity,
}

/// Errors returned by [init](crate::init)
#[derive(Debug, Error)]
pub enum InitError {
    /// The runtime of this OS thread is already initialized
    #[error("thread runtime is already initialized on this OS thread")]
    AlreadyInitialized,
    /// The configuration was rejected
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Installing the preemption timer failed
    #[error("failed to set up preemption: {0}")]
    Preemption(#[from] nix::Error),
}
