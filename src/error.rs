//! The kernel's single error taxonomy.
//!
//! Every fallible kernel operation returns `Result<T, KernelError>`.
//! `OutOfRange` is deliberately not a variant: call sites fold it into
//! `InvalidArgument` at the point of construction, matching the provider
//! status mapping in the call router.

use thiserror::Error;

/// Errors surfaced across every kernel component boundary.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KernelError {
  /// The referenced device, function, signal, parameter, or subscription
  /// does not exist.
  #[error("not found: {0}")]
  NotFound(String),

  /// A caller-supplied value failed validation (missing/unknown argument,
  /// type mismatch, or out-of-range value).
  #[error("invalid argument: {0}")]
  InvalidArgument(String),

  /// The operation is not permitted in the current runtime mode or state.
  #[error("failed precondition: {0}")]
  FailedPrecondition(String),

  /// The target provider or device is not currently reachable.
  #[error("unavailable: {0}")]
  Unavailable(String),

  /// The operation did not complete within its allotted time.
  #[error("deadline exceeded: {0}")]
  DeadlineExceeded(String),

  /// An unanticipated internal failure; the provider returned a status
  /// this kernel does not otherwise map.
  #[error("internal error: {0}")]
  Internal(String),

  /// A duplicate name was supplied where uniqueness is required (e.g. a
  /// subscriber name collision, if the embedding policy enforces one).
  #[error("already exists: {0}")]
  AlreadyExists(String),
}

impl KernelError {
  /// A short machine-stable tag for the error kind, useful for adapters
  /// that want to map onto their own status codes without matching on
  /// the full `Display` message.
  pub fn kind(&self) -> &'static str {
    match self {
      KernelError::NotFound(_) => "NOT_FOUND",
      KernelError::InvalidArgument(_) => "INVALID_ARGUMENT",
      KernelError::FailedPrecondition(_) => "FAILED_PRECONDITION",
      KernelError::Unavailable(_) => "UNAVAILABLE",
      KernelError::DeadlineExceeded(_) => "DEADLINE_EXCEEDED",
      KernelError::Internal(_) => "INTERNAL",
      KernelError::AlreadyExists(_) => "ALREADY_EXISTS",
    }
  }
}

/// Convenience alias used throughout the crate.
pub type KernelResult<T> = Result<T, KernelError>;
