//! VM error types.
//!
//! Errors are split by whether the scripting language defines observable
//! behavior for them. [`ErrorKind::Script`] failures are resolved inside the
//! dispatcher (the failing expression evaluates to `undefined`); every other
//! kind signals miscompiled bytecode, a broken container, or a host problem
//! and terminates the hosting operation.

use std::fmt;

use thiserror::Error;

/// The kind of VM error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed instruction stream found while preparing an image
    Validation,
    /// Malformed persisted image container
    Format,
    /// An instruction left the operand stack at an unexpected depth
    StackImbalance,
    /// Stack, register, call depth or scope depth limit exceeded
    ResourceExhaustion,
    /// Operation not permitted in the current VM state
    InvalidState,
    /// Language-level failure (bad coercion, property access, call target)
    Script,
    /// A host-provided native function failed
    Host,
}

impl ErrorKind {
    /// Short stable name used in diagnostics
    pub fn name(self) -> &'static str {
        match self {
            ErrorKind::Validation => "ValidationError",
            ErrorKind::Format => "FormatError",
            ErrorKind::StackImbalance => "StackImbalanceError",
            ErrorKind::ResourceExhaustion => "ResourceExhaustion",
            ErrorKind::InvalidState => "InvalidState",
            ErrorKind::Script => "ScriptError",
            ErrorKind::Host => "HostError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An error raised by the VM.
///
/// # Examples
///
/// ```
/// use core_types::{ErrorKind, VmError};
///
/// let error = VmError::new(ErrorKind::Script, "undefined is not a function");
/// assert!(!error.is_fatal());
///
/// let error = VmError::new(ErrorKind::Validation, "truncated operand").at(12);
/// assert!(error.is_fatal());
/// assert_eq!(error.to_string(), "ValidationError at offset 12: truncated operand");
/// ```
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{kind}{}: {message}", offset_suffix(.offset))]
pub struct VmError {
    /// The type of error
    pub kind: ErrorKind,
    /// Human-readable error message
    pub message: String,
    /// Bytecode offset where the error occurred, if known
    pub offset: Option<usize>,
}

impl VmError {
    /// Create an error without position information
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            offset: None,
        }
    }

    /// Attach a bytecode offset, keeping an offset that is already set
    pub fn at(mut self, offset: usize) -> Self {
        self.offset.get_or_insert(offset);
        self
    }

    /// Shorthand for a [`ErrorKind::Validation`] error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    /// Shorthand for a [`ErrorKind::Format`] error
    pub fn format(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Format, message)
    }

    /// Shorthand for a [`ErrorKind::StackImbalance`] error
    pub fn stack_imbalance(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::StackImbalance, message)
    }

    /// Shorthand for a [`ErrorKind::ResourceExhaustion`] error
    pub fn exhausted(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ResourceExhaustion, message)
    }

    /// Shorthand for a [`ErrorKind::InvalidState`] error
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidState, message)
    }

    /// Shorthand for a [`ErrorKind::Script`] error
    pub fn script(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Script, message)
    }

    /// Shorthand for a [`ErrorKind::Host`] error
    pub fn host(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Host, message)
    }

    /// Whether this error must terminate the hosting operation
    pub fn is_fatal(&self) -> bool {
        self.kind != ErrorKind::Script
    }

    /// Whether the language resolves this error to a value
    pub fn is_script_level(&self) -> bool {
        self.kind == ErrorKind::Script
    }
}

fn offset_suffix(offset: &Option<usize>) -> String {
    match offset {
        Some(offset) => format!(" at offset {}", offset),
        None => String::new(),
    }
}

/// Result alias used throughout the VM
pub type VmResult<T> = Result<T, VmError>;
