//! Error taxonomy shared by every novadb crate (spec.md §7).
//!
//! Storage adapters classify their own failures into this taxonomy at the
//! boundary (see `ObjectStoreError` in `novadb-storage`, which converts into
//! `NovaError` for anything above C1).

use thiserror::Error;

/// Structured context carried alongside a [`NovaError`] variant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorContext {
    pub key: Option<String>,
    pub branch: Option<String>,
    pub detail: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }
}

/// The full error taxonomy of spec.md §7.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NovaError {
    #[error("not found{}", fmt_ctx(.0))]
    NotFound(ErrorContext),

    #[error("invalid input{}", fmt_ctx(.0))]
    InvalidInput(ErrorContext),

    #[error("conflict{}", fmt_ctx(.0))]
    Conflict(ErrorContext),

    #[error("timeout{}", fmt_ctx(.0))]
    Timeout(ErrorContext),

    #[error("throttled{}", fmt_ctx(.0))]
    Throttled(ErrorContext),

    #[error("transient error{}", fmt_ctx(.0))]
    Transient(ErrorContext),

    #[error("permanent storage error{}", fmt_ctx(.0))]
    Permanent(ErrorContext),

    #[error("embedding failed{}", fmt_ctx(.0))]
    EmbeddingFailed(ErrorContext),

    #[error("cancelled{}", fmt_ctx(.0))]
    Cancelled(ErrorContext),

    #[error("read-only engine{}", fmt_ctx(.0))]
    ReadOnly(ErrorContext),
}

fn fmt_ctx(ctx: &ErrorContext) -> String {
    match &ctx.detail {
        Some(d) => format!(": {d}"),
        None => String::new(),
    }
}

impl NovaError {
    pub fn not_found(detail: impl Into<String>) -> Self {
        NovaError::NotFound(ErrorContext::new().with_detail(detail))
    }

    pub fn invalid_input(detail: impl Into<String>) -> Self {
        NovaError::InvalidInput(ErrorContext::new().with_detail(detail))
    }

    pub fn conflict(detail: impl Into<String>) -> Self {
        NovaError::Conflict(ErrorContext::new().with_detail(detail))
    }

    pub fn timeout(detail: impl Into<String>) -> Self {
        NovaError::Timeout(ErrorContext::new().with_detail(detail))
    }

    /// Whether an upstream retry loop should retry this error class.
    ///
    /// `Throttled` and `Transient` are retryable; everything else is not
    /// (spec.md §7 propagation policy).
    pub fn is_retryable(&self) -> bool {
        matches!(self, NovaError::Throttled(_) | NovaError::Transient(_))
    }
}

pub type Result<T> = std::result::Result<T, NovaError>;
