/// Failure modes of a resolution.
/// Classified as rejected input, retryable store failure, or fatal corruption.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("invalid observation: {0}")]
    InvalidObservation(String),

    /// `contended` is set when the store refused the unit because another
    /// writer held it (SQLite BUSY/LOCKED); the store may retry those.
    #[error("store unavailable: {detail}")]
    StoreUnavailable { detail: String, contended: bool },

    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

impl ResolveError {
    pub fn store(detail: impl Into<String>) -> Self {
        Self::StoreUnavailable {
            detail: detail.into(),
            contended: false,
        }
    }

    pub fn contended(detail: impl Into<String>) -> Self {
        Self::StoreUnavailable {
            detail: detail.into(),
            contended: true,
        }
    }

    pub fn invariant(detail: impl Into<String>) -> Self {
        Self::InvariantViolation(detail.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StoreUnavailable { .. })
    }

    pub fn is_contended(&self) -> bool {
        matches!(self, Self::StoreUnavailable { contended: true, .. })
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::InvariantViolation(_))
    }

    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::InvalidObservation(_) => "invalid_observation",
            Self::StoreUnavailable { .. } => "store_unavailable",
            Self::InvariantViolation(_) => "invariant_violation",
        }
    }
}
