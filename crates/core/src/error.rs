#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Invariant violated for job {handle}: {detail}")]
    Invariant { handle: String, detail: String },
}
