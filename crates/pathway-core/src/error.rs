#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum PathwayError {
    /// Catalog or persisted model state does not match the expected layout.
    #[error("schema error: {0}")]
    Schema(String),
    /// A single request or record violates a named constraint.
    #[error("validation error: {0}")]
    Validation(String),
    /// Clustering could not reach the configured quality floor.
    #[error("quality error: {0}")]
    Quality(String),
    #[error("dimension error: {0}")]
    Dimension(String),
}

impl PathwayError {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Schema(_) => "schema",
            Self::Validation(_) => "validation",
            Self::Quality(_) => "quality",
            Self::Dimension(_) => "dimension",
        }
    }
}
