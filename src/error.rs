use thiserror::Error;

/// Failures reported by the detection and rectification core.
///
/// The core never retries or falls back on its own: every variant is returned
/// to the caller, which decides what to do next.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScanError {
    /// No four-vertex convex contour survived candidate filtering.
    #[error("no document boundary found in image")]
    NoDocumentFound,

    /// The quadrilateral is degenerate or the perspective system is singular.
    #[error("degenerate geometry: {0}")]
    Geometry(String),

    /// Empty image, wrong point count or non-finite coordinates.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl ScanError {
    pub(crate) fn geometry(msg: impl Into<String>) -> Self {
        Self::Geometry(msg.into())
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, ScanError>;
