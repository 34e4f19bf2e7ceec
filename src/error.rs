/// Errors raised by the step engine, the methods and the numerical kernels
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The caller may not read or modify the object
    #[error("not allowed: {0}")]
    NotAllowed(String),

    /// The object is missing or was soft-deleted
    #[error("object does not exist: {0}")]
    DoesNotExist(String),

    /// A kernel precondition was violated or the computation could not finish
    #[error("computation failed: {0}")]
    ComputationFailed(String),

    /// Input submitted for a step does not satisfy its constraints
    #[error("validation failed: {0}")]
    ValidationFailed(String),

    /// The method cannot be re-run against another dataset
    #[error("method cannot be applied: {0}")]
    NotApplicable(String),

    /// Malformed measurement file
    #[error("parse error: {0}")]
    Parse(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("linear algebra error: {0}")]
    Linalg(#[from] ndarray_linalg::error::LinalgError),

    #[error("shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("configuration error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("spreadsheet error: {0}")]
    Spreadsheet(#[from] calamine::Error),

    /// Failure reported by the nonlinear solver
    #[error("solver error: {0}")]
    Solver(String),
}

impl Error {
    /// Text that can be shown to the end user after a run failed.
    ///
    /// Only distinguishes data that does not suit the method from everything else, details stay
    /// in the logs.
    pub const fn presentable_message(&self) -> &'static str {
        match self {
            Self::ComputationFailed(_) => "The data is incompatible with the selected method.",
            Self::NotAllowed(_) | Self::DoesNotExist(_) => {
                "The requested object is not available."
            }
            Self::ValidationFailed(_) => "The submitted values are not valid for this step.",
            Self::NotApplicable(_) => "This method cannot be applied to another dataset.",
            _ => "An internal error occurred while processing.",
        }
    }

    pub(crate) fn computation(message: impl Into<String>) -> Self {
        Self::ComputationFailed(message.into())
    }

    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::ValidationFailed(message.into())
    }

    pub(crate) fn parse(message: impl Into<String>) -> Self {
        Self::Parse(message.into())
    }
}

impl From<argmin::core::Error> for Error {
    fn from(err: argmin::core::Error) -> Self {
        Self::Solver(err.to_string())
    }
}
