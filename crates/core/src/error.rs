use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Registry error: {0}")]
    Registry(String),

    #[error("Capability not found: {0}")]
    CapabilityNotFound(String),

    #[error("Input validation error: {0}")]
    InputValidation(String),

    #[error("Output validation error: {0}")]
    OutputValidation(String),

    #[error("Result validation error: {0}")]
    ResultValidation(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Stable machine-readable label, used when an error is recorded as data
    /// in a tool outcome rather than propagated.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Config(_) => "config_error",
            Error::Io(_) => "io_error",
            Error::Json(_) => "json_error",
            Error::Parse(_) => "parse_error",
            Error::Registry(_) => "registry_error",
            Error::CapabilityNotFound(_) => "capability_not_found",
            Error::InputValidation(_) => "input_validation_error",
            Error::OutputValidation(_) => "output_validation_error",
            Error::ResultValidation(_) => "result_validation_error",
            Error::Execution(_) => "execution_error",
            Error::Provider(_) => "provider_error",
            Error::Timeout(_) => "timeout",
            Error::Other(_) => "error",
        }
    }

    /// Per-call errors become conversation data; only provider failures and
    /// loop-level timeouts may terminate a run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Provider(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
