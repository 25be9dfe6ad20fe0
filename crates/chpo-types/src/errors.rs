use thiserror::Error;

/// Main error type for chpo
#[derive(Error, Debug)]
pub enum HpoError {
    #[error("Search space error: {0}")]
    Space(#[from] SpaceError),

    #[error("Objective error: {message}")]
    Objective { message: String },

    #[error("Schedule error: {0}")]
    Schedule(#[from] ScheduleError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

impl HpoError {
    /// Wrap a failure raised by a caller-supplied objective.
    pub fn objective(message: impl Into<String>) -> Self {
        Self::Objective {
            message: message.into(),
        }
    }
}

/// Search-space definition errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SpaceError {
    #[error("Search space has no parameters")]
    Empty,

    #[error("Invalid range for {name}: low {low} must be below high {high}")]
    InvalidRange { name: String, low: f64, high: f64 },

    #[error("Invalid log range for {name}: bounds must be positive, got {low}..{high}")]
    InvalidLogRange { name: String, low: f64, high: f64 },

    #[error("Choice parameter {name} has no values")]
    EmptyChoice { name: String },

    #[error("Duplicate parameter name: {name}")]
    DuplicateName { name: String },

    #[error("Parameter {name} is missing from configuration")]
    MissingValue { name: String },

    #[error("Value for {name} does not fit its parameter kind: {value}")]
    ValueMismatch { name: String, value: String },
}

/// Budget scheduling errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScheduleError {
    #[error("Invalid budget range: min {min_budget}, max {max_budget}")]
    InvalidBudgets { min_budget: f64, max_budget: f64 },

    #[error("Reduction factor must be greater than 1, got {eta}")]
    InvalidEta { eta: f64 },

    #[error("Unknown job: {job}")]
    UnknownJob { job: String },

    #[error("No configuration was evaluated at the maximum budget {max_budget}")]
    NoIncumbent { max_budget: f64 },
}

/// Coordinator / worker errors
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Failed to bind coordinator on {addr}: {source}")]
    BindFailed {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Worker {worker_id} disconnected")]
    WorkerDisconnected { worker_id: String },

    #[error("No worker attached to run {run_id}")]
    NoWorker { run_id: String },

    #[error("Protocol violation: {message}")]
    Protocol { message: String },

    #[error("Job {job_id} failed on worker: {message}")]
    RemoteEvaluation { job_id: String, message: String },
}

/// Result type alias for chpo operations
pub type HpoResult<T> = Result<T, HpoError>;

/// Macro for creating validation errors
#[macro_export]
macro_rules! validation_error {
    ($($arg:tt)*) => {
        $crate::HpoError::Validation(format!($($arg)*))
    };
}

/// Macro for creating internal errors
#[macro_export]
macro_rules! internal_error {
    ($($arg:tt)*) => {
        $crate::HpoError::Internal(format!($($arg)*))
    };
}

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::HpoError::Config(format!($($arg)*))
    };
}
