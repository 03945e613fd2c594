use thiserror::Error;

#[derive(Error, Debug)]
pub enum TciError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Invalid patient: {0}")]
    InvalidPatient(String),

    #[error("Invalid dose: {0}")]
    InvalidDose(String),

    #[error("Parameter derivation error: {0}")]
    Parameter(String),

    #[error("Solver diverged: {0}")]
    SolverDiverged(String),

    #[error("Optimizer infeasible: {0}")]
    OptimizerInfeasible(String),

    #[error("Internal invariant violated: {0}")]
    InternalInvariant(String),
}

pub type TciResult<T> = Result<T, TciError>;
