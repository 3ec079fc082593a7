use thiserror::Error;

#[derive(Error, Debug)]
pub enum SimulationError {
    #[error("Invalid simulation payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),
    #[error("Invalid solver configuration: {0}")]
    InvalidSolverConfig(String),
    #[error("Monte Carlo run was cancelled")]
    Cancelled,
    #[error("Monte Carlo worker failed: {0}")]
    Worker(String),
}
