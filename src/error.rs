use thiserror::Error;

/// Errors raised while building a network, validating options or solving.
#[derive(Error, Debug)]
pub enum Error {
    #[error("unknown bus: {0}")]
    UnknownBus(usize),

    #[error("duplicate bus: {0}")]
    DuplicateBus(usize),

    #[error("topology error: {0}")]
    Topology(String),

    #[error("invalid case data: {0}")]
    InvalidCase(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// Raised inside an iteration. The solvers report it as a
    /// non-converged result rather than returning it.
    #[error("singular jacobian: {0}")]
    SingularJacobian(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
