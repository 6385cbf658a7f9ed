use thiserror::Error;

/// Errors that cross a `Result`-returning boundary: persistence I/O, LLM
/// transport, and config parsing. Everything inside the action/budget
/// pipeline itself is modeled as an explicit outcome string recorded on the
/// recent-action ring, never an exception.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("persistence error: {0}")]
    Persistence(#[from] rusqlite::Error),

    #[error("llm transport error: {0}")]
    Llm(String),

    #[error("llm call timed out after {0:?}")]
    LlmTimeout(std::time::Duration),

    #[error("config error: {0}")]
    Config(String),

    #[error("agent {0} not found")]
    AgentNotFound(i64),

    #[error("room {0} not found")]
    RoomNotFound(i64),
}

pub type CoreResult<T> = Result<T, CoreError>;
