use thiserror::Error;

pub type Result<T> = std::result::Result<T, GuestError>;

#[derive(Error, Debug)]
pub enum GuestError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl GuestError {
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }
}
