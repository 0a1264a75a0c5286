use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Storage(#[from] storage::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("malformed uptime data: {0:?}")]
    MalformedUptime(String),

    #[error("failed to read boot time: {0}")]
    BootTime(String),
}

pub type Result<T> = std::result::Result<T, Error>;
