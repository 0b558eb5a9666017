use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("No usable data directory")]
    NoDataDir,

    #[error("Corrupt cache row: {0}")]
    Corrupt(String),
}

pub type Result<T> = std::result::Result<T, CacheError>;
