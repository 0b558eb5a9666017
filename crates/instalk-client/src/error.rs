use thiserror::Error;

use instalk_cache::CacheError;
use instalk_core::ApiError;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("API error: {0}")]
    Api(#[from] ApiError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Session event channel closed")]
    ChannelClosed,
}

pub type Result<T> = std::result::Result<T, ClientError>;
