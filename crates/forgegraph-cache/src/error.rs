use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache I/O error at {0}: {1}")]
    Io(String, std::io::Error),
    #[error("corrupt cache metadata at {0}: {1}")]
    CorruptMetadata(String, String),
    #[error("hash {0} is not valid hex")]
    InvalidHash(String),
}
