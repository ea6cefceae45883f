/// Errors that can occur in the storage layer.
///
/// The session manager never lets these reach the UI: a failed read is
/// logged and treated as "no session found", a failed write is logged.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Reading or writing the backing file failed.
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// A stored value could not be encoded or decoded.
    #[error("stored value is not valid JSON: {0}")]
    Serde(#[from] serde_json::Error),

    /// A writer panicked while holding the store lock.
    #[error("storage lock poisoned")]
    Poisoned,
}
