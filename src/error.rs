use thiserror::Error;

/// Errors raised while laying out or decoding a partitioned field stream.
///
/// Reaching the end of a stream is not an error; readers report it through
/// [`crate::stream::RecordStatus::EndOfStream`].
#[derive(Debug, Error)]
pub enum PartitionError {
    /// Grid or process dimensions that cannot describe a decomposition.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Byte count inconsistent with the partition geometry.
    #[error("corrupt stream at record {record}: {reason}")]
    CorruptStream { record: usize, reason: String },

    #[error("diagnostic not found: {0}")]
    DiagnosticNotFound(String),

    /// Run description that is not well-formed XML.
    #[error("malformed run description: {0}")]
    Catalog(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PartitionError>;

impl PartitionError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        PartitionError::InvalidConfig(msg.into())
    }

    pub(crate) fn corrupt(record: usize, reason: impl Into<String>) -> Self {
        PartitionError::CorruptStream {
            record,
            reason: reason.into(),
        }
    }
}
