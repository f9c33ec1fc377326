use thiserror::Error;

/// Main error type for Ragchat
#[derive(Error, Debug)]
pub enum RagchatError {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// File system I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Embedding API errors
    #[error("Embedding API error: {0}")]
    Embedding(String),

    /// Chat completion API errors, including mid-stream failures
    #[error("LLM error: {0}")]
    Llm(String),

    /// The document parser could not process a file
    #[error("Failed to parse {path}: {reason}")]
    ParseFailure { path: String, reason: String },

    /// A question was asked before any chain was configured
    #[error("No chat chain is configured yet. Update the chat settings to start a conversation.")]
    ChainNotConfigured,

    /// Chain type name outside the recognized set
    #[error("Unknown chain type: {0} (expected no-history, history or history-with-tools)")]
    UnknownChainType(String),

    /// Vector store write failed; no ledger marker was written
    #[error("Failed to store embeddings for {id}: {reason}")]
    StoreWriteFailure { id: String, reason: String },

    /// Tool invocation errors
    #[error("Tool error: {0}")]
    Tool(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Convenient Result type using RagchatError
pub type Result<T> = std::result::Result<T, RagchatError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RagchatError::Config("Test error".to_string());
        assert!(err.to_string().contains("Configuration error"));
        assert!(err.to_string().contains("Test error"));
    }

    #[test]
    fn test_parse_failure_names_file() {
        let err = RagchatError::ParseFailure {
            path: "data/user/scan.pdf".to_string(),
            reason: "no parser".to_string(),
        };
        assert!(err.to_string().contains("data/user/scan.pdf"));
    }

    #[test]
    fn test_chain_not_configured_is_user_facing() {
        let msg = RagchatError::ChainNotConfigured.to_string();
        assert!(msg.contains("chat settings"));
    }

    #[test]
    fn test_error_from_rusqlite() {
        let rusqlite_err = rusqlite::Error::InvalidQuery;
        let err: RagchatError = rusqlite_err.into();
        assert!(matches!(err, RagchatError::Database(_)));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: RagchatError = io_err.into();
        assert!(matches!(err, RagchatError::Io(_)));
    }
}
