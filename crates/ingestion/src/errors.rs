//! Ingestion error types

use normrag_common::errors::AppError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestionError {
    #[error("PDF parse error for {path}: {message}")]
    PdfParseError { path: String, message: String },

    #[error("Unsupported file type: {0}")]
    UnsupportedFileType(String),

    #[error("File too large: {size} bytes (limit {limit})")]
    FileTooLarge { size: u64, limit: u64 },

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("File is not valid UTF-8 text: {0}")]
    InvalidEncoding(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error(transparent)]
    Core(#[from] AppError),
}

impl From<IngestionError> for AppError {
    fn from(e: IngestionError) -> Self {
        match e {
            IngestionError::Core(inner) => inner,
            IngestionError::UnsupportedFileType(extension) => {
                AppError::UnsupportedFileType { extension }
            }
            IngestionError::FileTooLarge { size, limit } => AppError::PayloadTooLarge { size, limit },
            IngestionError::FileNotFound(path) => AppError::NotFound {
                resource_type: "file".to_string(),
                id: path,
            },
            IngestionError::PdfParseError { .. } | IngestionError::InvalidEncoding(_) => {
                AppError::invalid_input(e.to_string())
            }
            IngestionError::IoError(io) => AppError::Internal {
                message: format!("IO error: {}", io),
            },
        }
    }
}
