//! Error types for ShaleDB.

use crate::page::PageId;
use thiserror::Error;

/// Result type alias using ShaleError.
pub type Result<T> = std::result::Result<T, ShaleError>;

/// Errors that can occur in ShaleDB storage operations.
#[derive(Debug, Error)]
pub enum ShaleError {
    // I/O errors are fatal; callers propagate them without retrying.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Buffer pool full, unable to allocate frame")]
    BufferPoolFull,

    #[error("Page not found: {page_id}")]
    PageNotFound { page_id: PageId },

    #[error("Page {page_id} is pinned and cannot be deleted")]
    PagePinned { page_id: PageId },

    #[error("Page corrupted: {0}")]
    Corrupted(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error as IoError, ErrorKind};

    #[test]
    fn test_io_error_conversion() {
        let io_err = IoError::new(ErrorKind::NotFound, "file not found");
        let err: ShaleError = io_err.into();
        assert!(matches!(err, ShaleError::Io(_)));
        assert!(err.to_string().contains("I/O error"));
    }

    #[test]
    fn test_buffer_pool_full_display() {
        let err = ShaleError::BufferPoolFull;
        assert_eq!(err.to_string(), "Buffer pool full, unable to allocate frame");
    }

    #[test]
    fn test_page_not_found_display() {
        let err = ShaleError::PageNotFound { page_id: 42 };
        assert_eq!(err.to_string(), "Page not found: 42");
    }

    #[test]
    fn test_page_pinned_display() {
        let err = ShaleError::PagePinned { page_id: 7 };
        assert_eq!(err.to_string(), "Page 7 is pinned and cannot be deleted");
    }

    #[test]
    fn test_corrupted_display() {
        let err = ShaleError::Corrupted("bad node type".to_string());
        assert_eq!(err.to_string(), "Page corrupted: bad node type");
    }

    #[test]
    fn test_result_type_alias() {
        fn returns_ok() -> Result<i32> {
            Ok(42)
        }

        fn returns_err() -> Result<i32> {
            Err(ShaleError::BufferPoolFull)
        }

        assert!(returns_ok().is_ok());
        assert!(returns_err().is_err());
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ShaleError>();
    }
}
