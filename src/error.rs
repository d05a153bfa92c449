//! Error taxonomy for the CD-I disc image and codec library.

/// Errors produced while reading a CD-I disc image or decoding its content.
#[derive(Debug, thiserror::Error)]
pub enum CdiError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid image: {0}")]
    InvalidImage(String),

    #[error("disc label scan reached EOF before any Standard disc label")]
    MissingDiscLabel,

    #[error("disc label scan reached EOF before a Terminator disc label")]
    MissingTerminator,

    #[error("unsupported disc label type {0}")]
    UnsupportedDiscLabel(u8),

    #[error("sector index {index} is beyond the end of the image ({total} sectors)")]
    Eof { index: u64, total: u64 },

    #[error("seek to byte position {0} is past the end of the file")]
    SeekPastEnd(u64),

    #[error("truncated image: {0}")]
    TruncatedImage(String),

    #[error("invalid coding parameters: {0}")]
    InvalidCoding(String),

    #[error("corrupt data: {0}")]
    Corrupt(String),
}

/// Result alias used throughout this crate.
pub type Result<T> = std::result::Result<T, CdiError>;
