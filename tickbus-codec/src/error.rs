use std::{error::Error, fmt::Display, io};

/// Errors reported by the framing and checksum engines.
#[derive(Debug)]
pub enum CodecError {
    IoError(io::Error),
    /// A group header or data byte was NUL. The decoder stays in this state until reset.
    InvalidCobs,
    /// The encoder memory must be a power of two of at least 256 bytes.
    InvalidDepth(usize),
    /// The checksum width in bits is not a multiple of the data width.
    ChecksumWidth(u8),
    FrameTooLong { max: usize, got: usize },
}

impl From<io::Error> for CodecError {
    fn from(value: io::Error) -> Self {
        CodecError::IoError(value)
    }
}

impl Display for CodecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CodecError::IoError(error) => write!(f, "{}", error),
            CodecError::InvalidCobs => write!(f, "Invalid COBS data"),
            CodecError::InvalidDepth(depth) => write!(
                f,
                "COBS encoder requires a power of two memory of at least 256 bytes, got {}",
                depth
            ),
            CodecError::ChecksumWidth(width) => write!(
                f,
                "Checksum width of {} bits is not a multiple of the data width",
                width
            ),
            CodecError::FrameTooLong { max, got } => {
                write!(f, "Frame too long! Maximum is {}, but got {}", max, got)
            }
        }
    }
}

impl Error for CodecError {}
