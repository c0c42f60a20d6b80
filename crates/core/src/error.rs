use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("invalid shape: {0}")]
    InvalidShape(String),

    #[error("channel mismatch: input has {input} channels, kernel expects {kernel}")]
    ChannelMismatch { input: usize, kernel: usize },

    #[error("buffer length {actual} does not match shape {shape} ({expected} elements)")]
    LengthMismatch {
        shape: String,
        expected: usize,
        actual: usize,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, Error>;
