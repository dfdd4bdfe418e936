#[derive(thiserror::Error, Debug)]
pub enum Error {
    // malformed wire data
    #[error("pak serializer error: {0}")]
    Serializer(String),
    #[error("invalid string length {0}")]
    Format(i32),
    // structurally valid but intentionally unsupported
    #[error("not supported: {0}")]
    NotSupported(String),
    #[error("compression method {0} is not implemented")]
    NotImplemented(crate::Compression),
    // api misuse
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
    // std errors
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("utf8 conversion: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error("utf16 conversion: {0}")]
    Utf16(#[from] std::string::FromUtf16Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
