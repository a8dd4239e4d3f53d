use std::fmt;

/// Error type for htp-proto
///
/// Every variant is fatal for the direction (request or response) it occurred on. Further
/// calls on that direction return the same error.
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(missing_docs)]
#[non_exhaustive]
pub enum Error {
    LineTooLong(usize),
    InvalidChunkLength(String),
    ChunkLengthTooLarge(u64),
    InvalidContentLength(String),
    InvalidRequestBody,
    MultipartByteranges,
    Repeated100Continue,
    UnmatchedResponse,
    MissingTransaction,
    HookFailed(&'static str),
    NoSuchTransaction(usize),
    TransactionIncomplete(usize),
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::LineTooLong(v) => write!(f, "line exceeds the hard field limit of {}", v),
            Error::InvalidChunkLength(v) => write!(f, "invalid chunk length: {:?}", v),
            Error::ChunkLengthTooLarge(v) => write!(f, "chunk length too large: {}", v),
            Error::InvalidContentLength(v) => write!(f, "invalid content-length: {:?}", v),
            Error::InvalidRequestBody => write!(f, "unable to determine request body length"),
            Error::MultipartByteranges => {
                write!(f, "multipart/byteranges response bodies are not supported")
            }
            Error::Repeated100Continue => write!(f, "already seen 100-continue"),
            Error::UnmatchedResponse => write!(f, "unable to match response to request"),
            Error::MissingTransaction => write!(f, "missing transaction for parser state"),
            Error::HookFailed(v) => write!(f, "{} hook failed", v),
            Error::NoSuchTransaction(v) => write!(f, "no transaction at index {}", v),
            Error::TransactionIncomplete(v) => write!(f, "transaction {} is not complete", v),
        }
    }
}
