use gracht_link::LinkError;
use thiserror::Error;

/// Error kinds returned to callers of the public API, matching the
/// `EALREADY`/`EINVAL`/... kinds from the wire spec's error model.
#[derive(Error, Debug)]
pub enum GrachtError {
    #[error("server is already initialized")]
    AlreadyInitialized,
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    #[error("out of memory")]
    OutOfMemory,
    #[error("link does not support this transport kind")]
    Unsupported,
    #[error("frame of {got} bytes exceeds the configured maximum of {max} bytes")]
    FrameTooLarge { got: u32, max: u32 },
    #[error("broken frame: {0}")]
    BrokenFrame(&'static str),
    #[error("no message pending")]
    NoData,
    #[error("no such protocol/action or client")]
    NotFound,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type GrachtResult<T> = Result<T, GrachtError>;

impl From<LinkError> for GrachtError {
    fn from(err: LinkError) -> Self {
        match err {
            LinkError::Unsupported => Self::Unsupported,
            LinkError::InvalidArgument(msg) => Self::InvalidArgument(msg),
            LinkError::FrameTooLarge { got, max } => Self::FrameTooLarge { got, max },
            LinkError::BrokenFrame(msg) => Self::BrokenFrame(msg),
            LinkError::NoData => Self::NoData,
            LinkError::Io(err) => Self::Io(err),
        }
    }
}
