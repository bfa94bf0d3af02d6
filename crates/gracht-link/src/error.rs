use thiserror::Error;

/// Transport and framing failures surfaced by [`crate::Link`] and the frame
/// codec. One connection's error tears down that connection only — see the
/// server core's propagation policy.
#[derive(Error, Debug)]
pub enum LinkError {
    #[error("link does not support this transport kind")]
    Unsupported,
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    #[error("frame of {got} bytes exceeds the configured maximum of {max} bytes")]
    FrameTooLarge { got: u32, max: u32 },
    #[error("broken frame: {0}")]
    BrokenFrame(&'static str),
    #[error("no message pending")]
    NoData,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type LinkResult<T> = Result<T, LinkError>;
