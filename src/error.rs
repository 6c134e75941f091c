use std::{error, fmt};

// -------------------------------------------------------------------------------------------------

/// `Error` provides an enumeration of all possible errors reported by presto.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Error {
    /// Reading from a buffer that holds no samples. This is the regular termination
    /// signal of a producer/consumer drain loop, not a failure.
    EndOfStream,
    /// A sample slice's length is not divisible by the buffer's channel count.
    InvalidChannels,
    /// Moving or copying samples between buffers with different channel counts.
    ChannelMismatch,
    /// A position or length argument lies outside the buffer's unread region,
    /// or a raw commit exceeds the reserved window.
    OutOfRange,
    /// A buffer grow request exceeds the platform's maximum allocation size.
    OutOfMemory,
}

impl error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EndOfStream => write!(f, "Buffer holds no more samples"),
            Self::InvalidChannels => {
                write!(f, "Sample count is incompatible with the channel layout")
            }
            Self::ChannelMismatch => {
                write!(f, "Buffers have different channel layouts")
            }
            Self::OutOfRange => write!(f, "Position is outside the buffered region"),
            Self::OutOfMemory => write!(f, "Buffer grew too large"),
        }
    }
}
