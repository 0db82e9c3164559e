// Stream-level failures, split by how the outbox must react to them.

/// Error returned by a flow stream half.
///
/// `Eof` means the peer ended the stream cleanly. `Cancelled` means one of the stream's
/// cancellation scopes already fired. Anything else means the link can no longer be
/// trusted.
#[derive(thiserror::Error, Debug)]
pub enum StreamError {
    #[error("end of stream")]
    Eof,
    #[error("stream cancelled")]
    Cancelled,
    #[error(transparent)]
    Transport(#[from] anyhow::Error),
}

impl StreamError {
    pub fn is_eof(&self) -> bool {
        matches!(self, StreamError::Eof)
    }

    /// Failures that only concern this stream: the peer went away cleanly, or a scope
    /// that already covers the stream was cancelled.
    pub fn is_stream_local(&self) -> bool {
        matches!(self, StreamError::Eof | StreamError::Cancelled)
    }

    pub(crate) fn class(&self) -> &'static str {
        match self {
            StreamError::Eof => "eof",
            StreamError::Cancelled => "cancelled",
            StreamError::Transport(_) => "transport",
        }
    }
}
