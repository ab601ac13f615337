//! Error types shared by the packetizing engine and its device plumbing.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::StreamType;

pub type Result<T> = std::result::Result<T, SinkError>;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("unsupported stream configuration: {0}")]
    Unsupported(String),
    #[error("missing codec data for {0:?}")]
    MissingCodecData(StreamType),
    #[error("codec header of {len} bytes does not fit a PES header")]
    CodecHeaderTooLarge { len: usize },
    #[error("no stream type declared before the first access unit")]
    NotConfigured,
    #[error("NAL rewrite needs {needed} bytes but the scratch buffer holds {capacity}")]
    ScratchOverflow { needed: usize, capacity: usize },
    #[error("NAL length prefix at offset {offset} runs past the access unit")]
    MalformedNal { offset: usize },
    #[error("PES header would grow past {limit} bytes")]
    HeaderOverflow { limit: usize },
    #[error("PES payload of {0} bytes does not fit the length field")]
    PayloadTooLarge(usize),
    #[error("waiting on the device failed")]
    Poll(#[source] std::io::Error),
    #[error("writing to the device failed")]
    Write(#[source] std::io::Error),
    #[error("failed to open device: {path}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SinkError {
    /// True for errors that cost the current access unit but leave the
    /// stream usable.
    pub fn drops_unit(&self) -> bool {
        matches!(
            self,
            SinkError::ScratchOverflow { .. }
                | SinkError::MalformedNal { .. }
                | SinkError::PayloadTooLarge(_)
        )
    }

    /// True for errors raised once when a stream is declared.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            SinkError::Unsupported(_)
                | SinkError::MissingCodecData(_)
                | SinkError::CodecHeaderTooLarge { .. }
        )
    }
}
