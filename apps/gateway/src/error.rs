use crate::classify::Shape;
use membrane_core::HandlerError;
use membrane_resources::ResourceError;
use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("unsupported event: {reason}")]
    UnsupportedEvent {
        reason: String,
        #[source]
        source: Option<BoxError>,
    },
    #[error(transparent)]
    Resource(#[from] ResourceError),
    #[error(transparent)]
    Handler(#[from] HandlerError),
    #[error("invalid {what} encoding: {source}")]
    Decode {
        what: &'static str,
        #[source]
        source: base64::DecodeError,
    },
    #[error("handler reported failure for {shape} record {index}")]
    Rejected { shape: Shape, index: usize },
}

impl DispatchError {
    pub fn unsupported(reason: impl Into<String>) -> Self {
        DispatchError::UnsupportedEvent {
            reason: reason.into(),
            source: None,
        }
    }

    pub fn unsupported_with(
        reason: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        DispatchError::UnsupportedEvent {
            reason: reason.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Stable label used for metrics and the runtime's error type.
    pub fn kind(&self) -> &'static str {
        match self {
            DispatchError::UnsupportedEvent { .. } => "unsupported_event",
            DispatchError::Resource(err) => err.kind(),
            DispatchError::Handler(_) => "handler",
            DispatchError::Decode { .. } => "decode",
            DispatchError::Rejected { .. } => "rejected",
        }
    }
}
