use crate::clipboard::Format;

/// A single format check or read that failed during one read attempt.
#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    #[error("reading {format} from the clipboard failed: {source}")]
    Format {
        format: Format,
        #[source]
        source: anyhow::Error,
    },
}

impl ReadError {
    pub fn format(&self) -> Format {
        match self {
            ReadError::Format { format, .. } => *format,
        }
    }
}

/// Failure of one pipeline pass.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("could not read the clipboard after {attempts} attempts")]
    ExhaustedRetries {
        attempts: u32,
        #[source]
        source: ReadError,
    },
    #[error("could not process clipboard content: {0}")]
    Processing(#[source] anyhow::Error),
}

impl From<anyhow::Error> for CaptureError {
    fn from(e: anyhow::Error) -> Self {
        CaptureError::Processing(e)
    }
}
