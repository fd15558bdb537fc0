use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    DeviceAccess(String),
    #[error("no camera frame is available")]
    NoFrameAvailable,
    #[error("failed to encode still image: {0}")]
    Encode(#[from] image::ImageError),
    #[error("request to detection service failed: {0}")]
    Transport(String),
    #[error("{message}")]
    Service {
        status: Option<u16>,
        message: String,
    },
    #[error("malformed detection response: {0}")]
    MalformedResponse(String),
    #[error("{0}")]
    InvalidTransition(&'static str),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    DeviceAccess,
    NoFrameAvailable,
    Transport,
    Service,
    MalformedResponse,
    InvalidTransition,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::DeviceAccess(_) => ErrorKind::DeviceAccess,
            // An unencodable frame is as good as no frame to the user.
            Error::NoFrameAvailable | Error::Encode(_) => ErrorKind::NoFrameAvailable,
            Error::Transport(_) => ErrorKind::Transport,
            Error::Service { .. } => ErrorKind::Service,
            Error::MalformedResponse(_) => ErrorKind::MalformedResponse,
            Error::InvalidTransition(_) => ErrorKind::InvalidTransition,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Transport(err.to_string())
    }
}

/// The single user-visible error the workflow holds at any time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(err: &Error) -> Self {
        let message = match err {
            Error::DeviceAccess(reason) => format!("Failed to access camera: {reason}"),
            Error::Transport(_) | Error::Service { .. } | Error::MalformedResponse(_) => {
                format!("Face detection error: {err}")
            }
            _ => err.to_string(),
        };
        Self {
            kind: err.kind(),
            message,
        }
    }
}

impl std::fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}
