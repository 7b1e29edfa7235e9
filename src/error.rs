use thiserror::Error;

pub type Result<T> = std::result::Result<T, DfsError>;

#[derive(Debug, Error)]
pub enum DfsError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to parse {resource}: {reason}")]
    Xml { resource: String, reason: String },

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("No filesystem for scheme: {0}")]
    UnsupportedScheme(String),

    #[error("File does not exist: {0}")]
    NotFound(String),

    #[error("File already exists: {0}")]
    AlreadyExists(String),

    #[error("Directory is not empty: {0}")]
    DirectoryNotEmpty(String),

    #[error("Is a directory: {0}")]
    IsDirectory(String),

    #[error("Not a directory: {0}")]
    NotDirectory(String),

    #[error("Write aborted: {0}")]
    Aborted(String),

    #[error("Timed out: {0}")]
    TimedOut(String),

    #[error("Filesystem handle closed")]
    Closed,

    #[error(transparent)]
    Transport(#[from] tonic::transport::Error),

    #[error("Remote call failed: {0}")]
    Remote(tonic::Status),
}

const NOT_EMPTY_PREFIX: &str = "not empty: ";
const IS_DIR_PREFIX: &str = "is a directory: ";
const NOT_DIR_PREFIX: &str = "not a directory: ";

impl From<DfsError> for tonic::Status {
    fn from(err: DfsError) -> Self {
        match err {
            DfsError::NotFound(path) => tonic::Status::not_found(path),
            DfsError::AlreadyExists(path) => tonic::Status::already_exists(path),
            DfsError::DirectoryNotEmpty(path) => {
                tonic::Status::failed_precondition(format!("{}{}", NOT_EMPTY_PREFIX, path))
            }
            DfsError::IsDirectory(path) => {
                tonic::Status::failed_precondition(format!("{}{}", IS_DIR_PREFIX, path))
            }
            DfsError::NotDirectory(path) => {
                tonic::Status::failed_precondition(format!("{}{}", NOT_DIR_PREFIX, path))
            }
            DfsError::InvalidPath(path) => tonic::Status::invalid_argument(path),
            DfsError::Aborted(reason) => tonic::Status::aborted(reason),
            DfsError::TimedOut(reason) => tonic::Status::deadline_exceeded(reason),
            DfsError::Remote(status) => status,
            other => tonic::Status::internal(other.to_string()),
        }
    }
}

impl From<tonic::Status> for DfsError {
    fn from(status: tonic::Status) -> Self {
        let message = status.message();
        match status.code() {
            tonic::Code::NotFound => DfsError::NotFound(message.to_string()),
            tonic::Code::AlreadyExists => DfsError::AlreadyExists(message.to_string()),
            tonic::Code::InvalidArgument => DfsError::InvalidPath(message.to_string()),
            tonic::Code::Aborted => DfsError::Aborted(message.to_string()),
            tonic::Code::DeadlineExceeded => DfsError::TimedOut(message.to_string()),
            tonic::Code::FailedPrecondition => {
                if let Some(path) = message.strip_prefix(NOT_EMPTY_PREFIX) {
                    DfsError::DirectoryNotEmpty(path.to_string())
                } else if let Some(path) = message.strip_prefix(IS_DIR_PREFIX) {
                    DfsError::IsDirectory(path.to_string())
                } else if let Some(path) = message.strip_prefix(NOT_DIR_PREFIX) {
                    DfsError::NotDirectory(path.to_string())
                } else {
                    DfsError::Remote(status)
                }
            }
            _ => DfsError::Remote(status),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_survive_the_wire() {
        let status: tonic::Status = DfsError::DirectoryNotEmpty("/a".into()).into();
        assert_eq!(status.code(), tonic::Code::FailedPrecondition);
        assert!(matches!(
            DfsError::from(status),
            DfsError::DirectoryNotEmpty(path) if path == "/a"
        ));

        let status: tonic::Status = DfsError::NotFound("/missing".into()).into();
        assert!(matches!(DfsError::from(status), DfsError::NotFound(_)));

        let status: tonic::Status = DfsError::TimedOut("reply".into()).into();
        assert_eq!(status.code(), tonic::Code::DeadlineExceeded);
        assert!(matches!(DfsError::from(status), DfsError::TimedOut(_)));

        let status: tonic::Status = DfsError::Closed.into();
        assert_eq!(status.code(), tonic::Code::Internal);
        assert!(matches!(DfsError::from(status), DfsError::Remote(_)));
    }
}
