use crate::dispatch::types::JobId;
use std::io;
use std::path::PathBuf;

/// Coarse classification used by the HTTP layer to pick a status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    InvalidArgument,
    Unavailable,
    Internal,
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("path {path:?} is not valid or cannot be accessed")]
    PathNotFound {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("no active job with id {0}")]
    JobNotFound(JobId),

    #[error("invalid model selection: {0:?}")]
    InvalidModel(String),

    #[error("job limit reached ({limit} running)")]
    AtCapacity { limit: usize },

    #[error("server is shutting down")]
    ShuttingDown,

    #[error("failed to launch detection script")]
    Launch(#[source] io::Error),

    #[error("failed to terminate job {job_id}")]
    Terminate {
        job_id: JobId,
        #[source]
        source: io::Error,
    },
}

impl DispatchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DispatchError::PathNotFound { .. } | DispatchError::JobNotFound(_) => {
                ErrorKind::NotFound
            }
            DispatchError::InvalidModel(_) => ErrorKind::InvalidArgument,
            DispatchError::AtCapacity { .. } | DispatchError::ShuttingDown => {
                ErrorKind::Unavailable
            }
            DispatchError::Launch(_) | DispatchError::Terminate { .. } => ErrorKind::Internal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        let not_found = DispatchError::PathNotFound {
            path: PathBuf::from("/no/such/file"),
            source: io::Error::from(io::ErrorKind::NotFound),
        };
        assert_eq!(not_found.kind(), ErrorKind::NotFound);
        assert_eq!(DispatchError::JobNotFound(JobId(7)).kind(), ErrorKind::NotFound);
        assert_eq!(
            DispatchError::InvalidModel("bogus".to_string()).kind(),
            ErrorKind::InvalidArgument
        );
        assert_eq!(
            DispatchError::AtCapacity { limit: 2 }.kind(),
            ErrorKind::Unavailable
        );
        assert_eq!(DispatchError::ShuttingDown.kind(), ErrorKind::Unavailable);
        let launch = DispatchError::Launch(io::Error::from(io::ErrorKind::PermissionDenied));
        assert_eq!(launch.kind(), ErrorKind::Internal);
    }

    #[test]
    fn test_messages_name_the_subject() {
        assert_eq!(
            DispatchError::JobNotFound(JobId(42)).to_string(),
            "no active job with id 42"
        );
        assert_eq!(
            DispatchError::InvalidModel("bogus".to_string()).to_string(),
            "invalid model selection: \"bogus\""
        );
    }
}
