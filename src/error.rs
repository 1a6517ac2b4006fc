//! Errors a resource hands back to the host.

use crate::pipeline::PipelineError;
use axum::http::StatusCode;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ResourceError {
    /// The request itself is wrong. The message is shown to the client.
    #[error("{message}")]
    Client { status: StatusCode, message: String },
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

impl ResourceError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ResourceError::Client {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ResourceError::Client { status, .. } => *status,
            ResourceError::Pipeline(err) => err.status(),
        }
    }

    /// Whether the client, rather than the server, is at fault.
    pub fn is_client_error(&self) -> bool {
        self.status().is_client_error()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifier::Identifier;
    use crate::imaging::BackendError;
    use crate::source::SourceError;

    #[test]
    fn bad_request_displays_message_only() {
        let err = ResourceError::bad_request("Identifier not supplied");
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.to_string(), "Identifier not supplied");
        assert!(err.is_client_error());
    }

    #[test]
    fn pipeline_errors_map_by_kind() {
        let not_found: ResourceError =
            PipelineError::from(SourceError::NotFound(Identifier::from("x"))).into();
        assert_eq!(not_found.status(), StatusCode::NOT_FOUND);

        let invalid: ResourceError =
            PipelineError::from(SourceError::InvalidIdentifier(Identifier::from("../x"))).into();
        assert_eq!(invalid.status(), StatusCode::BAD_REQUEST);

        let unsupported: ResourceError =
            PipelineError::from(BackendError::UnsupportedFormat("bmp".into())).into();
        assert_eq!(unsupported.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!unsupported.is_client_error());
    }
}
