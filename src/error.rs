use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::collaborators::CollaboratorError;
use crate::collections::FollowupError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("not found")]
    NotFound,
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("bad gateway: {0}")]
    BadGateway(String),
    #[error("{0}")]
    Message(String),
}

impl From<FollowupError> for AppError {
    fn from(err: FollowupError) -> Self {
        match err {
            FollowupError::NotFound(_) => AppError::NotFound,
            FollowupError::Validation(_) => AppError::BadRequest(err.to_string()),
            FollowupError::Terminal { .. }
            | FollowupError::InvalidTransition { .. }
            | FollowupError::VersionConflict { .. } => AppError::Conflict(err.to_string()),
            FollowupError::Database(err) => AppError::Db(err),
            FollowupError::Collaborator(err) => err.into(),
        }
    }
}

impl From<CollaboratorError> for AppError {
    fn from(err: CollaboratorError) -> Self {
        match err {
            CollaboratorError::DocumentNotFound(_) => AppError::NotFound,
            CollaboratorError::Database(err) => AppError::Db(err),
            other => AppError::BadGateway(other.to_string()),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Message(format!("{err:#}"))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self {
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            AppError::Db(_) | AppError::Message(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        tracing::error!(?self);
        (status, self.to_string()).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collections::FollowupStatus;
    use uuid::Uuid;

    fn status_of(err: FollowupError) -> StatusCode {
        AppError::from(err).into_response().status()
    }

    #[test]
    fn followup_errors_map_to_http_statuses() {
        assert_eq!(
            status_of(FollowupError::NotFound(Uuid::new_v4())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(FollowupError::Validation("notes are required".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(FollowupError::Terminal {
                status: FollowupStatus::Fulfilled,
                reason: FollowupStatus::Fulfilled.closure_reason(),
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(FollowupError::VersionConflict {
                expected: 1,
                actual: 2
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(FollowupError::Collaborator(CollaboratorError::Transport(
                "timeout".into()
            ))),
            StatusCode::BAD_GATEWAY
        );
    }
}
