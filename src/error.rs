use axum::{
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde_json::json;

pub type Result<T> = std::result::Result<T, Error>;

/// Parameter names reported back to the caller when only part of the
/// generation parameter set is supplied.
pub const REQUIRED_QUESTION_PARAMS: [&str; 5] =
    ["grade", "term", "topic_name", "question_type", "difficulty"];

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Required parameters missing")]
    MissingParameters,

    #[error("Invalid parameter format: {0}")]
    InvalidParameterFormat(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(sqlx::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),

    #[error("HTTP error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Failed to generate valid questions")]
    GenerationFailed,

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl IntoResponse for Error {
    fn into_response(self) -> axum::response::Response {
        let (status, body) = match self {
            Error::MissingParameters => (
                StatusCode::BAD_REQUEST,
                json!({
                    "error": "Required parameters missing",
                    "required": REQUIRED_QUESTION_PARAMS,
                    "example_url": "/api/create_question?grade=M2&term=1&topic_name=일차함수의 함숫값 구하기&question_type=단답형&difficulty=3",
                }),
            ),
            Error::InvalidParameterFormat(msg) => (
                StatusCode::BAD_REQUEST,
                json!({ "error": "Invalid parameter format", "message": msg }),
            ),
            Error::BadRequest(msg) => (StatusCode::BAD_REQUEST, json!({ "error": msg })),
            Error::NotFound(msg) => (StatusCode::NOT_FOUND, json!({ "error": msg })),
            Error::GenerationFailed => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({
                    "error": "Failed to generate valid questions",
                    "success": false,
                    "generated_questions": [],
                    "count": 0,
                }),
            ),
            Error::Database(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": err.to_string() }),
            ),
            Error::Json(err) => (StatusCode::BAD_REQUEST, json!({ "error": err.to_string() })),
            Error::Reqwest(err) => (
                StatusCode::BAD_GATEWAY,
                json!({ "error": format!("External service error: {}", err) }),
            ),
            Error::Internal(msg) | Error::Config(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": msg }))
            }
            Error::Anyhow(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": err.to_string() }),
            ),
            Error::Io(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": err.to_string() }),
            ),
        };

        // Every error body mirrors the HTTP status into a `status_code`
        // field alongside the message.
        let mut body = body;
        if let Some(obj) = body.as_object_mut() {
            obj.insert("status_code".into(), json!(status.as_u16()));
        }
        (status, Json(body)).into_response()
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Error::NotFound("Resource not found".to_string()),
            other => Error::Database(other),
        }
    }
}
