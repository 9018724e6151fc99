use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;

use crate::dto::question_dto::{PersonalizedRequest, QuestionRequest, RagRequest};
use crate::error::Error;
use crate::services::question_service::GenerationInput;
use crate::AppState;

fn parse_count(raw: Option<&str>) -> crate::error::Result<u32> {
    match raw {
        None => Ok(1),
        Some(s) => s.trim().parse::<u32>().map_err(|_| {
            Error::InvalidParameterFormat(format!("count must be an integer, got '{}'", s))
        }),
    }
}

/// Resolves the generation parameters for create_question: a fully
/// specified request is used as-is, an empty one falls back to the first
/// bank row, and anything in between is a client error.
async fn resolve_input(
    state: &AppState,
    req: &QuestionRequest,
) -> crate::error::Result<GenerationInput> {
    if !req.any_core_param() {
        let row = state.question_service.default_params().await?;
        tracing::info!(source_id = %row.id, "using default parameter row");
        return Ok(GenerationInput::from(row));
    }
    if !req.all_core_params() {
        return Err(Error::MissingParameters);
    }

    let difficulty = req.difficulty.clone().unwrap_or_default();
    difficulty.trim().parse::<i32>().map_err(|_| {
        Error::InvalidParameterFormat(format!(
            "difficulty must be an integer, got '{}'",
            difficulty
        ))
    })?;

    Ok(GenerationInput {
        grade: req.grade.clone().unwrap_or_default(),
        term: req.term.clone().unwrap_or_default(),
        topic_name: req.topic_name.clone().unwrap_or_default(),
        question_type: req.question_type.clone().unwrap_or_default(),
        difficulty,
    })
}

#[axum::debug_handler]
pub async fn create_question(
    State(state): State<AppState>,
    Query(query): Query<QuestionRequest>,
    body: Option<Json<QuestionRequest>>,
) -> crate::error::Result<Response> {
    let req = query.merged_with(body.map(|Json(b)| b));
    let count = parse_count(req.count.as_deref())?;
    let input = resolve_input(&state, &req).await?;

    let result = state.question_service.create_questions(input, count).await?;
    Ok(Json(result).into_response())
}

#[axum::debug_handler]
pub async fn test_connections(State(state): State<AppState>) -> Response {
    let (db_ok, db_msg) = state.question_service.test_database().await;
    let (ai_ok, ai_msg) = state.ai_service.test_connection().await;

    let success = db_ok && ai_ok;
    let status = if success {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };

    let body = json!({
        "success": success,
        "connections": {
            "database": { "connected": db_ok, "message": db_msg },
            "azure_openai": { "connected": ai_ok, "message": ai_msg },
        },
        "status_code": status.as_u16(),
    });
    (status, Json(body)).into_response()
}

#[axum::debug_handler]
pub async fn bulk_generate(State(state): State<AppState>) -> crate::error::Result<Response> {
    let result = state.question_service.bulk_generate().await?;
    Ok(Json(result).into_response())
}

#[axum::debug_handler]
pub async fn create_by_view(State(state): State<AppState>) -> crate::error::Result<Response> {
    let result = state.question_service.create_by_view().await?;
    Ok(Json(result).into_response())
}

#[axum::debug_handler]
pub async fn create_personalized(
    State(state): State<AppState>,
    Query(query): Query<PersonalizedRequest>,
    body: Option<Json<PersonalizedRequest>>,
) -> crate::error::Result<Response> {
    let req = query.merged_with(body.map(|Json(b)| b));
    let learner_id = req
        .learner_id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| Error::BadRequest("learnerID parameter is required".to_string()))?;

    let result = state
        .question_service
        .create_personalized(learner_id.trim())
        .await?;
    Ok(Json(result).into_response())
}

#[axum::debug_handler]
pub async fn create_by_view_rag_personalized(
    State(state): State<AppState>,
    Query(query): Query<RagRequest>,
    body: Option<Json<RagRequest>>,
) -> crate::error::Result<Response> {
    let req = query.merged_with(body.map(|Json(b)| b));
    let raw = req
        .grade
        .ok_or_else(|| Error::BadRequest("grade 파라미터가 필요합니다 (1, 2, 3)".to_string()))?;

    let grade = raw.trim().parse::<i32>().map_err(|_| {
        Error::InvalidParameterFormat(format!("grade must be an integer, got '{}'", raw))
    })?;
    if !(1..=3).contains(&grade) {
        return Err(Error::InvalidParameterFormat(format!(
            "grade must be 1, 2 or 3, got {}",
            grade
        )));
    }

    let result = state.rag_service.generate_for_grade(grade).await?;
    Ok(Json(result).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_defaults_to_one() {
        assert_eq!(parse_count(None).unwrap(), 1);
        assert_eq!(parse_count(Some("3")).unwrap(), 3);
        assert!(parse_count(Some("three")).is_err());
    }
}
