pub mod config;
pub mod database;
pub mod dto;
pub mod error;
pub mod models;
pub mod repair;
pub mod routes;
pub mod services;
pub mod utils;

use crate::services::{
    ai_service::AiService, concept_service::ConceptCache, question_service::QuestionService,
    rag_service::RagService, retrieval_service::RetrievalService,
};
use axum::{routing::get, Router};
use reqwest::Client;
use sqlx::PgPool;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub ai_service: AiService,
    pub question_service: QuestionService,
    pub rag_service: RagService,
    pub concept_cache: ConceptCache,
}

impl AppState {
    pub fn new(pool: PgPool) -> Self {
        let config = crate::config::get_config();
        let http_client = Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .unwrap();

        let ai_service = AiService::new(config, http_client);
        let concept_cache = ConceptCache::new(pool.clone());
        let question_service =
            QuestionService::new(pool.clone(), ai_service.clone(), concept_cache.clone());
        let retrieval_service = RetrievalService::new(pool.clone());
        let rag_service = RagService::new(retrieval_service, ai_service.clone());

        Self {
            pool,
            ai_service,
            question_service,
            rag_service,
            concept_cache,
        }
    }
}

/// Full application router, shared between main and the integration tests.
pub fn app(state: AppState) -> Router {
    let api = Router::new()
        .route(
            "/api/create_question",
            get(routes::questions::create_question).post(routes::questions::create_question),
        )
        .route(
            "/api/test_connections",
            get(routes::questions::test_connections).post(routes::questions::test_connections),
        )
        .route(
            "/api/bulk_generate",
            get(routes::questions::bulk_generate).post(routes::questions::bulk_generate),
        )
        .route(
            "/api/create_by_view",
            get(routes::questions::create_by_view).post(routes::questions::create_by_view),
        )
        .route(
            "/api/create_personalized",
            get(routes::questions::create_personalized)
                .post(routes::questions::create_personalized),
        )
        .route(
            "/api/create_by_view_rag_personalized",
            get(routes::questions::create_by_view_rag_personalized)
                .post(routes::questions::create_by_view_rag_personalized),
        );

    Router::new()
        .route("/health", get(routes::health::health))
        .merge(api)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
