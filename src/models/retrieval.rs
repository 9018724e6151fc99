use serde::{Deserialize, Serialize};

/// Per-primary-chapter accuracy aggregate, ranked against the target
/// accuracy band when selecting concepts for the RAG flow.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ConceptAccuracy {
    pub primary_chapter: String,
    pub avg_correct_rate: f64,
    pub item_count: i64,
}

/// One assessment-item slot allocated to a concept for a RAG batch.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AssessmentItem {
    pub assessment_item_id: String,
    pub concept_name: String,
    pub grade: i32,
    pub term: i32,
    pub chapter_name: String,
    pub difficulty_band: Option<String>,
}

/// One row of the per-learner enriched item view.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct LearnerRequirement {
    pub learner_id: String,
    pub assessment_item_id: String,
    pub knowledge_tag: Option<String>,
    pub grade: i32,
    pub term: i32,
    pub concept_name: String,
    pub chapter_name: Option<String>,
    pub difficulty_band: Option<String>,
    pub topic_name: Option<String>,
    pub unit_name: Option<String>,
}
