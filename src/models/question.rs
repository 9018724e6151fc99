use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Question payload as recovered from a model response in the
/// single/bulk/personalized flows. Every field is optional at parse time;
/// the validator decides whether the record is usable.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct QuestionPayload {
    #[serde(default)]
    pub question_text: Option<String>,
    #[serde(default)]
    pub question_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub choices: Option<Vec<String>>,
    #[serde(default)]
    pub correct_answer: Option<JsonValue>,
    #[serde(default)]
    pub answer_explanation: Option<String>,
    /// Illustration markup. The model is prompted to emit `svg_code`;
    /// the canonical output field is `svg_content`.
    #[serde(default, alias = "svg_code")]
    pub svg_content: Option<String>,
}

/// One row of the batch array returned by the RAG flow.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RagQuestionPayload {
    #[serde(default, alias = "assessmentItemID")]
    pub assessment_item_id: Option<String>,
    #[serde(default)]
    pub concept_name: Option<String>,
    #[serde(default)]
    pub question_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub choices: Option<Vec<String>>,
    #[serde(default)]
    pub answer: Option<JsonValue>,
    #[serde(default)]
    pub explanation: Option<String>,
    #[serde(default, alias = "svg_code")]
    pub svg_content: Option<String>,
    #[serde(default)]
    pub skip: bool,
}

/// A validated question enriched with per-flow metadata. Never mutated
/// after creation apart from the metadata attachment done at build time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedQuestion {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub learner_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assessment_item_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    #[serde(flatten)]
    pub payload: QuestionPayload,
    pub metadata: JsonValue,
}

impl GeneratedQuestion {
    pub fn new(id: String, payload: QuestionPayload, metadata: JsonValue) -> Self {
        Self {
            id,
            learner_id: None,
            assessment_item_id: None,
            source_id: None,
            payload,
            metadata,
        }
    }
}

/// Parameter row from the question bank, used both as the default
/// parameter source for create_question and as the per-set parameters
/// of bulk generation.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct QuestionParams {
    pub id: String,
    pub grade: String,
    pub term: String,
    pub topic_name: String,
    pub question_type: String,
    pub difficulty: i32,
}
