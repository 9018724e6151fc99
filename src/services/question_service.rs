//! Orchestration for the single, bulk, view and personalized generation
//! flows. One model call per question slot, no retries: a slot that fails
//! to parse or validate is logged and skipped, and the batch ships with
//! whatever survived. Zero survivors is the only hard failure.

use crate::error::{Error, Result};
use crate::models::question::{GeneratedQuestion, QuestionParams, QuestionPayload};
use crate::repair::parse_question;
use crate::services::ai_service::AiService;
use crate::services::concept_service::ConceptCache;
use crate::services::prompt_service::{self, IllustrationRules, SYSTEM_PROMPT};
use crate::utils::grades::grade_description;
use crate::utils::ids::generate_question_id;
use crate::utils::validation::{validate_question_format, CHOICE_COUNT};
use serde_json::{json, Value as JsonValue};
use sqlx::PgPool;

const GENERATION_TEMPERATURE: f64 = 0.7;
const GENERATION_MAX_TOKENS: u32 = 1500;

/// Questions per parameter set in the bulk flow.
const BULK_QUESTIONS_PER_SET: usize = 5;
/// Parameter sets pulled from the question bank for the bulk flow.
const BULK_PARAM_SETS: usize = 4;
/// Requirement rows sampled per view/personalized request.
const VIEW_SAMPLE_SIZE: i64 = 5;
/// Upper bound on `count` for a single create_question call.
pub const MAX_QUESTION_COUNT: u32 = 10;

/// Characters of question text kept in duplicate-avoidance lists and
/// style samples.
const PREFIX_LEN: usize = 50;
const SAMPLE_CLIP_LEN: usize = 100;

/// Resolved generation parameters for one request.
#[derive(Debug, Clone)]
pub struct GenerationInput {
    pub grade: String,
    pub term: String,
    pub topic_name: String,
    pub question_type: String,
    pub difficulty: String,
}

impl From<QuestionParams> for GenerationInput {
    fn from(row: QuestionParams) -> Self {
        Self {
            grade: row.grade,
            term: row.term,
            topic_name: row.topic_name,
            question_type: row.question_type,
            difficulty: row.difficulty.to_string(),
        }
    }
}

fn clip_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let clipped: String = text.chars().take(max).collect();
        format!("{}...", clipped)
    }
}

fn question_prefix(payload: &QuestionPayload) -> Option<String> {
    payload
        .question_text
        .as_deref()
        .map(|t| clip_chars(t, PREFIX_LEN))
}

fn validation_block() -> JsonValue {
    json!({
        "format_check": "passed",
        "db_storage": "disabled_for_testing",
    })
}

#[derive(sqlx::FromRow)]
struct QuestionTextRow {
    question_text: String,
}

#[derive(Clone)]
pub struct QuestionService {
    pool: PgPool,
    ai: AiService,
    concepts: ConceptCache,
    rules: IllustrationRules,
}

impl QuestionService {
    pub fn new(pool: PgPool, ai: AiService, concepts: ConceptCache) -> Self {
        Self {
            pool,
            ai,
            concepts,
            rules: IllustrationRules::default(),
        }
    }

    /// Default parameter row used when create_question is called with no
    /// parameters at all.
    pub async fn default_params(&self) -> Result<QuestionParams> {
        let row = sqlx::query_as::<_, QuestionParams>(
            r#"
            SELECT id, grade, term, topic_name, question_type, difficulty
            FROM question_bank
            ORDER BY id
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::NotFound("No question parameters available".to_string()))?;
        Ok(row)
    }

    /// Distinct parameter rows for the bulk flow, one per generated set.
    async fn param_sets(&self, limit: i64) -> Result<Vec<QuestionParams>> {
        let rows = sqlx::query_as::<_, QuestionParams>(
            r#"
            SELECT DISTINCT ON (topic_name)
                id, grade, term, topic_name, question_type, difficulty
            FROM question_bank
            ORDER BY topic_name, id
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// A couple of bank questions on the same topic, clipped, as style
    /// reference for the prompt. Falls back to canned samples when the
    /// bank has nothing on the topic.
    async fn existing_question_sample(&self, topic_name: &str) -> Result<String> {
        let rows = sqlx::query_as::<_, QuestionTextRow>(
            r#"
            SELECT question_text
            FROM question_bank
            WHERE topic_name LIKE '%' || $1 || '%'
              AND question_text IS NOT NULL
            LIMIT 2
            "#,
        )
        .bind(topic_name)
        .fetch_all(&self.pool)
        .await
        .unwrap_or_default();

        if rows.is_empty() {
            return Ok([
                "- 기존 문제 예시 없음, 주제에 맞는 표준적인 문제를 생성하세요",
                "- 교육과정을 벗어나지 않는 수준으로 출제하세요",
            ]
            .join("\n"));
        }

        Ok(rows
            .iter()
            .map(|row| format!("- {}", clip_chars(&row.question_text, SAMPLE_CLIP_LEN)))
            .collect::<Vec<_>>()
            .join("\n"))
    }

    /// One generation slot: prompt, model call, repair, validate. Failures
    /// are logged and swallowed so the caller can keep filling other slots.
    async fn generate_one(
        &self,
        input: &GenerationInput,
        existing_sample: &str,
        excluded_prefixes: &[String],
    ) -> Option<QuestionPayload> {
        let prompt = prompt_service::build_question_prompt(
            &input.grade,
            &input.term,
            &input.topic_name,
            &input.question_type,
            &input.difficulty,
            existing_sample,
            excluded_prefixes,
            &self.rules,
        );

        let raw = match self
            .ai
            .chat(SYSTEM_PROMPT, &prompt, GENERATION_TEMPERATURE, GENERATION_MAX_TOKENS)
            .await
        {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(topic = %input.topic_name, error = %e, "model call failed");
                return None;
            }
        };

        let payload = match parse_question(&raw, CHOICE_COUNT) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(
                    topic = %input.topic_name,
                    error = %e,
                    raw = %clip_chars(&raw, 500),
                    "unable to recover question JSON"
                );
                return None;
            }
        };

        if !validate_question_format(&payload, &input.question_type) {
            tracing::warn!(topic = %input.topic_name, "generated question failed validation");
            return None;
        }
        Some(payload)
    }

    /// The create_question flow: `count` sequential slots over one
    /// parameter set, with duplicate avoidance across the slots of this
    /// request.
    pub async fn create_questions(
        &self,
        input: GenerationInput,
        count: u32,
    ) -> Result<JsonValue> {
        let count = count.clamp(1, MAX_QUESTION_COUNT);
        let existing_sample = self.existing_question_sample(&input.topic_name).await?;

        let mut questions: Vec<GeneratedQuestion> = Vec::new();
        let mut excluded: Vec<String> = Vec::new();

        for slot in 0..count {
            tracing::info!(slot = slot + 1, count, topic = %input.topic_name, "generating question");
            let Some(payload) = self.generate_one(&input, &existing_sample, &excluded).await
            else {
                continue;
            };

            if let Some(prefix) = question_prefix(&payload) {
                excluded.push(prefix);
            }
            let metadata = json!({
                "grade": input.grade,
                "grade_description": grade_description(&input.grade),
                "term": input.term,
                "topic_name": input.topic_name,
                "question_type": input.question_type,
                "difficulty": input.difficulty,
                "generated_at": chrono::Utc::now().to_rfc3339(),
            });
            questions.push(GeneratedQuestion::new(
                generate_question_id(),
                payload,
                metadata,
            ));
        }

        if questions.is_empty() {
            return Err(Error::GenerationFailed);
        }

        Ok(json!({
            "success": true,
            "requested": count,
            "count": questions.len(),
            "generated_questions": questions,
            "parameters_used": {
                "grade": input.grade,
                "term": input.term,
                "topic_name": input.topic_name,
                "question_type": input.question_type,
                "difficulty": input.difficulty,
            },
            "validation": validation_block(),
            "status_code": 200,
        }))
    }

    /// The bulk flow: a fixed number of parameter sets from the bank, a
    /// fixed number of questions each, duplicate avoidance scoped per set.
    pub async fn bulk_generate(&self) -> Result<JsonValue> {
        let param_sets = self.param_sets(BULK_PARAM_SETS as i64).await?;
        if param_sets.is_empty() {
            return Err(Error::NotFound(
                "No question parameters available for bulk generation".to_string(),
            ));
        }

        let requested = param_sets.len() * BULK_QUESTIONS_PER_SET;
        let mut questions: Vec<GeneratedQuestion> = Vec::new();
        let mut questions_per_set: Vec<JsonValue> = Vec::new();

        for (set_index, row) in param_sets.iter().enumerate() {
            let set_number = set_index + 1;
            let source_id = row.id.clone();
            let input = GenerationInput::from(row.clone());
            let existing_sample = self.existing_question_sample(&input.topic_name).await?;

            let mut excluded: Vec<String> = Vec::new();
            let mut generated_in_set = 0usize;

            for slot in 0..BULK_QUESTIONS_PER_SET {
                tracing::info!(
                    set = set_number,
                    slot = slot + 1,
                    topic = %input.topic_name,
                    "bulk generation slot"
                );
                let Some(payload) =
                    self.generate_one(&input, &existing_sample, &excluded).await
                else {
                    continue;
                };

                if let Some(prefix) = question_prefix(&payload) {
                    excluded.push(prefix);
                }
                let metadata = json!({
                    "set_number": set_number,
                    "source_id": source_id,
                    "grade": input.grade,
                    "term": input.term,
                    "topic_name": input.topic_name,
                    "question_type": input.question_type,
                    "difficulty": input.difficulty,
                    "generated_at": chrono::Utc::now().to_rfc3339(),
                });
                let mut question =
                    GeneratedQuestion::new(generate_question_id(), payload, metadata);
                question.source_id = Some(source_id.clone());
                questions.push(question);
                generated_in_set += 1;
            }

            questions_per_set.push(json!({
                "set_number": set_number,
                "source_id": source_id,
                "topic_name": input.topic_name,
                "requested": BULK_QUESTIONS_PER_SET,
                "generated": generated_in_set,
            }));
        }

        if questions.is_empty() {
            return Err(Error::GenerationFailed);
        }

        Ok(json!({
            "success": true,
            "summary": {
                "requested": requested,
                "generated": questions.len(),
                "parameter_sets": param_sets.len(),
                "questions_per_set": questions_per_set,
            },
            "generated_questions": questions,
            "validation": validation_block(),
            "status_code": 200,
        }))
    }

    /// Sampled learner-requirement rows for the view flow.
    async fn sample_requirements(&self) -> Result<Vec<crate::models::retrieval::LearnerRequirement>> {
        let rows = sqlx::query_as::<_, crate::models::retrieval::LearnerRequirement>(
            r#"
            SELECT learner_id, assessment_item_id, knowledge_tag, grade, term,
                   concept_name, chapter_name, difficulty_band, topic_name, unit_name
            FROM learner_item_view
            ORDER BY random()
            LIMIT $1
            "#,
        )
        .bind(VIEW_SAMPLE_SIZE)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Requirement rows for one learner, bounded to the sample size.
    async fn learner_requirements(
        &self,
        learner_id: &str,
    ) -> Result<Vec<crate::models::retrieval::LearnerRequirement>> {
        let rows = sqlx::query_as::<_, crate::models::retrieval::LearnerRequirement>(
            r#"
            SELECT learner_id, assessment_item_id, knowledge_tag, grade, term,
                   concept_name, chapter_name, difficulty_band, topic_name, unit_name
            FROM learner_item_view
            WHERE learner_id = $1
            ORDER BY assessment_item_id
            LIMIT $2
            "#,
        )
        .bind(learner_id)
        .bind(VIEW_SAMPLE_SIZE)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Shared body of the view and personalized flows: one question per
    /// requirement row, duplicate avoidance scoped per concept.
    async fn generate_from_requirements(
        &self,
        requirements: Vec<crate::models::retrieval::LearnerRequirement>,
        flow: &str,
    ) -> Result<JsonValue> {
        use std::collections::HashMap;

        let requested = requirements.len();
        let mut questions: Vec<GeneratedQuestion> = Vec::new();
        let mut excluded_by_concept: HashMap<String, Vec<String>> = HashMap::new();

        for row in &requirements {
            let topic = row
                .topic_name
                .clone()
                .unwrap_or_else(|| row.concept_name.clone());
            let input = GenerationInput {
                grade: row.grade.to_string(),
                term: row.term.to_string(),
                topic_name: topic.clone(),
                question_type: "선택형".to_string(),
                difficulty: row.difficulty_band.clone().unwrap_or_else(|| "중".to_string()),
            };

            let existing_sample = self.existing_question_sample(&input.topic_name).await?;
            let excluded = excluded_by_concept
                .entry(row.concept_name.clone())
                .or_default();

            tracing::info!(
                flow,
                learner = %row.learner_id,
                concept = %row.concept_name,
                "generating requirement question"
            );
            let Some(payload) = self.generate_one(&input, &existing_sample, excluded).await
            else {
                continue;
            };
            if let Some(prefix) = question_prefix(&payload) {
                excluded.push(prefix);
            }

            let knowledge_tag = match &row.knowledge_tag {
                Some(tag) => Some(tag.clone()),
                None => self.concepts.knowledge_tag_for(&row.concept_name).await?,
            };
            let mapped_concept = self.concepts.mapped_concept_name(&topic).await?;

            let metadata = json!({
                "concept_name": row.concept_name,
                "mapped_concept_name": mapped_concept,
                "knowledge_tag": knowledge_tag,
                "chapter_name": row.chapter_name,
                "unit_name": row.unit_name,
                "grade": row.grade,
                "term": row.term,
                "difficulty": input.difficulty,
                "generated_at": chrono::Utc::now().to_rfc3339(),
            });
            let mut question = GeneratedQuestion::new(generate_question_id(), payload, metadata);
            question.learner_id = Some(row.learner_id.clone());
            question.assessment_item_id = Some(row.assessment_item_id.clone());
            questions.push(question);
        }

        if questions.is_empty() {
            return Err(Error::GenerationFailed);
        }

        Ok(json!({
            "success": true,
            "requested": requested,
            "count": questions.len(),
            "generated_questions": questions,
            "validation": validation_block(),
            "status_code": 200,
        }))
    }

    /// The create_by_view flow: a random sample of requirement rows, one
    /// question each.
    pub async fn create_by_view(&self) -> Result<JsonValue> {
        let requirements = self.sample_requirements().await?;
        if requirements.is_empty() {
            return Err(Error::NotFound(
                "학습 데이터가 없습니다".to_string(),
            ));
        }
        self.generate_from_requirements(requirements, "view").await
    }

    /// The create_personalized flow: requirement rows for one learner.
    pub async fn create_personalized(&self, learner_id: &str) -> Result<JsonValue> {
        let requirements = self.learner_requirements(learner_id).await?;
        if requirements.is_empty() {
            return Err(Error::NotFound(format!(
                "학습자 {} 의 학습 데이터를 찾을 수 없습니다",
                learner_id
            )));
        }
        self.generate_from_requirements(requirements, "personalized")
            .await
    }

    /// Database half of the test_connections endpoint.
    pub async fn test_database(&self) -> (bool, String) {
        match sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await
        {
            Ok(_) => (true, "Connection successful".to_string()),
            Err(e) => (false, e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clip_is_char_safe() {
        let text = "가나다라마바사";
        assert_eq!(clip_chars(text, 3), "가나다...");
        assert_eq!(clip_chars(text, 10), text);
    }

    #[test]
    fn prefix_comes_from_question_text() {
        let payload = QuestionPayload {
            question_text: Some("a".repeat(80)),
            ..Default::default()
        };
        let prefix = question_prefix(&payload).unwrap();
        assert_eq!(prefix.chars().count(), PREFIX_LEN + 3);
    }

    #[test]
    fn generation_input_from_bank_row() {
        let row = QuestionParams {
            id: "Q001".to_string(),
            grade: "M2".to_string(),
            term: "1".to_string(),
            topic_name: "일차함수".to_string(),
            question_type: "선택형".to_string(),
            difficulty: 3,
        };
        let input = GenerationInput::from(row);
        assert_eq!(input.difficulty, "3");
        assert_eq!(input.grade, "M2");
    }
}
