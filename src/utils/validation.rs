use crate::models::question::QuestionPayload;

/// Minimum length for question text and explanation, a crude defense
/// against truncated or empty model output.
const MIN_TEXT_LEN: usize = 10;

/// Choice count enforced for the single/bulk/view/personalized flows.
pub const CHOICE_COUNT: usize = 5;

/// Choice count enforced for the RAG batch flow.
pub const RAG_CHOICE_COUNT: usize = 4;

pub fn is_choice_type(question_type: &str) -> bool {
    question_type.contains("선택")
}

/// Structural check on a parsed question. Failures are reported as `false`
/// with a logged reason; the caller decides whether to keep going.
pub fn validate_question_format(payload: &QuestionPayload, expected_type: &str) -> bool {
    let Some(question_text) = payload.question_text.as_deref() else {
        tracing::warn!("missing required field: question_text");
        return false;
    };
    if payload.question_type.is_none() {
        tracing::warn!("missing required field: question_type");
        return false;
    }
    if payload.correct_answer.is_none() {
        tracing::warn!("missing required field: correct_answer");
        return false;
    }
    let Some(explanation) = payload.answer_explanation.as_deref() else {
        tracing::warn!("missing required field: answer_explanation");
        return false;
    };

    if is_choice_type(expected_type) {
        match payload.choices.as_ref() {
            Some(choices) if choices.len() == CHOICE_COUNT => {}
            Some(choices) => {
                tracing::warn!(
                    got = choices.len(),
                    expected = CHOICE_COUNT,
                    "choice-based question has wrong choice count"
                );
                return false;
            }
            None => {
                tracing::warn!("choice-based question has no choices");
                return false;
            }
        }
    }

    if question_text.chars().count() < MIN_TEXT_LEN {
        tracing::warn!("question text too short");
        return false;
    }
    if explanation.chars().count() < MIN_TEXT_LEN {
        tracing::warn!("answer explanation too short");
        return false;
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn valid_payload() -> QuestionPayload {
        QuestionPayload {
            question_text: Some("일차함수 y = 2x + 1 의 함숫값을 구하시오".to_string()),
            question_type: Some("선택형".to_string()),
            choices: Some(vec![
                "① 1".into(),
                "② 2".into(),
                "③ 3".into(),
                "④ 4".into(),
                "⑤ 5".into(),
            ]),
            correct_answer: Some(json!("③")),
            answer_explanation: Some("x = 1 을 대입하면 y = 3 이 됩니다".to_string()),
            svg_content: None,
        }
    }

    #[test]
    fn accepts_valid_choice_question() {
        assert!(validate_question_format(&valid_payload(), "선택형"));
    }

    #[test]
    fn rejects_wrong_choice_count() {
        let mut payload = valid_payload();
        payload.choices = Some(vec!["① 1".into(), "② 2".into()]);
        assert!(!validate_question_format(&payload, "선택형"));
    }

    #[test]
    fn rejects_missing_fields() {
        let mut payload = valid_payload();
        payload.correct_answer = None;
        assert!(!validate_question_format(&payload, "선택형"));
    }

    #[test]
    fn rejects_truncated_text() {
        let mut payload = valid_payload();
        payload.answer_explanation = Some("짧음".to_string());
        assert!(!validate_question_format(&payload, "선택형"));
    }

    #[test]
    fn short_answer_skips_choice_check() {
        let mut payload = valid_payload();
        payload.question_type = Some("단답형".to_string());
        payload.choices = None;
        assert!(validate_question_format(&payload, "단답형"));
    }
}
