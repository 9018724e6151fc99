use serde::Deserialize;

/// Generation parameters as they arrive over the wire. Every endpoint
/// accepts them either as query parameters or as a JSON body on POST;
/// everything is optional here and resolved by the handler.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QuestionRequest {
    pub grade: Option<String>,
    pub term: Option<String>,
    pub topic_name: Option<String>,
    pub question_type: Option<String>,
    pub difficulty: Option<String>,
    pub count: Option<String>,
}

impl QuestionRequest {
    /// Query parameters win over body fields; the body fills the gaps.
    pub fn merged_with(self, body: Option<QuestionRequest>) -> QuestionRequest {
        let Some(body) = body else { return self };
        QuestionRequest {
            grade: self.grade.or(body.grade),
            term: self.term.or(body.term),
            topic_name: self.topic_name.or(body.topic_name),
            question_type: self.question_type.or(body.question_type),
            difficulty: self.difficulty.or(body.difficulty),
            count: self.count.or(body.count),
        }
    }

    pub fn any_core_param(&self) -> bool {
        self.grade.is_some()
            || self.term.is_some()
            || self.topic_name.is_some()
            || self.question_type.is_some()
            || self.difficulty.is_some()
    }

    pub fn all_core_params(&self) -> bool {
        self.grade.is_some()
            && self.term.is_some()
            && self.topic_name.is_some()
            && self.question_type.is_some()
            && self.difficulty.is_some()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PersonalizedRequest {
    #[serde(alias = "learnerID")]
    pub learner_id: Option<String>,
}

impl PersonalizedRequest {
    pub fn merged_with(self, body: Option<PersonalizedRequest>) -> PersonalizedRequest {
        let Some(body) = body else { return self };
        PersonalizedRequest {
            learner_id: self.learner_id.or(body.learner_id),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RagRequest {
    pub grade: Option<String>,
}

impl RagRequest {
    pub fn merged_with(self, body: Option<RagRequest>) -> RagRequest {
        let Some(body) = body else { return self };
        RagRequest {
            grade: self.grade.or(body.grade),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_wins_over_body() {
        let query = QuestionRequest {
            grade: Some("M2".into()),
            ..Default::default()
        };
        let body = QuestionRequest {
            grade: Some("M1".into()),
            term: Some("1".into()),
            ..Default::default()
        };
        let merged = query.merged_with(Some(body));
        assert_eq!(merged.grade.as_deref(), Some("M2"));
        assert_eq!(merged.term.as_deref(), Some("1"));
    }

    #[test]
    fn core_param_detection() {
        let empty = QuestionRequest::default();
        assert!(!empty.any_core_param());

        let partial = QuestionRequest {
            grade: Some("M2".into()),
            ..Default::default()
        };
        assert!(partial.any_core_param());
        assert!(!partial.all_core_params());
    }
}
