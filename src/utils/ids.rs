use chrono::Local;
use uuid::Uuid;

/// Generates a question identifier of the form `AI{yymmdd}_{8-hex}`.
/// The date prefix keeps batches sortable; the uuid suffix avoids
/// collisions within a batch.
pub fn generate_question_id() -> String {
    let timestamp = Local::now().format("%y%m%d");
    let unique_suffix: String = Uuid::new_v4().simple().to_string()[..8].to_string();
    format!("AI{}_{}", timestamp, unique_suffix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_have_prefix_and_are_unique() {
        let a = generate_question_id();
        let b = generate_question_id();
        assert!(a.starts_with("AI"));
        assert_eq!(a.len(), "AI".len() + 6 + 1 + 8);
        assert_ne!(a, b);
    }
}
