/// Grade label helpers. The question bank uses `M1`/`M2`/`M3` codes while
/// the learner view stores international grades (7, 8, 9); Korean middle
/// school grades 1..=3 map to international by adding 6.

pub const KOREAN_TO_INTERNATIONAL_OFFSET: i32 = 6;

/// Long Korean description for prompts, accepting either code style.
pub fn grade_description(grade: &str) -> &'static str {
    match grade {
        "M1" | "1" | "7" => "중학교 1학년",
        "M3" | "3" | "9" => "중학교 3학년",
        _ => "중학교 2학년",
    }
}

/// Short label (중1/중2/중3) for logs and context blocks.
pub fn grade_label(grade: i32) -> String {
    let korean = if grade >= 7 {
        grade - KOREAN_TO_INTERNATIONAL_OFFSET
    } else {
        grade
    };
    format!("중{}", korean.clamp(1, 3))
}

pub fn korean_to_international(korean_grade: i32) -> i32 {
    korean_grade + KOREAN_TO_INTERNATIONAL_OFFSET
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grade_mapping() {
        assert_eq!(korean_to_international(2), 8);
        assert_eq!(grade_label(8), "중2");
        assert_eq!(grade_label(2), "중2");
        assert_eq!(grade_description("M1"), "중학교 1학년");
        assert_eq!(grade_description("unknown"), "중학교 2학년");
    }
}
