//! Prompt construction for question generation. Pure functions of their
//! inputs; the only branching is the data-driven illustration decision.

use crate::utils::grades::{grade_description, grade_label};
use crate::models::retrieval::AssessmentItem;

/// System prompt shared by the single/bulk/view/personalized flows.
pub const SYSTEM_PROMPT: &str = "당신은 한국 중학교 수학 문제 출제 전문가입니다. 교육부 교육과정에 맞는 고품질 문제를 JSON 형식으로 생성해주세요.";

/// Topics whose names match one of these keywords get a mandatory diagram;
/// everything else is treated as a pure computation question. Kept as data
/// so the vocabulary can grow without touching control flow.
const ILLUSTRATION_KEYWORDS: [&str; 22] = [
    "도형", "삼각형", "사각형", "원", "다각형", "기하", "그래프", "좌표", "직선", "곡선", "통계",
    "차트", "막대", "원그래프", "히스토그램", "각", "넓이", "부피", "길이", "거리", "평행선",
    "수직선",
];

#[derive(Debug, Clone)]
pub struct IllustrationRules {
    keywords: Vec<&'static str>,
}

impl Default for IllustrationRules {
    fn default() -> Self {
        Self {
            keywords: ILLUSTRATION_KEYWORDS.to_vec(),
        }
    }
}

impl IllustrationRules {
    pub fn requires_illustration(&self, topic_name: &str) -> bool {
        let topic = topic_name.to_lowercase();
        self.keywords.iter().any(|kw| topic.contains(kw))
    }

    /// Batch variant: any matching concept makes the whole batch
    /// illustration-mandatory.
    pub fn requires_illustration_for_any<'a, I>(&self, concept_names: I) -> bool
    where
        I: IntoIterator<Item = &'a str>,
    {
        concept_names
            .into_iter()
            .any(|name| self.requires_illustration(name))
    }
}

const SVG_REQUIRED_INSTRUCTIONS: &str = r#"
🔴 **SVG 필수 생성**: 이 주제는 도형/그래프 관련이므로 SVG가 반드시 필요합니다!

**문제-그림 완벽 일치 원칙**:
1. 문제에서 언급하는 모든 점, 변, 각을 SVG에 정확히 표시
2. 문제에서 사용하는 기호/이름을 SVG에 동일하게 라벨링
3. 문제에서 주어진 수치나 각도를 SVG에 반드시 표시
4. 문제 상황과 100% 일치하는 도형/그래프 그리기

SVG 사양 (태블릿 화면 최적화):
- 뷰박스 사용: viewBox='0 0 400 300' width='100%' height='auto'
- 스타일: 검은색 선(stroke='#000' stroke-width='2'), 회색 채우기(fill='#f0f0f0')
- 텍스트: font-family='Arial' font-size='16'
- 격자, 축, 수치, 라벨 명확히 표시

🔴 **중요**: SVG 속성값에는 반드시 단일 인용부호(')를 사용하세요. 이중 인용부호(")는 JSON 파싱 오류를 일으킵니다!

**각도 표현 규칙**:
- 각도를 시각적으로 그리지 마세요 (호나 부채꼴 금지)
- 각의 꼭짓점과 두 변만 그리고 알파벳으로 표시 (예: "∠ABC" 텍스트 라벨)

**절대 금지**: svg_code를 null로 설정하지 마세요!"#;

const SVG_OPTIONAL_INSTRUCTIONS: &str = r#"
SVG 생성 판단:
- 순수 계산/대수 문제: svg_code를 null로 설정
- 시각적 요소가 조금이라도 있으면: SVG 생성

SVG 사양 (필요한 경우, 태블릿 최적화):
- 뷰박스 사용: viewBox='0 0 300 200' width='100%' height='auto'
- 스타일: 검은색 선(stroke='#000' stroke-width='2'), 회색 채우기(fill='#f0f0f0')
- 텍스트: font-family='Arial' font-size='14'

🔴 **중요**: SVG 속성값에는 반드시 단일 인용부호(')를 사용하세요!

**각도 표현**: 시각적 각도 그리기 금지, 알파벳 라벨만 사용"#;

/// Difficulty to requested sentence count. Accepts both the band labels
/// and the numeric difficulty used by the question bank.
fn sentence_requirement(difficulty: &str) -> &'static str {
    match difficulty {
        "하" | "1" | "2" => "1~2문장의 간단한 문제",
        "중" | "3" => "3문장 정도의 적당한 문제",
        "상" | "4" | "5" => "4문장 정도의 복합적인 문제",
        _ => "적당한 길이의 문제",
    }
}

/// Builds the user prompt for one generation attempt. Pure function of its
/// inputs, no side effects.
#[allow(clippy::too_many_arguments)]
pub fn build_question_prompt(
    grade: &str,
    term: &str,
    topic_name: &str,
    question_type: &str,
    difficulty: &str,
    existing_questions: &str,
    excluded_prefixes: &[String],
    rules: &IllustrationRules,
) -> String {
    let svg_instructions = if rules.requires_illustration(topic_name) {
        SVG_REQUIRED_INSTRUCTIONS
    } else {
        SVG_OPTIONAL_INSTRUCTIONS
    };

    let sentence_req = sentence_requirement(difficulty);

    let excluded_block = if excluded_prefixes.is_empty() {
        "없음".to_string()
    } else {
        excluded_prefixes
            .iter()
            .map(|p| format!("- {}", p))
            .collect::<Vec<_>>()
            .join("\n")
    };

    let response_format = format!(
        r#"응답 형식 (JSON):
{{
    "question_text": "문제 내용 (LaTeX 수식 포함)",
    "question_type": "{question_type}",
    "choices": ["① 선택지1", "② 선택지2", "③ 선택지3", "④ 선택지4", "⑤ 선택지5"] (선택형인 경우만),
    "correct_answer": "정답 (①~⑤ 또는 숫자/식)",
    "answer_explanation": "상세한 풀이 과정 (LaTeX 수식 포함)",
    "svg_code": "<svg>...</svg> 또는 null (문제 풀이에 시각 자료가 필요한 경우만)"
}}

**중요한 JSON 형식 주의사항:**
- LaTeX 수식에서 백슬래시(\)는 JSON에서 이중 백슬래시(\\)로 작성하세요
- 예: "\(" 대신 "\\(" 사용, "\frac" 대신 "\\frac" 사용
- JSON 문자열 내의 모든 백슬래시는 두 번씩 작성하세요
- SVG 코드도 마찬가지로 백슬래시를 이중으로 이스케이프하세요"#
    );

    format!(
        r#"다음 조건에 맞는 중학교 수학 문제를 생성해주세요:
- 학년: {grade} ({grade_desc})
- 학기: {term}학기
- 주제: {topic_name}
- 문제 유형: {question_type}
- 난이도: {difficulty} → {sentence_req}

제약조건:
- 명확한 정답이 있는 문제만 생성
- 선택형의 경우 5개 선택지 (①, ②, ③, ④, ⑤)
- 단답형의 경우 숫자나 간단한 식으로 답할 수 있는 문제
- LaTeX 수식 사용 권장
- **문제 길이**: {sentence_req} (난이도에 맞게 조절)
{svg_instructions}

기존 문제 스타일 참고:
{existing_questions}

이미 생성된 문제들 (중복 피하기):
{excluded_block}

**중요**: 위에 나열된 문제들과 다른 새로운 문제를 생성하세요. 계수나 상수를 바꾸어 다양한 문제를 만드세요.

{response_format}"#,
        grade_desc = grade_description(grade),
    )
}

/// System prompt for the RAG batch flow: exactly one four-choice question
/// per immutable context row.
pub fn build_rag_system_prompt(requires_svg: bool) -> String {
    let svg_instructions = if requires_svg {
        SVG_REQUIRED_INSTRUCTIONS
    } else {
        SVG_OPTIONAL_INSTRUCTIONS
    };

    format!(
        r#"당신은 한국 중학교 수학 문제 생성 전문가입니다.
주어진 불변 목록의 각 행에 대해 정확히 1문항씩 생성해야 합니다.

절대 준수 규칙:
1. 모든 문제는 반드시 객관식 4지 선택형으로 생성 (①②③④)
2. assessmentItemID와 concept_name은 입력과 동일해야 하며, 절대 변경하지 마세요
3. 각 개념의 범위를 벗어나는 지식은 사용하지 마세요
4. 근거가 부족한 경우 해당 행은 "skip": true로 표시하세요
5. 한국어로 작성하고, 필요시 LaTeX를 사용하세요
6. 서술형, 단답형, 빈칸형 등은 절대 생성하지 마세요 - 오직 객관식만!
{svg_instructions}

JSON 출력 형식:
[
  {{
    "assessmentItemID": "입력과 동일한 ID",
    "concept_name": "입력과 동일한 개념명",
    "question_text": "문제 내용",
    "choices": ["① ...", "② ...", "③ ...", "④ ..."],
    "answer": "①",
    "explanation": "풀이 설명",
    "svg_content": "SVG 코드 또는 null",
    "skip": false
  }}
]"#
    )
}

pub fn build_rag_user_prompt(context_block: &str, item_count: usize) -> String {
    format!(
        "다음 불변 목록을 기반으로 문제를 생성해주세요:\n\n{}\n\n각 행에 대해 정확히 1문항씩, 총 {}개의 문제를 JSON 배열로 반환해주세요.",
        context_block, item_count
    )
}

/// Immutable context block listing every allocation the model must cover,
/// one line per assessment item.
pub fn build_rag_context_block(
    items: &[AssessmentItem],
    difficulty_for: impl Fn(&AssessmentItem) -> String,
) -> String {
    let mut lines = vec!["불변 목록 (각 행당 정확히 1문항 생성):".to_string()];

    for (i, item) in items.iter().enumerate() {
        lines.push(format!(
            "[{}] ID={}, concept={}, chapter={}, grade={}, term={}학기, difficulty={}",
            i + 1,
            item.assessment_item_id,
            item.concept_name,
            item.chapter_name,
            grade_label(item.grade),
            item.term,
            difficulty_for(item),
        ));
    }

    lines.extend(
        [
            "",
            "정책 (필수 준수):",
            "- 각 행당 정확히 1문항, 동일 ID/동일 주제 유지",
            "- 객관식 4지, 한국어, LaTeX 허용",
            "- assessmentItemID와 concept_name 변경 금지",
            "- 개념 밖 지식 사용 금지, 근거 부족 시 해당 행은 skip:true",
            "- 난이도는 difficulty 정보를 참고하여 적절한 수준으로 생성 (상/중/하)",
            "- 목록 전체를 한 번에 JSON 배열로 반환 (skip 포함 가능)",
        ]
        .iter()
        .map(|s| s.to_string()),
    );

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, concept: &str) -> AssessmentItem {
        AssessmentItem {
            assessment_item_id: id.to_string(),
            concept_name: concept.to_string(),
            grade: 8,
            term: 1,
            chapter_name: format!("{} > 하위 단원", concept),
            difficulty_band: Some("중".to_string()),
        }
    }

    #[test]
    fn geometry_topic_requires_illustration() {
        let rules = IllustrationRules::default();
        assert!(rules.requires_illustration("삼각형의 외심"));
        assert!(rules.requires_illustration("일차함수의 그래프"));
        assert!(!rules.requires_illustration("유한소수 판별"));
    }

    #[test]
    fn illustration_block_follows_topic() {
        let rules = IllustrationRules::default();
        let geo = build_question_prompt("M2", "1", "삼각형의 내각", "선택형", "중", "", &[], &rules);
        assert!(geo.contains("SVG 필수 생성"));

        let calc = build_question_prompt("M2", "1", "소인수분해", "단답형", "중", "", &[], &rules);
        assert!(calc.contains("svg_code를 null로 설정"));
        assert!(!calc.contains("SVG 필수 생성"));
    }

    #[test]
    fn excluded_prefixes_are_listed() {
        let rules = IllustrationRules::default();
        let excluded = vec!["일차함수 y = 2x + 1 에서".to_string()];
        let prompt = build_question_prompt(
            "M2", "1", "일차함수", "선택형", "중", "", &excluded, &rules,
        );
        assert!(prompt.contains("- 일차함수 y = 2x + 1 에서"));

        let empty = build_question_prompt("M2", "1", "일차함수", "선택형", "중", "", &[], &rules);
        assert!(empty.contains("없음"));
    }

    #[test]
    fn five_choice_constraint_is_stated() {
        let rules = IllustrationRules::default();
        let prompt = build_question_prompt("M2", "1", "확률", "선택형", "상", "", &[], &rules);
        assert!(prompt.contains("5개 선택지"));
        assert!(prompt.contains("4문장"));
    }

    #[test]
    fn rag_context_block_lists_every_item() {
        let items = vec![item("A001", "이차방정식"), item("A002", "일차함수")];
        let block = build_rag_context_block(&items, |_| "중".to_string());
        assert!(block.contains("[1] ID=A001"));
        assert!(block.contains("[2] ID=A002"));
        assert!(block.contains("grade=중2"));
        assert!(block.contains("assessmentItemID와 concept_name 변경 금지"));
    }

    #[test]
    fn rag_system_prompt_enforces_four_choices() {
        let prompt = build_rag_system_prompt(false);
        assert!(prompt.contains("객관식 4지"));
        assert!(prompt.contains("skip"));
    }
}
