//! Concept selection and assessment-item allocation for the RAG flow.
//!
//! Concepts are ranked by distance from the centre of the "productive
//! difficulty" accuracy band: items a learner gets right 55-70% of the time
//! carry the most learning signal, so the closest concepts win over a plain
//! top-N.

use crate::error::Result;
use crate::models::retrieval::{AssessmentItem, ConceptAccuracy};
use sqlx::PgPool;
use std::collections::HashSet;

/// Centre of the 0.55-0.70 target accuracy band.
pub const TARGET_ACCURACY: f64 = 0.625;
pub const TARGET_ACCURACY_RANGE: &str = "0.55-0.70";

pub const RAG_TOP_CONCEPTS: usize = 3;
pub const RAG_TARGET_COUNT: usize = 6;

/// Hierarchical chapter labels truncate at the first separator:
/// `이차방정식 > 이차방정식 > 제곱근을 이용한 풀이` → `이차방정식`.
pub fn primary_chapter(chapter_name: &str) -> &str {
    chapter_name
        .split('>')
        .next()
        .map(str::trim)
        .unwrap_or(chapter_name)
}

/// Ranks aggregates by absolute distance from the target accuracy and keeps
/// the closest `top_k`. The sort is stable, so equidistant concepts keep
/// their input order.
pub fn rank_by_accuracy_target(
    mut concepts: Vec<ConceptAccuracy>,
    top_k: usize,
) -> Vec<ConceptAccuracy> {
    concepts.sort_by(|a, b| {
        let da = (a.avg_correct_rate - TARGET_ACCURACY).abs();
        let db = (b.avg_correct_rate - TARGET_ACCURACY).abs();
        da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
    });
    concepts.truncate(top_k);
    concepts
}

/// Balanced downsampling when more items were collected than needed:
/// each concept gets `target / concepts` items, the first
/// `target % concepts` concepts (in encountered order) one extra, so no
/// single concept dominates the batch.
pub fn balance_items_by_concept(all_items: Vec<AssessmentItem>, target: usize) -> Vec<AssessmentItem> {
    let mut concept_order: Vec<String> = Vec::new();
    for item in &all_items {
        if !concept_order.contains(&item.concept_name) {
            concept_order.push(item.concept_name.clone());
        }
    }
    if concept_order.is_empty() {
        return all_items;
    }

    let base = target / concept_order.len();
    let remainder = target % concept_order.len();

    let mut balanced = Vec::with_capacity(target);
    for (i, concept) in concept_order.iter().enumerate() {
        let take = if i < remainder { base + 1 } else { base };
        balanced.extend(
            all_items
                .iter()
                .filter(|item| &item.concept_name == concept)
                .take(take)
                .cloned(),
        );
        if balanced.len() >= target {
            break;
        }
    }
    balanced.truncate(target);
    balanced
}

/// Appends backfill candidates and truncates to the exact target count.
pub fn append_backfill(
    mut existing: Vec<AssessmentItem>,
    additional: Vec<AssessmentItem>,
    target: usize,
) -> Vec<AssessmentItem> {
    existing.extend(additional);
    existing.truncate(target);
    existing
}

#[derive(Clone)]
pub struct RetrievalService {
    pool: PgPool,
}

impl RetrievalService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Top-k concepts for a grade, by primary-chapter average correctness
    /// closest to the target band centre.
    pub async fn top_concepts_by_accuracy(
        &self,
        grade: i32,
        top_k: usize,
    ) -> Result<Vec<ConceptAccuracy>> {
        let aggregates = sqlx::query_as::<_, ConceptAccuracy>(
            r#"
            SELECT
                trim(split_part(chapter_name, '>', 1)) AS primary_chapter,
                avg(CASE WHEN is_correct THEN 1.0 ELSE 0.0 END)::float8 AS avg_correct_rate,
                count(*) AS item_count
            FROM learner_item_view
            WHERE grade = $1
              AND chapter_name IS NOT NULL
              AND trim(split_part(chapter_name, '>', 1)) <> ''
            GROUP BY 1
            HAVING count(*) >= 1
            "#,
        )
        .bind(grade)
        .fetch_all(&self.pool)
        .await?;

        tracing::info!(
            grade,
            concepts = aggregates.len(),
            "aggregated per-chapter accuracy"
        );
        Ok(rank_by_accuracy_target(aggregates, top_k))
    }

    /// Collects assessment items for the selected concepts and reconciles
    /// the pool to exactly `target` entries: truncation through balanced
    /// sampling when over, backfill from unused concepts when under.
    /// A concept contributing zero items is not an error here; only the
    /// final pool size matters upstream.
    pub async fn collect_assessment_items(
        &self,
        grade: i32,
        concepts: &[ConceptAccuracy],
        target: usize,
    ) -> Result<Vec<AssessmentItem>> {
        let mut all_items: Vec<AssessmentItem> = Vec::new();

        for concept in concepts {
            let rows = sqlx::query_as::<_, AssessmentItem>(
                r#"
                SELECT DISTINCT
                    assessment_item_id, concept_name, grade, term, chapter_name, difficulty_band
                FROM learner_item_view
                WHERE grade = $1
                  AND (chapter_name LIKE $2 || ' > %' OR chapter_name = $2)
                ORDER BY assessment_item_id
                "#,
            )
            .bind(grade)
            .bind(&concept.primary_chapter)
            .fetch_all(&self.pool)
            .await?;

            tracing::info!(
                chapter = %concept.primary_chapter,
                found = rows.len(),
                "collected assessment items for chapter"
            );
            all_items.extend(rows);
        }

        match all_items.len().cmp(&target) {
            std::cmp::Ordering::Equal => Ok(all_items),
            std::cmp::Ordering::Greater => {
                tracing::info!(
                    collected = all_items.len(),
                    target,
                    "too many items, applying balanced sampling"
                );
                Ok(balance_items_by_concept(all_items, target))
            }
            std::cmp::Ordering::Less => {
                tracing::info!(
                    collected = all_items.len(),
                    target,
                    "too few items, backfilling from unused concepts"
                );
                let additional = self
                    .additional_items(grade, &all_items, target - all_items.len())
                    .await?;
                Ok(append_backfill(all_items, additional, target))
            }
        }
    }

    /// Backfill: items from concepts not already in the pool, ordered by
    /// item identifier, exactly the shortfall.
    async fn additional_items(
        &self,
        grade: i32,
        existing: &[AssessmentItem],
        needed: usize,
    ) -> Result<Vec<AssessmentItem>> {
        let used_concepts: Vec<String> = existing
            .iter()
            .map(|item| item.concept_name.clone())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();

        let rows = sqlx::query_as::<_, AssessmentItem>(
            r#"
            SELECT DISTINCT
                assessment_item_id, concept_name, grade, term, chapter_name, difficulty_band
            FROM learner_item_view
            WHERE grade = $1
              AND concept_name <> ALL($2)
            ORDER BY assessment_item_id
            LIMIT $3
            "#,
        )
        .bind(grade)
        .bind(&used_concepts)
        .bind(needed as i64)
        .fetch_all(&self.pool)
        .await?;

        tracing::info!(found = rows.len(), needed, "backfill items fetched");
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn concept(chapter: &str, rate: f64, count: i64) -> ConceptAccuracy {
        ConceptAccuracy {
            primary_chapter: chapter.to_string(),
            avg_correct_rate: rate,
            item_count: count,
        }
    }

    fn item(id: &str, concept: &str) -> AssessmentItem {
        AssessmentItem {
            assessment_item_id: id.to_string(),
            concept_name: concept.to_string(),
            grade: 8,
            term: 1,
            chapter_name: format!("{} > 하위", concept),
            difficulty_band: None,
        }
    }

    #[test]
    fn primary_chapter_truncates_at_first_separator() {
        assert_eq!(
            primary_chapter("이차방정식 > 이차방정식 > 제곱근을 이용한 풀이"),
            "이차방정식"
        );
        assert_eq!(primary_chapter("확률"), "확률");
    }

    #[test]
    fn ranking_prefers_accuracy_closest_to_target() {
        let concepts = vec![
            concept("a", 0.50, 10),
            concept("b", 0.625, 10),
            concept("c", 0.70, 10),
            concept("d", 0.90, 10),
        ];
        let ranked = rank_by_accuracy_target(concepts, 2);
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].primary_chapter, "b");
        assert_eq!(ranked[1].primary_chapter, "c");
    }

    #[test]
    fn ranking_tie_break_is_stable() {
        // 0.55 and 0.70 are equidistant from 0.625; input order decides.
        let concepts = vec![concept("x", 0.70, 5), concept("y", 0.55, 5)];
        let ranked = rank_by_accuracy_target(concepts, 2);
        assert_eq!(ranked[0].primary_chapter, "x");
        assert_eq!(ranked[1].primary_chapter, "y");
    }

    #[test]
    fn balanced_sampling_represents_every_concept() {
        // 2 + 2 + 5 items, target 6: every concept keeps exactly 2.
        let items = vec![
            item("a1", "A"),
            item("a2", "A"),
            item("b1", "B"),
            item("b2", "B"),
            item("c1", "C"),
            item("c2", "C"),
            item("c3", "C"),
            item("c4", "C"),
            item("c5", "C"),
        ];
        let balanced = balance_items_by_concept(items, 6);
        assert_eq!(balanced.len(), 6);
        let ids: Vec<&str> = balanced
            .iter()
            .map(|i| i.assessment_item_id.as_str())
            .collect();
        assert_eq!(ids, vec!["a1", "a2", "b1", "b2", "c1", "c2"]);
    }

    #[test]
    fn remainder_goes_to_earlier_concepts() {
        // 2 concepts, target 5: first gets 3, second gets 2.
        let items = vec![
            item("a1", "A"),
            item("a2", "A"),
            item("a3", "A"),
            item("a4", "A"),
            item("b1", "B"),
            item("b2", "B"),
            item("b3", "B"),
        ];
        let balanced = balance_items_by_concept(items, 5);
        let a_count = balanced.iter().filter(|i| i.concept_name == "A").count();
        let b_count = balanced.iter().filter(|i| i.concept_name == "B").count();
        assert_eq!((a_count, b_count), (3, 2));
    }

    #[test]
    fn backfill_reaches_exact_target() {
        let existing = vec![
            item("a1", "A"),
            item("a2", "A"),
            item("b1", "B"),
            item("b2", "B"),
        ];
        let additional = vec![item("c1", "C"), item("c2", "C")];
        let merged = append_backfill(existing, additional, 6);
        assert_eq!(merged.len(), 6);
        assert_eq!(merged[4].concept_name, "C");
    }
}
