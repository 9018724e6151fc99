use crate::error::Result;
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// In-memory mirror of the `concept_tags` table.
#[derive(Debug, Default, Clone)]
pub struct ConceptMaps {
    /// knowledge_tag -> concept_name
    pub tag_to_concept: HashMap<String, String>,
    /// concept_name -> knowledge_tag
    pub concept_to_tag: HashMap<String, String>,
}

#[derive(sqlx::FromRow)]
struct ConceptTagRow {
    knowledge_tag: String,
    concept_name: String,
}

/// Lazily loaded, process-wide cache of concept/tag mappings. The table is
/// small and effectively static, so a single load per process is enough;
/// `refresh` exists for operational use.
#[derive(Clone)]
pub struct ConceptCache {
    pool: PgPool,
    maps: Arc<RwLock<Option<Arc<ConceptMaps>>>>,
}

impl ConceptCache {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            maps: Arc::new(RwLock::new(None)),
        }
    }

    async fn load(&self) -> Result<Arc<ConceptMaps>> {
        if let Some(maps) = self.maps.read().await.as_ref() {
            return Ok(Arc::clone(maps));
        }

        let mut guard = self.maps.write().await;
        // Another task may have loaded while we waited on the write lock.
        if let Some(maps) = guard.as_ref() {
            return Ok(Arc::clone(maps));
        }

        let rows = sqlx::query_as::<_, ConceptTagRow>(
            "SELECT knowledge_tag, concept_name FROM concept_tags",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut maps = ConceptMaps::default();
        for row in rows {
            maps.tag_to_concept
                .insert(row.knowledge_tag.clone(), row.concept_name.clone());
            maps.concept_to_tag.insert(row.concept_name, row.knowledge_tag);
        }
        tracing::info!(concepts = maps.concept_to_tag.len(), "concept cache loaded");

        let maps = Arc::new(maps);
        *guard = Some(Arc::clone(&maps));
        Ok(maps)
    }

    pub async fn knowledge_tag_for(&self, concept_name: &str) -> Result<Option<String>> {
        let maps = self.load().await?;
        Ok(maps.concept_to_tag.get(concept_name).cloned())
    }

    pub async fn concept_for_tag(&self, knowledge_tag: &str) -> Result<Option<String>> {
        let maps = self.load().await?;
        Ok(maps.tag_to_concept.get(knowledge_tag).cloned())
    }

    /// Drops the cached maps so the next lookup reloads from the database.
    pub async fn refresh(&self) {
        *self.maps.write().await = None;
    }

    /// Curriculum concept name for a question-bank topic, where one exists.
    /// This is a per-row attribute rather than part of the tag table, so it
    /// is read directly instead of being cached.
    pub async fn mapped_concept_name(&self, topic_name: &str) -> Result<Option<String>> {
        let row: Option<(Option<String>,)> = sqlx::query_as(
            "SELECT ai_concept_name FROM question_bank WHERE topic_name = $1 LIMIT 1",
        )
        .bind(topic_name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.and_then(|(name,)| name))
    }
}
