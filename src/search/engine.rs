use super::normalizer::Normalizer;
use super::types::SearchHit;
use crate::storage::index::{Index, Indexer};
use crate::storage::store::Store;
use crate::storage::types::StoreResult;

use std::collections::HashMap;
use std::sync::Arc;

/// Upper bound on the number of ranked ids a query returns.
pub const MAX_RESULTS: usize = 10;

/// Ranks ids by how many postings entries the query terms hit.
///
/// Every occurrence counts, so an id listed twice under one term scores twice.
/// Ties are broken by ascending id.
pub fn search(query: &str, index: &Index, normalizer: &Normalizer) -> Vec<u64> {
    rank(query, index, normalizer)
        .into_iter()
        .map(|(id, _)| id)
        .collect()
}

/// Same as [`search`] but keeps the hit count alongside each id.
pub fn rank(query: &str, index: &Index, normalizer: &Normalizer) -> Vec<(u64, usize)> {
    let query_terms = normalizer.normalize(query);

    let mut scores: HashMap<u64, usize> = HashMap::new();
    for term in &query_terms {
        if let Some(postings) = index.postings(term) {
            for id in postings {
                *scores.entry(*id).or_insert(0) += 1;
            }
        }
    }

    let mut ranked: Vec<(u64, usize)> = scores.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.truncate(MAX_RESULTS);
    ranked
}

/// Serves queries against the persisted index and resolves ids to media refs.
pub struct SearchEngine {
    normalizer: Arc<Normalizer>,
    store: Arc<Store>,
    indexer: Indexer,
    source_url: String,
}

impl SearchEngine {
    pub fn new(
        normalizer: Arc<Normalizer>,
        store: Arc<Store>,
        indexer: Indexer,
        source_url: &str,
    ) -> Self {
        Self {
            normalizer,
            store,
            indexer,
            source_url: source_url.trim_end_matches('/').to_string(),
        }
    }

    /// Ranked ids for `query`, read against the index artifact as it is on disk now.
    pub async fn search_ids(&self, query: &str) -> StoreResult<Vec<u64>> {
        let index = self.indexer.load().await?;
        Ok(search(query, &index, &self.normalizer))
    }

    /// Ranked hits with media references.
    ///
    /// Ids that are indexed but missing from the collection are skipped.
    pub async fn search_media(&self, query: &str) -> StoreResult<Vec<SearchHit>> {
        let index = self.indexer.load().await?;
        let ranked = rank(query, &index, &self.normalizer);
        if ranked.is_empty() {
            return Ok(Vec::new());
        }

        let items: HashMap<u64, String> = self
            .store
            .get_all()
            .await?
            .into_iter()
            .map(|item| (item.id, item.media_ref))
            .rev()
            .collect();

        let mut hits = Vec::with_capacity(ranked.len());
        for (id, score) in ranked {
            match items.get(&id) {
                Some(media_ref) => hits.push(SearchHit {
                    id,
                    media_ref: media_ref.clone(),
                    page_url: format!("{}/{}/", self.source_url, id),
                    score,
                }),
                None => tracing::warn!("Indexed comic {} is missing from the collection", id),
            }
        }

        Ok(hits)
    }
}
