use serde::{Deserialize, Serialize};

/// One ranked match, hydrated from the collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: u64,
    pub media_ref: String,
    pub page_url: String,
    pub score: usize,
}

#[derive(Debug, Deserialize)]
pub struct PicsParams {
    #[serde(default)]
    pub search: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SearchResponse {
    pub query: String,
    pub count: usize,
    pub results: Vec<SearchHit>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SearchErrorResponse {
    pub error: String,
}
