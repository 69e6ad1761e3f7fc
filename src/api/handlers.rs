use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use mongodb::bson::oid::ObjectId;
use serde_json::{Value, json};

use crate::crawler::{CrawlError, parse_root};
use crate::data_models::{KnowledgeEntry, preprocess_context};
use crate::db::KnowledgeStore;

use super::AppState;
use super::error::ApiError;
use super::models::{KnowledgeResponse, KnowledgeSummary, ScrapeRequest, ScrapeResponse};

const MAX_CONTEXT_LEN: usize = 8192;

pub async fn scrape_handler<S: KnowledgeStore>(
    State(state): State<Arc<AppState<S>>>,
    Json(request): Json<ScrapeRequest>,
) -> Result<Json<ScrapeResponse>, ApiError> {
    if request.user_id.trim().is_empty() {
        return Err(ApiError::BadRequest("user_id cannot be empty".to_string()));
    }
    parse_root(&request.website_url).map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let cancel = state.shutdown.child_token();
    let outcome = state
        .crawler
        .crawl(&request.website_url, &cancel)
        .await
        .map_err(|e| match e {
            CrawlError::InvalidRoot { .. } => ApiError::BadRequest(e.to_string()),
            other => {
                tracing::error!("scrape of {} failed: {other}", request.website_url);
                ApiError::ScrapeFailed
            }
        })?;

    let entry = KnowledgeEntry::new(request.user_id, request.website_url, outcome.root);
    state.store.insert(&entry).await.map_err(|e| {
        tracing::error!("storing scrape of {} failed: {e:#}", entry.web_url);
        ApiError::StoreFailed
    })?;

    Ok(Json(ScrapeResponse {
        message: "Website scraped successfully".to_string(),
        scraped_data: entry.scraped_data,
    }))
}

pub async fn knowledge_handler<S: KnowledgeStore>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<KnowledgeResponse>, ApiError> {
    let id = ObjectId::parse_str(&id)
        .map_err(|_| ApiError::BadRequest("Invalid chatbot ID format".to_string()))?;

    let entry = state
        .store
        .find_by_id(id)
        .await
        .map_err(|e| ApiError::Internal(format!("{e:#}")))?
        .ok_or_else(|| ApiError::NotFound("Chatbot not found".to_string()))?;

    let context = preprocess_context(entry.context_text(), MAX_CONTEXT_LEN);
    if context.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "Scraped content is empty. Cannot proceed with chat.".to_string(),
        ));
    }

    Ok(Json(KnowledgeResponse {
        id: entry.id.to_hex(),
        user_id: entry.user_id,
        web_url: entry.web_url,
        context,
    }))
}

/// Knowledge bases stored for one user, oldest first.
pub async fn user_knowledge_handler<S: KnowledgeStore>(
    State(state): State<Arc<AppState<S>>>,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<KnowledgeSummary>>, ApiError> {
    let mut entries = state
        .store
        .find_by_user(&user_id)
        .await
        .map_err(|e| ApiError::Internal(format!("{e:#}")))?;
    entries.sort_by_key(|entry| entry.scraped_at);

    let summaries = entries
        .into_iter()
        .map(|entry| KnowledgeSummary {
            id: entry.id.to_hex(),
            pages: entry.scraped_data.page_count(),
            scraped_at: entry
                .scraped_at
                .try_to_rfc3339_string()
                .unwrap_or_default(),
            web_url: entry.web_url,
        })
        .collect();
    Ok(Json(summaries))
}

pub async fn health_handler() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
