use serde::{Deserialize, Serialize};

use crate::data_models::ScrapedData;

#[derive(Debug, Deserialize)]
pub struct ScrapeRequest {
    pub user_id: String,
    pub website_url: String,
}

#[derive(Debug, Serialize)]
pub struct ScrapeResponse {
    pub message: String,
    pub scraped_data: ScrapedData,
}

#[derive(Debug, Serialize)]
pub struct KnowledgeResponse {
    pub id: String,
    pub user_id: String,
    pub web_url: String,
    pub context: String,
}

#[derive(Debug, Serialize)]
pub struct KnowledgeSummary {
    pub id: String,
    pub web_url: String,
    pub pages: usize,
    pub scraped_at: String,
}
