use indexmap::IndexMap;
use mongodb::bson::{DateTime, oid::ObjectId};
use serde::{Deserialize, Serialize};

pub const NO_TITLE: &str = "No Title";
pub const NO_ALT_TEXT: &str = "No alt text";

/// Structured extraction result for one fetched page, with the pages it led to.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PageRecord {
    pub url: String,
    /// `None` when the document has a `<title>` element with no text in it.
    pub title: Option<String>,
    #[serde(default)]
    pub meta: IndexMap<String, String>,
    #[serde(default)]
    pub headings: Headings,
    #[serde(default)]
    pub links: Vec<Link>,
    #[serde(default)]
    pub images: Vec<Image>,
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub child_pages: Vec<PageRecord>,
}

impl PageRecord {
    /// Number of records in this subtree, including this one.
    pub fn page_count(&self) -> usize {
        1 + self.child_pages.iter().map(PageRecord::page_count).sum::<usize>()
    }

    /// Depth of the deepest record below this one; a leaf has depth 0.
    pub fn tree_depth(&self) -> usize {
        self.child_pages
            .iter()
            .map(|child| child.tree_depth() + 1)
            .max()
            .unwrap_or(0)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct Headings {
    pub h1: Vec<String>,
    pub h2: Vec<String>,
    pub h3: Vec<String>,
    pub h4: Vec<String>,
    pub h5: Vec<String>,
    pub h6: Vec<String>,
}

impl Headings {
    /// Mutable access to the list for heading level `1..=6`.
    pub fn level_mut(&mut self, level: u8) -> Option<&mut Vec<String>> {
        match level {
            1 => Some(&mut self.h1),
            2 => Some(&mut self.h2),
            3 => Some(&mut self.h3),
            4 => Some(&mut self.h4),
            5 => Some(&mut self.h5),
            6 => Some(&mut self.h6),
            _ => None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub text: String,
    pub url: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Image {
    pub src: String,
    pub alt: String,
}

/// Shapes `scraped_data` has been stored in. Current writes always use `Page`;
/// the others are read for documents written by older ingestion code. A
/// `Wrapped` value is unwrapped one level only.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum ScrapedData {
    Page(Box<PageRecord>),
    Wrapped { scraped_data: Box<ScrapedData> },
    Loose {
        #[serde(default)]
        text: String,
    },
    Text(String),
    Other(serde_json::Value),
}

impl ScrapedData {
    pub fn text(&self) -> &str {
        match self {
            ScrapedData::Wrapped { scraped_data } => match scraped_data.as_ref() {
                ScrapedData::Wrapped { .. } => "",
                inner => inner.text(),
            },
            ScrapedData::Page(page) => &page.text,
            ScrapedData::Loose { text } | ScrapedData::Text(text) => text,
            ScrapedData::Other(_) => "",
        }
    }

    /// Pages in the stored tree; entries without a page record count as none.
    pub fn page_count(&self) -> usize {
        match self {
            ScrapedData::Page(page) => page.page_count(),
            ScrapedData::Wrapped { scraped_data } => match scraped_data.as_ref() {
                ScrapedData::Page(page) => page.page_count(),
                _ => 0,
            },
            _ => 0,
        }
    }
}

/// One stored crawl: the knowledge base a chatbot answers from.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct KnowledgeEntry {
    #[serde(rename = "_id")]
    pub id: ObjectId,

    pub user_id: String,
    pub web_url: String,
    pub scraped_data: ScrapedData,
    #[serde(default = "DateTime::now")]
    pub scraped_at: DateTime,
}

impl KnowledgeEntry {
    pub fn new(user_id: String, web_url: String, page: PageRecord) -> KnowledgeEntry {
        KnowledgeEntry {
            id: ObjectId::new(),
            user_id,
            web_url,
            scraped_data: ScrapedData::Page(Box::new(page)),
            scraped_at: DateTime::now(),
        }
    }

    /// Text the chat side builds its LLM context from.
    pub fn context_text(&self) -> &str {
        self.scraped_data.text()
    }
}

const PARAGRAPH_WIDTH: usize = 300;
const PLACEHOLDER: &str = "...";

/// Condenses crawled text into an LLM-sized context: every newline-separated
/// paragraph is whitespace-collapsed and shortened to 300 characters on a word
/// boundary, paragraphs are joined by spaces, and the result is capped at
/// `max_len` characters.
pub fn preprocess_context(content: &str, max_len: usize) -> String {
    let concise = content
        .split('\n')
        .map(|paragraph| shorten(paragraph, PARAGRAPH_WIDTH))
        .collect::<Vec<_>>()
        .join(" ");
    concise.chars().take(max_len).collect()
}

fn shorten(paragraph: &str, width: usize) -> String {
    let words: Vec<&str> = paragraph.split_whitespace().collect();
    let collapsed = words.join(" ");
    if collapsed.chars().count() <= width {
        return collapsed;
    }

    let budget = width - PLACEHOLDER.len();
    let mut out = String::new();
    for word in words {
        let extra = if out.is_empty() { 0 } else { 1 } + word.chars().count();
        if out.chars().count() + extra > budget {
            break;
        }
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(word);
    }
    out.push_str(PLACEHOLDER);
    out
}
