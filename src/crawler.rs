use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use nanoid::nanoid;
use reqwest::Url;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::config::CrawlSettings;
use crate::data_models::PageRecord;
use crate::extractor::extract;
use crate::fetcher::{FetchError, Fetcher};

#[derive(Debug, thiserror::Error)]
pub enum CrawlError {
    #[error("invalid root url {url:?}: {reason}")]
    InvalidRoot { url: String, reason: String },
    #[error("root page {url} could not be scraped: {source}")]
    RootUnreachable {
        url: Url,
        #[source]
        source: FetchError,
    },
    #[error("crawl was cancelled before the root page was scraped")]
    Cancelled,
    #[error("crawl task failed: {0}")]
    Task(#[from] JoinError),
}

#[derive(Debug, Clone, Default)]
pub struct CrawlStats {
    pub pages_scraped: usize,
    pub pages_failed: usize,
    pub links_discovered: usize,
    pub elapsed: Duration,
    /// `false` when cancellation or the deadline cut the crawl short.
    pub complete: bool,
}

#[derive(Debug, Clone)]
pub struct CrawlOutcome {
    pub root: PageRecord,
    pub stats: CrawlStats,
}

/// Parses a crawl root, accepting only absolute http(s) URLs.
pub fn parse_root(url: &str) -> Result<Url, CrawlError> {
    let parsed = Url::parse(url.trim()).map_err(|e| CrawlError::InvalidRoot {
        url: url.to_string(),
        reason: e.to_string(),
    })?;
    match parsed.scheme() {
        "http" | "https" if parsed.host_str().is_some() => Ok(parsed),
        scheme => Err(CrawlError::InvalidRoot {
            url: url.to_string(),
            reason: format!("unsupported scheme or missing host ({scheme})"),
        }),
    }
}

/// Depth-bounded, same-origin site crawler producing a nested page tree.
///
/// Pages are claimed in depth-first order: a page's links are walked in the
/// order they appear, and a link is expanded only if its URL has not been
/// claimed yet and its depth is within `max_depth`. Fetches run ahead of the
/// walk: as soon as a page is extracted, its eligible links are fetched in
/// the background, at most `concurrency` at a time. Each URL is requested at
/// most once, and the tree is the same whatever the concurrency.
#[derive(Debug, Clone)]
pub struct Crawler {
    fetcher: Fetcher,
    max_depth: usize,
    concurrency: usize,
    deadline: Option<Duration>,
}

impl Crawler {
    pub fn new(fetcher: Fetcher, settings: &CrawlSettings) -> Crawler {
        Crawler {
            fetcher,
            max_depth: settings.max_depth,
            concurrency: settings.concurrency.max(1),
            deadline: settings.deadline,
        }
    }

    pub fn from_settings(settings: &CrawlSettings) -> reqwest::Result<Crawler> {
        Ok(Crawler::new(Fetcher::new(settings)?, settings))
    }

    /// Crawls the site rooted at `root_url`.
    ///
    /// Fails if the root itself cannot be scraped. When `cancel` fires or the
    /// deadline passes after the root page was scraped, in-flight fetches are
    /// aborted and the tree built so far is returned with
    /// `stats.complete == false`.
    pub async fn crawl(
        &self,
        root_url: &str,
        cancel: &CancellationToken,
    ) -> Result<CrawlOutcome, CrawlError> {
        let root = parse_root(root_url)?;
        let crawl_id = nanoid!(8);
        let span = tracing::info_span!("crawl", id = %crawl_id, root = %root);
        self.crawl_from(root, cancel).instrument(span).await
    }

    async fn crawl_from(
        &self,
        root: Url,
        cancel: &CancellationToken,
    ) -> Result<CrawlOutcome, CrawlError> {
        let started = Instant::now();
        let deadline = self.deadline.map(|d| tokio::time::Instant::from_std(started + d));
        let mut state = CrawlState::new(self, root.clone(), cancel.clone(), deadline);

        state.claim(root.as_str());
        let root_page = match state.take(root.clone()).await {
            Taken::Page(page) => page,
            Taken::Failed(source) => {
                tracing::warn!("root page failed: {source}");
                return Err(CrawlError::RootUnreachable { url: root, source });
            }
            Taken::Panicked(e) => return Err(CrawlError::Task(e)),
            Taken::Interrupted => {
                state.abort_in_flight();
                return Err(CrawlError::Cancelled);
            }
        };
        state.scraped(&root_page, 0);

        let mut stack = vec![Frame::new(root_page, 0)];
        let complete = loop {
            let Some(top) = stack.last_mut() else {
                break true;
            };
            let depth = top.depth + 1;
            let Some(url) = top.next_link() else {
                if stack.len() == 1 {
                    break true;
                }
                close_top(&mut stack);
                continue;
            };
            if depth > self.max_depth || !state.claim(&url) {
                continue;
            }
            let Ok(url) = Url::parse(&url) else {
                continue;
            };

            match state.take(url).await {
                Taken::Page(page) => {
                    state.scraped(&page, depth);
                    stack.push(Frame::new(page, depth));
                }
                Taken::Failed(e) => {
                    tracing::warn!("error while scraping: {e}");
                    state.stats.pages_failed += 1;
                }
                Taken::Panicked(e) => {
                    tracing::error!("fetch task panicked: {e}");
                    state.stats.pages_failed += 1;
                }
                Taken::Interrupted => break false,
            }
        };
        state.abort_in_flight();

        let root = fold(stack).ok_or(CrawlError::Cancelled)?;
        let mut stats = state.stats;
        stats.elapsed = started.elapsed();
        stats.complete = complete;

        if complete {
            tracing::info!(
                "crawl finished: {} pages scraped, {} failed, {} links in {:.2}s",
                stats.pages_scraped,
                stats.pages_failed,
                stats.links_discovered,
                stats.elapsed.as_secs_f64()
            );
        } else {
            tracing::warn!(
                "crawl interrupted after {} pages; returning partial tree",
                stats.pages_scraped
            );
        }
        Ok(CrawlOutcome { root, stats })
    }
}

/// A page whose links are being walked, and the children gathered so far.
struct Frame {
    page: PageRecord,
    depth: usize,
    cursor: usize,
}

impl Frame {
    fn new(page: PageRecord, depth: usize) -> Frame {
        Frame {
            page,
            depth,
            cursor: 0,
        }
    }

    fn next_link(&mut self) -> Option<String> {
        let link = self.page.links.get(self.cursor)?;
        self.cursor += 1;
        Some(link.url.clone())
    }
}

/// Moves the top frame's page into its parent's `child_pages`.
fn close_top(stack: &mut Vec<Frame>) {
    if let Some(frame) = stack.pop() {
        match stack.last_mut() {
            Some(parent) => parent.page.child_pages.push(frame.page),
            None => stack.push(frame),
        }
    }
}

/// Collapses every open frame into the root, keeping whatever each gathered.
fn fold(mut stack: Vec<Frame>) -> Option<PageRecord> {
    while stack.len() > 1 {
        close_top(&mut stack);
    }
    stack.pop().map(|frame| frame.page)
}

enum Taken {
    Page(PageRecord),
    Failed(FetchError),
    Panicked(JoinError),
    Interrupted,
}

type FetchTask = JoinHandle<Result<PageRecord, FetchError>>;

/// Everything one crawl owns: the claimed and requested URL sets and the
/// fetches running ahead of the walk.
struct CrawlState {
    fetcher: Fetcher,
    root: Url,
    max_depth: usize,
    permits: Arc<Semaphore>,
    cancel: CancellationToken,
    deadline: Option<tokio::time::Instant>,
    visited: HashSet<String>,
    requested: HashSet<String>,
    in_flight: HashMap<String, FetchTask>,
    stats: CrawlStats,
}

impl CrawlState {
    fn new(
        crawler: &Crawler,
        root: Url,
        cancel: CancellationToken,
        deadline: Option<tokio::time::Instant>,
    ) -> CrawlState {
        CrawlState {
            fetcher: crawler.fetcher.clone(),
            root,
            max_depth: crawler.max_depth,
            permits: Arc::new(Semaphore::new(crawler.concurrency)),
            cancel,
            deadline,
            visited: HashSet::new(),
            requested: HashSet::new(),
            in_flight: HashMap::new(),
            stats: CrawlStats::default(),
        }
    }

    /// Marks `url` visited; `false` if it already was.
    fn claim(&mut self, url: &str) -> bool {
        self.visited.insert(url.to_string())
    }

    /// Records a scraped page and starts fetching the links it may expand.
    fn scraped(&mut self, page: &PageRecord, depth: usize) {
        tracing::info!("scraped {} at depth {depth}", page.url);
        self.stats.pages_scraped += 1;
        self.stats.links_discovered += page.links.len();

        if depth + 1 > self.max_depth {
            return;
        }
        for link in &page.links {
            if self.visited.contains(&link.url) || self.requested.contains(&link.url) {
                continue;
            }
            if let Ok(url) = Url::parse(&link.url) {
                self.request(url);
            }
        }
    }

    fn request(&mut self, url: Url) {
        let key = url.to_string();
        if !self.requested.insert(key.clone()) {
            return;
        }

        let fetcher = self.fetcher.clone();
        let permits = self.permits.clone();
        let root = self.root.clone();
        let task = async move {
            // the semaphore is never closed
            let _permit = permits.acquire_owned().await.ok();
            tracing::debug!("fetching {url}");
            let doc = fetcher.fetch(&url).await?;
            Ok(extract(&doc.body, &url, &root))
        };
        let handle = tokio::spawn(task.instrument(tracing::Span::current()));
        self.in_flight.insert(key, handle);
    }

    /// Waits for the fetch of a claimed URL, starting it if nothing has yet.
    async fn take(&mut self, url: Url) -> Taken {
        let key = url.to_string();
        if !self.in_flight.contains_key(&key) {
            self.requested.remove(&key);
            self.request(url);
        }
        let Some(mut handle) = self.in_flight.remove(&key) else {
            return Taken::Interrupted;
        };

        let deadline = self.deadline;
        let expired = async move {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending().await,
            }
        };

        let joined = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            _ = expired => None,
            res = &mut handle => Some(res),
        };

        match joined {
            Some(Ok(Ok(page))) => Taken::Page(page),
            Some(Ok(Err(e))) => Taken::Failed(e),
            Some(Err(e)) => Taken::Panicked(e),
            None => {
                handle.abort();
                Taken::Interrupted
            }
        }
    }

    fn abort_in_flight(&mut self) {
        for (_, handle) in self.in_flight.drain() {
            handle.abort();
        }
    }
}
