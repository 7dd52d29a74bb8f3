//! Scripted collaborators for unit tests.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::call::Failure;
use crate::evidence::{EvidenceItem, Language, Origin, SearchHit, SearchProvider, SearchRequest};
use crate::research::{Draft, DraftGenerator, DraftRequest};

type SearchHandler = Box<dyn Fn(&SearchRequest) -> Result<Vec<SearchHit>, Failure> + Send + Sync>;
type DelayHandler = Box<dyn Fn(&SearchRequest) -> Duration + Send + Sync>;
type PageHandler = Box<dyn Fn(&str) -> Result<String, Failure> + Send + Sync>;
type DraftHandler = Box<dyn Fn(&DraftRequest) -> Result<Draft, Failure> + Send + Sync>;

pub fn hit(url: &str, title: &str, body: Option<&str>) -> SearchHit {
    SearchHit {
        title: title.to_string(),
        url: url.to_string(),
        snippet: format!("{} snippet", title),
        body: body.map(|b| b.to_string()),
    }
}

/// Evidence item with an empty summary; set fields directly when a test needs more.
pub fn evidence(url: &str, title: &str, body: &str) -> EvidenceItem {
    EvidenceItem {
        url: url.to_string(),
        title: title.to_string(),
        summary: String::new(),
        body: body.to_string(),
        language: Language::En,
        retrieved_at: Utc::now(),
        origin: Origin::PrimarySearch,
    }
}

pub struct ScriptedSearch {
    handler: SearchHandler,
    pages: PageHandler,
    delay: DelayHandler,
    queries: Mutex<Vec<String>>,
    fetched: Mutex<Vec<String>>,
}

impl ScriptedSearch {
    pub fn new(
        handler: impl Fn(&SearchRequest) -> Result<Vec<SearchHit>, Failure> + Send + Sync + 'static,
    ) -> Self {
        Self {
            handler: Box::new(handler),
            pages: Box::new(|url| Err(Failure::permanent(format!("no page scripted for {}", url)))),
            delay: Box::new(|_| Duration::ZERO),
            queries: Mutex::new(Vec::new()),
            fetched: Mutex::new(Vec::new()),
        }
    }

    pub fn with_pages(
        mut self,
        pages: impl Fn(&str) -> Result<String, Failure> + Send + Sync + 'static,
    ) -> Self {
        self.pages = Box::new(pages);
        self
    }

    /// Simulated latency per request; answers then arrive out of dispatch order.
    pub fn with_delay(
        mut self,
        delay: impl Fn(&SearchRequest) -> Duration + Send + Sync + 'static,
    ) -> Self {
        self.delay = Box::new(delay);
        self
    }

    /// Queries in the order they were issued.
    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }

    pub fn fetched(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }
}

#[async_trait]
impl SearchProvider for ScriptedSearch {
    async fn search(&self, request: &SearchRequest) -> Result<Vec<SearchHit>, Failure> {
        self.queries.lock().unwrap().push(request.query.clone());
        let delay = (self.delay)(request);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        (self.handler)(request)
    }

    async fn fetch_page(&self, url: &str) -> Result<String, Failure> {
        self.fetched.lock().unwrap().push(url.to_string());
        (self.pages)(url)
    }
}

pub struct ScriptedDrafter {
    handler: DraftHandler,
    requests: Mutex<Vec<DraftRequest>>,
}

impl ScriptedDrafter {
    pub fn new(
        handler: impl Fn(&DraftRequest) -> Result<Draft, Failure> + Send + Sync + 'static,
    ) -> Self {
        Self {
            handler: Box::new(handler),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Always answers with `text`, citing whatever markers it contains.
    pub fn fixed(text: &str) -> Self {
        let text = text.to_string();
        Self::new(move |_| {
            Ok(Draft {
                citations_used: crate::verify::citation_ids(&text),
                text: text.clone(),
            })
        })
    }

    pub fn requests(&self) -> Vec<DraftRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl DraftGenerator for ScriptedDrafter {
    async fn draft(&self, request: &DraftRequest) -> Result<Draft, Failure> {
        self.requests.lock().unwrap().push(request.clone());
        (self.handler)(request)
    }
}
