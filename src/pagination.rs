//! Continuation-token pagination.
//!
//! Scrollable endpoints return a page of `results` plus an opaque token (`scrollId`,
//! `offsetKey`, ...) naming where the next page starts. The token's absence is the only
//! end-of-walk signal: a page with an empty `results` array but a token present is fetched
//! past. Pages are requested strictly one after another in cursor order and nothing is
//! deduplicated.

use crate::error::MarqueeError;

use futures::future::BoxFuture;
use futures::stream::{self, Stream};
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::Value;
use std::collections::VecDeque;
use std::future::Future;
use tracing::debug;

/// Field a paginated endpoint uses for its continuation token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContinuationKey {
    ScrollId,
    OffsetKey,
    Custom(String),
}

impl ContinuationKey {
    pub fn as_str(&self) -> &str {
        match self {
            ContinuationKey::ScrollId => "scrollId",
            ContinuationKey::OffsetKey => "offsetKey",
            ContinuationKey::Custom(name) => name,
        }
    }

    /// The token carried by `page`, if any. `null` and empty strings count as absent.
    pub fn token(&self, page: &Value) -> Option<String> {
        match page.get(self.as_str())? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

pub(crate) fn progress_bar(total: Option<u64>, message: &str) -> ProgressBar {
    let bar = match total {
        Some(total) => {
            let bar = ProgressBar::new(total);
            if let Ok(style) = ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            {
                bar.set_style(style.progress_chars("#>-"));
            }
            bar
        }
        None => {
            let bar = ProgressBar::new_spinner();
            if let Ok(style) =
                ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {pos} {msg}")
            {
                bar.set_style(style);
            }
            bar
        }
    };
    bar.set_message(message.to_string());
    bar
}

/// One fetched page: its items plus the token naming the next page.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next: Option<String>,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, next: Option<String>) -> Self {
        Self { items, next }
    }
}

impl ContinuationKey {
    /// Split a raw response into a [`Page`]. With `extract_results` the items are the
    /// `results` array; otherwise the whole response is the page's only item.
    pub fn page(&self, raw: Value, extract_results: bool) -> Page<Value> {
        let next = self.token(&raw);
        let items = if extract_results {
            match raw {
                Value::Object(mut map) => match map.remove("results") {
                    Some(Value::Array(results)) => results,
                    _ => Vec::new(),
                },
                _ => Vec::new(),
            }
        } else {
            vec![raw]
        };
        Page::new(items, next)
    }
}

/// Position in a token walk, shared by [`fetch_all`] and [`CursorPager`].
///
/// Empty tokens count as absent. The walk is over after the first page without one.
#[derive(Debug, Clone, Default)]
struct Cursor {
    token: Option<String>,
    done: bool,
}

impl Cursor {
    fn start(initial: Option<String>) -> Self {
        Self {
            token: initial.filter(|t| !t.is_empty()),
            done: false,
        }
    }

    /// Token for the next fetch; `None` once the walk is over.
    fn take(&mut self) -> Option<Option<String>> {
        if self.done {
            None
        } else {
            Some(self.token.take())
        }
    }

    fn advance(&mut self, next: Option<String>) {
        self.token = next.filter(|t| !t.is_empty());
        self.done = self.token.is_none();
    }

    fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    fn is_done(&self) -> bool {
        self.done
    }
}

/// Walk a paginated endpoint until its token disappears.
///
/// `fetch` receives the current token (`initial_cursor` first) and returns the page, or
/// `None` to stop. With `extract_results` the `results` arrays are concatenated; without
/// it whole pages are returned. `total_batches`, when known, bounds the progress bar.
pub async fn fetch_all<F, Fut>(
    mut fetch: F,
    initial_cursor: Option<String>,
    key: &ContinuationKey,
    total_batches: Option<u64>,
    extract_results: bool,
) -> Result<Vec<Value>, MarqueeError>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<Option<Value>, MarqueeError>>,
{
    let progress = progress_bar(total_batches, key.as_str());
    let mut cursor = Cursor::start(initial_cursor);
    let mut items = Vec::new();

    while let Some(token) = cursor.take() {
        let page = match fetch(token).await {
            Ok(Some(raw)) => key.page(raw, extract_results),
            Ok(None) => break,
            Err(err) => {
                progress.abandon();
                return Err(err);
            }
        };
        progress.inc(1);

        items.extend(page.items);
        cursor.advance(page.next);
        debug!(
            key = key.as_str(),
            pages = progress.position(),
            items = items.len(),
            more = !cursor.is_done(),
            "fetched page"
        );
    }

    progress.finish_and_clear();
    Ok(items)
}

type PageFetch<T> =
    Box<dyn FnMut(Option<String>) -> BoxFuture<'static, Result<Page<T>, MarqueeError>> + Send>;

/// Page-at-a-time iteration over a token-paginated endpoint.
///
/// ```no_run
/// # use marquee_client::{GetSecuritiesParams, SecurityMasterApi, Session};
/// # async fn example(session: Session) -> Result<(), marquee_client::MarqueeError> {
/// let api = SecurityMasterApi::new(session);
/// let mut pager = api.securities_pager(GetSecuritiesParams::default());
/// while let Some(page) = pager.next_page().await? {
///     println!("{} securities", page.len());
/// }
/// # Ok(())
/// # }
/// ```
pub struct CursorPager<T> {
    cursor: Cursor,
    fetch: PageFetch<T>,
}

impl<T> CursorPager<T> {
    pub fn new<F>(initial: Option<String>, fetch: F) -> Self
    where
        F: FnMut(Option<String>) -> BoxFuture<'static, Result<Page<T>, MarqueeError>>
            + Send
            + 'static,
    {
        Self {
            cursor: Cursor::start(initial),
            fetch: Box::new(fetch),
        }
    }

    /// `Ok(None)` once the previous page carried no token.
    pub async fn next_page(&mut self) -> Result<Option<Vec<T>>, MarqueeError> {
        let Some(token) = self.cursor.take() else {
            return Ok(None);
        };
        let page = (self.fetch)(token).await?;
        self.cursor.advance(page.next);
        Ok(Some(page.items))
    }

    /// Token for the next fetch, for resuming a walk later.
    pub fn current_cursor(&self) -> Option<&str> {
        self.cursor.token()
    }

    pub fn is_done(&self) -> bool {
        self.cursor.is_done()
    }
}

struct StreamState<T> {
    pager: CursorPager<T>,
    buffer: VecDeque<T>,
    remaining: Option<usize>,
    done: bool,
}

/// Item-level stream over a [`CursorPager`]; `max_items` stops early without an extra fetch.
pub fn stream_items<T>(
    pager: CursorPager<T>,
    max_items: Option<usize>,
) -> impl Stream<Item = Result<T, MarqueeError>> + Send
where
    T: Send + 'static,
{
    let state = StreamState {
        pager,
        buffer: VecDeque::new(),
        remaining: max_items,
        done: false,
    };

    stream::unfold(state, |mut state| async move {
        if state.done || state.remaining == Some(0) {
            return None;
        }

        loop {
            if let Some(item) = state.buffer.pop_front() {
                if let Some(remaining) = state.remaining.as_mut() {
                    *remaining -= 1;
                }
                return Some((Ok(item), state));
            }
            if state.pager.is_done() {
                return None;
            }

            match state.pager.next_page().await {
                Ok(Some(items)) => state.buffer = items.into(),
                Ok(None) => return None,
                Err(err) => {
                    state.done = true;
                    return Some((Err(err), state));
                }
            }
        }
    })
}
