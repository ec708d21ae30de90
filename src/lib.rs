//! # marquee-client
//!
//! Async Rust client core for the Marquee financial data platform.
//!
//! ## Features
//!
//! - **One transport, two front doors**: async [`Session`] plus a [`BlockingSession`] adapter
//! - **Lazy OAuth2**: client credentials, bearer token or a platform-native hook, with a single
//!   re-authentication on `401`
//! - **JSON and MessagePack** request/response encoding negotiated per session or per request
//! - **Pagination helpers**: [`fetch_all`] for scroll/offset walks, page-level ([`CursorPager`])
//!   and item-level (`stream_*`) iteration
//! - **Retry policy** keyed on error kind: constant backoff for `429`, exponential for server
//!   errors and timeouts
//! - **Bulk extraction** over time windows with bounded concurrency and CSV output
//!
//! ## Quick Start
//!
//! ```no_run
//! use marquee_client::{DataApi, MarqueeEnvironment, Session};
//!
//! # async fn run() -> Result<(), marquee_client::MarqueeError> {
//! let session = Session::builder(MarqueeEnvironment::prod()?)
//!     .with_client_credentials("my-client-id", "my-secret", None)
//!     .build()?;
//!
//! let data = DataApi::new(session.clone());
//! let definition = data.get_definition("EDRVOL_PERCENT_STANDARD").await?;
//! println!("{} keyed by {}", definition.id, definition.time_cadence()?);
//! session.close();
//! # Ok(())
//! # }
//! ```
//!
//! ## Ambient session
//!
//! Handles can pick the session up from the surrounding scope instead of taking it as an
//! argument:
//!
//! ```no_run
//! use marquee_client::{ContentApi, GetContentsParams, MarqueeEnvironment, Session, scope};
//!
//! # async fn run() -> Result<(), marquee_client::MarqueeError> {
//! let session = Session::builder(MarqueeEnvironment::prod()?)
//!     .with_token("bearer-token")
//!     .build()?;
//!
//! let items = scope(session, async {
//!     ContentApi::current()?
//!         .get_contents(&GetContentsParams { limit: Some(10), ..Default::default() })
//!         .await
//! })
//! .await?;
//! println!("{} items", items.len());
//! # Ok(())
//! # }
//! ```
//!
//! ## Pagination
//!
//! **Collected** with the `get_all_*` helpers, which follow `offsetKey`/`scrollId` to the end:
//!
//! ```no_run
//! # use marquee_client::{GetSecuritiesParams, SecurityMasterApi, Session};
//! # async fn run(session: Session) -> Result<(), marquee_client::MarqueeError> {
//! let securities = SecurityMasterApi::new(session)
//!     .get_all_securities(GetSecuritiesParams {
//!         types: vec!["Common Stock".to_string()],
//!         limit: Some(500),
//!         ..Default::default()
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! **Item-level** with streams:
//!
//! ```no_run
//! use futures::stream::TryStreamExt;
//! # use marquee_client::{GetSecuritiesParams, Security, SecurityMasterApi, Session};
//!
//! # async fn run(session: Session) -> Result<(), marquee_client::MarqueeError> {
//! let first: Vec<Security> = SecurityMasterApi::new(session)
//!     .stream_securities(GetSecuritiesParams::default(), Some(250))
//!     .try_collect()
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Bulk extraction
//!
//! ```no_run
//! use chrono::NaiveDate;
//! use marquee_client::{CsvSink, DataApi, Dataset, ExtractOptions, Session, iterate_over_series};
//!
//! # async fn run(session: Session) -> Result<(), marquee_client::MarqueeError> {
//! let dataset = Dataset::new(DataApi::new(session), "TREOD");
//! let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap();
//! let end = NaiveDate::from_ymd_opt(2024, 2, 1).unwrap().and_hms_opt(0, 0, 0).unwrap();
//!
//! let mut sink = CsvSink::in_current_dir("TREOD")?;
//! let symbols = vec!["SPX".to_string(), "NDX".to_string()];
//! iterate_over_series(&dataset, &symbols, &ExtractOptions::new(start, end), &mut sink).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Blocking use
//!
//! ```no_run
//! # use marquee_client::{BlockingSession, MarqueeEnvironment, Session};
//! # fn run() -> Result<(), marquee_client::MarqueeError> {
//! let session = Session::builder(MarqueeEnvironment::prod()?)
//!     .with_token("bearer-token")
//!     .build()?;
//! let blocking = BlockingSession::new(session);
//! let assets: serde_json::Value = blocking.get("/assets", ())?;
//! blocking.close();
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod auth;
pub mod cache;
pub mod codec;
pub mod env;
pub mod error;
pub mod extract;
pub mod pagination;
pub mod rest;
pub mod retry;
pub mod types;
pub mod ws;

#[cfg(test)]
pub(crate) mod test_support;

// Primary entry points
pub use api::{ContentApi, DataApi, SecurityMasterApi};
pub use auth::{Credentials, NativeAuthenticator};
pub use codec::{Body, ContentType, Payload};
pub use env::{API_VERSION, Environment, EnvironmentConfig, MarqueeEnvironment};
pub use error::{MarqueeError, RequestError, RequestErrorKind};
pub use extract::{
    CsvSink, Dataset, DatasetProfile, ExtractOptions, SeriesSource, Window, WindowSink,
    execute_parallel_query, iterate_over_series,
};
pub use pagination::{ContinuationKey, CursorPager, Page, fetch_all, stream_items};
pub use rest::{
    BlockingSession, Request, Response, Session, SessionBuilder, Unpacked, scope, sync_scope,
};
pub use retry::{Backoff, RetryPolicy, RetryRule};
pub use ws::MarqueeWsClient;

pub use rest::types::*;
pub use types::*;
