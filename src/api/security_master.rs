use crate::codec::Payload;
use crate::error::MarqueeError;
use crate::pagination::{ContinuationKey, CursorPager, Page, fetch_all, stream_items};
use crate::rest::Session;
use crate::rest::types::{
    GetIdentifiersParams, GetSecuritiesParams, SecuritiesPage, Security, SecurityIdentifiers,
};

use futures::stream::Stream;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

const SECURITIES_PATH: &str = "/markets/securities";
const IDENTIFIERS_PATH: &str = "/markets/securities/identifiers";

/// Security master lookups.
#[derive(Debug, Clone)]
pub struct SecurityMasterApi {
    session: Session,
}

impl SecurityMasterApi {
    pub fn new(session: Session) -> Self {
        Self { session }
    }

    pub fn current() -> Result<Self, MarqueeError> {
        Session::current().map(Self::new)
    }

    /// One page of securities.
    pub async fn get_securities(
        &self,
        params: &GetSecuritiesParams,
    ) -> Result<SecuritiesPage, MarqueeError> {
        params.validate()?;
        self.session
            .get(SECURITIES_PATH, Payload::model(params)?)
            .await
    }

    /// Every security matching `params`, following `offsetKey` to the end.
    pub async fn get_all_securities(
        &self,
        params: GetSecuritiesParams,
    ) -> Result<Vec<Security>, MarqueeError> {
        params.validate()?;
        let initial = params.offset_key.clone();
        self.walk_offsets("get_all_securities", SECURITIES_PATH, initial, |cursor| {
            let mut page = params.clone();
            page.offset_key = cursor;
            page
        })
        .await
    }

    /// Every identifier record matching `params`, following `offsetKey` to the end.
    pub async fn get_all_identifiers(
        &self,
        params: GetIdentifiersParams,
    ) -> Result<Vec<SecurityIdentifiers>, MarqueeError> {
        let initial = params.offset_key.clone();
        self.walk_offsets("get_all_identifiers", IDENTIFIERS_PATH, initial, |cursor| {
            let mut page = params.clone();
            page.offset_key = cursor;
            page
        })
        .await
    }

    /// Re-send the fixed filters with each new `offsetKey`, retrying each page under the
    /// session's retry policy.
    async fn walk_offsets<P, T, F>(
        &self,
        operation: &str,
        path: &str,
        initial: Option<String>,
        page_params: F,
    ) -> Result<Vec<T>, MarqueeError>
    where
        P: Serialize,
        T: DeserializeOwned,
        F: Fn(Option<String>) -> P,
    {
        let results = fetch_all(
            |cursor| {
                let payload = Payload::model(&page_params(cursor));
                async move {
                    let payload = payload?;
                    self.session
                        .retry_policy()
                        .run(operation, || self.session.get::<Value>(path, payload.clone()))
                        .await
                        .map(Some)
                }
            },
            initial,
            &ContinuationKey::OffsetKey,
            None,
            true,
        )
        .await?;

        results
            .into_iter()
            .map(|item| serde_json::from_value(item).map_err(Into::into))
            .collect()
    }

    /// Page-level iteration. See [`CursorPager`].
    pub fn securities_pager(&self, params: GetSecuritiesParams) -> CursorPager<Security> {
        let api = self.clone();
        let base_params = params.clone();
        CursorPager::new(params.offset_key.clone(), move |cursor| {
            let api = api.clone();
            let mut page_params = base_params.clone();
            page_params.offset_key = cursor;
            Box::pin(async move {
                let page = api.get_securities(&page_params).await?;
                Ok(Page::new(page.results, page.offset_key))
            })
        })
    }

    /// Item-level stream over [`securities_pager`](Self::securities_pager).
    pub fn stream_securities(
        &self,
        params: GetSecuritiesParams,
        max_items: Option<usize>,
    ) -> impl Stream<Item = Result<Security, MarqueeError>> + Send {
        stream_items(self.securities_pager(params), max_items)
    }
}
