use crate::codec::Payload;
use crate::error::MarqueeError;
use crate::pagination::{ContinuationKey, fetch_all};
use crate::rest::Session;
use crate::rest::types::{
    CatalogResponse, CoordinatesLastRequest, CoordinatesLastResponse, DataQuery,
    DataQueryResponse, DataSetEntity, FieldTypes, GetCoverageParams,
};
use crate::types::{Frame, MarketDataCoordinate};

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::debug;

/// How long the server keeps a coverage scroll open between pages.
const COVERAGE_SCROLL: &str = "5m";

/// Dataset catalog, coverage and query endpoints.
#[derive(Debug, Clone)]
pub struct DataApi {
    session: Session,
}

impl DataApi {
    pub fn new(session: Session) -> Self {
        Self { session }
    }

    /// Handle bound to the ambient session.
    pub fn current() -> Result<Self, MarqueeError> {
        Session::current().map(Self::new)
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Dataset definition, served from the session's metadata cache when fresh.
    pub async fn get_definition(&self, dataset_id: &str) -> Result<DataSetEntity, MarqueeError> {
        let key = format!("definition:{dataset_id}");
        let path = format!("/data/datasets/{dataset_id}");
        let value = self
            .session
            .metadata_cache()
            .get_or_try_insert_with(&key, || self.session.get::<Value>(&path, ()))
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Declared type of every field in the dataset, cached like definitions.
    pub async fn get_types(&self, dataset_id: &str) -> Result<FieldTypes, MarqueeError> {
        let key = format!("types:{dataset_id}");
        let path = format!("/data/catalog/{dataset_id}");
        let value = self
            .session
            .metadata_cache()
            .get_or_try_insert_with(&key, || self.session.get::<Value>(&path, ()))
            .await?;
        let catalog: CatalogResponse = serde_json::from_value(value)?;
        Ok(catalog.field_types())
    }

    /// Every coverage record of a dataset, following `scrollId` to the end.
    ///
    /// Each page goes through the session's retry policy.
    pub async fn get_coverage(
        &self,
        dataset_id: &str,
        params: GetCoverageParams,
    ) -> Result<Vec<Map<String, Value>>, MarqueeError> {
        params.validate()?;
        let path = format!("/data/{dataset_id}/coverage");
        let mut base = match Payload::model(&params)? {
            Payload::Value(Value::Object(map)) => map,
            _ => Map::new(),
        };
        base.insert("scroll".to_string(), Value::from(COVERAGE_SCROLL));

        let records = fetch_all(
            |cursor| {
                let mut query = base.clone();
                if let Some(cursor) = cursor {
                    query.insert("scrollId".to_string(), Value::String(cursor));
                }
                let path = path.as_str();
                async move {
                    self.session
                        .retry_policy()
                        .run("get_coverage", || {
                            self.session.get::<Value>(path, query.clone())
                        })
                        .await
                        .map(Some)
                }
            },
            None,
            &ContinuationKey::ScrollId,
            None,
            true,
        )
        .await?;

        records
            .into_iter()
            .map(|record| match record {
                Value::Object(map) => Ok(map),
                other => Err(MarqueeError::Type(format!(
                    "coverage record is not an object: {other}"
                ))),
            })
            .collect()
    }

    /// Latest value for each coordinate; `None` where the server has nothing.
    ///
    /// Every requested coordinate has an entry in the result.
    pub async fn coordinates_last(
        &self,
        coordinates: &[MarketDataCoordinate],
        as_of: Option<DateTime<Utc>>,
        vendor: Option<&str>,
    ) -> Result<BTreeMap<MarketDataCoordinate, Option<f64>>, MarqueeError> {
        let mut out: BTreeMap<MarketDataCoordinate, Option<f64>> =
            coordinates.iter().cloned().map(|c| (c, None)).collect();
        if coordinates.is_empty() {
            return Ok(out);
        }

        let request = CoordinatesLastRequest {
            market_data_coordinates: coordinates,
            end_time: as_of,
            vendor,
        };
        let response: CoordinatesLastResponse = self
            .session
            .post("/data/coordinates/query/last", Payload::model(&request)?)
            .await?;

        // Responses line up with the request; rows are matched by coordinate first.
        for (idx, response) in response.responses.into_iter().enumerate() {
            for row in response.data {
                let target = if out.contains_key(&row.coordinate) {
                    Some(&row.coordinate)
                } else {
                    coordinates.get(idx)
                };
                match target.and_then(|c| out.get_mut(c)) {
                    Some(slot) => *slot = row.value,
                    None => {
                        debug!(coordinate = %row.coordinate, "ignoring unrequested coordinate")
                    }
                }
            }
        }
        Ok(out)
    }

    /// Run a dataset query and return the `data` rows.
    pub async fn query_data(&self, dataset_id: &str, query: &DataQuery) -> Result<Frame, MarqueeError> {
        query.validate()?;
        let path = format!("/data/{dataset_id}/query");
        let response: DataQueryResponse = self.session.post(&path, Payload::model(query)?).await?;
        Ok(Frame::from_records(response.data))
    }
}
