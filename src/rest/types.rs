use crate::error::MarqueeError;
use crate::types::{MarketDataCoordinate, TimeCadence};

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// --- Datasets ---

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSetEntity {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub parameters: Option<DataSetParameters>,
    #[serde(default)]
    pub dimensions: Option<DataSetDimensions>,
    #[serde(default, flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSetParameters {
    /// First date with data, `YYYY-MM-DD` or an ISO-8601 timestamp.
    #[serde(default)]
    pub history_date: Option<String>,
    #[serde(default)]
    pub frequency: Option<String>,
    #[serde(default, flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSetDimensions {
    /// `"date"` or `"time"`.
    #[serde(default)]
    pub time_field: Option<String>,
    #[serde(default)]
    pub symbol_dimensions: Vec<String>,
    #[serde(default)]
    pub non_symbol_dimensions: Vec<Value>,
    #[serde(default)]
    pub measures: Vec<Value>,
    #[serde(default, flatten)]
    pub extra: Map<String, Value>,
}

impl DataSetEntity {
    pub fn time_cadence(&self) -> Result<TimeCadence, MarqueeError> {
        let field = self
            .dimensions
            .as_ref()
            .and_then(|d| d.time_field.as_deref())
            .ok_or_else(|| {
                MarqueeError::Value(format!("dataset {} has no time field", self.id))
            })?;
        match field {
            "date" => Ok(TimeCadence::Date),
            "time" => Ok(TimeCadence::Time),
            other => Err(MarqueeError::Value(format!(
                "dataset {}: unsupported time field {other}",
                self.id
            ))),
        }
    }

    /// The first symbol dimension, used to batch symbols in bulk queries.
    pub fn symbol_dimension(&self) -> Result<&str, MarqueeError> {
        self.dimensions
            .as_ref()
            .and_then(|d| d.symbol_dimensions.first())
            .map(String::as_str)
            .ok_or_else(|| {
                MarqueeError::Value(format!("dataset {} has no symbol dimension", self.id))
            })
    }

    /// Parsed `parameters.historyDate` as midnight UTC for plain dates.
    pub fn history_start(&self) -> Result<Option<NaiveDateTime>, MarqueeError> {
        let Some(raw) = self
            .parameters
            .as_ref()
            .and_then(|p| p.history_date.as_deref())
        else {
            return Ok(None);
        };
        parse_history_date(raw).map(Some).ok_or_else(|| {
            MarqueeError::Value(format!(
                "dataset {}: unparseable historyDate {raw}",
                self.id
            ))
        })
    }
}

fn parse_history_date(raw: &str) -> Option<NaiveDateTime> {
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0);
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.naive_utc());
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f").ok()
}

/// Field name to declared type, from the dataset catalog.
pub type FieldTypes = BTreeMap<String, String>;

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct CatalogResponse {
    #[serde(default)]
    pub(crate) fields: Map<String, Value>,
}

impl CatalogResponse {
    /// Accepts both `{"field": "string"}` and `{"field": {"type": "string"}}`.
    pub(crate) fn field_types(self) -> FieldTypes {
        self.fields
            .into_iter()
            .filter_map(|(name, spec)| {
                let ty = match spec {
                    Value::String(ty) => ty,
                    Value::Object(mut map) => match map.remove("type") {
                        Some(Value::String(ty)) => ty,
                        _ => return None,
                    },
                    _ => return None,
                };
                Some((name, ty))
            })
            .collect()
    }
}

/// GET /data/{id}/coverage query params
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GetCoverageParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub include_history: Option<bool>,
}

impl GetCoverageParams {
    pub fn validate(&self) -> Result<(), MarqueeError> {
        if let Some(limit) = self.limit
            && limit == 0
        {
            return Err(MarqueeError::Value(
                "GET /data/{id}/coverage: limit must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// POST /data/{id}/query body
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataQuery {
    #[serde(rename = "where", skip_serializing_if = "Map::is_empty")]
    pub where_: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub as_of_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<String>,
}

impl DataQuery {
    /// Restrict `dimension` to any of `values`.
    pub fn with_where<I, S>(mut self, dimension: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let values = values
            .into_iter()
            .map(|v| Value::String(v.into()))
            .collect();
        self.where_.insert(dimension.into(), Value::Array(values));
        self
    }

    pub fn validate(&self) -> Result<(), MarqueeError> {
        let has_dates = self.start_date.is_some() || self.end_date.is_some();
        let has_times = self.start_time.is_some() || self.end_time.is_some();
        if has_dates && has_times {
            return Err(MarqueeError::Value(
                "POST /data/{id}/query: use either dates or times, not both".to_string(),
            ));
        }
        if let (Some(start), Some(end)) = (self.start_date, self.end_date)
            && end < start
        {
            return Err(MarqueeError::Value(
                "POST /data/{id}/query: end date before start date".to_string(),
            ));
        }
        if let (Some(start), Some(end)) = (self.start_time, self.end_time)
            && end < start
        {
            return Err(MarqueeError::Value(
                "POST /data/{id}/query: end time before start time".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DataQueryResponse {
    #[serde(default)]
    pub data: Vec<Map<String, Value>>,
    #[serde(default, flatten)]
    pub extra: Map<String, Value>,
}

/// --- Coordinates ---

/// POST /data/coordinates/query/last body
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CoordinatesLastRequest<'a> {
    pub(crate) market_data_coordinates: &'a [MarketDataCoordinate],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) end_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) vendor: Option<&'a str>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct CoordinatesLastResponse {
    #[serde(default)]
    pub(crate) responses: Vec<CoordinateResponse>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct CoordinateResponse {
    #[serde(default)]
    pub(crate) data: Vec<CoordinateValue>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct CoordinateValue {
    #[serde(flatten)]
    pub(crate) coordinate: MarketDataCoordinate,
    #[serde(default)]
    pub(crate) value: Option<f64>,
}

/// --- Security Master ---

/// GET /markets/securities query params
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GetSecuritiesParams {
    #[serde(rename = "type", skip_serializing_if = "Vec::is_empty")]
    pub types: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_primary: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effective_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset_key: Option<String>,
}

impl GetSecuritiesParams {
    pub fn validate(&self) -> Result<(), MarqueeError> {
        if let Some(limit) = self.limit
            && (limit == 0 || limit > 1000)
        {
            return Err(MarqueeError::Value(
                "GET /markets/securities: limit must be 1..=1000".to_string(),
            ));
        }
        Ok(())
    }
}

/// GET /markets/securities/identifiers query params
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GetIdentifiersParams {
    #[serde(rename = "idType", skip_serializing_if = "Vec::is_empty")]
    pub id_types: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effective_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Security {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "type")]
    pub security_type: Option<String>,
    #[serde(default)]
    pub identifiers: Map<String, Value>,
    #[serde(default, flatten)]
    pub extra: Map<String, Value>,
}

/// One page of GET /markets/securities.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecuritiesPage {
    #[serde(default)]
    pub results: Vec<Security>,
    #[serde(default)]
    pub offset_key: Option<String>,
    #[serde(default)]
    pub total_results: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityIdentifiers {
    pub id: String,
    #[serde(default)]
    pub identifiers: Vec<Value>,
    #[serde(default, flatten)]
    pub extra: Map<String, Value>,
}

/// --- Content ---

/// Page size `GET /content` uses when no `limit` is given.
pub const DEFAULT_CONTENTS_LIMIT: u32 = 10;

/// GET /content query params
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GetContentsParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>, // max 1000
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<i64>, // 0 <= offset < limit
    #[serde(rename = "channel", skip_serializing_if = "Vec::is_empty")]
    pub channels: Vec<String>,
    #[serde(rename = "assetId", skip_serializing_if = "Vec::is_empty")]
    pub asset_ids: Vec<String>,
    #[serde(rename = "authorId", skip_serializing_if = "Vec::is_empty")]
    pub author_ids: Vec<String>,
    #[serde(rename = "tag", skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

impl GetContentsParams {
    /// `limit`, or the endpoint's default page size when unset.
    pub fn effective_limit(&self) -> u32 {
        self.limit.unwrap_or(DEFAULT_CONTENTS_LIMIT)
    }

    pub fn validate(&self) -> Result<(), MarqueeError> {
        if let Some(limit) = self.limit
            && limit > 1000
        {
            return Err(MarqueeError::Value(
                "GET /content: limit is too large, must be <= 1000".to_string(),
            ));
        }
        if let Some(offset) = self.offset {
            if offset < 0 {
                return Err(MarqueeError::Value(
                    "GET /content: offset must be >= 0".to_string(),
                ));
            }
            if offset >= i64::from(self.effective_limit()) {
                return Err(MarqueeError::Value(
                    "GET /content: offset must be less than limit".to_string(),
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentItem {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub channels: Vec<String>,
    #[serde(default)]
    pub author_ids: Vec<String>,
    #[serde(default, flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GetContentsResponse {
    #[serde(default)]
    pub data: Vec<ContentItem>,
    #[serde(default, flatten)]
    pub extra: Map<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn dataset(value: Value) -> DataSetEntity {
        serde_json::from_value(value).expect("dataset")
    }

    #[test]
    fn dataset_exposes_cadence_history_and_symbol_dimension() {
        let entity = dataset(json!({
            "id": "EDRVOL_PERCENT_STANDARD",
            "parameters": {"historyDate": "2017-01-02", "frequency": "Daily"},
            "dimensions": {"timeField": "date", "symbolDimensions": ["assetId"]},
            "vendor": "Goldman Sachs"
        }));
        assert_eq!(entity.time_cadence().unwrap(), TimeCadence::Date);
        assert_eq!(entity.symbol_dimension().unwrap(), "assetId");
        assert_eq!(
            entity.history_start().unwrap(),
            NaiveDate::from_ymd_opt(2017, 1, 2).unwrap().and_hms_opt(0, 0, 0)
        );
        assert_eq!(entity.extra.get("vendor"), Some(&json!("Goldman Sachs")));
    }

    #[test]
    fn dataset_history_accepts_timestamps() {
        let entity = dataset(json!({
            "id": "FXSPOT_INTRADAY",
            "parameters": {"historyDate": "2020-06-01T09:30:00Z"},
            "dimensions": {"timeField": "time", "symbolDimensions": ["bbid"]}
        }));
        assert_eq!(entity.time_cadence().unwrap(), TimeCadence::Time);
        let start = entity.history_start().unwrap().unwrap();
        assert_eq!(start.to_string(), "2020-06-01 09:30:00");
    }

    #[test]
    fn dataset_without_dimensions_is_a_value_error() {
        let entity = dataset(json!({"id": "BARE"}));
        assert!(matches!(entity.time_cadence(), Err(MarqueeError::Value(_))));
        assert!(matches!(
            entity.symbol_dimension(),
            Err(MarqueeError::Value(_))
        ));
        assert!(entity.history_start().unwrap().is_none());
    }

    #[test]
    fn catalog_field_types_accept_both_shapes() {
        let catalog: CatalogResponse = serde_json::from_value(json!({
            "fields": {
                "assetId": {"type": "string"},
                "impliedVolatility": "number",
                "broken": 5
            }
        }))
        .unwrap();
        let types = catalog.field_types();
        assert_eq!(types.len(), 2);
        assert_eq!(types["assetId"], "string");
        assert_eq!(types["impliedVolatility"], "number");
    }

    #[test]
    fn contents_params_validate_limit_and_offset() {
        let ok = GetContentsParams {
            limit: Some(100),
            offset: Some(99),
            ..Default::default()
        };
        assert!(ok.validate().is_ok());

        for params in [
            GetContentsParams {
                limit: Some(1001),
                ..Default::default()
            },
            GetContentsParams {
                limit: Some(10),
                offset: Some(-1),
                ..Default::default()
            },
            GetContentsParams {
                limit: Some(10),
                offset: Some(10),
                ..Default::default()
            },
            GetContentsParams {
                offset: Some(-5),
                ..Default::default()
            },
        ] {
            assert!(matches!(params.validate(), Err(MarqueeError::Value(_))));
        }
    }

    #[test]
    fn data_query_rejects_mixed_or_inverted_ranges() {
        let start = NaiveDate::from_ymd_opt(2024, 1, 10).unwrap();
        let end = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let inverted = DataQuery {
            start_date: Some(start),
            end_date: Some(end),
            ..Default::default()
        };
        assert!(inverted.validate().is_err());

        let mixed = DataQuery {
            start_date: Some(end),
            start_time: Some(Utc::now()),
            ..Default::default()
        };
        assert!(mixed.validate().is_err());
    }

    #[test]
    fn data_query_serializes_where_clause() {
        let query = DataQuery {
            start_date: NaiveDate::from_ymd_opt(2024, 1, 1),
            ..Default::default()
        }
        .with_where("bbid", ["SPX", "NDX"]);
        assert_eq!(
            serde_json::to_value(&query).unwrap(),
            json!({"where": {"bbid": ["SPX", "NDX"]}, "startDate": "2024-01-01"})
        );
    }
}
