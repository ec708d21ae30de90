use crate::error::MarqueeError;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fmt;
use std::io;

/// --- Time Cadence ---

/// Whether a dataset is keyed by calendar date or by timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeCadence {
    Date,
    Time,
}

impl TimeCadence {
    pub fn as_str(self) -> &'static str {
        match self {
            TimeCadence::Date => "date",
            TimeCadence::Time => "time",
        }
    }
}

impl fmt::Display for TimeCadence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for TimeCadence {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for TimeCadence {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        match raw.as_str() {
            "date" => Ok(TimeCadence::Date),
            "time" => Ok(TimeCadence::Time),
            other => Err(serde::de::Error::custom(format!(
                "unknown time field: {other}"
            ))),
        }
    }
}

/// --- Market Data Coordinate ---

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketDataCoordinate {
    pub mkt_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mkt_asset: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mkt_class: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Vec::is_empty",
        deserialize_with = "deserialize_point"
    )]
    pub mkt_point: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mkt_quoting_style: Option<String>,
}

/// Points arrive either as an array or as a `;`-joined string.
fn deserialize_point<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Point {
        Joined(String),
        Parts(Vec<String>),
    }

    Ok(match Option::<Point>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(Point::Parts(parts)) => parts,
        Some(Point::Joined(joined)) => joined
            .split(';')
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect(),
    })
}

impl MarketDataCoordinate {
    pub fn new(mkt_type: impl Into<String>) -> Self {
        Self {
            mkt_type: mkt_type.into(),
            mkt_asset: None,
            mkt_class: None,
            mkt_point: Vec::new(),
            mkt_quoting_style: None,
        }
    }

    pub fn with_asset(mut self, asset: impl Into<String>) -> Self {
        self.mkt_asset = Some(asset.into());
        self
    }

    pub fn with_class(mut self, class: impl Into<String>) -> Self {
        self.mkt_class = Some(class.into());
        self
    }

    pub fn with_point<I, S>(mut self, point: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.mkt_point = point.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_quoting_style(mut self, style: impl Into<String>) -> Self {
        self.mkt_quoting_style = Some(style.into());
        self
    }
}

/// `TYPE_ASSET_CLASS_POINT1;POINT2.quotingStyle`, empty components omitted.
impl fmt::Display for MarketDataCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let point = self.mkt_point.join(";");
        let parts: Vec<&str> = [
            Some(self.mkt_type.as_str()),
            self.mkt_asset.as_deref(),
            self.mkt_class.as_deref(),
            (!point.is_empty()).then_some(point.as_str()),
        ]
        .into_iter()
        .flatten()
        .collect();
        f.write_str(&parts.join("_"))?;
        if let Some(style) = &self.mkt_quoting_style {
            write!(f, ".{style}")?;
        }
        Ok(())
    }
}

/// --- Frame ---

/// Row-oriented table of JSON records.
///
/// Serializes as an array of records, which is the shape the platform accepts for
/// tabular payloads and returns under `data` for dataset queries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Frame {
    rows: Vec<Map<String, Value>>,
}

impl Frame {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(rows: Vec<Map<String, Value>>) -> Self {
        Self { rows }
    }

    /// Build from an array of objects; `null` yields an empty frame.
    pub fn from_value(value: Value) -> Result<Self, MarqueeError> {
        match value {
            Value::Null => Ok(Self::new()),
            Value::Array(items) => {
                let mut rows = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        Value::Object(row) => rows.push(row),
                        other => {
                            return Err(MarqueeError::Type(format!(
                                "frame rows must be objects, got {other}"
                            )));
                        }
                    }
                }
                Ok(Self { rows })
            }
            other => Err(MarqueeError::Type(format!(
                "expected an array of records, got {other}"
            ))),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[Map<String, Value>] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Map<String, Value>> {
        self.rows
    }

    pub fn push(&mut self, row: Map<String, Value>) {
        self.rows.push(row);
    }

    pub fn append(&mut self, other: Frame) {
        self.rows.extend(other.rows);
    }

    pub fn concat<I>(frames: I) -> Self
    where
        I: IntoIterator<Item = Frame>,
    {
        let mut out = Frame::new();
        for frame in frames {
            out.append(frame);
        }
        out
    }

    /// Column names in first-seen order across all rows.
    pub fn columns(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut columns = Vec::new();
        for row in &self.rows {
            for key in row.keys() {
                if seen.insert(key.as_str()) {
                    columns.push(key.clone());
                }
            }
        }
        columns
    }

    /// Stable sort on the textual rendering of one column; missing values sort first.
    pub fn sort_by_column(&mut self, column: &str) {
        self.rows
            .sort_by_key(|row| row.get(column).map(cell_text).unwrap_or_default());
    }

    pub fn write_csv<W: io::Write>(&self, writer: W) -> Result<(), MarqueeError> {
        let columns = self.columns();
        let mut csv = csv::Writer::from_writer(writer);
        csv.write_record(&columns)?;
        for row in &self.rows {
            csv.write_record(
                columns
                    .iter()
                    .map(|column| row.get(column).map(cell_text).unwrap_or_default()),
            )?;
        }
        csv.flush()?;
        Ok(())
    }
}

impl FromIterator<Map<String, Value>> for Frame {
    fn from_iter<T: IntoIterator<Item = Map<String, Value>>>(iter: T) -> Self {
        Self {
            rows: iter.into_iter().collect(),
        }
    }
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn coordinate_display_omits_empty_parts() {
        let coord = MarketDataCoordinate::new("IR")
            .with_asset("USD")
            .with_class("Swap")
            .with_point(["10y"])
            .with_quoting_style("ATMRate");
        assert_eq!(coord.to_string(), "IR_USD_Swap_10y.ATMRate");
        assert_eq!(MarketDataCoordinate::new("FX").to_string(), "FX");
    }

    #[test]
    fn coordinate_point_accepts_joined_string() {
        let joined: MarketDataCoordinate = serde_json::from_value(json!({
            "mktType": "IR",
            "mktAsset": "USD",
            "mktPoint": "5y;10y"
        }))
        .unwrap();
        let parts: MarketDataCoordinate = serde_json::from_value(json!({
            "mktType": "IR",
            "mktAsset": "USD",
            "mktPoint": ["5y", "10y"]
        }))
        .unwrap();
        assert_eq!(joined, parts);
        assert_eq!(joined.mkt_point, vec!["5y", "10y"]);
    }

    #[test]
    fn frame_columns_follow_first_seen_order() {
        let frame = Frame::from_records(vec![
            row(json!({"date": "2024-01-02", "bbid": "A"})),
            row(json!({"bbid": "B", "close": 1.5})),
        ]);
        assert_eq!(frame.columns(), vec!["bbid", "date", "close"]);
    }

    #[test]
    fn frame_from_value_rejects_scalars() {
        assert!(Frame::from_value(json!(null)).unwrap().is_empty());
        assert_eq!(Frame::from_value(json!([{"a": 1}])).unwrap().len(), 1);
        assert!(matches!(
            Frame::from_value(json!([1, 2])),
            Err(MarqueeError::Type(_))
        ));
    }

    #[test]
    fn frame_writes_csv_with_blank_missing_cells() {
        let frame = Frame::from_records(vec![
            row(json!({"id": "A", "value": 1})),
            row(json!({"id": "B", "note": "x,y"})),
        ]);
        let mut out = Vec::new();
        frame.write_csv(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text, "id,value,note\nA,1,\nB,,\"x,y\"\n");
    }

    #[test]
    fn sort_by_column_orders_rows() {
        let mut frame = Frame::concat([
            Frame::from_records(vec![row(json!({"id": "C"}))]),
            Frame::from_records(vec![row(json!({"id": "A"})), row(json!({"id": "B"}))]),
        ]);
        frame.sort_by_column("id");
        let ids: Vec<_> = frame.rows().iter().map(|r| r["id"].clone()).collect();
        assert_eq!(ids, vec![json!("A"), json!("B"), json!("C")]);
    }
}
