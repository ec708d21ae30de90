//! Serialization shapes of the public request and response types.

use marquee_client::{
    ContentItem, DataQuery, DataSetEntity, Frame, GetContentsParams, GetCoverageParams,
    GetIdentifiersParams, GetSecuritiesParams, MarketDataCoordinate, Payload, SecuritiesPage,
    SecurityIdentifiers, TimeCadence, Unpacked, codec::query_pairs,
};
use chrono::{NaiveDate, TimeZone, Utc};
use serde_json::{Value, json};

fn query_of<T: serde::Serialize>(params: &T) -> Vec<(String, String)> {
    let payload = Payload::model(params).unwrap();
    query_pairs(payload.as_map().unwrap())
}

fn pairs(raw: &[(&str, &str)]) -> Vec<(String, String)> {
    raw.iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

// ============================================================================
// Query Parameter Tests
// ============================================================================

#[test]
fn securities_params_use_wire_names_and_skip_unset() {
    let params = GetSecuritiesParams {
        types: vec!["Common Stock".to_string(), "ETF".to_string()],
        effective_date: NaiveDate::from_ymd_opt(2024, 3, 1),
        limit: Some(100),
        ..Default::default()
    };
    assert_eq!(
        query_of(&params),
        pairs(&[
            ("effectiveDate", "2024-03-01"),
            ("limit", "100"),
            ("type", "Common Stock"),
            ("type", "ETF"),
        ])
    );
}

#[test]
fn identifiers_params_send_id_type() {
    let params = GetIdentifiersParams {
        id_types: vec!["cusip".to_string()],
        offset_key: Some("abc".to_string()),
        ..Default::default()
    };
    assert_eq!(
        query_of(&params),
        pairs(&[("idType", "cusip"), ("offsetKey", "abc")])
    );
}

#[test]
fn coverage_params_are_camel_case() {
    let params = GetCoverageParams {
        limit: Some(10),
        fields: vec!["assetId".to_string()],
        include_history: Some(true),
    };
    assert_eq!(
        query_of(&params),
        pairs(&[("fields", "assetId"), ("includeHistory", "true"), ("limit", "10")])
    );
}

#[test]
fn contents_params_use_singular_filter_names() {
    let params = GetContentsParams {
        limit: Some(5),
        asset_ids: vec!["MA123".to_string()],
        author_ids: vec!["A1".to_string()],
        tags: vec!["rates".to_string()],
        order_by: Some(">createdTime".to_string()),
        ..Default::default()
    };
    assert_eq!(
        query_of(&params),
        pairs(&[
            ("assetId", "MA123"),
            ("authorId", "A1"),
            ("limit", "5"),
            ("orderBy", ">createdTime"),
            ("tag", "rates"),
        ])
    );
}

#[test]
fn empty_params_produce_no_query() {
    assert!(query_of(&GetSecuritiesParams::default()).is_empty());
    assert!(query_of(&GetContentsParams::default()).is_empty());
}

// ============================================================================
// Request Body Tests
// ============================================================================

#[test]
fn data_query_body_uses_where_and_iso_times() {
    let query = DataQuery {
        start_time: Some(Utc.with_ymd_and_hms(2024, 1, 2, 9, 30, 0).unwrap()),
        end_time: Some(Utc.with_ymd_and_hms(2024, 1, 2, 10, 30, 0).unwrap()),
        fields: vec!["spot".to_string()],
        ..Default::default()
    }
    .with_where("bbid", ["EURUSD"]);

    let body = serde_json::to_value(&query).unwrap();
    assert_eq!(
        body,
        json!({
            "where": {"bbid": ["EURUSD"]},
            "startTime": "2024-01-02T09:30:00Z",
            "endTime": "2024-01-02T10:30:00Z",
            "fields": ["spot"]
        })
    );
}

#[test]
fn coordinate_serializes_without_empty_components() {
    let coordinate = MarketDataCoordinate::new("FX")
        .with_asset("EURUSD")
        .with_quoting_style("Spot");
    assert_eq!(
        serde_json::to_value(&coordinate).unwrap(),
        json!({"mktType": "FX", "mktAsset": "EURUSD", "mktQuotingStyle": "Spot"})
    );
    assert_eq!(coordinate.to_string(), "FX_EURUSD.Spot");
}

#[test]
fn frame_serializes_as_records() {
    let frame = Frame::from_value(json!([{"a": 1}, {"a": 2, "b": "x"}])).unwrap();
    assert_eq!(frame.columns(), vec!["a".to_string(), "b".to_string()]);
    assert_eq!(
        serde_json::to_value(&frame).unwrap(),
        json!([{"a": 1}, {"a": 2, "b": "x"}])
    );
}

// ============================================================================
// Response Deserialization Tests
// ============================================================================

#[test]
fn dataset_definition_keeps_unknown_fields() {
    let json = r#"{
        "id": "FXIMPLIEDVOL",
        "name": "FX Implied Volatility",
        "parameters": {"historyDate": "2005-01-03", "frequency": "Daily", "category": "FX"},
        "dimensions": {
            "timeField": "date",
            "symbolDimensions": ["assetId"],
            "measures": [{"field": "impliedVolatility"}]
        },
        "entitlements": {"query": ["group:x"]}
    }"#;
    let dataset: DataSetEntity = serde_json::from_str(json).unwrap();
    assert_eq!(dataset.time_cadence().unwrap(), TimeCadence::Date);
    assert_eq!(dataset.symbol_dimension().unwrap(), "assetId");
    assert!(dataset.extra.contains_key("entitlements"));
    assert_eq!(
        dataset.parameters.unwrap().extra.get("category"),
        Some(&json!("FX"))
    );
}

#[test]
fn securities_page_parses_offset_key() {
    let json = r#"{
        "results": [{"id": "MA4B66MW5E27U8P32SB", "name": "Goldman Sachs", "type": "Common Stock",
                     "identifiers": {"ticker": "GS", "bbid": "GS UN"}, "currency": "USD"}],
        "totalResults": 12,
        "offsetKey": "next-page"
    }"#;
    let page: SecuritiesPage = serde_json::from_str(json).unwrap();
    assert_eq!(page.offset_key.as_deref(), Some("next-page"));
    assert_eq!(page.total_results, Some(12));
    let security = &page.results[0];
    assert_eq!(security.identifiers["bbid"], json!("GS UN"));
    assert_eq!(security.extra["currency"], json!("USD"));
}

#[test]
fn security_identifiers_parse_history_entries() {
    let record: SecurityIdentifiers = serde_json::from_value(json!({
        "id": "MA4B66MW5E27U8P32SB",
        "identifiers": [
            {"type": "ticker", "value": "GS", "startDate": "1999-05-04"},
            {"type": "cusip", "value": "38141G104"}
        ]
    }))
    .unwrap();
    assert_eq!(record.identifiers.len(), 2);
}

#[test]
fn content_item_defaults_missing_lists() {
    let item: ContentItem = serde_json::from_value(json!({"id": "c1", "language": "en"})).unwrap();
    assert!(item.channels.is_empty());
    assert!(item.author_ids.is_empty());
    assert_eq!(item.extra["language"], json!("en"));
}

#[test]
fn unpacked_results_keep_envelope_fields() {
    let value = json!({"results": [{"id": "c1"}, null], "totalResults": 2, "scrollId": "s"});
    match Unpacked::<ContentItem>::from_value(value).unwrap() {
        Unpacked::Paged { results, rest } => {
            assert_eq!(results.len(), 2);
            assert!(results[1].is_none());
            assert_eq!(rest.get("scrollId"), Some(&Value::from("s")));
        }
        other => panic!("expected a paged body, got {other:?}"),
    }
}
