//! kintone REST record store: paginated reads, bulk add/update, deletes.

use std::future::Future;

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use serde::Serialize;
use serde_json::{json, Map, Value as JsonValue};
use thiserror::Error;
use tgsync_core::{
    fields, Address, ClientRecordDraft, ClientRecordPatch, IdentityKey, Recipient, RemarkField,
    RemoteClientRecord,
};
use tracing::{info, warn};

use crate::http::{ApiClient, FetchError, RetryMode};

/// Records per GET page and per write sub-request.
pub const RECORDS_PER_REQUEST: usize = 100;
/// Sub-requests per bulkRequest call.
pub const REQUESTS_PER_BULK: usize = 20;
const PAGE_SIZE: usize = 500;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record store request failed: {0}")]
    Fetch(#[from] FetchError),
    #[error("unexpected record store response: {0}")]
    Malformed(String),
    /// A later `bulkRequest` call failed after earlier ones were committed.
    #[error("bulk write stopped after {committed} of {total} bulk requests were committed: {source}")]
    PartiallyCommitted {
        committed: usize,
        total: usize,
        /// Results of the committed calls.
        results: Vec<JsonValue>,
        #[source]
        source: Box<StoreError>,
    },
}

/// One entry of a bulk write. Adds always precede updates within a call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum BulkOperation {
    AddAll {
        app: u64,
        records: Vec<ClientRecordDraft>,
    },
    UpdateAll {
        app: u64,
        records: Vec<ClientRecordPatch>,
    },
}

impl BulkOperation {
    pub fn len(&self) -> usize {
        match self {
            Self::AddAll { records, .. } => records.len(),
            Self::UpdateAll { records, .. } => records.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Every record of `app`, restricted to `fields`.
    async fn fetch_all(&self, app: u64, fields: &[&str]) -> Result<Vec<JsonValue>, StoreError>;

    /// Submits adds and updates together; returns the per-request results.
    async fn bulk_write(&self, operations: &[BulkOperation]) -> Result<Vec<JsonValue>, StoreError>;

    async fn delete_records(&self, app: u64, ids: &[String]) -> Result<Vec<JsonValue>, StoreError>;
}

#[derive(Debug, Clone)]
pub enum KintoneAuth {
    ApiToken(String),
    Password { username: String, password: String },
}

impl KintoneAuth {
    fn header(&self) -> (&'static str, String) {
        match self {
            Self::ApiToken(token) => ("X-Cybozu-API-Token", token.clone()),
            Self::Password { username, password } => (
                "X-Cybozu-Authorization",
                general_purpose::STANDARD.encode(format!("{username}:{password}")),
            ),
        }
    }
}

#[derive(Debug, Clone)]
pub struct KintoneConfig {
    pub base_url: String,
    pub auth: KintoneAuth,
    pub guest_space_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct KintoneClient {
    http: ApiClient,
    config: KintoneConfig,
}

impl KintoneClient {
    pub fn new(http: ApiClient, config: KintoneConfig) -> Self {
        Self { http, config }
    }

    fn api_path(&self, endpoint: &str) -> String {
        let guest = self
            .config
            .guest_space_id
            .as_deref()
            .map(|id| format!("/guest/{id}"))
            .unwrap_or_default();
        format!("/k{guest}/v1/{endpoint}.json")
    }

    fn url(&self, endpoint: &str) -> String {
        format!(
            "{}{}",
            self.config.base_url.trim_end_matches('/'),
            self.api_path(endpoint)
        )
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let (name, value) = self.config.auth.header();
        builder.header(name, value)
    }
}

#[async_trait]
impl RecordStore for KintoneClient {
    async fn fetch_all(&self, app: u64, fields: &[&str]) -> Result<Vec<JsonValue>, StoreError> {
        let url = self.url("records");
        let mut requested: Vec<&str> = fields.to_vec();
        if !requested.contains(&fields::RECORD_ID) {
            requested.push(fields::RECORD_ID);
        }

        let mut records = Vec::new();
        let mut last_id: Option<u64> = None;
        loop {
            let mut params = vec![
                ("app".to_string(), app.to_string()),
                ("query".to_string(), page_query(last_id)),
            ];
            params.extend(
                requested
                    .iter()
                    .enumerate()
                    .map(|(i, field)| (format!("fields[{i}]"), field.to_string())),
            );

            let body = self
                .http
                .send_json(
                    |client| self.authorized(client.get(&url)).query(&params),
                    RetryMode::Transient,
                )
                .await?;
            let page = body
                .get("records")
                .and_then(JsonValue::as_array)
                .ok_or_else(|| StoreError::Malformed(format!("no records array for app {app}")))?;

            let page_len = page.len();
            for record in page {
                let id = field_str(record, fields::RECORD_ID);
                last_id = Some(id.parse().map_err(|_| {
                    StoreError::Malformed(format!("non-numeric $id {id:?} in app {app}"))
                })?);
                records.push(record.clone());
            }
            if page_len < PAGE_SIZE {
                break;
            }
        }

        info!(app, count = records.len(), "fetched records");
        Ok(records)
    }

    async fn bulk_write(&self, operations: &[BulkOperation]) -> Result<Vec<JsonValue>, StoreError> {
        let url = self.url("bulkRequest");
        let sub_requests = build_sub_requests(&self.api_path("records"), operations);
        let mut results = Vec::new();
        for chunk in sub_requests.chunks(REQUESTS_PER_BULK) {
            let body = json!({ "requests": chunk });
            let response = self
                .http
                .send_json(
                    |client| self.authorized(client.post(&url)).json(&body),
                    RetryMode::Never,
                )
                .await?;
            match response.get("results").and_then(JsonValue::as_array) {
                Some(batch) => results.extend(batch.iter().cloned()),
                None => {
                    return Err(StoreError::Malformed(
                        "bulkRequest response without results".to_string(),
                    ))
                }
            }
        }
        Ok(results)
    }

    async fn delete_records(&self, app: u64, ids: &[String]) -> Result<Vec<JsonValue>, StoreError> {
        let url = self.url("records");
        let mut results = Vec::new();
        for chunk in ids.chunks(RECORDS_PER_REQUEST) {
            let body = json!({ "app": app, "ids": chunk });
            let response = self
                .http
                .send_json(
                    |client| self.authorized(client.delete(&url)).json(&body),
                    RetryMode::Never,
                )
                .await?;
            results.push(response);
        }
        Ok(results)
    }
}

/// Sends sub-requests in calls of at most `REQUESTS_PER_BULK`. Each call is atomic on the store
/// side; a failure after the first call reports how many calls were committed.
pub async fn commit_in_batches<F, Fut>(
    sub_requests: &[JsonValue],
    mut send: F,
) -> Result<Vec<JsonValue>, StoreError>
where
    F: FnMut(JsonValue) -> Fut,
    Fut: Future<Output = Result<Vec<JsonValue>, StoreError>>,
{
    let total = sub_requests.chunks(REQUESTS_PER_BULK).len();
    let mut results = Vec::new();
    for (index, chunk) in sub_requests.chunks(REQUESTS_PER_BULK).enumerate() {
        match send(json!({ "requests": chunk })).await {
            Ok(batch) => results.extend(batch),
            Err(err) if index == 0 => return Err(err),
            Err(err) => {
                warn!(
                    committed = index,
                    total,
                    committed_results = results.len(),
                    error = %err,
                    "bulk write failed after earlier bulk requests were committed"
                );
                return Err(StoreError::PartiallyCommitted {
                    committed: index,
                    total,
                    results,
                    source: Box::new(err),
                });
            }
        }
    }
    Ok(results)
}

fn page_query(last_id: Option<u64>) -> String {
    let condition = last_id
        .map(|id| format!("$id > {id} "))
        .unwrap_or_default();
    format!("{condition}order by $id asc limit {PAGE_SIZE}")
}

/// Splits operations into store-sized sub-requests, adds and updates in the given order.
pub fn build_sub_requests(records_api: &str, operations: &[BulkOperation]) -> Vec<JsonValue> {
    let mut requests = Vec::new();
    for operation in operations {
        match operation {
            BulkOperation::AddAll { app, records } => {
                for chunk in records.chunks(RECORDS_PER_REQUEST) {
                    let records: Vec<JsonValue> = chunk.iter().map(draft_to_record).collect();
                    requests.push(json!({
                        "method": "POST",
                        "api": records_api,
                        "payload": { "app": app, "records": records },
                    }));
                }
            }
            BulkOperation::UpdateAll { app, records } => {
                for chunk in records.chunks(RECORDS_PER_REQUEST) {
                    let records: Vec<JsonValue> = chunk
                        .iter()
                        .map(|patch| json!({ "id": patch.id, "record": patch_to_record(patch) }))
                        .collect();
                    requests.push(json!({
                        "method": "PUT",
                        "api": records_api,
                        "payload": { "app": app, "records": records },
                    }));
                }
            }
        }
    }
    requests
}

fn value(v: impl Into<JsonValue>) -> JsonValue {
    json!({ "value": v.into() })
}

fn recipients_to_subtable(recipients: &[Recipient]) -> JsonValue {
    let rows: Vec<JsonValue> = recipients
        .iter()
        .map(|r| {
            let mut row = Map::new();
            if let Some(id) = &r.row_id {
                row.insert("id".into(), json!(id));
            }
            row.insert(
                "value".into(),
                json!({
                    fields::RECIPIENT_NAME: value(r.name.as_str()),
                    fields::RECIPIENT_PHONE: value(r.phone_number.as_str()),
                    fields::RECIPIENT_POSTAL_CODE: value(r.postal_code.as_str()),
                    fields::RECIPIENT_TODOFUKEN: value(r.address.todofuken.as_str()),
                    fields::RECIPIENT_SHIKUCHOSON: value(r.address.shikuchoson.as_str()),
                    fields::RECIPIENT_BANCHI: value(r.address.banchi.as_str()),
                    fields::RECIPIENT_TATEMONO: value(r.address.tatemono.as_str()),
                }),
            );
            JsonValue::Object(row)
        })
        .collect();
    value(rows)
}

pub fn draft_to_record(draft: &ClientRecordDraft) -> JsonValue {
    let mut record = Map::new();
    let mut put = |code: &str, v: &str| {
        record.insert(code.to_string(), value(v));
    };
    put(fields::TATENPO_CLIENT_ID, &draft.tatenpo_client_id);
    put(fields::NAME, &draft.name);
    put(fields::FURIGANA, &draft.furigana);
    if let Some(email) = &draft.email {
        put(fields::EMAIL, email);
    }
    put(fields::PHONE_PRIMARY, &draft.primary_phone_number);
    put(fields::PHONE_SECONDARY, &draft.secondary_phone_number);
    put(fields::PHONE_TERTIARY, &draft.tertiary_phone_number);
    put(fields::FAX, &draft.fax_number);
    put(fields::POSTAL_CODE, &draft.postal_code);
    put(draft.remark_field.field_code(), &draft.remark);
    put(fields::TODOFUKEN, &draft.address.todofuken);
    put(fields::SHIKUCHOSON, &draft.address.shikuchoson);
    put(fields::BANCHI, &draft.address.banchi);
    put(fields::TATEMONO, &draft.address.tatemono);
    put(fields::IDENTITY_KEY, draft.identity_key.as_str());
    record.insert(
        fields::RECIPIENTS.to_string(),
        recipients_to_subtable(&draft.recipients),
    );
    JsonValue::Object(record)
}

pub fn patch_to_record(patch: &ClientRecordPatch) -> JsonValue {
    let mut record = Map::new();
    if let Some(remark) = &patch.remark {
        record.insert(
            patch.remark_field.field_code().to_string(),
            value(remark.as_str()),
        );
    }
    if let Some(recipients) = &patch.recipients {
        record.insert(
            fields::RECIPIENTS.to_string(),
            recipients_to_subtable(recipients),
        );
    }
    JsonValue::Object(record)
}

/// String value of a field, `""` when absent or not a string.
pub fn field_str(record: &JsonValue, code: &str) -> String {
    record
        .get(code)
        .and_then(|field| field.get("value"))
        .and_then(JsonValue::as_str)
        .unwrap_or_default()
        .to_string()
}

fn parse_recipients(record: &JsonValue) -> Vec<Recipient> {
    let Some(rows) = record
        .get(fields::RECIPIENTS)
        .and_then(|field| field.get("value"))
        .and_then(JsonValue::as_array)
    else {
        return Vec::new();
    };
    rows.iter()
        .map(|row| {
            let cells = row.get("value").cloned().unwrap_or(JsonValue::Null);
            Recipient {
                row_id: row.get("id").and_then(JsonValue::as_str).map(str::to_string),
                name: field_str(&cells, fields::RECIPIENT_NAME),
                phone_number: field_str(&cells, fields::RECIPIENT_PHONE),
                postal_code: field_str(&cells, fields::RECIPIENT_POSTAL_CODE),
                address: Address {
                    todofuken: field_str(&cells, fields::RECIPIENT_TODOFUKEN),
                    shikuchoson: field_str(&cells, fields::RECIPIENT_SHIKUCHOSON),
                    banchi: field_str(&cells, fields::RECIPIENT_BANCHI),
                    tatemono: field_str(&cells, fields::RECIPIENT_TATEMONO),
                },
            }
        })
        .collect()
}

pub fn parse_client_record(record: &JsonValue, remark_field: RemarkField) -> RemoteClientRecord {
    RemoteClientRecord {
        id: field_str(record, fields::RECORD_ID),
        identity_key: IdentityKey::from_stored(field_str(record, fields::IDENTITY_KEY)),
        remark: field_str(record, remark_field.field_code()),
        recipients: parse_recipients(record),
    }
}

pub async fn fetch_client_snapshot(
    store: &dyn RecordStore,
    app: u64,
    remark_field: RemarkField,
) -> Result<Vec<RemoteClientRecord>, StoreError> {
    let records = store
        .fetch_all(
            app,
            &[
                fields::RECORD_ID,
                fields::IDENTITY_KEY,
                remark_field.field_code(),
                fields::RECIPIENTS,
            ],
        )
        .await?;
    Ok(records
        .iter()
        .map(|record| parse_client_record(record, remark_field))
        .collect())
}

pub async fn fetch_remark_templates(
    store: &dyn RecordStore,
    app: u64,
) -> Result<Vec<String>, StoreError> {
    let records = store.fetch_all(app, &[fields::TEMPLATE]).await?;
    Ok(records
        .iter()
        .map(|record| field_str(record, fields::TEMPLATE))
        .collect())
}

pub async fn fetch_record_ids(store: &dyn RecordStore, app: u64) -> Result<Vec<String>, StoreError> {
    let records = store.fetch_all(app, &[fields::RECORD_ID]).await?;
    Ok(records
        .iter()
        .map(|record| field_str(record, fields::RECORD_ID))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_draft(n: usize) -> ClientRecordDraft {
        ClientRecordDraft {
            tatenpo_client_id: format!("C{n}"),
            name: "山田太郎".into(),
            furigana: "ヤマダタロウ".into(),
            email: None,
            primary_phone_number: "0312345678".into(),
            secondary_phone_number: String::new(),
            tertiary_phone_number: String::new(),
            fax_number: String::new(),
            postal_code: "1000001".into(),
            remark_field: RemarkField::General,
            remark: "R-1, 2025/04/01".into(),
            address: Address::new("東京都", "千代田区", "1-1", ""),
            identity_key: IdentityKey::from_stored("山田太郎__0312345678__東京都千代田区1-1"),
            recipients: vec![Recipient {
                row_id: None,
                name: "佐藤花子".into(),
                phone_number: "0901111222".into(),
                postal_code: "1500001".into(),
                address: Address::new("東京都", "渋谷区", "2-2", ""),
            }],
        }
    }

    #[test]
    fn draft_serializes_to_field_value_objects() {
        let record = draft_to_record(&sample_draft(1));
        assert_eq!(record["名前"]["value"], "山田太郎");
        assert_eq!(record["備考"]["value"], "R-1, 2025/04/01");
        assert!(record.get("タテンポガイド備考").is_none());
        assert!(record.get("メールアドレス").is_none());
        assert_eq!(
            record["重複キー"]["value"],
            "山田太郎__0312345678__東京都千代田区1-1"
        );
        let rows = record["送付先情報"]["value"].as_array().unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].get("id").is_none());
        assert_eq!(rows[0]["value"]["送付先名前"]["value"], "佐藤花子");
    }

    #[test]
    fn patch_only_carries_changed_fields() {
        let patch = ClientRecordPatch {
            id: "42".into(),
            remark_field: RemarkField::TatenpoGuide,
            remark: Some("OLD\nNEW".into()),
            recipients: None,
        };
        let record = patch_to_record(&patch);
        assert_eq!(record["タテンポガイド備考"]["value"], "OLD\nNEW");
        assert_eq!(record.as_object().unwrap().len(), 1);
    }

    #[test]
    fn sub_requests_are_chunked_adds_first() {
        let operations = vec![
            BulkOperation::AddAll {
                app: 546,
                records: (0..150).map(sample_draft).collect(),
            },
            BulkOperation::UpdateAll {
                app: 546,
                records: vec![ClientRecordPatch {
                    id: "9".into(),
                    remark_field: RemarkField::General,
                    remark: Some("x".into()),
                    recipients: None,
                }],
            },
        ];
        let requests = build_sub_requests("/k/v1/records.json", &operations);
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[0]["method"], "POST");
        assert_eq!(requests[0]["payload"]["records"].as_array().unwrap().len(), 100);
        assert_eq!(requests[1]["payload"]["records"].as_array().unwrap().len(), 50);
        assert_eq!(requests[2]["method"], "PUT");
        assert_eq!(requests[2]["payload"]["records"][0]["id"], "9");
    }

    #[test]
    fn client_record_parsing_is_lenient() {
        let record = json!({
            "$id": { "type": "__ID__", "value": "12" },
            "重複キー": { "type": "SINGLE_LINE_TEXT", "value": "山田太郎__0312345678__東京都" },
            "送付先情報": { "type": "SUBTABLE", "value": [
                { "id": "301", "value": {
                    "送付先名前": { "type": "SINGLE_LINE_TEXT", "value": "佐藤花子" },
                    "送付先電話番号": { "type": "SINGLE_LINE_TEXT", "value": "0901111222" }
                }}
            ]}
        });
        let parsed = parse_client_record(&record, RemarkField::General);
        assert_eq!(parsed.id, "12");
        assert_eq!(parsed.remark, "");
        assert_eq!(parsed.recipients.len(), 1);
        assert_eq!(parsed.recipients[0].row_id.as_deref(), Some("301"));
        assert_eq!(parsed.recipients[0].name, "佐藤花子");
        assert_eq!(parsed.recipients[0].address, Address::default());
    }

    #[test]
    fn page_query_seeks_past_last_id() {
        assert_eq!(page_query(None), "order by $id asc limit 500");
        assert_eq!(page_query(Some(77)), "$id > 77 order by $id asc limit 500");
    }

    #[test]
    fn password_auth_is_base64_encoded() {
        let auth = KintoneAuth::Password {
            username: "user".into(),
            password: "pass".into(),
        };
        assert_eq!(
            auth.header(),
            ("X-Cybozu-Authorization", "dXNlcjpwYXNz".to_string())
        );
    }

    fn sub_requests(n: usize) -> Vec<JsonValue> {
        (0..n).map(|i| json!({ "method": "POST", "n": i })).collect()
    }

    #[tokio::test]
    async fn batches_respect_the_per_call_limit() {
        let mut calls = Vec::new();
        let results = commit_in_batches(&sub_requests(45), |body| {
            let size = body["requests"].as_array().map(Vec::len).unwrap_or(0);
            calls.push(size);
            async move { Ok(vec![json!({ "size": size })]) }
        })
        .await
        .expect("all batches");

        assert_eq!(calls, vec![20, 20, 5]);
        assert_eq!(results.len(), 3);
    }

    #[tokio::test]
    async fn failure_after_a_committed_call_reports_progress() {
        let mut call = 0;
        let err = commit_in_batches(&sub_requests(45), |_body| {
            call += 1;
            let n = call;
            async move {
                if n == 2 {
                    Err(StoreError::Malformed("boom".into()))
                } else {
                    Ok(vec![json!({ "call": n })])
                }
            }
        })
        .await
        .unwrap_err();

        match err {
            StoreError::PartiallyCommitted {
                committed,
                total,
                results,
                ..
            } => {
                assert_eq!((committed, total), (1, 3));
                assert_eq!(results, vec![json!({ "call": 1 })]);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn first_call_failure_is_returned_as_is() {
        let err = commit_in_batches(&sub_requests(3), |_body| async {
            Err(StoreError::Malformed("down".into()))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, StoreError::Malformed(_)));
    }
}
