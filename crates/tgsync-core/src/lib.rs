//! Core domain model for the Tatenpo Guide to kintone client sync.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};

pub mod normalize;
pub mod remark;

pub use normalize::{
    format_address, format_address_number, format_email, format_furigana, format_name,
    format_phone_number, normalize_width, to_fullwidth_kana, to_halfwidth_alnum,
};
pub use remark::{format_remark, join_remarks, merge_remark};

pub const CRATE_NAME: &str = "tgsync-core";

/// Field codes of the client app in the record store.
pub mod fields {
    pub const RECORD_ID: &str = "$id";
    pub const IDENTITY_KEY: &str = "重複キー";
    pub const TATENPO_CLIENT_ID: &str = "タテンポガイド顧客ID";
    pub const NAME: &str = "名前";
    pub const FURIGANA: &str = "フリガナ";
    pub const EMAIL: &str = "メールアドレス";
    pub const PHONE_PRIMARY: &str = "電話番号";
    pub const PHONE_SECONDARY: &str = "電話番号1";
    pub const PHONE_TERTIARY: &str = "電話番号2";
    pub const FAX: &str = "FAX番号";
    pub const POSTAL_CODE: &str = "郵便番号";
    pub const TODOFUKEN: &str = "都道府県";
    pub const SHIKUCHOSON: &str = "市区町村";
    pub const BANCHI: &str = "番地";
    pub const TATEMONO: &str = "建物名";
    pub const TATENPO_REMARK: &str = "タテンポガイド備考";
    pub const REMARK: &str = "備考";

    pub const RECIPIENTS: &str = "送付先情報";
    pub const RECIPIENT_NAME: &str = "送付先名前";
    pub const RECIPIENT_PHONE: &str = "送付先電話番号";
    pub const RECIPIENT_POSTAL_CODE: &str = "送付先郵便番号";
    pub const RECIPIENT_TODOFUKEN: &str = "送付先都道府県";
    pub const RECIPIENT_SHIKUCHOSON: &str = "送付先市区町村";
    pub const RECIPIENT_BANCHI: &str = "送付先番地";
    pub const RECIPIENT_TATEMONO: &str = "送付先建物名";

    /// Field code of the remark template app.
    pub const TEMPLATE: &str = "テンプレート";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportKind {
    Client,
    Order,
}

impl ImportKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::Client => "client",
            Self::Order => "order",
        }
    }
}

/// Japanese postal address split the way the Tatenpo export and the client app store it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub todofuken: String,
    pub shikuchoson: String,
    pub banchi: String,
    pub tatemono: String,
}

impl Address {
    pub fn new(
        todofuken: impl Into<String>,
        shikuchoson: impl Into<String>,
        banchi: impl Into<String>,
        tatemono: impl Into<String>,
    ) -> Self {
        Self {
            todofuken: todofuken.into(),
            shikuchoson: shikuchoson.into(),
            banchi: banchi.into(),
            tatemono: tatemono.into(),
        }
    }
}

/// Deduplication handle derived from a normalized (name, phone, address) triple.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityKey(String);

impl IdentityKey {
    /// Inputs must already be normalized; nothing but whitespace removal happens here.
    pub fn derive(name: &str, phone_number: &str, address: &Address) -> Self {
        let joined = format!(
            "{name}__{phone_number}__{}{}{}{}",
            address.todofuken, address.shikuchoson, address.banchi, address.tatemono
        );
        Self(joined.chars().filter(|c| !c.is_whitespace()).collect())
    }

    /// Wraps a key as read back from the store.
    pub fn from_stored(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One row of the `送付先情報` sub-table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    /// Store-assigned sub-table row id; `None` for rows this run appends.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_id: Option<String>,
    pub name: String,
    pub phone_number: String,
    pub postal_code: String,
    pub address: Address,
}

impl Recipient {
    /// Re-derived from the stored fields on every call; stored entries carry no key of their own.
    pub fn identity_key(&self) -> IdentityKey {
        IdentityKey::derive(&self.name, &self.phone_number, &self.address)
    }
}

/// Recipient tuple of an order row together with its derived key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipientCandidate {
    pub key: IdentityKey,
    pub entry: Recipient,
}

impl RecipientCandidate {
    pub fn new(entry: Recipient) -> Self {
        Self {
            key: entry.identity_key(),
            entry,
        }
    }
}

/// Fixed column list of one CSV export type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnSchema {
    pub kind: ImportKind,
    pub columns: &'static [&'static str],
}

impl ColumnSchema {
    pub fn contains(&self, column: &str) -> bool {
        self.columns.iter().any(|c| *c == column)
    }

    /// Schema columns absent from a parsed header row.
    pub fn missing_columns<'a>(&self, headers: impl IntoIterator<Item = &'a str>) -> Vec<&'static str> {
        let headers: Vec<&str> = headers.into_iter().collect();
        self.columns
            .iter()
            .copied()
            .filter(|column| !headers.contains(column))
            .collect()
    }
}

/// One CSV line keyed by the columns of its schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRow {
    schema: ColumnSchema,
    values: HashMap<String, String>,
}

impl RawRow {
    pub fn new(schema: ColumnSchema, values: HashMap<String, String>) -> Self {
        Self { schema, values }
    }

    pub fn from_pairs<K, V>(schema: ColumnSchema, pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            schema,
            values: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn schema(&self) -> ColumnSchema {
        self.schema
    }

    /// Missing values read as `""`. Asking for a column outside the schema is a programming error
    /// and trips in debug builds.
    pub fn get(&self, column: &str) -> &str {
        debug_assert!(
            self.schema.contains(column),
            "column {column} is not part of the {} schema",
            self.schema.kind.label()
        );
        self.values.get(column).map(String::as_str).unwrap_or("")
    }
}

/// A raw row enriched with normalized identity fields and its merged remark.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtendedRow {
    pub raw: RawRow,
    pub key: IdentityKey,
    pub name: String,
    pub address: Address,
    pub postal_code: String,
    /// First non-empty of the three phone numbers; part of the identity key.
    pub phone_number: String,
    pub primary_phone_number: String,
    pub secondary_phone_number: String,
    pub tertiary_phone_number: String,
    pub remark: String,
    /// Shipping party of an order row. Always `None` for client rows.
    pub recipient: Option<RecipientCandidate>,
}

/// Snapshot of a client app record as fetched before reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteClientRecord {
    pub id: String,
    pub identity_key: IdentityKey,
    pub remark: String,
    pub recipients: Vec<Recipient>,
}

/// Which remark field of the client app a flow writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemarkField {
    TatenpoGuide,
    General,
}

impl RemarkField {
    pub fn field_code(self) -> &'static str {
        match self {
            Self::TatenpoGuide => fields::TATENPO_REMARK,
            Self::General => fields::REMARK,
        }
    }
}

/// How new remark content is combined with a record's existing remark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemarkOrder {
    /// Existing remark first, new content appended after it.
    ExistingFirst,
    /// New content first, existing remark appended after it.
    NewFirst,
}

impl RemarkOrder {
    pub fn merge(self, existing: &str, new: &str) -> String {
        match self {
            Self::ExistingFirst => join_remarks(existing, new),
            Self::NewFirst => join_remarks(new, existing),
        }
    }
}

/// Full field set of a client record to be created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientRecordDraft {
    pub tatenpo_client_id: String,
    pub name: String,
    pub furigana: String,
    pub email: Option<String>,
    pub primary_phone_number: String,
    pub secondary_phone_number: String,
    pub tertiary_phone_number: String,
    pub fax_number: String,
    pub postal_code: String,
    pub remark_field: RemarkField,
    pub remark: String,
    pub address: Address,
    pub identity_key: IdentityKey,
    pub recipients: Vec<Recipient>,
}

/// Changed fields of an existing client record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientRecordPatch {
    pub id: String,
    pub remark_field: RemarkField,
    pub remark: Option<String>,
    /// Complete replacement sub-table (existing rows followed by appended ones).
    pub recipients: Option<Vec<Recipient>>,
}

/// One (year, month) unit of order import work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Scope {
    pub year: i32,
    pub month: u32,
}

impl Scope {
    pub fn new(year: i32, month: u32) -> Self {
        Self { year, month }
    }

    pub fn of(date: NaiveDate) -> Self {
        Self::new(date.year(), date.month())
    }

    /// Yesterday's month when it differs from today's (the first days of a month still finish
    /// the previous export), then today's.
    pub fn for_run_date(today: NaiveDate) -> Vec<Self> {
        let current = Self::of(today);
        let yesterday = Self::of(today - Duration::days(1));
        if yesterday == current {
            vec![current]
        } else {
            vec![yesterday, current]
        }
    }

    pub fn month_string(&self) -> String {
        format!("{:02}", self.month)
    }

    /// `yyyy_mm`, shared by the cache file and the export file names.
    pub fn token(&self) -> String {
        format!("{}_{}", self.year, self.month_string())
    }

    pub fn order_csv_path(&self, root: &Path) -> PathBuf {
        root.join(self.year.to_string())
            .join(self.month_string())
            .join(format!("tg_order_sells__{}.csv", self.token()))
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}年{}月", self.year, self.month)
    }
}
