//! Import adapters: one per Tatenpo Guide export type.
//!
//! An adapter owns everything that differs between the client and the order flow: the column
//! schema, how a raw row is extended, which remark field it writes, how new remark content is
//! merged onto an existing record, and how a new record is drafted.

use tgsync_core::{
    format_email, format_furigana, format_phone_number, normalize_width, ClientRecordDraft,
    ColumnSchema, ExtendedRow, ImportKind, RawRow, Recipient, RecipientCandidate, RemarkField,
    RemarkOrder,
};

pub mod csv_source;
pub mod extend;
pub mod schema;

pub use csv_source::{read_rows, read_rows_from_reader, ParseWarning, ParsedCsv, SourceError};
pub use extend::{extend_client_row, extend_order_row};
pub use schema::{schema_for, CLIENT_SCHEMA, ORDER_ID, ORDER_SCHEMA};

pub const CRATE_NAME: &str = "tgsync-adapters";

pub trait ImportAdapter: Send + Sync {
    fn kind(&self) -> ImportKind;
    fn schema(&self) -> ColumnSchema;
    fn remark_field(&self) -> RemarkField;
    fn remark_order(&self) -> RemarkOrder;

    /// Whether an UPDATE target may carry appended recipients.
    fn tracks_recipients(&self) -> bool {
        false
    }

    fn extend_row(&self, raw: RawRow, templates: &[String]) -> ExtendedRow;

    /// Last pass over a merged UPDATE remark before it is written.
    fn finish_update_remark(&self, merged: String) -> String {
        merged
    }

    /// Builds the ADD payload for the first row of a key, its accumulated remark and the distinct
    /// recipients seen for that key.
    fn draft(
        &self,
        row: &ExtendedRow,
        remark: &str,
        recipients: &[RecipientCandidate],
    ) -> ClientRecordDraft;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ClientImportAdapter;

impl ImportAdapter for ClientImportAdapter {
    fn kind(&self) -> ImportKind {
        ImportKind::Client
    }

    fn schema(&self) -> ColumnSchema {
        CLIENT_SCHEMA
    }

    fn remark_field(&self) -> RemarkField {
        RemarkField::TatenpoGuide
    }

    fn remark_order(&self) -> RemarkOrder {
        RemarkOrder::ExistingFirst
    }

    fn extend_row(&self, raw: RawRow, templates: &[String]) -> ExtendedRow {
        extend_client_row(raw, templates)
    }

    fn finish_update_remark(&self, merged: String) -> String {
        normalize_width(&merged)
    }

    fn draft(
        &self,
        row: &ExtendedRow,
        remark: &str,
        _recipients: &[RecipientCandidate],
    ) -> ClientRecordDraft {
        let raw = &row.raw;
        // A client is its own first delivery recipient.
        let own = Recipient {
            row_id: None,
            name: row.name.clone(),
            phone_number: row.phone_number.clone(),
            postal_code: row.postal_code.clone(),
            address: row.address.clone(),
        };
        ClientRecordDraft {
            tatenpo_client_id: raw.get("顧客ID").to_string(),
            name: row.name.clone(),
            furigana: format_furigana(raw.get("フリガナ")),
            email: Some(format_email(raw.get("メールアドレス"))),
            primary_phone_number: row.primary_phone_number.clone(),
            secondary_phone_number: row.secondary_phone_number.clone(),
            tertiary_phone_number: row.tertiary_phone_number.clone(),
            fax_number: format_phone_number(raw.get("FAX番号")),
            postal_code: row.postal_code.clone(),
            remark_field: self.remark_field(),
            remark: remark.to_string(),
            address: row.address.clone(),
            identity_key: row.key.clone(),
            recipients: vec![own],
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct OrderImportAdapter;

impl ImportAdapter for OrderImportAdapter {
    fn kind(&self) -> ImportKind {
        ImportKind::Order
    }

    fn schema(&self) -> ColumnSchema {
        ORDER_SCHEMA
    }

    fn remark_field(&self) -> RemarkField {
        RemarkField::General
    }

    fn remark_order(&self) -> RemarkOrder {
        RemarkOrder::NewFirst
    }

    fn tracks_recipients(&self) -> bool {
        true
    }

    fn extend_row(&self, raw: RawRow, templates: &[String]) -> ExtendedRow {
        extend_order_row(raw, templates)
    }

    fn draft(
        &self,
        row: &ExtendedRow,
        remark: &str,
        recipients: &[RecipientCandidate],
    ) -> ClientRecordDraft {
        let raw = &row.raw;
        ClientRecordDraft {
            tatenpo_client_id: raw.get("顧客マスタID").to_string(),
            name: row.name.clone(),
            furigana: format_furigana(raw.get("注文者カナ")),
            email: None,
            primary_phone_number: row.primary_phone_number.clone(),
            secondary_phone_number: row.secondary_phone_number.clone(),
            tertiary_phone_number: row.tertiary_phone_number.clone(),
            fax_number: format_phone_number(raw.get("注文者FAX番号")),
            postal_code: row.postal_code.clone(),
            remark_field: self.remark_field(),
            remark: remark.to_string(),
            address: row.address.clone(),
            identity_key: row.key.clone(),
            recipients: recipients.iter().map(|c| c.entry.clone()).collect(),
        }
    }
}

pub fn adapter_for_kind(kind: ImportKind) -> Box<dyn ImportAdapter> {
    match kind {
        ImportKind::Client => Box::new(ClientImportAdapter),
        ImportKind::Order => Box::new(OrderImportAdapter),
    }
}
