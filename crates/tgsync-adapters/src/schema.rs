//! Column lists of the two Tatenpo Guide exports.

use tgsync_core::{ColumnSchema, ImportKind};

pub const CLIENT_COLUMNS: &[&str] = &[
    "使用区分",
    "顧客ID",
    "顧客コード",
    "顧客ランク",
    "法人名・団体名",
    "法人名・団体名(フリガナ)",
    "部署名",
    "電話番号(会社)",
    "名前",
    "フリガナ",
    "ニックネーム",
    "性別",
    "メールアドレス",
    "メールアドレス２",
    "【電話番号】",
    "電話番号1",
    "電話番号２",
    "FAX番号",
    "国",
    "郵便番号",
    "都道府県",
    "市区町村",
    "番地",
    "建物名",
    "お知らせメール受取フラグ",
    "備考",
    "請求締切有無",
    "請求締グループID",
    "回収サイクル",
    "回収日",
    "購入累計金額",
    "購入回数",
];

pub const ORDER_COLUMNS: &[&str] = &[
    "受注ID",
    "受注ステータス",
    "受注日時",
    "ECサイト",
    "ECサイトの受注番号",
    "受注方法",
    "備考",
    "担当者備考",
    "キャンセル理由",
    "キャンセル備考",
    "受注区分",
    "在庫引当",
    "請求区分",
    "入金区分",
    "配送区分",
    "支払い方法",
    "与信処理日時",
    "請求処理日時",
    "入金日",
    "入金済額",
    "顧客マスタID",
    "注文者氏名",
    "注文者カナ",
    "注文者法人名・団体名",
    "注文者電話番号",
    "注文者電話番号２",
    "注文者FAX番号",
    "注文者電話番号(会社)",
    "注文者メールアドレス",
    "注文者メールアドレス２",
    "注文者郵便番号",
    "注文者都道府県",
    "注文者市区町村",
    "注文者番地",
    "注文者建物名",
    "性別",
    "お知らせメール受取フラグ",
    "Yahoo!ID",
    "楽天スーパーDEAL",
    "送付先氏名",
    "送付先カナ",
    "送付先法人名・団体名",
    "送付先郵便番号",
    "送付先都道府県",
    "送付先市区町村",
    "送付先番地",
    "送付先建物名",
    "送付先電話番号",
    "配送方法",
    "配送希望日",
    "配送希望時間",
];

pub const CLIENT_SCHEMA: ColumnSchema = ColumnSchema {
    kind: ImportKind::Client,
    columns: CLIENT_COLUMNS,
};

pub const ORDER_SCHEMA: ColumnSchema = ColumnSchema {
    kind: ImportKind::Order,
    columns: ORDER_COLUMNS,
};

pub fn schema_for(kind: ImportKind) -> ColumnSchema {
    match kind {
        ImportKind::Client => CLIENT_SCHEMA,
        ImportKind::Order => ORDER_SCHEMA,
    }
}

/// Order id column used by the idempotency cache.
pub const ORDER_ID: &str = "受注ID";

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn schemas_have_expected_width_and_no_duplicates() {
        assert_eq!(CLIENT_COLUMNS.len(), 32);
        assert_eq!(ORDER_COLUMNS.len(), 51);
        for columns in [CLIENT_COLUMNS, ORDER_COLUMNS] {
            let unique: HashSet<_> = columns.iter().collect();
            assert_eq!(unique.len(), columns.len());
        }
        assert!(ORDER_SCHEMA.contains(ORDER_ID));
    }
}
