use std::fs;

use tempfile::tempdir;
use tgsync_adapters::{adapter_for_kind, read_rows, SourceError, ORDER_SCHEMA};
use tgsync_core::{ImportKind, Scope};

fn order_export() -> String {
    let header = ORDER_SCHEMA.columns.join(",");
    let mut row_a = vec![""; ORDER_SCHEMA.columns.len()];
    let mut row_b = row_a.clone();
    let set = |row: &mut Vec<&'static str>, column: &str, value: &'static str| {
        let index = ORDER_SCHEMA
            .columns
            .iter()
            .position(|c| *c == column)
            .expect("column in schema");
        row[index] = value;
    };
    set(&mut row_a, "受注ID", "A-1");
    set(&mut row_a, "受注日時", "2025/04/01 09:00");
    set(&mut row_a, "注文者氏名", "ｽｽﾞｷ 商事（株）");
    set(&mut row_a, "注文者電話番号", "０３－１２３４－５６７８");
    set(&mut row_a, "注文者都道府県", "大阪府");
    set(&mut row_a, "送付先氏名", "ｽｽﾞｷ 商事（株）");
    set(&mut row_a, "送付先電話番号", "0312345678");
    set(&mut row_a, "送付先都道府県", "大阪府");
    set(&mut row_b, "受注ID", "A-2");
    set(&mut row_b, "受注日時", "2025/04/02 09:00");
    set(&mut row_b, "備考", "\"再配達, 夕方\"");
    set(&mut row_b, "注文者氏名", "スズキ商事株式会社");
    set(&mut row_b, "注文者電話番号", "3-1234-5678");
    set(&mut row_b, "注文者都道府県", "大阪府");
    format!("{header}\r\n{}\r\n{}\r\n", row_a.join(","), row_b.join(","))
}

#[tokio::test]
async fn order_export_rows_collapse_to_one_identity() {
    let dir = tempdir().expect("tempdir");
    let scope = Scope::new(2025, 4);
    let path = scope.order_csv_path(dir.path());
    fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
    fs::write(&path, order_export()).expect("write export");

    let adapter = adapter_for_kind(ImportKind::Order);
    let parsed = read_rows(&path, adapter.schema())
        .await
        .expect("parse export");
    assert!(parsed.warnings.is_empty(), "{:?}", parsed.warnings);
    assert!(parsed.missing_columns.is_empty());
    assert_eq!(parsed.rows.len(), 2);

    let rows: Vec<_> = parsed
        .rows
        .into_iter()
        .map(|raw| adapter.extend_row(raw, &[]))
        .collect();
    assert_eq!(rows[0].key, rows[1].key);
    assert_eq!(rows[0].key.as_str(), "スズキ商事株式会社__0312345678__大阪府");
    assert_eq!(rows[1].remark, "A-2, 2025/04/02 09:00, 再配達, 夕方");
}

#[tokio::test]
async fn missing_export_reports_not_found() {
    let dir = tempdir().expect("tempdir");
    let adapter = adapter_for_kind(ImportKind::Order);
    let err = read_rows(
        &Scope::new(2025, 5).order_csv_path(dir.path()),
        adapter.schema(),
    )
    .await
    .expect_err("no export");
    assert!(matches!(err, SourceError::NotFound(_)));
}
