use tgsync_core::{
    format_address, format_address_number, format_name, format_phone_number, format_remark,
    Address, ExtendedRow, IdentityKey, RawRow, Recipient, RecipientCandidate,
};

fn address_of(raw: &RawRow, columns: [&str; 4]) -> Address {
    format_address(&Address::new(
        raw.get(columns[0]),
        raw.get(columns[1]),
        raw.get(columns[2]),
        raw.get(columns[3]),
    ))
}

fn first_non_empty<'a>(phones: [&'a str; 3]) -> &'a str {
    phones.into_iter().find(|p| !p.is_empty()).unwrap_or("")
}

pub fn extend_client_row<S: AsRef<str>>(raw: RawRow, templates: &[S]) -> ExtendedRow {
    let name = format_name(raw.get("名前"));
    let address = address_of(&raw, ["都道府県", "市区町村", "番地", "建物名"]);
    let primary = format_phone_number(raw.get("【電話番号】"));
    let secondary = format_phone_number(raw.get("電話番号1"));
    let tertiary = format_phone_number(raw.get("電話番号２"));
    let phone_number = first_non_empty([&primary, &secondary, &tertiary]).to_string();
    let key = IdentityKey::derive(&name, &phone_number, &address);

    ExtendedRow {
        postal_code: format_address_number(raw.get("郵便番号")),
        remark: format_remark(raw.get("備考"), templates),
        key,
        name,
        address,
        phone_number,
        primary_phone_number: primary,
        secondary_phone_number: secondary,
        tertiary_phone_number: tertiary,
        recipient: None,
        raw,
    }
}

/// `"{受注ID}, {受注日時}"` plus `", {備考}"` when the order has a remark.
fn order_remark_source(raw: &RawRow) -> String {
    let mut text = format!("{}, {}", raw.get("受注ID"), raw.get("受注日時"));
    let remark = raw.get("備考");
    if !remark.is_empty() {
        text.push_str(", ");
        text.push_str(remark);
    }
    text
}

pub fn extend_order_row<S: AsRef<str>>(raw: RawRow, templates: &[S]) -> ExtendedRow {
    let name = format_name(raw.get("注文者氏名"));
    let address = address_of(
        &raw,
        ["注文者都道府県", "注文者市区町村", "注文者番地", "注文者建物名"],
    );
    let primary = format_phone_number(raw.get("注文者電話番号"));
    let secondary = format_phone_number(raw.get("注文者電話番号(会社)"));
    let tertiary = format_phone_number(raw.get("注文者電話番号２"));
    let phone_number = first_non_empty([&primary, &secondary, &tertiary]).to_string();
    let key = IdentityKey::derive(&name, &phone_number, &address);

    let recipient = RecipientCandidate::new(Recipient {
        row_id: None,
        name: format_name(raw.get("送付先氏名")),
        phone_number: format_phone_number(raw.get("送付先電話番号")),
        postal_code: format_address_number(raw.get("送付先郵便番号")),
        address: address_of(
            &raw,
            ["送付先都道府県", "送付先市区町村", "送付先番地", "送付先建物名"],
        ),
    });

    ExtendedRow {
        postal_code: format_address_number(raw.get("注文者郵便番号")),
        remark: format_remark(&order_remark_source(&raw), templates),
        key,
        name,
        address,
        phone_number,
        primary_phone_number: primary,
        secondary_phone_number: secondary,
        tertiary_phone_number: tertiary,
        recipient: Some(recipient),
        raw,
    }
}
