//! Width, whitespace and glyph normalization for names, phones and addresses.

use std::sync::LazyLock;

use regex::Regex;
use unicode_normalization::UnicodeNormalization;

use crate::Address;

static WHITESPACE_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("static whitespace pattern"));

const BRACKET_OPEN: &str = "<＜(（【";
const BRACKET_CLOSE: &str = ")）】＞>";

/// (dedicated glyph, bracketed abbreviation, expansion). Order matters: `社` must not swallow
/// `一社` / `公社`, which the bracket anchoring guarantees.
const LEGAL_FORMS: &[(Option<char>, &str, &str)] = &[
    (Some('㈱'), "株", "株式会社"),
    (Some('㈲'), "有", "有限会社"),
    (None, "同", "合同会社"),
    (Some('㈾'), "資", "合資会社"),
    (Some('㈴'), "名", "合名会社"),
    (None, "医", "医療法人"),
    (None, "福", "社会福祉法人"),
    (None, "社", "社団法人"),
    (None, "一社", "一般社団法人"),
    (None, "公社", "公益社団法人"),
];

static LEGAL_FORM_PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    LEGAL_FORMS
        .iter()
        .map(|(glyph, abbreviation, expansion)| {
            let bracketed = format!(
                r"[{}]\s?{}\s?[{}]",
                regex::escape(BRACKET_OPEN),
                regex::escape(abbreviation),
                regex::escape(BRACKET_CLOSE)
            );
            let pattern = match glyph {
                Some(glyph) => format!("{}|{bracketed}", regex::escape(&glyph.to_string())),
                None => bracketed,
            };
            (
                Regex::new(&pattern).expect("static legal form pattern"),
                *expansion,
            )
        })
        .collect()
});

fn is_dash_like(c: char) -> bool {
    matches!(
        c,
        '\u{2010}' | '\u{2011}' | '\u{2012}' | '\u{2013}' | '\u{2014}' | '\u{2015}' | '\u{2212}'
            | '\u{30FC}' | '\u{FF70}'
    )
}

fn is_halfwidth_kana(c: char) -> bool {
    ('\u{FF61}'..='\u{FF9F}').contains(&c)
}

/// Full-width ASCII letters, digits and punctuation to their half-width forms.
pub fn to_halfwidth_alnum(input: &str) -> String {
    input
        .chars()
        .map(|c| match c {
            '\u{FF01}'..='\u{FF5E}' => char::from_u32(c as u32 - 0xFEE0).unwrap_or(c),
            '\u{3000}' => ' ',
            _ => c,
        })
        .collect()
}

/// Half-width katakana to full-width, composing voiced marks (`ｶﾞ` becomes `ガ`).
pub fn to_fullwidth_kana(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut run = String::new();
    for c in input.chars() {
        if is_halfwidth_kana(c) {
            run.push(c);
            continue;
        }
        if !run.is_empty() {
            out.extend(run.as_str().nfkc());
            run.clear();
        }
        out.push(c);
    }
    if !run.is_empty() {
        out.extend(run.as_str().nfkc());
    }
    out
}

/// Half-width alphanumerics and full-width katakana.
pub fn normalize_width(input: &str) -> String {
    to_fullwidth_kana(&to_halfwidth_alnum(input))
}

pub(crate) fn collapse_whitespace(input: &str) -> String {
    WHITESPACE_RUN.replace_all(input, " ").trim().to_string()
}

fn digits_only(input: &str) -> String {
    to_halfwidth_alnum(input)
        .chars()
        .filter(|c| c.is_ascii_digit())
        .collect()
}

/// Digits only with the trunk-prefix zero restored when the export dropped it.
pub fn format_phone_number(input: &str) -> String {
    let digits = digits_only(input);
    if digits.is_empty() || digits.starts_with('0') {
        digits
    } else {
        format!("0{digits}")
    }
}

/// Seven-digit postal code, zero padded on the left and cut to the rightmost seven digits.
/// An empty input stays empty.
pub fn format_address_number(input: &str) -> String {
    if input.is_empty() {
        return String::new();
    }
    let padded = format!("{:0>7}", digits_only(input));
    padded[padded.len() - 7..].to_string()
}

pub fn format_name(input: &str) -> String {
    let mut name = collapse_whitespace(&normalize_width(input));
    for (pattern, expansion) in LEGAL_FORM_PATTERNS.iter() {
        if pattern.is_match(&name) {
            name = pattern.replace_all(&name, *expansion).into_owned();
        }
    }
    name
}

pub fn format_furigana(input: &str) -> String {
    normalize_width(input)
}

pub fn format_email(input: &str) -> String {
    to_halfwidth_alnum(input).trim().to_lowercase()
}

fn format_address_part(input: &str) -> String {
    collapse_whitespace(&normalize_width(input))
        .chars()
        .map(|c| if is_dash_like(c) { '-' } else { c })
        .collect()
}

pub fn format_address(parts: &Address) -> Address {
    Address {
        todofuken: format_address_part(&parts.todofuken),
        shikuchoson: format_address_part(&parts.shikuchoson),
        banchi: format_address_part(&parts.banchi),
        tatemono: format_address_part(&parts.tatemono),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn halfwidth_conversion_covers_ascii_block() {
        assert_eq!(to_halfwidth_alnum("ＡＢＣ１２３！＠"), "ABC123!@");
        assert_eq!(to_halfwidth_alnum("東京　都"), "東京 都");
        assert_eq!(to_halfwidth_alnum(""), "");
    }

    #[test]
    fn halfwidth_kana_composes_voiced_marks() {
        assert_eq!(to_fullwidth_kana("ｶﾞｷﾞｸﾞ"), "ガギグ");
        assert_eq!(to_fullwidth_kana("ﾊﾟﾝ ｹｰｷ"), "パン ケーキ");
        assert_eq!(to_fullwidth_kana("abcｱ"), "abcア");
    }

    #[test]
    fn phone_numbers_are_digits_with_leading_zero() {
        assert_eq!(format_phone_number("03-1234-5678"), "0312345678");
        assert_eq!(format_phone_number("３１２３４５６７８"), "0312345678");
        assert_eq!(format_phone_number("(090) 1111 2222"), "09011112222");
        assert_eq!(format_phone_number(""), "");
        assert_eq!(format_phone_number("なし"), "");
    }

    #[test]
    fn phone_formatting_is_idempotent() {
        for input in ["03-1234-5678", "９０１１１１２２２２", "312345678", "0120 000 000"] {
            let once = format_phone_number(input);
            assert_eq!(format_phone_number(&once), once, "input {input}");
        }
        assert_eq!(
            format_phone_number("312345678"),
            format_phone_number("０３１２３４５６７８")
        );
    }

    #[test]
    fn postal_codes_are_seven_digits() {
        assert_eq!(format_address_number("100-0001"), "1000001");
        assert_eq!(format_address_number("〒１００－０００１"), "1000001");
        assert_eq!(format_address_number("60001"), "0060001");
        assert_eq!(format_address_number("123456789"), "3456789");
        assert_eq!(format_address_number("-"), "0000000");
        assert_eq!(format_address_number(""), "");
        for input in ["1", "12-34", "９９９－９９９９", "0001112223"] {
            let formatted = format_address_number(input);
            assert_eq!(formatted.len(), 7);
            assert!(formatted.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn legal_form_abbreviations_expand() {
        assert_eq!(format_name("ABC<株>商事"), "ABC株式会社商事");
        assert_eq!(format_name("㈱テスト"), "株式会社テスト");
        assert_eq!(format_name("テスト（有）"), "テスト有限会社");
        assert_eq!(format_name("【 同 】ワークス"), "合同会社ワークス");
        assert_eq!(format_name("(医)さくら会"), "医療法人さくら会");
        assert_eq!(format_name("＜福＞ひかり"), "社会福祉法人ひかり");
        assert_eq!(format_name("(一社)日本協会"), "一般社団法人日本協会");
        assert_eq!(format_name("(公社)日本協会"), "公益社団法人日本協会");
        assert_eq!(format_name("(社)日本協会"), "社団法人日本協会");
        assert_eq!(format_name("㈴山田商店"), "合名会社山田商店");
    }

    #[test]
    fn name_formatting_collapses_whitespace_and_is_idempotent() {
        assert_eq!(format_name("  山田　　太郎 "), "山田 太郎");
        assert_eq!(format_name("ﾔﾏﾀﾞ ﾀﾛｳ"), "ヤマダ タロウ");
        for input in ["ABC<株>商事", "ＡＢＣ　（株）", "ﾃｽﾄ㈲", "(一社) 協会", ""] {
            let once = format_name(input);
            assert_eq!(format_name(&once), once, "input {input}");
        }
    }

    #[test]
    fn address_dashes_are_canonical() {
        let formatted = format_address(&Address::new(
            " 東京都 ",
            "港区　芝公園",
            "４ー２―８",
            "ﾀﾜｰ  1–2F",
        ));
        assert_eq!(formatted.todofuken, "東京都");
        assert_eq!(formatted.shikuchoson, "港区 芝公園");
        assert_eq!(formatted.banchi, "4-2-8");
        assert_eq!(formatted.tatemono, "タワ- 1-2F");
    }

    #[test]
    fn email_is_lowercased_and_trimmed() {
        assert_eq!(format_email(" Taro.Yamada@Example.COM "), "taro.yamada@example.com");
        assert_eq!(format_email("ＴＡＲＯ＠ｅｘａｍｐｌｅ．ｊｐ"), "taro@example.jp");
    }
}
