//! Remark cleanup: boilerplate template stripping and newline accumulation.

use crate::normalize::{collapse_whitespace, normalize_width};

fn strip_line_breaks(input: &str) -> String {
    input.chars().filter(|c| !matches!(c, '\n' | '\r')).collect()
}

/// Removes line breaks, deletes every literal occurrence of each template in the order given,
/// then normalizes width and whitespace.
///
/// Templates are pre-seeded phrases the Tatenpo UI inserts into the remark box; what remains is
/// the operator's own note. Overlapping templates are applied sequentially, so an earlier removal
/// can change what a later template matches.
pub fn format_remark<S: AsRef<str>>(text: &str, templates: &[S]) -> String {
    let mut remark = strip_line_breaks(text);
    for template in templates {
        let template = strip_line_breaks(template.as_ref());
        if template.is_empty() {
            continue;
        }
        remark = remark.replace(&template, "");
    }
    collapse_whitespace(&normalize_width(&remark))
}

/// Normalizes a newline-joined pair without template stripping. The line break itself is removed
/// along with every other one.
pub fn merge_remark(a: &str, b: &str) -> String {
    format_remark::<&str>(&format!("{a}\n{b}"), &[])
}

/// Newline join used when remarks accumulate across rows; an empty side yields the other.
pub fn join_remarks(a: &str, b: &str) -> String {
    match (a.is_empty(), b.is_empty()) {
        (true, _) => b.to_string(),
        (_, true) => a.to_string(),
        _ => format!("{a}\n{b}"),
    }
}
