//! Headline template rendering.
//!
//! Templates carry named placeholders in braces — `{scope_name}`,
//! `{overdue_count}`, `{gap_days}` and friends. Values come from the
//! signal group's context; a placeholder with no supplied value renders
//! its neutral default rather than leaking the raw brace form.

use std::collections::HashMap;

/// Neutral default for a placeholder the context did not supply.
fn default_for(key: &str) -> &'static str {
    match key {
        "scope_name" => "Unknown",
        "currency" => "AED",
        "bucket" => "30+",
        // counts, amounts, gap_days
        _ => "0",
    }
}

/// Substitute `{name}` placeholders from the context map.
pub fn render(template: &str, ctx: &HashMap<&str, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) => {
                let key = &after[..close];
                match ctx.get(key) {
                    Some(value) => out.push_str(value),
                    None => out.push_str(default_for(key)),
                }
                rest = &after[close + 1..];
            }
            None => {
                // Unterminated brace: keep the literal text
                out.push_str(&rest[open..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}
