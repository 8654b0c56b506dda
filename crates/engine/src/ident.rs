//! Order-identifier extraction.
//!
//! The id is normally parsed out of the order-number field's text. When
//! that fails, recovery strategies look at the page URL and a pattern
//! sweep over the page text, then fall back to the last id seen.

use once_cell::sync::Lazy;
use regex::Regex;
use shipharvest_locator::PagePort;
use tracing::debug;

static FIELD_TOKEN_RES: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"订单编号[：:\s]*([0-9A-Za-z\-]+)",
        r"(?i)order[\s_\-]?(?:id|no|number)[：:=\s]*([0-9A-Za-z\-]+)",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("field token regex"))
    .collect()
});

static URL_TOKEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)order[_=\-]?id=([A-Za-z0-9\-]+)").expect("url token regex"));

static PAGE_TOKEN_RES: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"订单编号[：:]\s*([0-9A-Za-z\-]{5,})",
        r"订单号[：:]\s*([0-9A-Za-z\-]{5,})",
        r"单号[：:]\s*([0-9A-Za-z\-]{5,})",
        r"(?i)order[\s_]?id[：:=]\s*([0-9A-Za-z\-]{5,})",
        r"(?i)order[\s_]?number[：:=]\s*([0-9A-Za-z\-]{5,})",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("page token regex"))
    .collect()
});

/// Parse an identifier token out of a field's text.
pub fn extract_token(text: &str) -> Option<String> {
    for pattern in FIELD_TOKEN_RES.iter() {
        if let Some(caps) = pattern.captures(text) {
            let token = caps[1].to_string();
            if !token.is_empty() {
                return Some(token);
            }
        }
    }
    None
}

/// Identifier visible anywhere on the current page, by recovery strategy
/// order: URL first, then a pattern sweep over the page text. Ids shorter
/// than 5 characters are treated as suspect and skipped.
pub async fn extract_from_page(page: &dyn PagePort) -> Option<String> {
    if let Ok(url) = page.current_url().await {
        if let Some(caps) = URL_TOKEN_RE.captures(&url) {
            let id = caps[1].to_string();
            debug!(id, "order id extracted from url");
            return Some(id);
        }
    }

    if let Ok(text) = page.page_text().await {
        for pattern in PAGE_TOKEN_RES.iter() {
            if let Some(caps) = pattern.captures(&text) {
                let id = caps[1].to_string();
                if id.len() >= 5 {
                    debug!(id, "order id extracted from page text");
                    return Some(id);
                }
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_from_labelled_field_text() {
        assert_eq!(
            extract_token("订单编号：SF2026-0801-42").as_deref(),
            Some("SF2026-0801-42")
        );
        assert_eq!(
            extract_token("Order No: AB12345").as_deref(),
            Some("AB12345")
        );
    }

    #[test]
    fn token_absent_yields_none() {
        assert_eq!(extract_token("没有编号的一行文本"), None);
        assert_eq!(extract_token(""), None);
    }
}
