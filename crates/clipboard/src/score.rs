//! Plausibility scoring for captured clipboard content.
//!
//! Shipping records have a recognisable shape: a name line, a phone line,
//! then address lines with administrative-division suffixes or warehouse
//! codes. Everything else that lands on the clipboard — source code,
//! element-config JSON, diagnostic logs — has equally recognisable shapes
//! and is rejected outright.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

const VALID_THRESHOLD: i32 = 50;

static ERROR_INDICATORS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"\[\d{2}:\d{2}:\d{2}\].*(错误|异常|Exception|Error)",
        r"Traceback \(most recent call last\)",
        r"Exception in thread",
        r"cannot access local variable",
        r"ImportError:",
        r"AttributeError:",
        r"TypeError:",
        r"ValueError:",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("error indicator regex"))
    .collect()
});

static CODE_INDICATORS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"def\s+\w+\(.*\):",
        r"class\s+\w+\(.*\):",
        r"import\s+\w+",
        r"from\s+\w+\s+import",
        r"fn\s+\w+\(",
        r"return\s+",
        r"if\s+.*:",
        r"else:",
        r"elif\s+.*:",
        r"for\s+.*\s+in\s+.*:",
        r"while\s+.*:",
        r"try:",
        r"except",
        r"finally:",
        r"```",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("code indicator regex"))
    .collect()
});

static CONFIG_INDICATORS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r#""full_text"\s*:"#,
        r#""chinese_only"\s*:"#,
        r#""xpath"\s*:"#,
        r#""locator"\s*:"#,
        r#""action"\s*:"#,
        r#""custom_name"\s*:"#,
        r#""element_type"\s*:"#,
        r#""captured_at"\s*:"#,
        r"/html/body/div\[\d+\]",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("config indicator regex"))
    .collect()
});

static PHONE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        // Mobile numbers.
        r"1[3-9]\d{9}",
        // Landlines like 021-53395199.
        r"\d{3,4}-\d{7,8}",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("phone regex"))
    .collect()
});

static ADDRESS_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        // Administrative-division and street suffixes.
        r"(省|市|区|县|镇|乡|村|路|街|号楼|单元|室)",
        r"[东南西北中]门",
        // Warehouse codes like 2号库@DX-5E74D2M6D-F#.
        r"[A-Za-z0-9#@\-]+号?库",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("address regex"))
    .collect()
});

const SUSPICIOUS_TERMS: &[&str] = &[
    "error", "exception", "failed", "undefined", "null", "错误", "异常", "失败", "未定义", "空值",
];

/// Length bounds for acceptable content.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreLimits {
    pub min_length: usize,

    /// Content beyond this is presumed stray log/debug text, not shipping
    /// data.
    pub max_length: usize,
}

impl Default for ScoreLimits {
    fn default() -> Self {
        Self {
            min_length: 5,
            max_length: 1000,
        }
    }
}

/// Scoring verdict for one candidate text.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ContentScore {
    pub valid: bool,
    pub confidence: i32,
    pub reason: String,
}

impl ContentScore {
    fn rejected(reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            confidence: 0,
            reason: reason.into(),
        }
    }
}

/// Score content for plausibility as shipping data.
pub fn score(content: &str, limits: &ScoreLimits) -> ContentScore {
    let content = content.trim();
    if content.is_empty() || content.chars().count() < limits.min_length {
        return ContentScore::rejected("content empty or too short");
    }
    if content.chars().count() > limits.max_length {
        return ContentScore::rejected(format!(
            "content too long ({} chars) for shipping data",
            content.chars().count()
        ));
    }

    for pattern in ERROR_INDICATORS.iter() {
        if pattern.is_match(content) {
            return ContentScore::rejected(format!("diagnostic log marker: {pattern}"));
        }
    }
    for pattern in CODE_INDICATORS.iter() {
        if pattern.is_match(content) {
            return ContentScore::rejected(format!("code marker: {pattern}"));
        }
    }
    for pattern in CONFIG_INDICATORS.iter() {
        if pattern.is_match(content) {
            return ContentScore::rejected(format!("structured-config marker: {pattern}"));
        }
    }

    let has_phone = PHONE_PATTERNS.iter().any(|p| p.is_match(content));
    let has_address = ADDRESS_PATTERNS.iter().any(|p| p.is_match(content));

    let lines: Vec<&str> = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();
    let has_multiple_lines = lines.len() >= 2;

    // Secondary format signal: the typical record is name / phone /
    // address lines in that order.
    let mut format_confidence = 0;
    if has_multiple_lines {
        if lines.len() >= 2 && PHONE_PATTERNS.iter().any(|p| p.is_match(lines[1])) {
            format_confidence += 30;
        }
        if lines.len() >= 3 {
            let tail = lines[2..].join("\n");
            if ADDRESS_PATTERNS.iter().any(|p| p.is_match(&tail)) {
                format_confidence += 30;
            }
        }
    }

    let mut confidence = 0;
    if has_phone {
        confidence += 40;
    }
    if has_address {
        confidence += 30;
    }
    if has_multiple_lines {
        confidence += 10;
    }
    // Weighted down: the positional shape is a weaker signal than the
    // tokens themselves.
    confidence += format_confidence / 5;

    let lowered = content.to_lowercase();
    if SUSPICIOUS_TERMS.iter().any(|term| lowered.contains(term)) {
        confidence -= 15;
    }

    let valid = confidence >= VALID_THRESHOLD;
    ContentScore {
        valid,
        confidence,
        reason: format!(
            "phone:{has_phone} address:{has_address} multiline:{has_multiple_lines} \
             format:{format_confidence} confidence:{confidence}"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_score(content: &str) -> ContentScore {
        score(content, &ScoreLimits::default())
    }

    #[test]
    fn typical_shipping_record_scores_valid() {
        let content = "张三\n13812345678\n浙江省杭州市余杭区文一西路969号";
        let result = default_score(content);
        assert!(result.valid, "reason: {}", result.reason);
        assert!(result.confidence >= 80);
    }

    #[test]
    fn landline_and_warehouse_code_score_valid() {
        let content = "李四\n021-53395199\n2号库@DX-5E74D2M6D-F#";
        let result = default_score(content);
        assert!(result.valid, "reason: {}", result.reason);
    }

    #[test]
    fn phone_plus_multiline_address_always_valid() {
        let content = "王五\n15900001111\n广东省深圳市南山区\n科技园南路8号 3单元502室";
        assert!(default_score(content).valid);
    }

    #[test]
    fn code_markers_invalid_despite_phone_tokens() {
        let content = "def send(order):\n    return 13812345678  # 浙江省杭州市";
        let result = default_score(content);
        assert!(!result.valid);
        assert_eq!(result.confidence, 0);
    }

    #[test]
    fn element_config_json_invalid() {
        let content = r#"[{"full_text": "订单编号", "xpath": "/html/body/div[3]/span[1]"}]"#;
        assert!(!default_score(content).valid);
    }

    #[test]
    fn diagnostic_log_invalid() {
        let content = "[12:30:01] Error while clicking\nTraceback (most recent call last)";
        assert!(!default_score(content).valid);
    }

    #[test]
    fn suspicious_vocabulary_penalised() {
        let clean = "赵六\n13711112222\n上海市浦东新区张江路100号";
        let tainted = format!("{clean}\nfailed");
        let clean_score = default_score(clean);
        let tainted_score = default_score(&tainted);
        assert_eq!(tainted_score.confidence, clean_score.confidence - 15);
    }

    #[test]
    fn over_long_content_rejected() {
        let content = format!("张三\n13812345678\n{}", "浙江省".repeat(500));
        let result = default_score(&content);
        assert!(!result.valid);
        assert_eq!(result.confidence, 0);
    }

    #[test]
    fn short_fragment_rejected() {
        assert!(!default_score("abc").valid);
    }
}
