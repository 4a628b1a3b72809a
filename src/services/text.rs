use std::sync::LazyLock;

use regex::Regex;
use unicode_normalization::UnicodeNormalization;

static NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[\x{0600}-\x{06FF}a-zA-Z\s\-]+$").unwrap());

static CHAT_ID_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(\d+)@").unwrap());

/// Fold Arabic text for fuzzy comparison: drop harakat and tatweel, unify
/// alef/yaa/taa-marbuta forms, lowercase, collapse whitespace.
pub fn normalize_arabic(text: &str) -> String {
    let folded: String = text
        .nfkc()
        .filter(|c| !matches!(c, '\u{064B}'..='\u{0652}' | '\u{0640}'))
        .map(|c| match c {
            'أ' | 'إ' | 'آ' => 'ا',
            'ى' => 'ي',
            'ة' => 'ه',
            '•' | '·' => ' ',
            other => other,
        })
        .flat_map(char::to_lowercase)
        .collect();

    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Map Arabic-Indic and Persian digits to ASCII.
pub fn ascii_digits(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            '\u{0660}'..='\u{0669}' => char::from(b'0' + (c as u32 - 0x0660) as u8),
            '\u{06F0}'..='\u{06F9}' => char::from(b'0' + (c as u32 - 0x06F0) as u8),
            other => other,
        })
        .collect()
}

/// Normalize a phone number or WhatsApp chat id to the local `05XXXXXXXX`
/// form. Returns `None` when the digits don't describe a local mobile.
pub fn normalize_phone(raw: &str) -> Option<String> {
    let raw = ascii_digits(raw.trim());
    let source = CHAT_ID_RE
        .captures(&raw)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or(raw);

    let digits: String = source.chars().filter(char::is_ascii_digit).collect();

    if (digits.starts_with("970") || digits.starts_with("972")) && digits.len() == 12 {
        Some(format!("0{}", &digits[3..]))
    } else if digits.starts_with("59") && digits.len() == 9 {
        Some(format!("0{digits}"))
    } else if digits.starts_with("05") && digits.len() == 10 {
        Some(digits)
    } else {
        None
    }
}

/// A person's name: 2 to 100 characters of Arabic or Latin letters, spaces
/// and hyphens.
pub fn is_valid_name(name: &str) -> bool {
    let name = name.trim();
    let len = name.chars().count();
    (2..=100).contains(&len) && NAME_RE.is_match(name)
}
