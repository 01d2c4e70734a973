use chrono::{DateTime, Utc};

pub(crate) const HTTP_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

const UPPER_HEX: &[u8; 16] = b"0123456789ABCDEF";

/// Escapes text for use in element content and attribute values.
pub(crate) fn xml_escape(input: &str) -> String {
    input
        .chars()
        .fold(String::with_capacity(input.len()), |mut out, ch| {
            match xml_entity(ch) {
                Some(entity) => out.push_str(entity),
                None => out.push(ch),
            }
            out
        })
}

fn xml_entity(ch: char) -> Option<&'static str> {
    Some(match ch {
        '&' => "&amp;",
        '<' => "&lt;",
        '>' => "&gt;",
        '"' => "&quot;",
        '\'' => "&apos;",
        _ => return None,
    })
}

/// Percent-encodes everything except unreserved characters and `/`.
pub(crate) fn encode_path(value: &str) -> String {
    let mut encoded = String::with_capacity(value.len());
    for byte in value.as_bytes() {
        if byte.is_ascii_alphanumeric() || matches!(*byte, b'-' | b'_' | b'.' | b'~' | b'/') {
            encoded.push(char::from(*byte));
        } else {
            encoded.push('%');
            encoded.push(char::from(UPPER_HEX[usize::from(*byte >> 4)]));
            encoded.push(char::from(UPPER_HEX[usize::from(*byte & 0x0F)]));
        }
    }
    encoded
}

/// Decodes `%XX` escapes. Returns `None` for truncated escapes, bad hex digits or a
/// result that is not UTF-8.
pub(crate) fn decode_path(raw: &str) -> Option<String> {
    let bytes = raw.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut index = 0;
    while index < bytes.len() {
        if bytes[index] == b'%' {
            let high = hex_value(*bytes.get(index + 1)?)?;
            let low = hex_value(*bytes.get(index + 2)?)?;
            decoded.push((high << 4) | low);
            index += 3;
        } else {
            decoded.push(bytes[index]);
            index += 1;
        }
    }
    String::from_utf8(decoded).ok()
}

pub(crate) fn format_http_date(unix_secs: i64) -> String {
    DateTime::<Utc>::from_timestamp(unix_secs, 0)
        .unwrap_or_default()
        .format(HTTP_DATE_FORMAT)
        .to_string()
}

pub(crate) fn parse_http_date(value: &str) -> Option<i64> {
    DateTime::parse_from_rfc2822(value.trim())
        .ok()
        .map(|parsed| parsed.with_timezone(&Utc).timestamp())
}

fn hex_value(byte: u8) -> Option<u8> {
    char::from(byte).to_digit(16).map(|digit| digit as u8)
}
