//! Recovering the human-readable transfer comment from the base64 payload
//! returned by the delivery platform.

use crate::delivery::errors::{FragmentError, FragmentResult};
use crate::services::fulfillment::PurchaseKind;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use regex::Regex;
use std::sync::OnceLock;

fn premium_comment() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"Telegram.*Ref\s*#\S+").expect("premium comment pattern"))
}

/// Decode with repaired padding; URL-safe input is accepted.
pub fn decode_payload(payload: &str) -> FragmentResult<Vec<u8>> {
    let mut normalized: String = payload
        .trim()
        .chars()
        .map(|c| match c {
            '-' => '+',
            '_' => '/',
            other => other,
        })
        .filter(|c| *c != '=')
        .collect();
    while normalized.len() % 4 != 0 {
        normalized.push('=');
    }
    STANDARD
        .decode(normalized.as_bytes())
        .map_err(|e| FragmentError::malformed(format!("payload is not base64: {}", e)))
}

/// Printable ASCII kept, everything else turned into spaces, runs of
/// whitespace collapsed.
pub fn printable_text(bytes: &[u8]) -> String {
    let raw: String = bytes
        .iter()
        .map(|&b| if (32..127).contains(&b) { b as char } else { ' ' })
        .collect();
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Comment to attach to the on-chain transfer for `kind`. Falls back to
/// the whole cleaned text when the expected pattern is absent.
pub fn extract_comment(payload: &str, kind: &PurchaseKind) -> FragmentResult<String> {
    let text = printable_text(&decode_payload(payload)?);
    let found = match *kind {
        PurchaseKind::Stars { quantity } => {
            let pattern = format!(r"{} Telegram Stars.*", quantity);
            Regex::new(&pattern)
                .ok()
                .and_then(|re| re.find(&text).map(|m| m.as_str().to_string()))
        }
        PurchaseKind::Premium { .. } => premium_comment()
            .find(&text)
            .map(|m| m.as_str().to_string()),
    };
    Ok(found.unwrap_or(text))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(bytes: &[u8]) -> String {
        STANDARD.encode(bytes)
    }

    #[test]
    fn stars_comment_is_extracted_from_cell_bytes() {
        let mut body = vec![0xb5, 0xee, 0x9c, 0x72, 0x01, 0x00, 0x00, 0x00, 0x00];
        body.extend_from_slice(b"100 Telegram Stars \n\nRef#Xy12Ab");
        let comment = extract_comment(&encode(&body), &PurchaseKind::Stars { quantity: 100 })
            .unwrap();
        assert_eq!(comment, "100 Telegram Stars Ref#Xy12Ab");
    }

    #[test]
    fn premium_comment_is_extracted() {
        let mut body = vec![0x00, 0x01, 0x02];
        body.extend_from_slice(b"Telegram Premium for 6 months\x07 Ref #Q9w8e7");
        let comment = extract_comment(&encode(&body), &PurchaseKind::Premium { months: 6 })
            .unwrap();
        assert_eq!(comment, "Telegram Premium for 6 months Ref #Q9w8e7");
    }

    #[test]
    fn falls_back_to_whole_text() {
        let comment = extract_comment(
            &encode(b"\x01\x02something else"),
            &PurchaseKind::Stars { quantity: 50 },
        )
        .unwrap();
        assert_eq!(comment, "something else");
    }

    #[test]
    fn missing_padding_and_url_safe_alphabet_are_accepted() {
        let encoded = encode(&[0xfb, 0xff, b'a', b'b']);
        let trimmed = encoded.trim_end_matches('=').replace('+', "-").replace('/', "_");
        assert_eq!(decode_payload(&trimmed).unwrap(), vec![0xfb, 0xff, b'a', b'b']);
    }

    #[test]
    fn garbage_payload_is_malformed() {
        assert!(matches!(
            decode_payload("!!!"),
            Err(FragmentError::MalformedResponse { .. })
        ));
    }
}
