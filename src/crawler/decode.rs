//! Response body decoding
//!
//! Payloads that are still gzip-compressed after transport decoding are
//! inflated before caching, within the body size limit. Text is decoded on
//! the way out using, in order: a byte-order mark, the `Content-Type`
//! charset, a `<meta>` charset in the first kilobyte, and finally UTF-8.

use encoding_rs::{Encoding, UTF_8};
use flate2::read::GzDecoder;
use std::io::Read;
use thiserror::Error;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// How much of the body is searched for a `<meta>` charset
const SNIFF_LIMIT: usize = 1024;

/// Failure to inflate a gzip payload
#[derive(Debug, Error)]
pub enum DecompressError {
    #[error("inflated body exceeds {0} bytes")]
    TooLarge(usize),

    #[error("corrupt gzip payload: {0}")]
    Io(#[from] std::io::Error),
}

/// Inflates a body that is still gzip-encoded
///
/// The body is only touched when it starts with the gzip magic bytes and
/// either the content type mentions gzip or the URL path ends in `.gz`.
/// With `limit` set, inflating stops as soon as the output passes it.
pub fn maybe_decompress(
    path: &str,
    content_type: Option<&str>,
    body: Vec<u8>,
    limit: Option<usize>,
) -> Result<Vec<u8>, DecompressError> {
    if !body.starts_with(&GZIP_MAGIC) {
        return Ok(body);
    }

    let gzip_type = content_type.map_or(false, |ct| ct.to_ascii_lowercase().contains("gzip"));
    if !gzip_type && !path.to_ascii_lowercase().ends_with(".gz") {
        return Ok(body);
    }

    let read_limit = limit.map_or(u64::MAX, |limit| (limit as u64).saturating_add(1));
    let mut decoded = Vec::new();
    GzDecoder::new(body.as_slice())
        .take(read_limit)
        .read_to_end(&mut decoded)?;

    if let Some(limit) = limit.filter(|&limit| decoded.len() > limit) {
        return Err(DecompressError::TooLarge(limit));
    }
    Ok(decoded)
}

/// Picks the character encoding for a body
pub fn detect_encoding(content_type: Option<&str>, body: &[u8]) -> &'static Encoding {
    if let Some((encoding, _)) = Encoding::for_bom(body) {
        return encoding;
    }
    if let Some(encoding) = content_type.and_then(header_charset) {
        return encoding;
    }
    if let Some(encoding) = sniff_meta_charset(body) {
        return encoding;
    }
    UTF_8
}

/// Decodes a body to text, replacing malformed sequences
pub fn decode_text(content_type: Option<&str>, body: &[u8]) -> String {
    let encoding = detect_encoding(content_type, body);
    encoding.decode_with_bom_removal(body).0.into_owned()
}

fn header_charset(content_type: &str) -> Option<&'static Encoding> {
    let lowered = content_type.to_ascii_lowercase();
    let label = charset_param(&lowered)?;
    Encoding::for_label(label.as_bytes())
}

fn sniff_meta_charset(body: &[u8]) -> Option<&'static Encoding> {
    let head = &body[..body.len().min(SNIFF_LIMIT)];
    let head = String::from_utf8_lossy(head).to_ascii_lowercase();

    let mut rest = head.as_str();
    while let Some(start) = rest.find("<meta") {
        let tag = &rest[start..];
        let end = tag.find('>').unwrap_or(tag.len());

        if let Some(encoding) =
            charset_param(&tag[..end]).and_then(|label| Encoding::for_label(label.as_bytes()))
        {
            // A UTF-16 declaration in an ASCII-readable document is wrong.
            return Some(encoding.output_encoding());
        }

        rest = &tag[end..];
    }
    None
}

/// Extracts the value following `charset=` in already-lowercased text
fn charset_param(text: &str) -> Option<&str> {
    let idx = text.find("charset")?;
    let after = text[idx + "charset".len()..].trim_start();
    let after = after.strip_prefix('=')?.trim_start();
    let after = after.trim_start_matches(|c| c == '"' || c == '\'');
    let end = after
        .find(|c: char| matches!(c, '"' | '\'' | ';' | '>' | '/') || c.is_whitespace())
        .unwrap_or(after.len());
    let label = &after[..end];
    (!label.is_empty()).then_some(label)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn test_plain_body_untouched() {
        let body = b"<html></html>".to_vec();
        let out = maybe_decompress("/index.html", Some("text/html"), body.clone(), None).unwrap();
        assert_eq!(out, body);
    }

    #[test]
    fn test_gzip_content_type_is_inflated() {
        let body = gzip(b"hello world");
        let out = maybe_decompress("/data", Some("application/x-gzip"), body, None).unwrap();
        assert_eq!(out, b"hello world");
    }

    #[test]
    fn test_gz_extension_is_inflated() {
        let body = gzip(b"sitemap");
        let out = maybe_decompress("/sitemap.xml.gz", None, body, Some(64)).unwrap();
        assert_eq!(out, b"sitemap");
    }

    #[test]
    fn test_gzip_magic_without_hint_untouched() {
        let body = gzip(b"binary");
        let out =
            maybe_decompress("/file.bin", Some("application/octet-stream"), body.clone(), None)
                .unwrap();
        assert_eq!(out, body);
    }

    #[test]
    fn test_truncated_gzip_fails() {
        let mut body = gzip(b"some longer content that will be cut short");
        body.truncate(12);
        assert!(matches!(
            maybe_decompress("/a.gz", None, body, None),
            Err(DecompressError::Io(_))
        ));
    }

    #[test]
    fn test_inflated_size_is_limited() {
        let body = gzip(&vec![b'a'; 64 * 1024]);
        assert!(body.len() < 1024);

        let result = maybe_decompress("/bomb.gz", None, body.clone(), Some(1024));
        assert!(matches!(result, Err(DecompressError::TooLarge(1024))));

        let out = maybe_decompress("/bomb.gz", None, body, Some(64 * 1024)).unwrap();
        assert_eq!(out.len(), 64 * 1024);
    }

    #[test]
    fn test_header_charset_wins() {
        let body = "<meta charset=\"utf-8\">caf\u{e9}".as_bytes();
        let encoding = detect_encoding(Some("text/html; charset=ISO-8859-1"), body);
        assert_eq!(encoding.name(), "windows-1252");
    }

    #[test]
    fn test_meta_charset_sniffed() {
        let body = b"<html><head><meta charset='windows-1251'></head></html>";
        assert_eq!(detect_encoding(Some("text/html"), body).name(), "windows-1251");

        let body = br#"<meta http-equiv="Content-Type" content="text/html; charset=Shift_JIS">"#;
        assert_eq!(detect_encoding(None, body).name(), "Shift_JIS");
    }

    #[test]
    fn test_bom_detected() {
        let body = [0xEF, 0xBB, 0xBF, b'h', b'i'];
        assert_eq!(detect_encoding(None, &body), UTF_8);
        assert_eq!(decode_text(None, &body), "hi");
    }

    #[test]
    fn test_bom_beats_header_charset() {
        let mut body = vec![0xEF, 0xBB, 0xBF];
        body.extend_from_slice("caf\u{e9}".as_bytes());
        let content_type = Some("text/html; charset=iso-8859-1");
        assert_eq!(detect_encoding(content_type, &body), UTF_8);
        assert_eq!(decode_text(content_type, &body), "caf\u{e9}");
    }

    #[test]
    fn test_default_utf8() {
        assert_eq!(detect_encoding(None, b"plain"), UTF_8);
    }

    #[test]
    fn test_decode_latin1() {
        let body = [b'c', b'a', b'f', 0xE9];
        let text = decode_text(Some("text/html; charset=iso-8859-1"), &body);
        assert_eq!(text, "caf\u{e9}");
    }
}
