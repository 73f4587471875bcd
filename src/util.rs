//! Text decoding, XML helpers and package path arithmetic.

use std::borrow::Cow;

use percent_encoding::{AsciiSet, CONTROLS, percent_decode_str, utf8_percent_encode};
use quick_xml::events::BytesDecl;

use crate::error::Result;

/// Characters that must be escaped when a package path is used as an href.
const HREF_ESCAPE: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

// ============================================================================
// Encoding Detection
// ============================================================================

/// Decode bytes to a string, handling various encodings.
///
/// This function:
/// 1. First tries UTF-8 (handles BOM automatically via encoding_rs)
/// 2. If malformed, tries the hint encoding (from `<?xml encoding="..."?>`)
/// 3. Falls back to Windows-1252 (common in old ebooks)
///
/// Uses `Cow<str>` to avoid allocation when the input is valid UTF-8.
pub fn decode_text<'a>(bytes: &'a [u8], hint_encoding: Option<&str>) -> Cow<'a, str> {
    let (result, _encoding, malformed) = encoding_rs::UTF_8.decode(bytes);

    if !malformed {
        return result;
    }

    if let Some(name) = hint_encoding
        && let Some(encoding) = encoding_rs::Encoding::for_label(name.as_bytes())
    {
        let (result, _, _) = encoding.decode(bytes);
        return result;
    }

    let (result, _, _) = encoding_rs::WINDOWS_1252.decode(bytes);
    result
}

/// Decode an XML or XHTML document, using its declared encoding as a hint.
pub fn decode_document(bytes: &[u8]) -> Cow<'_, str> {
    decode_text(bytes, extract_xml_encoding(bytes))
}

/// Extract encoding from XML declaration.
///
/// Parses `<?xml ... encoding="..." ?>` to extract the encoding name.
/// Only the first 100 bytes are checked.
pub fn extract_xml_encoding(bytes: &[u8]) -> Option<&str> {
    let check_len = bytes.len().min(100);
    let prefix = &bytes[..check_len];

    let xml_start = prefix.windows(5).position(|w| w == b"<?xml")?;
    let after_xml = &prefix[xml_start..];

    let enc_pos = after_xml
        .windows(9)
        .position(|w| w.eq_ignore_ascii_case(b"encoding="))?;
    let after_enc = &after_xml[enc_pos + 9..];

    if after_enc.is_empty() {
        return None;
    }

    let quote = after_enc[0];
    if quote != b'"' && quote != b'\'' {
        return None;
    }

    let value_start = 1;
    let value_end = after_enc[value_start..].iter().position(|&b| b == quote)? + value_start;

    std::str::from_utf8(&after_enc[value_start..value_end]).ok()
}

/// Strip UTF-8 BOM (byte order mark) if present
pub fn strip_bom(data: &[u8]) -> &[u8] {
    if data.starts_with(&[0xEF, 0xBB, 0xBF]) {
        &data[3..]
    } else {
        data
    }
}

// ============================================================================
// XML Helpers
// ============================================================================

/// Extract local name from potentially namespaced XML name
pub fn local_name(name: &[u8]) -> &[u8] {
    name.iter()
        .rposition(|&b| b == b':')
        .map(|i| &name[i + 1..])
        .unwrap_or(name)
}

/// Rewrite an XML declaration naming a non-UTF-8 encoding to `utf-8`.
///
/// Documents are decoded on read and always written back as UTF-8.
pub fn utf8_declaration(d: BytesDecl<'_>) -> Result<BytesDecl<'_>> {
    let encoding = match d.encoding() {
        Some(encoding) => Some(encoding.map_err(quick_xml::Error::from)?.into_owned()),
        None => None,
    };
    let Some(encoding) = encoding else {
        return Ok(d);
    };
    if encoding.eq_ignore_ascii_case(b"utf-8") || encoding.eq_ignore_ascii_case(b"utf8") {
        return Ok(d);
    }

    let version = String::from_utf8_lossy(&d.version().map_err(quick_xml::Error::from)?).into_owned();
    let standalone = match d.standalone() {
        Some(s) => Some(String::from_utf8_lossy(&s.map_err(quick_xml::Error::from)?).into_owned()),
        None => None,
    };
    Ok(BytesDecl::new(&version, Some("utf-8"), standalone.as_deref()).into_owned())
}

/// Resolve an entity or character reference (without `&` and `;`).
///
/// Covers the XML predefined entities, numeric references and the handful
/// of HTML spacing entities that show up in XHTML content. Unknown named
/// entities return `None`.
pub fn resolve_entity(entity: &str) -> Option<char> {
    match entity {
        "apos" => return Some('\''),
        "quot" => return Some('"'),
        "lt" => return Some('<'),
        "gt" => return Some('>'),
        "amp" => return Some('&'),
        "nbsp" => return Some('\u{a0}'),
        "ensp" => return Some('\u{2002}'),
        "emsp" => return Some('\u{2003}'),
        "thinsp" => return Some('\u{2009}'),
        _ => {}
    }

    if let Some(hex) = entity
        .strip_prefix("#x")
        .or_else(|| entity.strip_prefix("#X"))
    {
        return u32::from_str_radix(hex, 16).ok().and_then(char::from_u32);
    }
    if let Some(dec) = entity.strip_prefix('#') {
        return dec.parse::<u32>().ok().and_then(char::from_u32);
    }

    None
}

pub fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

// ============================================================================
// Package Paths
// ============================================================================

/// Directory part of a package path (`""` for the archive root).
pub fn parent_dir(path: &str) -> &str {
    path.rfind('/').map(|i| &path[..i]).unwrap_or("")
}

/// Resolve an href relative to a directory inside the package.
///
/// Handles `.` and `..` segments, strips the fragment and percent-decodes
/// the result so it can be compared with zip entry names.
pub fn resolve_href(base_dir: &str, href: &str) -> String {
    let path = href.split('#').next().unwrap_or(href);
    let decoded = percent_decode_str(path).decode_utf8_lossy();
    normalize_path(base_dir, &decoded)
}

/// Like [`resolve_href`] but without percent-decoding.
pub fn join_path(base_dir: &str, href: &str) -> String {
    let path = href.split('#').next().unwrap_or(href);
    normalize_path(base_dir, path)
}

fn normalize_path(base_dir: &str, path: &str) -> String {
    let mut segments: Vec<&str> = if path.starts_with('/') {
        Vec::new()
    } else {
        base_dir.split('/').filter(|s| !s.is_empty()).collect()
    };

    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }

    segments.join("/")
}

/// Express `target` (a package path) relative to the directory `from_dir`.
pub fn relative_path(from_dir: &str, target: &str) -> String {
    let from: Vec<&str> = from_dir.split('/').filter(|s| !s.is_empty()).collect();
    let to: Vec<&str> = target.split('/').filter(|s| !s.is_empty()).collect();

    let common = from
        .iter()
        .zip(to.iter())
        .take_while(|(a, b)| a == b)
        .count()
        // The last segment of `to` is the file name, never a shared directory
        .min(to.len().saturating_sub(1));

    let mut parts: Vec<&str> = std::iter::repeat_n("..", from.len() - common).collect();
    parts.extend(&to[common..]);
    parts.join("/")
}

/// Percent-encode a relative path for use in an `href` attribute.
pub fn encode_href(path: &str) -> String {
    utf8_percent_encode(path, HREF_ESCAPE).to_string()
}

/// Whether an href points outside the package.
pub fn is_external_href(href: &str) -> bool {
    href.split_once(':').is_some_and(|(scheme, _)| {
        !scheme.is_empty()
            && scheme
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
    })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utf8_declaration() {
        let latin1 = BytesDecl::new("1.0", Some("ISO-8859-1"), Some("yes"));
        let rewritten = utf8_declaration(latin1).unwrap();
        assert_eq!(rewritten.encoding().unwrap().unwrap().as_ref(), b"utf-8");
        assert_eq!(rewritten.standalone().unwrap().unwrap().as_ref(), b"yes");

        let utf8 = BytesDecl::new("1.0", Some("UTF-8"), None);
        let kept = utf8_declaration(utf8).unwrap();
        assert_eq!(kept.encoding().unwrap().unwrap().as_ref(), b"UTF-8");
    }

    #[test]
    fn test_local_name() {
        assert_eq!(local_name(b"dc:title"), b"title");
        assert_eq!(local_name(b"title"), b"title");
        assert_eq!(local_name(b"opf:meta"), b"meta");
    }

    #[test]
    fn test_resolve_entity() {
        assert_eq!(resolve_entity("amp"), Some('&'));
        assert_eq!(resolve_entity("#160"), Some('\u{a0}'));
        assert_eq!(resolve_entity("#xA0"), Some('\u{a0}'));
        assert_eq!(resolve_entity("nbsp"), Some('\u{a0}'));
        assert_eq!(resolve_entity("mdash"), None);
        assert_eq!(resolve_entity("#xZZ"), None);
    }

    #[test]
    fn test_decode_text_falls_back_to_cp1252() {
        // "café" in Windows-1252
        let bytes = b"caf\xe9";
        assert_eq!(decode_text(bytes, None), "café");
        assert_eq!(decode_text("café".as_bytes(), None), "café");
    }

    #[test]
    fn test_extract_xml_encoding() {
        let xml = br#"<?xml version="1.0" encoding="ISO-8859-1"?><html/>"#;
        assert_eq!(extract_xml_encoding(xml), Some("ISO-8859-1"));
        assert_eq!(extract_xml_encoding(b"<html/>"), None);
    }

    #[test]
    fn test_resolve_href() {
        assert_eq!(resolve_href("OEBPS", "text/ch1.xhtml"), "OEBPS/text/ch1.xhtml");
        assert_eq!(resolve_href("OEBPS/text", "../images/a.png"), "OEBPS/images/a.png");
        assert_eq!(resolve_href("", "ch1.xhtml#p3"), "ch1.xhtml");
        assert_eq!(resolve_href("OEBPS", "My%20Chapter.xhtml"), "OEBPS/My Chapter.xhtml");
        assert_eq!(join_path("OEBPS", "My%20Chapter.xhtml"), "OEBPS/My%20Chapter.xhtml");
    }

    #[test]
    fn test_relative_path() {
        assert_eq!(relative_path("OEBPS", "OEBPS/text/ch1.xhtml"), "text/ch1.xhtml");
        assert_eq!(relative_path("OEBPS/nav", "OEBPS/text/ch1.xhtml"), "../text/ch1.xhtml");
        assert_eq!(relative_path("", "ch1.xhtml"), "ch1.xhtml");
        assert_eq!(relative_path("OEBPS", "OEBPS/ch1.xhtml"), "ch1.xhtml");
        assert_eq!(relative_path("a/b", "a/b"), "../b");
    }

    #[test]
    fn test_encode_href() {
        assert_eq!(encode_href("text/My Chapter.xhtml"), "text/My%20Chapter.xhtml");
        assert_eq!(encode_href("../ch1.xhtml"), "../ch1.xhtml");
    }

    #[test]
    fn test_is_external_href() {
        assert!(is_external_href("https://example.com/a"));
        assert!(is_external_href("mailto:me@example.com"));
        assert!(!is_external_href("text/ch1.xhtml#p1"));
        assert!(!is_external_href("#p1"));
    }
}
