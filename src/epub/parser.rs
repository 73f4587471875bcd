//! EPUB parsing utilities (container.xml, OPF, NCX, EPUB 3 nav)

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use super::nav::TocEntry;
use crate::error::{Error, Result};
use crate::util::{local_name, resolve_entity, strip_bom};

/// Book metadata needed to label generated navigation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    pub title: String,
    pub authors: Vec<String>,
    pub language: String,
    pub identifier: String,
}

/// One `<item>` of the OPF manifest, in document order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestItem {
    pub id: String,
    pub href: String,
    pub media_type: String,
    pub properties: Vec<String>,
}

/// One `<itemref>` of the OPF spine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpineRef {
    pub idref: String,
    pub linear: bool,
}

/// Parsed OPF package data.
#[derive(Debug, Clone, Default)]
pub struct OpfData {
    /// Raw `package@version` value.
    pub version: String,
    pub metadata: Metadata,
    pub manifest: Vec<ManifestItem>,
    pub spine: Vec<SpineRef>,
    /// Manifest id of the NCX, from `spine@toc`.
    pub toc_id: Option<String>,
    /// Whether a `dcterms:modified` meta is present.
    pub has_modified: bool,
}

/// Parse META-INF/container.xml to find the OPF path.
pub fn parse_container_xml(bytes: &[u8]) -> Result<String> {
    let content = String::from_utf8(strip_bom(bytes).to_vec())?;

    let mut reader = Reader::from_str(&content);
    reader.config_mut().trim_text(true);

    loop {
        match reader.read_event()? {
            Event::Empty(e) | Event::Start(e) if local_name(e.name().as_ref()) == b"rootfile" => {
                if let Some(path) = attribute(&e, b"full-path")? {
                    return Ok(path);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Err(Error::InvalidEpub(
        "No rootfile found in container.xml".into(),
    ))
}

/// Parse OPF package document.
pub fn parse_opf(content: &str) -> Result<OpfData> {
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);

    let mut opf = OpfData {
        version: "2.0".into(),
        ..Default::default()
    };
    let mut unique_identifier: Option<String> = None;
    let mut identifiers: Vec<(Option<String>, String)> = Vec::new();

    let mut in_metadata = false;
    let mut current_element: Option<(Vec<u8>, Option<String>)> = None;
    let mut buf_text = String::new();

    loop {
        let event = reader.read_event()?;
        let is_empty = matches!(event, Event::Empty(_));
        match event {
            Event::Start(e) | Event::Empty(e) => {
                let name = e.name();
                let local = local_name(name.as_ref());

                match local {
                    b"package" => {
                        if let Some(version) = attribute(&e, b"version")? {
                            opf.version = version;
                        }
                        unique_identifier = attribute(&e, b"unique-identifier")?;
                    }
                    b"metadata" if !is_empty => in_metadata = true,
                    b"title" | b"creator" | b"language" | b"identifier" | b"meta"
                        if in_metadata && !is_empty =>
                    {
                        let key = match local {
                            b"meta" => attribute(&e, b"property")?,
                            _ => attribute(&e, b"id")?,
                        };
                        current_element = Some((local.to_vec(), key));
                        buf_text.clear();
                    }
                    b"item" => {
                        let id = attribute(&e, b"id")?.unwrap_or_default();
                        if !id.is_empty() {
                            opf.manifest.push(ManifestItem {
                                id,
                                href: attribute(&e, b"href")?.unwrap_or_default(),
                                media_type: attribute(&e, b"media-type")?.unwrap_or_default(),
                                properties: attribute(&e, b"properties")?
                                    .map(|p| p.split_ascii_whitespace().map(String::from).collect())
                                    .unwrap_or_default(),
                            });
                        }
                    }
                    b"itemref" => {
                        if let Some(idref) = attribute(&e, b"idref")? {
                            let linear = attribute(&e, b"linear")?.as_deref() != Some("no");
                            opf.spine.push(SpineRef { idref, linear });
                        }
                    }
                    b"spine" => opf.toc_id = attribute(&e, b"toc")?,
                    _ => {}
                }
            }
            Event::Text(e) => {
                if current_element.is_some() {
                    buf_text.push_str(&String::from_utf8_lossy(e.as_ref()));
                }
            }
            Event::GeneralRef(e) => {
                if current_element.is_some()
                    && let Some(c) = resolve_entity(&String::from_utf8_lossy(e.as_ref()))
                {
                    buf_text.push(c);
                }
            }
            Event::End(e) => {
                let name = e.name();
                let local = local_name(name.as_ref());

                if local == b"metadata" {
                    in_metadata = false;
                }

                if let Some((elem, key)) = current_element.take_if(|(elem, _)| elem.as_slice() == local) {
                    let text = buf_text.trim().to_string();
                    match elem.as_slice() {
                        b"title" if opf.metadata.title.is_empty() => opf.metadata.title = text,
                        b"creator" => opf.metadata.authors.push(text),
                        b"language" if opf.metadata.language.is_empty() => {
                            opf.metadata.language = text
                        }
                        b"identifier" => identifiers.push((key, text)),
                        b"meta" if key.as_deref() == Some("dcterms:modified") => {
                            opf.has_modified = true
                        }
                        _ => {}
                    }
                    buf_text.clear();
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    // The unique identifier is the dc:identifier the package element points at
    opf.metadata.identifier = identifiers
        .iter()
        .find(|(id, _)| id.is_some() && *id == unique_identifier)
        .or_else(|| identifiers.first())
        .map(|(_, value)| value.clone())
        .unwrap_or_default();

    Ok(opf)
}

/// Parse NCX table of contents.
pub fn parse_ncx(content: &str) -> Result<Vec<TocEntry>> {
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);

    struct NavPointState {
        children: Vec<TocEntry>,
        text: Option<String>,
        src: Option<String>,
    }

    let mut stack: Vec<NavPointState> = vec![NavPointState {
        children: Vec::new(),
        text: None,
        src: None,
    }];
    let mut in_text = false;
    let mut in_nav_map = false;

    loop {
        match reader.read_event()? {
            Event::Start(e) => match local_name(e.name().as_ref()) {
                b"navMap" => in_nav_map = true,
                b"navPoint" if in_nav_map => stack.push(NavPointState {
                    children: Vec::new(),
                    text: None,
                    src: None,
                }),
                b"text" => in_text = true,
                _ => {}
            },
            Event::Empty(e) => {
                if in_nav_map
                    && local_name(e.name().as_ref()) == b"content"
                    && let Some(src) = attribute(&e, b"src")?
                    && let Some(state) = stack.last_mut()
                {
                    state.src = Some(src);
                }
            }
            Event::Text(e) => {
                if in_nav_map && in_text && let Some(state) = stack.last_mut() {
                    let raw = String::from_utf8_lossy(e.as_ref());
                    state.text.get_or_insert_with(String::new).push_str(&raw);
                }
            }
            Event::GeneralRef(e) => {
                if in_nav_map
                    && in_text
                    && let Some(state) = stack.last_mut()
                    && let Some(c) = resolve_entity(&String::from_utf8_lossy(e.as_ref()))
                {
                    state.text.get_or_insert_with(String::new).push(c);
                }
            }
            Event::End(e) => match local_name(e.name().as_ref()) {
                b"navMap" => in_nav_map = false,
                b"text" => in_text = false,
                b"navPoint" if in_nav_map && stack.len() > 1 => {
                    if let Some(state) = stack.pop()
                        && let (Some(text), Some(src)) = (state.text, state.src)
                    {
                        let mut entry = TocEntry::new(collapse_whitespace(&text), src);
                        entry.children = state.children;

                        if let Some(parent) = stack.last_mut() {
                            parent.children.push(entry);
                        }
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(stack.pop().map(|s| s.children).unwrap_or_default())
}

/// Parse the `toc` nav of an EPUB 3 navigation document.
///
/// Headings without a link (`<span>` labels) are kept with an empty href so
/// their children still have a parent.
pub fn parse_nav_toc(content: &str) -> Result<Vec<TocEntry>> {
    let mut reader = Reader::from_str(content);

    struct ItemState {
        children: Vec<TocEntry>,
        label: String,
        href: String,
    }

    let mut stack: Vec<ItemState> = vec![ItemState {
        children: Vec::new(),
        label: String::new(),
        href: String::new(),
    }];
    // Element depth inside the toc nav (0 = outside)
    let mut nav_depth = 0usize;
    let mut label_depth = 0usize;
    let mut done = false;

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let name = e.name();
                let local = local_name(name.as_ref());
                if nav_depth == 0 {
                    if !done && local == b"nav" && is_epub_type(&e, "toc")? {
                        nav_depth = 1;
                    }
                    continue;
                }
                nav_depth += 1;
                match local {
                    b"li" => stack.push(ItemState {
                        children: Vec::new(),
                        label: String::new(),
                        href: String::new(),
                    }),
                    b"a" | b"span" if label_depth == 0 && stack.len() > 1 => {
                        label_depth = 1;
                        if local == b"a"
                            && let Some(href) = attribute(&e, b"href")?
                            && let Some(state) = stack.last_mut()
                        {
                            state.href = href;
                        }
                    }
                    _ if label_depth > 0 => label_depth += 1,
                    _ => {}
                }
            }
            Event::Text(e) => {
                if label_depth > 0 && let Some(state) = stack.last_mut() {
                    state.label.push_str(&String::from_utf8_lossy(e.as_ref()));
                }
            }
            Event::GeneralRef(e) => {
                if label_depth > 0
                    && let Some(state) = stack.last_mut()
                    && let Some(c) = resolve_entity(&String::from_utf8_lossy(e.as_ref()))
                {
                    state.label.push(c);
                }
            }
            Event::End(e) => {
                if nav_depth == 0 {
                    continue;
                }
                nav_depth -= 1;
                if nav_depth == 0 {
                    done = true;
                    continue;
                }
                if label_depth > 0 {
                    label_depth -= 1;
                }
                if local_name(e.name().as_ref()) == b"li"
                    && stack.len() > 1
                    && let Some(state) = stack.pop()
                {
                    let label = collapse_whitespace(&state.label);
                    if let Some(parent) = stack.last_mut() {
                        if label.is_empty() && state.href.is_empty() {
                            parent.children.extend(state.children);
                        } else {
                            let mut entry = TocEntry::new(label, state.href);
                            entry.children = state.children;
                            parent.children.push(entry);
                        }
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(stack.pop().map(|s| s.children).unwrap_or_default())
}

// ----------------------------------------------------------------------------
// Helpers
// ----------------------------------------------------------------------------

/// Read an attribute by its qualified name, unescaping the value.
pub(crate) fn attribute(e: &BytesStart, key: &[u8]) -> Result<Option<String>> {
    for attr in e.attributes().flatten() {
        if attr.key.as_ref() == key {
            let raw = String::from_utf8(attr.value.to_vec())?;
            return Ok(Some(unescape_attribute(&raw)));
        }
    }
    Ok(None)
}

fn unescape_attribute(raw: &str) -> String {
    if !raw.contains('&') {
        return raw.to_string();
    }
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(start) = rest.find('&') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        match after.find(';').and_then(|end| Some((end, resolve_entity(&after[..end])?))) {
            Some((end, c)) => {
                out.push(c);
                rest = &after[end + 1..];
            }
            None => {
                out.push('&');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Whether the element's `epub:type` contains the given token.
fn is_epub_type(e: &BytesStart, token: &str) -> Result<bool> {
    Ok(attribute(e, b"epub:type")?
        .is_some_and(|value| value.split_ascii_whitespace().any(|t| t == token)))
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_container_xml() {
        let container = br#"<?xml version="1.0"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>"#;

        let result = parse_container_xml(container).unwrap();
        assert_eq!(result, "OEBPS/content.opf");
    }

    #[test]
    fn test_parse_container_xml_with_bom() {
        let mut container = vec![0xEF, 0xBB, 0xBF];
        container.extend_from_slice(
            br#"<?xml version="1.0"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>"#,
        );

        let result = parse_container_xml(&container).unwrap();
        assert_eq!(result, "content.opf");
    }

    #[test]
    fn test_parse_container_xml_without_rootfile() {
        let container = br#"<container><rootfiles/></container>"#;
        assert!(matches!(
            parse_container_xml(container),
            Err(Error::InvalidEpub(_))
        ));
    }

    #[test]
    fn test_parse_opf() {
        let opf = r#"<?xml version="1.0"?>
<package xmlns="http://www.idpf.org/2007/opf" version="2.0" unique-identifier="BookId">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
    <dc:title>Test &amp; Book</dc:title>
    <dc:creator>Author One</dc:creator>
    <dc:language>en</dc:language>
    <dc:identifier id="isbn">urn:isbn:1234567890</dc:identifier>
    <dc:identifier id="BookId">urn:uuid:abc</dc:identifier>
  </metadata>
  <manifest>
    <item id="ncx" href="toc.ncx" media-type="application/x-dtbncx+xml"/>
    <item id="ch1" href="text/ch1.xhtml" media-type="application/xhtml+xml"/>
    <item id="cover" href="cover.jpg" media-type="image/jpeg" properties="cover-image"/>
  </manifest>
  <spine toc="ncx">
    <itemref idref="ch1"/>
    <itemref idref="cover" linear="no"/>
  </spine>
</package>"#;

        let result = parse_opf(opf).unwrap();

        assert_eq!(result.version, "2.0");
        assert_eq!(result.metadata.title, "Test & Book");
        assert_eq!(result.metadata.authors, vec!["Author One"]);
        assert_eq!(result.metadata.language, "en");
        assert_eq!(result.metadata.identifier, "urn:uuid:abc");
        assert_eq!(result.toc_id.as_deref(), Some("ncx"));
        assert!(!result.has_modified);

        let ids: Vec<_> = result.manifest.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, ["ncx", "ch1", "cover"]);
        assert_eq!(result.manifest[2].properties, vec!["cover-image"]);

        assert_eq!(result.spine.len(), 2);
        assert!(result.spine[0].linear);
        assert!(!result.spine[1].linear);
    }

    #[test]
    fn test_parse_opf_epub3_modified() {
        let opf = r#"<package xmlns="http://www.idpf.org/2007/opf" version="3.0">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
    <dc:title>Book</dc:title>
    <meta property="dcterms:modified">2024-01-01T00:00:00Z</meta>
  </metadata>
  <manifest>
    <item id="nav" href="nav.xhtml" media-type="application/xhtml+xml" properties="nav scripted"/>
  </manifest>
  <spine/>
</package>"#;

        let result = parse_opf(opf).unwrap();
        assert_eq!(result.version, "3.0");
        assert!(result.has_modified);
        assert_eq!(result.manifest[0].properties, vec!["nav", "scripted"]);
    }

    #[test]
    fn test_parse_ncx_nested() {
        let ncx = r#"<?xml version="1.0"?>
<ncx xmlns="http://www.daisy.org/z3986/2005/ncx/" version="2005-1">
  <navMap>
    <navPoint id="part1" playOrder="1">
      <navLabel><text>Part I</text></navLabel>
      <content src="part1.xhtml"/>
      <navPoint id="ch1" playOrder="2">
        <navLabel><text>Chapter 1</text></navLabel>
        <content src="ch1.xhtml#start"/>
      </navPoint>
    </navPoint>
  </navMap>
  <pageList>
    <pageTarget id="p1" type="normal" value="1">
      <navLabel><text>1</text></navLabel>
      <content src="ch1.xhtml#p1"/>
    </pageTarget>
  </pageList>
</ncx>"#;

        let result = parse_ncx(ncx).unwrap();

        assert_eq!(result.len(), 1);
        assert_eq!(result[0].title, "Part I");
        assert_eq!(result[0].children.len(), 1);
        assert_eq!(result[0].children[0].href, "ch1.xhtml#start");
    }

    #[test]
    fn test_parse_nav_toc() {
        let nav = r#"<?xml version="1.0" encoding="utf-8"?>
<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops">
<body>
  <nav epub:type="toc" id="toc">
    <h1>Contents</h1>
    <ol>
      <li><a href="text/ch1.xhtml">Chapter <em>One</em></a></li>
      <li><span>Part Two</span>
        <ol>
          <li><a href="text/ch2.xhtml#s1">Section 1</a></li>
        </ol>
      </li>
    </ol>
  </nav>
  <nav epub:type="landmarks">
    <ol><li><a href="text/ch1.xhtml">Begin</a></li></ol>
  </nav>
</body>
</html>"#;

        let toc = parse_nav_toc(nav).unwrap();
        assert_eq!(toc.len(), 2);
        assert_eq!(toc[0].title, "Chapter One");
        assert_eq!(toc[0].href, "text/ch1.xhtml");
        assert_eq!(toc[1].title, "Part Two");
        assert_eq!(toc[1].href, "");
        assert_eq!(toc[1].children[0].href, "text/ch2.xhtml#s1");
    }

    #[test]
    fn test_unescape_attribute() {
        assert_eq!(unescape_attribute("a&amp;b"), "a&b");
        assert_eq!(unescape_attribute("fish &amp chips"), "fish &amp chips");
        assert_eq!(unescape_attribute("plain"), "plain");
    }
}
