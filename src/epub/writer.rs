use std::collections::HashSet;
use std::io::{Seek, Write};
use std::path::Path;

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use super::package::EpubPackage;
use super::parser::attribute;
use crate::error::{Error, Result};
use crate::util::{local_name, utf8_declaration};

/// Write `package` to `path` through a sibling temp file, replacing any
/// existing file only once the archive is complete.
pub(crate) fn save_atomically(package: &EpubPackage, path: &Path) -> Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let mut tmp = tempfile::Builder::new()
        .prefix(".bookdrop-")
        .suffix(".epub.tmp")
        .tempfile_in(dir)?;
    write_package(package, tmp.as_file_mut())?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| Error::Io(e.error))?;
    Ok(())
}

/// Serialise the package as an EPUB zip.
///
/// `mimetype` goes first and uncompressed. Original entries keep their
/// archive order; items added since opening follow at the end.
pub(crate) fn write_package<W: Write + Seek>(package: &EpubPackage, writer: W) -> Result<()> {
    let mut zip = ZipWriter::new(writer);

    let options_stored =
        SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
    let options_deflate =
        SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    zip.start_file("mimetype", options_stored)?;
    zip.write_all(b"application/epub+zip")?;

    let opf = rewrite_opf(package)?;
    let mut written: HashSet<&str> = HashSet::new();
    written.insert("mimetype");

    for name in &package.archive_order {
        if written.contains(name.as_str()) {
            continue;
        }
        let data: &[u8] = if *name == package.opf_path {
            opf.as_bytes()
        } else if let Some(item) = package.item_by_path(name) {
            item.content()
        } else if let Some(data) = package.extra_files.get(name) {
            data
        } else {
            // Removed item
            continue;
        };
        zip.start_file(name.as_str(), options_deflate)?;
        zip.write_all(data)?;
        written.insert(name.as_str());
    }

    for item in package.items() {
        if written.contains(item.path.as_str()) {
            continue;
        }
        zip.start_file(item.path.as_str(), options_deflate)?;
        zip.write_all(item.content())?;
        written.insert(item.path.as_str());
    }

    zip.finish()?;
    Ok(())
}

/// Re-emit the original OPF with the package's pending changes applied.
///
/// Everything the package does not model (metadata refinements, guide,
/// bindings, comments) passes through unchanged.
pub(crate) fn rewrite_opf(package: &EpubPackage) -> Result<String> {
    let mut reader = Reader::from_str(&package.opf_source);
    reader.config_mut().trim_text(false);
    let mut writer = Writer::new(Vec::new());

    let removed: HashSet<&str> = package.removed_ids.iter().map(String::as_str).collect();
    let current: HashSet<&str> = package.items().iter().map(|i| i.id.as_str()).collect();
    let needs_modified = package.version().is_epub3() && !package.has_modified;

    let mut in_manifest = false;
    // Depth of a removed non-empty <item> being skipped
    let mut skip_depth = 0usize;

    loop {
        let event = reader.read_event()?;

        if skip_depth > 0 {
            match event {
                Event::Start(_) => skip_depth += 1,
                Event::End(_) => skip_depth -= 1,
                Event::Eof => break,
                _ => {}
            }
            continue;
        }

        match event {
            Event::Start(ref e) | Event::Empty(ref e) => {
                let is_empty = matches!(event, Event::Empty(_));
                let name = e.name();
                match local_name(name.as_ref()) {
                    b"package" if package.version_changed => {
                        let elem = with_version(e, &package.version().to_string())?;
                        if is_empty {
                            writer.write_event(Event::Empty(elem))?;
                        } else {
                            writer.write_event(Event::Start(elem))?;
                        }
                        continue;
                    }
                    b"manifest" if !is_empty => in_manifest = true,
                    b"item" if in_manifest => {
                        if let Some(id) = attribute(e, b"id")?
                            && removed.contains(id.as_str())
                        {
                            if !is_empty {
                                skip_depth = 1;
                            }
                            continue;
                        }
                    }
                    b"itemref" => {
                        if let Some(idref) = attribute(e, b"idref")?
                            && removed.contains(idref.as_str())
                            && !current.contains(idref.as_str())
                        {
                            if !is_empty {
                                skip_depth = 1;
                            }
                            continue;
                        }
                    }
                    _ => {}
                }
                writer.write_event(event)?;
            }
            Event::End(ref e) => {
                let name = e.name();
                match local_name(name.as_ref()) {
                    b"manifest" => {
                        in_manifest = false;
                        write_added_items(&mut writer, package, prefix_of(name.as_ref()))?;
                    }
                    b"metadata" if needs_modified => {
                        write_modified(&mut writer, prefix_of(name.as_ref()))?;
                    }
                    _ => {}
                }
                writer.write_event(event)?;
            }
            Event::Decl(d) => writer.write_event(Event::Decl(utf8_declaration(d)?))?,
            Event::Eof => break,
            event => writer.write_event(event)?,
        }
    }

    Ok(String::from_utf8(writer.into_inner())?)
}

/// `opf:` style prefix of a qualified name, including the colon.
fn prefix_of(name: &[u8]) -> String {
    match name.iter().rposition(|&b| b == b':') {
        Some(i) => String::from_utf8_lossy(&name[..=i]).into_owned(),
        None => String::new(),
    }
}

fn with_version(e: &BytesStart, version: &str) -> Result<BytesStart<'static>> {
    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
    let mut elem = BytesStart::new(name);
    let mut seen = false;
    for attr in e.attributes().with_checks(false) {
        let attr = attr.map_err(quick_xml::Error::from)?;
        if attr.key.as_ref() == b"version" {
            elem.push_attribute(("version", version));
            seen = true;
        } else {
            elem.push_attribute(attr);
        }
    }
    if !seen {
        elem.push_attribute(("version", version));
    }
    Ok(elem.into_owned())
}

fn write_added_items<W: Write>(
    writer: &mut Writer<W>,
    package: &EpubPackage,
    prefix: String,
) -> Result<()> {
    let tag = format!("{prefix}item");
    for id in &package.added_ids {
        let Some(item) = package.item(id) else {
            continue;
        };
        let mut elem = BytesStart::new(tag.as_str());
        elem.push_attribute(("id", item.id.as_str()));
        elem.push_attribute(("href", item.href.as_str()));
        elem.push_attribute(("media-type", item.media_type.as_str()));
        if !item.properties.is_empty() {
            elem.push_attribute(("properties", item.properties.join(" ").as_str()));
        }
        writer.write_event(Event::Text(BytesText::new("  ")))?;
        writer.write_event(Event::Empty(elem))?;
        writer.write_event(Event::Text(BytesText::new("\n  ")))?;
    }
    Ok(())
}

fn write_modified<W: Write>(writer: &mut Writer<W>, prefix: String) -> Result<()> {
    let tag = format!("{prefix}meta");
    let timestamp = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();

    let mut elem = BytesStart::new(tag.as_str());
    elem.push_attribute(("property", "dcterms:modified"));
    writer.write_event(Event::Text(BytesText::new("  ")))?;
    writer.write_event(Event::Start(elem))?;
    writer.write_event(Event::Text(BytesText::new(&timestamp)))?;
    writer.write_event(Event::End(BytesEnd::new(tag.as_str())))?;
    writer.write_event(Event::Text(BytesText::new("\n  ")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::epub::package::{EpubVersion, Item};
    use std::io::Cursor;

    const OPF: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="2.0" unique-identifier="uid">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
    <dc:title>Test &amp; Book</dc:title>
    <dc:identifier id="uid">urn:test</dc:identifier>
  </metadata>
  <manifest>
    <item id="ncx" href="toc.ncx" media-type="application/x-dtbncx+xml"/>
    <item id="ch1" href="ch1.xhtml" media-type="application/xhtml+xml"/>
    <item id="old" href="old.xhtml" media-type="application/xhtml+xml"/>
  </manifest>
  <spine toc="ncx">
    <itemref idref="ch1"/>
    <itemref idref="old"/>
  </spine>
  <!-- keep me -->
</package>"#;

    fn package() -> EpubPackage {
        package_with_opf(OPF.as_bytes())
    }

    fn package_with_opf(opf: &[u8]) -> EpubPackage {
        let mut buf = Cursor::new(Vec::new());
        {
            let mut zip = ZipWriter::new(&mut buf);
            let options = SimpleFileOptions::default();
            zip.start_file("mimetype", options).unwrap();
            zip.write_all(b"application/epub+zip").unwrap();
            zip.start_file("META-INF/container.xml", options).unwrap();
            zip.write_all(
                br#"<?xml version="1.0"?><container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container"><rootfiles><rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/></rootfiles></container>"#,
            )
            .unwrap();
            zip.start_file("OEBPS/content.opf", options).unwrap();
            zip.write_all(opf).unwrap();
            for name in ["toc.ncx", "ch1.xhtml", "old.xhtml"] {
                zip.start_file(format!("OEBPS/{name}"), options).unwrap();
                zip.write_all(b"<html/>").unwrap();
            }
            zip.finish().unwrap();
        }
        EpubPackage::from_bytes(buf.into_inner()).unwrap()
    }

    #[test]
    fn test_rewrite_without_changes_is_identity() {
        let package = package();
        assert_eq!(rewrite_opf(&package).unwrap(), OPF);
    }

    #[test]
    fn test_rewrite_applies_changes() {
        let mut package = package();
        package.remove_item("old").unwrap();
        package
            .add_item(Item::new(
                "nav",
                "nav.xhtml",
                "OEBPS/nav.xhtml",
                "application/xhtml+xml",
                vec!["nav".into()],
                b"<html/>".to_vec(),
            ))
            .unwrap();
        package.set_version(EpubVersion::V3);

        let opf = rewrite_opf(&package).unwrap();

        assert!(opf.contains(r#"version="3.0""#));
        assert!(opf.contains(r#"unique-identifier="uid""#));
        assert!(!opf.contains("old.xhtml"));
        assert!(!opf.contains(r#"idref="old""#));
        assert!(opf.contains(
            r#"<item id="nav" href="nav.xhtml" media-type="application/xhtml+xml" properties="nav"/>"#
        ));
        assert!(opf.contains(r#"<meta property="dcterms:modified">"#));
        assert!(opf.contains("Test &amp; Book"));
        assert!(opf.contains("<!-- keep me -->"));
    }

    #[test]
    fn test_readded_id_keeps_spine_entry() {
        let mut package = package();
        let old = package.remove_item("ch1").unwrap();
        package.add_item(old).unwrap();

        let opf = rewrite_opf(&package).unwrap();
        assert!(opf.contains(r#"<itemref idref="ch1"/>"#));
        assert_eq!(opf.matches(r#"id="ch1""#).count(), 1);
    }

    #[test]
    fn test_latin1_opf_is_written_as_utf8() {
        let latin1: Vec<u8> = OPF
            .replace("UTF-8", "ISO-8859-1")
            .replace("Test &amp; Book", "Caf\u{e9}")
            .chars()
            .map(|c| c as u8)
            .collect();
        let package = package_with_opf(&latin1);
        assert_eq!(package.title(), "Caf\u{e9}");

        let opf = rewrite_opf(&package).unwrap();
        assert!(opf.starts_with(r#"<?xml version="1.0" encoding="utf-8"?>"#));
        assert!(opf.contains("<dc:title>Caf\u{e9}</dc:title>"));

        let mut out = Cursor::new(Vec::new());
        write_package(&package, &mut out).unwrap();
        let reopened = EpubPackage::from_bytes(out.into_inner()).unwrap();
        assert_eq!(reopened.title(), "Caf\u{e9}");
        assert!(!reopened.opf_source.contains("ISO-8859-1"));
    }

    #[test]
    fn test_write_package_puts_mimetype_first() {
        let mut package = package();
        package.remove_item("old").unwrap();

        let mut out = Cursor::new(Vec::new());
        write_package(&package, &mut out).unwrap();

        let mut archive = zip::ZipArchive::new(Cursor::new(out.into_inner())).unwrap();
        let first = archive.by_index(0).unwrap();
        assert_eq!(first.name(), "mimetype");
        assert_eq!(first.compression(), zip::CompressionMethod::Stored);
        drop(first);
        assert!(archive.by_name("OEBPS/old.xhtml").is_err());
        assert!(archive.by_name("OEBPS/ch1.xhtml").is_ok());
    }
}
