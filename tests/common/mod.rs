//! Shared fixtures: small EPUB files built in memory.

#![allow(dead_code)]

use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};

use zip::ZipWriter;
use zip::write::SimpleFileOptions;

const CONTAINER_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>"#;

struct Resource {
    id: String,
    name: String,
    media_type: String,
    properties: Option<String>,
    data: Vec<u8>,
    in_spine: bool,
}

/// Builder for a minimal but valid EPUB rooted at `OEBPS/content.opf`.
pub struct EpubFixture {
    version: String,
    title: String,
    language: String,
    resources: Vec<Resource>,
    has_ncx: bool,
}

impl Default for EpubFixture {
    fn default() -> Self {
        Self::new()
    }
}

impl EpubFixture {
    pub fn new() -> Self {
        Self {
            version: "2.0".into(),
            title: "Fixture Book".into(),
            language: "en".into(),
            resources: Vec::new(),
            has_ncx: false,
        }
    }

    pub fn version(mut self, version: &str) -> Self {
        self.version = version.into();
        self
    }

    /// A spine document whose `<body>` holds `body`.
    pub fn chapter(self, name: &str, body: &str) -> Self {
        let doc = xhtml(name, body);
        self.document(name, &doc)
    }

    /// A spine document with the given full markup.
    pub fn document(mut self, name: &str, content: &str) -> Self {
        let id = format!("doc{}", self.resources.len() + 1);
        self.resources.push(Resource {
            id,
            name: name.into(),
            media_type: "application/xhtml+xml".into(),
            properties: None,
            data: content.as_bytes().to_vec(),
            in_spine: true,
        });
        self
    }

    pub fn ncx(mut self, content: &str) -> Self {
        self.has_ncx = true;
        self.resources.push(Resource {
            id: "ncx".into(),
            name: "toc.ncx".into(),
            media_type: "application/x-dtbncx+xml".into(),
            properties: None,
            data: content.as_bytes().to_vec(),
            in_spine: false,
        });
        self
    }

    /// An EPUB 3 navigation document at `OEBPS/<name>`.
    pub fn nav(mut self, name: &str, content: &str) -> Self {
        self.resources.push(Resource {
            id: "toc-nav".into(),
            name: name.into(),
            media_type: "application/xhtml+xml".into(),
            properties: Some("nav".into()),
            data: content.as_bytes().to_vec(),
            in_spine: false,
        });
        self
    }

    pub fn resource(mut self, name: &str, media_type: &str, data: &[u8]) -> Self {
        let id = format!("res{}", self.resources.len() + 1);
        self.resources.push(Resource {
            id,
            name: name.into(),
            media_type: media_type.into(),
            properties: None,
            data: data.to_vec(),
            in_spine: false,
        });
        self
    }

    fn opf(&self) -> String {
        let mut manifest = String::new();
        let mut spine = String::new();
        for res in &self.resources {
            let properties = res
                .properties
                .as_ref()
                .map(|p| format!(r#" properties="{p}""#))
                .unwrap_or_default();
            manifest.push_str(&format!(
                "    <item id=\"{}\" href=\"{}\" media-type=\"{}\"{}/>\n",
                res.id, res.name, res.media_type, properties
            ));
            if res.in_spine {
                spine.push_str(&format!("    <itemref idref=\"{}\"/>\n", res.id));
            }
        }
        let toc = if self.has_ncx { r#" toc="ncx""# } else { "" };

        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="{}" unique-identifier="bookid">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
    <dc:title>{}</dc:title>
    <dc:language>{}</dc:language>
    <dc:identifier id="bookid">urn:uuid:fixture</dc:identifier>
  </metadata>
  <manifest>
{}  </manifest>
  <spine{}>
{}  </spine>
</package>
"#,
            self.version, self.title, self.language, manifest, toc, spine
        )
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        {
            let mut zip = ZipWriter::new(&mut buf);
            let stored =
                SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
            let deflated =
                SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

            zip.start_file("mimetype", stored).unwrap();
            zip.write_all(b"application/epub+zip").unwrap();
            zip.start_file("META-INF/container.xml", deflated).unwrap();
            zip.write_all(CONTAINER_XML.as_bytes()).unwrap();
            zip.start_file("OEBPS/content.opf", deflated).unwrap();
            zip.write_all(self.opf().as_bytes()).unwrap();
            for res in &self.resources {
                zip.start_file(format!("OEBPS/{}", res.name), deflated).unwrap();
                zip.write_all(&res.data).unwrap();
            }
            zip.finish().unwrap();
        }
        buf.into_inner()
    }

    pub fn write_to(&self, dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, self.to_bytes()).unwrap();
        path
    }
}

/// `n` space-separated words.
pub fn words(n: usize) -> String {
    (0..n).map(|i| format!("w{i}")).collect::<Vec<_>>().join(" ")
}

/// A complete XHTML content document.
pub fn xhtml(title: &str, body: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<!DOCTYPE html>
<html xmlns="http://www.w3.org/1999/xhtml">
<head><title>{title}</title></head>
<body>
{body}
</body>
</html>
"#
    )
}

/// An NCX with one navPoint per `(label, src)` and an optional page list.
pub fn ncx(points: &[(&str, &str)], page_targets: usize) -> String {
    let mut nav_map = String::new();
    for (i, (label, src)) in points.iter().enumerate() {
        nav_map.push_str(&format!(
            r#"    <navPoint id="np{n}" playOrder="{n}"><navLabel><text>{label}</text></navLabel><content src="{src}"/></navPoint>
"#,
            n = i + 1
        ));
    }
    let page_list = if page_targets == 0 {
        String::new()
    } else {
        let targets: String = (1..=page_targets)
            .map(|n| {
                format!(
                    r#"    <pageTarget id="pt{n}" type="normal" value="{n}"><navLabel><text>{n}</text></navLabel><content src="ch1.xhtml#p{n}"/></pageTarget>
"#
                )
            })
            .collect();
        format!("  <pageList>\n{targets}  </pageList>\n")
    };
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<ncx xmlns="http://www.daisy.org/z3986/2005/ncx/" version="2005-1">
  <head><meta name="dtb:uid" content="urn:uuid:fixture"/></head>
  <docTitle><text>Fixture Book</text></docTitle>
  <navMap>
{nav_map}  </navMap>
{page_list}</ncx>
"#
    )
}

pub fn entry_names(path: &Path) -> Vec<String> {
    let file = std::fs::File::open(path).unwrap();
    let mut archive = zip::ZipArchive::new(file).unwrap();
    (0..archive.len())
        .map(|i| archive.by_index(i).unwrap().name().to_string())
        .collect()
}

pub fn read_entry(path: &Path, name: &str) -> String {
    let file = std::fs::File::open(path).unwrap();
    let mut archive = zip::ZipArchive::new(file).unwrap();
    let mut entry = archive.by_name(name).unwrap();
    let mut content = String::new();
    entry.read_to_string(&mut content).unwrap();
    content
}

/// `(href, label)` of every link in the `page-list` nav of `nav`.
pub fn page_list_links(nav: &str) -> Vec<(String, String)> {
    let start = nav.find("epub:type=\"page-list\"").expect("no page-list nav");
    let section = &nav[start..];
    let section = &section[..section.find("</nav>").unwrap()];

    let mut links = Vec::new();
    let mut rest = section;
    while let Some(pos) = rest.find("<a href=\"") {
        rest = &rest[pos + 9..];
        let href_end = rest.find('"').unwrap();
        let href = rest[..href_end].to_string();
        let label_start = rest.find('>').unwrap() + 1;
        let label_end = rest.find("</a>").unwrap();
        links.push((href, rest[label_start..label_end].to_string()));
        rest = &rest[label_end..];
    }
    links
}
