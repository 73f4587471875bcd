//! EPUB 3 navigation document generation.

use crate::util::{encode_href, escape_xml, is_external_href, parent_dir, relative_path};

const OPS_NAMESPACE: &str = "http://www.idpf.org/2007/ops";

/// A table of contents entry (hierarchical)
///
/// Hrefs are package paths (optionally with a `#fragment`) once resolved by
/// the package, so they can be re-expressed relative to any document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TocEntry {
    pub title: String,
    pub href: String,
    pub children: Vec<TocEntry>,
}

impl TocEntry {
    pub fn new(title: impl Into<String>, href: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            href: href.into(),
            children: Vec::new(),
        }
    }

    pub fn with_child(mut self, child: TocEntry) -> Self {
        self.children.push(child);
        self
    }
}

/// A synthetic page boundary: an anchor id inside a content document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageTarget {
    /// Anchor id of the marker (`pg<N>`).
    pub id: String,
    /// Package path of the hosting document.
    pub document: String,
    /// Human-readable page number.
    pub label: String,
}

impl PageTarget {
    /// Link to this marker from a document in `from_dir`.
    pub fn href_from(&self, from_dir: &str) -> String {
        format!(
            "{}#{}",
            encode_href(&relative_path(from_dir, &self.document)),
            self.id
        )
    }
}

/// The regenerated navigation document: a table of contents plus a page list.
#[derive(Debug, Clone, Default)]
pub struct NavigationDocument {
    pub title: String,
    pub language: String,
    pub toc: Vec<TocEntry>,
    pub pages: Vec<PageTarget>,
}

impl NavigationDocument {
    pub fn new(title: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            language: language.into(),
            ..Default::default()
        }
    }

    /// Render the document as XHTML to be stored at package path `nav_path`.
    ///
    /// When the book has no table of contents, the first page doubles as a
    /// single "start of book" entry so the `toc` nav is never empty.
    pub fn to_xhtml(&self, nav_path: &str) -> String {
        let nav_dir = parent_dir(nav_path);
        let mut out = String::new();

        out.push_str("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<!DOCTYPE html>\n");
        out.push_str(&format!(
            "<html xmlns=\"http://www.w3.org/1999/xhtml\" xmlns:epub=\"{OPS_NAMESPACE}\""
        ));
        if !self.language.is_empty() {
            let lang = escape_xml(&self.language);
            out.push_str(&format!(" lang=\"{lang}\" xml:lang=\"{lang}\""));
        }
        out.push_str(">\n<head>\n");
        out.push_str(&format!("  <title>{}</title>\n", escape_xml(&self.title)));
        out.push_str("</head>\n<body>\n");

        // Table of contents
        out.push_str("  <nav epub:type=\"toc\" id=\"toc\" role=\"doc-toc\">\n");
        out.push_str(&format!(
            "    <h1>{}</h1>\n",
            escape_xml(if self.title.is_empty() {
                "Contents"
            } else {
                &self.title
            })
        ));
        out.push_str("    <ol>\n");
        if self.toc.is_empty() {
            if let Some(first) = self.pages.first() {
                out.push_str(&format!(
                    "      <li><a href=\"{}\">Start</a></li>\n",
                    escape_xml(&first.href_from(nav_dir))
                ));
            }
        } else {
            for entry in &self.toc {
                write_toc_entry(&mut out, entry, nav_dir, 3);
            }
        }
        out.push_str("    </ol>\n  </nav>\n");

        // Page list
        out.push_str(
            "  <nav epub:type=\"page-list\" id=\"page-list\" role=\"doc-pagelist\" hidden=\"\">\n",
        );
        out.push_str("    <h1>Pages</h1>\n    <ol>\n");
        for page in &self.pages {
            out.push_str(&format!(
                "      <li><a href=\"{}\">{}</a></li>\n",
                escape_xml(&page.href_from(nav_dir)),
                escape_xml(&page.label)
            ));
        }
        out.push_str("    </ol>\n  </nav>\n");

        out.push_str("</body>\n</html>\n");
        out
    }
}

fn write_toc_entry(out: &mut String, entry: &TocEntry, nav_dir: &str, indent: usize) {
    let indent_str = "  ".repeat(indent);
    let title = escape_xml(&entry.title);

    if entry.href.is_empty() {
        out.push_str(&format!("{indent_str}<li><span>{title}</span>"));
    } else {
        let href = escape_xml(&toc_href(&entry.href, nav_dir));
        out.push_str(&format!("{indent_str}<li><a href=\"{href}\">{title}</a>"));
    }

    if entry.children.is_empty() {
        out.push_str("</li>\n");
        return;
    }

    out.push_str(&format!("\n{indent_str}  <ol>\n"));
    for child in &entry.children {
        write_toc_entry(out, child, nav_dir, indent + 2);
    }
    out.push_str(&format!("{indent_str}  </ol>\n{indent_str}</li>\n"));
}

fn toc_href(href: &str, nav_dir: &str) -> String {
    if is_external_href(href) {
        return href.to_string();
    }
    match href.split_once('#') {
        Some((path, fragment)) => format!(
            "{}#{}",
            encode_href(&relative_path(nav_dir, path)),
            fragment
        ),
        None => encode_href(&relative_path(nav_dir, href)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(n: usize, document: &str) -> PageTarget {
        PageTarget {
            id: format!("pg{n}"),
            document: document.into(),
            label: n.to_string(),
        }
    }

    #[test]
    fn test_page_target_href() {
        let page = target(3, "OEBPS/text/Chapter One.xhtml");
        assert_eq!(page.href_from("OEBPS"), "text/Chapter%20One.xhtml#pg3");
        assert_eq!(page.href_from("OEBPS/nav"), "../text/Chapter%20One.xhtml#pg3");
    }

    #[test]
    fn test_page_list_is_hidden_and_ordered() {
        let mut nav = NavigationDocument::new("A & B", "en");
        nav.pages = vec![target(1, "OEBPS/ch1.xhtml"), target(2, "OEBPS/ch2.xhtml")];

        let xhtml = nav.to_xhtml("OEBPS/nav.xhtml");

        assert!(xhtml.contains("<title>A &amp; B</title>"));
        assert!(xhtml.contains("lang=\"en\" xml:lang=\"en\""));
        assert!(xhtml.contains("epub:type=\"page-list\""));
        assert!(xhtml.contains("hidden=\"\""));
        let first = xhtml.find("href=\"ch1.xhtml#pg1\">1</a>").unwrap();
        let second = xhtml.find("href=\"ch2.xhtml#pg2\">2</a>").unwrap();
        assert!(first < second);
    }

    #[test]
    fn test_empty_toc_links_first_page() {
        let mut nav = NavigationDocument::new("Book", "");
        nav.pages = vec![target(1, "ch1.xhtml")];

        let xhtml = nav.to_xhtml("nav.xhtml");
        assert!(xhtml.contains("<li><a href=\"ch1.xhtml#pg1\">Start</a></li>"));
        assert!(!xhtml.contains("xml:lang"));
    }

    #[test]
    fn test_nested_toc_relative_to_nav() {
        let mut nav = NavigationDocument::new("Book", "en");
        nav.toc = vec![
            TocEntry::new("Part I", "")
                .with_child(TocEntry::new("Chapter 1", "OEBPS/text/ch1.xhtml#start")),
            TocEntry::new("Website", "https://example.com/"),
        ];
        nav.pages = vec![target(1, "OEBPS/text/ch1.xhtml")];

        let xhtml = nav.to_xhtml("OEBPS/nav/nav.xhtml");
        assert!(xhtml.contains("<li><span>Part I</span>"));
        assert!(xhtml.contains("<a href=\"../text/ch1.xhtml#start\">Chapter 1</a>"));
        assert!(xhtml.contains("<a href=\"https://example.com/\">Website</a>"));
        assert!(!xhtml.contains(">Start</a>"));
    }
}
