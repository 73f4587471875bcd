//! Page-list detection.
//!
//! Evidence is searched in three tiers across the whole book: an EPUB 3
//! `page-list` nav, an NCX `pageList`, then inline pagebreak markers. The
//! first tier that matches anywhere decides both presence and count.

use std::path::Path;

use html5ever::parse_document;
use html5ever::tendril::TendrilSink;
use log::debug;
use markup5ever_rcdom::{Handle, NodeData, RcDom};
use memchr::memmem;
use quick_xml::Reader;
use quick_xml::events::Event;

use crate::epub::{EpubPackage, Item, ItemKind};
use crate::util::local_name;

/// Where a book's page numbers come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageSource {
    /// `<nav epub:type="page-list">` in an XHTML item
    Navigation,
    /// `<pageList>` in an NCX
    Ncx,
    /// Inline `epub:type="pagebreak"` elements in content documents
    Markers,
}

/// Locate page navigation and count its entries.
///
/// Returns `None` when the book carries no page information at all.
pub fn find_page_source(package: &EpubPackage) -> Option<(PageSource, usize)> {
    let scanned: Vec<&Item> = package
        .items()
        .iter()
        .filter(|item| !matches!(item.kind, ItemKind::Image | ItemKind::Font))
        .collect();

    // A bare substring is only a hint; prose may mention "page-list"
    for item in &scanned {
        if memmem::find(item.content(), b"page-list").is_some()
            && let Some(links) = nav_page_list_links(&item.text())
        {
            debug!("Found page-list nav in {} ({} links)", item.path, links);
            return Some((PageSource::Navigation, links));
        }
    }

    for item in &scanned {
        if memmem::find(item.content(), b"pageList").is_some()
            && let Some(targets) = ncx_page_targets(&item.text())
        {
            debug!("Found NCX pageList in {} ({} targets)", item.path, targets);
            return Some((PageSource::Ncx, targets));
        }
    }

    let markers: usize = package
        .items_of_kind(ItemKind::Document)
        .filter(|item| memmem::find(item.content(), b"pagebreak").is_some())
        .map(|item| pagebreak_markers(&item.text()))
        .sum();
    if markers > 0 {
        debug!("Found {} inline pagebreak markers", markers);
        return Some((PageSource::Markers, markers));
    }

    None
}

/// Whether the book already exposes page numbers to readers.
pub fn has_page_list(package: &EpubPackage) -> bool {
    find_page_source(package).is_some()
}

/// Number of page entries the book exposes, or 0.
pub fn page_count(package: &EpubPackage) -> usize {
    find_page_source(package).map_or(0, |(_, count)| count)
}

/// [`has_page_list`] for a file on disk. Unreadable files count as unpaginated.
pub fn has_page_list_at<P: AsRef<Path>>(path: P) -> bool {
    let path = path.as_ref();
    match EpubPackage::open(path) {
        Ok(package) => has_page_list(&package),
        Err(e) => {
            debug!("Cannot inspect {}: {}", path.display(), e);
            false
        }
    }
}

/// [`page_count`] for a file on disk. Unreadable files have 0 pages.
pub fn page_count_at<P: AsRef<Path>>(path: P) -> usize {
    let path = path.as_ref();
    match EpubPackage::open(path) {
        Ok(package) => page_count(&package),
        Err(e) => {
            debug!("Cannot inspect {}: {}", path.display(), e);
            0
        }
    }
}

fn parse_html(content: &str) -> RcDom {
    parse_document(RcDom::default(), Default::default())
        .from_utf8()
        .one(content.as_bytes())
}

/// Links inside the first page-list nav, or `None` if there is no such nav.
fn nav_page_list_links(content: &str) -> Option<usize> {
    let dom = parse_html(content);
    let nav = find_element(&dom.document, &|handle| {
        is_element(handle, "nav") && has_epub_type(handle, "page-list")
    })?;
    Some(count_elements(&nav, &|handle| is_element(handle, "a")))
}

/// `pageTarget`s of the first `pageList`, or `None` if there is none.
///
/// Parsing stops quietly at the first XML error; whatever was seen up to
/// that point still counts.
fn ncx_page_targets(content: &str) -> Option<usize> {
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);

    let mut found = false;
    let mut in_list = false;
    let mut targets = 0;

    loop {
        let event = match reader.read_event() {
            Ok(event) => event,
            Err(e) => {
                debug!("Stopped reading NCX: {}", e);
                break;
            }
        };
        match event {
            Event::Start(e) => match local_name(e.name().as_ref()) {
                b"pageList" => {
                    found = true;
                    in_list = true;
                }
                b"pageTarget" if in_list => targets += 1,
                _ => {}
            },
            Event::Empty(e) => match local_name(e.name().as_ref()) {
                b"pageList" => return Some(0),
                b"pageTarget" if in_list => targets += 1,
                _ => {}
            },
            Event::End(e) if in_list && local_name(e.name().as_ref()) == b"pageList" => break,
            Event::Eof => break,
            _ => {}
        }
    }

    found.then_some(targets)
}

fn pagebreak_markers(content: &str) -> usize {
    let dom = parse_html(content);
    count_elements(&dom.document, &|handle| has_epub_type(handle, "pagebreak"))
}

fn is_element(handle: &Handle, name: &str) -> bool {
    matches!(handle.data, NodeData::Element { name: ref qname, .. } if qname.local.as_ref() == name)
}

fn has_epub_type(handle: &Handle, token: &str) -> bool {
    if let NodeData::Element { ref attrs, .. } = handle.data {
        attrs.borrow().iter().any(|attr| {
            attr.name.local.as_ref() == "epub:type"
                && attr.value.split_ascii_whitespace().any(|t| t == token)
        })
    } else {
        false
    }
}

fn find_element(handle: &Handle, matches: &dyn Fn(&Handle) -> bool) -> Option<Handle> {
    if matches(handle) {
        return Some(handle.clone());
    }
    for child in handle.children.borrow().iter() {
        if let Some(found) = find_element(child, matches) {
            return Some(found);
        }
    }
    None
}

fn count_elements(handle: &Handle, matches: &dyn Fn(&Handle) -> bool) -> usize {
    let own = usize::from(matches(handle));
    own + handle
        .children
        .borrow()
        .iter()
        .map(|child| count_elements(child, matches))
        .sum::<usize>()
}
