//! Page synthesis: word-count page breaks and a regenerated navigation document.

use std::collections::HashSet;
use std::ops::Range;

use log::{debug, info, warn};
use memchr::memmem;
use quick_xml::events::{BytesEnd, BytesStart, Event};
use quick_xml::{Reader, Writer};

use crate::epub::{
    EpubPackage, EpubVersion, Item, NavigationDocument, PageTarget, XHTML_MEDIA_TYPE,
};
use crate::error::{Error, Result};
use crate::util::{local_name, resolve_entity, utf8_declaration};

/// Words per synthetic page when the caller does not choose.
pub const DEFAULT_WORDS_PER_PAGE: usize = 300;

const OPS_NAMESPACE: &str = "http://www.idpf.org/2007/ops";

/// Tuning for [`synthesize_pages`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaginationOptions {
    pub words_per_page: usize,
}

impl Default for PaginationOptions {
    fn default() -> Self {
        Self {
            words_per_page: DEFAULT_WORDS_PER_PAGE,
        }
    }
}

impl PaginationOptions {
    pub fn new(words_per_page: usize) -> Self {
        Self { words_per_page }
    }

    pub fn validate(&self) -> Result<()> {
        if self.words_per_page == 0 {
            return Err(Error::InvalidOption(
                "words per page must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// Running word total across documents.
///
/// Pages are completed by floor division; the remainder carries into the
/// next run, even across document boundaries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageCounter {
    words_per_page: usize,
    pages: usize,
    words: usize,
}

impl PageCounter {
    /// `words_per_page` must be non-zero.
    pub fn new(words_per_page: usize) -> Self {
        Self {
            words_per_page: words_per_page.max(1),
            pages: 0,
            words: 0,
        }
    }

    /// Add a run of words, returning the page numbers it completed.
    pub fn add_words(&mut self, words: usize) -> Range<usize> {
        let first = self.pages + 1;
        self.words += words;
        while self.words >= self.words_per_page {
            self.words -= self.words_per_page;
            self.pages += 1;
        }
        first..self.pages + 1
    }

    pub fn pages(&self) -> usize {
        self.pages
    }

    /// Words counted towards the next, unfinished page.
    pub fn pending_words(&self) -> usize {
        self.words
    }

    /// Words added since `earlier`, a previous state of this counter.
    pub fn words_since(&self, earlier: &PageCounter) -> usize {
        (self.pages * self.words_per_page + self.words)
            .saturating_sub(earlier.pages * earlier.words_per_page + earlier.words)
    }
}

/// Insert page markers into every content document and regenerate the
/// navigation document. Returns the number of pages created.
///
/// Works in memory only; a book too short for a single page is left
/// untouched and `0` is returned. Documents that fail to parse are skipped.
pub fn synthesize_pages(package: &mut EpubPackage, options: &PaginationOptions) -> Result<usize> {
    options.validate()?;

    let prefix = marker_prefix(package);
    let mut counter = PageCounter::new(options.words_per_page);
    let mut targets: Vec<PageTarget> = Vec::new();

    for id in package.documents_in_reading_order() {
        let Some(item) = package.item(&id) else {
            continue;
        };
        let path = item.path.clone();

        let mut doc_counter = counter.clone();
        let mut doc_targets = Vec::new();
        let result = paginate_document(
            &item.text(),
            &mut doc_counter,
            &MarkerStyle {
                prefix: &prefix,
                document: &path,
            },
            &mut doc_targets,
        );

        match result {
            Ok(Some(content)) => {
                debug!("{}: {} page markers", path, doc_targets.len());
                if let Some(item) = package.item_mut(&id) {
                    item.set_content(content.into_bytes());
                }
            }
            Ok(None) => {}
            Err(e) => {
                warn!(
                    "Skipping malformed document {}: {} ({} words read before the error are not counted)",
                    path,
                    e,
                    doc_counter.words_since(&counter)
                );
                continue;
            }
        }
        counter = doc_counter;
        targets.extend(doc_targets);
    }

    let pages = counter.pages();
    if pages == 0 {
        info!("Not enough text for a single page; book left unchanged");
        return Ok(0);
    }

    install_navigation(package, targets)?;
    info!("Added {} pages", pages);
    Ok(pages)
}

/// Replace the book's navigation document with one listing `pages`.
///
/// The existing table of contents is carried over. The new document takes
/// the old one's id and path when there was one, and the package is
/// promoted to EPUB 3 if needed.
pub fn install_navigation(package: &mut EpubPackage, pages: Vec<PageTarget>) -> Result<()> {
    let toc = package.table_of_contents();

    let (id, href, path) = match package.nav_document() {
        Some(old) => (old.id.clone(), old.href.clone(), old.path.clone()),
        None => {
            let path = package.unique_path("nav", "xhtml");
            (package.unique_id("nav"), package.href_for(&path), path)
        }
    };
    if package.nav_document().is_some() {
        package.remove_item(&id);
    }

    let mut nav = NavigationDocument::new(package.title(), package.language());
    nav.toc = toc;
    nav.pages = pages;
    let xhtml = nav.to_xhtml(&path);

    package.add_item(Item::new(
        id,
        href,
        path,
        XHTML_MEDIA_TYPE,
        vec!["nav".to_string()],
        xhtml.into_bytes(),
    ))?;

    if !package.version().is_epub3() {
        debug!("Promoting EPUB {} to {}", package.version(), EpubVersion::V3);
        package.set_version(EpubVersion::V3);
    }
    Ok(())
}

/// First of `pg`, `page`, `pagebreak-`, `pagebreak2-`, ... that no existing
/// id uses followed by a page number.
fn marker_prefix(package: &EpubPackage) -> String {
    let ids = existing_ids(package);
    let taken = |prefix: &str| {
        ids.iter().any(|id| {
            id.strip_prefix(prefix)
                .is_some_and(|rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()))
        })
    };

    ["pg", "page", "pagebreak-"]
        .into_iter()
        .map(str::to_string)
        .chain((2..).map(|n| format!("pagebreak{n}-")))
        .find(|prefix| !taken(prefix.as_str()))
        .unwrap_or_else(|| "pagebreak-".to_string())
}

/// Every quoted `id` attribute value in the book.
fn existing_ids(package: &EpubPackage) -> HashSet<String> {
    let mut ids = HashSet::new();
    for item in package.items() {
        let content = item.content();
        for pos in memmem::find_iter(content, b"id=") {
            let rest = &content[pos + 3..];
            let Some(&quote) = rest.first() else {
                continue;
            };
            if quote != b'"' && quote != b'\'' {
                continue;
            }
            if let Some(end) = memchr::memchr(quote, &rest[1..]) {
                ids.insert(String::from_utf8_lossy(&rest[1..=end]).into_owned());
            }
        }
    }
    ids
}

struct MarkerStyle<'a> {
    prefix: &'a str,
    document: &'a str,
}

/// Adjacent character data inside the body, buffered until the next markup event.
#[derive(Default)]
struct TextRun {
    events: Vec<Event<'static>>,
    text: String,
}

impl TextRun {
    fn flush<W: std::io::Write>(
        &mut self,
        writer: &mut Writer<W>,
        counter: &mut PageCounter,
        style: &MarkerStyle,
        targets: &mut Vec<PageTarget>,
    ) -> Result<()> {
        if self.events.is_empty() {
            return Ok(());
        }

        let words = self.text.split_whitespace().count();
        for page in counter.add_words(words) {
            let id = format!("{}{}", style.prefix, page);
            let label = page.to_string();

            let mut span = BytesStart::new("span");
            span.push_attribute(("id", id.as_str()));
            span.push_attribute(("epub:type", "pagebreak"));
            span.push_attribute(("role", "doc-pagebreak"));
            span.push_attribute(("aria-label", label.as_str()));
            span.push_attribute(("title", label.as_str()));
            writer.write_event(Event::Start(span))?;
            writer.write_event(Event::End(BytesEnd::new("span")))?;

            targets.push(PageTarget {
                id,
                document: style.document.to_string(),
                label,
            });
        }

        for event in self.events.drain(..) {
            writer.write_event(event)?;
        }
        self.text.clear();
        Ok(())
    }
}

/// Stream one content document, placing a marker before each text run
/// that completes a page. Returns the new markup, or `None` if no marker
/// was placed.
fn paginate_document(
    source: &str,
    counter: &mut PageCounter,
    style: &MarkerStyle,
    targets: &mut Vec<PageTarget>,
) -> Result<Option<String>> {
    let mut reader = Reader::from_str(source);
    let config = reader.config_mut();
    config.trim_text(false);
    // HTML-style content (unclosed <br>, stray end tags) passes through as written
    config.check_end_names = false;
    config.allow_unmatched_ends = true;
    let mut writer = Writer::new(Vec::with_capacity(source.len() + 1024));

    let first_target = targets.len();
    let mut run = TextRun::default();
    let mut seen_root = false;
    let mut in_body = false;
    let mut hidden_depth = 0usize;

    loop {
        let event = reader.read_event()?;
        let counted = in_body && hidden_depth == 0;

        match event {
            Event::Text(ref t) if counted => {
                run.text.push_str(&String::from_utf8_lossy(t));
                run.events.push(event.into_owned());
                continue;
            }
            Event::CData(ref c) if counted => {
                run.text.push_str(&String::from_utf8_lossy(c));
                run.events.push(event.into_owned());
                continue;
            }
            Event::GeneralRef(ref r) if counted => {
                let name = String::from_utf8_lossy(r);
                match resolve_entity(&name) {
                    Some(c) => run.text.push(c),
                    // Unknown entities read as part of a word
                    None => run.text.push_str(&name),
                }
                run.events.push(event.into_owned());
                continue;
            }
            _ => {}
        }

        run.flush(&mut writer, counter, style, targets)?;

        match event {
            Event::Start(e) => {
                let local = local_name(e.name().as_ref()).to_vec();
                let e = if seen_root { e } else { with_epub_namespace(e) };
                seen_root = true;
                match local.as_slice() {
                    b"body" => in_body = true,
                    b"script" | b"style" if in_body => hidden_depth += 1,
                    _ => {}
                }
                writer.write_event(Event::Start(e))?;
            }
            Event::Empty(e) => {
                let e = if seen_root { e } else { with_epub_namespace(e) };
                seen_root = true;
                writer.write_event(Event::Empty(e))?;
            }
            Event::End(e) => {
                match local_name(e.name().as_ref()) {
                    b"body" => in_body = false,
                    b"script" | b"style" if hidden_depth > 0 => hidden_depth -= 1,
                    _ => {}
                }
                writer.write_event(Event::End(e))?;
            }
            Event::Decl(d) => writer.write_event(Event::Decl(utf8_declaration(d)?))?,
            Event::Eof => break,
            event => writer.write_event(event)?,
        }
    }

    if targets.len() == first_target {
        return Ok(None);
    }
    Ok(Some(String::from_utf8(writer.into_inner())?))
}

fn with_epub_namespace(mut e: BytesStart<'_>) -> BytesStart<'_> {
    let declared = e
        .attributes()
        .with_checks(false)
        .any(|attr| attr.is_ok_and(|attr| attr.key.as_ref() == b"xmlns:epub"));
    if !declared {
        e.push_attribute(("xmlns:epub", OPS_NAMESPACE));
    }
    e
}
