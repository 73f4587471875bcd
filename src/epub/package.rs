//! In-memory EPUB package.
//!
//! An [`EpubPackage`] holds every file of the archive in memory so it can be
//! inspected, mutated and written back in one piece. Opening never writes;
//! [`EpubPackage::save`] replaces the backing file atomically.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::io::{Cursor, Read, Seek};
use std::path::{Path, PathBuf};

use log::{debug, warn};
use zip::ZipArchive;

use super::nav::TocEntry;
use super::parser::{self, Metadata, SpineRef};
use super::writer;
use crate::error::{Error, Result};
use crate::util::{
    decode_document, encode_href, is_external_href, join_path, parent_dir, relative_path,
    resolve_href,
};

pub const NCX_MEDIA_TYPE: &str = "application/x-dtbncx+xml";
pub const XHTML_MEDIA_TYPE: &str = "application/xhtml+xml";

/// Declared EPUB version (`package@version`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct EpubVersion {
    pub major: u32,
    pub minor: u32,
}

impl EpubVersion {
    pub const V2: EpubVersion = EpubVersion { major: 2, minor: 0 };
    pub const V3: EpubVersion = EpubVersion { major: 3, minor: 0 };

    /// Lenient parse of a version attribute; anything unreadable is 2.0.
    pub fn parse(s: &str) -> Self {
        let mut parts = s.trim().splitn(2, '.');
        let major = parts.next().and_then(|p| p.parse().ok());
        let minor = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
        match major {
            Some(major) => EpubVersion { major, minor },
            None => EpubVersion::V2,
        }
    }

    pub fn is_epub3(self) -> bool {
        self.major >= 3
    }
}

impl fmt::Display for EpubVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// What an item is, derived from its media type and manifest properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemKind {
    /// XHTML content document
    Document,
    /// EPUB 3 nav document or EPUB 2 NCX
    Navigation,
    Stylesheet,
    Image,
    Font,
    Script,
    Other,
}

impl ItemKind {
    pub fn classify(media_type: &str, properties: &[String]) -> Self {
        if properties.iter().any(|p| p == "nav") {
            return ItemKind::Navigation;
        }

        let media_type = media_type.trim().to_ascii_lowercase();
        match media_type.as_str() {
            XHTML_MEDIA_TYPE | "text/html" | "application/html" => ItemKind::Document,
            NCX_MEDIA_TYPE => ItemKind::Navigation,
            "text/css" => ItemKind::Stylesheet,
            "application/javascript" | "text/javascript" | "application/ecmascript" => {
                ItemKind::Script
            }
            "application/vnd.ms-opentype" => ItemKind::Font,
            m if m.starts_with("image/") => ItemKind::Image,
            m if m.starts_with("font/")
                || m.starts_with("application/font-")
                || m.starts_with("application/x-font-") =>
            {
                ItemKind::Font
            }
            _ => ItemKind::Other,
        }
    }
}

/// One manifest item with its content.
#[derive(Debug, Clone)]
pub struct Item {
    pub id: String,
    /// Href as written in the manifest (relative to the OPF).
    pub href: String,
    /// Zip entry name.
    pub path: String,
    pub media_type: String,
    pub properties: Vec<String>,
    pub kind: ItemKind,
    data: Vec<u8>,
}

impl Item {
    pub fn new(
        id: impl Into<String>,
        href: impl Into<String>,
        path: impl Into<String>,
        media_type: impl Into<String>,
        properties: Vec<String>,
        data: Vec<u8>,
    ) -> Self {
        let media_type = media_type.into();
        Self {
            id: id.into(),
            href: href.into(),
            path: path.into(),
            kind: ItemKind::classify(&media_type, &properties),
            media_type,
            properties,
            data,
        }
    }

    /// The package path, which is how page markers name their document.
    pub fn name(&self) -> &str {
        &self.path
    }

    pub fn content(&self) -> &[u8] {
        &self.data
    }

    pub fn set_content(&mut self, data: Vec<u8>) {
        self.data = data;
    }

    /// Content decoded as text (UTF-8, declared encoding, or Windows-1252).
    pub fn text(&self) -> Cow<'_, str> {
        decode_document(&self.data)
    }

    pub fn is_nav_document(&self) -> bool {
        self.properties.iter().any(|p| p == "nav")
    }

    pub fn is_ncx(&self) -> bool {
        self.media_type.eq_ignore_ascii_case(NCX_MEDIA_TYPE)
    }
}

/// An EPUB package held in memory.
#[derive(Debug, Clone)]
pub struct EpubPackage {
    pub(crate) source: Option<PathBuf>,
    pub(crate) opf_path: String,
    pub(crate) opf_source: String,
    pub(crate) version: EpubVersion,
    pub(crate) version_changed: bool,
    pub(crate) metadata: Metadata,
    pub(crate) items: Vec<Item>,
    pub(crate) spine: Vec<SpineRef>,
    pub(crate) toc_id: Option<String>,
    pub(crate) has_modified: bool,
    /// Every zip entry name in archive order.
    pub(crate) archive_order: Vec<String>,
    /// Entries not owned by a manifest item (container.xml, the OPF, ...).
    pub(crate) extra_files: HashMap<String, Vec<u8>>,
    pub(crate) removed_ids: Vec<String>,
    pub(crate) added_ids: Vec<String>,
}

impl EpubPackage {
    /// Open an EPUB file from disk. The path becomes the package's backing store.
    ///
    /// A file that cannot be read is reported as [`Error::InvalidEpub`], like
    /// one that is not an EPUB.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read(path)
            .map_err(|e| Error::InvalidEpub(format!("cannot read {}: {}", path.display(), e)))?;
        let mut package = Self::from_reader(Cursor::new(data))?;
        package.source = Some(path.to_path_buf());
        Ok(package)
    }

    /// Read an EPUB from any [`Read`] + [`Seek`] source.
    pub fn from_reader<R: Read + Seek>(reader: R) -> Result<Self> {
        let mut archive = ZipArchive::new(reader)?;

        let mut archive_order = Vec::with_capacity(archive.len());
        let mut files: HashMap<String, Vec<u8>> = HashMap::with_capacity(archive.len());
        for i in 0..archive.len() {
            let mut file = archive.by_index(i)?;
            if file.is_dir() {
                continue;
            }
            let name = file.name().to_string();
            let mut contents = Vec::new();
            file.read_to_end(&mut contents)?;
            archive_order.push(name.clone());
            files.insert(name, contents);
        }

        let container = files
            .get("META-INF/container.xml")
            .ok_or_else(|| Error::InvalidEpub("Missing META-INF/container.xml".into()))?;
        let opf_path = parser::parse_container_xml(container)?;
        let opf_bytes = files
            .get(&opf_path)
            .ok_or_else(|| Error::InvalidEpub(format!("Missing package document {opf_path}")))?;
        let opf_source = decode_document(opf_bytes).into_owned();
        let opf = parser::parse_opf(&opf_source)?;
        let opf_dir = parent_dir(&opf_path).to_string();

        let mut items = Vec::with_capacity(opf.manifest.len());
        for entry in opf.manifest {
            if is_external_href(&entry.href) {
                continue;
            }
            // Prefer the literal name, fall back to the percent-decoded one
            let raw = join_path(&opf_dir, &entry.href);
            let path = if files.contains_key(&raw) {
                raw
            } else {
                resolve_href(&opf_dir, &entry.href)
            };
            let Some(data) = files.remove(&path) else {
                warn!("Manifest item {} ({}) is missing from the archive", entry.id, path);
                continue;
            };
            items.push(Item::new(
                entry.id,
                entry.href,
                path,
                entry.media_type,
                entry.properties,
                data,
            ));
        }

        debug!(
            "Opened EPUB {} with {} items, {} spine entries",
            opf.version,
            items.len(),
            opf.spine.len()
        );

        Ok(Self {
            source: None,
            opf_path,
            opf_source,
            version: EpubVersion::parse(&opf.version),
            version_changed: false,
            metadata: opf.metadata,
            items,
            spine: opf.spine,
            toc_id: opf.toc_id,
            has_modified: opf.has_modified,
            archive_order,
            extra_files: files,
            removed_ids: Vec::new(),
            added_ids: Vec::new(),
        })
    }

    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        Self::from_reader(Cursor::new(data))
    }

    /// Path the package was opened from, if any.
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    pub fn version(&self) -> EpubVersion {
        self.version
    }

    pub fn set_version(&mut self, version: EpubVersion) {
        if version != self.version {
            self.version = version;
            self.version_changed = true;
        }
    }

    pub fn title(&self) -> &str {
        &self.metadata.title
    }

    pub fn language(&self) -> &str {
        &self.metadata.language
    }

    /// The package's unique identifier (`dc:identifier` named by the package element).
    pub fn identifier(&self) -> &str {
        &self.metadata.identifier
    }

    pub fn authors(&self) -> &[String] {
        &self.metadata.authors
    }

    /// Path of the OPF package document inside the archive.
    pub fn opf_path(&self) -> &str {
        &self.opf_path
    }

    /// Directory manifest hrefs are relative to.
    pub fn opf_dir(&self) -> &str {
        parent_dir(&self.opf_path)
    }

    /// Items in manifest order.
    pub fn items(&self) -> &[Item] {
        &self.items
    }

    pub fn items_of_kind(&self, kind: ItemKind) -> impl Iterator<Item = &Item> {
        self.items.iter().filter(move |item| item.kind == kind)
    }

    pub fn item(&self, id: &str) -> Option<&Item> {
        self.items.iter().find(|item| item.id == id)
    }

    pub fn item_mut(&mut self, id: &str) -> Option<&mut Item> {
        self.items.iter_mut().find(|item| item.id == id)
    }

    pub fn item_by_path(&self, path: &str) -> Option<&Item> {
        self.items.iter().find(|item| item.path == path)
    }

    pub fn spine(&self) -> &[SpineRef] {
        &self.spine
    }

    /// The EPUB 3 navigation document, if the manifest declares one.
    pub fn nav_document(&self) -> Option<&Item> {
        self.items.iter().find(|item| item.is_nav_document())
    }

    /// The NCX: the spine's `toc` item, or any item with the NCX media type.
    pub fn ncx(&self) -> Option<&Item> {
        self.toc_id
            .as_deref()
            .and_then(|id| self.item(id))
            .or_else(|| self.items.iter().find(|item| item.is_ncx()))
    }

    /// Ids of content documents in reading order: the spine first, then
    /// documents outside the spine in manifest order.
    pub fn documents_in_reading_order(&self) -> Vec<String> {
        let mut ids: Vec<String> = Vec::new();
        for itemref in &self.spine {
            if let Some(item) = self.item(&itemref.idref)
                && item.kind == ItemKind::Document
                && !ids.contains(&item.id)
            {
                ids.push(item.id.clone());
            }
        }
        for item in self.items_of_kind(ItemKind::Document) {
            if !ids.contains(&item.id) {
                ids.push(item.id.clone());
            }
        }
        ids
    }

    /// The book's existing table of contents, with hrefs resolved to package
    /// paths. Taken from the nav document's `toc` nav, else the NCX `navMap`.
    pub fn table_of_contents(&self) -> Vec<TocEntry> {
        if let Some(nav) = self.nav_document() {
            match parser::parse_nav_toc(&nav.text()) {
                Ok(toc) if !toc.is_empty() => return resolve_toc(toc, parent_dir(&nav.path)),
                Ok(_) => {}
                Err(e) => warn!("Unreadable navigation document {}: {}", nav.path, e),
            }
        }
        if let Some(ncx) = self.ncx() {
            match parser::parse_ncx(&ncx.text()) {
                Ok(toc) => return resolve_toc(toc, parent_dir(&ncx.path)),
                Err(e) => warn!("Unreadable NCX {}: {}", ncx.path, e),
            }
        }
        Vec::new()
    }

    /// Remove an item from the manifest. Spine references to it are dropped
    /// on write unless an item with the same id is added back.
    pub fn remove_item(&mut self, id: &str) -> Option<Item> {
        let index = self.items.iter().position(|item| item.id == id)?;
        let item = self.items.remove(index);
        self.added_ids.retain(|added| added != id);
        self.removed_ids.push(item.id.clone());
        Some(item)
    }

    /// Add an item to the manifest. Ids and paths must be unused.
    pub fn add_item(&mut self, item: Item) -> Result<()> {
        if self.item(&item.id).is_some() {
            return Err(Error::InvalidEpub(format!("Duplicate manifest id {}", item.id)));
        }
        if self.path_in_use(&item.path) {
            return Err(Error::InvalidEpub(format!("Duplicate package path {}", item.path)));
        }
        self.added_ids.push(item.id.clone());
        self.items.push(item);
        Ok(())
    }

    /// Manifest href for a package path.
    pub fn href_for(&self, path: &str) -> String {
        encode_href(&relative_path(self.opf_dir(), path))
    }

    /// An unused manifest id based on `base`.
    pub fn unique_id(&self, base: &str) -> String {
        let mut candidate = base.to_string();
        let mut n = 1;
        while self.item(&candidate).is_some() {
            candidate = format!("{base}-{n}");
            n += 1;
        }
        candidate
    }

    /// An unused package path for `stem.ext` beside the OPF.
    pub fn unique_path(&self, stem: &str, ext: &str) -> String {
        let dir = self.opf_dir();
        let join = |name: String| {
            if dir.is_empty() {
                name
            } else {
                format!("{dir}/{name}")
            }
        };
        let mut candidate = join(format!("{stem}.{ext}"));
        let mut n = 1;
        while self.path_in_use(&candidate) {
            candidate = join(format!("{stem}-{n}.{ext}"));
            n += 1;
        }
        candidate
    }

    fn path_in_use(&self, path: &str) -> bool {
        path == "mimetype"
            || self.extra_files.contains_key(path)
            || self.items.iter().any(|item| item.path == path)
    }

    /// Write the package back to the file it was opened from.
    pub fn save(&self) -> Result<()> {
        let path = self
            .source
            .as_deref()
            .ok_or_else(|| Error::InvalidOption("package has no backing file".into()))?;
        writer::save_atomically(self, path)
    }

    /// Write the package to a new file.
    pub fn write_to_path<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        writer::save_atomically(self, path.as_ref())
    }

    /// Write the package to any [`std::io::Write`] + [`Seek`] destination.
    pub fn write_to_writer<W: std::io::Write + Seek>(&self, writer: W) -> Result<()> {
        writer::write_package(self, writer)
    }
}

fn resolve_toc(entries: Vec<TocEntry>, base_dir: &str) -> Vec<TocEntry> {
    entries
        .into_iter()
        .map(|entry| {
            let href = if entry.href.is_empty() || is_external_href(&entry.href) {
                entry.href
            } else {
                match entry.href.split_once('#') {
                    Some(("", _)) => String::new(),
                    Some((path, fragment)) => {
                        format!("{}#{}", resolve_href(base_dir, path), fragment)
                    }
                    None => resolve_href(base_dir, &entry.href),
                }
            };
            TocEntry {
                title: entry.title,
                href,
                children: resolve_toc(entry.children, base_dir),
            }
        })
        .collect()
}
