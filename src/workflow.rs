//! Download, paginate, convert and deliver: the steps behind the CLI commands.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use tempfile::NamedTempFile;

use crate::archive::{BookArchive, BookFormat, BookSummary};
use crate::convert::{Conversion, Converter};
use crate::epub::EpubPackage;
use crate::error::{Error, Result};
use crate::mail::Mailer;
use crate::pages::{self, PaginationOptions};

/// What to do to a book before it is sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrepareOptions {
    /// Synthesize page numbers for EPUBs that have none.
    pub add_pages: bool,
    /// Convert EPUBs to AZW3 when a converter is installed.
    pub convert_to_azw3: bool,
    pub pagination: PaginationOptions,
}

impl Default for PrepareOptions {
    fn default() -> Self {
        Self {
            add_pages: true,
            convert_to_azw3: false,
            pagination: PaginationOptions::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageStatus {
    /// The book already had this many pages.
    Existing(usize),
    /// This many pages were synthesized.
    Added(usize),
    /// Too little text for a single page.
    TooShort,
    /// No pages, and synthesis was not requested.
    Missing,
    /// Not an EPUB; left untouched.
    NotEpub,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversionStatus {
    NotRequested,
    Converted(PathBuf),
    /// No converter installed; the EPUB is sent instead.
    Unavailable,
    /// The converter failed; the EPUB is sent instead.
    Failed(String),
}

/// A book ready to be sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedBook {
    /// The downloaded (and possibly paginated) file.
    pub source: PathBuf,
    /// The file to send: the converted file, or `source`.
    pub path: PathBuf,
    pub pages: PageStatus,
    pub conversion: ConversionStatus,
}

/// Paginate and optionally convert the book at `path`.
///
/// PDFs pass through untouched. An EPUB that cannot be opened is an error;
/// conversion problems fall back to sending the EPUB.
pub fn prepare_for_kindle(
    path: &Path,
    options: &PrepareOptions,
    converter: Option<&Converter>,
) -> Result<PreparedBook> {
    let is_epub = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("epub"));
    if !is_epub {
        return Ok(PreparedBook {
            source: path.to_path_buf(),
            path: path.to_path_buf(),
            pages: PageStatus::NotEpub,
            conversion: ConversionStatus::NotRequested,
        });
    }

    let mut package = EpubPackage::open(path)?;
    let pages = match pages::find_page_source(&package) {
        Some((source, count)) => {
            debug!("{} has {} pages from {:?}", path.display(), count, source);
            PageStatus::Existing(count)
        }
        None if options.add_pages => {
            match pages::synthesize_pages(&mut package, &options.pagination)? {
                0 => PageStatus::TooShort,
                count => {
                    package.save()?;
                    PageStatus::Added(count)
                }
            }
        }
        None => PageStatus::Missing,
    };
    drop(package);

    let conversion = if !options.convert_to_azw3 {
        ConversionStatus::NotRequested
    } else {
        match converter.map(|c| c.convert(path)) {
            None | Some(Ok(Conversion::Unavailable)) => ConversionStatus::Unavailable,
            Some(Ok(Conversion::Converted(output))) => ConversionStatus::Converted(output),
            Some(Err(e)) => {
                warn!("Conversion of {} failed: {}", path.display(), e);
                ConversionStatus::Failed(e.to_string())
            }
        }
    };

    let send_path = match &conversion {
        ConversionStatus::Converted(output) => output.clone(),
        _ => path.to_path_buf(),
    };

    Ok(PreparedBook {
        source: path.to_path_buf(),
        path: send_path,
        pages,
        conversion,
    })
}

/// Download `book` into `dest_dir`, returning the saved file's path.
///
/// The file only appears under its final name once the download completed.
pub fn download_book(
    archive: &dyn BookArchive,
    book: &BookSummary,
    format: BookFormat,
    dest_dir: &Path,
) -> Result<PathBuf> {
    let mut tmp = candidate_file(dest_dir, format)?;
    let bytes = archive.download(book, tmp.as_file_mut())?;
    tmp.as_file_mut().flush()?;

    let dest = unique_destination(dest_dir, &book.file_name(format));
    tmp.persist(&dest).map_err(|e| Error::Io(e.error))?;
    info!("Downloaded {} ({} bytes) to {}", book.title, bytes, dest.display());
    Ok(dest)
}

/// Download EPUB candidates in order and keep the first that already has
/// page numbers. Rejected downloads are deleted as soon as they are rejected.
///
/// A rate limit aborts the scan; other download failures skip the candidate.
pub fn find_paginated(
    archive: &dyn BookArchive,
    candidates: &[BookSummary],
    dest_dir: &Path,
) -> Result<Option<(BookSummary, PathBuf)>> {
    for book in candidates {
        let mut tmp = candidate_file(dest_dir, BookFormat::Epub)?;
        match archive.download(book, tmp.as_file_mut()) {
            Ok(_) => {}
            Err(Error::RateLimited) => return Err(Error::RateLimited),
            Err(e) => {
                warn!("Skipping {}: {}", book.title, e);
                tmp.close()?;
                continue;
            }
        }
        tmp.as_file_mut().flush()?;

        if pages::has_page_list_at(tmp.path()) {
            let dest = unique_destination(dest_dir, &book.file_name(BookFormat::Epub));
            tmp.persist(&dest).map_err(|e| Error::Io(e.error))?;
            info!("{} has page numbers", book.title);
            return Ok(Some((book.clone(), dest)));
        }

        debug!("{} has no page numbers", book.title);
        tmp.close()?;
    }
    Ok(None)
}

/// Mail `path` to `recipient`. The file is deleted only after a successful
/// send when `remove_after` is set; on failure it is always kept.
pub fn deliver(mailer: &dyn Mailer, recipient: &str, path: &Path, remove_after: bool) -> Result<()> {
    if !path.is_file() {
        return Err(Error::NotFound(format!("{} does not exist", path.display())));
    }
    let data = fs::read(path)?;
    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "book".to_string());

    mailer.send(recipient, &data, &filename)?;

    if remove_after {
        fs::remove_file(path)?;
        debug!("Removed {}", path.display());
    }
    Ok(())
}

/// [`deliver`] for a prepared book; with `remove_after` the EPUB a
/// conversion started from is removed as well.
pub fn deliver_prepared(
    mailer: &dyn Mailer,
    recipient: &str,
    book: &PreparedBook,
    remove_after: bool,
) -> Result<()> {
    deliver(mailer, recipient, &book.path, remove_after)?;
    if remove_after && book.source != book.path && book.source.exists() {
        fs::remove_file(&book.source)?;
    }
    Ok(())
}

fn candidate_file(dir: &Path, format: BookFormat) -> Result<NamedTempFile> {
    Ok(tempfile::Builder::new()
        .prefix(".bookdrop-")
        .suffix(&format!(".{}", format.extension()))
        .tempfile_in(dir)?)
}

/// `dir/name`, or `dir/stem (N).ext` when that is taken.
fn unique_destination(dir: &Path, name: &str) -> PathBuf {
    let candidate = dir.join(name);
    if !candidate.exists() {
        return candidate;
    }
    let (stem, ext) = match name.rsplit_once('.') {
        Some((stem, ext)) => (stem, format!(".{ext}")),
        None => (name, String::new()),
    };
    (1..)
        .map(|n| dir.join(format!("{stem} ({n}){ext}")))
        .find(|path| !path.exists())
        .unwrap_or(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_destination() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(unique_destination(dir.path(), "a.epub"), dir.path().join("a.epub"));

        fs::write(dir.path().join("a.epub"), b"").unwrap();
        fs::write(dir.path().join("a (1).epub"), b"").unwrap();
        assert_eq!(
            unique_destination(dir.path(), "a.epub"),
            dir.path().join("a (2).epub")
        );
    }

    #[test]
    fn test_pdf_passes_through() {
        let dir = tempfile::tempdir().unwrap();
        let pdf = dir.path().join("book.pdf");
        fs::write(&pdf, b"%PDF-1.4").unwrap();

        let prepared = prepare_for_kindle(&pdf, &PrepareOptions::default(), None).unwrap();
        assert_eq!(prepared.pages, PageStatus::NotEpub);
        assert_eq!(prepared.path, pdf);
        assert_eq!(fs::read(&pdf).unwrap(), b"%PDF-1.4");
    }

    #[test]
    fn test_unreadable_epub_is_a_format_error() {
        let dir = tempfile::tempdir().unwrap();
        let epub = dir.path().join("broken.epub");
        fs::write(&epub, b"not a zip").unwrap();

        let err = prepare_for_kindle(&epub, &PrepareOptions::default(), None).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Format);
    }
}
