//! Page-list detection and page synthesis for EPUB packages.
//!
//! ```no_run
//! use bookdrop::pages::{self, PaginationOptions};
//!
//! if !pages::has_page_list_at("book.epub") {
//!     let added = pages::add_pages("book.epub", &PaginationOptions::default())?;
//!     println!("Added {added} pages");
//! }
//! # Ok::<(), bookdrop::Error>(())
//! ```

mod detect;
mod synth;

use std::path::Path;

pub use detect::{
    PageSource, find_page_source, has_page_list, has_page_list_at, page_count, page_count_at,
};
pub use synth::{
    DEFAULT_WORDS_PER_PAGE, PageCounter, PaginationOptions, install_navigation, synthesize_pages,
};

use crate::epub::EpubPackage;
use crate::error::Result;

/// Add synthetic page numbers to the EPUB at `path`, in place.
///
/// The file is written back once, and only when at least one page was
/// created. Failing to open the package is an error; nothing is written.
pub fn add_pages<P: AsRef<Path>>(path: P, options: &PaginationOptions) -> Result<usize> {
    options.validate()?;
    let mut package = EpubPackage::open(path.as_ref())?;
    let pages = synthesize_pages(&mut package, options)?;
    if pages > 0 {
        package.save()?;
    }
    Ok(pages)
}
