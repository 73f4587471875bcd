//! # bookdrop
//!
//! Find ebooks, give them Kindle page numbers and send them to a Kindle.
//!
//! ## Features
//!
//! - Detect existing page navigation in EPUB 2 and EPUB 3 books
//! - Synthesize approximate page breaks and a page-list navigation document
//! - Convert EPUB to AZW3 through Calibre's `ebook-convert`
//! - Search and download books from the archive API
//! - Deliver books to a Kindle address over SMTP
//!
//! ## Quick Start
//!
//! ```no_run
//! use bookdrop::{EpubPackage, PaginationOptions, pages};
//!
//! let mut package = EpubPackage::open("book.epub")?;
//! if !pages::has_page_list(&package) {
//!     let added = pages::synthesize_pages(&mut package, &PaginationOptions::default())?;
//!     if added > 0 {
//!         package.save()?;
//!     }
//! }
//! # Ok::<(), bookdrop::Error>(())
//! ```

pub mod archive;
pub mod config;
pub mod convert;
pub mod epub;
pub mod error;
pub mod mail;
pub mod pages;
pub(crate) mod util;
pub mod workflow;

pub use archive::{ApiSettings, ArchiveClient, BookArchive, BookFormat, BookSummary, SearchQuery};
pub use config::ConfigStore;
pub use convert::{Conversion, Converter};
pub use epub::{EpubPackage, EpubVersion, Item, ItemKind};
pub use error::{Error, ErrorKind, Result};
pub use mail::{Mailer, SmtpMailer, SmtpSettings};
pub use pages::{PaginationOptions, add_pages, has_page_list, page_count};
