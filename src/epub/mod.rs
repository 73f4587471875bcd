//! EPUB package model, parsing and serialisation.

mod nav;
mod package;
mod parser;
mod writer;

pub use nav::{NavigationDocument, PageTarget, TocEntry};
pub use package::{
    EpubPackage, EpubVersion, Item, ItemKind, NCX_MEDIA_TYPE, XHTML_MEDIA_TYPE,
};
pub use parser::{Metadata, SpineRef};
