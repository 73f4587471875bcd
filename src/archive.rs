//! Client for the book archive search/download API.

use std::fmt;
use std::io::Write;
use std::str::FromStr;
use std::time::Duration;

use log::debug;
use reqwest::StatusCode;
use reqwest::blocking::{Client, Response};
use serde::{Deserialize, Deserializer};

use crate::error::{Error, Result};

pub const DEFAULT_API_HOST: &str = "annas-archive-api.p.rapidapi.com";
pub const DEFAULT_API_URL: &str = "https://annas-archive-api.p.rapidapi.com";

/// Per-request timeout, downloads included.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Archive sources searched.
const SOURCES: &str = "libgenLi, libgenRs";

/// File format to search for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BookFormat {
    #[default]
    Epub,
    Pdf,
}

impl BookFormat {
    pub fn extension(self) -> &'static str {
        match self {
            BookFormat::Epub => "epub",
            BookFormat::Pdf => "pdf",
        }
    }
}

impl fmt::Display for BookFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for BookFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "epub" => Ok(BookFormat::Epub),
            "pdf" => Ok(BookFormat::Pdf),
            other => Err(format!("unsupported format: {other} (expected epub or pdf)")),
        }
    }
}

/// One search hit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct BookSummary {
    #[serde(default, deserialize_with = "lenient_string")]
    pub title: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub author: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub size: String,
    /// Content hash used to request the download link.
    #[serde(default, deserialize_with = "lenient_string")]
    pub md5: String,
}

impl BookSummary {
    /// A file name for this book that is safe on common file systems.
    pub fn file_name(&self, format: BookFormat) -> String {
        let stem: String = self
            .title
            .trim()
            .chars()
            .map(|c| match c {
                '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
                c if c.is_control() => '_',
                c => c,
            })
            .collect();
        let stem = stem.trim_matches(|c: char| c == '.' || c.is_whitespace());
        let stem = if stem.is_empty() { self.md5.as_str() } else { stem };
        let stem = if stem.is_empty() { "book" } else { stem };
        format!("{}.{}", stem, format.extension())
    }
}

impl fmt::Display for BookSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} by {}; size: {}", self.title, self.author, self.size)
    }
}

/// Accept strings, numbers and nulls where the API promises a string.
fn lenient_string<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<String, D::Error> {
    Ok(match Option::<serde_json::Value>::deserialize(deserializer)? {
        None | Some(serde_json::Value::Null) => String::new(),
        Some(serde_json::Value::String(s)) => s,
        Some(other) => other.to_string(),
    })
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    books: Vec<BookSummary>,
}

/// A search request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub text: String,
    pub format: BookFormat,
}

impl SearchQuery {
    pub fn new(text: impl Into<String>, format: BookFormat) -> Self {
        Self {
            text: text.into(),
            format,
        }
    }
}

/// Remote search and download of book files.
pub trait BookArchive {
    /// Results in relevance order.
    fn search(&self, query: &SearchQuery) -> Result<Vec<BookSummary>>;

    /// Stream the book's file into `out`, returning the number of bytes written.
    fn download(&self, book: &BookSummary, out: &mut dyn Write) -> Result<u64>;
}

/// Credentials and endpoint of the archive API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiSettings {
    pub api_key: String,
    pub api_host: String,
    pub base_url: String,
}

impl ApiSettings {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_host: DEFAULT_API_HOST.to_string(),
            base_url: DEFAULT_API_URL.to_string(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }
}

/// [`BookArchive`] over the RapidAPI-hosted archive API.
#[derive(Debug, Clone)]
pub struct ArchiveClient {
    http: Client,
    settings: ApiSettings,
}

impl ArchiveClient {
    pub fn new(settings: ApiSettings) -> Result<Self> {
        if settings.api_key.is_empty() {
            return Err(Error::Config("archive API key is not set".into()));
        }
        let http = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self { http, settings })
    }

    /// Resolve a content hash to a direct file URL.
    pub fn download_link(&self, md5: &str) -> Result<String> {
        let response = self
            .http
            .get(self.settings.endpoint("download"))
            .header("X-RapidAPI-Key", &self.settings.api_key)
            .header("X-RapidAPI-Host", &self.settings.api_host)
            .query(&[("md5", md5)])
            .send()?;
        let links: Vec<String> = check_status(response)?.json()?;
        links
            .into_iter()
            .find(|link| !link.is_empty())
            .ok_or_else(|| Error::NotFound(format!("no download link for {md5}")))
    }
}

impl BookArchive for ArchiveClient {
    fn search(&self, query: &SearchQuery) -> Result<Vec<BookSummary>> {
        debug!("Searching for {:?} ({})", query.text, query.format);
        let response = self
            .http
            .get(self.settings.endpoint("search"))
            .header("X-RapidAPI-Key", &self.settings.api_key)
            .header("X-RapidAPI-Host", &self.settings.api_host)
            .query(&[
                ("q", query.text.trim()),
                ("ext", query.format.extension()),
                ("sort", "mostRelevant"),
                ("source", SOURCES),
            ])
            .send()?;
        let results: SearchResponse = check_status(response)?.json()?;
        debug!("{} results", results.books.len());
        Ok(results.books)
    }

    fn download(&self, book: &BookSummary, out: &mut dyn Write) -> Result<u64> {
        if book.md5.is_empty() {
            return Err(Error::NotFound(format!("{} has no content hash", book.title)));
        }
        let link = self.download_link(&book.md5)?;
        debug!("Downloading {}", link);
        let mut response = check_status(self.http.get(&link).send()?)?;
        Ok(response.copy_to(out)?)
    }
}

fn check_status(response: Response) -> Result<Response> {
    match status_error(response.status()) {
        Some(err) => Err(err),
        None => Ok(response),
    }
}

fn status_error(status: StatusCode) -> Option<Error> {
    if status == StatusCode::TOO_MANY_REQUESTS {
        Some(Error::RateLimited)
    } else if status == StatusCode::NOT_FOUND {
        Some(Error::NotFound("archive returned 404".into()))
    } else if !status.is_success() {
        Some(Error::Api(status.to_string()))
    } else {
        None
    }
}
