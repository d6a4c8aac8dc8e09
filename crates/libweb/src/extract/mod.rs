//! Extraction engines
//!
//! Each engine turns one decoded [`Response`] into zero or more
//! [`Record`]s. Patterns are compiled when the engine is built, so a bad
//! expression is a configuration error raised before any request is made.
//!
//! | Engine | Input | Multiple matches |
//! |---|---|---|
//! | [`JsonExtractor`] | JSON or newline-delimited JSON | coalesced into a list |
//! | [`XpathExtractor`] | strict XML or permissive HTML | one record per node |
//! | [`RegexExtractor`] | HTML-unescaped text | per match, or zipped across patterns |
//!
//! DNS answers are not HTTP bodies; [`dns::dns_records`] maps them directly.

pub mod dns;
pub mod json;
pub mod regex;
pub mod xpath;

use crate::error::Result;
use crate::record::Record;
use crate::request::Response;

pub use self::json::JsonExtractor;
pub use self::regex::{RegexExtractor, RegexPolicy};
pub use self::xpath::{DocumentMode, XpathExtractor};
pub use dns::dns_records;

/// Turns a decoded response into records
pub trait Extractor: Send + Sync {
    fn extract(&self, response: &Response) -> Result<Vec<Record>>;
}

/// The extraction strategy of one configuration
#[derive(Debug, Clone)]
pub enum Extraction {
    Json(JsonExtractor),
    Xpath(XpathExtractor),
    Regex(RegexExtractor),
}

impl Extraction {
    pub fn name(&self) -> &'static str {
        match self {
            Extraction::Json(_) => "json",
            Extraction::Xpath(x) => match x.mode() {
                DocumentMode::Xml => "xpath",
                DocumentMode::Html => "html_xpath",
            },
            Extraction::Regex(_) => "regex",
        }
    }
}

impl Extractor for Extraction {
    fn extract(&self, response: &Response) -> Result<Vec<Record>> {
        match self {
            Extraction::Json(engine) => engine.extract(response),
            Extraction::Xpath(engine) => engine.extract(response),
            Extraction::Regex(engine) => engine.extract(response),
        }
    }
}
