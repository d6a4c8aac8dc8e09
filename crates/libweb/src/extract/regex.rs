//! Regular-expression extraction over response text

use super::Extractor;
use crate::error::{Result, WebError};
use crate::record::Record;
use crate::request::Response;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// How matches of several patterns are combined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegexPolicy {
    /// One record per match, pattern by pattern
    #[default]
    PerMatch,
    /// The n-th matches of all patterns merged into the n-th record
    Zip,
}

/// Extracts named capture groups from the HTML-unescaped body
#[derive(Debug, Clone)]
pub struct RegexExtractor {
    patterns: Vec<Regex>,
    policy: RegexPolicy,
}

impl RegexExtractor {
    pub fn new<I, P>(patterns: I, policy: RegexPolicy) -> Result<Self>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .map(|pattern| {
                let pattern = pattern.as_ref();
                Regex::new(pattern).map_err(|e| {
                    WebError::Configuration(format!("invalid regex '{}': {}", pattern, e))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { patterns, policy })
    }

    pub fn policy(&self) -> RegexPolicy {
        self.policy
    }

    /// Records of every match of one pattern, in match order
    ///
    /// Groups that did not take part in a match are left out.
    fn matches(pattern: &Regex, text: &str) -> Vec<Record> {
        let names: Vec<&str> = pattern.capture_names().flatten().collect();
        pattern
            .captures_iter(text)
            .map(|captures| {
                names
                    .iter()
                    .filter_map(|name| {
                        captures
                            .name(name)
                            .map(|m| (name.to_string(), Value::from(m.as_str())))
                    })
                    .collect::<Record>()
            })
            .collect()
    }

    /// Apply all patterns to already-unescaped text
    pub fn extract_text(&self, text: &str) -> Vec<Record> {
        let per_pattern: Vec<Vec<Record>> = self
            .patterns
            .iter()
            .map(|pattern| Self::matches(pattern, text))
            .collect();

        let records: Vec<Record> = match self.policy {
            RegexPolicy::PerMatch => per_pattern.into_iter().flatten().collect(),
            RegexPolicy::Zip => {
                let rows = per_pattern.iter().map(Vec::len).max().unwrap_or(0);
                let mut columns: Vec<_> = per_pattern.into_iter().map(Vec::into_iter).collect();
                (0..rows)
                    .map(|_| {
                        let mut merged = Record::new();
                        for column in columns.iter_mut() {
                            if let Some(record) = column.next() {
                                for (key, value) in record.into_inner() {
                                    merged.insert(key, value);
                                }
                            }
                        }
                        merged
                    })
                    .collect()
            }
        };

        records.into_iter().filter(|r| !r.is_empty()).collect()
    }
}

impl Extractor for RegexExtractor {
    fn extract(&self, response: &Response) -> Result<Vec<Record>> {
        let body = response.text();
        let text = html_escape::decode_html_entities(&body);
        let records = self.extract_text(&text);
        debug!(policy = ?self.policy, records = records.len(), "extracted regex matches");
        Ok(records)
    }
}
