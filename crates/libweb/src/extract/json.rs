//! JSON-path extraction

use super::Extractor;
use crate::error::{Result, WebError};
use crate::record::{Coalescer, Record};
use crate::request::Response;
use indexmap::IndexMap;
use serde_json::Value;
use serde_json_path::JsonPath;
use tracing::debug;

/// Extracts records from JSON documents
#[derive(Debug, Clone)]
pub struct JsonExtractor {
    paths: Vec<(String, JsonPath)>,
    multi_json: bool,
}

impl JsonExtractor {
    /// Compile `(output key, path expression)` pairs
    ///
    /// With no paths, every document is yielded as its own record.
    pub fn new<I, K, P>(paths: I, multi_json: bool) -> Result<Self>
    where
        I: IntoIterator<Item = (K, P)>,
        K: Into<String>,
        P: AsRef<str>,
    {
        let paths = paths
            .into_iter()
            .map(|(key, expr)| {
                let expr = expr.as_ref();
                let path = JsonPath::parse(expr).map_err(|e| {
                    WebError::Configuration(format!("invalid JSON path '{}': {}", expr, e))
                })?;
                Ok((key.into(), path))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { paths, multi_json })
    }

    /// Extractor yielding documents as-is
    pub fn documents_only(multi_json: bool) -> Self {
        Self {
            paths: Vec::new(),
            multi_json,
        }
    }

    fn parse_documents(&self, body: &[u8]) -> Result<Vec<Value>> {
        if !self.multi_json {
            return Ok(vec![serde_json::from_slice(body)?]);
        }
        String::from_utf8_lossy(body)
            .split('\n')
            .filter(|line| !line.trim().is_empty())
            .map(|line| Ok(serde_json::from_str(line)?))
            .collect()
    }

    fn record_for(&self, document: Value) -> Record {
        if self.paths.is_empty() {
            return match document {
                Value::Object(map) => map.into_iter().collect(),
                other => Record::single("value", other),
            };
        }

        let mut coalescer = Coalescer::new();
        for (key, path) in &self.paths {
            for value in path.query(&document).all() {
                coalescer.push(key, value.clone());
            }
        }
        coalescer.finish()
    }
}

impl Extractor for JsonExtractor {
    fn extract(&self, response: &Response) -> Result<Vec<Record>> {
        let documents = self.parse_documents(&response.body)?;
        debug!(documents = documents.len(), paths = self.paths.len(), "extracting JSON");
        Ok(documents
            .into_iter()
            .map(|document| self.record_for(document))
            .collect())
    }
}

/// Merge a list of path mappings into one ordered mapping
///
/// A key repeated in a later mapping keeps its first position and takes
/// the later expression.
pub fn merge_path_mappings(mappings: Vec<IndexMap<String, String>>) -> IndexMap<String, String> {
    let mut merged = IndexMap::new();
    for mapping in mappings {
        merged.extend(mapping);
    }
    merged
}
