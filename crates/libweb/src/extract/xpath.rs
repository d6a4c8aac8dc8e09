//! XPath extraction over XML and HTML
//!
//! Both document modes are loaded into the same `sxd-document` tree.
//! Strict XML goes through `quick-xml` and rejects malformed input; HTML is
//! parsed permissively by `scraper` (html5ever) and copied over node by
//! node. The declared XML encoding is honoured, so Latin-1 and other
//! single-byte documents load as well as UTF-8.
//!
//! Namespaces are dropped in both modes: elements and attributes are stored
//! under their local names and `xmlns` declarations are skipped, so sources
//! with undeclared or non-standard prefixes still load. Unprefixed
//! expressions therefore match regardless of namespace: `//slide` selects
//! `<slide>` inside a default-namespaced document too, and prefixed
//! expressions such as `//ns:slide` are not supported.

use super::Extractor;
use crate::error::{Result, WebError};
use crate::record::Record;
use crate::request::Response;
use quick_xml::encoding::Decoder;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use scraper::{ElementRef, Html};
use sxd_document::dom::{ChildOfElement, ChildOfRoot, Document, Element};
use sxd_document::Package;
use sxd_xpath::nodeset::Node;
use sxd_xpath::{evaluate_xpath, Value};
use tracing::debug;

/// How response bodies are parsed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DocumentMode {
    /// Well-formed XML; anything else is a parse error
    #[default]
    Xml,
    /// HTML5 with error recovery
    Html,
}

/// Extracts one record per matching node
#[derive(Debug, Clone)]
pub struct XpathExtractor {
    expressions: Vec<(String, String)>,
    mode: DocumentMode,
}

impl XpathExtractor {
    /// Validate `(output key, xpath)` pairs for the given document mode
    ///
    /// Absolute expressions are rewritten relative to the context node
    /// (`/a` becomes `./a`). The context node is the document root, so the
    /// rewrite selects the same nodes.
    pub fn new<I, K, P>(expressions: I, mode: DocumentMode) -> Result<Self>
    where
        I: IntoIterator<Item = (K, P)>,
        K: Into<String>,
        P: AsRef<str>,
    {
        let empty = Package::new();
        let probe = empty.as_document();

        let expressions = expressions
            .into_iter()
            .map(|(key, expr)| {
                let expr = relative_to_context(expr.as_ref());
                evaluate_xpath(&probe, &expr).map_err(|e| {
                    WebError::Configuration(format!("invalid XPath '{}': {}", expr, e))
                })?;
                Ok((key.into(), expr))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { expressions, mode })
    }

    pub fn mode(&self) -> DocumentMode {
        self.mode
    }

    fn evaluate(&self, document: &Document<'_>) -> Result<Vec<Record>> {
        let mut records = Vec::new();
        for (key, expr) in &self.expressions {
            let value = evaluate_xpath(document, expr)
                .map_err(|e| WebError::parse("XPath", format!("'{}': {}", expr, e)))?;
            match value {
                Value::Nodeset(nodes) => {
                    for node in nodes.document_order() {
                        records.push(Record::single(key.as_str(), node_value(node)));
                    }
                }
                Value::Boolean(b) => records.push(Record::single(key.as_str(), b.to_string())),
                Value::Number(n) => records.push(Record::single(key.as_str(), format_number(n))),
                Value::String(s) => records.push(Record::single(key.as_str(), s.trim())),
            }
        }
        Ok(records)
    }
}

impl Extractor for XpathExtractor {
    fn extract(&self, response: &Response) -> Result<Vec<Record>> {
        let package = match self.mode {
            DocumentMode::Xml => parse_xml(&response.body)?,
            DocumentMode::Html => parse_html(&response.text()),
        };
        let records = self.evaluate(&package.as_document())?;
        debug!(mode = ?self.mode, records = records.len(), "extracted XPath matches");
        Ok(records)
    }
}

/// Rewrite an absolute expression to start at the context node
pub fn relative_to_context(expr: &str) -> String {
    let expr = expr.trim();
    if expr.starts_with('/') {
        format!(".{}", expr)
    } else {
        expr.to_string()
    }
}

fn format_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

fn node_value(node: Node<'_>) -> String {
    match node {
        Node::Attribute(attr) => attr.value().trim().to_string(),
        Node::Text(text) => text.text().trim().to_string(),
        Node::Element(element) => {
            let mut parts = Vec::new();
            collect_text(element, &mut parts);
            parts.join(" ").trim().to_string()
        }
        Node::Root(root) => {
            let mut parts = Vec::new();
            for child in root.children() {
                if let ChildOfRoot::Element(element) = child {
                    collect_text(element, &mut parts);
                }
            }
            parts.join(" ").trim().to_string()
        }
        other => other.string_value().trim().to_string(),
    }
}

/// Descendant text in document order
fn collect_text<'d>(element: Element<'d>, parts: &mut Vec<&'d str>) {
    let mut stack: Vec<ChildOfElement<'d>> = element.children().into_iter().rev().collect();
    while let Some(child) = stack.pop() {
        match child {
            ChildOfElement::Text(text) => parts.push(text.text()),
            ChildOfElement::Element(inner) => {
                stack.extend(inner.children().into_iter().rev());
            }
            _ => {}
        }
    }
}

fn is_namespace_declaration(name: &[u8]) -> bool {
    name == b"xmlns" || name.starts_with(b"xmlns:")
}

fn xml_error(err: impl std::fmt::Display) -> WebError {
    WebError::parse("XML", err)
}

/// Parse well-formed XML into a namespace-free tree
pub fn parse_xml(content: &[u8]) -> Result<Package> {
    let package = Package::new();
    {
        let document = package.as_document();
        let mut reader = Reader::from_reader(content);
        let mut buf = Vec::new();
        let mut stack: Vec<Element<'_>> = Vec::new();
        let mut has_root = false;

        loop {
            let event = reader.read_event_into(&mut buf).map_err(xml_error)?;
            let decoder = reader.decoder();
            match event {
                Event::Start(start) => {
                    let element = start_element(&document, &start, decoder)?;
                    attach(&document, &stack, element, &mut has_root)?;
                    stack.push(element);
                }
                Event::Empty(start) => {
                    let element = start_element(&document, &start, decoder)?;
                    attach(&document, &stack, element, &mut has_root)?;
                }
                Event::End(_) => {
                    stack
                        .pop()
                        .ok_or_else(|| xml_error("unexpected closing tag"))?;
                }
                Event::Text(text) => {
                    let text = text.unescape().map_err(xml_error)?;
                    match stack.last() {
                        Some(parent) => parent.append_child(document.create_text(&text)),
                        None if text.trim().is_empty() => {}
                        None => return Err(xml_error("text outside the root element")),
                    }
                }
                Event::CData(cdata) => {
                    if let Some(parent) = stack.last() {
                        let text = cdata.decode().map_err(xml_error)?;
                        parent.append_child(document.create_text(&text));
                    }
                }
                Event::Eof => break,
                _ => {}
            }
            buf.clear();
        }

        if !stack.is_empty() {
            return Err(xml_error("unexpected end of document"));
        }
        if !has_root {
            return Err(xml_error("no root element"));
        }
    }
    Ok(package)
}

fn start_element<'d>(
    document: &Document<'d>,
    start: &BytesStart<'_>,
    decoder: Decoder,
) -> Result<Element<'d>> {
    let local = start.local_name();
    let name = decoder.decode(local.as_ref()).map_err(xml_error)?;
    let element = document.create_element(&*name);

    for attr in start.attributes() {
        let attr = attr.map_err(xml_error)?;
        if is_namespace_declaration(attr.key.as_ref()) {
            continue;
        }
        let key_local = attr.key.local_name();
        let key = decoder.decode(key_local.as_ref()).map_err(xml_error)?;
        let value = attr
            .decode_and_unescape_value(decoder)
            .map_err(xml_error)?;
        element.set_attribute_value(&*key, &value);
    }
    Ok(element)
}

fn attach<'d>(
    document: &Document<'d>,
    stack: &[Element<'d>],
    element: Element<'d>,
    has_root: &mut bool,
) -> Result<()> {
    match stack.last() {
        Some(parent) => parent.append_child(element),
        None if *has_root => return Err(xml_error("multiple root elements")),
        None => {
            document.root().append_child(element);
            *has_root = true;
        }
    }
    Ok(())
}

/// Parse HTML permissively into a namespace-free tree
pub fn parse_html(content: &str) -> Package {
    let html = Html::parse_document(content);
    let package = Package::new();
    {
        let document = package.as_document();
        let root = html.root_element();
        let top = copy_element(&document, root);
        document.root().append_child(top);

        let mut pending = vec![(root, top)];
        while let Some((source, target)) = pending.pop() {
            for child in source.children() {
                if let Some(element) = ElementRef::wrap(child) {
                    let copy = copy_element(&document, element);
                    target.append_child(copy);
                    pending.push((element, copy));
                } else if let Some(text) = child.value().as_text() {
                    target.append_child(document.create_text(&**text));
                }
            }
        }
    }
    package
}

fn copy_element<'d>(document: &Document<'d>, source: ElementRef<'_>) -> Element<'d> {
    let value = source.value();
    let element = document.create_element(value.name());
    for (name, attr) in value.attrs() {
        if !is_namespace_declaration(name.as_bytes()) {
            element.set_attribute_value(name, attr);
        }
    }
    element
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;
    use serde_json::json;

    const SLIDESHOW: &str = r#"<?xml version='1.0' encoding='us-ascii'?>
<!--  A SAMPLE set of slides  -->
<slideshow title="Sample Slide Show" date="Date of publication" author="Yours Truly">
    <slide type="all">
      <title>Wake up to WonderWidgets!</title>
    </slide>
    <slide type="all">
        <title>Overview</title>
        <item>Why <em>WonderWidgets</em> are great</item>
        <item/>
        <item>Who <em>buys</em> WonderWidgets</item>
    </slide>
</slideshow>"#;

    fn response(body: &str) -> Response {
        Response {
            url: "https://example.com".into(),
            status: 200,
            headers: IndexMap::new(),
            content: body.as_bytes().to_vec(),
            body: body.as_bytes().to_vec(),
            ignored: false,
        }
    }

    fn extract(expr: &str, mode: DocumentMode, body: &str) -> Vec<Record> {
        XpathExtractor::new([("k", expr)], mode)
            .unwrap()
            .extract(&response(body))
            .unwrap()
    }

    #[test]
    fn test_element_text() {
        let records = extract(r#"//slide[@type="all"][1]"#, DocumentMode::Xml, SLIDESHOW);
        assert_eq!(records[0].get("k"), Some(&json!("Wake up to WonderWidgets!")));
    }

    #[test]
    fn test_text_node_and_attribute() {
        let text = extract(
            r#"//slide[@type="all"][1]/title/text()"#,
            DocumentMode::Xml,
            SLIDESHOW,
        );
        assert_eq!(text[0].get("k"), Some(&json!("Wake up to WonderWidgets!")));

        let attr = extract(r#"//slide[@type="all"][1]/@type"#, DocumentMode::Xml, SLIDESHOW);
        assert_eq!(attr[0].get("k"), Some(&json!("all")));
    }

    #[test]
    fn test_one_record_per_match() {
        let records = extract("//slide/title", DocumentMode::Xml, SLIDESHOW);
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].get("k"), Some(&json!("Overview")));
    }

    #[test]
    fn test_nested_text_joined_with_spaces() {
        let records = extract("//item[1]", DocumentMode::Xml, SLIDESHOW);
        assert_eq!(records[0].get("k"), Some(&json!("Why  WonderWidgets  are great")));
    }

    #[test]
    fn test_absolute_rewrite_matches_relative() {
        assert_eq!(relative_to_context("/slideshow/slide"), "./slideshow/slide");
        assert_eq!(relative_to_context("//title"), ".//title");
        assert_eq!(relative_to_context("title"), "title");

        let absolute = extract("/slideshow/slide/title", DocumentMode::Xml, SLIDESHOW);
        let relative = extract("./slideshow/slide/title", DocumentMode::Xml, SLIDESHOW);
        assert_eq!(absolute, relative);
        assert_eq!(absolute.len(), 2);
    }

    #[test]
    fn test_scalar_results() {
        let count = extract("count(//slide)", DocumentMode::Xml, SLIDESHOW);
        assert_eq!(count, vec![Record::single("k", "2")]);
    }

    #[test]
    fn test_malformed_xml() {
        let extractor = XpathExtractor::new([("k", "//a")], DocumentMode::Xml).unwrap();
        for body in [r#"{"url": "https://example.com"}"#, "<a><b></a>", "<a>", "", "<a/><b/>"] {
            let err = extractor.extract(&response(body)).unwrap_err();
            assert!(matches!(err, WebError::Parse { .. }), "accepted {:?}", body);
        }
    }

    #[test]
    fn test_namespaces_are_ignored() {
        let body = r#"<root xmlns="urn:x" xmlns:fb="urn:fb"><fb:like fb:ref="1">yes</fb:like></root>"#;
        let records = extract("//like/@ref", DocumentMode::Xml, body);
        assert_eq!(records[0].get("k"), Some(&json!("1")));
    }

    #[test]
    fn test_default_namespace_matches_local_names() {
        let body = r#"<slideshow xmlns="urn:slides"><slide><title>One</title></slide></slideshow>"#;
        let records = extract("//slide/title", DocumentMode::Xml, body);
        assert_eq!(records, vec![Record::single("k", "One")]);
    }

    #[test]
    fn test_declared_latin1_encoding() {
        let mut body = br#"<?xml version="1.0" encoding="ISO-8859-1"?><a note="na"#.to_vec();
        body.push(0xEF);
        body.extend_from_slice(br#"ve">caf"#);
        body.push(0xE9);
        body.extend_from_slice(b"</a>");
        let response = Response {
            url: "https://example.com".into(),
            status: 200,
            headers: IndexMap::new(),
            content: body.clone(),
            body,
            ignored: false,
        };

        let extractor = XpathExtractor::new([("k", "/a"), ("note", "/a/@note")], DocumentMode::Xml)
            .unwrap();
        let records = extractor.extract(&response).unwrap();
        assert_eq!(records[0].get("k"), Some(&json!("caf\u{e9}")));
        assert_eq!(records[1].get("note"), Some(&json!("na\u{ef}ve")));
    }

    #[test]
    fn test_html_mode_recovers() {
        let body = r#"<html><body><p class="x">First<p class="x">Second &amp; more<div><a href="/next">go</a></body>"#;
        let paragraphs = extract(r#"//p[@class="x"]"#, DocumentMode::Html, body);
        assert_eq!(paragraphs.len(), 2);
        assert_eq!(paragraphs[0].get("k"), Some(&json!("First")));
        assert_eq!(paragraphs[1].get("k"), Some(&json!("Second & more")));

        let href = extract("//a/@href", DocumentMode::Html, body);
        assert_eq!(href[0].get("k"), Some(&json!("/next")));
    }

    #[test]
    fn test_invalid_expression_is_configuration_error() {
        let err = XpathExtractor::new([("k", "//a[")], DocumentMode::Xml).unwrap_err();
        assert!(err.is_configuration());
    }
}
