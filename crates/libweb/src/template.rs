//! `{name}` template expansion against caller options
//!
//! Templates use the brace syntax familiar from format strings: `{name}` is
//! replaced by the option called `name`, while `{{` and `}}` produce literal
//! braces. A placeholder without a matching option is a configuration error.

use crate::error::{Result, WebError};
use indexmap::IndexMap;

/// Caller-supplied option values used to fill templates
pub type Options = IndexMap<String, String>;

/// Substitute every `{name}` placeholder in `template` with its option value
pub fn expand(template: &str, opts: &Options) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '{' => {
                let mut name = String::new();
                let mut closed = false;
                for n in chars.by_ref() {
                    if n == '}' {
                        closed = true;
                        break;
                    }
                    name.push(n);
                }
                if !closed {
                    return Err(WebError::Configuration(format!(
                        "unterminated placeholder in template '{}'",
                        template
                    )));
                }
                if name.is_empty() {
                    return Err(WebError::Configuration(format!(
                        "empty placeholder in template '{}'",
                        template
                    )));
                }
                match opts.get(&name) {
                    Some(value) => out.push_str(value),
                    None => {
                        return Err(WebError::MissingOption {
                            name,
                            template: template.to_string(),
                        })
                    }
                }
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '}' => {
                return Err(WebError::Configuration(format!(
                    "single '}}' in template '{}'",
                    template
                )));
            }
            _ => out.push(c),
        }
    }

    Ok(out)
}

/// Reverse the dot-delimited labels of every option value
///
/// Reputation lists (DNSBLs) are queried with the subject in reverse label
/// order: `1.2.3.4` is looked up as `4.3.2.1.<zone>`.
pub fn reverse_labels(opts: &Options) -> Options {
    opts.iter()
        .map(|(key, value)| {
            let reversed = value.rsplit('.').collect::<Vec<_>>().join(".");
            (key.clone(), reversed)
        })
        .collect()
}

/// How option values are preprocessed before a template is expanded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OptionTransform {
    /// Use option values as supplied
    #[default]
    Identity,
    /// Reverse dot-delimited labels (DNSBL naming)
    ReverseLabels,
}

impl OptionTransform {
    /// Expand `template` after applying this transform to `opts`
    pub fn expand(&self, template: &str, opts: &Options) -> Result<String> {
        match self {
            OptionTransform::Identity => expand(template, opts),
            OptionTransform::ReverseLabels => expand(template, &reverse_labels(opts)),
        }
    }
}
