//! Parameter transforms applied before a request is issued
//!
//! Every parameter class of a request spec (query params, headers, form
//! data) goes through the same pipeline: string templates are expanded
//! against the caller's options, relative-time mappings are resolved to
//! concrete timestamps, and credentials are merged in by [`auth`].

pub mod auth;
pub mod relatime;

use crate::error::Result;
use crate::template::{OptionTransform, Options};
use chrono::{DateTime, Local, Utc};
use chrono_tz::Tz;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

pub use auth::{AuthDescriptor, AuthMaterial, AuthRef, Credentials};
pub use relatime::{RelativeTime, RelativeTimeSpec};

/// One configured parameter value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    /// A string template
    Text(String),
    /// A literal number
    Number(serde_json::Number),
    /// A literal boolean
    Bool(bool),
    /// A timestamp computed at evaluation time
    RelativeTime(RelativeTimeSpec),
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::Text(value.to_string())
    }
}

/// Parameter templates of one class, in configuration order
pub type ParamMap = IndexMap<String, ParamValue>;

/// Resolved parameters of one class
pub type ResolvedParams = IndexMap<String, String>;

/// Zone used as the anchor for relative time expressions
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AnchorZone {
    /// The system's local timezone
    Local,
    /// An explicit IANA timezone
    Named(Tz),
}

/// Evaluation context shared by all transforms of one run
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamContext {
    pub now: DateTime<Utc>,
    pub anchor: AnchorZone,
}

impl ParamContext {
    /// Context anchored at `now` in the given zone (system local when `None`)
    pub fn new(now: DateTime<Utc>, local_timezone: Option<&str>) -> Result<Self> {
        let anchor = match local_timezone {
            Some(name) => AnchorZone::Named(relatime::parse_timezone(name)?),
            None => AnchorZone::Local,
        };
        Ok(Self { now, anchor })
    }

    /// Resolve a relative time spec to its rendered string
    pub fn resolve_time(&self, spec: &RelativeTimeSpec) -> Result<String> {
        let expr: RelativeTime = spec.relatime.parse()?;
        let instant = match self.anchor {
            AnchorZone::Local => expr
                .resolve(self.now.with_timezone(&Local))?
                .with_timezone(&Utc),
            AnchorZone::Named(tz) => expr.resolve(self.now.with_timezone(&tz))?.with_timezone(&Utc),
        };
        let target = match &spec.timezone {
            Some(name) => relatime::parse_timezone(name)?,
            None => Tz::UTC,
        };
        let format = spec.format.as_deref().unwrap_or(relatime::DEFAULT_FORMAT);
        relatime::render(instant, target, format)
    }
}

/// Expand and resolve one parameter class
pub fn resolve_params(
    raw: &ParamMap,
    opts: &Options,
    transform: OptionTransform,
    ctx: &ParamContext,
) -> Result<ResolvedParams> {
    raw.iter()
        .map(|(key, value)| {
            let resolved = match value {
                ParamValue::Text(template) => transform.expand(template, opts)?,
                ParamValue::Number(n) => n.to_string(),
                ParamValue::Bool(b) => b.to_string(),
                ParamValue::RelativeTime(spec) => ctx.resolve_time(spec)?,
            };
            Ok((key.clone(), resolved))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ctx() -> ParamContext {
        let now = Utc.with_ymd_and_hms(2024, 3, 13, 19, 42, 10).unwrap();
        ParamContext::new(now, Some("America/New_York")).unwrap()
    }

    #[test]
    fn test_templates_and_literals() {
        let raw: ParamMap = serde_json::from_str(
            r#"{"ip": "{target}", "limit": 10, "verbose": true, "fixed": "x"}"#,
        )
        .unwrap();
        let mut opts = Options::new();
        opts.insert("target".into(), "8.8.8.8".into());

        let resolved = resolve_params(&raw, &opts, OptionTransform::Identity, &ctx()).unwrap();
        assert_eq!(resolved["ip"], "8.8.8.8");
        assert_eq!(resolved["limit"], "10");
        assert_eq!(resolved["verbose"], "true");
        assert_eq!(resolved["fixed"], "x");
        let keys: Vec<_> = resolved.keys().cloned().collect();
        assert_eq!(keys, vec!["ip", "limit", "verbose", "fixed"]);
    }

    #[test]
    fn test_missing_option_propagates() {
        let raw: ParamMap = serde_json::from_str(r#"{"ip": "{target}"}"#).unwrap();
        let err = resolve_params(&raw, &Options::new(), OptionTransform::Identity, &ctx())
            .unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_relative_time_default_format() {
        let raw: ParamMap = serde_json::from_str(r#"{"since": {"relatime": "-1d@d"}}"#).unwrap();
        let resolved =
            resolve_params(&raw, &Options::new(), OptionTransform::Identity, &ctx()).unwrap();
        // Midnight 2024-03-12 in New York (EDT) is 04:00 UTC
        assert_eq!(resolved["since"], "2024-03-12T04:00:00.000000Z");
    }

    #[test]
    fn test_relative_time_target_zone_and_epoch() {
        let raw: ParamMap = serde_json::from_str(
            r#"{
                "local": {"relatime": "-1d@d", "timezone": "America/New_York"},
                "epoch": {"relatime": "-1d@d", "format": "as_epoch"}
            }"#,
        )
        .unwrap();
        let resolved =
            resolve_params(&raw, &Options::new(), OptionTransform::Identity, &ctx()).unwrap();
        assert_eq!(resolved["local"], "2024-03-12T00:00:00.000000Z");
        let expected = Utc.with_ymd_and_hms(2024, 3, 12, 4, 0, 0).unwrap().timestamp();
        assert_eq!(resolved["epoch"], expected.to_string());
    }

    #[test]
    fn test_bad_relative_time_is_configuration_error() {
        let raw: ParamMap =
            serde_json::from_str(r#"{"since": {"relatime": "last tuesday"}}"#).unwrap();
        let err = resolve_params(&raw, &Options::new(), OptionTransform::Identity, &ctx())
            .unwrap_err();
        assert!(err.is_configuration());
    }
}
