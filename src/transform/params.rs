use crate::config::ImageFormat;
use std::fmt;

/// Option names understood by the transformation service.
///
/// Declaration order is the serialization order of [`TransformOptions`] and
/// therefore part of every cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OptionKey {
    Fit,
    Width,
    Height,
    Quality,
    Format,
}

impl OptionKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            OptionKey::Fit => "fit",
            OptionKey::Width => "width",
            OptionKey::Height => "height",
            OptionKey::Quality => "quality",
            OptionKey::Format => "format",
        }
    }
}

impl fmt::Display for OptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered, immutable set of transformation options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransformOptions {
    entries: Vec<(OptionKey, String)>,
}

impl TransformOptions {
    pub fn get(&self, key: OptionKey) -> Option<&str> {
        self.entries.iter().find(|(k, _)| *k == key).map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (OptionKey, &str)> {
        self.entries.iter().map(|(k, v)| (*k, v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Appends the negotiated output format. Only called once, after the
    /// source extension has been checked.
    pub(crate) fn with_format(mut self, format: ImageFormat) -> Self {
        self.entries.retain(|(k, _)| *k != OptionKey::Format);
        self.entries.push((OptionKey::Format, format.to_string()));
        self
    }
}

/// Raw query parameters in request order. Lookups return the first value
/// for a name, like `URLSearchParams.get`.
#[derive(Debug, Clone, Default)]
pub struct QueryParams(Vec<(String, String)>);

impl QueryParams {
    pub fn parse(query: Option<&str>) -> Self {
        let pairs = query
            .and_then(|q| serde_urlencoded::from_str::<Vec<(String, String)>>(q).ok())
            .unwrap_or_default();
        Self(pairs)
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
    }

    /// Like [`get`](Self::get) but treats an empty value as absent.
    pub fn non_empty(&self, name: &str) -> Option<&str> {
        self.get(name).filter(|v| !v.is_empty())
    }
}

struct OptionRule {
    key: OptionKey,
    param: &'static str,
    derive: fn(&QueryParams, &'static str) -> Option<String>,
}

fn direct(query: &QueryParams, param: &'static str) -> Option<String> {
    query.non_empty(param).map(str::to_string)
}

// `enlarge=true` is shorthand for `fit=cover` when no fit was given.
fn fit_or_enlarge(query: &QueryParams, param: &'static str) -> Option<String> {
    direct(query, param).or_else(|| match query.get("enlarge") {
        Some("true") => Some("cover".to_string()),
        _ => None,
    })
}

const OPTION_RULES: [OptionRule; 4] = [
    OptionRule { key: OptionKey::Fit, param: "fit", derive: fit_or_enlarge },
    OptionRule { key: OptionKey::Width, param: "w", derive: direct },
    OptionRule { key: OptionKey::Height, param: "h", derive: direct },
    OptionRule { key: OptionKey::Quality, param: "q", derive: direct },
];

/// Derives the transformation options and the provisional output format.
///
/// Never fails: unknown or empty parameters are simply left out. The
/// returned format is what the client accepts; png and gif sources override
/// it later in [`crate::source::ValidatedSource::resolve_format`].
pub fn parse_options(query: &QueryParams, accept: Option<&str>) -> (TransformOptions, ImageFormat) {
    let entries = OPTION_RULES
        .iter()
        .filter_map(|rule| (rule.derive)(query, rule.param).map(|v| (rule.key, v)))
        .collect();

    (TransformOptions { entries }, negotiate_format(accept))
}

/// Picks the best format the client advertises: avif, then webp, else jpeg.
pub fn negotiate_format(accept: Option<&str>) -> ImageFormat {
    let accept = accept.unwrap_or("").to_ascii_lowercase();
    if accept.contains("image/avif") {
        ImageFormat::avif
    } else if accept.contains("image/webp") {
        ImageFormat::webp
    } else {
        ImageFormat::jpeg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(q: &str, accept: Option<&str>) -> (TransformOptions, ImageFormat) {
        parse_options(&QueryParams::parse(Some(q)), accept)
    }

    #[test]
    fn maps_short_params_in_fixed_order() {
        let (opts, _) = parse("q=80&h=200&w=300&fit=contain&src=abc", None);
        let pairs: Vec<_> = opts.iter().collect();
        assert_eq!(
            pairs,
            vec![
                (OptionKey::Fit, "contain"),
                (OptionKey::Width, "300"),
                (OptionKey::Height, "200"),
                (OptionKey::Quality, "80"),
            ]
        );
    }

    #[test]
    fn empty_and_missing_params_are_omitted() {
        let (opts, _) = parse("w=&h=100&fit=", None);
        assert_eq!(opts.len(), 1);
        assert_eq!(opts.get(OptionKey::Height), Some("100"));
        assert_eq!(opts.get(OptionKey::Width), None);

        let (opts, _) = parse("", None);
        assert!(opts.is_empty());
    }

    #[test]
    fn enlarge_aliases_fit_cover_only_without_fit() {
        let (opts, _) = parse("enlarge=true&w=10", None);
        assert_eq!(opts.get(OptionKey::Fit), Some("cover"));

        let (opts, _) = parse("enlarge=true&fit=scale-down", None);
        assert_eq!(opts.get(OptionKey::Fit), Some("scale-down"));

        let (opts, _) = parse("enlarge=1", None);
        assert_eq!(opts.get(OptionKey::Fit), None);
    }

    #[test]
    fn first_value_wins_for_repeated_params() {
        let (opts, _) = parse("w=100&w=200", None);
        assert_eq!(opts.get(OptionKey::Width), Some("100"));
    }

    #[test]
    fn negotiation_prefers_avif_then_webp() {
        assert_eq!(negotiate_format(Some("image/avif,image/webp,*/*")), ImageFormat::avif);
        assert_eq!(negotiate_format(Some("image/webp,image/apng,*/*;q=0.8")), ImageFormat::webp);
        assert_eq!(negotiate_format(Some("text/html")), ImageFormat::jpeg);
        assert_eq!(negotiate_format(None), ImageFormat::jpeg);
    }

    #[test]
    fn with_format_appends_last() {
        let (opts, _) = parse("w=1&q=2", None);
        let opts = opts.with_format(ImageFormat::webp);
        let keys: Vec<_> = opts.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![OptionKey::Width, OptionKey::Quality, OptionKey::Format]);
        assert_eq!(opts.get(OptionKey::Format), Some("webp"));
    }
}
