use crate::transform::params::TransformOptions;
use std::fmt;
use url::form_urlencoded::byte_serialize;

const KEY_PREFIX: &str = "image:";
const SOURCE_SEPARATOR: char = '|';
const OPTION_SEPARATOR: char = ',';

/// Semantic identity of a (source, options) pair in the durable tier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Builds the durable-tier key: `image:<source>|fit:cover,width:300,...`.
///
/// Options keep their insertion order. Values are form-encoded, so the
/// option list never contains a raw `|`, `,` or `:` and the last `|`
/// always ends the source. Changing the layout orphans every stored entry.
pub fn cache_key(source_url: &str, options: &TransformOptions) -> CacheKey {
    let mut key = String::with_capacity(KEY_PREFIX.len() + source_url.len() + 1 + options.len() * 12);
    key.push_str(KEY_PREFIX);
    key.push_str(source_url);
    key.push(SOURCE_SEPARATOR);
    for (i, (name, value)) in options.iter().enumerate() {
        if i > 0 {
            key.push(OPTION_SEPARATOR);
        }
        key.push_str(name.as_str());
        key.push(':');
        key.extend(byte_serialize(value.as_bytes()));
    }
    CacheKey(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::params::{parse_options, QueryParams};

    fn key(source: &str, query: &str) -> CacheKey {
        let (opts, _) = parse_options(&QueryParams::parse(Some(query)), None);
        cache_key(source, &opts)
    }

    #[test]
    fn literal_layout() {
        assert_eq!(
            key("https://a.example.com/x.jpg", "w=300&fit=cover&q=80").as_str(),
            "image:https://a.example.com/x.jpg|fit:cover,width:300,quality:80"
        );
        assert_eq!(key("https://a.example.com/x.jpg", "").as_str(), "image:https://a.example.com/x.jpg|");
    }

    #[test]
    fn same_inputs_collide_regardless_of_param_order() {
        let a = key("https://a.example.com/x.jpg", "w=300&h=200&src=zzz");
        let b = key("https://a.example.com/x.jpg", "h=200&src=yyy&w=300&unrelated=1");
        assert_eq!(a, b);
    }

    #[test]
    fn any_difference_changes_key() {
        let base = key("https://a.example.com/x.jpg", "w=300&h=200");
        assert_ne!(base, key("https://a.example.com/x.jpg", "w=301&h=200"));
        assert_ne!(base, key("https://a.example.com/x.jpg", "w=300&h=200&q=80"));
        assert_ne!(base, key("https://a.example.com/y.jpg", "w=300&h=200"));
        assert_ne!(key("https://a.example.com/x.jpg", "w=200"), key("https://a.example.com/x.jpg", "h=200"));
    }

    #[test]
    fn delimiters_in_values_cannot_forge_another_key() {
        let source = "https://images.example.com/a.jpg";
        let forged = key(source, "fit=cover%2Cwidth%3A300");
        let real = key(source, "fit=cover&w=300");
        assert_ne!(forged, real);
        assert_eq!(forged.as_str(), "image:https://images.example.com/a.jpg|fit:cover%2Cwidth%3A300");

        // "a|b" and the literal text "a%7Cb" stay apart
        assert_ne!(key(source, "fit=a%7Cb"), key(source, "fit=a%257Cb"));
        assert!(!key(source, "fit=a%7Cb").as_str().ends_with("|b"));
    }

    #[test]
    fn enlarge_alias_matches_explicit_cover() {
        assert_eq!(
            key("https://a.example.com/x.jpg", "enlarge=true"),
            key("https://a.example.com/x.jpg", "fit=cover")
        );
    }
}
