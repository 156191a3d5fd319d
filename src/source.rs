use crate::config::ImageFormat;
use crate::GatewayError;
use base64::engine::general_purpose::{STANDARD_NO_PAD, URL_SAFE_NO_PAD};
use base64::Engine;
use url::Url;

/// Extensions a source path may end in.
const ALLOWED_EXTENSIONS: [&str; 5] = [".jpg", ".jpeg", ".png", ".gif", ".webp"];

/// A decoded `src` that passed every check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedSource {
    url: Url,
}

impl ValidatedSource {
    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }

    pub fn hostname(&self) -> &str {
        self.url.host_str().unwrap_or_default()
    }

    pub fn pathname(&self) -> &str {
        self.url.path()
    }

    /// Format dictated by the source itself, if any. png and gif cannot be
    /// re-encoded safely, so they are served as-is.
    pub fn intrinsic_format(&self) -> Option<ImageFormat> {
        let path = self.pathname().to_ascii_lowercase();
        if path.ends_with(".png") {
            Some(ImageFormat::png)
        } else if path.ends_with(".gif") {
            Some(ImageFormat::gif)
        } else {
            None
        }
    }

    pub fn resolve_format(&self, negotiated: ImageFormat) -> ImageFormat {
        self.intrinsic_format().unwrap_or(negotiated)
    }
}

/// Decodes and checks the `src` query parameter.
///
/// Checks run in order: presence, base64, URL syntax, extension, host.
pub fn validate_source(src: Option<&str>, allowed_hosts: &[String]) -> Result<ValidatedSource, GatewayError> {
    let src = src.filter(|s| !s.is_empty()).ok_or(GatewayError::MissingSource)?;

    let decoded = decode_base64(src)
        .ok_or_else(|| GatewayError::InvalidSource("src is not valid base64".into()))?;
    let decoded = String::from_utf8(decoded)
        .map_err(|_| GatewayError::InvalidSource("src is not valid UTF-8".into()))?;

    let url = Url::parse(decoded.trim())
        .map_err(|e| GatewayError::InvalidSource(format!("src is not an absolute URL: {}", e)))?;
    if url.host_str().map_or(true, str::is_empty) {
        return Err(GatewayError::InvalidSource("src has no host".into()));
    }

    let path = url.path().to_ascii_lowercase();
    if !ALLOWED_EXTENSIONS.iter().any(|ext| path.ends_with(ext)) {
        return Err(GatewayError::DisallowedExtension);
    }

    let host = url.host_str().unwrap_or_default();
    if !allowed_hosts.iter().any(|allowed| allowed.eq_ignore_ascii_case(host)) {
        return Err(GatewayError::ForbiddenHost(host.to_string()));
    }

    Ok(ValidatedSource { url })
}

// Accepts both alphabets, padded or not; query strings often carry either.
// An unescaped '+' arrives form-decoded as a space.
fn decode_base64(input: &str) -> Option<Vec<u8>> {
    let cleaned = input.trim().trim_end_matches('=').replace(' ', "+");
    STANDARD_NO_PAD
        .decode(&cleaned)
        .or_else(|_| URL_SAFE_NO_PAD.decode(&cleaned))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::STANDARD;

    fn hosts() -> Vec<String> {
        vec!["images.example.com".to_string()]
    }

    fn encode(url: &str) -> String {
        STANDARD.encode(url)
    }

    #[test]
    fn accepts_allowed_source() {
        let src = encode("https://images.example.com/photos/cat.JPG");
        let source = validate_source(Some(&src), &hosts()).unwrap();
        assert_eq!(source.hostname(), "images.example.com");
        assert_eq!(source.pathname(), "/photos/cat.JPG");
        assert_eq!(source.intrinsic_format(), None);
    }

    #[test]
    fn accepts_url_safe_and_unpadded_encodings() {
        let url = "https://images.example.com/a/b?c.png";
        let src = URL_SAFE_NO_PAD.encode("https://images.example.com/x.png?size=>>>");
        assert!(validate_source(Some(&src), &hosts()).is_ok());
        // query string does not count towards the extension
        let src = encode(url);
        assert!(matches!(validate_source(Some(&src), &hosts()), Err(GatewayError::DisallowedExtension)));
    }

    #[test]
    fn unescaped_plus_survives_form_decoding() {
        // "??>" encodes to "Pz8+" in the standard alphabet
        let url = "https://images.example.com/a.jpg#??>";
        let encoded = encode(url);
        assert!(encoded.contains('+'));
        let mangled = encoded.replace('+', " ");
        assert!(validate_source(Some(&mangled), &hosts()).is_ok());
    }

    #[test]
    fn missing_and_empty_src() {
        assert!(matches!(validate_source(None, &hosts()), Err(GatewayError::MissingSource)));
        assert!(matches!(validate_source(Some(""), &hosts()), Err(GatewayError::MissingSource)));
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(validate_source(Some("!!!not-base64!!!"), &hosts()), Err(GatewayError::InvalidSource(_))));
        let relative = encode("/just/a/path.jpg");
        assert!(matches!(validate_source(Some(&relative), &hosts()), Err(GatewayError::InvalidSource(_))));
    }

    #[test]
    fn rejects_disallowed_extensions() {
        for url in ["https://images.example.com/a.bmp", "https://images.example.com/photo", "https://images.example.com/"] {
            let src = encode(url);
            assert!(
                matches!(validate_source(Some(&src), &hosts()), Err(GatewayError::DisallowedExtension)),
                "{} should be rejected",
                url
            );
        }
    }

    #[test]
    fn rejects_foreign_hosts() {
        let src = encode("https://evil.example.net/cat.jpg");
        match validate_source(Some(&src), &hosts()) {
            Err(GatewayError::ForbiddenHost(host)) => assert_eq!(host, "evil.example.net"),
            other => panic!("unexpected: {:?}", other),
        }
        // subdomains are not implied
        let src = encode("https://a.images.example.com/cat.jpg");
        assert!(matches!(validate_source(Some(&src), &hosts()), Err(GatewayError::ForbiddenHost(_))));
    }

    #[test]
    fn png_and_gif_override_negotiated_format() {
        let png = validate_source(Some(&encode("https://images.example.com/a.PNG")), &hosts()).unwrap();
        assert_eq!(png.resolve_format(ImageFormat::avif), ImageFormat::png);
        let gif = validate_source(Some(&encode("https://images.example.com/a.gif")), &hosts()).unwrap();
        assert_eq!(gif.resolve_format(ImageFormat::webp), ImageFormat::gif);
        let jpg = validate_source(Some(&encode("https://images.example.com/a.jpeg")), &hosts()).unwrap();
        assert_eq!(jpg.resolve_format(ImageFormat::webp), ImageFormat::webp);
    }
}
