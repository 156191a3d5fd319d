pub mod params;

use crate::config::ImageFormat;
use crate::source::ValidatedSource;
use params::TransformOptions;

/// Everything the pipeline needs to know about one image request.
///
/// Built once from the validated source, the parsed options and the
/// negotiated format; immutable afterwards.
#[derive(Debug, Clone)]
pub struct TransformRequest {
    source: ValidatedSource,
    options: TransformOptions,
    format: ImageFormat,
}

impl TransformRequest {
    /// Resolves the final output format and records a negotiated avif/webp
    /// choice in the options so it reaches the transformation service and
    /// the cache key. Sources with an intrinsic format (png, gif) keep
    /// their format and carry no `format` option.
    pub fn new(source: ValidatedSource, options: TransformOptions, negotiated: ImageFormat) -> Self {
        let format = source.resolve_format(negotiated);
        let options = match (source.intrinsic_format(), format) {
            (None, ImageFormat::avif | ImageFormat::webp) => options.with_format(format),
            _ => options,
        };
        Self { source, options, format }
    }

    pub fn source(&self) -> &ValidatedSource {
        &self.source
    }

    pub fn source_url(&self) -> &str {
        self.source.as_str()
    }

    pub fn options(&self) -> &TransformOptions {
        &self.options
    }

    pub fn format(&self) -> ImageFormat {
        self.format
    }
}
