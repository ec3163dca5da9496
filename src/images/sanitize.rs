//! Whitelabelling of provider text.
//!
//! Anything the image provider says (descriptions, errors, model ids) goes
//! through [`sanitize_provider_text`] before it is stored or shown.

use lazy_static::lazy_static;
use regex::Regex;

pub const PUBLIC_IMAGE_ENGINE_NAME: &str = "Ultragaz Studio Engine";

lazy_static! {
    // `gemini` swallows an attached model suffix such as `-2.5-flash-image-preview`.
    // A dot only belongs to the suffix when a digit follows it.
    static ref VENDOR_RE: Regex =
        Regex::new(r"(?i)google\s+generative\s+ai|gemini(?:[\w-]|\.\d)*").unwrap();
}

/// Total and idempotent: the replacement label matches none of the patterns.
pub fn sanitize_provider_text(input: &str) -> String {
    VENDOR_RE
        .replace_all(input, PUBLIC_IMAGE_ENGINE_NAME)
        .into_owned()
}

pub fn sanitize_optional(input: Option<&str>) -> Option<String> {
    input
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(sanitize_provider_text)
}
