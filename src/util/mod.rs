//! Text cleanup and URL handling shared by the acquisition pipeline.

mod text;
mod url_validator;

pub use text::{
    collapse_whitespace, decode_entities, display_width, strip_control_chars, strip_html_tags,
    truncate_chars, truncate_to_width,
};
pub use url_validator::{normalize_input_url, origin_of, site_domain, validate_url, UrlValidationError};
