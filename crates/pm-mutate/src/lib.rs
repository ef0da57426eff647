//! Field-level mutation engine: applies an encrypt/decrypt callback to
//! selected values of a JSON, multipart, or event-stream HTTP body without
//! touching anything else in the document.

pub mod error;
pub mod event_stream;
pub mod json;
pub mod multipart;
pub mod path;

pub use error::Error;
pub use event_stream::{BoxMutator, JsonMode};
pub use json::{mutate_full, mutate_json_full, mutate_json_select, mutate_selected, string_field, Mutator};
pub use multipart::{mutate_multipart, MultipartField};
pub use path::{Path, Segment, Selector};

/// Whole-body mutation, used for body kinds with no internal structure to
/// select into (§4.1's "Full body" kind: the entire raw body is the value).
pub fn mutate_full_body(body: &str, f: &Mutator<'_>) -> Result<String, Error> {
    f(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_body_applies_mutator_to_entire_payload() {
        let f = |s: &str| -> Result<String, Error> { Ok(s.to_uppercase()) };
        assert_eq!(mutate_full_body("hello", &f).unwrap(), "HELLO");
    }
}
