use serde_json::Value;

use crate::error::Error;
use crate::path::{Path, Segment, Selector};

/// A mutator transforms the raw JSON text of one value into new raw JSON
/// text, which is parsed and spliced back into the document in place. A
/// mutator that only wants to operate on JSON strings should wrap itself
/// with [`string_field`].
pub type Mutator<'a> = dyn Fn(&str) -> Result<String, Error> + Send + Sync + 'a;

/// Adapt a `&str -> Result<String, Error>` function (operating on decoded
/// string content, the common case for field-level encrypt/decrypt) into a
/// raw-JSON-text [`Mutator`]. Errors with [`Error::FieldNotString`] if the
/// target value is not a JSON string.
pub fn string_field<'a, F>(inner: F) -> impl Fn(&str) -> Result<String, Error> + Send + Sync + 'a
where
    F: Fn(&str) -> Result<String, Error> + Send + Sync + 'a,
{
    move |raw: &str| -> Result<String, Error> {
        let decoded: String = serde_json::from_str(raw).map_err(|_| Error::FieldNotString {
            raw: raw.to_string(),
        })?;
        let transformed = inner(&decoded)?;
        serde_json::to_string(&transformed).map_err(|e| Error::InvalidMutatorOutput {
            message: e.to_string(),
        })
    }
}

fn parse_document(body: &str) -> Result<Value, Error> {
    serde_json::from_str(body).map_err(|e| Error::InvalidJson {
        message: e.to_string(),
    })
}

fn apply_raw(value: &mut Value, f: &Mutator<'_>) -> Result<(), Error> {
    let raw = serde_json::to_string(value).map_err(|e| Error::InvalidJson {
        message: e.to_string(),
    })?;
    let new_raw = f(&raw)?;
    let new_value: Value = serde_json::from_str(&new_raw).map_err(|e| Error::InvalidMutatorOutput {
        message: e.to_string(),
    })?;
    *value = new_value;
    Ok(())
}

/// `with_select`: apply `f` to each value at the paths listed in `selector`.
/// Unlisted values, and paths that do not resolve (missing keys, out-of-
/// range indices), pass through unchanged.
pub fn mutate_selected(document: &mut Value, selector: &Selector, f: &Mutator<'_>) -> Result<(), Error> {
    for path in selector.paths() {
        mutate_selected_at(document, path.as_slice(), f)?;
    }
    Ok(())
}

fn mutate_selected_at(value: &mut Value, path: &[Segment], f: &Mutator<'_>) -> Result<(), Error> {
    match path.split_first() {
        None => apply_raw(value, f),
        Some((Segment::Key(key), rest)) => {
            if let Value::Object(map) = value {
                if let Some(child) = map.get_mut(key) {
                    mutate_selected_at(child, rest, f)?;
                }
            }
            Ok(())
        }
        Some((Segment::Index(idx), rest)) => {
            if let Value::Array(arr) = value {
                if let Some(child) = arr.get_mut(*idx) {
                    mutate_selected_at(child, rest, f)?;
                }
            }
            Ok(())
        }
        Some((Segment::Wildcard, rest)) => {
            if let Value::Array(arr) = value {
                for child in arr.iter_mut() {
                    mutate_selected_at(child, rest, f)?;
                }
            }
            Ok(())
        }
    }
}

/// `with_full`: apply `f` to every value, recursing into objects and arrays,
/// except values at paths listed in `skip`. When a skip path is a strict
/// prefix of a deeper path, recursion continues into that sub-document with
/// the remaining suffix, so that most of an object can be mutated while one
/// nested field stays untouched.
pub fn mutate_full(document: &mut Value, skip: &Selector, f: &Mutator<'_>) -> Result<(), Error> {
    let active: Vec<&[Segment]> = skip.paths().iter().map(|p| p.as_slice()).collect();
    walk_full(document, &active, f)
}

fn walk_full(value: &mut Value, active_skips: &[&[Segment]], f: &Mutator<'_>) -> Result<(), Error> {
    if active_skips.iter().any(|segs| segs.is_empty()) {
        // A skip path's prefix matched exactly up to this node: the whole
        // sub-document is protected.
        return Ok(());
    }

    match value {
        Value::Object(map) => {
            for (key, child) in map.iter_mut() {
                let child_active: Vec<&[Segment]> = active_skips
                    .iter()
                    .filter_map(|segs| match segs.first() {
                        Some(Segment::Key(k)) if k == key => Some(&segs[1..]),
                        _ => None,
                    })
                    .collect();
                walk_full(child, &child_active, f)?;
            }
            Ok(())
        }
        Value::Array(arr) => {
            for (idx, child) in arr.iter_mut().enumerate() {
                let child_active: Vec<&[Segment]> = active_skips
                    .iter()
                    .filter_map(|segs| match segs.first() {
                        Some(Segment::Index(i)) if *i == idx => Some(&segs[1..]),
                        Some(Segment::Wildcard) => Some(&segs[1..]),
                        _ => None,
                    })
                    .collect();
                walk_full(child, &child_active, f)?;
            }
            Ok(())
        }
        _ => apply_raw(value, f),
    }
}

/// Parse `body`, apply `f` selectively, and re-serialize.
pub fn mutate_json_select(body: &str, selector: &Selector, f: &Mutator<'_>) -> Result<String, Error> {
    let mut document = parse_document(body)?;
    mutate_selected(&mut document, selector, f)?;
    serde_json::to_string(&document).map_err(|e| Error::InvalidJson {
        message: e.to_string(),
    })
}

/// Parse `body`, apply `f` to everything outside `skip`, and re-serialize.
pub fn mutate_json_full(body: &str, skip: &Selector, f: &Mutator<'_>) -> Result<String, Error> {
    let mut document = parse_document(body)?;
    mutate_full(&mut document, skip, f)?;
    serde_json::to_string(&document).map_err(|e| Error::InvalidJson {
        message: e.to_string(),
    })
}

#[allow(dead_code)]
fn selector_of(paths: &[&str]) -> Selector {
    Selector::new(paths.iter().map(|p| Path::parse(p).unwrap()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn upper(s: &str) -> Result<String, Error> {
        Ok(s.to_uppercase())
    }

    fn const_e(_s: &str) -> Result<String, Error> {
        Ok("e".to_string())
    }

    #[test]
    fn selective_single_field() {
        let selector = selector_of(&["a"]);
        let f = string_field(upper);
        let out = mutate_json_select(r#"{"a":"x","b":"y"}"#, &selector, &f).unwrap();
        let value: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value, json!({"a":"X","b":"y"}));
    }

    #[test]
    fn full_json_with_skip_nested_array() {
        let skip = Selector::new(vec![Path::parse("msgs.#.s").unwrap()]);
        let f = string_field(const_e);
        let out = mutate_json_full(r#"{"msgs":[{"k":"p","s":"q"}],"m":"r"}"#, &skip, &f).unwrap();
        let value: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value, json!({"msgs":[{"k":"e","s":"q"}],"m":"e"}));
    }

    #[test]
    fn identity_mutation_is_value_equivalent() {
        let selector = selector_of(&["a", "c.#"]);
        let identity = |s: &str| -> Result<String, Error> { Ok(s.to_string()) };
        let input = json!({"a":"x","b":"y","c":[1,2,3]});
        let mut document = input.clone();
        mutate_selected(&mut document, &selector, &identity).unwrap();
        assert_eq!(document, input);
    }

    #[test]
    fn missing_paths_are_silently_skipped() {
        let selector = selector_of(&["nope", "also.missing"]);
        let f = string_field(upper);
        let out = mutate_json_select(r#"{"a":"x"}"#, &selector, &f).unwrap();
        let value: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value, json!({"a":"x"}));
    }

    #[test]
    fn invalid_json_fails_clearly() {
        let selector = selector_of(&["a"]);
        let f = string_field(upper);
        assert!(mutate_json_select("not json", &selector, &f).is_err());
    }

    #[test]
    fn string_field_rejects_non_string_target() {
        let selector = selector_of(&["n"]);
        let f = string_field(upper);
        let err = mutate_json_select(r#"{"n":42}"#, &selector, &f).unwrap_err();
        assert!(matches!(err, Error::FieldNotString { .. }));
    }

    #[test]
    fn selective_whole_subtree_selection() {
        // §4.4's version-absent compatibility branch selects whole top-level
        // values (e.g. `messages`), not individual string leaves.
        let selector = selector_of(&["messages"]);
        let f = |raw: &str| -> Result<String, Error> { Ok(format!("\"blob:{}\"", raw.len())) };
        let out = mutate_json_select(r#"{"messages":[{"role":"user","content":"hi"}],"model":"m"}"#, &selector, &f)
            .unwrap();
        let value: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value["model"], json!("m"));
        assert!(value["messages"].as_str().unwrap().starts_with("blob:"));
    }
}
