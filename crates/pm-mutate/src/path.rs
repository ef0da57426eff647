use crate::error::Error;

/// One component of a [`Path`]: a literal object key, an array index, or the
/// wildcard `#` meaning every element of the current array.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Key(String),
    Index(usize),
    Wildcard,
}

/// A JSON path: a sequence of segments navigated left to right.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Path(pub Vec<Segment>);

impl Path {
    pub fn from_segments(segments: Vec<Segment>) -> Self {
        Self(segments)
    }

    /// Parse a dotted path string such as `msgs.#.s` or `foo\.bar.baz`,
    /// where `\.` escapes a literal dot inside a key name.
    pub fn parse(raw: &str) -> Result<Self, Error> {
        let mut segments = Vec::new();
        let mut current = String::new();
        let mut chars = raw.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '\\' if chars.peek() == Some(&'.') => {
                    current.push('.');
                    chars.next();
                }
                '.' => {
                    segments.push(Self::segment_from_literal(&current)?);
                    current.clear();
                }
                other => current.push(other),
            }
        }
        if current.is_empty() && segments.is_empty() {
            return Err(Error::InvalidSelector {
                message: "empty path".to_string(),
            });
        }
        if !current.is_empty() {
            segments.push(Self::segment_from_literal(&current)?);
        }
        Ok(Self(segments))
    }

    fn segment_from_literal(literal: &str) -> Result<Segment, Error> {
        if literal == "#" {
            Ok(Segment::Wildcard)
        } else if let Ok(idx) = literal.parse::<usize>() {
            // A bare integer segment selects exactly that array index; it is
            // never also interpreted as an object key named e.g. "0".
            Ok(Segment::Index(idx))
        } else if literal.is_empty() {
            Err(Error::InvalidSelector {
                message: "empty path segment".to_string(),
            })
        } else {
            Ok(Segment::Key(literal.to_string()))
        }
    }

    pub fn as_slice(&self) -> &[Segment] {
        &self.0
    }
}

/// An ordered list of [`Path`]s, used both as a selection list (`with_select`)
/// and as a skip list (`with_full`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selector(pub Vec<Path>);

impl Selector {
    pub fn new(paths: Vec<Path>) -> Self {
        Self(paths)
    }

    pub fn parse_all<'a>(raw: impl IntoIterator<Item = &'a str>) -> Result<Self, Error> {
        Ok(Self(
            raw.into_iter().map(Path::parse).collect::<Result<Vec<_>, _>>()?,
        ))
    }

    pub fn paths(&self) -> &[Path] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_keys() {
        let path = Path::parse("messages").unwrap();
        assert_eq!(path.0, vec![Segment::Key("messages".to_string())]);
    }

    #[test]
    fn parses_wildcard_and_nested_keys() {
        let path = Path::parse("msgs.#.s").unwrap();
        assert_eq!(
            path.0,
            vec![
                Segment::Key("msgs".to_string()),
                Segment::Wildcard,
                Segment::Key("s".to_string()),
            ]
        );
    }

    #[test]
    fn escaped_dot_is_literal_in_key_name() {
        let path = Path::parse(r"foo\.bar.baz").unwrap();
        assert_eq!(
            path.0,
            vec![Segment::Key("foo.bar".to_string()), Segment::Key("baz".to_string())]
        );
    }

    #[test]
    fn numeric_segment_is_an_index() {
        let path = Path::parse("items.2.name").unwrap();
        assert_eq!(
            path.0,
            vec![
                Segment::Key("items".to_string()),
                Segment::Index(2),
                Segment::Key("name".to_string()),
            ]
        );
    }
}
