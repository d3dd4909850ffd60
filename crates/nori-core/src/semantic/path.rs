//! FSH path expressions
//!
//! A path such as `contact[0].telecom[+].system` or `^concept[=].designation[0].value`
//! is parsed into an ordered list of [`PathSegment`]s. Each segment carries its field
//! name, an optional slice name and an optional index:
//!
//! - `name` - plain field
//! - `name[3]` - literal array index
//! - `name[+]` / `name[=]` - soft indices, resolved by the soft-index pass
//! - `name[sliceName]` - slice reference, optionally followed by an index
//!   (`extension[foo][1]`)
//! - `value[x]` - choice element; `[x]` stays part of the name
//!
//! A leading `^` (caret path) is accepted and dropped.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Soft indexing operators
///
/// - `[+]`: Increment - addresses the next array element
/// - `[=]`: Repeat - reuses the last addressed array element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SoftIndexOp {
    /// `[+]` - Increment to next array index
    Increment,
    /// `[=]` - Repeat last array index
    Repeat,
}

/// Index qualifier on a path segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PathIndex {
    /// Literal array index: `[0]`, `[1]`
    Literal(usize),
    /// Soft index, only valid before soft-index resolution
    Soft(SoftIndexOp),
}

/// Path segment with bracket information
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PathSegment {
    /// Element name (including a trailing `[x]` for choice elements)
    pub name: String,
    /// Slice name from `[sliceName]`
    pub slice: Option<String>,
    /// Index from `[n]`, `[+]` or `[=]`
    pub index: Option<PathIndex>,
}

impl PathSegment {
    /// Create a new path segment without brackets
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            slice: None,
            index: None,
        }
    }

    /// Create a segment with a literal index
    pub fn indexed(name: impl Into<String>, index: usize) -> Self {
        Self {
            name: name.into(),
            slice: None,
            index: Some(PathIndex::Literal(index)),
        }
    }

    /// Literal index, if the segment has one
    pub fn literal_index(&self) -> Option<usize> {
        match self.index {
            Some(PathIndex::Literal(i)) => Some(i),
            _ => None,
        }
    }

    /// The segment without its index: `name` or `name[slice]`
    pub fn key(&self) -> String {
        match &self.slice {
            Some(slice) => format!("{}[{}]", self.name, slice),
            None => self.name.clone(),
        }
    }
}

/// Path syntax errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathSyntaxError {
    #[error("path is empty")]
    Empty,

    #[error("unclosed bracket in path '{0}'")]
    UnclosedBracket(String),

    #[error("empty segment in path '{0}'")]
    EmptySegment(String),

    #[error("unexpected bracket '[{bracket}]' in path '{path}'")]
    InvalidBracket { path: String, bracket: String },
}

/// Parsed FSH path
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PathExpression {
    segments: Vec<PathSegment>,
}

impl PathExpression {
    pub fn new(segments: Vec<PathSegment>) -> Self {
        Self { segments }
    }

    /// Parse a path string
    pub fn parse(path: &str) -> Result<Self, PathSyntaxError> {
        let path = path.trim();
        let path = path.strip_prefix('^').unwrap_or(path);
        if path.is_empty() {
            return Err(PathSyntaxError::Empty);
        }

        let mut segments = Vec::new();
        let mut current = String::new();
        let mut depth = 0usize;

        for ch in path.chars() {
            match ch {
                '.' if depth == 0 => {
                    segments.push(parse_segment(&current, path)?);
                    current.clear();
                }
                '[' => {
                    depth += 1;
                    current.push(ch);
                }
                ']' => {
                    depth = depth.saturating_sub(1);
                    current.push(ch);
                }
                _ => current.push(ch),
            }
        }

        if depth != 0 {
            return Err(PathSyntaxError::UnclosedBracket(path.to_string()));
        }
        segments.push(parse_segment(&current, path)?);

        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    pub fn segments_mut(&mut self) -> &mut [PathSegment] {
        &mut self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn push(&mut self, segment: PathSegment) {
        self.segments.push(segment);
    }

    /// New path with `other`'s segments appended to this one
    pub fn join(&self, other: &PathExpression) -> PathExpression {
        let mut segments = self.segments.clone();
        segments.extend(other.segments.iter().cloned());
        PathExpression { segments }
    }

    /// Whether any segment still carries a `[+]` or `[=]` marker
    pub fn has_soft_indices(&self) -> bool {
        self.segments
            .iter()
            .any(|s| matches!(s.index, Some(PathIndex::Soft(_))))
    }
}

fn parse_segment(text: &str, path: &str) -> Result<PathSegment, PathSyntaxError> {
    let text = text.trim();
    let (name, mut rest) = match text.find('[') {
        Some(pos) => (&text[..pos], &text[pos..]),
        None => (text, ""),
    };
    if name.is_empty() {
        return Err(PathSyntaxError::EmptySegment(path.to_string()));
    }

    let mut segment = PathSegment::new(name);
    while !rest.is_empty() {
        let (bracket, remainder) = split_bracket(rest)
            .ok_or_else(|| PathSyntaxError::UnclosedBracket(path.to_string()))?;
        rest = remainder;

        let invalid = || PathSyntaxError::InvalidBracket {
            path: path.to_string(),
            bracket: bracket.to_string(),
        };

        match bracket {
            "x" if segment.slice.is_none() && segment.index.is_none() => {
                segment.name.push_str("[x]");
            }
            _ if segment.index.is_some() => return Err(invalid()),
            "+" => segment.index = Some(PathIndex::Soft(SoftIndexOp::Increment)),
            "=" => segment.index = Some(PathIndex::Soft(SoftIndexOp::Repeat)),
            _ => {
                if let Ok(index) = bracket.parse::<usize>() {
                    segment.index = Some(PathIndex::Literal(index));
                } else if segment.slice.is_none() && !bracket.is_empty() {
                    segment.slice = Some(bracket.to_string());
                } else {
                    return Err(invalid());
                }
            }
        }
    }

    Ok(segment)
}

/// Split `[content]rest` into `(content, rest)`, honoring nested brackets
fn split_bracket(text: &str) -> Option<(&str, &str)> {
    let inner = text.strip_prefix('[')?;
    let mut depth = 1usize;
    for (pos, ch) in inner.char_indices() {
        match ch {
            '[' => depth += 1,
            ']' => {
                depth -= 1;
                if depth == 0 {
                    return Some((&inner[..pos], &inner[pos + 1..]));
                }
            }
            _ => {}
        }
    }
    None
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if let Some(slice) = &self.slice {
            write!(f, "[{}]", slice)?;
        }
        match self.index {
            Some(PathIndex::Literal(i)) => write!(f, "[{}]", i),
            Some(PathIndex::Soft(SoftIndexOp::Increment)) => write!(f, "[+]"),
            Some(PathIndex::Soft(SoftIndexOp::Repeat)) => write!(f, "[=]"),
            None => Ok(()),
        }
    }
}

impl fmt::Display for PathExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                write!(f, ".")?;
            }
            write!(f, "{}", segment)?;
        }
        Ok(())
    }
}

impl FromStr for PathExpression {
    type Err = PathSyntaxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for PathExpression {
    type Error = PathSyntaxError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<PathExpression> for String {
    fn from(path: PathExpression) -> Self {
        path.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_path() {
        let path = PathExpression::parse("name.family").unwrap();
        assert_eq!(path.len(), 2);
        assert_eq!(path.segments()[0], PathSegment::new("name"));
        assert_eq!(path.segments()[1], PathSegment::new("family"));
    }

    #[test]
    fn test_parse_caret_prefix() {
        let path = PathExpression::parse("^status").unwrap();
        assert_eq!(path.segments(), &[PathSegment::new("status")]);
    }

    #[test]
    fn test_parse_indices() {
        let path = PathExpression::parse("contact[0].telecom[+].system").unwrap();
        assert_eq!(path.segments()[0], PathSegment::indexed("contact", 0));
        assert_eq!(
            path.segments()[1].index,
            Some(PathIndex::Soft(SoftIndexOp::Increment))
        );
        assert!(path.has_soft_indices());

        let repeat = PathExpression::parse("designation[=].value").unwrap();
        assert_eq!(
            repeat.segments()[0].index,
            Some(PathIndex::Soft(SoftIndexOp::Repeat))
        );
    }

    #[test]
    fn test_parse_slice_and_index() {
        let path = PathExpression::parse("extension[myExt][1].valueString").unwrap();
        let first = &path.segments()[0];
        assert_eq!(first.name, "extension");
        assert_eq!(first.slice.as_deref(), Some("myExt"));
        assert_eq!(first.literal_index(), Some(1));
        assert_eq!(first.key(), "extension[myExt]");
    }

    #[test]
    fn test_parse_slice_name_with_dots() {
        let path = PathExpression::parse("extension[http://example.org/ext].url").unwrap();
        assert_eq!(path.len(), 2);
        assert_eq!(
            path.segments()[0].slice.as_deref(),
            Some("http://example.org/ext")
        );
    }

    #[test]
    fn test_parse_choice_suffix() {
        let path = PathExpression::parse("deceased[x]").unwrap();
        assert_eq!(path.segments()[0].name, "deceased[x]");
        assert!(path.segments()[0].slice.is_none());
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(PathExpression::parse(""), Err(PathSyntaxError::Empty));
        assert!(matches!(
            PathExpression::parse("name[0"),
            Err(PathSyntaxError::UnclosedBracket(_))
        ));
        assert!(matches!(
            PathExpression::parse("name..given"),
            Err(PathSyntaxError::EmptySegment(_))
        ));
        assert!(matches!(
            PathExpression::parse("name[0][1]"),
            Err(PathSyntaxError::InvalidBracket { .. })
        ));
    }

    #[test]
    fn test_display_round_trip() {
        for text in [
            "name.given[0]",
            "telecom[+].value",
            "concept[=].designation[0].use.code",
            "extension[foo][2].value[x]",
        ] {
            assert_eq!(PathExpression::parse(text).unwrap().to_string(), text);
        }
    }

    #[test]
    fn test_join() {
        let base = PathExpression::parse("concept[1].concept[0]").unwrap();
        let caret = PathExpression::parse("^designation[0].value").unwrap();
        assert_eq!(
            base.join(&caret).to_string(),
            "concept[1].concept[0].designation[0].value"
        );
    }
}
