//! Soft index resolution
//!
//! Rewrites `[+]` and `[=]` markers into literal indices before any path is
//! resolved. Counters are keyed by the path prefix up to and including the
//! indexed segment, with earlier indices already concrete, so
//! `name[+].given[+]` and `name[=].given[+]` count `given` per `name` entry.
//!
//! Root caret paths, assignment paths and per-concept caret paths keep separate
//! counters: the prefix starts with a context derived from the rule kind.

use super::path::{PathExpression, PathIndex, SoftIndexOp};
use crate::ast::Rule;
use crate::error::ExportError;
use std::collections::HashMap;
use tracing::trace;

/// Per-entity soft index state
#[derive(Debug, Default)]
pub struct SoftIndexResolver {
    last_index: HashMap<String, usize>,
}

impl SoftIndexResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve every soft index in `rules`, in order.
    ///
    /// Returns the position and error of each rule whose markers could not be
    /// resolved. Such rules keep their original path and contribute nothing to
    /// the counters.
    pub fn resolve(&mut self, rules: &mut [Rule]) -> Vec<(usize, ExportError)> {
        let mut failures = Vec::new();

        for (position, rule) in rules.iter_mut().enumerate() {
            let (context, path) = match rule {
                Rule::CaretValue(r) => ("^".to_string(), &mut r.path),
                Rule::Assignment(r) => (String::new(), &mut r.path),
                Rule::CodeCaretValue(r) => {
                    let chain: String = r.codes.iter().map(|c| format!("#{}", c)).collect();
                    (format!("{}^", chain), &mut r.path)
                }
                Rule::Concept(_)
                | Rule::Card(_)
                | Rule::Flag(_)
                | Rule::Binding(_)
                | Rule::Contains(_)
                | Rule::Insert(_) => continue,
            };

            if let Err(err) = self.resolve_path(&context, path) {
                failures.push((position, err));
            }
        }

        failures
    }

    /// Resolve one path; counters are only updated when the whole path resolves.
    pub fn resolve_path(
        &mut self,
        context: &str,
        path: &mut PathExpression,
    ) -> Result<(), ExportError> {
        let original = path.to_string();
        let mut resolved = path.clone();
        let mut pending: Vec<(String, usize)> = Vec::new();
        let mut prefix = context.to_string();

        for (i, segment) in resolved.segments_mut().iter_mut().enumerate() {
            if i > 0 {
                prefix.push('.');
            }
            prefix.push_str(&segment.key());

            let last = pending
                .iter()
                .rev()
                .find(|(key, _)| *key == prefix)
                .map(|(_, index)| *index)
                .or_else(|| self.last_index.get(&prefix).copied());

            let index = match segment.index {
                None => continue,
                Some(PathIndex::Literal(n)) => n,
                Some(PathIndex::Soft(SoftIndexOp::Increment)) => last.map_or(0, |n| n + 1),
                Some(PathIndex::Soft(SoftIndexOp::Repeat)) => {
                    last.ok_or_else(|| ExportError::SoftIndex {
                        path: original.clone(),
                        reason: format!(
                            "[=] used on '{}' before any index was assigned",
                            segment.key()
                        ),
                    })?
                }
            };

            segment.index = Some(PathIndex::Literal(index));
            pending.push((prefix.clone(), index));
            prefix.push_str(&format!("[{}]", index));
        }

        trace!("Resolved soft indices: {} -> {}", original, resolved);
        self.last_index.extend(pending);
        *path = resolved;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{AssignmentRule, CaretValueRule, CodeCaretValueRule, Value};
    use crate::diagnostics::Location;

    fn caret(path: &str) -> Rule {
        Rule::CaretValue(CaretValueRule {
            path: PathExpression::parse(path).unwrap(),
            value: Value::string("x"),
            location: Location::default(),
        })
    }

    fn assign(path: &str) -> Rule {
        Rule::Assignment(AssignmentRule {
            path: PathExpression::parse(path).unwrap(),
            value: Value::string("x"),
            exactly: false,
            location: Location::default(),
        })
    }

    fn path_of(rule: &Rule) -> String {
        match rule {
            Rule::CaretValue(r) => r.path.to_string(),
            Rule::Assignment(r) => r.path.to_string(),
            Rule::CodeCaretValue(r) => r.path.to_string(),
            _ => String::new(),
        }
    }

    #[test]
    fn test_increment_and_repeat() {
        let mut rules = vec![
            caret("^contact[+].name"),
            caret("^contact[+].name"),
            caret("^contact[=].telecom[0].value"),
        ];
        let failures = SoftIndexResolver::new().resolve(&mut rules);

        assert!(failures.is_empty());
        assert_eq!(path_of(&rules[0]), "contact[0].name");
        assert_eq!(path_of(&rules[1]), "contact[1].name");
        assert_eq!(path_of(&rules[2]), "contact[1].telecom[0].value");
    }

    #[test]
    fn test_nested_counters_are_per_parent() {
        let mut rules = vec![
            assign("name[+].given[+]"),
            assign("name[=].given[+]"),
            assign("name[+].given[+]"),
        ];
        SoftIndexResolver::new().resolve(&mut rules);

        assert_eq!(path_of(&rules[0]), "name[0].given[0]");
        assert_eq!(path_of(&rules[1]), "name[0].given[1]");
        assert_eq!(path_of(&rules[2]), "name[1].given[0]");
    }

    #[test]
    fn test_literal_index_seeds_counter() {
        let mut rules = vec![assign("identifier[2].value"), assign("identifier[+].value")];
        SoftIndexResolver::new().resolve(&mut rules);
        assert_eq!(path_of(&rules[1]), "identifier[3].value");
    }

    #[test]
    fn test_repeat_without_prior_index_fails() {
        let mut rules = vec![caret("^identifier[=].value"), caret("^identifier[+].value")];
        let failures = SoftIndexResolver::new().resolve(&mut rules);

        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, 0);
        assert!(matches!(failures[0].1, ExportError::SoftIndex { .. }));
        assert_eq!(path_of(&rules[1]), "identifier[0].value");
    }

    #[test]
    fn test_failed_rule_does_not_advance_counters() {
        let mut rules = vec![
            assign("contact[+].telecom[=].value"),
            assign("contact[+].name.text"),
        ];
        let failures = SoftIndexResolver::new().resolve(&mut rules);

        assert_eq!(failures.len(), 1);
        assert_eq!(path_of(&rules[1]), "contact[0].name.text");
    }

    #[test]
    fn test_contexts_are_separate() {
        let mut rules = vec![
            caret("^designation[+].value"),
            Rule::CodeCaretValue(CodeCaretValueRule {
                codes: vec!["a".to_string()],
                path: PathExpression::parse("^designation[+].value").unwrap(),
                value: Value::string("x"),
                location: Location::default(),
            }),
            Rule::CodeCaretValue(CodeCaretValueRule {
                codes: vec!["b".to_string()],
                path: PathExpression::parse("^designation[+].value").unwrap(),
                value: Value::string("x"),
                location: Location::default(),
            }),
            caret("^designation[+].value"),
        ];
        SoftIndexResolver::new().resolve(&mut rules);

        assert_eq!(path_of(&rules[0]), "designation[0].value");
        assert_eq!(path_of(&rules[1]), "designation[0].value");
        assert_eq!(path_of(&rules[2]), "designation[0].value");
        assert_eq!(path_of(&rules[3]), "designation[1].value");
    }

    #[test]
    fn test_slices_count_separately() {
        let mut rules = vec![
            assign("extension[a][+].valueString"),
            assign("extension[b][+].valueString"),
            assign("extension[a][+].valueString"),
        ];
        SoftIndexResolver::new().resolve(&mut rules);

        assert_eq!(path_of(&rules[0]), "extension[a][0].valueString");
        assert_eq!(path_of(&rules[1]), "extension[b][0].valueString");
        assert_eq!(path_of(&rules[2]), "extension[a][1].valueString");
    }
}
