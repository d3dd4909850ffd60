//! RuleSet expansion and parameter substitution
//!
//! RuleSets are FSH's template mechanism: a named list of rules, optionally
//! parameterized, spliced into an entity wherever an insert rule names it.
//! Expansion runs before any exporter sees the entity.
//!
//! # Bracket-Aware Substitution
//!
//! Parameters are NOT substituted inside brackets `[]` of paths, so slice names
//! and soft indices written in a RuleSet survive insertion untouched.
//!
//! ```text
//! RuleSet: Designation(lang, text)
//! * ^designation[+].language = {lang}
//! * ^designation[=].value = {text}
//!
//! * #active insert Designation(#de, "Aktiv")
//!
//! Expands to:
//! * #active ^designation[+].language = #de
//! * #active ^designation[=].value = "Aktiv"
//! ```
//!
//! # Code-prefixed inserts
//!
//! In code systems `* #a #b insert RS` applies the RuleSet to a concept: caret
//! rules become code caret rules on `#a #b`, and concept rules are nested under
//! `#a #b`.

use super::path::PathExpression;
use crate::ast::{CodeCaretValueRule, InsertRule, Rule, Value};
use crate::diagnostics::Location;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, trace};

/// Maximum nesting depth for RuleSet expansion to prevent infinite loops
const MAX_EXPANSION_DEPTH: usize = 10;

/// RuleSet definition with parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSet {
    /// RuleSet name
    pub name: String,
    /// Parameter names, referenced as `{name}` in the rules
    #[serde(default)]
    pub parameters: Vec<String>,
    #[serde(default)]
    pub rules: Vec<Rule>,
    #[serde(default)]
    pub location: Location,
}

impl RuleSet {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parameters: Vec::new(),
            rules: Vec::new(),
            location: Location::default(),
        }
    }

    pub fn with_parameters<I, S>(mut self, parameters: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.parameters = parameters.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }
}

/// RuleSet expansion errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RuleSetError {
    /// RuleSet not found
    #[error("RuleSet not found: {0}")]
    RuleSetNotFound(String),

    /// Parameter count mismatch
    #[error(
        "Parameter count mismatch: {ruleset} expects {expected} parameters, got {actual}"
    )]
    ParameterCountMismatch {
        ruleset: String,
        expected: usize,
        actual: usize,
    },

    /// Nested RuleSet expansion depth exceeded
    #[error("Nested RuleSet expansion depth exceeded (max: {0})")]
    MaxDepthExceeded(usize),

    /// Circular RuleSet reference detected
    #[error("Circular RuleSet reference: {}", format_cycle(.0))]
    CircularReference(Vec<String>),

    /// A substituted path no longer parses
    #[error("Invalid path after substitution in {ruleset}: {path}")]
    InvalidSubstitution { ruleset: String, path: String },
}

/// Format circular reference cycle for error messages
fn format_cycle(cycle: &[String]) -> String {
    cycle.join(" → ")
}

/// RuleSet expander
///
/// Manages RuleSet definitions and splices them into rule lists.
#[derive(Debug, Default)]
pub struct RuleSetExpander {
    /// Registered RuleSets by name
    rulesets: HashMap<String, Arc<RuleSet>>,
}

impl RuleSetExpander {
    /// Create a new RuleSet expander
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a RuleSet definition
    ///
    /// If a RuleSet with the same name already exists, it will be replaced.
    pub fn register_ruleset(&mut self, ruleset: RuleSet) {
        let name = ruleset.name.clone();
        debug!(
            "Registering RuleSet '{}' with {} parameters",
            name,
            ruleset.parameters.len()
        );
        self.rulesets.insert(name, Arc::new(ruleset));
    }

    /// Replace every insert rule in `rules` with its expansion.
    ///
    /// Inserts that fail to expand are dropped and returned with their location.
    pub fn expand_rules(&self, rules: Vec<Rule>) -> (Vec<Rule>, Vec<(Location, RuleSetError)>) {
        let mut expanded = Vec::with_capacity(rules.len());
        let mut failures = Vec::new();

        for rule in rules {
            match rule {
                Rule::Insert(insert) => match self.expand(&insert) {
                    Ok(rules) => expanded.extend(rules),
                    Err(err) => failures.push((insert.location.clone(), err)),
                },
                other => expanded.push(other),
            }
        }

        (expanded, failures)
    }

    /// Expand a single insert rule
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - RuleSet not found
    /// - Parameter count mismatch
    /// - Circular reference detected
    /// - Max expansion depth exceeded
    pub fn expand(&self, insert: &InsertRule) -> Result<Vec<Rule>, RuleSetError> {
        let mut expansion_stack = Vec::new();
        self.expand_with_stack(insert, &mut expansion_stack, 0)
    }

    /// Internal expansion with stack tracking for circular reference detection
    fn expand_with_stack(
        &self,
        insert: &InsertRule,
        expansion_stack: &mut Vec<String>,
        depth: usize,
    ) -> Result<Vec<Rule>, RuleSetError> {
        if depth >= MAX_EXPANSION_DEPTH {
            return Err(RuleSetError::MaxDepthExceeded(MAX_EXPANSION_DEPTH));
        }

        if expansion_stack.contains(&insert.rule_set) {
            let mut cycle = expansion_stack.clone();
            cycle.push(insert.rule_set.clone());
            return Err(RuleSetError::CircularReference(cycle));
        }

        let ruleset = self
            .rulesets
            .get(&insert.rule_set)
            .ok_or_else(|| RuleSetError::RuleSetNotFound(insert.rule_set.clone()))?;

        if insert.arguments.len() != ruleset.parameters.len() {
            return Err(RuleSetError::ParameterCountMismatch {
                ruleset: insert.rule_set.clone(),
                expected: ruleset.parameters.len(),
                actual: insert.arguments.len(),
            });
        }

        trace!(
            "Expanding RuleSet '{}' at depth {} with {} rules",
            insert.rule_set,
            depth,
            ruleset.rules.len()
        );

        let params: HashMap<String, String> = ruleset
            .parameters
            .iter()
            .cloned()
            .zip(insert.arguments.iter().map(|a| a.trim().to_string()))
            .collect();
        let substitution = Substitution {
            ruleset: &ruleset.name,
            params: &params,
        };

        expansion_stack.push(insert.rule_set.clone());

        let mut expanded_rules = Vec::new();
        for rule in &ruleset.rules {
            let mut rule = substitution.apply(rule)?;
            *rule.location_mut() = insert.location.clone();

            match rule {
                Rule::Insert(nested) => {
                    let nested_rules =
                        self.expand_with_stack(&nested, expansion_stack, depth + 1)?;
                    expanded_rules.extend(nested_rules);
                }
                other => expanded_rules.push(other),
            }
        }

        expansion_stack.pop();

        let expanded_rules: Vec<Rule> = expanded_rules
            .into_iter()
            .map(|rule| prefix_codes(rule, &insert.codes))
            .collect();

        debug!(
            "Expanded RuleSet '{}' into {} rules",
            insert.rule_set,
            expanded_rules.len()
        );

        Ok(expanded_rules)
    }
}

/// Apply the code chain of a code-prefixed insert to one expanded rule
fn prefix_codes(rule: Rule, codes: &[String]) -> Rule {
    if codes.is_empty() {
        return rule;
    }
    let prefixed = |rest: &[String]| codes.iter().chain(rest).cloned().collect::<Vec<_>>();

    match rule {
        Rule::CaretValue(r) => Rule::CodeCaretValue(CodeCaretValueRule {
            codes: codes.to_vec(),
            path: r.path,
            value: r.value,
            location: r.location,
        }),
        Rule::CodeCaretValue(mut r) => {
            r.codes = prefixed(&r.codes);
            Rule::CodeCaretValue(r)
        }
        Rule::Concept(mut r) => {
            r.ancestors = prefixed(&r.ancestors);
            Rule::Concept(r)
        }
        Rule::Insert(mut r) => {
            r.codes = prefixed(&r.codes);
            Rule::Insert(r)
        }
        other @ (Rule::Assignment(_)
        | Rule::Card(_)
        | Rule::Flag(_)
        | Rule::Binding(_)
        | Rule::Contains(_)) => other,
    }
}

/// Parameter values for one insert
struct Substitution<'a> {
    ruleset: &'a str,
    params: &'a HashMap<String, String>,
}

impl Substitution<'_> {
    fn apply(&self, rule: &Rule) -> Result<Rule, RuleSetError> {
        let mut rule = rule.clone();
        match &mut rule {
            Rule::CaretValue(r) => {
                r.path = self.path(&r.path)?;
                r.value = self.value(&r.value);
            }
            Rule::Concept(r) => {
                r.code = self.text(&r.code, false);
                r.ancestors = r.ancestors.iter().map(|c| self.text(c, false)).collect();
                r.display = r.display.as_deref().map(|d| self.text(d, true));
                r.definition = r.definition.as_deref().map(|d| self.text(d, true));
            }
            Rule::CodeCaretValue(r) => {
                r.codes = r.codes.iter().map(|c| self.text(c, false)).collect();
                r.path = self.path(&r.path)?;
                r.value = self.value(&r.value);
            }
            Rule::Assignment(r) => {
                r.path = self.path(&r.path)?;
                r.value = self.value(&r.value);
            }
            Rule::Card(r) => r.path = substitute_string(&r.path, self.params, true),
            Rule::Flag(r) => r.path = substitute_string(&r.path, self.params, true),
            Rule::Binding(r) => {
                r.path = substitute_string(&r.path, self.params, true);
                r.value_set = self.text(&r.value_set, false);
            }
            Rule::Contains(r) => {
                r.path = substitute_string(&r.path, self.params, true);
                r.items = r.items.iter().map(|i| self.text(i, false)).collect();
            }
            Rule::Insert(r) => {
                r.rule_set = self.text(&r.rule_set, false);
                r.arguments = r.arguments.iter().map(|a| self.text(a, false)).collect();
                r.codes = r.codes.iter().map(|c| self.text(c, false)).collect();
            }
        }
        Ok(rule)
    }

    fn path(&self, path: &PathExpression) -> Result<PathExpression, RuleSetError> {
        let text = path.to_string();
        if !text.contains('{') {
            return Ok(path.clone());
        }
        let substituted = substitute_string(&text, self.params, true);
        PathExpression::parse(&substituted).map_err(|_| RuleSetError::InvalidSubstitution {
            ruleset: self.ruleset.to_string(),
            path: substituted,
        })
    }

    fn value(&self, value: &Value) -> Value {
        match value {
            // a whole-value parameter takes the argument's literal
            Value::String(s) => match whole_parameter(s).and_then(|p| self.params.get(p)) {
                Some(argument) => Value::parse(argument),
                None => Value::String(self.text(s, true)),
            },
            other => {
                let text = other.to_string();
                if text.contains('{') {
                    Value::parse(&substitute_string(&text, self.params, false))
                } else {
                    other.clone()
                }
            }
        }
    }

    /// Plain-text substitution; `unquote` strips quotes from string arguments
    fn text(&self, text: &str, unquote: bool) -> String {
        if !unquote {
            return substitute_string(text, self.params, false);
        }
        let unquoted: HashMap<String, String> = self
            .params
            .iter()
            .map(|(k, v)| {
                let plain = match Value::parse(v) {
                    Value::String(s) => s,
                    _ => v.clone(),
                };
                (k.clone(), plain)
            })
            .collect();
        substitute_string(text, &unquoted, false)
    }
}

/// `{name}` -> `name`
fn whole_parameter(text: &str) -> Option<&str> {
    text.strip_prefix('{')?.strip_suffix('}')
}

/// Substitute `{param}` occurrences in `text`.
///
/// With `bracket_aware`, nothing inside `[]` is substituted.
fn substitute_string(text: &str, params: &HashMap<String, String>, bracket_aware: bool) -> String {
    let mut result = String::with_capacity(text.len());
    let chars: Vec<char> = text.chars().collect();
    let mut i = 0;
    let mut bracket_depth: i32 = 0;

    while i < chars.len() {
        let ch = chars[i];

        if bracket_aware && ch == '[' {
            bracket_depth += 1;
        } else if bracket_aware && ch == ']' {
            bracket_depth -= 1;
        } else if ch == '{' && bracket_depth == 0 {
            if let Some(offset) = chars[i + 1..].iter().position(|&c| c == '}') {
                let j = i + 1 + offset;
                let param_name: String = chars[i + 1..j].iter().collect();
                if let Some(value) = params.get(&param_name) {
                    trace!("Substituting {{{}}} with {}", param_name, value);
                    result.push_str(value);
                    i = j + 1;
                    continue;
                }
            }
        }

        result.push(ch);
        i += 1;
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{AssignmentRule, CaretValueRule, Code, ConceptRule};

    fn caret(path: &str, value: &str) -> Rule {
        Rule::CaretValue(CaretValueRule {
            path: PathExpression::parse(path).unwrap(),
            value: Value::parse(value),
            location: Location::default(),
        })
    }

    fn insert(name: &str, arguments: &[&str]) -> InsertRule {
        InsertRule {
            rule_set: name.to_string(),
            arguments: arguments.iter().map(|a| a.to_string()).collect(),
            codes: Vec::new(),
            location: Location::new("test.fsh", 7, 1),
        }
    }

    #[test]
    fn test_simple_substitution() {
        let mut expander = RuleSetExpander::new();
        expander.register_ruleset(
            RuleSet::new("Publisher")
                .with_parameters(["who"])
                .with_rule(caret("^publisher", "{who}")),
        );

        let expanded = expander.expand(&insert("Publisher", &["\"ACME\""])).unwrap();
        assert_eq!(expanded, vec![{
            let mut rule = caret("^publisher", "\"ACME\"");
            *rule.location_mut() = Location::new("test.fsh", 7, 1);
            rule
        }]);
    }

    #[test]
    fn test_path_and_string_substitution() {
        let mut expander = RuleSetExpander::new();
        expander.register_ruleset(
            RuleSet::new("Named")
                .with_parameters(["field", "who"])
                .with_rule(Rule::Assignment(AssignmentRule {
                    path: PathExpression::parse("{field}.text").unwrap(),
                    value: Value::string("Hello {who}"),
                    exactly: false,
                    location: Location::default(),
                })),
        );

        let expanded = expander
            .expand(&insert("Named", &["name", "\"World\""]))
            .unwrap();
        match &expanded[0] {
            Rule::Assignment(rule) => {
                assert_eq!(rule.path.to_string(), "name.text");
                assert_eq!(rule.value, Value::string("Hello World"));
            }
            other => panic!("unexpected rule {:?}", other),
        }
    }

    #[test]
    fn test_bracket_aware_substitution() {
        let mut expander = RuleSetExpander::new();
        expander.register_ruleset(
            RuleSet::new("Test")
                .with_parameters(["param"])
                .with_rule(caret("^extension[{param}].url", "\"http://test\""))
                .with_rule(caret("^{param}.system", "\"http://test\"")),
        );

        let expanded = expander.expand(&insert("Test", &["identifier"])).unwrap();
        assert_eq!(expanded.len(), 2);
        assert_eq!(expanded[0].to_string(), "* ^extension[{param}].url = \"http://test\"");
        assert_eq!(expanded[1].to_string(), "* ^identifier.system = \"http://test\"");
    }

    #[test]
    fn test_code_value_substitution() {
        let mut expander = RuleSetExpander::new();
        expander.register_ruleset(
            RuleSet::new("Status")
                .with_parameters(["code"])
                .with_rule(caret("^status", "#{code}")),
        );

        let expanded = expander.expand(&insert("Status", &["retired"])).unwrap();
        match &expanded[0] {
            Rule::CaretValue(rule) => assert_eq!(rule.value, Value::Code(Code::new("retired"))),
            other => panic!("unexpected rule {:?}", other),
        }
    }

    #[test]
    fn test_nested_insert() {
        let mut expander = RuleSetExpander::new();
        expander.register_ruleset(
            RuleSet::new("Outer")
                .with_rule(caret("^experimental", "false"))
                .with_rule(Rule::Insert(insert("Inner", &[]))),
        );
        expander.register_ruleset(RuleSet::new("Inner").with_rule(caret("^status", "#draft")));

        let expanded = expander.expand(&insert("Outer", &[])).unwrap();
        assert_eq!(expanded.len(), 2);
        assert_eq!(expanded[1].to_string(), "* ^status = #draft");
    }

    #[test]
    fn test_circular_reference() {
        let mut expander = RuleSetExpander::new();
        expander.register_ruleset(RuleSet::new("A").with_rule(Rule::Insert(insert("B", &[]))));
        expander.register_ruleset(RuleSet::new("B").with_rule(Rule::Insert(insert("A", &[]))));

        let err = expander.expand(&insert("A", &[])).unwrap_err();
        assert_eq!(
            err,
            RuleSetError::CircularReference(vec!["A".into(), "B".into(), "A".into()])
        );
        assert_eq!(err.to_string(), "Circular RuleSet reference: A → B → A");
    }

    #[test]
    fn test_max_depth_exceeded() {
        let mut expander = RuleSetExpander::new();
        for i in 0..10 {
            expander.register_ruleset(
                RuleSet::new(format!("Level{}", i))
                    .with_rule(Rule::Insert(insert(&format!("Level{}", i + 1), &[]))),
            );
        }
        expander.register_ruleset(RuleSet::new("Level10").with_rule(caret("^status", "#active")));

        let err = expander.expand(&insert("Level0", &[])).unwrap_err();
        assert_eq!(err, RuleSetError::MaxDepthExceeded(MAX_EXPANSION_DEPTH));

        // ten levels of nesting still expand
        let expanded = expander.expand(&insert("Level1", &[])).unwrap();
        assert_eq!(expanded.len(), 1);
    }

    #[test]
    fn test_parameter_count_mismatch() {
        let mut expander = RuleSetExpander::new();
        expander.register_ruleset(RuleSet::new("Two").with_parameters(["a", "b"]));

        let err = expander.expand(&insert("Two", &["x"])).unwrap_err();
        assert!(matches!(
            err,
            RuleSetError::ParameterCountMismatch {
                expected: 2,
                actual: 1,
                ..
            }
        ));
    }

    #[test]
    fn test_ruleset_not_found() {
        let expander = RuleSetExpander::new();
        let err = expander.expand(&insert("Missing", &[])).unwrap_err();
        assert_eq!(err, RuleSetError::RuleSetNotFound("Missing".to_string()));
    }

    #[test]
    fn test_code_prefixed_insert() {
        let mut expander = RuleSetExpander::new();
        expander.register_ruleset(
            RuleSet::new("Details")
                .with_rule(caret("^designation[+].value", "\"Aktiv\""))
                .with_rule(Rule::Concept(ConceptRule::new("sub"))),
        );

        let mut code_insert = insert("Details", &[]);
        code_insert.codes = vec!["root".to_string(), "active".to_string()];
        let expanded = expander.expand(&code_insert).unwrap();

        assert_eq!(
            expanded[0].to_string(),
            "* #root #active ^designation[+].value = \"Aktiv\""
        );
        assert_eq!(expanded[1].to_string(), "* #root #active #sub");
    }

    #[test]
    fn test_expand_rules_reports_failures() {
        let mut expander = RuleSetExpander::new();
        expander.register_ruleset(RuleSet::new("Ok").with_rule(caret("^status", "#active")));

        let rules = vec![
            caret("^version", "\"1.0\""),
            Rule::Insert(insert("Ok", &[])),
            Rule::Insert(insert("Missing", &[])),
        ];
        let (expanded, failures) = expander.expand_rules(rules);

        assert_eq!(expanded.len(), 2);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, Location::new("test.fsh", 7, 1));
    }
}
