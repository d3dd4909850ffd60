//! FSH entity and rule model
//!
//! Entities arrive from the front-end (or a serialized tank) as a name plus an
//! ordered list of [`Rule`]s. Paths are parsed into [`PathExpression`]s on the way
//! in; values are FSH literals ([`Value`]) that print back in FSH syntax.

use crate::diagnostics::Location;
use crate::semantic::PathExpression;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

/// Entity kinds handled by the exporters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityKind {
    CodeSystem,
    Instance,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::CodeSystem => write!(f, "CodeSystem"),
            EntityKind::Instance => write!(f, "Instance"),
        }
    }
}

/// A named FSH declaration with its rules
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    pub kind: EntityKind,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// `InstanceOf` for instances; unused for code systems
    #[serde(default, alias = "instanceOf", skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(default)]
    pub rules: Vec<Rule>,
    #[serde(default)]
    pub location: Location,
}

impl Entity {
    pub fn new(kind: EntityKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            id: None,
            title: None,
            description: None,
            parent: None,
            rules: Vec::new(),
            location: Location::default(),
        }
    }

    pub fn code_system(name: impl Into<String>) -> Self {
        Self::new(EntityKind::CodeSystem, name)
    }

    pub fn instance(name: impl Into<String>, instance_of: impl Into<String>) -> Self {
        let mut entity = Self::new(EntityKind::Instance, name);
        entity.parent = Some(instance_of.into());
        entity
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    /// The entity id, defaulting to its name
    pub fn id(&self) -> &str {
        self.id.as_deref().unwrap_or(&self.name)
    }
}

/// Rules an entity can carry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Rule {
    CaretValue(CaretValueRule),
    Concept(ConceptRule),
    CodeCaretValue(CodeCaretValueRule),
    Assignment(AssignmentRule),
    Card(CardRule),
    Flag(FlagRule),
    Binding(BindingRule),
    Contains(ContainsRule),
    Insert(InsertRule),
}

impl Rule {
    pub fn location(&self) -> &Location {
        match self {
            Rule::CaretValue(r) => &r.location,
            Rule::Concept(r) => &r.location,
            Rule::CodeCaretValue(r) => &r.location,
            Rule::Assignment(r) => &r.location,
            Rule::Card(r) => &r.location,
            Rule::Flag(r) => &r.location,
            Rule::Binding(r) => &r.location,
            Rule::Contains(r) => &r.location,
            Rule::Insert(r) => &r.location,
        }
    }

    pub fn location_mut(&mut self) -> &mut Location {
        match self {
            Rule::CaretValue(r) => &mut r.location,
            Rule::Concept(r) => &mut r.location,
            Rule::CodeCaretValue(r) => &mut r.location,
            Rule::Assignment(r) => &mut r.location,
            Rule::Card(r) => &mut r.location,
            Rule::Flag(r) => &mut r.location,
            Rule::Binding(r) => &mut r.location,
            Rule::Contains(r) => &mut r.location,
            Rule::Insert(r) => &mut r.location,
        }
    }

    /// Short rule-kind name for messages
    pub fn kind_name(&self) -> &'static str {
        match self {
            Rule::CaretValue(_) => "caret value",
            Rule::Concept(_) => "concept",
            Rule::CodeCaretValue(_) => "code caret value",
            Rule::Assignment(_) => "assignment",
            Rule::Card(_) => "cardinality",
            Rule::Flag(_) => "flag",
            Rule::Binding(_) => "binding",
            Rule::Contains(_) => "contains",
            Rule::Insert(_) => "insert",
        }
    }
}

/// Caret value rule: `* ^path = value`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaretValueRule {
    pub path: PathExpression,
    pub value: Value,
    #[serde(default)]
    pub location: Location,
}

/// Concept rule: `* #parent #child "display" "definition"`
///
/// `ancestors` lists the codes from the top-level concept down to the direct parent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConceptRule {
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub definition: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ancestors: Vec<String>,
    #[serde(default)]
    pub location: Location,
}

impl ConceptRule {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            display: None,
            definition: None,
            ancestors: Vec::new(),
            location: Location::default(),
        }
    }

    pub fn with_display(mut self, display: impl Into<String>) -> Self {
        self.display = Some(display.into());
        self
    }

    pub fn with_definition(mut self, definition: impl Into<String>) -> Self {
        self.definition = Some(definition.into());
        self
    }

    pub fn with_ancestors<I, S>(mut self, ancestors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ancestors = ancestors.into_iter().map(Into::into).collect();
        self
    }
}

/// Code caret value rule: `* #parent #child ^path = value`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeCaretValueRule {
    pub codes: Vec<String>,
    pub path: PathExpression,
    pub value: Value,
    #[serde(default)]
    pub location: Location,
}

/// Assignment rule: `* path = value (exactly)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignmentRule {
    pub path: PathExpression,
    pub value: Value,
    #[serde(default)]
    pub exactly: bool,
    #[serde(default)]
    pub location: Location,
}

/// Cardinality rule: `* path 0..1`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardRule {
    pub path: String,
    #[serde(default)]
    pub min: Option<u32>,
    #[serde(default)]
    pub max: Option<String>,
    #[serde(default)]
    pub location: Location,
}

/// Flag rule: `* path MS SU`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlagRule {
    pub path: String,
    pub flags: Vec<Flag>,
    #[serde(default)]
    pub location: Location,
}

/// Binding rule: `* path from ValueSet (required)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BindingRule {
    pub path: String,
    pub value_set: String,
    #[serde(default)]
    pub strength: Option<BindingStrength>,
    #[serde(default)]
    pub location: Location,
}

/// Contains rule: `* path contains a and b`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainsRule {
    pub path: String,
    pub items: Vec<String>,
    #[serde(default)]
    pub location: Location,
}

/// Insert rule: `* insert RuleSet(args)` or `* #code insert RuleSet`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsertRule {
    pub rule_set: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub arguments: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub codes: Vec<String>,
    #[serde(default)]
    pub location: Location,
}

/// Flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Flag {
    MS,
    SU,
    TU,
    N,
    D,
    #[serde(rename = "?!")]
    Modifier,
}

/// Binding strength
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BindingStrength {
    Required,
    Extensible,
    Preferred,
    Example,
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Flag::MS => write!(f, "MS"),
            Flag::SU => write!(f, "SU"),
            Flag::TU => write!(f, "TU"),
            Flag::N => write!(f, "N"),
            Flag::D => write!(f, "D"),
            Flag::Modifier => write!(f, "?!"),
        }
    }
}

impl fmt::Display for BindingStrength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindingStrength::Required => write!(f, "required"),
            BindingStrength::Extensible => write!(f, "extensible"),
            BindingStrength::Preferred => write!(f, "preferred"),
            BindingStrength::Example => write!(f, "example"),
        }
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rule::CaretValue(r) => write!(f, "* ^{} = {}", r.path, r.value),
            Rule::Concept(r) => {
                write!(f, "*")?;
                for code in r.ancestors.iter().chain(std::iter::once(&r.code)) {
                    write!(f, " #{}", code)?;
                }
                if let Some(display) = &r.display {
                    write!(f, " {}", quote(display))?;
                }
                if let Some(definition) = &r.definition {
                    write!(f, " {}", quote(definition))?;
                }
                Ok(())
            }
            Rule::CodeCaretValue(r) => {
                write!(f, "*")?;
                for code in &r.codes {
                    write!(f, " #{}", code)?;
                }
                write!(f, " ^{} = {}", r.path, r.value)
            }
            Rule::Assignment(r) => {
                write!(f, "* {} = {}", r.path, r.value)?;
                if r.exactly {
                    write!(f, " (exactly)")?;
                }
                Ok(())
            }
            Rule::Card(r) => {
                let min = r.min.map(|m| m.to_string()).unwrap_or_default();
                let max = r.max.clone().unwrap_or_default();
                write!(f, "* {} {}..{}", r.path, min, max)
            }
            Rule::Flag(r) => {
                write!(f, "* {}", r.path)?;
                for flag in &r.flags {
                    write!(f, " {}", flag)?;
                }
                Ok(())
            }
            Rule::Binding(r) => {
                write!(f, "* {} from {}", r.path, r.value_set)?;
                if let Some(strength) = r.strength {
                    write!(f, " ({})", strength)?;
                }
                Ok(())
            }
            Rule::Contains(r) => write!(f, "* {} contains {}", r.path, r.items.join(" and ")),
            Rule::Insert(r) => {
                write!(f, "*")?;
                for code in &r.codes {
                    write!(f, " #{}", code)?;
                }
                write!(f, " insert {}", r.rule_set)?;
                if !r.arguments.is_empty() {
                    write!(f, "({})", r.arguments.join(", "))?;
                }
                Ok(())
            }
        }
    }
}

/// Code with optional system: `system#code "display"` or `#code`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Code {
    pub system: Option<String>,
    pub code: String,
    pub display: Option<String>,
}

impl Code {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            system: None,
            code: code.into(),
            display: None,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_display(mut self, display: impl Into<String>) -> Self {
        self.display = Some(display.into());
        self
    }
}

/// UCUM quantity: `5.4 'mg' "milligram"`
#[derive(Debug, Clone, PartialEq)]
pub struct Quantity {
    pub value: f64,
    /// UCUM unit code; absent for bare numbers inside ratios
    pub unit: Option<String>,
    pub display: Option<String>,
}

impl Quantity {
    pub fn new(value: f64, unit: impl Into<String>) -> Self {
        Self {
            value,
            unit: Some(unit.into()),
            display: None,
        }
    }

    pub fn unitless(value: f64) -> Self {
        Self {
            value,
            unit: None,
            display: None,
        }
    }
}

/// FSH value literals
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    Number(f64),
    Boolean(bool),
    Code(Code),
    Quantity(Quantity),
    Ratio(Quantity, Quantity),
    Reference {
        target: String,
        display: Option<String>,
    },
    Canonical(String),
    DateTime(String),
    Time(String),
}

impl Value {
    pub fn string(s: impl Into<String>) -> Self {
        Value::String(s.into())
    }

    /// Name of the literal kind, used in type mismatch messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::String(_) => "string",
            Value::Number(n) if n.fract() == 0.0 => "integer",
            Value::Number(_) => "decimal",
            Value::Boolean(_) => "boolean",
            Value::Code(_) => "code",
            Value::Quantity(_) => "Quantity",
            Value::Ratio(..) => "Ratio",
            Value::Reference { .. } => "Reference",
            Value::Canonical(_) => "Canonical",
            Value::DateTime(_) => "dateTime",
            Value::Time(_) => "time",
        }
    }
}

static CODE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^([^\s#"]*)#([^\s"]+|"[^"]*")(?:\s+"((?:[^"\\]|\\.)*)")?$"#)
        .expect("code literal regex is valid")
});

static QUANTITY_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^([+-]?\d+(?:\.\d+)?(?:[eE][+-]?\d+)?)\s+'([^']*)'(?:\s+"((?:[^"\\]|\\.)*)")?$"#)
        .expect("quantity literal regex is valid")
});

static REFERENCE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^Reference\(\s*([^)]+?)\s*\)(?:\s+"((?:[^"\\]|\\.)*)")?$"#)
        .expect("reference literal regex is valid")
});

static DATE_TIME_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\d{4}-\d{2}(?:-\d{2}(?:T\d{2}:\d{2}(?::\d{2}(?:\.\d+)?)?(?:Z|[+-]\d{2}:\d{2})?)?)?$",
    )
    .expect("dateTime literal regex is valid")
});

static TIME_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d{2}:\d{2}(?::\d{2}(?:\.\d+)?)?$").expect("time literal regex is valid")
});

impl Value {
    /// Parse FSH literal syntax, falling back to a plain string
    pub fn parse(text: &str) -> Value {
        let text = text.trim();

        if let Some(s) = unquote(text) {
            return Value::String(s);
        }
        if let Some(caps) = REFERENCE_REGEX.captures(text) {
            return Value::Reference {
                target: caps[1].to_string(),
                display: caps.get(2).map(|m| unescape(m.as_str())),
            };
        }
        if let Some(inner) = text
            .strip_prefix("Canonical(")
            .and_then(|rest| rest.strip_suffix(')'))
        {
            return Value::Canonical(inner.trim().to_string());
        }
        match text {
            "true" => return Value::Boolean(true),
            "false" => return Value::Boolean(false),
            _ => {}
        }
        if let Some((left, right)) = text.split_once(" : ")
            && let (Some(numerator), Some(denominator)) =
                (parse_ratio_part(left), parse_ratio_part(right))
        {
            return Value::Ratio(numerator, denominator);
        }
        if let Some(quantity) = parse_quantity(text) {
            return Value::Quantity(quantity);
        }
        if let Some(caps) = CODE_REGEX.captures(text) {
            let system = &caps[1];
            let code = &caps[2];
            return Value::Code(Code {
                system: (!system.is_empty()).then(|| system.to_string()),
                code: unquote(code).unwrap_or_else(|| code.to_string()),
                display: caps.get(3).map(|m| unescape(m.as_str())),
            });
        }
        if DATE_TIME_REGEX.is_match(text) {
            return Value::DateTime(text.to_string());
        }
        if TIME_REGEX.is_match(text) {
            return Value::Time(text.to_string());
        }
        if let Ok(number) = text.parse::<f64>()
            && number.is_finite()
        {
            return Value::Number(number);
        }

        Value::String(text.to_string())
    }
}

fn parse_quantity(text: &str) -> Option<Quantity> {
    let caps = QUANTITY_REGEX.captures(text)?;
    Some(Quantity {
        value: caps[1].parse().ok().filter(|n: &f64| n.is_finite())?,
        unit: Some(caps[2].to_string()),
        display: caps.get(3).map(|m| unescape(m.as_str())),
    })
}

fn parse_ratio_part(text: &str) -> Option<Quantity> {
    let text = text.trim();
    parse_quantity(text).or_else(|| {
        text.parse::<f64>()
            .ok()
            .filter(|n| n.is_finite())
            .map(Quantity::unitless)
    })
}

/// Strip surrounding double quotes and unescape, if `text` is a quoted string
fn unquote(text: &str) -> Option<String> {
    let inner = text.strip_prefix('"')?.strip_suffix('"')?;
    // a lone `"` is not a quoted string
    if text.len() < 2 {
        return None;
    }
    // reject `"a" "b"`, which is two strings
    let mut escaped = false;
    for ch in inner.chars() {
        match ch {
            '\\' if !escaped => escaped = true,
            '"' if !escaped => return None,
            _ => escaped = false,
        }
    }
    Some(unescape(inner))
}

fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(ch) = chars.next() {
        if ch == '\\' {
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some(other) => out.push(other),
                None => out.push('\\'),
            }
        } else {
            out.push(ch);
        }
    }
    out
}

fn quote(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for ch in text.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            _ => out.push(ch),
        }
    }
    out.push('"');
    out
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", format_number(self.value))?;
        if let Some(unit) = &self.unit {
            write!(f, " '{}'", unit)?;
        }
        if let Some(display) = &self.display {
            write!(f, " {}", quote(display))?;
        }
        Ok(())
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(system) = &self.system {
            write!(f, "{}", system)?;
        }
        if self.code.chars().any(char::is_whitespace) {
            write!(f, "#{}", quote(&self.code))?;
        } else {
            write!(f, "#{}", self.code)?;
        }
        if let Some(display) = &self.display {
            write!(f, " {}", quote(display))?;
        }
        Ok(())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => write!(f, "{}", quote(s)),
            Value::Number(n) => write!(f, "{}", format_number(*n)),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Code(code) => write!(f, "{}", code),
            Value::Quantity(q) => write!(f, "{}", q),
            Value::Ratio(numerator, denominator) => write!(f, "{} : {}", numerator, denominator),
            Value::Reference { target, display } => {
                write!(f, "Reference({})", target)?;
                if let Some(display) = display {
                    write!(f, " {}", quote(display))?;
                }
                Ok(())
            }
            Value::Canonical(url) => write!(f, "Canonical({})", url),
            Value::DateTime(s) | Value::Time(s) => write!(f, "{}", s),
        }
    }
}

impl FromStr for Value {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Value::parse(s))
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Boolean(b) => serializer.serialize_bool(*b),
            Value::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => {
                serializer.serialize_i64(*n as i64)
            }
            Value::Number(n) => serializer.serialize_f64(*n),
            other => serializer.collect_str(other),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match RawValue::deserialize(deserializer)? {
            RawValue::Bool(b) => Value::Boolean(b),
            RawValue::Int(i) => Value::Number(i as f64),
            RawValue::Float(n) => Value::Number(n),
            RawValue::Text(text) => Value::parse(&text),
        })
    }
}
