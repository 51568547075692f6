//! Query definition and the criteria compiler that builds it.
//!
//! Criteria use the match-URL form `param[:modifier]=v1[,v2]&...`, where `param` is a
//! dotted JSON path into the record body (`name.family`) and `_id` means `id`.
//! Arrays along the path are searched element-wise.

use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

/// Page size used when callers don't configure one.
pub const DEFAULT_PAGE_SIZE: usize = 100;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Modifier {
    /// Case-insensitive (Unicode lowercase) equality against any listed value.
    Equals,
    /// Case-sensitive equality.
    Exact,
    /// Case-insensitive substring.
    Contains,
    /// `true`: no value at the path. `false`: at least one value.
    Missing(bool),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Predicate {
    pub path: Vec<String>,
    pub modifier: Modifier,
    pub values: Vec<String>,
}

/// Compiled filter + target type + page size. Consumed by one cursor.
#[derive(Clone, Debug, PartialEq)]
pub struct QuerySpec {
    pub record_type: String,
    pub predicates: Vec<Predicate>,
    pub page_size: usize,
}

impl QuerySpec {
    /// Unfiltered scan of `record_type`.
    pub fn all(record_type: impl Into<String>, page_size: usize) -> Self {
        Self { record_type: record_type.into(), predicates: Vec::new(), page_size: page_size.max(1) }
    }

    /// Compile an optional criteria string. `Err` carries a human-readable reason.
    pub fn compile(record_type: &str, criteria: Option<&str>, page_size: usize) -> Result<Self, String> {
        let mut spec = Self::all(record_type, page_size);
        let Some(raw) = criteria.map(str::trim).filter(|c| !c.is_empty()) else {
            return Ok(spec);
        };

        // Accept the full `Type?params` form when it names the same type. A `?` after
        // the first parameter has started belongs to a value.
        let raw = match raw.split_once('?') {
            Some((prefix, rest)) if is_type_name(prefix) => {
                if prefix != record_type {
                    return Err(format!("criteria targets {prefix}, not {record_type}"));
                }
                rest
            }
            _ => raw,
        };

        for segment in raw.split('&').map(str::trim).filter(|s| !s.is_empty()) {
            spec.predicates.push(parse_segment(segment)?);
        }
        Ok(spec)
    }

    pub fn is_unfiltered(&self) -> bool {
        self.predicates.is_empty()
    }

    /// All predicates must hold (logical AND across `&`).
    pub fn matches(&self, body: &Value) -> bool {
        self.predicates.iter().all(|p| p.matches(body))
    }
}

fn is_type_name(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphabetic())
}

fn segment_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^([A-Za-z_][A-Za-z0-9_\-]*(?:\.[A-Za-z_][A-Za-z0-9_\-]*)*)(?::([A-Za-z]+))?=(.*)$")
            .expect("static criteria regex")
    })
}

fn parse_segment(segment: &str) -> Result<Predicate, String> {
    let caps = segment_re()
        .captures(segment)
        .ok_or_else(|| format!("malformed parameter '{segment}'"))?;

    let path: Vec<String> = caps[1]
        .split('.')
        .map(|p| if p == "_id" { "id".to_string() } else { p.to_string() })
        .collect();

    let values: Vec<String> = caps[3]
        .split(',')
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect();

    let modifier = match caps.get(2).map(|m| m.as_str()) {
        None => Modifier::Equals,
        Some("exact") => Modifier::Exact,
        Some("contains") => Modifier::Contains,
        Some("missing") => match values.as_slice() {
            [v] if v == "true" => Modifier::Missing(true),
            [v] if v == "false" => Modifier::Missing(false),
            _ => return Err(format!("':missing' expects true or false in '{segment}'")),
        },
        Some(other) => return Err(format!("unsupported modifier ':{other}'")),
    };

    if values.is_empty() && !matches!(modifier, Modifier::Missing(_)) {
        return Err(format!("parameter '{}' has no value", &caps[1]));
    }

    Ok(Predicate { path, modifier, values })
}

impl Predicate {
    pub fn matches(&self, body: &Value) -> bool {
        let mut nodes = Vec::new();
        collect_nodes(body, &self.path, &mut nodes);

        match self.modifier {
            Modifier::Missing(want_missing) => nodes.iter().all(|n| n.is_null()) == want_missing,
            Modifier::Equals => {
                let wanted = self.lowered_values();
                scalars(&nodes).any(|l| {
                    let l = l.to_lowercase();
                    wanted.iter().any(|w| *w == l)
                })
            }
            Modifier::Exact => scalars(&nodes).any(|l| self.values.iter().any(|v| &l == v)),
            Modifier::Contains => {
                let wanted = self.lowered_values();
                scalars(&nodes).any(|l| {
                    let l = l.to_lowercase();
                    wanted.iter().any(|w| l.contains(w.as_str()))
                })
            }
        }
    }

    /// Case folding shared by the case-insensitive modifiers.
    fn lowered_values(&self) -> Vec<String> {
        self.values.iter().map(|v| v.to_lowercase()).collect()
    }
}

/// Walk `path`, fanning out over arrays, and collect the values found at its end.
fn collect_nodes<'v>(v: &'v Value, path: &[String], out: &mut Vec<&'v Value>) {
    if let Value::Array(items) = v {
        for item in items {
            collect_nodes(item, path, out);
        }
        return;
    }
    match path.split_first() {
        None => out.push(v),
        Some((head, rest)) => {
            if let Some(next) = v.get(head.as_str()) {
                collect_nodes(next, rest, out);
            }
        }
    }
}

fn scalars<'a>(nodes: &'a [&Value]) -> impl Iterator<Item = String> + 'a {
    nodes.iter().filter_map(|n| scalar_text(n))
}

fn scalar_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
