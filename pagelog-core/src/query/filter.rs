//! Log filter predicates

use crate::{Document, LogsError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Predicate over log documents
#[derive(Debug, Clone)]
pub enum Filter {
    /// Severity code equals
    Level(i32),
    /// Trace id equals
    Trace(String),
    /// Regex matches somewhere in the body
    Regex(Regex),
    And(Box<Filter>, Box<Filter>),
    Or(Box<Filter>, Box<Filter>),
}

impl Filter {
    pub fn level(code: i32) -> Self {
        Filter::Level(code)
    }

    pub fn trace(id: impl Into<String>) -> Self {
        Filter::Trace(id.into())
    }

    /// Compile a regex filter
    pub fn regex(pattern: &str) -> Result<Self> {
        Regex::new(pattern)
            .map(Filter::Regex)
            .map_err(|e| LogsError::InvalidFilter(format!("Bad regex {:?}: {}", pattern, e)))
    }

    pub fn and(left: Filter, right: Filter) -> Self {
        Filter::And(Box::new(left), Box::new(right))
    }

    pub fn or(left: Filter, right: Filter) -> Self {
        Filter::Or(Box::new(left), Box::new(right))
    }

    /// Exact evaluation against one document
    pub fn matches(&self, doc: &Document) -> bool {
        match self {
            Filter::Level(code) => doc.level == *code,
            Filter::Trace(id) => doc.trace_id.as_deref() == Some(id.as_str()),
            Filter::Regex(re) => re.is_match(&doc.body),
            Filter::And(left, right) => left.matches(doc) && right.matches(doc),
            Filter::Or(left, right) => left.matches(doc) || right.matches(doc),
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::Level(code) => write!(f, "level={}", code),
            Filter::Trace(id) => write!(f, "trace={}", id),
            Filter::Regex(re) => write!(f, "body~/{}/", re.as_str()),
            Filter::And(l, r) => write!(f, "({} AND {})", l, r),
            Filter::Or(l, r) => write!(f, "({} OR {})", l, r),
        }
    }
}

/// Filter kind tag of the wire shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FilterKind {
    Level,
    Trace,
    Regex,
    And,
    Or,
}

/// Wire shape of a filter as received from query clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterSpec {
    pub kind: FilterKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regex: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub left: Option<Box<FilterSpec>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub right: Option<Box<FilterSpec>>,
}

impl TryFrom<FilterSpec> for Filter {
    type Error = LogsError;

    fn try_from(spec: FilterSpec) -> Result<Self> {
        match spec.kind {
            FilterKind::Level => spec
                .level_code
                .map(Filter::Level)
                .ok_or_else(|| missing("LEVEL", "levelCode")),
            FilterKind::Trace => spec
                .trace_id
                .map(Filter::Trace)
                .ok_or_else(|| missing("TRACE", "traceId")),
            FilterKind::Regex => {
                let pattern = spec.regex.ok_or_else(|| missing("REGEX", "regex"))?;
                Filter::regex(&pattern)
            }
            FilterKind::And | FilterKind::Or => {
                let name = if spec.kind == FilterKind::And { "AND" } else { "OR" };
                let left = Filter::try_from(*spec.left.ok_or_else(|| missing(name, "left"))?)?;
                let right = Filter::try_from(*spec.right.ok_or_else(|| missing(name, "right"))?)?;
                Ok(if spec.kind == FilterKind::And {
                    Filter::and(left, right)
                } else {
                    Filter::or(left, right)
                })
            }
        }
    }
}

impl From<&Filter> for FilterSpec {
    fn from(filter: &Filter) -> Self {
        let bare = |kind| FilterSpec {
            kind,
            level_code: None,
            trace_id: None,
            regex: None,
            left: None,
            right: None,
        };
        match filter {
            Filter::Level(code) => FilterSpec {
                level_code: Some(*code),
                ..bare(FilterKind::Level)
            },
            Filter::Trace(id) => FilterSpec {
                trace_id: Some(id.clone()),
                ..bare(FilterKind::Trace)
            },
            Filter::Regex(re) => FilterSpec {
                regex: Some(re.as_str().to_string()),
                ..bare(FilterKind::Regex)
            },
            Filter::And(l, r) => FilterSpec {
                left: Some(Box::new(l.as_ref().into())),
                right: Some(Box::new(r.as_ref().into())),
                ..bare(FilterKind::And)
            },
            Filter::Or(l, r) => FilterSpec {
                left: Some(Box::new(l.as_ref().into())),
                right: Some(Box::new(r.as_ref().into())),
                ..bare(FilterKind::Or)
            },
        }
    }
}

fn missing(kind: &str, field: &str) -> LogsError {
    LogsError::InvalidFilter(format!("{} filter requires {}", kind, field))
}
