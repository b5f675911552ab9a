//! Field cleaning
//!
//! Validates and coerces raw subscriber input against a field's schema.
//! The transition engine only sees the [`FieldCleaner`] trait; the built-in
//! [`TypedFieldCleaner`] covers the field kinds a menu document can declare.

use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

const REQUIRED_MESSAGE: &str = "This field is required.";

/// Value type a field collects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    #[default]
    Text,
    Integer,
    Decimal,
    Date,
}

/// Everything a cleaner needs to know about the field being answered
#[derive(Debug, Clone, Default)]
pub struct FieldRules {
    pub name: String,
    pub kind: FieldKind,
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
    pub pattern: Option<Regex>,
}

/// A cleaned, typed answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Text(String),
    Integer(i64),
    Decimal(f64),
    Date(NaiveDate),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Text(s) => write!(f, "{s}"),
            FieldValue::Integer(i) => write!(f, "{i}"),
            FieldValue::Decimal(d) => write!(f, "{d}"),
            FieldValue::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
        }
    }
}

/// Structured validation failure; messages are shown to the subscriber
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}", messages.join("; "))]
pub struct ValidationError {
    pub messages: Vec<String>,
}

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            messages: vec![message.into()],
        }
    }

    /// Messages joined one per line, ready to prefix a screen
    pub fn joined(&self) -> String {
        self.messages.join("\n")
    }
}

/// Validates raw input for a field
pub trait FieldCleaner: Send + Sync {
    fn clean(&self, raw: &str, rules: &FieldRules) -> Result<FieldValue, ValidationError>;
}

/// Cleaner for the built-in field kinds
#[derive(Debug, Clone, Copy, Default)]
pub struct TypedFieldCleaner;

impl FieldCleaner for TypedFieldCleaner {
    fn clean(&self, raw: &str, rules: &FieldRules) -> Result<FieldValue, ValidationError> {
        let value = raw.trim();
        if value.is_empty() {
            return Err(ValidationError::new(REQUIRED_MESSAGE));
        }

        match rules.kind {
            FieldKind::Text => clean_text(value, rules),
            FieldKind::Integer => clean_integer(value),
            FieldKind::Decimal => clean_decimal(value),
            FieldKind::Date => clean_date(value),
        }
    }
}

fn clean_text(value: &str, rules: &FieldRules) -> Result<FieldValue, ValidationError> {
    let mut messages = Vec::new();
    let length = value.chars().count();

    if let Some(min) = rules.min_length {
        if length < min {
            messages.push(format!(
                "Ensure this value has at least {min} characters (it has {length})."
            ));
        }
    }
    if let Some(max) = rules.max_length {
        if length > max {
            messages.push(format!(
                "Ensure this value has at most {max} characters (it has {length})."
            ));
        }
    }
    if let Some(pattern) = &rules.pattern {
        if !pattern.is_match(value) {
            messages.push("Enter a valid value.".to_string());
        }
    }

    if messages.is_empty() {
        Ok(FieldValue::Text(value.to_string()))
    } else {
        Err(ValidationError { messages })
    }
}

fn clean_integer(value: &str) -> Result<FieldValue, ValidationError> {
    let digits = value.strip_prefix(['-', '+']).unwrap_or(value);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ValidationError::new("Enter a whole number."));
    }
    value
        .parse::<i64>()
        .map(FieldValue::Integer)
        .map_err(|_| ValidationError::new("Enter a whole number."))
}

fn clean_decimal(value: &str) -> Result<FieldValue, ValidationError> {
    // Reject forms str::parse accepts but a subscriber never means: inf, nan, 1e5
    let plain = value
        .strip_prefix(['-', '+'])
        .unwrap_or(value)
        .bytes()
        .all(|b| b.is_ascii_digit() || b == b'.');
    if !plain {
        return Err(ValidationError::new("Enter a number."));
    }
    value
        .parse::<f64>()
        .map(FieldValue::Decimal)
        .map_err(|_| ValidationError::new("Enter a number."))
}

fn clean_date(value: &str) -> Result<FieldValue, ValidationError> {
    NaiveDate::parse_from_str(value, "%d/%m/%Y")
        .or_else(|_| NaiveDate::parse_from_str(value, "%Y-%m-%d"))
        .map(FieldValue::Date)
        .map_err(|_| ValidationError::new("Enter a valid date (DD/MM/YYYY)."))
}
