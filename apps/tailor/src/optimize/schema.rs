//! Shape validation of the generator's JSON against the résumé schema.
//!
//! Every violation is collected with its path (`contact.email`,
//! `experience[0].bullets[2]`) so one failure reports all broken fields.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::models::resume::ResumeDocument;

const MIN_PHONE_CHARS: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    pub path: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub violations: Vec<Violation>,
}

impl ValidationReport {
    fn push(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.violations.push(Violation {
            path: path.into(),
            message: message.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn paths(&self) -> Vec<&str> {
        self.violations.iter().map(|v| v.path.as_str()).collect()
    }

    pub fn mentions(&self, path: &str) -> bool {
        self.violations.iter().any(|v| v.path == path)
    }

    /// A report for output that could not be parsed as JSON at all.
    pub fn unparseable(detail: impl Into<String>) -> Self {
        let mut report = Self::default();
        report.push("$", format!("not valid JSON: {}", detail.into()));
        report
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .violations
            .iter()
            .map(|v| format!("{}: {}", v.path, v.message))
            .collect();
        write!(f, "{}", parts.join("; "))
    }
}

fn email_regex() -> &'static Regex {
    static EMAIL: OnceLock<Regex> = OnceLock::new();
    EMAIL.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9!#$%&'*+/=?^_`{|}~-]+(\.[A-Za-z0-9!#$%&'*+/=?^_`{|}~-]+)*@[A-Za-z0-9]([A-Za-z0-9-]*[A-Za-z0-9])?(\.[A-Za-z0-9]([A-Za-z0-9-]*[A-Za-z0-9])?)*\.[A-Za-z]{2,}$")
            .expect("email pattern compiles")
    })
}

pub fn is_valid_email(candidate: &str) -> bool {
    email_regex().is_match(candidate)
}

fn string_field<'a>(
    obj: &'a Map<String, Value>,
    key: &str,
    path: &str,
    report: &mut ValidationReport,
) -> Option<&'a str> {
    match obj.get(key) {
        None => {
            report.push(path, "required");
            None
        }
        Some(Value::String(s)) => Some(s),
        Some(other) => {
            report.push(path, format!("expected string, got {}", type_name(other)));
            None
        }
    }
}

fn string_list(obj: &Map<String, Value>, key: &str, path: &str, report: &mut ValidationReport) {
    match obj.get(key) {
        None => report.push(path, "required"),
        Some(Value::Array(items)) => {
            for (i, item) in items.iter().enumerate() {
                if !item.is_string() {
                    report.push(
                        format!("{path}[{i}]"),
                        format!("expected string, got {}", type_name(item)),
                    );
                }
            }
        }
        Some(other) => report.push(path, format!("expected array, got {}", type_name(other))),
    }
}

fn object_list<'a>(
    obj: &'a Map<String, Value>,
    key: &str,
    report: &mut ValidationReport,
) -> Vec<(String, &'a Map<String, Value>)> {
    match obj.get(key) {
        None => {
            report.push(key, "required");
            Vec::new()
        }
        Some(Value::Array(items)) => items
            .iter()
            .enumerate()
            .filter_map(|(i, item)| {
                let path = format!("{key}[{i}]");
                match item.as_object() {
                    Some(o) => Some((path, o)),
                    None => {
                        report.push(path, format!("expected object, got {}", type_name(item)));
                        None
                    }
                }
            })
            .collect(),
        Some(other) => {
            report.push(key, format!("expected array, got {}", type_name(other)));
            Vec::new()
        }
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Validates `value` and converts it to a [`ResumeDocument`], dropping unknown keys.
pub fn validate_resume(value: &Value) -> Result<ResumeDocument, ValidationReport> {
    let mut report = ValidationReport::default();

    let Some(root) = value.as_object() else {
        report.push("$", format!("expected object, got {}", type_name(value)));
        return Err(report);
    };

    if let Some(name) = string_field(root, "name", "name", &mut report) {
        if name.trim().is_empty() {
            report.push("name", "must not be empty");
        }
    }

    match root.get("contact") {
        None => report.push("contact", "required"),
        Some(Value::Object(contact)) => {
            if let Some(email) = string_field(contact, "email", "contact.email", &mut report) {
                if !is_valid_email(email.trim()) {
                    report.push("contact.email", "invalid email");
                }
            }
            if let Some(phone) = string_field(contact, "phone", "contact.phone", &mut report) {
                if phone.trim().chars().count() < MIN_PHONE_CHARS {
                    report.push(
                        "contact.phone",
                        format!("must be at least {MIN_PHONE_CHARS} characters"),
                    );
                }
            }
        }
        Some(other) => report.push(
            "contact",
            format!("expected object, got {}", type_name(other)),
        ),
    }

    string_field(root, "summary", "summary", &mut report);

    for (path, job) in object_list(root, "experience", &mut report) {
        for key in ["title", "company", "dates"] {
            string_field(job, key, &format!("{path}.{key}"), &mut report);
        }
        string_list(job, "bullets", &format!("{path}.bullets"), &mut report);
    }

    for (path, edu) in object_list(root, "education", &mut report) {
        for key in ["degree", "school", "dates"] {
            string_field(edu, key, &format!("{path}.{key}"), &mut report);
        }
    }

    string_list(root, "skills", "skills", &mut report);

    if !report.is_empty() {
        return Err(report);
    }

    serde_json::from_value(value.clone()).map_err(|e| {
        let mut report = ValidationReport::default();
        report.push("$", e.to_string());
        report
    })
}
