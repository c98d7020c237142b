//! Path-expression evaluation over loosely-typed JSON documents.
//!
//! Provider metadata and advisories arrive as free-form JSON. This module
//! compiles simple path queries (`$.distributions[*].directory_url`) and
//! extracts typed values from matched locations. Compilation errors are
//! surfaced; evaluation misses are non-errors and yield "no match".

use crate::error::{MirrorError, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::collections::hash_map::Entry;

/// One step of a compiled path expression.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Step {
    /// Descend into an object field.
    Field(String),
    /// Descend into every element of an array.
    Wildcard,
}

/// A compiled path expression.
#[derive(Debug, Clone)]
pub struct PathExpr {
    steps: Vec<Step>,
}

impl PathExpr {
    /// Compile an expression of the form `$.field.nested[*].leaf`.
    pub fn compile(expr: &str) -> Result<Self> {
        let mut rest = expr.strip_prefix('$').ok_or_else(|| {
            MirrorError::path_expr(format!("expression must start with '$': '{expr}'"))
        })?;

        let mut steps = Vec::new();
        while !rest.is_empty() {
            if let Some(tail) = rest.strip_prefix("[*]") {
                steps.push(Step::Wildcard);
                rest = tail;
            } else if let Some(tail) = rest.strip_prefix('.') {
                let end = tail.find(['.', '[']).unwrap_or(tail.len());
                let field = &tail[..end];
                if field.is_empty() {
                    return Err(MirrorError::path_expr(format!(
                        "empty field name in expression '{expr}'"
                    )));
                }
                steps.push(Step::Field(field.to_string()));
                rest = &tail[end..];
            } else {
                return Err(MirrorError::path_expr(format!(
                    "unexpected token at '{rest}' in expression '{expr}'"
                )));
            }
        }
        Ok(Self { steps })
    }

    /// Evaluate against a document, returning all matched values.
    pub fn eval<'a>(&self, doc: &'a Value) -> Vec<&'a Value> {
        let mut current = vec![doc];
        for step in &self.steps {
            let mut next = Vec::new();
            for value in current {
                match step {
                    Step::Field(name) => {
                        if let Some(matched) = value.get(name) {
                            next.push(matched);
                        }
                    }
                    Step::Wildcard => {
                        if let Value::Array(items) = value {
                            next.extend(items.iter());
                        }
                    }
                }
            }
            if next.is_empty() {
                return next;
            }
            current = next;
        }
        current
    }
}

/// A path evaluator with a compilation cache.
///
/// Workers evaluate the same handful of expressions against every advisory;
/// the cache keeps that from recompiling per document.
#[derive(Debug, Default)]
pub struct PathEval {
    cache: HashMap<String, PathExpr>,
}

impl PathEval {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile an expression, reusing a cached compilation if present.
    pub fn compile(&mut self, expr: &str) -> Result<&PathExpr> {
        match self.cache.entry(expr.to_string()) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => Ok(entry.insert(PathExpr::compile(expr)?)),
        }
    }

    /// Evaluate an expression, returning all matched values.
    pub fn eval<'a>(&mut self, expr: &str, doc: &'a Value) -> Result<Vec<&'a Value>> {
        let compiled = self.compile(expr)?;
        Ok(compiled.eval(doc))
    }

    /// Extract the first match as a string. Misses yield `None`.
    pub fn extract_string(&mut self, expr: &str, doc: &Value) -> Result<Option<String>> {
        match self.eval(expr, doc)?.first() {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(other) => Err(MirrorError::path_expr(format!(
                "'{expr}' matched a non-string value: {other}"
            ))),
        }
    }

    /// Extract the first match as a boolean. Misses yield `None`.
    pub fn extract_bool(&mut self, expr: &str, doc: &Value) -> Result<Option<bool>> {
        match self.eval(expr, doc)?.first() {
            None => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(*b)),
            Some(other) => Err(MirrorError::path_expr(format!(
                "'{expr}' matched a non-boolean value: {other}"
            ))),
        }
    }

    /// Extract the first match as an RFC 3339 timestamp. Misses yield `None`.
    pub fn extract_time(&mut self, expr: &str, doc: &Value) -> Result<Option<DateTime<Utc>>> {
        match self.extract_string(expr, doc)? {
            None => Ok(None),
            Some(raw) => {
                let parsed = DateTime::parse_from_rfc3339(&raw)?;
                Ok(Some(parsed.with_timezone(&Utc)))
            }
        }
    }

    /// Re-deserialize the first match into a typed structure. Misses yield
    /// `None`.
    pub fn extract<T: DeserializeOwned>(&mut self, expr: &str, doc: &Value) -> Result<Option<T>> {
        match self.eval(expr, doc)?.first() {
            None => Ok(None),
            Some(value) => Ok(Some(serde_json::from_value((*value).clone())?)),
        }
    }

    /// Collect every string found in the matched subtrees.
    pub fn extract_string_tree(&mut self, expr: &str, doc: &Value) -> Result<Vec<String>> {
        let mut found = Vec::new();
        for value in self.eval(expr, doc)? {
            collect_strings(value, &mut found);
        }
        Ok(found)
    }
}

fn collect_strings(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(s) => out.push(s.clone()),
        Value::Array(items) => {
            for item in items {
                collect_strings(item, out);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_compile_rejects_bad_expressions() {
        assert!(PathExpr::compile("distributions").is_err());
        assert!(PathExpr::compile("$..oops").is_err());
        assert!(PathExpr::compile("$[3]").is_err());
    }

    #[test]
    fn test_eval_wildcard() {
        let doc = json!({
            "distributions": [
                {"rolie": {"feeds": [{"url": "a"}]}},
                {"directory_url": "https://p.test/adv"},
            ]
        });
        let expr = PathExpr::compile("$.distributions[*].directory_url").unwrap();
        let matches = expr.eval(&doc);
        assert_eq!(matches, vec![&json!("https://p.test/adv")]);
    }

    #[test]
    fn test_miss_is_not_an_error() {
        let mut eval = PathEval::new();
        let doc = json!({"a": 1});
        assert_eq!(eval.extract_string("$.missing", &doc).unwrap(), None);
        assert!(eval.eval("$.a.b.c", &doc).unwrap().is_empty());
    }

    #[test]
    fn test_extract_typed() {
        let mut eval = PathEval::new();
        let doc = json!({
            "mirror_on_CSAF_aggregators": true,
            "last_updated": "2024-02-01T00:00:00Z",
            "publisher": {"category": "vendor", "name": "ACME", "namespace": "https://acme.example"},
        });

        assert_eq!(
            eval.extract_bool("$.mirror_on_CSAF_aggregators", &doc)
                .unwrap(),
            Some(true)
        );
        let updated = eval.extract_time("$.last_updated", &doc).unwrap().unwrap();
        assert_eq!(updated.to_rfc3339(), "2024-02-01T00:00:00+00:00");

        #[derive(serde::Deserialize)]
        struct P {
            name: String,
        }
        let p: P = eval.extract("$.publisher", &doc).unwrap().unwrap();
        assert_eq!(p.name, "ACME");
    }

    #[test]
    fn test_type_mismatch_is_an_error() {
        let mut eval = PathEval::new();
        let doc = json!({"flag": "yes"});
        assert!(eval.extract_bool("$.flag", &doc).is_err());
    }

    #[test]
    fn test_string_tree() {
        let mut eval = PathEval::new();
        let doc = json!({
            "branches": [
                {"tags": ["stable", ["lts", "esr"]]},
                {"tags": "single"},
            ]
        });
        let strings = eval
            .extract_string_tree("$.branches[*].tags", &doc)
            .unwrap();
        assert_eq!(strings, vec!["stable", "lts", "esr", "single"]);
    }

    #[test]
    fn test_invalid_time_is_an_error() {
        let mut eval = PathEval::new();
        let doc = json!({"last_updated": "yesterday"});
        assert!(eval.extract_time("$.last_updated", &doc).is_err());
    }
}
