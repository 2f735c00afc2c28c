//! Static field reference extraction
//!
//! Walks a `ProposedOperation` and records every field path it reads or
//! writes, tagged with where it was found. Pipelines are scanned stage by
//! stage; unknown stages fall back to a scan for `"$field"` expression
//! strings. Documents pulled in by `$lookup`, `$graphLookup` and
//! `$unionWith` are recorded as joins so the foreign collection's grant
//! can be checked and its restricted fields redacted under the join path.
//! `$$ROOT` and `$$CURRENT` on their own reference the whole document.

use crate::authorizer::FieldLocation;
use crate::operation::{projection_value_includes, ProposedOperation};
use serde_json::{Map, Value};

const LOGICAL_OPERATORS: [&str; 3] = ["$and", "$or", "$nor"];

const DOCUMENT_VARIABLES: [&str; 2] = ["$$ROOT", "$$CURRENT"];

/// Field paths and foreign collections referenced by an operation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldRefs {
    /// Field path with the location it was found in
    pub paths: Vec<(String, FieldLocation)>,
    /// Paths read as `"$path"` expression values; the subtree may be copied
    /// under another name
    pub expressions: Vec<String>,
    /// Collections read through `$lookup`, `$graphLookup`, `$unionWith`
    pub foreign: Vec<String>,
    /// Foreign documents merged into the results
    pub joins: Vec<Join>,
    /// `$$ROOT` or `$$CURRENT` used as a value
    pub whole_document: bool,
}

/// Documents from another collection merged into the results
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Join {
    /// Foreign collection
    pub collection: String,
    /// Field the documents are embedded under; `None` for `$unionWith`,
    /// which appends them at the top level
    pub path: Option<String>,
    /// References made by the join's sub-pipeline, against the foreign
    /// collection
    pub refs: FieldRefs,
}

impl FieldRefs {
    /// Collect references from an operation
    #[must_use]
    pub fn collect(op: &ProposedOperation) -> Self {
        let mut refs = Self::default();

        refs.filter(&op.query, FieldLocation::Filter);

        if let Some(projection) = &op.projection {
            refs.projection(projection, FieldLocation::Projection);
        }
        if let Some(sort) = &op.sort {
            refs.keys(sort, FieldLocation::Sort);
        }
        for stage in &op.pipeline {
            refs.stage(stage);
        }
        match &op.document {
            Some(Value::Array(docs)) => {
                for doc in docs {
                    if let Value::Object(map) = doc {
                        refs.keys(map, FieldLocation::Document);
                    }
                }
            }
            Some(Value::Object(map)) => refs.keys(map, FieldLocation::Document),
            _ => {}
        }
        if let Some(update) = &op.update {
            refs.update(update);
        }

        refs
    }

    /// Whether a path was recorded
    #[must_use]
    pub fn contains(&self, path: &str) -> bool {
        self.paths.iter().any(|(p, _)| p == path)
    }

    fn push(&mut self, path: &str, location: FieldLocation) {
        let path = path.trim_start_matches('$');
        if path.is_empty() || path.starts_with('$') {
            return;
        }
        if !self.paths.iter().any(|(p, l)| p == path && *l == location) {
            self.paths.push((path.to_string(), location));
        }
    }

    fn keys(&mut self, map: &Map<String, Value>, location: FieldLocation) {
        for key in map.keys() {
            if !key.starts_with('$') {
                self.push(key, location);
            }
        }
    }

    fn filter(&mut self, filter: &Map<String, Value>, location: FieldLocation) {
        for (key, value) in filter {
            if LOGICAL_OPERATORS.contains(&key.as_str()) {
                if let Value::Array(clauses) = value {
                    for clause in clauses {
                        if let Value::Object(map) = clause {
                            self.filter(map, location);
                        }
                    }
                }
                continue;
            }
            if key.starts_with('$') {
                // $expr and friends
                self.expression(value, location);
                continue;
            }

            self.push(key, location);
            if let Value::Object(ops) = value {
                if let Some(Value::Object(inner)) = ops.get("$elemMatch") {
                    for (sub, _) in inner.iter().filter(|(k, _)| !k.starts_with('$')) {
                        self.push(&format!("{key}.{sub}"), location);
                    }
                }
            }
        }
    }

    fn projection(&mut self, projection: &Map<String, Value>, location: FieldLocation) {
        for (key, value) in projection {
            // Excluded fields are not exposed
            if projection_value_includes(value) {
                self.push(key, location);
            }
            if !matches!(value, Value::Bool(_) | Value::Number(_)) {
                self.expression(value, location);
            }
        }
    }

    fn update(&mut self, update: &Map<String, Value>) {
        for (key, value) in update {
            match value {
                Value::Object(fields) if key.starts_with('$') => {
                    self.keys(fields, FieldLocation::Update);
                    self.expression(value, FieldLocation::Update);
                }
                _ if !key.starts_with('$') => self.push(key, FieldLocation::Update),
                _ => {}
            }
        }
    }

    fn stage(&mut self, stage: &Value) {
        let Value::Object(stage) = stage else {
            return;
        };
        let loc = FieldLocation::Pipeline;

        for (name, body) in stage {
            match (name.as_str(), body) {
                ("$match", Value::Object(filter)) => self.filter(filter, loc),
                ("$project" | "$addFields" | "$set", Value::Object(spec)) => {
                    self.projection(spec, loc);
                }
                ("$sort", Value::Object(spec)) => self.keys(spec, loc),
                ("$unwind", Value::String(path)) => self.push(path, loc),
                ("$unwind", Value::Object(spec)) => {
                    if let Some(Value::String(path)) = spec.get("path") {
                        self.push(path, loc);
                    }
                }
                ("$lookup" | "$graphLookup", Value::Object(spec)) => {
                    for key in ["localField", "startWith", "connectToField", "connectFromField"] {
                        if let Some(Value::String(field)) = spec.get(key) {
                            self.push(field, loc);
                        }
                    }
                    if let Some(Value::Object(vars)) = spec.get("let") {
                        for value in vars.values() {
                            self.expression(value, loc);
                        }
                    }
                    if let Some(Value::String(from)) = spec.get("from") {
                        let path = spec.get("as").and_then(Value::as_str).map(str::to_string);
                        self.join(from, path, spec.get("pipeline"));
                    }
                }
                ("$unionWith", Value::String(coll)) => self.join(coll, None, None),
                ("$unionWith", Value::Object(spec)) => {
                    if let Some(Value::String(coll)) = spec.get("coll") {
                        self.join(coll, None, spec.get("pipeline"));
                    }
                }
                _ => self.expression(body, loc),
            }
        }
    }

    fn join(&mut self, collection: &str, path: Option<String>, pipeline: Option<&Value>) {
        // Sub-pipeline runs against the foreign collection
        let mut refs = FieldRefs::default();
        if let Some(Value::Array(stages)) = pipeline {
            for stage in stages {
                refs.stage(stage);
            }
        }
        self.foreign.push(collection.to_string());
        self.foreign.extend(refs.foreign.iter().cloned());
        self.joins.push(Join {
            collection: collection.to_string(),
            path,
            refs,
        });
    }

    /// Record `"$path"` strings
    ///
    /// `$$ROOT.a` and `$$CURRENT.a` read `a`; other `$$var` variables are
    /// skipped.
    fn expression(&mut self, value: &Value, location: FieldLocation) {
        match value {
            Value::String(s) if s.starts_with("$$") => {
                for var in DOCUMENT_VARIABLES {
                    if s == var {
                        self.whole_document = true;
                    } else if let Some(path) = s.strip_prefix(var).and_then(|p| p.strip_prefix('.')) {
                        self.push(path, location);
                        self.expressions.push(path.to_string());
                    }
                }
            }
            Value::String(s) if s.starts_with('$') => {
                self.push(s, location);
                self.expressions.push(s.trim_start_matches('$').to_string());
            }
            Value::Array(items) => {
                for item in items {
                    self.expression(item, location);
                }
            }
            Value::Object(map) => {
                for item in map.values() {
                    self.expression(item, location);
                }
            }
            _ => {}
        }
    }
}
