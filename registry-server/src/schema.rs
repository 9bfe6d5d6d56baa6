//! Structural validation of documents against the embedded JSON schemas.
//!
//! `Local` checks a whole submitted document, `Remote` checks only the
//! metadata service's `attributes` object as it will be published.

use ddo_registry_common::ValidationIssue;
use jsonschema::JSONSchema;
use serde_json::Value;

use crate::error::AppError;

const LOCAL_SCHEMA: &str = include_str!("../schemas/ddo-local.json");
const REMOTE_SCHEMA: &str = include_str!("../schemas/metadata-remote.json");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaMode {
    Local,
    Remote,
}

pub struct SchemaValidator {
    local: JSONSchema,
    remote: JSONSchema,
}

fn compile(name: &str, source: &str) -> Result<JSONSchema, AppError> {
    let value: Value = serde_json::from_str(source)
        .map_err(|e| AppError::Internal(format!("{name} schema is not valid JSON: {e}")))?;
    JSONSchema::compile(&value)
        .map_err(|e| AppError::Internal(format!("failed to compile {name} schema: {e}")))
}

impl SchemaValidator {
    pub fn new() -> Result<Self, AppError> {
        Ok(Self {
            local: compile("local", LOCAL_SCHEMA)?,
            remote: compile("remote", REMOTE_SCHEMA)?,
        })
    }

    fn schema(&self, mode: SchemaMode) -> &JSONSchema {
        match mode {
            SchemaMode::Local => &self.local,
            SchemaMode::Remote => &self.remote,
        }
    }

    pub fn is_valid(&self, mode: SchemaMode, instance: &Value) -> bool {
        self.schema(mode).is_valid(instance)
    }

    /// Every violation, each located by a `/`-joined path into `instance`.
    pub fn list_errors(&self, mode: SchemaMode, instance: &Value) -> Vec<ValidationIssue> {
        match self.schema(mode).validate(instance) {
            Ok(()) => Vec::new(),
            Err(errors) => errors
                .map(|err| ValidationIssue {
                    path: err
                        .instance_path
                        .to_string()
                        .trim_start_matches('/')
                        .to_string(),
                    message: err.to_string(),
                })
                .collect(),
        }
    }

    /// `Ok` when valid, otherwise [`AppError::Schema`] carrying every issue.
    pub fn check(&self, mode: SchemaMode, instance: &Value) -> Result<(), AppError> {
        if self.is_valid(mode, instance) {
            return Ok(());
        }
        Err(AppError::Schema(self.list_errors(mode, instance)))
    }
}
