//! Entry validation strategies
//!
//! A ledger is constructed with one [`EntryValidator`]. [`RequiredFields`]
//! is the minimal tier used when nothing else is supplied;
//! [`SchemaValidator`] checks each kind against a JSON Schema.

use crate::error::LedgerError;
use crate::record::EntryKind;
use jsonschema::JSONSchema;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

/// Decides whether `data` may be stored as an entry of `kind`
pub trait EntryValidator: Send + Sync + fmt::Debug {
    /// Problems found, empty when the data is acceptable
    fn problems(&self, kind: EntryKind, data: &Value) -> Vec<String>;

    /// Validate, turning problems into [`LedgerError::Validation`]
    ///
    /// # Errors
    /// Returns error if any problem was found
    fn validate(&self, kind: EntryKind, data: &Value) -> Result<(), LedgerError> {
        let problems = self.problems(kind, data);
        if problems.is_empty() {
            Ok(())
        } else {
            Err(LedgerError::Validation { kind, problems })
        }
    }
}

/// Data must be a JSON object holding the configured keys for its kind
#[derive(Debug, Clone, Default)]
pub struct RequiredFields {
    required: HashMap<EntryKind, Vec<String>>,
}

impl RequiredFields {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With required keys for one kind
    #[must_use]
    pub fn with_required<I, S>(mut self, kind: EntryKind, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required
            .entry(kind)
            .or_default()
            .extend(fields.into_iter().map(Into::into));
        self
    }
}

impl EntryValidator for RequiredFields {
    fn problems(&self, kind: EntryKind, data: &Value) -> Vec<String> {
        let Some(object) = data.as_object() else {
            return vec![format!("{kind} data must be a JSON object")];
        };
        self.required
            .get(&kind)
            .into_iter()
            .flatten()
            .filter(|field| !object.contains_key(field.as_str()))
            .map(|field| format!("missing required field `{field}`"))
            .collect()
    }
}

/// JSON Schema per kind; kinds without a schema fall back to
/// [`RequiredFields`]
pub struct SchemaValidator {
    schemas: HashMap<EntryKind, JSONSchema>,
    fallback: RequiredFields,
}

impl fmt::Debug for SchemaValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<_> = self.schemas.keys().copied().collect();
        kinds.sort();
        f.debug_struct("SchemaValidator")
            .field("kinds", &kinds)
            .field("fallback", &self.fallback)
            .finish()
    }
}

impl SchemaValidator {
    #[must_use]
    pub fn new() -> Self {
        Self {
            schemas: HashMap::new(),
            fallback: RequiredFields::new(),
        }
    }

    /// Register a schema for one kind
    ///
    /// # Errors
    /// Returns [`LedgerError::Schema`] if the schema does not compile
    pub fn with_schema(mut self, kind: EntryKind, schema: &Value) -> Result<Self, LedgerError> {
        let compiled = JSONSchema::compile(schema)
            .map_err(|e| LedgerError::Schema(format!("{kind}: {e}")))?;
        self.schemas.insert(kind, compiled);
        Ok(self)
    }

    /// Replace the validator used for kinds without a schema
    #[must_use]
    pub fn with_fallback(mut self, fallback: RequiredFields) -> Self {
        self.fallback = fallback;
        self
    }
}

impl Default for SchemaValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl EntryValidator for SchemaValidator {
    fn problems(&self, kind: EntryKind, data: &Value) -> Vec<String> {
        match self.schemas.get(&kind) {
            Some(schema) => match schema.validate(data) {
                Ok(()) => Vec::new(),
                Err(errors) => errors
                    .map(|e| {
                        let at = e.instance_path.to_string();
                        if at.is_empty() {
                            e.to_string()
                        } else {
                            format!("{at}: {e}")
                        }
                    })
                    .collect(),
            },
            None => self.fallback.problems(kind, data),
        }
    }
}
