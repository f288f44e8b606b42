//! Register, unregister, activate and list extensions of any kind.
//!
//! [`ExtensionRegistry`] borrows a store connection for one
//! [`ExtensionKind`]. Every write happens inside a single SQLite transaction
//! that is dropped (rolled back) on the first error.

use std::path::Path;

use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, OptionalExtension, Transaction, params, params_from_iter};
use serde_json::{Map, Value};
use similar::TextDiff;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{RegistryError, RegistryResult};
use crate::kind::{
    Activation, ColumnDefault, Derivation, ExtensionKind, FieldShape, FieldSpec, KeyStrategy,
    KindSchema,
};
use crate::source::{SourceOptions, load_source, value_kind};

/// One stored extension row.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtensionRecord {
    pub kind: ExtensionKind,
    pub key: String,
    /// Every non-key column, `Value::Null` for SQL NULL.
    pub fields: Map<String, Value>,
}

impl ExtensionRecord {
    fn seeded(kind: ExtensionKind, key: String) -> Self {
        let mut fields = Map::new();
        for field in kind.schema().fields {
            let value = match field.default {
                Some(ColumnDefault::Bool(value)) => Value::Bool(value),
                Some(ColumnDefault::Integer(value)) => Value::from(value),
                None => Value::Null,
            };
            fields.insert(field.name.to_string(), value);
        }
        Self { kind, key, fields }
    }

    pub fn name(&self) -> &str {
        let schema = self.kind.schema();
        if schema.name_is_key() {
            return &self.key;
        }
        self.fields
            .get(schema.name_field)
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    /// Activation state, `None` for kinds that cannot be toggled.
    pub fn active(&self) -> Option<bool> {
        match self.kind.schema().activation? {
            Activation::ConfigFlag { field, flag } => Some(
                self.fields
                    .get(field)
                    .and_then(|config| config.get(flag))
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
            ),
            Activation::Column { field } => Some(
                self.fields
                    .get(field)
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
            ),
        }
    }

    /// Key plus every field as a JSON object.
    pub fn to_json(&self) -> Value {
        let mut object = Map::new();
        object.insert(
            self.kind.schema().key_field.to_string(),
            Value::String(self.key.clone()),
        );
        for (name, value) in &self.fields {
            object.insert(name.clone(), value.clone());
        }
        Value::Object(object)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterAction {
    Insert,
    Update,
}

impl RegisterAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Update => "update",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RegisterReport {
    pub kind: ExtensionKind,
    pub action: RegisterAction,
    pub key: String,
    pub name: String,
}

/// Outcome of a registration that was computed but not persisted.
#[derive(Debug, Clone)]
pub struct RegisterPlan {
    pub kind: ExtensionKind,
    pub action: RegisterAction,
    pub existing: Option<ExtensionRecord>,
    pub proposed: ExtensionRecord,
}

impl RegisterPlan {
    /// Unified line diff of the stored record against the proposed one.
    pub fn render_diff(&self) -> String {
        let before = self
            .existing
            .as_ref()
            .map(|record| format!("{:#}\n", record.to_json()))
            .unwrap_or_default();
        let after = format!("{:#}\n", self.proposed.to_json());
        let diff = TextDiff::from_lines(&before, &after);
        let label = format!("{}/{}", self.kind, self.proposed.name());
        diff.unified_diff()
            .context_radius(3)
            .header(&format!("stored:{label}"), &format!("proposed:{label}"))
            .to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationReport {
    pub name: String,
    pub active: bool,
    pub changed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedExtension {
    pub name: String,
    pub key: String,
    pub active: Option<bool>,
}

pub struct ExtensionRegistry<'conn> {
    connection: &'conn mut Connection,
    kind: ExtensionKind,
    source_options: SourceOptions,
}

impl<'conn> ExtensionRegistry<'conn> {
    pub fn new(
        connection: &'conn mut Connection,
        kind: ExtensionKind,
        source_options: SourceOptions,
    ) -> Self {
        Self {
            connection,
            kind,
            source_options,
        }
    }

    pub fn kind(&self) -> ExtensionKind {
        self.kind
    }

    /// Load `source` and insert (or, with `overwrite`, replace) the record it describes.
    pub fn register(&mut self, source: &Path, overwrite: bool) -> RegistryResult<RegisterReport> {
        let definition = load_source(source, &self.source_options)?;
        let transaction = self.connection.transaction()?;
        let plan = build_plan(&transaction, self.kind, source, definition, overwrite)?;
        persist(&transaction, &plan)?;
        transaction.commit()?;

        let report = RegisterReport {
            kind: self.kind,
            action: plan.action,
            key: plan.proposed.key.clone(),
            name: plan.proposed.name().to_string(),
        };
        info!(
            kind = %report.kind,
            name = %report.name,
            key = %report.key,
            action = report.action.as_str(),
            "registered extension"
        );
        Ok(report)
    }

    /// Compute what `register` would do without writing anything.
    pub fn plan_register(&mut self, source: &Path, overwrite: bool) -> RegistryResult<RegisterPlan> {
        let definition = load_source(source, &self.source_options)?;
        let transaction = self.connection.transaction()?;
        let plan = build_plan(&transaction, self.kind, source, definition, overwrite)?;
        transaction.rollback()?;
        Ok(plan)
    }

    pub fn unregister(&mut self, name: &str) -> RegistryResult<ExtensionRecord> {
        let schema = self.kind.schema();
        let transaction = self.connection.transaction()?;
        let record = find_by_name(&transaction, self.kind, name)?;
        transaction.execute(
            &format!(
                "DELETE FROM {} WHERE {} = ?1",
                schema.table, schema.key_field
            ),
            params![record.key],
        )?;
        transaction.commit()?;
        info!(kind = %self.kind, name, key = %record.key, "unregistered extension");
        Ok(record)
    }

    pub fn set_active(&mut self, name: &str, active: bool) -> RegistryResult<ActivationReport> {
        let schema = self.kind.schema();
        let Some(activation) = schema.activation else {
            return Err(RegistryError::UnsupportedOperation {
                kind: self.kind,
                operation: if active { "activate" } else { "deactivate" },
            });
        };

        let transaction = self.connection.transaction()?;
        let record = find_by_name(&transaction, self.kind, name)?;
        let (field, stored, changed) = match activation {
            Activation::ConfigFlag { field, flag } => {
                let mut config = match record.fields.get(field) {
                    None | Some(Value::Null) => Map::new(),
                    Some(Value::Object(map)) => map.clone(),
                    Some(other) => {
                        return Err(RegistryError::validation(
                            self.kind,
                            format!(
                                "`{field}` of {name} must be a mapping to hold `{flag}`, found {}",
                                value_kind(other)
                            ),
                        ));
                    }
                };
                let changed = config.get(flag) != Some(&Value::Bool(active));
                config.insert(flag.to_string(), Value::Bool(active));
                (field, Value::Object(config), changed)
            }
            Activation::Column { field } => {
                let changed = record.fields.get(field) != Some(&Value::Bool(active));
                (field, Value::Bool(active), changed)
            }
        };

        if changed {
            let spec = schema
                .field(field)
                .ok_or_else(|| RegistryError::validation(self.kind, format!("unknown field `{field}`")))?;
            transaction.execute(
                &format!(
                    "UPDATE {} SET {field} = ?1 WHERE {} = ?2",
                    schema.table, schema.key_field
                ),
                params![to_sql(spec, &stored)?, record.key],
            )?;
        }
        transaction.commit()?;

        debug!(kind = %self.kind, name, active, changed, "activation updated");
        Ok(ActivationReport {
            name: record.name().to_string(),
            active,
            changed,
        })
    }

    pub fn list(&self) -> RegistryResult<Vec<ListedExtension>> {
        let records = fetch_records(&*self.connection, self.kind, None)?;
        Ok(records
            .into_iter()
            .map(|record| ListedExtension {
                name: record.name().to_string(),
                key: record.key.clone(),
                active: record.active(),
            })
            .collect())
    }

    pub fn get(&self, name: &str) -> RegistryResult<ExtensionRecord> {
        find_by_name(&*self.connection, self.kind, name)
    }
}

fn build_plan(
    transaction: &Transaction<'_>,
    kind: ExtensionKind,
    source: &Path,
    mut definition: Map<String, Value>,
    overwrite: bool,
) -> RegistryResult<RegisterPlan> {
    let schema = kind.schema();
    let (mut key, generated) = take_key(kind, &mut definition)?;

    if generated
        && overwrite
        && let Some(name) = definition.get(schema.name_field).and_then(Value::as_str)
        && let Some(existing) = find_optional_by_name(transaction, kind, name)?
    {
        debug!(%kind, name, key = %existing.key, "reusing key of existing record");
        key = existing.key;
    }

    let existing = fetch_records(transaction, kind, Some(&key))?.pop();
    let (action, mut proposed) = match &existing {
        Some(_) if !overwrite => {
            return Err(RegistryError::DuplicateKey {
                kind,
                field: schema.key_field,
                value: key,
            });
        }
        Some(record) => (RegisterAction::Update, record.clone()),
        None => (RegisterAction::Insert, ExtensionRecord::seeded(kind, key)),
    };

    apply_derivations(schema, source, &mut definition);
    for (name, value) in definition {
        let Some(spec) = schema.field(&name) else {
            warn!(%kind, field = %name, "ignoring field unknown to this extension kind");
            continue;
        };
        let value = check_shape(kind, spec, value)?;
        proposed.fields.insert(name, value);
    }

    for spec in schema.fields.iter().filter(|spec| spec.required) {
        if proposed.fields.get(spec.name).is_none_or(Value::is_null) {
            return Err(RegistryError::validation(
                kind,
                format!("missing required field `{}`", spec.name),
            ));
        }
    }

    if !schema.name_is_key() {
        let name = proposed.name().to_string();
        let clash: Option<String> = transaction
            .query_row(
                &format!(
                    "SELECT {key} FROM {table} WHERE {name_field} = ?1 AND {key} <> ?2",
                    key = schema.key_field,
                    table = schema.table,
                    name_field = schema.name_field,
                ),
                params![name, proposed.key],
                |row| row.get(0),
            )
            .optional()?;
        if clash.is_some() {
            return Err(RegistryError::DuplicateKey {
                kind,
                field: schema.name_field,
                value: name,
            });
        }
    }

    Ok(RegisterPlan {
        kind,
        action,
        existing,
        proposed,
    })
}

/// Remove the key from the definition, returning it and whether it was generated.
fn take_key(
    kind: ExtensionKind,
    definition: &mut Map<String, Value>,
) -> RegistryResult<(String, bool)> {
    let schema = kind.schema();
    let supplied = definition.remove(schema.key_field);
    match schema.key_strategy {
        KeyStrategy::GeneratedUuid => {
            let parsed = supplied
                .as_ref()
                .and_then(Value::as_str)
                .and_then(|value| Uuid::parse_str(value.trim()).ok());
            match parsed {
                Some(uuid) => Ok((uuid.hyphenated().to_string(), false)),
                None => {
                    if let Some(value) = supplied.filter(|value| !value.is_null()) {
                        debug!(%kind, %value, "replacing invalid key with a generated uuid");
                    }
                    Ok((Uuid::new_v4().hyphenated().to_string(), true))
                }
            }
        }
        KeyStrategy::Natural => match supplied {
            Some(Value::String(value)) if !value.trim().is_empty() => {
                Ok((value.trim().to_string(), false))
            }
            Some(other) if !other.is_null() => Err(RegistryError::validation(
                kind,
                format!(
                    "`{}` must be text, found {}",
                    schema.key_field,
                    value_kind(&other)
                ),
            )),
            _ => Err(RegistryError::validation(
                kind,
                format!("missing required field `{}`", schema.key_field),
            )),
        },
    }
}

fn apply_derivations(schema: &KindSchema, source: &Path, definition: &mut Map<String, Value>) {
    for derivation in schema.derivations {
        match *derivation {
            Derivation::ModuleNameFromSource { field } => {
                let base_name = source
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_default();
                definition.insert(field.to_string(), Value::String(base_name));
            }
            Derivation::DefaultBool { field, value } => {
                definition
                    .entry(field.to_string())
                    .or_insert(Value::Bool(value));
            }
        }
    }
}

fn check_shape(kind: ExtensionKind, spec: &FieldSpec, value: Value) -> RegistryResult<Value> {
    let mismatch = |value: &Value| {
        RegistryError::validation(
            kind,
            format!(
                "field `{}` must be {}, found {}",
                spec.name,
                spec.shape.as_str(),
                value_kind(value)
            ),
        )
    };

    match (spec.shape, value) {
        (_, Value::Null) => Ok(Value::Null),
        (FieldShape::Json, value) => Ok(value),
        (FieldShape::Text, Value::String(text)) => Ok(Value::String(text)),
        (FieldShape::Uuid, Value::String(text)) => match Uuid::parse_str(text.trim()) {
            Ok(uuid) => Ok(Value::String(uuid.hyphenated().to_string())),
            Err(_) => Err(RegistryError::validation(
                kind,
                format!("field `{}` is not a valid uuid: {text}", spec.name),
            )),
        },
        (FieldShape::Bool, Value::Bool(flag)) => Ok(Value::Bool(flag)),
        (FieldShape::Integer, Value::Number(number)) if number.is_i64() => {
            Ok(Value::Number(number))
        }
        (_, other) => Err(mismatch(&other)),
    }
}

fn persist(transaction: &Transaction<'_>, plan: &RegisterPlan) -> RegistryResult<()> {
    let schema = plan.kind.schema();
    let mut values = Vec::with_capacity(schema.fields.len() + 1);
    for spec in schema.fields {
        values.push(match plan.proposed.fields.get(spec.name) {
            Some(value) => to_sql(spec, value)?,
            None => SqlValue::Null,
        });
    }
    values.push(SqlValue::Text(plan.proposed.key.clone()));

    let sql = match plan.action {
        RegisterAction::Insert => {
            let columns: Vec<&str> = schema
                .fields
                .iter()
                .map(|spec| spec.name)
                .chain(std::iter::once(schema.key_field))
                .collect();
            let placeholders: Vec<String> =
                (1..=columns.len()).map(|index| format!("?{index}")).collect();
            format!(
                "INSERT INTO {} ({}) VALUES ({})",
                schema.table,
                columns.join(", "),
                placeholders.join(", ")
            )
        }
        RegisterAction::Update => {
            let assignments: Vec<String> = schema
                .fields
                .iter()
                .enumerate()
                .map(|(index, spec)| format!("{} = ?{}", spec.name, index + 1))
                .collect();
            format!(
                "UPDATE {} SET {} WHERE {} = ?{}",
                schema.table,
                assignments.join(", "),
                schema.key_field,
                schema.fields.len() + 1
            )
        }
    };

    transaction.execute(&sql, params_from_iter(values))?;
    Ok(())
}

fn to_sql(spec: &FieldSpec, value: &Value) -> RegistryResult<SqlValue> {
    Ok(match (spec.shape, value) {
        (_, Value::Null) => SqlValue::Null,
        (FieldShape::Json, value) => SqlValue::Text(value.to_string()),
        (FieldShape::Bool, Value::Bool(flag)) => SqlValue::Integer(i64::from(*flag)),
        (FieldShape::Integer, Value::Number(number)) => match number.as_i64() {
            Some(number) => SqlValue::Integer(number),
            None => SqlValue::Null,
        },
        (_, Value::String(text)) => SqlValue::Text(text.clone()),
        (_, other) => SqlValue::Text(other.to_string()),
    })
}

fn from_sql(kind: ExtensionKind, spec: &FieldSpec, value: SqlValue) -> RegistryResult<Value> {
    let invalid = |detail: String| RegistryError::InvalidStoredData {
        kind,
        message: format!("column `{}`: {detail}", spec.name),
    };
    Ok(match (spec.shape, value) {
        (_, SqlValue::Null) => Value::Null,
        (FieldShape::Json, SqlValue::Text(text)) => {
            serde_json::from_str(&text).map_err(|err| invalid(err.to_string()))?
        }
        (FieldShape::Bool, SqlValue::Integer(number)) => Value::Bool(number != 0),
        (FieldShape::Integer, SqlValue::Integer(number)) => Value::from(number),
        (FieldShape::Text | FieldShape::Uuid, SqlValue::Text(text)) => Value::String(text),
        (shape, other) => {
            return Err(invalid(format!(
                "expected {}, found {:?}",
                shape.as_str(),
                other.data_type()
            )));
        }
    })
}

fn fetch_records(
    connection: &Connection,
    kind: ExtensionKind,
    key: Option<&str>,
) -> RegistryResult<Vec<ExtensionRecord>> {
    let schema = kind.schema();
    let columns = schema.column_names().join(", ");
    let sql = match key {
        Some(_) => format!(
            "SELECT {columns} FROM {} WHERE {} = ?1",
            schema.table, schema.key_field
        ),
        None => format!("SELECT {columns} FROM {}", schema.table),
    };

    let mut statement = connection.prepare(&sql)?;
    let read_row = |row: &rusqlite::Row<'_>| -> rusqlite::Result<Vec<SqlValue>> {
        (0..=schema.fields.len())
            .map(|index| row.get::<_, SqlValue>(index))
            .collect()
    };
    let rows: Vec<Vec<SqlValue>> = match key {
        Some(key) => statement
            .query_map(params![key], read_row)?
            .collect::<rusqlite::Result<_>>()?,
        None => statement
            .query_map([], read_row)?
            .collect::<rusqlite::Result<_>>()?,
    };

    rows.into_iter()
        .map(|row| decode_record(kind, row))
        .collect()
}

fn decode_record(kind: ExtensionKind, row: Vec<SqlValue>) -> RegistryResult<ExtensionRecord> {
    let schema = kind.schema();
    let mut values = row.into_iter();
    let key = match values.next() {
        Some(SqlValue::Text(key)) => key,
        other => {
            return Err(RegistryError::InvalidStoredData {
                kind,
                message: format!("key column `{}` is not text: {other:?}", schema.key_field),
            });
        }
    };

    let mut fields = Map::new();
    for (spec, value) in schema.fields.iter().zip(values) {
        fields.insert(spec.name.to_string(), from_sql(kind, spec, value)?);
    }
    Ok(ExtensionRecord { kind, key, fields })
}

fn find_optional_by_name(
    connection: &Connection,
    kind: ExtensionKind,
    name: &str,
) -> RegistryResult<Option<ExtensionRecord>> {
    let schema = kind.schema();
    let key: Option<String> = connection
        .query_row(
            &format!(
                "SELECT {} FROM {} WHERE {} = ?1",
                schema.key_field, schema.table, schema.name_field
            ),
            params![name],
            |row| row.get(0),
        )
        .optional()?;
    match key {
        Some(key) => Ok(fetch_records(connection, kind, Some(&key))?.pop()),
        None => Ok(None),
    }
}

fn find_by_name(
    connection: &Connection,
    kind: ExtensionKind,
    name: &str,
) -> RegistryResult<ExtensionRecord> {
    find_optional_by_name(connection, kind, name)?.ok_or_else(|| RegistryError::NotFound {
        kind,
        name: name.to_string(),
    })
}
