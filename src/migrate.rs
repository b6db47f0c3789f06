// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Configuration document migration.
//!
//! The shape of the configuration document changes over time. Each change is
//! recorded as a __migration step__ that knows the version it produces, how to
//! transform a document of the previous version into that version, how to undo
//! that transformation, and a JSON schema snapshot describing the exact shape
//! of the document it produces.
//!
//! # Migration Table
//!
//! Steps are kept in a single ordered table, oldest first. A document without
//! a `version` field is treated as the oldest known version. Migrating a
//! document applies every step after its current version in order, stamps the
//! document with each step's version, and validates the result against that
//! step's schema.
//!
//! The input document is validated against the schema of its own version
//! before any step runs. Thus, a schema mismatch _after_ a step always means
//! the step itself is broken, not the user's document.
//!
//! Migrations work on untyped [`serde_json::Value`] documents, because old
//! documents do not fit the current typed model in
//! [`config`](crate::config) by definition.

use serde_json::Value;
use tracing::{debug, info, instrument};

/// Latest version of the configuration document.
pub const LATEST_VERSION: &str = "0.1.0";

/// Ordered table of every known migration step, oldest first.
pub static MIGRATIONS: &[Migration] = &[
    Migration {
        version: "0.0.0",
        schema: include_str!("migrate/schemas/001_configuration.json"),
        forward: initial,
        backward: initial,
    },
    Migration {
        version: "0.1.0",
        schema: include_str!("migrate/schemas/002_configuration.json"),
        forward: remove_is_copy,
        backward: restore_is_copy,
    },
];

/// Single versioned migration step.
#[derive(Debug)]
pub struct Migration {
    /// Version of the document this step produces.
    pub version: &'static str,
    schema: &'static str,
    forward: fn(Value) -> Value,
    backward: fn(Value) -> Value,
}

impl Migration {
    /// Validate document against schema snapshot of this step.
    ///
    /// Returns a description of every violation found. An empty listing means
    /// the document is valid.
    ///
    /// # Errors
    ///
    /// - Return [`MigrateError::BrokenSchema`] if bundled schema is unusable.
    pub fn validate(&self, document: &Value) -> Result<Vec<String>> {
        let schema: Value =
            serde_json::from_str(self.schema).map_err(|error| MigrateError::BrokenSchema {
                version: self.version,
                message: error.to_string(),
            })?;
        let validator =
            jsonschema::validator_for(&schema).map_err(|error| MigrateError::BrokenSchema {
                version: self.version,
                message: error.to_string(),
            })?;

        Ok(validator
            .iter_errors(document)
            .map(|error| {
                let path = error.instance_path.to_string();
                let path = if path.is_empty() { "/".into() } else { path };
                format!("{path}: {error}")
            })
            .collect())
    }
}

/// Determine version of document.
///
/// # Errors
///
/// - Return [`MigrateError::NotAMapping`] if document is not a mapping.
/// - Return [`MigrateError::UnknownVersion`] if version is not a string.
pub fn document_version(document: &Value) -> Result<&str> {
    let mapping = document.as_object().ok_or(MigrateError::NotAMapping)?;
    match mapping.get("version") {
        None => Ok(MIGRATIONS[0].version),
        Some(Value::String(version)) => Ok(version.as_str()),
        Some(other) => Err(MigrateError::UnknownVersion {
            version: other.to_string(),
        }),
    }
}

/// Check if document is already at the latest version.
pub fn is_latest(document: &Value) -> bool {
    matches!(document_version(document), Ok(LATEST_VERSION))
}

/// Migrate document to the latest version.
///
/// Does not persist anything.
///
/// # Errors
///
/// - Return [`MigrateError::NotAMapping`] if document is not a mapping.
/// - Return [`MigrateError::UnknownVersion`] if document version is unknown.
/// - Return [`MigrateError::InvalidDocument`] if document does not match
///   the schema of its own version.
/// - Return [`MigrateError::SchemaMismatch`] if a migration step produced a
///   document that does not match its schema.
#[instrument(skip(document), level = "debug")]
pub fn migrate(document: Value) -> Result<Value> {
    let version = document_version(&document)?.to_string();
    let index = position(&version)?;
    debug!("detected config version {version}");

    let current = &MIGRATIONS[index];
    let errors = current.validate(&document)?;
    if !errors.is_empty() {
        return Err(MigrateError::InvalidDocument {
            version: current.version,
            errors,
        });
    }

    let pending = &MIGRATIONS[index + 1..];
    if pending.is_empty() {
        return Ok(document);
    }

    info!("config version {version} needs {} migrations", pending.len());
    apply(pending, document)
}

// Run each step forward, stamping and validating after every one of them.
fn apply(steps: &[Migration], mut document: Value) -> Result<Value> {
    for step in steps {
        info!("migrate config to version {}", step.version);
        document = (step.forward)(document);
        stamp(&mut document, step.version);

        let errors = step.validate(&document)?;
        if !errors.is_empty() {
            return Err(MigrateError::SchemaMismatch {
                version: step.version,
                errors,
            });
        }
    }

    Ok(document)
}

/// Roll document back to an older version.
///
/// Not used when loading configuration. Meant for manual recovery only.
///
/// # Errors
///
/// - Return [`MigrateError::UnknownVersion`] if either version is unknown.
/// - Return [`MigrateError::RollbackAhead`] if target is newer than document.
/// - Return [`MigrateError::SchemaMismatch`] if a rollback step produced a
///   document that does not match the schema of the older version.
#[instrument(skip(document), level = "debug")]
pub fn rollback(document: Value, target: &str) -> Result<Value> {
    let version = document_version(&document)?.to_string();
    let from = position(&version)?;
    let to = position(target)?;
    if to > from {
        return Err(MigrateError::RollbackAhead {
            version,
            target: target.into(),
        });
    }

    let mut document = document;
    for index in (to + 1..=from).rev() {
        let previous = &MIGRATIONS[index - 1];
        info!(
            "roll config back from version {} to {}",
            MIGRATIONS[index].version, previous.version
        );
        document = (MIGRATIONS[index].backward)(document);
        stamp(&mut document, previous.version);

        let errors = previous.validate(&document)?;
        if !errors.is_empty() {
            return Err(MigrateError::SchemaMismatch {
                version: previous.version,
                errors,
            });
        }
    }

    Ok(document)
}

fn position(version: &str) -> Result<usize> {
    MIGRATIONS
        .iter()
        .position(|step| step.version == version)
        .ok_or_else(|| MigrateError::UnknownVersion {
            version: version.into(),
        })
}

fn stamp(document: &mut Value, version: &str) {
    if let Some(mapping) = document.as_object_mut() {
        mapping.insert("version".into(), Value::String(version.into()));
    }
}

fn initial(document: Value) -> Value {
    document
}

fn remove_is_copy(mut document: Value) -> Value {
    for spec in link_specs(&mut document) {
        spec.remove("is_copy");
    }

    document
}

fn restore_is_copy(mut document: Value) -> Value {
    for spec in link_specs(&mut document) {
        spec.entry("is_copy").or_insert(Value::Bool(false));
    }

    document
}

fn link_specs<'a>(
    document: &'a mut Value,
) -> impl Iterator<Item = &'a mut serde_json::Map<String, Value>> + 'a {
    document
        .get_mut("binaries")
        .and_then(Value::as_object_mut)
        .into_iter()
        .flat_map(|binaries| binaries.values_mut())
        .filter_map(|binary| binary.get_mut("tags").and_then(Value::as_object_mut))
        .flat_map(|tags| tags.values_mut())
        .filter(|tag| tag.get("kind").and_then(Value::as_str) == Some("link"))
        .filter_map(|tag| tag.get_mut("spec").and_then(Value::as_object_mut))
}

/// Migration error types.
#[derive(Debug, thiserror::Error)]
pub enum MigrateError {
    /// Document is not a mapping at the top-level.
    #[error("configuration document must be a mapping")]
    NotAMapping,

    /// Document version does not match any known migration step.
    #[error("unknown configuration version {version}")]
    UnknownVersion { version: String },

    /// Document does not match the schema of the version it claims.
    #[error("configuration does not match version {version}:\n  {}", errors.join("\n  "))]
    InvalidDocument {
        version: &'static str,
        errors: Vec<String>,
    },

    /// Migration step produced a document that does not match its schema.
    #[error("migration to version {version} produced an invalid document:\n  {}", errors.join("\n  "))]
    SchemaMismatch {
        version: &'static str,
        errors: Vec<String>,
    },

    /// Cannot roll back to a version newer than the document.
    #[error("cannot roll back version {version} forward to {target}")]
    RollbackAhead { version: String, target: String },

    /// Bundled schema snapshot cannot be compiled.
    #[error("schema of version {version} is broken: {message}")]
    BrokenSchema {
        version: &'static str,
        message: String,
    },
}

/// Friendly result alias :3
type Result<T, E = MigrateError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use simple_test_case::test_case;

    fn legacy() -> Value {
        json!({
            "binaries": {
                "app": {
                    "name": "app",
                    "tags": {
                        "copy": {
                            "kind": "link",
                            "spec": { "path": "/data/versions/app/app_copy", "is_copy": true }
                        },
                        "plain": {
                            "kind": "link",
                            "description": "system binary",
                            "spec": { "path": "/bin/true", "is_copy": false }
                        },
                        "cmd": {
                            "kind": "command",
                            "spec": { "command": "echo hi", "working_directory": null }
                        }
                    },
                    "selected": "plain"
                }
            }
        })
    }

    #[test]
    fn latest_version_is_last_step() {
        assert_eq!(MIGRATIONS.last().map(|step| step.version), Some(LATEST_VERSION));
    }

    #[test]
    fn bundled_schemas_compile() -> anyhow::Result<()> {
        for step in MIGRATIONS {
            let errors = step.validate(&json!({ "version": step.version }))?;
            assert!(errors.is_empty(), "{errors:?}");
        }

        Ok(())
    }

    #[test]
    fn migrate_legacy_document() -> anyhow::Result<()> {
        let result = migrate(legacy())?;
        let expect = json!({
            "version": "0.1.0",
            "binaries": {
                "app": {
                    "name": "app",
                    "tags": {
                        "copy": {
                            "kind": "link",
                            "spec": { "path": "/data/versions/app/app_copy" }
                        },
                        "plain": {
                            "kind": "link",
                            "description": "system binary",
                            "spec": { "path": "/bin/true" }
                        },
                        "cmd": {
                            "kind": "command",
                            "spec": { "command": "echo hi", "working_directory": null }
                        }
                    },
                    "selected": "plain"
                }
            }
        });
        assert_eq!(result, expect);

        let tags = result["binaries"]["app"]["tags"].as_object().unwrap();
        for (name, tag) in tags {
            assert_eq!(tag["spec"].get("is_copy"), None, "tag {name} kept is_copy");
        }

        Ok(())
    }

    #[test]
    fn broken_step_is_schema_mismatch() {
        let broken = [Migration {
            version: "0.1.0",
            schema: include_str!("migrate/schemas/002_configuration.json"),
            forward: |_| json!({ "binaries": { "app": { "tags": 42 } } }),
            backward: initial,
        }];

        let result = apply(&broken, json!({ "binaries": {} }));
        assert!(matches!(
            result,
            Err(MigrateError::SchemaMismatch { version: "0.1.0", ref errors }) if !errors.is_empty()
        ));
    }

    #[test]
    fn sound_step_is_stamped() -> anyhow::Result<()> {
        let result = apply(&MIGRATIONS[1..], json!({ "binaries": {} }))?;
        assert_eq!(result, json!({ "version": "0.1.0", "binaries": {} }));

        Ok(())
    }

    #[test_case(json!({ "version": "0.1.0", "binaries": {} }); "empty document")]
    #[test_case(json!({
        "version": "0.1.0",
        "binaries": {
            "app": {
                "name": "app",
                "tags": { "a": { "kind": "link", "spec": { "path": "/bin/true", "is_copy": true } } },
                "selected": "a"
            }
        }
    }); "copied link")]
    #[test]
    fn migrate_latest_is_noop(document: Value) {
        use pretty_assertions::assert_eq;
        assert!(is_latest(&document));
        let result = migrate(document.clone()).unwrap();
        assert_eq!(result, document);
    }

    #[test_case(json!({ "version": "9.9.9" }), "9.9.9"; "future version")]
    #[test_case(json!({ "version": 1 }), "1"; "numeric version")]
    #[test]
    fn migrate_unknown_version(document: Value, expect: &str) {
        let result = migrate(document);
        assert!(
            matches!(result, Err(MigrateError::UnknownVersion { ref version }) if version == expect)
        );
    }

    #[test]
    fn migrate_rejects_non_mapping() {
        assert!(matches!(migrate(Value::Null), Err(MigrateError::NotAMapping)));
        assert!(matches!(
            migrate(json!(["version", "0.1.0"])),
            Err(MigrateError::NotAMapping)
        ));
    }

    #[test]
    fn migrate_rejects_invalid_input_before_any_step() {
        let mut document = legacy();
        document["colour"] = json!("blue");
        let result = migrate(document);
        assert!(matches!(
            result,
            Err(MigrateError::InvalidDocument { version: "0.0.0", ref errors }) if errors.len() == 1
        ));
    }

    #[test]
    fn rollback_restores_is_copy() -> anyhow::Result<()> {
        let migrated = migrate(legacy())?;
        let result = rollback(migrated, "0.0.0")?;
        assert_eq!(result["version"], json!("0.0.0"));
        assert_eq!(
            result["binaries"]["app"]["tags"]["plain"]["spec"]["is_copy"],
            json!(false)
        );
        assert_eq!(
            result["binaries"]["app"]["tags"]["cmd"]["spec"].get("is_copy"),
            None
        );

        Ok(())
    }

    #[test]
    fn rollback_refuses_to_move_forward() {
        let result = rollback(json!({ "version": "0.0.0" }), LATEST_VERSION);
        assert!(matches!(result, Err(MigrateError::RollbackAhead { .. })));
    }
}
