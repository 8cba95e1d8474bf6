//! JSON Schema registry.
//!
//! Documents name their schema by `$schema` id. Schemas come either from a
//! directory (loaded on first use) or from an in-memory map, and are compiled
//! once and shared for the rest of the run.
//!
//! A schema may mark its documents as *metadata only*, meaning a document
//! `x.json` describes a sibling artifact `x` rather than itself. The flag is
//! read from `_attributes.metadata_only`, or from a top-level
//! `metadata_only`.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use serde_json::Value;
use thiserror::Error;
use tracing::debug;

/// Schema lookup and compilation errors
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("no schema registered for '{0}'")]
    NotFound(String),

    #[error("schema id '{id}' cannot be mapped to a file: {reason}")]
    InvalidId { id: String, reason: &'static str },

    #[error("failed to read schema '{id}': {source}")]
    Io {
        id: String,
        #[source]
        source: io::Error,
    },

    #[error("schema '{id}' is not valid JSON: {message}")]
    Parse { id: String, message: String },

    #[error("schema '{id}' cannot be compiled: {message}")]
    Compile { id: String, message: String },
}

/// The first violation found in a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaViolation {
    /// JSON path of the offending value, `$` for the root.
    pub location: String,
    pub message: String,
}

/// A compiled schema.
pub struct CompiledSchema {
    id: String,
    validator: jsonschema::Validator,
    metadata_only: bool,
}

impl std::fmt::Debug for CompiledSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledSchema")
            .field("id", &self.id)
            .field("metadata_only", &self.metadata_only)
            .finish_non_exhaustive()
    }
}

impl CompiledSchema {
    pub fn compile(id: &str, schema: &Value) -> Result<Self, SchemaError> {
        let validator = jsonschema::options()
            .build(schema)
            .map_err(|e| SchemaError::Compile {
                id: id.to_string(),
                message: e.to_string(),
            })?;

        let metadata_only = schema
            .pointer("/_attributes/metadata_only")
            .or_else(|| schema.get("metadata_only"))
            .and_then(Value::as_bool)
            .unwrap_or(false);

        Ok(Self {
            id: id.to_string(),
            validator,
            metadata_only,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn metadata_only(&self) -> bool {
        self.metadata_only
    }

    /// Validate `document`, reporting the first violation.
    pub fn validate(&self, document: &Value) -> Result<(), SchemaViolation> {
        self.validator.validate(document).map_err(|error| {
            let path = error.instance_path.to_string();
            SchemaViolation {
                location: if path.is_empty() {
                    "$".to_string()
                } else {
                    format!("${path}")
                },
                message: error.to_string(),
            }
        })
    }
}

enum Source {
    Directory(PathBuf),
    Inline(HashMap<String, Value>),
}

/// Compiled-schema cache shared by all documents of a run.
pub struct SchemaRegistry {
    source: Source,
    cache: RwLock<HashMap<String, Arc<CompiledSchema>>>,
}

impl SchemaRegistry {
    /// Registry reading `<dir>/<path of id>` on demand.
    pub fn from_dir(dir: impl Into<PathBuf>) -> Self {
        Self::with_source(Source::Directory(dir.into()))
    }

    /// Registry over a fixed set of schemas keyed by id.
    pub fn from_schemas(schemas: impl IntoIterator<Item = (String, Value)>) -> Self {
        Self::with_source(Source::Inline(schemas.into_iter().collect()))
    }

    fn with_source(source: Source) -> Self {
        Self {
            source,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Compiled schema for `id`, compiling it on first use.
    pub fn resolve(&self, id: &str) -> Result<Arc<CompiledSchema>, SchemaError> {
        if let Some(found) = self
            .cache
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(id)
        {
            return Ok(Arc::clone(found));
        }

        let schema = self.load(id)?;
        let compiled = Arc::new(CompiledSchema::compile(id, &schema)?);
        debug!(schema = id, metadata_only = compiled.metadata_only(), "compiled schema");

        let mut cache = self
            .cache
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(Arc::clone(cache.entry(id.to_string()).or_insert(compiled)))
    }

    fn load(&self, id: &str) -> Result<Value, SchemaError> {
        match &self.source {
            Source::Inline(schemas) => schemas
                .get(id)
                .cloned()
                .ok_or_else(|| SchemaError::NotFound(id.to_string())),
            Source::Directory(dir) => {
                let path = schema_file(dir, id)?;
                let bytes = match fs::read(&path) {
                    Ok(bytes) => bytes,
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {
                        return Err(SchemaError::NotFound(id.to_string()))
                    }
                    Err(source) => {
                        return Err(SchemaError::Io {
                            id: id.to_string(),
                            source,
                        })
                    }
                };
                serde_json::from_slice(&bytes).map_err(|e| SchemaError::Parse {
                    id: id.to_string(),
                    message: e.to_string(),
                })
            }
        }
    }
}

/// File under `dir` holding the schema `id`.
///
/// `https://host/a/b.json` maps to `dir/a/b.json`; ids without a `.json`
/// suffix get one.
pub fn schema_file(dir: &Path, id: &str) -> Result<PathBuf, SchemaError> {
    let invalid = |reason| SchemaError::InvalidId {
        id: id.to_string(),
        reason,
    };

    let relative = match id.split_once("://") {
        Some((_, rest)) => rest.split_once('/').map(|(_, path)| path).unwrap_or(""),
        None => id,
    };
    if relative.is_empty() {
        return Err(invalid("id has no path"));
    }

    let mut path = dir.to_path_buf();
    for segment in relative.split('/') {
        if segment.is_empty() || segment == "." || segment == ".." {
            return Err(invalid("id contains an empty or relative segment"));
        }
        path.push(segment);
    }
    if !relative.ends_with(".json") {
        path.set_extension(match path.extension() {
            Some(ext) => format!("{}.json", ext.to_string_lossy()),
            None => "json".to_string(),
        });
    }
    Ok(path)
}
