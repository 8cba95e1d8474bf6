//! Document checks applied while finalizing a version.

use std::collections::BTreeSet;

use serde_json::Value;

use gypsum_protocol::paths::strip_json_suffix;
use gypsum_protocol::Manifest;

use crate::error::GypsumError;
use crate::schema::{SchemaError, SchemaRegistry};

/// Parse an uploaded document into a JSON object.
pub fn parse_document(relative: &str, bytes: &[u8]) -> Result<Value, GypsumError> {
    let value: Value = serde_json::from_slice(bytes).map_err(|e| GypsumError::InvalidDocument {
        path: relative.to_string(),
        reason: format!("not valid JSON: {}", e),
    })?;
    if !value.is_object() {
        return Err(GypsumError::InvalidDocument {
            path: relative.to_string(),
            reason: "not a JSON object".to_string(),
        });
    }
    Ok(value)
}

/// Validate one document against its schema and the version's content.
///
/// `content` holds every non-system relative path of the version.
pub fn check_document(
    relative: &str,
    document: &Value,
    registry: &SchemaRegistry,
    content: &BTreeSet<&str>,
) -> Result<(), GypsumError> {
    let schema_id = required_str(relative, document, "$schema")?;
    let schema = registry
        .resolve(schema_id)
        .map_err(|e| unknown_schema(relative, schema_id, e))?;

    schema
        .validate(document)
        .map_err(|violation| GypsumError::SchemaValidationFailed {
            path: relative.to_string(),
            schema: schema_id.to_string(),
            location: violation.location,
            message: violation.message,
        })?;

    let expected = expected_path(relative, schema.metadata_only());
    let declared = required_str(relative, document, "path")?;
    if declared != expected {
        return Err(GypsumError::PathMismatch {
            path: relative.to_string(),
            declared: declared.to_string(),
            expected: expected.to_string(),
        });
    }
    if !content.contains(expected) {
        return Err(GypsumError::DanglingReference {
            path: relative.to_string(),
            target: expected.to_string(),
        });
    }
    Ok(())
}

/// The path a document must declare: its own, or for metadata-only schemas
/// the artifact it sits beside.
pub fn expected_path(relative: &str, metadata_only: bool) -> &str {
    if metadata_only {
        strip_json_suffix(relative)
    } else {
        relative
    }
}

/// Check the uploaded content against the declared manifest, both ways.
pub fn check_manifest(manifest: &Manifest, content: &BTreeSet<&str>) -> Result<(), GypsumError> {
    let declared = manifest.to_set();
    if let Some(missing) = declared.difference(content).next() {
        return Err(GypsumError::MissingDeclaredFile(missing.to_string()));
    }
    if let Some(undeclared) = content.difference(&declared).next() {
        return Err(GypsumError::UndeclaredFile(undeclared.to_string()));
    }
    Ok(())
}

fn required_str<'a>(relative: &str, document: &'a Value, field: &str) -> Result<&'a str, GypsumError> {
    document
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| GypsumError::InvalidDocument {
            path: relative.to_string(),
            reason: format!("missing string field '{}'", field),
        })
}

fn unknown_schema(relative: &str, schema_id: &str, err: SchemaError) -> GypsumError {
    GypsumError::UnknownSchema {
        path: relative.to_string(),
        schema: schema_id.to_string(),
        reason: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gypsum_protocol::ErrorKind;
    use serde_json::json;

    fn registry() -> SchemaRegistry {
        SchemaRegistry::from_schemas([
            (
                "meta".to_string(),
                json!({
                    "type": "object",
                    "required": ["path"],
                    "_attributes": {"metadata_only": true}
                }),
            ),
            (
                "self".to_string(),
                json!({
                    "type": "object",
                    "properties": {"size": {"type": "integer"}},
                    "required": ["path"]
                }),
            ),
        ])
    }

    fn content<'a>(paths: &[&'a str]) -> BTreeSet<&'a str> {
        paths.iter().copied().collect()
    }

    #[test]
    fn test_metadata_only_document_points_at_artifact() {
        let doc = json!({"$schema": "meta", "path": "a"});
        check_document("a.json", &doc, &registry(), &content(&["a", "a.json"])).unwrap();

        let err = check_document("a.json", &doc, &registry(), &content(&["a.json"])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DanglingReference);
    }

    #[test]
    fn test_self_describing_document() {
        let doc = json!({"$schema": "self", "path": "sub/b.json", "size": 3});
        check_document("sub/b.json", &doc, &registry(), &content(&["sub/b.json"])).unwrap();

        let wrong = json!({"$schema": "self", "path": "b.json"});
        let err = check_document("sub/b.json", &wrong, &registry(), &content(&["sub/b.json"]))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PathMismatch);
    }

    #[test]
    fn test_schema_failures() {
        let unknown = json!({"$schema": "nope", "path": "x.json"});
        let err = check_document("x.json", &unknown, &registry(), &content(&["x.json"])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownSchema);

        let invalid = json!({"$schema": "self", "path": "x.json", "size": "big"});
        match check_document("x.json", &invalid, &registry(), &content(&["x.json"])).unwrap_err() {
            GypsumError::SchemaValidationFailed { location, .. } => assert_eq!(location, "$/size"),
            other => panic!("unexpected error: {other}"),
        }

        let no_schema = json!({"path": "x.json"});
        let err = check_document("x.json", &no_schema, &registry(), &content(&["x.json"])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidDocument);
    }

    #[test]
    fn test_parse_document() {
        assert!(parse_document("a.json", b"{\"k\":1}").is_ok());
        assert_eq!(
            parse_document("a.json", b"[1]").unwrap_err().kind(),
            ErrorKind::InvalidDocument
        );
        assert_eq!(
            parse_document("a.json", b"{").unwrap_err().kind(),
            ErrorKind::InvalidDocument
        );
    }

    #[test]
    fn test_manifest_cross_check() {
        let manifest = Manifest::new(vec!["a".into(), "a.json".into()]);
        check_manifest(&manifest, &content(&["a", "a.json"])).unwrap();

        let err = check_manifest(&manifest, &content(&["a.json"])).unwrap_err();
        assert!(matches!(err, GypsumError::MissingDeclaredFile(ref p) if p == "a"));

        let err = check_manifest(&manifest, &content(&["a", "a.json", "extra.txt"])).unwrap_err();
        assert!(matches!(err, GypsumError::UndeclaredFile(ref p) if p == "extra.txt"));
    }

    #[test]
    fn test_expected_path() {
        assert_eq!(expected_path("x/y.json", true), "x/y");
        assert_eq!(expected_path("x/y.json", false), "x/y.json");
    }
}
