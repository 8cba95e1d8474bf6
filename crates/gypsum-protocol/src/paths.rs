//! Well-known object keys for projects and versions.
//!
//! Every object written by gypsum itself has a final segment beginning with
//! the reserved `..` prefix. Uploaded relative paths may not contain such a
//! segment, so a listing can always be split into "system" and "content"
//! objects without consulting anything else.
//!
//! | Object | Key |
//! |--------|-----|
//! | lock | `{project}/{version}/..LOCK` |
//! | revision metadata | `{project}/{version}/..revision.json` |
//! | aggregated document | `{project}/{version}/..aggregated.json` |
//! | manifest | `{project}/{version}/..manifest.json` |
//! | expiry descriptor | `{project}/{version}/..expiry.json` |
//! | permissions | `{project}/..permissions.json` |
//! | latest (persistent) | `{project}/..latest.json` |
//! | latest (all) | `{project}/..latest_all.json` |

use thiserror::Error;

/// Key delimiter used by the object store.
pub const DELIMITER: char = '/';

/// Prefix reserved for system object names.
pub const RESERVED_PREFIX: &str = "..";

/// Suffix identifying JSON documents in an upload.
pub const JSON_SUFFIX: &str = ".json";

const LOCK_NAME: &str = "..LOCK";
const REVISION_NAME: &str = "..revision.json";
const AGGREGATED_NAME: &str = "..aggregated.json";
const MANIFEST_NAME: &str = "..manifest.json";
const EXPIRY_NAME: &str = "..expiry.json";
const PERMISSIONS_NAME: &str = "..permissions.json";
const LATEST_PERSISTENT_NAME: &str = "..latest.json";
const LATEST_ALL_NAME: &str = "..latest_all.json";

/// Errors from building keys out of identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    #[error("{what} name must not be empty")]
    Empty { what: &'static str },

    #[error("invalid {what} name '{value}': {reason}")]
    Invalid {
        what: &'static str,
        value: String,
        reason: &'static str,
    },
}

fn check_identifier(what: &'static str, value: &str) -> Result<(), PathError> {
    if value.is_empty() {
        return Err(PathError::Empty { what });
    }
    let reason = if value.contains(DELIMITER) {
        Some("must not contain '/'")
    } else if value.starts_with(RESERVED_PREFIX) {
        Some("must not start with the reserved '..' prefix")
    } else if value == "." {
        Some("must not be '.'")
    } else {
        None
    };
    match reason {
        Some(reason) => Err(PathError::Invalid {
            what,
            value: value.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}

/// Keys owned by a project as a whole.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProjectPaths {
    project: String,
}

impl ProjectPaths {
    pub fn new(project: &str) -> Result<Self, PathError> {
        check_identifier("project", project)?;
        Ok(Self {
            project: project.to_string(),
        })
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    /// Prefix under which every object of the project lives (`{project}/`).
    pub fn prefix(&self) -> String {
        format!("{}/", self.project)
    }

    pub fn permissions(&self) -> String {
        format!("{}/{}", self.project, PERMISSIONS_NAME)
    }

    /// Pointer that only ever references non-expiring versions.
    pub fn latest_persistent(&self) -> String {
        format!("{}/{}", self.project, LATEST_PERSISTENT_NAME)
    }

    /// Pointer that considers every version regardless of expiry.
    pub fn latest_all(&self) -> String {
        format!("{}/{}", self.project, LATEST_ALL_NAME)
    }

    pub fn version(&self, version: &str) -> Result<VersionPaths, PathError> {
        check_identifier("version", version)?;
        Ok(VersionPaths {
            project: self.project.clone(),
            version: version.to_string(),
        })
    }

    /// Extract the version name from a delimiter listing's common prefix.
    ///
    /// Returns `None` for prefixes outside this project or for reserved names.
    pub fn version_from_common_prefix(&self, common_prefix: &str) -> Option<String> {
        let rest = common_prefix.strip_prefix(&self.prefix())?;
        let name = rest.strip_suffix(DELIMITER).unwrap_or(rest);
        if name.is_empty() || name.contains(DELIMITER) || name.starts_with(RESERVED_PREFIX) {
            return None;
        }
        Some(name.to_string())
    }
}

/// Keys owned by a single version of a project.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VersionPaths {
    project: String,
    version: String,
}

impl VersionPaths {
    pub fn new(project: &str, version: &str) -> Result<Self, PathError> {
        ProjectPaths::new(project)?.version(version)
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn project_paths(&self) -> ProjectPaths {
        ProjectPaths {
            project: self.project.clone(),
        }
    }

    /// Prefix under which every object of the version lives (`{project}/{version}/`).
    pub fn prefix(&self) -> String {
        format!("{}/{}/", self.project, self.version)
    }

    fn key(&self, name: &str) -> String {
        format!("{}/{}/{}", self.project, self.version, name)
    }

    pub fn lock(&self) -> String {
        self.key(LOCK_NAME)
    }

    pub fn revision(&self) -> String {
        self.key(REVISION_NAME)
    }

    pub fn aggregated(&self) -> String {
        self.key(AGGREGATED_NAME)
    }

    pub fn manifest(&self) -> String {
        self.key(MANIFEST_NAME)
    }

    pub fn expiry(&self) -> String {
        self.key(EXPIRY_NAME)
    }

    /// Path of `key` relative to this version's prefix.
    pub fn relative_path<'a>(&self, key: &'a str) -> Option<&'a str> {
        let rest = key.strip_prefix(&self.project)?.strip_prefix(DELIMITER)?;
        let rest = rest.strip_prefix(&self.version)?.strip_prefix(DELIMITER)?;
        if rest.is_empty() {
            None
        } else {
            Some(rest)
        }
    }
}

/// Whether a version-relative path names a system object.
pub fn is_system_path(relative: &str) -> bool {
    relative
        .split(DELIMITER)
        .any(|segment| segment.starts_with(RESERVED_PREFIX))
}

/// Whether a version-relative path names a JSON document.
pub fn is_json_document(relative: &str) -> bool {
    relative.ends_with(JSON_SUFFIX) && !is_system_path(relative)
}

/// Strip a trailing `.json`, if any.
pub fn strip_json_suffix(relative: &str) -> &str {
    relative.strip_suffix(JSON_SUFFIX).unwrap_or(relative)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_keys() {
        let paths = VersionPaths::new("demo", "v1").unwrap();
        assert_eq!(paths.prefix(), "demo/v1/");
        assert_eq!(paths.lock(), "demo/v1/..LOCK");
        assert_eq!(paths.revision(), "demo/v1/..revision.json");
        assert_eq!(paths.aggregated(), "demo/v1/..aggregated.json");
        assert_eq!(paths.manifest(), "demo/v1/..manifest.json");
        assert_eq!(paths.expiry(), "demo/v1/..expiry.json");
    }

    #[test]
    fn test_project_keys() {
        let paths = ProjectPaths::new("demo").unwrap();
        assert_eq!(paths.prefix(), "demo/");
        assert_eq!(paths.permissions(), "demo/..permissions.json");
        assert_eq!(paths.latest_persistent(), "demo/..latest.json");
        assert_eq!(paths.latest_all(), "demo/..latest_all.json");
    }

    #[test]
    fn test_rejects_empty_and_reserved_identifiers() {
        assert_eq!(
            ProjectPaths::new(""),
            Err(PathError::Empty { what: "project" })
        );
        assert_eq!(
            VersionPaths::new("demo", ""),
            Err(PathError::Empty { what: "version" })
        );
        assert!(matches!(
            VersionPaths::new("demo", "..LOCK"),
            Err(PathError::Invalid { .. })
        ));
        assert!(matches!(
            ProjectPaths::new("a/b"),
            Err(PathError::Invalid { .. })
        ));
    }

    #[test]
    fn test_relative_path() {
        let paths = VersionPaths::new("demo", "v1").unwrap();
        assert_eq!(paths.relative_path("demo/v1/a/b.json"), Some("a/b.json"));
        assert_eq!(paths.relative_path("demo/v10/a.json"), None);
        assert_eq!(paths.relative_path("demo/v1/"), None);
        assert_eq!(paths.relative_path("other/v1/a.json"), None);
    }

    #[test]
    fn test_system_path_detection() {
        assert!(is_system_path("..LOCK"));
        assert!(is_system_path("sub/..hidden"));
        assert!(!is_system_path("a.json"));
        assert!(!is_system_path("dir/.config"));
        assert!(is_json_document("x/y.json"));
        assert!(!is_json_document("..manifest.json"));
        assert!(!is_json_document("data.csv"));
    }

    #[test]
    fn test_version_from_common_prefix() {
        let paths = ProjectPaths::new("demo").unwrap();
        assert_eq!(paths.version_from_common_prefix("demo/v1/"), Some("v1".to_string()));
        assert_eq!(paths.version_from_common_prefix("demo/..tmp/"), None);
        assert_eq!(paths.version_from_common_prefix("other/v1/"), None);
    }

    #[test]
    fn test_strip_json_suffix() {
        assert_eq!(strip_json_suffix("a.json"), "a");
        assert_eq!(strip_json_suffix("dir/b.csv"), "dir/b.csv");
    }
}
