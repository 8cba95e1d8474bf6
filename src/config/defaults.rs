//! Built-in configuration defaults (first layer).

use serde_json::{json, Value};

use gypsum_store::DEFAULT_PAGE_SIZE;

use crate::queue::DEFAULT_API_URL;

/// Default concurrency for store requests.
pub const DEFAULT_CONCURRENCY: usize = 8;

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_FILE: &str = "gypsum.toml";

/// Built-in defaults as a mergeable layer.
pub fn builtin() -> Value {
    json!({
        "store": {
            "backend": "fs",
            "root": "store"
        },
        "queue": {
            "backend": "github",
            "api_url": DEFAULT_API_URL
        },
        "publish": {
            "concurrency": DEFAULT_CONCURRENCY,
            "schema_dir": "schemas"
        },
        "purge": {
            "concurrency": DEFAULT_CONCURRENCY
        },
        "list": {
            "page_size": DEFAULT_PAGE_SIZE
        }
    })
}
