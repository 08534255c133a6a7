//! Store manifest.
//!
//! `MANIFEST.json` records the format version, the schema version and the
//! schema of a file-backed store so that tools can inspect a store without
//! replaying its log.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::schema::{ObjectSchemaDef, Schema};

/// Current manifest format version (major, minor).
pub const FORMAT_VERSION: (u16, u16) = (1, 0);

/// Store metadata persisted next to the commit log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    /// Format version (major, minor).
    pub format_version: (u16, u16),
    /// Schema version of the stored data.
    pub schema_version: u64,
    /// Stored schema, hidden classes included.
    pub schema: Vec<ObjectSchemaDef>,
}

impl Default for Manifest {
    fn default() -> Self {
        Self {
            format_version: FORMAT_VERSION,
            schema_version: 0,
            schema: Vec::new(),
        }
    }
}

impl Manifest {
    /// Builds a manifest describing `schema` at `schema_version`.
    #[must_use]
    pub fn new(schema: &Schema, schema_version: u64) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            schema_version,
            schema: schema.to_defs(),
        }
    }

    /// Validates and returns the stored schema.
    ///
    /// # Errors
    ///
    /// Fails if the stored schema no longer validates.
    pub fn schema(&self) -> CoreResult<Schema> {
        Schema::new(self.schema.clone())
    }

    /// Serializes the manifest as pretty JSON.
    ///
    /// # Errors
    ///
    /// Fails if serialization fails.
    pub fn encode(&self) -> CoreResult<Vec<u8>> {
        serde_json::to_vec_pretty(self)
            .map_err(|e| CoreError::invalid_format(format!("cannot encode manifest: {e}")))
    }

    /// Parses a manifest, rejecting newer major format versions.
    ///
    /// # Errors
    ///
    /// Fails on malformed JSON or an unsupported format version.
    pub fn decode(data: &[u8]) -> CoreResult<Self> {
        let manifest: Self = serde_json::from_slice(data)
            .map_err(|e| CoreError::invalid_format(format!("invalid manifest: {e}")))?;
        if manifest.format_version.0 > FORMAT_VERSION.0 {
            return Err(CoreError::invalid_format(format!(
                "unsupported format version {}.{}",
                manifest.format_version.0, manifest.format_version.1
            )));
        }
        Ok(manifest)
    }
}
