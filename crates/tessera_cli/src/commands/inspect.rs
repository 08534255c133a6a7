//! Inspect command implementation.

use serde::Serialize;
use std::path::Path;

/// Store inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Store path.
    pub path: String,
    /// Manifest format version.
    pub format_version: String,
    /// Schema version.
    pub schema_version: u64,
    /// Version of the latest commit.
    pub version: u64,
    /// Commit log size in bytes.
    pub log_size: u64,
    /// Commit log size after compaction.
    pub compacted_size: u64,
    /// Per-class statistics.
    pub classes: Vec<ClassStats>,
}

/// Statistics for a single class.
#[derive(Debug, Serialize)]
pub struct ClassStats {
    /// Class name.
    pub name: String,
    /// Number of stored objects.
    pub object_count: usize,
    /// Whether the class is embedded.
    pub embedded: bool,
    /// Primary key property, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_key: Option<String>,
    /// `name: type` of every property (if requested).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub properties: Option<Vec<String>>,
}

/// Runs the inspect command.
pub fn run(path: &Path, show_schema: bool, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let manifest = tessera_core::dir::read_manifest(path)?
        .ok_or_else(|| format!("No store found at {:?}", path))?;
    let realm = super::open_existing(path, true)?;
    let state = tessera_core::read_store(path)?;

    let classes = state
        .tables()
        .map(|table| {
            let schema = table.schema();
            ClassStats {
                name: schema.name.clone(),
                object_count: table.len(),
                embedded: schema.embedded,
                primary_key: schema.primary_key.clone(),
                properties: show_schema.then(|| {
                    schema
                        .properties
                        .iter()
                        .map(|p| format!("{}: {}", p.name, p.label()))
                        .collect()
                }),
            }
        })
        .collect();

    let result = InspectResult {
        path: path.display().to_string(),
        format_version: format!("{}.{}", manifest.format_version.0, manifest.format_version.1),
        schema_version: manifest.schema_version,
        version: state.version().as_u64(),
        log_size: realm.compute_size()?,
        compacted_size: realm.compacted_size()?,
        classes,
    };
    realm.close();

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

fn print_text_output(result: &InspectResult) {
    println!("Tessera Store Inspection");
    println!("========================");
    println!();
    println!("Path:            {}", result.path);
    println!("Format version:  {}", result.format_version);
    println!("Schema version:  {}", result.schema_version);
    println!("Version:         {}", result.version);
    println!();
    println!("Commit log:");
    println!("  Size:            {} bytes", result.log_size);
    println!("  Compacted size:  {} bytes", result.compacted_size);
    println!();
    println!("Classes:");
    for class in &result.classes {
        let mut flags = Vec::new();
        if class.embedded {
            flags.push("embedded".to_string());
        }
        if let Some(pk) = &class.primary_key {
            flags.push(format!("primary key '{pk}'"));
        }
        let flags = if flags.is_empty() {
            String::new()
        } else {
            format!(" ({})", flags.join(", "))
        };
        println!("  {}: {} objects{}", class.name, class.object_count, flags);
        if let Some(properties) = &class.properties {
            for property in properties {
                println!("    - {property}");
            }
        }
    }
}
