//! Query command implementation.

use std::path::Path;

/// Runs the query command: prints the matching objects as a JSON array.
pub fn run(
    path: &Path,
    class: &str,
    predicate: Option<&str>,
    limit: Option<usize>,
) -> Result<(), Box<dyn std::error::Error>> {
    let realm = super::open_existing(path, true)?;
    let mut results = realm.objects(class)?;
    if let Some(predicate) = predicate {
        results = results.filtered(predicate, &[])?;
    }
    let objects = results.objects()?;
    tracing::debug!(class, matches = objects.len(), "query evaluated");

    let json = objects
        .iter()
        .take(limit.unwrap_or(usize::MAX))
        .map(|o| o.to_json())
        .collect::<Result<Vec<_>, _>>()?;
    realm.close();

    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
