//! Compact command implementation.

use std::path::Path;

/// Compaction statistics.
#[derive(Debug)]
pub struct CompactStats {
    /// Bytes before compaction.
    pub bytes_before: u64,
    /// Bytes after compaction.
    pub bytes_after: u64,
}

impl CompactStats {
    fn saved_percent(&self) -> f64 {
        if self.bytes_before > 0 {
            (self.bytes_before.saturating_sub(self.bytes_after) as f64 / self.bytes_before as f64)
                * 100.0
        } else {
            0.0
        }
    }
}

/// Runs the compact command.
pub fn run(path: &Path, dry_run: bool) -> Result<(), Box<dyn std::error::Error>> {
    println!("Compacting commit log at {:?}", path);
    if dry_run {
        println!("(dry run - no changes will be made)");
    }
    println!();

    let realm = super::open_existing(path, dry_run)?;
    let bytes_before = realm.compute_size()?;
    let bytes_after = if dry_run {
        realm.compacted_size()?
    } else {
        realm.compact()?;
        realm.compute_size()?
    };
    realm.close();

    let stats = CompactStats {
        bytes_before,
        bytes_after,
    };
    println!("  Size before: {} bytes", stats.bytes_before);
    println!("  Size after:  {} bytes", stats.bytes_after);
    println!(
        "  Space saved: {} bytes ({:.1}%)",
        stats.bytes_before.saturating_sub(stats.bytes_after),
        stats.saved_percent()
    );

    Ok(())
}
