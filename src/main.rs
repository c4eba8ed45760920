use anyhow::{Context, Result};
use log::info;

use lectern::{ConflictMerger, ConflictScope, MergeRegistry, Settings, Store};

/// Runs one conflict merge pass over the configured database.
/// An optional argument points at a settings file to use instead of the default one.
fn main() -> Result<()> {
    env_logger::init();

    let settings = match std::env::args().nth(1) {
        Some(path) => Settings::load_from(&path)
            .with_context(|| format!("failed to read settings from {}", path))?,
        None => Settings::load().context("failed to read settings")?,
    };

    let database = settings.database_path()?;
    let store = Store::from_settings(&settings)
        .with_context(|| format!("failed to open {}", database.display()))?;
    info!("merging conflicts in {}", database.display());

    let registry = MergeRegistry::with_defaults();
    let report = ConflictMerger::new(&store, &registry)
        .pass(&ConflictScope::All)
        .context("conflict merge pass failed")?;

    println!(
        "resolved {} conflicts, skipped {}",
        report.resolved.len(),
        report.skipped.len()
    );
    for (doc_id, reason) in &report.skipped {
        println!("  {}: {}", doc_id, reason);
    }
    Ok(())
}
