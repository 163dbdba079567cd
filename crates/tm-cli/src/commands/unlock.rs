//! Unlock command implementation

use anyhow::{Context, Result};
use tm_db::MigrationStore;

use crate::cli::GlobalArgs;
use crate::context::RuntimeContext;

/// Execute the unlock command
pub async fn execute(global: &GlobalArgs) -> Result<()> {
    let ctx = RuntimeContext::new(global)?;
    release_held_lock(ctx.store.as_ref()).await
}

async fn release_held_lock(store: &dyn MigrationStore) -> Result<()> {
    store
        .ensure_history()
        .await
        .context("Failed to bootstrap migration history")?;

    let Some(holder) = store
        .lock_info()
        .await
        .context("Failed to read migration lock")?
    else {
        println!("No migration lock is held");
        return Ok(());
    };

    store
        .release_lock(&holder.owner)
        .await
        .context("Failed to release migration lock")?;
    log::warn!("Released migration lock held by {}", holder.owner);
    println!(
        "Released migration lock held by {} since {}",
        holder.owner,
        holder.acquired_at.to_rfc3339()
    );
    Ok(())
}
