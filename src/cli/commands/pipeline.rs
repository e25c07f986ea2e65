//! Pipeline commands: full runs, migration and verification.

use std::sync::Arc;
use tokio::runtime::Runtime;
use tracing::{info, warn};

use media_reconciler::config::Config;
use media_reconciler::pipeline::{CancelHandle, Pipeline, PipelineStats};
use media_reconciler::store::{IdentityStore, SqliteStore};

/// Open the store and build a pipeline from the effective config.
async fn open_pipeline(config: &Config) -> anyhow::Result<Pipeline> {
    let store: Arc<dyn IdentityStore> = Arc::new(SqliteStore::connect(&config.db_url()).await?);
    Ok(Pipeline::from_config(config, store)?)
}

/// Cancel the pipeline on Ctrl+C. In-flight candidates still finish.
fn cancel_on_ctrl_c(handle: CancelHandle) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!(target: "pipeline", "Interrupted, finishing in-flight files");
            handle.cancel();
        }
    });
}

fn print_stats(stats: &PipelineStats, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(stats)?);
    } else {
        println!("{}", stats);
    }
    Ok(())
}

/// Run the full pipeline over the configured library
pub fn cmd_run(rt: &Runtime, config: &Config, json: bool) -> anyhow::Result<()> {
    rt.block_on(async {
        let pipeline = open_pipeline(config).await?;
        info!(root = %pipeline.root().display(), "Reconciling library");
        cancel_on_ctrl_c(pipeline.cancel_handle());

        let stats = pipeline.run().await?;
        print_stats(&stats, json)
    })
}

/// Run only the legacy marker migration
pub fn cmd_migrate(rt: &Runtime, config: &Config, json: bool) -> anyhow::Result<()> {
    rt.block_on(async {
        let pipeline = open_pipeline(config).await?;
        cancel_on_ctrl_c(pipeline.cancel_handle());

        let stats = pipeline.migrate().await?;
        print_stats(&stats, json)
    })
}

/// Run only the verification pass
pub fn cmd_verify(rt: &Runtime, config: &Config, json: bool) -> anyhow::Result<()> {
    rt.block_on(async {
        let pipeline = open_pipeline(config).await?;
        let report = pipeline.verify().await?;

        if json {
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else {
            println!(
                "Checked {} downloaded records, {} marked missing",
                report.checked, report.missing
            );
        }
        Ok(())
    })
}
