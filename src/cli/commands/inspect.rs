//! Read-only commands: store status and file identification.

use serde::Serialize;
use std::path::Path;
use tokio::runtime::Runtime;

use media_reconciler::config::Config;
use media_reconciler::hasher::{ContentHasher, FileHasher};
use media_reconciler::identity::{self, HashSignal};
use media_reconciler::model::MediaKind;
use media_reconciler::store::{IdentityStore, SqliteStore};

#[derive(Debug, Serialize)]
struct Status {
    owner_id: Option<i64>,
    downloaded: i64,
    records: usize,
}

/// Show record counts, scoped to the configured owner if there is one
pub fn cmd_status(rt: &Runtime, config: &Config, json: bool) -> anyhow::Result<()> {
    rt.block_on(async {
        let store = SqliteStore::connect(&config.db_url()).await?;
        let owner_id = config.library.owner_id;
        let status = Status {
            owner_id,
            downloaded: store.count_downloaded(owner_id).await?,
            records: store.list_all().await?.len(),
        };

        if json {
            println!("{}", serde_json::to_string_pretty(&status)?);
        } else {
            match owner_id {
                Some(owner) => println!("Owner {}: {} downloaded", owner, status.downloaded),
                None => println!("All owners: {} downloaded", status.downloaded),
            }
            println!("Records in store: {}", status.records);
        }
        Ok(())
    })
}

#[derive(Debug, Serialize)]
struct Identification {
    kind: &'static str,
    id: Option<i64>,
    marker: &'static str,
    marker_hash: Option<String>,
    fingerprint: Option<String>,
    error: Option<String>,
}

/// Print the markers in a filename and the file's content fingerprint
pub fn cmd_identify(path: &Path, json: bool) -> anyhow::Result<()> {
    let filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| anyhow::anyhow!("{} has no UTF-8 file name", path.display()))?;
    let kind = MediaKind::from_path(path)
        .ok_or_else(|| anyhow::anyhow!("{} is not a supported media type", path.display()))?;

    let extracted = identity::extract(filename);
    let (marker, marker_hash) = match &extracted.hash {
        HashSignal::None => ("none", None),
        HashSignal::Legacy { hash, .. } => ("legacy", Some(hash.clone())),
        HashSignal::Trusted(hash) => ("trusted", Some(hash.clone())),
    };
    let (fingerprint, error) = match FileHasher.fingerprint(path, kind) {
        Ok(hash) => (Some(hash), None),
        Err(e) => (None, Some(e.to_string())),
    };

    let report = Identification {
        kind: kind.as_str(),
        id: extracted.id,
        marker,
        marker_hash,
        fingerprint,
        error,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("File:        {}", path.display());
    println!("Kind:        {}", report.kind);
    match report.id {
        Some(id) => println!("Id marker:   {}", id),
        None => println!("Id marker:   -"),
    }
    match &report.marker_hash {
        Some(hash) => println!("Hash marker: {} ({})", hash, report.marker),
        None => println!("Hash marker: -"),
    }
    match (&report.fingerprint, &report.error) {
        (Some(hash), _) => {
            println!("Fingerprint: {}", hash);
            if report.marker == "trusted" && report.marker_hash.as_deref() != Some(hash) {
                println!("Warning: trusted marker does not match the content");
            }
        }
        (None, Some(e)) => println!("Fingerprint: failed ({})", e),
        (None, None) => {}
    }
    Ok(())
}
