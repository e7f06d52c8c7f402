//! Snapshot persistence for requests and deposits.
//!
//! Records are stored as flat JSON arrays, field for field, one file per
//! collection. Writes go to a temp file first and are renamed into place so
//! a crash mid-write leaves the previous snapshot intact.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use super::types::{Deposit, SwapRequest};

const REQUESTS_FILE: &str = "requests.json";
const DEPOSITS_FILE: &str = "deposits.json";

#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn save_requests(&self, requests: &[SwapRequest]) -> anyhow::Result<()>;
    async fn load_requests(&self) -> anyhow::Result<Vec<SwapRequest>>;
    async fn save_deposits(&self, deposits: &[Deposit]) -> anyhow::Result<()>;
    async fn load_deposits(&self) -> anyhow::Result<Vec<Deposit>>;
}

#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub async fn open(dir: impl AsRef<Path>) -> anyhow::Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create data dir {}", dir.display()))?;
        Ok(Self { dir })
    }

    async fn write<T: Serialize + Sync>(&self, name: &str, records: &[T]) -> anyhow::Result<()> {
        let path = self.dir.join(name);
        let tmp = self.dir.join(format!("{}.tmp", name));
        let body = serde_json::to_vec_pretty(records).context("Failed to encode snapshot")?;
        tokio::fs::write(&tmp, &body)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("Failed to replace {}", path.display()))?;
        debug!("💾 Saved {} record(s) to {}", records.len(), path.display());
        Ok(())
    }

    async fn read<T: DeserializeOwned>(&self, name: &str) -> anyhow::Result<Vec<T>> {
        let path = self.dir.join(name);
        match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .with_context(|| format!("Failed to parse {}", path.display())),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(vec![]),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
        }
    }
}

#[async_trait]
impl SnapshotStore for JsonFileStore {
    async fn save_requests(&self, requests: &[SwapRequest]) -> anyhow::Result<()> {
        self.write(REQUESTS_FILE, requests).await
    }

    async fn load_requests(&self) -> anyhow::Result<Vec<SwapRequest>> {
        self.read(REQUESTS_FILE).await
    }

    async fn save_deposits(&self, deposits: &[Deposit]) -> anyhow::Result<()> {
        self.write(DEPOSITS_FILE, deposits).await
    }

    async fn load_deposits(&self) -> anyhow::Result<Vec<Deposit>> {
        self.read(DEPOSITS_FILE).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::swap::testing::{addr, params};
    use crate::swap::types::{Amount, DepositStatus, Phase, PrivacyData};

    #[tokio::test]
    async fn test_missing_files_load_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path()).await.unwrap();
        assert!(store.load_requests().await.unwrap().is_empty());
        assert!(store.load_deposits().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_request_and_deposit_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path().join("nested")).await.unwrap();

        let mut req = SwapRequest::new(params("0xdep", 1000), 3).unwrap();
        req.phase = Phase::Redepositing;
        req.proxy_tx_refs.withdrawal = Some("0xw".into());
        req.proxy_tx_refs.trade = Some("0xt".into());
        req.output_amount = Some("340282366920938463463374607431768211457".parse().unwrap());
        req.error = Some("transient: rpc timeout".into());

        let mut dep = crate::swap::types::Deposit::new(addr(1), addr(2), Amount::from(1000), "0xdep")
            .with_status(DepositStatus::PartiallyUsed)
            .with_privacy_data(PrivacyData(serde_json::json!({"secret": "s", "nullifier": "n"})));
        dep.remaining_balance = Some(Amount::from(400));

        store.save_requests(&[req.clone()]).await.unwrap();
        store.save_deposits(&[dep.clone()]).await.unwrap();

        assert_eq!(store.load_requests().await.unwrap(), vec![req]);
        assert_eq!(store.load_deposits().await.unwrap(), vec![dep]);
        assert!(!dir.path().join("nested").join("requests.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_save_overwrites_previous_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path()).await.unwrap();
        let a = SwapRequest::new(params("0xa", 1), 3).unwrap();
        let b = SwapRequest::new(params("0xb", 2), 3).unwrap();
        store.save_requests(&[a, b.clone()]).await.unwrap();
        store.save_requests(&[b.clone()]).await.unwrap();
        assert_eq!(store.load_requests().await.unwrap(), vec![b]);
    }
}
