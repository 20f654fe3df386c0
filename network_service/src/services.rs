// network_service/src/services.rs
use crate::collection::ServiceCollection;
use crate::provider::{
    ChainTracker, GetMerklePathResult, GetRawTxResult, GetUtxoStatusResult, MerklePathProvider,
    OutputRef, PostBeefProvider, PostBeefResult, PostTxResultForTxid, PostTxStatus,
    RawTxProvider, TxBundle, UtxoStatusProvider,
};
use crate::tcp::TcpProvider;
use crate::txid::verify_txid;
use futures::future::join_all;
use shared::{Chain, ProviderCapability, ProviderConfig};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

fn locked<T: ?Sized>(m: &Mutex<ServiceCollection<T>>) -> MutexGuard<'_, ServiceCollection<T>> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Moves the shared cursor past `failed` when it still points there, so the
/// next call starts with the following provider.
fn use_next<T: ?Sized>(m: &Mutex<ServiceCollection<T>>, failed: &str) {
    let mut services = locked(m);
    if services.name() == Some(failed) {
        services.advance();
    }
}

/// Every network capability the monitor consumes, each behind its own
/// round-robin registry.
pub struct Services {
    pub chain: Chain,
    merkle_paths: Mutex<ServiceCollection<dyn MerklePathProvider>>,
    raw_txs: Mutex<ServiceCollection<dyn RawTxProvider>>,
    post_beefs: Mutex<ServiceCollection<dyn PostBeefProvider>>,
    utxo_statuses: Mutex<ServiceCollection<dyn UtxoStatusProvider>>,
    chain_tracker: Mutex<Option<Arc<dyn ChainTracker>>>,
}

impl Services {
    pub fn new(chain: Chain) -> Self {
        Self {
            chain,
            merkle_paths: Mutex::new(ServiceCollection::new()),
            raw_txs: Mutex::new(ServiceCollection::new()),
            post_beefs: Mutex::new(ServiceCollection::new()),
            utxo_statuses: Mutex::new(ServiceCollection::new()),
            chain_tracker: Mutex::new(None),
        }
    }

    /// Registers a TCP provider for each capability it is configured with.
    pub fn from_config(chain: Chain, providers: &[ProviderConfig]) -> Self {
        let services = Self::new(chain);
        for config in providers {
            let provider = Arc::new(TcpProvider::new(
                &config.name,
                &config.addr,
                config.requests_per_second,
            ));
            for capability in &config.capabilities {
                match capability {
                    ProviderCapability::MerklePath => {
                        services.add_merkle_path_provider(&config.name, provider.clone())
                    }
                    ProviderCapability::RawTx => {
                        services.add_raw_tx_provider(&config.name, provider.clone())
                    }
                    ProviderCapability::PostBeef => {
                        services.add_post_beef_provider(&config.name, provider.clone())
                    }
                    ProviderCapability::UtxoStatus => {
                        services.add_utxo_status_provider(&config.name, provider.clone())
                    }
                    ProviderCapability::ChainTracker => {
                        services.set_chain_tracker(provider.clone())
                    }
                }
            }
            info!(
                "Registered provider {} at {} for {:?}",
                config.name, config.addr, config.capabilities
            );
        }
        services
    }

    pub fn add_merkle_path_provider(&self, name: &str, provider: Arc<dyn MerklePathProvider>) {
        locked(&self.merkle_paths).add(name, provider);
    }

    pub fn add_raw_tx_provider(&self, name: &str, provider: Arc<dyn RawTxProvider>) {
        locked(&self.raw_txs).add(name, provider);
    }

    pub fn add_post_beef_provider(&self, name: &str, provider: Arc<dyn PostBeefProvider>) {
        locked(&self.post_beefs).add(name, provider);
    }

    pub fn add_utxo_status_provider(&self, name: &str, provider: Arc<dyn UtxoStatusProvider>) {
        locked(&self.utxo_statuses).add(name, provider);
    }

    pub fn set_chain_tracker(&self, tracker: Arc<dyn ChainTracker>) {
        *self
            .chain_tracker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(tracker);
    }

    pub fn chain_tracker(&self) -> Option<Arc<dyn ChainTracker>> {
        self.chain_tracker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Removes a provider by name from every registry.
    pub fn remove_provider(&self, name: &str) -> bool {
        let a = locked(&self.merkle_paths).remove(name);
        let b = locked(&self.raw_txs).remove(name);
        let c = locked(&self.post_beefs).remove(name);
        let d = locked(&self.utxo_statuses).remove(name);
        a || b || c || d
    }

    pub fn merkle_path_services(&self) -> ServiceCollection<dyn MerklePathProvider> {
        locked(&self.merkle_paths).clone()
    }

    pub fn post_beef_services(&self) -> ServiceCollection<dyn PostBeefProvider> {
        locked(&self.post_beefs).clone()
    }

    /// Tries each merkle path provider once, starting at the shared cursor,
    /// until one returns a path. `name` is set only when some provider
    /// answered without error; when every provider failed the result holds
    /// just the first error, which callers must not count as an attempt.
    pub async fn get_merkle_path(&self, txid: &str) -> GetMerklePathResult {
        let mut services = self.merkle_path_services();
        let mut result = GetMerklePathResult::default();
        for _ in 0..services.count() {
            let Some(entry) = services.current().cloned() else { break };
            let r = entry.service.get_merkle_path(txid).await;
            if r.merkle_path.is_some() {
                debug!("Merkle path for {} from {}", txid, entry.name);
                return GetMerklePathResult {
                    name: Some(entry.name),
                    ..r
                };
            }
            if let Some(error) = r.error.clone() {
                warn!("Merkle path service {} failed for {}: {}", entry.name, txid, error);
                use_next(&self.merkle_paths, &entry.name);
                if result.name.is_none() && result.error.is_none() {
                    result.error = Some(error);
                }
            } else if result.name.is_none() {
                result = GetMerklePathResult {
                    name: Some(entry.name),
                    ..r
                };
            }
            services.advance();
        }
        result
    }

    /// Fetches a raw transaction, discarding any whose hash does not match.
    pub async fn get_raw_tx(&self, txid: &str) -> GetRawTxResult {
        let mut services = locked(&self.raw_txs).clone();
        let mut result = GetRawTxResult {
            txid: txid.to_string(),
            ..Default::default()
        };
        for _ in 0..services.count() {
            let Some(entry) = services.current().cloned() else { break };
            let r = entry.service.get_raw_tx(txid).await;
            match r.raw_tx {
                Some(raw_tx) if verify_txid(&raw_tx, txid) => {
                    return GetRawTxResult {
                        txid: txid.to_string(),
                        name: Some(entry.name),
                        raw_tx: Some(raw_tx),
                        error: None,
                    };
                }
                Some(_) => {
                    warn!("Raw tx from {} does not hash to {}", entry.name, txid);
                    use_next(&self.raw_txs, &entry.name);
                    result.name = Some(entry.name);
                    result.error = Some("raw tx hash mismatch".to_string());
                }
                None => {
                    if r.error.is_some() {
                        use_next(&self.raw_txs, &entry.name);
                    }
                    result.name = Some(entry.name);
                    result.error = r.error;
                }
            }
            services.advance();
        }
        result
    }

    /// Submits `bundle` to every post provider at once; any one success is
    /// enough for a txid.
    pub async fn post_beef(&self, bundle: &TxBundle, txids: &[String]) -> Vec<PostBeefResult> {
        let services = self.post_beef_services();
        let posts = services.entries().iter().map(|entry| {
            let entry = entry.clone();
            async move {
                let mut r = entry.service.post_beef(bundle, txids).await;
                r.name = entry.name;
                r
            }
        });
        let results = join_all(posts).await;
        for r in &results {
            if let Some(error) = &r.error {
                warn!("Post to {} failed: {}", r.name, error);
            }
        }
        results
    }

    /// Collapses every provider's answer into one result per txid:
    /// success beats double spend, which beats unknown.
    pub fn reduce_post_results(
        results: &[PostBeefResult],
        txids: &[String],
    ) -> Vec<PostTxResultForTxid> {
        txids
            .iter()
            .map(|txid| {
                let mut reduced = PostTxResultForTxid::new(txid, PostTxStatus::Unknown);
                for r in results.iter().flat_map(|r| r.txid_results.iter()) {
                    if &r.txid != txid {
                        continue;
                    }
                    match r.status {
                        PostTxStatus::Success => {
                            reduced.status = PostTxStatus::Success;
                            reduced.error = None;
                        }
                        PostTxStatus::DoubleSpend => {
                            if reduced.status != PostTxStatus::Success {
                                reduced.status = PostTxStatus::DoubleSpend;
                            }
                            for competing in &r.competing_txs {
                                if !reduced.competing_txs.contains(competing) {
                                    reduced.competing_txs.push(competing.clone());
                                }
                            }
                        }
                        PostTxStatus::Unknown => {
                            if reduced.status == PostTxStatus::Unknown && r.error.is_some() {
                                reduced.error = r.error.clone();
                            }
                        }
                    }
                }
                reduced
            })
            .collect()
    }

    pub async fn get_utxo_status(&self, output: &OutputRef) -> GetUtxoStatusResult {
        let mut services = locked(&self.utxo_statuses).clone();
        let mut result = GetUtxoStatusResult::default();
        for _ in 0..services.count() {
            let Some(entry) = services.current().cloned() else { break };
            let r = entry.service.get_utxo_status(output).await;
            if r.error.is_none() && r.is_utxo.is_some() {
                return GetUtxoStatusResult {
                    name: Some(entry.name),
                    ..r
                };
            }
            if r.error.is_some() {
                use_next(&self.utxo_statuses, &entry.name);
            }
            result = GetUtxoStatusResult {
                name: Some(entry.name),
                ..r
            };
            services.advance();
        }
        result
    }
}
