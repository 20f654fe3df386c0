// network_service/src/tcp.rs
use crate::error::ProviderError;
use crate::provider::{
    BlockHeader, ChainTracker, GetMerklePathResult, GetRawTxResult, GetUtxoStatusResult,
    MerklePathProvider, OutputRef, PostBeefProvider, PostBeefResult, RawTxProvider, TxBundle,
    UtxoStatusProvider,
};
use async_trait::async_trait;
use bincode::{deserialize, serialize};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::warn;

const MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

#[derive(Serialize, Deserialize, Debug)]
pub enum ProviderRequestType {
    GetMerklePath { txid: String },
    GetRawTx { txid: String },
    PostBeef { bundle: TxBundle, txids: Vec<String> },
    GetUtxoStatus { output: OutputRef },
    IsValidRootForHeight { root: String, height: u32 },
    CurrentHeight,
    FindHeaderForHeight { height: u32 },
    FindHeaderByHash { hash: String },
}

#[derive(Serialize, Deserialize, Debug)]
pub enum ProviderResponseType {
    MerklePath(GetMerklePathResult),
    RawTx(GetRawTxResult),
    PostBeef(PostBeefResult),
    UtxoStatus(GetUtxoStatusResult),
    ValidRoot(bool),
    CurrentHeight(u32),
    Header(Option<BlockHeader>),
    Error(String),
}

/// Writes one length prefixed frame.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    stream: &mut W,
    payload: &[u8],
) -> Result<(), ProviderError> {
    stream.write_all(&(payload.len() as u32).to_be_bytes()).await?;
    stream.write_all(payload).await?;
    stream.flush().await?;
    Ok(())
}

/// Reads one length prefixed frame.
pub async fn read_frame<R: AsyncRead + Unpin>(stream: &mut R) -> Result<Vec<u8>, ProviderError> {
    let mut len = [0u8; 4];
    stream.read_exact(&mut len).await?;
    let len = u32::from_be_bytes(len) as usize;
    if len > MAX_FRAME_BYTES {
        return Err(ProviderError::Provider(format!("frame of {} bytes too large", len)));
    }
    let mut buffer = vec![0u8; len];
    stream.read_exact(&mut buffer).await?;
    Ok(buffer)
}

/// Provider reached over the inter-service TCP transport: one bincode
/// request and one bincode response per connection.
pub struct TcpProvider {
    name: String,
    addr: String,
    rate_limiter: Arc<DefaultDirectRateLimiter>,
}

impl TcpProvider {
    pub fn new(name: &str, addr: &str, requests_per_second: u32) -> Self {
        let per_second = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN);
        Self {
            name: name.to_string(),
            addr: addr.to_string(),
            rate_limiter: Arc::new(RateLimiter::direct(Quota::per_second(per_second))),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    async fn request(
        &self,
        request: &ProviderRequestType,
    ) -> Result<ProviderResponseType, ProviderError> {
        self.rate_limiter.until_ready().await;
        let mut stream = TcpStream::connect(&self.addr).await?;
        let encoded = serialize(request)?;
        write_frame(&mut stream, &encoded).await?;
        let buffer = read_frame(&mut stream).await?;
        let response: ProviderResponseType = deserialize(&buffer)?;
        if let ProviderResponseType::Error(e) = response {
            return Err(ProviderError::Provider(e));
        }
        Ok(response)
    }

    fn unexpected(&self) -> ProviderError {
        ProviderError::UnexpectedResponse(self.name.clone())
    }
}

#[async_trait]
impl MerklePathProvider for TcpProvider {
    async fn get_merkle_path(&self, txid: &str) -> GetMerklePathResult {
        let request = ProviderRequestType::GetMerklePath {
            txid: txid.to_string(),
        };
        let outcome = match self.request(&request).await {
            Ok(ProviderResponseType::MerklePath(r)) => Ok(r),
            Ok(_) => Err(self.unexpected()),
            Err(e) => Err(e),
        };
        match outcome {
            Ok(r) => GetMerklePathResult {
                name: Some(self.name.clone()),
                ..r
            },
            Err(e) => {
                warn!("getMerklePath via {} failed: {}", self.name, e);
                GetMerklePathResult {
                    name: Some(self.name.clone()),
                    error: Some(e.to_string()),
                    ..Default::default()
                }
            }
        }
    }
}

#[async_trait]
impl RawTxProvider for TcpProvider {
    async fn get_raw_tx(&self, txid: &str) -> GetRawTxResult {
        let request = ProviderRequestType::GetRawTx {
            txid: txid.to_string(),
        };
        match self.request(&request).await {
            Ok(ProviderResponseType::RawTx(r)) => GetRawTxResult {
                name: Some(self.name.clone()),
                ..r
            },
            Ok(_) => GetRawTxResult {
                txid: txid.to_string(),
                name: Some(self.name.clone()),
                raw_tx: None,
                error: Some(self.unexpected().to_string()),
            },
            Err(e) => GetRawTxResult {
                txid: txid.to_string(),
                name: Some(self.name.clone()),
                raw_tx: None,
                error: Some(e.to_string()),
            },
        }
    }
}

#[async_trait]
impl PostBeefProvider for TcpProvider {
    async fn post_beef(&self, bundle: &TxBundle, txids: &[String]) -> PostBeefResult {
        let request = ProviderRequestType::PostBeef {
            bundle: bundle.clone(),
            txids: txids.to_vec(),
        };
        match self.request(&request).await {
            Ok(ProviderResponseType::PostBeef(r)) => PostBeefResult {
                name: self.name.clone(),
                ..r
            },
            Ok(_) => PostBeefResult::failed(&self.name, txids, self.unexpected().to_string()),
            Err(e) => PostBeefResult::failed(&self.name, txids, e.to_string()),
        }
    }
}

#[async_trait]
impl UtxoStatusProvider for TcpProvider {
    async fn get_utxo_status(&self, output: &OutputRef) -> GetUtxoStatusResult {
        let request = ProviderRequestType::GetUtxoStatus {
            output: output.clone(),
        };
        match self.request(&request).await {
            Ok(ProviderResponseType::UtxoStatus(r)) => GetUtxoStatusResult {
                name: Some(self.name.clone()),
                ..r
            },
            Ok(_) => GetUtxoStatusResult {
                name: Some(self.name.clone()),
                error: Some(self.unexpected().to_string()),
                ..Default::default()
            },
            Err(e) => GetUtxoStatusResult {
                name: Some(self.name.clone()),
                error: Some(e.to_string()),
                ..Default::default()
            },
        }
    }
}

#[async_trait]
impl ChainTracker for TcpProvider {
    async fn is_valid_root_for_height(
        &self,
        root: &str,
        height: u32,
    ) -> Result<bool, ProviderError> {
        let request = ProviderRequestType::IsValidRootForHeight {
            root: root.to_string(),
            height,
        };
        match self.request(&request).await? {
            ProviderResponseType::ValidRoot(valid) => Ok(valid),
            _ => Err(self.unexpected()),
        }
    }

    async fn current_height(&self) -> Result<u32, ProviderError> {
        match self.request(&ProviderRequestType::CurrentHeight).await? {
            ProviderResponseType::CurrentHeight(height) => Ok(height),
            _ => Err(self.unexpected()),
        }
    }

    async fn find_header_for_height(
        &self,
        height: u32,
    ) -> Result<Option<BlockHeader>, ProviderError> {
        match self
            .request(&ProviderRequestType::FindHeaderForHeight { height })
            .await?
        {
            ProviderResponseType::Header(header) => Ok(header),
            _ => Err(self.unexpected()),
        }
    }

    async fn find_header_by_hash(&self, hash: &str) -> Result<Option<BlockHeader>, ProviderError> {
        let request = ProviderRequestType::FindHeaderByHash {
            hash: hash.to_string(),
        };
        match self.request(&request).await? {
            ProviderResponseType::Header(header) => Ok(header),
            _ => Err(self.unexpected()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{PostTxResultForTxid, PostTxStatus};
    use tokio::net::TcpListener;

    async fn serve_once(listener: TcpListener) {
        let (mut stream, _) = listener.accept().await.unwrap();
        let frame = read_frame(&mut stream).await.unwrap();
        let response = match deserialize::<ProviderRequestType>(&frame).unwrap() {
            ProviderRequestType::PostBeef { txids, .. } => {
                ProviderResponseType::PostBeef(PostBeefResult {
                    name: "server".to_string(),
                    txid_results: txids
                        .iter()
                        .map(|t| PostTxResultForTxid::new(t, PostTxStatus::Success))
                        .collect(),
                    error: None,
                })
            }
            ProviderRequestType::CurrentHeight => ProviderResponseType::CurrentHeight(800_001),
            _ => ProviderResponseType::Error("unsupported".to_string()),
        };
        write_frame(&mut stream, &serialize(&response).unwrap())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn posts_bundle_over_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let server = tokio::spawn(serve_once(listener));

        let provider = TcpProvider::new("arc", &addr, 10);
        let mut bundle = TxBundle::default();
        bundle.add("aa", vec![1, 2, 3], None);
        let result = provider.post_beef(&bundle, &bundle.txids()).await;
        server.await.unwrap();

        assert_eq!(result.name, "arc");
        assert!(result.is_success());
    }

    #[tokio::test]
    async fn provider_error_frames_surface_as_errors() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let server = tokio::spawn(serve_once(listener));

        let provider = TcpProvider::new("woc", &addr, 10);
        let result = provider.get_merkle_path("aa").await;
        server.await.unwrap();

        assert_eq!(result.name.as_deref(), Some("woc"));
        assert!(result.merkle_path.is_none());
        assert!(result.error.unwrap().contains("unsupported"));
    }

    #[tokio::test]
    async fn unreachable_provider_reports_failure_per_txid() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let provider = TcpProvider::new("down", &addr, 10);
        let txids = vec!["aa".to_string(), "bb".to_string()];
        let result = provider.post_beef(&TxBundle::default(), &txids).await;
        assert!(!result.is_success());
        assert_eq!(result.txid_results.len(), 2);
        assert!(result
            .txid_results
            .iter()
            .all(|r| r.status == PostTxStatus::Unknown));
    }
}
