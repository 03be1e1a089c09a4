//! Scripted in-memory peer network and recording helpers shared by the
//! integration tests.

#![allow(dead_code)]

use bitcoin::hashes::Hash;
use bitcoin::{BlockHash, Network};
use spv_wallet_kit::chain::{ChainHandle, StoredHeader};
use spv_wallet_kit::kit::{KitConfig, KitEvent, KitEventHandler, ServiceState};
use spv_wallet_kit::network::{
    DownloadListener, NetworkError, PeerDiscovery, PeerNetwork, PeerNetworkFactory,
    TransactionBroadcaster,
};
use spv_wallet_kit::wallet::{ExtensionContext, ExtensionError, SharedWallet, WalletExtension};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

pub const WAIT: Duration = Duration::from_secs(10);

/// Shared, ordered log of what happened, written by the mock network, the
/// event recorder and setup hooks.
#[derive(Clone, Default)]
pub struct Timeline(Arc<Mutex<Vec<String>>>);

impl Timeline {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn position(&self, entry: &str) -> usize {
        self.entries()
            .iter()
            .position(|e| e == entry)
            .unwrap_or_else(|| panic!("{entry} missing from {:?}", self.entries()))
    }

    pub fn contains(&self, entry: &str) -> bool {
        self.entries().iter().any(|e| e == entry)
    }

    pub fn count(&self, entry: &str) -> usize {
        self.entries().iter().filter(|e| *e == entry).count()
    }
}

#[derive(Debug, Clone, Default)]
pub struct MockBehavior {
    pub fail_start: bool,
    pub blocks_to_download: u32,
    /// Announce the download but never deliver a block.
    pub hang_download: bool,
}

impl MockBehavior {
    pub fn blocks(blocks_to_download: u32) -> Self {
        Self {
            blocks_to_download,
            ..Self::default()
        }
    }
}

pub struct MockBroadcaster;

#[async_trait::async_trait]
impl TransactionBroadcaster for MockBroadcaster {
    async fn broadcast(&self, raw_tx: Vec<u8>) -> Result<String, NetworkError> {
        Ok(hex::encode(&raw_tx[..raw_tx.len().min(4)]))
    }
}

pub struct MockPeerNetwork {
    chain: ChainHandle,
    behavior: MockBehavior,
    timeline: Timeline,
    pub addresses: Mutex<Vec<SocketAddr>>,
    pub max_connections: Mutex<Option<usize>>,
    pub discoveries: Mutex<Vec<&'static str>>,
    pub wallets: Mutex<Vec<SharedWallet>>,
    pub user_agent: Mutex<Option<(String, String)>>,
    download: Mutex<Option<JoinHandle<()>>>,
}

pub fn next_header(parent: &StoredHeader) -> StoredHeader {
    let height = parent.height + 1;
    let mut bytes = [0x5au8; 32];
    bytes[..4].copy_from_slice(&height.to_le_bytes());
    StoredHeader {
        height,
        hash: BlockHash::from_byte_array(bytes),
        time: parent.time + 600,
    }
}

#[async_trait::async_trait]
impl PeerNetwork for MockPeerNetwork {
    fn set_user_agent(&self, name: &str, version: &str) {
        *self.user_agent.lock().unwrap() = Some((name.to_string(), version.to_string()));
        self.timeline.push("network:set_user_agent");
    }

    fn add_address(&self, address: SocketAddr) {
        self.addresses.lock().unwrap().push(address);
        self.timeline.push("network:add_address");
    }

    fn set_max_connections(&self, max: usize) {
        *self.max_connections.lock().unwrap() = Some(max);
        self.timeline.push("network:set_max_connections");
    }

    fn add_discovery(&self, discovery: Arc<dyn PeerDiscovery>) {
        self.discoveries.lock().unwrap().push(discovery.name());
        self.timeline.push("network:add_discovery");
    }

    fn add_wallet(&self, wallet: SharedWallet) {
        self.wallets.lock().unwrap().push(wallet);
        self.timeline.push("network:add_wallet");
    }

    async fn start(&self) -> Result<(), NetworkError> {
        self.timeline.push("network:start");
        tokio::task::yield_now().await;
        if self.behavior.fail_start {
            return Err(NetworkError::StartFailed("no peers reachable".to_string()));
        }
        Ok(())
    }

    fn start_chain_download(&self, listener: Arc<dyn DownloadListener>) {
        self.timeline.push("network:start_chain_download");
        let chain = self.chain.clone();
        let behavior = self.behavior.clone();
        let timeline = self.timeline.clone();

        let task = tokio::spawn(async move {
            let total = behavior.blocks_to_download;
            listener.on_chain_download_started(total);
            if behavior.hang_download {
                std::future::pending::<()>().await;
            }
            for delivered in 1..=total {
                tokio::time::sleep(Duration::from_millis(5)).await;
                let header = {
                    let mut chain = chain.lock().await;
                    let Ok(head) = chain.head().await else { return };
                    let header = next_header(&head);
                    if chain.add_header(head.hash, header).await.is_err() {
                        return;
                    }
                    header
                };
                listener.on_block_downloaded(header.height, total - delivered);
            }
            timeline.push("network:download_complete");
        });
        *self.download.lock().unwrap() = Some(task);
    }

    async fn stop(&self) -> Result<(), NetworkError> {
        self.timeline.push("network:stop");
        let task = self.download.lock().unwrap().take();
        if let Some(task) = task {
            task.abort();
        }
        Ok(())
    }

    fn broadcaster(&self) -> Arc<dyn TransactionBroadcaster> {
        Arc::new(MockBroadcaster)
    }
}

pub struct MockNetworkFactory {
    behavior: MockBehavior,
    timeline: Timeline,
    created: Mutex<Option<Arc<MockPeerNetwork>>>,
}

impl MockNetworkFactory {
    pub fn new(behavior: MockBehavior, timeline: Timeline) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            timeline,
            created: Mutex::new(None),
        })
    }

    pub fn network(&self) -> Arc<MockPeerNetwork> {
        self.created
            .lock()
            .unwrap()
            .clone()
            .expect("peer network was never created")
    }

    pub fn was_created(&self) -> bool {
        self.created.lock().unwrap().is_some()
    }
}

impl PeerNetworkFactory for MockNetworkFactory {
    fn create(&self, _network: Network, chain: ChainHandle) -> Arc<dyn PeerNetwork> {
        let network = Arc::new(MockPeerNetwork {
            chain,
            behavior: self.behavior.clone(),
            timeline: self.timeline.clone(),
            addresses: Mutex::new(Vec::new()),
            max_connections: Mutex::new(None),
            discoveries: Mutex::new(Vec::new()),
            wallets: Mutex::new(Vec::new()),
            user_agent: Mutex::new(None),
            download: Mutex::new(None),
        });
        *self.created.lock().unwrap() = Some(network.clone());
        network
    }
}

/// Records every kit event and mirrors a short label onto the timeline.
#[derive(Default)]
pub struct EventRecorder {
    events: Mutex<Vec<KitEvent>>,
    timeline: Timeline,
}

impl EventRecorder {
    pub fn new(timeline: Timeline) -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
            timeline,
        })
    }

    pub fn events(&self) -> Vec<KitEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, predicate: impl Fn(&KitEvent) -> bool) -> usize {
        self.events().iter().filter(|e| predicate(e)).count()
    }
}

pub fn label(event: &KitEvent) -> String {
    match event {
        KitEvent::StateChanged { to, .. } => format!("state:{to}"),
        other => {
            let debug = format!("{other:?}");
            let name: String = debug.chars().take_while(|c| c.is_alphanumeric()).collect();
            format!("event:{name}")
        }
    }
}

#[async_trait::async_trait]
impl KitEventHandler for EventRecorder {
    async fn handle(&self, event: &KitEvent) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.events.lock().unwrap().push(event.clone());
        self.timeline.push(label(event));
        Ok(())
    }

    fn name(&self) -> &'static str {
        "recorder"
    }
}

/// Extension that keeps an opaque payload and remembers whether it was
/// handed a broadcaster.
pub struct ChannelsExtension {
    payload: Vec<u8>,
    pub bound: Arc<AtomicBool>,
    pub loads: Arc<AtomicUsize>,
}

pub const CHANNELS_ID: &str = "test.channels";

impl ChannelsExtension {
    pub fn new(bound: Arc<AtomicBool>, loads: Arc<AtomicUsize>) -> Self {
        Self {
            payload: b"open-channels:0".to_vec(),
            bound,
            loads,
        }
    }
}

impl WalletExtension for ChannelsExtension {
    fn id(&self) -> &str {
        CHANNELS_ID
    }

    fn serialize(&self) -> Vec<u8> {
        self.payload.clone()
    }

    fn deserialize(&mut self, _ctx: &ExtensionContext, data: &[u8]) -> Result<(), ExtensionError> {
        self.payload = data.to_vec();
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn bind_broadcaster(&mut self, _broadcaster: Arc<dyn TransactionBroadcaster>) -> bool {
        self.bound.store(true, Ordering::SeqCst);
        true
    }
}

pub fn regtest_config(dir: &Path) -> KitConfig {
    KitConfig::new(Network::Regtest, dir, "kit.wallet", dir.join("kit.spvchain"))
        .with_auto_save_interval(Duration::from_millis(50))
}

pub async fn wait_for_state(mut rx: tokio::sync::watch::Receiver<ServiceState>, state: ServiceState) {
    tokio::time::timeout(WAIT, rx.wait_for(|s| *s == state))
        .await
        .expect("timed out waiting for state")
        .expect("state channel closed");
}
