//! Scriptable fakes for the native collaborators

use super::bridge::{
    InitWalletRequest, InitWalletResponse, NativeBridge, NodeInfo, StatusFlags, SyncTracker,
    WalletState, STATUS_PROCESS_STARTED, STATUS_SERVICE_BOUND,
};
use super::error::BridgeError;
use super::events::{EventHub, NativeEvent, SharedEventHub, STATE_EVENT};
use super::peers::Pinger;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A native call as seen by the fake
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Initialize(String),
    DataDirExists(String),
    PrepareDirectories(String),
    WriteConfig(String),
    StartProcess(String),
    StopProcess,
    KillProcess,
    CheckStatus,
    SubscribeState,
    Unlock(String),
    GenerateSeed,
    InitWallet(InitWalletRequest),
    GetInfo,
}

/// Encode a wallet state the way the fake decodes it
pub fn state_event(state: WalletState) -> NativeEvent {
    NativeEvent::with_data(state.code().to_le_bytes().to_vec())
}

#[derive(Default)]
struct Script {
    running: bool,
    dir_missing: bool,
    start_results: VecDeque<Result<(), BridgeError>>,
    stop_results: VecDeque<Result<(), BridgeError>>,
    kill_results: VecDeque<Result<(), BridgeError>>,
    status_results: VecDeque<Result<StatusFlags, BridgeError>>,
    /// Report running for this many polls after a stop
    lingering_polls: u32,
    unlock_results: VecDeque<Result<(), BridgeError>>,
    seed_results: VecDeque<Result<Vec<String>, BridgeError>>,
    info_results: VecDeque<Result<NodeInfo, BridgeError>>,
    subscriptions: VecDeque<Vec<NativeEvent>>,
    default_events: Vec<NativeEvent>,
}

/// In-memory stand-in for the native bridge
pub struct FakeBridge {
    pub events: SharedEventHub,
    script: Mutex<Script>,
    calls: Mutex<Vec<Call>>,
}

impl FakeBridge {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            events: Arc::new(EventHub::new()),
            script: Mutex::new(Script::default()),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, predicate: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|c| predicate(c)).count()
    }

    pub fn set_running(&self, running: bool) {
        self.script.lock().unwrap().running = running;
    }

    pub fn set_dir_missing(&self, missing: bool) {
        self.script.lock().unwrap().dir_missing = missing;
    }

    pub fn push_start(&self, result: Result<(), &str>) {
        self.script.lock().unwrap().start_results.push_back(result.map_err(BridgeError::from));
    }

    pub fn push_stop(&self, result: Result<(), &str>) {
        self.script.lock().unwrap().stop_results.push_back(result.map_err(BridgeError::from));
    }

    pub fn push_kill(&self, result: Result<(), &str>) {
        self.script.lock().unwrap().kill_results.push_back(result.map_err(BridgeError::from));
    }

    pub fn push_status(&self, result: Result<u32, &str>) {
        self.script
            .lock()
            .unwrap()
            .status_results
            .push_back(result.map(StatusFlags).map_err(BridgeError::from));
    }

    pub fn set_lingering_polls(&self, polls: u32) {
        self.script.lock().unwrap().lingering_polls = polls;
    }

    pub fn push_unlock(&self, result: Result<(), &str>) {
        self.script.lock().unwrap().unlock_results.push_back(result.map_err(BridgeError::from));
    }

    pub fn push_seed(&self, result: Result<&[&str], &str>) {
        self.script.lock().unwrap().seed_results.push_back(
            result
                .map(|words| words.iter().map(|w| w.to_string()).collect())
                .map_err(BridgeError::from),
        );
    }

    pub fn push_info(&self, result: Result<NodeInfo, &str>) {
        self.script.lock().unwrap().info_results.push_back(result.map_err(BridgeError::from));
    }

    /// Events emitted by the next `subscribe_state` call
    pub fn push_subscription(&self, events: Vec<NativeEvent>) {
        self.script.lock().unwrap().subscriptions.push_back(events);
    }

    /// Events emitted by every subscription without a scripted one
    pub fn set_default_events(&self, events: Vec<NativeEvent>) {
        self.script.lock().unwrap().default_events = events;
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl NativeBridge for FakeBridge {
    async fn initialize(&self, lnd_dir: &str) -> Result<(), BridgeError> {
        self.record(Call::Initialize(lnd_dir.to_string()));
        Ok(())
    }

    async fn data_dir_exists(&self, lnd_dir: &str) -> Result<bool, BridgeError> {
        self.record(Call::DataDirExists(lnd_dir.to_string()));
        Ok(!self.script.lock().unwrap().dir_missing)
    }

    async fn prepare_directories(&self, lnd_dir: &str) -> Result<(), BridgeError> {
        self.record(Call::PrepareDirectories(lnd_dir.to_string()));
        Ok(())
    }

    async fn write_config(&self, _lnd_dir: &str, config: &str) -> Result<(), BridgeError> {
        self.record(Call::WriteConfig(config.to_string()));
        Ok(())
    }

    async fn start_process(
        &self,
        args: &str,
        _lnd_dir: &str,
        _tor_enabled: bool,
        _testnet: bool,
    ) -> Result<(), BridgeError> {
        self.record(Call::StartProcess(args.to_string()));
        let mut script = self.script.lock().unwrap();
        let result = script.start_results.pop_front().unwrap_or(Ok(()));
        if result.is_ok() {
            script.running = true;
        }
        result
    }

    async fn stop_process(&self) -> Result<(), BridgeError> {
        self.record(Call::StopProcess);
        let mut script = self.script.lock().unwrap();
        let result = script.stop_results.pop_front().unwrap_or(Ok(()));
        if result.is_ok() {
            script.running = false;
        }
        result
    }

    async fn kill_process(&self) -> Result<(), BridgeError> {
        self.record(Call::KillProcess);
        let mut script = self.script.lock().unwrap();
        let result = script.kill_results.pop_front().unwrap_or(Ok(()));
        if result.is_ok() {
            script.running = false;
        }
        result
    }

    async fn check_status(&self) -> Result<StatusFlags, BridgeError> {
        self.record(Call::CheckStatus);
        let mut script = self.script.lock().unwrap();
        if let Some(result) = script.status_results.pop_front() {
            return result;
        }
        let running = if script.lingering_polls > 0 && !script.running {
            script.lingering_polls -= 1;
            true
        } else {
            script.running
        };
        let mut flags = STATUS_SERVICE_BOUND;
        if running {
            flags |= STATUS_PROCESS_STARTED;
        }
        Ok(StatusFlags(flags))
    }

    async fn subscribe_state(&self) -> Result<(), BridgeError> {
        self.record(Call::SubscribeState);
        let events = {
            let mut script = self.script.lock().unwrap();
            script
                .subscriptions
                .pop_front()
                .unwrap_or_else(|| script.default_events.clone())
        };
        for event in events {
            self.events.emit(STATE_EVENT, event);
        }
        Ok(())
    }

    fn decode_state_event(&self, data: &[u8]) -> Result<WalletState, BridgeError> {
        let bytes: [u8; 4] = data
            .try_into()
            .map_err(|_| BridgeError::new("invalid response: malformed state payload"))?;
        Ok(WalletState::from_code(i32::from_le_bytes(bytes)))
    }

    async fn unlock_wallet(&self, password: &str) -> Result<(), BridgeError> {
        self.record(Call::Unlock(password.to_string()));
        self.script.lock().unwrap().unlock_results.pop_front().unwrap_or(Ok(()))
    }

    async fn generate_seed(&self) -> Result<Vec<String>, BridgeError> {
        self.record(Call::GenerateSeed);
        self.script
            .lock()
            .unwrap()
            .seed_results
            .pop_front()
            .unwrap_or_else(|| Ok(vec!["abandon".to_string(); 24]))
    }

    async fn init_wallet(&self, request: InitWalletRequest) -> Result<InitWalletResponse, BridgeError> {
        self.record(Call::InitWallet(request));
        Ok(InitWalletResponse {
            admin_macaroon: vec![2, 1, 3],
        })
    }

    async fn get_info(&self) -> Result<NodeInfo, BridgeError> {
        self.record(Call::GetInfo);
        self.script.lock().unwrap().info_results.pop_front().unwrap_or_else(|| {
            Ok(NodeInfo {
                identity_pubkey: "02abc".to_string(),
                block_height: 800_000,
                block_hash: "00000000".to_string(),
                synced_to_chain: false,
            })
        })
    }
}

/// Counts how often sync tracking was started
#[derive(Default)]
pub struct FakeSyncTracker {
    pub starts: AtomicU32,
    syncing: AtomicBool,
}

impl FakeSyncTracker {
    /// Sync ran to completion
    pub fn finish(&self) {
        self.syncing.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl SyncTracker for FakeSyncTracker {
    fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::SeqCst)
    }

    async fn start(&self) {
        self.starts.fetch_add(1, Ordering::SeqCst);
        self.syncing.store(true, Ordering::SeqCst);
    }
}

/// Pinger answering from a fixed latency table; unknown hosts time out
#[derive(Default)]
pub struct FakePinger {
    latencies: HashMap<String, u64>,
    pub pinged: Mutex<Vec<String>>,
}

impl FakePinger {
    pub fn with(latencies: &[(&str, u64)]) -> Self {
        Self {
            latencies: latencies.iter().map(|(h, ms)| (h.to_string(), *ms)).collect(),
            pinged: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Pinger for FakePinger {
    async fn ping(&self, host: &str, timeout: Duration) -> std::io::Result<Duration> {
        self.pinged.lock().unwrap().push(host.to_string());
        match self.latencies.get(host) {
            Some(ms) if Duration::from_millis(*ms) <= timeout => Ok(Duration::from_millis(*ms)),
            _ => Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "ping timed out")),
        }
    }
}
