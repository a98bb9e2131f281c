//! In-memory collaborators for tests and offline simulation.
//!
//! Every type here is a cheap cloneable handle, so a test can keep one
//! copy for inspection and hand another to [`Access::register`].

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use meshaccess_node::{
    Clock, Composition, LabelUuid, NetTx, RandomSource, Transport, TransportError, VirtualLabels,
};
use meshaccess_settings::{MemStore, SettingsError, SettingsStore};

use crate::access::{Access, Collaborators};
use crate::config::AccessConfig;
use crate::error::Result;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A clock that only moves when told to.
#[derive(Debug, Clone, Default)]
pub struct ManualClock(Arc<AtomicU64>);

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self(Arc::new(AtomicU64::new(start_ms)))
    }

    pub fn now(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }

    pub fn set(&self, ms: u64) {
        self.0.store(ms, Ordering::SeqCst);
    }

    pub fn advance(&self, ms: u64) {
        self.0.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now()
    }
}

/// Returns the same value forever.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedRandom(pub u16);

impl RandomSource for FixedRandom {
    fn fill(&mut self, dst: &mut [u8]) {
        let bytes = self.0.to_le_bytes();
        for (i, b) in dst.iter_mut().enumerate() {
            *b = bytes[i % 2];
        }
    }

    fn next_u16(&mut self) -> u16 {
        self.0
    }
}

/// One access PDU handed to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentPdu {
    pub at: u64,
    pub src: u16,
    pub dst: u16,
    pub app_idx: u16,
    pub ttl: u8,
    pub friend_cred: bool,
    pub uuid: Option<LabelUuid>,
    pub sdu: Vec<u8>,
}

/// Transport that records every send, stamped with a [`ManualClock`].
#[derive(Debug, Clone, Default)]
pub struct RecordingTransport {
    clock: ManualClock,
    sent: Arc<Mutex<Vec<SentPdu>>>,
    failing: Arc<AtomicBool>,
}

impl RecordingTransport {
    pub fn new(clock: ManualClock) -> Self {
        Self {
            clock,
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<SentPdu> {
        lock(&self.sent).clone()
    }

    /// Send times, in order.
    pub fn times(&self) -> Vec<u64> {
        lock(&self.sent).iter().map(|pdu| pdu.at).collect()
    }

    pub fn take(&self) -> Vec<SentPdu> {
        std::mem::take(&mut *lock(&self.sent))
    }

    /// Make every following send fail without recording it.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl Transport for RecordingTransport {
    fn send(&mut self, tx: &NetTx<'_>, sdu: &[u8]) -> std::result::Result<(), TransportError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(TransportError::NoBuffers);
        }
        lock(&self.sent).push(SentPdu {
            at: self.clock.now(),
            src: tx.src,
            dst: tx.ctx.addr,
            app_idx: tx.ctx.app_idx,
            ttl: tx.ctx.send_ttl,
            friend_cred: tx.friend_cred,
            uuid: tx.ctx.uuid,
            sdu: sdu.to_vec(),
        });
        Ok(())
    }
}

/// Virtual label table backed by a vector; the index is the position.
#[derive(Debug, Clone, Default)]
pub struct LabelTable(pub Vec<LabelUuid>);

impl VirtualLabels for LabelTable {
    fn index_of(&self, uuid: &LabelUuid) -> Option<u16> {
        self.0.iter().position(|l| l == uuid).map(|i| i as u16)
    }

    fn uuid_at(&self, index: u16) -> Option<LabelUuid> {
        self.0.get(index as usize).copied()
    }
}

/// A [`MemStore`] shared between the access layer and the test.
#[derive(Debug, Clone, Default)]
pub struct SharedStore {
    inner: Arc<Mutex<MemStore>>,
    fail_writes: Arc<AtomicBool>,
}

impl SharedStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        lock(&self.inner).get(key).map(<[u8]>::to_vec)
    }

    pub fn keys(&self) -> Vec<String> {
        lock(&self.inner).keys().map(str::to_string).collect()
    }

    /// Write directly, bypassing the failure switch.
    pub fn insert(&self, key: &str, value: &[u8]) {
        let _ = lock(&self.inner).save(key, value);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self, key: &str) -> meshaccess_settings::Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(SettingsError::Io(format!("write refused: {key}")));
        }
        Ok(())
    }
}

impl SettingsStore for SharedStore {
    fn save(&mut self, key: &str, value: &[u8]) -> meshaccess_settings::Result<()> {
        self.check_writable(key)?;
        lock(&self.inner).save(key, value)
    }

    fn delete(&mut self, key: &str) -> meshaccess_settings::Result<()> {
        self.check_writable(key)?;
        lock(&self.inner).delete(key)
    }

    fn load(&self, key: &str) -> meshaccess_settings::Result<Option<Vec<u8>>> {
        lock(&self.inner).load(key)
    }

    fn load_subtree(&self, prefix: &str) -> meshaccess_settings::Result<Vec<(String, Vec<u8>)>> {
        lock(&self.inner).load_subtree(prefix)
    }
}

/// A registered node wired to recording collaborators.
pub struct TestNode {
    pub access: Access,
    pub transport: RecordingTransport,
    pub clock: ManualClock,
    pub store: SharedStore,
}

impl TestNode {
    pub fn new(comp: Composition, config: AccessConfig) -> Result<Self> {
        Self::with_parts(comp, config, Vec::new(), SharedStore::new())
    }

    /// Register with a virtual label table and a store that may already
    /// hold state.
    pub fn with_parts(
        comp: Composition,
        config: AccessConfig,
        labels: Vec<LabelUuid>,
        store: SharedStore,
    ) -> Result<Self> {
        let clock = ManualClock::new(0);
        let transport = RecordingTransport::new(clock.clone());
        let access = Access::register(
            comp,
            config,
            Collaborators {
                transport: Box::new(transport.clone()),
                rng: Box::new(FixedRandom(0)),
                clock: Box::new(clock.clone()),
                labels: Box::new(LabelTable(labels)),
                store: Box::new(store.clone()),
            },
        )?;

        Ok(Self {
            access,
            transport,
            clock,
            store,
        })
    }

    /// Replace the jitter source.
    pub fn set_random(&mut self, value: u16) {
        self.access.rng = Box::new(FixedRandom(value));
    }

    /// Advance the clock deadline by deadline, running publication, up to
    /// and including `until`.
    pub fn run_until(&mut self, until: u64) {
        while let Some(at) = self.access.next_deadline() {
            if at > until {
                break;
            }
            if at > self.clock.now() {
                self.clock.set(at);
            }
            self.access.tick(self.clock.now());
        }
        if until > self.clock.now() {
            self.clock.set(until);
        }
    }
}
