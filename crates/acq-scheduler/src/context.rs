//! Shared Acquisition Context
//!
//! [`Aldl`] bundles everything the acquisition loop and its consumers share.
//! It is built once at startup and passed around as an `Arc`. Each piece of
//! shared state has its own lock and no two locks are ever held together.

use crate::config::AcqConfig;
use crate::error::AcqError;
use crate::queue::{AuxCommand, CommandQueue};
use crate::stats::{FailureKind, Stats};
use aldl_protocol::{CommDef, ConnectionState, StateCell};
use data_convert::{Converter, SignalDefinition};
use record_store::{Record, RecordId, RecordStore, StoreError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;
use tracing::{info, warn};

/// Polling interval of the pause helpers
const PAUSE_POLL: Duration = Duration::from_millis(100);

/// Shared state of one ECM acquisition session
pub struct Aldl {
    comm: CommDef,
    config: AcqConfig,
    converter: Converter,
    state: StateCell,
    store: RecordStore,
    commands: CommandQueue,
    stats: Mutex<Stats>,
    ready: AtomicBool,
}

impl Aldl {
    /// Validate the configuration and allocate the record store
    pub fn new(
        comm: CommDef,
        signals: Vec<SignalDefinition>,
        config: AcqConfig,
    ) -> Result<Self, AcqError> {
        comm.validate()?;
        config.validate()?;
        let converter = Converter::new(&comm, signals, config.clamp)?;
        let store = RecordStore::new(config.bufsize, converter.template())?;
        info!(
            "ALDL context: {} packets, {} signals, buffer {} (start {})",
            comm.packets.len(),
            converter.len(),
            config.bufsize,
            config.bufstart()
        );

        Ok(Self {
            comm,
            config,
            converter,
            state: StateCell::default(),
            store,
            commands: CommandQueue::new(),
            stats: Mutex::new(Stats::default()),
            ready: AtomicBool::new(false),
        })
    }

    pub fn comm(&self) -> &CommDef {
        &self.comm
    }

    pub fn config(&self) -> &AcqConfig {
        &self.config
    }

    pub fn converter(&self) -> &Converter {
        &self.converter
    }

    pub fn signals(&self) -> &[SignalDefinition] {
        self.converter.signals()
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    pub(crate) fn commands(&self) -> &CommandQueue {
        &self.commands
    }

    pub(crate) fn state_cell(&self) -> &StateCell {
        &self.state
    }

    // Connection state

    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    pub fn set_state(&self, state: ConnectionState) {
        self.state.set(state);
    }

    /// Recent connection states, oldest first
    pub fn state_history(&self) -> Vec<ConnectionState> {
        self.state.history()
    }

    /// Ask the acquisition loop to stop
    pub fn quit(&self) {
        info!("Quit requested");
        self.state.set(ConnectionState::Quit);
    }

    // Records

    pub fn newest(&self) -> RecordId {
        self.store.newest()
    }

    pub fn next(&self, rec: RecordId) -> Result<Option<RecordId>, StoreError> {
        self.store.next(rec)
    }

    pub fn record(&self, rec: RecordId) -> Result<Record, StoreError> {
        self.store.get(rec)
    }

    pub fn newest_wait(&self, rec: RecordId) -> Option<RecordId> {
        self.store.newest_wait(rec, &self.state)
    }

    pub fn newest_waitf(&self, rec: RecordId) -> RecordId {
        self.store.newest_waitf(rec, &self.state)
    }

    pub fn next_wait(&self, rec: RecordId) -> Result<Option<RecordId>, StoreError> {
        self.store.next_wait(rec, &self.state)
    }

    pub fn next_waitf(&self, rec: RecordId) -> Result<RecordId, StoreError> {
        self.store.next_waitf(rec, &self.state)
    }

    /// Block until the link is connected
    pub fn pause_until_connected(&self) {
        while self.state().is_disconnected() {
            thread::sleep(PAUSE_POLL);
        }
    }

    /// Block until enough sweeps have been buffered
    pub fn pause_until_buffered(&self) {
        while !self.is_ready() {
            thread::sleep(PAUSE_POLL);
        }
    }

    /// True once `bufstart` sweeps have completed
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub(crate) fn set_ready(&self) {
        if !self.ready.swap(true, Ordering::AcqRel) {
            info!("Record buffer primed");
        }
    }

    /// Index of the signal called `name`
    pub fn index_by_name(&self, name: &str) -> Option<usize> {
        self.converter.index_by_name(name)
    }

    // Commands

    /// Queue a raw frame for the acquisition loop to send
    pub fn add_command(&self, bytes: &[u8], delay_ms: u64) {
        self.commands.push(AuxCommand::new(bytes, delay_ms));
    }

    /// Queue a prepared command
    pub fn push_command(&self, command: AuxCommand) {
        self.commands.push(command);
    }

    // Stats

    /// Hold the stats lock, e.g. to read several fields consistently
    pub fn lock_stats(&self) -> MutexGuard<'_, Stats> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Copy of the current stats
    pub fn stats(&self) -> Stats {
        self.lock_stats().clone()
    }

    /// Count a failed retrieval; returns true if the link is now desynced
    pub fn record_failure(&self, kind: FailureKind) -> bool {
        let fails = self.lock_stats().record_failure(kind);
        if fails <= self.config.maxfail {
            return false;
        }
        if fails == self.config.maxfail + 1 {
            warn!("{} consecutive packet failures, lost sync", fails);
        }
        self.state.transition(ConnectionState::Desync);
        true
    }

    pub fn record_success(&self) {
        self.lock_stats().record_success();
    }

    pub(crate) fn set_packet_rate(&self, rate: f32) {
        self.lock_stats().packets_per_second = rate;
    }
}
