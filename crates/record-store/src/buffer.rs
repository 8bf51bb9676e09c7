//! Circular Record Buffer

use crate::error::StoreError;
use aldl_protocol::StateCell;
use data_convert::Value;
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

/// Default buffer capacity (records)
pub const DEFAULT_CAPACITY: usize = 200;

/// Timestamps re-base this many ms before the 32-bit limit
const REBASE_MARGIN_MS: u32 = 100_000;

/// Wait polling interval
const WAIT_POLL: Duration = Duration::from_micros(500);

/// Handle to a record, tagged with its creation sequence number
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(u64);

impl RecordId {
    /// Sequence number; the initial record is 0
    pub fn seq(&self) -> u64 {
        self.0
    }
}

/// A snapshot of every signal at one point in time
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    pub id: RecordId,
    /// Milliseconds since the store epoch
    pub t_ms: u32,
    pub values: Vec<Value>,
}

/// A claimed but not yet visible record
#[derive(Debug)]
pub struct PendingRecord {
    id: RecordId,
    t_ms: u32,
    values: Vec<Value>,
}

impl PendingRecord {
    pub fn id(&self) -> RecordId {
        self.id
    }

    pub fn t_ms(&self) -> u32 {
        self.t_ms
    }

    pub fn values_mut(&mut self) -> &mut [Value] {
        &mut self.values
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Slot {
    seq: u64,
    t_ms: u32,
    prev: Option<u64>,
    next: Option<u64>,
}

struct Inner {
    slots: Vec<Slot>,
    /// `capacity * width` values, slot `n` owns `n * width..(n + 1) * width`
    values: Vec<Value>,
    latest: u64,
    next_seq: u64,
    epoch: Instant,
}

/// Fixed-capacity circular store of linked records
pub struct RecordStore {
    capacity: usize,
    width: usize,
    template: Vec<Value>,
    inner: Mutex<Inner>,
}

impl RecordStore {
    /// Create a store of `capacity` slots, each holding one value per
    /// template entry. The initial record (seq 0) holds the template values
    /// and a zero timestamp.
    pub fn new(capacity: usize, template: Vec<Value>) -> Result<Self, StoreError> {
        if capacity < 2 {
            return Err(StoreError::Capacity(capacity));
        }
        let width = template.len();
        let mut values = Vec::with_capacity(capacity * width);
        for _ in 0..capacity {
            values.extend_from_slice(&template);
        }
        let bytes = values.len() * std::mem::size_of::<data_convert::Value>();
        debug!(
            "Record store: {} slots x {} values ({} bytes)",
            capacity, width, bytes
        );

        Ok(Self {
            capacity,
            width,
            template,
            inner: Mutex::new(Inner {
                slots: vec![Slot::default(); capacity],
                values,
                latest: 0,
                next_seq: 1,
                epoch: Instant::now(),
            }),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of values per record
    pub fn width(&self) -> usize {
        self.width
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn slot_of(&self, seq: u64) -> usize {
        (seq % self.capacity as u64) as usize
    }

    /// Slot index for `id`, failing if it has been reused
    fn live_slot(&self, inner: &Inner, id: RecordId) -> Result<usize, StoreError> {
        let slot = self.slot_of(id.0);
        let current = inner.slots[slot].seq;
        if current == id.0 {
            Ok(slot)
        } else {
            Err(StoreError::Overrun {
                seq: id.0,
                current,
            })
        }
    }

    /// Claim the next slot and timestamp it
    pub fn create(&self) -> PendingRecord {
        let mut inner = self.lock();
        let seq = inner.next_seq;
        inner.next_seq += 1;

        let now = Instant::now();
        let elapsed = now.duration_since(inner.epoch).as_millis();
        let (t_ms, rebase) = timestamp(elapsed);
        if rebase {
            debug!("Re-basing record timestamps");
            inner.epoch = now;
        }

        let slot = self.slot_of(seq);
        inner.slots[slot] = Slot {
            seq,
            t_ms,
            prev: None,
            next: None,
        };
        PendingRecord {
            id: RecordId(seq),
            t_ms,
            values: self.template.clone(),
        }
    }

    /// Store the values of `pending` and append it after the newest record
    pub fn link(&self, pending: PendingRecord) -> RecordId {
        let PendingRecord { id, values, .. } = pending;
        let mut inner = self.lock();
        let slot = self.slot_of(id.0);
        let start = slot * self.width;
        let n = values.len().min(self.width);
        inner.values[start..start + n].copy_from_slice(&values[..n]);

        let latest = inner.latest;
        let latest_slot = self.slot_of(latest);
        if inner.slots[latest_slot].seq == latest {
            inner.slots[latest_slot].next = Some(id.0);
        }
        inner.slots[slot].prev = Some(latest);
        inner.latest = id.0;
        id
    }

    /// The most recently linked record
    pub fn newest(&self) -> RecordId {
        RecordId(self.lock().latest)
    }

    /// The record after `id`, if linked yet
    pub fn next(&self, id: RecordId) -> Result<Option<RecordId>, StoreError> {
        let inner = self.lock();
        let slot = self.live_slot(&inner, id)?;
        Ok(inner.slots[slot].next.map(RecordId))
    }

    /// The record before `id`, `None` for the initial record
    pub fn prev(&self, id: RecordId) -> Result<Option<RecordId>, StoreError> {
        let inner = self.lock();
        let slot = self.live_slot(&inner, id)?;
        Ok(inner.slots[slot].prev.map(RecordId))
    }

    /// Copy out a record
    pub fn get(&self, id: RecordId) -> Result<Record, StoreError> {
        let inner = self.lock();
        let slot = self.live_slot(&inner, id)?;
        let start = slot * self.width;
        Ok(Record {
            id,
            t_ms: inner.slots[slot].t_ms,
            values: inner.values[start..start + self.width].to_vec(),
        })
    }

    /// Read a single value of a record
    pub fn value(&self, id: RecordId, index: usize) -> Result<Option<Value>, StoreError> {
        let inner = self.lock();
        let slot = self.live_slot(&inner, id)?;
        if index >= self.width {
            return Ok(None);
        }
        Ok(Some(inner.values[slot * self.width + index]))
    }

    /// Wait for a record newer than `rec`, giving up when disconnected
    pub fn newest_wait(&self, rec: RecordId, state: &StateCell) -> Option<RecordId> {
        loop {
            let newest = self.newest();
            if newest != rec {
                return Some(newest);
            }
            if state.get().is_disconnected() {
                return None;
            }
            thread::sleep(WAIT_POLL);
        }
    }

    /// Wait for a record newer than `rec`, across disconnects
    pub fn newest_waitf(&self, rec: RecordId, state: &StateCell) -> RecordId {
        loop {
            if let Some(newest) = self.newest_wait(rec, state) {
                return newest;
            }
            thread::sleep(WAIT_POLL);
        }
    }

    /// Wait for the record after `rec`, giving up when disconnected
    pub fn next_wait(
        &self,
        rec: RecordId,
        state: &StateCell,
    ) -> Result<Option<RecordId>, StoreError> {
        loop {
            let next = self.next(rec)?;
            if state.get().is_disconnected() {
                return Ok(None);
            }
            if next.is_some() {
                return Ok(next);
            }
            thread::sleep(WAIT_POLL);
        }
    }

    /// Wait for the record after `rec`, across disconnects
    pub fn next_waitf(&self, rec: RecordId, state: &StateCell) -> Result<RecordId, StoreError> {
        loop {
            if let Some(next) = self.next_wait(rec, state)? {
                return Ok(next);
            }
            thread::sleep(WAIT_POLL);
        }
    }
}

/// Clamp elapsed ms to a 32-bit timestamp; true when the epoch should move
fn timestamp(elapsed_ms: u128) -> (u32, bool) {
    let t = u32::try_from(elapsed_ms).unwrap_or(u32::MAX);
    (t, t > u32::MAX - REBASE_MARGIN_MS)
}
