//! Capacity-bounded, append-only keyframe store.
//!
//! The buffer is the only mutable state shared between the motion filter,
//! the factor graph and the trajectory filler. All mutation goes through
//! [`PoseBuffer::append`], [`PoseBuffer::assign`] and the scoped
//! [`TailExtension`].

use std::ops::Range;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::{MappedRwLockReadGuard, Mutex, MutexGuard, RwLock, RwLockReadGuard};

use crate::error::{Result, TrackError};
use crate::geometry::SE3;

use super::record::KeyframeRecord;

/// Contiguous overwrite applied by [`PoseBuffer::assign`].
#[derive(Debug, Clone)]
pub enum SlotUpdate {
    /// Replace whole records.
    Records(Vec<KeyframeRecord>),
    /// Replace pose estimates.
    Poses(Vec<SE3>),
    /// Replace scalar disparities.
    Disparities(Vec<f64>),
}

impl SlotUpdate {
    pub fn len(&self) -> usize {
        match self {
            SlotUpdate::Records(v) => v.len(),
            SlotUpdate::Poses(v) => v.len(),
            SlotUpdate::Disparities(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Shared keyframe store.
///
/// `len()` is an atomic counter of live slots. Slots past the counter are
/// never visible to readers.
pub struct PoseBuffer {
    capacity: usize,
    counter: AtomicUsize,
    slots: RwLock<Vec<KeyframeRecord>>,
    /// Serializes counter mutation between appends and tail extensions.
    batch: Mutex<()>,
}

impl PoseBuffer {
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(TrackError::InvalidConfig(
                "buffer capacity must be > 0".to_string(),
            ));
        }
        Ok(Self {
            capacity,
            counter: AtomicUsize::new(0),
            slots: RwLock::new(Vec::with_capacity(capacity)),
            batch: Mutex::new(()),
        })
    }

    /// Create a buffer behind an `Arc` for sharing between components.
    pub fn shared(capacity: usize) -> Result<Arc<Self>> {
        Self::new(capacity).map(Arc::new)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of live slots.
    pub fn len(&self) -> usize {
        self.counter.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append a keyframe and return its slot index.
    ///
    /// Fails without mutating anything when the buffer is full or the
    /// timestamp does not strictly follow the newest live record. Blocks
    /// while a [`TailExtension`] is alive.
    pub fn append(&self, record: KeyframeRecord) -> Result<usize> {
        let _batch = self.batch.lock();
        let mut slots = self.slots.write();
        let index = self.len();

        if index >= self.capacity {
            return Err(TrackError::CapacityExceeded {
                capacity: self.capacity,
                requested: index + 1,
            });
        }
        if let Some(last) = index.checked_sub(1).map(|i| slots[i].timestamp) {
            if record.timestamp <= last {
                return Err(TrackError::TimestampOrder {
                    previous: last,
                    got: record.timestamp,
                });
            }
        }

        slots.truncate(index);
        slots.push(record);
        self.counter.store(index + 1, Ordering::SeqCst);
        Ok(index)
    }

    /// Read view of live slots `[lo, hi)`.
    ///
    /// The view holds a read lock; drop it before calling [`Self::assign`].
    pub fn slice(&self, lo: usize, hi: usize) -> Result<MappedRwLockReadGuard<'_, [KeyframeRecord]>> {
        self.check_range(lo, hi)?;
        Ok(RwLockReadGuard::map(self.slots.read(), |slots| {
            &slots[lo..hi]
        }))
    }

    /// Clone of a single live record.
    pub fn record(&self, index: usize) -> Option<KeyframeRecord> {
        let slots = self.slots.read();
        (index < self.len()).then(|| slots[index].clone())
    }

    /// Timestamps of all live slots.
    pub fn timestamps(&self) -> Vec<u64> {
        let slots = self.slots.read();
        slots[..self.len()].iter().map(|r| r.timestamp).collect()
    }

    /// Pose estimates of live slots `[lo, hi)`.
    pub fn poses(&self, lo: usize, hi: usize) -> Result<Vec<Option<SE3>>> {
        Ok(self.slice(lo, hi)?.iter().map(|r| r.pose).collect())
    }

    /// Overwrite live slots `[lo, hi)`.
    pub fn assign(&self, lo: usize, hi: usize, update: SlotUpdate) -> Result<()> {
        self.check_range(lo, hi)?;
        if update.len() != hi - lo {
            return Err(TrackError::ShapeMismatch {
                what: "slot update",
                expected: (hi - lo, 1),
                actual: (update.len(), 1),
            });
        }

        let mut slots = self.slots.write();
        let range = &mut slots[lo..hi];
        match update {
            SlotUpdate::Records(records) => {
                for (slot, record) in range.iter_mut().zip(records) {
                    *slot = record;
                }
            }
            SlotUpdate::Poses(poses) => {
                for (slot, pose) in range.iter_mut().zip(poses) {
                    slot.pose = Some(pose);
                }
            }
            SlotUpdate::Disparities(disparities) => {
                for (slot, disparity) in range.iter_mut().zip(disparities) {
                    slot.disparity = Some(disparity);
                }
            }
        }
        Ok(())
    }

    /// Temporarily expose `records` as live slots past the current end.
    ///
    /// Capacity is checked before anything is written. The returned guard
    /// holds the batch lock and rolls the counter back when dropped.
    pub fn extend_tail(&self, records: Vec<KeyframeRecord>) -> Result<TailExtension<'_>> {
        let batch = self.batch.lock();
        let base = self.len();
        let len = records.len();

        if base + len > self.capacity {
            return Err(TrackError::CapacityExceeded {
                capacity: self.capacity,
                requested: base + len,
            });
        }

        {
            let mut slots = self.slots.write();
            slots.truncate(base);
            slots.extend(records);
        }
        self.counter.store(base + len, Ordering::SeqCst);

        Ok(TailExtension {
            buffer: self,
            base,
            len,
            _batch: batch,
        })
    }

    fn check_range(&self, lo: usize, hi: usize) -> Result<()> {
        let len = self.len();
        if lo > hi || hi > len {
            return Err(TrackError::InvalidRange { lo, hi, len });
        }
        Ok(())
    }

    fn release_tail(&self, base: usize) {
        let mut slots = self.slots.write();
        slots.truncate(base);
        self.counter.store(base, Ordering::SeqCst);
    }
}

/// Scoped window-sized extension of a [`PoseBuffer`].
///
/// While alive, slots `range()` are live and no append can interleave.
/// Dropping it restores the counter on every exit path.
pub struct TailExtension<'a> {
    buffer: &'a PoseBuffer,
    base: usize,
    len: usize,
    _batch: MutexGuard<'a, ()>,
}

impl TailExtension<'_> {
    /// First extended slot.
    pub fn base(&self) -> usize {
        self.base
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn range(&self) -> Range<usize> {
        self.base..self.base + self.len
    }

    /// Poses currently stored in the extended slots.
    pub fn poses(&self) -> Result<Vec<Option<SE3>>> {
        self.buffer.poses(self.base, self.base + self.len)
    }
}

impl Drop for TailExtension<'_> {
    fn drop(&mut self) {
        self.buffer.release_tail(self.base);
    }
}
