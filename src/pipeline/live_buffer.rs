//! Latest-wins single-slot frame store

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use crossbeam::utils::CachePadded;

use crate::capture::frame::{FrameSample, PixelFormat};

/// Caller-owned destination for [`LiveFrameBuffer::try_read`].
/// Reusing one across reads avoids reallocating the pixel vector.
#[derive(Debug, Clone, Default)]
pub struct LatestFrame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub format: Option<PixelFormat>,
    pub sequence: u64,
}

#[derive(Default)]
struct Slot {
    data: Vec<u8>,
    width: u32,
    height: u32,
    format: Option<PixelFormat>,
    sequence: u64,
    filled: bool,
}

/// Holds at most one frame: each publish overwrites the previous one, so
/// readers may miss intermediate frames. Written only by the capture worker,
/// read by anyone through a copy-out.
#[derive(Default)]
pub struct LiveFrameBuffer {
    slot: Mutex<Slot>,
    /// Mirror of the slot's sequence for lock-free polling
    sequence: CachePadded<AtomicU64>,
}

impl LiveFrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy `frame` into the slot and return its sequence number (1 for the
    /// first frame after construction or reset).
    pub fn publish(&self, frame: &FrameSample) -> u64 {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        slot.data.clear();
        slot.data.extend_from_slice(&frame.data);
        slot.width = frame.width();
        slot.height = frame.height();
        slot.format = Some(frame.format());
        slot.sequence += 1;
        slot.filled = true;
        self.sequence.store(slot.sequence, Ordering::Release);
        slot.sequence
    }

    /// Copy the current frame into `dst`. Returns `false` when nothing has
    /// been published since the last reset, leaving `dst` untouched.
    pub fn try_read(&self, dst: &mut LatestFrame) -> bool {
        let slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if !slot.filled {
            return false;
        }
        dst.data.clear();
        dst.data.extend_from_slice(&slot.data);
        dst.width = slot.width;
        dst.height = slot.height;
        dst.format = slot.format;
        dst.sequence = slot.sequence;
        true
    }

    /// Sequence number of the most recent publish, 0 when empty
    pub fn sequence(&self) -> u64 {
        self.sequence.load(Ordering::Acquire)
    }

    pub fn reset(&self) {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        slot.data.clear();
        slot.width = 0;
        slot.height = 0;
        slot.format = None;
        slot.sequence = 0;
        slot.filled = false;
        self.sequence.store(0, Ordering::Release);
    }
}
