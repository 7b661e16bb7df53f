//! Host-visible state snapshots.

use crate::buffer::BufferState;
use crate::error::TmsError;

/// Coarse state of one slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotState {
    Idle,
    Loading,
    Loaded,
    Unloading,
    Error,
}

impl SlotState {
    pub fn name(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Loading => "loading",
            Self::Loaded => "loaded",
            Self::Unloading => "unloading",
            Self::Error => "error",
        }
    }

    /// A load or unload sequence is in progress.
    pub fn is_busy(self) -> bool {
        matches!(self, Self::Loading | Self::Unloading)
    }
}

/// What a component did during one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Activity {
    /// Nothing to do.
    Idle,
    /// Work pending, but only time can make progress (debounce, delays).
    Waiting,
    /// A motor moved or a sequence changed phase; tick again promptly.
    Moving,
}

impl Activity {
    #[inline]
    pub fn merge(self, other: Self) -> Self {
        self.max(other)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SlotStatus {
    pub index: usize,
    pub state: SlotState,
    /// Net feeder displacement of the current (or last) sequence.
    pub travel_mm: f32,
    pub feeder_position_mm: f32,
    pub spool_position_mm: Option<f32>,
    /// Last debounced presence reading.
    pub presence: Option<bool>,
    /// Sequence travel at which the presence sensor tripped during the last load.
    pub detected_at_mm: Option<f32>,
    pub error: Option<TmsError>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Status {
    pub slots: Vec<SlotStatus>,
    /// Slot owning the selector.
    pub active_slot: Option<usize>,
    /// `None` when buffer regulation is not configured.
    pub buffer: Option<BufferState>,
    pub last_error: Option<TmsError>,
}

impl Status {
    pub fn slot(&self, index: usize) -> Option<&SlotStatus> {
        self.slots.get(index)
    }
}
