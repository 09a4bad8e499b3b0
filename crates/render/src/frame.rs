//! Frame slot state machine.
//!
//! The engine cycles through N frame slots in strict order. At any moment
//! exactly one slot is current, and it moves through
//! `Idle → Recording → Submitted → Presented`, then the index advances by
//! one (mod N) and the next slot starts `Idle`. Enforcing the transitions
//! here keeps out-of-order `begin_frame`/`end_frame` calls from silently
//! corrupting per-slot resources.

use tracing::trace;

use crate::error::{EngineError, EngineResult};

/// Lifecycle stage of the current frame slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotState {
    /// No frame in progress on this slot.
    Idle,
    /// Commands are being recorded.
    Recording,
    /// Recorded work has been submitted to the GPU queue.
    Submitted,
    /// The frame's image has been handed to the presentation engine.
    Presented,
}

/// Tracks the current slot index and its lifecycle state.
pub struct FrameSchedule {
    index: usize,
    count: usize,
    state: SlotState,
}

impl FrameSchedule {
    /// Creates a schedule over `count` slots, starting at slot 0, idle.
    pub fn new(count: usize) -> Self {
        Self {
            index: 0,
            count,
            state: SlotState::Idle,
        }
    }

    /// Current slot index, always in `[0, count)`.
    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Number of slots in the cycle.
    #[inline]
    pub fn count(&self) -> usize {
        self.count
    }

    /// Current slot state.
    #[inline]
    pub fn state(&self) -> SlotState {
        self.state
    }

    /// `Idle → Recording`.
    ///
    /// # Errors
    ///
    /// Returns an error if a frame is already in progress on this slot.
    pub fn begin_recording(&mut self) -> EngineResult<()> {
        self.transition(SlotState::Idle, SlotState::Recording)
    }

    /// `Recording → Submitted`.
    ///
    /// # Errors
    ///
    /// Returns an error if no frame is being recorded.
    pub fn mark_submitted(&mut self) -> EngineResult<()> {
        self.transition(SlotState::Recording, SlotState::Submitted)
    }

    /// `Submitted → Presented`.
    ///
    /// # Errors
    ///
    /// Returns an error if nothing has been submitted.
    pub fn mark_presented(&mut self) -> EngineResult<()> {
        self.transition(SlotState::Submitted, SlotState::Presented)
    }

    /// `Presented → Idle`, advancing the index by exactly one (mod N).
    ///
    /// # Errors
    ///
    /// Returns an error if the current frame has not been presented.
    pub fn advance(&mut self) -> EngineResult<usize> {
        if self.state != SlotState::Presented {
            return Err(EngineError::InvalidState(format!(
                "cannot advance from {:?}",
                self.state
            )));
        }
        self.index = (self.index + 1) % self.count;
        self.state = SlotState::Idle;
        trace!("Advanced to frame slot {}", self.index);
        Ok(self.index)
    }

    /// Abandons the current frame without advancing.
    ///
    /// Used when acquisition fails and the swapchain was recreated: the
    /// slot stays current and the next `begin_frame` retries it.
    pub fn abandon(&mut self) {
        self.state = SlotState::Idle;
    }

    fn transition(&mut self, from: SlotState, to: SlotState) -> EngineResult<()> {
        if self.state != from {
            return Err(EngineError::InvalidState(format!(
                "expected {:?}, slot {} is {:?}",
                from, self.index, self.state
            )));
        }
        self.state = to;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_one_frame(schedule: &mut FrameSchedule) {
        schedule.begin_recording().unwrap();
        schedule.mark_submitted().unwrap();
        schedule.mark_presented().unwrap();
        schedule.advance().unwrap();
    }

    #[test]
    fn test_index_cycles_in_strict_order() {
        let mut schedule = FrameSchedule::new(3);
        let mut seen = Vec::new();

        for _ in 0..7 {
            seen.push(schedule.index());
            run_one_frame(&mut schedule);
        }

        assert_eq!(seen, vec![0, 1, 2, 0, 1, 2, 0]);
    }

    #[test]
    fn test_double_begin_rejected() {
        let mut schedule = FrameSchedule::new(2);
        schedule.begin_recording().unwrap();
        assert!(schedule.begin_recording().is_err());
    }

    #[test]
    fn test_submit_requires_recording() {
        let mut schedule = FrameSchedule::new(2);
        assert!(schedule.mark_submitted().is_err());
    }

    #[test]
    fn test_advance_requires_presented() {
        let mut schedule = FrameSchedule::new(2);
        schedule.begin_recording().unwrap();
        assert!(schedule.advance().is_err());
        schedule.mark_submitted().unwrap();
        assert!(schedule.advance().is_err());
        schedule.mark_presented().unwrap();
        assert_eq!(schedule.advance().unwrap(), 1);
    }

    #[test]
    fn test_abandon_keeps_slot_current() {
        let mut schedule = FrameSchedule::new(2);
        schedule.begin_recording().unwrap();
        schedule.abandon();
        assert_eq!(schedule.index(), 0);
        assert_eq!(schedule.state(), SlotState::Idle);
        // Retry succeeds on the same slot.
        schedule.begin_recording().unwrap();
    }
}
