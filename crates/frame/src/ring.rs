//! Frame slot ring: admission control for CPU-recorded frames.
//!
//! The ring owns `F` [`FrameSlot`]s and hands them out round-robin. A slot is
//! only handed out again after the host signal of its previous frame has been
//! observed, which caps the CPU at `F` frames ahead of the device.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use framechain_frame::backend::Timeout;
//! use framechain_frame::ring::FrameRing;
//! use framechain_frame::sim::SimGpu;
//!
//! # fn main() -> Result<(), framechain_frame::FrameError> {
//! let gpu = Arc::new(SimGpu::new());
//! let mut ring = FrameRing::new(gpu, 2, Timeout::Infinite)?;
//! let ticket = ring.next_slot()?;
//! assert_eq!(ticket.slot, 0);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::backend::{Gpu, STAGE_COUNT, Stage, Timeout, WaitStatus};
use crate::error::{FrameError, FrameResult};

/// Identifies one borrow of one slot.
///
/// Serials increase by one per borrow across the whole ring, so a ticket is
/// never reused even though slot indices are.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameTicket {
    pub slot: usize,
    pub serial: u64,
}

/// Signals one stage submission waits on and signals.
pub struct StageSignals<'a, G: Gpu> {
    pub wait: &'a G::DeviceSignal,
    pub signal: &'a G::DeviceSignal,
    /// Only the last stage of a frame signals the slot's host signal.
    pub host: Option<&'a G::HostSignal>,
}

/// A reusable bundle of command batches and completion signals.
pub struct FrameSlot<G: Gpu> {
    index: usize,
    /// Serial of the frame that last borrowed this slot; 0 before the first borrow.
    serial: u64,
    batches: [G::CommandBatch; STAGE_COUNT],
    image_acquired: G::DeviceSignal,
    stage_done: [G::DeviceSignal; STAGE_COUNT],
    in_flight: G::HostSignal,
}

impl<G: Gpu> FrameSlot<G> {
    fn new(gpu: &G, index: usize) -> FrameResult<Self> {
        Ok(Self {
            index,
            serial: 0,
            batches: [gpu.create_command_batch()?, gpu.create_command_batch()?],
            image_acquired: gpu.create_device_signal()?,
            stage_done: [gpu.create_device_signal()?, gpu.create_device_signal()?],
            // Pre-signaled so the first borrow does not block.
            in_flight: gpu.create_host_signal(true)?,
        })
    }

    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    #[inline]
    pub fn serial(&self) -> u64 {
        self.serial
    }

    /// Ticket of the current borrow.
    #[inline]
    pub fn ticket(&self) -> FrameTicket {
        FrameTicket {
            slot: self.index,
            serial: self.serial,
        }
    }

    #[inline]
    pub fn batch(&self, stage: Stage) -> &G::CommandBatch {
        &self.batches[stage.index()]
    }

    /// Signaled by the compositor once the acquired image is writable.
    #[inline]
    pub fn image_acquired(&self) -> &G::DeviceSignal {
        &self.image_acquired
    }

    /// Signaled when `stage` finishes on the device.
    #[inline]
    pub fn stage_done(&self, stage: Stage) -> &G::DeviceSignal {
        &self.stage_done[stage.index()]
    }

    /// Signaled when the whole frame finishes; frees the slot.
    #[inline]
    pub fn in_flight(&self) -> &G::HostSignal {
        &self.in_flight
    }

    /// The dependency chain for `stage`:
    ///
    /// | stage   | waits on         | signals                        |
    /// |---------|------------------|--------------------------------|
    /// | scene   | `image_acquired` | `stage_done[scene]`            |
    /// | overlay | `stage_done[scene]` | `stage_done[overlay]`, `in_flight` |
    pub fn stage_signals(&self, stage: Stage) -> StageSignals<'_, G> {
        match stage {
            Stage::Scene => StageSignals {
                wait: &self.image_acquired,
                signal: &self.stage_done[Stage::Scene.index()],
                host: None,
            },
            Stage::Overlay => StageSignals {
                wait: &self.stage_done[Stage::Scene.index()],
                signal: &self.stage_done[Stage::Overlay.index()],
                host: Some(&self.in_flight),
            },
        }
    }
}

/// Round-robin owner of the frame slots.
pub struct FrameRing<G: Gpu> {
    gpu: Arc<G>,
    slots: Vec<FrameSlot<G>>,
    /// Slot handed out by the next call to [`FrameRing::next_slot`].
    cursor: usize,
    next_serial: u64,
    wait_timeout: Timeout,
    admission_waits: u64,
}

impl<G: Gpu> FrameRing<G> {
    /// Allocates `slot_count` slots.
    ///
    /// # Arguments
    ///
    /// * `gpu` - Device the slots' batches and signals are created on
    /// * `slot_count` - Number of frames that may be in flight (F)
    /// * `wait_timeout` - Bound on admission and hazard waits; elapsing is
    ///   treated as a lost device
    ///
    /// # Errors
    ///
    /// - [`FrameError::InvalidConfig`] if `slot_count` is zero
    /// - [`FrameError::ResourceExhausted`] if the device runs out of memory
    ///   before every slot is created
    pub fn new(gpu: Arc<G>, slot_count: usize, wait_timeout: Timeout) -> FrameResult<Self> {
        if slot_count == 0 {
            return Err(FrameError::InvalidConfig(
                "frame ring needs at least one slot".into(),
            ));
        }

        let mut slots = Vec::with_capacity(slot_count);
        for index in 0..slot_count {
            let slot = FrameSlot::new(&*gpu, index).map_err(|e| {
                if e.is_out_of_memory() {
                    error!("Device exhausted after {} of {} frame slots", index, slot_count);
                    FrameError::ResourceExhausted {
                        what: "frame slots",
                        requested: slot_count as u32,
                        granted: index as u32,
                    }
                } else {
                    e
                }
            })?;
            slots.push(slot);
        }

        info!("Frame ring created with {} slot(s)", slot_count);

        Ok(Self {
            gpu,
            slots,
            cursor: 0,
            next_serial: 1,
            wait_timeout,
            admission_waits: 0,
        })
    }

    /// Borrows the next slot, blocking until its previous frame has finished.
    ///
    /// The slot's host signal is reset and the slot is stamped with a new
    /// frame serial. Use [`FrameRing::slot`] with the returned ticket to reach
    /// the slot's batches and signals.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::DeviceLost`] if the device is lost or a finite
    /// wait timeout elapses.
    pub fn next_slot(&mut self) -> FrameResult<FrameTicket> {
        let index = self.cursor;
        self.cursor = (self.cursor + 1) % self.slots.len();

        let slot = &mut self.slots[index];
        if !self.gpu.is_signaled(&slot.in_flight)? {
            self.admission_waits += 1;
            debug!(
                "Frame slot {} still in flight (frame {}), waiting",
                index, slot.serial
            );
            wait_host(&*self.gpu, &slot.in_flight, self.wait_timeout, index)?;
        }
        self.gpu.reset(&slot.in_flight)?;

        slot.serial = self.next_serial;
        self.next_serial += 1;

        Ok(slot.ticket())
    }

    /// Returns `true` once the frame behind `ticket` can no longer touch its
    /// resources.
    pub fn is_retired(&self, ticket: FrameTicket) -> FrameResult<bool> {
        let slot = self.slot(ticket.slot)?;
        if slot.serial != ticket.serial {
            // Re-borrowing waited on the old frame.
            return Ok(true);
        }
        self.gpu.is_signaled(&slot.in_flight)
    }

    /// Blocks until the frame behind `ticket` has retired.
    ///
    /// Returns `true` if the call actually had to wait.
    pub fn wait_for(&self, ticket: FrameTicket) -> FrameResult<bool> {
        if self.is_retired(ticket)? {
            return Ok(false);
        }
        let slot = self.slot(ticket.slot)?;
        wait_host(&*self.gpu, &slot.in_flight, self.wait_timeout, ticket.slot)?;
        Ok(true)
    }

    /// Signals the host signal of a slot whose frame was abandoned before
    /// submission, so its next borrow does not wait forever.
    pub fn release_unused(&self, index: usize) -> FrameResult<()> {
        let slot = self.slot(index)?;
        debug!("Releasing unused frame slot {} (frame {})", index, slot.serial);
        self.gpu.signal_host(&slot.in_flight)
    }

    /// Waits for every slot to finish, polling with a finite timeout.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::DeviceLost`] if any slot is still busy after
    /// `max_polls` polls.
    pub fn drain(&self, poll: Duration, max_polls: u32) -> FrameResult<()> {
        for slot in &self.slots {
            let mut polls = 0;
            while self.gpu.wait(&slot.in_flight, Timeout::After(poll))? == WaitStatus::TimedOut {
                polls += 1;
                warn!(
                    "Frame slot {} still busy after {} poll(s) of {:?}",
                    slot.index, polls, poll
                );
                if polls >= max_polls {
                    error!("Frame slot {} never drained, treating device as lost", slot.index);
                    return Err(FrameError::DeviceLost);
                }
            }
        }
        debug!("Drained {} frame slot(s)", self.slots.len());
        Ok(())
    }

    /// Replaces the device signals of slot `index` with fresh ones.
    ///
    /// Only valid while the device is idle. Used after a present reported
    /// out-of-date, which leaves it unknown whether the present consumed its
    /// wait signal.
    pub fn renew_device_signals(&mut self, index: usize) -> FrameResult<()> {
        let len = self.slots.len();
        let slot = self
            .slots
            .get_mut(index)
            .ok_or_else(|| slot_out_of_range(index, len))?;

        slot.image_acquired = self.gpu.create_device_signal()?;
        slot.stage_done = [
            self.gpu.create_device_signal()?,
            self.gpu.create_device_signal()?,
        ];
        debug!("Renewed device signals of frame slot {}", index);
        Ok(())
    }

    /// Number of slots whose last frame has not been observed complete.
    pub fn outstanding(&self) -> FrameResult<usize> {
        let mut count = 0;
        for slot in &self.slots {
            if !self.gpu.is_signaled(&slot.in_flight)? {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Returns slot `index`.
    pub fn slot(&self, index: usize) -> FrameResult<&FrameSlot<G>> {
        self.slots
            .get(index)
            .ok_or_else(|| slot_out_of_range(index, self.slots.len()))
    }

    /// Number of slots (F).
    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Number of [`FrameRing::next_slot`] calls that had to block.
    #[inline]
    pub fn admission_waits(&self) -> u64 {
        self.admission_waits
    }

    #[inline]
    pub fn gpu(&self) -> &Arc<G> {
        &self.gpu
    }
}

fn wait_host<G: Gpu>(gpu: &G, host: &G::HostSignal, timeout: Timeout, slot: usize) -> FrameResult<()> {
    match gpu.wait(host, timeout)? {
        WaitStatus::Signaled => Ok(()),
        WaitStatus::TimedOut => {
            error!("Timed out after {:?} waiting on frame slot {}", timeout, slot);
            Err(FrameError::DeviceLost)
        }
    }
}

fn slot_out_of_range(index: usize, len: usize) -> FrameError {
    FrameError::InvalidState(format!("frame slot {} out of range for {} slots", index, len))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimGpu;

    fn ring(slots: usize) -> (Arc<SimGpu>, FrameRing<SimGpu>) {
        let gpu = Arc::new(SimGpu::new());
        let ring = FrameRing::new(gpu.clone(), slots, Timeout::Infinite).unwrap();
        (gpu, ring)
    }

    #[test]
    fn test_zero_slots_rejected() {
        let gpu = Arc::new(SimGpu::new());
        let result = FrameRing::new(gpu, 0, Timeout::Infinite);
        assert!(matches!(result, Err(FrameError::InvalidConfig(_))));
    }

    #[test]
    fn test_round_robin_with_unique_serials() {
        let (_gpu, mut ring) = ring(3);
        let mut tickets = Vec::new();
        for _ in 0..7 {
            let ticket = ring.next_slot().unwrap();
            ring.release_unused(ticket.slot).unwrap();
            tickets.push(ticket);
        }
        let slots: Vec<usize> = tickets.iter().map(|t| t.slot).collect();
        assert_eq!(slots, vec![0, 1, 2, 0, 1, 2, 0]);
        let serials: Vec<u64> = tickets.iter().map(|t| t.serial).collect();
        assert_eq!(serials, (1..=7).collect::<Vec<_>>());
    }

    #[test]
    fn test_first_lap_does_not_block() {
        let (gpu, mut ring) = ring(2);
        for _ in 0..2 {
            let ticket = ring.next_slot().unwrap();
            ring.release_unused(ticket.slot).unwrap();
        }
        assert_eq!(ring.admission_waits(), 0);
        assert_eq!(ring.outstanding().unwrap(), 2);

        // Wrapping blocks on the first slot's pending signal.
        ring.next_slot().unwrap();
        assert_eq!(ring.admission_waits(), 1);
        assert_eq!(gpu.stats().blocking_waits, 1);
    }

    #[test]
    fn test_completed_slot_is_not_a_wait() {
        let (gpu, mut ring) = ring(1);
        let ticket = ring.next_slot().unwrap();
        ring.release_unused(ticket.slot).unwrap();
        gpu.retire_all();

        ring.next_slot().unwrap();
        assert_eq!(ring.admission_waits(), 0);
    }

    #[test]
    fn test_ticket_retires_when_slot_is_reborrowed() {
        let (_gpu, mut ring) = ring(1);
        let first = ring.next_slot().unwrap();
        ring.release_unused(first.slot).unwrap();
        assert!(!ring.is_retired(first).unwrap());

        let second = ring.next_slot().unwrap();
        assert!(ring.is_retired(first).unwrap());
        assert!(!ring.is_retired(second).unwrap());
        assert!(!ring.wait_for(first).unwrap());
    }

    #[test]
    fn test_wait_for_blocks_on_pending_ticket() {
        let (gpu, mut ring) = ring(2);
        let first = ring.next_slot().unwrap();
        ring.release_unused(first.slot).unwrap();

        assert!(ring.wait_for(first).unwrap());
        assert!(ring.is_retired(first).unwrap());
        assert_eq!(gpu.stats().blocking_waits, 1);
    }

    #[test]
    fn test_stage_signal_chain() {
        let (_gpu, ring) = ring(1);
        let slot = ring.slot(0).unwrap();

        let scene = slot.stage_signals(Stage::Scene);
        assert!(std::ptr::eq(scene.wait, slot.image_acquired()));
        assert!(std::ptr::eq(scene.signal, slot.stage_done(Stage::Scene)));
        assert!(scene.host.is_none());

        let overlay = slot.stage_signals(Stage::Overlay);
        assert!(std::ptr::eq(overlay.wait, slot.stage_done(Stage::Scene)));
        assert!(std::ptr::eq(overlay.signal, slot.stage_done(Stage::Overlay)));
        assert!(overlay.host.is_some_and(|h| std::ptr::eq(h, slot.in_flight())));
    }

    #[test]
    fn test_exhaustion_reports_granted_slots() {
        let gpu = Arc::new(SimGpu::new());
        gpu.limit_host_signals(1);
        match FrameRing::new(gpu, 3, Timeout::Infinite) {
            Err(FrameError::ResourceExhausted {
                requested, granted, ..
            }) => {
                assert_eq!(requested, 3);
                assert_eq!(granted, 1);
            }
            other => panic!("expected ResourceExhausted, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_wait_timeout_is_device_lost() {
        let gpu = Arc::new(SimGpu::new());
        let mut ring =
            FrameRing::new(gpu.clone(), 1, Timeout::After(Duration::from_millis(1))).unwrap();
        let ticket = ring.next_slot().unwrap();
        ring.release_unused(ticket.slot).unwrap();

        gpu.hang();
        assert!(matches!(ring.next_slot(), Err(FrameError::DeviceLost)));
    }

    #[test]
    fn test_drain_completes_every_slot() {
        let (_gpu, mut ring) = ring(3);
        for _ in 0..3 {
            let ticket = ring.next_slot().unwrap();
            ring.release_unused(ticket.slot).unwrap();
        }
        ring.drain(Duration::from_millis(1), 3).unwrap();
        assert_eq!(ring.outstanding().unwrap(), 0);
    }

    #[test]
    fn test_drain_gives_up_on_hung_device() {
        let (gpu, mut ring) = ring(2);
        let ticket = ring.next_slot().unwrap();
        ring.release_unused(ticket.slot).unwrap();
        gpu.hang();

        assert!(matches!(
            ring.drain(Duration::from_millis(1), 3),
            Err(FrameError::DeviceLost)
        ));
    }

    #[test]
    fn test_renew_device_signals() {
        let (gpu, mut ring) = ring(2);
        let live = gpu.live_device_signals();
        ring.renew_device_signals(1).unwrap();
        assert_eq!(gpu.live_device_signals(), live);
        assert!(matches!(
            ring.renew_device_signals(2),
            Err(FrameError::InvalidState(_))
        ));
    }

    #[test]
    fn test_lost_device_propagates() {
        let (gpu, mut ring) = ring(2);
        gpu.lose_device();
        assert!(matches!(ring.next_slot(), Err(FrameError::DeviceLost)));
    }
}
