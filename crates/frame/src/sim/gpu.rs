use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use framechain_rhi::{RhiError, vk};
use tracing::{error, warn};

use crate::backend::{Gpu, Submission, Timeout, WaitStatus};
use crate::error::{FrameError, FrameResult};

pub(super) type Shared = Arc<Mutex<SimState>>;

pub(super) fn lock(state: &Shared) -> MutexGuard<'_, SimState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One image of one surface generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImageId {
    pub generation: u64,
    pub index: u32,
}

/// Counters kept by the simulated device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimStats {
    /// Stage submissions accepted.
    pub submissions: u64,
    /// Empty submissions that only signaled a host signal.
    pub signal_only: u64,
    /// Host waits that had to retire queued work.
    pub blocking_waits: u64,
    /// Submissions that wrote an image another queued frame also writes.
    pub concurrent_writes: u64,
    /// Submissions rejected for writing an image of an old generation.
    pub stale_image_writes: u64,
    pub acquires: u64,
    pub presents: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeviceSignalState {
    Idle,
    /// A signal operation is queued or done and nothing has waited on it yet.
    Armed,
}

#[derive(Debug, Clone, Copy)]
struct HostState {
    signaled: bool,
    /// Queued work that will signal it.
    pending: Option<u64>,
}

#[derive(Debug, Default)]
struct BatchState {
    recording: bool,
    ready: bool,
    writes: Vec<ImageId>,
}

#[derive(Debug)]
struct Work {
    id: u64,
    frame: Option<u64>,
    batch: Option<u64>,
    host: Option<u64>,
    writes: Vec<ImageId>,
}

#[derive(Debug, Default)]
pub(super) struct SimState {
    next_handle: u64,
    next_work: u64,
    device_signals: HashMap<u64, DeviceSignalState>,
    host_signals: HashMap<u64, HostState>,
    batches: HashMap<u64, BatchState>,
    queue: VecDeque<Work>,
    generation: u64,
    lost: bool,
    hung: bool,
    max_device_signals: Option<usize>,
    max_host_signals: Option<usize>,
    pub(super) stats: SimStats,
}

impl SimState {
    fn check_alive(&self) -> FrameResult<()> {
        if self.lost {
            return Err(FrameError::DeviceLost);
        }
        Ok(())
    }

    fn handle(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    fn host(&self, id: u64) -> FrameResult<HostState> {
        self.host_signals
            .get(&id)
            .copied()
            .ok_or_else(|| FrameError::invalid_state(format!("unknown host signal {}", id)))
    }

    fn device_signal(&self, id: u64) -> FrameResult<DeviceSignalState> {
        self.device_signals
            .get(&id)
            .copied()
            .ok_or_else(|| FrameError::invalid_state(format!("unknown device signal {}", id)))
    }

    fn expect_device_signal(
        &self,
        id: u64,
        expected: DeviceSignalState,
        what: &str,
    ) -> FrameResult<()> {
        let actual = self.device_signal(id)?;
        if actual != expected {
            return Err(FrameError::invalid_state(format!(
                "{}: device signal {} is {:?}",
                what, id, actual
            )));
        }
        Ok(())
    }

    fn set_device_signal(&mut self, id: u64, state: DeviceSignalState) {
        if let Some(signal) = self.device_signals.get_mut(&id) {
            *signal = state;
        }
    }

    fn expect_host_free(&self, id: u64, what: &str) -> FrameResult<()> {
        let host = self.host(id)?;
        if host.signaled || host.pending.is_some() {
            return Err(FrameError::invalid_state(format!(
                "{}: host signal {} is already signaled or pending",
                what, id
            )));
        }
        Ok(())
    }

    fn enqueue(&mut self, frame: Option<u64>, batch: Option<u64>, host: Option<u64>, writes: Vec<ImageId>) {
        self.next_work += 1;
        let id = self.next_work;
        if let Some(host) = host.and_then(|h| self.host_signals.get_mut(&h)) {
            host.pending = Some(id);
        }
        self.queue.push_back(Work {
            id,
            frame,
            batch,
            host,
            writes,
        });
    }

    fn complete(&mut self, work: Work) {
        if let Some(host) = work.host.and_then(|h| self.host_signals.get_mut(&h)) {
            host.signaled = true;
            host.pending = None;
        }
    }

    fn retire_through(&mut self, id: u64) {
        while self.queue.front().is_some_and(|w| w.id <= id) {
            if let Some(work) = self.queue.pop_front() {
                self.complete(work);
            }
        }
    }

    fn retire(&mut self, count: usize) {
        for _ in 0..count {
            match self.queue.pop_front() {
                Some(work) => self.complete(work),
                None => break,
            }
        }
    }

    /// An acquire arms `signal` on behalf of the compositor.
    pub(super) fn arm_for_acquire(&mut self, signal: u64) -> FrameResult<()> {
        self.check_alive()?;
        self.expect_device_signal(signal, DeviceSignalState::Idle, "acquire")?;
        self.set_device_signal(signal, DeviceSignalState::Armed);
        self.stats.acquires += 1;
        Ok(())
    }

    /// A present consumes `signal`.
    pub(super) fn consume_for_present(&mut self, signal: u64) -> FrameResult<()> {
        self.check_alive()?;
        self.expect_device_signal(signal, DeviceSignalState::Armed, "present")?;
        self.set_device_signal(signal, DeviceSignalState::Idle);
        self.stats.presents += 1;
        Ok(())
    }

    pub(super) fn set_generation(&mut self, generation: u64) {
        self.generation = generation;
    }

    fn exhausted() -> FrameError {
        RhiError::VulkanError(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY).into()
    }
}

/// Simulated device. See the [module docs](super).
#[derive(Default)]
pub struct SimGpu {
    state: Shared,
}

impl SimGpu {
    pub fn new() -> Self {
        Self::default()
    }

    pub(super) fn shared(&self) -> Shared {
        self.state.clone()
    }

    pub fn stats(&self) -> SimStats {
        lock(&self.state).stats
    }

    /// Completes every queued submission.
    pub fn retire_all(&self) {
        let mut state = lock(&self.state);
        if !state.hung {
            let count = state.queue.len();
            state.retire(count);
        }
    }

    /// Completes the `count` oldest queued submissions.
    pub fn advance(&self, count: usize) {
        let mut state = lock(&self.state);
        if !state.hung {
            state.retire(count);
        }
    }

    /// Stops all progress: finite waits time out and infinite waits lose the device.
    pub fn hang(&self) {
        lock(&self.state).hung = true;
    }

    /// Every following operation fails with [`FrameError::DeviceLost`].
    pub fn lose_device(&self) {
        lock(&self.state).lost = true;
    }

    pub fn is_lost(&self) -> bool {
        lock(&self.state).lost
    }

    /// Device signal creation fails once `count` are alive.
    pub fn limit_device_signals(&self, count: usize) {
        lock(&self.state).max_device_signals = Some(count);
    }

    /// Host signal creation fails once `count` are alive.
    pub fn limit_host_signals(&self, count: usize) {
        lock(&self.state).max_host_signals = Some(count);
    }

    /// Number of queued submissions.
    pub fn queued(&self) -> usize {
        lock(&self.state).queue.len()
    }

    /// Number of distinct frames with queued stage work.
    pub fn in_flight_frames(&self) -> usize {
        let state = lock(&self.state);
        state
            .queue
            .iter()
            .filter_map(|w| w.frame)
            .collect::<HashSet<_>>()
            .len()
    }

    pub fn live_device_signals(&self) -> usize {
        lock(&self.state).device_signals.len()
    }

    pub fn live_host_signals(&self) -> usize {
        lock(&self.state).host_signals.len()
    }

    pub fn live_batches(&self) -> usize {
        lock(&self.state).batches.len()
    }
}

/// Device-side signal of the simulated device.
#[derive(Debug)]
pub struct SimDeviceSignal {
    id: u64,
    state: Shared,
}

impl SimDeviceSignal {
    #[inline]
    pub(super) fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for SimDeviceSignal {
    fn drop(&mut self) {
        lock(&self.state).device_signals.remove(&self.id);
    }
}

/// Host-observable signal of the simulated device.
#[derive(Debug)]
pub struct SimHostSignal {
    id: u64,
    state: Shared,
}

impl Drop for SimHostSignal {
    fn drop(&mut self) {
        lock(&self.state).host_signals.remove(&self.id);
    }
}

/// Command batch of the simulated device. Records which images it writes.
#[derive(Debug)]
pub struct SimBatch {
    id: u64,
    state: Shared,
}

impl SimBatch {
    /// Records a write to `image`. The batch must be open.
    pub fn write(&self, image: ImageId) -> FrameResult<()> {
        let mut state = lock(&self.state);
        let batch = state
            .batches
            .get_mut(&self.id)
            .ok_or_else(|| FrameError::invalid_state("unknown command batch"))?;
        if !batch.recording {
            return Err(FrameError::invalid_state(format!(
                "write to {:?} outside of recording",
                image
            )));
        }
        batch.writes.push(image);
        Ok(())
    }

    /// Images written by the last recording.
    pub fn writes(&self) -> Vec<ImageId> {
        lock(&self.state)
            .batches
            .get(&self.id)
            .map(|b| b.writes.clone())
            .unwrap_or_default()
    }
}

impl Drop for SimBatch {
    fn drop(&mut self) {
        lock(&self.state).batches.remove(&self.id);
    }
}

impl Gpu for SimGpu {
    type DeviceSignal = SimDeviceSignal;
    type HostSignal = SimHostSignal;
    type CommandBatch = SimBatch;

    fn create_device_signal(&self) -> FrameResult<SimDeviceSignal> {
        let mut state = lock(&self.state);
        state.check_alive()?;
        if state
            .max_device_signals
            .is_some_and(|max| state.device_signals.len() >= max)
        {
            return Err(SimState::exhausted());
        }
        let id = state.handle();
        state.device_signals.insert(id, DeviceSignalState::Idle);
        Ok(SimDeviceSignal {
            id,
            state: self.state.clone(),
        })
    }

    fn create_host_signal(&self, signaled: bool) -> FrameResult<SimHostSignal> {
        let mut state = lock(&self.state);
        state.check_alive()?;
        if state
            .max_host_signals
            .is_some_and(|max| state.host_signals.len() >= max)
        {
            return Err(SimState::exhausted());
        }
        let id = state.handle();
        state.host_signals.insert(
            id,
            HostState {
                signaled,
                pending: None,
            },
        );
        Ok(SimHostSignal {
            id,
            state: self.state.clone(),
        })
    }

    fn create_command_batch(&self) -> FrameResult<SimBatch> {
        let mut state = lock(&self.state);
        state.check_alive()?;
        let id = state.handle();
        state.batches.insert(id, BatchState::default());
        Ok(SimBatch {
            id,
            state: self.state.clone(),
        })
    }

    fn begin_batch(&self, batch: &SimBatch) -> FrameResult<()> {
        let mut state = lock(&self.state);
        state.check_alive()?;
        if state.queue.iter().any(|w| w.batch == Some(batch.id)) {
            return Err(FrameError::invalid_state(format!(
                "command batch {} re-recorded while pending",
                batch.id
            )));
        }
        let entry = state
            .batches
            .get_mut(&batch.id)
            .ok_or_else(|| FrameError::invalid_state("unknown command batch"))?;
        entry.recording = true;
        entry.ready = false;
        entry.writes.clear();
        Ok(())
    }

    fn end_batch(&self, batch: &SimBatch) -> FrameResult<()> {
        let mut state = lock(&self.state);
        state.check_alive()?;
        let entry = state
            .batches
            .get_mut(&batch.id)
            .ok_or_else(|| FrameError::invalid_state("unknown command batch"))?;
        if !entry.recording {
            return Err(FrameError::invalid_state("end of a batch that is not recording"));
        }
        entry.recording = false;
        entry.ready = true;
        Ok(())
    }

    fn wait(&self, host: &SimHostSignal, timeout: Timeout) -> FrameResult<WaitStatus> {
        let mut state = lock(&self.state);
        state.check_alive()?;
        let signal = state.host(host.id)?;
        if signal.signaled {
            return Ok(WaitStatus::Signaled);
        }

        match (signal.pending, timeout) {
            (Some(work), _) if !state.hung => {
                state.retire_through(work);
                state.stats.blocking_waits += 1;
                Ok(WaitStatus::Signaled)
            }
            (_, Timeout::After(_)) => Ok(WaitStatus::TimedOut),
            (Some(_), Timeout::Infinite) => {
                error!("Simulated device hung during an infinite wait");
                state.lost = true;
                Err(FrameError::DeviceLost)
            }
            (None, Timeout::Infinite) => Err(FrameError::invalid_state(format!(
                "infinite wait on host signal {} with nothing pending",
                host.id
            ))),
        }
    }

    fn is_signaled(&self, host: &SimHostSignal) -> FrameResult<bool> {
        let state = lock(&self.state);
        state.check_alive()?;
        Ok(state.host(host.id)?.signaled)
    }

    fn reset(&self, host: &SimHostSignal) -> FrameResult<()> {
        let mut state = lock(&self.state);
        state.check_alive()?;
        if state.host(host.id)?.pending.is_some() {
            return Err(FrameError::invalid_state(format!(
                "reset of host signal {} with a pending signal operation",
                host.id
            )));
        }
        if let Some(signal) = state.host_signals.get_mut(&host.id) {
            signal.signaled = false;
        }
        Ok(())
    }

    fn submit(&self, submission: Submission<'_, Self>) -> FrameResult<()> {
        let mut state = lock(&self.state);
        state.check_alive()?;
        let Submission {
            frame,
            stage,
            batch,
            wait,
            signal,
            host,
        } = submission;

        let writes = match state.batches.get(&batch.id) {
            Some(b) if b.ready => b.writes.clone(),
            Some(_) => {
                return Err(FrameError::invalid_state(format!(
                    "{} stage of frame {} submitted an unfinished batch",
                    stage, frame
                )));
            }
            None => return Err(FrameError::invalid_state("unknown command batch")),
        };
        state.expect_device_signal(wait.id, DeviceSignalState::Armed, "submit wait")?;
        state.expect_device_signal(signal.id, DeviceSignalState::Idle, "submit signal")?;
        if let Some(host) = host {
            state.expect_host_free(host.id, "submit")?;
        }
        if let Some(stale) = writes.iter().find(|w| w.generation != state.generation) {
            state.stats.stale_image_writes += 1;
            return Err(FrameError::invalid_state(format!(
                "frame {} wrote {:?} from a retired surface generation",
                frame, stale
            )));
        }

        let overlapping = writes.iter().any(|image| {
            state
                .queue
                .iter()
                .any(|w| w.frame.is_some_and(|f| f != frame) && w.writes.contains(image))
        });
        if overlapping {
            warn!("Frame {} writes an image another in-flight frame writes", frame);
            state.stats.concurrent_writes += 1;
        }

        state.set_device_signal(wait.id, DeviceSignalState::Idle);
        state.set_device_signal(signal.id, DeviceSignalState::Armed);
        if let Some(b) = state.batches.get_mut(&batch.id) {
            b.ready = false;
        }
        state.enqueue(Some(frame), Some(batch.id), host.map(|h| h.id), writes);
        state.stats.submissions += 1;
        Ok(())
    }

    fn signal_host(&self, host: &SimHostSignal) -> FrameResult<()> {
        let mut state = lock(&self.state);
        state.check_alive()?;
        state.expect_host_free(host.id, "signal_host")?;
        state.enqueue(None, None, Some(host.id), Vec::new());
        state.stats.signal_only += 1;
        Ok(())
    }

    fn wait_idle(&self) -> FrameResult<()> {
        let mut state = lock(&self.state);
        state.check_alive()?;
        if state.hung && !state.queue.is_empty() {
            error!("Simulated device hung with {} queued submission(s)", state.queue.len());
            state.lost = true;
            return Err(FrameError::DeviceLost);
        }
        let count = state.queue.len();
        state.retire(count);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Stage;

    struct Chain {
        batch: SimBatch,
        acquired: SimDeviceSignal,
        done: SimDeviceSignal,
        fence: SimHostSignal,
    }

    fn chain(gpu: &SimGpu) -> Chain {
        Chain {
            batch: gpu.create_command_batch().unwrap(),
            acquired: gpu.create_device_signal().unwrap(),
            done: gpu.create_device_signal().unwrap(),
            fence: gpu.create_host_signal(false).unwrap(),
        }
    }

    fn arm(gpu: &SimGpu, signal: &SimDeviceSignal) {
        lock(&gpu.state).arm_for_acquire(signal.id()).unwrap();
    }

    fn submit(gpu: &SimGpu, c: &Chain, frame: u64) -> FrameResult<()> {
        gpu.submit(Submission {
            frame,
            stage: Stage::Overlay,
            batch: &c.batch,
            wait: &c.acquired,
            signal: &c.done,
            host: Some(&c.fence),
        })
    }

    #[test]
    fn test_wait_retires_queued_work() {
        let gpu = SimGpu::new();
        let c = chain(&gpu);
        arm(&gpu, &c.acquired);
        gpu.begin_batch(&c.batch).unwrap();
        gpu.end_batch(&c.batch).unwrap();
        submit(&gpu, &c, 1).unwrap();

        assert!(!gpu.is_signaled(&c.fence).unwrap());
        assert_eq!(gpu.wait(&c.fence, Timeout::Infinite).unwrap(), WaitStatus::Signaled);
        assert!(gpu.is_signaled(&c.fence).unwrap());
        assert_eq!(gpu.queued(), 0);
        assert_eq!(gpu.stats().blocking_waits, 1);
    }

    #[test]
    fn test_wait_without_signal_operation_is_rejected() {
        let gpu = SimGpu::new();
        let c = chain(&gpu);
        gpu.begin_batch(&c.batch).unwrap();
        gpu.end_batch(&c.batch).unwrap();
        // Nothing armed `acquired`.
        assert!(matches!(submit(&gpu, &c, 1), Err(FrameError::InvalidState(_))));
        assert_eq!(gpu.stats().submissions, 0);
    }

    #[test]
    fn test_device_signal_consumed_once() {
        let gpu = SimGpu::new();
        let c = chain(&gpu);
        arm(&gpu, &c.acquired);
        gpu.begin_batch(&c.batch).unwrap();
        gpu.end_batch(&c.batch).unwrap();
        submit(&gpu, &c, 1).unwrap();

        let second = gpu.create_device_signal().unwrap();
        let other = gpu.create_command_batch().unwrap();
        gpu.begin_batch(&other).unwrap();
        gpu.end_batch(&other).unwrap();
        let result = gpu.submit(Submission {
            frame: 1,
            stage: Stage::Scene,
            batch: &other,
            wait: &c.acquired,
            signal: &second,
            host: None,
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_pending_batch_cannot_be_rerecorded() {
        let gpu = SimGpu::new();
        let c = chain(&gpu);
        arm(&gpu, &c.acquired);
        gpu.begin_batch(&c.batch).unwrap();
        gpu.end_batch(&c.batch).unwrap();
        submit(&gpu, &c, 1).unwrap();

        assert!(gpu.begin_batch(&c.batch).is_err());
        gpu.retire_all();
        gpu.begin_batch(&c.batch).unwrap();
    }

    #[test]
    fn test_reset_of_pending_host_signal_is_rejected() {
        let gpu = SimGpu::new();
        let fence = gpu.create_host_signal(false).unwrap();
        gpu.signal_host(&fence).unwrap();
        assert!(gpu.reset(&fence).is_err());
        gpu.wait_idle().unwrap();
        gpu.reset(&fence).unwrap();
        assert!(!gpu.is_signaled(&fence).unwrap());
    }

    #[test]
    fn test_concurrent_writes_counted() {
        let gpu = SimGpu::new();
        let image = ImageId {
            generation: 0,
            index: 0,
        };
        let a = chain(&gpu);
        let b = chain(&gpu);
        for (c, frame) in [(&a, 1), (&b, 2)] {
            arm(&gpu, &c.acquired);
            gpu.begin_batch(&c.batch).unwrap();
            c.batch.write(image).unwrap();
            gpu.end_batch(&c.batch).unwrap();
            submit(&gpu, c, frame).unwrap();
        }
        assert_eq!(gpu.stats().concurrent_writes, 1);
        assert_eq!(gpu.in_flight_frames(), 2);
    }

    #[test]
    fn test_stale_generation_write_is_rejected() {
        let gpu = SimGpu::new();
        lock(&gpu.state).set_generation(2);
        let c = chain(&gpu);
        arm(&gpu, &c.acquired);
        gpu.begin_batch(&c.batch).unwrap();
        c.batch
            .write(ImageId {
                generation: 1,
                index: 0,
            })
            .unwrap();
        gpu.end_batch(&c.batch).unwrap();
        assert!(submit(&gpu, &c, 1).is_err());
        assert_eq!(gpu.stats().stale_image_writes, 1);
    }

    #[test]
    fn test_write_outside_recording_is_rejected() {
        let gpu = SimGpu::new();
        let batch = gpu.create_command_batch().unwrap();
        assert!(batch.write(ImageId { generation: 0, index: 0 }).is_err());
    }

    #[test]
    fn test_hung_device() {
        let gpu = SimGpu::new();
        let fence = gpu.create_host_signal(false).unwrap();
        gpu.signal_host(&fence).unwrap();
        gpu.hang();

        assert_eq!(
            gpu.wait(&fence, Timeout::After(std::time::Duration::from_millis(1)))
                .unwrap(),
            WaitStatus::TimedOut
        );
        assert!(matches!(
            gpu.wait(&fence, Timeout::Infinite),
            Err(FrameError::DeviceLost)
        ));
        assert!(gpu.is_lost());
    }

    #[test]
    fn test_lost_device_fails_everything() {
        let gpu = SimGpu::new();
        gpu.lose_device();
        assert!(matches!(gpu.create_device_signal(), Err(FrameError::DeviceLost)));
        assert!(matches!(gpu.wait_idle(), Err(FrameError::DeviceLost)));
    }

    #[test]
    fn test_limits_report_out_of_memory() {
        let gpu = SimGpu::new();
        gpu.limit_device_signals(1);
        let _first = gpu.create_device_signal().unwrap();
        let err = gpu.create_device_signal().unwrap_err();
        assert!(err.is_out_of_memory());
    }

    #[test]
    fn test_handles_release_on_drop() {
        let gpu = SimGpu::new();
        {
            let _c = chain(&gpu);
            assert_eq!(gpu.live_device_signals(), 2);
            assert_eq!(gpu.live_host_signals(), 1);
            assert_eq!(gpu.live_batches(), 1);
        }
        assert_eq!(gpu.live_device_signals(), 0);
        assert_eq!(gpu.live_host_signals(), 0);
        assert_eq!(gpu.live_batches(), 0);
    }
}
