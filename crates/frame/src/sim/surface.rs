use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, PoisonError};

use framechain_core::Extent;
use tracing::debug;

use super::gpu::{ImageId, Shared, SimDeviceSignal, SimGpu, lock};
use crate::backend::{Acquire, Present, Surface, SurfaceGrant, SurfaceImages, SurfaceRequest};
use crate::error::{FrameError, FrameResult};

/// Image counts the simulated compositor is willing to grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimSurfaceCaps {
    pub min_image_count: u32,
    /// Zero means unbounded.
    pub max_image_count: u32,
}

impl Default for SimSurfaceCaps {
    fn default() -> Self {
        Self {
            min_image_count: 2,
            max_image_count: 8,
        }
    }
}

impl SimSurfaceCaps {
    fn grant(&self, preferred: u32) -> u32 {
        let count = preferred.max(self.min_image_count);
        if self.max_image_count > 0 {
            count.min(self.max_image_count)
        } else {
            count
        }
    }
}

/// Creation and destruction counts per image, shared with the images.
#[derive(Debug, Default)]
pub struct ImageLedger {
    records: Mutex<BTreeMap<ImageId, (u32, u32)>>,
}

impl ImageLedger {
    fn created(&self, id: ImageId) {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        records.entry(id).or_default().0 += 1;
    }

    fn dropped(&self, id: ImageId) {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        records.entry(id).or_default().1 += 1;
    }

    /// How many times `id` was dropped.
    pub fn drops(&self, id: ImageId) -> u32 {
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        records.get(&id).map_or(0, |r| r.1)
    }

    /// Every image ever created, in generation/index order.
    pub fn created_images(&self) -> Vec<ImageId> {
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        records.keys().copied().collect()
    }

    /// Images created and not yet dropped.
    pub fn live(&self) -> usize {
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        records.values().filter(|(c, d)| c > d).count()
    }
}

/// A presentation image of the simulated surface.
#[derive(Debug)]
pub struct SimImage {
    id: ImageId,
    extent: Extent,
    ledger: Arc<ImageLedger>,
}

impl SimImage {
    fn new(id: ImageId, extent: Extent, ledger: Arc<ImageLedger>) -> Self {
        ledger.created(id);
        Self { id, extent, ledger }
    }

    #[inline]
    pub fn id(&self) -> ImageId {
        self.id
    }

    #[inline]
    pub fn extent(&self) -> Extent {
        self.extent
    }
}

impl Drop for SimImage {
    fn drop(&mut self) {
        self.ledger.dropped(self.id);
    }
}

/// Simulated compositor.
///
/// Hands images out round-robin. Out-of-date and suboptimal results can be
/// scheduled on a given acquire or present call (1-based, counted over the
/// surface's lifetime). Once out of date, every acquire and present reports
/// out-of-date until the images are recreated.
pub struct SimSurface {
    gpu: Shared,
    caps: SimSurfaceCaps,
    ledger: Arc<ImageLedger>,
    generation: u64,
    image_count: u32,
    next_index: u32,
    acquired: Vec<bool>,
    out_of_date: bool,
    acquire_calls: u64,
    present_calls: u64,
    stale_acquires: BTreeSet<u64>,
    stale_presents: BTreeSet<u64>,
    suboptimal_presents: BTreeSet<u64>,
}

impl SimSurface {
    pub fn new(gpu: &SimGpu) -> Self {
        Self {
            gpu: gpu.shared(),
            caps: SimSurfaceCaps::default(),
            ledger: Arc::default(),
            generation: 0,
            image_count: 0,
            next_index: 0,
            acquired: Vec::new(),
            out_of_date: false,
            acquire_calls: 0,
            present_calls: 0,
            stale_acquires: BTreeSet::new(),
            stale_presents: BTreeSet::new(),
            suboptimal_presents: BTreeSet::new(),
        }
    }

    pub fn with_caps(mut self, caps: SimSurfaceCaps) -> Self {
        self.caps = caps;
        self
    }

    /// Acquire call `call` reports out-of-date.
    pub fn stale_on_acquire(mut self, call: u64) -> Self {
        self.stale_acquires.insert(call);
        self
    }

    /// Present call `call` reports out-of-date.
    pub fn stale_on_present(mut self, call: u64) -> Self {
        self.stale_presents.insert(call);
        self
    }

    /// Present call `call` succeeds but reports the surface suboptimal.
    pub fn suboptimal_on_present(mut self, call: u64) -> Self {
        self.suboptimal_presents.insert(call);
        self
    }

    /// Marks the surface out of date, as a window resize would.
    pub fn invalidate(&mut self) {
        self.out_of_date = true;
    }

    pub fn ledger(&self) -> Arc<ImageLedger> {
        self.ledger.clone()
    }

    /// Number of image sets created so far.
    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[inline]
    pub fn acquire_calls(&self) -> u64 {
        self.acquire_calls
    }

    #[inline]
    pub fn present_calls(&self) -> u64 {
        self.present_calls
    }
}

impl Surface for SimSurface {
    type Gpu = SimGpu;
    type Image = SimImage;

    fn create_images(
        &mut self,
        request: &SurfaceRequest,
        extent: Extent,
    ) -> FrameResult<SurfaceImages<SimImage>> {
        let count = self.caps.grant(request.preferred_image_count);

        self.generation += 1;
        lock(&self.gpu).set_generation(self.generation);

        self.image_count = count;
        self.next_index = 0;
        self.acquired = vec![false; count as usize];
        self.out_of_date = false;

        let images = (0..count)
            .map(|index| {
                let id = ImageId {
                    generation: self.generation,
                    index,
                };
                SimImage::new(id, extent, self.ledger.clone())
            })
            .collect();

        debug!(
            "Simulated surface generation {}: {} image(s) at {}",
            self.generation, count, extent
        );

        Ok(SurfaceImages {
            grant: SurfaceGrant {
                extent,
                present_mode: request.present_mode,
            },
            images,
        })
    }

    fn acquire_next_image(&mut self, signal: &SimDeviceSignal) -> FrameResult<Acquire> {
        self.acquire_calls += 1;
        if self.stale_acquires.remove(&self.acquire_calls) {
            self.out_of_date = true;
        }
        if self.out_of_date {
            return Ok(Acquire::OutOfDate);
        }
        if self.image_count == 0 {
            return Err(FrameError::invalid_state("acquire before images were created"));
        }

        let index = self.next_index;
        if self.acquired[index as usize] {
            return Err(FrameError::invalid_state(format!(
                "image {} acquired twice without a present",
                index
            )));
        }
        lock(&self.gpu).arm_for_acquire(signal.id())?;

        self.acquired[index as usize] = true;
        self.next_index = (index + 1) % self.image_count;
        Ok(Acquire::Ready {
            index,
            suboptimal: false,
        })
    }

    fn present(&mut self, index: u32, wait: &SimDeviceSignal) -> FrameResult<Present> {
        self.present_calls += 1;
        if self.stale_presents.remove(&self.present_calls) {
            self.out_of_date = true;
        }
        if !self.acquired.get(index as usize).copied().unwrap_or(false) {
            return Err(FrameError::invalid_state(format!(
                "present of image {} which is not acquired",
                index
            )));
        }
        if self.out_of_date {
            return Ok(Present::OutOfDate);
        }

        lock(&self.gpu).consume_for_present(wait.id())?;
        self.acquired[index as usize] = false;

        Ok(Present::Done {
            suboptimal: self.suboptimal_presents.remove(&self.present_calls),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Gpu;
    use framechain_core::PresentModePreference;

    fn request(preferred: u32) -> SurfaceRequest {
        SurfaceRequest {
            min_image_count: 1,
            preferred_image_count: preferred,
            present_mode: PresentModePreference::Fifo,
        }
    }

    #[test]
    fn test_grant_is_clamped_to_caps() {
        let gpu = SimGpu::new();
        let mut surface = SimSurface::new(&gpu).with_caps(SimSurfaceCaps {
            min_image_count: 2,
            max_image_count: 3,
        });
        let extent = Extent::new(64, 64);

        assert_eq!(surface.create_images(&request(1), extent).unwrap().images.len(), 2);
        assert_eq!(surface.create_images(&request(5), extent).unwrap().images.len(), 3);
        assert_eq!(surface.generation(), 2);
    }

    #[test]
    fn test_round_robin_acquire_and_present() {
        let gpu = SimGpu::new();
        let mut surface = SimSurface::new(&gpu);
        let _images = surface.create_images(&request(2), Extent::new(8, 8)).unwrap();
        let signal = gpu.create_device_signal().unwrap();

        let mut indices = Vec::new();
        for _ in 0..4 {
            match surface.acquire_next_image(&signal).unwrap() {
                Acquire::Ready { index, .. } => {
                    indices.push(index);
                    // The acquire armed the signal; presenting consumes it.
                    assert_eq!(
                        surface.present(index, &signal).unwrap(),
                        Present::Done { suboptimal: false }
                    );
                }
                Acquire::OutOfDate => panic!("unexpected out-of-date"),
            }
        }
        assert_eq!(indices, vec![0, 1, 0, 1]);
        assert_eq!(gpu.stats().acquires, 4);
        assert_eq!(gpu.stats().presents, 4);
    }

    #[test]
    fn test_scheduled_staleness_is_sticky() {
        let gpu = SimGpu::new();
        let mut surface = SimSurface::new(&gpu).stale_on_acquire(2);
        let _images = surface.create_images(&request(2), Extent::new(8, 8)).unwrap();
        let signal = gpu.create_device_signal().unwrap();

        let first = surface.acquire_next_image(&signal).unwrap();
        assert!(matches!(first, Acquire::Ready { index: 0, .. }));
        surface.present(0, &signal).unwrap();

        assert_eq!(surface.acquire_next_image(&signal).unwrap(), Acquire::OutOfDate);
        assert_eq!(surface.acquire_next_image(&signal).unwrap(), Acquire::OutOfDate);

        let _images = surface.create_images(&request(2), Extent::new(8, 8)).unwrap();
        assert!(matches!(
            surface.acquire_next_image(&signal).unwrap(),
            Acquire::Ready { index: 0, .. }
        ));
    }

    #[test]
    fn test_present_requires_acquired_image() {
        let gpu = SimGpu::new();
        let mut surface = SimSurface::new(&gpu);
        let _images = surface.create_images(&request(2), Extent::new(8, 8)).unwrap();
        let signal = gpu.create_device_signal().unwrap();
        assert!(surface.present(1, &signal).is_err());
    }

    #[test]
    fn test_ledger_tracks_drops() {
        let gpu = SimGpu::new();
        let mut surface = SimSurface::new(&gpu);
        let ledger = surface.ledger();

        let first = surface.create_images(&request(3), Extent::new(8, 8)).unwrap();
        assert_eq!(ledger.live(), 3);
        let ids: Vec<ImageId> = first.images.iter().map(SimImage::id).collect();
        drop(first);

        assert_eq!(ledger.live(), 0);
        assert!(ids.iter().all(|id| ledger.drops(*id) == 1));
    }
}
