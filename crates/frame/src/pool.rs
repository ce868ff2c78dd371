//! Presentation surface pool.
//!
//! Owns the surface and the image set created from it, and mediates acquire
//! and present. The whole image set is replaced at once on every (re)build.
//!
//! # State machine
//!
//! ```text
//! Unbuilt ──build──▶ Built ──out-of-date──▶ OutOfDate
//!                      ▲                        │
//!                      └──build── Rebuilding ◀──┘ rebuild
//!
//! any state ──destroy──▶ Destroyed (terminal)
//! ```

use framechain_core::Extent;
use tracing::{debug, error, info};

use crate::backend::{Acquire, Gpu, Present, Surface, SurfaceGrant, SurfaceRequest};
use crate::error::{FrameError, FrameResult};

/// Lifecycle state of a [`PresentationPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    Unbuilt,
    Built,
    /// The surface stopped matching the window. Acquire and present report
    /// out-of-date until rebuilt.
    OutOfDate,
    Rebuilding,
    Destroyed,
}

/// Owner of the presentation images.
pub struct PresentationPool<S: Surface> {
    // Dropped before the surface that created them.
    images: Vec<S::Image>,
    surface: S,
    request: SurfaceRequest,
    state: PoolState,
    grant: Option<SurfaceGrant>,
    generation: u64,
}

impl<S: Surface> PresentationPool<S> {
    /// Creates an unbuilt pool.
    pub fn new(surface: S, request: SurfaceRequest) -> Self {
        Self {
            images: Vec::new(),
            surface,
            request,
            state: PoolState::Unbuilt,
            grant: None,
            generation: 0,
        }
    }

    /// Drops the current images and creates a new set for `extent`.
    ///
    /// Accepts whatever image count the surface grants as long as it meets
    /// the request's minimum. Returns the new image count.
    ///
    /// # Errors
    ///
    /// - [`FrameError::InvalidState`] if the pool is destroyed or `extent` is empty
    /// - [`FrameError::ResourceExhausted`] if fewer than `min_image_count`
    ///   images were granted; the pool is left unbuilt
    pub fn build(&mut self, extent: Extent) -> FrameResult<usize> {
        if self.state == PoolState::Destroyed {
            return Err(FrameError::invalid_state("build of a destroyed presentation pool"));
        }
        if extent.is_empty() {
            return Err(FrameError::invalid_state(format!(
                "cannot build presentation images for an empty extent ({})",
                extent
            )));
        }

        if !self.images.is_empty() {
            debug!("Dropping {} presentation image(s)", self.images.len());
        }
        self.images.clear();
        self.grant = None;

        let created = match self.surface.create_images(&self.request, extent) {
            Ok(created) => created,
            Err(e) => {
                self.state = PoolState::Unbuilt;
                return Err(e);
            }
        };

        let granted = created.images.len() as u32;
        if granted < self.request.min_image_count {
            error!(
                "Surface granted {} image(s), at least {} required",
                granted, self.request.min_image_count
            );
            self.state = PoolState::Unbuilt;
            return Err(FrameError::ResourceExhausted {
                what: "presentation images",
                requested: self.request.min_image_count,
                granted,
            });
        }
        if granted != self.request.preferred_image_count {
            debug!(
                "Surface granted {} image(s) instead of the preferred {}",
                granted, self.request.preferred_image_count
            );
        }

        self.images = created.images;
        self.grant = Some(created.grant);
        self.generation += 1;
        self.state = PoolState::Built;

        info!(
            "Presentation pool built: {} image(s) at {} ({:?}), generation {}",
            granted, created.grant.extent, created.grant.present_mode, self.generation
        );

        Ok(self.images.len())
    }

    /// Rebuilds the image set for a new extent.
    ///
    /// The caller must have drained all device work that references the old
    /// images and must reset any image-indexed state afterwards.
    pub fn rebuild(&mut self, extent: Extent) -> FrameResult<usize> {
        if self.state == PoolState::Destroyed {
            return Err(FrameError::invalid_state("rebuild of a destroyed presentation pool"));
        }
        debug!("Rebuilding presentation pool from {:?} at {}", self.state, extent);
        self.state = PoolState::Rebuilding;
        self.build(extent)
    }

    /// Acquires the next image; `signal` fires once it is writable.
    ///
    /// [`Acquire::OutOfDate`] is a normal outcome and moves the pool to
    /// [`PoolState::OutOfDate`].
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::InvalidState`] unless the pool is built or out of date.
    pub fn acquire_next(&mut self, signal: &<S::Gpu as Gpu>::DeviceSignal) -> FrameResult<Acquire> {
        match self.state {
            PoolState::Built => {}
            PoolState::OutOfDate => return Ok(Acquire::OutOfDate),
            other => {
                return Err(FrameError::invalid_state(format!(
                    "acquire while the presentation pool is {:?}",
                    other
                )));
            }
        }

        let outcome = self.surface.acquire_next_image(signal)?;
        match outcome {
            Acquire::Ready { index, .. } if index as usize >= self.images.len() => {
                return Err(FrameError::invalid_state(format!(
                    "surface returned image {} of {}",
                    index,
                    self.images.len()
                )));
            }
            Acquire::OutOfDate => {
                debug!("Surface out of date on acquire");
                self.state = PoolState::OutOfDate;
            }
            Acquire::Ready { .. } => {}
        }
        Ok(outcome)
    }

    /// Queues image `index` for display once `wait` fires.
    pub fn present(
        &mut self,
        index: u32,
        wait: &<S::Gpu as Gpu>::DeviceSignal,
    ) -> FrameResult<Present> {
        match self.state {
            PoolState::Built => {}
            PoolState::OutOfDate => return Ok(Present::OutOfDate),
            other => {
                return Err(FrameError::invalid_state(format!(
                    "present while the presentation pool is {:?}",
                    other
                )));
            }
        }
        if index as usize >= self.images.len() {
            return Err(FrameError::invalid_state(format!(
                "present of image {} of {}",
                index,
                self.images.len()
            )));
        }

        let outcome = self.surface.present(index, wait)?;
        if outcome == Present::OutOfDate {
            debug!("Surface out of date on present");
            self.state = PoolState::OutOfDate;
        }
        Ok(outcome)
    }

    /// Drops every image. The pool cannot be used afterwards.
    pub fn destroy(&mut self) {
        if self.state == PoolState::Destroyed {
            return;
        }
        self.images.clear();
        self.grant = None;
        self.state = PoolState::Destroyed;
        info!("Presentation pool destroyed");
    }

    /// Returns image `index`.
    pub fn image(&self, index: u32) -> FrameResult<&S::Image> {
        self.images.get(index as usize).ok_or_else(|| {
            FrameError::invalid_state(format!(
                "image {} out of range for {} images",
                index,
                self.images.len()
            ))
        })
    }

    #[inline]
    pub fn images(&self) -> &[S::Image] {
        &self.images
    }

    /// Number of images (S).
    #[inline]
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Extent of the current image set, empty while unbuilt.
    #[inline]
    pub fn extent(&self) -> Extent {
        self.grant.map(|g| g.extent).unwrap_or_default()
    }

    #[inline]
    pub fn grant(&self) -> Option<SurfaceGrant> {
        self.grant
    }

    #[inline]
    pub fn state(&self) -> PoolState {
        self.state
    }

    #[inline]
    pub fn is_built(&self) -> bool {
        self.state == PoolState::Built
    }

    /// Number of successful builds.
    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[inline]
    pub fn request(&self) -> &SurfaceRequest {
        &self.request
    }

    #[inline]
    pub fn surface(&self) -> &S {
        &self.surface
    }

    #[inline]
    pub fn surface_mut(&mut self) -> &mut S {
        &mut self.surface
    }
}
