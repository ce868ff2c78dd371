//! Error types for the frame engine.
//!
//! A surface that stopped matching its window is not an error: it is reported
//! as [`FrameStatus::SurfaceStale`](crate::FrameStatus::SurfaceStale) and
//! handled by the recovery loop. Everything here is either fatal
//! ([`FrameError::DeviceLost`]) or a construction/usage failure.

use framechain_rhi::RhiError;
use thiserror::Error;

/// Frame engine error type.
#[derive(Error, Debug)]
pub enum FrameError {
    /// The device stopped responding or was removed. Never retried.
    #[error("device lost")]
    DeviceLost,

    /// The device or compositor granted fewer resources than required.
    #[error("{what} exhausted: requested {requested}, granted {granted}")]
    ResourceExhausted {
        what: &'static str,
        requested: u32,
        granted: u32,
    },

    /// An operation was called in a state that does not allow it.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Rejected configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Any other device API failure.
    #[error("RHI error: {0}")]
    Rhi(RhiError),

    /// Window system failure.
    #[error("platform error: {0}")]
    Platform(#[from] framechain_core::Error),
}

impl From<RhiError> for FrameError {
    fn from(err: RhiError) -> Self {
        match err {
            RhiError::DeviceLost => FrameError::DeviceLost,
            other => FrameError::Rhi(other),
        }
    }
}

impl FrameError {
    /// Returns `true` if the error leaves the device unusable.
    pub fn is_fatal(&self) -> bool {
        matches!(self, FrameError::DeviceLost)
    }

    /// Returns `true` for allocation failures and refused resource grants.
    pub fn is_out_of_memory(&self) -> bool {
        match self {
            FrameError::ResourceExhausted { .. } => true,
            FrameError::Rhi(e) => e.is_out_of_memory(),
            _ => false,
        }
    }

    pub(crate) fn invalid_state(msg: impl Into<String>) -> Self {
        FrameError::InvalidState(msg.into())
    }
}

/// Result type alias for frame engine operations.
pub type FrameResult<T> = std::result::Result<T, FrameError>;

#[cfg(test)]
mod tests {
    use super::*;
    use framechain_rhi::vk;

    #[test]
    fn test_device_lost_maps_through() {
        let err: FrameError = RhiError::DeviceLost.into();
        assert!(err.is_fatal());
        let err: FrameError = RhiError::from(vk::Result::ERROR_DEVICE_LOST).into();
        assert!(matches!(err, FrameError::DeviceLost));
    }

    #[test]
    fn test_out_of_memory_classification() {
        let oom: FrameError = RhiError::from(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY).into();
        assert!(oom.is_out_of_memory());
        assert!(!oom.is_fatal());

        let exhausted = FrameError::ResourceExhausted {
            what: "presentation images",
            requested: 2,
            granted: 1,
        };
        assert!(exhausted.is_out_of_memory());
        assert_eq!(
            exhausted.to_string(),
            "presentation images exhausted: requested 2, granted 1"
        );

        assert!(!FrameError::invalid_state("x").is_out_of_memory());
    }
}
