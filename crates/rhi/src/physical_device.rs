//! GPU selection for presenting frames to a window surface.
//!
//! A GPU qualifies when it reports Vulkan 1.3, exposes every extension the
//! logical device enables, has a queue family that records graphics work and
//! one that presents to the surface, and the surface offers it at least one
//! format and present mode. Among qualifying GPUs discrete ones win, then
//! those that present from their graphics family.
//!
//! # Example
//!
//! ```no_run
//! use framechain_rhi::instance::Instance;
//! use framechain_rhi::physical_device::select_physical_device;
//! use ash::vk;
//!
//! let instance = Instance::new(false, &[]).expect("Failed to create instance");
//! let surface: vk::SurfaceKHR = vk::SurfaceKHR::null(); // placeholder
//! let surface_loader = ash::khr::surface::Instance::new(instance.entry(), instance.handle());
//!
//! let gpu = select_physical_device(instance.handle(), surface, &surface_loader)
//!     .expect("No GPU can present to this surface");
//! println!("Presenting with {}", gpu.device_name());
//! ```

use std::ffi::CStr;

use ash::vk;
use tracing::{debug, info, warn};

use crate::device::DEVICE_EXTENSIONS;
use crate::error::{RhiError, RhiResult};
use crate::swapchain::SwapchainSupportDetails;

/// Lowest Vulkan version a GPU must report (dynamic rendering, synchronization2).
const MIN_API_VERSION: (u32, u32) = (1, 3);

/// The two queue families the frame loop submits and presents on.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    /// Family the frame stages are submitted to.
    pub graphics_family: Option<u32>,
    /// Family presents are queued on.
    pub present_family: Option<u32>,
}

impl QueueFamilyIndices {
    /// Picks the families from a GPU's queue family list.
    ///
    /// A family that both records graphics and presents is preferred over a
    /// split pair.
    fn from_properties(
        families: &[vk::QueueFamilyProperties],
        mut can_present: impl FnMut(u32) -> bool,
    ) -> Self {
        let mut indices = Self::default();

        for (index, family) in (0u32..).zip(families) {
            if family.queue_count == 0 {
                continue;
            }
            let graphics = family.queue_flags.contains(vk::QueueFlags::GRAPHICS);
            let present = can_present(index);

            if graphics && present {
                return Self {
                    graphics_family: Some(index),
                    present_family: Some(index),
                };
            }
            if graphics && indices.graphics_family.is_none() {
                indices.graphics_family = Some(index);
            }
            if present && indices.present_family.is_none() {
                indices.present_family = Some(index);
            }
        }

        indices
    }

    /// Both families were found.
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.graphics_family.is_some() && self.present_family.is_some()
    }

    /// Graphics and present share one family.
    #[inline]
    fn is_shared(&self) -> bool {
        self.is_complete() && self.graphics_family == self.present_family
    }

    /// Distinct families, one queue each, graphics first.
    pub fn unique_families(&self) -> Vec<u32> {
        let mut families: Vec<u32> = self.graphics_family.into_iter().collect();
        if let Some(present) = self.present_family
            && !families.contains(&present)
        {
            families.push(present);
        }
        families
    }
}

/// A GPU that can drive the frame loop on a given surface.
#[derive(Clone)]
pub struct PhysicalDeviceInfo {
    pub device: vk::PhysicalDevice,
    pub properties: vk::PhysicalDeviceProperties,
    pub queue_families: QueueFamilyIndices,
    /// Present modes the surface offers on this GPU.
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl PhysicalDeviceInfo {
    pub fn device_name(&self) -> &str {
        device_name(&self.properties)
    }

    pub fn device_type_name(&self) -> &'static str {
        match self.properties.device_type {
            vk::PhysicalDeviceType::DISCRETE_GPU => "Discrete GPU",
            vk::PhysicalDeviceType::INTEGRATED_GPU => "Integrated GPU",
            vk::PhysicalDeviceType::VIRTUAL_GPU => "Virtual GPU",
            vk::PhysicalDeviceType::CPU => "CPU",
            _ => "Other",
        }
    }

    /// `(major, minor, patch)` of the Vulkan version the GPU reports.
    pub fn api_version(&self) -> (u32, u32, u32) {
        let version = self.properties.api_version;
        (
            vk::api_version_major(version),
            vk::api_version_minor(version),
            vk::api_version_patch(version),
        )
    }

    fn score(&self) -> u32 {
        score(self.properties.device_type, self.queue_families.is_shared())
    }
}

impl std::fmt::Debug for PhysicalDeviceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (major, minor, patch) = self.api_version();
        f.debug_struct("PhysicalDeviceInfo")
            .field("name", &self.device_name())
            .field("type", &self.device_type_name())
            .field("api_version", &format!("{}.{}.{}", major, minor, patch))
            .field("queue_families", &self.queue_families)
            .field("present_modes", &self.present_modes)
            .finish()
    }
}

/// Picks the GPU to render and present with.
///
/// # Errors
///
/// Returns [`RhiError::NoSuitableGpu`] if no GPU qualifies, or a Vulkan
/// error if enumeration fails.
pub fn select_physical_device(
    instance: &ash::Instance,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
) -> RhiResult<PhysicalDeviceInfo> {
    let devices = unsafe { instance.enumerate_physical_devices()? };
    info!("Found {} GPU(s)", devices.len());

    let mut candidates = Vec::with_capacity(devices.len());
    for device in devices {
        match inspect(instance, device, surface, surface_loader) {
            Ok(Some(candidate)) => candidates.push(candidate),
            Ok(None) => {}
            Err(e) => warn!("Skipping GPU {:?}: {}", device, e),
        }
    }

    let selected = candidates
        .into_iter()
        .max_by_key(PhysicalDeviceInfo::score)
        .ok_or_else(|| {
            warn!("No GPU can render and present to this surface");
            RhiError::NoSuitableGpu
        })?;

    let (major, minor, patch) = selected.api_version();
    info!(
        "Selected GPU: '{}' ({}) - Vulkan {}.{}.{}, queue families {:?}",
        selected.device_name(),
        selected.device_type_name(),
        major,
        minor,
        patch,
        selected.queue_families.unique_families()
    );
    Ok(selected)
}

/// Returns the GPU's description, or `None` with the reason logged if it
/// does not qualify.
fn inspect(
    instance: &ash::Instance,
    device: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
) -> RhiResult<Option<PhysicalDeviceInfo>> {
    let properties = unsafe { instance.get_physical_device_properties(device) };
    let name = device_name(&properties);

    if !meets_api_version(properties.api_version) {
        debug!(
            "GPU '{}' skipped: Vulkan {}.{} reported, {}.{} required",
            name,
            vk::api_version_major(properties.api_version),
            vk::api_version_minor(properties.api_version),
            MIN_API_VERSION.0,
            MIN_API_VERSION.1
        );
        return Ok(None);
    }

    let available = unsafe { instance.enumerate_device_extension_properties(device)? };
    if let Some(missing) = DEVICE_EXTENSIONS.iter().find(|required| {
        !available
            .iter()
            .any(|ext| ext.extension_name_as_c_str().is_ok_and(|n| n == **required))
    }) {
        debug!("GPU '{}' skipped: missing extension {:?}", name, missing);
        return Ok(None);
    }

    let families = unsafe { instance.get_physical_device_queue_family_properties(device) };
    let queue_families = QueueFamilyIndices::from_properties(&families, |index| unsafe {
        surface_loader
            .get_physical_device_surface_support(device, index, surface)
            .unwrap_or(false)
    });
    if !queue_families.is_complete() {
        debug!(
            "GPU '{}' skipped: graphics={:?} present={:?}",
            name, queue_families.graphics_family, queue_families.present_family
        );
        return Ok(None);
    }

    let support = SwapchainSupportDetails::query(device, surface, surface_loader)?;
    if !support.is_adequate() {
        debug!("GPU '{}' skipped: surface offers no format or present mode", name);
        return Ok(None);
    }

    debug!(
        "GPU '{}' qualifies: {:?}, present modes {:?}",
        name, queue_families, support.present_modes
    );
    Ok(Some(PhysicalDeviceInfo {
        device,
        properties,
        queue_families,
        present_modes: support.present_modes,
    }))
}

fn device_name(properties: &vk::PhysicalDeviceProperties) -> &str {
    properties
        .device_name_as_c_str()
        .ok()
        .and_then(|name: &CStr| name.to_str().ok())
        .unwrap_or("Unknown Device")
}

fn meets_api_version(version: u32) -> bool {
    (vk::api_version_major(version), vk::api_version_minor(version)) >= MIN_API_VERSION
}

fn score(device_type: vk::PhysicalDeviceType, shared_queue: bool) -> u32 {
    let kind = match device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 4,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 3,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 2,
        vk::PhysicalDeviceType::CPU => 1,
        _ => 0,
    };
    kind * 2 + u32::from(shared_queue)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    #[test]
    fn test_prefers_family_that_does_both() {
        let families = [
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE),
        ];
        let indices = QueueFamilyIndices::from_properties(&families, |i| i != 0);
        assert_eq!(indices.graphics_family, Some(2));
        assert_eq!(indices.present_family, Some(2));
        assert!(indices.is_shared());
        assert_eq!(indices.unique_families(), vec![2]);
    }

    #[test]
    fn test_split_families() {
        let families = [
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::TRANSFER),
        ];
        let indices = QueueFamilyIndices::from_properties(&families, |i| i == 1);
        assert!(indices.is_complete());
        assert!(!indices.is_shared());
        assert_eq!(indices.unique_families(), vec![0, 1]);
    }

    #[test]
    fn test_empty_families_are_ignored() {
        let empty = vk::QueueFamilyProperties {
            queue_flags: vk::QueueFlags::GRAPHICS,
            queue_count: 0,
            ..Default::default()
        };
        let indices = QueueFamilyIndices::from_properties(&[empty], |_| true);
        assert_eq!(indices, QueueFamilyIndices::default());
        assert!(!indices.is_complete());
        assert!(indices.unique_families().is_empty());
    }

    #[test]
    fn test_no_present_support_is_incomplete() {
        let indices =
            QueueFamilyIndices::from_properties(&[family(vk::QueueFlags::GRAPHICS)], |_| false);
        assert_eq!(indices.graphics_family, Some(0));
        assert!(!indices.is_complete());
    }

    #[test]
    fn test_api_version_floor() {
        assert!(meets_api_version(vk::make_api_version(0, 1, 3, 0)));
        assert!(meets_api_version(vk::make_api_version(0, 1, 4, 0)));
        assert!(meets_api_version(vk::make_api_version(0, 2, 0, 0)));
        assert!(!meets_api_version(vk::make_api_version(0, 1, 2, 198)));
    }

    #[test]
    fn test_discrete_beats_integrated_with_shared_queue() {
        let discrete_split = score(vk::PhysicalDeviceType::DISCRETE_GPU, false);
        let integrated_shared = score(vk::PhysicalDeviceType::INTEGRATED_GPU, true);
        let discrete_shared = score(vk::PhysicalDeviceType::DISCRETE_GPU, true);
        assert!(discrete_split > integrated_shared);
        assert!(discrete_shared > discrete_split);
    }
}
