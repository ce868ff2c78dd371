use std::sync::Arc;

use framechain_rhi::RhiError;
use framechain_rhi::command::{CommandBuffer, CommandPool};
use framechain_rhi::device::Device;
use framechain_rhi::sync::{Fence, Semaphore};
use framechain_rhi::vk;
use tracing::info;

use crate::backend::{Gpu, Stage, Submission, Timeout, WaitStatus};
use crate::error::FrameResult;

/// [`Gpu`] implementation over a logical device's graphics queue.
pub struct VulkanGpu {
    device: Arc<Device>,
    command_pool: Arc<CommandPool>,
}

impl VulkanGpu {
    /// Creates the command pool all frame slots allocate from.
    ///
    /// # Errors
    ///
    /// Returns an error if the device has no graphics queue family or the
    /// command pool cannot be created.
    pub fn new(device: Arc<Device>) -> FrameResult<Self> {
        let family = device
            .queue_families()
            .graphics_family
            .ok_or(RhiError::NoSuitableGpu)?;
        let command_pool = Arc::new(CommandPool::new(device.clone(), family)?);

        info!("Vulkan frame backend ready on queue family {}", family);

        Ok(Self {
            device,
            command_pool,
        })
    }

    #[inline]
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }
}

/// Pipeline stages of a stage submission that wait on its device signal.
fn wait_stage(stage: Stage) -> vk::PipelineStageFlags {
    match stage {
        // The depth buffer is written before any colour output.
        Stage::Scene => {
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
        }
        Stage::Overlay => vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
    }
}

impl Gpu for VulkanGpu {
    type DeviceSignal = Semaphore;
    type HostSignal = Fence;
    type CommandBatch = CommandBuffer;

    fn create_device_signal(&self) -> FrameResult<Semaphore> {
        Ok(Semaphore::new(self.device.clone())?)
    }

    fn create_host_signal(&self, signaled: bool) -> FrameResult<Fence> {
        Ok(Fence::new(self.device.clone(), signaled)?)
    }

    fn create_command_batch(&self) -> FrameResult<CommandBuffer> {
        Ok(CommandBuffer::new(self.command_pool.clone())?)
    }

    fn begin_batch(&self, batch: &CommandBuffer) -> FrameResult<()> {
        batch.reset()?;
        batch.begin()?;
        Ok(())
    }

    fn end_batch(&self, batch: &CommandBuffer) -> FrameResult<()> {
        Ok(batch.end()?)
    }

    fn wait(&self, host: &Fence, timeout: Timeout) -> FrameResult<WaitStatus> {
        Ok(if host.wait(timeout.as_nanos())? {
            WaitStatus::Signaled
        } else {
            WaitStatus::TimedOut
        })
    }

    fn is_signaled(&self, host: &Fence) -> FrameResult<bool> {
        Ok(host.status()?)
    }

    fn reset(&self, host: &Fence) -> FrameResult<()> {
        Ok(host.reset()?)
    }

    fn submit(&self, submission: Submission<'_, Self>) -> FrameResult<()> {
        let wait_semaphores = [submission.wait.handle()];
        let wait_stages = [wait_stage(submission.stage)];
        let command_buffers = [submission.batch.handle()];
        let signal_semaphores = [submission.signal.handle()];

        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        let fence = submission.host.map_or(vk::Fence::null(), Fence::handle);

        // SAFETY: the batch was closed by end_batch, the wait semaphore has a
        // pending signal from the acquire or the previous stage, and the fence
        // was reset when the slot was borrowed.
        unsafe { self.device.submit_graphics(&[submit_info], fence)? };
        Ok(())
    }

    fn signal_host(&self, host: &Fence) -> FrameResult<()> {
        // SAFETY: an empty submission only signals the fence once all
        // previously queued work has finished; the fence is unsignaled.
        unsafe { self.device.submit_graphics(&[], host.handle())? };
        Ok(())
    }

    fn wait_idle(&self) -> FrameResult<()> {
        Ok(self.device.wait_idle()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vulkan_gpu_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<VulkanGpu>();
    }

    #[test]
    fn test_scene_waits_before_depth_writes() {
        assert!(wait_stage(Stage::Scene).contains(vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS));
        assert_eq!(
            wait_stage(Stage::Overlay),
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
        );
    }
}
