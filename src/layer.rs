//! Interception layer.
//!
//! [`ValidationLayer`] validates every [`ApiCall`] against the tracked device
//! state, forwards it to the next layer and records its effects.

use {
    crate::{
        command_buffer::{BeginInfo, CommandBufferLevel, CommandPoolInfo},
        config::ValidationConfig,
        descriptor::{DescriptorPoolInfo, DescriptorSetLayoutInfo, DescriptorWrite},
        device::DeviceState,
        encode::Cmd,
        handle::{Handle, ObjectId},
        pipeline::{Canonicalizer, PipelineInfo, PipelineLayoutInfo},
        queue::{QueryPoolInfo, QueueInfo, SubmitInfo},
        render_pass::{FramebufferInfo, RenderPassInfo},
        report::{Reporter, Verdict},
        resource::{BufferInfo, BufferViewInfo, ImageInfo, ImageViewInfo},
        OutOfMemory,
    },
    hashbrown::HashMap,
    parking_lot::Mutex,
    std::{
        error::Error,
        fmt::{self, Debug},
        sync::Arc,
    },
};

/// Intercepted API call.
///
/// Handles of created objects are chosen by the caller and known before the call is forwarded.
#[derive(Clone, Copy, Debug)]
pub enum ApiCall<'a> {
    GetQueue(QueueInfo),
    CreateBuffer {
        handle: Handle,
        info: BufferInfo,
    },
    CreateImage {
        handle: Handle,
        info: ImageInfo,
    },
    CreateBufferView {
        handle: Handle,
        info: BufferViewInfo,
    },
    CreateImageView {
        handle: Handle,
        info: ImageViewInfo,
    },
    CreateSampler {
        handle: Handle,
    },
    AllocateMemory {
        handle: Handle,
        size: u64,
        dedicated: Option<ObjectId>,
    },
    CreateDescriptorSetLayout {
        handle: Handle,
        info: &'a DescriptorSetLayoutInfo,
    },
    CreatePipelineLayout {
        handle: Handle,
        info: &'a PipelineLayoutInfo,
    },
    CreatePipeline {
        handle: Handle,
        info: PipelineInfo,
    },
    CreateRenderPass {
        handle: Handle,
        info: &'a RenderPassInfo,
    },
    CreateFramebuffer {
        handle: Handle,
        info: &'a FramebufferInfo,
    },
    CreateSwapchain {
        handle: Handle,
        images: &'a [Handle],
        info: ImageInfo,
    },
    CreateQueryPool {
        handle: Handle,
        info: QueryPoolInfo,
    },
    CreateEvent {
        handle: Handle,
    },
    CreateFence {
        handle: Handle,
    },
    CreateCommandPool {
        handle: Handle,
        info: CommandPoolInfo,
    },
    CreateDescriptorPool {
        handle: Handle,
        info: DescriptorPoolInfo,
    },
    AllocateCommandBuffers {
        pool: Handle,
        level: CommandBufferLevel,
        command_buffers: &'a [Handle],
    },
    /// Set and layout handle pairs.
    AllocateDescriptorSets {
        pool: Handle,
        sets: &'a [(Handle, Handle)],
    },

    /// Destroys or frees any tracked object.
    Destroy(ObjectId),
    FreeCommandBuffers {
        pool: Handle,
        command_buffers: &'a [Handle],
    },
    FreeDescriptorSets {
        pool: Handle,
        sets: &'a [Handle],
    },
    ResetDescriptorPool {
        pool: Handle,
    },

    BindMemory {
        resource: ObjectId,
        memory: Handle,
        offset: u64,
    },
    BindSparse {
        resource: ObjectId,
        memory: Handle,
        offset: u64,
        size: u64,
    },
    MapMemory {
        memory: Handle,
        offset: u64,
        size: u64,
    },
    UnmapMemory {
        memory: Handle,
    },
    UpdateDescriptorSets {
        writes: &'a [DescriptorWrite<'a>],
    },

    BeginCommandBuffer {
        command_buffer: Handle,
        info: BeginInfo,
    },
    EndCommandBuffer {
        command_buffer: Handle,
    },
    ResetCommandBuffer {
        command_buffer: Handle,
    },
    ResetCommandPool {
        pool: Handle,
    },
    Record {
        command_buffer: Handle,
        cmd: Cmd<'a>,
    },

    QueueSubmit {
        queue: Handle,
        submits: &'a [SubmitInfo<'a>],
        fence: Option<Handle>,
    },
    QueueWaitIdle {
        queue: Handle,
    },
    DeviceWaitIdle,
    WaitForFences {
        fences: &'a [Handle],
    },
    ResetFences {
        fences: &'a [Handle],
    },
    SetEventStatus {
        event: Handle,
        signaled: bool,
    },
}

/// Error returned by the next layer.
#[derive(Debug, thiserror::Error)]
#[error("Next layer failed: {source}")]
pub struct NextError {
    #[source]
    source: Box<dyn Error + Send + Sync>,
}

impl NextError {
    pub fn new(source: impl Into<Box<dyn Error + Send + Sync>>) -> Self {
        NextError {
            source: source.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LayerError {
    /// Call was not forwarded because validation found a fatal violation.
    #[error("Call skipped after validation error")]
    Skipped,

    #[error(transparent)]
    OutOfMemory {
        #[from]
        source: OutOfMemory,
    },

    #[error(transparent)]
    Next {
        #[from]
        source: NextError,
    },
}

/// Next layer in the chain, down to the driver.
pub trait NextLayer {
    /// Executes the call.
    /// Returns handle of the object it created, if any.
    fn dispatch(&self, call: &ApiCall<'_>) -> Result<Option<Handle>, NextError>;
}

/// Layer that performs no work. Useful when only validation results matter.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullLayer;

impl NextLayer for NullLayer {
    fn dispatch(&self, _call: &ApiCall<'_>) -> Result<Option<Handle>, NextError> {
        Ok(None)
    }
}

/// Validation layer of one device.
pub struct ValidationLayer<N> {
    state: Mutex<DeviceState>,
    next: N,
}

impl<N> Debug for ValidationLayer<N> {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.state.try_lock() {
            Some(state) => fmt
                .debug_struct("ValidationLayer")
                .field("state", &*state)
                .finish_non_exhaustive(),
            None => fmt
                .debug_struct("ValidationLayer")
                .field("state", &"<locked>")
                .finish_non_exhaustive(),
        }
    }
}

impl<N> ValidationLayer<N>
where
    N: NextLayer,
{
    pub fn new(
        config: ValidationConfig,
        reporter: Reporter,
        canonicalizer: Arc<Canonicalizer>,
        next: N,
    ) -> Self {
        ValidationLayer {
            state: Mutex::new(DeviceState::new(config, reporter, canonicalizer)),
            next,
        }
    }

    pub fn next(&self) -> &N {
        &self.next
    }

    /// Runs closure with the device state locked.
    pub fn with_state<R>(&self, f: impl FnOnce(&mut DeviceState) -> R) -> R {
        f(&mut self.state.lock())
    }

    /// Returns `true` if the object is referenced by a pending submission.
    ///
    /// Answered without taking the device lock once the counter is fetched.
    pub fn is_in_use(&self, id: ObjectId) -> bool {
        let in_use = self
            .state
            .lock()
            .objects()
            .base(id)
            .map(|base| base.in_use());
        in_use.map_or(false, |in_use| in_use.get())
    }

    /// Validates, forwards and records the call.
    ///
    /// The device lock is released while the next layer executes the call.
    pub fn call(&self, call: &ApiCall<'_>) -> Result<Option<Handle>, LayerError> {
        let verdict = self.state.lock().validate(call);
        if verdict.is_skip() {
            debug!("Skipping {:?}", call);
            return Err(LayerError::Skipped);
        }

        let result = self.next.dispatch(call)?;

        self.state.lock().record_call(call)?;
        Ok(result)
    }
}

impl DeviceState {
    /// Validates a call before it is forwarded.
    pub fn validate(&mut self, call: &ApiCall<'_>) -> Verdict {
        match *call {
            ApiCall::CreateBufferView { ref info, .. } => self.validate_create_buffer_view(info),
            ApiCall::CreateImageView { ref info, .. } => self.validate_create_image_view(info),
            ApiCall::CreatePipelineLayout { info, .. } => self.validate_create_pipeline_layout(info),
            ApiCall::CreatePipeline { ref info, .. } => self.validate_create_pipeline(info),
            ApiCall::CreateRenderPass { info, .. } => self.validate_create_render_pass(info),
            ApiCall::CreateFramebuffer { info, .. } => self.validate_create_framebuffer(info),
            ApiCall::AllocateCommandBuffers { pool, .. } => {
                self.validate_allocate_command_buffers(pool)
            }
            ApiCall::AllocateDescriptorSets { pool, sets } => {
                let layouts: Vec<Handle> = sets.iter().map(|&(_, layout)| layout).collect();
                self.validate_allocate_descriptor_sets(pool, &layouts)
            }
            ApiCall::Destroy(id) => self.validate_destroy(id),
            ApiCall::FreeCommandBuffers {
                pool,
                command_buffers,
            } => self.validate_free_command_buffers(pool, command_buffers),
            ApiCall::FreeDescriptorSets { pool, sets } => {
                self.validate_free_descriptor_sets(pool, sets)
            }
            ApiCall::ResetDescriptorPool { pool } => self.validate_reset_descriptor_pool(pool),
            ApiCall::BindMemory {
                resource,
                memory,
                offset,
            } => self.validate_bind_memory(resource, memory, offset),
            ApiCall::BindSparse {
                resource,
                memory,
                offset,
                size,
            } => self.validate_bind_sparse(resource, memory, offset, size),
            ApiCall::MapMemory { memory, .. } => self.validate_map_memory(memory),
            ApiCall::UnmapMemory { memory } => self.validate_unmap_memory(memory),
            ApiCall::QueueSubmit {
                queue,
                submits,
                fence,
            } => self.validate_submit(queue, submits, fence),
            ApiCall::ResetFences { fences } => self.validate_reset_fences(fences),
            _ => Verdict::Proceed,
        }
    }

    /// Records effects of a call the next layer executed.
    ///
    /// Command buffer operations validate and record in one step,
    /// their verdict is already reported.
    pub fn record_call(&mut self, call: &ApiCall<'_>) -> Result<(), OutOfMemory> {
        match *call {
            ApiCall::GetQueue(info) => self.get_queue(info)?,
            ApiCall::CreateBuffer { handle, info } => self.create_buffer(handle, info)?,
            ApiCall::CreateImage { handle, info } => self.create_image(handle, info)?,
            ApiCall::CreateBufferView { handle, info } => self.create_buffer_view(handle, info)?,
            ApiCall::CreateImageView { handle, info } => self.create_image_view(handle, info)?,
            ApiCall::CreateSampler { handle } => self.create_sampler(handle)?,
            ApiCall::AllocateMemory {
                handle,
                size,
                dedicated,
            } => self.allocate_memory(handle, size, dedicated)?,
            ApiCall::CreateDescriptorSetLayout { handle, info } => {
                self.create_descriptor_set_layout(handle, info)?
            }
            ApiCall::CreatePipelineLayout { handle, info } => {
                self.create_pipeline_layout(handle, info)?
            }
            ApiCall::CreatePipeline { handle, info } => self.create_pipeline(handle, info)?,
            ApiCall::CreateRenderPass { handle, info } => {
                self.create_render_pass(handle, info.clone())?
            }
            ApiCall::CreateFramebuffer { handle, info } => {
                self.create_framebuffer(handle, info.clone())?
            }
            ApiCall::CreateSwapchain {
                handle,
                images,
                info,
            } => self.create_swapchain(handle, images, info)?,
            ApiCall::CreateQueryPool { handle, info } => self.create_query_pool(handle, info)?,
            ApiCall::CreateEvent { handle } => self.create_event(handle)?,
            ApiCall::CreateFence { handle } => self.create_fence(handle)?,
            ApiCall::CreateCommandPool { handle, info } => {
                self.create_command_pool(handle, info)?
            }
            ApiCall::CreateDescriptorPool { handle, info } => {
                self.create_descriptor_pool(handle, info)?
            }
            ApiCall::AllocateCommandBuffers {
                pool,
                level,
                command_buffers,
            } => self.allocate_command_buffers(pool, level, command_buffers)?,
            ApiCall::AllocateDescriptorSets { pool, sets } => {
                self.allocate_descriptor_sets(pool, sets)?
            }
            ApiCall::Destroy(id) => self.destroy(id),
            ApiCall::FreeCommandBuffers {
                pool,
                command_buffers,
            } => self.free_command_buffers(pool, command_buffers),
            ApiCall::FreeDescriptorSets { sets, .. } => self.free_descriptor_sets(sets),
            ApiCall::ResetDescriptorPool { pool } => self.reset_descriptor_pool(pool),
            ApiCall::BindMemory {
                resource,
                memory,
                offset,
            } => self.bind_memory(resource, memory, offset)?,
            ApiCall::BindSparse {
                resource,
                memory,
                offset,
                size,
            } => self.bind_sparse(resource, memory, offset, size)?,
            ApiCall::MapMemory {
                memory,
                offset,
                size,
            } => self.map_memory(memory, offset, size),
            ApiCall::UnmapMemory { memory } => self.unmap_memory(memory),
            ApiCall::UpdateDescriptorSets { writes } => {
                let _ = self.update_descriptor_sets(writes);
            }
            ApiCall::BeginCommandBuffer {
                command_buffer,
                info,
            } => {
                let _ = self.begin_command_buffer(command_buffer, info)?;
            }
            ApiCall::EndCommandBuffer { command_buffer } => {
                let _ = self.end_command_buffer(command_buffer)?;
            }
            ApiCall::ResetCommandBuffer { command_buffer } => {
                let _ = self.reset_command_buffer(command_buffer);
            }
            ApiCall::ResetCommandPool { pool } => {
                let _ = self.reset_command_pool(pool);
            }
            ApiCall::Record {
                command_buffer,
                ref cmd,
            } => {
                let _ = self.record(command_buffer, cmd)?;
            }
            ApiCall::QueueSubmit {
                queue,
                submits,
                fence,
            } => self.submit(queue, submits, fence)?,
            ApiCall::QueueWaitIdle { queue } => self.queue_wait_idle(queue),
            ApiCall::DeviceWaitIdle => self.device_wait_idle(),
            ApiCall::WaitForFences { fences } => self.wait_for_fences(fences),
            ApiCall::ResetFences { .. } => {}
            ApiCall::SetEventStatus { event, signaled } => self.set_event_status(event, signaled),
        }
        Ok(())
    }
}

/// Validation state of every device created through the instance.
///
/// Pipeline layout canonicalization is shared by all devices.
pub struct Instance<N> {
    config: ValidationConfig,
    reporter: Reporter,
    canonicalizer: Arc<Canonicalizer>,
    devices: Mutex<HashMap<Handle, Arc<ValidationLayer<N>>>>,
}

impl<N> Debug for Instance<N> {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("Instance")
            .field("config", &self.config)
            .field("canonicalizer", &self.canonicalizer)
            .field("devices", &self.devices.lock().keys().collect::<Vec<_>>())
            .finish()
    }
}

impl<N> Instance<N>
where
    N: NextLayer,
{
    pub fn new(config: ValidationConfig, reporter: Reporter) -> Self {
        Instance {
            config,
            reporter,
            canonicalizer: Arc::new(Canonicalizer::new()),
            devices: Mutex::new(HashMap::new()),
        }
    }

    pub fn canonicalizer(&self) -> &Arc<Canonicalizer> {
        &self.canonicalizer
    }

    /// Creates validation state for a new device.
    pub fn create_device(&self, device: Handle, next: N) -> Result<Arc<ValidationLayer<N>>, OutOfMemory> {
        let layer = Arc::new(ValidationLayer::new(
            self.config.clone(),
            self.reporter.clone(),
            self.canonicalizer.clone(),
            next,
        ));

        let mut devices = self.devices.lock();
        devices.try_reserve(1).map_err(|_| OutOfMemory)?;
        if devices.insert(device, layer.clone()).is_some() {
            warn!("Device {} was created twice, previous state is dropped", device);
        }
        debug!("Device {} created", device);
        Ok(layer)
    }

    pub fn device(&self, device: Handle) -> Option<Arc<ValidationLayer<N>>> {
        self.devices.lock().get(&device).cloned()
    }

    /// Tears down validation state of the device.
    pub fn destroy_device(&self, device: Handle) -> Option<Arc<ValidationLayer<N>>> {
        let layer = self.devices.lock().remove(&device);
        if layer.is_some() {
            self.canonicalizer.purge();
            debug!("Device {} destroyed", device);
        }
        layer
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            command_buffer::CommandBufferUsage,
            queue::QueueCapabilityFlags,
            report::{ErrorCode, ReportLog},
            resource::{BufferUsage, ResourceFlags},
        },
        std::sync::atomic::{AtomicUsize, Ordering},
    };

    #[derive(Debug, Default)]
    struct CountingLayer {
        calls: AtomicUsize,
    }

    impl NextLayer for CountingLayer {
        fn dispatch(&self, _call: &ApiCall<'_>) -> Result<Option<Handle>, NextError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            Ok(None)
        }
    }

    #[derive(Debug)]
    struct FailingLayer;

    impl NextLayer for FailingLayer {
        fn dispatch(&self, _call: &ApiCall<'_>) -> Result<Option<Handle>, NextError> {
            Err(NextError::new("device lost"))
        }
    }

    fn layer<N: NextLayer>(next: N) -> (ValidationLayer<N>, Arc<ReportLog>) {
        let log = Arc::new(ReportLog::new());
        let layer = ValidationLayer::new(
            ValidationConfig::default(),
            Reporter::new(log.clone()),
            Arc::new(Canonicalizer::new()),
            next,
        );
        (layer, log)
    }

    #[test]
    fn fatal_violation_is_not_forwarded() {
        let (layer, log) = layer(CountingLayer::default());
        let cb = Handle(2);
        layer
            .call(&ApiCall::CreateCommandPool {
                handle: Handle(1),
                info: CommandPoolInfo {
                    queue_family: 0,
                    capabilities: QueueCapabilityFlags::all(),
                    reset_command_buffer: false,
                },
            })
            .unwrap();
        layer
            .call(&ApiCall::AllocateCommandBuffers {
                pool: Handle(1),
                level: CommandBufferLevel::Primary,
                command_buffers: &[cb],
            })
            .unwrap();
        layer
            .call(&ApiCall::GetQueue(QueueInfo {
                handle: Handle(3),
                family: 0,
                capabilities: QueueCapabilityFlags::all(),
            }))
            .unwrap();

        let submits = [SubmitInfo {
            command_buffers: &[cb],
        }];
        let result = layer.call(&ApiCall::QueueSubmit {
            queue: Handle(3),
            submits: &submits,
            fence: None,
        });
        assert!(matches!(result, Err(LayerError::Skipped)));
        assert!(log.contains(ErrorCode::CommandBufferUnrecorded));
        assert_eq!(layer.next().calls.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn failed_call_is_not_recorded() {
        let (layer, _log) = layer(FailingLayer);
        let result = layer.call(&ApiCall::CreateBuffer {
            handle: Handle(1),
            info: BufferInfo {
                size: 16,
                usage: BufferUsage::UNIFORM,
                flags: ResourceFlags::empty(),
            },
        });
        assert!(matches!(result, Err(LayerError::Next { .. })));
        assert!(!layer.with_state(|state| state.objects().buffers.contains(Handle(1))));
    }

    #[test]
    fn recording_goes_through_layer() {
        let (layer, log) = layer(NullLayer);
        let cb = Handle(2);
        for call in [
            ApiCall::CreateCommandPool {
                handle: Handle(1),
                info: CommandPoolInfo {
                    queue_family: 0,
                    capabilities: QueueCapabilityFlags::all(),
                    reset_command_buffer: false,
                },
            },
            ApiCall::AllocateCommandBuffers {
                pool: Handle(1),
                level: CommandBufferLevel::Primary,
                command_buffers: &[cb],
            },
            ApiCall::BeginCommandBuffer {
                command_buffer: cb,
                info: BeginInfo {
                    usage: CommandBufferUsage::ONE_TIME_SUBMIT,
                    inheritance: None,
                },
            },
            ApiCall::Record {
                command_buffer: cb,
                cmd: Cmd::NextSubpass,
            },
        ] {
            layer.call(&call).unwrap();
        }
        assert!(log.contains(ErrorCode::RenderPassScope));
    }

    #[test]
    fn devices_are_isolated() {
        let instance = Instance::new(ValidationConfig::default(), Reporter::default());
        let first = instance.create_device(Handle(1), NullLayer).unwrap();
        let second = instance.create_device(Handle(2), NullLayer).unwrap();

        first
            .call(&ApiCall::CreateEvent { handle: Handle(5) })
            .unwrap();
        assert!(first.with_state(|state| state.objects().events.contains(Handle(5))));
        assert!(!second.with_state(|state| state.objects().events.contains(Handle(5))));

        assert!(instance.destroy_device(Handle(1)).is_some());
        assert!(instance.device(Handle(1)).is_none());
        assert!(instance.device(Handle(2)).is_some());
    }
}
