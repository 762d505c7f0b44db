//! Shadow state of one device.
//!
//! Every intercepted call that creates, destroys or modifies objects comes
//! in two halves: `validate_*` inspects current state and reports violations
//! without changing anything, the recording half updates state after the
//! call was forwarded. Calls that have no meaningful validation expose only
//! the recording half, calls whose validation and recording are inseparable
//! expose one method returning the verdict.

use {
    crate::{
        command::{CmdType, Command},
        command_buffer::{
            ActiveRenderPass, BeginInfo, CbState, CommandBufferLevel, CommandBufferState, CommandBufferUsage,
            CommandPoolInfo, CommandPoolState, DeferredKind,
        },
        config::ValidationConfig,
        descriptor::{
            DescriptorBindingFlags, DescriptorPoolInfo, DescriptorPoolState,
            DescriptorSetLayoutInfo, DescriptorSetLayoutState, DescriptorSetState,
            DescriptorWrite,
        },
        handle::{Handle, ObjectId, ObjectType},
        memory::{BindError, MemoryAllocation, RangeKey},
        pipeline::{Canonicalizer, PipelineInfo, PipelineLayoutInfo, PipelineLayoutState, PipelineState},
        queue::{
            EventState, FenceState, QueryObject, QueryPoolInfo, QueryPoolState, QueryState,
            QueueInfo, QueueState, Submission, SubmitContext, SubmitInfo,
        },
        registry::{Objects, Registry},
        render_pass::{
            FramebufferInfo, FramebufferState, GraphIssue, RenderPassGraph, RenderPassInfo,
            RenderPassState,
        },
        report::{ErrorCode, Reporter, Verdict},
        resource::{
            BufferInfo, BufferState, BufferViewInfo, BufferViewState, ImageInfo, ImageState,
            ImageViewInfo, ImageViewState, SamplerState, SwapchainState,
        },
        stage::PipelineStageFlags,
        OutOfMemory,
    },
    hashbrown::{HashMap, HashSet},
    std::sync::Arc,
};

/// Query and event state produced by validating a submission,
/// waiting to be committed once the submission is accepted.
#[derive(Debug)]
struct StagedSubmit {
    queries: HashMap<QueryObject, QueryState>,
    event_stages: HashMap<Handle, PipelineStageFlags>,
}

#[derive(Debug)]
pub struct DeviceState {
    pub(crate) objects: Objects,
    pub(crate) config: ValidationConfig,
    pub(crate) reporter: Reporter,
    pub(crate) canonicalizer: Arc<Canonicalizer>,
    queues: HashMap<Handle, QueueState>,
    queries: HashMap<QueryObject, QueryState>,
    /// Keyed by queue, as different queues may be submitted to concurrently.
    staged: HashMap<Handle, StagedSubmit>,
}

fn register<T>(
    reporter: &Reporter,
    registry: &mut Registry<T>,
    id: ObjectId,
    state: T,
) -> Result<(), OutOfMemory> {
    if registry.insert(id.handle, state)?.is_some() {
        let _ = reporter.report(
            ErrorCode::InternalInconsistency,
            Some(id),
            format!("{} was created while a record with the same handle is alive", id),
        );
    }
    trace!("Created {}", id);
    Ok(())
}

/// Runs checks deferred by the command buffer until submission.
pub(crate) fn run_deferred(context: &mut SubmitContext<'_>, cb: Handle) -> Verdict {
    let mut verdict = Verdict::Proceed;
    for kind in DeferredKind::ALL {
        verdict |= run_deferred_kind(context, cb, kind);
    }
    verdict
}

/// Runs one list of deferred checks of the command buffer.
///
/// Executed secondaries leave a link in each list of the primary,
/// so their checks interleave with the primary's in recording order.
pub(crate) fn run_deferred_kind(context: &mut SubmitContext<'_>, cb: Handle, kind: DeferredKind) -> Verdict {
    let checks = match context.objects.command_buffers.state_mut(cb) {
        Some(state) => std::mem::take(state.deferred_mut(kind)),
        None => return Verdict::Proceed,
    };

    let mut verdict = Verdict::Proceed;
    for check in &checks {
        verdict |= check(context);
    }

    if let Some(state) = context.objects.command_buffers.state_mut(cb) {
        *state.deferred_mut(kind) = checks;
    }
    verdict
}

impl DeviceState {
    pub fn new(
        config: ValidationConfig,
        reporter: Reporter,
        canonicalizer: Arc<Canonicalizer>,
    ) -> Self {
        DeviceState {
            objects: Objects::new(),
            config,
            reporter,
            canonicalizer,
            queues: HashMap::new(),
            queries: HashMap::new(),
            staged: HashMap::new(),
        }
    }

    pub fn objects(&self) -> &Objects {
        &self.objects
    }

    pub fn config(&self) -> &ValidationConfig {
        &self.config
    }

    pub fn reporter(&self) -> &Reporter {
        &self.reporter
    }

    pub fn queue(&self, queue: Handle) -> Option<&QueueState> {
        self.queues.get(&queue)
    }

    /// Device-visible state of the query, as of the last accepted submission.
    pub fn query_state(&self, query: QueryObject) -> QueryState {
        self.queries.get(&query).copied().unwrap_or_default()
    }

    pub(crate) fn report(&self, code: ErrorCode, object: ObjectId, message: String) -> Verdict {
        self.reporter.report(code, Some(object), message)
    }

    pub(crate) fn unknown(&self, id: ObjectId) -> Verdict {
        self.report(ErrorCode::UnknownObject, id, format!("{} is not tracked", id))
    }

    pub(crate) fn require(&self, id: ObjectId) -> Verdict {
        if self.objects.contains(id) {
            Verdict::Proceed
        } else {
            self.unknown(id)
        }
    }

    fn check_idle(&self, id: ObjectId) -> Verdict {
        if self.objects.is_in_use(id) {
            self.report(
                ErrorCode::ObjectInUse,
                id,
                format!("{} is used by a submission that has not completed", id),
            )
        } else {
            Verdict::Proceed
        }
    }

    // Creation.

    pub fn get_queue(&mut self, info: QueueInfo) -> Result<(), OutOfMemory> {
        self.queues.try_reserve(1).map_err(|_| OutOfMemory)?;
        self.queues
            .entry(info.handle)
            .or_insert_with(|| QueueState::new(info));
        Ok(())
    }

    pub fn create_buffer(&mut self, handle: Handle, info: BufferInfo) -> Result<(), OutOfMemory> {
        register(
            &self.reporter,
            &mut self.objects.buffers,
            ObjectId::buffer(handle),
            BufferState::new(info),
        )
    }

    pub fn create_image(&mut self, handle: Handle, info: ImageInfo) -> Result<(), OutOfMemory> {
        register(
            &self.reporter,
            &mut self.objects.images,
            ObjectId::image(handle),
            ImageState::new(info),
        )
    }

    pub fn validate_create_buffer_view(&self, info: &BufferViewInfo) -> Verdict {
        self.require(ObjectId::buffer(info.buffer))
    }

    pub fn create_buffer_view(
        &mut self,
        handle: Handle,
        info: BufferViewInfo,
    ) -> Result<(), OutOfMemory> {
        register(
            &self.reporter,
            &mut self.objects.buffer_views,
            ObjectId::new(ObjectType::BufferView, handle),
            BufferViewState { info },
        )
    }

    pub fn validate_create_image_view(&self, info: &ImageViewInfo) -> Verdict {
        self.require(ObjectId::image(info.image))
    }

    pub fn create_image_view(
        &mut self,
        handle: Handle,
        info: ImageViewInfo,
    ) -> Result<(), OutOfMemory> {
        register(
            &self.reporter,
            &mut self.objects.image_views,
            ObjectId::new(ObjectType::ImageView, handle),
            ImageViewState { info },
        )
    }

    pub fn create_sampler(&mut self, handle: Handle) -> Result<(), OutOfMemory> {
        register(
            &self.reporter,
            &mut self.objects.samplers,
            ObjectId::new(ObjectType::Sampler, handle),
            SamplerState,
        )
    }

    pub fn allocate_memory(
        &mut self,
        handle: Handle,
        size: u64,
        dedicated: Option<ObjectId>,
    ) -> Result<(), OutOfMemory> {
        register(
            &self.reporter,
            &mut self.objects.memory,
            ObjectId::memory(handle),
            MemoryAllocation::new(size, dedicated),
        )
    }

    pub fn create_descriptor_set_layout(
        &mut self,
        handle: Handle,
        info: &DescriptorSetLayoutInfo,
    ) -> Result<(), OutOfMemory> {
        let id = self.canonicalizer.set_layout(info);
        register(
            &self.reporter,
            &mut self.objects.set_layouts,
            ObjectId::new(ObjectType::DescriptorSetLayout, handle),
            DescriptorSetLayoutState {
                info: info.canonical(),
                id,
            },
        )
    }

    pub fn validate_create_pipeline_layout(&self, info: &PipelineLayoutInfo) -> Verdict {
        let mut verdict = Verdict::Proceed;
        for &set in &info.sets {
            verdict |= self.require(ObjectId::new(ObjectType::DescriptorSetLayout, set));
        }
        verdict
    }

    pub fn create_pipeline_layout(
        &mut self,
        handle: Handle,
        info: &PipelineLayoutInfo,
    ) -> Result<(), OutOfMemory> {
        let id = ObjectId::new(ObjectType::PipelineLayout, handle);
        let mut set_layouts = Vec::with_capacity(info.sets.len());
        for &set in &info.sets {
            match self.objects.set_layouts.state(set) {
                Some(layout) => set_layouts.push(layout.id.clone()),
                None => {
                    let _ = self.report(
                        ErrorCode::InternalInconsistency,
                        id,
                        format!("Set layout {} vanished before the pipeline layout was recorded", set),
                    );
                    return Ok(());
                }
            }
        }

        let state = PipelineLayoutState::new(&self.canonicalizer, set_layouts, &info.push_constants);
        register(&self.reporter, &mut self.objects.pipeline_layouts, id, state)
    }

    pub fn validate_create_pipeline(&self, info: &PipelineInfo) -> Verdict {
        let mut verdict = self.require(ObjectId::new(ObjectType::PipelineLayout, info.layout));

        if let Some((render_pass, subpass)) = info.render_pass {
            let id = ObjectId::new(ObjectType::RenderPass, render_pass);
            match self.objects.render_passes.state(render_pass) {
                None => verdict |= self.unknown(id),
                Some(state) if subpass as usize >= state.info.subpasses.len() => {
                    verdict |= self.report(
                        ErrorCode::PipelineRenderPassMismatch,
                        id,
                        format!(
                            "Pipeline is created for subpass {} of render pass with {} subpasses",
                            subpass,
                            state.info.subpasses.len()
                        ),
                    );
                }
                Some(_) => {}
            }
        }
        verdict
    }

    pub fn create_pipeline(&mut self, handle: Handle, info: PipelineInfo) -> Result<(), OutOfMemory> {
        let id = ObjectId::new(ObjectType::Pipeline, handle);
        let (compat, push_constants) = match self.objects.pipeline_layouts.state(info.layout) {
            Some(layout) => (layout.compat.clone(), layout.push_constants.clone()),
            None => {
                let _ = self.report(
                    ErrorCode::InternalInconsistency,
                    id,
                    format!("Pipeline layout {} is not tracked", info.layout),
                );
                return Ok(());
            }
        };

        let render_pass = info
            .render_pass
            .and_then(|(render_pass, _)| self.objects.render_passes.state(render_pass))
            .map(|state| state.info.clone());

        let state = PipelineState {
            info,
            compat,
            push_constants,
            render_pass,
        };
        register(&self.reporter, &mut self.objects.pipelines, id, state)
    }

    /// Reports problems of the dependency graph.
    pub fn validate_create_render_pass(&self, info: &RenderPassInfo) -> Verdict {
        if self.config.disabled.render_pass {
            return Verdict::Proceed;
        }

        let (_, issues) = RenderPassGraph::build(info);
        let mut verdict = Verdict::Proceed;
        for issue in issues {
            verdict |= match issue {
                GraphIssue::DependencyOrder { src, dst } => self.reporter.report(
                    ErrorCode::SubpassDependencyOrder,
                    None,
                    format!("Dependency from subpass {} to earlier subpass {}", src, dst),
                ),
                GraphIssue::MissingDependency {
                    attachment,
                    writer,
                    user,
                } => self.reporter.report(
                    ErrorCode::MissingSubpassDependency,
                    None,
                    format!(
                        "Attachment {} written by subpass {} is used by subpass {} without a dependency",
                        attachment, writer, user
                    ),
                ),
            };
        }
        verdict
    }

    pub fn create_render_pass(
        &mut self,
        handle: Handle,
        info: RenderPassInfo,
    ) -> Result<(), OutOfMemory> {
        let (graph, _) = RenderPassGraph::build(&info);
        register(
            &self.reporter,
            &mut self.objects.render_passes,
            ObjectId::new(ObjectType::RenderPass, handle),
            RenderPassState { info, graph },
        )
    }

    pub fn validate_create_framebuffer(&self, info: &FramebufferInfo) -> Verdict {
        let id = ObjectId::new(ObjectType::RenderPass, info.render_pass);
        let render_pass = match self.objects.render_passes.state(info.render_pass) {
            Some(render_pass) => render_pass,
            None => return self.unknown(id),
        };

        let mut verdict = Verdict::Proceed;
        if !self.config.disabled.render_pass
            && info.attachments.len() != render_pass.info.attachments.len()
        {
            verdict |= self.report(
                ErrorCode::FramebufferIncompatible,
                id,
                format!(
                    "Framebuffer has {} attachments, render pass expects {}",
                    info.attachments.len(),
                    render_pass.info.attachments.len()
                ),
            );
        }
        for &view in &info.attachments {
            verdict |= self.require(ObjectId::new(ObjectType::ImageView, view));
        }
        verdict
    }

    pub fn create_framebuffer(
        &mut self,
        handle: Handle,
        info: FramebufferInfo,
    ) -> Result<(), OutOfMemory> {
        let id = ObjectId::new(ObjectType::Framebuffer, handle);
        let render_pass = match self.objects.render_passes.state(info.render_pass) {
            Some(render_pass) => render_pass.info.clone(),
            None => {
                let _ = self.report(
                    ErrorCode::InternalInconsistency,
                    id,
                    format!("Render pass {} is not tracked", info.render_pass),
                );
                return Ok(());
            }
        };
        register(
            &self.reporter,
            &mut self.objects.framebuffers,
            id,
            FramebufferState { info, render_pass },
        )
    }

    /// Records swapchain and its presentable images.
    pub fn create_swapchain(
        &mut self,
        handle: Handle,
        images: &[Handle],
        info: ImageInfo,
    ) -> Result<(), OutOfMemory> {
        for &image in images {
            let mut state = ImageState::new(info);
            state.swapchain = Some(handle);
            register(&self.reporter, &mut self.objects.images, ObjectId::image(image), state)?;
        }
        register(
            &self.reporter,
            &mut self.objects.swapchains,
            ObjectId::new(ObjectType::Swapchain, handle),
            SwapchainState {
                images: images.to_vec(),
            },
        )
    }

    pub fn create_query_pool(&mut self, handle: Handle, info: QueryPoolInfo) -> Result<(), OutOfMemory> {
        register(
            &self.reporter,
            &mut self.objects.query_pools,
            ObjectId::new(ObjectType::QueryPool, handle),
            QueryPoolState { info },
        )
    }

    pub fn create_event(&mut self, handle: Handle) -> Result<(), OutOfMemory> {
        register(
            &self.reporter,
            &mut self.objects.events,
            ObjectId::new(ObjectType::Event, handle),
            EventState::default(),
        )
    }

    pub fn create_fence(&mut self, handle: Handle) -> Result<(), OutOfMemory> {
        register(
            &self.reporter,
            &mut self.objects.fences,
            ObjectId::new(ObjectType::Fence, handle),
            FenceState::default(),
        )
    }

    pub fn create_command_pool(
        &mut self,
        handle: Handle,
        info: CommandPoolInfo,
    ) -> Result<(), OutOfMemory> {
        register(
            &self.reporter,
            &mut self.objects.command_pools,
            ObjectId::new(ObjectType::CommandPool, handle),
            CommandPoolState {
                info,
                command_buffers: Vec::new(),
            },
        )
    }

    pub fn create_descriptor_pool(
        &mut self,
        handle: Handle,
        info: DescriptorPoolInfo,
    ) -> Result<(), OutOfMemory> {
        register(
            &self.reporter,
            &mut self.objects.descriptor_pools,
            ObjectId::new(ObjectType::DescriptorPool, handle),
            DescriptorPoolState {
                info,
                sets: Vec::new(),
            },
        )
    }

    pub fn validate_allocate_command_buffers(&self, pool: Handle) -> Verdict {
        self.require(ObjectId::new(ObjectType::CommandPool, pool))
    }

    pub fn allocate_command_buffers(
        &mut self,
        pool: Handle,
        level: CommandBufferLevel,
        command_buffers: &[Handle],
    ) -> Result<(), OutOfMemory> {
        match self.objects.command_pools.state_mut(pool) {
            Some(state) => {
                state
                    .command_buffers
                    .try_reserve(command_buffers.len())
                    .map_err(|_| OutOfMemory)?;
                state.command_buffers.extend_from_slice(command_buffers);
            }
            None => return Ok(()),
        }

        for &cb in command_buffers {
            register(
                &self.reporter,
                &mut self.objects.command_buffers,
                ObjectId::command_buffer(cb),
                CommandBufferState::new(pool, level),
            )?;
        }
        Ok(())
    }

    pub fn validate_allocate_descriptor_sets(&self, pool: Handle, layouts: &[Handle]) -> Verdict {
        let pool_id = ObjectId::new(ObjectType::DescriptorPool, pool);
        let state = match self.objects.descriptor_pools.state(pool) {
            Some(state) => state,
            None => return self.unknown(pool_id),
        };

        let mut verdict = Verdict::Proceed;
        for &layout in layouts {
            verdict |= self.require(ObjectId::new(ObjectType::DescriptorSetLayout, layout));
        }

        if !self.config.disabled.allocate_descriptor_sets
            && state.available() < layouts.len() as u32
        {
            verdict |= self.report(
                ErrorCode::DescriptorPoolExhausted,
                pool_id,
                format!(
                    "{} sets requested, {} available",
                    layouts.len(),
                    state.available()
                ),
            );
        }
        verdict
    }

    /// Records sets, given as set and layout handle pairs.
    pub fn allocate_descriptor_sets(
        &mut self,
        pool: Handle,
        sets: &[(Handle, Handle)],
    ) -> Result<(), OutOfMemory> {
        match self.objects.descriptor_pools.state_mut(pool) {
            Some(state) => {
                state.sets.try_reserve(sets.len()).map_err(|_| OutOfMemory)?;
                state.sets.extend(sets.iter().map(|&(set, _)| set));
            }
            None => return Ok(()),
        }

        for &(set, layout) in sets {
            let layout_id = match self.objects.set_layouts.state(layout) {
                Some(state) => state.id.clone(),
                None => continue,
            };
            register(
                &self.reporter,
                &mut self.objects.descriptor_sets,
                ObjectId::new(ObjectType::DescriptorSet, set),
                DescriptorSetState::new(pool, layout, layout_id),
            )?;
        }
        Ok(())
    }

    // Destruction.

    pub fn validate_destroy(&self, id: ObjectId) -> Verdict {
        if id.handle.is_null() {
            return Verdict::Proceed;
        }
        if !self.objects.contains(id) {
            return self.unknown(id);
        }

        let mut verdict = Verdict::Proceed;
        if self.config.disabled.destroy_check(id.ty) {
            verdict |= self.check_idle(id);
            match id.ty {
                ObjectType::CommandPool => {
                    if let Some(pool) = self.objects.command_pools.state(id.handle) {
                        for &cb in &pool.command_buffers {
                            verdict |= self.check_idle(ObjectId::command_buffer(cb));
                        }
                    }
                }
                ObjectType::DescriptorPool => {
                    if let Some(pool) = self.objects.descriptor_pools.state(id.handle) {
                        for &set in &pool.sets {
                            verdict |= self.check_idle(ObjectId::new(ObjectType::DescriptorSet, set));
                        }
                    }
                }
                _ => {}
            }
        }

        if id.ty == ObjectType::DeviceMemory && !self.config.disabled.free_memory {
            if let Some(allocation) = self.objects.memory.state(id.handle) {
                if allocation.has_bindings() {
                    let bound: Vec<String> = allocation.bound().map(|r| r.to_string()).collect();
                    verdict |= self.report(
                        ErrorCode::FreedMemoryReferenced,
                        id,
                        format!("Memory is freed while bound to {}", bound.join(", ")),
                    );
                }
            }
        }
        verdict
    }

    /// Removes the object and everything it owns,
    /// invalidating command buffers that reference any of them.
    pub fn destroy(&mut self, id: ObjectId) {
        match id.ty {
            ObjectType::CommandBuffer => {
                let pool = self
                    .objects
                    .command_buffers
                    .state(id.handle)
                    .map(|state| state.pool);
                if let Some(pool) = pool.and_then(|pool| self.objects.command_pools.state_mut(pool)) {
                    pool.command_buffers.retain(|&cb| cb != id.handle);
                }
                self.free_command_buffer(id.handle);
                return;
            }
            ObjectType::CommandPool => {
                let cbs = self
                    .objects
                    .command_pools
                    .state_mut(id.handle)
                    .map(|pool| std::mem::take(&mut pool.command_buffers))
                    .unwrap_or_default();
                for cb in cbs {
                    self.free_command_buffer(cb);
                }
            }
            ObjectType::DescriptorPool => {
                let sets = self
                    .objects
                    .descriptor_pools
                    .state_mut(id.handle)
                    .map(|pool| std::mem::take(&mut pool.sets))
                    .unwrap_or_default();
                for set in sets {
                    self.remove_object(ObjectId::new(ObjectType::DescriptorSet, set));
                }
            }
            ObjectType::DescriptorSet => {
                let pool = self
                    .objects
                    .descriptor_sets
                    .state(id.handle)
                    .map(|state| state.pool);
                if let Some(pool) = pool.and_then(|pool| self.objects.descriptor_pools.state_mut(pool)) {
                    pool.sets.retain(|&set| set != id.handle);
                }
            }
            ObjectType::Buffer | ObjectType::Image => {
                if self.objects.bindable(id).map_or(false, |b| b.is_bound()) {
                    if let Err(err) = self.objects.unbind(id) {
                        debug!("Unbinding of destroyed {} failed: {}", id, err);
                    }
                }
            }
            ObjectType::DeviceMemory => {
                let bound: Vec<ObjectId> = self
                    .objects
                    .memory
                    .state(id.handle)
                    .map(|allocation| allocation.bound().collect())
                    .unwrap_or_default();
                for resource in bound {
                    if let Err(err) = self.objects.unbind(resource) {
                        debug!("Unbinding of {} from freed memory failed: {}", resource, err);
                    }
                }
            }
            ObjectType::Swapchain => {
                let images = self
                    .objects
                    .swapchains
                    .state(id.handle)
                    .map(|swapchain| swapchain.images.clone())
                    .unwrap_or_default();
                for image in images {
                    self.remove_object(ObjectId::image(image));
                }
            }
            ObjectType::QueryPool => {
                self.queries.retain(|query, _| query.pool != id.handle);
            }
            _ => {}
        }
        self.remove_object(id);
    }

    fn remove_object(&mut self, id: ObjectId) {
        let cbs = self.objects.unbind_object(id);
        self.objects.invalidate(cbs, id);
        if self.objects.remove_base(id).is_some() {
            trace!("Destroyed {}", id);
        }
    }

    fn free_command_buffer(&mut self, cb: Handle) {
        self.objects.unbind_command_buffer(cb);
        self.remove_object(ObjectId::command_buffer(cb));
    }

    pub fn validate_free_command_buffers(&self, pool: Handle, command_buffers: &[Handle]) -> Verdict {
        let mut verdict = self.require(ObjectId::new(ObjectType::CommandPool, pool));
        if !self.config.disabled.destroy_check(ObjectType::CommandBuffer) {
            return verdict;
        }
        for &cb in command_buffers {
            verdict |= self.check_idle(ObjectId::command_buffer(cb));
        }
        verdict
    }

    pub fn free_command_buffers(&mut self, pool: Handle, command_buffers: &[Handle]) {
        if let Some(state) = self.objects.command_pools.state_mut(pool) {
            state.command_buffers.retain(|cb| !command_buffers.contains(cb));
        }
        for &cb in command_buffers {
            self.free_command_buffer(cb);
        }
    }

    fn check_set_idle(&self, set: Handle) -> Verdict {
        let id = ObjectId::new(ObjectType::DescriptorSet, set);
        if self.config.disabled.idle_descriptor_set || !self.objects.is_in_use(id) {
            return Verdict::Proceed;
        }
        self.report(
            ErrorCode::DescriptorSetInUse,
            id,
            format!("{} is used by a submission that has not completed", id),
        )
    }

    pub fn validate_free_descriptor_sets(&self, pool: Handle, sets: &[Handle]) -> Verdict {
        let mut verdict = self.require(ObjectId::new(ObjectType::DescriptorPool, pool));
        for &set in sets {
            verdict |= self.check_set_idle(set);
        }
        verdict
    }

    pub fn free_descriptor_sets(&mut self, sets: &[Handle]) {
        for &set in sets {
            self.destroy(ObjectId::new(ObjectType::DescriptorSet, set));
        }
    }

    pub fn validate_reset_descriptor_pool(&self, pool: Handle) -> Verdict {
        let id = ObjectId::new(ObjectType::DescriptorPool, pool);
        match self.objects.descriptor_pools.state(pool) {
            Some(state) => state
                .sets
                .iter()
                .fold(Verdict::Proceed, |verdict, &set| verdict | self.check_set_idle(set)),
            None => self.unknown(id),
        }
    }

    pub fn reset_descriptor_pool(&mut self, pool: Handle) {
        let sets = self
            .objects
            .descriptor_pools
            .state_mut(pool)
            .map(|state| std::mem::take(&mut state.sets))
            .unwrap_or_default();
        for set in sets {
            self.remove_object(ObjectId::new(ObjectType::DescriptorSet, set));
        }
    }

    // Memory.

    fn check_bind(&self, resource: ObjectId, memory: Handle, offset: u64, size: u64) -> Verdict {
        match self.objects.check_bind_range(resource, memory, offset, size) {
            Ok(()) => Verdict::Proceed,
            Err(BindError::UnknownResource(id)) => self.unknown(id),
            Err(BindError::UnknownMemory(memory)) => self.unknown(ObjectId::memory(memory)),
            Err(err @ BindError::AlreadyBound(_)) => {
                self.report(ErrorCode::MemoryRebind, resource, err.to_string())
            }
            Err(err @ BindError::OutOfBounds { .. }) => {
                self.report(ErrorCode::MemoryOutOfBounds, resource, err.to_string())
            }
            Err(err) => self.report(ErrorCode::InternalInconsistency, resource, err.to_string()),
        }
    }

    /// Validates binding the whole resource to memory at `offset`.
    pub fn validate_bind_memory(&self, resource: ObjectId, memory: Handle, offset: u64) -> Verdict {
        let size = match self.objects.bindable(resource) {
            Some(bindable) => bindable.size,
            None => return self.unknown(resource),
        };
        if self.config.disabled.memory_binding {
            return Verdict::Proceed;
        }
        self.check_bind(resource, memory, offset, size)
    }

    pub fn bind_memory(&mut self, resource: ObjectId, memory: Handle, offset: u64) -> Result<(), OutOfMemory> {
        match self.objects.bindable(resource) {
            Some(bindable) => {
                let size = bindable.size;
                self.bind_range(resource, memory, offset, size)
            }
            None => Ok(()),
        }
    }

    pub fn validate_bind_sparse(
        &self,
        resource: ObjectId,
        memory: Handle,
        offset: u64,
        size: u64,
    ) -> Verdict {
        let sparse = match self.objects.bindable(resource) {
            Some(bindable) => bindable.sparse,
            None => return self.unknown(resource),
        };

        let mut verdict = Verdict::Proceed;
        if !self.config.features.sparse_binding {
            verdict |= self.report(
                ErrorCode::SparseBindingDisabled,
                resource,
                "Sparse binding feature is not enabled".to_owned(),
            );
        } else if !sparse {
            verdict |= self.report(
                ErrorCode::SparseBindingDisabled,
                resource,
                format!("{} was not created for sparse binding", resource),
            );
        }

        if !self.config.disabled.memory_binding {
            verdict |= self.check_bind(resource, memory, offset, size);
        }
        verdict
    }

    pub fn bind_sparse(
        &mut self,
        resource: ObjectId,
        memory: Handle,
        offset: u64,
        size: u64,
    ) -> Result<(), OutOfMemory> {
        self.bind_range(resource, memory, offset, size)
    }

    fn bind_range(&mut self, resource: ObjectId, memory: Handle, offset: u64, size: u64) -> Result<(), OutOfMemory> {
        let granularity = self.config.limits.buffer_image_granularity;
        match self
            .objects
            .bind_range(resource, memory, offset, size, granularity)
        {
            Ok(overlaps) => {
                self.report_aliasing(resource, memory, offset, &overlaps);
                Ok(())
            }
            Err(BindError::OutOfMemory { source }) => Err(source),
            Err(err) => {
                debug!("Binding of {} is not tracked: {}", resource, err);
                Ok(())
            }
        }
    }

    fn report_aliasing(&self, resource: ObjectId, memory: Handle, offset: u64, overlaps: &[RangeKey]) {
        if self.config.disabled.memory_aliasing || overlaps.is_empty() {
            return;
        }

        let allocation = match self.objects.memory.state(memory) {
            Some(allocation) => allocation,
            None => return,
        };
        let range = match allocation.range(&RangeKey {
            resource,
            start: offset,
        }) {
            Some(range) => range,
            None => return,
        };

        for key in overlaps {
            let other = match allocation.range(key) {
                Some(other) => other,
                None => continue,
            };
            if range.aliasable || other.aliasable {
                continue;
            }
            let _ = self.report(
                ErrorCode::MemoryAliasing,
                resource,
                format!(
                    "{} at [{}, {}) of memory {} overlaps {} at [{}, {})",
                    resource, range.start, range.end, memory, other.resource, other.start, other.end
                ),
            );
        }
    }

    pub fn validate_map_memory(&self, memory: Handle) -> Verdict {
        let id = ObjectId::memory(memory);
        match self.objects.memory.state(memory) {
            None => self.unknown(id),
            Some(allocation) if allocation.mapped.is_some() && !self.config.disabled.memory_binding => {
                self.report(
                    ErrorCode::MemoryAlreadyMapped,
                    id,
                    "Memory is mapped already".to_owned(),
                )
            }
            Some(_) => Verdict::Proceed,
        }
    }

    /// Mapped memory is assumed to be written by the host.
    pub fn map_memory(&mut self, memory: Handle, offset: u64, size: u64) {
        if let Some(allocation) = self.objects.memory.state_mut(memory) {
            let size = allocation.resolve_size(offset, size);
            allocation.mapped = Some((offset, size));
            allocation.global_valid = true;
        }
    }

    pub fn validate_unmap_memory(&self, memory: Handle) -> Verdict {
        let id = ObjectId::memory(memory);
        match self.objects.memory.state(memory) {
            None => self.unknown(id),
            Some(allocation) if allocation.mapped.is_none() && !self.config.disabled.memory_binding => {
                self.report(ErrorCode::MemoryNotMapped, id, "Memory is not mapped".to_owned())
            }
            Some(_) => Verdict::Proceed,
        }
    }

    pub fn unmap_memory(&mut self, memory: Handle) {
        if let Some(allocation) = self.objects.memory.state_mut(memory) {
            allocation.mapped = None;
        }
    }

    // Descriptors.

    fn validate_descriptor_write(&self, write: &DescriptorWrite<'_>) -> Verdict {
        let id = ObjectId::new(ObjectType::DescriptorSet, write.set);
        let set = match self.objects.descriptor_sets.state(write.set) {
            Some(set) => set,
            None => return self.unknown(id),
        };

        let mut verdict = Verdict::Proceed;
        let binding = match set.binding(write.binding) {
            Some(binding) => binding,
            None => {
                return self.report(
                    ErrorCode::DescriptorWriteMismatch,
                    id,
                    format!("Layout of the set has no binding {}", write.binding),
                )
            }
        };

        if binding.ty != write.ty {
            verdict |= self.report(
                ErrorCode::DescriptorWriteMismatch,
                id,
                format!(
                    "Binding {} has type {:?}, written as {:?}",
                    write.binding, binding.ty, write.ty
                ),
            );
        }
        if let Some(descriptor) = write.descriptors.iter().find(|d| !d.matches(binding.ty)) {
            verdict |= self.report(
                ErrorCode::DescriptorWriteMismatch,
                id,
                format!("{:?} cannot be written into binding of type {:?}", descriptor, binding.ty),
            );
        }

        let end = write.element as u64 + write.descriptors.len() as u64;
        let variable = binding
            .flags
            .contains(DescriptorBindingFlags::VARIABLE_DESCRIPTOR_COUNT);
        if !variable && end > binding.count as u64 {
            verdict |= self.report(
                ErrorCode::DescriptorWriteMismatch,
                id,
                format!(
                    "Elements [{}, {}) are outside of binding {} with {} descriptors",
                    write.element, end, write.binding, binding.count
                ),
            );
        }

        let update_after_bind = binding
            .flags
            .intersects(DescriptorBindingFlags::UPDATE_AFTER_BIND | DescriptorBindingFlags::UPDATE_UNUSED_WHILE_PENDING);
        if !update_after_bind {
            verdict |= self.check_set_idle(write.set);
        }

        for descriptor in write.descriptors {
            for object in descriptor.objects() {
                verdict |= self.require(object);
            }
        }
        verdict
    }

    /// Validates and records descriptor writes.
    ///
    /// Command buffers that use an updated set are invalidated
    /// unless the written binding allows updates after bind.
    pub fn update_descriptor_sets(&mut self, writes: &[DescriptorWrite<'_>]) -> Verdict {
        let mut verdict = Verdict::Proceed;
        if !self.config.disabled.update_descriptor_sets {
            for write in writes {
                verdict |= self.validate_descriptor_write(write);
            }
        }
        if verdict.is_skip() {
            return verdict;
        }

        for write in writes {
            let id = ObjectId::new(ObjectType::DescriptorSet, write.set);
            let update_after_bind = match self.objects.descriptor_sets.state(write.set) {
                Some(set) => set.binding(write.binding).map_or(false, |binding| {
                    binding
                        .flags
                        .contains(DescriptorBindingFlags::UPDATE_AFTER_BIND)
                }),
                None => continue,
            };

            if !update_after_bind {
                let cbs = self.objects.unbind_object(id);
                self.objects.invalidate(cbs, id);
            }

            if let Some(set) = self.objects.descriptor_sets.state_mut(write.set) {
                for (index, descriptor) in write.descriptors.iter().enumerate() {
                    set.descriptors
                        .insert((write.binding, write.element + index as u32), *descriptor);
                }
            }
        }
        verdict
    }

    // Command buffer lifecycle.

    /// Drops everything recorded into the command buffer.
    /// Primaries that execute it are invalidated.
    fn reset_recording(&mut self, cb: Handle) {
        let id = ObjectId::command_buffer(cb);
        let primaries = self.objects.unbind_object(id);
        self.objects.invalidate(primaries, id);
        self.objects.unbind_command_buffer(cb);
        if let Some(state) = self.objects.command_buffers.state_mut(cb) {
            state.reset();
        }
    }

    fn check_resettable(&self, cb: Handle) -> Verdict {
        let id = ObjectId::command_buffer(cb);
        let node = match self.objects.command_buffers.get(cb) {
            Some(node) => node,
            None => return self.unknown(id),
        };
        if self.config.disabled.command_buffer_state {
            return Verdict::Proceed;
        }

        let mut verdict = Verdict::Proceed;
        if node.base.is_in_use() {
            verdict |= self.report(
                ErrorCode::CommandBufferInFlight,
                id,
                "Command buffer is reset while its submission has not completed".to_owned(),
            );
        }
        if node.state.state != CbState::New {
            let allowed = self
                .objects
                .command_pools
                .state(node.state.pool)
                .map_or(false, |pool| pool.info.reset_command_buffer);
            if !allowed {
                verdict |= self.report(
                    ErrorCode::CommandBufferResetNotAllowed,
                    id,
                    format!(
                        "Pool {} does not allow resetting individual command buffers",
                        node.state.pool
                    ),
                );
            }
        }
        verdict
    }

    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self)))]
    pub fn begin_command_buffer(&mut self, cb: Handle, info: BeginInfo) -> Result<Verdict, OutOfMemory> {
        let verdict = self.check_resettable(cb);
        if verdict.is_skip() || !self.objects.command_buffers.contains(cb) {
            return Ok(verdict);
        }

        self.reset_recording(cb);
        let mut bindings = Vec::new();
        if let Some(state) = self.objects.command_buffers.state_mut(cb) {
            state.state = CbState::Recording;
            state.usage = info.usage;
            state.inheritance = info.inheritance;

            if state.level == CommandBufferLevel::Secondary
                && info.usage.contains(CommandBufferUsage::RENDER_PASS_CONTINUE)
            {
                if let Some(inheritance) = info.inheritance {
                    state.active_render_pass = Some(ActiveRenderPass {
                        render_pass: inheritance.render_pass,
                        framebuffer: inheritance.framebuffer,
                        subpass: inheritance.subpass as usize,
                        drawn: false,
                        barrier_after_draw: false,
                        inherited: true,
                    });
                    bindings.push(ObjectId::new(ObjectType::RenderPass, inheritance.render_pass));
                    bindings.extend(
                        inheritance
                            .framebuffer
                            .map(|framebuffer| ObjectId::new(ObjectType::Framebuffer, framebuffer)),
                    );
                }
            }
        }
        for object in bindings {
            self.objects.bind(object, cb)?;
        }

        debug!("Command buffer {} begins recording", cb);
        Ok(verdict)
    }

    /// Checks that the command buffer may record commands.
    pub(crate) fn check_recording(&self, cb: Handle) -> Verdict {
        let id = ObjectId::command_buffer(cb);
        let state = match self.objects.command_buffers.state(cb) {
            Some(state) => state,
            None => return self.unknown(id),
        };
        if self.config.disabled.command_buffer_state {
            return Verdict::Proceed;
        }

        match state.state {
            CbState::Recording => Verdict::Proceed,
            CbState::InvalidComplete | CbState::InvalidIncomplete => self.report(
                ErrorCode::CommandBufferInvalid,
                id,
                format!("Command buffer is invalid due to {}", broken_list(&state.broken_bindings)),
            ),
            CbState::New | CbState::Recorded => self.report(
                ErrorCode::CommandBufferNotRecording,
                id,
                format!("Command buffer is in {:?} state", state.state),
            ),
        }
    }

    /// Finishes recording. A command buffer with an open render pass stays recording.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self)))]
    pub fn end_command_buffer(&mut self, cb: Handle) -> Result<Verdict, OutOfMemory> {
        let id = ObjectId::command_buffer(cb);
        let mut verdict = self.check_recording(cb);
        if verdict.is_skip() {
            return Ok(verdict);
        }
        let state = match self.objects.command_buffers.state(cb) {
            Some(state) => state,
            None => return Ok(verdict),
        };

        if !self.config.disabled.command_buffer_state {
            if let Some(active) = state.active_render_pass.as_ref().filter(|active| !active.inherited) {
                verdict |= self.report(
                    ErrorCode::RenderPassStillOpen,
                    id,
                    format!(
                        "Render pass {} was begun but not ended before the end of recording",
                        active.render_pass
                    ),
                );
                return Ok(verdict);
            }
        }
        if !self.config.disabled.query_state && !state.active_queries.is_empty() {
            let mut queries: Vec<_> = state.active_queries.iter().copied().collect();
            queries.sort();
            verdict |= self.report(
                ErrorCode::QueryStillActive,
                id,
                format!("Queries {:?} are still active at the end of recording", queries),
            );
        }

        if let Some(state) = self.objects.command_buffers.state_mut(cb) {
            state.commands.try_reserve(1).map_err(|_| OutOfMemory)?;
            let seq = state.next_seq();
            state.push_command(Command::new(CmdType::EndCommandBuffer, seq));
            state.state = CbState::Recorded;
        }
        debug!("Command buffer {} is recorded", cb);
        Ok(verdict)
    }

    pub fn reset_command_buffer(&mut self, cb: Handle) -> Verdict {
        let verdict = self.check_resettable(cb);
        if !verdict.is_skip() {
            self.reset_recording(cb);
            debug!("Command buffer {} reset", cb);
        }
        verdict
    }

    pub fn reset_command_pool(&mut self, pool: Handle) -> Verdict {
        let id = ObjectId::new(ObjectType::CommandPool, pool);
        let cbs = match self.objects.command_pools.state(pool) {
            Some(state) => state.command_buffers.clone(),
            None => return self.unknown(id),
        };

        let mut verdict = Verdict::Proceed;
        if !self.config.disabled.command_buffer_state {
            for &cb in &cbs {
                if self.objects.is_in_use(ObjectId::command_buffer(cb)) {
                    verdict |= self.report(
                        ErrorCode::CommandBufferInFlight,
                        ObjectId::command_buffer(cb),
                        format!("Pool {} is reset while the command buffer is pending", pool),
                    );
                }
            }
        }
        if verdict.is_skip() {
            return verdict;
        }
        for cb in cbs {
            self.reset_recording(cb);
        }
        verdict
    }

    // Submission.

    pub(crate) fn check_executable(&self, cb: Handle) -> Verdict {
        let id = ObjectId::command_buffer(cb);
        let state = match self.objects.command_buffers.state(cb) {
            Some(state) => state,
            None => return self.unknown(id),
        };

        match state.state {
            CbState::Recorded
                if state
                    .last_command()
                    .map_or(false, |command| command.ty == CmdType::EndCommandBuffer) =>
            {
                Verdict::Proceed
            }
            CbState::InvalidComplete | CbState::InvalidIncomplete => self.report(
                ErrorCode::CommandBufferInvalid,
                id,
                format!("Command buffer is invalid due to {}", broken_list(&state.broken_bindings)),
            ),
            _ => self.report(
                ErrorCode::CommandBufferUnrecorded,
                id,
                format!("Command buffer in {:?} state cannot be executed", state.state),
            ),
        }
    }

    fn check_not_pending(&self, cb: Handle, pending: &HashSet<Handle>) -> Verdict {
        let id = ObjectId::command_buffer(cb);
        let node = match self.objects.command_buffers.get(cb) {
            Some(node) => node,
            None => return Verdict::Proceed,
        };

        let simultaneous = node.state.usage.contains(CommandBufferUsage::SIMULTANEOUS_USE);
        if !simultaneous && (node.base.is_in_use() || pending.contains(&cb)) {
            self.report(
                ErrorCode::CommandBufferInFlight,
                id,
                "Command buffer is pending execution and lacks simultaneous use".to_owned(),
            )
        } else {
            Verdict::Proceed
        }
    }

    fn validate_submitted(&self, cb: Handle, family: u32, pending: &mut HashSet<Handle>) -> Verdict {
        let id = ObjectId::command_buffer(cb);
        let state = match self.objects.command_buffers.state(cb) {
            Some(state) => state,
            None => return self.unknown(id),
        };

        let mut verdict = Verdict::Proceed;
        if state.level == CommandBufferLevel::Secondary {
            verdict |= self.report(
                ErrorCode::SecondaryCommandBufferSubmitted,
                id,
                "Secondary command buffers can only be executed by primaries".to_owned(),
            );
        }
        if self.config.disabled.command_buffer_state {
            return verdict;
        }

        verdict |= self.check_executable(cb);
        verdict |= self.check_not_pending(cb, pending);
        if state.usage.contains(CommandBufferUsage::ONE_TIME_SUBMIT) && state.submit_count > 0 {
            verdict |= self.report(
                ErrorCode::CommandBufferOneTimeSubmit,
                id,
                format!("One-time submit command buffer was submitted {} times", state.submit_count),
            );
        }

        let pool_family = self
            .objects
            .command_pools
            .state(state.pool)
            .map(|pool| pool.info.queue_family);
        if let Some(pool_family) = pool_family.filter(|&pool_family| pool_family != family) {
            verdict |= self.report(
                ErrorCode::QueueFamilyMismatch,
                id,
                format!(
                    "Command buffer is allocated for queue family {} and submitted to family {}",
                    pool_family, family
                ),
            );
        }

        for &secondary in &state.secondaries {
            verdict |= self.check_executable(secondary);
            verdict |= self.check_not_pending(secondary, pending);
        }

        pending.insert(cb);
        pending.extend(state.secondaries.iter().copied());
        verdict
    }

    /// Validates a queue submission.
    ///
    /// Runs checks the command buffers deferred until submission.
    /// Query and event state they produce is staged until [`DeviceState::submit`].
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self, submits)))]
    pub fn validate_submit(
        &mut self,
        queue: Handle,
        submits: &[SubmitInfo<'_>],
        fence: Option<Handle>,
    ) -> Verdict {
        self.staged.remove(&queue);
        let queue_state = match self.queues.get(&queue) {
            Some(queue_state) => queue_state,
            None => {
                return self.reporter.report(
                    ErrorCode::UnknownObject,
                    None,
                    format!("Queue {} is not tracked", queue),
                )
            }
        };
        let family = queue_state.family;
        let event_stages = queue_state.event_stages.clone();

        let mut verdict = Verdict::Proceed;
        if let Some(fence) = fence {
            let id = ObjectId::new(ObjectType::Fence, fence);
            match self.objects.fences.state(fence) {
                None => verdict |= self.unknown(id),
                Some(state) if state.pending && !self.config.disabled.object_in_use => {
                    verdict |= self.report(
                        ErrorCode::FenceInUse,
                        id,
                        "Fence is submitted while a previous submission has not signaled it".to_owned(),
                    );
                }
                Some(_) => {}
            }
        }

        let mut pending = HashSet::new();
        let mut runnable = Vec::new();
        for submit in submits {
            for &cb in submit.command_buffers {
                let cb_verdict = self.validate_submitted(cb, family, &mut pending);
                if !cb_verdict.is_skip() {
                    runnable.push(cb);
                }
                verdict |= cb_verdict;
            }
        }

        let mut context = SubmitContext {
            objects: &mut self.objects,
            reporter: &self.reporter,
            config: &self.config,
            queue,
            device_queries: &self.queries,
            queries: HashMap::new(),
            event_stages,
        };
        for cb in runnable {
            verdict |= run_deferred(&mut context, cb);
        }

        let SubmitContext {
            queries,
            event_stages,
            ..
        } = context;
        self.staged.insert(
            queue,
            StagedSubmit {
                queries,
                event_stages,
            },
        );
        verdict
    }

    /// Records an accepted submission.
    ///
    /// Every object referenced by the submitted command buffers
    /// stays in use until the submission retires.
    pub fn submit(
        &mut self,
        queue: Handle,
        submits: &[SubmitInfo<'_>],
        fence: Option<Handle>,
    ) -> Result<(), OutOfMemory> {
        let staged = self.staged.remove(&queue);

        let mut submission = Submission {
            command_buffers: Vec::new(),
            in_use: Vec::new(),
            fence,
            queries: Vec::new(),
        };

        for submit in submits {
            for &cb in submit.command_buffers {
                let node = match self.objects.command_buffers.get_mut(cb) {
                    Some(node) => node,
                    None => continue,
                };
                node.state.submit_count += 1;
                let secondaries = node.state.secondaries.clone();
                let objects: Vec<ObjectId> = std::iter::once(ObjectId::command_buffer(cb))
                    .chain(node.state.object_bindings.iter().copied())
                    .collect();

                for secondary in secondaries {
                    if let Some(state) = self.objects.command_buffers.state_mut(secondary) {
                        state.submit_count += 1;
                    }
                }

                submission
                    .in_use
                    .try_reserve(objects.len())
                    .map_err(|_| OutOfMemory)?;
                for object in objects {
                    if let Some(base) = self.objects.base(object) {
                        let in_use = base.in_use();
                        in_use.acquire();
                        submission.in_use.push(in_use);
                    }
                }
                submission.command_buffers.push(cb);
            }
        }

        if let Some(fence) = fence.and_then(|fence| self.objects.fences.state_mut(fence)) {
            fence.pending = true;
        }

        let queue_state = match self.queues.get_mut(&queue) {
            Some(queue_state) => queue_state,
            None => {
                submission.retire();
                return Ok(());
            }
        };

        if let Some(staged) = staged {
            self.queries.try_reserve(staged.queries.len()).map_err(|_| OutOfMemory)?;
            for (query, state) in staged.queries {
                if state == QueryState::Ended {
                    submission.queries.push(query);
                }
                self.queries.insert(query, state);
            }
            queue_state.event_stages = staged.event_stages;
        }

        debug!(
            "Queue {} accepted {} command buffers",
            queue,
            submission.command_buffers.len()
        );
        queue_state
            .submissions
            .try_reserve(1)
            .map_err(|_| OutOfMemory)?;
        queue_state.submissions.push_back(submission);
        Ok(())
    }

    fn retire(&mut self, submission: Submission) {
        for query in &submission.queries {
            if let Some(state) = self.queries.get_mut(query) {
                if *state == QueryState::Ended {
                    *state = QueryState::Available;
                }
            }
        }
        if let Some(fence) = submission
            .fence
            .and_then(|fence| self.objects.fences.state_mut(fence))
        {
            fence.pending = false;
        }
        trace!("Retired submission of {:?}", submission.command_buffers);
        submission.retire();
    }

    pub fn queue_wait_idle(&mut self, queue: Handle) {
        let submissions = match self.queues.get_mut(&queue) {
            Some(queue_state) => std::mem::take(&mut queue_state.submissions),
            None => return,
        };
        for submission in submissions {
            self.retire(submission);
        }
    }

    pub fn device_wait_idle(&mut self) {
        let queues: Vec<Handle> = self.queues.keys().copied().collect();
        for queue in queues {
            self.queue_wait_idle(queue);
        }
    }

    /// Retires every submission up to and including the ones that signal the fences.
    pub fn wait_for_fences(&mut self, fences: &[Handle]) {
        let mut retired = Vec::new();
        for queue_state in self.queues.values_mut() {
            let last = queue_state.submissions.iter().rposition(|submission| {
                submission
                    .fence
                    .map_or(false, |fence| fences.contains(&fence))
            });
            if let Some(last) = last {
                retired.extend(queue_state.submissions.drain(..=last));
            }
        }
        for submission in retired {
            self.retire(submission);
        }
    }

    pub fn validate_reset_fences(&self, fences: &[Handle]) -> Verdict {
        let mut verdict = Verdict::Proceed;
        for &fence in fences {
            let id = ObjectId::new(ObjectType::Fence, fence);
            match self.objects.fences.state(fence) {
                None => verdict |= self.unknown(id),
                Some(state) if state.pending && !self.config.disabled.object_in_use => {
                    verdict |= self.report(
                        ErrorCode::FenceInUse,
                        id,
                        "Fence is reset while a pending submission will signal it".to_owned(),
                    );
                }
                Some(_) => {}
            }
        }
        verdict
    }

    /// Host-side event signal or reset.
    pub fn set_event_status(&mut self, event: Handle, signaled: bool) {
        if let Some(state) = self.objects.events.state_mut(event) {
            state.host_signaled = signaled;
        }
    }
}

fn broken_list(broken: &[ObjectId]) -> String {
    if broken.is_empty() {
        return "an unknown object".to_owned();
    }
    let names: Vec<String> = broken.iter().map(ObjectId::to_string).collect();
    format!("destruction or update of {}", names.join(", "))
}
