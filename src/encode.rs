//! Command recording.
//!
//! Each recorded command is checked against the command buffer's bound
//! state, turned into memory accesses of the resources it touches and
//! checked for hazards against commands recorded before it.
//! Checks that depend on queue state are deferred until submission.

use {
    crate::{
        access::AccessFlags,
        command::{
            BarrierRegion, BufferMemoryBarrier, CmdFlags, CmdType, Command, ImageMemoryBarrier,
            MemoryAccess, MemoryBarrier, RenderPassScope, SyncInfo,
        },
        command_buffer::{
            ActiveRenderPass, BoundSet, CommandBufferLevel, CommandBufferState,
            CommandBufferUsage, DeferredCheck, DeferredKind,
        },
        descriptor::{Descriptor, DescriptorType},
        device::{run_deferred_kind, DeviceState},
        handle::{Handle, ObjectId, ObjectType},
        hazard::{self, Hazard},
        memory::WHOLE_SIZE,
        pipeline::{BindPoint, DynamicStateFlags},
        queue::{QueryObject, QueryState, QueueCapabilityFlags, SubmitContext},
        render_pass::{AttachmentLoadOp, AttachmentStoreOp, SubpassError},
        report::{ErrorCode, Verdict},
        stage::{PipelineStageFlags, ShaderStageFlags},
        OutOfMemory,
    },
    smallvec::SmallVec,
};

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub struct BufferCopy {
    pub src_offset: u64,
    pub dst_offset: u64,
    pub size: u64,
}

/// Command recorded into a command buffer.
#[derive(Clone, Copy, Debug)]
pub enum Cmd<'a> {
    BindPipeline {
        bind_point: BindPoint,
        pipeline: Handle,
    },
    BindDescriptorSets {
        bind_point: BindPoint,
        layout: Handle,
        first_set: u32,
        sets: &'a [Handle],
        dynamic_offsets: &'a [u32],
    },
    BindIndexBuffer {
        buffer: Handle,
        offset: u64,
    },
    BindVertexBuffers {
        first: u32,
        buffers: &'a [(Handle, u64)],
    },
    SetDynamicState {
        state: DynamicStateFlags,
    },
    PushConstants {
        layout: Handle,
        stages: ShaderStageFlags,
        offset: u32,
        size: u32,
    },
    Draw {
        vertex_count: u32,
        instance_count: u32,
    },
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
    },
    DrawIndirect {
        buffer: Handle,
        offset: u64,
        count: u32,
        stride: u32,
    },
    DrawIndexedIndirect {
        buffer: Handle,
        offset: u64,
        count: u32,
        stride: u32,
    },
    Dispatch {
        x: u32,
        y: u32,
        z: u32,
    },
    DispatchIndirect {
        buffer: Handle,
        offset: u64,
    },
    CopyBuffer {
        src_buffer: Handle,
        dst_buffer: Handle,
        regions: &'a [BufferCopy],
    },
    CopyImage {
        src_image: Handle,
        dst_image: Handle,
    },
    BlitImage {
        src_image: Handle,
        dst_image: Handle,
    },
    ResolveImage {
        src_image: Handle,
        dst_image: Handle,
    },
    CopyBufferToImage {
        src_buffer: Handle,
        dst_image: Handle,
    },
    CopyImageToBuffer {
        src_image: Handle,
        dst_buffer: Handle,
    },
    UpdateBuffer {
        buffer: Handle,
        offset: u64,
        size: u64,
    },
    FillBuffer {
        buffer: Handle,
        offset: u64,
        size: u64,
    },
    ClearColorImage {
        image: Handle,
    },
    ClearDepthStencilImage {
        image: Handle,
    },
    ClearAttachments,
    PipelineBarrier {
        src_stages: PipelineStageFlags,
        dst_stages: PipelineStageFlags,
        memory: &'a [MemoryBarrier],
        buffers: &'a [BufferMemoryBarrier],
        images: &'a [ImageMemoryBarrier],
    },
    SetEvent {
        event: Handle,
        stages: PipelineStageFlags,
    },
    ResetEvent {
        event: Handle,
        stages: PipelineStageFlags,
    },
    WaitEvents {
        events: &'a [Handle],
        src_stages: PipelineStageFlags,
        dst_stages: PipelineStageFlags,
        memory: &'a [MemoryBarrier],
        buffers: &'a [BufferMemoryBarrier],
        images: &'a [ImageMemoryBarrier],
    },
    BeginQuery {
        pool: Handle,
        query: u32,
    },
    EndQuery {
        pool: Handle,
        query: u32,
    },
    ResetQueryPool {
        pool: Handle,
        first: u32,
        count: u32,
    },
    WriteTimestamp {
        stage: PipelineStageFlags,
        pool: Handle,
        query: u32,
    },
    CopyQueryPoolResults {
        pool: Handle,
        first: u32,
        count: u32,
        dst_buffer: Handle,
        offset: u64,
        stride: u64,
    },
    BeginRenderPass {
        render_pass: Handle,
        framebuffer: Handle,
    },
    NextSubpass,
    EndRenderPass,
    ExecuteCommands {
        command_buffers: &'a [Handle],
    },
}

impl Cmd<'_> {
    pub fn ty(&self) -> CmdType {
        match self {
            Cmd::BindPipeline { .. } => CmdType::BindPipeline,
            Cmd::BindDescriptorSets { .. } => CmdType::BindDescriptorSets,
            Cmd::BindIndexBuffer { .. } => CmdType::BindIndexBuffer,
            Cmd::BindVertexBuffers { .. } => CmdType::BindVertexBuffers,
            Cmd::SetDynamicState { .. } => CmdType::SetDynamicState,
            Cmd::PushConstants { .. } => CmdType::PushConstants,
            Cmd::Draw { .. } => CmdType::Draw,
            Cmd::DrawIndexed { .. } => CmdType::DrawIndexed,
            Cmd::DrawIndirect { .. } => CmdType::DrawIndirect,
            Cmd::DrawIndexedIndirect { .. } => CmdType::DrawIndexedIndirect,
            Cmd::Dispatch { .. } => CmdType::Dispatch,
            Cmd::DispatchIndirect { .. } => CmdType::DispatchIndirect,
            Cmd::CopyBuffer { .. } => CmdType::CopyBuffer,
            Cmd::CopyImage { .. } => CmdType::CopyImage,
            Cmd::BlitImage { .. } => CmdType::BlitImage,
            Cmd::ResolveImage { .. } => CmdType::ResolveImage,
            Cmd::CopyBufferToImage { .. } => CmdType::CopyBufferToImage,
            Cmd::CopyImageToBuffer { .. } => CmdType::CopyImageToBuffer,
            Cmd::UpdateBuffer { .. } => CmdType::UpdateBuffer,
            Cmd::FillBuffer { .. } => CmdType::FillBuffer,
            Cmd::ClearColorImage { .. } => CmdType::ClearColorImage,
            Cmd::ClearDepthStencilImage { .. } => CmdType::ClearDepthStencilImage,
            Cmd::ClearAttachments => CmdType::ClearAttachments,
            Cmd::PipelineBarrier { .. } => CmdType::PipelineBarrier,
            Cmd::SetEvent { .. } => CmdType::SetEvent,
            Cmd::ResetEvent { .. } => CmdType::ResetEvent,
            Cmd::WaitEvents { .. } => CmdType::WaitEvents,
            Cmd::BeginQuery { .. } => CmdType::BeginQuery,
            Cmd::EndQuery { .. } => CmdType::EndQuery,
            Cmd::ResetQueryPool { .. } => CmdType::ResetQueryPool,
            Cmd::WriteTimestamp { .. } => CmdType::WriteTimestamp,
            Cmd::CopyQueryPoolResults { .. } => CmdType::CopyQueryPoolResults,
            Cmd::BeginRenderPass { .. } => CmdType::BeginRenderPass,
            Cmd::NextSubpass => CmdType::NextSubpass,
            Cmd::EndRenderPass => CmdType::EndRenderPass,
            Cmd::ExecuteCommands { .. } => CmdType::ExecuteCommands,
        }
    }

    /// Queue capabilities required to execute the command.
    pub fn required_capabilities(&self) -> QueueCapabilityFlags {
        match *self {
            Cmd::PipelineBarrier {
                src_stages,
                dst_stages,
                ..
            }
            | Cmd::WaitEvents {
                src_stages,
                dst_stages,
                ..
            } => (src_stages | dst_stages).required_capabilities(),
            Cmd::SetEvent { stages, .. } | Cmd::ResetEvent { stages, .. } => {
                stages.required_capabilities()
            }
            Cmd::BindPipeline { bind_point, .. } | Cmd::BindDescriptorSets { bind_point, .. } => {
                match bind_point {
                    BindPoint::Graphics => QueueCapabilityFlags::GRAPHICS,
                    BindPoint::Compute => QueueCapabilityFlags::COMPUTE,
                }
            }
            _ => self.ty().required_capabilities(),
        }
    }
}

/// Accesses and object references collected for one command.
#[derive(Debug, Default)]
struct Synth {
    accesses: Vec<MemoryAccess>,
    objects: Vec<ObjectId>,

    /// Resources whose content validity the command reads or writes.
    validity: SmallVec<[(ObjectId, bool); 4]>,
    unbound: SmallVec<[ObjectId; 2]>,
    unknown: SmallVec<[ObjectId; 2]>,
}

impl Synth {
    fn touch(&mut self, resource: ObjectId, write: bool) {
        self.objects.push(resource);
        if !self.validity.contains(&(resource, write)) {
            self.validity.push((resource, write));
        }
    }
}

fn color_flags(write: bool) -> CmdFlags {
    CmdFlags {
        stages: PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        access: if write {
            AccessFlags::COLOR_ATTACHMENT_WRITE
        } else {
            AccessFlags::COLOR_ATTACHMENT_READ
        },
    }
}

fn depth_flags(write: bool) -> CmdFlags {
    CmdFlags {
        stages: PipelineStageFlags::EARLY_FRAGMENT_TESTS | PipelineStageFlags::LATE_FRAGMENT_TESTS,
        access: if write {
            AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE
        } else {
            AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
        },
    }
}

fn descriptor_access(ty: DescriptorType) -> AccessFlags {
    match ty {
        _ if ty.is_writable() => AccessFlags::SHADER_WRITE,
        DescriptorType::UniformBuffer | DescriptorType::UniformBufferDynamic => {
            AccessFlags::UNIFORM_READ
        }
        DescriptorType::InputAttachment => AccessFlags::INPUT_ATTACHMENT_READ,
        _ => AccessFlags::SHADER_READ,
    }
}

/// Deferred update of content validity.
/// Reads of invalid content are reported.
fn validity_check(resource: ObjectId, write: bool, ty: CmdType) -> DeferredCheck {
    if write {
        Box::new(move |context: &mut SubmitContext<'_>| {
            context.objects.mark_valid(resource, true);
            Verdict::Proceed
        })
    } else {
        Box::new(move |context: &mut SubmitContext<'_>| {
            if context.config.disabled.memory_validity || context.objects.is_valid(resource) {
                return Verdict::Proceed;
            }
            context.reporter.report(
                ErrorCode::InvalidMemoryRead,
                Some(resource),
                format!("{:?} reads {} before its content was written", ty, resource),
            )
        })
    }
}

fn store_check(resource: ObjectId, valid: bool) -> DeferredCheck {
    Box::new(move |context: &mut SubmitContext<'_>| {
        context.objects.mark_valid(resource, valid);
        Verdict::Proceed
    })
}

fn query_update(query: QueryObject, ty: CmdType) -> DeferredCheck {
    Box::new(move |context: &mut SubmitContext<'_>| {
        let current = context.query_state(query);
        let mut verdict = Verdict::Proceed;
        let next = match ty {
            CmdType::BeginQuery | CmdType::WriteTimestamp => {
                if current != QueryState::Reset && !context.config.disabled.query_state {
                    verdict = context.reporter.report(
                        ErrorCode::QueryNotReset,
                        Some(ObjectId::new(ObjectType::QueryPool, query.pool)),
                        format!(
                            "{:?} uses query {} in {:?} state without a reset",
                            ty, query.query, current
                        ),
                    );
                }
                if ty == CmdType::BeginQuery {
                    QueryState::Running
                } else {
                    QueryState::Ended
                }
            }
            CmdType::EndQuery => QueryState::Ended,
            CmdType::ResetQueryPool => QueryState::Reset,
            CmdType::CopyQueryPoolResults => {
                if !matches!(current, QueryState::Ended | QueryState::Available)
                    && !context.config.disabled.query_state
                {
                    verdict = context.reporter.report(
                        ErrorCode::QueryNotAvailable,
                        Some(ObjectId::new(ObjectType::QueryPool, query.pool)),
                        format!("Results of query {} are copied in {:?} state", query.query, current),
                    );
                }
                return verdict;
            }
            _ => return verdict,
        };
        context.queries.insert(query, next);
        verdict
    })
}

impl DeviceState {
    /// Validates and records one command.
    ///
    /// Commands are recorded even if a check fails,
    /// so later commands are checked against what the application intended.
    /// Nothing is recorded if the command buffer cannot record at all.
    pub fn record(&mut self, cb: Handle, cmd: &Cmd<'_>) -> Result<Verdict, OutOfMemory> {
        let ty = cmd.ty();
        let mut verdict = self.check_recording(cb);
        if verdict.is_skip() || !self.objects.command_buffers.contains(cb) {
            return Ok(verdict);
        }
        verdict |= self.check_command_context(cb, cmd);

        let recorded = match *cmd {
            Cmd::BindPipeline {
                bind_point,
                pipeline,
            } => self.bind_pipeline(cb, bind_point, pipeline)?,
            Cmd::BindDescriptorSets {
                bind_point,
                layout,
                first_set,
                sets,
                ..
            } => self.bind_descriptor_sets(cb, bind_point, layout, first_set as usize, sets)?,
            Cmd::BindIndexBuffer { buffer, .. } => {
                self.set_bound(cb, ty, ObjectId::buffer(buffer), |state| {
                    state.index_buffer = Some(buffer)
                })?
            }
            Cmd::BindVertexBuffers { first, buffers } => {
                let mut verdict = Verdict::Proceed;
                for (index, &(buffer, offset)) in buffers.iter().enumerate() {
                    verdict |= self.require(ObjectId::buffer(buffer));
                    self.objects.bind(ObjectId::buffer(buffer), cb)?;
                    if let Some(state) = self.objects.command_buffers.state_mut(cb) {
                        state.vertex_buffers.insert(first + index as u32, (buffer, offset));
                    }
                }
                verdict | self.commit(cb, ty, Synth::default(), None)?
            }
            Cmd::SetDynamicState { state: dynamic } => {
                if let Some(state) = self.objects.command_buffers.state_mut(cb) {
                    state.dynamic_state |= dynamic;
                }
                self.commit(cb, ty, Synth::default(), None)?
            }
            Cmd::PushConstants {
                layout,
                stages,
                offset,
                size,
            } => self.push_constants(cb, layout, stages, offset, size)?,
            Cmd::Draw { .. } | Cmd::DrawIndexed { .. } => self.draw(cb, ty, None)?,
            Cmd::DrawIndirect {
                buffer,
                offset,
                count,
                stride,
            } => self.draw(cb, ty, Some((buffer, offset, indirect_size(count, stride, 16))))?,
            Cmd::DrawIndexedIndirect {
                buffer,
                offset,
                count,
                stride,
            } => self.draw(cb, ty, Some((buffer, offset, indirect_size(count, stride, 20))))?,
            Cmd::Dispatch { .. } => self.dispatch(cb, ty, None)?,
            Cmd::DispatchIndirect { buffer, offset } => self.dispatch(cb, ty, Some((buffer, offset, 12)))?,
            Cmd::CopyBuffer {
                src_buffer,
                dst_buffer,
                regions,
            } => {
                let mut synth = Synth::default();
                for region in regions {
                    self.buffer_access(&mut synth, src_buffer, region.src_offset, region.size, false, ty.read_flags());
                }
                for region in regions {
                    self.buffer_access(&mut synth, dst_buffer, region.dst_offset, region.size, true, ty.write_flags());
                }
                self.commit(cb, ty, synth, None)?
            }
            Cmd::CopyImage {
                src_image,
                dst_image,
            }
            | Cmd::BlitImage {
                src_image,
                dst_image,
            }
            | Cmd::ResolveImage {
                src_image,
                dst_image,
            } => {
                let mut synth = Synth::default();
                self.image_access(&mut synth, src_image, false, ty.read_flags());
                self.image_access(&mut synth, dst_image, true, ty.write_flags());
                self.commit(cb, ty, synth, None)?
            }
            Cmd::CopyBufferToImage {
                src_buffer,
                dst_image,
            } => {
                let mut synth = Synth::default();
                self.whole_buffer_access(&mut synth, src_buffer, false, ty.read_flags());
                self.image_access(&mut synth, dst_image, true, ty.write_flags());
                self.commit(cb, ty, synth, None)?
            }
            Cmd::CopyImageToBuffer {
                src_image,
                dst_buffer,
            } => {
                let mut synth = Synth::default();
                self.image_access(&mut synth, src_image, false, ty.read_flags());
                self.whole_buffer_access(&mut synth, dst_buffer, true, ty.write_flags());
                self.commit(cb, ty, synth, None)?
            }
            Cmd::UpdateBuffer {
                buffer,
                offset,
                size,
            }
            | Cmd::FillBuffer {
                buffer,
                offset,
                size,
            } => {
                let mut synth = Synth::default();
                self.buffer_access(&mut synth, buffer, offset, size, true, ty.write_flags());
                self.commit(cb, ty, synth, None)?
            }
            Cmd::ClearColorImage { image } | Cmd::ClearDepthStencilImage { image } => {
                let mut synth = Synth::default();
                self.image_access(&mut synth, image, true, ty.write_flags());
                self.commit(cb, ty, synth, None)?
            }
            Cmd::ClearAttachments => self.commit(cb, ty, Synth::default(), None)?,
            Cmd::PipelineBarrier {
                src_stages,
                dst_stages,
                memory,
                buffers,
                images,
            } => self.pipeline_barrier(cb, src_stages, dst_stages, memory, buffers, images)?,
            Cmd::SetEvent { event, stages } => self.set_event(cb, ty, event, stages)?,
            Cmd::ResetEvent { event, .. } => {
                self.set_event(cb, ty, event, PipelineStageFlags::empty())?
            }
            Cmd::WaitEvents {
                events,
                src_stages,
                dst_stages,
                memory,
                buffers,
                images,
            } => self.wait_events(cb, events, src_stages, dst_stages, memory, buffers, images)?,
            Cmd::BeginQuery { pool, query } => self.begin_query(cb, pool, query)?,
            Cmd::EndQuery { pool, query } => self.end_query(cb, pool, query)?,
            Cmd::ResetQueryPool { pool, first, count } => {
                self.query_command(cb, ty, pool, first, count, Synth::default())?
            }
            Cmd::WriteTimestamp { pool, query, .. } => {
                self.query_command(cb, ty, pool, query, 1, Synth::default())?
            }
            Cmd::CopyQueryPoolResults {
                pool,
                first,
                count,
                dst_buffer,
                offset,
                stride,
            } => {
                let mut synth = Synth::default();
                let size = stride.saturating_mul(count as u64).max(1);
                self.buffer_access(&mut synth, dst_buffer, offset, size, true, ty.write_flags());
                self.query_command(cb, ty, pool, first, count, synth)?
            }
            Cmd::BeginRenderPass {
                render_pass,
                framebuffer,
            } => self.begin_render_pass(cb, render_pass, framebuffer)?,
            Cmd::NextSubpass => self.next_subpass(cb)?,
            Cmd::EndRenderPass => self.end_render_pass(cb)?,
            Cmd::ExecuteCommands { command_buffers } => {
                self.execute_commands(cb, command_buffers)?
            }
        };
        Ok(verdict | recorded)
    }

    fn state(&self, cb: Handle) -> Option<&CommandBufferState> {
        self.objects.command_buffers.state(cb)
    }

    fn state_mut(&mut self, cb: Handle) -> Option<&mut CommandBufferState> {
        self.objects.command_buffers.state_mut(cb)
    }

    /// Render pass scope and queue capabilities.
    fn check_command_context(&self, cb: Handle, cmd: &Cmd<'_>) -> Verdict {
        let id = ObjectId::command_buffer(cb);
        let state = match self.state(cb) {
            Some(state) => state,
            None => return Verdict::Proceed,
        };
        let ty = cmd.ty();

        let mut verdict = Verdict::Proceed;
        if !self.config.disabled.render_pass {
            let inside = state.active_render_pass.is_some();
            let legal = match ty.render_pass_scope() {
                RenderPassScope::Inside => inside,
                RenderPassScope::Outside => !inside,
                RenderPassScope::Both => true,
            };
            if !legal {
                verdict |= self.report(
                    ErrorCode::RenderPassScope,
                    id,
                    format!(
                        "{:?} cannot be recorded {} a render pass",
                        ty,
                        if inside { "inside" } else { "outside" }
                    ),
                );
            }
        }

        if !self.config.disabled.queue_capabilities {
            if let Some(pool) = self.objects.command_pools.state(state.pool) {
                let required = cmd.required_capabilities();
                if !pool.info.capabilities.covers(required) {
                    verdict |= self.report(
                        ErrorCode::QueueCapability,
                        id,
                        format!(
                            "{:?} requires {:?}, queue family {} supports {:?}",
                            ty, required, pool.info.queue_family, pool.info.capabilities
                        ),
                    );
                }
            }
        }
        verdict
    }

    fn buffer_access(
        &self,
        synth: &mut Synth,
        buffer: Handle,
        offset: u64,
        size: u64,
        write: bool,
        flags: CmdFlags,
    ) {
        self.buffer_access_with(synth, buffer, offset, size, write, true, flags)
    }

    /// Access with unknown extent.
    fn whole_buffer_access(&self, synth: &mut Synth, buffer: Handle, write: bool, flags: CmdFlags) {
        self.buffer_access_with(synth, buffer, 0, WHOLE_SIZE, write, false, flags)
    }

    #[allow(clippy::too_many_arguments)]
    fn buffer_access_with(
        &self,
        synth: &mut Synth,
        buffer: Handle,
        offset: u64,
        size: u64,
        write: bool,
        precise: bool,
        flags: CmdFlags,
    ) {
        let id = ObjectId::buffer(buffer);
        if !self.objects.buffers.contains(buffer) {
            synth.unknown.push(id);
            return;
        }
        synth.touch(id, write);

        let (locations, exact) = self.objects.buffer_region(buffer, offset, size);
        if locations.is_empty() {
            synth.unbound.push(id);
            return;
        }
        for location in locations {
            synth.objects.push(ObjectId::memory(location.memory));
            synth
                .accesses
                .push(MemoryAccess::new(Some(id), location, precise && exact, write, flags));
        }
    }

    fn image_access(&self, synth: &mut Synth, image: Handle, write: bool, flags: CmdFlags) {
        let id = ObjectId::image(image);
        let swapchain = match self.objects.images.state(image) {
            Some(state) => state.swapchain.is_some(),
            None => {
                synth.unknown.push(id);
                return;
            }
        };
        synth.touch(id, write);
        if swapchain {
            return;
        }

        let locations = self.objects.resource_locations(id);
        if locations.is_empty() {
            synth.unbound.push(id);
            return;
        }
        for location in locations {
            synth.objects.push(ObjectId::memory(location.memory));
            synth
                .accesses
                .push(MemoryAccess::new(Some(id), location, false, write, flags));
        }
    }

    fn report_hazard(&self, cb: Handle, command: &Command, hazard: &Hazard) -> Verdict {
        let object = hazard
            .resource
            .unwrap_or_else(|| ObjectId::command_buffer(cb));
        let earlier = match hazard.earlier_resource {
            Some(resource) => resource.to_string(),
            None => "memory".to_owned(),
        };
        self.report(
            hazard.kind.error_code(),
            object,
            format!(
                "Unsynchronized {}: {:?} (command {}) accesses [{}, {}) of memory {} written or read through {} by {:?} (command {}) in command buffer {}",
                hazard.kind.name(),
                command.ty,
                command.seq,
                hazard.location.offset,
                hazard.location.end(),
                hazard.location.memory,
                earlier,
                hazard.earlier_ty,
                hazard.earlier_seq,
                cb,
            ),
        )
    }

    /// Appends the command after hazard detection,
    /// binding every referenced object to the command buffer.
    fn commit(
        &mut self,
        cb: Handle,
        ty: CmdType,
        synth: Synth,
        sync: Option<SyncInfo>,
    ) -> Result<Verdict, OutOfMemory> {
        let mut verdict = Verdict::Proceed;
        for &id in &synth.unknown {
            verdict |= self.unknown(id);
        }
        if !self.config.disabled.memory_binding {
            for &id in &synth.unbound {
                verdict |= self.report(
                    ErrorCode::MemoryNotBound,
                    id,
                    format!("{} is used by {:?} without memory bound", id, ty),
                );
            }
        }

        let state = match self.state(cb) {
            Some(state) => state,
            None => return Ok(verdict),
        };
        let mut command = Command::new(ty, state.next_seq());
        command.accesses = synth.accesses;
        command.sync = sync;

        if !self.config.disabled.memory_hazard {
            for hazard in hazard::detect(&state.commands, &state.access_index, &command) {
                verdict |= self.report_hazard(cb, &command, &hazard);
            }
        }

        for object in synth.objects {
            self.objects.bind(object, cb)?;
        }

        let state = match self.state_mut(cb) {
            Some(state) => state,
            None => return Ok(verdict),
        };
        state.commands.try_reserve(1).map_err(|_| OutOfMemory)?;
        state
            .memory_checks
            .try_reserve(synth.validity.len())
            .map_err(|_| OutOfMemory)?;
        for (resource, write) in synth.validity {
            state.memory_checks.push(validity_check(resource, write, ty));
        }
        state.push_command(command);
        Ok(verdict)
    }

    fn set_bound(
        &mut self,
        cb: Handle,
        ty: CmdType,
        object: ObjectId,
        f: impl FnOnce(&mut CommandBufferState),
    ) -> Result<Verdict, OutOfMemory> {
        let verdict = self.require(object);
        self.objects.bind(object, cb)?;
        if let Some(state) = self.state_mut(cb) {
            f(state);
        }
        Ok(verdict | self.commit(cb, ty, Synth::default(), None)?)
    }

    fn bind_pipeline(&mut self, cb: Handle, bind_point: BindPoint, pipeline: Handle) -> Result<Verdict, OutOfMemory> {
        let id = ObjectId::new(ObjectType::Pipeline, pipeline);
        let compat = match self.objects.pipelines.state(pipeline) {
            Some(state) => state.compat.clone(),
            None => return Ok(self.unknown(id)),
        };

        self.set_bound(cb, CmdType::BindPipeline, id, move |state| {
            let bound = state.last_bound_mut(bind_point);
            bound.pipeline = Some(pipeline);
            bound.pipeline_compat = compat;
        })
    }

    fn bind_descriptor_sets(
        &mut self,
        cb: Handle,
        bind_point: BindPoint,
        layout: Handle,
        first: usize,
        sets: &[Handle],
    ) -> Result<Verdict, OutOfMemory> {
        let layout_id = ObjectId::new(ObjectType::PipelineLayout, layout);
        let (set_layouts, compat) = match self.objects.pipeline_layouts.state(layout) {
            Some(state) => (state.set_layouts.clone(), state.compat.clone()),
            None => return Ok(self.unknown(layout_id)),
        };

        let mut verdict = Verdict::Proceed;
        let mut objects = vec![layout_id];
        for (offset, &set) in sets.iter().enumerate() {
            let index = first + offset;
            let id = ObjectId::new(ObjectType::DescriptorSet, set);
            let state = match self.objects.descriptor_sets.state(set) {
                Some(state) => state,
                None => {
                    verdict |= self.unknown(id);
                    continue;
                }
            };
            objects.push(id);
            objects.extend(state.descriptors.values().flat_map(Descriptor::objects));

            if self.config.disabled.pipeline_layout_compatibility {
                continue;
            }
            match set_layouts.get(index) {
                Some(expected) if *expected == state.layout_id => {}
                Some(_) => {
                    verdict |= self.report(
                        ErrorCode::DescriptorSetLayoutMismatch,
                        id,
                        format!(
                            "Layout {} of the set differs from set layout {} of pipeline layout {}",
                            state.layout, index, layout
                        ),
                    );
                }
                None => {
                    verdict |= self.report(
                        ErrorCode::DescriptorSetLayoutMismatch,
                        id,
                        format!(
                            "Set is bound at index {} but pipeline layout {} has {} sets",
                            index,
                            layout,
                            set_layouts.len()
                        ),
                    );
                }
            }
        }

        for object in objects {
            self.objects.bind(object, cb)?;
        }

        if let Some(state) = self.state_mut(cb) {
            let bound = state.last_bound_mut(bind_point);
            let end = first + sets.len();
            if bound.sets.len() < end {
                bound.sets.resize(end, None);
            }
            for (index, slot) in bound.sets.iter_mut().enumerate() {
                if index >= first && index < end {
                    *slot = compat.get(index).map(|compat| BoundSet {
                        set: sets[index - first],
                        compat: compat.clone(),
                    });
                } else {
                    // Sets bound with a layout incompatible at their index are disturbed.
                    let disturbed = slot
                        .as_ref()
                        .map_or(false, |bound| compat.get(index) != Some(&bound.compat));
                    if disturbed {
                        *slot = None;
                    }
                }
            }
        }

        Ok(verdict | self.commit(cb, CmdType::BindDescriptorSets, Synth::default(), None)?)
    }

    fn push_constants(
        &mut self,
        cb: Handle,
        layout: Handle,
        stages: ShaderStageFlags,
        offset: u32,
        size: u32,
    ) -> Result<Verdict, OutOfMemory> {
        let id = ObjectId::new(ObjectType::PipelineLayout, layout);
        let mut verdict = match self.objects.pipeline_layouts.state(layout) {
            Some(_) if self.config.disabled.push_constant_range => Verdict::Proceed,
            Some(state) => match state.check_push_constants(stages, offset, size) {
                Ok(()) => Verdict::Proceed,
                Err(err) => self.report(ErrorCode::PushConstantRange, id, err.to_string()),
            },
            None => self.unknown(id),
        };
        self.objects.bind(id, cb)?;
        verdict |= self.commit(cb, CmdType::PushConstants, Synth::default(), None)?;
        Ok(verdict)
    }

    /// Checks pipeline and descriptor sets bound for a draw or dispatch.
    fn check_bound_state(&self, cb: Handle, bind_point: BindPoint, ty: CmdType) -> Verdict {
        let id = ObjectId::command_buffer(cb);
        let state = match self.state(cb) {
            Some(state) => state,
            None => return Verdict::Proceed,
        };
        let bound = state.last_bound(bind_point);

        let pipeline_handle = match bound.pipeline {
            Some(pipeline) => pipeline,
            None => {
                return self.report(
                    ErrorCode::PipelineNotBound,
                    id,
                    format!("{:?} is recorded without a {:?} pipeline bound", ty, bind_point),
                )
            }
        };

        let mut verdict = Verdict::Proceed;
        if !self.config.disabled.pipeline_layout_compatibility {
            for (index, compat) in bound.pipeline_compat.iter().enumerate() {
                match bound.sets.get(index).and_then(Option::as_ref) {
                    None => {
                        verdict |= self.report(
                            ErrorCode::DescriptorSetNotBound,
                            id,
                            format!("{:?} uses set {} which is not bound", ty, index),
                        );
                    }
                    Some(set) if set.compat != *compat => {
                        verdict |= self.report(
                            ErrorCode::DescriptorSetIncompatible,
                            ObjectId::new(ObjectType::DescriptorSet, set.set),
                            format!(
                                "Set {} was bound with a layout incompatible with pipeline {}",
                                index, pipeline_handle
                            ),
                        );
                    }
                    Some(_) => {}
                }
            }
        }

        if bind_point == BindPoint::Compute {
            return verdict;
        }
        let pipeline = match self.objects.pipelines.state(pipeline_handle) {
            Some(pipeline) => pipeline,
            None => return verdict,
        };

        if !self.config.disabled.dynamic_state {
            let missing = pipeline.info.dynamic_states - state.dynamic_state;
            if !missing.is_empty() {
                verdict |= self.report(
                    ErrorCode::DynamicStateNotSet,
                    id,
                    format!("Dynamic state {:?} of pipeline {} is not set", missing, pipeline_handle),
                );
            }
        }

        if matches!(ty, CmdType::DrawIndexed | CmdType::DrawIndexedIndirect) && state.index_buffer.is_none() {
            verdict |= self.report(
                ErrorCode::IndexBufferNotBound,
                id,
                format!("{:?} is recorded without an index buffer bound", ty),
            );
        }

        if !self.config.disabled.render_pass {
            if let (Some(active), Some((_, subpass))) =
                (&state.active_render_pass, pipeline.info.render_pass)
            {
                let compatible = match (
                    &pipeline.render_pass,
                    self.objects.render_passes.state(active.render_pass),
                ) {
                    (Some(expected), Some(current)) => expected.is_compatible(&current.info),
                    _ => true,
                };
                if !compatible || subpass as usize != active.subpass {
                    verdict |= self.report(
                        ErrorCode::PipelineRenderPassMismatch,
                        id,
                        format!(
                            "Pipeline {} is created for subpass {} of an incompatible render pass, current subpass is {}",
                            pipeline_handle, subpass, active.subpass
                        ),
                    );
                }
            }
        }
        verdict
    }

    /// Second draw in a subpass that reads its own attachments needs a barrier in between.
    fn check_feedback(&self, cb: Handle) -> Verdict {
        if self.config.disabled.render_pass {
            return Verdict::Proceed;
        }
        let active = match self.state(cb).and_then(|state| state.active_render_pass.as_ref()) {
            Some(active) => active,
            None => return Verdict::Proceed,
        };
        let feedback = self
            .objects
            .render_passes
            .state(active.render_pass)
            .and_then(|render_pass| render_pass.info.subpasses.get(active.subpass))
            .map_or(false, |subpass| subpass.has_feedback_loop());

        if feedback && active.drawn && !active.barrier_after_draw {
            self.report(
                ErrorCode::SubpassFeedbackWithoutBarrier,
                ObjectId::command_buffer(cb),
                format!(
                    "Subpass {} reads attachments it writes and draws again without a barrier",
                    active.subpass
                ),
            )
        } else {
            Verdict::Proceed
        }
    }

    /// Accesses through descriptor sets bound to the bind point.
    fn descriptor_accesses(&self, synth: &mut Synth, cb: Handle, bind_point: BindPoint) {
        let state = match self.state(cb) {
            Some(state) => state,
            None => return,
        };

        for bound in state.last_bound(bind_point).sets.iter().flatten() {
            let set = match self.objects.descriptor_sets.state(bound.set) {
                Some(set) => set,
                None => continue,
            };

            for (&(binding, _), descriptor) in &set.descriptors {
                let layout = match set.binding(binding) {
                    Some(layout) => layout,
                    None => continue,
                };
                let stages = match bind_point {
                    BindPoint::Compute => PipelineStageFlags::COMPUTE_SHADER,
                    BindPoint::Graphics => {
                        layout.stages.pipeline_stages() & PipelineStageFlags::GRAPHICS_STAGES
                    }
                };
                if stages.is_empty() {
                    continue;
                }
                let write = layout.ty.is_writable();
                let flags = CmdFlags {
                    stages,
                    access: descriptor_access(layout.ty),
                };

                match *descriptor {
                    Descriptor::Buffer {
                        buffer,
                        offset,
                        size,
                    } => self.buffer_access(synth, buffer, offset, size, write, flags),
                    Descriptor::TexelBuffer(view) => {
                        if let Some(view) = self.objects.buffer_views.state(view) {
                            self.buffer_access(
                                synth,
                                view.info.buffer,
                                view.info.offset,
                                view.info.size,
                                write,
                                flags,
                            );
                        }
                    }
                    Descriptor::Image(view) | Descriptor::CombinedImageSampler { view, .. } => {
                        if let Some(view) = self.objects.image_views.state(view) {
                            self.image_access(synth, view.info.image, write, flags);
                        }
                    }
                    Descriptor::Sampler(_) => {}
                }
            }
        }
    }

    fn draw(
        &mut self,
        cb: Handle,
        ty: CmdType,
        indirect: Option<(Handle, u64, u64)>,
    ) -> Result<Verdict, OutOfMemory> {
        let mut verdict = self.check_bound_state(cb, BindPoint::Graphics, ty);
        verdict |= self.check_feedback(cb);

        let mut synth = Synth::default();
        if let Some(state) = self.state(cb) {
            let vertex = CmdFlags {
                stages: PipelineStageFlags::VERTEX_INPUT,
                access: AccessFlags::VERTEX_ATTRIBUTE_READ,
            };
            for &(buffer, offset) in state.vertex_buffers.values() {
                self.buffer_access_with(&mut synth, buffer, offset, WHOLE_SIZE, false, false, vertex);
            }

            if matches!(ty, CmdType::DrawIndexed | CmdType::DrawIndexedIndirect) {
                if let Some(buffer) = state.index_buffer {
                    let index = CmdFlags {
                        stages: PipelineStageFlags::VERTEX_INPUT,
                        access: AccessFlags::INDEX_READ,
                    };
                    self.whole_buffer_access(&mut synth, buffer, false, index);
                }
            }
        }
        if let Some((buffer, offset, size)) = indirect {
            let flags = CmdFlags {
                stages: PipelineStageFlags::DRAW_INDIRECT,
                access: AccessFlags::INDIRECT_COMMAND_READ,
            };
            self.buffer_access(&mut synth, buffer, offset, size, false, flags);
        }
        self.descriptor_accesses(&mut synth, cb, BindPoint::Graphics);

        verdict |= self.commit(cb, ty, synth, None)?;
        if let Some(active) = self.state_mut(cb).and_then(|state| state.active_render_pass.as_mut()) {
            active.drawn = true;
            active.barrier_after_draw = false;
        }
        Ok(verdict)
    }

    fn dispatch(
        &mut self,
        cb: Handle,
        ty: CmdType,
        indirect: Option<(Handle, u64, u64)>,
    ) -> Result<Verdict, OutOfMemory> {
        let mut verdict = self.check_bound_state(cb, BindPoint::Compute, ty);

        let mut synth = Synth::default();
        if let Some((buffer, offset, size)) = indirect {
            let flags = CmdFlags {
                stages: PipelineStageFlags::DRAW_INDIRECT,
                access: AccessFlags::INDIRECT_COMMAND_READ,
            };
            self.buffer_access(&mut synth, buffer, offset, size, false, flags);
        }
        self.descriptor_accesses(&mut synth, cb, BindPoint::Compute);

        verdict |= self.commit(cb, ty, synth, None)?;
        Ok(verdict)
    }

    /// Resolves barriers to the memory regions they cover.
    fn resolve_sync(
        &self,
        synth: &mut Synth,
        src_stages: PipelineStageFlags,
        dst_stages: PipelineStageFlags,
        memory: &[MemoryBarrier],
        buffers: &[BufferMemoryBarrier],
        images: &[ImageMemoryBarrier],
    ) -> SyncInfo {
        let mut regions = Vec::new();
        for barrier in buffers {
            let id = ObjectId::buffer(barrier.buffer);
            if !self.objects.buffers.contains(barrier.buffer) {
                synth.unknown.push(id);
                continue;
            }
            synth.objects.push(id);
            let (locations, _) = self
                .objects
                .buffer_region(barrier.buffer, barrier.offset, barrier.size);
            regions.extend(locations.into_iter().map(|location| BarrierRegion {
                location,
                dst_access: barrier.dst_access,
            }));
        }
        for barrier in images {
            let id = ObjectId::image(barrier.image);
            if !self.objects.images.contains(barrier.image) {
                synth.unknown.push(id);
                continue;
            }
            synth.objects.push(id);
            regions.extend(
                self.objects
                    .resource_locations(id)
                    .into_iter()
                    .map(|location| BarrierRegion {
                        location,
                        dst_access: barrier.dst_access,
                    }),
            );
        }

        SyncInfo {
            src_stages,
            dst_stages,
            memory_barriers: memory.to_vec(),
            buffer_barriers: buffers.to_vec(),
            image_barriers: images.to_vec(),
            regions,
            events: Vec::new(),
        }
    }

    fn pipeline_barrier(
        &mut self,
        cb: Handle,
        src_stages: PipelineStageFlags,
        dst_stages: PipelineStageFlags,
        memory: &[MemoryBarrier],
        buffers: &[BufferMemoryBarrier],
        images: &[ImageMemoryBarrier],
    ) -> Result<Verdict, OutOfMemory> {
        let mut verdict = Verdict::Proceed;
        let active = self
            .state(cb)
            .and_then(|state| state.active_render_pass.clone());

        if let Some(active) = &active {
            let graph = self
                .objects
                .render_passes
                .state(active.render_pass)
                .map(|render_pass| &render_pass.graph);
            if let (Some(graph), false) = (graph, self.config.disabled.render_pass) {
                let id = ObjectId::new(ObjectType::RenderPass, active.render_pass);
                if !graph.requires_barrier_before_use(active.subpass) {
                    verdict |= self.report(
                        ErrorCode::BarrierWithoutSelfDependency,
                        id,
                        format!(
                            "Pipeline barrier inside subpass {} which has no self-dependency",
                            active.subpass
                        ),
                    );
                } else if let Some(node) = graph.node(active.subpass) {
                    if !node.self_src_stages.contains(src_stages)
                        || !node.self_dst_stages.contains(dst_stages)
                    {
                        verdict |= self.report(
                            ErrorCode::BarrierStageMismatch,
                            id,
                            format!(
                                "Barrier stages {:?} -> {:?} are not contained in the self-dependency {:?} -> {:?} of subpass {}",
                                src_stages,
                                dst_stages,
                                node.self_src_stages,
                                node.self_dst_stages,
                                active.subpass
                            ),
                        );
                    }
                }
            }
        }

        let mut synth = Synth::default();
        let sync = self.resolve_sync(&mut synth, src_stages, dst_stages, memory, buffers, images);
        if let Some(state) = self.state_mut(cb) {
            let seq = state.next_seq();
            hazard::apply_sync_all(&mut state.commands, seq, &sync);
            if let Some(active) = state.active_render_pass.as_mut() {
                active.barrier_after_draw = true;
            }
        }

        verdict |= self.commit(cb, CmdType::PipelineBarrier, synth, Some(sync))?;
        Ok(verdict)
    }

    fn set_event(
        &mut self,
        cb: Handle,
        ty: CmdType,
        event: Handle,
        stages: PipelineStageFlags,
    ) -> Result<Verdict, OutOfMemory> {
        let id = ObjectId::new(ObjectType::Event, event);
        let verdict = self.require(id);
        self.objects.bind(id, cb)?;

        if let Some(state) = self.state_mut(cb) {
            let seq = state.next_seq();
            if ty == CmdType::SetEvent {
                state.set_events.insert(event, seq);
            } else {
                state.set_events.remove(&event);
            }
            state.event_updates.try_reserve(1).map_err(|_| OutOfMemory)?;
            state.event_updates.push(Box::new(move |context: &mut SubmitContext<'_>| {
                context.event_stages.insert(event, stages);
                Verdict::Proceed
            }));
        }
        Ok(verdict | self.commit(cb, ty, Synth::default(), None)?)
    }

    #[allow(clippy::too_many_arguments)]
    fn wait_events(
        &mut self,
        cb: Handle,
        events: &[Handle],
        src_stages: PipelineStageFlags,
        dst_stages: PipelineStageFlags,
        memory: &[MemoryBarrier],
        buffers: &[BufferMemoryBarrier],
        images: &[ImageMemoryBarrier],
    ) -> Result<Verdict, OutOfMemory> {
        let mut verdict = Verdict::Proceed;
        let mut synth = Synth::default();
        for &event in events {
            let id = ObjectId::new(ObjectType::Event, event);
            verdict |= self.require(id);
            synth.objects.push(id);
        }

        let mut sync = self.resolve_sync(&mut synth, src_stages, dst_stages, memory, buffers, images);
        sync.events = events.to_vec();

        if let Some(state) = self.state_mut(cb) {
            let seq = state.next_seq();
            // Only commands recorded before the event was set are in the first scope.
            for event in events {
                if let Some(&set) = state.set_events.get(event) {
                    let end = (set as usize).min(state.commands.len());
                    hazard::apply_sync_all(&mut state.commands[..end], seq, &sync);
                }
            }

            let events = events.to_vec();
            state.event_updates.try_reserve(1).map_err(|_| OutOfMemory)?;
            state.event_updates.push(Box::new(move |context: &mut SubmitContext<'_>| {
                if context.config.disabled.event_state {
                    return Verdict::Proceed;
                }
                let mut stages = PipelineStageFlags::empty();
                for event in &events {
                    if let Some(&set) = context.event_stages.get(event) {
                        stages |= set;
                    }
                    if context
                        .objects
                        .events
                        .state(*event)
                        .map_or(false, |state| state.host_signaled)
                    {
                        stages |= PipelineStageFlags::HOST;
                    }
                }
                if stages == src_stages {
                    return Verdict::Proceed;
                }
                context.reporter.report(
                    ErrorCode::WaitEventsStageMask,
                    events
                        .first()
                        .map(|&event| ObjectId::new(ObjectType::Event, event)),
                    format!(
                        "Source stage mask {:?} differs from {:?} the events were set with",
                        src_stages, stages
                    ),
                )
            }));
        }

        verdict |= self.commit(cb, CmdType::WaitEvents, synth, Some(sync))?;
        Ok(verdict)
    }

    fn check_query_range(&self, pool: Handle, first: u32, count: u32) -> Verdict {
        let id = ObjectId::new(ObjectType::QueryPool, pool);
        match self.objects.query_pools.state(pool) {
            None => self.unknown(id),
            Some(state)
                if !self.config.disabled.query_state
                    && first as u64 + count as u64 > state.info.count as u64 =>
            {
                self.report(
                    ErrorCode::QueryOutOfRange,
                    id,
                    format!(
                        "Queries [{}, {}) are outside of pool with {} queries",
                        first,
                        first as u64 + count as u64,
                        state.info.count
                    ),
                )
            }
            Some(_) => Verdict::Proceed,
        }
    }

    /// Records a command that changes or reads query state at submission.
    fn query_command(
        &mut self,
        cb: Handle,
        ty: CmdType,
        pool: Handle,
        first: u32,
        count: u32,
        mut synth: Synth,
    ) -> Result<Verdict, OutOfMemory> {
        let mut verdict = self.check_query_range(pool, first, count);
        synth.objects.push(ObjectId::new(ObjectType::QueryPool, pool));

        if let Some(state) = self.state_mut(cb) {
            state
                .query_updates
                .try_reserve(count as usize)
                .map_err(|_| OutOfMemory)?;
            for query in first..first.saturating_add(count) {
                state
                    .query_updates
                    .push(query_update(QueryObject { pool, query }, ty));
            }
        }

        verdict |= self.commit(cb, ty, synth, None)?;
        Ok(verdict)
    }

    fn begin_query(&mut self, cb: Handle, pool: Handle, query: u32) -> Result<Verdict, OutOfMemory> {
        let object = QueryObject { pool, query };
        let mut verdict = Verdict::Proceed;
        let active = self
            .state(cb)
            .map_or(false, |state| state.active_queries.contains(&object));
        if active && !self.config.disabled.query_state {
            verdict |= self.report(
                ErrorCode::QueryAlreadyActive,
                ObjectId::new(ObjectType::QueryPool, pool),
                format!("Query {} is already active", query),
            );
        }

        if let Some(state) = self.state_mut(cb) {
            state
                .active_queries
                .try_reserve(1)
                .map_err(|_| OutOfMemory)?;
            state.active_queries.insert(object);
        }
        verdict |= self.query_command(cb, CmdType::BeginQuery, pool, query, 1, Synth::default())?;
        Ok(verdict)
    }

    fn end_query(&mut self, cb: Handle, pool: Handle, query: u32) -> Result<Verdict, OutOfMemory> {
        let object = QueryObject { pool, query };
        let mut verdict = Verdict::Proceed;
        let was_active = self
            .state_mut(cb)
            .map_or(false, |state| state.active_queries.remove(&object));
        if !was_active && !self.config.disabled.query_state {
            verdict |= self.report(
                ErrorCode::QueryNotActive,
                ObjectId::new(ObjectType::QueryPool, pool),
                format!("Query {} is not active", query),
            );
        }
        verdict |= self.query_command(cb, CmdType::EndQuery, pool, query, 1, Synth::default())?;
        Ok(verdict)
    }

    fn begin_render_pass(
        &mut self,
        cb: Handle,
        render_pass: Handle,
        framebuffer: Handle,
    ) -> Result<Verdict, OutOfMemory> {
        let render_pass_id = ObjectId::new(ObjectType::RenderPass, render_pass);
        let framebuffer_id = ObjectId::new(ObjectType::Framebuffer, framebuffer);
        let rp = match self.objects.render_passes.state(render_pass) {
            Some(rp) => rp,
            None => return Ok(self.unknown(render_pass_id)),
        };
        let fb = match self.objects.framebuffers.state(framebuffer) {
            Some(fb) => fb,
            None => return Ok(self.unknown(framebuffer_id)),
        };

        let mut verdict = Verdict::Proceed;
        if !self.config.disabled.render_pass && !fb.render_pass.is_compatible(&rp.info) {
            verdict |= self.report(
                ErrorCode::FramebufferIncompatible,
                framebuffer_id,
                format!("Framebuffer is not compatible with render pass {}", render_pass),
            );
        }

        let mut synth = Synth::default();
        synth.objects.push(render_pass_id);
        synth.objects.push(framebuffer_id);

        for (index, attachment) in rp.info.attachments.iter().enumerate() {
            let view = match fb.info.attachments.get(index) {
                Some(&view) => view,
                None => continue,
            };
            synth.objects.push(ObjectId::new(ObjectType::ImageView, view));
            let image = match self.objects.image_views.state(view) {
                Some(view) => view.info.image,
                None => continue,
            };

            let depth = rp.info.subpasses.iter().any(|subpass| subpass.depth == Some(index));
            let flags = if depth { depth_flags } else { color_flags };
            match attachment.load_op {
                AttachmentLoadOp::Load => self.image_access(&mut synth, image, false, flags(false)),
                AttachmentLoadOp::Clear => self.image_access(&mut synth, image, true, flags(true)),
                AttachmentLoadOp::DontCare => synth.objects.push(ObjectId::image(image)),
            }
        }

        // External dependencies into the render pass act as barriers before it.
        let incoming: Vec<SyncInfo> = rp
            .info
            .dependencies
            .iter()
            .filter(|dependency| dependency.src.is_none() && dependency.dst.is_some())
            .map(|dependency| SyncInfo {
                src_stages: dependency.src_stages,
                dst_stages: dependency.dst_stages,
                memory_barriers: vec![MemoryBarrier {
                    src_access: dependency.src_access,
                    dst_access: dependency.dst_access,
                }],
                ..SyncInfo::default()
            })
            .collect();

        if let Some(state) = self.state_mut(cb) {
            let seq = state.next_seq();
            for sync in &incoming {
                hazard::apply_sync_all(&mut state.commands, seq, sync);
            }
            state.active_render_pass = Some(ActiveRenderPass {
                render_pass,
                framebuffer: Some(framebuffer),
                subpass: 0,
                drawn: false,
                barrier_after_draw: false,
                inherited: false,
            });
        }

        verdict |= self.commit(cb, CmdType::BeginRenderPass, synth, None)?;
        Ok(verdict)
    }

    fn next_subpass(&mut self, cb: Handle) -> Result<Verdict, OutOfMemory> {
        let mut verdict = Verdict::Proceed;
        let active = match self.state(cb).and_then(|state| state.active_render_pass.clone()) {
            Some(active) => active,
            None => return self.commit(cb, CmdType::NextSubpass, Synth::default(), None),
        };

        let advance = self
            .objects
            .render_passes
            .state(active.render_pass)
            .map(|rp| rp.graph.validate_subpass_advance(active.subpass, active.subpass + 1));

        match &advance {
            Some(Err(err)) if !self.config.disabled.render_pass => {
                verdict |= self.report(
                    ErrorCode::SubpassAdvance,
                    ObjectId::new(ObjectType::RenderPass, active.render_pass),
                    err.to_string(),
                );
            }
            _ => {}
        }

        let advanced = !matches!(advance, Some(Err(SubpassError::PastLastSubpass { .. })));
        if let Some(active) = self.state_mut(cb).and_then(|state| state.active_render_pass.as_mut()) {
            if advanced {
                active.subpass += 1;
            }
            active.drawn = false;
            active.barrier_after_draw = false;
        }

        verdict |= self.commit(cb, CmdType::NextSubpass, Synth::default(), None)?;
        Ok(verdict)
    }

    fn end_render_pass(&mut self, cb: Handle) -> Result<Verdict, OutOfMemory> {
        let mut verdict = Verdict::Proceed;
        let active = match self.state(cb).and_then(|state| state.active_render_pass.clone()) {
            Some(active) => active,
            None => return self.commit(cb, CmdType::EndRenderPass, Synth::default(), None),
        };
        let render_pass_id = ObjectId::new(ObjectType::RenderPass, active.render_pass);

        let mut outgoing = Vec::new();
        let mut stores: SmallVec<[(ObjectId, bool); 4]> = SmallVec::new();
        if let Some(rp) = self.objects.render_passes.state(active.render_pass) {
            let last = rp.info.subpasses.len().saturating_sub(1);
            if !self.config.disabled.render_pass && active.subpass != last {
                verdict |= self.report(
                    ErrorCode::SubpassAdvance,
                    render_pass_id,
                    format!(
                        "Render pass ends in subpass {} of {}",
                        active.subpass,
                        rp.info.subpasses.len()
                    ),
                );
            }

            outgoing.extend(
                rp.info
                    .dependencies
                    .iter()
                    .filter(|dependency| dependency.src.is_some() && dependency.dst.is_none())
                    .map(|dependency| SyncInfo {
                        src_stages: dependency.src_stages,
                        dst_stages: dependency.dst_stages,
                        memory_barriers: vec![MemoryBarrier {
                            src_access: dependency.src_access,
                            dst_access: dependency.dst_access,
                        }],
                        ..SyncInfo::default()
                    }),
            );

            let views = active
                .framebuffer
                .and_then(|framebuffer| self.objects.framebuffers.state(framebuffer))
                .map(|framebuffer| framebuffer.info.attachments.as_slice())
                .unwrap_or(&[]);
            for (attachment, &view) in rp.info.attachments.iter().zip(views) {
                if let Some(view) = self.objects.image_views.state(view) {
                    let valid = attachment.store_op == AttachmentStoreOp::Store;
                    stores.push((ObjectId::image(view.info.image), valid));
                }
            }
        }

        if let Some(state) = self.state_mut(cb) {
            let seq = state.next_seq();
            for sync in &outgoing {
                hazard::apply_sync_all(&mut state.commands, seq, sync);
            }
            state
                .memory_checks
                .try_reserve(stores.len())
                .map_err(|_| OutOfMemory)?;
            for (image, valid) in stores {
                state.memory_checks.push(store_check(image, valid));
            }
            state.active_render_pass = None;
        }

        verdict |= self.commit(cb, CmdType::EndRenderPass, Synth::default(), None)?;
        Ok(verdict)
    }

    fn execute_commands(&mut self, cb: Handle, command_buffers: &[Handle]) -> Result<Verdict, OutOfMemory> {
        let id = ObjectId::command_buffer(cb);
        let (level, inside) = match self.state(cb) {
            Some(state) => (state.level, state.active_render_pass.is_some()),
            None => return Ok(Verdict::Proceed),
        };

        let mut verdict = Verdict::Proceed;
        if level != CommandBufferLevel::Primary {
            verdict |= self.report(
                ErrorCode::ExecuteCommandsNotSecondary,
                id,
                "Secondary command buffers cannot execute other command buffers".to_owned(),
            );
        }

        for &secondary in command_buffers {
            let secondary_id = ObjectId::command_buffer(secondary);
            let state = match self.state(secondary) {
                Some(state) => state,
                None => {
                    verdict |= self.unknown(secondary_id);
                    continue;
                }
            };

            if state.level != CommandBufferLevel::Secondary {
                verdict |= self.report(
                    ErrorCode::ExecuteCommandsNotSecondary,
                    secondary_id,
                    "Only secondary command buffers can be executed".to_owned(),
                );
            }
            if !self.config.disabled.command_buffer_state {
                verdict |= self.check_executable(secondary);
            }
            if !self.config.disabled.render_pass
                && inside
                && !state.usage.contains(CommandBufferUsage::RENDER_PASS_CONTINUE)
            {
                verdict |= self.report(
                    ErrorCode::RenderPassScope,
                    secondary_id,
                    "Secondary executed inside a render pass must continue it".to_owned(),
                );
            }
        }
        if verdict.is_skip() {
            return Ok(verdict);
        }

        for &secondary in command_buffers {
            let linked: Vec<ObjectId> = match self.state(secondary) {
                Some(state) => state.object_bindings.iter().copied().collect(),
                None => continue,
            };
            self.objects.bind(ObjectId::command_buffer(secondary), cb)?;
            for object in linked {
                self.objects.bind(object, cb)?;
            }

            if let Some(state) = self.state_mut(cb) {
                state.secondaries.try_reserve(1).map_err(|_| OutOfMemory)?;
                state.secondaries.push(secondary);
                for kind in DeferredKind::ALL {
                    let checks = state.deferred_mut(kind);
                    checks.try_reserve(1).map_err(|_| OutOfMemory)?;
                    checks.push(Box::new(move |context: &mut SubmitContext<'_>| {
                        run_deferred_kind(context, secondary, kind)
                    }));
                }
            }
        }

        // Bound state is undefined after secondaries execute.
        if let Some(state) = self.state_mut(cb) {
            for bound in &mut state.last_bound {
                bound.reset();
            }
            state.index_buffer = None;
            state.vertex_buffers.clear();
            state.dynamic_state = DynamicStateFlags::empty();
        }

        verdict |= self.commit(cb, CmdType::ExecuteCommands, Synth::default(), None)?;
        Ok(verdict)
    }
}

/// Bytes read by an indirect draw with `count` records of `record` bytes each.
fn indirect_size(count: u32, stride: u32, record: u64) -> u64 {
    match count {
        0 => record,
        count => (count as u64 - 1) * stride as u64 + record,
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            command_buffer::{BeginInfo, CommandPoolInfo},
            config::ValidationConfig,
            pipeline::Canonicalizer,
            report::{ReportLog, Reporter},
            resource::{BufferInfo, BufferUsage, ResourceFlags},
        },
        std::sync::Arc,
    };

    const CB: Handle = Handle(100);
    const MEMORY: Handle = Handle(50);

    fn device() -> (DeviceState, Arc<ReportLog>) {
        let log = Arc::new(ReportLog::new());
        let mut device = DeviceState::new(
            ValidationConfig::default(),
            Reporter::new(log.clone()),
            Arc::new(Canonicalizer::new()),
        );
        device
            .create_command_pool(
                Handle(1),
                CommandPoolInfo {
                    queue_family: 0,
                    capabilities: QueueCapabilityFlags::all(),
                    reset_command_buffer: true,
                },
            )
            .unwrap();
        device
            .allocate_command_buffers(Handle(1), CommandBufferLevel::Primary, &[CB])
            .unwrap();
        device.allocate_memory(MEMORY, 1024, None).unwrap();
        (device, log)
    }

    fn buffer(device: &mut DeviceState, handle: u64, offset: u64) -> Handle {
        let handle = Handle(handle);
        device
            .create_buffer(
                handle,
                BufferInfo {
                    size: 64,
                    usage: BufferUsage::TRANSFER_SRC | BufferUsage::TRANSFER_DST,
                    flags: ResourceFlags::empty(),
                },
            )
            .unwrap();
        device
            .bind_memory(ObjectId::buffer(handle), MEMORY, offset)
            .unwrap();
        handle
    }

    fn begin(device: &mut DeviceState) {
        let verdict = device
            .begin_command_buffer(
                CB,
                BeginInfo {
                    usage: CommandBufferUsage::empty(),
                    inheritance: None,
                },
            )
            .unwrap();
        assert_eq!(verdict, Verdict::Proceed);
    }

    fn fill(buffer: Handle) -> Cmd<'static> {
        Cmd::FillBuffer {
            buffer,
            offset: 0,
            size: 64,
        }
    }

    #[test]
    fn copy_after_fill_needs_barrier() {
        let (mut device, log) = device();
        let src = buffer(&mut device, 10, 0);
        let dst = buffer(&mut device, 11, 128);
        begin(&mut device);

        device.record(CB, &fill(src)).unwrap();
        let regions = [BufferCopy {
            src_offset: 0,
            dst_offset: 0,
            size: 64,
        }];
        let copy = Cmd::CopyBuffer {
            src_buffer: src,
            dst_buffer: dst,
            regions: &regions,
        };
        device.record(CB, &copy).unwrap();
        assert_eq!(log.count(ErrorCode::ReadAfterWrite), 1);

        device
            .record(
                CB,
                &Cmd::PipelineBarrier {
                    src_stages: PipelineStageFlags::TRANSFER,
                    dst_stages: PipelineStageFlags::TRANSFER,
                    memory: &[],
                    buffers: &[],
                    images: &[],
                },
            )
            .unwrap();
        device.record(CB, &copy).unwrap();
        assert_eq!(log.count(ErrorCode::ReadAfterWrite), 1);
    }

    #[test]
    fn commands_outside_recording_are_skipped() {
        let (mut device, log) = device();
        let src = buffer(&mut device, 10, 0);

        let verdict = device.record(CB, &fill(src)).unwrap();
        assert!(verdict.is_skip());
        assert!(log.contains(ErrorCode::CommandBufferNotRecording));
        assert_eq!(
            device.objects().command_buffers.state(CB).unwrap().next_seq(),
            0
        );
    }

    #[test]
    fn unbound_buffer_is_reported() {
        let (mut device, log) = device();
        device
            .create_buffer(
                Handle(12),
                BufferInfo {
                    size: 16,
                    usage: BufferUsage::TRANSFER_DST,
                    flags: ResourceFlags::empty(),
                },
            )
            .unwrap();
        begin(&mut device);

        device.record(CB, &fill(Handle(12))).unwrap();
        assert!(log.contains(ErrorCode::MemoryNotBound));
    }

    #[test]
    fn draw_outside_render_pass_without_pipeline() {
        let (mut device, log) = device();
        begin(&mut device);

        device
            .record(
                CB,
                &Cmd::Draw {
                    vertex_count: 3,
                    instance_count: 1,
                },
            )
            .unwrap();
        assert!(log.contains(ErrorCode::RenderPassScope));
        assert!(log.contains(ErrorCode::PipelineNotBound));
    }

    #[test]
    fn transfer_pool_cannot_dispatch() {
        let (mut device, log) = device();
        device
            .create_command_pool(
                Handle(2),
                CommandPoolInfo {
                    queue_family: 1,
                    capabilities: QueueCapabilityFlags::TRANSFER,
                    reset_command_buffer: false,
                },
            )
            .unwrap();
        device
            .allocate_command_buffers(Handle(2), CommandBufferLevel::Primary, &[Handle(101)])
            .unwrap();
        device
            .begin_command_buffer(
                Handle(101),
                BeginInfo {
                    usage: CommandBufferUsage::empty(),
                    inheritance: None,
                },
            )
            .unwrap();

        device
            .record(Handle(101), &Cmd::Dispatch { x: 1, y: 1, z: 1 })
            .unwrap();
        assert!(log.contains(ErrorCode::QueueCapability));
    }

    #[test]
    fn queries_track_activity() {
        let (mut device, log) = device();
        device
            .create_query_pool(Handle(7), crate::queue::QueryPoolInfo { count: 2 })
            .unwrap();
        begin(&mut device);

        let begin_query = Cmd::BeginQuery {
            pool: Handle(7),
            query: 0,
        };
        device.record(CB, &begin_query).unwrap();
        device.record(CB, &begin_query).unwrap();
        assert!(log.contains(ErrorCode::QueryAlreadyActive));

        device
            .record(
                CB,
                &Cmd::EndQuery {
                    pool: Handle(7),
                    query: 1,
                },
            )
            .unwrap();
        assert!(log.contains(ErrorCode::QueryNotActive));

        device
            .record(
                CB,
                &Cmd::ResetQueryPool {
                    pool: Handle(7),
                    first: 1,
                    count: 2,
                },
            )
            .unwrap();
        assert!(log.contains(ErrorCode::QueryOutOfRange));

        device.end_command_buffer(CB).unwrap();
        assert!(log.contains(ErrorCode::QueryStillActive));
    }

    #[test]
    fn indirect_size_covers_last_record() {
        assert_eq!(indirect_size(0, 16, 16), 16);
        assert_eq!(indirect_size(1, 32, 16), 16);
        assert_eq!(indirect_size(3, 32, 20), 84);
    }
}
