//! Recorded commands and the memory accesses they make.

use {
    crate::{
        access::AccessFlags,
        handle::{Handle, ObjectId},
        memory::MemoryBinding,
        queue::QueueCapabilityFlags,
        stage::PipelineStageFlags,
    },
    smallvec::SmallVec,
};

/// Type tag of a recorded command.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub enum CmdType {
    BeginQuery,
    BeginRenderPass,
    BindDescriptorSets,
    BindIndexBuffer,
    BindPipeline,
    BindVertexBuffers,
    BlitImage,
    ClearAttachments,
    ClearColorImage,
    ClearDepthStencilImage,
    CopyBuffer,
    CopyBufferToImage,
    CopyImage,
    CopyImageToBuffer,
    CopyQueryPoolResults,
    Dispatch,
    DispatchIndirect,
    Draw,
    DrawIndexed,
    DrawIndexedIndirect,
    DrawIndirect,
    EndCommandBuffer,
    EndQuery,
    EndRenderPass,
    ExecuteCommands,
    FillBuffer,
    NextSubpass,
    PipelineBarrier,
    PushConstants,
    ResetEvent,
    ResetQueryPool,
    ResolveImage,
    SetDynamicState,
    SetEvent,
    UpdateBuffer,
    WaitEvents,
    WriteTimestamp,
}

/// Stage and access scope of one side of a command.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CmdFlags {
    pub stages: PipelineStageFlags,
    pub access: AccessFlags,
}

impl CmdFlags {
    pub const NONE: Self = CmdFlags {
        stages: PipelineStageFlags::empty(),
        access: AccessFlags::empty(),
    };

    const fn new(stages: PipelineStageFlags, access: AccessFlags) -> Self {
        CmdFlags { stages, access }
    }
}

/// Where a command may be recorded relative to render pass instances.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RenderPassScope {
    Inside,
    Outside,
    Both,
}

const TRANSFER_READ: CmdFlags = CmdFlags::new(PipelineStageFlags::TRANSFER, AccessFlags::TRANSFER_READ);
const TRANSFER_WRITE: CmdFlags = CmdFlags::new(PipelineStageFlags::TRANSFER, AccessFlags::TRANSFER_WRITE);
const GRAPHICS: CmdFlags = CmdFlags::new(PipelineStageFlags::GRAPHICS_STAGES, AccessFlags::empty());
const COMPUTE_WRITE: CmdFlags = CmdFlags::new(PipelineStageFlags::COMPUTE_SHADER, AccessFlags::SHADER_WRITE);

const DRAW_READ: CmdFlags = CmdFlags::new(
    PipelineStageFlags::from_bits_truncate(
        PipelineStageFlags::GRAPHICS_STAGES.bits()
            | PipelineStageFlags::VERTEX_INPUT.bits()
            | PipelineStageFlags::VERTEX_SHADER.bits(),
    ),
    AccessFlags::from_bits_truncate(
        AccessFlags::VERTEX_ATTRIBUTE_READ.bits() | AccessFlags::SHADER_READ.bits(),
    ),
);

const DRAW_INDIRECT_READ: CmdFlags = CmdFlags::new(
    DRAW_READ.stages,
    AccessFlags::from_bits_truncate(
        DRAW_READ.access.bits() | AccessFlags::INDIRECT_COMMAND_READ.bits(),
    ),
);

const DRAW_WRITE: CmdFlags = CmdFlags::new(PipelineStageFlags::GRAPHICS_STAGES, AccessFlags::SHADER_WRITE);

impl CmdType {
    /// Default read and write scopes of the command.
    ///
    /// Draws and dispatches refine these per resource when their accesses
    /// are synthesized.
    pub fn flags(self) -> [CmdFlags; 2] {
        match self {
            CmdType::BeginRenderPass | CmdType::NextSubpass | CmdType::EndRenderPass => {
                [GRAPHICS, CmdFlags::NONE]
            }
            CmdType::BlitImage
            | CmdType::CopyBuffer
            | CmdType::CopyBufferToImage
            | CmdType::CopyImage
            | CmdType::CopyImageToBuffer
            | CmdType::ResolveImage => [TRANSFER_READ, TRANSFER_WRITE],
            CmdType::ClearAttachments => [
                CmdFlags::NONE,
                CmdFlags::new(
                    PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                    AccessFlags::COLOR_ATTACHMENT_WRITE,
                ),
            ],
            CmdType::ClearColorImage
            | CmdType::ClearDepthStencilImage
            | CmdType::CopyQueryPoolResults
            | CmdType::FillBuffer
            | CmdType::UpdateBuffer => [CmdFlags::NONE, TRANSFER_WRITE],
            CmdType::Dispatch => [
                CmdFlags::new(PipelineStageFlags::COMPUTE_SHADER, AccessFlags::SHADER_READ),
                COMPUTE_WRITE,
            ],
            CmdType::DispatchIndirect => [
                CmdFlags::new(
                    PipelineStageFlags::from_bits_truncate(
                        PipelineStageFlags::COMPUTE_SHADER.bits()
                            | PipelineStageFlags::DRAW_INDIRECT.bits(),
                    ),
                    AccessFlags::from_bits_truncate(
                        AccessFlags::SHADER_READ.bits() | AccessFlags::INDIRECT_COMMAND_READ.bits(),
                    ),
                ),
                COMPUTE_WRITE,
            ],
            CmdType::Draw => [DRAW_READ, DRAW_WRITE],
            CmdType::DrawIndexed => [
                CmdFlags::new(
                    DRAW_READ.stages,
                    AccessFlags::from_bits_truncate(
                        DRAW_READ.access.bits() | AccessFlags::INDEX_READ.bits(),
                    ),
                ),
                DRAW_WRITE,
            ],
            CmdType::DrawIndirect => [DRAW_INDIRECT_READ, DRAW_WRITE],
            CmdType::DrawIndexedIndirect => [
                CmdFlags::new(
                    DRAW_INDIRECT_READ.stages,
                    AccessFlags::from_bits_truncate(
                        DRAW_INDIRECT_READ.access.bits() | AccessFlags::INDEX_READ.bits(),
                    ),
                ),
                DRAW_WRITE,
            ],
            CmdType::BeginQuery
            | CmdType::BindDescriptorSets
            | CmdType::BindIndexBuffer
            | CmdType::BindPipeline
            | CmdType::BindVertexBuffers
            | CmdType::EndCommandBuffer
            | CmdType::EndQuery
            | CmdType::ExecuteCommands
            | CmdType::PipelineBarrier
            | CmdType::PushConstants
            | CmdType::ResetEvent
            | CmdType::ResetQueryPool
            | CmdType::SetDynamicState
            | CmdType::SetEvent
            | CmdType::WaitEvents
            | CmdType::WriteTimestamp => [CmdFlags::NONE, CmdFlags::NONE],
        }
    }

    pub fn read_flags(self) -> CmdFlags {
        self.flags()[0]
    }

    pub fn write_flags(self) -> CmdFlags {
        self.flags()[1]
    }

    pub fn render_pass_scope(self) -> RenderPassScope {
        match self {
            CmdType::ClearAttachments
            | CmdType::Draw
            | CmdType::DrawIndexed
            | CmdType::DrawIndexedIndirect
            | CmdType::DrawIndirect
            | CmdType::EndRenderPass
            | CmdType::NextSubpass => RenderPassScope::Inside,
            CmdType::BeginRenderPass
            | CmdType::BlitImage
            | CmdType::ClearColorImage
            | CmdType::ClearDepthStencilImage
            | CmdType::CopyBuffer
            | CmdType::CopyBufferToImage
            | CmdType::CopyImage
            | CmdType::CopyImageToBuffer
            | CmdType::CopyQueryPoolResults
            | CmdType::Dispatch
            | CmdType::DispatchIndirect
            | CmdType::FillBuffer
            | CmdType::ResetEvent
            | CmdType::ResetQueryPool
            | CmdType::ResolveImage
            | CmdType::SetEvent
            | CmdType::UpdateBuffer => RenderPassScope::Outside,
            _ => RenderPassScope::Both,
        }
    }

    /// Capabilities the queue family of the command pool must have.
    pub fn required_capabilities(self) -> QueueCapabilityFlags {
        match self {
            CmdType::BeginRenderPass
            | CmdType::BindIndexBuffer
            | CmdType::BindVertexBuffers
            | CmdType::BlitImage
            | CmdType::ClearAttachments
            | CmdType::ClearDepthStencilImage
            | CmdType::Draw
            | CmdType::DrawIndexed
            | CmdType::DrawIndexedIndirect
            | CmdType::DrawIndirect
            | CmdType::EndRenderPass
            | CmdType::NextSubpass
            | CmdType::ResolveImage
            | CmdType::SetDynamicState => QueueCapabilityFlags::GRAPHICS,
            CmdType::Dispatch | CmdType::DispatchIndirect => QueueCapabilityFlags::COMPUTE,
            _ => QueueCapabilityFlags::TRANSFER,
        }
    }

    pub fn is_draw(self) -> bool {
        matches!(
            self,
            CmdType::Draw | CmdType::DrawIndexed | CmdType::DrawIndexedIndirect | CmdType::DrawIndirect
        )
    }

    pub fn is_dispatch(self) -> bool {
        matches!(self, CmdType::Dispatch | CmdType::DispatchIndirect)
    }
}

/// One memory access made by a recorded command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemoryAccess {
    /// Bounds are exact. Conservative accesses cover the whole resource.
    pub precise: bool,
    pub write: bool,

    /// Resource the access is made through.
    pub resource: Option<ObjectId>,
    pub location: MemoryBinding,

    /// Scope of the access itself.
    pub src_stages: PipelineStageFlags,
    pub src_access: AccessFlags,

    /// Scope made safe by synchronization recorded after the access.
    pub dst_stages: PipelineStageFlags,
    pub dst_access: AccessFlags,

    /// A memory barrier covering the access was recorded.
    pub mem_barrier: bool,

    /// An execution barrier covering the access was recorded.
    pub pipe_barrier: bool,

    /// Sequence numbers of synchronization commands applied to the access.
    pub sync_commands: SmallVec<[u32; 2]>,
}

impl MemoryAccess {
    pub fn new(
        resource: Option<ObjectId>,
        location: MemoryBinding,
        precise: bool,
        write: bool,
        flags: CmdFlags,
    ) -> Self {
        MemoryAccess {
            precise,
            write,
            resource,
            location,
            src_stages: flags.stages.concrete(),
            src_access: flags.access,
            dst_stages: PipelineStageFlags::empty(),
            dst_access: AccessFlags::empty(),
            mem_barrier: false,
            pipe_barrier: false,
            sync_commands: SmallVec::new(),
        }
    }

    /// Access was made visible to later accesses within `dst_stages`.
    pub fn visible(&self) -> bool {
        self.mem_barrier || (self.pipe_barrier && self.write)
    }

    /// Accesses may touch the same bytes.
    pub fn overlaps(&self, other: &MemoryAccess) -> bool {
        if !self.precise || !other.precise {
            if self.resource.is_some() && self.resource == other.resource {
                return true;
            }
        }
        locations_overlap(&self.location, &other.location)
    }
}

pub fn locations_overlap(a: &MemoryBinding, b: &MemoryBinding) -> bool {
    a.memory == b.memory && a.offset < b.end() && b.offset < a.end()
}

/// Global memory barrier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub struct MemoryBarrier {
    pub src_access: AccessFlags,
    pub dst_access: AccessFlags,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub struct BufferMemoryBarrier {
    pub buffer: Handle,
    pub offset: u64,
    pub size: u64,
    pub src_access: AccessFlags,
    pub dst_access: AccessFlags,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub struct ImageMemoryBarrier {
    pub image: Handle,
    pub src_access: AccessFlags,
    pub dst_access: AccessFlags,
}

/// Memory region named by a resource barrier, resolved at record time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BarrierRegion {
    pub location: MemoryBinding,
    pub dst_access: AccessFlags,
}

/// Synchronization carried by barrier and event commands.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SyncInfo {
    pub src_stages: PipelineStageFlags,
    pub dst_stages: PipelineStageFlags,
    pub memory_barriers: Vec<MemoryBarrier>,
    pub buffer_barriers: Vec<BufferMemoryBarrier>,
    pub image_barriers: Vec<ImageMemoryBarrier>,

    /// Memory regions of buffer and image barriers.
    pub regions: Vec<BarrierRegion>,

    /// Events waited upon.
    pub events: Vec<Handle>,
}

impl SyncInfo {
    /// Carries at least one memory barrier of any kind.
    pub fn has_memory_barriers(&self) -> bool {
        !self.memory_barriers.is_empty()
            || !self.buffer_barriers.is_empty()
            || !self.image_barriers.is_empty()
    }
}

/// One recorded command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Command {
    pub ty: CmdType,
    pub seq: u32,
    pub accesses: Vec<MemoryAccess>,
    pub sync: Option<SyncInfo>,
}

impl Command {
    pub fn new(ty: CmdType, seq: u32) -> Self {
        Command {
            ty,
            seq,
            accesses: Vec::new(),
            sync: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn location(offset: u64, size: u64) -> MemoryBinding {
        MemoryBinding {
            memory: Handle(1),
            offset,
            size,
        }
    }

    #[test]
    fn table_has_transfer_scopes() {
        let [read, write] = CmdType::CopyBuffer.flags();
        assert_eq!(read.stages, PipelineStageFlags::TRANSFER);
        assert_eq!(write.access, AccessFlags::TRANSFER_WRITE);
        assert_eq!(CmdType::FillBuffer.read_flags(), CmdFlags::NONE);
        assert!(CmdType::DrawIndexed
            .read_flags()
            .access
            .contains(AccessFlags::INDEX_READ));
    }

    #[test]
    fn scopes_and_capabilities() {
        assert_eq!(CmdType::Draw.render_pass_scope(), RenderPassScope::Inside);
        assert_eq!(CmdType::CopyBuffer.render_pass_scope(), RenderPassScope::Outside);
        assert_eq!(CmdType::PipelineBarrier.render_pass_scope(), RenderPassScope::Both);
        assert_eq!(
            CmdType::Dispatch.required_capabilities(),
            QueueCapabilityFlags::COMPUTE
        );
    }

    #[test]
    fn visibility_rule() {
        let mut access = MemoryAccess::new(None, location(0, 64), true, true, TRANSFER_WRITE);
        assert!(!access.visible());
        access.pipe_barrier = true;
        assert!(access.visible());

        access.write = false;
        assert!(!access.visible());
        access.mem_barrier = true;
        assert!(access.visible());
    }

    #[test]
    fn imprecise_accesses_overlap_same_resource() {
        let buffer = Some(ObjectId::buffer(Handle(5)));
        let a = MemoryAccess::new(buffer, location(0, 16), true, true, TRANSFER_WRITE);
        let mut b = MemoryAccess::new(buffer, location(16, 16), true, false, TRANSFER_READ);
        assert!(!a.overlaps(&b));
        b.precise = false;
        assert!(a.overlaps(&b));
    }
}
