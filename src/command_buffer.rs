//! Command buffer recording state.

use {
    crate::{
        command::Command,
        handle::{Handle, ObjectId},
        hazard::AccessIndex,
        pipeline::{BindPoint, CompatId, DynamicStateFlags},
        queue::{QueryObject, QueueCapabilityFlags, SubmitContext},
        report::Verdict,
    },
    hashbrown::HashSet,
    std::{
        collections::BTreeMap,
        fmt::{self, Debug},
    },
};

/// Lifecycle state of a command buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CbState {
    /// Allocated or reset.
    New,
    Recording,
    Recorded,

    /// An object referenced by the finished command buffer was destroyed or modified.
    InvalidComplete,

    /// An object referenced by the command buffer was destroyed or modified
    /// while it was being recorded.
    InvalidIncomplete,
}

impl CbState {
    pub fn is_invalid(self) -> bool {
        matches!(self, CbState::InvalidComplete | CbState::InvalidIncomplete)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub enum CommandBufferLevel {
    Primary,
    Secondary,
}

bitflags::bitflags! {
    #[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
    pub struct CommandBufferUsage: u32 {
        /// Command buffer is submitted once and then reset or freed.
        const ONE_TIME_SUBMIT = 0x1;

        /// Secondary command buffer is executed entirely inside a render pass.
        const RENDER_PASS_CONTINUE = 0x2;

        /// Command buffer may be resubmitted while pending.
        const SIMULTANEOUS_USE = 0x4;
    }
}

/// Render pass state inherited by secondary command buffers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub struct Inheritance {
    pub render_pass: Handle,
    pub subpass: u32,
    pub framebuffer: Option<Handle>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub struct BeginInfo {
    pub usage: CommandBufferUsage,
    pub inheritance: Option<Inheritance>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub struct CommandPoolInfo {
    pub queue_family: u32,
    pub capabilities: QueueCapabilityFlags,

    /// Command buffers may be reset individually.
    pub reset_command_buffer: bool,
}

#[derive(Debug)]
pub struct CommandPoolState {
    pub info: CommandPoolInfo,
    pub command_buffers: Vec<Handle>,
}

/// Descriptor set bound at one set index.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BoundSet {
    pub set: Handle,

    /// Compatibility of the layout the set was bound with, at this index.
    pub compat: CompatId,
}

/// State bound to one bind point.
#[derive(Clone, Debug, Default)]
pub struct LastBound {
    pub pipeline: Option<Handle>,

    /// Compatibility ids of the bound pipeline's layout.
    pub pipeline_compat: Vec<CompatId>,
    pub sets: Vec<Option<BoundSet>>,
}

impl LastBound {
    pub fn reset(&mut self) {
        *self = LastBound::default();
    }
}

/// Render pass instance being recorded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActiveRenderPass {
    pub render_pass: Handle,
    pub framebuffer: Option<Handle>,
    pub subpass: usize,

    /// Draw was recorded in the current subpass.
    pub drawn: bool,

    /// Pipeline barrier was recorded after the last draw.
    pub barrier_after_draw: bool,

    /// Inherited by a secondary command buffer rather than begun in it.
    pub inherited: bool,
}

/// Check that can only be performed when the command buffer is submitted.
pub type DeferredCheck = Box<dyn Fn(&mut SubmitContext<'_>) -> Verdict + Send>;

/// Lists of deferred checks kept by a command buffer.
/// Checks run in recording order within each list.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeferredKind {
    Memory,
    Query,
    Event,
}

impl DeferredKind {
    pub const ALL: [DeferredKind; 3] = [DeferredKind::Memory, DeferredKind::Query, DeferredKind::Event];
}

pub struct CommandBufferState {
    pub pool: Handle,
    pub level: CommandBufferLevel,
    pub state: CbState,
    pub usage: CommandBufferUsage,
    pub inheritance: Option<Inheritance>,

    /// Number of accepted submissions since the last reset.
    pub submit_count: u64,

    pub commands: Vec<Command>,
    pub access_index: AccessIndex,

    /// Objects referenced by recorded commands.
    pub object_bindings: HashSet<ObjectId>,

    /// Objects whose destruction or modification invalidated the command buffer.
    pub broken_bindings: Vec<ObjectId>,

    /// Secondary command buffers executed by this one.
    pub secondaries: Vec<Handle>,

    pub last_bound: [LastBound; 2],
    pub index_buffer: Option<Handle>,
    pub vertex_buffers: BTreeMap<u32, (Handle, u64)>,
    pub dynamic_state: DynamicStateFlags,
    pub active_render_pass: Option<ActiveRenderPass>,
    pub active_queries: HashSet<QueryObject>,

    /// Sequence number of the last `SetEvent` of each event.
    pub set_events: BTreeMap<Handle, u32>,

    pub memory_checks: Vec<DeferredCheck>,
    pub query_updates: Vec<DeferredCheck>,
    pub event_updates: Vec<DeferredCheck>,
}

impl Debug for CommandBufferState {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("CommandBufferState")
            .field("pool", &self.pool)
            .field("level", &self.level)
            .field("state", &self.state)
            .field("usage", &self.usage)
            .field("submit_count", &self.submit_count)
            .field("commands", &self.commands.len())
            .field("object_bindings", &self.object_bindings)
            .field("broken_bindings", &self.broken_bindings)
            .field("active_render_pass", &self.active_render_pass)
            .finish_non_exhaustive()
    }
}

impl CommandBufferState {
    pub fn new(pool: Handle, level: CommandBufferLevel) -> Self {
        CommandBufferState {
            pool,
            level,
            state: CbState::New,
            usage: CommandBufferUsage::empty(),
            inheritance: None,
            submit_count: 0,
            commands: Vec::new(),
            access_index: AccessIndex::new(),
            object_bindings: HashSet::new(),
            broken_bindings: Vec::new(),
            secondaries: Vec::new(),
            last_bound: Default::default(),
            index_buffer: None,
            vertex_buffers: BTreeMap::new(),
            dynamic_state: DynamicStateFlags::empty(),
            active_render_pass: None,
            active_queries: HashSet::new(),
            set_events: BTreeMap::new(),
            memory_checks: Vec::new(),
            query_updates: Vec::new(),
            event_updates: Vec::new(),
        }
    }

    /// Clears everything recorded.
    /// Object bindings must be dropped through the registry beforehand.
    pub(crate) fn reset(&mut self) {
        *self = CommandBufferState::new(self.pool, self.level);
    }

    pub fn last_bound(&self, bind_point: BindPoint) -> &LastBound {
        &self.last_bound[bind_point.index()]
    }

    pub fn last_bound_mut(&mut self, bind_point: BindPoint) -> &mut LastBound {
        &mut self.last_bound[bind_point.index()]
    }

    /// Sequence number for the next recorded command.
    pub fn next_seq(&self) -> u32 {
        self.commands.len() as u32
    }

    pub fn last_command(&self) -> Option<&Command> {
        self.commands.last()
    }

    pub fn deferred_mut(&mut self, kind: DeferredKind) -> &mut Vec<DeferredCheck> {
        match kind {
            DeferredKind::Memory => &mut self.memory_checks,
            DeferredKind::Query => &mut self.query_updates,
            DeferredKind::Event => &mut self.event_updates,
        }
    }

    /// Appends the command, indexing its accesses.
    pub fn push_command(&mut self, command: Command) {
        self.access_index.insert(self.commands.len(), &command);
        self.commands.push(command);
    }
}

#[cfg(test)]
mod tests {
    use {super::*, crate::command::CmdType};

    #[test]
    fn reset_keeps_pool_and_level() {
        let mut cb = CommandBufferState::new(Handle(3), CommandBufferLevel::Secondary);
        cb.state = CbState::Recorded;
        cb.submit_count = 2;
        cb.push_command(Command::new(CmdType::Draw, 0));
        cb.memory_checks.push(Box::new(|_| Verdict::Proceed));

        cb.reset();
        assert_eq!(cb.state, CbState::New);
        assert_eq!(cb.pool, Handle(3));
        assert_eq!(cb.level, CommandBufferLevel::Secondary);
        assert_eq!(cb.next_seq(), 0);
        assert!(cb.memory_checks.is_empty());
    }

    #[test]
    fn invalid_states() {
        assert!(CbState::InvalidComplete.is_invalid());
        assert!(CbState::InvalidIncomplete.is_invalid());
        assert!(!CbState::Recorded.is_invalid());
    }
}
