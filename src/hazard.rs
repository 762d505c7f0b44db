//! Synchronization hazard detection within one command buffer.
//!
//! Every access starts unsynchronized. Barriers recorded later extend
//! `dst_stages` of the accesses in their first scope and mark them with the
//! kind of barrier seen. A later access is safe with respect to an earlier one
//! if the earlier access is visible and its `dst_stages` cover the later
//! access's stages.

use {
    crate::{
        access::AccessFlags,
        command::{locations_overlap, CmdType, Command, MemoryAccess, SyncInfo},
        handle::{Handle, ObjectId},
        memory::MemoryBinding,
        report::ErrorCode,
    },
    hashbrown::HashMap,
    smallvec::SmallVec,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HazardKind {
    ReadAfterWrite,
    WriteAfterRead,
    WriteAfterWrite,
}

impl HazardKind {
    fn of(earlier: &MemoryAccess, later: &MemoryAccess) -> Option<Self> {
        match (earlier.write, later.write) {
            (true, true) => Some(HazardKind::WriteAfterWrite),
            (true, false) => Some(HazardKind::ReadAfterWrite),
            (false, true) => Some(HazardKind::WriteAfterRead),
            (false, false) => None,
        }
    }

    pub fn error_code(self) -> ErrorCode {
        match self {
            HazardKind::ReadAfterWrite => ErrorCode::ReadAfterWrite,
            HazardKind::WriteAfterRead => ErrorCode::WriteAfterRead,
            HazardKind::WriteAfterWrite => ErrorCode::WriteAfterWrite,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            HazardKind::ReadAfterWrite => "read-after-write",
            HazardKind::WriteAfterRead => "write-after-read",
            HazardKind::WriteAfterWrite => "write-after-write",
        }
    }
}

/// Unsynchronized pair of accesses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Hazard {
    pub kind: HazardKind,
    pub earlier_seq: u32,
    pub earlier_ty: CmdType,
    pub earlier_resource: Option<ObjectId>,
    pub resource: Option<ObjectId>,
    pub location: MemoryBinding,
}

/// Returns `true` if `later` is safely ordered after `earlier`.
pub fn is_synchronized(earlier: &MemoryAccess, later: &MemoryAccess) -> bool {
    if !earlier.write && !later.write {
        return true;
    }
    earlier.visible() && earlier.dst_stages.contains(later.src_stages)
}

/// Applies barrier to an access recorded before it.
///
/// Returns `true` if the access is in the barrier's first scope.
pub fn apply_sync(access: &mut MemoryAccess, seq: u32, sync: &SyncInfo) -> bool {
    if !sync
        .src_stages
        .expand_first_scope()
        .intersects(access.src_stages)
    {
        return false;
    }

    access.pipe_barrier = true;
    access.dst_stages |= sync.dst_stages.expand_second_scope();
    if !access.sync_commands.contains(&seq) {
        access.sync_commands.push(seq);
    }

    // Memory barriers with an empty second access scope make nothing visible.
    for barrier in &sync.memory_barriers {
        make_available(access, barrier.dst_access);
    }
    for region in &sync.regions {
        if locations_overlap(&region.location, &access.location) {
            make_available(access, region.dst_access);
        }
    }
    true
}

fn make_available(access: &mut MemoryAccess, dst_access: AccessFlags) {
    let dst_access = dst_access.expand();
    if !dst_access.is_empty() {
        access.mem_barrier = true;
        access.dst_access |= dst_access;
    }
}

/// Accesses of a command buffer indexed by allocation.
#[derive(Clone, Debug, Default)]
pub struct AccessIndex {
    by_memory: HashMap<Handle, Vec<(usize, usize)>>,
}

impl AccessIndex {
    pub fn new() -> Self {
        AccessIndex::default()
    }

    /// Indexes accesses of the command at `index` in the command list.
    pub fn insert(&mut self, index: usize, command: &Command) {
        for (access, memory_access) in command.accesses.iter().enumerate() {
            self.by_memory
                .entry(memory_access.location.memory)
                .or_default()
                .push((index, access));
        }
    }

    pub fn clear(&mut self) {
        self.by_memory.clear();
    }

    /// Positions of accesses to the allocation, in recording order.
    pub fn accesses(&self, memory: Handle) -> &[(usize, usize)] {
        self.by_memory.get(&memory).map_or(&[], Vec::as_slice)
    }
}

/// Finds hazards between `command` and commands recorded before it.
///
/// At most one hazard of each kind is returned.
pub fn detect(commands: &[Command], index: &AccessIndex, command: &Command) -> SmallVec<[Hazard; 3]> {
    let mut hazards = SmallVec::<[Hazard; 3]>::new();

    for later in &command.accesses {
        for &(cmd, access) in index.accesses(later.location.memory) {
            let prior = &commands[cmd];
            let earlier = &prior.accesses[access];

            let kind = match HazardKind::of(earlier, later) {
                Some(kind) => kind,
                None => continue,
            };
            if hazards.iter().any(|hazard| hazard.kind == kind) {
                continue;
            }
            if !earlier.overlaps(later) || is_synchronized(earlier, later) {
                continue;
            }

            hazards.push(Hazard {
                kind,
                earlier_seq: prior.seq,
                earlier_ty: prior.ty,
                earlier_resource: earlier.resource,
                resource: later.resource,
                location: later.location,
            });
        }
    }
    hazards
}

/// Applies barrier to every access recorded by `commands`.
pub fn apply_sync_all(commands: &mut [Command], seq: u32, sync: &SyncInfo) {
    for command in commands {
        for access in &mut command.accesses {
            apply_sync(access, seq, sync);
        }
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            access::AccessFlags,
            command::{BarrierRegion, CmdFlags, MemoryBarrier},
            stage::PipelineStageFlags,
        },
    };

    fn location(offset: u64, size: u64) -> MemoryBinding {
        MemoryBinding {
            memory: Handle(1),
            offset,
            size,
        }
    }

    fn command(ty: CmdType, seq: u32, write: bool, offset: u64) -> Command {
        let flags = if write { ty.write_flags() } else { ty.read_flags() };
        let mut command = Command::new(ty, seq);
        command.accesses.push(MemoryAccess::new(
            Some(ObjectId::buffer(Handle(10 + offset))),
            location(offset, 64),
            true,
            write,
            flags,
        ));
        command
    }

    fn barrier(src: PipelineStageFlags, dst: PipelineStageFlags) -> SyncInfo {
        SyncInfo {
            src_stages: src,
            dst_stages: dst,
            ..SyncInfo::default()
        }
    }

    fn record(commands: &mut Vec<Command>, index: &mut AccessIndex, command: Command) -> SmallVec<[Hazard; 3]> {
        let hazards = detect(commands, index, &command);
        index.insert(commands.len(), &command);
        commands.push(command);
        hazards
    }

    #[test]
    fn unsynchronized_read_after_write() {
        let mut commands = Vec::new();
        let mut index = AccessIndex::new();

        assert!(record(&mut commands, &mut index, command(CmdType::CopyBuffer, 0, true, 0)).is_empty());
        let hazards = record(&mut commands, &mut index, command(CmdType::CopyBuffer, 1, false, 32));
        assert_eq!(hazards.len(), 1);
        assert_eq!(hazards[0].kind, HazardKind::ReadAfterWrite);
        assert_eq!(hazards[0].earlier_seq, 0);
    }

    #[test]
    fn execution_barrier_makes_writes_visible() {
        let mut commands = Vec::new();
        let mut index = AccessIndex::new();
        record(&mut commands, &mut index, command(CmdType::CopyBuffer, 0, true, 0));

        let sync = barrier(PipelineStageFlags::TRANSFER, PipelineStageFlags::TRANSFER);
        apply_sync_all(&mut commands, 1, &sync);
        assert!(commands[0].accesses[0].visible());
        assert_eq!(commands[0].accesses[0].sync_commands.as_slice(), &[1]);

        assert!(record(&mut commands, &mut index, command(CmdType::CopyBuffer, 2, false, 0)).is_empty());
    }

    #[test]
    fn barrier_must_cover_later_stage() {
        let mut commands = Vec::new();
        let mut index = AccessIndex::new();
        record(&mut commands, &mut index, command(CmdType::CopyBuffer, 0, true, 0));

        let sync = barrier(PipelineStageFlags::TRANSFER, PipelineStageFlags::FRAGMENT_SHADER);
        apply_sync_all(&mut commands, 1, &sync);

        let hazards = record(&mut commands, &mut index, command(CmdType::CopyBuffer, 2, false, 0));
        assert_eq!(hazards[0].kind, HazardKind::ReadAfterWrite);
    }

    #[test]
    fn reads_need_memory_barrier() {
        let mut commands = Vec::new();
        let mut index = AccessIndex::new();
        record(&mut commands, &mut index, command(CmdType::CopyBuffer, 0, false, 0));

        let sync = barrier(PipelineStageFlags::TRANSFER, PipelineStageFlags::TRANSFER);
        apply_sync_all(&mut commands, 1, &sync);
        let hazards = record(&mut commands, &mut index, command(CmdType::FillBuffer, 2, true, 0));
        assert_eq!(hazards[0].kind, HazardKind::WriteAfterRead);

        let mut sync = barrier(PipelineStageFlags::TRANSFER, PipelineStageFlags::TRANSFER);
        sync.memory_barriers.push(MemoryBarrier {
            src_access: AccessFlags::TRANSFER_READ,
            dst_access: AccessFlags::TRANSFER_WRITE,
        });
        apply_sync_all(&mut commands, 3, &sync);
        assert!(record(&mut commands, &mut index, command(CmdType::FillBuffer, 4, true, 0)).is_empty());
    }

    #[test]
    fn region_barrier_applies_to_overlapping_accesses_only() {
        let mut commands = Vec::new();
        let mut index = AccessIndex::new();
        record(&mut commands, &mut index, command(CmdType::CopyBuffer, 0, false, 0));
        record(&mut commands, &mut index, command(CmdType::CopyBuffer, 1, false, 128));

        let mut sync = barrier(PipelineStageFlags::TRANSFER, PipelineStageFlags::TRANSFER);
        sync.regions.push(BarrierRegion {
            location: location(0, 64),
            dst_access: AccessFlags::TRANSFER_WRITE,
        });
        apply_sync_all(&mut commands, 2, &sync);

        assert!(commands[0].accesses[0].mem_barrier);
        assert!(!commands[1].accesses[0].mem_barrier);
    }

    #[test]
    fn empty_memory_barrier_hides_nothing() {
        let mut commands = Vec::new();
        let mut index = AccessIndex::new();
        record(&mut commands, &mut index, command(CmdType::CopyBuffer, 0, false, 0));

        let mut sync = barrier(PipelineStageFlags::TRANSFER, PipelineStageFlags::TRANSFER);
        sync.memory_barriers.push(MemoryBarrier {
            src_access: AccessFlags::TRANSFER_READ,
            dst_access: AccessFlags::empty(),
        });
        sync.regions.push(BarrierRegion {
            location: location(0, 64),
            dst_access: AccessFlags::empty(),
        });
        apply_sync_all(&mut commands, 1, &sync);
        assert!(!commands[0].accesses[0].mem_barrier);

        let hazards = record(&mut commands, &mut index, command(CmdType::FillBuffer, 2, true, 0));
        assert_eq!(hazards[0].kind, HazardKind::WriteAfterRead);
    }

    #[test]
    fn first_scope_filters_accesses() {
        let mut access = MemoryAccess::new(
            None,
            location(0, 4),
            true,
            true,
            CmdFlags {
                stages: PipelineStageFlags::COMPUTE_SHADER,
                access: AccessFlags::SHADER_WRITE,
            },
        );
        let sync = barrier(PipelineStageFlags::TRANSFER, PipelineStageFlags::TRANSFER);
        assert!(!apply_sync(&mut access, 1, &sync));

        let sync = barrier(PipelineStageFlags::BOTTOM_OF_PIPE, PipelineStageFlags::TOP_OF_PIPE);
        assert!(apply_sync(&mut access, 2, &sync));
        assert!(access.dst_stages.contains(PipelineStageFlags::COMMAND_STAGES));
    }
}
