//! Memory binding tracker.
//!
//! Every allocation keeps the ranges bound into it,
//! keyed by resource and start offset so that sparse resources
//! may bind several ranges of the same allocation.

use {
    crate::{
        handle::{Handle, ObjectId, ObjectType},
        registry::Objects,
        resource::ResourceFlags,
        OutOfMemory,
    },
    hashbrown::{HashMap, HashSet},
    smallvec::SmallVec,
};

/// Size value that means "up to the end of the allocation".
pub const WHOLE_SIZE: u64 = !0;

/// Allocation, offset and size triple.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub struct MemoryBinding {
    pub memory: Handle,
    pub offset: u64,
    pub size: u64,
}

impl MemoryBinding {
    pub fn end(&self) -> u64 {
        self.offset.saturating_add(self.size)
    }
}

/// Memory binding state of a buffer or image.
#[derive(Debug)]
pub struct Bindable {
    pub sparse: bool,
    pub linear: bool,
    pub aliasable: bool,

    /// Memory requirement of the resource.
    pub size: u64,

    binding: Option<MemoryBinding>,
    sparse_bindings: SmallVec<[MemoryBinding; 4]>,

    /// Distinct allocations backing the resource.
    bound_memory: HashSet<Handle>,
}

impl Bindable {
    pub fn new(flags: ResourceFlags, linear: bool, size: u64) -> Self {
        Bindable {
            sparse: flags.is_sparse(),
            linear,
            aliasable: flags.is_aliasable(),
            size,
            binding: None,
            sparse_bindings: SmallVec::new(),
            bound_memory: HashSet::new(),
        }
    }

    pub fn binding(&self) -> Option<&MemoryBinding> {
        self.binding.as_ref()
    }

    pub fn sparse_bindings(&self) -> &[MemoryBinding] {
        &self.sparse_bindings
    }

    pub fn bindings(&self) -> impl Iterator<Item = &MemoryBinding> + '_ {
        self.binding.iter().chain(self.sparse_bindings.iter())
    }

    pub fn bound_memory(&self) -> &HashSet<Handle> {
        &self.bound_memory
    }

    pub fn is_bound(&self) -> bool {
        !self.bound_memory.is_empty()
    }

    fn update_bound_memory(&mut self) {
        self.bound_memory.clear();
        let memory = self
            .binding
            .iter()
            .chain(self.sparse_bindings.iter())
            .map(|binding| binding.memory);
        self.bound_memory.extend(memory);
    }
}

/// Identifies a range within its allocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RangeKey {
    pub resource: ObjectId,
    pub start: u64,
}

/// Byte range of an allocation bound to one resource.
#[derive(Debug)]
pub struct MemoryRange {
    pub resource: ObjectId,
    pub memory: Handle,
    pub linear: bool,
    pub aliasable: bool,

    /// Content is known to be initialized.
    pub valid: bool,

    pub start: u64,
    pub size: u64,
    pub end: u64,

    /// Ranges of the same allocation this one overlaps.
    pub aliases: HashSet<RangeKey>,
}

impl MemoryRange {
    pub fn key(&self) -> RangeKey {
        RangeKey {
            resource: self.resource,
            start: self.start,
        }
    }

    pub fn location(&self) -> MemoryBinding {
        MemoryBinding {
            memory: self.memory,
            offset: self.start,
            size: self.size,
        }
    }
}

/// Tests whether two ranges of one allocation overlap.
///
/// End offsets are exclusive. Ranges of resources with different
/// linearity are widened to `granularity` before the test.
pub fn ranges_intersect(a: &MemoryRange, b: &MemoryRange, granularity: u64) -> bool {
    if a.memory != b.memory {
        return false;
    }

    let (mut a_start, mut a_end, mut b_start, mut b_end) = (a.start, a.end, b.start, b.end);
    if a.linear != b.linear && granularity > 1 {
        a_start = align_down(a_start, granularity);
        b_start = align_down(b_start, granularity);
        a_end = align_up(a_end, granularity);
        b_end = align_up(b_end, granularity);
    }

    a_start < b_end && b_start < a_end
}

fn align_down(value: u64, granularity: u64) -> u64 {
    value - value % granularity
}

fn align_up(value: u64, granularity: u64) -> u64 {
    match value % granularity {
        0 => value,
        rem => value.saturating_add(granularity - rem),
    }
}

/// State of one device memory allocation.
#[derive(Debug)]
pub struct MemoryAllocation {
    pub size: u64,

    /// Resource the allocation is dedicated to.
    pub dedicated: Option<ObjectId>,

    /// Mapped memory makes every range valid.
    pub global_valid: bool,

    /// Currently mapped offset and size.
    pub mapped: Option<(u64, u64)>,

    ranges: HashMap<RangeKey, MemoryRange>,
    bound: HashSet<ObjectId>,
}

impl MemoryAllocation {
    pub fn new(size: u64, dedicated: Option<ObjectId>) -> Self {
        MemoryAllocation {
            size,
            dedicated,
            global_valid: false,
            mapped: None,
            ranges: HashMap::new(),
            bound: HashSet::new(),
        }
    }

    pub fn ranges(&self) -> impl Iterator<Item = &MemoryRange> + '_ {
        self.ranges.values()
    }

    pub fn range(&self, key: &RangeKey) -> Option<&MemoryRange> {
        self.ranges.get(key)
    }

    /// Resources with ranges in this allocation.
    pub fn bound(&self) -> impl ExactSizeIterator<Item = ObjectId> + '_ {
        self.bound.iter().copied()
    }

    pub fn has_bindings(&self) -> bool {
        !self.ranges.is_empty()
    }

    /// Resolves zero and [`WHOLE_SIZE`] sizes to the rest of the allocation.
    pub fn resolve_size(&self, offset: u64, size: u64) -> u64 {
        if size == 0 || size == WHOLE_SIZE {
            self.size.saturating_sub(offset)
        } else {
            size
        }
    }
}

#[derive(Clone, Copy, Debug, thiserror::Error, PartialEq, Eq)]
pub enum BindError {
    #[error("Resource {0} is not tracked")]
    UnknownResource(ObjectId),

    #[error("Memory {0} is not tracked")]
    UnknownMemory(Handle),

    #[error("Resource {0} already has memory bound")]
    AlreadyBound(ObjectId),

    #[error("Range [{offset}, {end}) is outside of memory of size {size}")]
    OutOfBounds { offset: u64, end: u64, size: u64 },

    #[error("Resource {0} has no memory bound")]
    NotBound(ObjectId),

    #[error(transparent)]
    OutOfMemory {
        #[from]
        source: OutOfMemory,
    },
}

impl Objects {
    pub fn bindable(&self, resource: ObjectId) -> Option<&Bindable> {
        match resource.ty {
            ObjectType::Buffer => self.buffers.state(resource.handle).map(|b| &b.memory),
            ObjectType::Image => self.images.state(resource.handle).map(|i| &i.memory),
            _ => None,
        }
    }

    pub fn bindable_mut(&mut self, resource: ObjectId) -> Option<&mut Bindable> {
        match resource.ty {
            ObjectType::Buffer => self
                .buffers
                .state_mut(resource.handle)
                .map(|b| &mut b.memory),
            ObjectType::Image => self
                .images
                .state_mut(resource.handle)
                .map(|i| &mut i.memory),
            _ => None,
        }
    }

    /// Checks preconditions of [`Objects::bind_range`] without changing anything.
    pub fn check_bind_range(
        &self,
        resource: ObjectId,
        memory: Handle,
        offset: u64,
        size: u64,
    ) -> Result<(), BindError> {
        let bindable = self
            .bindable(resource)
            .ok_or(BindError::UnknownResource(resource))?;
        if !bindable.sparse && bindable.binding.is_some() {
            return Err(BindError::AlreadyBound(resource));
        }

        let allocation = self
            .memory
            .state(memory)
            .ok_or(BindError::UnknownMemory(memory))?;
        let size = allocation.resolve_size(offset, size);
        let end = offset.saturating_add(size);
        if offset >= allocation.size || end > allocation.size {
            return Err(BindError::OutOfBounds {
                offset,
                end,
                size: allocation.size,
            });
        }
        Ok(())
    }

    /// Binds a range of the allocation to the resource.
    ///
    /// Returns keys of every other range the new one overlaps.
    pub fn bind_range(
        &mut self,
        resource: ObjectId,
        memory: Handle,
        offset: u64,
        size: u64,
        granularity: u64,
    ) -> Result<Vec<RangeKey>, BindError> {
        self.check_bind_range(resource, memory, offset, size)?;

        let (linear, aliasable) = match self.bindable(resource) {
            Some(bindable) => (bindable.linear, bindable.aliasable),
            None => return Err(BindError::UnknownResource(resource)),
        };

        let allocation = self
            .memory
            .state_mut(memory)
            .ok_or(BindError::UnknownMemory(memory))?;
        let size = allocation.resolve_size(offset, size);

        let mut range = MemoryRange {
            resource,
            memory,
            linear,
            aliasable,
            valid: allocation.global_valid,
            start: offset,
            size,
            end: offset + size,
            aliases: HashSet::new(),
        };

        let key = range.key();
        // Sparse rebinding at the same offset replaces the previous range.
        if let Some(previous) = allocation.ranges.remove(&key) {
            for alias in &previous.aliases {
                if let Some(other) = allocation.ranges.get_mut(alias) {
                    other.aliases.remove(&key);
                }
            }
        }
        let overlaps = detect_aliasing(allocation, &range, granularity);

        allocation.ranges.try_reserve(1).map_err(|_| OutOfMemory)?;
        allocation.bound.try_reserve(1).map_err(|_| OutOfMemory)?;
        range
            .aliases
            .try_reserve(overlaps.len())
            .map_err(|_| OutOfMemory)?;

        for other in &overlaps {
            if let Some(other) = allocation.ranges.get_mut(other) {
                other.aliases.insert(key);
            }
        }
        range.aliases.extend(overlaps.iter().copied());
        allocation.ranges.insert(key, range);
        allocation.bound.insert(resource);

        let binding = MemoryBinding {
            memory,
            offset,
            size,
        };
        if let Some(bindable) = self.bindable_mut(resource) {
            if bindable.sparse {
                match bindable
                    .sparse_bindings
                    .iter_mut()
                    .find(|existing| existing.memory == memory && existing.offset == offset)
                {
                    Some(existing) => *existing = binding,
                    None => bindable.sparse_bindings.push(binding),
                }
            } else {
                bindable.binding = Some(binding);
            }
            bindable.update_bound_memory();
        }

        trace!("Bound {} to memory {} at [{}, {})", resource, memory, offset, offset + size);
        Ok(overlaps)
    }

    /// Returns ranges of the allocation that overlap the range.
    pub fn detect_aliasing(&self, range: &MemoryRange, granularity: u64) -> Vec<RangeKey> {
        match self.memory.state(range.memory) {
            Some(allocation) => detect_aliasing(allocation, range, granularity),
            None => Vec::new(),
        }
    }

    /// Sets content validity of every range bound to the resource.
    pub fn mark_valid(&mut self, resource: ObjectId, valid: bool) {
        if resource.ty == ObjectType::Image {
            if let Some(image) = self.images.state_mut(resource.handle) {
                if image.swapchain.is_some() {
                    image.valid = valid;
                    return;
                }
            }
        }

        let keys = self.range_keys(resource);
        for (memory, key) in keys {
            if let Some(range) = self
                .memory
                .state_mut(memory)
                .and_then(|allocation| allocation.ranges.get_mut(&key))
            {
                range.valid = valid;
            }
        }
    }

    /// Returns `false` if any range of the resource may hold undefined content.
    pub fn is_valid(&self, resource: ObjectId) -> bool {
        if resource.ty == ObjectType::Image {
            if let Some(image) = self.images.state(resource.handle) {
                if image.swapchain.is_some() {
                    return image.valid;
                }
            }
        }

        self.range_keys(resource).into_iter().all(|(memory, key)| {
            self.memory.state(memory).map_or(true, |allocation| {
                allocation.global_valid
                    || allocation.ranges.get(&key).map_or(true, |range| range.valid)
            })
        })
    }

    /// Removes every range bound to the resource.
    ///
    /// Returns allocations left without any bound range.
    pub fn unbind(&mut self, resource: ObjectId) -> Result<Vec<Handle>, BindError> {
        let keys = self.range_keys(resource);
        match self.bindable(resource) {
            None => return Err(BindError::UnknownResource(resource)),
            Some(bindable) if !bindable.is_bound() => return Err(BindError::NotBound(resource)),
            Some(_) => {}
        }

        let mut idle = Vec::new();
        for (memory, key) in keys {
            let allocation = match self.memory.state_mut(memory) {
                Some(allocation) => allocation,
                None => continue,
            };

            if let Some(range) = allocation.ranges.remove(&key) {
                for alias in &range.aliases {
                    if let Some(alias) = allocation.ranges.get_mut(alias) {
                        alias.aliases.remove(&key);
                    }
                }
            }

            if !allocation.ranges.keys().any(|k| k.resource == resource) {
                allocation.bound.remove(&resource);
            }
            if allocation.ranges.is_empty() && !idle.contains(&memory) {
                idle.push(memory);
            }
        }

        if let Some(bindable) = self.bindable_mut(resource) {
            bindable.binding = None;
            bindable.sparse_bindings.clear();
            bindable.update_bound_memory();
        }

        trace!("Unbound {}", resource);
        Ok(idle)
    }

    /// Memory locations occupied by the resource.
    pub fn resource_locations(&self, resource: ObjectId) -> SmallVec<[MemoryBinding; 2]> {
        match self.bindable(resource) {
            Some(bindable) => bindable.bindings().copied().collect(),
            None => SmallVec::new(),
        }
    }

    /// Maps a byte region of a buffer onto memory.
    ///
    /// Returns locations and whether they are exact.
    /// Sparse resources report whole bound ranges.
    pub fn buffer_region(
        &self,
        buffer: Handle,
        offset: u64,
        size: u64,
    ) -> (SmallVec<[MemoryBinding; 2]>, bool) {
        let bindable = match self.buffers.state(buffer) {
            Some(state) => &state.memory,
            None => return (SmallVec::new(), false),
        };

        match bindable.binding {
            Some(binding) if !bindable.sparse => {
                let available = binding.size.saturating_sub(offset);
                let size = if size == WHOLE_SIZE || size == 0 {
                    available
                } else {
                    size.min(available)
                };
                let mut locations = SmallVec::new();
                locations.push(MemoryBinding {
                    memory: binding.memory,
                    offset: binding.offset + offset.min(binding.size),
                    size,
                });
                (locations, true)
            }
            _ => (bindable.bindings().copied().collect(), false),
        }
    }

    fn range_keys(&self, resource: ObjectId) -> SmallVec<[(Handle, RangeKey); 2]> {
        match self.bindable(resource) {
            Some(bindable) => bindable
                .bindings()
                .map(|binding| {
                    (
                        binding.memory,
                        RangeKey {
                            resource,
                            start: binding.offset,
                        },
                    )
                })
                .collect(),
            None => SmallVec::new(),
        }
    }
}

fn detect_aliasing(
    allocation: &MemoryAllocation,
    range: &MemoryRange,
    granularity: u64,
) -> Vec<RangeKey> {
    allocation
        .ranges
        .values()
        .filter(|other| other.resource != range.resource)
        .filter(|other| ranges_intersect(range, other, granularity))
        .map(MemoryRange::key)
        .collect()
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::resource::{BufferInfo, BufferState, BufferUsage, ImageInfo, ImageState, ImageTiling},
    };

    fn buffer(objects: &mut Objects, handle: u64, size: u64) -> ObjectId {
        objects
            .buffers
            .insert(
                Handle(handle),
                BufferState::new(BufferInfo {
                    size,
                    usage: BufferUsage::TRANSFER_SRC | BufferUsage::TRANSFER_DST,
                    flags: ResourceFlags::empty(),
                }),
            )
            .unwrap();
        ObjectId::buffer(Handle(handle))
    }

    fn memory(objects: &mut Objects, handle: u64, size: u64) -> Handle {
        objects
            .memory
            .insert(Handle(handle), MemoryAllocation::new(size, None))
            .unwrap();
        Handle(handle)
    }

    #[test]
    fn adjacent_ranges_do_not_alias() {
        let mut objects = Objects::new();
        let m = memory(&mut objects, 1, 256);
        let a = buffer(&mut objects, 10, 64);
        let b = buffer(&mut objects, 11, 64);

        assert!(objects.bind_range(a, m, 0, 64, 1).unwrap().is_empty());
        assert!(objects.bind_range(b, m, 64, 64, 1).unwrap().is_empty());
    }

    #[test]
    fn overlapping_ranges_alias_mutually() {
        let mut objects = Objects::new();
        let m = memory(&mut objects, 1, 256);
        let a = buffer(&mut objects, 10, 64);
        let b = buffer(&mut objects, 11, 64);

        objects.bind_range(a, m, 0, 64, 1).unwrap();
        let overlaps = objects.bind_range(b, m, 32, 64, 1).unwrap();
        assert_eq!(overlaps, vec![RangeKey { resource: a, start: 0 }]);

        let allocation = objects.memory.state(m).unwrap();
        let a_range = allocation.range(&RangeKey { resource: a, start: 0 }).unwrap();
        let b_range = allocation.range(&RangeKey { resource: b, start: 32 }).unwrap();
        assert!(a_range.aliases.contains(&b_range.key()));
        assert!(b_range.aliases.contains(&a_range.key()));

        assert_eq!(objects.unbind(b).unwrap(), Vec::<Handle>::new());
        let allocation = objects.memory.state(m).unwrap();
        let a_range = allocation.range(&RangeKey { resource: a, start: 0 }).unwrap();
        assert!(a_range.aliases.is_empty());

        assert_eq!(objects.unbind(a).unwrap(), vec![m]);
        assert!(!objects.memory.state(m).unwrap().has_bindings());
    }

    #[test]
    fn whole_size_covers_rest_of_allocation() {
        let mut objects = Objects::new();
        let m = memory(&mut objects, 1, 256);
        let a = buffer(&mut objects, 10, 64);
        let b = buffer(&mut objects, 11, 64);

        objects.bind_range(a, m, 128, 0, 1).unwrap();
        assert_eq!(objects.resource_locations(a)[0].size, 128);

        let overlaps = objects.bind_range(b, m, 200, WHOLE_SIZE, 1).unwrap();
        assert_eq!(overlaps.len(), 1);
    }

    #[test]
    fn rebind_and_bounds_are_rejected() {
        let mut objects = Objects::new();
        let m = memory(&mut objects, 1, 128);
        let a = buffer(&mut objects, 10, 64);

        assert_eq!(
            objects.bind_range(a, m, 100, 64, 1),
            Err(BindError::OutOfBounds {
                offset: 100,
                end: 164,
                size: 128
            })
        );
        objects.bind_range(a, m, 0, 64, 1).unwrap();
        assert_eq!(
            objects.bind_range(a, m, 64, 64, 1),
            Err(BindError::AlreadyBound(a))
        );
        let unbound = buffer(&mut objects, 11, 8);
        assert_eq!(objects.unbind(unbound), Err(BindError::NotBound(unbound)));
    }

    #[test]
    fn granularity_applies_between_linear_and_optimal() {
        let mut objects = Objects::new();
        let m = memory(&mut objects, 1, 4096);
        let a = buffer(&mut objects, 10, 100);
        objects
            .images
            .insert(
                Handle(20),
                ImageState::new(ImageInfo {
                    format: Default::default(),
                    samples: Default::default(),
                    usage: crate::resource::ImageUsage::SAMPLED,
                    tiling: ImageTiling::Optimal,
                    flags: ResourceFlags::empty(),
                    size: 1024,
                }),
            )
            .unwrap();
        let image = ObjectId::image(Handle(20));

        objects.bind_range(a, m, 0, 100, 1024).unwrap();
        assert_eq!(objects.bind_range(image, m, 512, 1024, 1024).unwrap().len(), 1);
    }

    #[test]
    fn sparse_rebind_replaces_range() {
        let mut objects = Objects::new();
        let m = memory(&mut objects, 1, 256);
        let a = buffer(&mut objects, 10, 64);
        objects
            .buffers
            .insert(
                Handle(12),
                BufferState::new(BufferInfo {
                    size: 128,
                    usage: BufferUsage::TRANSFER_DST,
                    flags: ResourceFlags::SPARSE_BINDING,
                }),
            )
            .unwrap();
        let sparse = ObjectId::buffer(Handle(12));

        objects.bind_range(a, m, 64, 64, 1).unwrap();
        assert_eq!(objects.bind_range(sparse, m, 32, 64, 1).unwrap().len(), 1);
        // Same offset again, now ending before `a`.
        assert!(objects.bind_range(sparse, m, 32, 16, 1).unwrap().is_empty());

        let bindings = objects.bindable(sparse).unwrap().sparse_bindings();
        assert_eq!(bindings.len(), 1);
        assert_eq!(bindings[0].size, 16);
        let allocation = objects.memory.state(m).unwrap();
        assert_eq!(allocation.ranges().count(), 2);
        let a_range = allocation.range(&RangeKey { resource: a, start: 64 }).unwrap();
        assert!(a_range.aliases.is_empty());
    }

    #[test]
    fn validity_follows_mapping() {
        let mut objects = Objects::new();
        let m = memory(&mut objects, 1, 128);
        let a = buffer(&mut objects, 10, 64);
        objects.bind_range(a, m, 0, 64, 1).unwrap();

        assert!(!objects.is_valid(a));
        objects.mark_valid(a, true);
        assert!(objects.is_valid(a));
        objects.mark_valid(a, false);
        objects.memory.state_mut(m).unwrap().global_valid = true;
        assert!(objects.is_valid(a));
    }
}
