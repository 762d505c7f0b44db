use {
    crate::{
        command_buffer::{CbState, CommandBufferState, CommandPoolState},
        descriptor::{DescriptorPoolState, DescriptorSetLayoutState, DescriptorSetState},
        handle::{Handle, ObjectId, ObjectType},
        memory::MemoryAllocation,
        pipeline::{PipelineLayoutState, PipelineState},
        queue::{EventState, FenceState, QueryPoolState},
        render_pass::{FramebufferState, RenderPassState},
        resource::{
            BufferState, BufferViewState, ImageState, ImageViewState, SamplerState, SwapchainState,
        },
        OutOfMemory,
    },
    hashbrown::{HashMap, HashSet},
    slab::Slab,
    std::sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
};

/// Lock-free view of an object's in-use counter.
///
/// Stays valid after the object record is removed,
/// so pending submissions can release objects destroyed in the meantime.
#[derive(Clone, Debug, Default)]
pub struct InUse(Arc<AtomicU32>);

impl InUse {
    pub fn get(&self) -> bool {
        self.count() != 0
    }

    pub fn count(&self) -> u32 {
        self.0.load(Ordering::Acquire)
    }

    pub(crate) fn acquire(&self) {
        self.0.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn release(&self) {
        let _ = self
            .0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| count.checked_sub(1));
    }
}

/// Bookkeeping shared by every tracked object.
#[derive(Debug, Default)]
pub struct TrackedObject {
    in_use: InUse,
    cb_bindings: HashSet<Handle>,
}

impl TrackedObject {
    pub fn new() -> Self {
        TrackedObject::default()
    }

    pub fn in_use(&self) -> InUse {
        self.in_use.clone()
    }

    pub fn is_in_use(&self) -> bool {
        self.in_use.get()
    }

    /// Command buffers that currently reference this object.
    pub fn cb_bindings(&self) -> impl ExactSizeIterator<Item = Handle> + '_ {
        self.cb_bindings.iter().copied()
    }

    pub fn is_bound_to(&self, cb: Handle) -> bool {
        self.cb_bindings.contains(&cb)
    }

    pub fn has_cb_bindings(&self) -> bool {
        !self.cb_bindings.is_empty()
    }
}

/// Record of one live object.
#[derive(Debug)]
pub struct Node<T> {
    pub base: TrackedObject,
    pub state: T,
}

/// Arena of objects of one type, addressed by handle.
#[derive(Debug)]
pub struct Registry<T> {
    nodes: Slab<Node<T>>,
    index: HashMap<Handle, usize>,
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Registry {
            nodes: Slab::new(),
            index: HashMap::new(),
        }
    }
}

impl<T> Registry<T> {
    pub fn new() -> Self {
        Registry::default()
    }

    /// Inserts new record.
    /// Returns stale record that was registered under the same handle, if any.
    pub fn insert(&mut self, handle: Handle, state: T) -> Result<Option<Node<T>>, OutOfMemory> {
        self.index.try_reserve(1).map_err(|_| OutOfMemory)?;

        let stale = self.remove(handle);
        let key = self.nodes.insert(Node {
            base: TrackedObject::new(),
            state,
        });
        self.index.insert(handle, key);
        Ok(stale)
    }

    pub fn remove(&mut self, handle: Handle) -> Option<Node<T>> {
        let key = self.index.remove(&handle)?;
        Some(self.nodes.remove(key))
    }

    pub fn get(&self, handle: Handle) -> Option<&Node<T>> {
        let key = *self.index.get(&handle)?;
        self.nodes.get(key)
    }

    pub fn get_mut(&mut self, handle: Handle) -> Option<&mut Node<T>> {
        let key = *self.index.get(&handle)?;
        self.nodes.get_mut(key)
    }

    pub fn state(&self, handle: Handle) -> Option<&T> {
        self.get(handle).map(|node| &node.state)
    }

    pub fn state_mut(&mut self, handle: Handle) -> Option<&mut T> {
        self.get_mut(handle).map(|node| &mut node.state)
    }

    pub fn contains(&self, handle: Handle) -> bool {
        self.index.contains_key(&handle)
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn handles(&self) -> Vec<Handle> {
        self.index.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Handle, &Node<T>)> + '_ {
        self.index
            .iter()
            .filter_map(move |(&handle, &key)| Some((handle, self.nodes.get(key)?)))
    }
}

macro_rules! with_registry {
    (mut $objects:expr, $ty:expr, |$registry:ident| $body:expr) => {
        match $ty {
            ObjectType::Buffer => { let $registry = &mut $objects.buffers; $body }
            ObjectType::Image => { let $registry = &mut $objects.images; $body }
            ObjectType::BufferView => { let $registry = &mut $objects.buffer_views; $body }
            ObjectType::ImageView => { let $registry = &mut $objects.image_views; $body }
            ObjectType::Sampler => { let $registry = &mut $objects.samplers; $body }
            ObjectType::DeviceMemory => { let $registry = &mut $objects.memory; $body }
            ObjectType::DescriptorPool => { let $registry = &mut $objects.descriptor_pools; $body }
            ObjectType::DescriptorSet => { let $registry = &mut $objects.descriptor_sets; $body }
            ObjectType::DescriptorSetLayout => { let $registry = &mut $objects.set_layouts; $body }
            ObjectType::PipelineLayout => { let $registry = &mut $objects.pipeline_layouts; $body }
            ObjectType::Pipeline => { let $registry = &mut $objects.pipelines; $body }
            ObjectType::RenderPass => { let $registry = &mut $objects.render_passes; $body }
            ObjectType::Framebuffer => { let $registry = &mut $objects.framebuffers; $body }
            ObjectType::Swapchain => { let $registry = &mut $objects.swapchains; $body }
            ObjectType::QueryPool => { let $registry = &mut $objects.query_pools; $body }
            ObjectType::Event => { let $registry = &mut $objects.events; $body }
            ObjectType::Fence => { let $registry = &mut $objects.fences; $body }
            ObjectType::CommandPool => { let $registry = &mut $objects.command_pools; $body }
            ObjectType::CommandBuffer => { let $registry = &mut $objects.command_buffers; $body }
        }
    };
    ($objects:expr, $ty:expr, |$registry:ident| $body:expr) => {
        match $ty {
            ObjectType::Buffer => { let $registry = &$objects.buffers; $body }
            ObjectType::Image => { let $registry = &$objects.images; $body }
            ObjectType::BufferView => { let $registry = &$objects.buffer_views; $body }
            ObjectType::ImageView => { let $registry = &$objects.image_views; $body }
            ObjectType::Sampler => { let $registry = &$objects.samplers; $body }
            ObjectType::DeviceMemory => { let $registry = &$objects.memory; $body }
            ObjectType::DescriptorPool => { let $registry = &$objects.descriptor_pools; $body }
            ObjectType::DescriptorSet => { let $registry = &$objects.descriptor_sets; $body }
            ObjectType::DescriptorSetLayout => { let $registry = &$objects.set_layouts; $body }
            ObjectType::PipelineLayout => { let $registry = &$objects.pipeline_layouts; $body }
            ObjectType::Pipeline => { let $registry = &$objects.pipelines; $body }
            ObjectType::RenderPass => { let $registry = &$objects.render_passes; $body }
            ObjectType::Framebuffer => { let $registry = &$objects.framebuffers; $body }
            ObjectType::Swapchain => { let $registry = &$objects.swapchains; $body }
            ObjectType::QueryPool => { let $registry = &$objects.query_pools; $body }
            ObjectType::Event => { let $registry = &$objects.events; $body }
            ObjectType::Fence => { let $registry = &$objects.fences; $body }
            ObjectType::CommandPool => { let $registry = &$objects.command_pools; $body }
            ObjectType::CommandBuffer => { let $registry = &$objects.command_buffers; $body }
        }
    };
}

/// Every live object of one device.
#[derive(Debug, Default)]
pub struct Objects {
    pub buffers: Registry<BufferState>,
    pub images: Registry<ImageState>,
    pub buffer_views: Registry<BufferViewState>,
    pub image_views: Registry<ImageViewState>,
    pub samplers: Registry<SamplerState>,
    pub memory: Registry<MemoryAllocation>,
    pub descriptor_pools: Registry<DescriptorPoolState>,
    pub descriptor_sets: Registry<DescriptorSetState>,
    pub set_layouts: Registry<DescriptorSetLayoutState>,
    pub pipeline_layouts: Registry<PipelineLayoutState>,
    pub pipelines: Registry<PipelineState>,
    pub render_passes: Registry<RenderPassState>,
    pub framebuffers: Registry<FramebufferState>,
    pub swapchains: Registry<SwapchainState>,
    pub query_pools: Registry<QueryPoolState>,
    pub events: Registry<EventState>,
    pub fences: Registry<FenceState>,
    pub command_pools: Registry<CommandPoolState>,
    pub command_buffers: Registry<CommandBufferState>,
}

impl Objects {
    pub fn new() -> Self {
        Objects::default()
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        with_registry!(self, id.ty, |registry| registry.contains(id.handle))
    }

    pub fn base(&self, id: ObjectId) -> Option<&TrackedObject> {
        with_registry!(self, id.ty, |registry| registry
            .get(id.handle)
            .map(|node| &node.base))
    }

    pub fn base_mut(&mut self, id: ObjectId) -> Option<&mut TrackedObject> {
        with_registry!(mut self, id.ty, |registry| registry
            .get_mut(id.handle)
            .map(|node| &mut node.base))
    }

    pub fn is_in_use(&self, id: ObjectId) -> bool {
        self.base(id).map_or(false, TrackedObject::is_in_use)
    }

    /// Removes the object record, returning its bookkeeping.
    pub(crate) fn remove_base(&mut self, id: ObjectId) -> Option<TrackedObject> {
        with_registry!(mut self, id.ty, |registry| registry
            .remove(id.handle)
            .map(|node| node.base))
    }

    /// Records that `cb` references `object`.
    ///
    /// Both sides are updated together. Returns `false` without changes
    /// if either of them is not registered.
    pub fn bind(&mut self, object: ObjectId, cb: Handle) -> Result<bool, OutOfMemory> {
        if !self.command_buffers.contains(cb) {
            return Ok(false);
        }
        match self.base_mut(object) {
            Some(base) => base.cb_bindings.try_reserve(1).map_err(|_| OutOfMemory)?,
            None => return Ok(false),
        }

        if let Some(node) = self.command_buffers.get_mut(cb) {
            node.state
                .object_bindings
                .try_reserve(1)
                .map_err(|_| OutOfMemory)?;
            node.state.object_bindings.insert(object);
        }
        if let Some(base) = self.base_mut(object) {
            base.cb_bindings.insert(cb);
        }
        Ok(true)
    }

    /// Drops every object binding of the command buffer, from both sides.
    pub fn unbind_command_buffer(&mut self, cb: Handle) {
        let bindings = match self.command_buffers.get_mut(cb) {
            Some(node) => std::mem::take(&mut node.state.object_bindings),
            None => return,
        };

        for object in bindings {
            if let Some(base) = self.base_mut(object) {
                base.cb_bindings.remove(&cb);
            }
        }
    }

    /// Drops the binding between one object and every command buffer
    /// referencing it. Returns those command buffers.
    pub(crate) fn unbind_object(&mut self, object: ObjectId) -> Vec<Handle> {
        let cbs: Vec<Handle> = match self.base_mut(object) {
            Some(base) => base.cb_bindings.drain().collect(),
            None => return Vec::new(),
        };

        for &cb in &cbs {
            if let Some(node) = self.command_buffers.get_mut(cb) {
                node.state.object_bindings.remove(&object);
            }
        }
        cbs
    }

    /// Moves command buffers into invalid state because `broken` was
    /// destroyed or modified. Primary command buffers that execute
    /// invalidated secondaries are invalidated too.
    pub fn invalidate(&mut self, cbs: impl IntoIterator<Item = Handle>, broken: ObjectId) {
        let mut queue: Vec<(Handle, ObjectId)> = cbs.into_iter().map(|cb| (cb, broken)).collect();

        while let Some((cb, broken)) = queue.pop() {
            let node = match self.command_buffers.get_mut(cb) {
                Some(node) => node,
                None => continue,
            };

            let was_valid = match node.state.state {
                CbState::Recording => {
                    node.state.state = CbState::InvalidIncomplete;
                    true
                }
                CbState::Recorded => {
                    node.state.state = CbState::InvalidComplete;
                    true
                }
                CbState::New | CbState::InvalidComplete | CbState::InvalidIncomplete => false,
            };

            if !node.state.broken_bindings.contains(&broken) {
                node.state.broken_bindings.push(broken);
            }

            if was_valid {
                debug!("Command buffer {} invalidated by {}", cb, broken);
                let secondary = ObjectId::command_buffer(cb);
                queue.extend(node.base.cb_bindings().map(|primary| (primary, secondary)));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use {super::*, crate::command_buffer::CommandBufferLevel};

    fn cb(objects: &mut Objects, handle: u64, state: CbState) -> Handle {
        let handle = Handle(handle);
        let mut cb = CommandBufferState::new(Handle(1), CommandBufferLevel::Primary);
        cb.state = state;
        objects.command_buffers.insert(handle, cb).unwrap();
        handle
    }

    #[test]
    fn registry_replaces_stale_records() {
        let mut registry = Registry::new();
        assert!(registry.insert(Handle(7), 1u32).unwrap().is_none());
        let stale = registry.insert(Handle(7), 2u32).unwrap().unwrap();
        assert_eq!(stale.state, 1);
        assert_eq!(registry.state(Handle(7)), Some(&2));
        assert_eq!(registry.len(), 1);
        assert!(registry.remove(Handle(7)).is_some());
        assert!(registry.is_empty());
    }

    #[test]
    fn bind_is_idempotent_and_bidirectional() {
        let mut objects = Objects::new();
        let cb = cb(&mut objects, 10, CbState::Recording);
        objects
            .samplers
            .insert(Handle(3), SamplerState::default())
            .unwrap();
        let sampler = ObjectId::new(ObjectType::Sampler, Handle(3));

        assert!(objects.bind(sampler, cb).unwrap());
        assert!(objects.bind(sampler, cb).unwrap());
        assert_eq!(objects.base(sampler).unwrap().cb_bindings().len(), 1);
        assert_eq!(
            objects.command_buffers.state(cb).unwrap().object_bindings.len(),
            1
        );

        let missing = ObjectId::new(ObjectType::Sampler, Handle(4));
        assert!(!objects.bind(missing, cb).unwrap());

        objects.unbind_command_buffer(cb);
        assert!(!objects.base(sampler).unwrap().has_cb_bindings());
    }

    #[test]
    fn invalidation_reaches_primaries() {
        let mut objects = Objects::new();
        let primary = cb(&mut objects, 10, CbState::Recorded);
        let secondary = cb(&mut objects, 11, CbState::Recorded);
        objects
            .bind(ObjectId::command_buffer(secondary), primary)
            .unwrap();

        let broken = ObjectId::buffer(Handle(99));
        objects.invalidate([secondary], broken);

        let secondary = objects.command_buffers.state(secondary).unwrap();
        assert_eq!(secondary.state, CbState::InvalidComplete);
        assert_eq!(secondary.broken_bindings, vec![broken]);

        let primary = objects.command_buffers.state(primary).unwrap();
        assert_eq!(primary.state, CbState::InvalidComplete);
        assert_eq!(
            primary.broken_bindings,
            vec![ObjectId::command_buffer(Handle(11))]
        );
    }

    #[test]
    fn in_use_survives_removal() {
        let mut registry = Registry::new();
        registry.insert(Handle(1), ()).unwrap();
        let in_use = registry.get(Handle(1)).unwrap().base.in_use();
        in_use.acquire();
        assert!(registry.get(Handle(1)).unwrap().base.is_in_use());
        registry.remove(Handle(1));
        in_use.release();
        in_use.release();
        assert_eq!(in_use.count(), 0);
    }
}
