use {
    crate::{
        handle::{Handle, ObjectId, ObjectType},
        intern::Id,
        stage::ShaderStageFlags,
    },
    std::collections::BTreeMap,
};

bitflags::bitflags! {
    /// Flags that can be set in each [`DescriptorSetLayoutBinding`]
    /// to specify options for the corresponding descriptor set layout binding.
    #[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
    pub struct DescriptorBindingFlags: u32 {
        /// Allows update binding after set is bound to command buffer.
        /// Updating binding without this flag invalidates
        /// command buffers where set is used.
        const UPDATE_AFTER_BIND = 0x00000001;

        /// Allows updating descriptors in this binding that are not used
        /// while set is bound to pending command buffer.
        const UPDATE_UNUSED_WHILE_PENDING = 0x00000002;

        /// Allows descriptors that are not dynamically used by
        /// any shader invocation to be unbound.
        const PARTIALLY_BOUND = 0x00000004;

        /// Binding with this flag does not have descriptors count defined by layout.
        const VARIABLE_DESCRIPTOR_COUNT = 0x00000008;
    }
}

bitflags::bitflags! {
    #[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
    pub struct DescriptorSetLayoutFlags: u32 {
        /// Specifies that set with this layout must not be allocated.
        /// And descriptors should be pushed to command buffer directly.
        const PUSH_DESCRIPTOR = 0x00000001;

        /// Allows bindings in this layout to have [`DescriptorBindingFlags::UPDATE_AFTER_BIND`] flags.
        const UPDATE_AFTER_BIND_POOL = 0x00000002;
    }
}

/// Defines layout for descriptor sets.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub struct DescriptorSetLayoutInfo {
    /// Array of bindings in this layout.
    /// Every element must have different `.binding` field.
    pub bindings: Vec<DescriptorSetLayoutBinding>,

    /// Flags to specify options for the descriptor set layout.
    pub flags: DescriptorSetLayoutFlags,
}

impl DescriptorSetLayoutInfo {
    /// Canonical form with bindings ordered by index.
    pub fn canonical(&self) -> DescriptorSetLayoutInfo {
        let mut bindings = self.bindings.clone();
        bindings.sort_by_key(|binding| binding.binding);
        DescriptorSetLayoutInfo {
            bindings,
            flags: self.flags,
        }
    }

    pub fn binding(&self, binding: u32) -> Option<&DescriptorSetLayoutBinding> {
        self.bindings.iter().find(|b| b.binding == binding)
    }
}

/// Defines layout for one binding in descriptor set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub struct DescriptorSetLayoutBinding {
    /// Binding index.
    pub binding: u32,

    /// Type of descriptor in the binding.
    pub ty: DescriptorType,

    /// Number of descriptors in the binding.
    pub count: u32,

    /// Shader stages where this binding is accessible.
    pub stages: ShaderStageFlags,

    /// Flags to specify options for the descriptor set layout binding.
    pub flags: DescriptorBindingFlags,
}

/// Types of descriptors.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub enum DescriptorType {
    /// Sampler descriptor.
    Sampler,

    /// Combined image and sampler.
    CombinedImageSampler,

    /// Image that can be sampled.
    SampledImage,

    /// Image that can be used as storage.
    /// Unlike [`DescriptorType::SampledImage`] it can be overwritten by shader.
    StorageImage,

    UniformTexelBuffer,

    StorageTexelBuffer,

    /// Buffer with shader uniform data.
    UniformBuffer,

    /// Buffer that can be used as storage.
    StorageBuffer,

    /// Same as [`DescriptorType::UniformBuffer`] but allows specifying offset each time set is bound.
    UniformBufferDynamic,

    /// Same as [`DescriptorType::StorageBuffer`] but allows specifying offset each time set is bound.
    StorageBufferDynamic,

    /// Input attachment descriptor is an image with restricted access.
    /// Only fragment shader can read from input attachment.
    InputAttachment,
}

impl DescriptorType {
    /// Shaders may write through descriptors of this type.
    pub fn is_writable(self) -> bool {
        matches!(
            self,
            DescriptorType::StorageImage
                | DescriptorType::StorageTexelBuffer
                | DescriptorType::StorageBuffer
                | DescriptorType::StorageBufferDynamic
        )
    }
}

/// Resource reference written into a descriptor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub enum Descriptor {
    Sampler(Handle),
    CombinedImageSampler { view: Handle, sampler: Handle },
    Image(Handle),
    TexelBuffer(Handle),
    Buffer { buffer: Handle, offset: u64, size: u64 },
}

impl Descriptor {
    /// Returns `true` if the descriptor can be written into binding of the type.
    pub fn matches(&self, ty: DescriptorType) -> bool {
        match self {
            Descriptor::Sampler(_) => ty == DescriptorType::Sampler,
            Descriptor::CombinedImageSampler { .. } => ty == DescriptorType::CombinedImageSampler,
            Descriptor::Image(_) => matches!(
                ty,
                DescriptorType::SampledImage
                    | DescriptorType::StorageImage
                    | DescriptorType::InputAttachment
            ),
            Descriptor::TexelBuffer(_) => matches!(
                ty,
                DescriptorType::UniformTexelBuffer | DescriptorType::StorageTexelBuffer
            ),
            Descriptor::Buffer { .. } => matches!(
                ty,
                DescriptorType::UniformBuffer
                    | DescriptorType::StorageBuffer
                    | DescriptorType::UniformBufferDynamic
                    | DescriptorType::StorageBufferDynamic
            ),
        }
    }

    /// Objects referenced by the descriptor.
    pub fn objects(&self) -> impl Iterator<Item = ObjectId> {
        let (first, second) = match *self {
            Descriptor::Sampler(sampler) => (ObjectId::new(ObjectType::Sampler, sampler), None),
            Descriptor::CombinedImageSampler { view, sampler } => (
                ObjectId::new(ObjectType::ImageView, view),
                Some(ObjectId::new(ObjectType::Sampler, sampler)),
            ),
            Descriptor::Image(view) => (ObjectId::new(ObjectType::ImageView, view), None),
            Descriptor::TexelBuffer(view) => (ObjectId::new(ObjectType::BufferView, view), None),
            Descriptor::Buffer { buffer, .. } => (ObjectId::buffer(buffer), None),
        };
        std::iter::once(first).chain(second)
    }
}

/// Update of consecutive descriptors of one binding.
#[derive(Clone, Copy, Debug)]
pub struct DescriptorWrite<'a> {
    pub set: Handle,
    pub binding: u32,
    pub element: u32,
    pub ty: DescriptorType,
    pub descriptors: &'a [Descriptor],
}

pub type SetLayoutId = Id<DescriptorSetLayoutInfo>;

#[derive(Debug)]
pub struct DescriptorSetLayoutState {
    pub info: DescriptorSetLayoutInfo,
    pub id: SetLayoutId,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub struct DescriptorPoolInfo {
    pub max_sets: u32,
    pub free_individual_sets: bool,
}

#[derive(Debug)]
pub struct DescriptorPoolState {
    pub info: DescriptorPoolInfo,
    pub sets: Vec<Handle>,
}

impl DescriptorPoolState {
    pub fn available(&self) -> u32 {
        self.info.max_sets.saturating_sub(self.sets.len() as u32)
    }
}

#[derive(Debug)]
pub struct DescriptorSetState {
    pub pool: Handle,
    pub layout: Handle,
    pub layout_id: SetLayoutId,
    pub descriptors: BTreeMap<(u32, u32), Descriptor>,
}

impl DescriptorSetState {
    pub fn new(pool: Handle, layout: Handle, layout_id: SetLayoutId) -> Self {
        DescriptorSetState {
            pool,
            layout,
            layout_id,
            descriptors: BTreeMap::new(),
        }
    }

    /// Layout of the binding with this index.
    pub fn binding(&self, binding: u32) -> Option<&DescriptorSetLayoutBinding> {
        self.layout_id.binding(binding)
    }
}
