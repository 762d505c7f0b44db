use std::fmt::{self, Display};

/// Opaque non-dispatchable handle value as seen by the application.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
#[repr(transparent)]
pub struct Handle(pub u64);

impl Handle {
    pub const NULL: Self = Handle(0);

    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl Display for Handle {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "0x{:x}", self.0)
    }
}

impl From<u64> for Handle {
    fn from(raw: u64) -> Self {
        Handle(raw)
    }
}

/// Kind of tracked object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub enum ObjectType {
    Buffer,
    Image,
    BufferView,
    ImageView,
    Sampler,
    DeviceMemory,
    DescriptorPool,
    DescriptorSet,
    DescriptorSetLayout,
    PipelineLayout,
    Pipeline,
    RenderPass,
    Framebuffer,
    Swapchain,
    QueryPool,
    Event,
    Fence,
    CommandPool,
    CommandBuffer,
}

impl ObjectType {
    pub fn name(self) -> &'static str {
        match self {
            ObjectType::Buffer => "buffer",
            ObjectType::Image => "image",
            ObjectType::BufferView => "buffer view",
            ObjectType::ImageView => "image view",
            ObjectType::Sampler => "sampler",
            ObjectType::DeviceMemory => "device memory",
            ObjectType::DescriptorPool => "descriptor pool",
            ObjectType::DescriptorSet => "descriptor set",
            ObjectType::DescriptorSetLayout => "descriptor set layout",
            ObjectType::PipelineLayout => "pipeline layout",
            ObjectType::Pipeline => "pipeline",
            ObjectType::RenderPass => "render pass",
            ObjectType::Framebuffer => "framebuffer",
            ObjectType::Swapchain => "swapchain",
            ObjectType::QueryPool => "query pool",
            ObjectType::Event => "event",
            ObjectType::Fence => "fence",
            ObjectType::CommandPool => "command pool",
            ObjectType::CommandBuffer => "command buffer",
        }
    }
}

impl Display for ObjectType {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.write_str(self.name())
    }
}

/// Typed handle. Handles of different types may collide,
/// so objects are always identified by the pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub struct ObjectId {
    pub ty: ObjectType,
    pub handle: Handle,
}

impl ObjectId {
    pub const fn new(ty: ObjectType, handle: Handle) -> Self {
        ObjectId { ty, handle }
    }

    pub const fn buffer(handle: Handle) -> Self {
        ObjectId::new(ObjectType::Buffer, handle)
    }

    pub const fn image(handle: Handle) -> Self {
        ObjectId::new(ObjectType::Image, handle)
    }

    pub const fn memory(handle: Handle) -> Self {
        ObjectId::new(ObjectType::DeviceMemory, handle)
    }

    pub const fn command_buffer(handle: Handle) -> Self {
        ObjectId::new(ObjectType::CommandBuffer, handle)
    }
}

impl Display for ObjectId {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "{} {}", self.ty, self.handle)
    }
}
