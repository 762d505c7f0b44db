use crate::{
    handle::Handle,
    memory::Bindable,
    render_pass::{Format, Samples},
};

bitflags::bitflags! {
    #[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
    pub struct BufferUsage: u32 {
        const TRANSFER_SRC = 0x00000001;
        const TRANSFER_DST = 0x00000002;
        const UNIFORM_TEXEL = 0x00000004;
        const STORAGE_TEXEL = 0x00000008;
        const UNIFORM = 0x00000010;
        const STORAGE = 0x00000020;
        const INDEX = 0x00000040;
        const VERTEX = 0x00000080;
        const INDIRECT = 0x00000100;
    }
}

bitflags::bitflags! {
    /// Creation flags that affect how memory may be bound.
    #[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
    pub struct ResourceFlags: u32 {
        /// Resource is bound with sparse binding calls.
        const SPARSE_BINDING = 0x00000001;

        /// Resource may be partially resident.
        const SPARSE_RESIDENCY = 0x00000002;

        /// Resource may alias other sparse resources.
        const SPARSE_ALIASED = 0x00000004;

        /// Image may alias other images bound to the same memory.
        const ALIAS = 0x00000400;
    }
}

impl ResourceFlags {
    pub fn is_sparse(self) -> bool {
        self.contains(Self::SPARSE_BINDING)
    }

    /// Overlap with other resources is declared intentional.
    pub fn is_aliasable(self) -> bool {
        self.intersects(Self::SPARSE_ALIASED | Self::ALIAS)
    }
}

/// Information required to create a buffer.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub struct BufferInfo {
    /// Size of content buffer can hold.
    pub size: u64,

    /// Usage types supported by buffer.
    pub usage: BufferUsage,

    pub flags: ResourceFlags,
}

#[derive(Debug)]
pub struct BufferState {
    pub info: BufferInfo,
    pub memory: Bindable,
}

impl BufferState {
    pub fn new(info: BufferInfo) -> Self {
        BufferState {
            memory: Bindable::new(info.flags, true, info.size),
            info,
        }
    }
}

bitflags::bitflags! {
    #[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
    pub struct ImageUsage: u32 {
        const TRANSFER_SRC =                0x001;
        const TRANSFER_DST =                0x002;
        const SAMPLED =                     0x004;
        const STORAGE =                     0x008;
        const COLOR_ATTACHMENT =            0x010;
        const DEPTH_STENCIL_ATTACHMENT =    0x020;
        const TRANSIENT_ATTACHMENT =        0x040;
        const INPUT_ATTACHMENT =            0x080;
    }
}

impl ImageUsage {
    pub fn is_render_target(self) -> bool {
        self.intersects(Self::COLOR_ATTACHMENT | Self::DEPTH_STENCIL_ATTACHMENT)
    }
}

/// Arrangement of texels in memory.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub enum ImageTiling {
    Optimal,
    Linear,
}

impl Default for ImageTiling {
    fn default() -> Self {
        ImageTiling::Optimal
    }
}

/// Information required to create an image.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub struct ImageInfo {
    /// Format for image texels.
    pub format: Format,

    /// Number of samples per texel.
    pub samples: Samples,

    /// Usage types supported by image.
    pub usage: ImageUsage,

    pub tiling: ImageTiling,

    pub flags: ResourceFlags,

    /// Size of memory the image requires.
    pub size: u64,
}

#[derive(Debug)]
pub struct ImageState {
    pub info: ImageInfo,
    pub memory: Bindable,

    /// Owning swapchain for presentable images.
    pub swapchain: Option<Handle>,

    /// Content validity of swapchain images, which have no tracked memory.
    pub valid: bool,
}

impl ImageState {
    pub fn new(info: ImageInfo) -> Self {
        ImageState {
            memory: Bindable::new(info.flags, info.tiling == ImageTiling::Linear, info.size),
            info,
            swapchain: None,
            valid: false,
        }
    }
}

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub struct BufferViewInfo {
    pub buffer: Handle,
    pub offset: u64,
    pub size: u64,
}

#[derive(Debug)]
pub struct BufferViewState {
    pub info: BufferViewInfo,
}

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub struct ImageViewInfo {
    pub image: Handle,
    pub format: Format,
}

#[derive(Debug)]
pub struct ImageViewState {
    pub info: ImageViewInfo,
}

#[derive(Debug, Default)]
pub struct SamplerState;

#[derive(Debug, Default)]
pub struct SwapchainState {
    pub images: Vec<Handle>,
}
