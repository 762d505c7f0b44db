//! Pipeline layouts and their compatibility canonicalization.
//!
//! Two pipeline layouts are compatible for set `N` when their push constant
//! ranges and set layouts `0..=N` are identical. Layouts are interned
//! so that this check is a single identity comparison per set.

use {
    crate::{
        descriptor::{DescriptorSetLayoutInfo, SetLayoutId},
        handle::Handle,
        intern::{Dictionary, Id},
        render_pass::RenderPassInfo,
        stage::ShaderStageFlags,
    },
    std::{
        hash::{Hash, Hasher},
        sync::Arc,
    },
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub struct PushConstantRange {
    pub offset: u32,
    pub size: u32,
    pub stages: ShaderStageFlags,
}

impl PushConstantRange {
    pub fn end(&self) -> u32 {
        self.offset.saturating_add(self.size)
    }
}

pub type PushConstantRangesId = Id<Vec<PushConstantRange>>;

/// Compatibility record of a pipeline layout for one set index.
#[derive(Debug)]
pub struct PipelineLayoutCompatDef {
    pub set: u32,
    pub push_constants: PushConstantRangesId,
    pub set_layouts: Arc<[SetLayoutId]>,
}

impl PipelineLayoutCompatDef {
    /// Set layouts that participate in compatibility for this set.
    pub fn prefix(&self) -> &[SetLayoutId] {
        let end = (self.set as usize + 1).min(self.set_layouts.len());
        &self.set_layouts[..end]
    }
}

impl PartialEq for PipelineLayoutCompatDef {
    fn eq(&self, other: &Self) -> bool {
        self.set == other.set
            && self.push_constants == other.push_constants
            && self.prefix() == other.prefix()
    }
}

impl Eq for PipelineLayoutCompatDef {}

impl Hash for PipelineLayoutCompatDef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.set.hash(state);
        self.push_constants.hash(state);
        self.prefix().hash(state);
    }
}

pub type CompatId = Id<PipelineLayoutCompatDef>;

/// Intern tables for set layouts, push constant ranges
/// and pipeline layout compatibility records.
#[derive(Debug, Default)]
pub struct Canonicalizer {
    set_layouts: Dictionary<DescriptorSetLayoutInfo>,
    push_constants: Dictionary<Vec<PushConstantRange>>,
    compat: Dictionary<PipelineLayoutCompatDef>,
}

impl Canonicalizer {
    pub fn new() -> Self {
        Canonicalizer::default()
    }

    pub fn set_layout(&self, info: &DescriptorSetLayoutInfo) -> SetLayoutId {
        self.set_layouts.look_up(info.canonical())
    }

    pub fn push_constant_ranges(&self, ranges: &[PushConstantRange]) -> PushConstantRangesId {
        let mut ranges = ranges.to_vec();
        ranges.sort();
        self.push_constants.look_up(ranges)
    }

    /// Returns one compatibility id per set index.
    pub fn canonicalize(
        &self,
        set_layouts: &[SetLayoutId],
        push_constants: &[PushConstantRange],
    ) -> Vec<CompatId> {
        let push_constants = self.push_constant_ranges(push_constants);
        let set_layouts: Arc<[SetLayoutId]> = set_layouts.into();

        (0..set_layouts.len() as u32)
            .map(|set| {
                self.compat.look_up(PipelineLayoutCompatDef {
                    set,
                    push_constants: push_constants.clone(),
                    set_layouts: set_layouts.clone(),
                })
            })
            .collect()
    }

    /// Releases records no longer referenced by any layout.
    pub fn purge(&self) {
        self.compat.purge();
        self.push_constants.purge();
        self.set_layouts.purge();
    }

    pub fn len(&self) -> usize {
        self.compat.len()
    }

    pub fn is_empty(&self) -> bool {
        self.compat.is_empty()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum PushConstantError {
    #[error("Offset {offset} and size {size} must be non-zero multiples of 4")]
    Misaligned { offset: u32, size: u32 },

    #[error("Bytes [{offset}, {end}) are not covered by ranges for stages {stages:?}")]
    NotCovered {
        offset: u32,
        end: u32,
        stages: ShaderStageFlags,
    },

    #[error("Range {range:?} overlaps update but its stages are not included in {stages:?}")]
    StageMismatch {
        range: PushConstantRange,
        stages: ShaderStageFlags,
    },
}

/// Defines layout of pipeline inputs: all descriptor sets and push constants.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub struct PipelineLayoutInfo {
    /// Descriptor set layouts.
    pub sets: Vec<Handle>,
    pub push_constants: Vec<PushConstantRange>,
}

#[derive(Debug)]
pub struct PipelineLayoutState {
    pub set_layouts: Vec<SetLayoutId>,
    pub push_constants: PushConstantRangesId,
    pub compat: Vec<CompatId>,
}

impl PipelineLayoutState {
    pub fn new(canonicalizer: &Canonicalizer, set_layouts: Vec<SetLayoutId>, push_constants: &[PushConstantRange]) -> Self {
        let compat = canonicalizer.canonicalize(&set_layouts, push_constants);
        PipelineLayoutState {
            push_constants: canonicalizer.push_constant_ranges(push_constants),
            set_layouts,
            compat,
        }
    }

    /// Validates a push constants update against declared ranges.
    pub fn check_push_constants(
        &self,
        stages: ShaderStageFlags,
        offset: u32,
        size: u32,
    ) -> Result<(), PushConstantError> {
        if size == 0 || offset % 4 != 0 || size % 4 != 0 {
            return Err(PushConstantError::Misaligned { offset, size });
        }
        let end = offset.saturating_add(size);

        let mut covered = offset;
        for range in self.push_constants.iter() {
            if range.end() <= offset || range.offset >= end {
                continue;
            }
            if !stages.contains(range.stages) {
                return Err(PushConstantError::StageMismatch {
                    range: *range,
                    stages,
                });
            }
            // Ranges are sorted by offset.
            if range.offset <= covered {
                covered = covered.max(range.end());
            }
        }

        if covered < end {
            return Err(PushConstantError::NotCovered {
                offset: covered,
                end,
                stages,
            });
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub enum BindPoint {
    Graphics,
    Compute,
}

impl BindPoint {
    pub fn index(self) -> usize {
        match self {
            BindPoint::Graphics => 0,
            BindPoint::Compute => 1,
        }
    }
}

bitflags::bitflags! {
    /// Pipeline state that is set by commands instead of pipeline creation.
    #[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
    pub struct DynamicStateFlags: u32 {
        const VIEWPORT = 0x001;
        const SCISSOR = 0x002;
        const LINE_WIDTH = 0x004;
        const DEPTH_BIAS = 0x008;
        const BLEND_CONSTANTS = 0x010;
        const DEPTH_BOUNDS = 0x020;
        const STENCIL_COMPARE_MASK = 0x040;
        const STENCIL_WRITE_MASK = 0x080;
        const STENCIL_REFERENCE = 0x100;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub struct PipelineInfo {
    pub bind_point: BindPoint,
    pub layout: Handle,

    /// Render pass and subpass of graphics pipelines.
    pub render_pass: Option<(Handle, u32)>,

    pub dynamic_states: DynamicStateFlags,
}

#[derive(Debug)]
pub struct PipelineState {
    pub info: PipelineInfo,
    pub compat: Vec<CompatId>,
    pub push_constants: PushConstantRangesId,

    /// Copy of the render pass description used to check compatibility
    /// after the render pass itself is destroyed.
    pub render_pass: Option<RenderPassInfo>,
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::descriptor::{
            DescriptorBindingFlags, DescriptorSetLayoutBinding, DescriptorSetLayoutFlags,
            DescriptorType,
        },
    };

    fn layout(ty: DescriptorType) -> DescriptorSetLayoutInfo {
        DescriptorSetLayoutInfo {
            bindings: vec![DescriptorSetLayoutBinding {
                binding: 0,
                ty,
                count: 1,
                stages: ShaderStageFlags::ALL,
                flags: DescriptorBindingFlags::empty(),
            }],
            flags: DescriptorSetLayoutFlags::empty(),
        }
    }

    const PUSH: PushConstantRange = PushConstantRange {
        offset: 0,
        size: 16,
        stages: ShaderStageFlags::VERTEX,
    };

    #[test]
    fn compatible_prefixes_share_ids() {
        let canonicalizer = Canonicalizer::new();
        let uniform = canonicalizer.set_layout(&layout(DescriptorType::UniformBuffer));
        let storage = canonicalizer.set_layout(&layout(DescriptorType::StorageBuffer));
        let sampler = canonicalizer.set_layout(&layout(DescriptorType::Sampler));

        let a = canonicalizer.canonicalize(&[uniform.clone(), storage.clone()], &[PUSH]);
        let b = canonicalizer.canonicalize(&[uniform.clone(), sampler.clone()], &[PUSH]);
        let c = canonicalizer.canonicalize(&[sampler, storage], &[PUSH]);

        assert_eq!(a[0], b[0]);
        assert_ne!(a[1], b[1]);
        assert_ne!(a[0], c[0]);
        assert_ne!(a[1], c[1]);

        let no_push = canonicalizer.canonicalize(&[uniform], &[]);
        assert_ne!(a[0], no_push[0]);
    }

    #[test]
    fn binding_order_and_range_order_are_irrelevant() {
        let canonicalizer = Canonicalizer::new();
        let mut info = layout(DescriptorType::UniformBuffer);
        info.bindings.push(DescriptorSetLayoutBinding {
            binding: 1,
            ..info.bindings[0]
        });
        let mut reversed = info.clone();
        reversed.bindings.reverse();
        assert_eq!(canonicalizer.set_layout(&info), canonicalizer.set_layout(&reversed));

        let other = PushConstantRange {
            offset: 16,
            size: 16,
            stages: ShaderStageFlags::FRAGMENT,
        };
        assert_eq!(
            canonicalizer.push_constant_ranges(&[PUSH, other]),
            canonicalizer.push_constant_ranges(&[other, PUSH])
        );
    }

    #[test]
    fn push_constant_updates_are_checked() {
        let canonicalizer = Canonicalizer::new();
        let state = PipelineLayoutState::new(&canonicalizer, Vec::new(), &[PUSH]);

        assert_eq!(state.check_push_constants(ShaderStageFlags::VERTEX, 0, 16), Ok(()));
        assert_eq!(state.check_push_constants(ShaderStageFlags::VERTEX, 4, 8), Ok(()));
        assert!(matches!(
            state.check_push_constants(ShaderStageFlags::VERTEX, 8, 16),
            Err(PushConstantError::NotCovered { .. })
        ));
        assert!(matches!(
            state.check_push_constants(ShaderStageFlags::FRAGMENT, 0, 16),
            Err(PushConstantError::StageMismatch { .. })
        ));
        assert!(matches!(
            state.check_push_constants(ShaderStageFlags::VERTEX, 2, 4),
            Err(PushConstantError::Misaligned { .. })
        ));
    }
}
