//! Render passes and the dependency graph over their subpasses.

use {
    crate::{access::AccessFlags, handle::Handle, stage::PipelineStageFlags},
    smallvec::SmallVec,
};

/// Upper limit for smallvec array size for attachments.
pub const RENDERPASS_SMALLVEC_ATTACHMENTS: usize = 8;

/// Upper limit for smallvec array size for subpasses.
pub const SMALLVEC_SUBPASSES: usize = 4;

/// Opaque texel format identifier.
/// Only equality of formats matters for compatibility checks.
#[derive(Clone, Copy, Debug, Default, Hash, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
#[repr(transparent)]
pub struct Format(pub u32);

/// Number of samples per texel.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub enum Samples {
    Samples1,
    Samples2,
    Samples4,
    Samples8,
    Samples16,
    Samples32,
    Samples64,
}

impl Default for Samples {
    fn default() -> Self {
        Samples::Samples1
    }
}

/// Defines render pass, its attachments, subpasses and dependencies between them.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub struct RenderPassInfo {
    /// Describes attachments used in the render pass.
    #[cfg_attr(
        feature = "serde-1",
        serde(skip_serializing_if = "SmallVec::is_empty", default)
    )]
    pub attachments: SmallVec<[AttachmentInfo; RENDERPASS_SMALLVEC_ATTACHMENTS]>,
    #[cfg_attr(
        feature = "serde-1",
        serde(skip_serializing_if = "SmallVec::is_empty", default)
    )]
    pub subpasses: SmallVec<[Subpass; SMALLVEC_SUBPASSES]>,
    #[cfg_attr(
        feature = "serde-1",
        serde(skip_serializing_if = "SmallVec::is_empty", default)
    )]
    pub dependencies: SmallVec<[SubpassDependency; SMALLVEC_SUBPASSES]>,
}

impl RenderPassInfo {
    /// Render passes are compatible when attachments agree in format and
    /// sample count and subpasses reference attachments identically.
    pub fn is_compatible(&self, other: &RenderPassInfo) -> bool {
        self.attachments.len() == other.attachments.len()
            && self
                .attachments
                .iter()
                .zip(&other.attachments)
                .all(|(a, b)| a.format == b.format && a.samples == b.samples)
            && self.subpasses == other.subpasses
    }
}

/// Describes one attachment of a render pass.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub struct AttachmentInfo {
    pub format: Format,

    #[cfg_attr(
        feature = "serde-1",
        serde(skip_serializing_if = "is_default", default)
    )]
    pub samples: Samples,
    pub load_op: AttachmentLoadOp,
    pub store_op: AttachmentStoreOp,
}

/// Specifies how render pass treats attachment content at the beginning.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub enum AttachmentLoadOp {
    /// Render pass will load this attachment content before first subpass that
    /// access this attachment starts.
    Load,

    /// Render pass will clear this attachment content before first subpass
    /// that access this attachment starts.
    Clear,

    /// Attachment content visible to read operations
    /// inside render pass is undefined before it is written.
    DontCare,
}

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub enum AttachmentStoreOp {
    /// Render pass will store this attachment content after last subpass that
    /// access this attachment finishes.
    Store,

    /// Attachment content visible to read operations after render
    /// pass is undefined.
    DontCare,
}

#[derive(Clone, Debug, Default, Hash, PartialEq, Eq)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub struct Subpass {
    /// Indices of attachments that are used as color attachments in this
    /// subpass.
    #[cfg_attr(
        feature = "serde-1",
        serde(skip_serializing_if = "SmallVec::is_empty", default)
    )]
    pub colors: SmallVec<[usize; RENDERPASS_SMALLVEC_ATTACHMENTS]>,

    /// Index of an attachment that is used as depth attachment in this
    /// subpass.
    #[cfg_attr(
        feature = "serde-1",
        serde(skip_serializing_if = "Option::is_none", default)
    )]
    pub depth: Option<usize>,

    /// Indices of attachments read as input attachments.
    #[cfg_attr(
        feature = "serde-1",
        serde(skip_serializing_if = "SmallVec::is_empty", default)
    )]
    pub inputs: SmallVec<[usize; RENDERPASS_SMALLVEC_ATTACHMENTS]>,
}

impl Subpass {
    pub fn writes(&self, attachment: usize) -> bool {
        self.colors.contains(&attachment) || self.depth == Some(attachment)
    }

    pub fn reads(&self, attachment: usize) -> bool {
        self.inputs.contains(&attachment)
    }

    pub fn uses(&self, attachment: usize) -> bool {
        self.writes(attachment) || self.reads(attachment)
    }

    /// Subpass reads an attachment it also renders into.
    pub fn has_feedback_loop(&self) -> bool {
        self.inputs.iter().any(|&input| self.writes(input))
    }
}

/// Defines memory dependency between two subpasses
/// or subpass and commands outside render pass.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub struct SubpassDependency {
    /// Index of the first subpass in dependency.
    /// `None` for defining dependency between commands before render pass and
    /// subpass.
    ///
    /// Both `src` and `dst` cannot be `None`.
    #[cfg_attr(
        feature = "serde-1",
        serde(skip_serializing_if = "Option::is_none", default)
    )]
    pub src: Option<usize>,

    /// Index of the second subpass in dependency.
    /// `None` for defining dependency between subpass and commands after
    /// render pass.
    #[cfg_attr(
        feature = "serde-1",
        serde(skip_serializing_if = "Option::is_none", default)
    )]
    pub dst: Option<usize>,

    /// Stages of the first subpass that will be synchronized
    /// with stages for second subpass specified in `dst_stages`.
    pub src_stages: PipelineStageFlags,

    /// Stages of the second subpass that will be synchronized
    /// with stages for first subpass specified in `src_stages`.
    pub dst_stages: PipelineStageFlags,

    pub src_access: AccessFlags,
    pub dst_access: AccessFlags,
}

/// One subpass in the dependency graph.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DagNode {
    pub pass: usize,
    pub prev: SmallVec<[usize; SMALLVEC_SUBPASSES]>,
    pub next: SmallVec<[usize; SMALLVEC_SUBPASSES]>,

    /// Source subpasses of dependencies declared against execution order.
    pub late: SmallVec<[usize; SMALLVEC_SUBPASSES]>,

    pub has_self_dependency: bool,

    /// Union of stages named by self-dependencies.
    pub self_src_stages: PipelineStageFlags,
    pub self_dst_stages: PipelineStageFlags,
}

/// Problem found while building the graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GraphIssue {
    /// Dependency source comes after its destination.
    DependencyOrder { src: usize, dst: usize },

    /// Attachment written in `writer` is used in `user` without any dependency path.
    MissingDependency {
        attachment: usize,
        writer: usize,
        user: usize,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum SubpassError {
    #[error("Subpass {next} does not follow current subpass {current}")]
    NotNextSubpass { current: usize, next: usize },

    #[error("Subpass {current} is the last of {count} subpasses")]
    PastLastSubpass { current: usize, count: usize },

    #[error("Subpass {subpass} depends on subpass {src} which has not executed yet")]
    UnsatisfiedDependency { subpass: usize, src: usize },
}

/// Directed graph of subpasses built from declared dependencies.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RenderPassGraph {
    nodes: Vec<DagNode>,
}

impl RenderPassGraph {
    pub fn build(info: &RenderPassInfo) -> (Self, Vec<GraphIssue>) {
        let count = info.subpasses.len();
        let mut nodes: Vec<DagNode> = (0..count)
            .map(|pass| DagNode {
                pass,
                ..DagNode::default()
            })
            .collect();
        let mut issues = Vec::new();

        for dependency in &info.dependencies {
            let (src, dst) = match (dependency.src, dependency.dst) {
                (Some(src), Some(dst)) if src < count && dst < count => (src, dst),
                _ => continue,
            };

            if src == dst {
                let node = &mut nodes[src];
                node.has_self_dependency = true;
                node.self_src_stages |= dependency.src_stages;
                node.self_dst_stages |= dependency.dst_stages;
            } else if src > dst {
                issues.push(GraphIssue::DependencyOrder { src, dst });
                nodes[dst].late.push(src);
            } else {
                if !nodes[src].next.contains(&dst) {
                    nodes[src].next.push(dst);
                }
                if !nodes[dst].prev.contains(&src) {
                    nodes[dst].prev.push(src);
                }
            }
        }

        let graph = RenderPassGraph { nodes };

        for (writer, subpass) in info.subpasses.iter().enumerate() {
            for (user, later) in info.subpasses.iter().enumerate().skip(writer + 1) {
                let shared = (0..info.attachments.len()).find(|&attachment| {
                    later.uses(attachment)
                        && subpass.uses(attachment)
                        && (subpass.writes(attachment) || later.writes(attachment))
                });

                if let Some(attachment) = shared {
                    if !graph.has_path(writer, user) {
                        issues.push(GraphIssue::MissingDependency {
                            attachment,
                            writer,
                            user,
                        });
                    }
                }
            }
        }

        (graph, issues)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, subpass: usize) -> Option<&DagNode> {
        self.nodes.get(subpass)
    }

    /// Returns `true` if `dst` is reachable from `src` through declared dependencies.
    pub fn has_path(&self, src: usize, dst: usize) -> bool {
        let mut visited = vec![false; self.nodes.len()];
        let mut stack = vec![src];

        while let Some(pass) = stack.pop() {
            if pass == dst {
                return true;
            }
            match visited.get_mut(pass) {
                Some(seen) if !*seen => *seen = true,
                _ => continue,
            }
            stack.extend(self.nodes[pass].next.iter().copied());
        }
        false
    }

    /// Checks that `next` may be started after `current`.
    pub fn validate_subpass_advance(&self, current: usize, next: usize) -> Result<(), SubpassError> {
        if current + 1 >= self.nodes.len() {
            return Err(SubpassError::PastLastSubpass {
                current,
                count: self.nodes.len(),
            });
        }
        if next != current + 1 {
            return Err(SubpassError::NotNextSubpass { current, next });
        }

        let node = &self.nodes[next];
        if let Some(&src) = node.prev.iter().chain(&node.late).find(|&&src| src > current) {
            return Err(SubpassError::UnsatisfiedDependency { subpass: next, src });
        }
        Ok(())
    }

    /// Subpass declares a self-dependency, so reading back what it wrote
    /// requires a pipeline barrier inside the subpass.
    pub fn requires_barrier_before_use(&self, subpass: usize) -> bool {
        self.nodes
            .get(subpass)
            .map_or(false, |node| node.has_self_dependency)
    }
}

#[derive(Debug)]
pub struct RenderPassState {
    pub info: RenderPassInfo,
    pub graph: RenderPassGraph,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FramebufferInfo {
    pub render_pass: Handle,

    /// Image views, one per render pass attachment.
    pub attachments: Vec<Handle>,
}

#[derive(Debug)]
pub struct FramebufferState {
    pub info: FramebufferInfo,

    /// Copy of the render pass the framebuffer was created against.
    pub render_pass: RenderPassInfo,
}

#[cfg(feature = "serde-1")]
fn is_default<T: Default + Eq>(value: &T) -> bool {
    *value == T::default()
}

#[cfg(test)]
mod tests {
    use {super::*, smallvec::smallvec};

    fn attachment() -> AttachmentInfo {
        AttachmentInfo {
            format: Format(37),
            samples: Samples::Samples1,
            load_op: AttachmentLoadOp::Clear,
            store_op: AttachmentStoreOp::Store,
        }
    }

    fn dependency(src: Option<usize>, dst: Option<usize>) -> SubpassDependency {
        SubpassDependency {
            src,
            dst,
            src_stages: PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            dst_stages: PipelineStageFlags::FRAGMENT_SHADER,
            src_access: AccessFlags::COLOR_ATTACHMENT_WRITE,
            dst_access: AccessFlags::INPUT_ATTACHMENT_READ,
        }
    }

    fn deferred_shading() -> RenderPassInfo {
        RenderPassInfo {
            attachments: smallvec![attachment(), attachment()],
            subpasses: smallvec![
                Subpass {
                    colors: smallvec![0],
                    ..Subpass::default()
                },
                Subpass {
                    colors: smallvec![1],
                    inputs: smallvec![0],
                    ..Subpass::default()
                },
            ],
            dependencies: smallvec![dependency(Some(0), Some(1))],
        }
    }

    #[test]
    fn dependencies_form_edges() {
        let (graph, issues) = RenderPassGraph::build(&deferred_shading());
        assert!(issues.is_empty());
        assert_eq!(graph.len(), 2);
        assert!(graph.has_path(0, 1));
        assert!(!graph.has_path(1, 0));
        assert_eq!(graph.node(1).unwrap().prev.as_slice(), &[0]);

        assert_eq!(graph.validate_subpass_advance(0, 1), Ok(()));
        assert_eq!(
            graph.validate_subpass_advance(1, 2),
            Err(SubpassError::PastLastSubpass {
                current: 1,
                count: 2
            })
        );
    }

    #[test]
    fn missing_and_backward_dependencies_are_reported() {
        let mut info = deferred_shading();
        info.dependencies = smallvec![dependency(Some(1), Some(0))];
        let (graph, issues) = RenderPassGraph::build(&info);

        assert_eq!(
            issues,
            vec![
                GraphIssue::DependencyOrder { src: 1, dst: 0 },
                GraphIssue::MissingDependency {
                    attachment: 0,
                    writer: 0,
                    user: 1
                },
            ]
        );
        assert!(!graph.has_path(0, 1));
    }

    #[test]
    fn subpasses_advance_in_order() {
        let mut info = deferred_shading();
        info.subpasses.push(Subpass::default());
        let (graph, _) = RenderPassGraph::build(&info);

        assert_eq!(
            graph.validate_subpass_advance(0, 2),
            Err(SubpassError::NotNextSubpass { current: 0, next: 2 })
        );
        assert_eq!(graph.validate_subpass_advance(1, 2), Ok(()));
    }

    #[test]
    fn self_dependency_requires_barrier() {
        let mut info = deferred_shading();
        info.subpasses[1].inputs.push(1);
        info.dependencies.push(dependency(Some(1), Some(1)));
        let (graph, _) = RenderPassGraph::build(&info);

        assert!(!graph.requires_barrier_before_use(0));
        assert!(graph.requires_barrier_before_use(1));
        assert!(info.subpasses[1].has_feedback_loop());
        assert_eq!(
            graph.node(1).unwrap().self_src_stages,
            PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
        );
    }

    #[test]
    fn compatibility_ignores_load_and_store_ops() {
        let a = deferred_shading();
        let mut b = a.clone();
        b.attachments[0].load_op = AttachmentLoadOp::Load;
        b.dependencies.clear();
        assert!(a.is_compatible(&b));

        b.attachments[1].format = Format(44);
        assert!(!a.is_compatible(&b));
    }
}
