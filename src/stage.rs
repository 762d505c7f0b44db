use crate::queue::QueueCapabilityFlags;

bitflags::bitflags! {
    #[derive(Default)]
    #[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
    pub struct PipelineStageFlags: u32 {
        /// Pseudo-stage that precedes all other stages and doesn't execute any commands.
        /// Using it in first scope of dependency will
        /// not cause any waiting, because no operations should be waited upon.
        /// Using it in second scope will make all operations in second scope to wait for operations first scope.
        const TOP_OF_PIPE = 0x00000001;

        /// Stage at which indirect draw buffer is read.
        const DRAW_INDIRECT = 0x00000002;

        /// Stage at which vertex buffers are read.
        const VERTEX_INPUT = 0x00000004;

        /// Stage at which vertex shader is executed.
        const VERTEX_SHADER = 0x00000008;
        const TESSELLATION_CONTROL_SHADER = 0x00000010;
        const TESSELLATION_EVALUATION_SHADER = 0x00000020;
        const GEOMETRY_SHADER = 0x00000040;

        /// Stage at which fragment shader is executed.
        const FRAGMENT_SHADER = 0x00000080;

        /// Stage at which early fragment depth and stencil test is performed
        /// before fragment shader execution.
        const EARLY_FRAGMENT_TESTS = 0x00000100;

        /// Stage at which late fragment depth and stencil test is performed
        /// after fragment shader execution.
        const LATE_FRAGMENT_TESTS = 0x00000200;

        /// Stage at which color output of fragment shader is written
        /// and multisample resolve operation happens.
        const COLOR_ATTACHMENT_OUTPUT = 0x00000400;

        /// Stage at which compute shader is executed.
        const COMPUTE_SHADER = 0x00000800;

        /// Stage at which transfer commands (Copy, Blit etc) are executed.
        const TRANSFER = 0x00001000;

        /// Pseudo-stage that follows all other stages and doesn't execute any commands.
        /// Using it in first scope will make operations in second scope to wait for all operations first scope.
        /// Using it in second scope of dependency will
        /// not cause any waiting, because no operations should be waited upon.
        const BOTTOM_OF_PIPE = 0x00002000;

        /// Pseudo-stage at which HOST access to resources is performed.
        const HOST = 0x00004000;

        /// Flag that can be used instead of specifying all graphics stages.
        const ALL_GRAPHICS = 0x00008000;

        /// Flag that can be used instead of specifying all stages.
        const ALL_COMMANDS = 0x00010000;

        /// Every stage that executes graphics work.
        const GRAPHICS_STAGES = Self::DRAW_INDIRECT.bits
            | Self::VERTEX_INPUT.bits
            | Self::VERTEX_SHADER.bits
            | Self::TESSELLATION_CONTROL_SHADER.bits
            | Self::TESSELLATION_EVALUATION_SHADER.bits
            | Self::GEOMETRY_SHADER.bits
            | Self::FRAGMENT_SHADER.bits
            | Self::EARLY_FRAGMENT_TESTS.bits
            | Self::LATE_FRAGMENT_TESTS.bits
            | Self::COLOR_ATTACHMENT_OUTPUT.bits;

        /// Every stage that executes device work.
        const COMMAND_STAGES = Self::GRAPHICS_STAGES.bits
            | Self::COMPUTE_SHADER.bits
            | Self::TRANSFER.bits;
    }
}

impl PipelineStageFlags {
    const META: Self = Self::from_bits_truncate(
        Self::TOP_OF_PIPE.bits
            | Self::BOTTOM_OF_PIPE.bits
            | Self::ALL_GRAPHICS.bits
            | Self::ALL_COMMANDS.bits,
    );

    /// Stages that execute commands, with pseudo-stages expanded and removed.
    pub fn concrete(self) -> Self {
        let mut stages = self - Self::META;
        if self.contains(Self::ALL_GRAPHICS) {
            stages |= Self::GRAPHICS_STAGES;
        }
        if self.contains(Self::ALL_COMMANDS) {
            stages |= Self::COMMAND_STAGES;
        }
        stages
    }

    /// Stages waited upon when used as the source of a dependency.
    pub fn expand_first_scope(self) -> Self {
        if self.intersects(Self::BOTTOM_OF_PIPE) {
            self.concrete() | Self::COMMAND_STAGES
        } else {
            self.concrete()
        }
    }

    /// Stages that wait when used as the destination of a dependency.
    pub fn expand_second_scope(self) -> Self {
        if self.intersects(Self::TOP_OF_PIPE) {
            self.concrete() | Self::COMMAND_STAGES
        } else {
            self.concrete()
        }
    }

    /// Queue capabilities required to execute every stage in the mask.
    pub fn required_capabilities(self) -> QueueCapabilityFlags {
        let stages = self.concrete();
        let mut caps = QueueCapabilityFlags::empty();
        if stages.intersects(Self::GRAPHICS_STAGES) {
            caps |= QueueCapabilityFlags::GRAPHICS;
        }
        if stages.contains(Self::COMPUTE_SHADER) {
            caps |= QueueCapabilityFlags::COMPUTE;
        }
        caps
    }
}

bitflags::bitflags! {
    /// Flags for each of the shader stages.
    #[derive(Default)]
    #[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
    pub struct ShaderStageFlags: u32 {
        const VERTEX                    = 0b000001;
        const TESSELLATION_CONTROL      = 0b000010;
        const TESSELLATION_EVALUATION   = 0b000100;
        const GEOMETRY                  = 0b001000;
        const FRAGMENT                  = 0b010000;
        const COMPUTE                   = 0b100000;

        const ALL_GRAPHICS              = 0b011111;
        const ALL                       = 0b111111;
    }
}

impl ShaderStageFlags {
    /// Pipeline stages at which shaders of these stages execute.
    pub fn pipeline_stages(self) -> PipelineStageFlags {
        let mut stages = PipelineStageFlags::empty();
        if self.contains(Self::VERTEX) {
            stages |= PipelineStageFlags::VERTEX_SHADER;
        }
        if self.contains(Self::TESSELLATION_CONTROL) {
            stages |= PipelineStageFlags::TESSELLATION_CONTROL_SHADER;
        }
        if self.contains(Self::TESSELLATION_EVALUATION) {
            stages |= PipelineStageFlags::TESSELLATION_EVALUATION_SHADER;
        }
        if self.contains(Self::GEOMETRY) {
            stages |= PipelineStageFlags::GEOMETRY_SHADER;
        }
        if self.contains(Self::FRAGMENT) {
            stages |= PipelineStageFlags::FRAGMENT_SHADER;
        }
        if self.contains(Self::COMPUTE) {
            stages |= PipelineStageFlags::COMPUTE_SHADER;
        }
        stages
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pseudo_stages_expand() {
        assert_eq!(
            PipelineStageFlags::ALL_GRAPHICS.concrete(),
            PipelineStageFlags::GRAPHICS_STAGES
        );
        assert!(PipelineStageFlags::BOTTOM_OF_PIPE
            .expand_first_scope()
            .contains(PipelineStageFlags::TRANSFER));
        assert!(PipelineStageFlags::TOP_OF_PIPE
            .expand_second_scope()
            .contains(PipelineStageFlags::COMPUTE_SHADER));
        assert!(PipelineStageFlags::TOP_OF_PIPE.expand_first_scope().is_empty());
    }

    #[test]
    fn capabilities_follow_stages() {
        assert_eq!(
            PipelineStageFlags::TRANSFER.required_capabilities(),
            QueueCapabilityFlags::empty()
        );
        assert_eq!(
            (PipelineStageFlags::FRAGMENT_SHADER | PipelineStageFlags::COMPUTE_SHADER)
                .required_capabilities(),
            QueueCapabilityFlags::GRAPHICS | QueueCapabilityFlags::COMPUTE
        );
        assert_eq!(
            (ShaderStageFlags::VERTEX | ShaderStageFlags::FRAGMENT).pipeline_stages(),
            PipelineStageFlags::VERTEX_SHADER | PipelineStageFlags::FRAGMENT_SHADER
        );
    }
}
