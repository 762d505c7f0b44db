bitflags::bitflags! {
    /// Flags for memory access types.
    #[derive(Default)]
    #[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
    pub struct AccessFlags: u32 {
        /// Read access to indirect command data
        /// read as part of an indirect drawing or dispatch command.
        const INDIRECT_COMMAND_READ = 0x00000001;

        /// Read access to an index buffer as part of an indexed drawing command
        const INDEX_READ = 0x00000002;

        /// Read access to a vertex buffer as part of a drawing command
        const VERTEX_ATTRIBUTE_READ = 0x00000004;

        /// Read access to a uniform buffer.
        const UNIFORM_READ = 0x00000008;

        /// Read access to an input attachment
        /// within a render pass during fragment shading.
        const INPUT_ATTACHMENT_READ = 0x00000010;

        /// Read access to a storage buffer, uniform texel buffer,
        /// storage texel buffer, sampled image, or storage image.
        const SHADER_READ = 0x00000020;

        /// Write access to a storage buffer,
        /// storage texel buffer, or storage image.
        const SHADER_WRITE = 0x00000040;

        /// Read access to a color attachment,
        /// such as via blending or logic operations.
        const COLOR_ATTACHMENT_READ = 0x00000080;

        /// Write access to a color or resolve attachment during a render pass.
        const COLOR_ATTACHMENT_WRITE = 0x00000100;

        /// Read access to a depth/stencil attachment.
        const DEPTH_STENCIL_ATTACHMENT_READ = 0x00000200;

        /// Write access to a depth/stencil attachment.
        const DEPTH_STENCIL_ATTACHMENT_WRITE = 0x00000400;

        /// Read access to an image or buffer in a copy operation.
        const TRANSFER_READ = 0x00000800;

        /// Write access to an image or buffer in a clear or copy operation.
        const TRANSFER_WRITE = 0x00001000;

        /// Read access by a host operation.
        const HOST_READ = 0x00002000;

        /// Write access by a host operation.
        const HOST_WRITE = 0x00004000;

        /// All read accesses.
        const MEMORY_READ = 0x00008000;

        /// All write accesses.
        const MEMORY_WRITE = 0x00010000;

        const ALL_READS = Self::INDIRECT_COMMAND_READ.bits
            | Self::INDEX_READ.bits
            | Self::VERTEX_ATTRIBUTE_READ.bits
            | Self::UNIFORM_READ.bits
            | Self::INPUT_ATTACHMENT_READ.bits
            | Self::SHADER_READ.bits
            | Self::COLOR_ATTACHMENT_READ.bits
            | Self::DEPTH_STENCIL_ATTACHMENT_READ.bits
            | Self::TRANSFER_READ.bits
            | Self::HOST_READ.bits
            | Self::MEMORY_READ.bits;

        const ALL_WRITES = Self::SHADER_WRITE.bits
            | Self::COLOR_ATTACHMENT_WRITE.bits
            | Self::DEPTH_STENCIL_ATTACHMENT_WRITE.bits
            | Self::TRANSFER_WRITE.bits
            | Self::HOST_WRITE.bits
            | Self::MEMORY_WRITE.bits;
    }
}

impl AccessFlags {
    /// Replaces `MEMORY_READ` and `MEMORY_WRITE` with every access they stand for.
    pub fn expand(self) -> Self {
        let mut expanded = self;
        if self.contains(Self::MEMORY_READ) {
            expanded |= Self::ALL_READS;
        }
        if self.contains(Self::MEMORY_WRITE) {
            expanded |= Self::ALL_WRITES;
        }
        expanded
    }
}
