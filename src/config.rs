use crate::handle::ObjectType;

/// Check name that does not correspond to any check category.
#[derive(Clone, Debug, thiserror::Error, PartialEq, Eq)]
#[error("Unknown check category `{name}`")]
pub struct UnknownCheck {
    pub name: String,
}

macro_rules! define_checks {
    ($($(#[$meta:meta])* $name:ident,)*) => {
        /// Per-category switches for validation checks.
        ///
        /// All checks are enabled by default.
        /// Setting a flag makes the corresponding check silently skipped.
        #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
        #[cfg_attr(
            feature = "serde-1",
            derive(serde::Serialize, serde::Deserialize),
            serde(default)
        )]
        pub struct CheckDisabled {
            $($(#[$meta])* pub $name: bool,)*
        }

        impl CheckDisabled {
            /// Names accepted by [`CheckDisabled::set`].
            pub const NAMES: &'static [&'static str] = &[$(stringify!($name),)*];

            pub fn set_all(&mut self, disabled: bool) {
                $(self.$name = disabled;)*
            }

            /// Sets check by name. `"all"` sets every check.
            pub fn set(&mut self, name: &str, disabled: bool) -> Result<(), UnknownCheck> {
                match name {
                    $(stringify!($name) => self.$name = disabled,)*
                    "all" => self.set_all(disabled),
                    _ => {
                        return Err(UnknownCheck {
                            name: name.to_owned(),
                        })
                    }
                }
                Ok(())
            }
        }
    };
}

define_checks! {
    /// Command buffer state transitions and recording state.
    command_buffer_state,
    /// Destruction or modification of objects used by pending command buffers.
    object_in_use,
    destroy_buffer,
    destroy_image,
    destroy_buffer_view,
    destroy_image_view,
    destroy_sampler,
    destroy_pipeline,
    destroy_descriptor_pool,
    destroy_framebuffer,
    destroy_render_pass,
    destroy_command_pool,
    destroy_event,
    destroy_query_pool,
    destroy_fence,
    free_memory,
    /// Freeing or updating descriptor sets that are still in use.
    idle_descriptor_set,
    allocate_descriptor_sets,
    update_descriptor_sets,
    push_constant_range,
    /// Memory binding preconditions: rebind, bounds, unbound use.
    memory_binding,
    memory_aliasing,
    /// Reads of memory with undefined content.
    memory_validity,
    /// Unsynchronized read/write hazards.
    memory_hazard,
    pipeline_layout_compatibility,
    render_pass,
    query_state,
    event_state,
    queue_capabilities,
    dynamic_state,
}

impl CheckDisabled {
    /// Builds configuration with checks from `names` disabled.
    pub fn from_names<'a>(names: impl IntoIterator<Item = &'a str>) -> Result<Self, UnknownCheck> {
        let mut disabled = CheckDisabled::default();
        for name in names {
            disabled.set(name.trim(), true)?;
        }
        Ok(disabled)
    }

    /// Returns `true` if destruction checks for objects of this type are enabled.
    pub fn destroy_check(&self, ty: ObjectType) -> bool {
        let disabled = match ty {
            ObjectType::Buffer => self.destroy_buffer,
            ObjectType::Image => self.destroy_image,
            ObjectType::BufferView => self.destroy_buffer_view,
            ObjectType::ImageView => self.destroy_image_view,
            ObjectType::Sampler => self.destroy_sampler,
            ObjectType::DeviceMemory => self.free_memory,
            ObjectType::DescriptorPool => self.destroy_descriptor_pool,
            ObjectType::DescriptorSet => self.idle_descriptor_set,
            ObjectType::Pipeline => self.destroy_pipeline,
            ObjectType::RenderPass => self.destroy_render_pass,
            ObjectType::Framebuffer => self.destroy_framebuffer,
            ObjectType::QueryPool => self.destroy_query_pool,
            ObjectType::Event => self.destroy_event,
            ObjectType::Fence => self.destroy_fence,
            ObjectType::CommandPool | ObjectType::CommandBuffer => self.destroy_command_pool,
            ObjectType::DescriptorSetLayout
            | ObjectType::PipelineLayout
            | ObjectType::Swapchain => false,
        };
        !disabled && !self.object_in_use
    }
}

/// Optional device features that change how resources may be bound.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(
    feature = "serde-1",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
pub struct EnabledFeatures {
    pub sparse_binding: bool,
    pub sparse_residency_aliased: bool,
}

/// Device limits consulted by the trackers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceLimits {
    /// Granularity at which linear and non-linear resources
    /// placed in the same allocation may alias.
    pub buffer_image_granularity: u64,
}

impl Default for DeviceLimits {
    fn default() -> Self {
        DeviceLimits {
            buffer_image_granularity: 1,
        }
    }
}

/// Configuration supplied once when device state is created.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(
    feature = "serde-1",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
pub struct ValidationConfig {
    pub disabled: CheckDisabled,
    pub features: EnabledFeatures,
    pub limits: DeviceLimits,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checks_parse_by_name() {
        let disabled = CheckDisabled::from_names(["memory_hazard", " render_pass"]).unwrap();
        assert!(disabled.memory_hazard);
        assert!(disabled.render_pass);
        assert!(!disabled.memory_aliasing);

        let err = CheckDisabled::from_names(["nope"]).unwrap_err();
        assert_eq!(err.name, "nope");

        let all = CheckDisabled::from_names(["all"]).unwrap();
        assert!(CheckDisabled::NAMES.len() > 20);
        assert!(all.dynamic_state && all.command_buffer_state);
    }

    #[test]
    fn destroy_checks_follow_object_in_use() {
        let mut disabled = CheckDisabled::default();
        assert!(disabled.destroy_check(ObjectType::Buffer));
        disabled.destroy_buffer = true;
        assert!(!disabled.destroy_check(ObjectType::Buffer));
        assert!(disabled.destroy_check(ObjectType::Image));
        disabled.object_in_use = true;
        assert!(!disabled.destroy_check(ObjectType::Image));
    }
}
