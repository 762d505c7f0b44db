use {
    crate::{
        config::ValidationConfig,
        handle::Handle,
        registry::{InUse, Objects},
        report::Reporter,
        stage::PipelineStageFlags,
    },
    hashbrown::HashMap,
    std::collections::VecDeque,
};

bitflags::bitflags! {
    /// Queue capability flags.
    #[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
    pub struct QueueCapabilityFlags: u32 {
        const TRANSFER  = 0b001;
        const COMPUTE   = 0b010;
        const GRAPHICS  = 0b100;
    }
}

impl QueueCapabilityFlags {
    /// Check if queue with those flags supports every capability in `required`.
    /// Graphics and compute queues support transfer implicitly.
    pub fn covers(&self, required: QueueCapabilityFlags) -> bool {
        let mut caps = *self;
        if caps.intersects(Self::GRAPHICS | Self::COMPUTE) {
            caps |= Self::TRANSFER;
        }
        caps.contains(required)
    }
}

/// Queue retrieved from the device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub struct QueueInfo {
    pub handle: Handle,
    pub family: u32,
    pub capabilities: QueueCapabilityFlags,
}

/// Work accepted by a queue and not yet known to be complete.
#[derive(Debug)]
pub struct Submission {
    pub command_buffers: Vec<Handle>,

    /// In-use counters acquired for the submission.
    pub in_use: Vec<InUse>,
    pub fence: Option<Handle>,

    /// Queries whose results become available once the submission completes.
    pub queries: Vec<QueryObject>,
}

impl Submission {
    pub(crate) fn retire(self) {
        for in_use in &self.in_use {
            in_use.release();
        }
    }
}

#[derive(Debug)]
pub struct QueueState {
    pub family: u32,
    pub capabilities: QueueCapabilityFlags,

    /// Stage masks events were last set with by work submitted to this queue.
    pub event_stages: HashMap<Handle, PipelineStageFlags>,

    pub submissions: VecDeque<Submission>,
}

impl QueueState {
    pub fn new(info: QueueInfo) -> Self {
        QueueState {
            family: info.family,
            capabilities: info.capabilities,
            event_stages: HashMap::new(),
            submissions: VecDeque::new(),
        }
    }
}

/// One batch of command buffers submitted together.
#[derive(Clone, Copy, Debug)]
pub struct SubmitInfo<'a> {
    pub command_buffers: &'a [Handle],
}

/// Query slot within a pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryObject {
    pub pool: Handle,
    pub query: u32,
}

/// Device-visible state of a query slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum QueryState {
    Unknown,
    Reset,
    Running,
    Ended,
    Available,
}

impl Default for QueryState {
    fn default() -> Self {
        QueryState::Unknown
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub struct QueryPoolInfo {
    pub count: u32,
}

#[derive(Debug)]
pub struct QueryPoolState {
    pub info: QueryPoolInfo,
}

#[derive(Debug, Default)]
pub struct EventState {
    /// Event was signaled from the host.
    pub host_signaled: bool,
}

#[derive(Debug, Default)]
pub struct FenceState {
    /// Fence was submitted and has not been waited upon.
    pub pending: bool,
}

/// State available to checks deferred until submission.
///
/// Query and event state is staged here while the submission is validated
/// and committed only if the whole submission is accepted.
#[derive(Debug)]
pub struct SubmitContext<'a> {
    pub objects: &'a mut Objects,
    pub reporter: &'a Reporter,
    pub config: &'a ValidationConfig,
    pub queue: Handle,

    /// Device query state before the submission.
    pub device_queries: &'a HashMap<QueryObject, QueryState>,

    /// Query state changes made by already validated command buffers.
    pub queries: HashMap<QueryObject, QueryState>,

    /// Event stage masks visible to the command buffer being validated.
    pub event_stages: HashMap<Handle, PipelineStageFlags>,
}

impl SubmitContext<'_> {
    pub fn query_state(&self, query: QueryObject) -> QueryState {
        self.queries
            .get(&query)
            .or_else(|| self.device_queries.get(&query))
            .copied()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transfer_is_implied_by_other_capabilities() {
        assert!(QueueCapabilityFlags::GRAPHICS.covers(QueueCapabilityFlags::TRANSFER));
        assert!(!QueueCapabilityFlags::TRANSFER.covers(QueueCapabilityFlags::COMPUTE));
        assert!(QueueCapabilityFlags::COMPUTE.covers(QueueCapabilityFlags::TRANSFER));
        assert!(!QueueCapabilityFlags::TRANSFER.covers(QueueCapabilityFlags::GRAPHICS));
    }

    #[test]
    fn staged_queries_shadow_device_state() {
        let mut objects = Objects::new();
        let reporter = Reporter::default();
        let config = ValidationConfig::default();
        let query = QueryObject {
            pool: Handle(1),
            query: 3,
        };
        let mut device_queries = HashMap::new();
        device_queries.insert(query, QueryState::Available);

        let mut context = SubmitContext {
            objects: &mut objects,
            reporter: &reporter,
            config: &config,
            queue: Handle(2),
            device_queries: &device_queries,
            queries: HashMap::new(),
            event_stages: HashMap::new(),
        };
        assert_eq!(context.query_state(query), QueryState::Available);
        context.queries.insert(query, QueryState::Reset);
        assert_eq!(context.query_state(query), QueryState::Reset);
        assert_eq!(
            context.query_state(QueryObject {
                pool: Handle(1),
                query: 4
            }),
            QueryState::Unknown
        );
    }
}
