use {
    crate::handle::ObjectId,
    parking_lot::Mutex,
    std::{
        fmt::{self, Debug, Display},
        ops::{BitOr, BitOrAssign},
        sync::Arc,
    },
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// Unique identifier of every violation the trackers can report.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
#[non_exhaustive]
pub enum ErrorCode {
    UnknownObject,
    InternalInconsistency,
    ObjectInUse,

    CommandBufferNotRecording,
    CommandBufferInvalid,
    CommandBufferUnrecorded,
    CommandBufferInFlight,
    CommandBufferOneTimeSubmit,
    CommandBufferResetNotAllowed,
    SecondaryCommandBufferSubmitted,
    ExecuteCommandsNotSecondary,
    RenderPassScope,
    RenderPassStillOpen,
    QueueCapability,
    QueueFamilyMismatch,

    SparseBindingDisabled,
    MemoryRebind,
    MemoryOutOfBounds,
    MemoryNotBound,
    MemoryAliasing,
    MemoryAlreadyMapped,
    MemoryNotMapped,
    FreedMemoryReferenced,
    InvalidMemoryRead,

    ReadAfterWrite,
    WriteAfterRead,
    WriteAfterWrite,

    DescriptorSetLayoutMismatch,
    DescriptorSetNotBound,
    DescriptorSetIncompatible,
    DescriptorSetInUse,
    DescriptorWriteMismatch,
    DescriptorPoolExhausted,
    PipelineNotBound,
    PipelineRenderPassMismatch,
    PushConstantRange,
    DynamicStateNotSet,
    IndexBufferNotBound,

    SubpassDependencyOrder,
    MissingSubpassDependency,
    SubpassAdvance,
    BarrierWithoutSelfDependency,
    BarrierStageMismatch,
    SubpassFeedbackWithoutBarrier,
    FramebufferIncompatible,

    QueryAlreadyActive,
    QueryNotActive,
    QueryStillActive,
    QueryNotReset,
    QueryNotAvailable,
    QueryOutOfRange,
    WaitEventsStageMask,
    FenceInUse,
}

impl ErrorCode {
    /// Stable identifier string.
    pub fn code(self) -> &'static str {
        match self {
            ErrorCode::UnknownObject => "VIGIL-unknown-object",
            ErrorCode::InternalInconsistency => "VIGIL-internal-inconsistency",
            ErrorCode::ObjectInUse => "VIGIL-object-in-use",
            ErrorCode::CommandBufferNotRecording => "VIGIL-cb-not-recording",
            ErrorCode::CommandBufferInvalid => "VIGIL-cb-invalid",
            ErrorCode::CommandBufferUnrecorded => "VIGIL-cb-unrecorded",
            ErrorCode::CommandBufferInFlight => "VIGIL-cb-in-flight",
            ErrorCode::CommandBufferOneTimeSubmit => "VIGIL-cb-one-time-submit",
            ErrorCode::CommandBufferResetNotAllowed => "VIGIL-cb-reset-not-allowed",
            ErrorCode::SecondaryCommandBufferSubmitted => "VIGIL-cb-secondary-submitted",
            ErrorCode::ExecuteCommandsNotSecondary => "VIGIL-cb-execute-not-secondary",
            ErrorCode::RenderPassScope => "VIGIL-cb-render-pass-scope",
            ErrorCode::RenderPassStillOpen => "VIGIL-cb-render-pass-open",
            ErrorCode::QueueCapability => "VIGIL-queue-capability",
            ErrorCode::QueueFamilyMismatch => "VIGIL-queue-family-mismatch",
            ErrorCode::SparseBindingDisabled => "VIGIL-mem-sparse-disabled",
            ErrorCode::MemoryRebind => "VIGIL-mem-rebind",
            ErrorCode::MemoryOutOfBounds => "VIGIL-mem-out-of-bounds",
            ErrorCode::MemoryNotBound => "VIGIL-mem-not-bound",
            ErrorCode::MemoryAliasing => "VIGIL-mem-aliasing",
            ErrorCode::MemoryAlreadyMapped => "VIGIL-mem-already-mapped",
            ErrorCode::MemoryNotMapped => "VIGIL-mem-not-mapped",
            ErrorCode::FreedMemoryReferenced => "VIGIL-mem-freed-referenced",
            ErrorCode::InvalidMemoryRead => "VIGIL-mem-invalid-read",
            ErrorCode::ReadAfterWrite => "VIGIL-hazard-read-after-write",
            ErrorCode::WriteAfterRead => "VIGIL-hazard-write-after-read",
            ErrorCode::WriteAfterWrite => "VIGIL-hazard-write-after-write",
            ErrorCode::DescriptorSetLayoutMismatch => "VIGIL-ds-layout-mismatch",
            ErrorCode::DescriptorSetNotBound => "VIGIL-ds-not-bound",
            ErrorCode::DescriptorSetIncompatible => "VIGIL-ds-incompatible",
            ErrorCode::DescriptorSetInUse => "VIGIL-ds-in-use",
            ErrorCode::DescriptorWriteMismatch => "VIGIL-ds-write-mismatch",
            ErrorCode::DescriptorPoolExhausted => "VIGIL-ds-pool-exhausted",
            ErrorCode::PipelineNotBound => "VIGIL-pipeline-not-bound",
            ErrorCode::PipelineRenderPassMismatch => "VIGIL-pipeline-render-pass-mismatch",
            ErrorCode::PushConstantRange => "VIGIL-push-constant-range",
            ErrorCode::DynamicStateNotSet => "VIGIL-dynamic-state-not-set",
            ErrorCode::IndexBufferNotBound => "VIGIL-index-buffer-not-bound",
            ErrorCode::SubpassDependencyOrder => "VIGIL-rp-dependency-order",
            ErrorCode::MissingSubpassDependency => "VIGIL-rp-missing-dependency",
            ErrorCode::SubpassAdvance => "VIGIL-rp-subpass-advance",
            ErrorCode::BarrierWithoutSelfDependency => "VIGIL-rp-barrier-no-self-dependency",
            ErrorCode::BarrierStageMismatch => "VIGIL-rp-barrier-stage-mismatch",
            ErrorCode::SubpassFeedbackWithoutBarrier => "VIGIL-rp-feedback-without-barrier",
            ErrorCode::FramebufferIncompatible => "VIGIL-rp-framebuffer-incompatible",
            ErrorCode::QueryAlreadyActive => "VIGIL-query-already-active",
            ErrorCode::QueryNotActive => "VIGIL-query-not-active",
            ErrorCode::QueryStillActive => "VIGIL-query-still-active",
            ErrorCode::QueryNotReset => "VIGIL-query-not-reset",
            ErrorCode::QueryNotAvailable => "VIGIL-query-not-available",
            ErrorCode::QueryOutOfRange => "VIGIL-query-out-of-range",
            ErrorCode::WaitEventsStageMask => "VIGIL-event-stage-mask",
            ErrorCode::FenceInUse => "VIGIL-fence-in-use",
        }
    }

    pub fn severity(self) -> Severity {
        match self {
            ErrorCode::MemoryAliasing
            | ErrorCode::FreedMemoryReferenced
            | ErrorCode::MissingSubpassDependency => Severity::Warning,
            _ => Severity::Error,
        }
    }

    /// Violations after which the call must not reach the driver,
    /// regardless of what the sink says.
    pub fn is_fatal(self) -> bool {
        matches!(
            self,
            ErrorCode::ObjectInUse
                | ErrorCode::CommandBufferNotRecording
                | ErrorCode::CommandBufferInvalid
                | ErrorCode::CommandBufferUnrecorded
                | ErrorCode::SecondaryCommandBufferSubmitted
        )
    }
}

impl Display for ErrorCode {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.write_str(self.code())
    }
}

/// One reported violation.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub struct Report {
    pub severity: Severity,
    pub object: Option<ObjectId>,
    pub code: ErrorCode,
    pub message: String,
}

impl Display for Report {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.object {
            Some(object) => write!(fmt, "[{}] {}: {}", self.code, object, self.message),
            None => write!(fmt, "[{}] {}", self.code, self.message),
        }
    }
}

/// Destination of validation reports.
pub trait ReportSink: Send + Sync {
    /// Receives a report.
    /// Returns `true` if the intercepted call should not be forwarded.
    fn report(&self, report: &Report) -> bool;
}

/// Sink that emits reports as log events.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingSink;

impl ReportSink for TracingSink {
    fn report(&self, report: &Report) -> bool {
        match report.severity {
            Severity::Info => info!("{}", report),
            Severity::Warning => warn!("{}", report),
            Severity::Error => error!("{}", report),
        }
        false
    }
}

/// Sink that keeps every report.
#[derive(Debug, Default)]
pub struct ReportLog {
    reports: Mutex<Vec<Report>>,
    skip_on_error: bool,
}

impl ReportLog {
    pub fn new() -> Self {
        ReportLog::default()
    }

    /// Log that asks to skip every call that produced an error.
    pub fn skipping() -> Self {
        ReportLog {
            reports: Mutex::new(Vec::new()),
            skip_on_error: true,
        }
    }

    pub fn reports(&self) -> Vec<Report> {
        self.reports.lock().clone()
    }

    pub fn take(&self) -> Vec<Report> {
        std::mem::take(&mut *self.reports.lock())
    }

    pub fn count(&self, code: ErrorCode) -> usize {
        self.reports
            .lock()
            .iter()
            .filter(|report| report.code == code)
            .count()
    }

    pub fn contains(&self, code: ErrorCode) -> bool {
        self.count(code) > 0
    }

    pub fn is_empty(&self) -> bool {
        self.reports.lock().is_empty()
    }
}

impl ReportSink for ReportLog {
    fn report(&self, report: &Report) -> bool {
        self.reports.lock().push(report.clone());
        self.skip_on_error && report.severity == Severity::Error
    }
}

/// Outcome of validating a call.
#[must_use]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Verdict {
    /// Call may be forwarded.
    #[default]
    Proceed,

    /// Call must not be forwarded.
    Skip,
}

impl Verdict {
    pub fn is_skip(self) -> bool {
        self == Verdict::Skip
    }
}

impl BitOr for Verdict {
    type Output = Verdict;

    fn bitor(self, rhs: Verdict) -> Verdict {
        if self.is_skip() || rhs.is_skip() {
            Verdict::Skip
        } else {
            Verdict::Proceed
        }
    }
}

impl BitOrAssign for Verdict {
    fn bitor_assign(&mut self, rhs: Verdict) {
        *self = *self | rhs;
    }
}

/// Front end to the sink used by the trackers.
#[derive(Clone)]
pub struct Reporter {
    sink: Arc<dyn ReportSink>,
}

impl Debug for Reporter {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("Reporter").finish_non_exhaustive()
    }
}

impl Default for Reporter {
    fn default() -> Self {
        Reporter::new(Arc::new(TracingSink))
    }
}

impl Reporter {
    pub fn new(sink: Arc<dyn ReportSink>) -> Self {
        Reporter { sink }
    }

    pub fn report(&self, code: ErrorCode, object: Option<ObjectId>, message: String) -> Verdict {
        let report = Report {
            severity: code.severity(),
            object,
            code,
            message,
        };
        let skip = self.sink.report(&report);
        if skip || (code.is_fatal() && report.severity == Severity::Error) {
            Verdict::Skip
        } else {
            Verdict::Proceed
        }
    }
}

#[cfg(test)]
mod tests {
    use {super::*, crate::handle::Handle};

    #[test]
    fn fatal_codes_skip() {
        let log = Arc::new(ReportLog::new());
        let reporter = Reporter::new(log.clone());

        let verdict = reporter.report(ErrorCode::ReadAfterWrite, None, "hazard".to_owned());
        assert_eq!(verdict, Verdict::Proceed);

        let verdict = reporter.report(
            ErrorCode::ObjectInUse,
            Some(ObjectId::buffer(Handle(1))),
            "in use".to_owned(),
        );
        assert!(verdict.is_skip());
        assert_eq!(log.reports().len(), 2);
    }

    #[test]
    fn skipping_log_skips_errors_only() {
        let reporter = Reporter::new(Arc::new(ReportLog::skipping()));
        assert!(reporter
            .report(ErrorCode::PipelineNotBound, None, String::new())
            .is_skip());
        assert!(!reporter
            .report(ErrorCode::MemoryAliasing, None, String::new())
            .is_skip());
    }

    #[test]
    fn verdicts_combine() {
        let mut verdict = Verdict::Proceed;
        verdict |= Verdict::Proceed;
        assert_eq!(verdict, Verdict::Proceed);
        verdict |= Verdict::Skip;
        assert_eq!(verdict | Verdict::Proceed, Verdict::Skip);
    }
}
