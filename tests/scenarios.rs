use {
    smallvec::smallvec,
    std::sync::Arc,
    vigil::*,
};

const POOL: Handle = Handle(1);
const CB: Handle = Handle(2);
const QUEUE: Handle = Handle(3);
const MEMORY: Handle = Handle(4);

struct Fixture {
    device: DeviceState,
    log: Arc<ReportLog>,
}

impl Fixture {
    fn new() -> Self {
        Fixture::with_log(ReportLog::new())
    }

    fn with_log(log: ReportLog) -> Self {
        let log = Arc::new(log);
        let mut device = DeviceState::new(
            ValidationConfig::default(),
            Reporter::new(log.clone()),
            Arc::new(Canonicalizer::new()),
        );
        device
            .get_queue(QueueInfo {
                handle: QUEUE,
                family: 0,
                capabilities: QueueCapabilityFlags::all(),
            })
            .unwrap();
        device
            .create_command_pool(
                POOL,
                CommandPoolInfo {
                    queue_family: 0,
                    capabilities: QueueCapabilityFlags::all(),
                    reset_command_buffer: true,
                },
            )
            .unwrap();
        device
            .allocate_command_buffers(POOL, CommandBufferLevel::Primary, &[CB])
            .unwrap();
        device.allocate_memory(MEMORY, 4096, None).unwrap();
        Fixture { device, log }
    }

    fn buffer(&mut self, handle: u64, size: u64, offset: u64) -> Handle {
        let handle = Handle(handle);
        let resource = ObjectId::buffer(handle);
        self.device
            .create_buffer(
                handle,
                BufferInfo {
                    size,
                    usage: BufferUsage::TRANSFER_SRC | BufferUsage::TRANSFER_DST,
                    flags: ResourceFlags::empty(),
                },
            )
            .unwrap();
        let _ = self.device.validate_bind_memory(resource, MEMORY, offset);
        self.device.bind_memory(resource, MEMORY, offset).unwrap();
        handle
    }

    fn begin(&mut self) {
        let verdict = self
            .device
            .begin_command_buffer(
                CB,
                BeginInfo {
                    usage: CommandBufferUsage::empty(),
                    inheritance: None,
                },
            )
            .unwrap();
        assert_eq!(verdict, Verdict::Proceed);
    }

    fn record(&mut self, cmd: Cmd<'_>) {
        let _ = self.device.record(CB, &cmd).unwrap();
    }

    /// Records a finished secondary command buffer.
    fn secondary(&mut self, handle: u64, cmds: &[Cmd<'_>]) -> Handle {
        let cb = Handle(handle);
        self.device
            .allocate_command_buffers(POOL, CommandBufferLevel::Secondary, &[cb])
            .unwrap();
        let verdict = self
            .device
            .begin_command_buffer(
                cb,
                BeginInfo {
                    usage: CommandBufferUsage::empty(),
                    inheritance: None,
                },
            )
            .unwrap();
        assert_eq!(verdict, Verdict::Proceed);
        for cmd in cmds {
            let _ = self.device.record(cb, cmd).unwrap();
        }
        assert_eq!(self.device.end_command_buffer(cb).unwrap(), Verdict::Proceed);
        cb
    }

    fn end(&mut self) -> Verdict {
        self.device.end_command_buffer(CB).unwrap()
    }

    fn submit(&mut self) -> Verdict {
        let submits = [SubmitInfo {
            command_buffers: &[CB],
        }];
        let verdict = self.device.validate_submit(QUEUE, &submits, None);
        if !verdict.is_skip() {
            self.device.submit(QUEUE, &submits, None).unwrap();
        }
        verdict
    }
}

fn copy(src_buffer: Handle, dst_buffer: Handle, size: u64) -> Cmd<'static> {
    let regions: &'static [BufferCopy] = Box::leak(Box::new([BufferCopy {
        src_offset: 0,
        dst_offset: 0,
        size,
    }]));
    Cmd::CopyBuffer {
        src_buffer,
        dst_buffer,
        regions,
    }
}

fn transfer_barrier() -> Cmd<'static> {
    Cmd::PipelineBarrier {
        src_stages: PipelineStageFlags::TRANSFER,
        dst_stages: PipelineStageFlags::TRANSFER,
        memory: &[],
        buffers: &[],
        images: &[],
    }
}

#[test]
fn aliased_buffers_hazard_through_shared_memory() {
    let mut fixture = Fixture::new();
    let b = fixture.buffer(10, 64, 0);
    assert!(!fixture.log.contains(ErrorCode::MemoryAliasing));

    let c = fixture.buffer(11, 64, 32);
    assert_eq!(fixture.log.count(ErrorCode::MemoryAliasing), 1);

    let scratch = fixture.buffer(12, 64, 1024);
    fixture.begin();
    fixture.record(Cmd::FillBuffer {
        buffer: b,
        offset: 0,
        size: 64,
    });
    fixture.record(copy(c, scratch, 64));

    let reports = fixture.log.reports();
    let hazard = reports
        .iter()
        .find(|report| report.code == ErrorCode::ReadAfterWrite)
        .expect("read of aliased memory is a hazard");
    assert_eq!(hazard.object, Some(ObjectId::buffer(c)));
}

#[test]
fn disjoint_ranges_do_not_hazard() {
    let mut fixture = Fixture::new();
    let b = fixture.buffer(10, 64, 0);
    let c = fixture.buffer(11, 64, 64);
    let scratch = fixture.buffer(12, 64, 1024);

    fixture.begin();
    fixture.record(Cmd::FillBuffer {
        buffer: b,
        offset: 0,
        size: 64,
    });
    fixture.record(copy(c, scratch, 64));
    assert!(!fixture.log.contains(ErrorCode::ReadAfterWrite));
    assert!(!fixture.log.contains(ErrorCode::MemoryAliasing));
}

#[test]
fn barrier_orders_copies() {
    let mut fixture = Fixture::new();
    let a = fixture.buffer(10, 64, 0);
    let b = fixture.buffer(11, 64, 128);
    let c = fixture.buffer(12, 64, 256);

    fixture.begin();
    fixture.record(copy(a, b, 64));
    fixture.record(transfer_barrier());
    fixture.record(copy(b, c, 64));
    assert!(fixture.log.is_empty(), "{:?}", fixture.log.reports());

    fixture.record(copy(c, a, 64));
    assert_eq!(fixture.log.count(ErrorCode::ReadAfterWrite), 1);
    assert_eq!(fixture.log.count(ErrorCode::WriteAfterRead), 1);
}

#[test]
fn destroyed_buffer_invalidates_command_buffer() {
    let mut fixture = Fixture::new();
    let b = fixture.buffer(10, 64, 0);

    fixture.begin();
    fixture.record(Cmd::FillBuffer {
        buffer: b,
        offset: 0,
        size: 64,
    });
    assert_eq!(fixture.end(), Verdict::Proceed);

    let id = ObjectId::buffer(b);
    assert_eq!(fixture.device.validate_destroy(id), Verdict::Proceed);
    fixture.device.destroy(id);
    assert_eq!(
        fixture.device.objects().command_buffers.state(CB).unwrap().state,
        CbState::InvalidComplete
    );

    assert!(fixture.submit().is_skip());
    let reports = fixture.log.reports();
    let invalid = reports
        .iter()
        .find(|report| report.code == ErrorCode::CommandBufferInvalid)
        .unwrap();
    assert!(invalid.message.contains(&id.to_string()));
}

#[test]
fn objects_stay_in_use_until_queue_idle() {
    let mut fixture = Fixture::new();
    let b = fixture.buffer(10, 64, 0);

    fixture.begin();
    fixture.record(Cmd::FillBuffer {
        buffer: b,
        offset: 0,
        size: 64,
    });
    let _ = fixture.end();
    assert_eq!(fixture.submit(), Verdict::Proceed);

    let id = ObjectId::buffer(b);
    assert!(fixture.device.objects().is_in_use(id));
    assert!(fixture.device.validate_destroy(id).is_skip());
    assert!(fixture.log.contains(ErrorCode::ObjectInUse));

    fixture.device.queue_wait_idle(QUEUE);
    assert!(!fixture.device.objects().is_in_use(id));
    assert_eq!(fixture.device.validate_destroy(id), Verdict::Proceed);
}

#[test]
fn read_of_unwritten_memory_is_reported_at_submit() {
    let mut fixture = Fixture::new();
    let a = fixture.buffer(10, 64, 0);
    let b = fixture.buffer(11, 64, 128);

    fixture.begin();
    fixture.record(copy(a, b, 64));
    let _ = fixture.end();
    assert!(!fixture.log.contains(ErrorCode::InvalidMemoryRead));

    let _ = fixture.submit();
    assert!(fixture.log.contains(ErrorCode::InvalidMemoryRead));
}

#[test]
fn query_must_be_reset_before_use() {
    let mut fixture = Fixture::new();
    fixture
        .device
        .create_query_pool(Handle(20), QueryPoolInfo { count: 4 })
        .unwrap();

    fixture.begin();
    fixture.record(Cmd::BeginQuery {
        pool: Handle(20),
        query: 0,
    });
    fixture.record(Cmd::EndQuery {
        pool: Handle(20),
        query: 0,
    });
    let _ = fixture.end();
    assert!(!fixture.log.contains(ErrorCode::QueryNotReset));

    let _ = fixture.submit();
    assert!(fixture.log.contains(ErrorCode::QueryNotReset));
}

#[test]
fn reset_query_becomes_available_after_retire() {
    let mut fixture = Fixture::new();
    let pool = Handle(20);
    fixture
        .device
        .create_query_pool(pool, QueryPoolInfo { count: 4 })
        .unwrap();

    fixture.begin();
    fixture.record(Cmd::ResetQueryPool {
        pool,
        first: 0,
        count: 4,
    });
    fixture.record(Cmd::WriteTimestamp {
        stage: PipelineStageFlags::BOTTOM_OF_PIPE,
        pool,
        query: 1,
    });
    let _ = fixture.end();
    assert_eq!(fixture.submit(), Verdict::Proceed);
    assert!(!fixture.log.contains(ErrorCode::QueryNotReset));

    let query = QueryObject { pool, query: 1 };
    assert_eq!(fixture.device.query_state(query), QueryState::Ended);
    fixture.device.device_wait_idle();
    assert_eq!(fixture.device.query_state(query), QueryState::Available);
}

fn color_pass() -> RenderPassInfo {
    RenderPassInfo {
        attachments: smallvec![AttachmentInfo {
            format: Format(37),
            samples: Samples::Samples1,
            load_op: AttachmentLoadOp::Clear,
            store_op: AttachmentStoreOp::Store,
        }],
        subpasses: smallvec![Subpass {
            colors: smallvec![0],
            ..Subpass::default()
        }],
        dependencies: smallvec![],
    }
}

fn render_target(fixture: &mut Fixture) -> (Handle, Handle) {
    let image = Handle(30);
    fixture
        .device
        .create_image(
            image,
            ImageInfo {
                format: Format(37),
                samples: Samples::Samples1,
                usage: ImageUsage::COLOR_ATTACHMENT,
                tiling: ImageTiling::Optimal,
                flags: ResourceFlags::empty(),
                size: 256,
            },
        )
        .unwrap();
    fixture
        .device
        .bind_memory(ObjectId::image(image), MEMORY, 2048)
        .unwrap();
    fixture
        .device
        .create_image_view(
            Handle(31),
            ImageViewInfo {
                image,
                format: Format(37),
            },
        )
        .unwrap();

    let info = color_pass();
    assert_eq!(fixture.device.validate_create_render_pass(&info), Verdict::Proceed);
    fixture.device.create_render_pass(Handle(32), info).unwrap();

    let framebuffer = FramebufferInfo {
        render_pass: Handle(32),
        attachments: vec![Handle(31)],
    };
    assert_eq!(
        fixture.device.validate_create_framebuffer(&framebuffer),
        Verdict::Proceed
    );
    fixture
        .device
        .create_framebuffer(Handle(33), framebuffer)
        .unwrap();
    (Handle(32), Handle(33))
}

#[test]
fn open_render_pass_keeps_recording() {
    let mut fixture = Fixture::new();
    let (render_pass, framebuffer) = render_target(&mut fixture);

    fixture.begin();
    fixture.record(Cmd::BeginRenderPass {
        render_pass,
        framebuffer,
    });
    let _ = fixture.end();
    assert!(fixture.log.contains(ErrorCode::RenderPassStillOpen));
    assert_eq!(
        fixture.device.objects().command_buffers.state(CB).unwrap().state,
        CbState::Recording
    );

    fixture.record(Cmd::EndRenderPass);
    assert_eq!(fixture.end(), Verdict::Proceed);
    assert_eq!(
        fixture.device.objects().command_buffers.state(CB).unwrap().state,
        CbState::Recorded
    );
}

#[test]
fn open_render_pass_end_is_skipped_on_request() {
    let mut fixture = Fixture::with_log(ReportLog::skipping());
    let (render_pass, framebuffer) = render_target(&mut fixture);

    fixture.begin();
    fixture.record(Cmd::BeginRenderPass {
        render_pass,
        framebuffer,
    });
    assert!(fixture.end().is_skip());
    assert!(fixture.log.contains(ErrorCode::RenderPassStillOpen));
}

#[test]
fn barrier_inside_subpass_needs_self_dependency() {
    let mut fixture = Fixture::new();
    let (render_pass, framebuffer) = render_target(&mut fixture);

    fixture.begin();
    fixture.record(Cmd::BeginRenderPass {
        render_pass,
        framebuffer,
    });
    fixture.record(Cmd::PipelineBarrier {
        src_stages: PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        dst_stages: PipelineStageFlags::FRAGMENT_SHADER,
        memory: &[],
        buffers: &[],
        images: &[],
    });
    assert!(fixture.log.contains(ErrorCode::BarrierWithoutSelfDependency));
}

#[test]
fn stored_attachment_is_readable_after_submit() {
    let mut fixture = Fixture::new();
    let (render_pass, framebuffer) = render_target(&mut fixture);
    let readback = fixture.buffer(40, 256, 3072);

    fixture.begin();
    fixture.record(Cmd::BeginRenderPass {
        render_pass,
        framebuffer,
    });
    fixture.record(Cmd::EndRenderPass);
    fixture.record(Cmd::PipelineBarrier {
        src_stages: PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        dst_stages: PipelineStageFlags::TRANSFER,
        memory: &[MemoryBarrier {
            src_access: AccessFlags::COLOR_ATTACHMENT_WRITE,
            dst_access: AccessFlags::TRANSFER_READ,
        }],
        buffers: &[],
        images: &[],
    });
    fixture.record(Cmd::CopyImageToBuffer {
        src_image: Handle(30),
        dst_buffer: readback,
    });
    let _ = fixture.end();
    assert_eq!(fixture.submit(), Verdict::Proceed);
    assert!(fixture.log.is_empty(), "{:?}", fixture.log.reports());
}

#[test]
fn secondary_begins_query_reset_by_primary() {
    let mut fixture = Fixture::new();
    let pool = Handle(20);
    fixture
        .device
        .create_query_pool(pool, QueryPoolInfo { count: 4 })
        .unwrap();
    let secondary = fixture.secondary(
        50,
        &[
            Cmd::BeginQuery { pool, query: 0 },
            Cmd::EndQuery { pool, query: 0 },
        ],
    );

    fixture.begin();
    fixture.record(Cmd::ResetQueryPool {
        pool,
        first: 0,
        count: 4,
    });
    fixture.record(Cmd::ExecuteCommands {
        command_buffers: &[secondary],
    });
    assert_eq!(fixture.end(), Verdict::Proceed);
    assert_eq!(fixture.submit(), Verdict::Proceed);
    assert!(fixture.log.is_empty(), "{:?}", fixture.log.reports());
    assert_eq!(
        fixture.device.query_state(QueryObject { pool, query: 0 }),
        QueryState::Ended
    );
}

#[test]
fn secondary_waits_on_event_set_by_primary() {
    let mut fixture = Fixture::new();
    let event = Handle(21);
    fixture.device.create_event(event).unwrap();
    let secondary = fixture.secondary(
        50,
        &[Cmd::WaitEvents {
            events: &[event],
            src_stages: PipelineStageFlags::TRANSFER,
            dst_stages: PipelineStageFlags::TRANSFER,
            memory: &[],
            buffers: &[],
            images: &[],
        }],
    );

    fixture.begin();
    fixture.record(Cmd::SetEvent {
        event,
        stages: PipelineStageFlags::TRANSFER,
    });
    fixture.record(Cmd::ExecuteCommands {
        command_buffers: &[secondary],
    });
    let _ = fixture.end();
    assert_eq!(fixture.submit(), Verdict::Proceed);
    assert!(!fixture.log.contains(ErrorCode::WaitEventsStageMask));
}

#[test]
fn secondary_query_before_primary_reset_is_reported() {
    let mut fixture = Fixture::new();
    let pool = Handle(20);
    fixture
        .device
        .create_query_pool(pool, QueryPoolInfo { count: 4 })
        .unwrap();
    let secondary = fixture.secondary(
        50,
        &[
            Cmd::BeginQuery { pool, query: 0 },
            Cmd::EndQuery { pool, query: 0 },
        ],
    );

    fixture.begin();
    fixture.record(Cmd::ExecuteCommands {
        command_buffers: &[secondary],
    });
    fixture.record(Cmd::ResetQueryPool {
        pool,
        first: 0,
        count: 4,
    });
    let _ = fixture.end();
    let _ = fixture.submit();
    assert!(fixture.log.contains(ErrorCode::QueryNotReset));
}

#[test]
fn destroying_object_of_secondary_invalidates_primary() {
    let mut fixture = Fixture::new();
    let b = fixture.buffer(10, 64, 0);
    let secondary = fixture.secondary(
        50,
        &[Cmd::FillBuffer {
            buffer: b,
            offset: 0,
            size: 64,
        }],
    );

    fixture.begin();
    fixture.record(Cmd::ExecuteCommands {
        command_buffers: &[secondary],
    });
    assert_eq!(fixture.end(), Verdict::Proceed);

    let cbs = fixture.device.objects().command_buffers.state(CB).unwrap();
    assert!(cbs.object_bindings.contains(&ObjectId::buffer(b)));
    assert!(cbs.object_bindings.contains(&ObjectId::command_buffer(secondary)));

    fixture.device.destroy(ObjectId::buffer(b));
    assert_eq!(
        fixture.device.objects().command_buffers.state(CB).unwrap().state,
        CbState::InvalidComplete
    );
    assert!(fixture.submit().is_skip());
    assert!(fixture.log.contains(ErrorCode::CommandBufferInvalid));
}

#[test]
fn secondary_cannot_be_submitted() {
    let mut fixture = Fixture::new();
    let b = fixture.buffer(10, 64, 0);
    let secondary = fixture.secondary(
        50,
        &[Cmd::FillBuffer {
            buffer: b,
            offset: 0,
            size: 64,
        }],
    );

    let submits = [SubmitInfo {
        command_buffers: &[secondary],
    }];
    assert!(fixture.device.validate_submit(QUEUE, &submits, None).is_skip());
    assert!(fixture.log.contains(ErrorCode::SecondaryCommandBufferSubmitted));
}

#[test]
fn submissions_to_different_queues_stage_separately() {
    let mut fixture = Fixture::new();
    let other_queue = Handle(5);
    let other_cb = Handle(6);
    let pool = Handle(20);
    fixture
        .device
        .get_queue(QueueInfo {
            handle: other_queue,
            family: 0,
            capabilities: QueueCapabilityFlags::all(),
        })
        .unwrap();
    fixture
        .device
        .allocate_command_buffers(POOL, CommandBufferLevel::Primary, &[other_cb])
        .unwrap();
    fixture
        .device
        .create_query_pool(pool, QueryPoolInfo { count: 4 })
        .unwrap();

    fixture.begin();
    fixture.record(Cmd::ResetQueryPool {
        pool,
        first: 0,
        count: 1,
    });
    fixture.record(Cmd::WriteTimestamp {
        stage: PipelineStageFlags::BOTTOM_OF_PIPE,
        pool,
        query: 0,
    });
    let _ = fixture.end();

    let _ = fixture
        .device
        .begin_command_buffer(
            other_cb,
            BeginInfo {
                usage: CommandBufferUsage::empty(),
                inheritance: None,
            },
        )
        .unwrap();
    let _ = fixture
        .device
        .record(
            other_cb,
            &Cmd::ResetQueryPool {
                pool,
                first: 2,
                count: 1,
            },
        )
        .unwrap();
    let _ = fixture.device.end_command_buffer(other_cb).unwrap();

    // Both submissions are validated before either is recorded.
    let first = [SubmitInfo {
        command_buffers: &[CB],
    }];
    let second = [SubmitInfo {
        command_buffers: &[other_cb],
    }];
    assert_eq!(fixture.device.validate_submit(QUEUE, &first, None), Verdict::Proceed);
    assert_eq!(
        fixture.device.validate_submit(other_queue, &second, None),
        Verdict::Proceed
    );
    fixture.device.submit(QUEUE, &first, None).unwrap();
    fixture.device.submit(other_queue, &second, None).unwrap();

    assert_eq!(
        fixture.device.query_state(QueryObject { pool, query: 0 }),
        QueryState::Ended
    );
    assert_eq!(
        fixture.device.query_state(QueryObject { pool, query: 2 }),
        QueryState::Reset
    );
}
