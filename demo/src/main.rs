//! Replays a small frame with a few classic synchronization bugs
//! through the validation layer and prints what it finds.

use {
    std::sync::Arc,
    tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter},
    vigil::*,
};

const DEVICE: Handle = Handle(1);
const QUEUE: Handle = Handle(2);
const POOL: Handle = Handle(3);
const CB: Handle = Handle(4);
const MEMORY: Handle = Handle(5);
const STAGING: Handle = Handle(6);
const VERTICES: Handle = Handle(7);
const ALIAS: Handle = Handle(8);

fn buffer(size: u64) -> BufferInfo {
    BufferInfo {
        size,
        usage: BufferUsage::TRANSFER_SRC | BufferUsage::TRANSFER_DST | BufferUsage::VERTEX,
        flags: ResourceFlags::empty(),
    }
}

fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_error::ErrorLayer::default())
        .init();

    let log = Arc::new(ReportLog::new());
    let instance = Instance::new(ValidationConfig::default(), Reporter::new(log.clone()));
    let layer = instance.create_device(DEVICE, NullLayer)?;

    let setup = [
        ApiCall::GetQueue(QueueInfo {
            handle: QUEUE,
            family: 0,
            capabilities: QueueCapabilityFlags::all(),
        }),
        ApiCall::CreateCommandPool {
            handle: POOL,
            info: CommandPoolInfo {
                queue_family: 0,
                capabilities: QueueCapabilityFlags::all(),
                reset_command_buffer: true,
            },
        },
        ApiCall::AllocateCommandBuffers {
            pool: POOL,
            level: CommandBufferLevel::Primary,
            command_buffers: &[CB],
        },
        ApiCall::AllocateMemory {
            handle: MEMORY,
            size: 1 << 16,
            dedicated: None,
        },
        ApiCall::CreateBuffer {
            handle: STAGING,
            info: buffer(1024),
        },
        ApiCall::CreateBuffer {
            handle: VERTICES,
            info: buffer(1024),
        },
        ApiCall::CreateBuffer {
            handle: ALIAS,
            info: buffer(1024),
        },
        ApiCall::BindMemory {
            resource: ObjectId::buffer(STAGING),
            memory: MEMORY,
            offset: 0,
        },
        ApiCall::BindMemory {
            resource: ObjectId::buffer(VERTICES),
            memory: MEMORY,
            offset: 4096,
        },
        // Overlaps the vertex buffer.
        ApiCall::BindMemory {
            resource: ObjectId::buffer(ALIAS),
            memory: MEMORY,
            offset: 4608,
        },
        ApiCall::MapMemory {
            memory: MEMORY,
            offset: 0,
            size: 1024,
        },
    ];
    for call in &setup {
        layer.call(call)?;
    }

    let upload = [BufferCopy {
        src_offset: 0,
        dst_offset: 0,
        size: 1024,
    }];
    let frame = [
        Cmd::CopyBuffer {
            src_buffer: STAGING,
            dst_buffer: VERTICES,
            regions: &upload,
        },
        // Missing barrier between the upload and the copy reading it back.
        Cmd::CopyBuffer {
            src_buffer: ALIAS,
            dst_buffer: STAGING,
            regions: &upload,
        },
        Cmd::PipelineBarrier {
            src_stages: PipelineStageFlags::TRANSFER,
            dst_stages: PipelineStageFlags::TRANSFER,
            memory: &[MemoryBarrier {
                src_access: AccessFlags::TRANSFER_WRITE,
                dst_access: AccessFlags::TRANSFER_READ,
            }],
            buffers: &[],
            images: &[],
        },
        Cmd::FillBuffer {
            buffer: VERTICES,
            offset: 0,
            size: 256,
        },
    ];

    layer.call(&ApiCall::BeginCommandBuffer {
        command_buffer: CB,
        info: BeginInfo {
            usage: CommandBufferUsage::ONE_TIME_SUBMIT,
            inheritance: None,
        },
    })?;
    for cmd in frame {
        layer.call(&ApiCall::Record {
            command_buffer: CB,
            cmd,
        })?;
    }
    layer.call(&ApiCall::EndCommandBuffer { command_buffer: CB })?;

    let submits = [SubmitInfo {
        command_buffers: &[CB],
    }];
    let submit = ApiCall::QueueSubmit {
        queue: QUEUE,
        submits: &submits,
        fence: None,
    };
    layer.call(&submit)?;

    // Destroying the staging buffer while the submission is pending is refused.
    match layer.call(&ApiCall::Destroy(ObjectId::buffer(STAGING))) {
        Err(LayerError::Skipped) => tracing::info!("Destruction of in-use buffer was blocked"),
        other => eyre::bail!("Unexpected result of destroying an in-use buffer: {:?}", other),
    }
    layer.call(&ApiCall::QueueWaitIdle { queue: QUEUE })?;

    // Resubmitting a one-time submit buffer is reported.
    if let Err(err) = layer.call(&submit) {
        tracing::info!("Resubmission failed: {}", err);
    }
    layer.call(&ApiCall::DeviceWaitIdle)?;

    for report in log.reports() {
        println!("{:?} {}: {}", report.severity, report.code, report.message);
    }
    println!("{} reports", log.reports().len());

    instance.destroy_device(DEVICE);
    Ok(())
}
