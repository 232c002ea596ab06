use std::sync::{
    Arc, OnceLock,
    atomic::{AtomicUsize, Ordering},
};

use crate::{asset::MAX_DISPLAY_DIMENSION, error::InitError};

/// Format of source textures and of the render target.
pub const FRAME_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

static GPU_PROBE: OnceLock<bool> = OnceLock::new();

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
/// Which adapter to ask the instance for.
pub enum AdapterPreference {
    /// High performance first, then low power, then a software adapter.
    #[default]
    Auto,
    HighPerformance,
    LowPower,
    Fallback,
}

#[derive(Clone, Debug, Default)]
/// Snapshot of the adapter backing a surface.
pub struct RuntimeStatus {
    pub available: bool,
    pub adapter_vendor_id: Option<u32>,
    pub adapter_name: Option<String>,
    pub adapter_backend: Option<String>,
    pub adapter_driver: Option<String>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ResourceCounts {
    pub programs: usize,
    pub textures: usize,
    pub buffers: usize,
    pub samplers: usize,
}

impl ResourceCounts {
    pub fn total(&self) -> usize {
        self.programs + self.textures + self.buffers + self.samplers
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResourceKind {
    Program,
    Texture,
    Buffer,
    Sampler,
}

#[derive(Default)]
struct LedgerCounters {
    programs: AtomicUsize,
    textures: AtomicUsize,
    buffers: AtomicUsize,
    samplers: AtomicUsize,
}

impl LedgerCounters {
    fn slot(&self, kind: ResourceKind) -> &AtomicUsize {
        match kind {
            ResourceKind::Program => &self.programs,
            ResourceKind::Texture => &self.textures,
            ResourceKind::Buffer => &self.buffers,
            ResourceKind::Sampler => &self.samplers,
        }
    }
}

/// Live-handle counts for every GPU object created through one surface.
#[derive(Clone, Default)]
pub struct ResourceLedger {
    counters: Arc<LedgerCounters>,
}

impl ResourceLedger {
    /// Records a new live handle; the count drops when the entry is dropped.
    pub fn acquire(&self, kind: ResourceKind) -> LedgerEntry {
        self.counters.slot(kind).fetch_add(1, Ordering::Relaxed);
        LedgerEntry {
            counters: Arc::clone(&self.counters),
            kind,
        }
    }

    pub fn counts(&self) -> ResourceCounts {
        ResourceCounts {
            programs: self.counters.programs.load(Ordering::Relaxed),
            textures: self.counters.textures.load(Ordering::Relaxed),
            buffers: self.counters.buffers.load(Ordering::Relaxed),
            samplers: self.counters.samplers.load(Ordering::Relaxed),
        }
    }
}

pub struct LedgerEntry {
    counters: Arc<LedgerCounters>,
    kind: ResourceKind,
}

impl Drop for LedgerEntry {
    fn drop(&mut self) {
        self.counters.slot(self.kind).fetch_sub(1, Ordering::Relaxed);
    }
}

/// Texture that is destroyed and un-counted when dropped.
pub(crate) struct TrackedTexture {
    pub texture: wgpu::Texture,
    _entry: LedgerEntry,
}

impl TrackedTexture {
    pub fn new(ledger: &ResourceLedger, texture: wgpu::Texture) -> Self {
        Self {
            texture,
            _entry: ledger.acquire(ResourceKind::Texture),
        }
    }
}

impl Drop for TrackedTexture {
    fn drop(&mut self) {
        self.texture.destroy();
    }
}

/// Buffer that is destroyed and un-counted when dropped.
pub(crate) struct TrackedBuffer {
    pub buffer: wgpu::Buffer,
    _entry: LedgerEntry,
}

impl TrackedBuffer {
    pub fn new(ledger: &ResourceLedger, buffer: wgpu::Buffer) -> Self {
        Self {
            buffer,
            _entry: ledger.acquire(ResourceKind::Buffer),
        }
    }
}

impl Drop for TrackedBuffer {
    fn drop(&mut self) {
        self.buffer.destroy();
    }
}

/// Adapter, device and queue the render pipeline draws with.
pub struct GpuSurface {
    device: wgpu::Device,
    queue: wgpu::Queue,
    status: RuntimeStatus,
    max_texture_dimension: u32,
    ledger: ResourceLedger,
}

impl GpuSurface {
    /// Requests an adapter and device and checks they can run the pipeline.
    pub fn open(preference: AdapterPreference) -> Result<Self, InitError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
        let adapter = request_adapter(&instance, preference).ok_or_else(|| {
            InitError::SurfaceUnsupported("no compatible GPU adapter found".to_string())
        })?;
        let adapter_info = adapter.get_info();
        validate_adapter(&adapter)?;

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("deepfry_device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::downlevel_defaults()
                    .using_resolution(adapter.limits()),
                memory_hints: wgpu::MemoryHints::Performance,
            },
            None,
        ))
        .map_err(|err| {
            InitError::SurfaceUnsupported(format!(
                "device request failed on {}: {}",
                adapter_info.name, err
            ))
        })?;
        device.on_uncaptured_error(Box::new(|err: wgpu::Error| {
            tracing::error!(error = %err, "uncaptured wgpu error");
        }));

        let adapter_driver = if adapter_info.driver.trim().is_empty() {
            "unknown".to_string()
        } else {
            adapter_info.driver.clone()
        };
        let status = RuntimeStatus {
            available: true,
            adapter_vendor_id: Some(adapter_info.vendor),
            adapter_name: Some(adapter_info.name.clone()),
            adapter_backend: Some(adapter_info.backend.to_string()),
            adapter_driver: Some(adapter_driver),
        };
        let max_texture_dimension = device.limits().max_texture_dimension_2d;
        tracing::info!(
            adapter = %adapter_info.name,
            backend = %adapter_info.backend,
            max_texture_dimension,
            "gpu surface opened"
        );

        Ok(Self {
            device,
            queue,
            status,
            max_texture_dimension,
            ledger: ResourceLedger::default(),
        })
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    pub fn status(&self) -> &RuntimeStatus {
        &self.status
    }

    pub fn max_texture_dimension(&self) -> u32 {
        self.max_texture_dimension
    }

    pub fn ledger(&self) -> &ResourceLedger {
        &self.ledger
    }
}

/// Returns whether any adapter can open a [`GpuSurface`]; probed once per process.
pub fn is_available() -> bool {
    *GPU_PROBE.get_or_init(|| match GpuSurface::open(AdapterPreference::Auto) {
        Ok(_) => true,
        Err(err) => {
            tracing::warn!(error = %err, "gpu probe failed");
            false
        }
    })
}

fn request_adapter(
    instance: &wgpu::Instance,
    preference: AdapterPreference,
) -> Option<wgpu::Adapter> {
    let request = |power_preference, force_fallback_adapter| {
        pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference,
            force_fallback_adapter,
            compatible_surface: None,
        }))
    };
    match preference {
        AdapterPreference::HighPerformance => request(wgpu::PowerPreference::HighPerformance, false),
        AdapterPreference::LowPower => request(wgpu::PowerPreference::LowPower, false),
        AdapterPreference::Fallback => request(wgpu::PowerPreference::LowPower, true),
        AdapterPreference::Auto => request(wgpu::PowerPreference::HighPerformance, false)
            .or_else(|| request(wgpu::PowerPreference::LowPower, false))
            .or_else(|| request(wgpu::PowerPreference::LowPower, true)),
    }
}

fn validate_adapter(adapter: &wgpu::Adapter) -> Result<(), InitError> {
    let name = adapter.get_info().name;
    let max_dim = adapter.limits().max_texture_dimension_2d;
    if max_dim < MAX_DISPLAY_DIMENSION {
        return Err(InitError::SurfaceUnsupported(format!(
            "{name}: max texture dimension {max_dim} is below {MAX_DISPLAY_DIMENSION}"
        )));
    }

    let features = adapter.get_texture_format_features(FRAME_FORMAT);
    let required = wgpu::TextureUsages::RENDER_ATTACHMENT
        | wgpu::TextureUsages::TEXTURE_BINDING
        | wgpu::TextureUsages::COPY_SRC
        | wgpu::TextureUsages::COPY_DST;
    if !features.allowed_usages.contains(required) {
        return Err(InitError::SurfaceUnsupported(format!(
            "{name}: {FRAME_FORMAT:?} cannot be rendered to and read back"
        )));
    }
    if !features
        .flags
        .contains(wgpu::TextureFormatFeatureFlags::FILTERABLE)
    {
        return Err(InitError::SurfaceUnsupported(format!(
            "{name}: {FRAME_FORMAT:?} does not support linear filtering"
        )));
    }
    Ok(())
}
