use std::sync::mpsc;

use image::RgbaImage;
use wgpu::util::DeviceExt;

use crate::{
    asset::ImageAsset,
    error::{DeepFryError, InitError, Result},
    params::EffectParameters,
};

use super::{
    gpu::{
        FRAME_FORMAT, GpuSurface, LedgerEntry, ResourceKind, ResourceLedger, TrackedBuffer,
        TrackedTexture,
    },
    shader::{EffectUniforms, POSITION_SLOT, ShaderProgram, TEX_COORD_SLOT},
};

/// Two triangles covering clip space.
const QUAD_POSITIONS: [[f32; 2]; 6] = [
    [-1.0, -1.0],
    [1.0, -1.0],
    [-1.0, 1.0],
    [-1.0, 1.0],
    [1.0, -1.0],
    [1.0, 1.0],
];

/// Texture row 0 maps to the top of the target.
const QUAD_TEX_COORDS: [[f32; 2]; 6] = [
    [0.0, 1.0],
    [1.0, 1.0],
    [0.0, 0.0],
    [0.0, 0.0],
    [1.0, 1.0],
    [1.0, 0.0],
];

struct SourceTexture {
    tracked: TrackedTexture,
    view: wgpu::TextureView,
    extent: wgpu::Extent3d,
}

struct RenderTarget {
    tracked: TrackedTexture,
    view: wgpu::TextureView,
    extent: wgpu::Extent3d,
}

/// Everything needed to draw the effect chain into an off-screen target.
///
/// Built only when the surface and both shader stages are valid; dropping it
/// (or calling [`RenderContext::close`]) releases every GPU handle it owns.
pub struct RenderContext {
    device: wgpu::Device,
    queue: wgpu::Queue,
    program: ShaderProgram,
    positions: TrackedBuffer,
    tex_coords: TrackedBuffer,
    uniforms: TrackedBuffer,
    sampler: wgpu::Sampler,
    _sampler_entry: LedgerEntry,
    source: Option<SourceTexture>,
    target: Option<RenderTarget>,
    bind_group: Option<wgpu::BindGroup>,
    rendered: bool,
    max_texture_dimension: u32,
    ledger: ResourceLedger,
}

impl RenderContext {
    pub fn open(surface: &GpuSurface) -> std::result::Result<Self, InitError> {
        let program = ShaderProgram::build(surface)?;
        let device = surface.device().clone();
        let ledger = surface.ledger().clone();

        let positions = TrackedBuffer::new(
            &ledger,
            device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("deepfry_quad_positions"),
                contents: bytemuck::cast_slice(&QUAD_POSITIONS),
                usage: wgpu::BufferUsages::VERTEX,
            }),
        );
        let tex_coords = TrackedBuffer::new(
            &ledger,
            device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("deepfry_quad_tex_coords"),
                contents: bytemuck::cast_slice(&QUAD_TEX_COORDS),
                usage: wgpu::BufferUsages::VERTEX,
            }),
        );
        let uniforms = TrackedBuffer::new(
            &ledger,
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("deepfry_uniforms"),
                size: std::mem::size_of::<EffectUniforms>() as u64,
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            }),
        );
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("deepfry_sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });
        let sampler_entry = ledger.acquire(ResourceKind::Sampler);

        tracing::debug!("render context opened");
        Ok(Self {
            device,
            queue: surface.queue().clone(),
            program,
            positions,
            tex_coords,
            uniforms,
            sampler,
            _sampler_entry: sampler_entry,
            source: None,
            target: None,
            bind_group: None,
            rendered: false,
            max_texture_dimension: surface.max_texture_dimension(),
            ledger,
        })
    }

    /// Replaces the source texture contents with the asset's bitmap.
    ///
    /// The texture is reused when the size is unchanged and recreated
    /// otherwise. The previous frame stays readable until the next render.
    pub fn upload(&mut self, asset: &ImageAsset) {
        let resized;
        let bitmap = if asset.width() > self.max_texture_dimension
            || asset.height() > self.max_texture_dimension
        {
            let (w, h) = fit_within(asset.width(), asset.height(), self.max_texture_dimension);
            tracing::warn!(
                width = asset.width(),
                height = asset.height(),
                limit = self.max_texture_dimension,
                "asset exceeds texture limit, downscaling"
            );
            resized = image::imageops::resize(
                asset.bitmap(),
                w,
                h,
                image::imageops::FilterType::Triangle,
            );
            &resized
        } else {
            asset.bitmap()
        };

        let extent = wgpu::Extent3d {
            width: bitmap.width(),
            height: bitmap.height(),
            depth_or_array_layers: 1,
        };
        let reuse = self
            .source
            .as_ref()
            .is_some_and(|source| source.extent == extent);
        if !reuse {
            self.bind_group = None;
            self.source = None;
            let texture = self.device.create_texture(&wgpu::TextureDescriptor {
                label: Some("deepfry_source"),
                size: extent,
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: FRAME_FORMAT,
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            });
            let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
            self.source = Some(SourceTexture {
                tracked: TrackedTexture::new(&self.ledger, texture),
                view,
                extent,
            });
        }

        if let Some(source) = &self.source {
            self.queue.write_texture(
                source.tracked.texture.as_image_copy(),
                bitmap.as_raw(),
                wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(extent.width.saturating_mul(4)),
                    rows_per_image: Some(extent.height),
                },
                extent,
            );
        }
        if self.bind_group.is_none() {
            self.bind_group = self.source.as_ref().map(|source| {
                self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("deepfry_bg"),
                    layout: self.program.bind_group_layout(),
                    entries: &[
                        wgpu::BindGroupEntry {
                            binding: 0,
                            resource: wgpu::BindingResource::TextureView(&source.view),
                        },
                        wgpu::BindGroupEntry {
                            binding: 1,
                            resource: wgpu::BindingResource::Sampler(&self.sampler),
                        },
                        wgpu::BindGroupEntry {
                            binding: 2,
                            resource: self.uniforms.buffer.as_entire_binding(),
                        },
                    ],
                })
            });
        }
        tracing::debug!(
            source = asset.source_name(),
            width = extent.width,
            height = extent.height,
            reused = reuse,
            "texture uploaded"
        );
    }

    /// Size of the most recently rendered frame.
    pub fn frame_size(&self) -> Option<(u32, u32)> {
        if !self.rendered {
            return None;
        }
        self.target
            .as_ref()
            .map(|target| (target.extent.width, target.extent.height))
    }

    /// Draws one frame at `surface_size` and waits for the GPU to finish it.
    pub fn render(&mut self, params: &EffectParameters, surface_size: (u32, u32)) -> Result<()> {
        let Some(bind_group) = &self.bind_group else {
            return Err(DeepFryError::NoAsset);
        };
        let (width, height) = surface_size;
        if width == 0 || height == 0 {
            return Err(DeepFryError::RenderAborted(format!(
                "surface size {width}x{height} has no pixels"
            )));
        }
        let extent = wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        };
        if self
            .target
            .as_ref()
            .is_none_or(|target| target.extent != extent)
        {
            self.rendered = false;
            self.target = None;
            let texture = self.device.create_texture(&wgpu::TextureDescriptor {
                label: Some("deepfry_target"),
                size: extent,
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: FRAME_FORMAT,
                usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
                view_formats: &[],
            });
            let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
            self.target = Some(RenderTarget {
                tracked: TrackedTexture::new(&self.ledger, texture),
                view,
                extent,
            });
        }
        let Some(target) = &self.target else {
            return Err(DeepFryError::RenderAborted("render target missing".to_string()));
        };

        let started = std::time::Instant::now();
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let uniforms = EffectUniforms::from_params(params, surface_size);
        self.queue
            .write_buffer(&self.uniforms.buffer, 0, bytemuck::bytes_of(&uniforms));

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("deepfry_encoder"),
            });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("deepfry_pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &target.view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(self.program.pipeline());
            pass.set_bind_group(0, bind_group, &[]);
            pass.set_vertex_buffer(POSITION_SLOT, self.positions.buffer.slice(..));
            pass.set_vertex_buffer(TEX_COORD_SLOT, self.tex_coords.buffer.slice(..));
            pass.draw(0..QUAD_POSITIONS.len() as u32, 0..1);
        }
        let index = self.queue.submit([encoder.finish()]);
        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            self.rendered = false;
            tracing::error!(error = %err, "render rejected by validation");
            return Err(DeepFryError::RenderAborted(err.to_string()));
        }
        let _ = self.device.poll(wgpu::Maintain::wait_for(index));

        self.rendered = true;
        tracing::debug!(
            width,
            height,
            elapsed_ms = started.elapsed().as_secs_f64() * 1000.0,
            "frame rendered"
        );
        Ok(())
    }

    /// Copies the most recently rendered frame back to the CPU.
    pub fn read_frame(&self) -> Result<RgbaImage> {
        let target = match &self.target {
            Some(target) if self.rendered => target,
            _ => return Err(DeepFryError::NoRenderedFrame),
        };
        let out_w = target.extent.width;
        let out_h = target.extent.height;

        let unpadded_bytes_per_row = out_w.saturating_mul(4);
        let padded_bytes_per_row = unpadded_bytes_per_row
            .div_ceil(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT)
            * wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let readback = TrackedBuffer::new(
            &self.ledger,
            self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("deepfry_readback"),
                size: padded_bytes_per_row as u64 * out_h as u64,
                usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
                mapped_at_creation: false,
            }),
        );

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("deepfry_readback_encoder"),
            });
        encoder.copy_texture_to_buffer(
            target.tracked.texture.as_image_copy(),
            wgpu::TexelCopyBufferInfo {
                buffer: &readback.buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_bytes_per_row),
                    rows_per_image: Some(out_h),
                },
            },
            target.extent,
        );
        self.queue.submit([encoder.finish()]);

        let slice = readback.buffer.slice(..);
        let (tx, rx) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        let _ = self.device.poll(wgpu::Maintain::wait());
        match rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                tracing::error!(error = %err, "readback map failed");
                return Err(DeepFryError::readback(err.to_string()));
            }
            Err(_) => return Err(DeepFryError::readback("map callback never ran")),
        }

        let mapped = slice.get_mapped_range();
        let unpadded = unpadded_bytes_per_row as usize;
        let padded = padded_bytes_per_row as usize;
        let mut out = vec![0_u8; unpadded * out_h as usize];
        for (row, dst) in out.chunks_exact_mut(unpadded).enumerate() {
            let src_offset = row * padded;
            dst.copy_from_slice(&mapped[src_offset..src_offset + unpadded]);
        }
        drop(mapped);
        readback.buffer.unmap();

        RgbaImage::from_raw(out_w, out_h, out)
            .ok_or_else(|| DeepFryError::readback("frame buffer size mismatch"))
    }

    /// Releases every GPU handle owned by this context.
    pub fn close(self) {
        let device = self.device.clone();
        drop(self);
        let _ = device.poll(wgpu::Maintain::wait());
        tracing::debug!("render context closed");
    }
}

/// Shrinks `width`×`height` to fit `limit` on both edges, keeping aspect.
fn fit_within(width: u32, height: u32, limit: u32) -> (u32, u32) {
    let scale = (limit as f64 / width as f64).min(limit as f64 / height as f64);
    let w = ((width as f64 * scale).floor() as u32).clamp(1, limit);
    let h = ((height as f64 * scale).floor() as u32).clamp(1, limit);
    (w, h)
}
