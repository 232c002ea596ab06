use crate::{
    error::{InitError, ShaderStage},
    params::EffectParameters,
};

use super::gpu::{FRAME_FORMAT, GpuSurface, LedgerEntry, ResourceKind};

/// Uniform block mirrored by `EffectUniforms` in [`FRAGMENT_SHADER_SRC`].
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct EffectUniforms {
    pub resolution: [f32; 2],
    pub pixelation: f32,
    pub saturation: f32,
    pub brightness: f32,
    pub contrast: f32,
    pub noise: f32,
    pub red_channel: f32,
    pub green_channel: f32,
    pub blue_channel: f32,
    pub bulge: f32,
    pub glow_intensity: f32,
    pub sharpness: f32,
    pub posterize: f32,
    pub _pad: [f32; 2],
}

impl EffectUniforms {
    pub fn from_params(params: &EffectParameters, surface_size: (u32, u32)) -> Self {
        Self {
            resolution: [surface_size.0 as f32, surface_size.1 as f32],
            pixelation: params.pixelation,
            saturation: params.saturation,
            brightness: params.brightness,
            contrast: params.contrast,
            noise: params.noise,
            red_channel: params.red_channel,
            green_channel: params.green_channel,
            blue_channel: params.blue_channel,
            bulge: params.bulge,
            glow_intensity: params.glow_intensity,
            sharpness: params.sharpness,
            posterize: params.posterize,
            _pad: [0.0; 2],
        }
    }
}

/// Interleaving-free quad layout: positions and texture coordinates live in
/// separate buffers bound to slots 0 and 1.
pub const POSITION_SLOT: u32 = 0;
pub const TEX_COORD_SLOT: u32 = 1;

const POSITION_ATTRIBUTES: [wgpu::VertexAttribute; 1] = wgpu::vertex_attr_array![0 => Float32x2];
const TEX_COORD_ATTRIBUTES: [wgpu::VertexAttribute; 1] = wgpu::vertex_attr_array![1 => Float32x2];

/// Compiled vertex + fragment pair linked into a render pipeline.
pub struct ShaderProgram {
    pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    _entry: LedgerEntry,
}

impl ShaderProgram {
    /// Builds the fixed effects program.
    pub fn build(surface: &GpuSurface) -> Result<Self, InitError> {
        Self::build_from_sources(surface, VERTEX_SHADER_SRC, FRAGMENT_SHADER_SRC)
    }

    /// Compiles each stage and links them, checking every step on its own.
    ///
    /// Nothing is returned unless all three steps succeed.
    pub(crate) fn build_from_sources(
        surface: &GpuSurface,
        vertex_src: &str,
        fragment_src: &str,
    ) -> Result<Self, InitError> {
        let device = surface.device();
        let vertex = compile_module(device, "deepfry_vertex", vertex_src, ShaderStage::Vertex)?;
        let fragment =
            compile_module(device, "deepfry_fragment", fragment_src, ShaderStage::Fragment)?;

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("deepfry_bgl"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: wgpu::BufferSize::new(
                            std::mem::size_of::<EffectUniforms>() as u64,
                        ),
                    },
                    count: None,
                },
            ],
        });
        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("deepfry_layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("deepfry_pipeline"),
            layout: Some(&layout),
            vertex: wgpu::VertexState {
                module: &vertex,
                entry_point: Some("main"),
                buffers: &[
                    wgpu::VertexBufferLayout {
                        array_stride: std::mem::size_of::<[f32; 2]>() as wgpu::BufferAddress,
                        step_mode: wgpu::VertexStepMode::Vertex,
                        attributes: &POSITION_ATTRIBUTES,
                    },
                    wgpu::VertexBufferLayout {
                        array_stride: std::mem::size_of::<[f32; 2]>() as wgpu::BufferAddress,
                        step_mode: wgpu::VertexStepMode::Vertex,
                        attributes: &TEX_COORD_ATTRIBUTES,
                    },
                ],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                strip_index_format: None,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: None,
                polygon_mode: wgpu::PolygonMode::Fill,
                unclipped_depth: false,
                conservative: false,
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            fragment: Some(wgpu::FragmentState {
                module: &fragment,
                entry_point: Some("main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: FRAME_FORMAT,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            multiview: None,
            cache: None,
        });
        if let Some(err) = pollster::block_on(device.pop_error_scope()) {
            return Err(InitError::ShaderBuild {
                stage: ShaderStage::Link,
                diagnostics: err.to_string(),
            });
        }

        tracing::debug!("effects program linked");
        Ok(Self {
            pipeline,
            bind_group_layout,
            _entry: surface.ledger().acquire(ResourceKind::Program),
        })
    }

    pub fn pipeline(&self) -> &wgpu::RenderPipeline {
        &self.pipeline
    }

    pub fn bind_group_layout(&self) -> &wgpu::BindGroupLayout {
        &self.bind_group_layout
    }
}

fn compile_module(
    device: &wgpu::Device,
    label: &str,
    source: &str,
    stage: ShaderStage,
) -> Result<wgpu::ShaderModule, InitError> {
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Wgsl(source.into()),
    });
    let scope_error = pollster::block_on(device.pop_error_scope());

    let info = pollster::block_on(module.get_compilation_info());
    let mut diagnostics: Vec<String> = info
        .messages
        .iter()
        .filter(|msg| matches!(msg.message_type, wgpu::CompilationMessageType::Error))
        .map(|msg| match &msg.location {
            Some(loc) => format!("{}:{}: {}", loc.line_number, loc.line_position, msg.message),
            None => msg.message.clone(),
        })
        .collect();
    if let Some(err) = scope_error {
        if diagnostics.is_empty() {
            diagnostics.push(err.to_string());
        }
    }

    if diagnostics.is_empty() {
        Ok(module)
    } else {
        tracing::error!(%stage, "shader compilation failed");
        Err(InitError::ShaderBuild {
            stage,
            diagnostics: diagnostics.join("\n"),
        })
    }
}

/// Passes the quad through and forwards the texture coordinate unmodified.
pub const VERTEX_SHADER_SRC: &str = r#"
struct VertexInput {
    @location(0) position: vec2<f32>,
    @location(1) tex_coord: vec2<f32>,
};

struct VertexOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) tex_coord: vec2<f32>,
};

@vertex
fn main(input: VertexInput) -> VertexOutput {
    var out: VertexOutput;
    out.clip_position = vec4<f32>(input.position, 0.0, 1.0);
    out.tex_coord = input.tex_coord;
    return out;
}
"#;

/// Single-pass effect chain. Stage order is significant:
/// bulge, pixelate, sample (+ sharpen), channel gain, saturation,
/// contrast then brightness, posterize, noise, glow.
pub const FRAGMENT_SHADER_SRC: &str = r#"
struct EffectUniforms {
    resolution: vec2<f32>,
    pixelation: f32,
    saturation: f32,
    brightness: f32,
    contrast: f32,
    noise: f32,
    red_channel: f32,
    green_channel: f32,
    blue_channel: f32,
    bulge: f32,
    glow_intensity: f32,
    sharpness: f32,
    posterize: f32,
    _pad0: f32,
    _pad1: f32,
};

@group(0) @binding(0)
var source_tex: texture_2d<f32>;
@group(0) @binding(1)
var source_sampler: sampler;
@group(0) @binding(2)
var<uniform> fx: EffectUniforms;

fn rand(co: vec2<f32>) -> f32 {
    return fract(sin(dot(co, vec2<f32>(12.9898, 78.233))) * 43758.5453);
}

fn adjust_saturation(color: vec3<f32>, saturation: f32) -> vec3<f32> {
    let gray = dot(color, vec3<f32>(0.2126, 0.7152, 0.0722));
    return mix(vec3<f32>(gray), color, saturation);
}

fn fetch(coord: vec2<f32>) -> vec4<f32> {
    return textureSampleLevel(source_tex, source_sampler, coord, 0.0);
}

fn sample_source(coord: vec2<f32>) -> vec4<f32> {
    let center = fetch(coord);
    if (fx.sharpness <= 0.0) {
        return center;
    }
    let texel = vec2<f32>(1.0, 1.0) / fx.resolution;
    let blur = (fetch(coord + vec2<f32>(texel.x, 0.0)).rgb
        + fetch(coord - vec2<f32>(texel.x, 0.0)).rgb
        + fetch(coord + vec2<f32>(0.0, texel.y)).rgb
        + fetch(coord - vec2<f32>(0.0, texel.y)).rgb) * 0.25;
    return vec4<f32>(center.rgb + fx.sharpness * (center.rgb - blur), center.a);
}

@fragment
fn main(@location(0) tex_coord: vec2<f32>) -> @location(0) vec4<f32> {
    var coord = tex_coord;

    if (fx.bulge > 0.0) {
        let center = vec2<f32>(0.5, 0.5);
        let offset = coord - center;
        let dist = length(offset);
        if (dist > 0.0) {
            coord = coord + (offset / dist) * dist * fx.bulge;
        }
    }

    if (fx.pixelation > 1.0) {
        let cell = vec2<f32>(fx.pixelation, fx.pixelation) / fx.resolution;
        coord = floor(coord / cell) * cell;
    }

    let texel = sample_source(coord);
    var color = texel.rgb;

    color = color * vec3<f32>(fx.red_channel, fx.green_channel, fx.blue_channel);
    color = adjust_saturation(color, fx.saturation);

    color = (color - vec3<f32>(0.5)) * fx.contrast + vec3<f32>(0.5);
    color = color * fx.brightness;

    if (fx.posterize > 1.0) {
        let steps = max(2.0, floor(32.0 / fx.posterize)) - 1.0;
        color = floor(clamp(color, vec3<f32>(0.0), vec3<f32>(1.0)) * steps + vec3<f32>(0.5)) / steps;
    }

    if (fx.noise > 0.0) {
        color = color + vec3<f32>(rand(coord) * fx.noise);
    }

    if (fx.glow_intensity > 0.0) {
        let glow = length(color);
        color = color + color * glow * fx.glow_intensity;
    }

    return vec4<f32>(clamp(color, vec3<f32>(0.0), vec3<f32>(1.0)), texel.a);
}
"#;
