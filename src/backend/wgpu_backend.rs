//! The wgpu implementation of [`RenderBackend`].
//!
//! A pass is recorded while the graph walks it and encoded as one wgpu render
//! pass in [`end_pass`](RenderBackend::end_pass), with the requested clears
//! folded into the attachment load operations. Pipelines and texture bind
//! groups are built in `prepare_pass`; uniforms go through two ring buffers
//! bound with dynamic offsets and flushed once per frame.
//!
//! The default target is a persistent backbuffer that `end_frame` copies to
//! the swapchain, so a frame in which nothing renders into it re-presents the
//! previous image.

use std::collections::HashMap;
use std::num::NonZeroU64;
use std::sync::Arc;

use tracing::{debug, error, info, warn};
use wgpu::util::DeviceExt;
use winit::window::Window;

use super::{MeshId, ProgramId, RenderBackend};
use crate::error::RenderError;
use crate::gpu::GpuContext;
use crate::graph::{
    BlendMode, ClearValues, CullMode, DrawSource, DrawUniforms, PassDescriptor, PassId,
    PassUniforms, PolygonMode, RasterState, Target, TextureBinding, ViewportRect,
};
use crate::mesh::{MeshData, Vertex};
use crate::resources::{
    CompareFunc, Extent, Filter, FramebufferId, ResourceTable, SamplerDesc, SamplerId, SizeClass,
    TextureDesc, TextureFormat, TextureId, TextureKind, Wrap,
};
use crate::shaders::ProgramLibrary;
use crate::texture::ImageData;

const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;
const MAX_COLOR_ATTACHMENTS: usize = 4;
const PASS_UNIFORM_STRIDE: u64 = 512;
const DRAW_UNIFORM_STRIDE: u64 = 256;
const PASS_UNIFORM_SLOTS: u64 = 64;
const DRAW_UNIFORM_SLOTS: u64 = 1024;

struct GpuTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    desc: TextureDesc,
    extent: Extent,
}

struct GpuFramebuffer {
    colors: Vec<TextureId>,
    depth: Option<TextureId>,
    extent: Extent,
}

struct GpuMesh {
    vertices: wgpu::Buffer,
    indices: wgpu::Buffer,
    index_count: u32,
}

struct Program {
    name: String,
    module: wgpu::ShaderModule,
}

/// How a texture unit is declared in a bind group layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum SampleKind {
    Filterable,
    Unfilterable,
    Depth,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum SamplerKind {
    Filtering,
    NonFiltering,
    Comparison,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct BindingSlot {
    unit: u32,
    sample: SampleKind,
    cube: bool,
    sampler: SamplerKind,
}

type BindingLayoutKey = Vec<BindingSlot>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum VertexInput {
    Mesh,
    Fullscreen,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct TargetFormats {
    colors: Vec<wgpu::TextureFormat>,
    depth: Option<wgpu::TextureFormat>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct PipelineKey {
    program: ProgramId,
    state: RasterState,
    targets: TargetFormats,
    bindings: BindingLayoutKey,
    input: VertexInput,
}

struct PreparedPass {
    name: String,
    key: PipelineKey,
    pipeline: wgpu::RenderPipeline,
    bindings: Vec<TextureBinding>,
    bind_group: wgpu::BindGroup,
}

enum PendingDraw {
    Mesh {
        mesh: MeshId,
        albedo: Option<TextureId>,
        offset: u32,
    },
    Fullscreen,
}

#[derive(Default)]
struct PendingPass {
    id: Option<PassId>,
    target: Option<Target>,
    viewport: Option<ViewportRect>,
    state: RasterState,
    clear: ClearValues,
    program: Option<ProgramId>,
    uniform_offset: u32,
    draws: Vec<PendingDraw>,
}

/// Uniform blocks written into a CPU staging area and uploaded with one
/// `write_buffer` per frame.
struct UniformRing {
    buffer: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
    staging: Vec<u8>,
    stride: u64,
    used: u64,
}

impl UniformRing {
    fn new(
        device: &wgpu::Device,
        label: &str,
        layout: &wgpu::BindGroupLayout,
        block_size: u64,
        stride: u64,
        slots: u64,
    ) -> Self {
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: stride * slots,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(label),
            layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer: &buffer,
                    offset: 0,
                    size: NonZeroU64::new(block_size),
                }),
            }],
        });
        Self {
            buffer,
            bind_group,
            staging: vec![0; (stride * slots) as usize],
            stride,
            used: 0,
        }
    }

    /// Copies `bytes` into the next slot and returns its offset, or `None` when full.
    fn push(&mut self, bytes: &[u8]) -> Option<u32> {
        let start = (self.used * self.stride) as usize;
        let slot = self.staging.get_mut(start..start + bytes.len())?;
        slot.copy_from_slice(bytes);
        self.used += 1;
        Some(start as u32)
    }

    fn flush(&self, queue: &wgpu::Queue) {
        let len = (self.used * self.stride) as usize;
        if len > 0 {
            queue.write_buffer(&self.buffer, 0, &self.staging[..len]);
        }
    }

    fn reset(&mut self) {
        self.used = 0;
    }
}

/// Bind group layouts shared by every pipeline.
struct Layouts {
    pass: wgpu::BindGroupLayout,
    draw: wgpu::BindGroupLayout,
    albedo: wgpu::BindGroupLayout,
    present: wgpu::BindGroupLayout,
    textures: HashMap<BindingLayoutKey, wgpu::BindGroupLayout>,
}

impl Layouts {
    fn new(device: &wgpu::Device) -> Self {
        let uniform = |label: &str, size: u64| {
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(label),
                entries: &[wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: true,
                        min_binding_size: NonZeroU64::new(size),
                    },
                    count: None,
                }],
            })
        };
        let pass = uniform("Pass Uniforms Layout", size_of::<PassUniforms>() as u64);
        let draw = uniform("Draw Uniforms Layout", size_of::<DrawUniforms>() as u64);

        let sampled_pair = |label: &str, first: u32| {
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(label),
                entries: &[
                    wgpu::BindGroupLayoutEntry {
                        binding: first,
                        visibility: wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Texture {
                            sample_type: wgpu::TextureSampleType::Float { filterable: true },
                            view_dimension: wgpu::TextureViewDimension::D2,
                            multisampled: false,
                        },
                        count: None,
                    },
                    wgpu::BindGroupLayoutEntry {
                        binding: first + 1,
                        visibility: wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                        count: None,
                    },
                ],
            })
        };
        let albedo = sampled_pair("Albedo Layout", 0);
        let present = sampled_pair("Present Layout", 1);

        Self {
            pass,
            draw,
            albedo,
            present,
            textures: HashMap::new(),
        }
    }

    fn ensure_textures(&mut self, device: &wgpu::Device, key: &BindingLayoutKey) {
        if self.textures.contains_key(key) {
            return;
        }
        let mut entries = Vec::with_capacity(key.len() * 2);
        for slot in key {
            let visibility = wgpu::ShaderStages::VERTEX_FRAGMENT;
            entries.push(wgpu::BindGroupLayoutEntry {
                binding: slot.unit * 2,
                visibility,
                ty: wgpu::BindingType::Texture {
                    sample_type: match slot.sample {
                        SampleKind::Filterable => wgpu::TextureSampleType::Float { filterable: true },
                        SampleKind::Unfilterable => {
                            wgpu::TextureSampleType::Float { filterable: false }
                        }
                        SampleKind::Depth => wgpu::TextureSampleType::Depth,
                    },
                    view_dimension: if slot.cube {
                        wgpu::TextureViewDimension::Cube
                    } else {
                        wgpu::TextureViewDimension::D2
                    },
                    multisampled: false,
                },
                count: None,
            });
            entries.push(wgpu::BindGroupLayoutEntry {
                binding: slot.unit * 2 + 1,
                visibility,
                ty: wgpu::BindingType::Sampler(match slot.sampler {
                    SamplerKind::Filtering => wgpu::SamplerBindingType::Filtering,
                    SamplerKind::NonFiltering => wgpu::SamplerBindingType::NonFiltering,
                    SamplerKind::Comparison => wgpu::SamplerBindingType::Comparison,
                }),
                count: None,
            });
        }
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Pass Textures Layout"),
            entries: &entries,
        });
        self.textures.insert(key.clone(), layout);
    }

    fn pipeline(
        &self,
        device: &wgpu::Device,
        module: &wgpu::ShaderModule,
        key: &PipelineKey,
        line_mode: bool,
    ) -> Result<wgpu::RenderPipeline, String> {
        let textures = self
            .textures
            .get(&key.bindings)
            .ok_or_else(|| "texture layout was never built".to_string())?;
        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Pass Pipeline Layout"),
            bind_group_layouts: &[&self.pass, &self.draw, textures, &self.albedo],
            push_constant_ranges: &[],
        });

        let state = key.state;
        let blend = match state.blend {
            BlendMode::Replace => None,
            BlendMode::Alpha => Some(wgpu::BlendState::ALPHA_BLENDING),
            BlendMode::Additive => Some(wgpu::BlendState {
                color: wgpu::BlendComponent {
                    src_factor: wgpu::BlendFactor::One,
                    dst_factor: wgpu::BlendFactor::One,
                    operation: wgpu::BlendOperation::Add,
                },
                alpha: wgpu::BlendComponent::OVER,
            }),
        };
        let color_targets = key
            .targets
            .colors
            .iter()
            .map(|&format| {
                Some(wgpu::ColorTargetState {
                    format,
                    blend,
                    write_mask: wgpu::ColorWrites::ALL,
                })
            })
            .collect::<Vec<_>>();
        let vertex_buffers: &[wgpu::VertexBufferLayout] = match key.input {
            VertexInput::Mesh => &[Vertex::LAYOUT],
            VertexInput::Fullscreen => &[],
        };

        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Pass Pipeline"),
            layout: Some(&layout),
            vertex: wgpu::VertexState {
                module,
                entry_point: Some("vs"),
                buffers: vertex_buffers,
                compilation_options: Default::default(),
            },
            fragment: (!color_targets.is_empty()).then(|| wgpu::FragmentState {
                module,
                entry_point: Some("fs"),
                targets: &color_targets,
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                strip_index_format: None,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: match state.cull {
                    CullMode::None => None,
                    CullMode::Front => Some(wgpu::Face::Front),
                    CullMode::Back => Some(wgpu::Face::Back),
                },
                polygon_mode: match state.polygon {
                    PolygonMode::Line if line_mode => wgpu::PolygonMode::Line,
                    _ => wgpu::PolygonMode::Fill,
                },
                unclipped_depth: false,
                conservative: false,
            },
            depth_stencil: key.targets.depth.map(|format| wgpu::DepthStencilState {
                format,
                depth_write_enabled: state.depth_write,
                depth_compare: state
                    .depth_test
                    .map(compare_function)
                    .unwrap_or(wgpu::CompareFunction::Always),
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });
        match pollster::block_on(device.pop_error_scope()) {
            Some(err) => Err(err.to_string()),
            None => Ok(pipeline),
        }
    }
}

/// The window's colour and depth buffers, kept between frames.
struct Backbuffer {
    color_view: wgpu::TextureView,
    depth_view: wgpu::TextureView,
    present_group: wgpu::BindGroup,
}

impl Backbuffer {
    fn new(
        device: &wgpu::Device,
        format: wgpu::TextureFormat,
        extent: Extent,
        layout: &wgpu::BindGroupLayout,
        sampler: &wgpu::Sampler,
    ) -> Self {
        let size = wgpu::Extent3d {
            width: extent.width.max(1),
            height: extent.height.max(1),
            depth_or_array_layers: 1,
        };
        let color = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Backbuffer"),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });
        let depth = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Backbuffer Depth"),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: DEPTH_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        let color_view = color.create_view(&wgpu::TextureViewDescriptor::default());
        let depth_view = depth.create_view(&wgpu::TextureViewDescriptor::default());
        let present_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Present Bind Group"),
            layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(&color_view),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::Sampler(sampler),
                },
            ],
        });
        Self {
            color_view,
            depth_view,
            present_group,
        }
    }
}

pub struct WgpuBackend {
    gpu: GpuContext,
    library: ProgramLibrary,
    line_mode: bool,
    layouts: Layouts,
    programs: Vec<Program>,
    textures: Vec<Option<GpuTexture>>,
    samplers: Vec<Option<(wgpu::Sampler, SamplerDesc)>>,
    framebuffers: Vec<Option<GpuFramebuffer>>,
    meshes: Vec<GpuMesh>,
    pipelines: HashMap<PipelineKey, wgpu::RenderPipeline>,
    passes: Vec<Option<PreparedPass>>,
    albedo_groups: HashMap<TextureId, wgpu::BindGroup>,
    white_albedo: wgpu::BindGroup,
    linear_sampler: wgpu::Sampler,
    pass_ring: UniformRing,
    draw_ring: UniformRing,
    backbuffer: Backbuffer,
    present_pipeline: wgpu::RenderPipeline,
    encoder: Option<wgpu::CommandEncoder>,
    pending: PendingPass,
}

impl WgpuBackend {
    pub fn new(window: Arc<Window>, library: ProgramLibrary) -> Result<Self, RenderError> {
        let gpu = GpuContext::new(window)?;
        let device = &gpu.device;
        let line_mode = gpu.supports_line_mode();
        let layouts = Layouts::new(device);

        let pass_ring = UniformRing::new(
            device,
            "Pass Uniforms",
            &layouts.pass,
            size_of::<PassUniforms>() as u64,
            PASS_UNIFORM_STRIDE,
            PASS_UNIFORM_SLOTS,
        );
        let draw_ring = UniformRing::new(
            device,
            "Draw Uniforms",
            &layouts.draw,
            size_of::<DrawUniforms>() as u64,
            DRAW_UNIFORM_STRIDE,
            DRAW_UNIFORM_SLOTS,
        );

        let linear_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Linear Repeat Sampler"),
            address_mode_u: wgpu::AddressMode::Repeat,
            address_mode_v: wgpu::AddressMode::Repeat,
            address_mode_w: wgpu::AddressMode::Repeat,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        let white = device.create_texture_with_data(
            &gpu.queue,
            &wgpu::TextureDescriptor {
                label: Some("White Albedo"),
                size: wgpu::Extent3d {
                    width: 1,
                    height: 1,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: wgpu::TextureFormat::Rgba8Unorm,
                usage: wgpu::TextureUsages::TEXTURE_BINDING,
                view_formats: &[],
            },
            wgpu::util::TextureDataOrder::LayerMajor,
            &[255, 255, 255, 255],
        );
        let white_view = white.create_view(&wgpu::TextureViewDescriptor::default());
        let white_albedo = albedo_group(device, &layouts.albedo, &white_view, &linear_sampler);

        let screen = Extent::new(gpu.width(), gpu.height());
        let backbuffer = Backbuffer::new(
            device,
            gpu.format(),
            screen,
            &layouts.present,
            &linear_sampler,
        );

        let present_source = library.source("present")?;
        let present_module = compile(device, "present", &present_source)
            .map_err(|message| RenderError::creation("present", message))?;
        let present_pipeline = present_pipeline(device, &layouts.present, &present_module, gpu.format());

        info!(line_mode, "Render backend ready");
        Ok(Self {
            gpu,
            library,
            line_mode,
            layouts,
            programs: Vec::new(),
            textures: Vec::new(),
            samplers: Vec::new(),
            framebuffers: Vec::new(),
            meshes: Vec::new(),
            pipelines: HashMap::new(),
            passes: Vec::new(),
            albedo_groups: HashMap::new(),
            white_albedo,
            linear_sampler,
            pass_ring,
            draw_ring,
            backbuffer,
            present_pipeline,
            encoder: None,
            pending: PendingPass::default(),
        })
    }

    pub fn screen(&self) -> Extent {
        Extent::new(self.gpu.width(), self.gpu.height())
    }

    fn texture(&self, id: TextureId) -> Result<&GpuTexture, RenderError> {
        self.textures
            .get(id.0)
            .and_then(Option::as_ref)
            .ok_or_else(|| RenderError::UnknownResource(format!("texture {id:?}")))
    }

    fn sampler(&self, id: SamplerId) -> Result<&(wgpu::Sampler, SamplerDesc), RenderError> {
        self.samplers
            .get(id.0)
            .and_then(Option::as_ref)
            .ok_or_else(|| RenderError::UnknownResource(format!("sampler {id:?}")))
    }

    fn target_formats(&self, target: Target) -> Result<TargetFormats, RenderError> {
        match target {
            Target::Default => Ok(TargetFormats {
                colors: vec![self.gpu.format()],
                depth: Some(DEPTH_FORMAT),
            }),
            Target::Framebuffer(id) => {
                let fb = self
                    .framebuffers
                    .get(id.0)
                    .and_then(Option::as_ref)
                    .ok_or_else(|| RenderError::UnknownResource(format!("framebuffer {id:?}")))?;
                let colors = fb
                    .colors
                    .iter()
                    .map(|&t| Ok(wgpu_format(self.texture(t)?.desc.format)))
                    .collect::<Result<Vec<_>, RenderError>>()?;
                let depth = fb
                    .depth
                    .map(|t| Ok::<_, RenderError>(wgpu_format(self.texture(t)?.desc.format)))
                    .transpose()?;
                Ok(TargetFormats { colors, depth })
            }
        }
    }

    fn binding_layout(&self, bindings: &[TextureBinding]) -> Result<BindingLayoutKey, RenderError> {
        let mut key = bindings
            .iter()
            .map(|binding| {
                let desc = &self.texture(binding.texture)?.desc;
                let (_, sampler) = self.sampler(binding.sampler)?;
                let (sample, sampler) = if desc.format.is_depth() {
                    let kind = if sampler.compare.is_some() {
                        SamplerKind::Comparison
                    } else {
                        SamplerKind::NonFiltering
                    };
                    (SampleKind::Depth, kind)
                } else if desc.format.is_filterable() {
                    (SampleKind::Filterable, SamplerKind::Filtering)
                } else {
                    (SampleKind::Unfilterable, SamplerKind::NonFiltering)
                };
                Ok(BindingSlot {
                    unit: binding.unit,
                    sample,
                    cube: desc.kind == TextureKind::Cube,
                    sampler,
                })
            })
            .collect::<Result<Vec<_>, RenderError>>()?;
        key.sort_by_key(|slot| slot.unit);
        Ok(key)
    }

    fn texture_bind_group(
        &self,
        key: &BindingLayoutKey,
        bindings: &[TextureBinding],
    ) -> Result<wgpu::BindGroup, RenderError> {
        let layout = self
            .layouts
            .textures
            .get(key)
            .ok_or_else(|| RenderError::creation("bind group", "missing texture layout"))?;
        let mut entries = Vec::with_capacity(bindings.len() * 2);
        for binding in bindings {
            entries.push(wgpu::BindGroupEntry {
                binding: binding.unit * 2,
                resource: wgpu::BindingResource::TextureView(&self.texture(binding.texture)?.view),
            });
            entries.push(wgpu::BindGroupEntry {
                binding: binding.unit * 2 + 1,
                resource: wgpu::BindingResource::Sampler(&self.sampler(binding.sampler)?.0),
            });
        }
        Ok(self.gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Pass Textures"),
            layout,
            entries: &entries,
        }))
    }

    /// Rebuilds every prepared pass's texture bind group after views changed.
    fn rebuild_bind_groups(&mut self) -> Result<(), RenderError> {
        for index in 0..self.passes.len() {
            let Some(pass) = &self.passes[index] else {
                continue;
            };
            let bind_group = self.texture_bind_group(&pass.key.bindings, &pass.bindings)?;
            if let Some(pass) = self.passes[index].as_mut() {
                pass.bind_group = bind_group;
            }
        }
        Ok(())
    }
}

impl RenderBackend for WgpuBackend {
    fn create_texture(
        &mut self,
        id: TextureId,
        desc: &TextureDesc,
        extent: Extent,
    ) -> Result<(), RenderError> {
        let device = &self.gpu.device;
        let usage = if desc.format.is_depth() {
            wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING
        } else if desc.kind == TextureKind::Cube {
            wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST
        } else {
            wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_DST
        };

        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(&desc.name),
            size: wgpu::Extent3d {
                width: extent.width,
                height: extent.height,
                depth_or_array_layers: desc.kind.layers(),
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu_format(desc.format),
            usage,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some(&desc.name),
            dimension: Some(match desc.kind {
                TextureKind::D2 => wgpu::TextureViewDimension::D2,
                TextureKind::Cube => wgpu::TextureViewDimension::Cube,
            }),
            ..Default::default()
        });
        if let Some(err) = pollster::block_on(device.pop_error_scope()) {
            return Err(RenderError::creation(&desc.name, err));
        }

        if desc.format == TextureFormat::Rgba8
            && desc.kind == TextureKind::D2
            && matches!(desc.size, SizeClass::Fixed(_))
        {
            let group = albedo_group(device, &self.layouts.albedo, &view, &self.linear_sampler);
            self.albedo_groups.insert(id, group);
        }

        if self.textures.len() <= id.0 {
            self.textures.resize_with(id.0 + 1, || None);
        }
        self.textures[id.0] = Some(GpuTexture {
            texture,
            view,
            desc: desc.clone(),
            extent,
        });
        Ok(())
    }

    fn write_texture(&mut self, id: TextureId, image: &ImageData) -> Result<(), RenderError> {
        let target = self.texture(id)?;
        let desc = &target.desc;
        if desc.format != TextureFormat::Rgba8 {
            return Err(RenderError::creation(&desc.name, "only RGBA8 textures accept image data"));
        }
        if target.extent != Extent::new(image.width, image.height)
            || desc.kind.layers() != image.layer_count()
        {
            return Err(RenderError::creation(
                &desc.name,
                format!(
                    "image is {}x{}x{}, texture is {}x{}x{}",
                    image.width,
                    image.height,
                    image.layer_count(),
                    target.extent.width,
                    target.extent.height,
                    desc.kind.layers()
                ),
            ));
        }
        for (layer, pixels) in image.layers.iter().enumerate() {
            self.gpu.queue.write_texture(
                wgpu::TexelCopyTextureInfo {
                    texture: &target.texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d {
                        x: 0,
                        y: 0,
                        z: layer as u32,
                    },
                    aspect: wgpu::TextureAspect::All,
                },
                pixels,
                wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(image.bytes_per_row()),
                    rows_per_image: Some(image.height),
                },
                wgpu::Extent3d {
                    width: image.width,
                    height: image.height,
                    depth_or_array_layers: 1,
                },
            );
        }
        debug!("Uploaded {} layer(s) into '{}'", image.layer_count(), desc.name);
        Ok(())
    }

    fn create_sampler(&mut self, id: SamplerId, desc: &SamplerDesc) -> Result<(), RenderError> {
        let address = match desc.wrap {
            Wrap::Clamp => wgpu::AddressMode::ClampToEdge,
            Wrap::Repeat => wgpu::AddressMode::Repeat,
        };
        let filter = match desc.filter {
            Filter::Nearest => wgpu::FilterMode::Nearest,
            Filter::Linear => wgpu::FilterMode::Linear,
        };
        let sampler = self.gpu.device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some(&desc.name),
            address_mode_u: address,
            address_mode_v: address,
            address_mode_w: address,
            mag_filter: filter,
            min_filter: filter,
            compare: desc.compare.map(compare_function),
            ..Default::default()
        });
        if self.samplers.len() <= id.0 {
            self.samplers.resize_with(id.0 + 1, || None);
        }
        self.samplers[id.0] = Some((sampler, desc.clone()));
        Ok(())
    }

    fn create_framebuffer(
        &mut self,
        id: FramebufferId,
        table: &ResourceTable,
    ) -> Result<(), RenderError> {
        let desc = table.framebuffer_desc(id)?;
        let extent = table.framebuffer_extent(id)?;
        if desc.colors.len() > MAX_COLOR_ATTACHMENTS {
            return Err(RenderError::creation(
                &desc.name,
                format!("more than {MAX_COLOR_ATTACHMENTS} colour attachments"),
            ));
        }
        if self.framebuffers.len() <= id.0 {
            self.framebuffers.resize_with(id.0 + 1, || None);
        }
        self.framebuffers[id.0] = Some(GpuFramebuffer {
            colors: desc.colors.clone(),
            depth: desc.depth,
            extent,
        });
        Ok(())
    }

    fn upload_mesh(&mut self, label: &str, mesh: &MeshData) -> Result<MeshId, RenderError> {
        let device = &self.gpu.device;
        let vertices = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(label),
            contents: mesh.vertex_bytes(),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let indices = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(label),
            contents: mesh.index_bytes(),
            usage: wgpu::BufferUsages::INDEX,
        });
        self.meshes.push(GpuMesh {
            vertices,
            indices,
            index_count: mesh.index_count(),
        });
        debug!(
            "Uploaded mesh '{label}': {} vertices, {} triangles",
            mesh.vertex_count(),
            mesh.triangle_count()
        );
        Ok(MeshId(self.meshes.len() - 1))
    }

    fn register_program(&mut self, name: &str) -> Result<ProgramId, RenderError> {
        let source = self.library.source(name)?;
        let module = compile(&self.gpu.device, name, &source)
            .map_err(|message| RenderError::creation(format!("program '{name}'"), message))?;
        self.programs.push(Program {
            name: name.to_string(),
            module,
        });
        Ok(ProgramId(self.programs.len() - 1))
    }

    fn prepare_pass(
        &mut self,
        id: PassId,
        pass: &PassDescriptor,
        _table: &ResourceTable,
    ) -> Result<(), RenderError> {
        let key = PipelineKey {
            program: pass.program,
            state: pass.state,
            targets: self.target_formats(pass.target)?,
            bindings: self.binding_layout(&pass.bindings)?,
            input: match pass.draws {
                DrawSource::Fullscreen => VertexInput::Fullscreen,
                DrawSource::Layer(_) => VertexInput::Mesh,
            },
        };
        if pass.state.polygon == PolygonMode::Line && !self.line_mode {
            warn!("Pass '{}' wants wireframe but the device cannot draw lines", pass.name);
        }

        self.layouts.ensure_textures(&self.gpu.device, &key.bindings);
        let bind_group = self.texture_bind_group(&key.bindings, &pass.bindings)?;

        let pipeline = match self.pipelines.get(&key) {
            Some(pipeline) => pipeline.clone(),
            None => {
                let program = self.programs.get(pass.program.0).ok_or_else(|| {
                    RenderError::UnknownResource(format!("program {:?}", pass.program))
                })?;
                let pipeline = self
                    .layouts
                    .pipeline(&self.gpu.device, &program.module, &key, self.line_mode)
                    .map_err(|message| {
                        RenderError::creation(format!("pipeline for pass '{}'", pass.name), message)
                    })?;
                self.pipelines.insert(key.clone(), pipeline.clone());
                pipeline
            }
        };

        if self.passes.len() <= id.0 {
            self.passes.resize_with(id.0 + 1, || None);
        }
        self.passes[id.0] = Some(PreparedPass {
            name: pass.name.clone(),
            key,
            pipeline,
            bindings: pass.bindings.clone(),
            bind_group,
        });
        Ok(())
    }

    fn resize_default_target(&mut self, extent: Extent) -> Result<(), RenderError> {
        if extent.width == 0 || extent.height == 0 {
            return Ok(());
        }
        self.gpu.resize(extent.width, extent.height);
        self.backbuffer = Backbuffer::new(
            &self.gpu.device,
            self.gpu.format(),
            extent,
            &self.layouts.present,
            &self.linear_sampler,
        );
        self.rebuild_bind_groups()
    }

    fn reload_programs(&mut self) -> Result<(), RenderError> {
        let device = &self.gpu.device;
        let mut modules = Vec::with_capacity(self.programs.len());
        for program in &self.programs {
            let failed = |message: String| RenderError::ShaderReload {
                program: program.name.clone(),
                message,
            };
            let source = self
                .library
                .source(&program.name)
                .map_err(|e| failed(e.to_string()))?;
            modules.push(compile(device, &program.name, &source).map_err(failed)?);
        }

        let mut pipelines = HashMap::with_capacity(self.pipelines.len());
        for key in self.pipelines.keys() {
            let pipeline = self
                .layouts
                .pipeline(device, &modules[key.program.0], key, self.line_mode)
                .map_err(|message| RenderError::ShaderReload {
                    program: self.programs[key.program.0].name.clone(),
                    message,
                })?;
            pipelines.insert(key.clone(), pipeline);
        }

        for (program, module) in self.programs.iter_mut().zip(modules) {
            program.module = module;
        }
        for pass in self.passes.iter_mut().flatten() {
            if let Some(pipeline) = pipelines.get(&pass.key) {
                pass.pipeline = pipeline.clone();
            }
        }
        self.pipelines = pipelines;
        info!("Reloaded {} programs", self.programs.len());
        Ok(())
    }

    fn begin_frame(&mut self) {
        self.pass_ring.reset();
        self.draw_ring.reset();
        self.encoder = Some(self.gpu.device.create_command_encoder(
            &wgpu::CommandEncoderDescriptor {
                label: Some("Frame Encoder"),
            },
        ));
    }

    fn framebuffer_status(&self, id: FramebufferId) -> Result<(), RenderError> {
        let incomplete = |reason: String| RenderError::FramebufferIncomplete {
            framebuffer: format!("{id:?}"),
            reason,
        };
        let fb = self
            .framebuffers
            .get(id.0)
            .and_then(Option::as_ref)
            .ok_or_else(|| incomplete("never created".to_string()))?;
        for &attachment in fb.colors.iter().chain(fb.depth.iter()) {
            let texture = self
                .texture(attachment)
                .map_err(|_| incomplete(format!("attachment {attachment:?} is missing")))?;
            if texture.extent != fb.extent {
                return Err(incomplete(format!(
                    "'{}' is {}x{}, framebuffer is {}x{}",
                    texture.desc.name,
                    texture.extent.width,
                    texture.extent.height,
                    fb.extent.width,
                    fb.extent.height
                )));
            }
        }
        Ok(())
    }

    fn bind_target(&mut self, pass: PassId, target: Target, viewport: ViewportRect) {
        self.pending.id = Some(pass);
        self.pending.target = Some(target);
        self.pending.viewport = Some(viewport);
    }

    fn apply_state(&mut self, state: &RasterState) {
        self.pending.state = *state;
    }

    fn clear(&mut self, values: ClearValues) {
        self.pending.clear = values;
    }

    fn bind_textures(&mut self, bindings: &[TextureBinding]) {
        let prepared = self
            .pending
            .id
            .and_then(|id| self.passes.get(id.0))
            .and_then(Option::as_ref);
        if let Some(prepared) = prepared
            && prepared.bindings != bindings
        {
            warn!("Pass '{}' bound textures it was not prepared with", prepared.name);
        }
    }

    fn upload_uniforms(&mut self, program: ProgramId, uniforms: &PassUniforms) {
        self.pending.program = Some(program);
        match self.pass_ring.push(bytemuck::bytes_of(uniforms)) {
            Some(offset) => self.pending.uniform_offset = offset,
            None => error!("Pass uniform buffer is full"),
        }
    }

    fn draw_mesh(&mut self, mesh: MeshId, albedo: Option<TextureId>, uniforms: &DrawUniforms) {
        match self.draw_ring.push(bytemuck::bytes_of(uniforms)) {
            Some(offset) => self.pending.draws.push(PendingDraw::Mesh {
                mesh,
                albedo,
                offset,
            }),
            None => error!("Draw uniform buffer is full, dropping draw"),
        }
    }

    fn draw_fullscreen(&mut self) {
        self.pending.draws.push(PendingDraw::Fullscreen);
    }

    fn unbind_textures(&mut self) {}

    fn end_pass(&mut self) {
        let mut draws = std::mem::take(&mut self.pending.draws);
        let pending = std::mem::take(&mut self.pending);
        self.encode_pass(&pending, &draws);
        draws.clear();
        self.pending.draws = draws;
    }

    fn end_frame(&mut self) -> Result<(), RenderError> {
        let Some(mut encoder) = self.encoder.take() else {
            return Ok(());
        };
        self.pass_ring.flush(&self.gpu.queue);
        self.draw_ring.flush(&self.gpu.queue);

        let frame = match self.gpu.surface.get_current_texture() {
            Ok(frame) => Some(frame),
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                self.gpu.reconfigure();
                None
            }
            Err(err) => {
                self.gpu.queue.submit(Some(encoder.finish()));
                return Err(RenderError::Surface(err.to_string()));
            }
        };

        if let Some(frame) = &frame {
            let view = frame
                .texture
                .create_view(&wgpu::TextureViewDescriptor::default());
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Present"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    depth_slice: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(&self.present_pipeline);
            pass.set_bind_group(0, &self.backbuffer.present_group, &[]);
            pass.draw(0..3, 0..1);
        }

        self.gpu.queue.submit(Some(encoder.finish()));
        match frame {
            Some(frame) => {
                frame.present();
                Ok(())
            }
            None => Err(RenderError::Surface("surface was reconfigured".to_string())),
        }
    }
}

impl WgpuBackend {
    fn encode_pass(&mut self, pending: &PendingPass, draws: &[PendingDraw]) {
        let (Some(id), Some(target), Some(viewport)) = (pending.id, pending.target, pending.viewport)
        else {
            return;
        };
        let Some(encoder) = self.encoder.as_mut() else {
            error!("Pass {id:?} ended outside a frame");
            return;
        };
        let Some(prepared) = self.passes.get(id.0).and_then(Option::as_ref) else {
            error!("Pass {id:?} was never prepared");
            return;
        };
        if pending.program != Some(prepared.key.program) || pending.state != prepared.key.state {
            error!("Pass '{}' changed program or state after preparation", prepared.name);
            return;
        }

        let color_load = match pending.clear.color {
            Some([r, g, b, a]) => wgpu::LoadOp::Clear(wgpu::Color {
                r: r as f64,
                g: g as f64,
                b: b as f64,
                a: a as f64,
            }),
            None => wgpu::LoadOp::Load,
        };
        let depth_load = match pending.clear.depth {
            Some(depth) => wgpu::LoadOp::Clear(depth),
            None => wgpu::LoadOp::Load,
        };
        let color_ops = wgpu::Operations {
            load: color_load,
            store: wgpu::StoreOp::Store,
        };

        let mut color_views: [Option<&wgpu::TextureView>; MAX_COLOR_ATTACHMENTS] =
            [None; MAX_COLOR_ATTACHMENTS];
        let (color_count, depth_view) = match target {
            Target::Default => {
                color_views[0] = Some(&self.backbuffer.color_view);
                (1, Some(&self.backbuffer.depth_view))
            }
            Target::Framebuffer(fb) => {
                let Some(fb) = self.framebuffers.get(fb.0).and_then(Option::as_ref) else {
                    error!("Pass '{}' targets a missing framebuffer", prepared.name);
                    return;
                };
                let view_of = |t: TextureId| {
                    self.textures
                        .get(t.0)
                        .and_then(Option::as_ref)
                        .map(|texture| &texture.view)
                };
                for (slot, &color) in color_views.iter_mut().zip(&fb.colors) {
                    *slot = view_of(color);
                }
                (fb.colors.len(), fb.depth.and_then(view_of))
            }
        };
        let color_attachments: [Option<wgpu::RenderPassColorAttachment>; MAX_COLOR_ATTACHMENTS] =
            std::array::from_fn(|i| {
                color_views[i].map(|view| wgpu::RenderPassColorAttachment {
                    view,
                    resolve_target: None,
                    depth_slice: None,
                    ops: color_ops,
                })
            });

        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some(&prepared.name),
            color_attachments: &color_attachments[..color_count],
            depth_stencil_attachment: depth_view.map(|view| wgpu::RenderPassDepthStencilAttachment {
                view,
                depth_ops: Some(wgpu::Operations {
                    load: depth_load,
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        if draws.is_empty() {
            return;
        }

        pass.set_viewport(viewport.x, viewport.y, viewport.width, viewport.height, 0.0, 1.0);
        pass.set_pipeline(&prepared.pipeline);
        pass.set_bind_group(0, &self.pass_ring.bind_group, &[pending.uniform_offset]);
        pass.set_bind_group(2, &prepared.bind_group, &[]);
        for draw in draws {
            match *draw {
                PendingDraw::Mesh {
                    mesh,
                    albedo,
                    offset,
                } => {
                    let Some(mesh) = self.meshes.get(mesh.0) else {
                        continue;
                    };
                    let albedo = albedo
                        .and_then(|t| self.albedo_groups.get(&t))
                        .unwrap_or(&self.white_albedo);
                    pass.set_bind_group(1, &self.draw_ring.bind_group, &[offset]);
                    pass.set_bind_group(3, albedo, &[]);
                    pass.set_vertex_buffer(0, mesh.vertices.slice(..));
                    pass.set_index_buffer(mesh.indices.slice(..), wgpu::IndexFormat::Uint32);
                    pass.draw_indexed(0..mesh.index_count, 0, 0..1);
                }
                PendingDraw::Fullscreen => {
                    pass.set_bind_group(1, &self.draw_ring.bind_group, &[0]);
                    pass.set_bind_group(3, &self.white_albedo, &[]);
                    pass.draw(0..3, 0..1);
                }
            }
        }
    }
}

fn compile(device: &wgpu::Device, name: &str, source: &str) -> Result<wgpu::ShaderModule, String> {
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(name),
        source: wgpu::ShaderSource::Wgsl(source.into()),
    });
    match pollster::block_on(device.pop_error_scope()) {
        Some(err) => Err(err.to_string()),
        None => Ok(module),
    }
}

fn present_pipeline(
    device: &wgpu::Device,
    layout: &wgpu::BindGroupLayout,
    module: &wgpu::ShaderModule,
    format: wgpu::TextureFormat,
) -> wgpu::RenderPipeline {
    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some("Present Pipeline Layout"),
        bind_group_layouts: &[layout],
        push_constant_ranges: &[],
    });
    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some("Present Pipeline"),
        layout: Some(&pipeline_layout),
        vertex: wgpu::VertexState {
            module,
            entry_point: Some("vs"),
            buffers: &[],
            compilation_options: Default::default(),
        },
        fragment: Some(wgpu::FragmentState {
            module,
            entry_point: Some("fs"),
            targets: &[Some(wgpu::ColorTargetState {
                format,
                blend: None,
                write_mask: wgpu::ColorWrites::ALL,
            })],
            compilation_options: Default::default(),
        }),
        primitive: wgpu::PrimitiveState::default(),
        depth_stencil: None,
        multisample: wgpu::MultisampleState::default(),
        multiview: None,
        cache: None,
    })
}

fn albedo_group(
    device: &wgpu::Device,
    layout: &wgpu::BindGroupLayout,
    view: &wgpu::TextureView,
    sampler: &wgpu::Sampler,
) -> wgpu::BindGroup {
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("Albedo Bind Group"),
        layout,
        entries: &[
            wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::TextureView(view),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: wgpu::BindingResource::Sampler(sampler),
            },
        ],
    })
}

fn wgpu_format(format: TextureFormat) -> wgpu::TextureFormat {
    match format {
        TextureFormat::Rgba8 => wgpu::TextureFormat::Rgba8Unorm,
        TextureFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
        TextureFormat::Rgba32Float => wgpu::TextureFormat::Rgba32Float,
        TextureFormat::Depth32Float => wgpu::TextureFormat::Depth32Float,
    }
}

fn compare_function(compare: CompareFunc) -> wgpu::CompareFunction {
    match compare {
        CompareFunc::Never => wgpu::CompareFunction::Never,
        CompareFunc::Less => wgpu::CompareFunction::Less,
        CompareFunc::LessEqual => wgpu::CompareFunction::LessEqual,
        CompareFunc::Equal => wgpu::CompareFunction::Equal,
        CompareFunc::Greater => wgpu::CompareFunction::Greater,
        CompareFunc::GreaterEqual => wgpu::CompareFunction::GreaterEqual,
        CompareFunc::Always => wgpu::CompareFunction::Always,
    }
}
