// SPDX-License-Identifier: MPL-2.0

//! A [`Device`] backed by *wgpu*.
//!
//! *wgpu* records work into command buffers instead of executing calls one by one, so this device
//! collects draws into a batch per render destination and encodes the batch as a single render
//! pass. A batch is flushed whenever something would observe or invalidate it: binding another
//! destination, clearing after draws, writing or reading a texture, destroying a resource and
//! presenting.
//!
//! Uniform values are staged per program and copied into a slot of a shared uniform buffer for
//! every draw; the slot is selected with a dynamic offset.

use std::{
    collections::HashMap,
    num::{NonZeroU32, NonZeroU64},
    sync::{Arc, Mutex},
};

use raw_window_handle::HasRawWindowHandle;
use wgpu::util::DeviceExt as _;

use super::{
    Capabilities, Device, ErrorFlag, GpuError, IdAllocator, Image, MeshId, ProgramId,
    ProgramInterface, ProgramSource, RenderTargetDescriptor, RenderTargetId, ShaderError,
    ShaderStage, TargetStatus, TextureDescriptor, TextureFormat, TextureId, UniformLocation,
    UniformValue, MAX_COLOR_ATTACHMENTS, TEXTURE_UNITS,
};
use crate::{
    mesh::{DrawMode, Faces, FillMode, MeshVertex},
    renderer::Error,
    Mesh,
};

/// The size of one uniform slot. Every program's uniform block must fit in it.
const SLOT_SIZE: usize = 512;

/// The number of uniform slots, and so of draws, a batch holds.
const SLOT_COUNT: usize = 1024;

const PREFERRED_SURFACE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Bgra8UnormSrgb;

const OFFSCREEN_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth24Plus;

fn wgpu_format(format: TextureFormat) -> wgpu::TextureFormat {
    match format {
        TextureFormat::Rgba8 => wgpu::TextureFormat::Rgba8Unorm,
        TextureFormat::Rgba16F => wgpu::TextureFormat::Rgba16Float,
        TextureFormat::Rgba32F => wgpu::TextureFormat::Rgba32Float,
        TextureFormat::Depth24 => DEPTH_FORMAT,
    }
}

#[derive(Debug)]
struct NativeTexture {
    descriptor: TextureDescriptor,
    texture: wgpu::Texture,
    view: wgpu::TextureView,
}

#[derive(Debug)]
struct NativeProgram {
    name: String,
    vertex: wgpu::ShaderModule,
    fragment: wgpu::ShaderModule,
    interface: ProgramInterface,
    /// The uniform block as it will be uploaded.
    block: Vec<u8>,
}

#[derive(Debug)]
struct NativeMesh {
    vertex_buffer: wgpu::Buffer,
    index_buffer: wgpu::Buffer,
    index_count: u32,
}

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
struct PipelineKey {
    program: ProgramId,
    colors: Vec<wgpu::TextureFormat>,
    draw_buffers: usize,
    depth: bool,
    depth_test: bool,
    mode: DrawMode,
}

#[derive(Debug)]
struct DrawCall {
    pipeline: PipelineKey,
    mesh: MeshId,
    uniform_offset: u32,
    units: [Option<TextureId>; TEXTURE_UNITS],
}

/// Work for the bound destination that has not been encoded yet.
#[derive(Debug, Default)]
struct Batch {
    clear: Option<[f32; 4]>,
    draws: Vec<DrawCall>,
    uniforms: Vec<u8>,
}

impl Batch {
    fn is_empty(&self) -> bool {
        self.clear.is_none() && self.draws.is_empty()
    }
}

#[derive(Debug)]
struct Frame {
    texture: wgpu::SurfaceTexture,
    view: wgpu::TextureView,
}

/// Where the default destination lives.
#[derive(Debug)]
enum Output {
    Surface {
        surface: wgpu::Surface,
        format: wgpu::TextureFormat,
        frame: Option<Frame>,
    },
    Offscreen {
        texture: wgpu::Texture,
        view: wgpu::TextureView,
    },
}

impl Output {
    fn format(&self) -> wgpu::TextureFormat {
        match self {
            Self::Surface { format, .. } => *format,
            Self::Offscreen { .. } => OFFSCREEN_FORMAT,
        }
    }

    fn view(&self) -> Option<&wgpu::TextureView> {
        match self {
            Self::Surface { frame, .. } => frame.as_ref().map(|frame| &frame.view),
            Self::Offscreen { view, .. } => Some(view),
        }
    }
}

/// Renders with *wgpu*, to a window surface or to an offscreen image.
#[derive(Debug)]
pub struct NativeDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,
    features: wgpu::Features,
    output: Output,
    size: (u32, u32),
    default_depth: wgpu::TextureView,
    uniform_buffer: wgpu::Buffer,
    uniform_bind_group: wgpu::BindGroup,
    texture_bind_group_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    /// Sampled by units without a texture.
    blank_texture: wgpu::TextureView,
    ids: IdAllocator,
    textures: HashMap<TextureId, NativeTexture>,
    targets: HashMap<RenderTargetId, RenderTargetDescriptor>,
    programs: HashMap<ProgramId, NativeProgram>,
    meshes: HashMap<MeshId, NativeMesh>,
    pipelines: HashMap<PipelineKey, wgpu::RenderPipeline>,
    bound_target: Option<RenderTargetId>,
    draw_buffers: HashMap<Option<RenderTargetId>, usize>,
    clear_color: [f32; 4],
    depth_test: bool,
    active_program: Option<ProgramId>,
    units: [Option<TextureId>; TEXTURE_UNITS],
    batch: Batch,
    /// Shared with the uncaptured-error handler of the device.
    errors: Arc<Mutex<ErrorFlag>>,
}

impl NativeDevice {
    /// Creates a device that presents to `window`.
    ///
    /// # Safety
    ///
    /// `window` must live for as long as the returned device.
    pub async unsafe fn new(
        window: &impl HasRawWindowHandle,
        backends: wgpu::Backends,
        surface_width: u32,
        surface_height: u32,
    ) -> Result<Self, Error> {
        let instance = wgpu::Instance::new(backends);
        // SAFETY: the caller guarantees that the window outlives the device, which owns the
        // surface.
        let surface = unsafe { instance.create_surface(window) };
        let adapter = Self::request_adapter(&instance, Some(&surface)).await?;

        let surface_formats = surface.get_supported_formats(&adapter);
        let format = if surface_formats.contains(&PREFERRED_SURFACE_FORMAT) {
            PREFERRED_SURFACE_FORMAT
        } else {
            let format = surface_formats
                .first()
                .copied()
                .ok_or(Error::NoCompatibleAdapterFound)?;
            tracing::info!(
                "Surface does not support {:?}; using {:?}",
                PREFERRED_SURFACE_FORMAT,
                format,
            );

            format
        };

        let (device, queue) = Self::create_device_and_queue(&adapter).await?;
        Self::configure_surface(&device, &surface, format, surface_width, surface_height);

        Ok(Self::with_output(
            device,
            queue,
            adapter.features(),
            Output::Surface {
                surface,
                format,
                frame: None,
            },
            (surface_width, surface_height),
        ))
    }

    /// Creates a device whose default destination is an offscreen RGBA8 image.
    pub async fn headless(backends: wgpu::Backends, width: u32, height: u32) -> Result<Self, Error> {
        let instance = wgpu::Instance::new(backends);
        let adapter = Self::request_adapter(&instance, None).await?;
        let (device, queue) = Self::create_device_and_queue(&adapter).await?;

        let texture = Self::create_attachment(
            &device,
            "Offscreen output",
            (width, height),
            OFFSCREEN_FORMAT,
            wgpu::TextureUsages::COPY_SRC,
        );
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        Ok(Self::with_output(
            device,
            queue,
            adapter.features(),
            Output::Offscreen { texture, view },
            (width, height),
        ))
    }

    async fn request_adapter(
        instance: &wgpu::Instance,
        compatible_surface: Option<&wgpu::Surface>,
    ) -> Result<wgpu::Adapter, Error> {
        instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                compatible_surface,
                ..Default::default()
            })
            .await
            .ok_or(Error::NoCompatibleAdapterFound)
    }

    /// Creates handles to the logical graphics device as well as the command buffer queue.
    ///
    /// Wireframes need [`wgpu::Features::POLYGON_MODE_LINE`]; without it they are drawn filled.
    async fn create_device_and_queue(
        adapter: &wgpu::Adapter,
    ) -> Result<(wgpu::Device, wgpu::Queue), Error> {
        adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Deferred device"),
                    limits: adapter.limits(),
                    features: adapter.features() & wgpu::Features::POLYGON_MODE_LINE,
                },
                None,
            )
            .await
            .map_err(|_| Error::NoCompatibleDeviceFound)
    }

    fn configure_surface(
        device: &wgpu::Device,
        surface: &wgpu::Surface,
        format: wgpu::TextureFormat,
        width: u32,
        height: u32,
    ) {
        surface.configure(
            device,
            &wgpu::SurfaceConfiguration {
                usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
                format,
                width,
                height,
                present_mode: wgpu::PresentMode::Fifo,
            },
        );
    }

    fn with_output(
        device: wgpu::Device,
        queue: wgpu::Queue,
        features: wgpu::Features,
        output: Output,
        size: (u32, u32),
    ) -> Self {
        let errors = Arc::new(Mutex::new(ErrorFlag::default()));
        let sink = Arc::clone(&errors);
        device.on_uncaptured_error(move |error| {
            tracing::debug!("wgpu error: {}", error);
            match sink.lock() {
                Ok(mut flag) => flag.raise(GpuError::Backend(error.to_string())),
                Err(poisoned) => poisoned
                    .into_inner()
                    .raise(GpuError::Backend(error.to_string())),
            }
        });

        let default_depth = Self::create_attachment(
            &device,
            "Default depth",
            size,
            DEPTH_FORMAT,
            wgpu::TextureUsages::empty(),
        )
        .create_view(&wgpu::TextureViewDescriptor::default());

        let uniform_bind_group_layout = Self::create_uniform_bind_group_layout(&device);
        let texture_bind_group_layout = Self::create_texture_bind_group_layout(&device);
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Deferred pipeline layout"),
            bind_group_layouts: &[&uniform_bind_group_layout, &texture_bind_group_layout],
            push_constant_ranges: &[],
        });

        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Uniform slots"),
            size: (SLOT_SIZE * SLOT_COUNT) as wgpu::BufferAddress,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let uniform_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Uniform slot"),
            layout: &uniform_bind_group_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer: &uniform_buffer,
                    offset: 0,
                    size: NonZeroU64::new(SLOT_SIZE as u64),
                }),
            }],
        });

        let blank_texture = device
            .create_texture_with_data(
                &queue,
                &wgpu::TextureDescriptor {
                    label: Some("Blank texel"),
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
                },
                &[255, 255, 255, 0],
            )
            .create_view(&wgpu::TextureViewDescriptor::default());

        Self {
            device,
            queue,
            features,
            output,
            size,
            default_depth,
            uniform_buffer,
            uniform_bind_group,
            texture_bind_group_layout,
            pipeline_layout,
            blank_texture,
            ids: IdAllocator::default(),
            textures: HashMap::new(),
            targets: HashMap::new(),
            programs: HashMap::new(),
            meshes: HashMap::new(),
            pipelines: HashMap::new(),
            bound_target: None,
            draw_buffers: HashMap::new(),
            clear_color: [0.; 4],
            depth_test: false,
            active_program: None,
            units: [None; TEXTURE_UNITS],
            batch: Batch::default(),
            errors,
        }
    }

    fn create_attachment(
        device: &wgpu::Device,
        label: &str,
        (width, height): (u32, u32),
        format: wgpu::TextureFormat,
        extra_usage: wgpu::TextureUsages,
    ) -> wgpu::Texture {
        device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | extra_usage,
        })
    }

    fn create_uniform_bind_group_layout(device: &wgpu::Device) -> wgpu::BindGroupLayout {
        device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Uniform slot layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: true,
                    min_binding_size: NonZeroU64::new(SLOT_SIZE as u64),
                },
                count: None,
            }],
        })
    }

    /// One texture per unit, read with `textureLoad`.
    fn create_texture_bind_group_layout(device: &wgpu::Device) -> wgpu::BindGroupLayout {
        let entries: Vec<_> = (0..TEXTURE_UNITS as u32)
            .map(|binding| wgpu::BindGroupLayoutEntry {
                binding,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable: false },
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            })
            .collect();

        device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Texture unit layout"),
            entries: &entries,
        })
    }

    fn raise(&self, error: GpuError) {
        match self.errors.lock() {
            Ok(mut flag) => flag.raise(error),
            Err(poisoned) => poisoned.into_inner().raise(error),
        }
    }

    fn draw_buffer_count(&self) -> usize {
        self.draw_buffers
            .get(&self.bound_target)
            .copied()
            .unwrap_or(1)
    }

    /// The color formats of the bound destination and whether it has a depth buffer.
    fn destination_formats(&self) -> (Vec<wgpu::TextureFormat>, bool) {
        match self.bound_target.and_then(|id| self.targets.get(&id)) {
            Some(target) => (
                target
                    .color
                    .iter()
                    .filter_map(|id| self.textures.get(id))
                    .map(|texture| wgpu_format(texture.descriptor.format))
                    .collect(),
                target.depth.is_some(),
            ),
            None => (vec![self.output.format()], true),
        }
    }

    /// Raises an error and returns `false` if the bound render target cannot be drawn to.
    fn check_destination(&self, operation: &str) -> bool {
        let Some(target) = self.bound_target else {
            return true;
        };

        match self.render_target_status(target) {
            TargetStatus::Complete => true,
            status => {
                self.raise(GpuError::InvalidOperation(format!(
                    "{operation} into render target #{}: {status}",
                    target.0,
                )));

                false
            }
        }
    }

    /// Makes sure a surface frame is available to draw into.
    fn acquire_frame(&mut self) -> bool {
        let Output::Surface {
            surface,
            format,
            frame,
        } = &mut self.output
        else {
            return true;
        };
        if frame.is_some() {
            return true;
        }

        let texture = match surface.get_current_texture() {
            Ok(texture) => texture,
            Err(wgpu::SurfaceError::Outdated | wgpu::SurfaceError::Lost) => {
                let (width, height) = self.size;
                Self::configure_surface(&self.device, surface, *format, width, height);
                match surface.get_current_texture() {
                    Ok(texture) => texture,
                    Err(e) => {
                        self.raise(GpuError::Backend(e.to_string()));
                        return false;
                    }
                }
            }
            Err(e) => {
                self.raise(GpuError::Backend(e.to_string()));
                return false;
            }
        };
        let view = texture
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        *frame = Some(Frame { texture, view });

        true
    }

    fn ensure_pipeline(&mut self, key: &PipelineKey) {
        if self.pipelines.contains_key(key) {
            return;
        }
        let Some(program) = self.programs.get(&key.program) else {
            return;
        };

        let targets: Vec<_> = key
            .colors
            .iter()
            .enumerate()
            .map(|(i, &format)| {
                Some(wgpu::ColorTargetState {
                    format,
                    blend: None,
                    write_mask: if i < key.draw_buffers {
                        wgpu::ColorWrites::ALL
                    } else {
                        wgpu::ColorWrites::empty()
                    },
                })
            })
            .collect();
        let polygon_mode = match key.mode.fill {
            FillMode::Fill => wgpu::PolygonMode::Fill,
            FillMode::Line if self.features.contains(wgpu::Features::POLYGON_MODE_LINE) => {
                wgpu::PolygonMode::Line
            }
            FillMode::Line => {
                tracing::debug!("Line rasterization is unsupported; drawing filled");
                wgpu::PolygonMode::Fill
            }
        };
        let cull_mode = match key.mode.faces {
            Faces::Front => Some(wgpu::Face::Back),
            Faces::Back => Some(wgpu::Face::Front),
            Faces::FrontAndBack => None,
        };

        let pipeline = self
            .device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(program.name.as_str()),
                layout: Some(&self.pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &program.vertex,
                    entry_point: "main",
                    buffers: &[wgpu::VertexBufferLayout {
                        array_stride: std::mem::size_of::<MeshVertex>() as wgpu::BufferAddress,
                        step_mode: wgpu::VertexStepMode::Vertex,
                        attributes: &wgpu::vertex_attr_array![
                            0 => Float32x3,
                            1 => Float32x3,
                            2 => Float32x2,
                        ],
                    }],
                },
                fragment: Some(wgpu::FragmentState {
                    module: &program.fragment,
                    entry_point: "main",
                    targets: &targets,
                }),
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleList,
                    front_face: wgpu::FrontFace::Ccw,
                    cull_mode,
                    polygon_mode,
                    ..Default::default()
                },
                depth_stencil: key.depth.then(|| wgpu::DepthStencilState {
                    format: DEPTH_FORMAT,
                    depth_write_enabled: key.depth_test,
                    depth_compare: if key.depth_test {
                        wgpu::CompareFunction::Less
                    } else {
                        wgpu::CompareFunction::Always
                    },
                    stencil: wgpu::StencilState::default(),
                    bias: wgpu::DepthBiasState::default(),
                }),
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
            });
        self.pipelines.insert(key.clone(), pipeline);
    }

    fn create_texture_bind_group(&self, units: &[Option<TextureId>; TEXTURE_UNITS]) -> wgpu::BindGroup {
        let entries: Vec<_> = units
            .iter()
            .enumerate()
            .map(|(binding, unit)| wgpu::BindGroupEntry {
                binding: binding as u32,
                resource: wgpu::BindingResource::TextureView(
                    unit.and_then(|id| self.textures.get(&id))
                        .map_or(&self.blank_texture, |texture| &texture.view),
                ),
            })
            .collect();

        self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Texture units"),
            layout: &self.texture_bind_group_layout,
            entries: &entries,
        })
    }

    /// Encodes and submits the pending batch as one render pass.
    fn flush(&mut self) {
        if self.batch.is_empty() {
            return;
        }
        let batch = std::mem::take(&mut self.batch);
        if self.bound_target.is_none() && !self.acquire_frame() {
            return;
        }

        for draw in &batch.draws {
            self.ensure_pipeline(&draw.pipeline);
        }

        let mut texture_groups = Vec::new();
        let mut group_indices = HashMap::new();
        let draw_groups: Vec<usize> = batch
            .draws
            .iter()
            .map(|draw| {
                *group_indices.entry(draw.units).or_insert_with(|| {
                    texture_groups.push(self.create_texture_bind_group(&draw.units));
                    texture_groups.len() - 1
                })
            })
            .collect();

        if !batch.uniforms.is_empty() {
            self.queue
                .write_buffer(&self.uniform_buffer, 0, &batch.uniforms);
        }

        let (color_views, depth_view): (Vec<&wgpu::TextureView>, Option<&wgpu::TextureView>) =
            match self.bound_target.and_then(|id| self.targets.get(&id)) {
            Some(target) => (
                target
                    .color
                    .iter()
                    .filter_map(|id| self.textures.get(id))
                    .map(|texture| &texture.view)
                    .collect(),
                target
                    .depth
                    .and_then(|id| self.textures.get(&id))
                    .map(|texture| &texture.view),
            ),
            None => (self.output.view().into_iter().collect(), Some(&self.default_depth)),
        };

        let load = match batch.clear {
            Some([r, g, b, a]) => wgpu::LoadOp::Clear(wgpu::Color {
                r: r.into(),
                g: g.into(),
                b: b.into(),
                a: a.into(),
            }),
            None => wgpu::LoadOp::Load,
        };
        let color_attachments: Vec<_> = color_views
            .iter()
            .map(|view| {
                Some(wgpu::RenderPassColorAttachment {
                    view,
                    resolve_target: None,
                    ops: wgpu::Operations { load, store: true },
                })
            })
            .collect();

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Deferred command encoder"),
            });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Deferred render pass"),
                color_attachments: &color_attachments,
                depth_stencil_attachment: depth_view.map(|view| {
                    wgpu::RenderPassDepthStencilAttachment {
                        view,
                        depth_ops: Some(wgpu::Operations {
                            load: match batch.clear {
                                // In clip space, 1.0 is the maximum depth.
                                Some(_) => wgpu::LoadOp::Clear(1.0),
                                None => wgpu::LoadOp::Load,
                            },
                            store: true,
                        }),
                        stencil_ops: None,
                    }
                }),
            });

            for (draw, group) in batch.draws.iter().zip(draw_groups) {
                let (Some(pipeline), Some(mesh)) =
                    (self.pipelines.get(&draw.pipeline), self.meshes.get(&draw.mesh))
                else {
                    continue;
                };
                if mesh.index_count == 0 {
                    continue;
                }

                pass.set_pipeline(pipeline);
                pass.set_bind_group(0, &self.uniform_bind_group, &[draw.uniform_offset]);
                pass.set_bind_group(1, &texture_groups[group], &[]);
                pass.set_vertex_buffer(0, mesh.vertex_buffer.slice(..));
                pass.set_index_buffer(mesh.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
                pass.draw_indexed(0..mesh.index_count, 0, 0..1);
            }
        }
        self.queue.submit(Some(encoder.finish()));
        tracing::trace!("Submitted {} draw(s)", batch.draws.len());
    }

    /// Copies a texture into a buffer and maps it.
    fn read_back(
        &self,
        texture: &wgpu::Texture,
        (width, height): (u32, u32),
        texel_size: u32,
    ) -> Result<Vec<u8>, GpuError> {
        let row_size = width * texel_size;
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let padded_row_size = (row_size + align - 1) / align * align;

        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Readback"),
            size: u64::from(padded_row_size * height),
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Readback encoder"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &buffer,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: NonZeroU32::new(padded_row_size),
                    rows_per_image: None,
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(Some(encoder.finish()));

        let mapped = Arc::new(Mutex::new(None));
        let slice = buffer.slice(..);
        {
            let mapped = Arc::clone(&mapped);
            slice.map_async(wgpu::MapMode::Read, move |result| {
                if let Ok(mut mapped) = mapped.lock() {
                    *mapped = Some(result);
                }
            });
        }
        self.device.poll(wgpu::Maintain::Wait);

        match mapped.lock().ok().and_then(|mut mapped| mapped.take()) {
            Some(Ok(())) => {}
            Some(Err(e)) => return Err(GpuError::Backend(e.to_string())),
            None => return Err(GpuError::Backend("readback never completed".to_owned())),
        }

        let bytes = {
            let data = slice.get_mapped_range();
            data.chunks_exact(padded_row_size as usize)
                .flat_map(|row| &row[..row_size as usize])
                .copied()
                .collect()
        };
        buffer.unmap();

        Ok(bytes)
    }
}

/// Converts read-back bytes of `format` to float texels.
fn decode(format: wgpu::TextureFormat, bytes: &[u8]) -> Result<Vec<[f32; 4]>, GpuError> {
    use wgpu::TextureFormat as F;

    let unorm = |c: u8| f32::from(c) / 255.;
    let texels = match format {
        F::Rgba8Unorm | F::Rgba8UnormSrgb => bytes
            .chunks_exact(4)
            .map(|t| [unorm(t[0]), unorm(t[1]), unorm(t[2]), unorm(t[3])])
            .collect(),
        F::Bgra8Unorm | F::Bgra8UnormSrgb => bytes
            .chunks_exact(4)
            .map(|t| [unorm(t[2]), unorm(t[1]), unorm(t[0]), unorm(t[3])])
            .collect(),
        F::Rgba16Float => bytes
            .chunks_exact(8)
            .map(|t| {
                std::array::from_fn(|i| {
                    half::f16::from_le_bytes([t[2 * i], t[2 * i + 1]]).to_f32()
                })
            })
            .collect(),
        F::Rgba32Float => bytes
            .chunks_exact(16)
            .map(|t| {
                std::array::from_fn(|i| {
                    f32::from_le_bytes([t[4 * i], t[4 * i + 1], t[4 * i + 2], t[4 * i + 3]])
                })
            })
            .collect(),
        other => {
            return Err(GpuError::InvalidOperation(format!(
                "{other:?} textures cannot be read back",
            )))
        }
    };

    Ok(texels)
}

impl Device for NativeDevice {
    fn capabilities(&self) -> Capabilities {
        Capabilities {
            max_samples: 1,
            texture_units: TEXTURE_UNITS,
            max_color_attachments: MAX_COLOR_ATTACHMENTS,
        }
    }

    fn output_size(&self) -> (u32, u32) {
        self.size
    }

    fn create_texture(&mut self, descriptor: &TextureDescriptor) -> Result<TextureId, GpuError> {
        if descriptor.width == 0 || descriptor.height == 0 {
            return Err(GpuError::InvalidValue(format!(
                "texture '{}' has no area",
                descriptor.label,
            )));
        }
        if descriptor.samples != 1 {
            return Err(GpuError::InvalidValue(format!(
                "texture '{}' has {} samples; this device supports 1",
                descriptor.label, descriptor.samples,
            )));
        }

        let extra_usage = if descriptor.format.is_depth() {
            wgpu::TextureUsages::empty()
        } else {
            wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_DST
                | wgpu::TextureUsages::COPY_SRC
        };
        let texture = Self::create_attachment(
            &self.device,
            descriptor.label,
            (descriptor.width, descriptor.height),
            wgpu_format(descriptor.format),
            extra_usage,
        );
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        let id = TextureId(self.ids.next());
        self.textures.insert(
            id,
            NativeTexture {
                descriptor: *descriptor,
                texture,
                view,
            },
        );
        tracing::debug!("Created texture #{} '{}'", id.0, descriptor.label);

        Ok(id)
    }

    fn write_texture(&mut self, texture: TextureId, texels: &[u8]) -> Result<(), GpuError> {
        self.flush();

        let target = self
            .textures
            .get(&texture)
            .ok_or_else(|| GpuError::InvalidValue(format!("no texture #{}", texture.0)))?;
        let descriptor = target.descriptor;
        if descriptor.format.is_depth() {
            return Err(GpuError::InvalidOperation(
                "depth textures cannot be written".to_owned(),
            ));
        }
        let row_size = descriptor.width as usize * descriptor.format.texel_size();
        let expected = row_size * descriptor.height as usize;
        if texels.len() != expected {
            return Err(GpuError::InvalidValue(format!(
                "expected {} bytes of texels, got {}",
                expected,
                texels.len(),
            )));
        }

        self.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &target.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            texels,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: NonZeroU32::new(row_size as u32),
                rows_per_image: None,
            },
            wgpu::Extent3d {
                width: descriptor.width,
                height: descriptor.height,
                depth_or_array_layers: 1,
            },
        );

        Ok(())
    }

    fn destroy_texture(&mut self, texture: TextureId) {
        self.flush();
        if self.textures.remove(&texture).is_some() {
            for unit in &mut self.units {
                if *unit == Some(texture) {
                    *unit = None;
                }
            }
        }
    }

    fn create_render_target(&mut self, descriptor: &RenderTargetDescriptor) -> RenderTargetId {
        let id = RenderTargetId(self.ids.next());
        self.targets.insert(id, descriptor.clone());

        id
    }

    fn render_target_status(&self, target: RenderTargetId) -> TargetStatus {
        match self.targets.get(&target) {
            Some(descriptor) => descriptor.status(&self.capabilities(), |id| {
                self.textures.get(&id).map(|texture| texture.descriptor)
            }),
            None => TargetStatus::MissingAttachment,
        }
    }

    fn destroy_render_target(&mut self, target: RenderTargetId) {
        self.flush();
        if self.targets.remove(&target).is_some() {
            self.draw_buffers.remove(&Some(target));
            if self.bound_target == Some(target) {
                self.bound_target = None;
            }
        }
    }

    fn create_program(&mut self, source: &ProgramSource) -> Result<ProgramId, ShaderError> {
        let block_size = source.interface.block_size();
        if block_size > SLOT_SIZE {
            return Err(ShaderError::Link {
                program: source.name.to_string(),
                log: format!("uniform block of {block_size} bytes exceeds {SLOT_SIZE}"),
            });
        }

        let compile = |stage: ShaderStage, code: &str| {
            self.device.push_error_scope(wgpu::ErrorFilter::Validation);
            let module = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(format!("{} ({})", source.name, stage).as_str()),
                source: wgpu::ShaderSource::Wgsl(code.to_owned().into()),
            });

            match pollster::block_on(self.device.pop_error_scope()) {
                None => Ok(module),
                Some(error) => Err(ShaderError::Compile {
                    program: source.name.to_string(),
                    stage,
                    log: error.to_string(),
                }),
            }
        };
        let vertex = compile(ShaderStage::Vertex, &source.vertex.code)?;
        let fragment = compile(ShaderStage::Fragment, &source.fragment.code)?;

        let id = ProgramId(self.ids.next());
        self.programs.insert(
            id,
            NativeProgram {
                name: source.name.to_string(),
                vertex,
                fragment,
                interface: source.interface.clone(),
                block: vec![0; block_size],
            },
        );

        Ok(id)
    }

    fn uniform_location(&self, program: ProgramId, name: &str) -> Option<UniformLocation> {
        self.programs
            .get(&program)?
            .interface
            .find(name)
            .map(|index| UniformLocation { program, index })
    }

    fn destroy_program(&mut self, program: ProgramId) {
        self.flush();
        if self.programs.remove(&program).is_some() {
            self.pipelines.retain(|key, _| key.program != program);
            if self.active_program == Some(program) {
                self.active_program = None;
            }
        }
    }

    fn create_mesh(&mut self, mesh: &Mesh) -> Result<MeshId, GpuError> {
        if !mesh.is_valid() {
            return Err(GpuError::InvalidValue("mesh index out of range".to_owned()));
        }

        let indices = mesh.triangle_indices();
        let vertex_buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Mesh vertices"),
                contents: bytemuck::cast_slice(&mesh.vertices),
                usage: wgpu::BufferUsages::VERTEX,
            });
        let index_buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Mesh indices"),
                contents: bytemuck::cast_slice(&indices),
                usage: wgpu::BufferUsages::INDEX,
            });

        let id = MeshId(self.ids.next());
        self.meshes.insert(
            id,
            NativeMesh {
                vertex_buffer,
                index_buffer,
                index_count: indices.len() as u32,
            },
        );

        Ok(id)
    }

    fn destroy_mesh(&mut self, mesh: MeshId) {
        self.flush();
        self.meshes.remove(&mesh);
    }

    fn bind_render_target(&mut self, target: Option<RenderTargetId>) {
        if let Some(id) = target {
            if !self.targets.contains_key(&id) {
                self.raise(GpuError::InvalidOperation(format!("no render target #{}", id.0)));
                return;
            }
        }

        if target != self.bound_target {
            self.flush();
            self.bound_target = target;
        }
    }

    fn set_draw_buffers(&mut self, count: usize) {
        let (colors, _) = self.destination_formats();
        if count > colors.len() {
            self.raise(GpuError::InvalidValue(format!(
                "{count} draw buffers requested, {} available",
                colors.len(),
            )));
            return;
        }

        self.draw_buffers.insert(self.bound_target, count);
    }

    fn set_clear_color(&mut self, color: [f32; 4]) {
        self.clear_color = color;
    }

    fn clear(&mut self) {
        if !self.check_destination("clear") {
            return;
        }

        if !self.batch.draws.is_empty() {
            self.flush();
        }
        self.batch.clear = Some(self.clear_color);
    }

    fn set_depth_test(&mut self, enabled: bool) {
        self.depth_test = enabled;
    }

    fn use_program(&mut self, program: Option<ProgramId>) {
        if let Some(id) = program {
            if !self.programs.contains_key(&id) {
                self.raise(GpuError::InvalidValue(format!("no program #{}", id.0)));
                return;
            }
        }

        self.active_program = program;
    }

    fn active_program(&self) -> Option<ProgramId> {
        self.active_program
    }

    fn set_uniform(&mut self, location: UniformLocation, value: UniformValue) {
        if self.active_program != Some(location.program) {
            self.raise(GpuError::InvalidOperation(
                "uniform set on an inactive program".to_owned(),
            ));
            return;
        }
        let Some(program) = self.programs.get_mut(&location.program) else {
            return;
        };
        let Some(slot) = program.interface.uniforms.get(location.index) else {
            let error = GpuError::InvalidOperation(format!("no uniform at index {}", location.index));
            self.raise(error);
            return;
        };
        if slot.kind != value.kind() {
            let error = GpuError::InvalidOperation(format!(
                "uniform '{}' is a {:?}, got a {:?}",
                slot.name,
                slot.kind,
                value.kind(),
            ));
            self.raise(error);
            return;
        }

        let offset = program.interface.offset(location.index);
        let size = slot.kind.size();
        value.write_to(&mut program.block[offset..offset + size]);
    }

    fn bind_texture(&mut self, unit: usize, texture: Option<TextureId>) {
        if unit >= TEXTURE_UNITS {
            self.raise(GpuError::InvalidEnum(format!("texture unit {unit}")));
            return;
        }
        if let Some(id) = texture {
            match self.textures.get(&id) {
                None => {
                    self.raise(GpuError::InvalidValue(format!("no texture #{}", id.0)));
                    return;
                }
                Some(bound) if bound.descriptor.format.is_depth() => {
                    self.raise(GpuError::InvalidOperation(
                        "depth textures cannot be sampled".to_owned(),
                    ));
                    return;
                }
                Some(_) => {}
            }
        }

        self.units[unit] = texture;
    }

    fn bound_texture(&self, unit: usize) -> Option<TextureId> {
        self.units.get(unit).copied().flatten()
    }

    fn draw(&mut self, mesh: MeshId, mode: DrawMode) {
        let Some(program) = self.active_program else {
            self.raise(GpuError::InvalidOperation("draw without a program".to_owned()));
            return;
        };
        if !self.meshes.contains_key(&mesh) {
            self.raise(GpuError::InvalidValue(format!("no mesh #{}", mesh.0)));
            return;
        }
        if !self.check_destination("draw") {
            return;
        }
        if self.batch.uniforms.len() + SLOT_SIZE > SLOT_SIZE * SLOT_COUNT {
            self.flush();
        }

        let (colors, depth) = self.destination_formats();
        let pipeline = PipelineKey {
            program,
            draw_buffers: self.draw_buffer_count().min(colors.len()),
            colors,
            depth,
            depth_test: self.depth_test,
            mode,
        };

        let Some(block) = self.programs.get(&program).map(|program| &program.block) else {
            return;
        };
        let uniform_offset = self.batch.uniforms.len();
        self.batch.uniforms.extend_from_slice(block);
        self.batch.uniforms.resize(uniform_offset + SLOT_SIZE, 0);

        self.batch.draws.push(DrawCall {
            pipeline,
            mesh,
            uniform_offset: uniform_offset as u32,
            units: self.units,
        });
    }

    fn present(&mut self) {
        self.flush();
        if let Output::Surface { frame, .. } = &mut self.output {
            if let Some(frame) = frame.take() {
                frame.texture.present();
            }
        }
    }

    fn take_error(&mut self) -> Option<GpuError> {
        match self.errors.lock() {
            Ok(mut flag) => flag.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }

    fn read_texture(&mut self, texture: Option<TextureId>) -> Result<Image, GpuError> {
        self.flush();

        let (source, size, format, image_format) = match texture {
            Some(id) => {
                let texture = self
                    .textures
                    .get(&id)
                    .ok_or_else(|| GpuError::InvalidValue(format!("no texture #{}", id.0)))?;
                let descriptor = texture.descriptor;
                if descriptor.format.is_depth() {
                    return Err(GpuError::InvalidOperation(
                        "depth textures cannot be read back".to_owned(),
                    ));
                }

                (
                    &texture.texture,
                    (descriptor.width, descriptor.height),
                    wgpu_format(descriptor.format),
                    descriptor.format,
                )
            }
            None => match &self.output {
                Output::Offscreen { texture, .. } => {
                    (texture, self.size, OFFSCREEN_FORMAT, TextureFormat::Rgba8)
                }
                Output::Surface { .. } => {
                    return Err(GpuError::InvalidOperation(
                        "the window surface cannot be read back".to_owned(),
                    ))
                }
            },
        };
        let texel_size = match format {
            wgpu::TextureFormat::Rgba16Float => 8,
            wgpu::TextureFormat::Rgba32Float => 16,
            _ => 4,
        };

        let bytes = self.read_back(source, size, texel_size)?;

        Ok(Image {
            width: size.0,
            height: size.1,
            format: image_format,
            texels: decode(format, &bytes)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_map_to_attachment_formats() {
        assert_eq!(wgpu_format(TextureFormat::Rgba8), wgpu::TextureFormat::Rgba8Unorm);
        assert_eq!(wgpu_format(TextureFormat::Rgba16F), wgpu::TextureFormat::Rgba16Float);
        assert_eq!(wgpu_format(TextureFormat::Rgba32F), wgpu::TextureFormat::Rgba32Float);
        assert_eq!(wgpu_format(TextureFormat::Depth24), DEPTH_FORMAT);
    }

    #[test]
    fn read_back_texels_are_decoded_per_format() {
        let bgra = decode(wgpu::TextureFormat::Bgra8Unorm, &[0, 0, 255, 255]).unwrap();
        assert_eq!(bgra, [[1., 0., 0., 1.]]);

        let floats: Vec<u8> = [1f32, 2., 3., 4.].iter().flat_map(|f| f.to_le_bytes()).collect();
        assert_eq!(
            decode(wgpu::TextureFormat::Rgba32Float, &floats).unwrap(),
            [[1., 2., 3., 4.]],
        );

        assert!(decode(wgpu::TextureFormat::Depth32Float, &[0; 4]).is_err());
    }

    #[test]
    fn every_builtin_program_fits_a_uniform_slot() {
        for source in [
            ProgramSource::geometry_pass(),
            ProgramSource::lighting_pass(),
            ProgramSource::debug_view(),
        ] {
            assert!(source.interface.block_size() <= SLOT_SIZE);
        }
        assert_eq!(SLOT_SIZE % 256, 0);
    }
}
