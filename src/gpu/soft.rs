// SPDX-License-Identifier: MPL-2.0

//! A device that rasterizes on the CPU.
//!
//! Programs are not compiled: each built-in program name selects a kernel that computes what the
//! program's WGSL computes. Textures keep their texels as floats, rounded to the precision of
//! their format whenever they are written, so reads match what a GPU would store.

use std::collections::HashMap;

use super::{
    Capabilities, Device, ErrorFlag, GpuError, IdAllocator, Image, MeshId, ProgramId,
    ProgramInterface, ProgramSource, RenderTargetDescriptor, RenderTargetId, ShaderError,
    ShaderStage, TargetStatus, TextureDescriptor, TextureFormat, TextureId, UniformLocation,
    UniformValue, MAX_COLOR_ATTACHMENTS, TEXTURE_UNITS,
};
use crate::{
    mesh::{DrawMode, MeshVertex},
    Mesh, MeshVertexIndex,
};
use kernels::{Kernel, Uniforms, Units};

mod kernels;
mod raster;

/// The largest value a 24-bit depth texel holds.
const DEPTH_MAX: f32 = ((1 << 24) - 1) as f32;

#[derive(Clone, Debug, Default, PartialEq)]
struct Texels {
    width: u32,
    height: u32,
    data: Vec<[f32; 4]>,
}

#[derive(Clone, Debug)]
struct SoftTexture {
    descriptor: TextureDescriptor,
    texels: Texels,
}

impl SoftTexture {
    fn new(descriptor: TextureDescriptor) -> Self {
        Self {
            descriptor,
            texels: Texels {
                width: descriptor.width,
                height: descriptor.height,
                data: vec![[0.; 4]; (descriptor.width * descriptor.height) as usize],
            },
        }
    }

    fn store(&mut self, index: usize, texel: [f32; 4]) {
        self.texels.data[index] = quantize(self.descriptor.format, texel);
    }

    fn fill(&mut self, texel: [f32; 4]) {
        let texel = quantize(self.descriptor.format, texel);
        self.texels.data.fill(texel);
    }

    fn image(&self) -> Image {
        Image {
            width: self.texels.width,
            height: self.texels.height,
            format: self.descriptor.format,
            texels: self.texels.data.clone(),
        }
    }
}

/// Rounds `texel` to what `format` can hold.
fn quantize(format: TextureFormat, texel: [f32; 4]) -> [f32; 4] {
    match format {
        TextureFormat::Rgba8 => texel.map(|c| (c.clamp(0., 1.) * 255.).round() / 255.),
        TextureFormat::Rgba16F => texel.map(|c| half::f16::from_f32(c).to_f32()),
        TextureFormat::Rgba32F => texel,
        TextureFormat::Depth24 => {
            let depth = (texel[0].clamp(0., 1.) * DEPTH_MAX).round() / DEPTH_MAX;

            [depth, 0., 0., 0.]
        }
    }
}

/// Decodes tightly packed texels of `format`.
fn decode(format: TextureFormat, bytes: &[u8]) -> Vec<[f32; 4]> {
    let texels = bytes.chunks_exact(format.texel_size());

    match format {
        TextureFormat::Rgba8 => texels
            .map(|t| [t[0], t[1], t[2], t[3]].map(|c| f32::from(c) / 255.))
            .collect(),
        TextureFormat::Rgba16F => texels
            .map(|t| {
                std::array::from_fn(|i| {
                    half::f16::from_le_bytes([t[2 * i], t[2 * i + 1]]).to_f32()
                })
            })
            .collect(),
        TextureFormat::Rgba32F => texels
            .map(|t| {
                std::array::from_fn(|i| {
                    f32::from_le_bytes([t[4 * i], t[4 * i + 1], t[4 * i + 2], t[4 * i + 3]])
                })
            })
            .collect(),
        TextureFormat::Depth24 => texels
            .map(|t| {
                let depth = u32::from_le_bytes([t[0], t[1], t[2], t[3]]) & 0x00ff_ffff;

                [depth as f32 / DEPTH_MAX, 0., 0., 0.]
            })
            .collect(),
    }
}

#[derive(Debug)]
struct SoftProgram {
    kernel: Kernel,
    interface: ProgramInterface,
    values: Vec<Option<UniformValue>>,
}

#[derive(Debug)]
struct SoftMesh {
    vertices: Vec<MeshVertex>,
    /// A triangle list.
    indices: Vec<MeshVertexIndex>,
}

/// A software implementation of [`Device`].
///
/// The default destination is an RGBA8 color image with a 24-bit depth buffer.
#[derive(Debug)]
pub struct SoftDevice {
    size: (u32, u32),
    ids: IdAllocator,
    textures: HashMap<TextureId, SoftTexture>,
    default_color: TextureId,
    default_depth: TextureId,
    targets: HashMap<RenderTargetId, RenderTargetDescriptor>,
    programs: HashMap<ProgramId, SoftProgram>,
    meshes: HashMap<MeshId, SoftMesh>,
    bound_target: Option<RenderTargetId>,
    /// Per destination; destinations not in the map write one buffer.
    draw_buffers: HashMap<Option<RenderTargetId>, usize>,
    clear_color: [f32; 4],
    depth_test: bool,
    active_program: Option<ProgramId>,
    units: [Option<TextureId>; TEXTURE_UNITS],
    errors: ErrorFlag,
    presented_frames: u64,
}

impl SoftDevice {
    pub fn new(width: u32, height: u32) -> Self {
        let mut ids = IdAllocator::default();
        let mut textures = HashMap::new();
        let mut create = |label, format| {
            let id = TextureId(ids.next());
            textures.insert(
                id,
                SoftTexture::new(TextureDescriptor {
                    label,
                    width,
                    height,
                    format,
                    samples: 1,
                }),
            );

            id
        };
        let default_color = create("default color", TextureFormat::Rgba8);
        let default_depth = create("default depth", TextureFormat::Depth24);

        Self {
            size: (width, height),
            ids,
            textures,
            default_color,
            default_depth,
            targets: HashMap::new(),
            programs: HashMap::new(),
            meshes: HashMap::new(),
            bound_target: None,
            draw_buffers: HashMap::new(),
            clear_color: [0.; 4],
            depth_test: false,
            active_program: None,
            units: [None; TEXTURE_UNITS],
            errors: ErrorFlag::default(),
            presented_frames: 0,
        }
    }

    /// The number of [`present`](Device::present) calls so far.
    pub fn presented_frames(&self) -> u64 {
        self.presented_frames
    }

    fn draw_buffer_count(&self) -> usize {
        self.draw_buffers
            .get(&self.bound_target)
            .copied()
            .unwrap_or(1)
    }

    /// The color attachments and depth buffer of the bound destination, with its size.
    fn destination(&self) -> (Vec<TextureId>, Option<TextureId>, (u32, u32)) {
        match self.bound_target.and_then(|id| self.targets.get(&id)) {
            Some(target) => {
                let size = target
                    .color
                    .iter()
                    .chain(&target.depth)
                    .find_map(|id| self.textures.get(id))
                    .map_or((0, 0), |t| (t.texels.width, t.texels.height));

                (target.color.clone(), target.depth, size)
            }
            None => (vec![self.default_color], Some(self.default_depth), self.size),
        }
    }

    /// Raises an error and returns `false` if the bound render target cannot be drawn to.
    fn check_destination(&mut self, operation: &str) -> bool {
        let Some(target) = self.bound_target else {
            return true;
        };

        match self.render_target_status(target) {
            TargetStatus::Complete => true,
            status => {
                self.errors.raise(GpuError::InvalidOperation(format!(
                    "{operation} into render target #{}: {status}",
                    target.0,
                )));

                false
            }
        }
    }

    fn missing(&mut self, what: &str, id: u32) {
        self.errors
            .raise(GpuError::InvalidValue(format!("no {what} #{id}")));
    }
}

impl Device for SoftDevice {
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

        let id = TextureId(self.ids.next());
        self.textures.insert(id, SoftTexture::new(*descriptor));
        tracing::debug!("Created texture #{} '{}'", id.0, descriptor.label);

        Ok(id)
    }

    fn write_texture(&mut self, texture: TextureId, texels: &[u8]) -> Result<(), GpuError> {
        let target = self
            .textures
            .get_mut(&texture)
            .ok_or_else(|| GpuError::InvalidValue(format!("no texture #{}", texture.0)))?;
        let format = target.descriptor.format;
        let expected = target.texels.data.len() * format.texel_size();
        if texels.len() != expected {
            return Err(GpuError::InvalidValue(format!(
                "expected {} bytes of texels, got {}",
                expected,
                texels.len(),
            )));
        }

        target.texels.data = decode(format, texels)
            .into_iter()
            .map(|texel| quantize(format, texel))
            .collect();

        Ok(())
    }

    fn destroy_texture(&mut self, texture: TextureId) {
        if texture == self.default_color || texture == self.default_depth {
            self.errors.raise(GpuError::InvalidOperation(
                "the default destination cannot be destroyed".to_owned(),
            ));
            return;
        }

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
                self.textures.get(&id).map(|t| t.descriptor)
            }),
            None => TargetStatus::MissingAttachment,
        }
    }

    fn destroy_render_target(&mut self, target: RenderTargetId) {
        if self.targets.remove(&target).is_some() {
            self.draw_buffers.remove(&Some(target));
            if self.bound_target == Some(target) {
                self.bound_target = None;
            }
        }
    }

    fn create_program(&mut self, source: &ProgramSource) -> Result<ProgramId, ShaderError> {
        for (stage, code) in [
            (ShaderStage::Vertex, &source.vertex.code),
            (ShaderStage::Fragment, &source.fragment.code),
        ] {
            if code.trim().is_empty() {
                return Err(ShaderError::Compile {
                    program: source.name.to_string(),
                    stage,
                    log: "empty shader".to_owned(),
                });
            }
        }
        let kernel = Kernel::for_program(&source.name).ok_or_else(|| ShaderError::Link {
            program: source.name.to_string(),
            log: "the software device only runs the built-in programs".to_owned(),
        })?;

        let id = ProgramId(self.ids.next());
        self.programs.insert(
            id,
            SoftProgram {
                kernel,
                interface: source.interface.clone(),
                values: vec![None; source.interface.uniforms.len()],
            },
        );
        tracing::debug!("Created program #{} '{}'", id.0, source.name);

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
        if self.programs.remove(&program).is_some() && self.active_program == Some(program) {
            self.active_program = None;
        }
    }

    fn create_mesh(&mut self, mesh: &Mesh) -> Result<MeshId, GpuError> {
        if !mesh.is_valid() {
            return Err(GpuError::InvalidValue("mesh index out of range".to_owned()));
        }

        let id = MeshId(self.ids.next());
        self.meshes.insert(
            id,
            SoftMesh {
                vertices: mesh.vertices.clone(),
                indices: mesh.triangle_indices(),
            },
        );

        Ok(id)
    }

    fn destroy_mesh(&mut self, mesh: MeshId) {
        self.meshes.remove(&mesh);
    }

    fn bind_render_target(&mut self, target: Option<RenderTargetId>) {
        if let Some(id) = target {
            if !self.targets.contains_key(&id) {
                self.errors
                    .raise(GpuError::InvalidOperation(format!("no render target #{}", id.0)));
                return;
            }
        }

        self.bound_target = target;
    }

    fn set_draw_buffers(&mut self, count: usize) {
        let (color, _, _) = self.destination();
        if count > color.len() {
            self.errors.raise(GpuError::InvalidValue(format!(
                "{count} draw buffers requested, {} available",
                color.len(),
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

        let (color, depth, _) = self.destination();
        for id in color {
            if let Some(texture) = self.textures.get_mut(&id) {
                texture.fill(self.clear_color);
            }
        }
        if let Some(texture) = depth.and_then(|id| self.textures.get_mut(&id)) {
            texture.fill([1., 0., 0., 0.]);
        }
    }

    fn set_depth_test(&mut self, enabled: bool) {
        self.depth_test = enabled;
    }

    fn use_program(&mut self, program: Option<ProgramId>) {
        if let Some(id) = program {
            if !self.programs.contains_key(&id) {
                self.missing("program", id.0);
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
            self.errors.raise(GpuError::InvalidOperation(
                "uniform set on an inactive program".to_owned(),
            ));
            return;
        }
        let Some(program) = self.programs.get_mut(&location.program) else {
            return;
        };
        let Some(slot) = program.interface.uniforms.get(location.index) else {
            self.errors.raise(GpuError::InvalidOperation(format!(
                "no uniform at index {}",
                location.index,
            )));
            return;
        };
        if slot.kind != value.kind() {
            self.errors.raise(GpuError::InvalidOperation(format!(
                "uniform '{}' is a {:?}, got a {:?}",
                slot.name,
                slot.kind,
                value.kind(),
            )));
            return;
        }

        program.values[location.index] = Some(value);
    }

    fn bind_texture(&mut self, unit: usize, texture: Option<TextureId>) {
        if unit >= TEXTURE_UNITS {
            self.errors
                .raise(GpuError::InvalidEnum(format!("texture unit {unit}")));
            return;
        }
        if let Some(id) = texture {
            if !self.textures.contains_key(&id) {
                self.missing("texture", id.0);
                return;
            }
        }

        self.units[unit] = texture;
    }

    fn bound_texture(&self, unit: usize) -> Option<TextureId> {
        self.units.get(unit).copied().flatten()
    }

    fn draw(&mut self, mesh_id: MeshId, mode: DrawMode) {
        let Some(program_id) = self.active_program else {
            self.errors
                .raise(GpuError::InvalidOperation("draw without a program".to_owned()));
            return;
        };
        if !self.meshes.contains_key(&mesh_id) {
            self.missing("mesh", mesh_id.0);
            return;
        }
        if !self.check_destination("draw") {
            return;
        }

        let (color_ids, depth_id, (width, height)) = self.destination();
        let color_ids = &color_ids[..self.draw_buffer_count().min(color_ids.len())];

        // Attachments leave the table for the duration of the draw so they can be written while
        // the textures bound to units are read.
        let mut color: Vec<_> = color_ids.iter().map(|id| self.textures.remove(id)).collect();
        let mut depth = match (self.depth_test, depth_id) {
            (true, Some(id)) => self.textures.remove(&id).map(|texture| (id, texture)),
            _ => None,
        };

        if let (Some(program), Some(mesh)) =
            (self.programs.get(&program_id), self.meshes.get(&mesh_id))
        {
            let kernel = program.kernel.prepare(&Uniforms {
                interface: &program.interface,
                values: &program.values,
            });
            let units = Units(std::array::from_fn(|unit| {
                self.units[unit]
                    .and_then(|id| self.textures.get(&id))
                    .map(|texture| &texture.texels)
            }));
            let vertices: Vec<_> = mesh.vertices.iter().map(|v| kernel.vertex(v)).collect();

            for triangle in mesh.indices.chunks_exact(3) {
                let corners = [0, 1, 2].map(|i| vertices[triangle[i] as usize]);
                raster::rasterize_triangle(
                    corners,
                    (width, height),
                    mode.faces,
                    mode.fill,
                    |fragment| {
                        let index = (fragment.y * width + fragment.x) as usize;
                        if let Some((_, depth)) = depth.as_mut() {
                            if fragment.depth >= depth.texels.data[index][0] {
                                return;
                            }
                            depth.store(index, [fragment.depth, 0., 0., 0.]);
                        }

                        let outputs = kernel.fragment(&fragment.varyings, &units);
                        for (texture, output) in color.iter_mut().zip(outputs) {
                            if let (Some(texture), Some(output)) = (texture.as_mut(), output) {
                                texture.store(index, output);
                            }
                        }
                    },
                );
            }
        }

        for (id, texture) in color_ids.iter().zip(color.drain(..)) {
            if let Some(texture) = texture {
                self.textures.insert(*id, texture);
            }
        }
        if let Some((id, texture)) = depth {
            self.textures.insert(id, texture);
        }
    }

    fn present(&mut self) {
        self.presented_frames += 1;
        tracing::trace!("Presented frame {}", self.presented_frames);
    }

    fn take_error(&mut self) -> Option<GpuError> {
        self.errors.take()
    }

    fn read_texture(&mut self, texture: Option<TextureId>) -> Result<Image, GpuError> {
        let id = texture.unwrap_or(self.default_color);

        self.textures
            .get(&id)
            .map(SoftTexture::image)
            .ok_or_else(|| GpuError::InvalidValue(format!("no texture #{}", id.0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{gpu::Program, Matrix4};

    fn texture(device: &mut SoftDevice, format: TextureFormat, width: u32) -> TextureId {
        device
            .create_texture(&TextureDescriptor {
                label: "test",
                width,
                height: width,
                format,
                samples: 1,
            })
            .unwrap()
    }

    /// A 2x2 image: red, green on top; blue, white below.
    fn quadrants(device: &mut SoftDevice) -> TextureId {
        let id = texture(device, TextureFormat::Rgba8, 2);
        #[rustfmt::skip]
        let texels = [
            255, 0, 0, 255,    0, 255, 0, 255,
            0, 0, 255, 255,    255, 255, 255, 255,
        ];
        device.write_texture(id, &texels).unwrap();

        id
    }

    fn debug_program(device: &mut SoftDevice) -> Program {
        let mut program = Program::new(device, &ProgramSource::debug_view()).unwrap();
        program.set(device, "projectionMatrix", Matrix4::<f32>::identity());
        program.set(device, "modelViewMatrix", Matrix4::<f32>::identity());
        program.set(device, "image", 0i32);

        program
    }

    #[test]
    fn clearing_rounds_to_the_destination_format() {
        let mut device = SoftDevice::new(4, 4);
        device.set_clear_color([0.5, 1.5, -1., 1.]);
        device.clear();

        let image = device.read_texture(None).unwrap();
        assert_eq!(image.format, TextureFormat::Rgba8);
        assert_eq!(image.texel(3, 3), [128. / 255., 1., 0., 1.]);
        assert_eq!(device.take_error(), None);
    }

    #[test]
    fn half_float_texels_round_to_half_precision() {
        let mut device = SoftDevice::new(1, 1);
        let id = texture(&mut device, TextureFormat::Rgba16F, 1);
        let bytes: Vec<u8> = [0.1f32, 1., -2., 65504.]
            .into_iter()
            .flat_map(|c| half::f16::from_f32(c).to_le_bytes())
            .collect();
        device.write_texture(id, &bytes).unwrap();

        let texel = device.read_texture(Some(id)).unwrap().texels[0];
        assert_eq!(texel[1..], [1., -2., 65504.]);
        assert!((texel[0] - 0.1).abs() < 1e-3 && texel[0] != 0.1);

        assert!(device.write_texture(id, &bytes[..4]).is_err());
    }

    #[test]
    fn full_screen_quads_show_the_image_upright() {
        let mut device = SoftDevice::new(4, 4);
        let image = quadrants(&mut device);
        let quad = device.create_mesh(&Mesh::screen_quad()).unwrap();
        let _program = debug_program(&mut device);
        device.bind_texture(0, Some(image));
        device.draw(quad, DrawMode::SOLID);
        assert_eq!(device.take_error(), None);

        let output = device.read_texture(None).unwrap();
        assert_eq!(output.texel(0, 0), [1., 0., 0., 1.]);
        assert_eq!(output.texel(3, 0), [0., 1., 0., 1.]);
        assert_eq!(output.texel(0, 3), [0., 0., 1., 1.]);
        assert_eq!(output.texel(3, 3), [1., 1., 1., 1.]);
    }

    #[test]
    fn depth_testing_keeps_the_nearest_fragment() {
        let mut device = SoftDevice::new(4, 4);
        let image = quadrants(&mut device);
        let quad = device.create_mesh(&Mesh::screen_quad()).unwrap();
        let mut program = debug_program(&mut device);
        device.bind_texture(0, Some(image));

        let mut draw_at = |device: &mut SoftDevice, z: f32, unit: i32| {
            let mut model_view = Matrix4::<f32>::identity();
            model_view.translate_xyz(0., 0., z);
            program.set(device, "modelViewMatrix", model_view);
            program.set(device, "image", unit);
            device.draw(quad, DrawMode::SOLID);
        };

        device.clear();
        device.set_depth_test(true);
        draw_at(&mut device, -0.5, 0);
        // Unit 1 has no texture, which samples as white.
        draw_at(&mut device, 0.5, 1);
        assert_eq!(device.read_texture(None).unwrap().texel(0, 0), [1., 0., 0., 1.]);

        device.set_depth_test(false);
        draw_at(&mut device, 0.5, 1);
        assert_eq!(device.read_texture(None).unwrap().texel(0, 0), [1., 1., 1., 1.]);
        assert_eq!(device.take_error(), None);
    }

    #[test]
    fn render_targets_receive_one_output_per_draw_buffer() {
        let mut device = SoftDevice::new(2, 2);
        let layers: Vec<_> = [TextureFormat::Rgba8, TextureFormat::Rgba32F, TextureFormat::Rgba16F]
            .into_iter()
            .map(|format| texture(&mut device, format, 2))
            .collect();
        let depth = texture(&mut device, TextureFormat::Depth24, 2);
        let target = device.create_render_target(&RenderTargetDescriptor {
            label: "layers",
            color: layers.clone(),
            depth: Some(depth),
        });
        assert_eq!(device.render_target_status(target), TargetStatus::Complete);

        device.bind_render_target(Some(target));
        device.set_draw_buffers(3);
        device.set_clear_color([0., 0., 0., 0.]);
        device.clear();
        device.set_depth_test(true);

        let mut program = Program::new(&mut device, &ProgramSource::geometry_pass()).unwrap();
        for name in ["projectionMatrix", "modelViewMatrix", "modelMatrix"] {
            program.set(&mut device, name, Matrix4::<f32>::identity());
        }
        program.set(&mut device, "color", crate::Vector3::<f32>::new(1., 0., 0.));
        let quad = device.create_mesh(&Mesh::screen_quad()).unwrap();
        device.draw(quad, DrawMode::SOLID);
        assert_eq!(device.take_error(), None);

        let diffuse = device.read_texture(Some(layers[0])).unwrap();
        assert_eq!(diffuse.texel(0, 0), [1., 0., 0., 1.]);
        let position = device.read_texture(Some(layers[1])).unwrap();
        assert_eq!(position.texel(0, 0), [-0.5, 0.5, 0., 1.]);
        let normals = device.read_texture(Some(layers[2])).unwrap();
        assert_eq!(normals.texel(1, 1), [0., 0., 1., 1.]);
        let depth = device.read_texture(Some(depth)).unwrap();
        assert!((depth.texel(0, 0)[0] - 0.5).abs() < 1e-6);

        // The default destination has a single buffer of its own.
        device.bind_render_target(None);
        device.set_draw_buffers(3);
        assert!(matches!(device.take_error(), Some(GpuError::InvalidValue(_))));
    }

    #[test]
    fn misuse_raises_errors() {
        let mut device = SoftDevice::new(2, 2);
        device.draw(MeshId(99), DrawMode::SOLID);
        assert!(matches!(device.take_error(), Some(GpuError::InvalidOperation(_))));

        let custom = ProgramSource {
            name: "custom".into(),
            ..ProgramSource::debug_view()
        };
        assert!(matches!(
            device.create_program(&custom),
            Err(ShaderError::Link { .. }),
        ));

        let default = device.default_color;
        device.destroy_texture(default);
        assert!(matches!(device.take_error(), Some(GpuError::InvalidOperation(_))));
        assert!(device.read_texture(None).is_ok());

        let incomplete = device.create_render_target(&RenderTargetDescriptor {
            label: "empty",
            color: Vec::new(),
            depth: None,
        });
        device.bind_render_target(Some(incomplete));
        device.clear();
        assert!(matches!(device.take_error(), Some(GpuError::InvalidOperation(_))));
    }
}
