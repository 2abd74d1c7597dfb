// SPDX-License-Identifier: MPL-2.0

//! A device that records the calls made on it instead of rendering.

use std::{
    cell::Cell,
    collections::{HashMap, HashSet},
};

use super::{
    Capabilities, Device, ErrorFlag, GpuError, IdAllocator, Image, MeshId, ProgramId,
    ProgramInterface, ProgramSource, RenderTargetDescriptor, RenderTargetId, ShaderError,
    ShaderStage, TargetStatus, TextureDescriptor, TextureId, UniformLocation, UniformValue,
    MAX_COLOR_ATTACHMENTS, TEXTURE_UNITS,
};
use crate::{mesh::DrawMode, Mesh};

/// A call made on a [`RecordingDevice`].
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    CreateTexture {
        id: TextureId,
        descriptor: TextureDescriptor,
    },
    WriteTexture(TextureId),
    DestroyTexture(TextureId),
    CreateRenderTarget(RenderTargetId),
    DestroyRenderTarget(RenderTargetId),
    CreateProgram {
        id: ProgramId,
        name: String,
    },
    DestroyProgram(ProgramId),
    CreateMesh(MeshId),
    DestroyMesh(MeshId),
    BindRenderTarget(Option<RenderTargetId>),
    SetDrawBuffers(usize),
    SetClearColor([f32; 4]),
    Clear,
    SetDepthTest(bool),
    UseProgram(Option<ProgramId>),
    SetUniform {
        program: ProgramId,
        name: String,
        value: UniformValue,
    },
    BindTexture {
        unit: usize,
        texture: Option<TextureId>,
    },
    Draw {
        mesh: MeshId,
        mode: DrawMode,
    },
    Present,
}

/// Records every call and tracks the state they leave behind.
///
/// Resource creation succeeds unless configured otherwise, which makes this device useful for
/// checking how the pipeline sequences state and how it copes with failures.
#[derive(Debug)]
pub struct RecordingDevice {
    output_size: (u32, u32),
    capabilities: Capabilities,
    incomplete_targets: bool,
    failing_program: Option<String>,
    commands: Vec<Command>,
    ids: IdAllocator,
    textures: HashMap<TextureId, TextureDescriptor>,
    targets: HashMap<RenderTargetId, RenderTargetDescriptor>,
    programs: HashMap<ProgramId, (String, ProgramInterface)>,
    meshes: HashSet<MeshId>,
    uniforms: HashMap<UniformLocation, UniformValue>,
    location_lookups: Cell<usize>,
    bound_target: Option<RenderTargetId>,
    active_program: Option<ProgramId>,
    units: [Option<TextureId>; TEXTURE_UNITS],
    depth_test: bool,
    draw_buffers: usize,
    errors: ErrorFlag,
}

impl RecordingDevice {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            output_size: (width, height),
            capabilities: Capabilities {
                max_samples: 4,
                texture_units: TEXTURE_UNITS,
                max_color_attachments: MAX_COLOR_ATTACHMENTS,
            },
            incomplete_targets: false,
            failing_program: None,
            commands: Vec::new(),
            ids: IdAllocator::default(),
            textures: HashMap::new(),
            targets: HashMap::new(),
            programs: HashMap::new(),
            meshes: HashSet::new(),
            uniforms: HashMap::new(),
            location_lookups: Cell::new(0),
            bound_target: None,
            active_program: None,
            units: [None; TEXTURE_UNITS],
            depth_test: false,
            draw_buffers: 1,
            errors: ErrorFlag::default(),
        }
    }

    pub fn with_max_samples(mut self, max_samples: u32) -> Self {
        self.capabilities.max_samples = max_samples;
        self
    }

    /// Makes every render target report [`TargetStatus::IncompleteAttachment`].
    pub fn with_incomplete_targets(mut self) -> Self {
        self.incomplete_targets = true;
        self
    }

    /// Makes the program called `name` fail to compile.
    pub fn with_failing_program(mut self, name: impl Into<String>) -> Self {
        self.failing_program = Some(name.into());
        self
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn clear_commands(&mut self) {
        self.commands.clear();
    }

    pub fn bound_textures(&self) -> [Option<TextureId>; TEXTURE_UNITS] {
        self.units
    }

    pub fn bound_render_target(&self) -> Option<RenderTargetId> {
        self.bound_target
    }

    pub fn depth_test(&self) -> bool {
        self.depth_test
    }

    pub fn draw_buffers(&self) -> usize {
        self.draw_buffers
    }

    pub fn texture_descriptor(&self, texture: TextureId) -> Option<TextureDescriptor> {
        self.textures.get(&texture).copied()
    }

    /// The current value of a uniform of `program`.
    pub fn uniform(&self, program: ProgramId, name: &str) -> Option<UniformValue> {
        let (_, interface) = self.programs.get(&program)?;
        let index = interface.find(name)?;

        self.uniforms
            .get(&UniformLocation { program, index })
            .copied()
    }

    /// How many times [`Device::uniform_location`] was called.
    pub fn location_lookups(&self) -> usize {
        self.location_lookups.get()
    }

    /// The number of resources created and not yet destroyed.
    pub fn live_resources(&self) -> usize {
        self.textures.len() + self.targets.len() + self.programs.len() + self.meshes.len()
    }

    fn record(&mut self, command: Command) {
        self.commands.push(command);
    }
}

impl Device for RecordingDevice {
    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn output_size(&self) -> (u32, u32) {
        self.output_size
    }

    fn create_texture(&mut self, descriptor: &TextureDescriptor) -> Result<TextureId, GpuError> {
        if descriptor.width == 0 || descriptor.height == 0 {
            return Err(GpuError::InvalidValue(format!(
                "texture '{}' has no area",
                descriptor.label,
            )));
        }

        let id = TextureId(self.ids.next());
        self.textures.insert(id, *descriptor);
        self.record(Command::CreateTexture {
            id,
            descriptor: *descriptor,
        });

        Ok(id)
    }

    fn write_texture(&mut self, texture: TextureId, texels: &[u8]) -> Result<(), GpuError> {
        let descriptor = self
            .textures
            .get(&texture)
            .ok_or_else(|| GpuError::InvalidValue(format!("no texture #{}", texture.0)))?;
        let expected = (descriptor.width * descriptor.height) as usize
            * descriptor.format.texel_size();
        if texels.len() != expected {
            return Err(GpuError::InvalidValue(format!(
                "expected {} bytes of texels, got {}",
                expected,
                texels.len(),
            )));
        }

        self.record(Command::WriteTexture(texture));

        Ok(())
    }

    fn destroy_texture(&mut self, texture: TextureId) {
        if self.textures.remove(&texture).is_some() {
            self.record(Command::DestroyTexture(texture));
        }
    }

    fn create_render_target(&mut self, descriptor: &RenderTargetDescriptor) -> RenderTargetId {
        let id = RenderTargetId(self.ids.next());
        self.targets.insert(id, descriptor.clone());
        self.record(Command::CreateRenderTarget(id));

        id
    }

    fn render_target_status(&self, target: RenderTargetId) -> TargetStatus {
        let Some(descriptor) = self.targets.get(&target) else {
            return TargetStatus::MissingAttachment;
        };
        if self.incomplete_targets {
            return TargetStatus::IncompleteAttachment;
        }

        descriptor.status(&self.capabilities, |id| self.textures.get(&id).copied())
    }

    fn destroy_render_target(&mut self, target: RenderTargetId) {
        if self.targets.remove(&target).is_some() {
            self.record(Command::DestroyRenderTarget(target));
        }
    }

    fn create_program(&mut self, source: &ProgramSource) -> Result<ProgramId, ShaderError> {
        if self.failing_program.as_deref() == Some(&*source.name) {
            return Err(ShaderError::Compile {
                program: source.name.to_string(),
                stage: ShaderStage::Fragment,
                log: "rejected by the recording device".to_owned(),
            });
        }

        let id = ProgramId(self.ids.next());
        self.programs
            .insert(id, (source.name.to_string(), source.interface.clone()));
        self.record(Command::CreateProgram {
            id,
            name: source.name.to_string(),
        });

        Ok(id)
    }

    fn uniform_location(&self, program: ProgramId, name: &str) -> Option<UniformLocation> {
        self.location_lookups.set(self.location_lookups.get() + 1);
        let (_, interface) = self.programs.get(&program)?;

        interface
            .find(name)
            .map(|index| UniformLocation { program, index })
    }

    fn destroy_program(&mut self, program: ProgramId) {
        if self.programs.remove(&program).is_some() {
            if self.active_program == Some(program) {
                self.active_program = None;
            }
            self.uniforms.retain(|location, _| location.program != program);
            self.record(Command::DestroyProgram(program));
        }
    }

    fn create_mesh(&mut self, mesh: &Mesh) -> Result<MeshId, GpuError> {
        if !mesh.is_valid() {
            return Err(GpuError::InvalidValue("mesh index out of range".to_owned()));
        }

        let id = MeshId(self.ids.next());
        self.meshes.insert(id);
        self.record(Command::CreateMesh(id));

        Ok(id)
    }

    fn destroy_mesh(&mut self, mesh: MeshId) {
        if self.meshes.remove(&mesh) {
            self.record(Command::DestroyMesh(mesh));
        }
    }

    fn bind_render_target(&mut self, target: Option<RenderTargetId>) {
        self.record(Command::BindRenderTarget(target));
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
        self.record(Command::SetDrawBuffers(count));
        let available = match self.bound_target.and_then(|id| self.targets.get(&id)) {
            Some(target) => target.color.len(),
            None => 1,
        };
        if count > available {
            self.errors.raise(GpuError::InvalidValue(format!(
                "{count} draw buffers requested, {available} available",
            )));
            return;
        }

        self.draw_buffers = count;
    }

    fn set_clear_color(&mut self, color: [f32; 4]) {
        self.record(Command::SetClearColor(color));
    }

    fn clear(&mut self) {
        self.record(Command::Clear);
    }

    fn set_depth_test(&mut self, enabled: bool) {
        self.record(Command::SetDepthTest(enabled));
        self.depth_test = enabled;
    }

    fn use_program(&mut self, program: Option<ProgramId>) {
        self.record(Command::UseProgram(program));
        if let Some(id) = program {
            if !self.programs.contains_key(&id) {
                self.errors
                    .raise(GpuError::InvalidValue(format!("no program #{}", id.0)));
                return;
            }
        }

        self.active_program = program;
    }

    fn active_program(&self) -> Option<ProgramId> {
        self.active_program
    }

    fn set_uniform(&mut self, location: UniformLocation, value: UniformValue) {
        let Some(slot) = self
            .programs
            .get(&location.program)
            .and_then(|(_, interface)| interface.uniforms.get(location.index))
        else {
            self.errors
                .raise(GpuError::InvalidOperation("uniform of a destroyed program".to_owned()));
            return;
        };
        let name = slot.name.to_string();
        let kind = slot.kind;

        self.record(Command::SetUniform {
            program: location.program,
            name: name.clone(),
            value,
        });
        if self.active_program != Some(location.program) {
            self.errors.raise(GpuError::InvalidOperation(format!(
                "uniform '{name}' set on an inactive program",
            )));
        } else if kind != value.kind() {
            self.errors.raise(GpuError::InvalidOperation(format!(
                "uniform '{name}' is a {kind:?}, got a {:?}",
                value.kind(),
            )));
        } else {
            self.uniforms.insert(location, value);
        }
    }

    fn bind_texture(&mut self, unit: usize, texture: Option<TextureId>) {
        self.record(Command::BindTexture { unit, texture });
        if unit >= TEXTURE_UNITS {
            self.errors
                .raise(GpuError::InvalidEnum(format!("texture unit {unit}")));
            return;
        }
        if let Some(id) = texture {
            if !self.textures.contains_key(&id) {
                self.errors
                    .raise(GpuError::InvalidValue(format!("no texture #{}", id.0)));
                return;
            }
        }

        self.units[unit] = texture;
    }

    fn bound_texture(&self, unit: usize) -> Option<TextureId> {
        self.units.get(unit).copied().flatten()
    }

    fn draw(&mut self, mesh: MeshId, mode: DrawMode) {
        self.record(Command::Draw { mesh, mode });
        if self.active_program.is_none() {
            self.errors
                .raise(GpuError::InvalidOperation("draw without a program".to_owned()));
        } else if !self.meshes.contains(&mesh) {
            self.errors
                .raise(GpuError::InvalidValue(format!("no mesh #{}", mesh.0)));
        }
    }

    fn present(&mut self) {
        self.record(Command::Present);
    }

    fn take_error(&mut self) -> Option<GpuError> {
        self.errors.take()
    }

    fn read_texture(&mut self, _: Option<TextureId>) -> Result<Image, GpuError> {
        Err(GpuError::InvalidOperation(
            "the recording device keeps no texels".to_owned(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::TextureFormat;

    #[test]
    fn state_calls_are_recorded_and_tracked() {
        let mut device = RecordingDevice::new(8, 8);
        let texture = device
            .create_texture(&TextureDescriptor {
                label: "t",
                width: 8,
                height: 8,
                format: TextureFormat::Rgba8,
                samples: 1,
            })
            .unwrap();

        device.bind_texture(2, Some(texture));
        device.set_depth_test(true);
        assert_eq!(device.bound_textures()[2], Some(texture));
        assert!(device.depth_test());
        assert_eq!(
            device.commands()[1..],
            [
                Command::BindTexture {
                    unit: 2,
                    texture: Some(texture),
                },
                Command::SetDepthTest(true),
            ],
        );
        assert_eq!(device.take_error(), None);
    }

    #[test]
    fn misuse_raises_errors_without_changing_state() {
        let mut device = RecordingDevice::new(8, 8);
        device.bind_texture(TEXTURE_UNITS, None);
        assert!(matches!(device.take_error(), Some(GpuError::InvalidEnum(_))));

        device.draw(MeshId(42), DrawMode::SOLID);
        assert!(matches!(device.take_error(), Some(GpuError::InvalidOperation(_))));

        device.set_draw_buffers(3);
        assert!(matches!(device.take_error(), Some(GpuError::InvalidValue(_))));
        assert_eq!(device.draw_buffers(), 1);
    }

    #[test]
    fn configured_failures() {
        let mut device = RecordingDevice::new(8, 8)
            .with_incomplete_targets()
            .with_failing_program("broken");
        let target = device.create_render_target(&RenderTargetDescriptor {
            label: "empty",
            color: Vec::new(),
            depth: None,
        });
        assert_eq!(
            device.render_target_status(target),
            TargetStatus::IncompleteAttachment,
        );

        let source = ProgramSource {
            name: "broken".into(),
            ..ProgramSource::debug_view()
        };
        assert!(matches!(
            device.create_program(&source),
            Err(ShaderError::Compile { .. }),
        ));
    }
}
