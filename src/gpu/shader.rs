// SPDX-License-Identifier: MPL-2.0

//! Shader programs: their sources, their uniforms and the handle the pipeline holds.

use std::{
    borrow::Cow,
    collections::HashMap,
    fmt, io,
    path::{Path, PathBuf},
};

use super::{Device, ProgramId, UniformLocation, UniformValue};

/// Name of the program that fills the G-buffer.
pub const GEOMETRY_PASS: &str = "deferred.pass0";
/// Name of the program that lights the G-buffer.
pub const LIGHTING_PASS: &str = "deferred.pass1";
/// Name of the program that shows one G-buffer layer.
pub const DEBUG_VIEW: &str = "deferred.debug";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Vertex => "vertex",
            Self::Fragment => "fragment",
        })
    }
}

#[derive(Debug)]
pub enum ShaderError {
    /// A stage source could not be read.
    Read { path: PathBuf, source: io::Error },
    /// A stage failed to compile.
    Compile {
        program: String,
        stage: ShaderStage,
        log: String,
    },
    /// The stages could not be combined into a program.
    Link { program: String, log: String },
}

impl fmt::Display for ShaderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read { path, source } => {
                write!(f, "failed to read shader {}: {}", path.display(), source)
            }
            Self::Compile {
                program,
                stage,
                log,
            } => write!(f, "{stage} shader of '{program}' failed to compile:\n{log}"),
            Self::Link { program, log } => write!(f, "'{program}' failed to link:\n{log}"),
        }
    }
}

impl std::error::Error for ShaderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Read { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// The type of a uniform.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum UniformKind {
    Mat4,
    Vec3,
    Vec4,
    Float,
    Int,
}

impl UniformKind {
    /// The number of bytes the uniform occupies in a uniform block.
    ///
    /// Everything but matrices is padded to a full four-component vector, so shaders declare
    /// `vec3`, `f32` and `i32` uniforms as `vec4<f32>` or `vec4<i32>`.
    pub const fn size(self) -> usize {
        match self {
            Self::Mat4 => 64,
            Self::Vec3 | Self::Vec4 | Self::Float | Self::Int => 16,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UniformSlot {
    pub name: Cow<'static, str>,
    pub kind: UniformKind,
}

impl UniformSlot {
    pub const fn new(name: &'static str, kind: UniformKind) -> Self {
        Self {
            name: Cow::Borrowed(name),
            kind,
        }
    }
}

/// The uniforms of a program, in the order they are laid out in its uniform block.
///
/// Texture units are not part of the interface: a device binds whatever texture is on unit `i`
/// to texture binding `i` of every program.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ProgramInterface {
    pub uniforms: Vec<UniformSlot>,
}

impl ProgramInterface {
    pub fn new(uniforms: impl IntoIterator<Item = UniformSlot>) -> Self {
        Self {
            uniforms: uniforms.into_iter().collect(),
        }
    }

    pub fn find(&self, name: &str) -> Option<usize> {
        self.uniforms.iter().position(|slot| slot.name == name)
    }

    /// The byte offset of uniform `index` within the uniform block.
    pub fn offset(&self, index: usize) -> usize {
        self.uniforms[..index]
            .iter()
            .map(|slot| slot.kind.size())
            .sum()
    }

    pub fn block_size(&self) -> usize {
        self.offset(self.uniforms.len())
    }

    /// The interface of the [G-buffer program](GEOMETRY_PASS).
    pub fn geometry_pass() -> Self {
        use UniformKind::*;

        Self::new([
            UniformSlot::new("projectionMatrix", Mat4),
            UniformSlot::new("modelViewMatrix", Mat4),
            UniformSlot::new("modelMatrix", Mat4),
            UniformSlot::new("color", Vec3),
            UniformSlot::new("projectorData.position", Vec3),
            UniformSlot::new("projectorData.direction", Vec3),
            UniformSlot::new("projectorData.texture", Int),
        ])
    }

    /// The interface of the [lighting program](LIGHTING_PASS).
    pub fn lighting_pass() -> Self {
        use UniformKind::*;

        Self::new([
            UniformSlot::new("projectionMatrix", Mat4),
            UniformSlot::new("modelViewMatrix", Mat4),
            UniformSlot::new("viewMatrix", Mat4),
            UniformSlot::new("cameraProjectionMatrix", Mat4),
            UniformSlot::new("_diffuse", Int),
            UniformSlot::new("_position", Int),
            UniformSlot::new("_normals", Int),
            UniformSlot::new("projectorData.position", Vec3),
            UniformSlot::new("projectorData.direction", Vec3),
            UniformSlot::new("projectorData.texture", Int),
            UniformSlot::new("lights[0]", Vec3),
            UniformSlot::new("lights[1]", Vec3),
            UniformSlot::new("lights[2]", Vec3),
            UniformSlot::new("lightColors[0]", Vec3),
            UniformSlot::new("lightColors[1]", Vec3),
            UniformSlot::new("lightColors[2]", Vec3),
        ])
    }

    /// The interface of the [debug view program](DEBUG_VIEW).
    pub fn debug_view() -> Self {
        use UniformKind::*;

        Self::new([
            UniformSlot::new("projectionMatrix", Mat4),
            UniformSlot::new("modelViewMatrix", Mat4),
            UniformSlot::new("image", Int),
        ])
    }
}

/// The source of one shader stage.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StageSource {
    /// Where the code was read from, if it came from a file.
    pub path: Option<PathBuf>,
    /// WGSL code with a `main` entry point.
    pub code: Cow<'static, str>,
}

impl StageSource {
    pub const fn builtin(code: &'static str) -> Self {
        Self {
            path: None,
            code: Cow::Borrowed(code),
        }
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ShaderError> {
        let path = path.as_ref();
        let code = std::fs::read_to_string(path).map_err(|source| ShaderError::Read {
            path: path.to_owned(),
            source,
        })?;

        Ok(Self {
            path: Some(path.to_owned()),
            code: Cow::Owned(code),
        })
    }
}

/// Everything a device needs to build a program.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProgramSource {
    pub name: Cow<'static, str>,
    pub vertex: StageSource,
    pub fragment: StageSource,
    pub interface: ProgramInterface,
}

impl ProgramSource {
    /// Reads both stages from disk.
    pub fn from_files(
        name: impl Into<Cow<'static, str>>,
        vertex_path: impl AsRef<Path>,
        fragment_path: impl AsRef<Path>,
        interface: ProgramInterface,
    ) -> Result<Self, ShaderError> {
        Ok(Self {
            name: name.into(),
            vertex: StageSource::from_file(vertex_path)?,
            fragment: StageSource::from_file(fragment_path)?,
            interface,
        })
    }

    /// Reads the stages of the built-in program `name` from `<dir>/<file stem>.vert.wgsl` and
    /// `<dir>/<file stem>.frag.wgsl`, where the file stem is `pass0`, `pass1` or `debug`.
    ///
    /// Returns `None` if `name` is not a built-in program.
    pub fn builtin_from_dir(name: &str, dir: &Path) -> Option<Result<Self, ShaderError>> {
        let (name, stem, interface) = Self::builtin_parts(name)?;

        Some(Self::from_files(
            name,
            dir.join(format!("{stem}.vert.wgsl")),
            dir.join(format!("{stem}.frag.wgsl")),
            interface,
        ))
    }

    /// One of the programs compiled into the crate, by name.
    pub fn builtin(name: &str) -> Option<Self> {
        match name {
            GEOMETRY_PASS => Some(Self::geometry_pass()),
            LIGHTING_PASS => Some(Self::lighting_pass()),
            DEBUG_VIEW => Some(Self::debug_view()),
            _ => None,
        }
    }

    fn builtin_parts(name: &str) -> Option<(&'static str, &'static str, ProgramInterface)> {
        match name {
            GEOMETRY_PASS => Some((GEOMETRY_PASS, "pass0", ProgramInterface::geometry_pass())),
            LIGHTING_PASS => Some((LIGHTING_PASS, "pass1", ProgramInterface::lighting_pass())),
            DEBUG_VIEW => Some((DEBUG_VIEW, "debug", ProgramInterface::debug_view())),
            _ => None,
        }
    }

    pub fn geometry_pass() -> Self {
        Self {
            name: Cow::Borrowed(GEOMETRY_PASS),
            vertex: StageSource::builtin(include_str!("../shaders/pass0.vert.wgsl")),
            fragment: StageSource::builtin(include_str!("../shaders/pass0.frag.wgsl")),
            interface: ProgramInterface::geometry_pass(),
        }
    }

    pub fn lighting_pass() -> Self {
        Self {
            name: Cow::Borrowed(LIGHTING_PASS),
            vertex: StageSource::builtin(include_str!("../shaders/pass1.vert.wgsl")),
            fragment: StageSource::builtin(include_str!("../shaders/pass1.frag.wgsl")),
            interface: ProgramInterface::lighting_pass(),
        }
    }

    pub fn debug_view() -> Self {
        Self {
            name: Cow::Borrowed(DEBUG_VIEW),
            vertex: StageSource::builtin(include_str!("../shaders/debug.vert.wgsl")),
            fragment: StageSource::builtin(include_str!("../shaders/debug.frag.wgsl")),
            interface: ProgramInterface::debug_view(),
        }
    }
}

/// A program created on a device, with its uniform locations looked up on first use.
#[derive(Debug)]
pub struct Program {
    id: ProgramId,
    name: String,
    locations: HashMap<String, Option<UniformLocation>>,
}

impl Program {
    /// Builds `source` on `device`, logging the reason if that fails.
    pub fn new<D: Device + ?Sized>(
        device: &mut D,
        source: &ProgramSource,
    ) -> Result<Self, ShaderError> {
        let id = device.create_program(source).map_err(|e| {
            tracing::error!("Failed to create program '{}': {}", source.name, e);
            e
        })?;
        tracing::debug!("Created program '{}' as #{}", source.name, id.raw());

        Ok(Self {
            id,
            name: source.name.to_string(),
            locations: HashMap::new(),
        })
    }

    pub fn id(&self) -> ProgramId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Makes this the active program unless it already is.
    pub fn activate<D: Device + ?Sized>(&self, device: &mut D) {
        if device.active_program() != Some(self.id) {
            device.use_program(Some(self.id));
        }
    }

    /// Leaves the device without an active program.
    pub fn deactivate<D: Device + ?Sized>(&self, device: &mut D) {
        device.use_program(None);
    }

    /// Activates this program and sets the uniform `name`.
    ///
    /// Names the program does not have are ignored.
    pub fn set<D: Device + ?Sized>(
        &mut self,
        device: &mut D,
        name: &str,
        value: impl Into<UniformValue>,
    ) {
        self.activate(device);

        let location = match self.locations.get(name) {
            Some(location) => *location,
            None => {
                let location = device.uniform_location(self.id, name);
                if location.is_none() {
                    tracing::debug!("Program '{}' has no uniform '{}'", self.name, name);
                }
                self.locations.insert(name.to_owned(), location);

                location
            }
        };

        if let Some(location) = location {
            device.set_uniform(location, value.into());
        }
    }

    pub fn destroy<D: Device + ?Sized>(self, device: &mut D) {
        device.destroy_program(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::recorder::{Command, RecordingDevice};

    #[test]
    fn builtin_interfaces_fit_in_a_uniform_block() {
        for source in [
            ProgramSource::geometry_pass(),
            ProgramSource::lighting_pass(),
            ProgramSource::debug_view(),
        ] {
            assert!(source.interface.block_size() <= 512, "{}", source.name);
            assert!(source.vertex.code.contains("fn main"));
            assert!(source.fragment.code.contains("fn main"));
        }

        let interface = ProgramInterface::lighting_pass();
        assert_eq!(interface.offset(interface.find("_diffuse").unwrap()), 256);
        assert_eq!(interface.block_size(), 448);
    }

    #[test]
    fn builtin_stages_are_valid_wgsl() {
        use naga::valid::{Capabilities, ValidationFlags, Validator};

        for source in [
            ProgramSource::geometry_pass(),
            ProgramSource::lighting_pass(),
            ProgramSource::debug_view(),
        ] {
            let stages = [("vertex", &source.vertex.code), ("fragment", &source.fragment.code)];
            for (stage, code) in stages {
                let module = match naga::front::wgsl::parse_str(code) {
                    Ok(module) => module,
                    Err(e) => panic!("{} {stage}: {}", source.name, e.emit_to_string(code)),
                };
                if let Err(e) =
                    Validator::new(ValidationFlags::all(), Capabilities::empty()).validate(&module)
                {
                    panic!("{} {stage}: {e:?}", source.name);
                }
                assert!(
                    module.entry_points.iter().any(|entry| entry.name == "main"),
                    "{} {stage}",
                    source.name,
                );
            }
        }
    }

    #[test]
    fn missing_files_fail_to_read() {
        let error = ProgramSource::from_files(
            "missing",
            "does/not/exist.vert.wgsl",
            "does/not/exist.frag.wgsl",
            ProgramInterface::default(),
        )
        .unwrap_err();
        assert!(matches!(error, ShaderError::Read { .. }));
        assert!(error.to_string().contains("exist.vert.wgsl"));
    }

    #[test]
    fn builtin_programs_load_from_the_shader_directory() {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("src/shaders");
        let source = ProgramSource::builtin_from_dir(LIGHTING_PASS, &dir)
            .unwrap()
            .unwrap();
        assert_eq!(source, ProgramSource {
            vertex: StageSource {
                path: Some(dir.join("pass1.vert.wgsl")),
                ..source.vertex.clone()
            },
            fragment: StageSource {
                path: Some(dir.join("pass1.frag.wgsl")),
                ..source.fragment.clone()
            },
            ..ProgramSource::lighting_pass()
        });
        assert!(ProgramSource::builtin_from_dir("unknown", &dir).is_none());
    }

    #[test]
    fn locations_are_looked_up_once_and_activation_is_lazy() {
        let mut device = RecordingDevice::new(64, 64);
        let mut program = Program::new(&mut device, &ProgramSource::debug_view()).unwrap();

        program.set(&mut device, "image", 0);
        program.set(&mut device, "image", 1);
        program.set(&mut device, "nonexistent", 1);

        let uses = device
            .commands()
            .iter()
            .filter(|command| matches!(command, Command::UseProgram(Some(_))))
            .count();
        assert_eq!(uses, 1);
        assert_eq!(device.location_lookups(), 2);
        assert_eq!(
            device.uniform(program.id(), "image"),
            Some(UniformValue::Int(1)),
        );

        program.deactivate(&mut device);
        assert_eq!(device.active_program(), None);
    }
}
