// SPDX-License-Identifier: MPL-2.0

//! The deferred-shading pipeline.
//!
//! A frame is rendered in two passes. The geometry pass rasterizes every drawable into the
//! [G-buffer](GBuffer), storing albedo, world position and normal per pixel. The lighting pass
//! then draws a single full-screen quad that reads those layers back and shades each pixel with
//! a fixed set of point lights.
//!
//! [`DeferredRenderer`] enforces the order of the steps of a frame:
//!
//! ```text
//! Idle --attach--> GBufferAttached --detach--> GBufferDetached --render--> Lit --end_frame--> Idle
//!                   (draw, draw_scene)                                     (debug)
//! ```
//!
//! A step taken out of order fails with [`Error::InvalidState`] before touching the device.

use std::{fmt, panic::Location, path::PathBuf};

use crate::{
    camera::Camera,
    diagnostics::{self, Diagnostics},
    gpu::{
        shader::{DEBUG_VIEW, GEOMETRY_PASS, LIGHTING_PASS},
        Device, GpuError, MeshId, Program, ProgramId, ProgramSource, ShaderError, TargetStatus,
        TextureId,
    },
    mesh::DrawMode,
    Matrix4, Mesh, Object, Scene, Vector3,
};

pub mod gbuffer;
pub mod projector;

pub use gbuffer::{GBuffer, Layer};
pub use projector::{Projector, ProjectorConfig};

#[derive(Debug)]
pub enum Error {
    NoCompatibleAdapterFound,
    NoCompatibleDeviceFound,
    /// The G-buffer cannot be rendered into.
    IncompleteTarget(TargetStatus),
    Shader(ShaderError),
    /// The device refused to create a resource.
    Gpu(GpuError),
    /// A step of the frame was taken out of order.
    InvalidState {
        operation: &'static str,
        state: State,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoCompatibleAdapterFound => f.write_str("no compatible graphics adapter found"),
            Self::NoCompatibleDeviceFound => f.write_str("no compatible graphics device found"),
            Self::IncompleteTarget(status) => write!(f, "G-buffer is incomplete: {status}"),
            Self::Shader(e) => write!(f, "{e}"),
            Self::Gpu(e) => write!(f, "{e}"),
            Self::InvalidState { operation, state } => {
                write!(f, "cannot {operation} while {state:?}")
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Shader(e) => Some(e),
            Self::Gpu(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ShaderError> for Error {
    fn from(e: ShaderError) -> Self {
        Self::Shader(e)
    }
}

impl From<GpuError> for Error {
    fn from(e: GpuError) -> Self {
        Self::Gpu(e)
    }
}

/// Where a [`DeferredRenderer`] is within its frame.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum State {
    Idle,
    GBufferAttached,
    GBufferDetached,
    Lit,
}

/// A point light.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Light {
    pub position: Vector3,
    pub color: Vector3,
}

impl Light {
    pub const fn new(position: Vector3, color: Vector3) -> Self {
        Self { position, color }
    }
}

/// The number of lights the lighting pass shades with.
pub const LIGHT_COUNT: usize = 3;

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            width: 1024,
            height: 768,
            samples: 8,
            clear_color: Vector3::new(18., 230., 223.) * (1. / 255.),
            lights: [
                Light::new(Vector3::new(10., 30., 0.), Vector3::new(1., 1., 0.)),
                Light::new(Vector3::new(-40., 30., 45.), Vector3::new(1., 0., 1.)),
                Light::new(Vector3::new(60., 25., -40.), Vector3::new(0., 1., 1.)),
            ],
            projector: Some(ProjectorConfig::default()),
            shader_dir: None,
        }
    }
}

/// Settings fixed when a [`DeferredRenderer`] is created.
#[derive(Clone, Debug, PartialEq)]
pub struct RendererConfig {
    /// The size of the G-buffer; normally the output size of the device.
    pub width: u32,
    pub height: u32,
    /// The requested sample count of the G-buffer. The device may support fewer.
    pub samples: u32,
    /// The background, in RGB.
    pub clear_color: Vector3,
    pub lights: [Light; LIGHT_COUNT],
    /// `None` disables the projected image.
    pub projector: Option<ProjectorConfig>,
    /// Loads the programs from `pass0`, `pass1` and `debug` WGSL files in this directory
    /// instead of the copies built into the crate.
    pub shader_dir: Option<PathBuf>,
}

impl RendererConfig {
    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_samples(mut self, samples: u32) -> Self {
        self.samples = samples;
        self
    }

    pub fn with_clear_color(mut self, clear_color: Vector3) -> Self {
        self.clear_color = clear_color;
        self
    }

    pub fn with_lights(mut self, lights: [Light; LIGHT_COUNT]) -> Self {
        self.lights = lights;
        self
    }

    pub fn with_projector(mut self, projector: Option<ProjectorConfig>) -> Self {
        self.projector = projector;
        self
    }

    pub fn with_shader_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.shader_dir = Some(dir.into());
        self
    }
}

/// Resources made during setup, released again if a later step fails.
#[derive(Default)]
struct Created {
    textures: Vec<TextureId>,
    meshes: Vec<MeshId>,
    programs: Vec<ProgramId>,
    gbuffer: Option<GBuffer>,
}

impl Created {
    fn release<D: Device + ?Sized>(self, device: &mut D) {
        for program in self.programs {
            device.destroy_program(program);
        }
        for mesh in self.meshes {
            device.destroy_mesh(mesh);
        }
        for texture in self.textures {
            device.destroy_texture(texture);
        }
        if let Some(gbuffer) = self.gbuffer {
            gbuffer.destroy(device);
        }
    }
}

struct Parts {
    gbuffer: GBuffer,
    geometry_pass: Program,
    lighting_pass: Program,
    debug_view: Program,
    screen_quad: MeshId,
    debug_quad: MeshId,
    projector: Option<Projector>,
}

/// Renders scenes with deferred shading on a [`Device`] it owns.
pub struct DeferredRenderer<D: Device> {
    device: D,
    config: RendererConfig,
    gbuffer: GBuffer,
    geometry_pass: Program,
    lighting_pass: Program,
    debug_view: Program,
    screen_quad: MeshId,
    debug_quad: MeshId,
    projector: Option<Projector>,
    diagnostics: Box<dyn Diagnostics>,
    state: State,
    frames: u64,
}

impl<D: Device> DeferredRenderer<D> {
    /// Sets up the G-buffer, the programs and the quads.
    ///
    /// The requested sample count is lowered to what the device supports.
    pub fn new(mut device: D, config: RendererConfig) -> Result<Self, Error> {
        let mut created = Created::default();
        let parts = match Self::setup(&mut device, &config, &mut created) {
            Ok(parts) => parts,
            Err(e) => {
                tracing::error!("Failed to set up the deferred renderer: {}", e);
                created.release(&mut device);

                return Err(e);
            }
        };
        tracing::info!(
            "Deferred renderer ready: {}x{} G-buffer, {} sample(s)",
            config.width,
            config.height,
            parts.gbuffer.samples(),
        );

        Ok(Self {
            device,
            config,
            gbuffer: parts.gbuffer,
            geometry_pass: parts.geometry_pass,
            lighting_pass: parts.lighting_pass,
            debug_view: parts.debug_view,
            screen_quad: parts.screen_quad,
            debug_quad: parts.debug_quad,
            projector: parts.projector,
            diagnostics: diagnostics::default_diagnostics(),
            state: State::Idle,
            frames: 0,
        })
    }

    fn setup(device: &mut D, config: &RendererConfig, created: &mut Created) -> Result<Parts, Error> {
        let max_samples = device.capabilities().max_samples.max(1);
        let samples = config.samples.clamp(1, max_samples);
        if samples != config.samples {
            tracing::warn!(
                "{} samples requested; the device supports up to {}",
                config.samples,
                max_samples,
            );
        }

        let gbuffer = GBuffer::new(device, (config.width, config.height), samples)?;
        created.gbuffer = Some(gbuffer.clone());

        let mut program = |name: &str| -> Result<Program, Error> {
            let source = match &config.shader_dir {
                Some(dir) => ProgramSource::builtin_from_dir(name, dir).transpose()?,
                None => ProgramSource::builtin(name),
            };
            let source = source.ok_or_else(|| ShaderError::Link {
                program: name.to_owned(),
                log: "not a built-in program".to_owned(),
            })?;
            let program = Program::new(device, &source)?;
            created.programs.push(program.id());

            Ok(program)
        };
        let geometry_pass = program(GEOMETRY_PASS)?;
        let lighting_pass = program(LIGHTING_PASS)?;
        let debug_view = program(DEBUG_VIEW)?;

        let screen_quad = device.create_mesh(&Mesh::screen_quad())?;
        created.meshes.push(screen_quad);
        let debug_quad = device.create_mesh(&Mesh::debug_quad())?;
        created.meshes.push(debug_quad);

        let projector = match config.projector {
            Some(projector) => {
                let projector = Projector::new(device, projector)?;
                created.textures.push(projector.texture());

                Some(projector)
            }
            None => None,
        };

        Ok(Parts {
            gbuffer,
            geometry_pass,
            lighting_pass,
            debug_view,
            screen_quad,
            debug_quad,
            projector,
        })
    }

    /// Replaces how device errors are checked at the end of each frame.
    pub fn with_diagnostics(mut self, diagnostics: Box<dyn Diagnostics>) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    pub fn gbuffer(&self) -> &GBuffer {
        &self.gbuffer
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// The number of frames presented so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Uploads a mesh for drawables to refer to.
    pub fn upload_mesh(&mut self, mesh: &Mesh) -> Result<MeshId, Error> {
        self.device.create_mesh(mesh).map_err(|e| {
            tracing::error!("Failed to upload mesh: {}", e);
            Error::Gpu(e)
        })
    }

    pub fn destroy_mesh(&mut self, mesh: MeshId) {
        self.device.destroy_mesh(mesh);
    }

    fn expect_state(&self, operation: &'static str, expected: State) -> Result<(), Error> {
        if self.state == expected {
            Ok(())
        } else {
            Err(Error::InvalidState {
                operation,
                state: self.state,
            })
        }
    }

    /// Starts the geometry pass: clears the G-buffer and directs drawing into it.
    pub fn attach(&mut self) -> Result<(), Error> {
        self.expect_state("attach", State::Idle)?;

        let device = &mut self.device;
        device.bind_render_target(Some(self.gbuffer.target()));
        // Alpha is coverage; the lighting pass passes uncovered pixels through.
        let [r, g, b] = self.config.clear_color.to_array();
        device.set_clear_color([r, g, b, 0.]);
        device.clear();
        device.set_depth_test(true);
        device.set_draw_buffers(Layer::ALL.len());

        self.geometry_pass.activate(device);
        self.geometry_pass
            .set(device, "projectorData.texture", projector::GEOMETRY_UNIT as i32);
        if let Some(projector) = &self.projector {
            let attitude = projector.config().geometry_attitude;
            projector.apply(device, &mut self.geometry_pass, projector::GEOMETRY_UNIT, attitude);
        }

        self.state = State::GBufferAttached;

        Ok(())
    }

    /// Draws one drawable into the G-buffer.
    pub fn draw(
        &mut self,
        object: &Object,
        projection: &Matrix4,
        view: &Matrix4,
    ) -> Result<(), Error> {
        self.expect_state("draw", State::GBufferAttached)?;

        let model = object.placement.world_matrix();
        let model_view = model * *view;

        let device = &mut self.device;
        let program = &mut self.geometry_pass;
        program.set(device, "projectionMatrix", *projection);
        program.set(device, "modelViewMatrix", model_view);
        program.set(device, "modelMatrix", model);
        program.set(device, "color", object.color);
        device.draw(object.mesh, object.mode);

        Ok(())
    }

    /// Draws every object of `scene` as seen by its camera.
    pub fn draw_scene(&mut self, scene: &Scene) -> Result<(), Error> {
        let projection = scene.camera.projection_matrix();
        let view = scene.camera.view_matrix();
        for object in &scene.objects {
            self.draw(object, &projection, &view)?;
        }
        tracing::debug!("Drew {} object(s) into the G-buffer", scene.objects.len());

        Ok(())
    }

    /// Ends the geometry pass and restores the default destination.
    pub fn detach(&mut self) -> Result<(), Error> {
        self.expect_state("detach", State::GBufferAttached)?;

        self.device.bind_texture(projector::GEOMETRY_UNIT, None);
        self.geometry_pass.deactivate(&mut self.device);
        self.device.bind_render_target(None);

        self.state = State::GBufferDetached;

        Ok(())
    }

    /// Runs the lighting pass into the default destination.
    pub fn render(&mut self, camera: &Camera) -> Result<(), Error> {
        self.expect_state("render", State::GBufferDetached)?;

        let device = &mut self.device;
        device.bind_render_target(None);
        let [r, g, b] = self.config.clear_color.to_array();
        device.set_clear_color([r, g, b, 1.]);
        device.clear();
        device.set_depth_test(false);

        let program = &mut self.lighting_pass;
        program.activate(device);
        for (unit, (name, layer)) in ["_diffuse", "_position", "_normals"]
            .into_iter()
            .zip(Layer::ALL)
            .enumerate()
        {
            program.set(device, name, unit as i32);
            device.bind_texture(unit, Some(self.gbuffer.texture(layer)));
        }

        program.set(device, "projectorData.texture", projector::LIGHTING_UNIT as i32);
        if let Some(projector) = &self.projector {
            let attitude = projector.config().lighting_attitude;
            projector.apply(device, program, projector::LIGHTING_UNIT, attitude);
        }

        program.set(device, "projectionMatrix", screen_projection());
        program.set(device, "modelViewMatrix", Matrix4::identity());
        program.set(device, "viewMatrix", camera.view_matrix());
        program.set(device, "cameraProjectionMatrix", camera.projection_matrix());
        for (i, light) in self.config.lights.iter().enumerate() {
            program.set(device, &format!("lights[{i}]"), light.position);
            program.set(device, &format!("lightColors[{i}]"), light.color);
        }

        device.draw(self.screen_quad, DrawMode::SOLID);
        program.deactivate(device);
        for unit in (0..=projector::LIGHTING_UNIT).rev() {
            device.bind_texture(unit, None);
        }

        self.state = State::Lit;

        Ok(())
    }

    /// Shows the G-buffer layers in small quads stacked down the right side of the output.
    pub fn debug(&mut self) -> Result<(), Error> {
        self.expect_state("debug", State::Lit)?;

        let device = &mut self.device;
        let program = &mut self.debug_view;
        program.activate(device);
        program.set(device, "projectionMatrix", screen_projection());
        program.set(device, "image", 0);
        for (i, layer) in Layer::ALL.into_iter().enumerate() {
            let mut model_view = Matrix4::identity();
            model_view.translate_xyz(0., -0.7 * i as f32, 0.);
            program.set(device, "modelViewMatrix", model_view);

            device.bind_texture(0, Some(self.gbuffer.texture(layer)));
            device.draw(self.debug_quad, DrawMode::SOLID);
        }
        device.bind_texture(0, None);
        program.deactivate(device);

        Ok(())
    }

    /// Checks the device for errors and presents the frame.
    #[track_caller]
    pub fn end_frame(&mut self) -> Result<(), Error> {
        self.expect_state("end the frame", State::Lit)?;

        self.diagnostics.check(&mut self.device, Location::caller());
        self.device.present();
        self.frames += 1;
        tracing::trace!("Presented frame {}", self.frames);

        self.state = State::Idle;

        Ok(())
    }

    /// Renders and presents `scene`, optionally with the G-buffer debug view.
    #[track_caller]
    pub fn frame(&mut self, scene: &Scene, debug: bool) -> Result<(), Error> {
        self.attach()?;
        self.draw_scene(scene)?;
        self.detach()?;
        self.render(&scene.camera)?;
        if debug {
            self.debug()?;
        }

        self.end_frame()
    }
}

impl<D: Device> Drop for DeferredRenderer<D> {
    fn drop(&mut self) {
        let device = &mut self.device;
        for program in [&self.geometry_pass, &self.lighting_pass, &self.debug_view] {
            device.destroy_program(program.id());
        }
        device.destroy_mesh(self.screen_quad);
        device.destroy_mesh(self.debug_quad);
        if let Some(projector) = self.projector.take() {
            projector.destroy(device);
        }
        self.gbuffer.destroy(device);
    }
}

/// Maps the `[-1, 1]` square of the quads onto the whole output.
fn screen_projection() -> Matrix4 {
    Matrix4::ortho(-1., 1., -1., 1., -1000., 1000.)
}
