// SPDX-License-Identifier: MPL-2.0

//! The graphics device the deferred pipeline drives.
//!
//! [`Device`] models a GPU as a small state machine in the manner of a classic immediate-mode
//! API: there is one current render destination, one active program, a handful of texture
//! units and a sticky error flag. Three implementations are provided:
//!
//! - [`native::NativeDevice`] renders through *wgpu*, either to a window surface or to an
//!   offscreen image.
//! - [`soft::SoftDevice`] rasterizes on the CPU. It needs no GPU and is what the end-to-end
//!   tests render with.
//! - [`recorder::RecordingDevice`] only records the calls made on it.

use std::fmt;

use crate::{mesh::DrawMode, Matrix4, Mesh, Vector3};

pub mod native;
pub mod recorder;
pub mod shader;
pub mod soft;

pub use shader::{
    Program, ProgramInterface, ProgramSource, ShaderError, ShaderStage, StageSource, UniformKind,
    UniformSlot,
};

/// The number of texture units every device provides.
pub const TEXTURE_UNITS: usize = 4;

/// The maximum number of color attachments of a render target.
pub const MAX_COLOR_ATTACHMENTS: usize = 3;

macro_rules! define_ids {
    ($($(#[$meta:meta])* $name:ident;)*) => {
        $(
            $(#[$meta])*
            #[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
            pub struct $name(pub(crate) u32);

            impl $name {
                /// The raw handle, for logging.
                pub fn raw(self) -> u32 {
                    self.0
                }
            }
        )*
    };
}

define_ids! {
    /// A texture owned by a device.
    TextureId;
    /// An offscreen render destination made of textures.
    RenderTargetId;
    /// A linked vertex and fragment program.
    ProgramId;
    /// Vertex and index data uploaded to a device.
    MeshId;
}

/// Hands out increasing handles; shared by the device implementations.
#[derive(Debug, Default)]
pub(crate) struct IdAllocator(u32);

impl IdAllocator {
    pub(crate) fn next(&mut self) -> u32 {
        self.0 += 1;

        self.0
    }
}

/// Limits of a device.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Capabilities {
    /// The largest sample count a render target may be created with.
    pub max_samples: u32,
    pub texture_units: usize,
    pub max_color_attachments: usize,
}

/// Texel layouts a device supports.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum TextureFormat {
    /// 8-bit normalized RGBA.
    Rgba8,
    /// 16-bit float RGBA.
    Rgba16F,
    /// 32-bit float RGBA.
    Rgba32F,
    /// 24-bit normalized depth.
    Depth24,
}

impl TextureFormat {
    pub fn is_depth(self) -> bool {
        matches!(self, Self::Depth24)
    }

    /// The size of one texel as uploaded through [`Device::write_texture`].
    pub fn texel_size(self) -> usize {
        match self {
            Self::Rgba8 | Self::Depth24 => 4,
            Self::Rgba16F => 8,
            Self::Rgba32F => 16,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TextureDescriptor {
    pub label: &'static str,
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub samples: u32,
}

/// The layers of an offscreen render destination.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RenderTargetDescriptor {
    pub label: &'static str,
    /// Color attachments; attachment `i` receives fragment output `i`.
    pub color: Vec<TextureId>,
    pub depth: Option<TextureId>,
}

/// Whether a render target can be drawn to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TargetStatus {
    Complete,
    /// An attachment does not exist or has the wrong kind of format.
    IncompleteAttachment,
    /// There are no attachments.
    MissingAttachment,
    /// Attachments differ in size.
    IncompleteDimensions,
    /// Attachments differ in sample count.
    IncompleteMultisample,
    /// More color attachments than [`Capabilities::max_color_attachments`].
    Unsupported,
}

impl fmt::Display for TargetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let description = match self {
            Self::Complete => "complete",
            Self::IncompleteAttachment => "an attachment is missing or has the wrong format",
            Self::MissingAttachment => "no attachments",
            Self::IncompleteDimensions => "attachments differ in size",
            Self::IncompleteMultisample => "attachments differ in sample count",
            Self::Unsupported => "too many color attachments",
        };

        f.write_str(description)
    }
}

impl RenderTargetDescriptor {
    /// Checks the attachments against each other and against `capabilities`.
    ///
    /// `describe` looks textures up; unknown textures make the target incomplete.
    pub(crate) fn status(
        &self,
        capabilities: &Capabilities,
        describe: impl Fn(TextureId) -> Option<TextureDescriptor>,
    ) -> TargetStatus {
        if self.color.is_empty() && self.depth.is_none() {
            return TargetStatus::MissingAttachment;
        }
        if self.color.len() > capabilities.max_color_attachments {
            return TargetStatus::Unsupported;
        }

        let mut attachments = Vec::with_capacity(self.color.len() + 1);
        for &id in &self.color {
            match describe(id) {
                Some(desc) if !desc.format.is_depth() => attachments.push(desc),
                _ => return TargetStatus::IncompleteAttachment,
            }
        }
        if let Some(id) = self.depth {
            match describe(id) {
                Some(desc) if desc.format.is_depth() => attachments.push(desc),
                _ => return TargetStatus::IncompleteAttachment,
            }
        }

        let first = attachments[0];
        if attachments
            .iter()
            .any(|desc| (desc.width, desc.height) != (first.width, first.height))
        {
            return TargetStatus::IncompleteDimensions;
        }
        if attachments.iter().any(|desc| desc.samples != first.samples) {
            return TargetStatus::IncompleteMultisample;
        }

        TargetStatus::Complete
    }
}

/// The index of a uniform within its program's [interface](ProgramInterface).
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct UniformLocation {
    pub(crate) program: ProgramId,
    pub(crate) index: usize,
}

impl UniformLocation {
    pub fn index(self) -> usize {
        self.index
    }
}

/// A value for a uniform.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum UniformValue {
    Mat4(Matrix4),
    Vec3(Vector3),
    Vec4([f32; 4]),
    Float(f32),
    /// Also used for texture unit numbers.
    Int(i32),
}

impl UniformValue {
    pub fn kind(&self) -> UniformKind {
        match self {
            Self::Mat4(_) => UniformKind::Mat4,
            Self::Vec3(_) => UniformKind::Vec3,
            Self::Vec4(_) => UniformKind::Vec4,
            Self::Float(_) => UniformKind::Float,
            Self::Int(_) => UniformKind::Int,
        }
    }

    /// Writes this value in the padded layout of [`UniformKind::size`].
    pub(crate) fn write_to(&self, out: &mut [u8]) {
        let mut put = |words: &[[u8; 4]]| {
            for (chunk, word) in out.chunks_exact_mut(4).zip(words) {
                chunk.copy_from_slice(word);
            }
        };

        match self {
            Self::Mat4(m) => put(&m.as_slice().map(f32::to_le_bytes)),
            Self::Vec3(v) => put(&[v.x, v.y, v.z, 0.].map(f32::to_le_bytes)),
            Self::Vec4(v) => put(&v.map(f32::to_le_bytes)),
            Self::Float(x) => put(&[x.to_le_bytes()]),
            Self::Int(i) => put(&[i.to_le_bytes()]),
        }
    }
}

impl From<Matrix4> for UniformValue {
    fn from(m: Matrix4) -> Self {
        Self::Mat4(m)
    }
}

impl From<Vector3> for UniformValue {
    fn from(v: Vector3) -> Self {
        Self::Vec3(v)
    }
}

impl From<[f32; 4]> for UniformValue {
    fn from(v: [f32; 4]) -> Self {
        Self::Vec4(v)
    }
}

impl From<f32> for UniformValue {
    fn from(x: f32) -> Self {
        Self::Float(x)
    }
}

impl From<i32> for UniformValue {
    fn from(i: i32) -> Self {
        Self::Int(i)
    }
}

/// A GPU state error, reported through [`Device::take_error`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum GpuError {
    InvalidEnum(String),
    InvalidValue(String),
    InvalidOperation(String),
    /// Reported by the underlying graphics API.
    Backend(String),
}

impl fmt::Display for GpuError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidEnum(what) => write!(f, "invalid enum: {what}"),
            Self::InvalidValue(what) => write!(f, "invalid value: {what}"),
            Self::InvalidOperation(what) => write!(f, "invalid operation: {what}"),
            Self::Backend(what) => write!(f, "backend error: {what}"),
        }
    }
}

impl std::error::Error for GpuError {}

/// Keeps the first error raised until it is taken, like a sticky error flag.
#[derive(Debug, Default)]
pub(crate) struct ErrorFlag(Option<GpuError>);

impl ErrorFlag {
    pub(crate) fn raise(&mut self, error: GpuError) {
        tracing::debug!("GPU error raised: {}", error);
        if self.0.is_none() {
            self.0 = Some(error);
        }
    }

    pub(crate) fn take(&mut self) -> Option<GpuError> {
        self.0.take()
    }
}

/// The texels of a texture, converted to floats.
#[derive(Clone, Debug, PartialEq)]
pub struct Image {
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    /// Row-major, starting at the top-left corner.
    pub texels: Vec<[f32; 4]>,
}

impl Image {
    pub fn texel(&self, x: u32, y: u32) -> [f32; 4] {
        self.texels[(y * self.width + x) as usize]
    }

    pub fn center(&self) -> [f32; 4] {
        self.texel(self.width / 2, self.height / 2)
    }
}

/// A graphics device.
///
/// Resource handles are only meaningful to the device that created them. State calls with bad
/// arguments do nothing but raise an error, which the next [`take_error`](Self::take_error)
/// returns.
pub trait Device {
    fn capabilities(&self) -> Capabilities;

    /// The size of the default render destination.
    fn output_size(&self) -> (u32, u32);

    fn create_texture(&mut self, descriptor: &TextureDescriptor) -> Result<TextureId, GpuError>;

    /// Replaces the contents of a single-sampled color texture with tightly packed texels.
    fn write_texture(&mut self, texture: TextureId, texels: &[u8]) -> Result<(), GpuError>;

    fn destroy_texture(&mut self, texture: TextureId);

    fn create_render_target(&mut self, descriptor: &RenderTargetDescriptor) -> RenderTargetId;

    fn render_target_status(&self, target: RenderTargetId) -> TargetStatus;

    /// Destroys a render target; its attachments are left alone.
    fn destroy_render_target(&mut self, target: RenderTargetId);

    fn create_program(&mut self, source: &ProgramSource) -> Result<ProgramId, ShaderError>;

    /// Looks up a uniform by name, or `None` if the program has no such uniform.
    fn uniform_location(&self, program: ProgramId, name: &str) -> Option<UniformLocation>;

    fn destroy_program(&mut self, program: ProgramId);

    fn create_mesh(&mut self, mesh: &Mesh) -> Result<MeshId, GpuError>;

    fn destroy_mesh(&mut self, mesh: MeshId);

    /// Directs drawing to `target`, or to the default destination if `None`.
    fn bind_render_target(&mut self, target: Option<RenderTargetId>);

    /// Enables the first `count` color attachments of the bound destination for writing.
    fn set_draw_buffers(&mut self, count: usize);

    fn set_clear_color(&mut self, color: [f32; 4]);

    /// Clears every attachment of the bound destination to the clear color and depth 1.
    fn clear(&mut self);

    fn set_depth_test(&mut self, enabled: bool);

    fn use_program(&mut self, program: Option<ProgramId>);

    fn active_program(&self) -> Option<ProgramId>;

    /// Sets a uniform of the active program.
    fn set_uniform(&mut self, location: UniformLocation, value: UniformValue);

    fn bind_texture(&mut self, unit: usize, texture: Option<TextureId>);

    fn bound_texture(&self, unit: usize) -> Option<TextureId>;

    /// Draws `mesh` with the active program into the bound destination.
    fn draw(&mut self, mesh: MeshId, mode: DrawMode);

    /// Finishes the frame and shows the default destination.
    fn present(&mut self);

    /// Takes the first error raised since the previous call.
    fn take_error(&mut self) -> Option<GpuError>;

    /// Reads a texture back, or the default destination if `texture` is `None`.
    fn read_texture(&mut self, texture: Option<TextureId>) -> Result<Image, GpuError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capabilities() -> Capabilities {
        Capabilities {
            max_samples: 4,
            texture_units: TEXTURE_UNITS,
            max_color_attachments: MAX_COLOR_ATTACHMENTS,
        }
    }

    fn descriptor(format: TextureFormat, width: u32, samples: u32) -> TextureDescriptor {
        TextureDescriptor {
            label: "test",
            width,
            height: 16,
            format,
            samples,
        }
    }

    fn status_of(textures: &[TextureDescriptor], depth: Option<usize>) -> TargetStatus {
        let ids: Vec<_> = (0..textures.len() as u32).map(TextureId).collect();
        let descriptor = RenderTargetDescriptor {
            label: "test",
            color: ids
                .iter()
                .copied()
                .enumerate()
                .filter(|(i, _)| Some(*i) != depth)
                .map(|(_, id)| id)
                .collect(),
            depth: depth.map(|i| ids[i]),
        };

        descriptor.status(&capabilities(), |id| textures.get(id.0 as usize).copied())
    }

    #[test]
    fn matching_attachments_are_complete() {
        let textures = [
            descriptor(TextureFormat::Rgba8, 16, 1),
            descriptor(TextureFormat::Rgba32F, 16, 1),
            descriptor(TextureFormat::Depth24, 16, 1),
        ];
        assert_eq!(status_of(&textures, Some(2)), TargetStatus::Complete);
    }

    #[test]
    fn mismatched_attachments_are_incomplete() {
        let sizes = [
            descriptor(TextureFormat::Rgba8, 16, 1),
            descriptor(TextureFormat::Rgba8, 32, 1),
        ];
        assert_eq!(status_of(&sizes, None), TargetStatus::IncompleteDimensions);

        let samples = [
            descriptor(TextureFormat::Rgba8, 16, 4),
            descriptor(TextureFormat::Depth24, 16, 1),
        ];
        assert_eq!(status_of(&samples, Some(1)), TargetStatus::IncompleteMultisample);

        let depth_as_color = [descriptor(TextureFormat::Depth24, 16, 1)];
        assert_eq!(status_of(&depth_as_color, None), TargetStatus::IncompleteAttachment);

        assert_eq!(status_of(&[], None), TargetStatus::MissingAttachment);

        let too_many = [descriptor(TextureFormat::Rgba8, 16, 1); 4];
        assert_eq!(status_of(&too_many, None), TargetStatus::Unsupported);
    }

    #[test]
    fn uniform_values_are_padded_to_sixteen_bytes() {
        let mut out = [0xff; 16];
        UniformValue::from(Vector3::new(1., 2., 3.)).write_to(&mut out);
        let floats: Vec<f32> = out
            .chunks_exact(4)
            .map(|word| f32::from_le_bytes([word[0], word[1], word[2], word[3]]))
            .collect();
        assert_eq!(floats, [1., 2., 3., 0.]);

        let mut out = [0u8; 16];
        UniformValue::from(3).write_to(&mut out);
        assert_eq!(out[..4], 3i32.to_le_bytes());
        assert_eq!(out[4..], [0; 12]);
    }

    #[test]
    fn the_first_error_sticks() {
        let mut flag = ErrorFlag::default();
        flag.raise(GpuError::InvalidValue("first".into()));
        flag.raise(GpuError::InvalidOperation("second".into()));
        assert_eq!(flag.take(), Some(GpuError::InvalidValue("first".into())));
        assert_eq!(flag.take(), None);
    }
}
