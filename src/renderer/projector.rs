// SPDX-License-Identifier: MPL-2.0

//! An image projected straight down onto the scene.
//!
//! The image tiles the XZ plane, turned by the heading of the projector's attitude. Both passes
//! project it: the geometry pass tints the albedo and the lighting pass tints the light.

use crate::{
    gpu::{Device, GpuError, Program, TextureDescriptor, TextureFormat, TextureId},
    Vector3,
};

/// The texture unit the geometry pass samples the projector from.
pub const GEOMETRY_UNIT: usize = 0;

/// The texture unit the lighting pass samples the projector from; units 0 to 2 hold the
/// G-buffer.
pub const LIGHTING_UNIT: usize = 3;

impl Default for ProjectorConfig {
    fn default() -> Self {
        Self {
            position: Vector3::new(0., 30., 0.),
            geometry_attitude: Vector3::new(-1., -1., 0.),
            lighting_attitude: Vector3::new(-2., -1., 0.),
        }
    }
}

/// Where the projector hangs in each pass.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ProjectorConfig {
    pub position: Vector3,
    /// Heading, pitch and roll in degrees, as seen by the geometry pass.
    pub geometry_attitude: Vector3,
    /// Heading, pitch and roll in degrees, as seen by the lighting pass.
    pub lighting_attitude: Vector3,
}

/// A projector and its image on the device.
#[derive(Debug)]
pub struct Projector {
    config: ProjectorConfig,
    texture: TextureId,
}

impl Projector {
    /// The width and height of the checker image.
    pub const SIZE: u32 = 64;

    /// The width of one checker square, in texels.
    const SQUARE: usize = 8;

    pub fn new<D: Device + ?Sized>(
        device: &mut D,
        config: ProjectorConfig,
    ) -> Result<Self, GpuError> {
        let texture = device.create_texture(&TextureDescriptor {
            label: "Projector checker",
            width: Self::SIZE,
            height: Self::SIZE,
            format: TextureFormat::Rgba8,
            samples: 1,
        })?;
        if let Err(e) = device.write_texture(texture, &Self::checker_texels()) {
            device.destroy_texture(texture);
            return Err(e);
        }

        Ok(Self { config, texture })
    }

    /// Opaque magenta and transparent black squares.
    pub fn checker_texels() -> Vec<u8> {
        let size = Self::SIZE as usize;

        (0..size)
            .flat_map(|row| (0..size).map(move |column| (row, column)))
            .flat_map(|(row, column)| {
                let lit = (row / Self::SQUARE + column / Self::SQUARE) % 2 == 0;
                let c = if lit { 255 } else { 0 };

                [c, 0, c, c]
            })
            .collect()
    }

    pub fn config(&self) -> &ProjectorConfig {
        &self.config
    }

    pub fn texture(&self) -> TextureId {
        self.texture
    }

    /// Pushes the projector uniforms of the active pass and binds the image to `unit`.
    pub fn apply<D: Device + ?Sized>(
        &self,
        device: &mut D,
        program: &mut Program,
        unit: usize,
        attitude: Vector3,
    ) {
        program.set(device, "projectorData.position", self.config.position);
        program.set(device, "projectorData.direction", attitude);
        program.set(device, "projectorData.texture", unit as i32);
        device.bind_texture(unit, Some(self.texture));
    }

    pub fn destroy<D: Device + ?Sized>(self, device: &mut D) {
        device.destroy_texture(self.texture);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::{recorder::RecordingDevice, ProgramSource, UniformValue};

    #[test]
    fn checker_alternates_every_eight_texels() {
        let texels = Projector::checker_texels();
        assert_eq!(texels.len(), 64 * 64 * 4);

        let texel = |x: usize, y: usize| &texels[(y * 64 + x) * 4..][..4];
        assert_eq!(texel(0, 0), [255, 0, 255, 255]);
        assert_eq!(texel(7, 7), [255, 0, 255, 255]);
        assert_eq!(texel(8, 0), [0, 0, 0, 0]);
        assert_eq!(texel(0, 8), [0, 0, 0, 0]);
        assert_eq!(texel(8, 8), [255, 0, 255, 255]);
    }

    #[test]
    fn applying_binds_the_image() {
        let mut device = RecordingDevice::new(64, 64);
        let projector = Projector::new(&mut device, ProjectorConfig::default()).unwrap();
        let mut program = Program::new(&mut device, &ProgramSource::lighting_pass()).unwrap();

        let attitude = projector.config().lighting_attitude;
        projector.apply(&mut device, &mut program, LIGHTING_UNIT, attitude);

        assert_eq!(device.bound_texture(LIGHTING_UNIT), Some(projector.texture()));
        assert_eq!(
            device.uniform(program.id(), "projectorData.texture"),
            Some(UniformValue::Int(3)),
        );
        assert_eq!(
            device.uniform(program.id(), "projectorData.direction"),
            Some(UniformValue::Vec3(Vector3::new(-2., -1., 0.))),
        );

        projector.destroy(&mut device);
        program.destroy(&mut device);
        assert_eq!(device.live_resources(), 0);
    }
}
