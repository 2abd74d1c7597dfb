// SPDX-License-Identifier: MPL-2.0

//! The geometry buffer: the offscreen destination of the geometry pass.

use super::Error;
use crate::gpu::{
    Device, RenderTargetDescriptor, RenderTargetId, TargetStatus, TextureDescriptor,
    TextureFormat, TextureId,
};

/// A color layer of the [`GBuffer`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Layer {
    /// Albedo, with coverage in alpha.
    Diffuse,
    /// World-space position.
    Position,
    /// World-space normal.
    Normals,
}

impl Layer {
    /// The layers in attachment order.
    pub const ALL: [Self; 3] = [Self::Diffuse, Self::Position, Self::Normals];

    pub fn format(self) -> TextureFormat {
        match self {
            Self::Diffuse => TextureFormat::Rgba8,
            Self::Position => TextureFormat::Rgba32F,
            Self::Normals => TextureFormat::Rgba16F,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Diffuse => "G-buffer diffuse",
            Self::Position => "G-buffer position",
            Self::Normals => "G-buffer normals",
        }
    }
}

/// Three color layers and a depth buffer of the same size and sample count.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct GBuffer {
    target: RenderTargetId,
    layers: [TextureId; 3],
    depth: TextureId,
    size: (u32, u32),
    samples: u32,
}

impl GBuffer {
    /// Allocates the layers and checks that the device can render into them.
    ///
    /// On failure, nothing allocated here is left behind.
    pub fn new<D: Device + ?Sized>(
        device: &mut D,
        (width, height): (u32, u32),
        samples: u32,
    ) -> Result<Self, Error> {
        let descriptors = Layer::ALL
            .map(|layer| (layer.label(), layer.format()))
            .into_iter()
            .chain([("G-buffer depth", TextureFormat::Depth24)]);

        let mut textures = Vec::with_capacity(4);
        for (label, format) in descriptors {
            let descriptor = TextureDescriptor {
                label,
                width,
                height,
                format,
                samples,
            };
            match device.create_texture(&descriptor) {
                Ok(id) => textures.push(id),
                Err(e) => {
                    tracing::error!("Failed to create {}: {}", label, e);
                    Self::release_textures(device, &textures);

                    return Err(Error::Gpu(e));
                }
            }
        }
        let (layers, depth) = ([textures[0], textures[1], textures[2]], textures[3]);

        let target = device.create_render_target(&RenderTargetDescriptor {
            label: "G-buffer",
            color: layers.to_vec(),
            depth: Some(depth),
        });
        match device.render_target_status(target) {
            TargetStatus::Complete => {}
            status => {
                tracing::error!("G-buffer is incomplete: {}", status);
                device.destroy_render_target(target);
                Self::release_textures(device, &textures);

                return Err(Error::IncompleteTarget(status));
            }
        }
        tracing::debug!("Created {}x{} G-buffer with {} sample(s)", width, height, samples);

        Ok(Self {
            target,
            layers,
            depth,
            size: (width, height),
            samples,
        })
    }

    fn release_textures<D: Device + ?Sized>(device: &mut D, textures: &[TextureId]) {
        for &texture in textures {
            device.destroy_texture(texture);
        }
    }

    pub fn target(&self) -> RenderTargetId {
        self.target
    }

    pub fn texture(&self, layer: Layer) -> TextureId {
        self.layers[layer as usize]
    }

    pub fn depth(&self) -> TextureId {
        self.depth
    }

    pub fn size(&self) -> (u32, u32) {
        self.size
    }

    pub fn samples(&self) -> u32 {
        self.samples
    }

    /// Whether `texture` is one of the attachments.
    pub fn contains(&self, texture: TextureId) -> bool {
        self.layers.contains(&texture) || self.depth == texture
    }

    pub fn destroy<D: Device + ?Sized>(&self, device: &mut D) {
        device.destroy_render_target(self.target);
        Self::release_textures(device, &self.layers);
        device.destroy_texture(self.depth);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::recorder::RecordingDevice;

    #[test]
    fn layers_have_their_formats() {
        let mut device = RecordingDevice::new(64, 64);
        let gbuffer = GBuffer::new(&mut device, (64, 32), 2).unwrap();

        for layer in Layer::ALL {
            let descriptor = device.texture_descriptor(gbuffer.texture(layer)).unwrap();
            assert_eq!(descriptor.format, layer.format());
            assert_eq!((descriptor.width, descriptor.height), (64, 32));
            assert_eq!(descriptor.samples, 2);
        }
        let depth = device.texture_descriptor(gbuffer.depth()).unwrap();
        assert_eq!(depth.format, TextureFormat::Depth24);
        assert_eq!(device.live_resources(), 5);

        gbuffer.destroy(&mut device);
        assert_eq!(device.live_resources(), 0);
    }

    #[test]
    fn incomplete_targets_leave_nothing_behind() {
        let mut device = RecordingDevice::new(64, 64).with_incomplete_targets();
        let error = GBuffer::new(&mut device, (64, 64), 1).unwrap_err();

        assert!(matches!(
            error,
            Error::IncompleteTarget(TargetStatus::IncompleteAttachment),
        ));
        assert_eq!(device.live_resources(), 0);
    }

    #[test]
    fn zero_sized_buffers_fail_to_allocate() {
        let mut device = RecordingDevice::new(64, 64);
        assert!(matches!(
            GBuffer::new(&mut device, (0, 64), 1),
            Err(Error::Gpu(_)),
        ));
        assert_eq!(device.live_resources(), 0);
    }
}
