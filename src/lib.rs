// SPDX-License-Identifier: MPL-2.0

//! A deferred-shading renderer.
//!
//! Scene geometry is rasterized once into a geometry buffer holding albedo, world position and
//! normal per pixel; a second pass lights every pixel from that buffer. See [`renderer`] for the
//! pipeline and [`gpu`] for the devices it runs on.
//!
//! # Coordinate Spaces
//!
//! There are four coordinate spaces: **mesh** space, **world** space, **camera** space, and
//! **clip** space. Points are row vectors and are transformed as `v * M`, so a matrix that first
//! applies `A` and then `B` is `A * B`, and translations live in the last row.
//!
//! ## Mesh Space
//!
//! Each mesh has an associated mesh space where the origin is considered the 'center' of the mesh.
//! Meshes are rotated about this origin.
//!
//! Mesh space is unbounded in all axes.
//!
//! ## World Space
//!
//! Each drawable is moved into world space by its world matrix, built from its
//! [placement](transform::Placement): heading about Y, then pitch about X, then roll about Z,
//! then the translation to its position.
//!
//! World space is unbounded in all axes. +Y is up.
//!
//! ## Camera Space
//!
//! Once all objects are in world space, we transform *the world itself* such that the camera sits
//! at the origin looking down -Z. This is the camera's [view matrix](Camera::view_matrix).
//!
//! Camera space is unbounded in all axes.
//!
//! ## Clip Space
//!
//! Clip space is produced by the camera's projection, which bounds the visible volume to `[-1, 1]`
//! in all axes after the perspective divide. Depth follows the same convention: `-1` at the near
//! plane and `1` at the far plane.

pub mod camera;
pub mod diagnostics;
pub mod gpu;
pub mod linear;
pub mod mesh;
pub mod renderer;
pub mod transform;

pub use camera::Camera;
pub use linear::{Matrix4, Vector3};
pub use mesh::{DrawMode, Mesh, MeshVertex};
pub use renderer::{DeferredRenderer, Error, RendererConfig};

/// The integral type for indexing a mesh's [vertices](Mesh::vertices).
pub type MeshVertexIndex = u32;

/// A set of objects and a camera that observes them.
///
/// A scene may be rendered with [`DeferredRenderer::frame`].
#[derive(Clone, Debug)]
pub struct Scene {
    /// The camera through which objects are observed.
    pub camera: Camera,
    /// The objects.
    pub objects: Vec<Object>,
}

/// A drawable: a mesh uploaded to the device, placed in the world and painted one color.
#[derive(Clone, Debug)]
pub struct Object {
    pub placement: transform::Placement,
    /// The albedo, in RGB.
    pub color: Vector3,
    pub mesh: gpu::MeshId,
    pub mode: DrawMode,
}
