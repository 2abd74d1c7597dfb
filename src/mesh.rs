// SPDX-License-Identifier: MPL-2.0

//! Vertex data and the built-in shapes.

use crate::{linear::Vector3, MeshVertexIndex};

/// A vertex within a [mesh](Mesh).
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[repr(C)]
pub struct MeshVertex {
    /// The location of this vertex in mesh space.
    pub point: Vector3,
    pub normal: Vector3,
    /// Texture coordinates, with `(0, 0)` at the top-left corner of an image.
    pub uv: [f32; 2],
}

unsafe impl bytemuck::Pod for MeshVertex {}
unsafe impl bytemuck::Zeroable for MeshVertex {}

impl MeshVertex {
    pub const fn new(point: Vector3, normal: Vector3, uv: [f32; 2]) -> Self {
        Self { point, normal, uv }
    }
}

/// How the indices of a [`Mesh`] are grouped into faces.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum Primitive {
    #[default]
    Triangles,
    /// Each group of four indices is a convex quadrilateral, split along its first diagonal.
    Quads,
}

impl Primitive {
    pub fn indices_per_face(self) -> usize {
        match self {
            Self::Triangles => 3,
            Self::Quads => 4,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum FillMode {
    #[default]
    Fill,
    /// Only the edges of each triangle are drawn.
    Line,
}

/// Which faces are rasterized. Faces wound counter-clockwise on screen are front faces.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum Faces {
    #[default]
    Front,
    Back,
    FrontAndBack,
}

impl Faces {
    pub fn accepts(self, front_facing: bool) -> bool {
        match self {
            Self::Front => front_facing,
            Self::Back => !front_facing,
            Self::FrontAndBack => true,
        }
    }
}

/// How a drawable is rasterized.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct DrawMode {
    pub fill: FillMode,
    pub faces: Faces,
}

impl DrawMode {
    /// Filled front faces; for closed shapes.
    pub const SOLID: Self = Self {
        fill: FillMode::Fill,
        faces: Faces::Front,
    };

    /// Filled faces seen from either side; for open surfaces.
    pub const TWO_SIDED: Self = Self {
        fill: FillMode::Fill,
        faces: Faces::FrontAndBack,
    };

    pub const WIREFRAME: Self = Self {
        fill: FillMode::Line,
        faces: Faces::FrontAndBack,
    };
}

/// Geometry in mesh space.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Mesh {
    /// The vertices that make up this mesh.
    pub vertices: Vec<MeshVertex>,
    /// Indices into [`Self::vertices`], grouped into faces according to
    /// [`Self::primitive`].
    pub indices: Vec<MeshVertexIndex>,
    pub primitive: Primitive,
}

impl Mesh {
    /// The indices of this mesh as a triangle list.
    ///
    /// Trailing indices that do not make up a whole face are dropped.
    pub fn triangle_indices(&self) -> Vec<MeshVertexIndex> {
        let per_face = self.primitive.indices_per_face();
        let faces = self.indices.chunks_exact(per_face);

        match self.primitive {
            Primitive::Triangles => faces.flatten().copied().collect(),
            Primitive::Quads => faces
                .flat_map(|quad| [quad[0], quad[1], quad[2], quad[0], quad[2], quad[3]])
                .collect(),
        }
    }

    pub fn triangle_count(&self) -> usize {
        let faces = self.indices.len() / self.primitive.indices_per_face();

        match self.primitive {
            Primitive::Triangles => faces,
            Primitive::Quads => 2 * faces,
        }
    }

    /// Whether every index refers to a vertex.
    pub fn is_valid(&self) -> bool {
        self.indices
            .iter()
            .all(|&index| (index as usize) < self.vertices.len())
    }

    /// The cube spanning `[-1, 1]` on every axis.
    ///
    /// Its eight corners are shared between faces, so each normal points away from the center
    /// through its corner.
    pub fn cube() -> Self {
        #[rustfmt::skip]
        let corners = [
            // Front.
            [-1., -1.,  1.],
            [ 1., -1.,  1.],
            [ 1.,  1.,  1.],
            [-1.,  1.,  1.],
            // Back.
            [-1., -1., -1.],
            [ 1., -1., -1.],
            [ 1.,  1., -1.],
            [-1.,  1., -1.],
        ];

        #[rustfmt::skip]
        let indices = vec![
            // Front.
            0, 1, 2,
            2, 3, 0,
            // Right.
            1, 5, 6,
            6, 2, 1,
            // Back.
            7, 6, 5,
            5, 4, 7,
            // Left.
            4, 0, 3,
            3, 7, 4,
            // Bottom.
            4, 5, 1,
            1, 0, 4,
            // Top.
            3, 2, 6,
            6, 7, 3,
        ];

        Self {
            vertices: corners
                .into_iter()
                .map(|[x, y, z]| {
                    let point = Vector3::new(x, y, z);

                    MeshVertex::new(point, point.normalized(), [(x + 1.) / 2., (1. - y) / 2.])
                })
                .collect(),
            indices,
            primitive: Primitive::Triangles,
        }
    }

    /// A flat square at `y = 0`, 200 units on a side, facing +Y.
    pub fn plane() -> Self {
        const HALF_EXTENT: f32 = 100.;
        let up = Vector3::new(0., 1., 0.);

        Self {
            vertices: [
                (HALF_EXTENT, HALF_EXTENT, [1., 1.]),
                (HALF_EXTENT, -HALF_EXTENT, [1., 0.]),
                (-HALF_EXTENT, -HALF_EXTENT, [0., 0.]),
                (-HALF_EXTENT, HALF_EXTENT, [0., 1.]),
            ]
            .into_iter()
            .map(|(x, z, uv)| MeshVertex::new(Vector3::new(x, 0., z), up, uv))
            .collect(),
            indices: vec![0, 1, 2, 3],
            primitive: Primitive::Quads,
        }
    }

    /// The square covering `[-1, 1]` in X and Y, facing +Z, with texture coordinates spanning
    /// the whole image.
    pub fn screen_quad() -> Self {
        Self::rectangle([-1., -1.], [1., 1.])
    }

    /// The quad the G-buffer debug view draws each layer on: the top-right corner of the
    /// screen.
    pub fn debug_quad() -> Self {
        Self::rectangle([0.3, 0.3], [1., 1.])
    }

    fn rectangle([left, bottom]: [f32; 2], [right, top]: [f32; 2]) -> Self {
        let forward = Vector3::new(0., 0., 1.);

        Self {
            vertices: vec![
                MeshVertex::new(Vector3::new(left, bottom, 0.), forward, [0., 1.]),
                MeshVertex::new(Vector3::new(right, bottom, 0.), forward, [1., 1.]),
                MeshVertex::new(Vector3::new(right, top, 0.), forward, [1., 0.]),
                MeshVertex::new(Vector3::new(left, top, 0.), forward, [0., 0.]),
            ],
            indices: vec![0, 1, 2, 3],
            primitive: Primitive::Quads,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertices_are_tightly_packed() {
        assert_eq!(std::mem::size_of::<MeshVertex>(), 32);
        let vertices = Mesh::cube().vertices;
        assert_eq!(bytemuck::cast_slice::<_, u8>(&vertices).len(), 8 * 32);
    }

    #[test]
    fn cube_has_twelve_triangles_on_eight_corners() {
        let cube = Mesh::cube();
        assert_eq!(cube.vertices.len(), 8);
        assert_eq!(cube.triangle_count(), 12);
        assert_eq!(cube.triangle_indices().len(), 36);
        assert!(cube.is_valid());

        for vertex in &cube.vertices {
            assert!((vertex.normal.length() - 1.).abs() < 1e-6);
            assert!(vertex.normal.dot(vertex.point) > 0.);
        }
    }

    #[test]
    fn quads_split_along_the_first_diagonal() {
        let plane = Mesh::plane();
        assert_eq!(plane.triangle_count(), 2);
        assert_eq!(plane.triangle_indices(), vec![0, 1, 2, 0, 2, 3]);
        assert!(plane.vertices.iter().all(|v| v.point.y == 0. && v.normal.y == 1.));
    }

    #[test]
    fn incomplete_faces_are_dropped() {
        let mesh = Mesh {
            vertices: Mesh::cube().vertices,
            indices: vec![0, 1, 2, 3, 4],
            primitive: Primitive::Triangles,
        };
        assert_eq!(mesh.triangle_indices(), vec![0, 1, 2]);
        assert_eq!(mesh.triangle_count(), 1);

        let mesh = Mesh {
            indices: vec![0, 1, 9],
            ..mesh
        };
        assert!(!mesh.is_valid());
    }

    #[test]
    fn screen_quad_is_counter_clockwise() {
        let quad = Mesh::screen_quad();
        let [a, b, c] = [0, 1, 2].map(|i| quad.vertices[quad.triangle_indices()[i] as usize].point);
        let signed_area = (b.x - a.x) * (c.y - a.y) - (c.x - a.x) * (b.y - a.y);
        assert!(signed_area > 0.);
    }

    #[test]
    fn faces_filter_by_orientation() {
        assert!(Faces::Front.accepts(true));
        assert!(!Faces::Front.accepts(false));
        assert!(Faces::Back.accepts(false));
        assert!(Faces::FrontAndBack.accepts(false));
        assert_eq!(DrawMode::default(), DrawMode::SOLID);
    }
}
