// SPDX-License-Identifier: MPL-2.0

//! Triangle setup and scan conversion.
//!
//! Vertices arrive in clip space with the GL depth convention, `-w <= z <= w`. Triangles are
//! clipped against the near plane only; the other planes are handled by bounding the scan to
//! the viewport and discarding fragments whose depth falls outside `[0, 1]`.

use crate::mesh::{Faces, FillMode};

/// The number of interpolated values passed from the vertex to the fragment stage.
pub(super) const VARYINGS: usize = 8;

pub(super) type Varyings = [f32; VARYINGS];

/// The output of a vertex kernel.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(super) struct ClipVertex {
    pub(super) clip: [f32; 4],
    pub(super) varyings: Varyings,
}

impl ClipVertex {
    /// Distance to the near plane; negative behind it.
    fn near_distance(&self) -> f32 {
        self.clip[2] + self.clip[3]
    }

    fn lerp(&self, other: &Self, t: f32) -> Self {
        Self {
            clip: std::array::from_fn(|i| self.clip[i] + (other.clip[i] - self.clip[i]) * t),
            varyings: std::array::from_fn(|i| {
                self.varyings[i] + (other.varyings[i] - self.varyings[i]) * t
            }),
        }
    }
}

/// A pixel covered by a primitive.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(super) struct Fragment {
    pub(super) x: u32,
    pub(super) y: u32,
    /// Window depth in `[0, 1]`.
    pub(super) depth: f32,
    pub(super) varyings: Varyings,
}

/// A vertex after the perspective divide and the viewport transform.
#[derive(Clone, Copy, Debug)]
struct WindowVertex {
    x: f32,
    y: f32,
    depth: f32,
    /// `1 / w`, for perspective-correct interpolation.
    inv_w: f32,
    varyings: Varyings,
}

impl WindowVertex {
    fn new(vertex: &ClipVertex, width: u32, height: u32) -> Self {
        let [x, y, z, w] = vertex.clip;
        let inv_w = 1. / w;

        Self {
            x: (x * inv_w + 1.) * 0.5 * width as f32,
            // Row 0 is the top of the image.
            y: (1. - y * inv_w) * 0.5 * height as f32,
            depth: (z * inv_w + 1.) * 0.5,
            inv_w,
            varyings: vertex.varyings,
        }
    }
}

/// Interpolates `vertices` with barycentric `weights`, correcting for perspective.
fn interpolate<const N: usize>(vertices: &[WindowVertex; N], weights: [f32; N]) -> (f32, Varyings) {
    let mut depth = 0.;
    let mut inv_w = 0.;
    let mut varyings = [0.; VARYINGS];
    for (vertex, weight) in vertices.iter().zip(weights) {
        depth += weight * vertex.depth;
        inv_w += weight * vertex.inv_w;
        for (out, value) in varyings.iter_mut().zip(vertex.varyings) {
            *out += weight * vertex.inv_w * value;
        }
    }
    for value in &mut varyings {
        *value /= inv_w;
    }

    (depth, varyings)
}

/// Clips a triangle against the near plane, yielding zero to two triangles.
pub(super) fn clip_near(triangle: [ClipVertex; 3]) -> Vec<[ClipVertex; 3]> {
    let mut polygon = Vec::with_capacity(4);
    for i in 0..3 {
        let current = &triangle[i];
        let next = &triangle[(i + 1) % 3];
        let (d_current, d_next) = (current.near_distance(), next.near_distance());

        if d_current >= 0. {
            polygon.push(*current);
        }
        if (d_current >= 0.) != (d_next >= 0.) {
            polygon.push(current.lerp(next, d_current / (d_current - d_next)));
        }
    }

    (1..polygon.len().saturating_sub(1))
        .map(|i| [polygon[0], polygon[i], polygon[i + 1]])
        .collect()
}

/// Scan-converts one triangle into a `width` by `height` image, calling `emit` for every
/// covered pixel.
pub(super) fn rasterize_triangle(
    triangle: [ClipVertex; 3],
    (width, height): (u32, u32),
    faces: Faces,
    fill: FillMode,
    mut emit: impl FnMut(Fragment),
) {
    for clipped in clip_near(triangle) {
        let vertices = clipped.map(|vertex| WindowVertex::new(&vertex, width, height));
        let [a, b, c] = vertices;

        // With rows growing downwards, counter-clockwise triangles have a negative area.
        let area = (b.x - a.x) * (c.y - a.y) - (c.x - a.x) * (b.y - a.y);
        if area == 0. || !area.is_finite() || !faces.accepts(area < 0.) {
            continue;
        }

        match fill {
            FillMode::Fill => fill_triangle(&vertices, area, (width, height), &mut emit),
            FillMode::Line => {
                for (from, to) in [(a, b), (b, c), (c, a)] {
                    draw_line(&[from, to], (width, height), &mut emit);
                }
            }
        }
    }
}

fn fill_triangle(
    vertices: &[WindowVertex; 3],
    area: f32,
    (width, height): (u32, u32),
    emit: &mut impl FnMut(Fragment),
) {
    let [a, b, c] = vertices;
    let min_x = a.x.min(b.x).min(c.x).floor().max(0.) as u32;
    let min_y = a.y.min(b.y).min(c.y).floor().max(0.) as u32;
    let max_x = (a.x.max(b.x).max(c.x).ceil().max(0.) as u32).min(width);
    let max_y = (a.y.max(b.y).max(c.y).ceil().max(0.) as u32).min(height);

    let edge = |from: &WindowVertex, to: &WindowVertex, x: f32, y: f32| {
        (to.x - from.x) * (y - from.y) - (x - from.x) * (to.y - from.y)
    };

    for y in min_y..max_y {
        for x in min_x..max_x {
            let (px, py) = (x as f32 + 0.5, y as f32 + 0.5);
            let weights = [
                edge(b, c, px, py) / area,
                edge(c, a, px, py) / area,
                edge(a, b, px, py) / area,
            ];
            if weights.iter().any(|weight| *weight < 0.) {
                continue;
            }

            emit_fragment(vertices, weights, x, y, emit);
        }
    }
}

fn draw_line(
    ends: &[WindowVertex; 2],
    (width, height): (u32, u32),
    emit: &mut impl FnMut(Fragment),
) {
    let [from, to] = ends;
    let steps = (to.x - from.x).abs().max((to.y - from.y).abs()).ceil().max(1.);

    for step in 0..=steps as u32 {
        let t = step as f32 / steps;
        let (x, y) = (from.x + (to.x - from.x) * t, from.y + (to.y - from.y) * t);
        if x < 0. || y < 0. || x >= width as f32 || y >= height as f32 {
            continue;
        }

        emit_fragment(ends, [1. - t, t], x as u32, y as u32, emit);
    }
}

fn emit_fragment<const N: usize>(
    vertices: &[WindowVertex; N],
    weights: [f32; N],
    x: u32,
    y: u32,
    emit: &mut impl FnMut(Fragment),
) {
    let (depth, varyings) = interpolate(vertices, weights);
    if !(0. ..=1.).contains(&depth) {
        return;
    }

    emit(Fragment {
        x,
        y,
        depth,
        varyings,
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vertex(x: f32, y: f32, z: f32, w: f32, varying: f32) -> ClipVertex {
        let mut varyings = [0.; VARYINGS];
        varyings[0] = varying;

        ClipVertex {
            clip: [x * w, y * w, z * w, w],
            varyings,
        }
    }

    fn coverage(triangle: [ClipVertex; 3], faces: Faces) -> Vec<Fragment> {
        let mut fragments = Vec::new();
        rasterize_triangle(triangle, (8, 8), faces, FillMode::Fill, |f| fragments.push(f));

        fragments
    }

    #[test]
    fn counter_clockwise_triangles_face_front() {
        let ccw = [
            vertex(-1., -1., 0., 1., 0.),
            vertex(1., -1., 0., 1., 0.),
            vertex(-1., 1., 0., 1., 0.),
        ];
        let cw = [ccw[0], ccw[2], ccw[1]];

        // Half of the 8x8 viewport, plus the pixels centered on the diagonal.
        let covered = coverage(ccw, Faces::Front).len();
        assert!((32..=40).contains(&covered), "{covered}");
        assert!(coverage(cw, Faces::Front).is_empty());
        assert_eq!(coverage(cw, Faces::Back).len(), covered);
        assert_eq!(coverage(cw, Faces::FrontAndBack).len(), covered);
    }

    #[test]
    fn rows_grow_downwards() {
        let top = [
            vertex(-1., 0., 0., 1., 0.),
            vertex(1., 0., 0., 1., 0.),
            vertex(1., 1., 0., 1., 0.),
        ];
        assert!(coverage(top, Faces::Front).iter().all(|f| f.y < 4));
    }

    #[test]
    fn near_clipping_keeps_the_visible_part() {
        let inside = vertex(0., 0., 0., 1., 0.);
        let behind = ClipVertex {
            clip: [0., 0., -3., 1.],
            varyings: [0.; VARYINGS],
        };
        assert_eq!(clip_near([inside, inside, inside]).len(), 1);
        assert!(clip_near([behind, behind, behind]).is_empty());
        assert_eq!(clip_near([inside, inside, behind]).len(), 2);
        assert_eq!(clip_near([inside, behind, behind]).len(), 1);

        for triangle in clip_near([inside, inside, behind]) {
            assert!(triangle.iter().all(|v| v.near_distance() >= -1e-6));
        }
    }

    #[test]
    fn varyings_are_perspective_correct() {
        // The right edge is four times as far away, so the screen-space midpoint lies much
        // closer to the left end of the varying range than to its middle.
        let triangle = [
            vertex(-1., -1., 0., 1., 0.),
            vertex(1., -1., 0., 4., 1.),
            vertex(1., 1., 0., 4., 1.),
        ];
        let fragments = coverage(triangle, Faces::FrontAndBack);
        let middle = fragments
            .iter()
            .find(|f| f.x == 4 && f.y == 6)
            .expect("the midpoint is covered");
        assert!(middle.varyings[0] < 0.4, "{}", middle.varyings[0]);
    }

    #[test]
    fn wireframes_only_touch_edges() {
        let triangle = [
            vertex(-1., -1., 0., 1., 0.),
            vertex(1., -1., 0., 1., 0.),
            vertex(-1., 1., 0., 1., 0.),
        ];
        let mut fragments = Vec::new();
        rasterize_triangle(triangle, (8, 8), Faces::Front, FillMode::Line, |f| fragments.push(f));
        // The bottom edge lies on the far boundary of the viewport; the other two are the
        // left column and the diagonal.
        assert!(!fragments.is_empty());
        assert!(fragments.iter().all(|f| f.x == 0 || f.x == f.y));
    }
}
