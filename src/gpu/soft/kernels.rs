// SPDX-License-Identifier: MPL-2.0

//! CPU counterparts of the built-in programs.
//!
//! Each kernel computes what the WGSL program of the same name computes, so that a frame drawn
//! by the soft device matches one drawn on a GPU up to rounding.

use super::{
    raster::{ClipVertex, Varyings, VARYINGS},
    Texels,
};
use crate::{
    gpu::{
        shader::{DEBUG_VIEW, GEOMETRY_PASS, LIGHTING_PASS},
        ProgramInterface, UniformValue, MAX_COLOR_ATTACHMENTS, TEXTURE_UNITS,
    },
    linear::deg_to_rad,
    Matrix4, MeshVertex, Vector3,
};

/// World units covered by one repetition of the projected image.
pub(crate) const PROJECTOR_TILE: f32 = 32.;
/// How strongly the projected image replaces the albedo in the geometry pass.
pub(crate) const PROJECTOR_ALBEDO_MIX: f32 = 0.35;
/// How strongly the projected image tints the lit color.
pub(crate) const PROJECTOR_LIGHT_MIX: f32 = 0.5;
pub(crate) const AMBIENT: f32 = 0.15;
pub(crate) const SPECULAR: f32 = 0.25;
pub(crate) const SHININESS: i32 = 32;

/// What sampling a unit with no texture returns.
const UNBOUND_TEXEL: [f32; 4] = [1., 1., 1., 0.];

/// Fragment outputs, one per color attachment.
pub(super) type Outputs = [Option<[f32; 4]>; MAX_COLOR_ATTACHMENTS];

/// Selects the kernel for a program by its name.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(super) enum Kernel {
    Geometry,
    Lighting,
    DebugView,
}

impl Kernel {
    pub(super) fn for_program(name: &str) -> Option<Self> {
        match name {
            GEOMETRY_PASS => Some(Self::Geometry),
            LIGHTING_PASS => Some(Self::Lighting),
            DEBUG_VIEW => Some(Self::DebugView),
            _ => None,
        }
    }

    /// Resolves the uniforms this kernel reads.
    pub(super) fn prepare(self, uniforms: &Uniforms) -> Prepared {
        let transform = Transform {
            projection: uniforms.mat4("projectionMatrix"),
            model_view: uniforms.mat4("modelViewMatrix"),
        };

        match self {
            Self::Geometry => Prepared::Geometry {
                transform,
                model: uniforms.mat4("modelMatrix"),
                color: uniforms.vec3("color"),
                projector: Projector::new(uniforms),
            },
            Self::Lighting => Prepared::Lighting {
                transform,
                view: uniforms.mat4("viewMatrix"),
                layers: [
                    uniforms.int("_diffuse"),
                    uniforms.int("_position"),
                    uniforms.int("_normals"),
                ],
                projector: Projector::new(uniforms),
                lights: std::array::from_fn(|i| {
                    (
                        uniforms.vec3(&format!("lights[{i}]")),
                        uniforms.vec3(&format!("lightColors[{i}]")),
                    )
                }),
            },
            Self::DebugView => Prepared::DebugView {
                transform,
                image: uniforms.int("image"),
            },
        }
    }
}

/// The uniform values of a program, as last set.
///
/// Uniforms that were never set read as zero.
pub(super) struct Uniforms<'a> {
    pub(super) interface: &'a ProgramInterface,
    pub(super) values: &'a [Option<UniformValue>],
}

impl Uniforms<'_> {
    fn get(&self, name: &str) -> Option<UniformValue> {
        self.interface
            .find(name)
            .and_then(|index| self.values.get(index).copied().flatten())
    }

    fn mat4(&self, name: &str) -> Matrix4 {
        match self.get(name) {
            Some(UniformValue::Mat4(m)) => m,
            _ => Matrix4::ZERO,
        }
    }

    fn vec3(&self, name: &str) -> Vector3 {
        match self.get(name) {
            Some(UniformValue::Vec3(v)) => v,
            _ => Vector3::ZERO,
        }
    }

    fn int(&self, name: &str) -> i32 {
        match self.get(name) {
            Some(UniformValue::Int(i)) => i,
            _ => 0,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Wrap {
    Clamp,
    Repeat,
}

/// The textures bound to each unit during a draw.
pub(super) struct Units<'a>(pub(super) [Option<&'a Texels>; TEXTURE_UNITS]);

impl Units<'_> {
    /// Nearest-texel lookup, with `(0, 0)` at the top-left corner of the image.
    fn sample(&self, unit: i32, [u, v]: [f32; 2], wrap: Wrap) -> [f32; 4] {
        let Some(texels) = usize::try_from(unit)
            .ok()
            .and_then(|unit| self.0.get(unit).copied().flatten())
        else {
            return UNBOUND_TEXEL;
        };

        let coordinate = |t: f32, size: u32| {
            let i = (t * size as f32).floor() as i64;
            match wrap {
                Wrap::Clamp => i.clamp(0, i64::from(size) - 1),
                Wrap::Repeat => i.rem_euclid(i64::from(size)),
            }
        };
        let (x, y) = (coordinate(u, texels.width), coordinate(v, texels.height));

        texels.data[(y * i64::from(texels.width) + x) as usize]
    }
}

#[derive(Clone, Copy, Debug)]
pub(super) struct Transform {
    projection: Matrix4,
    model_view: Matrix4,
}

impl Transform {
    fn clip(&self, point: Vector3) -> [f32; 4] {
        self.projection
            .transform_homogeneous(self.model_view.transform_homogeneous(point_of(point)))
    }
}

/// The checker image thrown onto the scene from above.
#[derive(Clone, Copy, Debug)]
pub(super) struct Projector {
    position: Vector3,
    /// Heading of the projection, in radians.
    heading: f32,
    unit: i32,
}

impl Projector {
    fn new(uniforms: &Uniforms) -> Self {
        Self {
            position: uniforms.vec3("projectorData.position"),
            heading: deg_to_rad(uniforms.vec3("projectorData.direction").heading()),
            unit: uniforms.int("projectorData.texture"),
        }
    }

    fn sample(&self, world: Vector3, units: &Units) -> [f32; 4] {
        let (sin, cos) = self.heading.sin_cos();
        let (dx, dz) = (world.x - self.position.x, world.z - self.position.z);
        let uv = [
            (dx * cos - dz * sin) / PROJECTOR_TILE,
            (dx * sin + dz * cos) / PROJECTOR_TILE,
        ];

        units.sample(self.unit, uv, Wrap::Repeat)
    }
}

/// A kernel with its uniforms resolved for one draw.
#[derive(Clone, Debug)]
pub(super) enum Prepared {
    Geometry {
        transform: Transform,
        model: Matrix4,
        color: Vector3,
        projector: Projector,
    },
    Lighting {
        transform: Transform,
        view: Matrix4,
        /// Units holding the diffuse, position and normal layers.
        layers: [i32; 3],
        projector: Projector,
        lights: [(Vector3, Vector3); 3],
    },
    DebugView {
        transform: Transform,
        image: i32,
    },
}

impl Prepared {
    pub(super) fn vertex(&self, vertex: &MeshVertex) -> ClipVertex {
        let mut varyings = [0.; VARYINGS];
        let clip = match self {
            Self::Geometry {
                transform, model, ..
            } => {
                let world = model.transform_homogeneous(point_of(vertex.point));
                let normal = model.transform_homogeneous(direction_of(vertex.normal));
                varyings[..3].copy_from_slice(&world[..3]);
                varyings[3..6].copy_from_slice(&normal[..3]);

                transform.clip(vertex.point)
            }
            Self::Lighting { transform, .. } | Self::DebugView { transform, .. } => {
                varyings[..2].copy_from_slice(&vertex.uv);

                transform.clip(vertex.point)
            }
        };

        ClipVertex { clip, varyings }
    }

    pub(super) fn fragment(&self, varyings: &Varyings, units: &Units) -> Outputs {
        let uv = [varyings[0], varyings[1]];

        match self {
            Self::Geometry {
                color, projector, ..
            } => {
                let world = Vector3::new(varyings[0], varyings[1], varyings[2]);
                let normal = Vector3::new(varyings[3], varyings[4], varyings[5]).normalized();
                let texel = projector.sample(world, units);
                let albedo = mix(*color, rgb_of(texel), PROJECTOR_ALBEDO_MIX * texel[3]);

                [
                    Some(rgba(albedo)),
                    Some(rgba(world)),
                    Some(rgba(normal)),
                ]
            }
            Self::Lighting {
                view,
                layers: [diffuse, position, normals],
                projector,
                lights,
                ..
            } => {
                let diffuse = units.sample(*diffuse, uv, Wrap::Clamp);
                // Nothing was drawn here; keep the background.
                if diffuse[3] < 0.5 {
                    return [Some(rgba(rgb_of(diffuse))), None, None];
                }

                let position = rgb_of(units.sample(*position, uv, Wrap::Clamp));
                let normal = rgb_of(units.sample(*normals, uv, Wrap::Clamp));
                let lit = shade(view, rgb_of(diffuse), position, normal, lights);

                let texel = projector.sample(position, units);
                let tint = mix(
                    Vector3::new(1., 1., 1.),
                    rgb_of(texel),
                    texel[3] * PROJECTOR_LIGHT_MIX,
                );

                [Some(rgba(modulate(lit, tint))), None, None]
            }
            Self::DebugView { image, .. } => {
                let texel = units.sample(*image, uv, Wrap::Clamp);

                [Some(rgba(rgb_of(texel))), None, None]
            }
        }
    }
}

/// Blinn-Phong shading in camera space.
fn shade(
    view: &Matrix4,
    albedo: Vector3,
    position: Vector3,
    normal: Vector3,
    lights: &[(Vector3, Vector3); 3],
) -> Vector3 {
    let position = xyz(view.transform_homogeneous(point_of(position)));
    let normal = xyz(view.transform_homogeneous(direction_of(normal))).normalized();
    let to_eye = (-position).normalized();

    let mut diffuse = Vector3::ZERO;
    let mut specular = Vector3::ZERO;
    for &(light, color) in lights {
        let light = xyz(view.transform_homogeneous(point_of(light)));
        let to_light = (light - position).normalized();
        let lambert = normal.dot(to_light).max(0.);
        diffuse += color * lambert;

        if lambert > 0. {
            let half = (to_light + to_eye).normalized();
            specular += color * (SPECULAR * normal.dot(half).max(0.).powi(SHININESS));
        }
    }

    let ambient = Vector3::new(AMBIENT, AMBIENT, AMBIENT);

    modulate(albedo, ambient + diffuse) + specular
}

fn point_of(v: Vector3) -> [f32; 4] {
    [v.x, v.y, v.z, 1.]
}

fn direction_of(v: Vector3) -> [f32; 4] {
    [v.x, v.y, v.z, 0.]
}

fn xyz([x, y, z, _]: [f32; 4]) -> Vector3 {
    Vector3::new(x, y, z)
}

fn rgb_of(texel: [f32; 4]) -> Vector3 {
    xyz(texel)
}

fn rgba(v: Vector3) -> [f32; 4] {
    [v.x, v.y, v.z, 1.]
}

fn mix(from: Vector3, to: Vector3, t: f32) -> Vector3 {
    from + (to - from) * t
}

fn modulate(a: Vector3, b: Vector3) -> Vector3 {
    Vector3::new(a.x * b.x, a.y * b.y, a.z * b.z)
}
