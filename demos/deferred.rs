// SPDX-License-Identifier: MPL-2.0

//! Flies a camera over a plane scattered with cubes, lit by three colored lights.
//!
//! Arrow keys move forward and back and turn; keypad 2 and 8 pitch, 6 and 4 roll, 9 and 3 move
//! up and down. Tab toggles the G-buffer view and Escape quits.

use std::collections::HashSet;

use rand::{rngs::StdRng, Rng as _, SeedableRng as _};
use pylon_deferred::{
    camera::Perspective,
    gpu::native::NativeDevice,
    transform::Placement,
    Camera, DeferredRenderer, DrawMode, Mesh, Object, RendererConfig, Scene, Vector3,
};
use winit::{
    dpi::PhysicalSize,
    event::{ElementState, Event, KeyboardInput, VirtualKeyCode, WindowEvent},
    event_loop::{ControlFlow, EventLoop},
    window::{Window, WindowBuilder},
};

const WINDOW_WIDTH: u32 = 1024;
const WINDOW_HEIGHT: u32 = 768;

const CUBE_COUNT: usize = 500;

/// How far the camera moves per frame while a key is held.
const DELTA_POSITION: f32 = 0.2;
/// How many degrees the camera turns per frame while a key is held.
const DELTA_ATTITUDE: f32 = 1.;

fn main() {
    init_tracing();
    let event_loop = EventLoop::new();
    let window = create_window(&event_loop);
    let mut renderer = create_renderer(&window);
    let mut scene = create_scene(&mut renderer);

    let mut keys = HashSet::new();
    let mut debug = false;
    let mut fps = fps_counter::FPSCounter::new();

    event_loop.run(move |event, _, control_flow| {
        *control_flow = ControlFlow::Poll;

        match event {
            Event::WindowEvent { event, .. } => match event {
                WindowEvent::CloseRequested => *control_flow = ControlFlow::Exit,
                WindowEvent::KeyboardInput {
                    input:
                        KeyboardInput {
                            virtual_keycode: Some(key),
                            state,
                            ..
                        },
                    ..
                } => match state {
                    ElementState::Pressed => {
                        match key {
                            VirtualKeyCode::Escape => *control_flow = ControlFlow::Exit,
                            VirtualKeyCode::Tab if !keys.contains(&key) => debug = !debug,
                            _ => {}
                        }
                        keys.insert(key);
                    }
                    ElementState::Released => {
                        keys.remove(&key);
                    }
                },
                _ => {}
            },
            Event::MainEventsCleared => window.request_redraw(),
            Event::RedrawRequested(_) => {
                move_camera(&mut scene.camera, &keys);
                if let Err(e) = renderer.frame(&scene, debug) {
                    tracing::error!("{}", e);
                    *control_flow = ControlFlow::Exit;
                }

                let rate = fps.tick();
                if renderer.frames() % 120 == 0 {
                    tracing::info!("{} FPS", rate);
                }
            }
            _ => {}
        }
    });
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .init();
}

fn create_window(event_loop: &EventLoop<()>) -> Window {
    WindowBuilder::new()
        .with_title("Deferred shading")
        .with_inner_size(PhysicalSize::new(WINDOW_WIDTH, WINDOW_HEIGHT))
        // The G-buffer keeps the size it was created with.
        .with_resizable(false)
        .build(event_loop)
        .unwrap()
}

fn create_renderer(window: &Window) -> DeferredRenderer<NativeDevice> {
    let device = pollster::block_on(unsafe {
        NativeDevice::new(window, wgpu::Backends::all(), WINDOW_WIDTH, WINDOW_HEIGHT)
    })
    .unwrap();
    let config = RendererConfig::default().with_size(WINDOW_WIDTH, WINDOW_HEIGHT);

    DeferredRenderer::new(device, config).unwrap()
}

fn create_scene(renderer: &mut DeferredRenderer<NativeDevice>) -> Scene {
    let cube = renderer.upload_mesh(&Mesh::cube()).unwrap();
    let plane = renderer.upload_mesh(&Mesh::plane()).unwrap();

    let mut objects: Vec<_> = cube_positions(CUBE_COUNT)
        .into_iter()
        .map(|position| Object {
            placement: Placement::new(position, Vector3::ZERO),
            color: Vector3::new(255., 200., 0.) * (1. / 255.),
            mesh: cube,
            mode: DrawMode::SOLID,
        })
        .collect();
    objects.push(Object {
        placement: Placement::default(),
        color: Vector3::new(230., 149., 18.) * (1. / 255.),
        mesh: plane,
        mode: DrawMode::TWO_SIDED,
    });

    Scene {
        camera: Camera::perspective(
            Vector3::new(0., 4., 20.),
            Perspective {
                aspect_ratio: WINDOW_WIDTH as f32 / WINDOW_HEIGHT as f32,
                ..Default::default()
            },
        ),
        objects,
    }
}

/// The motion model: held keys move and turn the camera a fixed step per frame.
fn move_camera(camera: &mut Camera, keys: &HashSet<VirtualKeyCode>) {
    use VirtualKeyCode::*;

    let held = |key| keys.contains(&key);
    let step = |forward, back| match (held(forward), held(back)) {
        (true, false) => 1.,
        (false, true) => -1.,
        _ => 0.,
    };

    *camera.attitude.heading_mut() += step(Right, Left) * DELTA_ATTITUDE;
    *camera.attitude.pitch_mut() += step(Numpad2, Numpad8) * DELTA_ATTITUDE;
    *camera.attitude.roll_mut() += step(Numpad6, Numpad4) * DELTA_ATTITUDE;

    // Moves follow the camera's own axes.
    let attitude = camera.attitude_matrix();
    let forward = Vector3::new(0., 0., -1.) * attitude;
    let up = Vector3::new(0., 1., 0.) * attitude;
    camera.position += forward * (step(Up, Down) * DELTA_POSITION);
    camera.position += up * (step(Numpad9, Numpad3) * DELTA_POSITION);
}

/// Scatters cubes over the plane. The seed is fixed so the scene is the same every run.
fn cube_positions(count: usize) -> Vec<Vector3> {
    let mut rng = StdRng::seed_from_u64(1);

    (0..count)
        .map(|_| Vector3::new(rng.gen_range(-100.0..100.0), 1., rng.gen_range(-100.0..100.0)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cubes_rest_on_the_plane_in_the_same_places() {
        let positions = cube_positions(CUBE_COUNT);
        assert_eq!(positions.len(), CUBE_COUNT);
        assert_eq!(positions, cube_positions(CUBE_COUNT));

        for position in positions {
            assert_eq!(position.y, 1.);
            assert!((-100.0..100.0).contains(&position.x));
            assert!((-100.0..100.0).contains(&position.z));
        }
    }
}
