// SPDX-License-Identifier: MPL-2.0

//! Once-per-frame checks of the device error flag.

use std::panic::Location;

use crate::gpu::Device;

/// Inspects the device after a frame has been recorded.
pub trait Diagnostics {
    /// `location` is where the frame was ended.
    fn check(&self, device: &mut dyn Device, location: &'static Location<'static>);
}

/// Ignores device errors. Errors stay raised on the device until someone takes them.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopDiagnostics;

impl Diagnostics for NoopDiagnostics {
    fn check(&self, _: &mut dyn Device, _: &'static Location<'static>) {}
}

/// Logs device errors and carries on.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogDiagnostics;

impl Diagnostics for LogDiagnostics {
    fn check(&self, device: &mut dyn Device, location: &'static Location<'static>) {
        if let Some(error) = device.take_error() {
            tracing::error!("{} (frame ended at {})", error, location);
        }
    }
}

/// Panics on the first device error.
#[derive(Clone, Copy, Debug, Default)]
pub struct TrapDiagnostics;

impl Diagnostics for TrapDiagnostics {
    fn check(&self, device: &mut dyn Device, location: &'static Location<'static>) {
        if let Some(error) = device.take_error() {
            panic!("GPU error in frame ended at {location}: {error}");
        }
    }
}

/// Logging in debug builds and nothing in release builds.
pub fn default_diagnostics() -> Box<dyn Diagnostics> {
    if cfg!(debug_assertions) {
        Box::new(LogDiagnostics)
    } else {
        Box::new(NoopDiagnostics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::recorder::RecordingDevice;

    #[test]
    fn logging_takes_the_error() {
        let mut device = RecordingDevice::new(16, 16);
        device.bind_texture(99, None);

        LogDiagnostics.check(&mut device, Location::caller());
        assert_eq!(device.take_error(), None);
    }

    #[test]
    fn noop_leaves_the_error_raised() {
        let mut device = RecordingDevice::new(16, 16);
        device.bind_texture(99, None);

        NoopDiagnostics.check(&mut device, Location::caller());
        assert!(device.take_error().is_some());
    }

    #[test]
    #[should_panic(expected = "GPU error")]
    fn trapping_panics() {
        let mut device = RecordingDevice::new(16, 16);
        device.bind_texture(99, None);

        TrapDiagnostics.check(&mut device, Location::caller());
    }

    #[test]
    fn clean_frames_pass() {
        let mut device = RecordingDevice::new(16, 16);
        TrapDiagnostics.check(&mut device, Location::caller());
    }
}
