// Platform collaborator - everything the core needs from the outside world
//
// Window size, native surface handles, file reads, fatal termination and (for
// the software rasterizer) a sink for finished frames.

use parking_lot::Mutex;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

pub trait Platform {
    /// Current drawable size in pixels; (0, 0) while minimized
    fn surface_size(&self) -> (u32, u32);

    /// Native handles for surface creation, None when running headless
    fn window_handles(&self) -> Option<(RawDisplayHandle, RawWindowHandle)> {
        None
    }

    fn read_file(&self, path: &Path) -> std::io::Result<Vec<u8>> {
        std::fs::read(path)
    }

    /// Log a diagnostic and terminate. Never returns and never unwinds.
    fn fatal_error(&self, message: &str) -> ! {
        log::error!("FATAL: {}", message);
        log::logger().flush();
        std::process::exit(1)
    }

    /// Receives frames presented by the software rasterizer (0xAARRGGBB)
    fn present_pixels(&self, _width: u32, _height: u32, _pixels: &[u32]) {}
}

/// A frame handed to HeadlessPlatform::present_pixels
#[derive(Debug, Clone, PartialEq)]
pub struct PresentedFrame {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u32>,
}

/// Platform without a window. Used by tests and offscreen tools.
pub struct HeadlessPlatform {
    size: Mutex<(u32, u32)>,
    last_frame: Mutex<Option<PresentedFrame>>,
    presented: AtomicU64,
    panic_on_fatal: bool,
}

impl HeadlessPlatform {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            size: Mutex::new((width, height)),
            last_frame: Mutex::new(None),
            presented: AtomicU64::new(0),
            panic_on_fatal: false,
        }
    }

    /// Panic instead of exiting on a fatal error, so tests can observe it
    pub fn panic_on_fatal(mut self) -> Self {
        self.panic_on_fatal = true;
        self
    }

    pub fn set_size(&self, width: u32, height: u32) {
        *self.size.lock() = (width, height);
    }

    pub fn presented_frames(&self) -> u64 {
        self.presented.load(Ordering::Relaxed)
    }

    pub fn last_frame(&self) -> Option<PresentedFrame> {
        self.last_frame.lock().clone()
    }
}

impl Platform for HeadlessPlatform {
    fn surface_size(&self) -> (u32, u32) {
        *self.size.lock()
    }

    fn fatal_error(&self, message: &str) -> ! {
        if self.panic_on_fatal {
            panic!("fatal render error: {}", message);
        }
        log::error!("FATAL: {}", message);
        log::logger().flush();
        std::process::exit(1)
    }

    fn present_pixels(&self, width: u32, height: u32, pixels: &[u32]) {
        self.presented.fetch_add(1, Ordering::Relaxed);
        *self.last_frame.lock() = Some(PresentedFrame {
            width,
            height,
            pixels: pixels.to_vec(),
        });
    }
}
