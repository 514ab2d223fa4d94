//! Capture device streams. At most one is open; starting always releases the
//! previous stream first.

use base64::Engine as _;
use bevy::log::{info, warn};
use image::codecs::jpeg::JpegEncoder;
use image::{ColorType, Rgb, RgbImage};
use serde::Serialize;

pub const SNAPSHOT_JPEG_QUALITY: u8 = 60;

/// A host-provided camera.
pub trait CaptureDevice {
    fn available(&self) -> bool;
    fn open(&mut self) -> Result<(), String>;
    /// Release every underlying track.
    fn close(&mut self);
    fn is_open(&self) -> bool;
    fn latest_frame(&mut self) -> Option<RgbImage>;
}

/// The default: no camera attached, every start fails.
pub struct NoCaptureDevice;

impl CaptureDevice for NoCaptureDevice {
    fn available(&self) -> bool {
        false
    }

    fn open(&mut self) -> Result<(), String> {
        Err("no capture device available".to_string())
    }

    fn close(&mut self) {}

    fn is_open(&self) -> bool {
        false
    }

    fn latest_frame(&mut self) -> Option<RgbImage> {
        None
    }
}

/// Synthetic camera producing a moving gradient.
pub struct TestPatternCamera {
    width: u32,
    height: u32,
    open: bool,
    frame: u32,
}

impl TestPatternCamera {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
            open: false,
            frame: 0,
        }
    }
}

impl Default for TestPatternCamera {
    fn default() -> Self {
        Self::new(640, 480)
    }
}

impl CaptureDevice for TestPatternCamera {
    fn available(&self) -> bool {
        true
    }

    fn open(&mut self) -> Result<(), String> {
        self.open = true;
        Ok(())
    }

    fn close(&mut self) {
        self.open = false;
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn latest_frame(&mut self) -> Option<RgbImage> {
        if !self.open {
            return None;
        }
        self.frame = self.frame.wrapping_add(1);
        let shift = self.frame;
        Some(RgbImage::from_fn(self.width, self.height, |x, y| {
            Rgb([
                (x.wrapping_add(shift) % 256) as u8,
                (y % 256) as u8,
                ((x ^ y) % 256) as u8,
            ])
        }))
    }
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct CaptureStats {
    pub available: bool,
    pub active: bool,
    pub streams_opened: u64,
    pub streams_closed: u64,
    pub snapshots: u64,
}

pub struct CaptureRegistry {
    device: Box<dyn CaptureDevice>,
    active: Option<u64>,
    next_stream: u64,
    stats: CaptureStats,
}

impl Default for CaptureRegistry {
    fn default() -> Self {
        Self::new(Box::new(NoCaptureDevice))
    }
}

impl CaptureRegistry {
    pub fn new(device: Box<dyn CaptureDevice>) -> Self {
        Self {
            device,
            active: None,
            next_stream: 0,
            stats: CaptureStats::default(),
        }
    }

    pub fn available(&self) -> bool {
        self.device.available()
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn device_open(&self) -> bool {
        self.device.is_open()
    }

    pub fn start(&mut self) -> Result<u64, String> {
        self.stop();
        self.device.open().map_err(|e| {
            warn!("[Ritual capture] start denied or failed: {}", e);
            e
        })?;
        self.next_stream += 1;
        self.active = Some(self.next_stream);
        self.stats.streams_opened += 1;
        info!("[Ritual capture] Stream {} opened", self.next_stream);
        Ok(self.next_stream)
    }

    pub fn stop(&mut self) -> bool {
        let Some(stream) = self.active.take() else {
            return false;
        };
        self.device.close();
        self.stats.streams_closed += 1;
        info!("[Ritual capture] Stream {} released", stream);
        true
    }

    /// JPEG data URL of the latest frame, `None` without an open stream.
    pub fn snapshot(&mut self) -> Option<String> {
        self.active?;
        let frame = self.device.latest_frame()?;
        let url = encode_data_url(&frame)?;
        self.stats.snapshots += 1;
        Some(url)
    }

    pub fn stats(&self) -> CaptureStats {
        CaptureStats {
            available: self.device.available(),
            active: self.active.is_some(),
            ..self.stats.clone()
        }
    }
}

fn encode_data_url(frame: &RgbImage) -> Option<String> {
    let mut jpeg = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut jpeg, SNAPSHOT_JPEG_QUALITY);
    if let Err(e) = encoder.encode(frame.as_raw(), frame.width(), frame.height(), ColorType::Rgb8) {
        warn!("[Ritual capture] JPEG encoding failed: {}", e);
        return None;
    }
    Some(format!(
        "data:image/jpeg;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(&jpeg)
    ))
}
