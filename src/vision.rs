//! Colour check used to decide whether a watch position holds the requested object.
//!
//! Frames are sampled from a camera that is opened and released per check. Each
//! frame's centred square region is averaged in HSV (OpenCV 8-bit convention: hue
//! 0..180, saturation and value 0..255), classified into a coarse colour, and the
//! per-frame results are combined by plurality vote.

use std::sync::Arc;

use async_trait::async_trait;
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// A captured BGR image, row-major, 3 bytes per pixel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub width: usize,
    pub height: usize,
    pub data: Vec<u8>,
}

impl Frame {
    /// A frame filled with one BGR colour.
    pub fn solid(width: usize, height: usize, bgr: [u8; 3]) -> Self {
        let data = bgr
            .iter()
            .copied()
            .cycle()
            .take(width * height * 3)
            .collect();
        Self {
            width,
            height,
            data,
        }
    }

    fn pixel(&self, x: usize, y: usize) -> Option<[u8; 3]> {
        let offset = (y * self.width + x) * 3;
        let px = self.data.get(offset..offset + 3)?;
        Some([px[0], px[1], px[2]])
    }
}

/// An open capture session. Dropping it releases the device.
pub trait FrameSource {
    /// Grabs the next frame, or `None` if the grab failed.
    fn read_frame(&mut self) -> Option<Frame>;
}

/// A camera device that can be opened on demand.
pub trait Camera: Send + Sync {
    /// Opens the device, or `None` if it is unavailable.
    fn open(&self) -> Option<Box<dyn FrameSource>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Color {
    Red,
    Yellow,
    Green,
    Blue,
    Purple,
    Unknown,
    /// Saturation or value below the floor; hue is meaningless.
    LowSignal,
}

impl Color {
    pub fn code(self) -> &'static str {
        match self {
            Color::Red => "Red",
            Color::Yellow => "Yellow",
            Color::Green => "Green",
            Color::Blue => "Blue",
            Color::Purple => "Purple",
            Color::Unknown => "Unknown",
            Color::LowSignal => "Gray or Black",
        }
    }

    /// Whether a user-supplied colour code names this colour (ASCII case-insensitive).
    pub fn matches_code(self, code: &str) -> bool {
        self.code().eq_ignore_ascii_case(code.trim())
    }
}

impl std::fmt::Display for Color {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Sampling and classification parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisionConfig {
    pub frames: usize,
    pub roi_side: usize,
    pub saturation_floor: f64,
    pub value_floor: f64,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            frames: 10,
            roi_side: 100,
            saturation_floor: 50.0,
            value_floor: 50.0,
        }
    }
}

/// Converts one BGR pixel to HSV on OpenCV's 8-bit scale.
pub fn bgr_to_hsv([b, g, r]: [u8; 3]) -> Vector3<f64> {
    let (b, g, r) = (f64::from(b), f64::from(g), f64::from(r));
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let saturation = if max > 0.0 { delta / max * 255.0 } else { 0.0 };
    let mut hue = if delta == 0.0 {
        0.0
    } else if max == r {
        60.0 * (g - b) / delta
    } else if max == g {
        120.0 + 60.0 * (b - r) / delta
    } else {
        240.0 + 60.0 * (r - g) / delta
    };
    if hue < 0.0 {
        hue += 360.0;
    }

    Vector3::new((hue / 2.0).round(), saturation.round(), max)
}

/// Mean HSV over the centred `side`×`side` square, clipped to the frame.
pub fn roi_mean_hsv(frame: &Frame, side: usize) -> Option<Vector3<f64>> {
    let half = side / 2;
    let (cx, cy) = (frame.width / 2, frame.height / 2);
    let (x0, x1) = (cx.saturating_sub(half), (cx + half).min(frame.width));
    let (y0, y1) = (cy.saturating_sub(half), (cy + half).min(frame.height));

    let mut sum = Vector3::zeros();
    let mut count = 0usize;
    for y in y0..y1 {
        for x in x0..x1 {
            sum += bgr_to_hsv(frame.pixel(x, y)?);
            count += 1;
        }
    }

    (count > 0).then(|| sum / count as f64)
}

/// Classifies a mean HSV sample into a coarse colour.
pub fn classify(mean: Vector3<f64>, config: &VisionConfig) -> Color {
    let (hue, saturation, value) = (mean.x, mean.y, mean.z);
    if saturation <= config.saturation_floor || value <= config.value_floor {
        return Color::LowSignal;
    }

    if (0.0..15.0).contains(&hue) || (hue > 165.0 && hue <= 180.0) {
        Color::Red
    } else if (15.0..35.0).contains(&hue) {
        Color::Yellow
    } else if (35.0..85.0).contains(&hue) {
        Color::Green
    } else if (85.0..125.0).contains(&hue) {
        Color::Blue
    } else if (125.0..165.0).contains(&hue) {
        Color::Purple
    } else {
        Color::Unknown
    }
}

/// Most frequent colour; on a tie the one seen first wins.
pub fn plurality(samples: &[Color]) -> Option<Color> {
    let mut counts: Vec<(Color, usize)> = Vec::new();
    for &color in samples {
        match counts.iter_mut().find(|(seen, _)| *seen == color) {
            Some((_, n)) => *n += 1,
            None => counts.push((color, 1)),
        }
    }

    let mut best: Option<(Color, usize)> = None;
    for (color, n) in counts {
        if best.map_or(true, |(_, top)| n > top) {
            best = Some((color, n));
        }
    }
    best.map(|(color, _)| color)
}

/// Opens `camera`, samples up to `config.frames` frames and votes on the colour.
///
/// Returns `None` if the camera cannot be opened or no frame was captured.
pub fn dominant_color(camera: &dyn Camera, config: &VisionConfig) -> Option<Color> {
    let Some(mut source) = camera.open() else {
        warn!("could not open camera");
        return None;
    };

    let mut samples = Vec::with_capacity(config.frames);
    for _ in 0..config.frames {
        let Some(frame) = source.read_frame() else {
            warn!("failed to grab frame");
            continue;
        };
        if let Some(mean) = roi_mean_hsv(&frame, config.roi_side) {
            samples.push(classify(mean, config));
        }
    }
    drop(source);

    debug!(?samples, "per-frame colours");
    plurality(&samples)
}

/// Yes/no colour check against whatever is in front of the gripper camera.
#[async_trait]
pub trait ColorGate: Send + Sync {
    async fn matches(&self, expected: &str) -> bool;
}

/// [`ColorGate`] backed by a real frame source.
#[derive(Clone)]
pub struct VisionGate {
    camera: Arc<dyn Camera>,
    config: VisionConfig,
}

impl VisionGate {
    pub fn new(camera: Arc<dyn Camera>, config: VisionConfig) -> Self {
        Self { camera, config }
    }
}

#[async_trait]
impl ColorGate for VisionGate {
    async fn matches(&self, expected: &str) -> bool {
        let camera = Arc::clone(&self.camera);
        let config = self.config;
        let detected =
            match tokio::task::spawn_blocking(move || dominant_color(camera.as_ref(), &config))
                .await
            {
                Ok(detected) => detected,
                Err(err) => {
                    warn!(%err, "colour sampling task failed");
                    None
                }
            };

        match detected {
            Some(color) => {
                info!(detected = %color, expected, "detected color (most common across frames)");
                color.matches_code(expected)
            }
            None => {
                warn!("no color detected");
                false
            }
        }
    }
}
