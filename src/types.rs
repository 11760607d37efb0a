use arrayvec::ArrayVec;
use serde::{Deserialize, Serialize};

/// Maximum number of planes a pixel buffer can carry.
pub const MAX_PLANES: usize = 3;

/// Pixel formats encountered across platforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum PixelFormat {
    /// Bi-planar 4:2:0, video range (`420v`).
    Nv12,
    /// Bi-planar 4:2:0, full range (`420f`).
    Nv12FullRange,
    Yuyv,
    Uyvy,
    Bgra32,
    Jpeg,
}

impl PixelFormat {
    /// Plane layout of an uncompressed frame with this format and size.
    ///
    /// Returns `None` for compressed formats, which have no fixed layout.
    pub fn plane_layouts(&self, size: Size) -> Option<ArrayVec<PlaneLayout, MAX_PLANES>> {
        let width = size.width as usize;
        let height = size.height as usize;
        let mut planes = ArrayVec::new();
        match self {
            Self::Nv12 | Self::Nv12FullRange => {
                planes.push(PlaneLayout {
                    bytes_per_row: width,
                    height,
                });
                // Interleaved CbCr at half vertical and horizontal resolution.
                planes.push(PlaneLayout {
                    bytes_per_row: width.div_ceil(2) * 2,
                    height: height.div_ceil(2),
                });
            }
            Self::Yuyv | Self::Uyvy => planes.push(PlaneLayout {
                bytes_per_row: width.div_ceil(2) * 4,
                height,
            }),
            Self::Bgra32 => planes.push(PlaneLayout {
                bytes_per_row: width * 4,
                height,
            }),
            Self::Jpeg => return None,
        }
        Some(planes)
    }
}

/// Pixel dimensions of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const HD_720: Size = Size {
        width: 1280,
        height: 720,
    };
}

/// A rational number (numerator / denominator).
///
/// Used to represent frame rates (e.g. 30000/1000 = 30 fps) and
/// frame durations (e.g. 1000/30000 ≈ 0.033 s).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Ratio {
    pub numerator: u32,
    pub denominator: u32,
}

impl Ratio {
    pub fn as_f64(&self) -> f64 {
        self.numerator as f64 / self.denominator as f64
    }
}

/// Which way the camera faces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraPosition {
    #[default]
    Front,
    Back,
}

/// Orientation applied to frames by the capture connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoOrientation {
    Portrait,
    PortraitUpsideDown,
    #[default]
    LandscapeRight,
    LandscapeLeft,
}

/// Memory layout of a single plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PlaneLayout {
    pub bytes_per_row: usize,
    pub height: usize,
}

impl PlaneLayout {
    pub fn len(&self) -> usize {
        self.bytes_per_row * self.height
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Layout metadata of a frame stream, used to build display samples.
///
/// Two frames with equal descriptors can share one cached descriptor; any
/// difference in format, size or plane layout requires a new one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatDescriptor {
    pub pixel_format: PixelFormat,
    pub size: Size,
    planes: ArrayVec<PlaneLayout, MAX_PLANES>,
}

impl FormatDescriptor {
    pub fn new(
        pixel_format: PixelFormat,
        size: Size,
        planes: impl IntoIterator<Item = PlaneLayout>,
    ) -> Self {
        FormatDescriptor {
            pixel_format,
            size,
            planes: planes.into_iter().take(MAX_PLANES).collect(),
        }
    }

    /// The per-plane layouts described by this descriptor.
    pub fn planes(&self) -> &[PlaneLayout] {
        &self.planes
    }
}

/// A presentation timestamp mirroring Core Media's `CMTime`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Timestamp {
    /// The numerator of the time value (ticks).
    pub value: i64,
    /// Ticks per second.
    pub timescale: i32,
    /// CMTime flags (valid, has been rounded, positive/negative infinity, indefinite).
    pub flags: u32,
    /// Distinguishes separate timelines that may restart from zero.
    pub epoch: i64,
}

impl Timestamp {
    pub const FLAG_VALID: u32 = 1;

    pub fn new(value: i64, timescale: i32) -> Self {
        Timestamp {
            value,
            timescale,
            flags: Self::FLAG_VALID,
            epoch: 0,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.flags & Self::FLAG_VALID != 0
    }

    pub fn as_secs_f64(&self) -> f64 {
        if self.timescale > 0 {
            self.value as f64 / self.timescale as f64
        } else {
            0.0
        }
    }
}

/// Configuration for opening a capture stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub resolution: Size,
    pub facing: CameraPosition,
    pub orientation: VideoOrientation,
    pub pixel_format: PixelFormat,
    /// Leave unset to keep the device's default frame rate.
    pub frame_rate: Option<Ratio>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        CaptureConfig {
            resolution: Size::HD_720,
            facing: CameraPosition::Front,
            orientation: VideoOrientation::LandscapeRight,
            pixel_format: PixelFormat::Nv12FullRange,
            frame_rate: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nv12_has_half_height_chroma_plane() {
        let planes = PixelFormat::Nv12FullRange
            .plane_layouts(Size {
                width: 5,
                height: 3,
            })
            .unwrap();
        assert_eq!(
            planes.as_slice(),
            &[
                PlaneLayout {
                    bytes_per_row: 5,
                    height: 3
                },
                PlaneLayout {
                    bytes_per_row: 6,
                    height: 2
                },
            ]
        );
    }

    #[test]
    fn jpeg_has_no_fixed_layout() {
        assert!(PixelFormat::Jpeg.plane_layouts(Size::HD_720).is_none());
    }

    #[test]
    fn timestamp_seconds() {
        let ts = Timestamp::new(90, 30);
        assert!(ts.is_valid());
        assert_eq!(ts.as_secs_f64(), 3.0);
        assert_eq!(Timestamp::new(5, 0).as_secs_f64(), 0.0);
    }

    #[test]
    fn capture_defaults_match_hd_front_camera() {
        let config = CaptureConfig::default();
        assert_eq!(config.resolution, Size::HD_720);
        assert_eq!(config.facing, CameraPosition::Front);
        assert_eq!(config.orientation, VideoOrientation::LandscapeRight);
        assert_eq!(config.pixel_format, PixelFormat::Nv12FullRange);
    }
}
