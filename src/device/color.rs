//! Colour description and RGB→YUV conversion matrices
//!
//! Sessions select a colorspace with a compact mode word: bit 0 is the
//! range (set = full), the remaining bits pick the standard:
//!
//! | `csc_mode >> 1` | Standard  | Kr     | Kb     |
//! |-----------------|-----------|--------|--------|
//! | 0               | Rec.601   | 0.299  | 0.114  |
//! | 1               | Rec.709   | 0.2126 | 0.0722 |
//! | 2               | Rec.2020  | 0.2627 | 0.0593 |
//!
//! The same selection drives the VUI written into parameter sets and the
//! matrix a conversion device uses.
//!
//! # References
//!
//! - ITU-T H.264 Annex E (VUI syntax and semantics)
//! - ITU-R BT.601-7, BT.709-6, BT.2020-2

use std::fmt;

use tracing::warn;

use crate::bitstream::VideoSignal;

// =============================================================================
// VUI Standard Values (ITU-T H.264 Table E-3, E-4, E-5)
// =============================================================================

/// colour_primaries values used by the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ColorPrimaries {
    /// ITU-R BT.709-6 / sRGB
    BT709 = 1,
    /// SMPTE 170M / ITU-R BT.601-7 525
    SMPTE170M = 6,
    /// ITU-R BT.2020-2 / ITU-R BT.2100-2
    BT2020 = 9,
}

/// transfer_characteristics values used by the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
#[allow(non_camel_case_types)]
pub enum TransferCharacteristics {
    /// ITU-R BT.709-6
    BT709 = 1,
    /// SMPTE 170M / BT.601
    SMPTE170M = 6,
    /// ITU-R BT.2020 10-bit
    BT2020_10 = 14,
    /// SMPTE ST 2084 (PQ / HDR10)
    SMPTE2084 = 16,
}

/// matrix_coefficients values used by the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
#[allow(non_camel_case_types)]
pub enum MatrixCoefficients {
    /// ITU-R BT.709-6 (Kr=0.2126, Kb=0.0722)
    BT709 = 1,
    /// SMPTE 170M / ITU-R BT.601-7 525 (Kr=0.299, Kb=0.114)
    SMPTE170M = 6,
    /// ITU-R BT.2020 non-constant luminance
    BT2020_NCL = 9,
}

impl MatrixCoefficients {
    /// RGB to Y coefficients (Kr, Kg, Kb)
    pub const fn luma_coefficients(&self) -> (f32, f32, f32) {
        match self {
            Self::BT709 => (0.2126, 0.7152, 0.0722),
            Self::SMPTE170M => (0.299, 0.587, 0.114),
            Self::BT2020_NCL => (0.2627, 0.6780, 0.0593),
        }
    }
}

/// Color value range (full PC range vs limited TV range)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ColorRange {
    /// Y: 16-235, UV: 16-240
    #[default]
    Limited,
    /// Y: 0-255, UV: 0-255
    Full,
}

impl ColorRange {
    /// Get Y (luma) value range in 8-bit units
    pub const fn y_range(self) -> (u8, u8) {
        match self {
            Self::Limited => (16, 235),
            Self::Full => (0, 255),
        }
    }

    /// Get UV (chroma) value range in 8-bit units
    pub const fn uv_range(self) -> (u8, u8) {
        match self {
            Self::Limited => (16, 240),
            Self::Full => (0, 255),
        }
    }
}

/// Colour standard selected by a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Colorspace {
    #[default]
    Rec601,
    Rec709,
    Rec2020,
}

impl Colorspace {
    /// All standards, in table order
    pub const ALL: [Colorspace; 3] = [Self::Rec601, Self::Rec709, Self::Rec2020];

    pub const fn matrix_coefficients(self) -> MatrixCoefficients {
        match self {
            Self::Rec601 => MatrixCoefficients::SMPTE170M,
            Self::Rec709 => MatrixCoefficients::BT709,
            Self::Rec2020 => MatrixCoefficients::BT2020_NCL,
        }
    }
}

impl fmt::Display for Colorspace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Rec601 => "Rec.601",
            Self::Rec709 => "Rec.709",
            Self::Rec2020 => "Rec.2020",
        })
    }
}

/// Complete colour description for one session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColorSpaceConfig {
    pub colorspace: Colorspace,
    pub range: ColorRange,
    pub primaries: ColorPrimaries,
    pub transfer: TransferCharacteristics,
    pub matrix: MatrixCoefficients,
}

impl Default for ColorSpaceConfig {
    fn default() -> Self {
        Self::new(Colorspace::Rec601, ColorRange::Limited, false)
    }
}

impl ColorSpaceConfig {
    /// Describe a standard and range. HDR only changes Rec.2020's transfer.
    pub const fn new(colorspace: Colorspace, range: ColorRange, hdr: bool) -> Self {
        let (primaries, transfer) = match colorspace {
            Colorspace::Rec601 => (ColorPrimaries::SMPTE170M, TransferCharacteristics::SMPTE170M),
            Colorspace::Rec709 => (ColorPrimaries::BT709, TransferCharacteristics::BT709),
            Colorspace::Rec2020 if hdr => {
                (ColorPrimaries::BT2020, TransferCharacteristics::SMPTE2084)
            }
            Colorspace::Rec2020 => (ColorPrimaries::BT2020, TransferCharacteristics::BT2020_10),
        };
        Self {
            colorspace,
            range,
            primaries,
            transfer,
            matrix: colorspace.matrix_coefficients(),
        }
    }

    /// Decode a session's `encoder_csc_mode`
    pub fn from_csc_mode(csc_mode: u32, dynamic_range: bool) -> Self {
        let range = if csc_mode & 1 == 1 {
            ColorRange::Full
        } else {
            ColorRange::Limited
        };
        let colorspace = match csc_mode >> 1 {
            0 => Colorspace::Rec601,
            1 => Colorspace::Rec709,
            2 => Colorspace::Rec2020,
            other => {
                warn!("Unknown colorspace {}, falling back to Rec.601", other);
                Colorspace::Rec601
            }
        };
        Self::new(colorspace, range, dynamic_range)
    }

    pub const fn is_full_range(&self) -> bool {
        matches!(self.range, ColorRange::Full)
    }

    /// VUI signalling for parameter-set rewriting
    pub const fn video_signal(&self) -> VideoSignal {
        VideoSignal {
            colour_primaries: self.primaries as u8,
            transfer_characteristics: self.transfer as u8,
            matrix_coefficients: self.matrix as u8,
            full_range: self.is_full_range(),
        }
    }
}

impl fmt::Display for ColorSpaceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let range = match self.range {
            ColorRange::Limited => "limited",
            ColorRange::Full => "full",
        };
        write!(f, "{} {}", self.colorspace, range)
    }
}

// =============================================================================
// Conversion Matrices
// =============================================================================

/// Fixed-point (16.16) RGB→YUV matrix with range scaling folded in.
///
/// Output samples are in the target bit depth:
/// `Y = y_offset + (y·rgb) >> 16`, `U/V = uv_offset + (u·rgb) >> 16`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColorMatrix {
    pub y: [i32; 3],
    pub u: [i32; 3],
    pub v: [i32; 3],
    pub y_offset: i32,
    pub uv_offset: i32,
    pub max: i32,
}

impl ColorMatrix {
    /// Build the matrix for a standard, range and output bit depth (8 or 10)
    pub fn new(colorspace: Colorspace, range: ColorRange, bit_depth: u32) -> Self {
        let (kr, kg, kb) = colorspace.matrix_coefficients().luma_coefficients();
        let (y_min, y_max) = range.y_range();
        let (uv_min, uv_max) = range.uv_range();

        // 8-bit units → target depth
        let depth_scale = match (bit_depth, range) {
            (10, ColorRange::Limited) => 4.0,
            (10, ColorRange::Full) => 1023.0 / 255.0,
            _ => 1.0,
        };
        let y_gain = (y_max - y_min) as f32 / 255.0 * depth_scale;
        let uv_gain = (uv_max - uv_min) as f32 / 255.0 * depth_scale;

        let fixed = |value: f32, gain: f32| (value * gain * 65536.0).round() as i32;
        let cb = 2.0 * (1.0 - kb);
        let cr = 2.0 * (1.0 - kr);

        Self {
            y: [fixed(kr, y_gain), fixed(kg, y_gain), fixed(kb, y_gain)],
            u: [fixed(-kr / cb, uv_gain), fixed(-kg / cb, uv_gain), fixed(0.5, uv_gain)],
            v: [fixed(0.5, uv_gain), fixed(-kg / cr, uv_gain), fixed(-kb / cr, uv_gain)],
            y_offset: (y_min as f32 * depth_scale).round() as i32,
            uv_offset: (128.0 * depth_scale).round() as i32,
            max: (255.0 * depth_scale).round() as i32,
        }
    }

    /// All six standard/range combinations for one bit depth, indexed by
    /// [`ColorMatrix::index`]
    pub fn table(bit_depth: u32) -> [ColorMatrix; 6] {
        let mut table = [Self::new(Colorspace::Rec601, ColorRange::Limited, bit_depth); 6];
        for colorspace in Colorspace::ALL {
            for range in [ColorRange::Limited, ColorRange::Full] {
                table[Self::index(colorspace, range)] = Self::new(colorspace, range, bit_depth);
            }
        }
        table
    }

    /// Table slot of a standard/range combination
    pub const fn index(colorspace: Colorspace, range: ColorRange) -> usize {
        let base = match colorspace {
            Colorspace::Rec601 => 0,
            Colorspace::Rec709 => 2,
            Colorspace::Rec2020 => 4,
        };
        base + matches!(range, ColorRange::Full) as usize
    }

    #[inline]
    pub fn luma(&self, r: i32, g: i32, b: i32) -> i32 {
        let y = self.y_offset + ((self.y[0] * r + self.y[1] * g + self.y[2] * b + 32768) >> 16);
        y.clamp(0, self.max)
    }

    /// `(U, V)` for an RGB triple (inputs may be sums of `n` samples)
    #[inline]
    pub fn chroma(&self, r: i32, g: i32, b: i32) -> (i32, i32) {
        let u = self.uv_offset + ((self.u[0] * r + self.u[1] * g + self.u[2] * b + 32768) >> 16);
        let v = self.uv_offset + ((self.v[0] * r + self.v[1] * g + self.v[2] * b + 32768) >> 16);
        (u.clamp(0, self.max), v.clamp(0, self.max))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_csc_mode_decoding() {
        let config = ColorSpaceConfig::from_csc_mode(0, false);
        assert_eq!(config.colorspace, Colorspace::Rec601);
        assert_eq!(config.range, ColorRange::Limited);

        let config = ColorSpaceConfig::from_csc_mode(3, false);
        assert_eq!(config.colorspace, Colorspace::Rec709);
        assert_eq!(config.range, ColorRange::Full);

        let config = ColorSpaceConfig::from_csc_mode(4, true);
        assert_eq!(config.colorspace, Colorspace::Rec2020);
        assert_eq!(config.transfer, TransferCharacteristics::SMPTE2084);

        let config = ColorSpaceConfig::from_csc_mode(4, false);
        assert_eq!(config.transfer, TransferCharacteristics::BT2020_10);
    }

    #[test]
    fn test_rec2020_code_points() {
        let sdr = ColorSpaceConfig::new(Colorspace::Rec2020, ColorRange::Limited, false);
        assert_eq!(sdr.transfer, TransferCharacteristics::BT2020_10);
        assert_eq!(sdr.transfer as u8, 14);
        assert_eq!(sdr.matrix, MatrixCoefficients::BT2020_NCL);
        assert_eq!(sdr.matrix as u8, 9);
        assert_eq!(sdr.matrix.luma_coefficients(), (0.2627, 0.6780, 0.0593));
    }

    #[test]
    fn test_unknown_colorspace_falls_back() {
        let config = ColorSpaceConfig::from_csc_mode(7, false);
        assert_eq!(config.colorspace, Colorspace::Rec601);
        assert!(config.is_full_range());
    }

    #[test]
    fn test_video_signal() {
        let signal = ColorSpaceConfig::from_csc_mode(2, false).video_signal();
        assert_eq!(signal.colour_primaries, 1);
        assert_eq!(signal.transfer_characteristics, 1);
        assert_eq!(signal.matrix_coefficients, 1);
        assert!(!signal.full_range);
    }

    #[test]
    fn test_black_and_white_levels() {
        let limited = ColorMatrix::new(Colorspace::Rec709, ColorRange::Limited, 8);
        assert_eq!(limited.luma(0, 0, 0), 16);
        assert_eq!(limited.luma(255, 255, 255), 235);
        assert_eq!(limited.chroma(0, 0, 0), (128, 128));
        let (u, v) = limited.chroma(255, 255, 255);
        assert!((u - 128).abs() <= 1 && (v - 128).abs() <= 1);

        let full = ColorMatrix::new(Colorspace::Rec601, ColorRange::Full, 8);
        assert_eq!(full.luma(0, 0, 0), 0);
        assert_eq!(full.luma(255, 255, 255), 255);

        let ten_bit = ColorMatrix::new(Colorspace::Rec2020, ColorRange::Limited, 10);
        assert_eq!(ten_bit.luma(0, 0, 0), 64);
        assert_eq!(ten_bit.luma(255, 255, 255), 940);
        assert_eq!(ten_bit.chroma(0, 0, 0), (512, 512));
    }

    #[test]
    fn test_primary_colours() {
        let m = ColorMatrix::new(Colorspace::Rec601, ColorRange::Full, 8);
        // Pure blue saturates Cb, pure red saturates Cr
        let (u, _) = m.chroma(0, 0, 255);
        assert!(u >= 254);
        let (_, v) = m.chroma(255, 0, 0);
        assert!(v >= 254);
        // Green has the largest luma weight
        assert!(m.luma(0, 255, 0) > m.luma(255, 0, 0));
        assert!(m.luma(255, 0, 0) > m.luma(0, 0, 255));
    }

    #[test]
    fn test_table_indexing() {
        let table = ColorMatrix::table(8);
        for colorspace in Colorspace::ALL {
            for range in [ColorRange::Limited, ColorRange::Full] {
                assert_eq!(
                    table[ColorMatrix::index(colorspace, range)],
                    ColorMatrix::new(colorspace, range, 8)
                );
            }
        }
    }
}
