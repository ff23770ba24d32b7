//! Encoder capability descriptors
//!
//! A [`CapabilityDescriptor`] describes one encoder family (a hardware
//! vendor's encoder, or a software codec): which codec profiles it offers,
//! which pixel formats it consumes and how a hardware context is created
//! for it. Descriptors are probed once at startup and then shared read-only
//! by every session.

use std::fmt;

use enumflags2::{bitflags, BitFlags};

use super::config::{SessionConfig, VideoFormat};
use super::error::{EncodeResult, EncoderError};
use crate::device::ConversionDevice;
use crate::frame::{HwDeviceContext, PixelFormat};

/// Memory a descriptor's encoder reads frames from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceType {
    /// System memory, software encoder
    Software,
    /// Direct3D 11 textures
    D3d11,
    /// CUDA device memory
    Cuda,
    /// VA-API surfaces
    Vaapi,
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Software => "software",
            Self::D3d11 => "d3d11",
            Self::Cuda => "cuda",
            Self::Vaapi => "vaapi",
        };
        f.write_str(name)
    }
}

/// Per-profile capabilities
#[bitflags]
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileFlag {
    /// Profile was opened successfully during probing
    Passed = 1 << 0,
    /// Honour the client's reference frame count
    RefFramesRestrict = 1 << 1,
    /// Encoder picks the reference frame count itself
    RefFramesAutoselect = 1 << 2,
    /// Multiple slices per frame
    Slice = 1 << 3,
    /// Constant bitrate rate control
    Cbr = 1 << 4,
    /// 10-bit HDR output
    DynamicRange = 1 << 5,
    /// Parameter sets already carry a usable VUI
    VuiParameters = 1 << 6,
    /// IDR slices already use 4-byte start codes
    NaluPrefix5b = 1 << 7,
}

/// Descriptor-wide capabilities
#[bitflags]
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorFlag {
    /// Encoder rejects unbounded GOP lengths
    LimitedGopSize = 1 << 0,
}

/// Native profile identifiers passed to the encoder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProfileIds {
    pub h264_high: i32,
    pub hevc_main: i32,
    pub hevc_main_10: i32,
}

/// One codec of a descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecProfile {
    /// Native encoder name
    pub name: String,
    /// Encoder private options
    pub options: Vec<(String, String)>,
    /// Option carrying the constant quantizer, if the encoder has one
    pub qp: Option<String>,
    pub flags: BitFlags<ProfileFlag>,
}

impl CodecProfile {
    pub fn new(name: &str, flags: BitFlags<ProfileFlag>) -> Self {
        Self {
            name: name.to_string(),
            options: Vec::new(),
            qp: None,
            flags,
        }
    }

    pub fn with_option(mut self, key: &str, value: &str) -> Self {
        self.options.push((key.to_string(), value.to_string()));
        self
    }

    pub fn with_qp(mut self, option: &str) -> Self {
        self.qp = Some(option.to_string());
        self
    }

    #[inline]
    pub fn has(&self, flag: ProfileFlag) -> bool {
        self.flags.contains(flag)
    }
}

/// Builds the native hardware device context for a bound conversion device
pub type HwContextFactory = fn(&dyn ConversionDevice) -> EncodeResult<HwDeviceContext>;

/// Wrap the conversion device's native handle in a device context
pub fn device_handle_context(device: &dyn ConversionDevice) -> EncodeResult<HwDeviceContext> {
    let handle = device.native_handle().ok_or_else(|| {
        EncoderError::HwContextFailed(format!("{} device has no native handle", device.name()))
    })?;
    Ok(HwDeviceContext {
        device_type: device.device_type(),
        handle,
    })
}

/// Immutable description of an encoder family
#[derive(Clone)]
pub struct CapabilityDescriptor {
    pub name: String,
    pub device_type: DeviceType,
    pub profiles: ProfileIds,
    /// Surface format the encoder consumes when hardware backed
    pub dev_pix_fmt: PixelFormat,
    /// Software format for SDR sessions
    pub static_pix_fmt: PixelFormat,
    /// Software format for HDR sessions
    pub dynamic_pix_fmt: PixelFormat,
    pub h264: CodecProfile,
    pub hevc: CodecProfile,
    pub flags: BitFlags<DescriptorFlag>,
    pub hw_context: Option<HwContextFactory>,
}

impl fmt::Debug for CapabilityDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityDescriptor")
            .field("name", &self.name)
            .field("device_type", &self.device_type)
            .field("h264", &self.h264)
            .field("hevc", &self.hevc)
            .field("flags", &self.flags)
            .field("hw_context", &self.hw_context.is_some())
            .finish()
    }
}

impl PartialEq for CapabilityDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.device_type == other.device_type
            && self.profiles == other.profiles
            && self.dev_pix_fmt == other.dev_pix_fmt
            && self.static_pix_fmt == other.static_pix_fmt
            && self.dynamic_pix_fmt == other.dynamic_pix_fmt
            && self.h264 == other.h264
            && self.hevc == other.hevc
            && self.flags == other.flags
            && self.hw_context.is_some() == other.hw_context.is_some()
    }
}

impl CapabilityDescriptor {
    /// Built-in software descriptor backed by the raw codecs
    pub fn software() -> Self {
        let flags = ProfileFlag::RefFramesRestrict
            | ProfileFlag::RefFramesAutoselect
            | ProfileFlag::Slice
            | ProfileFlag::Cbr
            | ProfileFlag::DynamicRange;
        Self {
            name: "software".to_string(),
            device_type: DeviceType::Software,
            profiles: ProfileIds {
                h264_high: 100,
                hevc_main: 1,
                hevc_main_10: 2,
            },
            dev_pix_fmt: PixelFormat::Nv12,
            static_pix_fmt: PixelFormat::Nv12,
            dynamic_pix_fmt: PixelFormat::P010,
            h264: CodecProfile::new(super::raw::RAW_H264, flags).with_qp("qp"),
            hevc: CodecProfile::new(super::raw::RAW_HEVC, flags).with_qp("qp"),
            flags: BitFlags::empty(),
            hw_context: None,
        }
    }

    /// NVIDIA NVENC through CUDA device memory
    pub fn nvenc() -> Self {
        let flags = ProfileFlag::RefFramesRestrict
            | ProfileFlag::RefFramesAutoselect
            | ProfileFlag::Cbr
            | ProfileFlag::DynamicRange;
        Self {
            name: "nvenc".to_string(),
            device_type: DeviceType::Cuda,
            profiles: ProfileIds {
                h264_high: 100,
                hevc_main: 1,
                hevc_main_10: 2,
            },
            dev_pix_fmt: PixelFormat::Nv12,
            static_pix_fmt: PixelFormat::Nv12,
            dynamic_pix_fmt: PixelFormat::P010,
            h264: CodecProfile::new("h264_nvenc", flags)
                .with_option("forced-idr", "1")
                .with_option("zerolatency", "1")
                .with_option("preset", "p4")
                .with_option("rc", "cbr")
                .with_qp("qp"),
            hevc: CodecProfile::new("hevc_nvenc", flags)
                .with_option("forced-idr", "1")
                .with_option("zerolatency", "1")
                .with_option("preset", "p4")
                .with_option("rc", "cbr")
                .with_qp("qp"),
            flags: BitFlags::empty(),
            hw_context: Some(device_handle_context),
        }
    }

    /// AMD AMF through Direct3D 11 textures
    pub fn amf() -> Self {
        let flags = ProfileFlag::RefFramesRestrict | ProfileFlag::Cbr | ProfileFlag::VuiParameters;
        Self {
            name: "amdvce".to_string(),
            device_type: DeviceType::D3d11,
            profiles: ProfileIds {
                h264_high: 100,
                hevc_main: 1,
                hevc_main_10: 2,
            },
            dev_pix_fmt: PixelFormat::Nv12,
            static_pix_fmt: PixelFormat::Nv12,
            dynamic_pix_fmt: PixelFormat::P010,
            h264: CodecProfile::new("h264_amf", flags)
                .with_option("usage", "ultralowlatency")
                .with_option("quality", "speed")
                .with_qp("qp_p"),
            hevc: CodecProfile::new("hevc_amf", flags)
                .with_option("usage", "ultralowlatency")
                .with_option("quality", "speed")
                .with_qp("qp_p"),
            flags: DescriptorFlag::LimitedGopSize.into(),
            hw_context: Some(device_handle_context),
        }
    }

    /// Whether frames are handed to the encoder in device memory
    pub fn is_hardware(&self) -> bool {
        self.device_type != DeviceType::Software
    }

    pub fn has(&self, flag: DescriptorFlag) -> bool {
        self.flags.contains(flag)
    }

    /// Profile for a codec
    pub fn profile(&self, format: VideoFormat) -> &CodecProfile {
        match format {
            VideoFormat::H264 => &self.h264,
            VideoFormat::Hevc => &self.hevc,
        }
    }

    /// Native profile id for a session
    pub fn profile_id(&self, config: &SessionConfig) -> i32 {
        match (config.video_format, config.dynamic_range) {
            (VideoFormat::H264, _) => self.profiles.h264_high,
            (VideoFormat::Hevc, false) => self.profiles.hevc_main,
            (VideoFormat::Hevc, true) => self.profiles.hevc_main_10,
        }
    }

    /// Software pixel format for a session's dynamic range
    pub fn sw_pix_fmt(&self, dynamic_range: bool) -> PixelFormat {
        if dynamic_range {
            self.dynamic_pix_fmt
        } else {
            self.static_pix_fmt
        }
    }

    /// Whether the descriptor can serve anything at all
    pub fn is_usable(&self) -> bool {
        self.h264.has(ProfileFlag::Passed)
    }
}
