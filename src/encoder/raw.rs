//! Raw reference codecs
//!
//! Intra-only software encoders producing structurally valid Annex-B access
//! units: parameter sets on keyframes (4-byte start codes), then one slice
//! behind a 3-byte start code whose payload is a digest of the frame. The
//! output cannot be decoded into pictures, but it has the framing, parameter
//! sets and keyframe structure of real encoder output, which is what the
//! pipeline (and its bitstream patcher) cares about.
//!
//! Used where no hardware encoder exists: tests, the demo binary and
//! descriptor probing.

use std::collections::VecDeque;

use bytes::{BufMut, Bytes, BytesMut};

use super::config::VideoFormat;
use super::native::{CodecBackend, CodecParams, EncodedPacket, NativeEncoder, NativeError, Receive};
use crate::bitstream::{escape, BitWriter};
use crate::frame::VideoFrame;

/// Native name of the raw H.264 codec
pub const RAW_H264: &str = "raw_h264";
/// Native name of the raw HEVC codec
pub const RAW_HEVC: &str = "raw_hevc";

const START_CODE_4: [u8; 4] = [0, 0, 0, 1];
const START_CODE_3: [u8; 3] = [0, 0, 1];

/// `-EINVAL`, as native libraries report invalid input
const EINVAL: i32 = -22;

fn align(value: u32, to: u32) -> u32 {
    value.div_ceil(to) * to
}

fn nal(header: &[u8], w: BitWriter) -> Vec<u8> {
    let mut out = header.to_vec();
    out.extend(escape(&w.into_bytes()));
    out
}

// =============================================================================
// H.264 parameter sets
// =============================================================================

/// High profile SPS without VUI (header byte included, no start code)
pub fn h264_sps(width: u32, height: u32, refs: u32) -> Vec<u8> {
    let (aligned_w, aligned_h) = (align(width, 16), align(height, 16));
    let mut w = BitWriter::new();
    w.write_bits(100, 8); // profile_idc High
    w.write_bits(0, 8); // constraint flags
    w.write_bits(if aligned_w * aligned_h > 1920 * 1088 { 51 } else { 41 }, 8);
    w.write_ue(0); // seq_parameter_set_id
    w.write_ue(1); // chroma_format_idc 4:2:0
    w.write_ue(0); // bit_depth_luma_minus8
    w.write_ue(0); // bit_depth_chroma_minus8
    w.write_flag(false); // qpprime_y_zero_transform_bypass_flag
    w.write_flag(false); // seq_scaling_matrix_present_flag
    w.write_ue(0); // log2_max_frame_num_minus4
    w.write_ue(2); // pic_order_cnt_type
    w.write_ue(refs); // max_num_ref_frames
    w.write_flag(false); // gaps_in_frame_num_value_allowed_flag
    w.write_ue(aligned_w / 16 - 1);
    w.write_ue(aligned_h / 16 - 1);
    w.write_flag(true); // frame_mbs_only_flag
    w.write_flag(true); // direct_8x8_inference_flag
    let cropped = aligned_w != width || aligned_h != height;
    w.write_flag(cropped);
    if cropped {
        w.write_ue(0);
        w.write_ue((aligned_w - width) / 2);
        w.write_ue(0);
        w.write_ue((aligned_h - height) / 2);
    }
    w.write_flag(false); // vui_parameters_present_flag
    w.write_trailing_bits();
    nal(&[0x67], w)
}

fn h264_pps() -> Vec<u8> {
    let mut w = BitWriter::new();
    w.write_ue(0); // pic_parameter_set_id
    w.write_ue(0); // seq_parameter_set_id
    w.write_flag(false); // entropy_coding_mode_flag
    w.write_flag(false); // bottom_field_pic_order_in_frame_present_flag
    w.write_ue(0); // num_slice_groups_minus1
    w.write_ue(0); // num_ref_idx_l0_default_active_minus1
    w.write_ue(0); // num_ref_idx_l1_default_active_minus1
    w.write_flag(false); // weighted_pred_flag
    w.write_bits(0, 2); // weighted_bipred_idc
    w.write_se(0); // pic_init_qp_minus26
    w.write_se(0); // pic_init_qs_minus26
    w.write_se(0); // chroma_qp_index_offset
    w.write_flag(true); // deblocking_filter_control_present_flag
    w.write_flag(false); // constrained_intra_pred_flag
    w.write_flag(false); // redundant_pic_cnt_present_flag
    w.write_trailing_bits();
    nal(&[0x68], w)
}

// =============================================================================
// HEVC parameter sets
// =============================================================================

fn hevc_profile_tier_level(w: &mut BitWriter, ten_bit: bool) {
    let profile_idc = if ten_bit { 2 } else { 1 };
    w.write_bits(0, 2); // general_profile_space
    w.write_flag(false); // general_tier_flag
    w.write_bits(profile_idc, 5);
    for j in 0..32 {
        // Main streams are also Main 10 compatible
        w.write_flag(j == profile_idc || j == 2);
    }
    w.write_flag(true); // general_progressive_source_flag
    w.write_flag(false); // general_interlaced_source_flag
    w.write_flag(false); // general_non_packed_constraint_flag
    w.write_flag(true); // general_frame_only_constraint_flag
    w.write_bits(0, 28);
    w.write_bits(0, 16);
    w.write_bits(123, 8); // general_level_idc: 4.1
}

/// HEVC VPS (2-byte header included, no start code)
pub fn hevc_vps(ten_bit: bool) -> Vec<u8> {
    let mut w = BitWriter::new();
    w.write_bits(0, 4); // vps_video_parameter_set_id
    w.write_bits(3, 2); // base layer internal + available
    w.write_bits(0, 6); // vps_max_layers_minus1
    w.write_bits(0, 3); // vps_max_sub_layers_minus1
    w.write_flag(true); // vps_temporal_id_nesting_flag
    w.write_bits(0xffff, 16);
    hevc_profile_tier_level(&mut w, ten_bit);
    w.write_flag(true); // vps_sub_layer_ordering_info_present_flag
    w.write_ue(1); // vps_max_dec_pic_buffering_minus1
    w.write_ue(0); // vps_max_num_reorder_pics
    w.write_ue(0); // vps_max_latency_increase_plus1
    w.write_bits(0, 6); // vps_max_layer_id
    w.write_ue(0); // vps_num_layer_sets_minus1
    w.write_flag(false); // vps_timing_info_present_flag
    w.write_flag(false); // vps_extension_flag
    w.write_trailing_bits();
    nal(&[0x40, 0x01], w)
}

/// HEVC SPS without VUI (2-byte header included, no start code)
pub fn hevc_sps(width: u32, height: u32, ten_bit: bool, refs: u32) -> Vec<u8> {
    let (aligned_w, aligned_h) = (align(width, 8), align(height, 8));
    let mut w = BitWriter::new();
    w.write_bits(0, 4); // sps_video_parameter_set_id
    w.write_bits(0, 3); // sps_max_sub_layers_minus1
    w.write_flag(true); // sps_temporal_id_nesting_flag
    hevc_profile_tier_level(&mut w, ten_bit);
    w.write_ue(0); // sps_seq_parameter_set_id
    w.write_ue(1); // chroma_format_idc 4:2:0
    w.write_ue(aligned_w);
    w.write_ue(aligned_h);
    let cropped = aligned_w != width || aligned_h != height;
    w.write_flag(cropped);
    if cropped {
        w.write_ue(0);
        w.write_ue((aligned_w - width) / 2);
        w.write_ue(0);
        w.write_ue((aligned_h - height) / 2);
    }
    let depth = if ten_bit { 2 } else { 0 };
    w.write_ue(depth); // bit_depth_luma_minus8
    w.write_ue(depth); // bit_depth_chroma_minus8
    w.write_ue(4); // log2_max_pic_order_cnt_lsb_minus4
    w.write_flag(true); // sps_sub_layer_ordering_info_present_flag
    w.write_ue(refs.max(1)); // sps_max_dec_pic_buffering_minus1
    w.write_ue(0); // sps_max_num_reorder_pics
    w.write_ue(0); // sps_max_latency_increase_plus1
    w.write_ue(0); // log2_min_luma_coding_block_size_minus3
    w.write_ue(2); // log2_diff_max_min_luma_coding_block_size
    w.write_ue(0); // log2_min_luma_transform_block_size_minus2
    w.write_ue(3); // log2_diff_max_min_luma_transform_block_size
    w.write_ue(0); // max_transform_hierarchy_depth_inter
    w.write_ue(0); // max_transform_hierarchy_depth_intra
    w.write_flag(false); // scaling_list_enabled_flag
    w.write_flag(false); // amp_enabled_flag
    w.write_flag(false); // sample_adaptive_offset_enabled_flag
    w.write_flag(false); // pcm_enabled_flag
    w.write_ue(1); // num_short_term_ref_pic_sets
    w.write_ue(1); // num_negative_pics
    w.write_ue(0); // num_positive_pics
    w.write_ue(0); // delta_poc_s0_minus1
    w.write_flag(true); // used_by_curr_pic_s0_flag
    w.write_flag(false); // long_term_ref_pics_present_flag
    w.write_flag(false); // sps_temporal_mvp_enabled_flag
    w.write_flag(false); // strong_intra_smoothing_enabled_flag
    w.write_flag(false); // vui_parameters_present_flag
    w.write_flag(false); // sps_extension_present_flag
    w.write_trailing_bits();
    nal(&[0x42, 0x01], w)
}

fn hevc_pps() -> Vec<u8> {
    let mut w = BitWriter::new();
    w.write_ue(0); // pps_pic_parameter_set_id
    w.write_ue(0); // pps_seq_parameter_set_id
    w.write_flag(false); // dependent_slice_segments_enabled_flag
    w.write_flag(false); // output_flag_present_flag
    w.write_bits(0, 3); // num_extra_slice_header_bits
    w.write_flag(false); // sign_data_hiding_enabled_flag
    w.write_flag(false); // cabac_init_present_flag
    w.write_ue(0); // num_ref_idx_l0_default_active_minus1
    w.write_ue(0); // num_ref_idx_l1_default_active_minus1
    w.write_se(0); // init_qp_minus26
    w.write_flag(false); // constrained_intra_pred_flag
    w.write_flag(false); // transform_skip_enabled_flag
    w.write_flag(false); // cu_qp_delta_enabled_flag
    w.write_se(0); // pps_cb_qp_offset
    w.write_se(0); // pps_cr_qp_offset
    w.write_flag(false); // pps_slice_chroma_qp_offsets_present_flag
    w.write_flag(false); // weighted_pred_flag
    w.write_flag(false); // weighted_bipred_flag
    w.write_flag(false); // transquant_bypass_enabled_flag
    w.write_flag(false); // tiles_enabled_flag
    w.write_flag(false); // entropy_coding_sync_enabled_flag
    w.write_flag(true); // pps_loop_filter_across_slices_enabled_flag
    w.write_flag(false); // deblocking_filter_control_present_flag
    w.write_flag(false); // pps_scaling_list_data_present_flag
    w.write_flag(false); // lists_modification_present_flag
    w.write_ue(0); // log2_parallel_merge_level_minus2
    w.write_flag(false); // slice_segment_header_extension_present_flag
    w.write_flag(false); // pps_extension_present_flag
    w.write_trailing_bits();
    nal(&[0x44, 0x01], w)
}

// =============================================================================
// Encoder
// =============================================================================

/// FNV-1a over the frame planes
fn digest(data: &[u8]) -> u64 {
    data.iter().fold(0xcbf2_9ce4_8422_2325, |hash, &byte| {
        (hash ^ byte as u64).wrapping_mul(0x0000_0100_0000_01b3)
    })
}

/// One raw encoder instance
#[derive(Debug)]
pub struct RawEncoder {
    codec: VideoFormat,
    params: CodecParams,
    parameter_sets: Vec<Vec<u8>>,
    pending: VecDeque<EncodedPacket>,
    frames: u64,
}

impl RawEncoder {
    pub fn new(codec: VideoFormat, params: &CodecParams) -> Result<Self, NativeError> {
        if params.width == 0 || params.height == 0 {
            return Err(NativeError::new(
                EINVAL,
                format!("invalid dimensions {}x{}", params.width, params.height),
            ));
        }
        if params.max_b_frames != 0 {
            return Err(NativeError::new(EINVAL, "B-frames not supported"));
        }

        let ten_bit = params.sw_pix_fmt.is_high_bit_depth();
        let parameter_sets = match codec {
            VideoFormat::H264 => {
                if ten_bit {
                    return Err(NativeError::new(EINVAL, "H.264 is 8-bit only"));
                }
                vec![h264_sps(params.width, params.height, params.refs), h264_pps()]
            }
            VideoFormat::Hevc => vec![
                hevc_vps(ten_bit),
                hevc_sps(params.width, params.height, ten_bit, params.refs),
                hevc_pps(),
            ],
        };

        Ok(Self {
            codec,
            params: params.clone(),
            parameter_sets,
            pending: VecDeque::new(),
            frames: 0,
        })
    }

    fn access_unit(&self, frame: &VideoFrame, keyframe: bool) -> Bytes {
        let mut out = BytesMut::with_capacity(256);
        if keyframe {
            for set in &self.parameter_sets {
                out.put_slice(&START_CODE_4);
                out.put_slice(set);
            }
        }

        let header: &[u8] = match (self.codec, keyframe) {
            (VideoFormat::H264, true) => &[0x65],
            (VideoFormat::H264, false) => &[0x41],
            (VideoFormat::Hevc, true) => &[0x28, 0x01],
            (VideoFormat::Hevc, false) => &[0x02, 0x01],
        };
        let mut payload = Vec::with_capacity(17);
        payload.extend_from_slice(&frame.pts.to_be_bytes());
        payload.extend_from_slice(&digest(&frame.data).to_be_bytes());
        payload.push(0x80); // rbsp_stop_one_bit

        out.put_slice(&START_CODE_3);
        out.put_slice(header);
        out.put_slice(&escape(&payload));
        out.freeze()
    }
}

impl NativeEncoder for RawEncoder {
    fn send_frame(&mut self, frame: &VideoFrame) -> Result<(), NativeError> {
        if frame.width != self.params.width || frame.height != self.params.height {
            return Err(NativeError::new(
                EINVAL,
                format!(
                    "frame {}x{} does not match encoder {}x{}",
                    frame.width, frame.height, self.params.width, self.params.height
                ),
            ));
        }
        if frame.format != self.params.sw_pix_fmt {
            return Err(NativeError::new(
                EINVAL,
                format!("frame format {} != {}", frame.format, self.params.sw_pix_fmt),
            ));
        }

        let keyframe = self.frames == 0 || frame.force_keyframe;
        let data = self.access_unit(frame, keyframe);
        self.pending.push_back(EncodedPacket {
            data,
            pts: frame.pts,
            keyframe,
        });
        self.frames += 1;
        Ok(())
    }

    fn receive_packet(&mut self) -> Receive {
        match self.pending.pop_front() {
            Some(packet) => Receive::Packet(packet),
            None => Receive::Again,
        }
    }
}

/// Codec backend serving the raw codecs
#[derive(Debug, Default, Clone, Copy)]
pub struct RawCodecBackend;

impl CodecBackend for RawCodecBackend {
    fn has_encoder(&self, name: &str) -> bool {
        matches!(name, RAW_H264 | RAW_HEVC)
    }

    fn open(&self, name: &str, params: &CodecParams) -> Result<Box<dyn NativeEncoder>, NativeError> {
        let codec = match name {
            RAW_H264 => VideoFormat::H264,
            RAW_HEVC => VideoFormat::Hevc,
            other => return Err(NativeError::new(EINVAL, format!("unknown encoder {}", other))),
        };
        Ok(Box::new(RawEncoder::new(codec, params)?))
    }
}
