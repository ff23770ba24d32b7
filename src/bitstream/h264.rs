//! H.264 sequence parameter set rewriting
//!
//! The rewritten SPS keeps every field up to `vui_parameters_present_flag`
//! and replaces whatever VUI the encoder produced with one that carries the
//! session's colour description and a bitstream restriction announcing zero
//! reordering, so decoders can output each picture as soon as it arrives.

use super::error::{BitstreamError, BitstreamResult};
use super::rbsp::{escape, unescape, Transcriber};
use super::VideoSignal;

/// NAL unit type of a sequence parameter set
pub const NAL_SPS: u8 = 7;
/// NAL unit type of a picture parameter set
pub const NAL_PPS: u8 = 8;
/// NAL unit type of an IDR slice
pub const NAL_IDR_SLICE: u8 = 5;
/// NAL unit type of a non-IDR slice
pub const NAL_SLICE: u8 = 1;

/// Profiles whose SPS carries chroma format and bit depth fields
const HIGH_PROFILES: [u32; 12] = [100, 110, 122, 244, 44, 83, 86, 118, 128, 138, 139, 134];

/// `nal_unit_type` from the first header byte
pub fn nal_type(header: u8) -> u8 {
    header & 0x1f
}

/// Rewrite an SPS NAL unit (header byte included, no start code)
pub fn rewrite_sps(nal: &[u8], signal: &VideoSignal) -> BitstreamResult<Vec<u8>> {
    let (&header, payload) = nal
        .split_first()
        .ok_or(BitstreamError::Truncated { nal: "SPS", bit: 0 })?;
    let rbsp = unescape(payload);
    let mut t = Transcriber::new(&rbsp, "SPS");

    let profile_idc = t.copy_bits(8)?;
    t.copy_bits(8)?; // constraint_set flags + reserved
    t.copy_bits(8)?; // level_idc
    t.copy_ue()?; // seq_parameter_set_id

    if HIGH_PROFILES.contains(&profile_idc) {
        let chroma_format_idc = t.copy_ue()?;
        if chroma_format_idc == 3 {
            t.copy_flag()?; // separate_colour_plane_flag
        }
        t.copy_ue()?; // bit_depth_luma_minus8
        t.copy_ue()?; // bit_depth_chroma_minus8
        t.copy_flag()?; // qpprime_y_zero_transform_bypass_flag
        if t.copy_flag()? {
            let lists = if chroma_format_idc == 3 { 12 } else { 8 };
            for i in 0..lists {
                if t.copy_flag()? {
                    copy_scaling_list(&mut t, if i < 6 { 16 } else { 64 })?;
                }
            }
        }
    }

    t.copy_ue()?; // log2_max_frame_num_minus4
    match t.copy_ue()? {
        0 => {
            t.copy_ue()?; // log2_max_pic_order_cnt_lsb_minus4
        }
        1 => {
            t.copy_flag()?;
            t.copy_se()?;
            t.copy_se()?;
            let cycle = t.copy_ue()?;
            for _ in 0..cycle {
                t.copy_se()?;
            }
        }
        _ => {}
    }

    let max_num_ref_frames = t.copy_ue()?;
    t.copy_flag()?; // gaps_in_frame_num_value_allowed_flag
    t.copy_ue()?; // pic_width_in_mbs_minus1
    t.copy_ue()?; // pic_height_in_map_units_minus1
    if !t.copy_flag()? {
        t.copy_flag()?; // mb_adaptive_frame_field_flag
    }
    t.copy_flag()?; // direct_8x8_inference_flag
    if t.copy_flag()? {
        for _ in 0..4 {
            t.copy_ue()?;
        }
    }

    // Old VUI (if any) is the tail of the SPS and is dropped wholesale.
    t.reader.read_bit()?;
    t.writer.write_flag(true);
    write_vui(&mut t, signal, max_num_ref_frames);
    t.writer.write_trailing_bits();

    let mut out = Vec::with_capacity(nal.len() + 16);
    out.push(header);
    out.extend(escape(&t.finish()));
    Ok(out)
}

fn copy_scaling_list(t: &mut Transcriber<'_>, size: usize) -> BitstreamResult<()> {
    let mut last = 8i32;
    let mut next = 8i32;
    for _ in 0..size {
        if next != 0 {
            let delta = t.copy_se()?;
            next = (last + delta + 256) % 256;
        }
        if next != 0 {
            last = next;
        }
    }
    Ok(())
}

fn write_vui(t: &mut Transcriber<'_>, signal: &VideoSignal, max_num_ref_frames: u32) {
    let w = &mut t.writer;
    w.write_flag(false); // aspect_ratio_info_present_flag
    w.write_flag(false); // overscan_info_present_flag

    w.write_flag(true); // video_signal_type_present_flag
    w.write_bits(5, 3); // video_format: unspecified
    w.write_flag(signal.full_range);
    w.write_flag(true); // colour_description_present_flag
    w.write_bits(signal.colour_primaries as u32, 8);
    w.write_bits(signal.transfer_characteristics as u32, 8);
    w.write_bits(signal.matrix_coefficients as u32, 8);

    w.write_flag(false); // chroma_loc_info_present_flag
    w.write_flag(false); // timing_info_present_flag
    w.write_flag(false); // nal_hrd_parameters_present_flag
    w.write_flag(false); // vcl_hrd_parameters_present_flag
    w.write_flag(false); // pic_struct_present_flag

    w.write_flag(true); // bitstream_restriction_flag
    w.write_flag(true); // motion_vectors_over_pic_boundaries_flag
    w.write_ue(0); // max_bytes_per_pic_denom
    w.write_ue(0); // max_bits_per_mb_denom
    w.write_ue(16); // log2_max_mv_length_horizontal
    w.write_ue(16); // log2_max_mv_length_vertical
    w.write_ue(0); // max_num_reorder_frames
    w.write_ue(max_num_ref_frames); // max_dec_frame_buffering
}
