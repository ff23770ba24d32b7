//! HEVC video/sequence parameter set rewriting
//!
//! Both parameter sets get `general_profile_compatibility_flag[4]` set, which
//! some decoders require before they accept Main 10 streams produced by
//! hardware encoders. An SPS without VUI additionally gains one carrying the
//! colour description and a bitstream restriction. An SPS that already has a
//! VUI keeps it: unlike H.264 the VUI is followed by extension data, so it is
//! copied through rather than regenerated.

use super::error::{BitstreamError, BitstreamResult};
use super::rbsp::{escape, unescape, Transcriber};
use super::VideoSignal;

/// NAL unit type of a video parameter set
pub const NAL_VPS: u8 = 32;
/// NAL unit type of a sequence parameter set
pub const NAL_SPS: u8 = 33;
/// NAL unit type of a picture parameter set
pub const NAL_PPS: u8 = 34;
/// NAL unit type of an IDR slice without leading pictures
pub const NAL_IDR_N_LP: u8 = 20;
/// NAL unit type of a trailing (non-IDR) slice
pub const NAL_TRAIL_R: u8 = 1;

const COMPATIBILITY_FLAG: usize = 4;

/// `nal_unit_type` from the first header byte
pub fn nal_type(header: u8) -> u8 {
    (header >> 1) & 0x3f
}

fn split_header(nal: &[u8], name: &'static str) -> BitstreamResult<([u8; 2], Vec<u8>)> {
    match nal {
        [a, b, payload @ ..] => Ok(([*a, *b], unescape(payload))),
        _ => Err(BitstreamError::Truncated { nal: name, bit: 0 }),
    }
}

fn join_header(header: [u8; 2], rbsp: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(rbsp.len() + 8);
    out.extend_from_slice(&header);
    out.extend(escape(rbsp));
    out
}

/// Rewrite a VPS NAL unit (2-byte header included, no start code)
pub fn rewrite_vps(nal: &[u8]) -> BitstreamResult<Vec<u8>> {
    let (header, rbsp) = split_header(nal, "VPS")?;
    let mut t = Transcriber::new(&rbsp, "VPS");

    t.copy_bits(4)?; // vps_video_parameter_set_id
    t.copy_bits(2)?; // base layer flags
    t.copy_bits(6)?; // vps_max_layers_minus1
    let max_sub_layers_minus1 = t.copy_bits(3)?;
    t.copy_bits(1)?; // vps_temporal_id_nesting_flag
    t.copy_bits(16)?; // vps_reserved_0xffff_16bits
    copy_profile_tier_level(&mut t, max_sub_layers_minus1)?;
    t.copy_to_stop_bit()?;

    Ok(join_header(header, &t.finish()))
}

/// Rewrite an SPS NAL unit (2-byte header included, no start code)
pub fn rewrite_sps(nal: &[u8], signal: &VideoSignal) -> BitstreamResult<Vec<u8>> {
    let (header, rbsp) = split_header(nal, "SPS")?;
    let mut t = Transcriber::new(&rbsp, "SPS");

    t.copy_bits(4)?; // sps_video_parameter_set_id
    let max_sub_layers_minus1 = t.copy_bits(3)?;
    t.copy_bits(1)?; // sps_temporal_id_nesting_flag
    copy_profile_tier_level(&mut t, max_sub_layers_minus1)?;

    t.copy_ue()?; // sps_seq_parameter_set_id
    if t.copy_ue()? == 3 {
        t.copy_flag()?; // separate_colour_plane_flag
    }
    t.copy_ue()?; // pic_width_in_luma_samples
    t.copy_ue()?; // pic_height_in_luma_samples
    if t.copy_flag()? {
        for _ in 0..4 {
            t.copy_ue()?; // conformance window offsets
        }
    }
    t.copy_ue()?; // bit_depth_luma_minus8
    t.copy_ue()?; // bit_depth_chroma_minus8
    let log2_max_poc_lsb_minus4 = t.copy_ue()?;
    if log2_max_poc_lsb_minus4 > 12 {
        return Err(BitstreamError::InvalidField {
            nal: "SPS",
            field: "log2_max_pic_order_cnt_lsb_minus4",
            value: log2_max_poc_lsb_minus4,
        });
    }
    let log2_max_poc_lsb = log2_max_poc_lsb_minus4 + 4;

    let ordering_info_present = t.copy_flag()?;
    let first = if ordering_info_present {
        0
    } else {
        max_sub_layers_minus1
    };
    for _ in first..=max_sub_layers_minus1 {
        t.copy_ue()?; // sps_max_dec_pic_buffering_minus1
        t.copy_ue()?; // sps_max_num_reorder_pics
        t.copy_ue()?; // sps_max_latency_increase_plus1
    }

    for _ in 0..6 {
        t.copy_ue()?; // block size and transform hierarchy fields
    }
    if t.copy_flag()? && t.copy_flag()? {
        copy_scaling_list_data(&mut t)?;
    }
    t.copy_flag()?; // amp_enabled_flag
    t.copy_flag()?; // sample_adaptive_offset_enabled_flag
    if t.copy_flag()? {
        t.copy_bits(4)?;
        t.copy_bits(4)?;
        t.copy_ue()?;
        t.copy_ue()?;
        t.copy_flag()?; // pcm_loop_filter_disabled_flag
    }

    let num_short_term_ref_pic_sets = t.copy_ue()?;
    if num_short_term_ref_pic_sets > 64 {
        return Err(BitstreamError::InvalidField {
            nal: "SPS",
            field: "num_short_term_ref_pic_sets",
            value: num_short_term_ref_pic_sets,
        });
    }
    let mut num_delta_pocs = Vec::with_capacity(num_short_term_ref_pic_sets as usize);
    for idx in 0..num_short_term_ref_pic_sets as usize {
        let count = copy_st_ref_pic_set(&mut t, idx, &num_delta_pocs)?;
        num_delta_pocs.push(count);
    }

    if t.copy_flag()? {
        let num_long_term = t.copy_ue()?;
        for _ in 0..num_long_term {
            t.copy_bits(log2_max_poc_lsb)?;
            t.copy_flag()?;
        }
    }
    t.copy_flag()?; // sps_temporal_mvp_enabled_flag
    t.copy_flag()?; // strong_intra_smoothing_enabled_flag

    let has_vui = t.reader.read_bit()? == 1;
    t.writer.write_flag(true);
    if !has_vui {
        write_vui(&mut t, signal);
    }
    t.copy_to_stop_bit()?;
    Ok(join_header(header, &t.finish()))
}

fn copy_profile_tier_level(
    t: &mut Transcriber<'_>,
    max_sub_layers_minus1: u32,
) -> BitstreamResult<()> {
    t.copy_bits(2)?; // general_profile_space
    t.copy_bits(1)?; // general_tier_flag
    t.copy_bits(5)?; // general_profile_idc
    for j in 0..32 {
        let flag = t.reader.read_bit()?;
        t.writer
            .write_bit(if j == COMPATIBILITY_FLAG { 1 } else { flag });
    }
    t.copy_bits(32)?; // source flags + first 28 constraint bits
    t.copy_bits(16)?; // remaining constraint bits + inbld
    t.copy_bits(8)?; // general_level_idc

    let mut profile_present = Vec::with_capacity(max_sub_layers_minus1 as usize);
    let mut level_present = Vec::with_capacity(max_sub_layers_minus1 as usize);
    for _ in 0..max_sub_layers_minus1 {
        profile_present.push(t.copy_flag()?);
        level_present.push(t.copy_flag()?);
    }
    if max_sub_layers_minus1 > 0 {
        for _ in max_sub_layers_minus1..8 {
            t.copy_bits(2)?; // reserved_zero_2bits
        }
    }
    for (profile, level) in profile_present.into_iter().zip(level_present) {
        if profile {
            t.copy_bits(8)?;
            t.copy_bits(32)?;
            t.copy_bits(32)?;
            t.copy_bits(16)?;
        }
        if level {
            t.copy_bits(8)?;
        }
    }
    Ok(())
}

fn copy_scaling_list_data(t: &mut Transcriber<'_>) -> BitstreamResult<()> {
    for size_id in 0..4u32 {
        let step = if size_id == 3 { 3 } else { 1 };
        let mut matrix_id = 0;
        while matrix_id < 6 {
            if !t.copy_flag()? {
                t.copy_ue()?; // scaling_list_pred_matrix_id_delta
            } else {
                let coef_num = 64.min(1 << (4 + (size_id << 1)));
                if size_id > 1 {
                    t.copy_se()?; // scaling_list_dc_coef_minus8
                }
                for _ in 0..coef_num {
                    t.copy_se()?;
                }
            }
            matrix_id += step;
        }
    }
    Ok(())
}

/// Copy one `st_ref_pic_set(idx)` and return its NumDeltaPocs
fn copy_st_ref_pic_set(
    t: &mut Transcriber<'_>,
    idx: usize,
    num_delta_pocs: &[u32],
) -> BitstreamResult<u32> {
    let inter_ref_pic_set_prediction = idx != 0 && t.copy_flag()?;
    if inter_ref_pic_set_prediction {
        // delta_idx_minus1 is only coded in slice headers, never in the SPS
        t.copy_flag()?; // delta_rps_sign
        t.copy_ue()?; // abs_delta_rps_minus1
        let reference = num_delta_pocs[idx - 1];
        let mut count = 0;
        for _ in 0..=reference {
            let used_by_curr_pic = t.copy_flag()?;
            let use_delta = used_by_curr_pic || t.copy_flag()?;
            if use_delta {
                count += 1;
            }
        }
        return Ok(count);
    }

    let negative = t.copy_ue()?;
    let positive = t.copy_ue()?;
    if negative > 16 || positive > 16 {
        return Err(BitstreamError::InvalidField {
            nal: "SPS",
            field: "num_delta_pocs",
            value: negative.max(positive),
        });
    }
    for _ in 0..negative + positive {
        t.copy_ue()?; // delta_poc_minus1
        t.copy_flag()?; // used_by_curr_pic_flag
    }
    Ok(negative + positive)
}

fn write_vui(t: &mut Transcriber<'_>, signal: &VideoSignal) {
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
    w.write_flag(false); // neutral_chroma_indication_flag
    w.write_flag(false); // field_seq_flag
    w.write_flag(false); // frame_field_info_present_flag
    w.write_flag(false); // default_display_window_flag
    w.write_flag(false); // vui_timing_info_present_flag

    w.write_flag(true); // bitstream_restriction_flag
    w.write_flag(false); // tiles_fixed_structure_flag
    w.write_flag(true); // motion_vectors_over_pic_boundaries_flag
    w.write_flag(true); // restricted_ref_pic_lists_flag
    w.write_ue(0); // min_spatial_segmentation_idc
    w.write_ue(0); // max_bytes_per_pic_denom
    w.write_ue(0); // max_bits_per_min_cu_denom
    w.write_ue(15); // log2_max_mv_length_horizontal
    w.write_ue(15); // log2_max_mv_length_vertical
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitstream::rbsp::{BitReader, BitWriter};
    use crate::encoder::raw::{hevc_sps, hevc_vps};

    fn bt2020_pq() -> VideoSignal {
        VideoSignal {
            colour_primaries: 9,
            transfer_characteristics: 16,
            matrix_coefficients: 9,
            full_range: false,
        }
    }

    fn compatibility_flag(nal: &[u8], ptl_offset: usize) -> u32 {
        let rbsp = unescape(&nal[2..]);
        let mut r = BitReader::new(&rbsp, "test");
        let mut skip = ptl_offset as u32 + 8 + COMPATIBILITY_FLAG as u32;
        while skip > 0 {
            let chunk = skip.min(32);
            r.read_bits(chunk).unwrap();
            skip -= chunk;
        }
        r.read_bit().unwrap()
    }

    #[test]
    fn test_vps_sets_compatibility_flag() {
        let vps = hevc_vps(false);
        assert_eq!(nal_type(vps[0]), NAL_VPS);
        assert_eq!(compatibility_flag(&vps, 32), 0);

        let rewritten = rewrite_vps(&vps).unwrap();
        assert_eq!(compatibility_flag(&rewritten, 32), 1);
        assert_eq!(rewrite_vps(&rewritten).unwrap(), rewritten);
    }

    #[test]
    fn test_sps_gains_vui() {
        let sps = hevc_sps(1920, 1080, true, 4);
        assert_eq!(nal_type(sps[0]), NAL_SPS);

        let rewritten = rewrite_sps(&sps, &bt2020_pq()).unwrap();
        assert!(rewritten.len() > sps.len());
        assert_eq!(compatibility_flag(&rewritten, 8), 1);

        // A second pass sees the VUI and only copies it through
        assert_eq!(rewrite_sps(&rewritten, &bt2020_pq()).unwrap(), rewritten);
    }

    /// SPS header fields up to and including log2_max_pic_order_cnt_lsb_minus4
    fn sps_with_poc_lsb(log2_max_poc_lsb_minus4: u32) -> Vec<u8> {
        let mut w = BitWriter::new();
        w.write_bits(0, 4); // sps_video_parameter_set_id
        w.write_bits(0, 3); // sps_max_sub_layers_minus1
        w.write_flag(true); // sps_temporal_id_nesting_flag
        w.write_bits(1, 8); // profile space, tier, Main profile
        w.write_bits(0, 32); // compatibility flags
        w.write_bits(0, 32);
        w.write_bits(0, 16);
        w.write_bits(120, 8); // general_level_idc
        w.write_ue(0); // sps_seq_parameter_set_id
        w.write_ue(1); // chroma_format_idc
        w.write_ue(64);
        w.write_ue(32);
        w.write_flag(false); // conformance_window_flag
        w.write_ue(0);
        w.write_ue(0);
        w.write_ue(log2_max_poc_lsb_minus4);
        w.write_trailing_bits();
        join_header([NAL_SPS << 1, 1], &w.into_bytes())
    }

    #[test]
    fn test_sps_rejects_oversized_poc_lsb() {
        for value in [13, u32::MAX - 1] {
            let sps = sps_with_poc_lsb(value);
            match rewrite_sps(&sps, &bt2020_pq()) {
                Err(BitstreamError::InvalidField { field, value: got, .. }) => {
                    assert_eq!(field, "log2_max_pic_order_cnt_lsb_minus4");
                    assert_eq!(got, value);
                }
                other => panic!("expected InvalidField, got {:?}", other),
            }
        }
        // In range: parsing carries on and runs out of data instead
        assert!(matches!(
            rewrite_sps(&sps_with_poc_lsb(12), &bt2020_pq()),
            Err(BitstreamError::Truncated { .. })
        ));
    }

    #[test]
    fn test_truncated_sps() {
        let sps = hevc_sps(1280, 720, false, 1);
        assert!(rewrite_sps(&sps[..8], &bt2020_pq()).is_err());
        assert!(rewrite_sps(&sps[..1], &bt2020_pq()).is_err());
    }
}
