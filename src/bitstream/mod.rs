//! Annex-B bitstream inspection and parameter-set patching
//!
//! Encoders are free to emit SPS/VPS units that lack the colour description
//! or reorder constraints a remote decoder needs. Rather than reconfiguring
//! the stream, the first keyframe of a session is scanned, the offending
//! parameter sets are rewritten, and the `{old, new}` pairs travel with every
//! packet so the transport can substitute them on the wire.
//!
//! ```text
//! packet ──nal_units()──▶ [SPS][PPS][IDR] ──rewrite_sps()──▶ Replacement { old, new }
//!                                                                 │
//!                         transport ◀──apply_replacements()───────┘
//! ```

mod error;
pub mod h264;
pub mod hevc;
mod rbsp;

use bytes::Bytes;

pub use error::{BitstreamError, BitstreamResult};
pub use rbsp::{escape, unescape, BitReader, BitWriter};

/// Start code of an H.264 IDR slice as emitted with a 4-byte prefix
pub const H264_IDR_PREFIX: &[u8] = b"\x00\x00\x00\x01\x65";
/// Start code of an HEVC IDR_N_LP slice as emitted with a 4-byte prefix
pub const HEVC_IDR_PREFIX: &[u8] = b"\x00\x00\x00\x01\x28";

/// Colour signalling written into rewritten parameter sets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoSignal {
    pub colour_primaries: u8,
    pub transfer_characteristics: u8,
    pub matrix_coefficients: u8,
    pub full_range: bool,
}

/// A byte sequence to substitute in outgoing packets
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Replacement {
    pub old: Bytes,
    pub new: Bytes,
}

impl Replacement {
    pub fn new(old: impl Into<Bytes>, new: impl Into<Bytes>) -> Self {
        Self {
            old: old.into(),
            new: new.into(),
        }
    }

    /// Promote 3-byte start codes in front of IDR slices to 4 bytes
    pub fn start_code_prefix(prefix: &'static [u8]) -> Self {
        Self::new(Bytes::from_static(&prefix[1..]), Bytes::from_static(prefix))
    }
}

/// Rewritten HEVC parameter sets
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HevcParameterSets {
    pub vps: Replacement,
    pub sps: Replacement,
}

/// One NAL unit located inside an Annex-B buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NalUnit<'a> {
    /// Offset of the start code within the scanned buffer
    pub offset: usize,
    /// The unit including its start code
    pub raw: &'a [u8],
    /// Header and payload, without start code
    pub data: &'a [u8],
}

impl NalUnit<'_> {
    fn start_code(&self) -> &[u8] {
        &self.raw[..self.raw.len() - self.data.len()]
    }
}

/// Iterator over the NAL units of an Annex-B buffer
#[derive(Debug, Clone)]
pub struct NalUnits<'a> {
    data: &'a [u8],
    pos: usize,
}

/// Iterate the NAL units of an Annex-B buffer. Bytes before the first start
/// code are skipped.
pub fn nal_units(data: &[u8]) -> NalUnits<'_> {
    NalUnits { data, pos: 0 }
}

/// Find the next start code at or after `from`: (offset, length)
fn find_start_code(data: &[u8], from: usize) -> Option<(usize, usize)> {
    let mut i = from;
    while i + 3 <= data.len() {
        if data[i] == 0 && data[i + 1] == 0 {
            if data[i + 2] == 1 {
                return Some((i, 3));
            }
            if data[i + 2] == 0 && data.get(i + 3) == Some(&1) {
                return Some((i, 4));
            }
        }
        i += 1;
    }
    None
}

impl<'a> Iterator for NalUnits<'a> {
    type Item = NalUnit<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let (offset, len) = find_start_code(self.data, self.pos)?;
        let body = offset + len;
        let end = find_start_code(self.data, body).map_or(self.data.len(), |(next, _)| next);
        self.pos = end;

        // trailing_zero_8bits belong to neither unit
        let mut trimmed = end;
        while trimmed > body && self.data[trimmed - 1] == 0 {
            trimmed -= 1;
        }
        Some(NalUnit {
            offset,
            raw: &self.data[offset..trimmed],
            data: &self.data[body..trimmed],
        })
    }
}

fn rebuild(unit: &NalUnit<'_>, rewritten: Vec<u8>) -> Replacement {
    let mut new = Vec::with_capacity(unit.start_code().len() + rewritten.len());
    new.extend_from_slice(unit.start_code());
    new.extend(rewritten);
    Replacement::new(Bytes::copy_from_slice(unit.raw), new)
}

/// Extract the SPS of an H.264 packet and produce its replacement
pub fn make_sps_h264(packet: &[u8], signal: &VideoSignal) -> BitstreamResult<Replacement> {
    let sps = nal_units(packet)
        .find(|nal| nal.data.first().map(|h| h264::nal_type(*h)) == Some(h264::NAL_SPS))
        .ok_or(BitstreamError::MissingNal {
            codec: "H.264",
            nal: "SPS",
        })?;
    Ok(rebuild(&sps, h264::rewrite_sps(sps.data, signal)?))
}

/// Extract the VPS and SPS of an HEVC packet and produce their replacements
pub fn make_sps_hevc(packet: &[u8], signal: &VideoSignal) -> BitstreamResult<HevcParameterSets> {
    let find = |kind: u8, nal: &'static str| {
        nal_units(packet)
            .find(|unit| unit.data.first().map(|h| hevc::nal_type(*h)) == Some(kind))
            .ok_or(BitstreamError::MissingNal { codec: "HEVC", nal })
    };
    let vps = find(hevc::NAL_VPS, "VPS")?;
    let sps = find(hevc::NAL_SPS, "SPS")?;

    Ok(HevcParameterSets {
        vps: rebuild(&vps, hevc::rewrite_vps(vps.data)?),
        sps: rebuild(&sps, hevc::rewrite_sps(sps.data, signal)?),
    })
}

/// Apply replacements in order. Each one substitutes the first occurrence of
/// its `old` sequence; parameter sets and IDR start codes appear at most once
/// per access unit.
pub fn apply_replacements(data: &[u8], replacements: &[Replacement]) -> Vec<u8> {
    let mut out = data.to_vec();
    for replacement in replacements {
        if replacement.old.is_empty() || replacement.old.len() > out.len() {
            continue;
        }
        if let Some(at) = out
            .windows(replacement.old.len())
            .position(|window| window == &replacement.old[..])
        {
            out.splice(
                at..at + replacement.old.len(),
                replacement.new.iter().copied(),
            );
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn signal() -> VideoSignal {
        VideoSignal {
            colour_primaries: 1,
            transfer_characteristics: 1,
            matrix_coefficients: 1,
            full_range: true,
        }
    }

    #[test]
    fn test_nal_units_mixed_start_codes() {
        let data = [
            0xFF, 0x00, 0x00, 0x00, 0x01, 0x67, 0xAA, 0x00, 0x00, 0x01, 0x68, 0xBB, 0x00, 0x00,
            0x00, 0x01, 0x65, 0xCC, 0xDD,
        ];
        let units: Vec<_> = nal_units(&data).collect();
        assert_eq!(units.len(), 3);
        assert_eq!(units[0].offset, 1);
        assert_eq!(units[0].data, &[0x67, 0xAA]);
        assert_eq!(units[0].raw, &[0x00, 0x00, 0x00, 0x01, 0x67, 0xAA]);
        assert_eq!(units[1].data, &[0x68, 0xBB]);
        assert_eq!(units[1].raw.len(), 5);
        assert_eq!(units[2].data, &[0x65, 0xCC, 0xDD]);
    }

    #[test]
    fn test_nal_units_empty_and_garbage() {
        assert_eq!(nal_units(&[]).count(), 0);
        assert_eq!(nal_units(&[0x12, 0x34, 0x00, 0x00]).count(), 0);
    }

    #[test]
    fn test_make_sps_h264() {
        let sps = h264::tests::sample_sps(4, false);
        let mut packet = vec![0, 0, 0, 1];
        packet.extend(&sps);
        packet.extend([0, 0, 0, 1, 0x68, 0xCE, 0x38, 0x80]);
        packet.extend([0, 0, 1, 0x65, 0x88, 0x84]);

        let replacement = make_sps_h264(&packet, &signal()).unwrap();
        assert_eq!(&replacement.old[..4], &[0, 0, 0, 1]);
        assert_eq!(&replacement.old[4..], sps.as_slice());
        assert_eq!(&replacement.new[..4], &[0, 0, 0, 1]);
        assert_ne!(replacement.old, replacement.new);

        let patched = apply_replacements(&packet, &[replacement.clone()]);
        assert!(patched
            .windows(replacement.new.len())
            .any(|w| w == &replacement.new[..]));
    }

    #[test]
    fn test_make_sps_missing() {
        let packet = [0, 0, 1, 0x65, 0x88];
        assert!(matches!(
            make_sps_h264(&packet, &signal()),
            Err(BitstreamError::MissingNal { nal: "SPS", .. })
        ));
        assert!(make_sps_hevc(&packet, &signal()).is_err());
    }

    #[test]
    fn test_start_code_prefix_replacement() {
        let replacement = Replacement::start_code_prefix(H264_IDR_PREFIX);
        assert_eq!(&replacement.old[..], b"\x00\x00\x01\x65");

        let packet = [0x00, 0x00, 0x01, 0x65, 0x11, 0x22];
        let patched = apply_replacements(&packet, &[replacement]);
        assert_eq!(patched, vec![0x00, 0x00, 0x00, 0x01, 0x65, 0x11, 0x22]);
    }

    #[test]
    fn test_apply_replacements_first_occurrence_only() {
        let replacement = Replacement::new(&b"ab"[..], &b"X"[..]);
        assert_eq!(apply_replacements(b"abab", &[replacement]), b"Xab".to_vec());
        assert_eq!(apply_replacements(b"a", &[Replacement::new(&b"ab"[..], &b"X"[..])]), b"a".to_vec());
    }

    proptest! {
        #[test]
        fn prop_nal_units_stay_in_bounds(data in proptest::collection::vec(any::<u8>(), 0..256)) {
            for unit in nal_units(&data) {
                prop_assert!(unit.offset + unit.raw.len() <= data.len());
                prop_assert!(unit.raw.ends_with(unit.data));
                prop_assert!(unit.raw.len() - unit.data.len() >= 3);
            }
        }

        #[test]
        fn prop_split_payloads_are_recovered(
            payloads in proptest::collection::vec(proptest::collection::vec(1u8..=255, 1..32), 1..8)
        ) {
            let mut stream = Vec::new();
            for payload in &payloads {
                stream.extend([0, 0, 0, 1]);
                stream.extend(payload);
            }
            let found: Vec<_> = nal_units(&stream).map(|unit| unit.data.to_vec()).collect();
            prop_assert_eq!(found, payloads);
        }
    }
}
