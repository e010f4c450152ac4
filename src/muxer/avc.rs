//! H.264 Annex-B helpers for the MP4 muxer

/// NAL unit type of a sequence parameter set
pub const NAL_SPS: u8 = 7;
/// NAL unit type of a picture parameter set
pub const NAL_PPS: u8 = 8;
/// NAL unit type of an access unit delimiter
pub const NAL_AUD: u8 = 9;

/// Split an Annex-B byte stream into NAL units (start codes removed)
pub fn split_nal_units(data: &[u8]) -> Vec<&[u8]> {
    let mut units = Vec::new();
    let mut start = 0;

    while let Some((nal_start, start_code_len)) = find_start_code(data, start) {
        let payload_start = nal_start + start_code_len;
        let nal_end = find_start_code(data, payload_start)
            .map(|(pos, _)| pos)
            .unwrap_or(data.len());

        let nal = &data[payload_start..nal_end];
        if !nal.is_empty() {
            units.push(nal);
        }
        start = nal_end;
    }

    units
}

/// NAL unit type from the first byte of a unit
pub fn nal_type(nal: &[u8]) -> u8 {
    nal.first().map(|b| b & 0x1F).unwrap_or(0)
}

/// Extract the first SPS and PPS from Annex-B codec configuration
pub fn parameter_sets(config: &[u8]) -> (Vec<u8>, Vec<u8>) {
    let mut sps = Vec::new();
    let mut pps = Vec::new();
    for nal in split_nal_units(config) {
        match nal_type(nal) {
            NAL_SPS if sps.is_empty() => sps = nal.to_vec(),
            NAL_PPS if pps.is_empty() => pps = nal.to_vec(),
            _ => {}
        }
    }
    (sps, pps)
}

/// Rewrite an Annex-B access unit as 4-byte length-prefixed NAL units.
///
/// Parameter sets and delimiters are dropped; they live in `avcC`.
pub fn annexb_to_length_prefixed(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + 16);
    for nal in split_nal_units(data) {
        if matches!(nal_type(nal), NAL_SPS | NAL_PPS | NAL_AUD) {
            continue;
        }
        out.extend_from_slice(&(nal.len() as u32).to_be_bytes());
        out.extend_from_slice(nal);
    }
    out
}

/// Find H.264 start code in data
fn find_start_code(data: &[u8], start: usize) -> Option<(usize, usize)> {
    if start + 3 > data.len() {
        return None;
    }

    for i in start..data.len() - 2 {
        if data[i] == 0x00 && data[i + 1] == 0x00 {
            if data[i + 2] == 0x01 {
                return Some((i, 3));
            }
            if i + 3 < data.len() && data[i + 2] == 0x00 && data[i + 3] == 0x01 {
                return Some((i, 4));
            }
        }
    }

    None
}
