//! Common test utilities

#![allow(dead_code)]

use image::{Rgba, RgbaImage};
use std::path::Path;

pub const ID_SEGMENT: u32 = 0x18538067;
pub const ID_TRACKS: u32 = 0x1654AE6B;
pub const ID_TRACK_ENTRY: u32 = 0xAE;
pub const ID_CLUSTER: u32 = 0x1F43B675;
pub const ID_SIMPLE_BLOCK: u32 = 0xA3;
pub const ID_CUES: u32 = 0x1C53BB6B;
pub const ID_CUE_POINT: u32 = 0xBB;

/// Master elements the walker descends into
const MASTERS: &[u32] = &[ID_SEGMENT, ID_TRACKS, ID_CLUSTER, ID_CUES];

/// Solid colour frame
pub fn solid_frame(width: u32, height: u32, color: [u8; 3]) -> RgbaImage {
    RgbaImage::from_pixel(width, height, Rgba([color[0], color[1], color[2], 255]))
}

/// Frame `index` of a red/blue alternating sequence
pub fn alternating_frame(width: u32, height: u32, index: u32) -> RgbaImage {
    if index % 2 == 0 {
        solid_frame(width, height, [255, 0, 0])
    } else {
        solid_frame(width, height, [0, 0, 255])
    }
}

/// Verify that a file exists and has non-zero size
pub fn verify_file_exists_with_size<P: AsRef<Path>>(path: P) -> bool {
    match std::fs::metadata(path) {
        Ok(meta) => meta.len() > 0,
        Err(_) => false,
    }
}

/// Parse WebM header to verify it's a valid WebM file
pub fn verify_webm_header<P: AsRef<Path>>(path: P) -> bool {
    match std::fs::read(path) {
        // WebM starts with EBML header: 0x1A 0x45 0xDF 0xA3
        Ok(bytes) => bytes.len() >= 4 && bytes[..4] == [0x1A, 0x45, 0xDF, 0xA3],
        Err(_) => false,
    }
}

/// Parse MP4 header to verify it's a valid MP4 file
pub fn verify_mp4_header<P: AsRef<Path>>(path: P) -> bool {
    match std::fs::read(path) {
        // MP4 files have 'ftyp' box at offset 4
        Ok(bytes) => bytes.len() >= 8 && &bytes[4..8] == b"ftyp",
        Err(_) => false,
    }
}

/// One EBML element found by [`walk_ebml`]
#[derive(Debug, Clone, Copy)]
pub struct Element {
    pub id: u32,
    /// Offset of the element ID
    pub offset: usize,
    /// Offset of the element payload
    pub data_offset: usize,
    pub size: u64,
}

fn read_vint(bytes: &[u8], pos: usize, keep_marker: bool) -> Option<(u64, usize)> {
    let first = *bytes.get(pos)?;
    if first == 0 {
        return None;
    }
    let len = first.leading_zeros() as usize + 1;
    let mut value = if keep_marker {
        first as u64
    } else {
        first as u64 & (0xFF_u64 >> len)
    };
    for i in 1..len {
        value = (value << 8) | *bytes.get(pos + i)? as u64;
    }
    Some((value, len))
}

/// Flatten the element tree of a WebM file, descending into Segment, Tracks,
/// Cluster and Cues
pub fn walk_ebml(bytes: &[u8]) -> Vec<Element> {
    let mut out = Vec::new();
    walk_range(bytes, 0, bytes.len(), &mut out);
    out
}

fn walk_range(bytes: &[u8], mut pos: usize, end: usize, out: &mut Vec<Element>) {
    while pos < end {
        let Some((id, id_len)) = read_vint(bytes, pos, true) else {
            return;
        };
        let Some((size, size_len)) = read_vint(bytes, pos + id_len, false) else {
            return;
        };
        let data_offset = pos + id_len + size_len;
        let data_end = (data_offset as u64 + size).min(end as u64) as usize;
        out.push(Element {
            id: id as u32,
            offset: pos,
            data_offset,
            size,
        });
        if MASTERS.contains(&(id as u32)) {
            walk_range(bytes, data_offset, data_end, out);
        }
        pos = data_end;
    }
}

/// Number of elements with the given ID
pub fn count_elements(elements: &[Element], id: u32) -> usize {
    elements.iter().filter(|e| e.id == id).count()
}

/// Relative timecodes of every SimpleBlock plus its cluster timecode, in
/// file order
pub fn block_timecodes(bytes: &[u8], elements: &[Element]) -> Vec<i64> {
    let mut cluster_timecode = 0i64;
    let mut out = Vec::new();
    for e in elements {
        match e.id {
            ID_CLUSTER => {
                // First child is the ClusterTimestamp (0xE7)
                let size_pos = e.data_offset + 1;
                if let Some((size, len)) = read_vint(bytes, size_pos, false) {
                    let start = size_pos + len;
                    cluster_timecode = bytes[start..start + size as usize]
                        .iter()
                        .fold(0i64, |acc, b| (acc << 8) | *b as i64);
                }
            }
            ID_SIMPLE_BLOCK => {
                let rel = i16::from_be_bytes([bytes[e.data_offset + 1], bytes[e.data_offset + 2]]);
                out.push(cluster_timecode + rel as i64);
            }
            _ => {}
        }
    }
    out
}

/// Get file size in bytes
pub fn get_file_size<P: AsRef<Path>>(path: P) -> Option<u64> {
    std::fs::metadata(path).ok().map(|m| m.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alternating_frame() {
        assert_eq!(*alternating_frame(2, 2, 0).get_pixel(0, 0), Rgba([255, 0, 0, 255]));
        assert_eq!(*alternating_frame(2, 2, 1).get_pixel(1, 1), Rgba([0, 0, 255, 255]));
    }

    #[test]
    fn test_walk_ebml_nested() {
        // Segment { Cluster { ClusterTimestamp(5), SimpleBlock } }
        let block = [0xA3, 0x84, 0x81, 0x00, 0x02, 0x80];
        let mut cluster = vec![0x1F, 0x43, 0xB6, 0x75, 0x80 | (3 + block.len() as u8)];
        cluster.extend([0xE7, 0x81, 0x05]);
        cluster.extend(block);
        let mut bytes = vec![0x18, 0x53, 0x80, 0x67, 0x80 | cluster.len() as u8];
        bytes.extend(&cluster);

        let elements = walk_ebml(&bytes);
        assert_eq!(count_elements(&elements, ID_SEGMENT), 1);
        assert_eq!(count_elements(&elements, ID_CLUSTER), 1);
        assert_eq!(count_elements(&elements, ID_SIMPLE_BLOCK), 1);
        assert_eq!(block_timecodes(&bytes, &elements), vec![7]);
    }
}
