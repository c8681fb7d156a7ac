//! Minimal ZIP structural scanner (spec §6): enough to locate the byte
//! offsets the corruptor and its detection companion need, without
//! implementing general decompression.

use byteorder::{ByteOrder, LittleEndian};

pub const LOCAL_FILE_HEADER_SIG: u32 = 0x0403_4b50;
pub const DATA_DESCRIPTOR_SIG: u32 = 0x0807_4b50;
pub const CENTRAL_DIR_SIG: u32 = 0x0201_4b50;
pub const EOCD_SIG: u32 = 0x0605_4b50;

/// Max bytes from EOCD's comment field plus the fixed 22-byte record -
/// the window in which EOCD must appear for a well-formed archive.
pub const EOCD_SEARCH_WINDOW: usize = 65_535 + 22;

/// Offsets of every recognized ZIP structural signature, sorted ascending
/// for determinism (spec §4.E).
#[derive(Debug, Default, Clone)]
pub struct ZipStructure {
    pub local_headers: Vec<usize>,
    pub data_descriptors: Vec<usize>,
    pub central_dir_headers: Vec<usize>,
    pub eocd: Vec<usize>,
}

impl ZipStructure {
    pub fn scan(data: &[u8]) -> Self {
        let mut structure = Self {
            local_headers: find_signature(data, LOCAL_FILE_HEADER_SIG),
            data_descriptors: find_signature(data, DATA_DESCRIPTOR_SIG),
            central_dir_headers: find_signature(data, CENTRAL_DIR_SIG),
            eocd: find_signature(data, EOCD_SIG),
        };
        structure.local_headers.sort_unstable();
        structure.data_descriptors.sort_unstable();
        structure.central_dir_headers.sort_unstable();
        structure.eocd.sort_unstable();
        structure
    }

    pub fn first_local_header(&self) -> Option<usize> {
        self.local_headers.first().copied()
    }

    pub fn last_eocd(&self) -> Option<usize> {
        self.eocd.last().copied()
    }
}

fn find_signature(data: &[u8], signature: u32) -> Vec<usize> {
    let needle = signature.to_le_bytes();
    memchr::memmem::find_iter(data, &needle).collect()
}

/// A parsed local file header, byte offsets relative to `start`.
#[derive(Debug, Clone, Copy)]
pub struct LocalHeaderView {
    pub start: usize,
    pub version_offset: usize,
    pub crc32_offset: usize,
    pub compressed_size_offset: usize,
    pub uncompressed_size_offset: usize,
    pub filename_len_offset: usize,
    pub extra_len_offset: usize,
    pub filename_len: u16,
    pub extra_len: u16,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub method: u16,
}

impl LocalHeaderView {
    /// Parse the local file header beginning at `start`. Returns `None` if
    /// the buffer is too short to hold the fixed-size portion.
    pub fn parse(data: &[u8], start: usize) -> Option<Self> {
        if data.len() < start + 30 {
            return None;
        }
        let method = LittleEndian::read_u16(&data[start + 8..start + 10]);
        let compressed_size = LittleEndian::read_u32(&data[start + 18..start + 22]);
        let uncompressed_size = LittleEndian::read_u32(&data[start + 22..start + 26]);
        let filename_len = LittleEndian::read_u16(&data[start + 26..start + 28]);
        let extra_len = LittleEndian::read_u16(&data[start + 28..start + 30]);
        Some(Self {
            start,
            version_offset: start + 4,
            crc32_offset: start + 14,
            compressed_size_offset: start + 18,
            uncompressed_size_offset: start + 22,
            filename_len_offset: start + 26,
            extra_len_offset: start + 28,
            filename_len,
            extra_len,
            compressed_size,
            uncompressed_size,
            method,
        })
    }

    /// Offset of the filename, right after the fixed 30-byte header.
    pub fn filename_offset(&self) -> usize {
        self.start + 30
    }

    pub fn filename<'a>(&self, data: &'a [u8]) -> Option<&'a str> {
        let begin = self.filename_offset();
        let end = begin + self.filename_len as usize;
        data.get(begin..end).and_then(|b| std::str::from_utf8(b).ok())
    }

    /// Offset of the data region, following the filename and extra field.
    /// This reads the real extra-field-length byte rather than the
    /// `30 + filename_len` approximation spec §9 allows substituting —
    /// observable outcomes are unchanged, per spec's own permission to do
    /// so.
    pub fn data_offset(&self) -> usize {
        self.filename_offset() + self.filename_len as usize + self.extra_len as usize
    }

    pub fn data_len(&self) -> usize {
        self.compressed_size as usize
    }
}

/// EOCD fixed-field offsets relative to `start` (spec §6).
#[derive(Debug, Clone, Copy)]
pub struct EocdView {
    pub start: usize,
    pub cd_offset_field: usize,
    pub comment_len_field: usize,
    pub comment_len: u16,
}

impl EocdView {
    pub fn parse(data: &[u8], start: usize) -> Option<Self> {
        if data.len() < start + 22 {
            return None;
        }
        let comment_len = LittleEndian::read_u16(&data[start + 20..start + 22]);
        Some(Self {
            start,
            cd_offset_field: start + 16,
            comment_len_field: start + 20,
            comment_len,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_empty_zip() -> Vec<u8> {
        // A zero-entry archive: just an EOCD record, no comment.
        let mut buf = Vec::new();
        buf.extend_from_slice(&EOCD_SIG.to_le_bytes());
        buf.extend_from_slice(&[0u8; 18]); // disk fields, cd size/offset
        buf.extend_from_slice(&0u16.to_le_bytes()); // comment length
        buf
    }

    #[test]
    fn scans_eocd_of_empty_archive() {
        let data = minimal_empty_zip();
        let structure = ZipStructure::scan(&data);
        assert_eq!(structure.eocd, vec![0]);
        assert!(structure.local_headers.is_empty());
    }

    #[test]
    fn offsets_sorted_ascending() {
        let mut data = minimal_empty_zip();
        data.extend_from_slice(&LOCAL_FILE_HEADER_SIG.to_le_bytes());
        let structure = ZipStructure::scan(&data);
        assert_eq!(structure.local_headers, vec![22]);
    }
}
