//! Top-level ISO-BMFF box scanning (spec §4.A).
//!
//! This is deliberately shallow: it walks only the top-level atom chain of
//! an MP4/MOV file looking for `moov` and `mdat`, and never descends into
//! a box's payload. That is sufficient for faststart decisions and is much
//! cheaper than parsing the full box tree.

use std::fs::File;
use std::io;
use std::path::Path;

#[cfg(unix)]
use std::os::unix::fs::FileExt;

pub type AtomType = [u8; 4];

/// Offsets (from start of file) of the first `moov` and/or `mdat` atoms
/// seen while walking the top-level atom chain.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AtomOffsets {
    pub moov: Option<u64>,
    pub mdat: Option<u64>,
}

impl AtomOffsets {
    pub fn both_known(&self) -> bool {
        self.moov.is_some() && self.mdat.is_some()
    }

    /// True iff `moov` was seen before `mdat`. Requires both to be known.
    pub fn moov_before_mdat(&self) -> bool {
        matches!((self.moov, self.mdat), (Some(m), Some(d)) if m < d)
    }
}

/// Scan the top-level atoms of `path`, returning the offsets of the first
/// `moov` and `mdat` boxes encountered. Returns as soon as both are known;
/// a malformed header (declared size smaller than the header itself) ends
/// the scan early and returns whatever was found so far, same as an
/// early-EOF.
pub fn scan_top_level_atoms(path: impl AsRef<Path>) -> io::Result<AtomOffsets> {
    let file = File::open(path)?;
    let file_size = file.metadata()?.len();

    let mut offsets = AtomOffsets::default();
    let mut offset: u64 = 0;

    while offset + 8 <= file_size {
        let mut header = [0u8; 8];
        read_exact_at(&file, &mut header, offset)?;

        let mut declared_size = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as u64;
        let atom_type: AtomType = [header[4], header[5], header[6], header[7]];
        let mut header_size: u64 = 8;

        if declared_size == 1 {
            if offset + 16 > file_size {
                break;
            }
            let mut ext = [0u8; 8];
            read_exact_at(&file, &mut ext, offset + 8)?;
            declared_size = u64::from_be_bytes(ext);
            header_size = 16;
        } else if declared_size == 0 {
            declared_size = file_size - offset;
        }

        if &atom_type == b"moov" && offsets.moov.is_none() {
            offsets.moov = Some(offset);
        } else if &atom_type == b"mdat" && offsets.mdat.is_none() {
            offsets.mdat = Some(offset);
        }

        if offsets.both_known() {
            return Ok(offsets);
        }

        if declared_size < header_size {
            break;
        }

        offset += declared_size;
    }

    Ok(offsets)
}

#[cfg(unix)]
fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<()> {
    file.read_exact_at(buf, offset)
}

#[cfg(not(unix))]
fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<()> {
    use std::io::{Read, Seek, SeekFrom};
    let mut file = file.try_clone()?;
    file.seek(SeekFrom::Start(offset))?;
    file.read_exact(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn atom(kind: &[u8; 4], payload_len: usize) -> Vec<u8> {
        let size = (8 + payload_len) as u32;
        let mut v = Vec::with_capacity(size as usize);
        v.extend_from_slice(&size.to_be_bytes());
        v.extend_from_slice(kind);
        v.extend(std::iter::repeat(0u8).take(payload_len));
        v
    }

    #[test]
    fn finds_moov_before_mdat() {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(&atom(b"ftyp", 4)).unwrap();
        f.write_all(&atom(b"moov", 16)).unwrap();
        f.write_all(&atom(b"mdat", 100)).unwrap();
        f.flush().unwrap();

        let offsets = scan_top_level_atoms(f.path()).unwrap();
        assert_eq!(offsets.moov, Some(12));
        assert_eq!(offsets.mdat, Some(12 + 24));
        assert!(offsets.moov_before_mdat());
    }

    #[test]
    fn finds_mdat_before_moov() {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(&atom(b"ftyp", 4)).unwrap();
        f.write_all(&atom(b"mdat", 100)).unwrap();
        f.write_all(&atom(b"moov", 16)).unwrap();
        f.flush().unwrap();

        let offsets = scan_top_level_atoms(f.path()).unwrap();
        assert!(offsets.both_known());
        assert!(!offsets.moov_before_mdat());
    }

    #[test]
    fn handles_extended_size_atom() {
        let mut f = NamedTempFile::new().unwrap();
        // size==1 means a 64-bit extended size follows the type.
        let payload_len: u64 = 32;
        let mut buf = Vec::new();
        buf.extend_from_slice(&1u32.to_be_bytes());
        buf.extend_from_slice(b"mdat");
        buf.extend_from_slice(&(16 + payload_len).to_be_bytes());
        buf.extend(std::iter::repeat(0u8).take(payload_len as usize));
        f.write_all(&buf).unwrap();
        f.write_all(&atom(b"moov", 8)).unwrap();
        f.flush().unwrap();

        let offsets = scan_top_level_atoms(f.path()).unwrap();
        assert_eq!(offsets.mdat, Some(0));
        assert_eq!(offsets.moov, Some(16 + payload_len));
    }

    #[test]
    fn handles_to_eof_atom() {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(&atom(b"moov", 8)).unwrap();
        // size==0 means "extends to end of file".
        let mut buf = Vec::new();
        buf.extend_from_slice(&0u32.to_be_bytes());
        buf.extend_from_slice(b"mdat");
        buf.extend(std::iter::repeat(0u8).take(40));
        f.write_all(&buf).unwrap();
        f.flush().unwrap();

        let offsets = scan_top_level_atoms(f.path()).unwrap();
        assert_eq!(offsets.moov, Some(0));
        assert_eq!(offsets.mdat, Some(16));
    }

    #[test]
    fn malformed_header_truncates_scan() {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(&atom(b"moov", 8)).unwrap();
        // Declared size smaller than header size (8) is malformed.
        let mut buf = Vec::new();
        buf.extend_from_slice(&4u32.to_be_bytes());
        buf.extend_from_slice(b"mdat");
        f.write_all(&buf).unwrap();
        f.flush().unwrap();

        let offsets = scan_top_level_atoms(f.path()).unwrap();
        assert_eq!(offsets.moov, Some(0));
        assert_eq!(offsets.mdat, None);
    }
}
