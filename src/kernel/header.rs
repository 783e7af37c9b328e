//! Reading the version a kernel image reports about itself.
//!
//! x86 boot images carry a setup header at `0x200` with the `HdrS` magic at
//! `0x202` and, at `0x20e`, a 16-bit pointer (relative to `0x200`) to the
//! NUL-terminated version string, e.g. `6.1.0-gentoo (root@host) #1 SMP ...`.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use crate::error::{KernelError, Result};

/// Offset of the setup header within the image.
pub const SETUP_HEADER_OFFSET: u64 = 0x200;

/// Magic expected at bytes 2..6 of the setup header.
pub const SETUP_HEADER_MAGIC: &[u8; 4] = b"HdrS";

const HEADER_LEN: usize = 0x10;
const VERSION_PTR_OFFSET: usize = 0x0e;
const VERSION_MAX_LEN: u64 = 0x100;

/// Read the embedded version string of the kernel image at `path`.
pub fn read_real_kv(path: &Path) -> Result<String> {
    let mut file = File::open(path).map_err(|e| KernelError::io(path, "opening kernel image", e))?;
    read_version_from(&mut file, path)
}

/// Same as [`read_real_kv`] over any seekable reader; `path` is only used in
/// error values.
pub fn read_version_from<R: Read + Seek>(reader: &mut R, path: &Path) -> Result<String> {
    let io_err = |e| KernelError::io(path, "reading kernel image", e);

    reader
        .seek(SeekFrom::Start(SETUP_HEADER_OFFSET))
        .map_err(io_err)?;
    let mut header = [0u8; HEADER_LEN];
    let got = read_up_to(reader, &mut header).map_err(io_err)?;
    if got < HEADER_LEN || &header[2..6] != SETUP_HEADER_MAGIC {
        return Err(KernelError::InvalidFormat {
            path: path.to_path_buf(),
            detail: format!(
                "invalid magic at {:#x} (expected {})",
                SETUP_HEADER_OFFSET + 2,
                String::from_utf8_lossy(SETUP_HEADER_MAGIC)
            ),
        });
    }

    let pointer = u16::from_le_bytes([header[VERSION_PTR_OFFSET], header[VERSION_PTR_OFFSET + 1]]);
    reader
        .seek(SeekFrom::Current(i64::from(pointer) - HEADER_LEN as i64))
        .map_err(io_err)?;

    let mut buf = Vec::with_capacity(VERSION_MAX_LEN as usize);
    reader
        .take(VERSION_MAX_LEN)
        .read_to_end(&mut buf)
        .map_err(io_err)?;

    let end = buf
        .iter()
        .position(|&b| b == b' ' || b == 0)
        .unwrap_or(buf.len());
    String::from_utf8(buf[..end].to_vec()).map_err(|_| KernelError::InvalidFormat {
        path: path.to_path_buf(),
        detail: "version string is not valid UTF-8".to_string(),
    })
}

/// Fill as much of `buf` as the reader allows, stopping at EOF.
fn read_up_to<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
