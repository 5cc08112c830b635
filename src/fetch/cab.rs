//! Pure Rust reader for the file table of a cabinet (.cab) file.
//!
//! Only the header and the CFFILE table are read; compressed data blocks
//! are never touched, so inspecting a multi-hundred-megabyte update costs a
//! few kilobytes of I/O.
//!
//! ## CFHEADER (fixed part, 36 bytes)
//!
//! - 4 bytes: signature "MSCF"
//! - 4 bytes: reserved
//! - 4 bytes: cabinet size
//! - 4 bytes: reserved
//! - 4 bytes: offset of the first CFFILE entry (little-endian u32)
//! - 4 bytes: reserved
//! - 2 bytes: format version (minor, major)
//! - 2 bytes: number of CFFOLDER entries
//! - 2 bytes: number of CFFILE entries (little-endian u16)
//! - 2 bytes: flags
//! - 2 bytes: set ID
//! - 2 bytes: cabinet index in set
//!
//! ## CFFILE
//!
//! - 4 bytes: uncompressed size
//! - 4 bytes: offset in folder
//! - 2 bytes: folder index
//! - 2 bytes: date
//! - 2 bytes: time
//! - 2 bytes: attributes (0x80 = name is UTF-8)
//! - variable: null-terminated file name (at most 256 bytes)

use crate::error::FetchError;
use std::path::Path;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// Cabinet signature
const CAB_MAGIC: &[u8; 4] = b"MSCF";

/// Size of the fixed cabinet header
const HEADER_SIZE: usize = 36;

/// Offset of the coffFiles field within the header
const COFF_FILES_OFFSET: usize = 16;

/// Offset of the cFiles field within the header
const FILE_COUNT_OFFSET: usize = 28;

/// Size of a CFFILE entry before its name
const CFFILE_FIXED: usize = 4 + 4 + 2 + 2 + 2 + 2; // 16 bytes

/// Longest file name a CFFILE entry may carry, terminator included
const MAX_NAME_LEN: usize = 257;

/// Fields of the cabinet header needed to find the file table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CabHeader {
    /// Absolute offset of the first CFFILE entry
    pub files_offset: u32,
    /// Number of CFFILE entries
    pub file_count: u16,
}

/// Read the names of every file stored in a cabinet
///
/// # Errors
///
/// Returns [`FetchError::Inspection`] if the file is not a cabinet or its
/// file table is truncated, and an I/O error if it cannot be read.
pub async fn read_cab_file_names(path: &Path) -> crate::Result<Vec<String>> {
    let inspection_error = |reason: String| FetchError::Inspection {
        path: path.to_path_buf(),
        reason,
    };

    let mut file = tokio::fs::File::open(path).await?;
    let mut header = [0u8; HEADER_SIZE];
    file.read_exact(&mut header)
        .await
        .map_err(|e| inspection_error(format!("cannot read cabinet header: {e}")))?;
    let header = parse_header(&header).map_err(inspection_error)?;

    let table_len = usize::from(header.file_count) * (CFFILE_FIXED + MAX_NAME_LEN);
    file.seek(std::io::SeekFrom::Start(u64::from(header.files_offset)))
        .await?;
    let mut table = Vec::with_capacity(table_len);
    (&mut file)
        .take(table_len as u64)
        .read_to_end(&mut table)
        .await?;

    let names = parse_file_table(&table, header.file_count).map_err(inspection_error)?;
    Ok(names)
}

/// Parse the fixed cabinet header
pub(crate) fn parse_header(data: &[u8]) -> Result<CabHeader, String> {
    if data.len() < HEADER_SIZE {
        return Err(format!("header truncated at {} bytes", data.len()));
    }
    if &data[..4] != CAB_MAGIC {
        return Err("missing MSCF signature".to_string());
    }

    let files_offset = read_u32(data, COFF_FILES_OFFSET).unwrap_or(0);
    let file_count = read_u16(data, FILE_COUNT_OFFSET).unwrap_or(0);
    if (files_offset as usize) < HEADER_SIZE {
        return Err(format!("file table offset {files_offset} inside header"));
    }

    Ok(CabHeader {
        files_offset,
        file_count,
    })
}

/// Parse `count` CFFILE entries from the start of `data`
pub(crate) fn parse_file_table(data: &[u8], count: u16) -> Result<Vec<String>, String> {
    let mut names = Vec::with_capacity(usize::from(count));
    let mut pos = 0;

    for index in 0..count {
        let name_start = pos + CFFILE_FIXED;
        if name_start > data.len() {
            return Err(format!("file table truncated at entry {index}"));
        }

        let terminator = data[name_start..]
            .iter()
            .take(MAX_NAME_LEN)
            .position(|&b| b == 0)
            .ok_or_else(|| format!("unterminated name in entry {index}"))?;
        let name_bytes = &data[name_start..name_start + terminator];
        names.push(String::from_utf8_lossy(name_bytes).into_owned());

        pos = name_start + terminator + 1;
    }

    Ok(names)
}

/// Parse every file name from an in-memory cabinet
#[cfg(test)]
pub(crate) fn parse_cab_file_names_from_bytes(data: &[u8]) -> Result<Vec<String>, String> {
    let header = parse_header(data)?;
    let start = header.files_offset as usize;
    if start > data.len() {
        return Err(format!("file table offset {start} beyond end of data"));
    }
    parse_file_table(&data[start..], header.file_count)
}

/// Whether a stored name is the marker, ignoring directories and case
pub(crate) fn is_marker(stored_name: &str, marker: &str) -> bool {
    stored_name
        .rsplit(['\\', '/'])
        .next()
        .is_some_and(|base| base.eq_ignore_ascii_case(marker))
}

fn read_u32(data: &[u8], offset: usize) -> Option<u32> {
    data.get(offset..offset + 4)
        .and_then(|b| b.try_into().ok())
        .map(u32::from_le_bytes)
}

fn read_u16(data: &[u8], offset: usize) -> Option<u16> {
    data.get(offset..offset + 2)
        .and_then(|b| b.try_into().ok())
        .map(u16::from_le_bytes)
}
