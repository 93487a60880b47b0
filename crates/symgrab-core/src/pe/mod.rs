//! Debug-identity extraction from executable images.
//!
//! Walks the executable's headers to the debug directory and pulls the
//! PDB name, age and GUID out of its CodeView record. An image without a
//! usable record yields an empty [`DebugIdentity`]; only I/O failures are
//! errors.

mod headers;
mod reader;

pub use headers::{
    CodeViewRecord, CoffFileHeader, DataDirectory, DebugDirectoryEntry, DosHeader, OptionalHeader,
    SectionHeader, DEBUG_TYPE_CODEVIEW, MACHINE_I386,
};
pub use reader::RecordReader;

use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::Path;

use tracing::debug;

use symgrab_types::DebugIdentity;

use crate::error::SymgrabError;

/// Marker in a PDB name identifying a native-image companion record.
/// Such a record must not shadow the module's own PDB when both exist.
const NATIVE_IMAGE_MARKER: &str = ".ni.";

/// Extract the debug identity from the executable at `path`.
pub fn read_debug_identity(path: impl AsRef<Path>) -> Result<DebugIdentity, SymgrabError> {
    let file = File::open(path.as_ref())?;
    let mut reader = RecordReader::new(BufReader::new(file));
    extract_identity(&mut reader)
}

/// Extract the debug identity from an already opened image stream.
pub fn extract_identity<R: Read + Seek>(
    r: &mut RecordReader<R>,
) -> Result<DebugIdentity, SymgrabError> {
    let dos = DosHeader::decode(r)?;
    r.seek_to(u64::from(dos.new_header_offset))?;

    let _signature = r.read_u32()?;
    let coff = CoffFileHeader::decode(r)?;
    let is_32bit = coff.is_32bit();

    let optional_start = r.position()?;
    let optional = OptionalHeader::decode(r, is_32bit)?;
    r.seek_to(optional_start + u64::from(coff.size_of_optional_header))?;

    let debug_directory = optional.debug_directory;

    // Walk the section table, locating the section that maps the debug
    // directory and tracking the furthest raw-data extent.
    let mut raw_data_end: u64 = 0;
    let mut debug_offset: u64 = 0;
    for _ in 0..coff.number_of_sections {
        let section = SectionHeader::decode(r)?;
        if let Some(end) = section.raw_data_end() {
            raw_data_end = raw_data_end.max(end);
        }
        if debug_directory.size != 0 && section.contains_rva(debug_directory.virtual_address) {
            debug_offset = u64::from(
                debug_directory.virtual_address - section.virtual_address
                    + section.pointer_to_raw_data,
            );
        }
    }

    r.seek_to(debug_offset)?;

    let mut remaining = debug_directory.size;
    let mut accepted: Option<CodeViewRecord> = None;
    while remaining >= DebugDirectoryEntry::SIZE {
        if accepted.is_none() {
            let entry = DebugDirectoryEntry::decode(r)?;
            let next_entry = r.position()?;

            if entry.entry_type == DEBUG_TYPE_CODEVIEW {
                r.seek_to(u64::from(entry.pointer_to_raw_data))?;
                let record = CodeViewRecord::decode(r)?;
                if record.name.contains(NATIVE_IMAGE_MARKER) {
                    // A native-image companion record; keep scanning for
                    // the module's own PDB record.
                    r.seek_to(next_entry)?;
                } else {
                    accepted = Some(record);
                }
            }

            if let Some(end) = entry.raw_data_end() {
                raw_data_end = raw_data_end.max(end);
            }
        }
        remaining -= DebugDirectoryEntry::SIZE;
    }

    debug!(raw_data_end, "scanned debug directory");

    Ok(match accepted {
        Some(record) => DebugIdentity::new(record.name, format!("{:X}", record.age), record.guid),
        None => DebugIdentity::default(),
    })
}
