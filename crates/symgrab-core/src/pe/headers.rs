//! Decoders for the executable header records involved in locating a
//! CodeView debug record.
//!
//! Each record is read through [`RecordReader`] at explicit byte offsets.
//! Only the fields the extractor consumes are retained.

use std::io::{Read, Seek};

use uuid::Uuid;

use crate::error::SymgrabError;
use crate::pe::reader::RecordReader;

/// COFF machine value selecting the 32-bit optional-header layout.
/// Every other machine value is decoded with the 64-bit layout.
pub const MACHINE_I386: u16 = 0x14C;

/// Debug-directory entry type for CodeView records.
pub const DEBUG_TYPE_CODEVIEW: u32 = 2;

/// Offset of the new-header field in the legacy DOS header.
const NEW_HEADER_FIELD_OFFSET: u64 = 0x3C;

/// Fixed length of the name buffer in a CodeView payload.
const CODEVIEW_NAME_LEN: usize = 255;

/// The legacy header at offset 0. Only the magic and the file address of
/// the new header matter here.
#[derive(Debug, Clone, Copy)]
pub struct DosHeader {
    pub magic: u16,
    pub new_header_offset: u32,
}

impl DosHeader {
    pub fn decode<R: Read + Seek>(r: &mut RecordReader<R>) -> Result<Self, SymgrabError> {
        let magic = r.read_u16()?;
        r.seek_to(NEW_HEADER_FIELD_OFFSET)?;
        let new_header_offset = r.read_u32()?;
        Ok(Self {
            magic,
            new_header_offset,
        })
    }
}

/// The fixed-size file header following the PE signature.
#[derive(Debug, Clone, Copy)]
pub struct CoffFileHeader {
    pub machine: u16,
    pub number_of_sections: u16,
    pub time_date_stamp: u32,
    pub size_of_optional_header: u16,
    pub characteristics: u16,
}

impl CoffFileHeader {
    pub fn decode<R: Read + Seek>(r: &mut RecordReader<R>) -> Result<Self, SymgrabError> {
        let machine = r.read_u16()?;
        let number_of_sections = r.read_u16()?;
        let time_date_stamp = r.read_u32()?;
        let _pointer_to_symbol_table = r.read_u32()?;
        let _number_of_symbols = r.read_u32()?;
        let size_of_optional_header = r.read_u16()?;
        let characteristics = r.read_u16()?;
        Ok(Self {
            machine,
            number_of_sections,
            time_date_stamp,
            size_of_optional_header,
            characteristics,
        })
    }

    /// Machine value 0x14C (332) selects the 32-bit layout.
    pub fn is_32bit(&self) -> bool {
        self.machine == MACHINE_I386
    }
}

/// A data-directory entry: virtual address plus declared size.
#[derive(Debug, Clone, Copy, Default)]
pub struct DataDirectory {
    pub virtual_address: u32,
    pub size: u32,
}

impl DataDirectory {
    pub fn decode<R: Read + Seek>(r: &mut RecordReader<R>) -> Result<Self, SymgrabError> {
        Ok(Self {
            virtual_address: r.read_u32()?,
            size: r.read_u32()?,
        })
    }
}

/// The optional header, reduced to what the extractor needs: the debug
/// data-directory entry.
#[derive(Debug, Clone, Copy)]
pub struct OptionalHeader {
    pub magic: u16,
    pub debug_directory: DataDirectory,
}

// Data directories start at offset 96 of the 32-bit optional header and
// offset 112 of the 64-bit one; the debug directory is entry 6.
const DATA_DIRECTORIES_OFFSET_32: u64 = 96;
const DATA_DIRECTORIES_OFFSET_64: u64 = 112;
const DEBUG_DIRECTORY_INDEX: u64 = 6;

impl OptionalHeader {
    /// Decode the optional header starting at the cursor's position,
    /// selecting the layout by the file header's machine value. Leaves the
    /// cursor inside the header; the caller repositions using the declared
    /// optional-header size.
    pub fn decode<R: Read + Seek>(
        r: &mut RecordReader<R>,
        is_32bit: bool,
    ) -> Result<Self, SymgrabError> {
        let start = r.position()?;
        let magic = r.read_u16()?;
        let directories = if is_32bit {
            DATA_DIRECTORIES_OFFSET_32
        } else {
            DATA_DIRECTORIES_OFFSET_64
        };
        r.seek_to(start + directories + DEBUG_DIRECTORY_INDEX * 8)?;
        let debug_directory = DataDirectory::decode(r)?;
        Ok(Self {
            magic,
            debug_directory,
        })
    }
}

/// A section header from the section table (40 bytes).
#[derive(Debug, Clone)]
pub struct SectionHeader {
    pub name: [u8; 8],
    pub virtual_size: u32,
    pub virtual_address: u32,
    pub size_of_raw_data: u32,
    pub pointer_to_raw_data: u32,
    pub characteristics: u32,
}

impl SectionHeader {
    pub fn decode<R: Read + Seek>(r: &mut RecordReader<R>) -> Result<Self, SymgrabError> {
        let name = r.read_array()?;
        let virtual_size = r.read_u32()?;
        let virtual_address = r.read_u32()?;
        let size_of_raw_data = r.read_u32()?;
        let pointer_to_raw_data = r.read_u32()?;
        let _pointer_to_relocations = r.read_u32()?;
        let _pointer_to_line_numbers = r.read_u32()?;
        let _number_of_relocations = r.read_u16()?;
        let _number_of_line_numbers = r.read_u16()?;
        let characteristics = r.read_u32()?;
        Ok(Self {
            name,
            virtual_size,
            virtual_address,
            size_of_raw_data,
            pointer_to_raw_data,
            characteristics,
        })
    }

    /// Whether the given virtual address falls in this section's raw range.
    pub fn contains_rva(&self, rva: u32) -> bool {
        self.virtual_address <= rva
            && rva < self.virtual_address.saturating_add(self.size_of_raw_data)
    }

    /// File offset of the section's raw data end, when it has any.
    pub fn raw_data_end(&self) -> Option<u64> {
        if self.pointer_to_raw_data != 0 && self.size_of_raw_data != 0 {
            Some(u64::from(self.pointer_to_raw_data) + u64::from(self.size_of_raw_data))
        } else {
            None
        }
    }
}

/// One entry of the debug directory (28 bytes).
#[derive(Debug, Clone, Copy)]
pub struct DebugDirectoryEntry {
    pub entry_type: u32,
    pub size_of_data: u32,
    pub address_of_raw_data: u32,
    pub pointer_to_raw_data: u32,
}

impl DebugDirectoryEntry {
    /// Encoded size of one directory entry.
    pub const SIZE: u32 = 28;

    pub fn decode<R: Read + Seek>(r: &mut RecordReader<R>) -> Result<Self, SymgrabError> {
        let _characteristics = r.read_u32()?;
        let _time_date_stamp = r.read_u32()?;
        let _major_version = r.read_u16()?;
        let _minor_version = r.read_u16()?;
        let entry_type = r.read_u32()?;
        let size_of_data = r.read_u32()?;
        let address_of_raw_data = r.read_u32()?;
        let pointer_to_raw_data = r.read_u32()?;
        Ok(Self {
            entry_type,
            size_of_data,
            address_of_raw_data,
            pointer_to_raw_data,
        })
    }

    pub fn raw_data_end(&self) -> Option<u64> {
        if self.pointer_to_raw_data != 0 && self.size_of_data != 0 {
            Some(u64::from(self.pointer_to_raw_data) + u64::from(self.size_of_data))
        } else {
            None
        }
    }
}

/// A CodeView payload: signature, GUID, age and the PDB name buffer.
#[derive(Debug, Clone)]
pub struct CodeViewRecord {
    pub signature: [u8; 4],
    pub guid: Uuid,
    pub age: u32,
    pub name: String,
}

impl CodeViewRecord {
    pub fn decode<R: Read + Seek>(r: &mut RecordReader<R>) -> Result<Self, SymgrabError> {
        let signature = r.read_array()?;
        let guid = r.read_guid()?;
        let age = r.read_u32()?;
        let name = r.read_fixed_string(CODEVIEW_NAME_LEN)?;
        Ok(Self {
            signature,
            guid,
            age,
            name,
        })
    }
}
