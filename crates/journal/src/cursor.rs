//! Fragment read cursor
//!
//! Reads [`JournalRecord`]s back from a fragment file. The cursor opens its
//! own read-only handle, trusts the header's write cursor as the logical end,
//! and loads the logical content once (fragments are bounded by the rotation
//! threshold, a couple of megabytes by default).
//!
//! ## Corruption handling
//!
//! Every structural check failure surfaces as `Error::CorruptedRecord` with
//! the record's file position, *after* the cursor has been advanced past the
//! record's claimed `record_length`, so a caller configured to skip
//! corrupted records can simply keep reading. The one thing that cannot be
//! skipped is a damaged `record_length` itself (negative, or pointing past
//! the logical end): that surfaces as `Error::UnreadableRecordLength` and
//! ends the scan.

use crate::header::{LogFileHeader, HEADER_LENGTH};
use crate::record::{JournalRecord, END_RECORD};
use dtx_core::{Error, Result, Uid};
use std::collections::BTreeSet;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

/// Minimal record body: every fixed field present, one gtrid byte, no names
const MIN_RECORD_LENGTH: usize = 4 + 8 + 4 + 4 + 1 + 1 + 4 + 4;

/// Read cursor over one fragment file
pub struct LogCursor {
    buf: Vec<u8>,
    position: usize,
    end_position: usize,
}

impl LogCursor {
    /// Open a fragment for reading
    ///
    /// Validates the header and loads bytes up to the write cursor. The
    /// cursor is positioned on the first record.
    pub fn open(path: &Path) -> Result<LogCursor> {
        let mut file = File::open(path)?;
        let header = LogFileHeader::read_from(&mut file)?;

        let file_len = file.metadata()?.len();
        if header.position > file_len {
            return Err(Error::corruption(format!(
                "fragment write cursor {} is beyond the file end {}",
                header.position, file_len
            )));
        }

        let mut buf = vec![0u8; header.position as usize];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut buf)?;

        Ok(LogCursor {
            buf,
            position: HEADER_LENGTH as usize,
            end_position: header.position as usize,
        })
    }

    /// Fetch the next record, or `None` at the logical end of the fragment
    ///
    /// With `skip_crc_check` the CRC is neither recalculated nor compared;
    /// structural checks still apply.
    pub fn read_record(&mut self, skip_crc_check: bool) -> Result<Option<JournalRecord>> {
        if self.position >= self.end_position {
            return Ok(None);
        }
        let record_position = self.position as u64;

        if self.position + 8 > self.end_position {
            // not even the two length fields fit; there is no boundary to hop to
            self.position = self.end_position;
            return Err(Error::UnreadableRecordLength {
                position: record_position,
                length: -1,
            });
        }

        let status = self.get_i32(self.position);
        let record_length = self.get_i32(self.position + 4);
        if record_length < 0 {
            return Err(Error::UnreadableRecordLength {
                position: record_position,
                length: record_length as i64,
            });
        }
        let body = self.position + 8;
        let end_of_record = body + record_length as usize;
        if end_of_record > self.end_position {
            return Err(Error::UnreadableRecordLength {
                position: record_position,
                length: record_length as i64,
            });
        }

        // from here on the record boundary is known; any failure is skippable
        self.position = end_of_record;

        if status < 0 {
            return Err(Error::corrupted_record(record_position, "status is negative"));
        }
        if (record_length as usize) < MIN_RECORD_LENGTH {
            return Err(Error::corrupted_record(
                record_position,
                format!("record length {} is too small to hold a record", record_length),
            ));
        }

        let header_length = self.get_i32(body);
        if header_length < 1 {
            return Err(self.out_of_bounds(record_position, "header length", header_length as i64, 1, i64::MAX));
        }
        let time = self.get_i64(body + 4);
        if time < 1 {
            return Err(self.out_of_bounds(record_position, "time", time, 1, i64::MAX));
        }
        let sequence_number = self.get_i32(body + 12);
        if sequence_number < 1 {
            return Err(self.out_of_bounds(record_position, "sequence number", sequence_number as i64, 1, i64::MAX));
        }
        let crc32 = self.get_i32(body + 16) as u32;
        let gtrid_size = self.buf[body + 20] as i8;
        if !(1..=64).contains(&gtrid_size) {
            return Err(self.out_of_bounds(record_position, "gtrid size", gtrid_size as i64, 1, 64));
        }
        let gtrid_size = gtrid_size as usize;

        // probe the terminator before trusting any variable-length field
        let end_code = self.get_i32(end_of_record - 4);
        if end_code != END_RECORD {
            return Err(Error::corrupted_record(
                record_position,
                "no record terminator found",
            ));
        }

        if 4 + 8 + 4 + 4 + 1 + gtrid_size > record_length as usize {
            return Err(Error::corrupted_record(record_position, "gtrid size too long"));
        }
        let gtrid_start = body + 21;
        let gtrid = Uid::new(self.buf[gtrid_start..gtrid_start + gtrid_size].to_vec())
            .map_err(|e| Error::corrupted_record(record_position, e.to_string()))?;

        let mut offset = gtrid_start + gtrid_size;
        if offset + 4 > end_of_record {
            return Err(Error::corrupted_record(
                record_position,
                "unique names count overruns the record",
            ));
        }
        let unique_names_count = self.get_i32(offset);
        offset += 4;
        if unique_names_count < 0 {
            return Err(self.out_of_bounds(record_position, "unique names count", unique_names_count as i64, 0, i64::MAX));
        }

        let mut current_read = 4 + 8 + 4 + 4 + 1 + gtrid_size + 4;
        let mut unique_names = BTreeSet::new();
        for i in 0..unique_names_count {
            if offset + 2 > end_of_record {
                return Err(Error::corrupted_record(
                    record_position,
                    format!("length of name {} overruns the record", i),
                ));
            }
            let name_length = self.get_i16(offset);
            offset += 2;
            if name_length < 1 {
                return Err(self.out_of_bounds(
                    record_position,
                    &format!("length of name {}", i),
                    name_length as i64,
                    1,
                    i64::MAX,
                ));
            }
            let name_length = name_length as usize;
            current_read += 2 + name_length;
            if current_read > record_length as usize {
                return Err(Error::corrupted_record(
                    record_position,
                    format!(
                        "unique names too long ({} of {}, length {}, read {} of record length {})",
                        i + 1,
                        unique_names_count,
                        name_length,
                        current_read,
                        record_length
                    ),
                ));
            }
            let bytes = &self.buf[offset..offset + name_length];
            offset += name_length;
            if !bytes.is_ascii() {
                return Err(Error::corrupted_record(
                    record_position,
                    format!("name {} is not US-ASCII", i),
                ));
            }
            unique_names.insert(String::from_utf8_lossy(bytes).into_owned());
        }

        let record = JournalRecord::from_parts(
            status,
            record_length,
            header_length,
            time,
            sequence_number,
            crc32,
            gtrid,
            unique_names,
        );

        if !skip_crc_check && !record.is_crc32_correct() {
            return Err(Error::corrupted_record(
                record_position,
                format!(
                    "crc mismatch (recorded {}, calculated {})",
                    record.crc32(),
                    record.calculate_crc32()
                ),
            ));
        }

        Ok(Some(record))
    }

    fn out_of_bounds(
        &self,
        record_position: u64,
        field: &str,
        value: i64,
        lower: i64,
        upper: i64,
    ) -> Error {
        let upper = if upper == i64::MAX {
            "inf".to_string()
        } else {
            upper.to_string()
        };
        Error::corrupted_record(
            record_position,
            format!("field [{}] value {} is out of bounds [{}, {}]", field, value, lower, upper),
        )
    }

    fn get_i16(&self, offset: usize) -> i16 {
        i16::from_be_bytes(self.buf[offset..offset + 2].try_into().expect("slice of 2"))
    }

    fn get_i32(&self, offset: usize) -> i32 {
        i32::from_be_bytes(self.buf[offset..offset + 4].try_into().expect("slice of 4"))
    }

    fn get_i64(&self, offset: usize) -> i64 {
        i64::from_be_bytes(self.buf[offset..offset + 8].try_into().expect("slice of 8"))
    }
}
