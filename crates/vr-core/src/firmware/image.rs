//! Vendor text image parser.
//!
//! An image is a sequence of tab-separated records, each terminated by CR
//! (an LF directly after the CR is skipped):
//!
//! ```text
//! config-id  page  reg(hex)  reg(dec)  reg-name  data(hex)  data(dec)
//! ```
//!
//! Only the config id, page, register and hex data are kept. A record whose
//! first field starts with `END` stops parsing. The whole image is parsed up
//! front so a malformed file never reaches the bus.

use std::fmt;

use thiserror::Error;

const TAB: u8 = 0x09;
const LF: u8 = 0x0A;
const CR: u8 = 0x0D;
const END_MARKER: &[u8] = b"END";
const MAX_PAYLOAD: usize = 4;

/// Columns of one image record, in file order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    ConfigId,
    Page,
    RegAddrHex,
    RegAddrDec,
    RegName,
    RegDataHex,
    RegDataDec,
}

impl Field {
    const ORDER: [Field; 7] = [
        Field::ConfigId,
        Field::Page,
        Field::RegAddrHex,
        Field::RegAddrDec,
        Field::RegName,
        Field::RegDataHex,
        Field::RegDataDec,
    ];

    fn at(index: usize) -> Option<Field> {
        Self::ORDER.get(index).copied()
    }

    /// Largest number of significant hex digits a kept field can hold.
    fn max_digits(self) -> Option<usize> {
        match self {
            Field::ConfigId => Some(4),
            Field::Page | Field::RegAddrHex => Some(2),
            Field::RegDataHex => Some(MAX_PAYLOAD * 2),
            _ => None,
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Field::ConfigId => "config id",
            Field::Page => "page",
            Field::RegAddrHex => "register",
            Field::RegAddrDec => "register (dec)",
            Field::RegName => "register name",
            Field::RegDataHex => "data",
            Field::RegDataDec => "data (dec)",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ImageError {
    #[error("Zero byte at offset {offset}")]
    NulByte { offset: usize },

    #[error("Invalid character 0x{byte:02X} in {field} at offset {offset}")]
    InvalidHex { offset: usize, byte: u8, field: Field },

    #[error("Record {record} has an empty payload")]
    EmptyPayload { record: usize },

    #[error("Record {record} payload is {digits} hex digits, at most {max} allowed")]
    PayloadTooLong {
        record: usize,
        digits: usize,
        max: usize,
    },

    #[error("Record {record} {field} does not fit its width")]
    FieldOverflow { record: usize, field: Field },

    #[error("Record {record} has more than 7 fields")]
    TooManyFields { record: usize },

    #[error("Record {record} ends after {field}")]
    IncompleteRecord { record: usize, field: Field },

    #[error("Record {record} is not terminated by CR")]
    UnterminatedRecord { record: usize },

    #[error("Record {record} targets page {page}, device has {pages} pages")]
    PageOutOfRange { record: usize, page: u8, pages: u8 },

    #[error("Image exceeds {limit} records")]
    TooManyRecords { limit: usize },

    #[error("Image contains no records")]
    NoRecords,
}

/// One register write of a firmware image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirmwareRecord {
    pub config_id: u16,
    pub page: u8,
    pub register: u8,
    /// Payload bytes, little-endian, valid up to `len`.
    pub data: [u8; MAX_PAYLOAD],
    pub len: usize,
}

impl FirmwareRecord {
    pub fn payload(&self) -> &[u8] {
        &self.data[..self.len]
    }
}

/// A fully parsed image, records in file order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareImage {
    records: Vec<FirmwareRecord>,
}

impl FirmwareImage {
    /// Parse `bytes`, rejecting images with more than `max_records` records.
    pub fn parse(bytes: &[u8], max_records: usize) -> Result<Self, ImageError> {
        let mut parser = Parser::default();
        let mut records = Vec::new();
        let mut i = 0;

        while i < bytes.len() {
            let b = bytes[i];
            if b == 0 {
                return Err(ImageError::NulByte { offset: i });
            }
            if parser.at_record_start() && bytes[i..].starts_with(END_MARKER) {
                return Self::finish(records);
            }

            match b {
                TAB => parser.next_field(records.len())?,
                CR => {
                    if let Some(record) = parser.end_record(records.len())? {
                        if records.len() == max_records {
                            return Err(ImageError::TooManyRecords { limit: max_records });
                        }
                        records.push(record);
                    }
                    if bytes.get(i + 1) == Some(&LF) {
                        i += 1;
                    }
                }
                _ => parser.push(b, i, records.len())?,
            }
            i += 1;
        }

        if !parser.at_record_start() {
            return Err(ImageError::UnterminatedRecord {
                record: records.len(),
            });
        }
        Self::finish(records)
    }

    fn finish(records: Vec<FirmwareRecord>) -> Result<Self, ImageError> {
        if records.is_empty() {
            return Err(ImageError::NoRecords);
        }
        Ok(Self { records })
    }

    pub fn records(&self) -> &[FirmwareRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Reject records addressed to pages the target device does not have.
    pub fn check_pages(&self, pages: u8) -> Result<(), ImageError> {
        match self.records.iter().position(|r| r.page >= pages) {
            Some(record) => Err(ImageError::PageOutOfRange {
                record,
                page: self.records[record].page,
                pages,
            }),
            None => Ok(()),
        }
    }

    /// Page selects needed to replay the image, counting the first record.
    pub fn page_changes(&self) -> usize {
        let mut last = None;
        self.records
            .iter()
            .filter(|r| last.replace(r.page) != Some(r.page))
            .count()
    }
}

/// Per-record accumulator.
#[derive(Default)]
struct Parser {
    field: usize,
    value: u32,
    /// Significant digits, leading zeros excluded.
    significant: usize,
    /// All digits, leading zeros included.
    digits: usize,
    touched: bool,
    current: Partial,
}

#[derive(Default)]
struct Partial {
    config_id: u16,
    page: u8,
    register: u8,
    data: Option<(u32, usize)>,
}

impl Parser {
    fn at_record_start(&self) -> bool {
        self.field == 0 && !self.touched
    }

    fn push(&mut self, b: u8, offset: usize, record: usize) -> Result<(), ImageError> {
        self.touched = true;
        let Some(field) = Field::at(self.field) else {
            return Err(ImageError::TooManyFields { record });
        };
        if field == Field::RegName {
            return Ok(());
        }
        let digit = (b as char)
            .to_digit(16)
            .ok_or(ImageError::InvalidHex { offset, byte: b, field })?;

        let Some(max) = field.max_digits() else {
            return Ok(());
        };
        self.digits += 1;
        if field == Field::RegDataHex && self.digits > max {
            return Err(ImageError::PayloadTooLong {
                record,
                digits: self.digits,
                max,
            });
        }
        if self.significant == 0 && digit == 0 {
            return Ok(());
        }
        self.significant += 1;
        if self.significant > max {
            return Err(ImageError::FieldOverflow { record, field });
        }
        self.value = (self.value << 4) | digit;
        Ok(())
    }

    fn next_field(&mut self, record: usize) -> Result<(), ImageError> {
        self.touched = true;
        self.commit_field(record)?;
        self.field += 1;
        if self.field >= Field::ORDER.len() {
            return Err(ImageError::TooManyFields { record });
        }
        Ok(())
    }

    fn commit_field(&mut self, record: usize) -> Result<(), ImageError> {
        match Field::at(self.field) {
            Some(Field::ConfigId) => self.current.config_id = self.value as u16,
            Some(Field::Page) => self.current.page = self.value as u8,
            Some(Field::RegAddrHex) => self.current.register = self.value as u8,
            Some(Field::RegDataHex) => {
                if self.digits == 0 {
                    return Err(ImageError::EmptyPayload { record });
                }
                // Width follows the digits written, leading zeros included.
                self.current.data = Some((self.value, self.digits.div_ceil(2)));
            }
            Some(_) => {}
            None => return Err(ImageError::TooManyFields { record }),
        }
        self.value = 0;
        self.significant = 0;
        self.digits = 0;
        Ok(())
    }

    /// Close the current record. Blank lines yield nothing.
    fn end_record(&mut self, record: usize) -> Result<Option<FirmwareRecord>, ImageError> {
        if self.at_record_start() {
            return Ok(None);
        }
        let field = Field::at(self.field).unwrap_or(Field::RegDataDec);
        if self.field < 5 {
            return Err(ImageError::IncompleteRecord { record, field });
        }
        self.commit_field(record)?;
        let Some((value, len)) = self.current.data else {
            return Err(ImageError::EmptyPayload { record });
        };

        let out = FirmwareRecord {
            config_id: self.current.config_id,
            page: self.current.page,
            register: self.current.register,
            data: value.to_le_bytes(),
            len,
        };
        *self = Parser::default();
        Ok(Some(out))
    }
}
