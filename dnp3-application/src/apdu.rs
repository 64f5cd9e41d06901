//! APDU fragment buffer and header codec
//!
//! An [`Apdu`] is a bounded write buffer for one application-layer fragment.
//! The response context fills it through two cursors: a contiguous-range
//! writer for static data and a count-with-index-prefix writer for events.
//! Both write as many objects as the remaining space allows and report the
//! number written, so the caller can record where to resume on the next
//! fragment.
//!
//! Inbound fragments are parsed with [`ParsedApdu`] and its
//! [`HeaderReadIterator`], which walks the object headers and hands out the
//! payload slice belonging to each.

use crate::control::ControlField;
use crate::function::FunctionCode;
use crate::iin::IINField;
use crate::objects::{self, ObjectDescriptor};
use dnp3_core::{Dnp3Error, Dnp3Result, Dnp3Time};

/// 8-bit start/stop range
pub const QC_1B_START_STOP: u8 = 0x00;
/// 16-bit start/stop range
pub const QC_2B_START_STOP: u8 = 0x01;
/// All objects, no range field
pub const QC_ALL_OBJECTS: u8 = 0x06;
/// 8-bit count
pub const QC_1B_CNT: u8 = 0x07;
/// 16-bit count
pub const QC_2B_CNT: u8 = 0x08;
/// 8-bit count with 8-bit index prefixes
pub const QC_1B_CNT_1B_INDEX: u8 = 0x17;
/// 16-bit count with 16-bit index prefixes
pub const QC_2B_CNT_2B_INDEX: u8 = 0x28;

/// Write buffer for one APDU fragment
///
/// The buffer capacity is the maximum fragment size; writers never exceed
/// it. `start` begins a new fragment, clearing any previous content.
#[derive(Debug)]
pub struct Apdu {
    buf: Vec<u8>,
    capacity: usize,
    function: FunctionCode,
}

impl Apdu {
    /// Create an empty fragment buffer with the given capacity
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
            capacity,
            function: FunctionCode::Response,
        }
    }

    /// Begin a new fragment with the given function code
    ///
    /// Writes a zeroed control byte and, for response functions, a zeroed
    /// IIN field; both are patched in place when the fragment is finalized.
    pub fn start(&mut self, function: FunctionCode) {
        self.buf.clear();
        self.function = function;
        self.buf.push(0);
        self.buf.push(function.as_u8());
        if function.is_response() {
            self.buf.extend_from_slice(&[0, 0]);
        }
    }

    /// Function code this fragment was started with
    #[must_use]
    pub fn function(&self) -> FunctionCode {
        self.function
    }

    /// Patch the control byte
    pub fn set_control(&mut self, control: ControlField) {
        debug_assert!(!self.buf.is_empty());
        self.buf[0] = control.encode();
    }

    /// Current control byte
    #[must_use]
    pub fn control(&self) -> ControlField {
        ControlField::decode(*self.buf.first().unwrap_or(&0))
    }

    /// Patch the IIN field of a response fragment
    pub fn set_iin(&mut self, iin: IINField) {
        debug_assert!(self.function.is_response() && self.buf.len() >= 4);
        let bytes = iin.encode();
        self.buf[2] = bytes[0];
        self.buf[3] = bytes[1];
    }

    /// Encoded fragment bytes
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Whether the fragment contains no object data after its header
    #[must_use]
    pub fn is_empty_body(&self) -> bool {
        let header = if self.function.is_response() { 4 } else { 2 };
        self.buf.len() <= header
    }

    fn remaining(&self) -> usize {
        self.capacity.saturating_sub(self.buf.len())
    }

    /// Write a contiguous range of objects, as many as fit
    ///
    /// Emits one header with a start/stop qualifier covering the indices
    /// actually written and invokes `write` once per index with the slot to
    /// fill. Returns the number of objects written; zero means not even the
    /// header and one object fit, and nothing was emitted.
    pub fn write_contiguous_with<F>(
        &mut self,
        desc: &ObjectDescriptor,
        start: u16,
        stop: u16,
        mut write: F,
    ) -> usize
    where
        F: FnMut(u16, &mut [u8]),
    {
        debug_assert!(start <= stop);
        debug_assert!(desc.size > 0);
        let total = stop as usize - start as usize + 1;
        let wide = stop > u8::MAX as u16;
        let header = 3 + if wide { 4 } else { 2 };
        let avail = self.remaining();
        if avail < header + desc.size {
            return 0;
        }
        let n = ((avail - header) / desc.size).min(total);
        let last = (start as usize + n - 1) as u16;

        self.buf.push(desc.group);
        self.buf.push(desc.variation);
        if wide {
            self.buf.push(QC_2B_START_STOP);
            self.buf.extend_from_slice(&start.to_le_bytes());
            self.buf.extend_from_slice(&last.to_le_bytes());
        } else {
            self.buf.push(QC_1B_START_STOP);
            self.buf.push(start as u8);
            self.buf.push(last as u8);
        }

        for i in 0..n {
            let index = start + i as u16;
            let at = self.buf.len();
            self.buf.resize(at + desc.size, 0);
            write(index, &mut self.buf[at..at + desc.size]);
        }
        n
    }

    /// Write index-prefixed objects, as many as fit
    ///
    /// Emits one header with a count qualifier and one `(index, object)`
    /// entry per written element; `write` fills the object slot for the
    /// element at the given position in `indices`. The 8-bit form is used
    /// when every index and the candidate count fit in one octet. Returns
    /// the number of objects written.
    pub fn write_prefixed_with<F>(
        &mut self,
        desc: &ObjectDescriptor,
        indices: &[u16],
        mut write: F,
    ) -> usize
    where
        F: FnMut(usize, &mut [u8]),
    {
        if indices.is_empty() {
            return 0;
        }
        let narrow =
            indices.len() <= u8::MAX as usize && indices.iter().all(|i| *i <= u8::MAX as u16);
        let prefix = if narrow { 1 } else { 2 };
        let header = 3 + prefix;
        let entry = prefix + desc.size;
        let avail = self.remaining();
        if avail < header + entry {
            return 0;
        }
        let n = ((avail - header) / entry).min(indices.len());

        self.buf.push(desc.group);
        self.buf.push(desc.variation);
        if narrow {
            self.buf.push(QC_1B_CNT_1B_INDEX);
            self.buf.push(n as u8);
        } else {
            self.buf.push(QC_2B_CNT_2B_INDEX);
            self.buf.extend_from_slice(&(n as u16).to_le_bytes());
        }

        for (i, index) in indices.iter().take(n).enumerate() {
            if narrow {
                self.buf.push(*index as u8);
            } else {
                self.buf.extend_from_slice(&index.to_le_bytes());
            }
            let at = self.buf.len();
            self.buf.resize(at + desc.size, 0);
            write(i, &mut self.buf[at..at + desc.size]);
        }
        n
    }

    /// Write a single counted object with the given payload
    ///
    /// Returns false if the object did not fit; nothing is written in that
    /// case.
    pub fn write_count_of_one(&mut self, desc: &ObjectDescriptor, payload: &[u8]) -> bool {
        debug_assert_eq!(payload.len(), desc.size);
        if self.remaining() < 4 + desc.size {
            return false;
        }
        self.buf.push(desc.group);
        self.buf.push(desc.variation);
        self.buf.push(QC_1B_CNT);
        self.buf.push(1);
        self.buf.extend_from_slice(payload);
        true
    }

    /// Write a read header with the all-objects qualifier
    pub fn write_read_all(&mut self, group: u8, variation: u8) -> bool {
        if self.remaining() < 3 {
            return false;
        }
        self.buf.extend_from_slice(&[group, variation, QC_ALL_OBJECTS]);
        true
    }

    /// Write a read header with a count qualifier
    pub fn write_read_count(&mut self, group: u8, variation: u8, count: u16) -> bool {
        let narrow = count <= u8::MAX as u16;
        if self.remaining() < 3 + if narrow { 1 } else { 2 } {
            return false;
        }
        self.buf.push(group);
        self.buf.push(variation);
        if narrow {
            self.buf.push(QC_1B_CNT);
            self.buf.push(count as u8);
        } else {
            self.buf.push(QC_2B_CNT);
            self.buf.extend_from_slice(&count.to_le_bytes());
        }
        true
    }

    /// Write a header with a start/stop range and a bit-packed payload, one
    /// bit per index (group 80 variation 1 writes use this shape)
    pub fn write_packed_range(
        &mut self,
        group: u8,
        variation: u8,
        start: u16,
        stop: u16,
        bits: &[bool],
    ) -> bool {
        debug_assert_eq!(bits.len(), stop as usize - start as usize + 1);
        let wide = stop > u8::MAX as u16;
        let header = 3 + if wide { 4 } else { 2 };
        let payload = (bits.len() + 7) / 8;
        if self.remaining() < header + payload {
            return false;
        }
        self.buf.push(group);
        self.buf.push(variation);
        if wide {
            self.buf.push(QC_2B_START_STOP);
            self.buf.extend_from_slice(&start.to_le_bytes());
            self.buf.extend_from_slice(&stop.to_le_bytes());
        } else {
            self.buf.push(QC_1B_START_STOP);
            self.buf.push(start as u8);
            self.buf.push(stop as u8);
        }
        let at = self.buf.len();
        self.buf.resize(at + payload, 0);
        for (i, bit) in bits.iter().enumerate() {
            if *bit {
                self.buf[at + i / 8] |= 1 << (i % 8);
            }
        }
        true
    }
}

/// Range portion of a parsed object header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderRange {
    /// Qualifier 0x06: every object of the group
    AllObjects,
    /// Start/stop index range, inclusive
    Range { start: u16, stop: u16 },
    /// Object count (plain or index-prefixed)
    Count(u16),
}

/// One parsed object header with its payload slice
#[derive(Debug, Clone, Copy)]
pub struct Header<'a> {
    pub group: u8,
    pub variation: u8,
    pub qualifier: u8,
    pub range: HeaderRange,
    object_size: usize,
    objects: &'a [u8],
}

impl<'a> Header<'a> {
    /// Event count limit imposed by this header
    ///
    /// Only the plain count qualifiers limit event selection; every other
    /// qualifier means "no limit".
    #[must_use]
    pub fn event_count_limit(&self) -> usize {
        match (self.qualifier, self.range) {
            (QC_1B_CNT | QC_2B_CNT, HeaderRange::Count(n)) => n as usize,
            _ => usize::MAX,
        }
    }

    /// Raw payload bytes belonging to this header
    #[must_use]
    pub fn raw_objects(&self) -> &'a [u8] {
        self.objects
    }

    /// Iterate index-prefixed objects (qualifiers 0x17/0x28)
    #[must_use]
    pub fn prefixed(&self) -> PrefixedObjectIterator<'a> {
        let (count, prefix) = match (self.qualifier, self.range) {
            (QC_1B_CNT_1B_INDEX, HeaderRange::Count(n)) => (n as usize, 1),
            (QC_2B_CNT_2B_INDEX, HeaderRange::Count(n)) => (n as usize, 2),
            _ => (0, 1),
        };
        PrefixedObjectIterator {
            data: self.objects,
            pos: 0,
            remaining: count,
            prefix,
            size: self.object_size,
        }
    }

    /// Iterate contiguous objects of a range header with payload
    #[must_use]
    pub fn contiguous(&self) -> ContiguousObjectIterator<'a> {
        let (start, count) = match self.range {
            HeaderRange::Range { start, stop } => (start, stop as usize - start as usize + 1),
            _ => (0, 0),
        };
        ContiguousObjectIterator {
            data: self.objects,
            pos: 0,
            index: start,
            remaining: if self.object_size == 0 { 0 } else { count },
            size: self.object_size,
        }
    }

    /// Iterate the bits of a bit-packed range payload (group 80 var 1)
    #[must_use]
    pub fn packed_bits(&self) -> impl Iterator<Item = (u16, bool)> + 'a {
        let (start, count) = match self.range {
            HeaderRange::Range { start, stop } => (start, stop as usize - start as usize + 1),
            _ => (0, 0),
        };
        let data = self.objects;
        (0..count).map(move |i| {
            let byte = data.get(i / 8).copied().unwrap_or(0);
            (start + i as u16, byte & (1 << (i % 8)) != 0)
        })
    }

    /// Decode a 48-bit absolute time payload (group 50 var 1, count 1)
    pub fn time48(&self) -> Dnp3Result<Dnp3Time> {
        if self.objects.len() < 6 {
            return Err(Dnp3Error::MalformedApdu(
                "time object payload is shorter than 6 octets".to_string(),
            ));
        }
        let mut bytes = [0u8; 8];
        bytes[..6].copy_from_slice(&self.objects[..6]);
        Ok(Dnp3Time::from_millis(u64::from_le_bytes(bytes)))
    }
}

/// Iterator over `(index, object_bytes)` entries of a prefixed header
#[derive(Debug)]
pub struct PrefixedObjectIterator<'a> {
    data: &'a [u8],
    pos: usize,
    remaining: usize,
    prefix: usize,
    size: usize,
}

impl<'a> Iterator for PrefixedObjectIterator<'a> {
    type Item = (u16, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 || self.data.len() < self.pos + self.prefix + self.size {
            return None;
        }
        let index = if self.prefix == 1 {
            self.data[self.pos] as u16
        } else {
            u16::from_le_bytes([self.data[self.pos], self.data[self.pos + 1]])
        };
        let at = self.pos + self.prefix;
        let object = &self.data[at..at + self.size];
        self.pos = at + self.size;
        self.remaining -= 1;
        Some((index, object))
    }
}

/// Iterator over `(index, object_bytes)` entries of a range header
#[derive(Debug)]
pub struct ContiguousObjectIterator<'a> {
    data: &'a [u8],
    pos: usize,
    index: u16,
    remaining: usize,
    size: usize,
}

impl<'a> Iterator for ContiguousObjectIterator<'a> {
    type Item = (u16, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 || self.data.len() < self.pos + self.size {
            return None;
        }
        let object = &self.data[self.pos..self.pos + self.size];
        let index = self.index;
        self.pos += self.size;
        self.index = self.index.wrapping_add(1);
        self.remaining -= 1;
        Some((index, object))
    }
}

/// Parsed view of one inbound APDU fragment
#[derive(Debug, Clone, Copy)]
pub struct ParsedApdu<'a> {
    pub control: ControlField,
    pub function: FunctionCode,
    /// Present only on response functions
    pub iin: Option<IINField>,
    objects: &'a [u8],
}

impl<'a> ParsedApdu<'a> {
    /// Parse the fragment header and locate the object data
    ///
    /// # Errors
    /// Fails on truncated fragments and unknown function codes.
    pub fn parse(bytes: &'a [u8]) -> Dnp3Result<Self> {
        if bytes.len() < 2 {
            return Err(Dnp3Error::MalformedApdu(format!(
                "fragment of {} octets is shorter than the application header",
                bytes.len()
            )));
        }
        let control = ControlField::decode(bytes[0]);
        let function = FunctionCode::from_u8(bytes[1])?;
        if function.is_response() {
            if bytes.len() < 4 {
                return Err(Dnp3Error::MalformedApdu(
                    "response fragment is missing the IIN field".to_string(),
                ));
            }
            Ok(Self {
                control,
                function,
                iin: Some(IINField::decode([bytes[2], bytes[3]])),
                objects: &bytes[4..],
            })
        } else {
            Ok(Self {
                control,
                function,
                iin: None,
                objects: &bytes[2..],
            })
        }
    }

    /// Raw object data of this fragment, headers included
    ///
    /// SELECT/OPERATE pairing compares this region byte-for-byte.
    #[must_use]
    pub fn raw_objects(&self) -> &'a [u8] {
        self.objects
    }

    /// Iterate the object headers of this fragment
    #[must_use]
    pub fn headers(&self) -> HeaderReadIterator<'a> {
        HeaderReadIterator {
            data: self.objects,
            pos: 0,
            function: self.function,
            failed: false,
        }
    }
}

fn carries_object_data(function: FunctionCode) -> bool {
    !matches!(
        function,
        FunctionCode::Read
            | FunctionCode::EnableUnsolicited
            | FunctionCode::DisableUnsolicited
            | FunctionCode::DelayMeasure
    )
}

/// Iterator over the object headers of a fragment
///
/// Read-style functions carry headers without object data; for all other
/// functions the payload length is derived from the object registry, so an
/// unknown `(group, variation)` pair aborts iteration with an error.
#[derive(Debug)]
pub struct HeaderReadIterator<'a> {
    data: &'a [u8],
    pos: usize,
    function: FunctionCode,
    failed: bool,
}

impl<'a> HeaderReadIterator<'a> {
    fn take(&mut self, n: usize) -> Dnp3Result<&'a [u8]> {
        if self.data.len() < self.pos + n {
            return Err(Dnp3Error::MalformedApdu(format!(
                "object header truncated at offset {}",
                self.pos
            )));
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn parse_next(&mut self) -> Dnp3Result<Header<'a>> {
        let fixed = self.take(3)?;
        let (group, variation, qualifier) = (fixed[0], fixed[1], fixed[2]);

        let range = match qualifier {
            QC_1B_START_STOP => {
                let r = self.take(2)?;
                HeaderRange::Range {
                    start: r[0] as u16,
                    stop: r[1] as u16,
                }
            }
            QC_2B_START_STOP => {
                let r = self.take(4)?;
                HeaderRange::Range {
                    start: u16::from_le_bytes([r[0], r[1]]),
                    stop: u16::from_le_bytes([r[2], r[3]]),
                }
            }
            QC_ALL_OBJECTS => HeaderRange::AllObjects,
            QC_1B_CNT | QC_1B_CNT_1B_INDEX => {
                let r = self.take(1)?;
                HeaderRange::Count(r[0] as u16)
            }
            QC_2B_CNT | QC_2B_CNT_2B_INDEX => {
                let r = self.take(2)?;
                HeaderRange::Count(u16::from_le_bytes([r[0], r[1]]))
            }
            other => {
                return Err(Dnp3Error::MalformedApdu(format!(
                    "unsupported qualifier 0x{:02X} for group {} var {}",
                    other, group, variation
                )))
            }
        };

        if let HeaderRange::Range { start, stop } = range {
            if stop < start {
                return Err(Dnp3Error::MalformedApdu(format!(
                    "inverted range {}..{} for group {}",
                    start, stop, group
                )));
            }
        }

        let (object_size, payload) = if carries_object_data(self.function) {
            let size = objects::object_size(group, variation).ok_or_else(|| {
                Dnp3Error::MalformedApdu(format!(
                    "no object definition for group {} var {}",
                    group, variation
                ))
            })?;
            let payload = match range {
                HeaderRange::AllObjects => 0,
                HeaderRange::Range { start, stop } => {
                    let count = stop as usize - start as usize + 1;
                    if group == 80 {
                        (count + 7) / 8
                    } else {
                        count * size
                    }
                }
                HeaderRange::Count(n) => {
                    let prefix = match qualifier {
                        QC_1B_CNT_1B_INDEX => 1,
                        QC_2B_CNT_2B_INDEX => 2,
                        _ => 0,
                    };
                    n as usize * (prefix + size)
                }
            };
            (size, payload)
        } else {
            (0, 0)
        };

        let objects = self.take(payload)?;
        Ok(Header {
            group,
            variation,
            qualifier,
            range,
            object_size,
            objects,
        })
    }
}

impl<'a> Iterator for HeaderReadIterator<'a> {
    type Item = Dnp3Result<Header<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.pos >= self.data.len() {
            return None;
        }
        match self.parse_next() {
            Ok(header) => Some(Ok(header)),
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}
