//! Structured banked records
//!
//! The wire format between data acquisition and reconstruction is a tree of
//! typed banks: a 2-byte tag, a bank number, a payload kind and a
//! length-prefixed payload that is either child banks or a flat data array.
//! This module owns the decode/encode of that framing, the reserved
//! control-frame tags used by run control, and the [`StructuredRecord`]
//! wrapper that carries the parsed tree plus its resolved event number and
//! physics/control classification.
//!
//! Decoding is strict: truncated headers, payloads crossing a container
//! boundary, misaligned data arrays and trailing garbage are all rejected
//! with the absolute byte offset at which the problem was found.

use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Reserved tags understood by run control.
pub mod tags {
    /// Synchronization control frame.
    pub const SYNC: u16 = 16;
    /// Start-of-run control frame; payload is `[unix seconds, run, run type]`.
    pub const PRESTART: u16 = 17;
    /// Data-taking resumed.
    pub const GO: u16 = 18;
    /// Data-taking paused.
    pub const PAUSE: u16 = 19;
    /// End-of-run control frame; payload is `[unix seconds, _, total events]`.
    pub const END: u16 = 20;
    /// Slow-controls readout frame.
    pub const EPICS: u16 = 31;
    /// Identifier bank holding the event number as its first word.
    pub const EVENT_ID: u16 = 0xC000;
}

/// Tag used by the synthetic producers and fixtures for physics frames.
pub const PHYSICS_EVENT_TAG: u16 = 1;

/// Banks nested deeper than this are rejected by the decoder.
const MAX_BANK_DEPTH: usize = 16;

/// Payload kind discriminants on the wire.
const KIND_CONTAINER: u8 = 0;
const KIND_U32: u8 = 1;
const KIND_F64: u8 = 2;
const KIND_RAW: u8 = 3;

/// Control-frame kinds derived from a record's root tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlFrame {
    /// Synchronization marker.
    Sync,
    /// Start of run.
    Prestart,
    /// Data-taking resumed.
    Go,
    /// Data-taking paused.
    Pause,
    /// End of run.
    End,
    /// Slow-controls readout.
    Epics,
}

impl ControlFrame {
    /// Map a bank tag to its control-frame kind, if it is one.
    pub fn from_tag(tag: u16) -> Option<ControlFrame> {
        match tag {
            tags::SYNC => Some(ControlFrame::Sync),
            tags::PRESTART => Some(ControlFrame::Prestart),
            tags::GO => Some(ControlFrame::Go),
            tags::PAUSE => Some(ControlFrame::Pause),
            tags::END => Some(ControlFrame::End),
            tags::EPICS => Some(ControlFrame::Epics),
            _ => None,
        }
    }
}

/// Payload of a single bank: either child banks or one flat data array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BankPayload {
    /// Child banks, in wire order.
    Banks(Vec<Bank>),
    /// 32-bit unsigned words.
    U32(Vec<u32>),
    /// 64-bit floats.
    F64(Vec<f64>),
    /// Uninterpreted bytes.
    Raw(Vec<u8>),
}

/// One node of a banked record tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bank {
    /// Bank tag; reserved values are listed in [`tags`].
    pub tag: u16,
    /// Bank number, distinguishing repeated tags from different sources.
    pub number: u8,
    /// Child banks or flat data.
    pub payload: BankPayload,
}

impl Bank {
    /// Container bank holding child banks.
    pub fn container(tag: u16, number: u8, children: Vec<Bank>) -> Bank {
        Bank {
            tag,
            number,
            payload: BankPayload::Banks(children),
        }
    }

    /// Leaf bank of 32-bit words.
    pub fn u32_data(tag: u16, number: u8, words: Vec<u32>) -> Bank {
        Bank {
            tag,
            number,
            payload: BankPayload::U32(words),
        }
    }

    /// Leaf bank of 64-bit floats.
    pub fn f64_data(tag: u16, number: u8, values: Vec<f64>) -> Bank {
        Bank {
            tag,
            number,
            payload: BankPayload::F64(values),
        }
    }

    /// Leaf bank of raw bytes.
    pub fn raw_data(tag: u16, number: u8, bytes: Vec<u8>) -> Bank {
        Bank {
            tag,
            number,
            payload: BankPayload::Raw(bytes),
        }
    }

    /// Immediate children, or an empty slice for leaf banks.
    pub fn children(&self) -> &[Bank] {
        match &self.payload {
            BankPayload::Banks(children) => children,
            _ => &[],
        }
    }

    /// First immediate child with the given tag.
    pub fn find_child(&self, tag: u16) -> Option<&Bank> {
        self.children().iter().find(|b| b.tag == tag)
    }

    /// 32-bit words of a leaf bank, if that is what it holds.
    pub fn as_u32(&self) -> Option<&[u32]> {
        match &self.payload {
            BankPayload::U32(words) => Some(words),
            _ => None,
        }
    }

    /// Floats of a leaf bank, if that is what it holds.
    pub fn as_f64(&self) -> Option<&[f64]> {
        match &self.payload {
            BankPayload::F64(values) => Some(values),
            _ => None,
        }
    }

    /// Decode one bank tree from `buf`, consuming the whole buffer.
    ///
    /// `origin` identifies the source for error context (e.g. a file path or
    /// queue label).
    pub fn decode(buf: &[u8], origin: &str) -> Result<Bank> {
        let mut decoder = Decoder {
            buf,
            pos: 0,
            origin,
        };
        let bank = decoder.bank(buf.len(), 0)?;
        if decoder.pos != buf.len() {
            return Err(decoder.malformed(format!(
                "{} trailing bytes after root bank",
                buf.len() - decoder.pos
            )));
        }
        Ok(bank)
    }

    /// Serialized size of this bank in bytes.
    pub fn encoded_len(&self) -> usize {
        let payload = match &self.payload {
            BankPayload::Banks(children) => children.iter().map(Bank::encoded_len).sum(),
            BankPayload::U32(words) => words.len() * 4,
            BankPayload::F64(values) => values.len() * 8,
            BankPayload::Raw(bytes) => bytes.len(),
        };
        8 + payload
    }

    /// Encode this bank tree to its wire form.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        self.encode_into(&mut out);
        out
    }

    fn encode_into(&self, out: &mut Vec<u8>) {
        out.put_u16_le(self.tag);
        out.put_u8(self.number);
        let (kind, payload_len) = match &self.payload {
            BankPayload::Banks(children) => (
                KIND_CONTAINER,
                children.iter().map(Bank::encoded_len).sum::<usize>(),
            ),
            BankPayload::U32(words) => (KIND_U32, words.len() * 4),
            BankPayload::F64(values) => (KIND_F64, values.len() * 8),
            BankPayload::Raw(bytes) => (KIND_RAW, bytes.len()),
        };
        out.put_u8(kind);
        out.put_u32_le(payload_len as u32);
        match &self.payload {
            BankPayload::Banks(children) => {
                for child in children {
                    child.encode_into(out);
                }
            }
            BankPayload::U32(words) => {
                for word in words {
                    out.put_u32_le(*word);
                }
            }
            BankPayload::F64(values) => {
                for value in values {
                    out.put_f64_le(*value);
                }
            }
            BankPayload::Raw(bytes) => out.put_slice(bytes),
        }
    }
}

/// Strict linear decoder tracking absolute offsets.
struct Decoder<'a> {
    buf: &'a [u8],
    pos: usize,
    origin: &'a str,
}

impl<'a> Decoder<'a> {
    fn malformed(&self, message: impl Into<String>) -> Error {
        Error::MalformedRecord {
            origin: self.origin.to_string(),
            offset: self.pos,
            message: message.into(),
        }
    }

    fn take(&mut self, n: usize, limit: usize, what: &str) -> Result<&'a [u8]> {
        if self.pos + n > limit {
            return Err(self.malformed(format!(
                "truncated {} (need {} bytes, {} available)",
                what,
                n,
                limit - self.pos
            )));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn bank(&mut self, limit: usize, depth: usize) -> Result<Bank> {
        if depth >= MAX_BANK_DEPTH {
            return Err(self.malformed(format!("bank nesting exceeds {} levels", MAX_BANK_DEPTH)));
        }
        let mut header = self.take(8, limit, "bank header")?;
        let tag = header.get_u16_le();
        let number = header.get_u8();
        let kind = header.get_u8();
        let payload_len = header.get_u32_le() as usize;

        let payload_start = self.pos;
        if payload_start + payload_len > limit {
            return Err(self.malformed(format!(
                "bank payload of {} bytes crosses its container boundary",
                payload_len
            )));
        }
        let payload_end = payload_start + payload_len;

        let payload = match kind {
            KIND_CONTAINER => {
                let mut children = Vec::new();
                while self.pos < payload_end {
                    children.push(self.bank(payload_end, depth + 1)?);
                }
                BankPayload::Banks(children)
            }
            KIND_U32 => {
                if payload_len % 4 != 0 {
                    return Err(
                        self.malformed(format!("u32 payload of {} bytes not aligned", payload_len))
                    );
                }
                let mut body = self.take(payload_len, payload_end, "u32 payload")?;
                let mut words = Vec::with_capacity(payload_len / 4);
                while body.has_remaining() {
                    words.push(body.get_u32_le());
                }
                BankPayload::U32(words)
            }
            KIND_F64 => {
                if payload_len % 8 != 0 {
                    return Err(
                        self.malformed(format!("f64 payload of {} bytes not aligned", payload_len))
                    );
                }
                let mut body = self.take(payload_len, payload_end, "f64 payload")?;
                let mut values = Vec::with_capacity(payload_len / 8);
                while body.has_remaining() {
                    values.push(body.get_f64_le());
                }
                BankPayload::F64(values)
            }
            KIND_RAW => {
                let body = self.take(payload_len, payload_end, "raw payload")?;
                BankPayload::Raw(body.to_vec())
            }
            other => {
                // Header was already consumed; point at it, not the payload.
                self.pos = payload_start - 5;
                return Err(self.malformed(format!("unknown payload kind {}", other)));
            }
        };

        Ok(Bank {
            tag,
            number,
            payload,
        })
    }
}

/// Run metadata carried by a PRESTART frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrestartInfo {
    /// Unix time the run started.
    pub time_secs: u32,
    /// Run number.
    pub run: u32,
    /// Run type code.
    pub run_type: u32,
}

/// Run metadata carried by an END frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndInfo {
    /// Unix time the run ended.
    pub time_secs: u32,
    /// Total events recorded in the run.
    pub total_events: u32,
}

/// A parsed banked record: the bank tree plus metadata resolved at parse
/// time.
///
/// Immutable once constructed. Records decoded from raw network bytes get
/// their event number by scanning the root's immediate children for the
/// identifier bank; records read back from structured-record files carry
/// the number intrinsically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredRecord {
    root: Bank,
    event_number: Option<u64>,
}

impl StructuredRecord {
    /// Wrap a bank tree, resolving the event number from the identifier
    /// bank if present.
    pub fn new(root: Bank) -> StructuredRecord {
        let event_number = scan_event_number(&root);
        StructuredRecord { root, event_number }
    }

    /// Wrap a bank tree with a known event number.
    pub fn with_event_number(root: Bank, event_number: u64) -> StructuredRecord {
        StructuredRecord {
            root,
            event_number: Some(event_number),
        }
    }

    /// Parse a raw byte buffer into a record.
    pub fn from_wire(buf: &[u8], origin: &str) -> Result<StructuredRecord> {
        let root = Bank::decode(buf, origin)?;
        Ok(StructuredRecord::new(root))
    }

    /// Encode back to wire form. The event number is not re-attached; it
    /// lives in the identifier bank if the tree has one.
    pub fn to_wire(&self) -> Vec<u8> {
        self.root.encode()
    }

    /// The bank tree.
    pub fn root(&self) -> &Bank {
        &self.root
    }

    /// Event number resolved from the identifier bank, if any.
    pub fn event_number(&self) -> Option<u64> {
        self.event_number
    }

    /// Control-frame kind, if the root carries a reserved tag.
    pub fn control_frame(&self) -> Option<ControlFrame> {
        ControlFrame::from_tag(self.root.tag)
    }

    /// Whether this record is a control frame rather than a physics frame.
    pub fn is_control(&self) -> bool {
        self.control_frame().is_some()
    }

    /// Whether this record is a physics frame.
    pub fn is_physics(&self) -> bool {
        !self.is_control()
    }

    /// Whether this record marks the end of a run.
    pub fn is_end(&self) -> bool {
        self.control_frame() == Some(ControlFrame::End)
    }

    /// Whether this record marks the start of a run.
    pub fn is_prestart(&self) -> bool {
        self.control_frame() == Some(ControlFrame::Prestart)
    }

    /// Run metadata from a PRESTART frame.
    pub fn prestart_info(&self) -> Option<PrestartInfo> {
        if !self.is_prestart() {
            return None;
        }
        let words = self.root.as_u32()?;
        if words.len() < 3 {
            return None;
        }
        Some(PrestartInfo {
            time_secs: words[0],
            run: words[1],
            run_type: words[2],
        })
    }

    /// Run metadata from an END frame.
    pub fn end_info(&self) -> Option<EndInfo> {
        if !self.is_end() {
            return None;
        }
        let words = self.root.as_u32()?;
        if words.len() < 3 {
            return None;
        }
        Some(EndInfo {
            time_secs: words[0],
            total_events: words[2],
        })
    }
}

fn scan_event_number(root: &Bank) -> Option<u64> {
    let id_bank = root.find_child(tags::EVENT_ID)?;
    let words = id_bank.as_u32()?;
    words.first().map(|n| u64::from(*n))
}

/// Build a physics frame: a container with the identifier bank first,
/// then the given data banks.
pub fn physics_frame(event_number: u32, data: Vec<Bank>) -> Bank {
    let mut children = Vec::with_capacity(data.len() + 1);
    children.push(Bank::u32_data(tags::EVENT_ID, 0, vec![event_number]));
    children.extend(data);
    Bank::container(PHYSICS_EVENT_TAG, 0, children)
}

/// Build a PRESTART control frame.
pub fn prestart_frame(time_secs: u32, run: u32, run_type: u32) -> Bank {
    Bank::u32_data(tags::PRESTART, 0, vec![time_secs, run, run_type])
}

/// Build a GO control frame.
pub fn go_frame(time_secs: u32, events_so_far: u32) -> Bank {
    Bank::u32_data(tags::GO, 0, vec![time_secs, 0, events_so_far])
}

/// Build an END control frame.
pub fn end_frame(time_secs: u32, total_events: u32) -> Bank {
    Bank::u32_data(tags::END, 0, vec![time_secs, 0, total_events])
}
