//! Minimal GGUF header probe
//!
//! Reads the fixed 24-byte header and, for format versions 2 and 3, scans the
//! metadata key/value section for the handful of keys that describe model
//! shape. The scan is bounded by [`SCAN_BYTE_BUDGET`] and
//! [`MAX_SCANNED_ENTRIES`]; any decode problem simply ends it. Nothing here
//! fails an estimate.
//!
//! Layout (little-endian):
//!
//! ```text
//! magic "GGUF" | version u32 | tensor_count u64 | kv_count u64 | kv entries...
//! kv entry: key (u64 len + utf8) | value_type u32 | value
//! ```

use std::io::{self, Read};

use serde::{Deserialize, Serialize};

/// File magic
pub const GGUF_MAGIC: [u8; 4] = *b"GGUF";

/// Size of the fixed header
pub const HEADER_LEN: usize = 24;

/// Maximum number of bytes read while scanning metadata
pub const SCAN_BYTE_BUDGET: u64 = 4 * 1024 * 1024;

/// Maximum number of metadata entries examined
pub const MAX_SCANNED_ENTRIES: u64 = 4096;

/// Longest key or string value the scan will materialize
const MAX_STRING_LEN: u64 = 64 * 1024;

/// Nested arrays deeper than this end the scan
const MAX_ARRAY_DEPTH: u32 = 4;

const TYPE_U8: u32 = 0;
const TYPE_I8: u32 = 1;
const TYPE_U16: u32 = 2;
const TYPE_I16: u32 = 3;
const TYPE_U32: u32 = 4;
const TYPE_I32: u32 = 5;
const TYPE_F32: u32 = 6;
const TYPE_BOOL: u32 = 7;
const TYPE_STRING: u32 = 8;
const TYPE_ARRAY: u32 = 9;
const TYPE_U64: u32 = 10;
const TYPE_I64: u32 = 11;
const TYPE_F64: u32 = 12;

/// Fixed GGUF header fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GgufHeader {
    pub version: u32,
    pub tensor_count: u64,
    pub metadata_kv_count: u64,
}

impl GgufHeader {
    /// Parse the header from the first [`HEADER_LEN`] bytes.
    ///
    /// Returns `None` when the buffer is short or the magic does not match.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < HEADER_LEN || bytes[0..4] != GGUF_MAGIC {
            return None;
        }
        let u32_at = |at: usize| {
            let mut buf = [0u8; 4];
            buf.copy_from_slice(&bytes[at..at + 4]);
            u32::from_le_bytes(buf)
        };
        let u64_at = |at: usize| {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(&bytes[at..at + 8]);
            u64::from_le_bytes(buf)
        };
        Some(Self {
            version: u32_at(4),
            tensor_count: u64_at(8),
            metadata_kv_count: u64_at(16),
        })
    }

    /// Whether the key/value layout of this version is understood.
    pub fn supports_metadata_scan(&self) -> bool {
        matches!(self.version, 2 | 3)
    }
}

/// Shape facts recovered from header metadata
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderFacts {
    pub architecture: Option<String>,
    pub block_count: Option<u64>,
    pub embedding_length: Option<u64>,
}

impl HeaderFacts {
    fn complete(&self) -> bool {
        self.architecture.is_some() && self.block_count.is_some() && self.embedding_length.is_some()
    }
}

/// Result of probing the start of an artifact
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderProbe {
    /// First four bytes were `GGUF`
    pub magic_present: bool,
    /// Parsed fixed header, when the magic matched and 24 bytes were present
    pub header: Option<GgufHeader>,
    /// Metadata recovered by the bounded scan
    pub facts: HeaderFacts,
}

/// Probe a reader positioned at the start of an artifact.
///
/// Short input is not an error; it yields a probe without magic. I/O errors
/// other than end-of-file are returned.
pub fn probe<R: Read>(reader: R) -> io::Result<HeaderProbe> {
    let mut reader = reader.take(SCAN_BYTE_BUDGET);

    let mut head = [0u8; HEADER_LEN];
    let filled = read_up_to(&mut reader, &mut head)?;

    let magic_present = filled >= GGUF_MAGIC.len() && head[0..4] == GGUF_MAGIC;
    let header = GgufHeader::parse(&head[..filled]);

    let mut facts = HeaderFacts::default();
    if let Some(header) = header.filter(GgufHeader::supports_metadata_scan) {
        let mut scanner = KvScanner {
            reader: &mut reader,
        };
        let entries = header.metadata_kv_count.min(MAX_SCANNED_ENTRIES);
        for _ in 0..entries {
            if scanner.next_entry(&mut facts).is_none() || facts.complete() {
                break;
            }
        }
    }

    Ok(HeaderProbe {
        magic_present,
        header,
        facts,
    })
}

fn read_up_to<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

struct KvScanner<'a, R: Read> {
    reader: &'a mut R,
}

impl<R: Read> KvScanner<'_, R> {
    /// Decode one entry, recording it if it is one of the shape keys.
    /// `None` means the scan cannot continue.
    fn next_entry(&mut self, facts: &mut HeaderFacts) -> Option<()> {
        let key = self.read_string()?;
        let value_type = self.read_u32()?;

        if key == "general.architecture" && value_type == TYPE_STRING {
            facts.architecture = Some(self.read_string()?);
        } else if key.ends_with(".block_count") {
            facts.block_count = self.read_unsigned(value_type)?;
        } else if key.ends_with(".embedding_length") {
            facts.embedding_length = self.read_unsigned(value_type)?;
        } else {
            self.skip_value(value_type, 0)?;
        }
        Some(())
    }

    fn read_array<const N: usize>(&mut self) -> Option<[u8; N]> {
        let mut buf = [0u8; N];
        self.reader.read_exact(&mut buf).ok()?;
        Some(buf)
    }

    fn read_u32(&mut self) -> Option<u32> {
        self.read_array::<4>().map(u32::from_le_bytes)
    }

    fn read_u64(&mut self) -> Option<u64> {
        self.read_array::<8>().map(u64::from_le_bytes)
    }

    fn read_string(&mut self) -> Option<String> {
        let len = self.read_u64()?;
        if len > MAX_STRING_LEN {
            return None;
        }
        let mut buf = vec![0u8; len as usize];
        self.reader.read_exact(&mut buf).ok()?;
        String::from_utf8(buf).ok()
    }

    /// Read an integer value as unsigned; `Some(None)` for non-integer or
    /// negative values that were still consumed.
    fn read_unsigned(&mut self, value_type: u32) -> Option<Option<u64>> {
        let value = match value_type {
            TYPE_U8 => Some(u64::from(self.read_array::<1>()?[0])),
            TYPE_I8 => u64::try_from(i8::from_le_bytes(self.read_array::<1>()?)).ok(),
            TYPE_U16 => Some(u64::from(u16::from_le_bytes(self.read_array::<2>()?))),
            TYPE_I16 => u64::try_from(i16::from_le_bytes(self.read_array::<2>()?)).ok(),
            TYPE_U32 => Some(u64::from(self.read_u32()?)),
            TYPE_I32 => u64::try_from(i32::from_le_bytes(self.read_array::<4>()?)).ok(),
            TYPE_U64 => Some(self.read_u64()?),
            TYPE_I64 => u64::try_from(i64::from_le_bytes(self.read_array::<8>()?)).ok(),
            other => {
                self.skip_value(other, 0)?;
                None
            }
        };
        Some(value)
    }

    fn skip_bytes(&mut self, n: u64) -> Option<()> {
        let copied = io::copy(&mut self.reader.by_ref().take(n), &mut io::sink()).ok()?;
        (copied == n).then_some(())
    }

    fn skip_value(&mut self, value_type: u32, depth: u32) -> Option<()> {
        if let Some(size) = fixed_size(value_type) {
            return self.skip_bytes(size);
        }
        match value_type {
            TYPE_STRING => {
                let len = self.read_u64()?;
                self.skip_bytes(len)
            }
            TYPE_ARRAY if depth < MAX_ARRAY_DEPTH => {
                let element_type = self.read_u32()?;
                let count = self.read_u64()?;
                if let Some(size) = fixed_size(element_type) {
                    return self.skip_bytes(count.checked_mul(size)?);
                }
                for _ in 0..count {
                    self.skip_value(element_type, depth + 1)?;
                }
                Some(())
            }
            _ => None,
        }
    }
}

fn fixed_size(value_type: u32) -> Option<u64> {
    match value_type {
        TYPE_U8 | TYPE_I8 | TYPE_BOOL => Some(1),
        TYPE_U16 | TYPE_I16 => Some(2),
        TYPE_U32 | TYPE_I32 | TYPE_F32 => Some(4),
        TYPE_U64 | TYPE_I64 | TYPE_F64 => Some(8),
        _ => None,
    }
}
