//! Compressed cross-reference encoding
//!
//! The binary form of a cross-reference section: entries packed as
//! fixed-width big-endian integer triples per a declared `/W` width
//! array. Type 0 = free (field 2 = next free number), type 1 = in use
//! (field 2 = byte offset), type 2 = in object stream (field 2 = stream
//! number, field 3 = index within the stream).

use crate::error::{Error, Result};
use crate::xref::{XrefEntry, XrefKind};

fn fields(entry: &XrefEntry) -> (u64, u64, u64) {
    match entry.kind {
        XrefKind::Free { next_free } => (0, next_free as u64, entry.generation as u64),
        XrefKind::InUse { offset } => (1, offset, entry.generation as u64),
        XrefKind::InStream { stream_num, index } => (2, stream_num as u64, index as u64),
    }
}

/// Encoder for a set of entries with fixed field widths
pub struct XrefStreamEncoder {
    w: [usize; 3],
}

impl XrefStreamEncoder {
    /// Create an encoder with the given field widths
    pub fn new(w: [usize; 3]) -> Self {
        Self { w }
    }

    /// Pick minimal widths able to represent every entry
    pub fn optimal_widths(entries: &[XrefEntry]) -> [usize; 3] {
        let mut max2: u64 = 0;
        let mut max3: u64 = 0;
        for entry in entries {
            let (_, f2, f3) = fields(entry);
            max2 = max2.max(f2);
            max3 = max3.max(f3);
        }
        // Type always fits in one byte
        [1, bytes_needed(max2), bytes_needed(max3)]
    }

    /// The `/W` array value for this encoder
    pub fn w_array(&self) -> [usize; 3] {
        self.w
    }

    /// Width of one packed entry in bytes
    pub fn entry_width(&self) -> usize {
        self.w.iter().sum()
    }

    /// Pack all entries, in the order given
    pub fn encode(&self, entries: &[XrefEntry]) -> Vec<u8> {
        let mut out = Vec::with_capacity(entries.len() * self.entry_width());
        for entry in entries {
            let (f1, f2, f3) = fields(entry);
            write_be(&mut out, f1, self.w[0]);
            write_be(&mut out, f2, self.w[1]);
            write_be(&mut out, f3, self.w[2]);
        }
        out
    }
}

/// Decoder driven by a `/W` array and optional `/Index` ranges
pub struct XrefStreamDecoder {
    w: [usize; 3],
    index: Vec<(u32, u32)>,
}

impl XrefStreamDecoder {
    /// Create a decoder from the stream dictionary's `/W` and `/Index`
    /// values. Without an index, numbering starts at 0 and runs over the
    /// whole body.
    pub fn new(w: &[i64], index: Option<&[i64]>) -> Result<Self> {
        if w.len() != 3 {
            return Err(Error::parse("W array must have 3 elements"));
        }
        if w.iter().any(|&v| v < 0 || v > 8) {
            return Err(Error::parse("W array widths out of range"));
        }
        let w = [w[0] as usize, w[1] as usize, w[2] as usize];
        if w[1] == 0 {
            return Err(Error::parse("W array field 2 width must be nonzero"));
        }

        let index = match index {
            Some(idx) => {
                if idx.len() % 2 != 0 {
                    return Err(Error::parse("Index array must have an even length"));
                }
                idx.chunks(2)
                    .map(|c| {
                        if c[0] < 0 || c[1] < 0 {
                            Err(Error::parse("Index array values must be non-negative"))
                        } else {
                            Ok((c[0] as u32, c[1] as u32))
                        }
                    })
                    .collect::<Result<Vec<_>>>()?
            }
            None => Vec::new(),
        };

        Ok(Self { w, index })
    }

    /// Width of one packed entry in bytes
    pub fn entry_width(&self) -> usize {
        self.w.iter().sum()
    }

    fn decode_one(&self, num: u32, data: &[u8]) -> Result<XrefEntry> {
        let mut pos = 0;
        // A zero-width type field defaults to type 1
        let f1 = if self.w[0] > 0 {
            read_be(&data[pos..pos + self.w[0]])
        } else {
            1
        };
        pos += self.w[0];
        let f2 = read_be(&data[pos..pos + self.w[1]]);
        pos += self.w[1];
        let f3 = if self.w[2] > 0 {
            read_be(&data[pos..pos + self.w[2]])
        } else {
            0
        };

        match f1 {
            0 => Ok(XrefEntry::free(num, f3 as u16, f2 as u32)),
            1 => Ok(XrefEntry::in_use(num, f3 as u16, f2)),
            2 => Ok(XrefEntry::in_stream(num, f2 as u32, f3 as u16)),
            t => Err(Error::parse(format!("unknown xref entry type {}", t))),
        }
    }

    /// Decode the whole body back into entries
    pub fn decode(&self, data: &[u8]) -> Result<Vec<XrefEntry>> {
        let width = self.entry_width();
        if width == 0 {
            return Err(Error::parse("xref stream entry width is zero"));
        }
        if data.len() % width != 0 {
            return Err(Error::parse(
                "xref stream body length is not a multiple of the entry width",
            ));
        }

        let count = data.len() / width;
        let mut entries = Vec::with_capacity(count);
        let mut pos = 0;

        if self.index.is_empty() {
            for num in 0..count as u32 {
                entries.push(self.decode_one(num, &data[pos..pos + width])?);
                pos += width;
            }
        } else {
            for &(start, run) in &self.index {
                for i in 0..run {
                    if pos + width > data.len() {
                        return Err(Error::parse(
                            "xref stream body exhausted before Index ranges",
                        ));
                    }
                    entries.push(self.decode_one(start + i, &data[pos..pos + width])?);
                    pos += width;
                }
            }
            if pos != data.len() {
                return Err(Error::parse("xref stream body longer than Index ranges"));
            }
        }

        Ok(entries)
    }
}

/// Derive the `/Index` array (start, count pairs) from entry numbers.
///
/// Entries must already be in ascending number order.
pub fn build_index(entries: &[XrefEntry]) -> Vec<i64> {
    let mut index = Vec::new();
    let Some(first) = entries.first() else {
        return index;
    };

    let mut start = first.num;
    let mut count = 1i64;
    for pair in entries.windows(2) {
        if pair[1].num == pair[0].num + 1 {
            count += 1;
        } else {
            index.push(start as i64);
            index.push(count);
            start = pair[1].num;
            count = 1;
        }
    }
    index.push(start as i64);
    index.push(count);
    index
}

fn read_be(data: &[u8]) -> u64 {
    let mut value: u64 = 0;
    for &byte in data {
        value = (value << 8) | byte as u64;
    }
    value
}

fn write_be(out: &mut Vec<u8>, value: u64, width: usize) {
    for i in (0..width).rev() {
        out.push((value >> (i * 8)) as u8);
    }
}

fn bytes_needed(value: u64) -> usize {
    if value == 0 {
        1
    } else {
        ((64 - value.leading_zeros()) as usize).div_ceil(8)
    }
}
