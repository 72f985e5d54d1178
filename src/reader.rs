//! File loading
//!
//! Parses a complete file back into cross-reference entries, trailer
//! state, and objects: header and version, `startxref` discovery, plain
//! tables and cross-reference streams, `Prev` chains (cycle-checked),
//! and object-stream members. The reader also keeps the original bytes,
//! which the incremental writer copies verbatim as its prefix.

use crate::config::PdfVersion;
use crate::error::{Error, Result};
use crate::filter::decode_flate;
use crate::lexer::{Keyword, Lexer, Token};
use crate::object::{Dict, Name, Object, PdfString};
use crate::xref::{XrefEntry, XrefKind, XrefSection};
use crate::xref_stream::XrefStreamDecoder;
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, trace};

/// A parsed file: original bytes plus the merged cross-reference view
#[derive(Debug)]
pub struct Reader {
    data: Vec<u8>,
    version: PdfVersion,
    section: XrefSection,
    trailer: Dict,
    start_xref: u64,
    compressed_xref: bool,
}

impl Reader {
    /// Load from a file path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = std::fs::read(path)?;
        Self::from_bytes(data)
    }

    /// Parse a complete file held in memory
    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        if data.len() < 8 {
            return Err(Error::parse("file too small to be a document"));
        }

        let header = &data[..16.min(data.len())];
        if !header.starts_with(b"%PDF-") {
            return Err(Error::parse("missing %PDF header"));
        }
        let version_text = String::from_utf8_lossy(&header[5..]);
        let version_text = version_text
            .split(|c: char| c.is_whitespace())
            .next()
            .unwrap_or("");
        let version = PdfVersion::parse(version_text)
            .ok_or_else(|| Error::parse(format!("invalid header version '{}'", version_text)))?;

        let mut reader = Self {
            data,
            version,
            section: XrefSection::new(),
            trailer: Dict::new(),
            start_xref: 0,
            compressed_xref: false,
        };

        reader.start_xref = reader.find_startxref()?;
        reader.walk_sections()?;
        reader.check_free_list()?;

        debug!(
            entries = reader.section.len(),
            start_xref = reader.start_xref,
            "loaded document"
        );
        Ok(reader)
    }

    /// The original file bytes
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Byte offset of the most recent cross-reference section
    pub fn start_xref(&self) -> u64 {
        self.start_xref
    }

    /// Header version
    pub fn version(&self) -> PdfVersion {
        self.version
    }

    /// The most recent trailer dictionary
    pub fn trailer(&self) -> &Dict {
        &self.trailer
    }

    /// Whether the most recent section used the compressed encoding
    pub fn compressed_xref(&self) -> bool {
        self.compressed_xref
    }

    /// The merged cross-reference view (newest section wins per number)
    pub fn section(&self) -> &XrefSection {
        &self.section
    }

    /// Look up one entry
    pub fn entry(&self, num: u32) -> Option<&XrefEntry> {
        self.section.get(num)
    }

    /// Find the `startxref` offset near the end of the file
    fn find_startxref(&self) -> Result<u64> {
        let len = self.data.len();
        let tail_start = len.saturating_sub(1024);
        let tail = &self.data[tail_start..];

        let pos = tail
            .windows(9)
            .rposition(|w| w == b"startxref")
            .ok_or_else(|| Error::parse("could not find startxref"))?;

        let mut lexer = Lexer::at(&self.data, tail_start + pos + 9);
        match lexer.next_token()? {
            Token::Int(offset) if offset >= 0 && (offset as usize) < len => Ok(offset as u64),
            Token::Int(offset) => Err(Error::structure(format!(
                "startxref offset {} outside file",
                offset
            ))),
            _ => Err(Error::parse("startxref not followed by an offset")),
        }
    }

    /// Walk the section chain from the newest backwards through `Prev`
    fn walk_sections(&mut self) -> Result<()> {
        let mut visited = HashSet::new();
        let mut offset = self.start_xref;
        let mut newest = true;

        loop {
            if !visited.insert(offset) {
                return Err(Error::structure(format!(
                    "cyclic Prev chain at xref offset {}",
                    offset
                )));
            }

            let (entries, trailer, compressed) = self.parse_section_at(offset)?;
            trace!(offset, entries = entries.len(), compressed, "xref section");

            // Newer sections shadow older ones
            for entry in entries {
                if self.section.get(entry.num).is_none() {
                    self.section.insert(entry);
                }
            }

            if newest {
                self.trailer = trailer.clone();
                self.compressed_xref = compressed;
                newest = false;
            }

            match trailer.get(&Name::new("Prev")) {
                Some(Object::Int(prev)) if *prev >= 0 => offset = *prev as u64,
                Some(_) => return Err(Error::structure("trailer Prev is not a valid offset")),
                None => break,
            }
        }

        Ok(())
    }

    fn parse_section_at(&self, offset: u64) -> Result<(Vec<XrefEntry>, Dict, bool)> {
        let pos = offset as usize;
        if pos >= self.data.len() {
            return Err(Error::structure(format!(
                "xref offset {} outside file",
                offset
            )));
        }
        if self.data[pos..].starts_with(b"xref") {
            let (entries, trailer) = self.parse_plain_section(pos)?;
            Ok((entries, trailer, false))
        } else {
            let (entries, trailer) = self.parse_stream_section(pos)?;
            Ok((entries, trailer, true))
        }
    }

    /// Parse a plain text table followed by its `trailer` dictionary
    fn parse_plain_section(&self, pos: usize) -> Result<(Vec<XrefEntry>, Dict)> {
        let mut lexer = Lexer::at(&self.data, pos);
        match lexer.next_token()? {
            Token::Keyword(Keyword::Xref) => {}
            other => return Err(Error::parse(format!("expected 'xref', got {:?}", other))),
        }

        let mut entries = Vec::new();
        loop {
            match lexer.next_token()? {
                Token::Keyword(Keyword::Trailer) => break,
                Token::Int(start) if start >= 0 => {
                    let count = match lexer.next_token()? {
                        Token::Int(count) if count >= 0 => count as u32,
                        other => {
                            return Err(Error::parse(format!(
                                "invalid subsection count: {:?}",
                                other
                            )));
                        }
                    };
                    let start = start as u32;

                    // Records are fixed-width; skip the EOL after the
                    // header and consume count * 20 bytes directly.
                    let mut rec = lexer.offset();
                    while rec < self.data.len() && (self.data[rec] == b'\r' || self.data[rec] == b'\n' || self.data[rec] == b' ') {
                        rec += 1;
                    }
                    for i in 0..count {
                        if rec + 20 > self.data.len() {
                            return Err(Error::parse("xref record truncated"));
                        }
                        entries.push(parse_plain_record(
                            start + i,
                            &self.data[rec..rec + 20],
                        )?);
                        rec += 20;
                    }
                    lexer.seek(rec);
                }
                other => {
                    return Err(Error::parse(format!(
                        "unexpected token in xref table: {:?}",
                        other
                    )));
                }
            }
        }

        let trailer = match parse_value(&mut lexer)? {
            Object::Dict(dict) => dict,
            _ => return Err(Error::parse("trailer is not a dictionary")),
        };

        Ok((entries, trailer))
    }

    /// Parse a cross-reference stream section
    fn parse_stream_section(&self, pos: usize) -> Result<(Vec<XrefEntry>, Dict)> {
        let (_, _, obj) = self.parse_object_at(pos as u64)?;
        let Object::Stream { dict, data } = obj else {
            return Err(Error::structure(
                "startxref does not point at a table or xref stream",
            ));
        };

        match dict.get(&Name::new("Type")).and_then(|o| o.as_name()) {
            Some(name) if name.as_str() == "XRef" => {}
            _ => return Err(Error::structure("xref stream missing /Type /XRef")),
        }

        let body = decode_stream_body(&dict, &data)?;

        let w = dict
            .get(&Name::new("W"))
            .and_then(|o| o.as_array())
            .ok_or_else(|| Error::parse("xref stream missing W array"))?
            .iter()
            .map(|o| o.as_int().ok_or_else(|| Error::parse("W entry not an integer")))
            .collect::<Result<Vec<i64>>>()?;

        let index = match dict.get(&Name::new("Index")) {
            Some(Object::Array(arr)) => Some(
                arr.iter()
                    .map(|o| {
                        o.as_int()
                            .ok_or_else(|| Error::parse("Index entry not an integer"))
                    })
                    .collect::<Result<Vec<i64>>>()?,
            ),
            Some(_) => return Err(Error::parse("Index is not an array")),
            None => None,
        };

        let decoder = XrefStreamDecoder::new(&w, index.as_deref())?;
        let entries = decoder.decode(&body)?;

        Ok((entries, dict))
    }

    /// Parse `num generation obj <value> [stream ... endstream] endobj` at an offset
    pub(crate) fn parse_object_at(&self, offset: u64) -> Result<(u32, u16, Object)> {
        let pos = offset as usize;
        if pos >= self.data.len() {
            return Err(Error::structure(format!(
                "object offset {} outside file",
                offset
            )));
        }

        let mut lexer = Lexer::at(&self.data, pos);

        let num = match lexer.next_token()? {
            Token::Int(n) if n >= 1 => n as u32,
            other => return Err(Error::parse(format!("expected object number, got {:?}", other))),
        };
        let generation = match lexer.next_token()? {
            Token::Int(g) if g >= 0 => g as u16,
            other => {
                return Err(Error::parse(format!(
                    "expected generation number, got {:?}",
                    other
                )));
            }
        };
        match lexer.next_token()? {
            Token::Keyword(Keyword::Obj) => {}
            other => return Err(Error::parse(format!("expected 'obj', got {:?}", other))),
        }

        let value = parse_value(&mut lexer)?;

        // A dictionary may be followed by stream data
        let mark = lexer.offset();
        let obj = match lexer.next_token()? {
            Token::Keyword(Keyword::Stream) => {
                let Object::Dict(dict) = value else {
                    return Err(Error::parse("stream keyword without a dictionary"));
                };
                lexer.skip_eol();
                let start = lexer.offset();

                let length = self.resolve_length(&dict)?;
                let end = start + length;
                if end > self.data.len() {
                    return Err(Error::structure(format!(
                        "stream of object {} runs past end of file",
                        num
                    )));
                }
                let stream_data = self.data[start..end].to_vec();

                lexer.seek(end);
                match lexer.next_token()? {
                    Token::Keyword(Keyword::EndStream) => {}
                    other => {
                        return Err(Error::parse(format!(
                            "expected 'endstream', got {:?}",
                            other
                        )));
                    }
                }
                Object::Stream {
                    dict,
                    data: stream_data,
                }
            }
            _ => {
                lexer.seek(mark);
                value
            }
        };

        Ok((num, generation, obj))
    }

    /// Resolve a stream's `/Length`, following one indirect reference.
    ///
    /// The referenced object is parsed as a bare integer, so a malformed
    /// file cannot recurse through chained stream lengths.
    fn resolve_length(&self, dict: &Dict) -> Result<usize> {
        match dict.get(&Name::new("Length")) {
            Some(Object::Int(len)) if *len >= 0 => Ok(*len as usize),
            Some(Object::Ref(r)) => {
                let entry = self
                    .entry(r.num)
                    .ok_or_else(|| Error::structure(format!("Length object {} missing", r.num)))?;
                let offset = entry.offset().ok_or_else(|| {
                    Error::structure(format!("Length object {} is not a direct object", r.num))
                })?;

                let mut lexer = Lexer::at(&self.data, offset as usize);
                let framed = matches!(lexer.next_token()?, Token::Int(_))
                    && matches!(lexer.next_token()?, Token::Int(_))
                    && matches!(lexer.next_token()?, Token::Keyword(Keyword::Obj));
                if !framed {
                    return Err(Error::parse(format!(
                        "Length object {} is malformed",
                        r.num
                    )));
                }
                match lexer.next_token()? {
                    Token::Int(len) if len >= 0 => Ok(len as usize),
                    _ => Err(Error::parse("indirect Length is not an integer")),
                }
            }
            _ => Err(Error::parse("stream missing valid Length")),
        }
    }

    /// Read the object for a given number, wherever it lives
    pub fn read_object(&self, num: u32) -> Result<Object> {
        let entry = self
            .entry(num)
            .ok_or_else(|| Error::structure(format!("object {} not in xref", num)))?;

        match entry.kind {
            XrefKind::Free { .. } => {
                Err(Error::structure(format!("object {} is free", num)))
            }
            XrefKind::InUse { offset } => {
                let (found_num, found_gen, obj) = self.parse_object_at(offset)?;
                if found_num != num || found_gen != entry.generation {
                    return Err(Error::structure(format!(
                        "object mismatch at offset {}: expected {} {}, found {} {}",
                        offset, num, entry.generation, found_num, found_gen
                    )));
                }
                Ok(obj)
            }
            XrefKind::InStream { stream_num, index } => {
                self.read_stream_member(num, stream_num, index)
            }
        }
    }

    /// Extract one member object from an object stream
    fn read_stream_member(&self, num: u32, stream_num: u32, index: u16) -> Result<Object> {
        let stm_entry = self
            .entry(stream_num)
            .ok_or_else(|| Error::structure(format!("object stream {} not in xref", stream_num)))?;
        let offset = stm_entry.offset().ok_or_else(|| {
            Error::structure(format!("object stream {} has no byte offset", stream_num))
        })?;

        let (_, _, container) = self.parse_object_at(offset)?;
        let Object::Stream { dict, data } = container else {
            return Err(Error::structure(format!(
                "object {} is not a stream",
                stream_num
            )));
        };

        let block = decode_stream_body(&dict, &data)?;

        let n = dict
            .get(&Name::new("N"))
            .and_then(|o| o.as_int())
            .ok_or_else(|| Error::parse("object stream missing N"))? as usize;
        let first = dict
            .get(&Name::new("First"))
            .and_then(|o| o.as_int())
            .ok_or_else(|| Error::parse("object stream missing First"))? as usize;
        if first > block.len() {
            return Err(Error::structure("object stream First outside body"));
        }

        let header = std::str::from_utf8(&block[..first])
            .map_err(|_| Error::parse("object stream header is not ASCII"))?;
        let numbers: Vec<usize> = header
            .split_whitespace()
            .map(|s| {
                s.parse()
                    .map_err(|_| Error::parse("object stream header is not numeric"))
            })
            .collect::<Result<Vec<usize>>>()?;
        if numbers.len() < n * 2 {
            return Err(Error::parse("object stream header too short"));
        }

        let idx = index as usize;
        if idx >= n {
            return Err(Error::structure(format!(
                "index {} out of range in object stream {}",
                idx, stream_num
            )));
        }

        let member_num = numbers[idx * 2] as u32;
        if member_num != num {
            return Err(Error::structure(format!(
                "object stream member mismatch: expected {}, found {}",
                num, member_num
            )));
        }

        let start = first + numbers[idx * 2 + 1];
        let end = if idx + 1 < n {
            first + numbers[(idx + 1) * 2 + 1]
        } else {
            block.len()
        };
        if start > end || end > block.len() {
            return Err(Error::structure("object stream member slice out of range"));
        }

        let mut lexer = Lexer::new(&block[start..end]);
        parse_value(&mut lexer)
    }

    /// Validate the free-list invariant over the merged table.
    ///
    /// Walking from object 0 must visit every free entry exactly once,
    /// never land on an in-use entry, and terminate back at 0.
    fn check_free_list(&self) -> Result<()> {
        let head = self
            .section
            .get(0)
            .ok_or_else(|| Error::structure("object 0 missing from xref"))?;
        if !head.is_free() {
            return Err(Error::structure("object 0 must be a free entry"));
        }

        let total_free = self.section.free_numbers().len();
        let mut visited = HashSet::new();
        visited.insert(0u32);

        let mut current = head.next_free().unwrap_or(0);
        while current != 0 {
            if !visited.insert(current) {
                return Err(Error::structure(format!(
                    "free list cycles at object {}",
                    current
                )));
            }
            let entry = self.section.get(current).ok_or_else(|| {
                Error::structure(format!("free list points at missing object {}", current))
            })?;
            let next = entry.next_free().ok_or_else(|| {
                Error::structure(format!(
                    "free list points at in-use object {}",
                    current
                ))
            })?;
            current = next;
        }

        if visited.len() != total_free {
            return Err(Error::structure(format!(
                "free list covers {} of {} free entries",
                visited.len(),
                total_free
            )));
        }

        Ok(())
    }
}

/// Decode a stream body per its `/Filter` entry (flate or none)
fn decode_stream_body(dict: &Dict, data: &[u8]) -> Result<Vec<u8>> {
    match dict.get(&Name::new("Filter")) {
        None => Ok(data.to_vec()),
        Some(Object::Name(name)) if name.as_str() == "FlateDecode" => decode_flate(data),
        Some(Object::Name(name)) => Err(Error::unsupported(format!(
            "stream filter {}",
            name.as_str()
        ))),
        Some(_) => Err(Error::parse("Filter is not a name")),
    }
}

/// Parse one 20-byte plain table record
fn parse_plain_record(num: u32, record: &[u8]) -> Result<XrefEntry> {
    let text = std::str::from_utf8(record)
        .map_err(|_| Error::parse("xref record is not ASCII"))?;
    let value: u64 = text[0..10]
        .trim()
        .parse()
        .map_err(|_| Error::parse("invalid xref record offset"))?;
    let generation: u16 = text[11..16]
        .trim()
        .parse()
        .map_err(|_| Error::parse("invalid xref record generation"))?;

    match text.as_bytes()[17] {
        b'n' => Ok(XrefEntry::in_use(num, generation, value)),
        b'f' => Ok(XrefEntry::free(num, generation, value as u32)),
        other => Err(Error::parse(format!(
            "unknown xref record type '{}'",
            other as char
        ))),
    }
}

/// Parse one object value, resolving `a b R` reference triples
pub(crate) fn parse_value(lexer: &mut Lexer<'_>) -> Result<Object> {
    let token = lexer.next_token()?;
    parse_value_from(lexer, token)
}

fn parse_value_from(lexer: &mut Lexer<'_>, token: Token) -> Result<Object> {
    match token {
        Token::Int(a) => {
            // Lookahead for "a b R"
            let mark = lexer.offset();
            if a >= 0 {
                if let Ok(Token::Int(b)) = lexer.next_token() {
                    if (0..=u16::MAX as i64).contains(&b)
                        && matches!(lexer.next_token(), Ok(Token::Keyword(Keyword::R)))
                    {
                        return Ok(Object::Ref(crate::object::ObjRef::new(
                            a as u32, b as u16,
                        )));
                    }
                }
            }
            lexer.seek(mark);
            Ok(Object::Int(a))
        }
        Token::Real(r) => Ok(Object::Real(r)),
        Token::String(bytes) => Ok(Object::String(PdfString::new(bytes))),
        Token::Name(name) => Ok(Object::Name(Name::from_string(name))),
        Token::Keyword(Keyword::True) => Ok(Object::Bool(true)),
        Token::Keyword(Keyword::False) => Ok(Object::Bool(false)),
        Token::Keyword(Keyword::Null) => Ok(Object::Null),
        Token::OpenArray => {
            let mut items = Vec::new();
            loop {
                let token = lexer.next_token()?;
                if token == Token::CloseArray {
                    break;
                }
                if token == Token::Eof {
                    return Err(Error::parse("unterminated array"));
                }
                items.push(parse_value_from(lexer, token)?);
            }
            Ok(Object::Array(items))
        }
        Token::OpenDict => {
            let mut dict = Dict::new();
            loop {
                match lexer.next_token()? {
                    Token::CloseDict => break,
                    Token::Name(key) => {
                        let value = parse_value(lexer)?;
                        dict.insert(Name::from_string(key), value);
                    }
                    Token::Eof => return Err(Error::parse("unterminated dictionary")),
                    other => {
                        return Err(Error::parse(format!(
                            "dictionary key is not a name: {:?}",
                            other
                        )));
                    }
                }
            }
            Ok(Object::Dict(dict))
        }
        other => Err(Error::parse(format!("unexpected token {:?}", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_value_scalars() {
        let mut lexer = Lexer::new(b"42 3.5 /Name (text) true null");
        assert_eq!(parse_value(&mut lexer).unwrap(), Object::Int(42));
        assert_eq!(parse_value(&mut lexer).unwrap(), Object::Real(3.5));
        assert_eq!(
            parse_value(&mut lexer).unwrap(),
            Object::Name(Name::new("Name"))
        );
        assert_eq!(
            parse_value(&mut lexer).unwrap(),
            Object::String(PdfString::from("text"))
        );
        assert_eq!(parse_value(&mut lexer).unwrap(), Object::Bool(true));
        assert_eq!(parse_value(&mut lexer).unwrap(), Object::Null);
    }

    #[test]
    fn test_parse_value_reference() {
        let mut lexer = Lexer::new(b"12 0 R");
        assert_eq!(
            parse_value(&mut lexer).unwrap(),
            Object::Ref(crate::object::ObjRef::new(12, 0))
        );
    }

    #[test]
    fn test_parse_value_int_not_reference() {
        // Three integers: lookahead must rewind cleanly
        let mut lexer = Lexer::new(b"[1 2 3]");
        let arr = parse_value(&mut lexer).unwrap();
        assert_eq!(
            arr,
            Object::Array(vec![Object::Int(1), Object::Int(2), Object::Int(3)])
        );
    }

    #[test]
    fn test_parse_value_mixed_array_with_refs() {
        let mut lexer = Lexer::new(b"[1 0 R 2 5 1 R]");
        let arr = parse_value(&mut lexer).unwrap();
        assert_eq!(
            arr,
            Object::Array(vec![
                Object::Ref(crate::object::ObjRef::new(1, 0)),
                Object::Int(2),
                Object::Ref(crate::object::ObjRef::new(5, 1)),
            ])
        );
    }

    #[test]
    fn test_parse_value_nested_dict() {
        let mut lexer = Lexer::new(b"<< /A << /B 1 >> /C [2] >>");
        let obj = parse_value(&mut lexer).unwrap();
        let dict = obj.as_dict().unwrap();
        let inner = dict.get(&Name::new("A")).unwrap().as_dict().unwrap();
        assert_eq!(inner.get(&Name::new("B")).unwrap().as_int(), Some(1));
    }

    #[test]
    fn test_parse_plain_record() {
        let entry = parse_plain_record(3, b"0000000017 00000 n\r\n").unwrap();
        assert_eq!(entry, XrefEntry::in_use(3, 0, 17));

        let entry = parse_plain_record(0, b"0000000009 65535 f\r\n").unwrap();
        assert_eq!(entry, XrefEntry::free(0, 65535, 9));
    }

    #[test]
    fn test_from_bytes_rejects_non_pdf() {
        assert!(Reader::from_bytes(b"GIF89a but definitely not a PDF".to_vec()).is_err());
    }

    #[test]
    fn test_from_bytes_rejects_truncated() {
        assert!(Reader::from_bytes(b"%PDF".to_vec()).is_err());
    }
}
