//! Save orchestration
//!
//! Drives exactly one save pass over the document: Standard (full
//! rewrite), Incremental (append-only), or Linearized (unsupported).
//! A pass progresses Idle -> CollectingObjects -> BuildingXref ->
//! WritingTrailer -> Done and never revisits a state.

use crate::config::XrefMode;
use crate::document::{Document, Slot};
use crate::error::{Error, Result};
use crate::object::{Dict, Name, Object, PdfString};
use crate::objstm::ObjectStream;
use crate::reader::Reader;
use crate::xref::{XrefEntry, XrefSection};
use crate::xref_stream::{XrefStreamEncoder, build_index};
use md5::{Digest, Md5};
use std::collections::BTreeMap;
use std::io::Write;
use tracing::{debug, trace};

/// Save strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SaveMode {
    /// Rewrite every byte; used for a first save or an explicit flatten
    #[default]
    Standard,
    /// Append changed objects plus a new xref section after the original
    /// bytes; requires a loaded original (falls back to Standard
    /// otherwise)
    Incremental,
    /// Fast-first-page layout; not implemented, always fails
    Linearized,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum SavePhase {
    Idle,
    CollectingObjects,
    BuildingXref,
    WritingTrailer,
    Done,
}

/// Entry point used by [`Document::save_to`]
pub(crate) fn save<W: Write>(doc: &mut Document, out: &mut W, mode: SaveMode) -> Result<()> {
    match mode {
        SaveMode::Linearized => Err(Error::unsupported(
            "linearized save mode is not implemented",
        )),
        SaveMode::Standard => SavePass::new(out).run_standard(doc),
        SaveMode::Incremental => {
            if doc.reader.is_some() {
                SavePass::new(out).run_incremental(doc)
            } else {
                debug!("incremental save without a loaded original, writing standard");
                SavePass::new(out).run_standard(doc)
            }
        }
    }
}

/// Write-through counter: tracks the cursor, hashes everything written,
/// and keeps a copy so the document's reader can be refreshed after the
/// pass.
struct CountingWriter<'w, W: Write> {
    inner: &'w mut W,
    written: u64,
    hasher: Md5,
    copy: Vec<u8>,
}

impl<'w, W: Write> CountingWriter<'w, W> {
    fn new(inner: &'w mut W) -> Self {
        Self {
            inner,
            written: 0,
            hasher: Md5::new(),
            copy: Vec::new(),
        }
    }

    fn digest(&self) -> Vec<u8> {
        self.hasher.clone().finalize().to_vec()
    }
}

impl<W: Write> Write for CountingWriter<'_, W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.copy.extend_from_slice(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

struct SavePass<'w, W: Write> {
    out: CountingWriter<'w, W>,
    phase: SavePhase,
    section: XrefSection,
}

impl<'w, W: Write> SavePass<'w, W> {
    fn new(out: &'w mut W) -> Self {
        Self {
            out: CountingWriter::new(out),
            phase: SavePhase::Idle,
            section: XrefSection::new(),
        }
    }

    fn enter(&mut self, next: SavePhase) {
        debug_assert!(next > self.phase, "save phase must advance");
        trace!(?next, "save phase");
        self.phase = next;
    }

    // ------------------------------------------------------------------
    // Standard save
    // ------------------------------------------------------------------

    fn run_standard(mut self, doc: &mut Document) -> Result<()> {
        let root = require_root(doc)?;
        let compress = doc.config.xref_mode() == XrefMode::Compressed;
        let level = doc.config.compression_level();

        self.enter(SavePhase::CollectingObjects);
        self.out
            .write_all(format!("%PDF-{}\n", doc.config.version()).as_bytes())?;
        // Binary hint so transports treat the file as 8-bit data
        self.out.write_all(b"%\xE2\xE3\xCF\xD3\n")?;

        // Split the table into directly-written and packable objects
        let mut direct = Vec::new();
        let mut packable = Vec::new();
        for (&num, slot) in &doc.objects {
            if let Slot::InUse(stored) = slot {
                if compress && stored.compressible && stored.generation == 0 {
                    packable.push(num);
                } else {
                    direct.push((num, stored.generation));
                }
            }
        }

        for (num, generation) in direct {
            let offset = self.out.written;
            let payload = doc.get(num).expect("slot vanished during save");
            write_indirect_object(&mut self.out, num, generation, payload)?;
            self.section.insert(XrefEntry::in_use(num, generation, offset));
        }

        // Artifact numbers restart after the highest table number: a
        // standard save owns the whole file, so numbering stays compact
        // and repeated saves stay byte-identical.
        let artifact_base = doc.objects.keys().next_back().copied().unwrap_or(0);
        let streams = pack_object_streams(doc, &packable)?;
        let next_num = self.write_object_streams(streams, artifact_base, level)?;

        self.enter(SavePhase::BuildingXref);
        self.link_free_chain(doc, next_num - 1, 0);

        let (id1, id2) = self.file_id(doc);
        let xref_offset = self.out.written;
        // One past the highest entry; the xref stream object, when used,
        // bumps this by taking the next number itself
        let trailer_extra =
            self.trailer_dict(doc, root, (&id1, &id2), None, next_num as i64);

        if compress {
            self.write_xref_stream(next_num, xref_offset, trailer_extra, level)?;
            self.enter(SavePhase::WritingTrailer);
        } else {
            self.section.write_plain(&mut self.out)?;
            self.enter(SavePhase::WritingTrailer);
            self.write_plain_trailer(trailer_extra)?;
        }
        self.write_tail(xref_offset)?;

        self.enter(SavePhase::Done);
        debug!(
            bytes = self.out.written,
            objects = self.section.len(),
            "standard save complete"
        );
        self.commit(doc, (id1, id2))
    }

    // ------------------------------------------------------------------
    // Incremental save
    // ------------------------------------------------------------------

    fn run_incremental(mut self, doc: &mut Document) -> Result<()> {
        let root = require_root(doc)?;
        let compress = doc.config.xref_mode() == XrefMode::Compressed;
        let level = doc.config.compression_level();

        let (prev_offset, prev_free_head, original_ends_with_eol) = {
            let reader = doc.reader.as_ref().expect("incremental without reader");
            (
                reader.start_xref(),
                reader.entry(0).and_then(|e| e.next_free()).unwrap_or(0),
                reader.data().last() == Some(&b'\n'),
            )
        };

        self.enter(SavePhase::CollectingObjects);
        // Committed bytes are copied verbatim; everything new is appended
        {
            let reader = doc.reader.as_ref().expect("incremental without reader");
            self.out.write_all(reader.data())?;
        }
        if !original_ends_with_eol {
            self.out.write_all(b"\n")?;
        }

        // Only dirty, new, or freed slots take part in this pass
        let mut direct = Vec::new();
        let mut packable = Vec::new();
        let mut freed = Vec::new();
        for (&num, slot) in &doc.objects {
            match slot {
                Slot::InUse(stored) if stored.dirty || !stored.original => {
                    if compress && stored.compressible && stored.generation == 0 {
                        packable.push(num);
                    } else {
                        direct.push((num, stored.generation));
                    }
                }
                Slot::Free { generation, dirty: true } => freed.push((num, *generation)),
                _ => {}
            }
        }
        trace!(
            direct = direct.len(),
            packed = packable.len(),
            freed = freed.len(),
            "incremental change set"
        );

        for (num, generation) in direct {
            let offset = self.out.written;
            let payload = doc.get(num).expect("slot vanished during save");
            write_indirect_object(&mut self.out, num, generation, payload)?;
            self.section.insert(XrefEntry::in_use(num, generation, offset));
        }

        let streams = pack_extension_streams(doc, &packable)?;
        self.write_object_streams(streams, doc.max_num, level)?;

        // Newly freed numbers head the free chain; the tail links back to
        // the previous head so the walk still covers the older frees.
        if !freed.is_empty() {
            self.section
                .insert(XrefEntry::free(0, 65535, freed[0].0));
            for i in 0..freed.len() {
                let (num, generation) = freed[i];
                let next = freed
                    .get(i + 1)
                    .map(|(n, _)| *n)
                    .unwrap_or(prev_free_head);
                self.section.insert(XrefEntry::free(num, generation, next));
            }
        }

        self.enter(SavePhase::BuildingXref);
        let (id1, id2) = self.file_id(doc);
        let xref_offset = self.out.written;
        // Size stays document-wide even though the section is sparse
        let size = self.section.max_num().max(doc.max_num) as i64 + 1;
        let trailer_extra =
            self.trailer_dict(doc, root, (&id1, &id2), Some(prev_offset), size);

        if compress {
            let stream_num = self.section.max_num().max(doc.max_num) + 1;
            self.write_xref_stream(stream_num, xref_offset, trailer_extra, level)?;
            self.enter(SavePhase::WritingTrailer);
        } else {
            self.section.write_plain(&mut self.out)?;
            self.enter(SavePhase::WritingTrailer);
            self.write_plain_trailer(trailer_extra)?;
        }
        self.write_tail(xref_offset)?;

        self.enter(SavePhase::Done);
        debug!(
            bytes = self.out.written,
            touched = self.section.len(),
            "incremental save complete"
        );
        self.commit(doc, (id1, id2))
    }

    // ------------------------------------------------------------------
    // Shared pieces
    // ------------------------------------------------------------------

    /// Pass 2 and 3 of object-stream resolution: serialize each
    /// container at the cursor, then patch member entries with the now
    /// known (stream number, index) pairs. Member entries are never
    /// emitted before this patch.
    fn write_object_streams(
        &mut self,
        streams: Vec<ObjectStream>,
        artifact_base: u32,
        level: u32,
    ) -> Result<u32> {
        let mut next_num = artifact_base + 1;
        for stream in streams {
            let stream_num = next_num;
            next_num += 1;

            let offset = self.out.written;
            let container = stream.serialize(level)?;
            write_indirect_object(&mut self.out, stream_num, 0, &container)?;
            self.section
                .insert(XrefEntry::in_use(stream_num, 0, offset));

            for (index, member) in stream.member_numbers().enumerate() {
                self.section
                    .insert(XrefEntry::in_stream(member, stream_num, index as u16));
            }
            trace!(stream_num, members = stream.len(), base = ?stream.base(), "object stream");
        }
        Ok(next_num)
    }

    /// Standard-save free chain: every number up to `highest` without an
    /// entry becomes a free entry, and all free entries are linked in
    /// ascending order from object 0 back around to 0.
    fn link_free_chain(&mut self, doc: &Document, highest: u32, close_at: u32) {
        let mut free_nums: Vec<(u32, u16)> = vec![(0, 65535)];
        for num in 1..=highest {
            match doc.objects.get(&num) {
                Some(Slot::Free { generation, .. }) => free_nums.push((num, *generation)),
                Some(Slot::InUse(_)) => {}
                // Allocated but unbacked numbers (artifacts of earlier
                // passes) keep the table contiguous as free entries
                None => {
                    if self.section.get(num).is_none() {
                        free_nums.push((num, 0));
                    }
                }
            }
        }

        for i in 0..free_nums.len() {
            let (num, generation) = free_nums[i];
            let next = free_nums.get(i + 1).map(|(n, _)| *n).unwrap_or(close_at);
            self.section.insert(XrefEntry::free(num, generation, next));
        }
    }

    /// The identifier pair for this pass: the first half is preserved
    /// once created, the second is the MD5 of everything written so far
    fn file_id(&self, doc: &Document) -> (Vec<u8>, Vec<u8>) {
        let digest = self.out.digest();
        let id1 = doc
            .file_id
            .as_ref()
            .map(|(a, _)| a.clone())
            .unwrap_or_else(|| digest.clone());
        (id1, digest)
    }

    fn trailer_dict(
        &self,
        doc: &Document,
        root: crate::object::ObjRef,
        id: (&[u8], &[u8]),
        prev: Option<u64>,
        size: i64,
    ) -> Dict {
        let mut dict = Dict::new();
        dict.insert(Name::new("Size"), Object::Int(size));
        dict.insert(Name::new("Root"), Object::Ref(root));
        if let Some(info) = doc.info {
            dict.insert(Name::new("Info"), Object::Ref(info));
        }
        if let Some(prev) = prev {
            dict.insert(Name::new("Prev"), Object::Int(prev as i64));
        }
        dict.insert(
            Name::new("ID"),
            Object::Array(vec![
                Object::String(PdfString::new(id.0.to_vec())),
                Object::String(PdfString::new(id.1.to_vec())),
            ]),
        );
        dict
    }

    fn write_plain_trailer(&mut self, dict: Dict) -> Result<()> {
        self.out.write_all(b"trailer\n")?;
        write_object(&mut self.out, &Object::Dict(dict))?;
        self.out.write_all(b"\n")?;
        Ok(())
    }

    /// The compressed encoding: the section becomes a stream object that
    /// also carries the trailer keys. Its own entry is part of the
    /// section, which is possible because the offset is known before the
    /// object is written.
    fn write_xref_stream(
        &mut self,
        stream_num: u32,
        offset: u64,
        trailer_extra: Dict,
        level: u32,
    ) -> Result<()> {
        debug_assert!(stream_num >= self.section.max_num());
        self.section
            .insert(XrefEntry::in_use(stream_num, 0, offset));

        // Size covers the stream object itself
        let size = stream_num as i64 + 1;

        let entries = self.section.entries();
        let w = XrefStreamEncoder::optimal_widths(entries);
        let encoder = XrefStreamEncoder::new(w);
        let index = build_index(entries);
        let body = encoder.encode(entries);
        let compressed = crate::filter::encode_flate(&body, level)?;

        let mut dict = trailer_extra;
        dict.insert(Name::new("Size"), Object::Int(size));
        dict.insert(Name::new("Type"), Object::Name(Name::new("XRef")));
        dict.insert(
            Name::new("W"),
            Object::Array(w.iter().map(|&v| Object::Int(v as i64)).collect()),
        );
        dict.insert(
            Name::new("Index"),
            Object::Array(index.into_iter().map(Object::Int).collect()),
        );
        dict.insert(Name::new("Filter"), Object::Name(Name::new("FlateDecode")));
        dict.insert(
            Name::new("Length"),
            Object::Int(compressed.len() as i64),
        );

        let container = Object::Stream {
            dict,
            data: compressed,
        };
        write_indirect_object(&mut self.out, stream_num, 0, &container)?;
        Ok(())
    }

    fn write_tail(&mut self, xref_offset: u64) -> Result<()> {
        self.out.write_all(b"startxref\n")?;
        self.out
            .write_all(format!("{}\n", xref_offset).as_bytes())?;
        self.out.write_all(b"%%EOF\n")?;
        Ok(())
    }

    /// Side effects of a finished pass: clear dirty flags, set original
    /// flags, store committed entries, refresh the document's reader so
    /// a later incremental save chains onto this one
    fn commit(self, doc: &mut Document, id: (Vec<u8>, Vec<u8>)) -> Result<()> {
        debug_assert_eq!(self.phase, SavePhase::Done);

        for entry in self.section.entries() {
            if let Some(slot) = doc.objects.get_mut(&entry.num) {
                match slot {
                    Slot::InUse(stored) => {
                        stored.dirty = false;
                        stored.original = true;
                        stored.entry = Some(*entry);
                    }
                    Slot::Free { dirty, .. } => *dirty = false,
                }
            }
        }

        doc.max_num = doc.max_num.max(self.section.max_num());
        doc.file_id = Some(id);
        doc.reader = Some(Reader::from_bytes(self.out.copy)?);
        Ok(())
    }
}

fn require_root(doc: &Document) -> Result<crate::object::ObjRef> {
    let root = doc
        .root
        .ok_or_else(|| Error::structure("document has no root object"))?;
    if !doc.contains(root.num) {
        return Err(Error::structure(format!(
            "root object {} referenced but missing",
            root.num
        )));
    }
    Ok(root)
}

/// Pass 1 of object-stream resolution: register members into rotating
/// containers, opening a fresh one whenever the cap is reached
fn pack_object_streams(doc: &Document, packable: &[u32]) -> Result<Vec<ObjectStream>> {
    let mut streams = Vec::new();
    let mut current = ObjectStream::new();
    for &num in packable {
        if current.is_full() {
            streams.push(std::mem::take(&mut current));
        }
        let payload = doc.get(num).expect("packable slot vanished");
        current.add(num, serialize_object_body(payload)?)?;
    }
    if !current.is_empty() {
        streams.push(current);
    }
    Ok(streams)
}

/// Incremental variant: members whose committed entry already lives in
/// an object stream extend that stream (which itself is never touched);
/// brand-new members share plain containers
fn pack_extension_streams(doc: &Document, packable: &[u32]) -> Result<Vec<ObjectStream>> {
    let mut groups: BTreeMap<Option<u32>, Vec<u32>> = BTreeMap::new();
    for &num in packable {
        let base = match doc.objects.get(&num) {
            Some(Slot::InUse(stored)) => stored.entry.as_ref().and_then(|e| match e.kind {
                crate::xref::XrefKind::InStream { stream_num, .. } => Some(stream_num),
                _ => None,
            }),
            _ => None,
        };
        groups.entry(base).or_default().push(num);
    }

    let mut streams = Vec::new();
    for (base, nums) in groups {
        let fresh = || match base {
            Some(base) => ObjectStream::extending(base),
            None => ObjectStream::new(),
        };
        let mut current = fresh();
        for num in nums {
            if current.is_full() {
                streams.push(std::mem::replace(&mut current, fresh()));
            }
            let payload = doc.get(num).expect("packable slot vanished");
            current.add(num, serialize_object_body(payload)?)?;
        }
        if !current.is_empty() {
            streams.push(current);
        }
    }
    Ok(streams)
}

// ----------------------------------------------------------------------
// Object serialization
// ----------------------------------------------------------------------

/// Write `num generation obj <payload> endobj`
fn write_indirect_object<W: Write>(
    w: &mut W,
    num: u32,
    generation: u16,
    payload: &Object,
) -> Result<()> {
    w.write_all(format!("{} {} obj\n", num, generation).as_bytes())?;
    write_object(w, payload)?;
    w.write_all(b"\nendobj\n")?;
    Ok(())
}

/// Serialize a payload to bytes, for object-stream members
fn serialize_object_body(payload: &Object) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    write_object(&mut out, payload)?;
    Ok(out)
}

/// Write one object value
fn write_object<W: Write>(w: &mut W, obj: &Object) -> Result<()> {
    match obj {
        Object::Null => w.write_all(b"null")?,
        Object::Bool(b) => w.write_all(if *b { b"true" } else { b"false" })?,
        Object::Int(i) => w.write_all(i.to_string().as_bytes())?,
        Object::Real(r) => {
            let s = format!("{:.6}", r)
                .trim_end_matches('0')
                .trim_end_matches('.')
                .to_string();
            w.write_all(s.as_bytes())?;
        }
        Object::String(s) => write_string(w, s.as_bytes())?,
        Object::Name(n) => write_name(w, n.as_str())?,
        Object::Array(arr) => {
            w.write_all(b"[")?;
            for (i, item) in arr.iter().enumerate() {
                if i > 0 {
                    w.write_all(b" ")?;
                }
                write_object(w, item)?;
            }
            w.write_all(b"]")?;
        }
        Object::Dict(dict) => write_dict(w, dict)?,
        Object::Stream { dict, data } => {
            // The writer owns /Length; stale values would corrupt reads
            let mut dict = dict.clone();
            dict.insert(Name::new("Length"), Object::Int(data.len() as i64));
            write_dict(w, &dict)?;
            w.write_all(b"\nstream\n")?;
            w.write_all(data)?;
            w.write_all(b"\nendstream")?;
        }
        Object::Ref(r) => w.write_all(format!("{} {} R", r.num, r.generation).as_bytes())?,
    }
    Ok(())
}

fn write_dict<W: Write>(w: &mut W, dict: &Dict) -> Result<()> {
    w.write_all(b"<<\n")?;
    for (key, value) in dict.iter() {
        write_name(w, key.as_str())?;
        w.write_all(b" ")?;
        write_object(w, value)?;
        w.write_all(b"\n")?;
    }
    w.write_all(b">>")?;
    Ok(())
}

fn write_string<W: Write>(w: &mut W, bytes: &[u8]) -> Result<()> {
    w.write_all(b"(")?;
    for &byte in bytes {
        match byte {
            b'(' | b')' | b'\\' => {
                w.write_all(&[b'\\', byte])?;
            }
            b'\n' => w.write_all(b"\\n")?,
            b'\r' => w.write_all(b"\\r")?,
            b'\t' => w.write_all(b"\\t")?,
            _ if (32..=126).contains(&byte) => w.write_all(&[byte])?,
            _ => w.write_all(format!("\\{:03o}", byte).as_bytes())?,
        }
    }
    w.write_all(b")")?;
    Ok(())
}

fn write_name<W: Write>(w: &mut W, name: &str) -> Result<()> {
    w.write_all(b"/")?;
    for &byte in name.as_bytes() {
        let regular = (b'!'..=b'~').contains(&byte)
            && !matches!(
                byte,
                b'(' | b')' | b'<' | b'>' | b'[' | b']' | b'{' | b'}' | b'/' | b'%' | b'#'
            );
        if regular {
            w.write_all(&[byte])?;
        } else {
            w.write_all(format!("#{:02X}", byte).as_bytes())?;
        }
    }
    Ok(())
}
