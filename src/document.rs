//! Document: the aggregate root owning the indirect object table
//!
//! Objects live in an arena keyed by object number; everything else
//! refers to them through `(number, generation)` pairs, never live
//! pointers, which keeps incremental rewriting and free-list traversal
//! simple. Mutations mark objects dirty; a save commits them and flips
//! them to original (immutable history for later incremental passes).

use crate::config::{DocumentConfiguration, PdfVersion, XrefMode};
use crate::error::{Error, Result};
use crate::object::{Name, ObjRef, Object};
use crate::reader::Reader;
use crate::writer::{self, SaveMode};
use crate::xref::XrefEntry;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::debug;

/// One in-use slot of the object table
#[derive(Debug, Clone)]
pub(crate) struct StoredObject {
    pub payload: Object,
    pub generation: u16,
    /// Set on mutation, cleared by any save
    pub dirty: bool,
    /// Set once committed by a save; committed bytes are never rewritten
    pub original: bool,
    /// Eligible for object-stream packing
    pub compressible: bool,
    /// Entry committed by the most recent save
    pub entry: Option<XrefEntry>,
}

/// A numbered slot: either a live object or a freed number
#[derive(Debug, Clone)]
pub(crate) enum Slot {
    InUse(StoredObject),
    Free { generation: u16, dirty: bool },
}

/// A mutable document object graph
pub struct Document {
    pub(crate) objects: BTreeMap<u32, Slot>,
    /// Highest object number ever allocated, including save artifacts
    pub(crate) max_num: u32,
    pub(crate) config: DocumentConfiguration,
    pub(crate) root: Option<ObjRef>,
    pub(crate) info: Option<ObjRef>,
    /// Trailer identifier pair; second half is regenerated per save
    pub(crate) file_id: Option<(Vec<u8>, Vec<u8>)>,
    /// Present only when the document was loaded from bytes (or has been
    /// saved at least once); required for incremental saves
    pub(crate) reader: Option<Reader>,
}

impl Document {
    /// Create an empty document
    pub fn new() -> Self {
        Self {
            objects: BTreeMap::new(),
            max_num: 0,
            config: DocumentConfiguration::new(),
            root: None,
            info: None,
            file_id: None,
            reader: None,
        }
    }

    /// Create an empty document with a declared format version
    pub fn with_version(version: PdfVersion) -> Self {
        let mut doc = Self::new();
        doc.config.set_version(version);
        doc
    }

    /// Load a document from a file path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = std::fs::read(path)?;
        Self::from_bytes(data)
    }

    /// Load a document from bytes
    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        let reader = Reader::from_bytes(data)?;

        let mut config = DocumentConfiguration::new();
        config.set_version(reader.version());
        if reader.compressed_xref() {
            config.set_xref_mode(XrefMode::Compressed);
        }

        let mut objects = BTreeMap::new();
        for entry in reader.section().entries() {
            if entry.num == 0 {
                continue;
            }
            if entry.is_free() {
                objects.insert(
                    entry.num,
                    Slot::Free {
                        generation: entry.generation,
                        dirty: false,
                    },
                );
                continue;
            }

            let payload = reader.read_object(entry.num)?;
            // Container artifacts (object streams, xref streams) belong
            // to the storage layer, not to the document graph.
            if is_storage_artifact(&payload) {
                continue;
            }

            let compressible = !payload.is_stream() && entry.generation == 0;
            objects.insert(
                entry.num,
                Slot::InUse(StoredObject {
                    payload,
                    generation: entry.generation,
                    dirty: false,
                    original: true,
                    compressible,
                    entry: Some(*entry),
                }),
            );
        }

        let trailer = reader.trailer();
        let root = trailer.get(&Name::new("Root")).and_then(|o| o.as_obj_ref());
        let info = trailer.get(&Name::new("Info")).and_then(|o| o.as_obj_ref());
        let file_id = trailer
            .get(&Name::new("ID"))
            .and_then(|o| o.as_array())
            .and_then(|arr| {
                let a = arr.first()?.as_string()?.as_bytes().to_vec();
                let b = arr.get(1)?.as_string()?.as_bytes().to_vec();
                Some((a, b))
            });

        let max_num = reader.section().max_num();
        debug!(objects = objects.len(), max_num, "materialized object table");

        Ok(Self {
            objects,
            max_num,
            config,
            root,
            info,
            file_id,
            reader: Some(reader),
        })
    }

    /// Save configuration
    pub fn config(&self) -> &DocumentConfiguration {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut DocumentConfiguration {
        &mut self.config
    }

    /// Register a new payload; allocates the next object number
    pub fn add_object(&mut self, payload: Object) -> ObjRef {
        self.max_num += 1;
        let num = self.max_num;
        let compressible = !payload.is_stream();
        self.objects.insert(
            num,
            Slot::InUse(StoredObject {
                payload,
                generation: 0,
                dirty: true,
                original: false,
                compressible,
                entry: None,
            }),
        );
        ObjRef::new(num, 0)
    }

    /// Replace an object's payload, marking it dirty
    pub fn update_object(&mut self, num: u32, payload: Object) -> Result<()> {
        match self.objects.get_mut(&num) {
            Some(Slot::InUse(stored)) => {
                if payload.is_stream() {
                    stored.compressible = false;
                }
                stored.payload = payload;
                stored.dirty = true;
                Ok(())
            }
            Some(Slot::Free { .. }) => Err(Error::argument(format!(
                "object {} has been freed",
                num
            ))),
            None => Err(Error::argument(format!("object {} does not exist", num))),
        }
    }

    /// Free an object number; its generation is bumped for any reuse
    pub fn delete_object(&mut self, num: u32) -> Result<()> {
        let slot = self
            .objects
            .get_mut(&num)
            .ok_or_else(|| Error::argument(format!("object {} does not exist", num)))?;
        match slot {
            Slot::InUse(stored) => {
                let generation = stored.generation;
                *slot = Slot::Free {
                    generation: generation.saturating_add(1),
                    dirty: true,
                };
                Ok(())
            }
            Slot::Free { .. } => Err(Error::argument(format!(
                "object {} is already free",
                num
            ))),
        }
    }

    /// Get an object's payload
    pub fn get(&self, num: u32) -> Option<&Object> {
        match self.objects.get(&num) {
            Some(Slot::InUse(stored)) => Some(&stored.payload),
            _ => None,
        }
    }

    /// Resolve one level of indirection: a `Ref` payload is looked up in
    /// the table, anything else is returned as-is
    pub fn resolve<'a>(&'a self, obj: &'a Object) -> Result<&'a Object> {
        match obj {
            Object::Ref(r) => self.resolve_ref(*r),
            other => Ok(other),
        }
    }

    /// Resolve a reference against the table
    pub fn resolve_ref(&self, r: ObjRef) -> Result<&Object> {
        match self.objects.get(&r.num) {
            Some(Slot::InUse(stored)) if stored.generation == r.generation => Ok(&stored.payload),
            Some(Slot::InUse(stored)) => Err(Error::structure(format!(
                "generation mismatch for object {}: {} vs {}",
                r.num, stored.generation, r.generation
            ))),
            Some(Slot::Free { .. }) => {
                Err(Error::structure(format!("object {} is free", r.num)))
            }
            None => Err(Error::structure(format!(
                "object {} referenced but missing",
                r.num
            ))),
        }
    }

    pub fn contains(&self, num: u32) -> bool {
        matches!(self.objects.get(&num), Some(Slot::InUse(_)))
    }

    /// Whether an object has uncommitted changes
    pub fn is_dirty(&self, num: u32) -> bool {
        match self.objects.get(&num) {
            Some(Slot::InUse(stored)) => stored.dirty,
            Some(Slot::Free { dirty, .. }) => *dirty,
            None => false,
        }
    }

    /// Opt an object out of (or back into) object-stream packing
    pub fn set_compressible(&mut self, num: u32, compressible: bool) -> Result<()> {
        match self.objects.get_mut(&num) {
            Some(Slot::InUse(stored)) => {
                stored.compressible = compressible && !stored.payload.is_stream();
                Ok(())
            }
            _ => Err(Error::argument(format!("object {} does not exist", num))),
        }
    }

    /// Numbers of all live objects, ascending
    pub fn object_numbers(&self) -> Vec<u32> {
        self.objects
            .iter()
            .filter(|(_, slot)| matches!(slot, Slot::InUse(_)))
            .map(|(num, _)| *num)
            .collect()
    }

    /// Count of live objects
    pub fn len(&self) -> usize {
        self.object_numbers().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Highest object number ever allocated
    pub fn max_object_num(&self) -> u32 {
        self.max_num
    }

    pub fn root(&self) -> Option<ObjRef> {
        self.root
    }

    pub fn set_root(&mut self, root: ObjRef) {
        self.root = Some(root);
    }

    pub fn info(&self) -> Option<ObjRef> {
        self.info
    }

    pub fn set_info(&mut self, info: ObjRef) {
        self.info = Some(info);
    }

    /// The trailer identifier pair, if the document has been saved or
    /// was loaded from a file carrying one
    pub fn file_id(&self) -> Option<(&[u8], &[u8])> {
        self.file_id
            .as_ref()
            .map(|(a, b)| (a.as_slice(), b.as_slice()))
    }

    /// The reader backing incremental saves, if any
    pub fn reader(&self) -> Option<&Reader> {
        self.reader.as_ref()
    }

    /// Save to a file path.
    ///
    /// An I/O failure aborts the pass and leaves the destination
    /// undefined; callers wanting atomicity should target a scratch path
    /// and rename after success.
    pub fn save<P: AsRef<Path>>(&mut self, path: P, mode: SaveMode) -> Result<()> {
        let file = File::create(path)?;
        let mut out = BufWriter::new(file);
        self.save_to(&mut out, mode)?;
        out.flush()?;
        Ok(())
    }

    /// Save to an arbitrary writer
    pub fn save_to<W: Write>(&mut self, out: &mut W, mode: SaveMode) -> Result<()> {
        writer::save(self, out, mode)
    }
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

/// Streams the storage layer writes for itself rather than on behalf of
/// the caller: object-stream containers and xref streams
fn is_storage_artifact(payload: &Object) -> bool {
    let Object::Stream { dict, .. } = payload else {
        return false;
    };
    matches!(
        dict.get(&Name::new("Type")).and_then(|o| o.as_name()),
        Some(name) if name.as_str() == "ObjStm" || name.as_str() == "XRef"
    )
}
