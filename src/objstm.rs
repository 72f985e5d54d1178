//! Object streams
//!
//! An object stream bundles up to [`MAX_MEMBERS`] small objects into a
//! single compressed container. The decompressed body starts with an
//! index of `number offset` pairs (offsets relative to `/First`),
//! followed by the concatenated member bodies.
//!
//! During an incremental save an already-committed stream can never be
//! rewritten; modified members go into a fresh extension stream whose
//! `/Extends` entry names the original.

use crate::error::{Error, Result};
use crate::filter::encode_flate;
use crate::object::{Dict, Name, ObjRef, Object};

/// Capacity of one object stream
pub const MAX_MEMBERS: usize = 100;

/// Builder for one object stream
#[derive(Debug, Clone, Default)]
pub struct ObjectStream {
    members: Vec<(u32, Vec<u8>)>,
    base: Option<u32>,
}

impl ObjectStream {
    /// Create an empty stream
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an extension stream linked to an immutable predecessor
    pub fn extending(base: u32) -> Self {
        Self {
            members: Vec::new(),
            base: Some(base),
        }
    }

    /// Number of the stream this one extends, if any
    pub fn base(&self) -> Option<u32> {
        self.base
    }

    /// Add one member; returns its index within the stream.
    ///
    /// Fails with [`Error::Limit`] once the stream holds
    /// [`MAX_MEMBERS`] entries; the caller must open a new stream.
    pub fn add(&mut self, num: u32, body: Vec<u8>) -> Result<u16> {
        if self.members.len() >= MAX_MEMBERS {
            return Err(Error::limit(format!(
                "object stream already holds {} members",
                MAX_MEMBERS
            )));
        }
        let index = self.members.len() as u16;
        self.members.push((num, body));
        Ok(index)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.members.len() >= MAX_MEMBERS
    }

    /// Member object numbers in insertion (index) order
    pub fn member_numbers(&self) -> impl Iterator<Item = u32> + '_ {
        self.members.iter().map(|(num, _)| *num)
    }

    /// Serialize into a stream object.
    ///
    /// The header index and the member bodies are assembled and the whole
    /// block is flate-compressed like any other stream body.
    pub fn serialize(&self, level: u32) -> Result<Object> {
        let mut header = String::new();
        let mut offset = 0usize;
        for (num, body) in &self.members {
            header.push_str(&format!("{} {} ", num, offset));
            offset += body.len();
        }

        let mut block = Vec::with_capacity(header.len() + offset);
        block.extend_from_slice(header.as_bytes());
        let first = block.len();
        for (_, body) in &self.members {
            block.extend_from_slice(body);
        }

        let compressed = encode_flate(&block, level)?;

        let mut dict = Dict::new();
        dict.insert(Name::new("Type"), Object::Name(Name::new("ObjStm")));
        dict.insert(Name::new("N"), Object::Int(self.members.len() as i64));
        dict.insert(Name::new("First"), Object::Int(first as i64));
        dict.insert(Name::new("Filter"), Object::Name(Name::new("FlateDecode")));
        dict.insert(Name::new("Length"), Object::Int(compressed.len() as i64));
        if let Some(base) = self.base {
            dict.insert(Name::new("Extends"), Object::Ref(ObjRef::new(base, 0)));
        }

        Ok(Object::Stream {
            dict,
            data: compressed,
        })
    }
}
