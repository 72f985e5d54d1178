//! Primitive object types
//!
//! The object model stored in the document table: the `Object` sum type,
//! interned names, byte strings, and indirect references.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

// ============================================================================
// Interned Name Implementation
// ============================================================================

/// Interned name with shared storage
///
/// Structural names (Type, Size, Root, ...) repeat in every dictionary the
/// writer emits. This implementation uses `Arc<str>` for zero-copy cloning;
/// common names are pre-interned for fast comparison.
#[derive(Debug, Clone, Eq)]
pub struct Name(Arc<str>);

impl Name {
    /// Create a new name, potentially sharing storage with existing names
    pub fn new(s: &str) -> Self {
        if let Some(interned) = Self::get_interned(s) {
            return interned;
        }
        Self(Arc::from(s))
    }

    /// Create from owned String
    pub fn from_string(s: String) -> Self {
        if let Some(interned) = Self::get_interned(&s) {
            return interned;
        }
        Self(Arc::from(s))
    }

    /// Get the name string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Get Arc for zero-copy sharing
    pub fn arc(&self) -> Arc<str> {
        Arc::clone(&self.0)
    }

    /// Check if this is a standard interned name
    pub fn is_interned(&self) -> bool {
        COMMON_NAMES
            .iter()
            .any(|(_, arc)| Arc::ptr_eq(&self.0, arc))
    }

    fn get_interned(s: &str) -> Option<Self> {
        COMMON_NAMES
            .iter()
            .find(|(name, _)| *name == s)
            .map(|(_, arc)| Self(Arc::clone(arc)))
    }
}

impl PartialEq for Name {
    fn eq(&self, other: &Self) -> bool {
        // Fast path: pointer equality for interned names
        if Arc::ptr_eq(&self.0, &other.0) {
            return true;
        }
        self.0.as_ref() == other.0.as_ref()
    }
}

// Dictionaries are ordered maps keyed by Name so that serialization is
// deterministic; ordering is plain byte order of the name text.
impl PartialOrd for Name {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Name {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.as_ref().cmp(other.0.as_ref())
    }
}

impl std::hash::Hash for Name {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.as_ref().hash(state);
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.0)
    }
}

impl AsRef<str> for Name {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Name {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Name {
    fn from(s: String) -> Self {
        Self::from_string(s)
    }
}

// ============================================================================
// Pre-interned Common Names
// ============================================================================

use std::sync::LazyLock;

/// Names the storage layer itself emits, pre-interned for fast comparison
static COMMON_NAMES: LazyLock<Vec<(&'static str, Arc<str>)>> = LazyLock::new(|| {
    vec![
        // Dictionary structure
        ("Type", Arc::from("Type")),
        ("Subtype", Arc::from("Subtype")),
        ("Length", Arc::from("Length")),
        ("Filter", Arc::from("Filter")),
        ("FlateDecode", Arc::from("FlateDecode")),
        // Trailer
        ("Size", Arc::from("Size")),
        ("Root", Arc::from("Root")),
        ("Info", Arc::from("Info")),
        ("Prev", Arc::from("Prev")),
        ("ID", Arc::from("ID")),
        // Cross-reference streams
        ("XRef", Arc::from("XRef")),
        ("Index", Arc::from("Index")),
        ("W", Arc::from("W")),
        // Object streams
        ("ObjStm", Arc::from("ObjStm")),
        ("N", Arc::from("N")),
        ("First", Arc::from("First")),
        ("Extends", Arc::from("Extends")),
        // Document graph
        ("Catalog", Arc::from("Catalog")),
        ("Pages", Arc::from("Pages")),
        ("Page", Arc::from("Page")),
        ("Parent", Arc::from("Parent")),
        ("Kids", Arc::from("Kids")),
        ("Count", Arc::from("Count")),
        ("Contents", Arc::from("Contents")),
        ("Resources", Arc::from("Resources")),
        ("MediaBox", Arc::from("MediaBox")),
        // Metadata
        ("Title", Arc::from("Title")),
        ("Author", Arc::from("Author")),
        ("Producer", Arc::from("Producer")),
    ]
});

// ============================================================================
// Strings, references, containers
// ============================================================================

/// A byte string; PDF strings are binary, not text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PdfString(Vec<u8>);

impl PdfString {
    pub fn new(data: Vec<u8>) -> Self {
        Self(data)
    }
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.0).ok()
    }
}

impl From<&str> for PdfString {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

/// Indirect object reference: (number, generation)
///
/// Object number 0 is reserved for the free-list head and never refers to
/// a live object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjRef {
    pub num: u32,
    pub generation: u16,
}

impl ObjRef {
    pub fn new(num: u32, generation: u16) -> Self {
        Self { num, generation }
    }
}

impl fmt::Display for ObjRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} R", self.num, self.generation)
    }
}

pub type Dict = BTreeMap<Name, Object>;
pub type Array = Vec<Object>;

/// A primitive object
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Object {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Real(f64),
    String(PdfString),
    Name(Name),
    Array(Array),
    Dict(Dict),
    Stream {
        dict: Dict,
        data: Vec<u8>,
    },
    Ref(ObjRef),
}

impl Object {
    pub fn is_null(&self) -> bool {
        matches!(self, Object::Null)
    }
    pub fn is_stream(&self) -> bool {
        matches!(self, Object::Stream { .. })
    }
    pub fn as_bool(&self) -> Option<bool> {
        if let Object::Bool(b) = self {
            Some(*b)
        } else {
            None
        }
    }
    pub fn as_int(&self) -> Option<i64> {
        if let Object::Int(i) = self {
            Some(*i)
        } else {
            None
        }
    }
    pub fn as_real(&self) -> Option<f64> {
        match self {
            Object::Real(r) => Some(*r),
            Object::Int(i) => Some(*i as f64),
            _ => None,
        }
    }
    pub fn as_name(&self) -> Option<&Name> {
        if let Object::Name(n) = self {
            Some(n)
        } else {
            None
        }
    }
    pub fn as_string(&self) -> Option<&PdfString> {
        if let Object::String(s) = self {
            Some(s)
        } else {
            None
        }
    }
    pub fn as_array(&self) -> Option<&Array> {
        if let Object::Array(a) = self {
            Some(a)
        } else {
            None
        }
    }
    pub fn as_dict(&self) -> Option<&Dict> {
        if let Object::Dict(d) = self {
            Some(d)
        } else {
            None
        }
    }
    pub fn as_obj_ref(&self) -> Option<ObjRef> {
        if let Object::Ref(r) = self {
            Some(*r)
        } else {
            None
        }
    }
}

impl From<ObjRef> for Object {
    fn from(r: ObjRef) -> Self {
        Object::Ref(r)
    }
}

impl From<i64> for Object {
    fn from(i: i64) -> Self {
        Object::Int(i)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_interning() {
        let n1 = Name::new("Type");
        let n2 = Name::new("Type");
        assert!(n1.is_interned());
        assert!(n2.is_interned());
        assert!(Arc::ptr_eq(&n1.arc(), &n2.arc()));
    }

    #[test]
    fn test_name_non_interned() {
        let n1 = Name::new("UncommonName12345");
        let n2 = Name::new("UncommonName12345");
        assert!(!n1.is_interned());
        assert!(!n2.is_interned());
        assert_eq!(n1, n2);
    }

    #[test]
    fn test_name_ordering() {
        let a = Name::new("Author");
        let t = Name::new("Type");
        assert!(a < t);
    }

    #[test]
    fn test_name_display() {
        let name = Name::new("Page");
        assert_eq!(format!("{}", name), "/Page");
    }

    #[test]
    fn test_dict_iteration_is_sorted() {
        let mut dict = Dict::new();
        dict.insert(Name::new("Type"), Object::Name(Name::new("Page")));
        dict.insert(Name::new("Contents"), Object::Null);
        dict.insert(Name::new("MediaBox"), Object::Null);

        let keys: Vec<&str> = dict.keys().map(|k| k.as_str()).collect();
        assert_eq!(keys, vec!["Contents", "MediaBox", "Type"]);
    }

    #[test]
    fn test_pdf_string_binary() {
        let s = PdfString::new(vec![0xFF, 0xFE]);
        assert_eq!(s.as_bytes(), &[0xFF, 0xFE]);
        assert_eq!(s.as_str(), None);
    }

    #[test]
    fn test_obj_ref_display() {
        let r = ObjRef::new(10, 0);
        assert_eq!(format!("{}", r), "10 0 R");
    }

    #[test]
    fn test_obj_ref_eq() {
        let r1 = ObjRef::new(5, 0);
        let r2 = ObjRef::new(5, 0);
        let r3 = ObjRef::new(5, 1);
        assert_eq!(r1, r2);
        assert_ne!(r1, r3);
    }

    #[test]
    fn test_object_accessors() {
        assert!(Object::Null.is_null());
        assert_eq!(Object::Bool(true).as_bool(), Some(true));
        assert_eq!(Object::Int(42).as_int(), Some(42));
        assert_eq!(Object::Int(42).as_real(), Some(42.0));
        assert_eq!(Object::Real(2.5).as_real(), Some(2.5));
        assert_eq!(Object::Real(2.5).as_int(), None);
        assert_eq!(
            Object::Ref(ObjRef::new(3, 0)).as_obj_ref(),
            Some(ObjRef::new(3, 0))
        );
    }

    #[test]
    fn test_object_stream_variant() {
        let mut dict = Dict::new();
        dict.insert(Name::new("Length"), Object::Int(5));
        let obj = Object::Stream {
            dict,
            data: b"Hello".to_vec(),
        };
        assert!(obj.is_stream());

        if let Object::Stream { dict, data } = obj {
            assert_eq!(data, b"Hello");
            assert!(dict.contains_key(&Name::new("Length")));
        } else {
            panic!("Expected Stream");
        }
    }

    #[test]
    fn test_complex_nested_structure() {
        let mut inner = Dict::new();
        inner.insert(Name::new("Key"), Object::String(PdfString::from("Value")));

        let arr = vec![Object::Int(1), Object::Real(2.5), Object::Dict(inner)];

        let mut outer = Dict::new();
        outer.insert(Name::new("Kids"), Object::Array(arr));

        let obj = Object::Dict(outer);
        let d = obj.as_dict().unwrap();
        let kids = d.get(&Name::new("Kids")).unwrap().as_array().unwrap();

        assert_eq!(kids.len(), 3);
        assert_eq!(kids[0].as_int(), Some(1));
        assert_eq!(kids[1].as_real(), Some(2.5));
    }
}
