//! Document configuration
//!
//! Selects the cross-reference encoding and gates the declared format
//! version. Compressed cross-reference streams require format 1.5, so
//! choosing them upgrades the version; versions are never downgraded.

use std::fmt;

/// A declared format version, e.g. 1.4
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PdfVersion {
    pub major: u8,
    pub minor: u8,
}

impl PdfVersion {
    pub const V1_4: PdfVersion = PdfVersion { major: 1, minor: 4 };
    pub const V1_5: PdfVersion = PdfVersion { major: 1, minor: 5 };
    pub const V1_7: PdfVersion = PdfVersion { major: 1, minor: 7 };
    pub const V2_0: PdfVersion = PdfVersion { major: 2, minor: 0 };

    pub fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }

    /// Parse from header text like "1.5"
    pub fn parse(s: &str) -> Option<Self> {
        let (major, minor) = s.trim().split_once('.')?;
        Some(Self {
            major: major.parse().ok()?,
            minor: minor.parse().ok()?,
        })
    }
}

impl fmt::Display for PdfVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// On-disk encoding of cross-reference sections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum XrefMode {
    /// Classic text table
    #[default]
    Plain,
    /// Binary cross-reference stream; enables object streams
    Compressed,
}

/// Minimum version supporting cross-reference streams and object streams
pub const MIN_COMPRESSED_XREF_VERSION: PdfVersion = PdfVersion::V1_5;

/// Per-document save configuration
#[derive(Debug, Clone, Copy)]
pub struct DocumentConfiguration {
    xref_mode: XrefMode,
    version: PdfVersion,
    compression_level: u32,
}

impl DocumentConfiguration {
    pub fn new() -> Self {
        Self {
            xref_mode: XrefMode::Plain,
            version: PdfVersion::V1_4,
            compression_level: 6,
        }
    }

    pub fn xref_mode(&self) -> XrefMode {
        self.xref_mode
    }

    /// Select the cross-reference encoding.
    ///
    /// Selecting [`XrefMode::Compressed`] raises the declared version to
    /// at least 1.5. The upgrade is one-way: switching back to plain
    /// tables keeps the raised version.
    pub fn set_xref_mode(&mut self, mode: XrefMode) {
        self.xref_mode = mode;
        if mode == XrefMode::Compressed {
            self.require_version(MIN_COMPRESSED_XREF_VERSION);
        }
    }

    pub fn version(&self) -> PdfVersion {
        self.version
    }

    /// Raise the declared version to at least `min`; never downgrades
    pub fn require_version(&mut self, min: PdfVersion) {
        if self.version < min {
            self.version = min;
        }
    }

    /// Set the declared version, still honoring the compressed-xref floor
    pub fn set_version(&mut self, version: PdfVersion) {
        self.version = version;
        if self.xref_mode == XrefMode::Compressed {
            self.require_version(MIN_COMPRESSED_XREF_VERSION);
        }
    }

    pub fn compression_level(&self) -> u32 {
        self.compression_level
    }

    pub fn set_compression_level(&mut self, level: u32) {
        self.compression_level = level.min(9);
    }
}

impl Default for DocumentConfiguration {
    fn default() -> Self {
        Self::new()
    }
}
