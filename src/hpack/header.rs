//! The `Header` record type (spec.md §3 "Header").

/// A single decoded or to-be-encoded header field.
///
/// spec.md describes `(name_bytes, value_bytes, flags)` with a flag bit
/// tracking whether each byte range is owned or borrowed; in Rust every
/// `Header` simply owns its bytes; the one flag that remains observable
/// behavior (not just a C memory-management detail) is `sensitive`,
/// HPACK's "never indexed" bit for values like cookies that must never
/// be reused from the dynamic table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: Vec<u8>,
    pub value: Vec<u8>,
    pub sensitive: bool,
}

impl Header {
    pub fn new(name: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self { name: name.into(), value: value.into(), sensitive: false }
    }

    pub fn sensitive(mut self, sensitive: bool) -> Self {
        self.sensitive = sensitive;
        self
    }

    /// Is this a pseudo-header (name starts with `:`)?
    pub fn is_pseudo(&self) -> bool {
        self.name.first() == Some(&b':')
    }

    pub fn name_str(&self) -> &str {
        std::str::from_utf8(&self.name).unwrap_or("")
    }

    pub fn value_str(&self) -> &str {
        std::str::from_utf8(&self.value).unwrap_or("")
    }
}
