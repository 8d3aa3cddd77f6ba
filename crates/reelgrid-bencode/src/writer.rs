//! Canonical bencode serialiser.

use std::collections::BTreeMap;

/// Incremental bencode writer producing canonical output.
///
/// Dictionary keys are buffered in a `BTreeMap` and emitted in lexicographic
/// byte order, which is what makes freshly marshalled info dictionaries stable
/// under re-parsing.
#[derive(Debug, Default)]
pub struct Writer {
    out: Vec<u8>,
}

impl Writer {
    /// Create an empty writer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an integer token.
    pub fn integer(&mut self, value: i64) {
        self.out.push(b'i');
        self.out.extend_from_slice(value.to_string().as_bytes());
        self.out.push(b'e');
    }

    /// Append a length-prefixed byte string token.
    pub fn bytes(&mut self, value: &[u8]) {
        self.out
            .extend_from_slice(value.len().to_string().as_bytes());
        self.out.push(b':');
        self.out.extend_from_slice(value);
    }

    /// Append a UTF-8 string token.
    pub fn text(&mut self, value: &str) {
        self.bytes(value.as_bytes());
    }

    /// Append a list built by the supplied closure.
    pub fn list(&mut self, build: impl FnOnce(&mut Self)) {
        self.out.push(b'l');
        build(self);
        self.out.push(b'e');
    }

    /// Append a dictionary whose entries are emitted in sorted key order.
    ///
    /// The closure records entries into a [`DictBuilder`]; each entry value is
    /// itself produced by a nested writer so arbitrary nesting works.
    pub fn dict(&mut self, build: impl FnOnce(&mut DictBuilder)) {
        let mut builder = DictBuilder::default();
        build(&mut builder);
        self.out.push(b'd');
        for (key, value) in builder.entries {
            self.bytes(&key);
            self.out.extend_from_slice(&value);
        }
        self.out.push(b'e');
    }

    /// Append raw pre-encoded bytes verbatim.
    pub fn raw(&mut self, value: &[u8]) {
        self.out.extend_from_slice(value);
    }

    /// Consume the writer and return the encoded payload.
    #[must_use]
    pub fn finish(self) -> Vec<u8> {
        self.out
    }
}

/// Collects dictionary entries before they are flushed in sorted order.
#[derive(Debug, Default)]
pub struct DictBuilder {
    entries: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl DictBuilder {
    /// Record one dictionary entry; the value is encoded by `build`.
    pub fn entry(&mut self, key: &str, build: impl FnOnce(&mut Writer)) {
        let mut writer = Writer::new();
        build(&mut writer);
        self.entries.insert(key.as_bytes().to_vec(), writer.finish());
    }
}
