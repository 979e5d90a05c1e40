//! HPACK decoder (RFC 7541 §6), spec.md §4.3 "Decoder".

use crate::error::{Error, Result};
use crate::hpack::header::Header;
use crate::hpack::huffman;
use crate::hpack::primitive;
use crate::hpack::table::{lookup, DynamicTable};

/// Decodes header blocks against a per-connection dynamic table.
#[derive(Debug, Clone)]
pub struct Decoder {
    dynamic: DynamicTable,
    /// Upper bound this decoder will ever honor for a
    /// dynamic-table-size-update signal from the peer — our own
    /// advertised `SETTINGS_HEADER_TABLE_SIZE`.
    limit_upper: u32,
}

impl Decoder {
    pub fn new(limit_upper: u32) -> Self {
        Self { dynamic: DynamicTable::new(limit_upper), limit_upper }
    }

    /// Our advertised HEADER_TABLE_SIZE changed; future size-update
    /// signals from the peer are bounded by the new value, and the
    /// table shrinks immediately if it now exceeds it.
    pub fn set_limit_upper(&mut self, limit_upper: u32) {
        self.limit_upper = limit_upper;
        if self.dynamic.limit() > limit_upper {
            self.dynamic.set_limit(limit_upper);
        }
    }

    pub fn dynamic_table_size(&self) -> usize {
        self.dynamic.size()
    }

    /// Decode a complete header block into an ordered list of headers.
    pub fn decode(&mut self, data: &[u8]) -> Result<Vec<Header>> {
        let mut headers = Vec::new();
        let mut pos = 0;
        while pos < data.len() {
            let first = data[pos];
            if first & 0x80 != 0 {
                // Indexed header field.
                let (index, used) = primitive::decode(&data[pos..], 7)?;
                pos += used;
                let (name, value) = lookup(&self.dynamic, index as usize)
                    .ok_or_else(|| Error::compression("indexed header field: unknown index"))?;
                headers.push(Header::new(name.to_vec(), value.to_vec()));
            } else if first & 0x40 != 0 {
                // Literal with incremental indexing.
                let (index, used) = primitive::decode(&data[pos..], 6)?;
                pos += used;
                let name = self.read_name(data, &mut pos, index as usize)?;
                let value = self.read_string(data, &mut pos)?;
                self.dynamic.insert(name.clone(), value.clone());
                headers.push(Header::new(name, value));
            } else if first & 0x20 != 0 {
                // Dynamic table size update.
                let (new_limit, used) = primitive::decode(&data[pos..], 5)?;
                pos += used;
                if new_limit > self.limit_upper as u64 {
                    return Err(Error::compression("table size update exceeds advertised bound"));
                }
                self.dynamic.set_limit(new_limit as u32);
            } else {
                // Literal without indexing (0000xxxx) or never indexed (0001xxxx).
                let sensitive = first & 0x10 != 0;
                let (index, used) = primitive::decode(&data[pos..], 4)?;
                pos += used;
                let name = self.read_name(data, &mut pos, index as usize)?;
                let value = self.read_string(data, &mut pos)?;
                headers.push(Header::new(name, value).sensitive(sensitive));
            }
        }
        Ok(headers)
    }

    fn read_name(&self, data: &[u8], pos: &mut usize, index: usize) -> Result<Vec<u8>> {
        if index == 0 {
            self.read_string(data, pos)
        } else {
            lookup(&self.dynamic, index)
                .map(|(name, _)| name.to_vec())
                .ok_or_else(|| Error::compression("literal header: unknown name index"))
        }
    }

    fn read_string(&self, data: &[u8], pos: &mut usize) -> Result<Vec<u8>> {
        if *pos >= data.len() {
            return Err(Error::compression("truncated header string"));
        }
        let huffman_flag = data[*pos] & 0x80 != 0;
        let (len, used) = primitive::decode(&data[*pos..], 7)?;
        *pos += used;
        let len = len as usize;
        if *pos + len > data.len() {
            return Err(Error::compression("truncated header string"));
        }
        let raw = &data[*pos..*pos + len];
        *pos += len;
        if huffman_flag {
            huffman::decode(raw, len.saturating_mul(8))
        } else {
            Ok(raw.to_vec())
        }
    }
}
