//! HPACK encoder (RFC 7541 §6), spec.md §4.3 "Encoder" and "Pending-size-
//! update protocol".

use crate::hpack::header::Header;
use crate::hpack::huffman;
use crate::hpack::primitive;
use crate::hpack::table::DynamicTable;

/// Encodes headers against a per-connection dynamic table, choosing the
/// most compact representation for each.
#[derive(Debug, Clone)]
pub struct Encoder {
    dynamic: DynamicTable,
    /// `end`: the limit last requested via [`Encoder::set_limit`].
    /// `min`: the smallest limit since the last emitted size-update pair
    /// — lets a temporary shrink-then-grow be announced without losing
    /// headroom (spec.md §4.3).
    limit_min: u32,
    limit_end: u32,
}

impl Encoder {
    pub fn new(limit: u32) -> Self {
        Self { dynamic: DynamicTable::new(limit), limit_min: limit, limit_end: limit }
    }

    /// Update the limit this encoder targets (driven by the peer's
    /// SETTINGS_HEADER_TABLE_SIZE). Does not touch the table yet — the
    /// change is applied via the pending size-update signal emitted by
    /// the next [`Encoder::encode`] call.
    pub fn set_limit(&mut self, new_limit: u32) {
        self.limit_end = new_limit;
        self.limit_min = self.limit_min.min(new_limit);
    }

    pub fn dynamic_table_size(&self) -> usize {
        self.dynamic.size()
    }

    /// Encode a full header block, prefixing the mandatory
    /// dynamic-table-size-update signal(s) if the limit changed since
    /// the last call.
    pub fn encode(&mut self, headers: &[Header]) -> Vec<u8> {
        let mut out = Vec::new();
        self.emit_pending_size_updates(&mut out);
        for header in headers {
            self.encode_one(header, &mut out);
        }
        out
    }

    fn emit_pending_size_updates(&mut self, out: &mut Vec<u8>) {
        if self.limit_min != self.dynamic.limit() {
            out.push(0x20);
            primitive::encode_into(self.limit_min as u64, 5, out);
            self.dynamic.set_limit(self.limit_min);
        }
        if self.limit_end != self.dynamic.limit() {
            out.push(0x20);
            primitive::encode_into(self.limit_end as u64, 5, out);
            self.dynamic.set_limit(self.limit_end);
            self.limit_min = self.limit_end;
        }
    }

    fn encode_one(&mut self, header: &Header, out: &mut Vec<u8>) {
        let found = self.dynamic.find(&header.name, &header.value);

        // Sensitive values are always emitted as "literal never indexed"
        // (RFC 7541 §7.1): never added to the dynamic table, and never
        // referenced as a full value match even if one happens to exist
        // (a prior sensitive occurrence of the same pair was itself
        // never indexed, so a genuine full match here can only be a
        // coincidental static-table or unrelated-stream collision).
        if header.sensitive {
            let name_index = found.map(|(i, _)| i).unwrap_or(0);
            out.push(0x10);
            primitive::encode_into(name_index as u64, 4, out);
            if name_index == 0 {
                self.encode_string(&header.name, out);
            }
            self.encode_string(&header.value, out);
            return;
        }

        match found {
            Some((index, true)) => {
                out.push(0x80);
                primitive::encode_into(index as u64, 7, out);
            }
            Some((index, false)) => {
                out.push(0x40);
                primitive::encode_into(index as u64, 6, out);
                self.encode_string(&header.value, out);
                self.dynamic.insert(header.name.clone(), header.value.clone());
            }
            None => {
                out.push(0x40);
                primitive::encode_into(0, 6, out);
                self.encode_string(&header.name, out);
                self.encode_string(&header.value, out);
                self.dynamic.insert(header.name.clone(), header.value.clone());
            }
        }
    }

    fn encode_string(&self, s: &[u8], out: &mut Vec<u8>) {
        let huffman_len = huffman::encoded_len(s);
        if huffman_len < s.len() {
            out.push(0x80);
            primitive::encode_into(huffman_len as u64, 7, out);
            out.extend(huffman::encode(s));
        } else {
            out.push(0);
            primitive::encode_into(s.len() as u64, 7, out);
            out.extend_from_slice(s);
        }
    }
}
