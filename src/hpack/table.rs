//! HPACK static table (RFC 7541 Appendix A) and dynamic table
//! (spec.md §3 "HPACK dynamic table", §4.3 "Eviction").

use std::collections::VecDeque;

/// The fixed 61-entry static table. Index 1 is `STATIC_TABLE[0]`.
pub const STATIC_TABLE: [(&str, &str); 61] = [
    (":authority", ""),
    (":method", "GET"),
    (":method", "POST"),
    (":path", "/"),
    (":path", "/index.html"),
    (":scheme", "http"),
    (":scheme", "https"),
    (":status", "200"),
    (":status", "204"),
    (":status", "206"),
    (":status", "304"),
    (":status", "400"),
    (":status", "404"),
    (":status", "500"),
    ("accept-charset", ""),
    ("accept-encoding", "gzip, deflate"),
    ("accept-language", ""),
    ("accept-ranges", ""),
    ("accept", ""),
    ("access-control-allow-origin", ""),
    ("age", ""),
    ("allow", ""),
    ("authorization", ""),
    ("cache-control", ""),
    ("content-disposition", ""),
    ("content-encoding", ""),
    ("content-language", ""),
    ("content-length", ""),
    ("content-location", ""),
    ("content-range", ""),
    ("content-type", ""),
    ("cookie", ""),
    ("date", ""),
    ("etag", ""),
    ("expect", ""),
    ("expires", ""),
    ("from", ""),
    ("host", ""),
    ("if-match", ""),
    ("if-modified-since", ""),
    ("if-none-match", ""),
    ("if-range", ""),
    ("if-unmodified-since", ""),
    ("last-modified", ""),
    ("link", ""),
    ("location", ""),
    ("max-forwards", ""),
    ("proxy-authenticate", ""),
    ("proxy-authorization", ""),
    ("range", ""),
    ("referer", ""),
    ("refresh", ""),
    ("retry-after", ""),
    ("server", ""),
    ("set-cookie", ""),
    ("strict-transport-security", ""),
    ("transfer-encoding", ""),
    ("user-agent", ""),
    ("vary", ""),
    ("via", ""),
    ("www-authenticate", ""),
];

pub const STATIC_SIZE: usize = STATIC_TABLE.len();

/// Per-entry accounting overhead (RFC 7541 §4.1): 32 bytes plus the raw
/// name and value lengths.
pub fn entry_cost(name: &[u8], value: &[u8]) -> usize {
    32 + name.len() + value.len()
}

/// An evictable, insert-at-head ordered table of recently sent/received
/// header pairs (spec.md §9 "array-plus-head-index ring with (pointer,
/// len) slots is equally valid" — a `VecDeque` gives the same eviction
/// behavior with less bookkeeping).
#[derive(Debug, Default, Clone)]
pub struct DynamicTable {
    entries: VecDeque<(Vec<u8>, Vec<u8>)>,
    size: usize,
    limit: u32,
}

impl DynamicTable {
    pub fn new(limit: u32) -> Self {
        Self { entries: VecDeque::new(), size: 0, limit }
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Prepend a new entry, then evict from the tail until back in
    /// bounds. An entry larger than `limit` on its own results in an
    /// empty table, not an error (RFC 7541 §4.4).
    pub fn insert(&mut self, name: Vec<u8>, value: Vec<u8>) {
        let cost = entry_cost(&name, &value);
        self.entries.push_front((name, value));
        self.size += cost;
        self.evict();
    }

    /// Shrink (or grow) the limit, evicting immediately if now over
    /// bounds. `new_limit` must already have been checked against the
    /// decoder's/encoder's upper bound by the caller.
    pub fn set_limit(&mut self, new_limit: u32) {
        self.limit = new_limit;
        self.evict();
    }

    fn evict(&mut self) {
        while self.size > self.limit as usize {
            match self.entries.pop_back() {
                Some((name, value)) => self.size -= entry_cost(&name, &value),
                None => break,
            }
        }
    }

    /// 0-based index into the dynamic table only (caller adds
    /// `STATIC_SIZE` to get the combined 1-based HPACK index).
    pub fn get(&self, dynamic_index: usize) -> Option<(&[u8], &[u8])> {
        self.entries.get(dynamic_index).map(|(n, v)| (n.as_slice(), v.as_slice()))
    }

    /// Find the best match for `(name, value)` across static + dynamic
    /// tables. Returns `(index, full_match)` where `index` is the
    /// combined 1-based HPACK index and `full_match` indicates a
    /// name+value match versus a name-only match.
    pub fn find(&self, name: &[u8], value: &[u8]) -> Option<(usize, bool)> {
        let mut name_only: Option<usize> = None;
        for (i, &(sn, sv)) in STATIC_TABLE.iter().enumerate() {
            if sn.as_bytes() == name {
                if sv.as_bytes() == value {
                    return Some((i + 1, true));
                }
                name_only.get_or_insert(i + 1);
            }
        }
        for (i, (dn, dv)) in self.entries.iter().enumerate() {
            if dn.as_slice() == name {
                if dv.as_slice() == value {
                    return Some((STATIC_SIZE + i + 1, true));
                }
                name_only.get_or_insert(STATIC_SIZE + i + 1);
            }
        }
        name_only.map(|i| (i, false))
    }
}

/// Resolve a combined 1-based HPACK index (static followed by dynamic)
/// into borrowed name/value bytes.
pub fn lookup<'a>(dynamic: &'a DynamicTable, index: usize) -> Option<(&'a [u8], &'a [u8])> {
    if index == 0 {
        return None;
    }
    if index <= STATIC_SIZE {
        let (n, v) = STATIC_TABLE[index - 1];
        return Some((n.as_bytes(), v.as_bytes()));
    }
    dynamic.get(index - STATIC_SIZE - 1)
}
