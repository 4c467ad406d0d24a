//! Tag accumulation and canonicalization.
//!
//! A row carries an unordered multiset of `key=value` tags. Before encoding,
//! the multiset is reduced to a canonical form that identifies the series:
//!
//! 1. Tags sharing a key collapse to the value added last.
//! 2. Surviving tags are sorted ascending by key, byte-wise.
//! 3. Pairs are joined as `k1=v1,k2=v2,...` with no trailing separator.
//! 4. The canonical string is hashed with XXH64 (seed 0). An empty tag set maps
//!    to [`EMPTY_TAGS_HASH`] instead.
//!
//! All tag bytes are copied into a single arena owned by the [`TagSet`], and
//! every scratch buffer is retained across [`TagSet::clear`], so a recycled
//! set performs no allocation once it has seen a row of similar shape.
//!
//! # Example
//!
//! ```rust
//! use flatrow::tags::TagSet;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut tags = TagSet::new();
//! tags.add_tag("host", "web1")?;
//! tags.add_tag("dc", "east")?;
//! tags.add_tag("host", "web2")?;
//!
//! let hash = tags.canonicalize();
//! assert_eq!(tags.canonical(), b"dc=east,host=web2");
//! assert_eq!(hash, tags.canonicalize());
//! # Ok(())
//! # }
//! ```

use std::cmp::Ordering;

use twox_hash::XxHash64;

use crate::error::{Result, RowError};
use crate::schema::{EMPTY_TAGS_HASH, TAG_KV_SEPARATOR, TAG_PAIR_SEPARATOR};

/// Location of one tag inside the arena.
#[derive(Debug, Clone, Copy)]
struct TagSpan {
    key_start: usize,
    key_end: usize,
    value_end: usize,
}

impl TagSpan {
    fn key<'a>(&self, arena: &'a [u8]) -> &'a [u8] {
        &arena[self.key_start..self.key_end]
    }

    fn value<'a>(&self, arena: &'a [u8]) -> &'a [u8] {
        &arena[self.key_end..self.value_end]
    }
}

/// Accumulated tags of one row plus their canonical form.
#[derive(Debug)]
pub struct TagSet {
    /// Concatenated key and value bytes of every added tag.
    arena: Vec<u8>,
    /// One span per added tag, in insertion order.
    spans: Vec<TagSpan>,
    /// Span indices of the surviving tags, in canonical order.
    order: Vec<usize>,
    /// Canonical `k=v,k=v` string from the last canonicalization.
    canonical: Vec<u8>,
    /// Hash of `canonical`, or [`EMPTY_TAGS_HASH`].
    hash: u64,
}

impl TagSet {
    /// Creates an empty tag set.
    pub fn new() -> Self {
        Self {
            arena: Vec::new(),
            spans: Vec::new(),
            order: Vec::new(),
            canonical: Vec::new(),
            hash: EMPTY_TAGS_HASH,
        }
    }

    /// Adds a tag.
    ///
    /// Tags may repeat a key. When they do, canonicalization keeps only the
    /// value from the most recent call for that key, so a later call overrides
    /// an earlier one without any explicit removal. Callers that expect the
    /// first value to win, or expect duplicates to be rejected, must dedupe
    /// before calling.
    ///
    /// # Errors
    ///
    /// Returns [`RowError::InvalidTag`] if the key or the value is empty. A
    /// rejected tag is not stored.
    pub fn add_tag(&mut self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> Result<()> {
        let (key, value) = (key.as_ref(), value.as_ref());
        if key.is_empty() || value.is_empty() {
            return Err(RowError::InvalidTag {
                key: String::from_utf8_lossy(key).into_owned(),
                value: String::from_utf8_lossy(value).into_owned(),
            }
            .into());
        }

        let key_start = self.arena.len();
        self.arena.extend_from_slice(key);
        let key_end = self.arena.len();
        self.arena.extend_from_slice(value);
        self.spans.push(TagSpan {
            key_start,
            key_end,
            value_end: self.arena.len(),
        });
        Ok(())
    }

    /// Returns the number of tags added, duplicates included.
    pub fn len(&self) -> usize {
        self.spans.len()
    }

    /// Returns `true` if no tag has been added.
    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    /// Iterates every added tag in insertion order, duplicates included.
    pub fn raw_tags(&self) -> impl ExactSizeIterator<Item = (&[u8], &[u8])> + '_ {
        self.spans
            .iter()
            .map(|span| (span.key(&self.arena), span.value(&self.arena)))
    }

    /// Recomputes the canonical tag string and returns its hash.
    ///
    /// Idempotent: calling it again without adding tags yields the same
    /// canonical string and the same hash.
    pub fn canonicalize(&mut self) -> u64 {
        let Self {
            arena,
            spans,
            order,
            canonical,
            hash,
        } = self;
        let arena: &[u8] = arena;
        let spans: &[TagSpan] = spans;

        order.clear();
        order.extend(0..spans.len());
        // Insertion index breaks ties, so the last tag of each key run is the latest.
        order.sort_unstable_by(|&a, &b| match spans[a].key(arena).cmp(spans[b].key(arena)) {
            Ordering::Equal => a.cmp(&b),
            other => other,
        });

        let mut kept = 0;
        for i in 0..order.len() {
            let current = order[i];
            let superseded = order
                .get(i + 1)
                .is_some_and(|&next| spans[next].key(arena) == spans[current].key(arena));
            if !superseded {
                order[kept] = current;
                kept += 1;
            }
        }
        order.truncate(kept);

        canonical.clear();
        for (i, &idx) in order.iter().enumerate() {
            if i > 0 {
                canonical.push(TAG_PAIR_SEPARATOR);
            }
            canonical.extend_from_slice(spans[idx].key(arena));
            canonical.push(TAG_KV_SEPARATOR);
            canonical.extend_from_slice(spans[idx].value(arena));
        }

        *hash = if canonical.is_empty() {
            EMPTY_TAGS_HASH
        } else {
            XxHash64::oneshot(0, &canonical[..])
        };
        *hash
    }

    /// Returns the canonical tag string from the last [`canonicalize`](Self::canonicalize).
    pub fn canonical(&self) -> &[u8] {
        &self.canonical
    }

    /// Returns the hash from the last [`canonicalize`](Self::canonicalize).
    pub fn hash(&self) -> u64 {
        self.hash
    }

    /// Iterates the deduplicated tags in canonical order.
    ///
    /// Reflects the last [`canonicalize`](Self::canonicalize); tags added after
    /// it are not visible until it runs again.
    pub fn canonical_tags(
        &self,
    ) -> impl DoubleEndedIterator<Item = (&[u8], &[u8])> + ExactSizeIterator + '_ {
        self.order.iter().map(|&idx| {
            let span = &self.spans[idx];
            (span.key(&self.arena), span.value(&self.arena))
        })
    }

    /// Removes every tag, retaining allocated capacity.
    pub fn clear(&mut self) {
        self.arena.clear();
        self.spans.clear();
        self.order.clear();
        self.canonical.clear();
        self.hash = EMPTY_TAGS_HASH;
    }
}

impl Default for TagSet {
    fn default() -> Self {
        Self::new()
    }
}
