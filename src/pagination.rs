//! Offset-based cursor pagination.
//!
//! A [`Cursor`] is an opaque token wrapping a numeric offset. The cursor on
//! each edge is the offset of the record that follows it, so passing a
//! page's `end_cursor` as the next request's `after` resumes exactly where
//! the page stopped. Absent or malformed cursors decode to offset 0.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Default page size when a request does not ask for a usable one.
pub const DEFAULT_PAGE_SIZE: usize = 20;

/// Upper bound on a single page.
pub const MAX_PAGE_SIZE: usize = 1000;

const CURSOR_PREFIX: &str = "offset:";

/// Opaque position token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(String);

impl Cursor {
    pub fn encode(offset: usize) -> Self {
        Cursor(STANDARD.encode(format!("{}{}", CURSOR_PREFIX, offset)))
    }

    /// Offset carried by this cursor, or 0 if the token is not one of ours.
    pub fn decode(&self) -> usize {
        Self::try_decode(&self.0).unwrap_or(0)
    }

    fn try_decode(raw: &str) -> Option<usize> {
        let bytes = STANDARD.decode(raw.trim()).ok()?;
        let text = String::from_utf8(bytes).ok()?;
        text.strip_prefix(CURSOR_PREFIX)?.parse().ok()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for Cursor {
    fn from(raw: String) -> Self {
        Cursor(raw)
    }
}

impl From<&str> for Cursor {
    fn from(raw: &str) -> Self {
        Cursor(raw.to_string())
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Decode an optional cursor into an offset, falling back to the start.
pub fn decode_offset(cursor: Option<&Cursor>) -> usize {
    match cursor {
        None => 0,
        Some(c) => match Cursor::try_decode(c.as_str()) {
            Some(offset) => offset,
            None => {
                tracing::debug!(cursor = %c, "malformed cursor, starting from the beginning");
                0
            }
        },
    }
}

/// Column a page of test runs is ordered by.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OrderKey {
    #[default]
    Id,
    StartTime,
    EndTime,
}

impl OrderKey {
    /// Parse from string, case-insensitive.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "id" => Some(OrderKey::Id),
            "start-time" | "start" => Some(OrderKey::StartTime),
            "end-time" | "end" => Some(OrderKey::EndTime),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderKey::Id => "id",
            OrderKey::StartTime => "start-time",
            OrderKey::EndTime => "end-time",
        }
    }
}

impl fmt::Display for OrderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A request for one page of records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub first: usize,
    pub after: Option<Cursor>,
    pub order_by: OrderKey,
    pub desc: bool,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            first: DEFAULT_PAGE_SIZE,
            after: None,
            order_by: OrderKey::default(),
            desc: false,
        }
    }
}

impl PageRequest {
    pub fn new(first: usize) -> Self {
        Self {
            first,
            ..Self::default()
        }
    }

    pub fn after(mut self, cursor: impl Into<Cursor>) -> Self {
        self.after = Some(cursor.into());
        self
    }

    pub fn order_by(mut self, key: OrderKey, desc: bool) -> Self {
        self.order_by = key;
        self.desc = desc;
        self
    }

    /// Page size actually used: zero falls back to the default, large
    /// requests are capped.
    pub fn limit(&self) -> usize {
        match self.first {
            0 => DEFAULT_PAGE_SIZE,
            n => n.min(MAX_PAGE_SIZE),
        }
    }

    pub fn offset(&self) -> usize {
        decode_offset(self.after.as_ref())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageInfo {
    pub has_next_page: bool,
    pub has_previous_page: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_cursor: Option<Cursor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_cursor: Option<Cursor>,
}

/// Page boundary flags for a page of `returned` records fetched at `offset`.
pub fn page_info(offset: usize, first: usize, returned: usize, total_count: usize) -> PageInfo {
    let (start_cursor, end_cursor) = if returned == 0 {
        (None, None)
    } else {
        (
            Some(Cursor::encode(offset + 1)),
            Some(Cursor::encode(offset + returned)),
        )
    };
    PageInfo {
        has_next_page: returned == first && offset + returned < total_count,
        has_previous_page: offset > 0,
        start_cursor,
        end_cursor,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge<T> {
    pub cursor: Cursor,
    pub node: T,
}

/// One page of records with its edges and boundary flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection<T> {
    pub edges: Vec<Edge<T>>,
    pub page_info: PageInfo,
    pub total_count: usize,
}

impl<T> Connection<T> {
    /// Wrap `nodes`, fetched at `offset` with page size `first`.
    pub fn from_page(nodes: Vec<T>, offset: usize, first: usize, total_count: usize) -> Self {
        let page_info = page_info(offset, first, nodes.len(), total_count);
        let edges = nodes
            .into_iter()
            .enumerate()
            .map(|(i, node)| Edge {
                cursor: Cursor::encode(offset + i + 1),
                node,
            })
            .collect();
        Self {
            edges,
            page_info,
            total_count,
        }
    }

    pub fn nodes(&self) -> impl Iterator<Item = &T> {
        self.edges.iter().map(|e| &e.node)
    }
}
