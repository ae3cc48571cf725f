use std::borrow::Cow;

use crate::grammar::{TOKEN_GROUP, TOKEN_REGEX};

/// Outcome of classifying one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification<'a> {
    /// Single whitespace field with at least one token; every token in order.
    Conforming(Vec<&'a [u8]>),
    /// Anything else, kept verbatim.
    NonConforming(&'a [u8]),
}

impl Classification<'_> {
    pub fn is_conforming(&self) -> bool {
        matches!(self, Classification::Conforming(_))
    }
}

/// Every token in `record`, leftmost first, non-overlapping.
pub fn find_tokens(record: &[u8]) -> Vec<&[u8]> {
    TOKEN_REGEX
        .captures_iter(record)
        .filter_map(|caps| caps.name(TOKEN_GROUP))
        .map(|m| m.as_bytes())
        .collect()
}

/// Number of whitespace separated fields, using Unicode whitespace.
pub fn whitespace_fields(record: &[u8]) -> usize {
    as_text(record).split_whitespace().count()
}

/// A record is conforming iff it is one whitespace field and holds at least
/// one token.
pub fn classify(record: &[u8]) -> Classification<'_> {
    if !is_single_field(record) {
        return Classification::NonConforming(record);
    }

    let tokens = find_tokens(record);
    if tokens.is_empty() {
        Classification::NonConforming(record)
    } else {
        Classification::Conforming(tokens)
    }
}

fn is_single_field(record: &[u8]) -> bool {
    as_text(record).split_whitespace().nth(1).is_none()
}

// Invalid UTF-8 becomes U+FFFD, which is not whitespace, so field counts
// are unaffected.
fn as_text(record: &[u8]) -> Cow<'_, str> {
    String::from_utf8_lossy(record)
}
