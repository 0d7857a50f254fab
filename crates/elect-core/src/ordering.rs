//! Sequential member naming and ordering.
//!
//! Member nodes are named `<prefix><sequence>`, where the coordination
//! service appends a zero-padded, strictly increasing sequence number.
//! The member with the smallest sequence is the longest-standing live
//! candidate and therefore the leader.
//!
//! All comparisons between members use exact equality of bare member
//! names. A full path such as `/elect/ctf_0000000002` is normalized to
//! `ctf_0000000002` first.

use crate::error::{ElectionError, Result};

/// Separator between the member prefix and the sequence suffix.
pub const SEQUENCE_SEPARATOR: char = '_';

/// Width of the zero-padded sequence the service appends.
pub const SEQUENCE_WIDTH: usize = 10;

/// Strip any parent path, leaving the bare member name.
pub fn member_name(path: &str) -> &str {
    match path.rfind('/') {
        Some(pos) => &path[pos + 1..],
        None => path,
    }
}

/// Build a member name from a prefix and a sequence number.
pub fn format_member(prefix: &str, sequence: u64) -> String {
    format!("{prefix}{sequence:0width$}", width = SEQUENCE_WIDTH)
}

/// Parse the sequence suffix following the last separator.
///
/// Accepts bare names and full paths. Fails with
/// [`ElectionError::MalformedMemberName`] when there is no separator or the
/// suffix is not a non-empty run of ASCII digits.
pub fn parse_sequence(name: &str) -> Result<u64> {
    let bare = member_name(name);
    let malformed = || ElectionError::MalformedMemberName(name.to_string());

    let (_, suffix) = bare.rsplit_once(SEQUENCE_SEPARATOR).ok_or_else(malformed)?;
    if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
        return Err(malformed());
    }
    suffix.parse().map_err(|_| malformed())
}

/// Sort member names by ascending sequence number.
///
/// The sort is stable. Uniqueness of sequence numbers is the service's
/// guarantee and is not checked here.
pub fn order<I, S>(names: I) -> Result<Vec<String>>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut keyed = names
        .into_iter()
        .map(|name| {
            let name = name.into();
            parse_sequence(&name).map(|seq| (seq, name))
        })
        .collect::<Result<Vec<_>>>()?;

    keyed.sort_by_key(|(seq, _)| *seq);
    Ok(keyed.into_iter().map(|(_, name)| name).collect())
}

/// Head of an ordered membership (the leader), if any.
pub fn head(ordered: &[String]) -> Option<&str> {
    ordered.first().map(String::as_str)
}

/// True when `member` is the head of `ordered`.
pub fn is_head(ordered: &[String], member: &str) -> bool {
    head(ordered).is_some_and(|h| member_name(h) == member_name(member))
}

/// True when `member` appears in `ordered`.
pub fn contains(ordered: &[String], member: &str) -> bool {
    position(ordered, member).is_some()
}

fn position(ordered: &[String], member: &str) -> Option<usize> {
    let target = member_name(member);
    ordered.iter().position(|name| member_name(name) == target)
}

/// Member immediately before `member` in `ordered`.
///
/// Returns the head itself when `member` is the head, and `None` when
/// `member` is not in the list.
pub fn predecessor_of<'a>(ordered: &'a [String], member: &str) -> Option<&'a str> {
    let pos = position(ordered, member)?;
    Some(ordered[pos.saturating_sub(1)].as_str())
}
