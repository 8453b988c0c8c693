//! Master-key metadata from `cryptsetup luksDump` output.
//!
//! The dump is a list of `label: value` lines. Long hex values wrap onto
//! continuation lines that carry no label of their own:
//!
//! ```text
//! MK digest:     	3e 91 c4 0b 5d 7a 22 f8 19 a0 6e 4c b2 d7 85 13 0f 9e 61 aa
//! MK salt:       	7c 2e 55 d1 08 b4 93 6f a1 3d 4e 90 c7 22 5b 18
//!                	e6 0a 7f 39 b8 41 d2 6c 95 13 f0 2b 8e 77 4a c5
//! MK iterations: 	107250
//! ```
//!
//! A value runs from its label line up to the next label line.

use crate::error::ParseError;

pub const DIGEST_LABEL: &str = "MK digest";
pub const SALT_LABEL: &str = "MK salt";

const FRAGMENT_SEPARATOR: &str = "  ";

/// The two header fields the key derivation needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderFields {
    pub digest: Vec<u8>,
    pub salt: Vec<u8>,
}

/// Extract MK digest and MK salt from luksDump text.
pub fn extract(dump: &str) -> Result<HeaderFields, ParseError> {
    let lines: Vec<&str> = dump.lines().collect();
    let mut raw_digest = None;
    let mut raw_salt = None;

    let mut rest = lines.as_slice();
    while let Some(line) = rest.first() {
        let target = if starts_field(line, DIGEST_LABEL) {
            &mut raw_digest
        } else if starts_field(line, SALT_LABEL) {
            &mut raw_salt
        } else {
            rest = &rest[1..];
            continue;
        };

        let (value, remaining) = collect_value(rest);
        *target = Some(value);
        rest = remaining;
    }

    Ok(HeaderFields {
        digest: decode(DIGEST_LABEL, raw_digest)?,
        salt: decode(SALT_LABEL, raw_salt)?,
    })
}

fn starts_field(line: &str, label: &str) -> bool {
    line.strip_prefix(label)
        .is_some_and(|tail| tail.starts_with(':'))
}

/// A label line has a colon with something other than whitespace before it.
fn is_label_line(line: &str) -> bool {
    line.split_once(':')
        .is_some_and(|(label, _)| !label.trim().is_empty())
}

/// The value part of a continuation line. A blank label before a colon is
/// dropped with the colon.
fn continuation_value(line: &str) -> &str {
    line.split_once(':').map_or(line, |(_, value)| value)
}

fn trim_fragment(fragment: &str) -> &str {
    fragment.trim_matches(|c| c == '\t' || c == ' ')
}

/// Collect the value starting at the labelled line `lines[0]`. Returns the
/// joined fragments and the lines after the value.
fn collect_value<'a, 'b>(lines: &'b [&'a str]) -> (String, &'b [&'a str]) {
    let Some((first, tail)) = lines.split_first() else {
        return (String::new(), lines);
    };

    let head = first.split_once(':').map_or("", |(_, value)| value);
    let mut fragments = vec![trim_fragment(head)];
    let continuation = tail
        .iter()
        .take_while(|line| !is_label_line(line))
        .map(|line| trim_fragment(continuation_value(line)));
    fragments.extend(continuation);

    let consumed = fragments.len();
    (fragments.join(FRAGMENT_SEPARATOR), &lines[consumed..])
}

fn decode(field: &'static str, raw: Option<String>) -> Result<Vec<u8>, ParseError> {
    let raw = raw.ok_or(ParseError::FieldMissing { field })?;
    let compact: String = raw.split_whitespace().collect();
    if compact.is_empty() {
        return Err(ParseError::FieldEmpty { field });
    }
    hex::decode(&compact).map_err(|source| ParseError::MalformedHex { field, source })
}
