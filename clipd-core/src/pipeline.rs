//! Content-processing pipeline
//!
//! Newly observed selection content passes through here before it is
//! committed: embedded command sequences are stripped off and turned
//! into per-update flags, then whitespace/newline trimming is applied
//! according to the selection's policy. An update that trims down to
//! nothing is rejected as a whole.

use enumflags2::{bitflags, BitFlags};

use crate::registry::Policy;

/// Default command-sequence marker
pub const DEFAULT_MARKER: &str = "#clipd:";

/// Per-update command flags carried by a command sequence
///
/// Reset on every update; they modify how a single committed update is
/// handled downstream.
#[bitflags]
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandFlag {
    /// Do not record this update in the history log
    SkipHistory = 0b0000_0001,
}

/// A registered command sequence: literal prefix -> flag bit
#[derive(Debug, Clone)]
pub struct CommandSeq {
    pub prefix: String,
    pub flag: CommandFlag,
}

/// The full command table: marker plus registered sequences
#[derive(Debug, Clone)]
pub struct CommandSet {
    /// Literal marker that must open the payload for commands to apply
    pub marker: String,
    /// Registered sequences, matched in order against the remainder
    pub seqs: Vec<CommandSeq>,
}

impl Default for CommandSet {
    fn default() -> Self {
        Self {
            marker: DEFAULT_MARKER.into(),
            seqs: vec![CommandSeq {
                prefix: "skip_history:".into(),
                flag: CommandFlag::SkipHistory,
            }],
        }
    }
}

impl CommandSet {
    /// Command table with a custom marker and the default sequences
    pub fn with_marker(marker: impl Into<String>) -> Self {
        Self {
            marker: marker.into(),
            ..Self::default()
        }
    }
}

/// Result of a successful pipeline run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Processed {
    /// Cleaned content, independently owned
    pub bytes: Vec<u8>,
    /// Command flags extracted from the payload
    pub commands: BitFlags<CommandFlag>,
}

/// Run the pipeline over raw bytes
///
/// Returns `None` when the update is rejected: empty input, or input
/// that trims down to nothing.
pub fn process(
    raw: &[u8],
    policy: BitFlags<Policy>,
    commands: &CommandSet,
) -> Option<Processed> {
    if raw.is_empty() {
        return None;
    }

    // 1. Command sequences
    let mut flags = BitFlags::empty();
    let mut rest = raw;
    if rest.starts_with(commands.marker.as_bytes()) {
        rest = &rest[commands.marker.len()..];
        for seq in &commands.seqs {
            if rest.starts_with(seq.prefix.as_bytes()) {
                flags |= seq.flag;
                rest = &rest[seq.prefix.len()..];
            }
        }
    }

    // 2. Whitespace trim
    let want_trim = policy.contains(Policy::TrimWhitespace)
        || (policy.contains(Policy::TrimWhitespaceNoMultiline) && !is_multiline(rest));
    let mut bytes = if want_trim {
        trim_whitespace(rest)?
    } else {
        rest.to_vec()
    };
    if bytes.is_empty() {
        return None;
    }

    // 3. Trailing-newline trim
    if policy.contains(Policy::TrimTrailingNewline) {
        while matches!(bytes.last(), Some(b'\n') | Some(0)) {
            bytes.pop();
        }
        if bytes.is_empty() {
            return None;
        }
    }

    Some(Processed {
        bytes,
        commands: flags,
    })
}

/// Trim leading and trailing whitespace
///
/// A newline among the trimmed trailing whitespace is preserved as
/// exactly one trailing `\n`, which keeps the operation idempotent.
/// Returns `None` when nothing but whitespace remains.
fn trim_whitespace(bytes: &[u8]) -> Option<Vec<u8>> {
    let lead = bytes
        .iter()
        .take_while(|b| b.is_ascii_whitespace())
        .count();

    let mut trail = 0;
    let mut saw_newline = false;
    for &b in bytes[lead..].iter().rev() {
        if !b.is_ascii_whitespace() {
            break;
        }
        if b == b'\n' {
            saw_newline = true;
        }
        trail += 1;
    }

    let body = &bytes[lead..bytes.len() - trail];
    if body.is_empty() {
        return None;
    }

    let mut out = Vec::with_capacity(body.len() + 1);
    out.extend_from_slice(body);
    if saw_newline {
        out.push(b'\n');
    }
    Some(out)
}

/// Is the content multiline?
///
/// After skipping leading blank lines, more than one line contains
/// non-whitespace characters.
fn is_multiline(bytes: &[u8]) -> bool {
    bytes
        .split(|&b| b == b'\n')
        .skip_while(|line| line.iter().all(u8::is_ascii_whitespace))
        .filter(|line| line.iter().any(|b| !b.is_ascii_whitespace()))
        .count()
        > 1
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_policy() -> BitFlags<Policy> {
        BitFlags::empty()
    }

    // ==================== Trim Tests ====================

    #[test]
    fn test_trim_basic() {
        let out = process(b"  hello  ", Policy::TrimWhitespace.into(), &CommandSet::default())
            .unwrap();
        assert_eq!(out.bytes, b"hello");
    }

    #[test]
    fn test_trim_all_whitespace_rejected() {
        assert!(process(b"  \t \n ", Policy::TrimWhitespace.into(), &CommandSet::default())
            .is_none());
    }

    #[test]
    fn test_trim_idempotent() {
        let policy: BitFlags<Policy> = Policy::TrimWhitespace.into();
        let cmds = CommandSet::default();
        for input in [&b"  a b  "[..], b"a \n ", b"\tx\n\n", b"x\n"] {
            let once = process(input, policy, &cmds).unwrap();
            let twice = process(&once.bytes, policy, &cmds).unwrap();
            assert_eq!(once.bytes, twice.bytes, "not idempotent for {:?}", input);
        }
    }

    #[test]
    fn test_trim_preserves_single_trailing_newline() {
        let out = process(b"hello \n  ", Policy::TrimWhitespace.into(), &CommandSet::default())
            .unwrap();
        assert_eq!(out.bytes, b"hello\n");
    }

    #[test]
    fn test_trim_no_multiline_skips_multiline() {
        let policy: BitFlags<Policy> = Policy::TrimWhitespaceNoMultiline.into();
        let out = process(b"  one\ntwo  ", policy, &CommandSet::default()).unwrap();
        // Multiline content is left untrimmed
        assert_eq!(out.bytes, b"  one\ntwo  ");
    }

    #[test]
    fn test_trim_no_multiline_trims_single_line() {
        let policy: BitFlags<Policy> = Policy::TrimWhitespaceNoMultiline.into();
        let out = process(b"  word  ", policy, &CommandSet::default()).unwrap();
        assert_eq!(out.bytes, b"word");
    }

    #[test]
    fn test_leading_blank_lines_not_multiline() {
        assert!(!is_multiline(b"\n\nhello"));
        assert!(!is_multiline(b"   \nhello\n   "));
        assert!(is_multiline(b"one\ntwo"));
        assert!(is_multiline(b"\n one\n two"));
    }

    // ==================== Trailing Newline Tests ====================

    #[test]
    fn test_trailing_newline_trim() {
        let policy: BitFlags<Policy> = Policy::TrimTrailingNewline.into();
        let out = process(b"data\n\n\n", policy, &CommandSet::default()).unwrap();
        assert_eq!(out.bytes, b"data");
    }

    #[test]
    fn test_trailing_nul_trim() {
        let policy: BitFlags<Policy> = Policy::TrimTrailingNewline.into();
        let out = process(b"data\0\n\0", policy, &CommandSet::default()).unwrap();
        assert_eq!(out.bytes, b"data");
    }

    #[test]
    fn test_trailing_newline_only_rejected() {
        let policy: BitFlags<Policy> = Policy::TrimTrailingNewline.into();
        assert!(process(b"\n\n", policy, &CommandSet::default()).is_none());
    }

    // ==================== Command Sequence Tests ====================

    #[test]
    fn test_command_sequence_stripped() {
        let out = process(b"#clipd:skip_history:secret", no_policy(), &CommandSet::default())
            .unwrap();
        assert_eq!(out.bytes, b"secret");
        assert!(out.commands.contains(CommandFlag::SkipHistory));
    }

    #[test]
    fn test_no_marker_no_commands() {
        let out = process(b"skip_history:plain", no_policy(), &CommandSet::default()).unwrap();
        assert_eq!(out.bytes, b"skip_history:plain");
        assert!(out.commands.is_empty());
    }

    #[test]
    fn test_marker_without_known_command() {
        let out = process(b"#clipd:just text", no_policy(), &CommandSet::default()).unwrap();
        assert_eq!(out.bytes, b"just text");
        assert!(out.commands.is_empty());
    }

    #[test]
    fn test_custom_marker() {
        let cmds = CommandSet::with_marker("#x:");
        let out = process(b"#x:skip_history:v", no_policy(), &cmds).unwrap();
        assert_eq!(out.bytes, b"v");
        assert!(out.commands.contains(CommandFlag::SkipHistory));
    }

    // ==================== Rejection Tests ====================

    #[test]
    fn test_empty_rejected() {
        assert!(process(b"", no_policy(), &CommandSet::default()).is_none());
    }

    #[test]
    fn test_passthrough_without_policy() {
        let out = process(b"  raw \n", no_policy(), &CommandSet::default()).unwrap();
        assert_eq!(out.bytes, b"  raw \n");
    }
}
