//! AOF entry encoding/decoding
//!
//! Each entry is the command as received, encoded as a RESP array of bulk strings:
//!
//! ```text
//! *3\r\n$3\r\nDEL\r\n$5\r\nfleet\r\n$6\r\ntruck1\r\n
//! ```
//!
//! Length-prefixed tokens make the log self-describing, and a torn final
//! entry is always a strict prefix of a valid one, so it can be told apart
//! from corruption.

use bytes::{BufMut, Bytes, BytesMut};

use crate::errors::AofError;
use crate::model::Command;

/// Longest `*<n>` / `$<n>` header line accepted before calling it corrupt
const MAX_HEADER_LEN: usize = 20;

pub fn encode_command(command: &Command) -> Bytes {
    let mut buf = BytesMut::with_capacity(encoded_len(command.args()));
    encode_into(&mut buf, command.args());
    buf.freeze()
}

pub fn encode_into(buf: &mut BytesMut, args: &[String]) {
    put_header(buf, b'*', args.len());
    for arg in args {
        put_header(buf, b'$', arg.len());
        buf.put_slice(arg.as_bytes());
        buf.put_slice(b"\r\n");
    }
}

fn put_header(buf: &mut BytesMut, marker: u8, n: usize) {
    buf.put_u8(marker);
    buf.put_slice(n.to_string().as_bytes());
    buf.put_slice(b"\r\n");
}

fn encoded_len(args: &[String]) -> usize {
    16 + args.iter().map(|a| a.len() + 16).sum::<usize>()
}

/// Result of decoding a log image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeOutcome {
    pub commands: Vec<Command>,
    /// Bytes covered by complete entries
    pub valid_len: usize,
    /// The image ends with an incomplete entry
    pub truncated_tail: bool,
}

pub fn decode_entries(data: &[u8]) -> Result<DecodeOutcome, AofError> {
    let mut commands = Vec::new();
    let mut pos = 0;

    while pos < data.len() {
        match decode_entry(data, pos)? {
            Some((command, next)) => {
                commands.push(command);
                pos = next;
            }
            None if complete_entry_after(data, pos) => {
                return Err(corrupt(pos, "entry overruns the entries that follow it"));
            }
            None => {
                return Ok(DecodeOutcome {
                    commands,
                    valid_len: pos,
                    truncated_tail: true,
                })
            }
        }
    }

    Ok(DecodeOutcome {
        commands,
        valid_len: pos,
        truncated_tail: false,
    })
}

/// An incomplete entry is a torn tail only if nothing decodable follows it.
/// A damaged length header otherwise swallows the rest of the log.
fn complete_entry_after(data: &[u8], start: usize) -> bool {
    (start + 1..data.len())
        .filter(|&i| data[i] == b'*')
        .any(|i| matches!(decode_entry(data, i), Ok(Some(_))))
}

/// `Ok(None)` means the entry starting at `start` is incomplete
fn decode_entry(data: &[u8], start: usize) -> Result<Option<(Command, usize)>, AofError> {
    let mut cursor = Cursor { data, pos: start };

    let Some(count) = cursor.header(b'*')? else {
        return Ok(None);
    };
    let mut args = Vec::with_capacity(count.min(64));
    for _ in 0..count {
        let Some(len) = cursor.header(b'$')? else {
            return Ok(None);
        };
        let offset = cursor.pos;
        let Some(raw) = cursor.take(len) else {
            return Ok(None);
        };
        let token = std::str::from_utf8(raw).map_err(|_| corrupt(offset, "token is not valid UTF-8"))?;
        args.push(token.to_string());
        if !cursor.crlf()? {
            return Ok(None);
        }
    }

    if args.is_empty() {
        return Err(corrupt(start, "empty entry"));
    }
    Ok(Some((Command::new(args), cursor.pos)))
}

fn corrupt(offset: usize, reason: &str) -> AofError {
    AofError::Corrupt {
        offset,
        reason: reason.to_string(),
    }
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn remaining(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }

    /// Parse `<marker><digits>\r\n`
    fn header(&mut self, marker: u8) -> Result<Option<usize>, AofError> {
        let rest = self.remaining();
        let Some(&first) = rest.first() else {
            return Ok(None);
        };
        if first != marker {
            return Err(corrupt(self.pos, &format!("expected '{}'", marker as char)));
        }

        let window = &rest[..rest.len().min(MAX_HEADER_LEN + 2)];
        let Some(end) = window.windows(2).position(|w| w == b"\r\n") else {
            if rest.len() > MAX_HEADER_LEN {
                return Err(corrupt(self.pos, "header too long"));
            }
            return Ok(None);
        };
        if end > MAX_HEADER_LEN {
            return Err(corrupt(self.pos, "header too long"));
        }

        let digits = std::str::from_utf8(&rest[1..end]).map_err(|_| corrupt(self.pos, "invalid length"))?;
        let n = digits
            .parse::<usize>()
            .map_err(|_| corrupt(self.pos, "invalid length"))?;
        self.pos += end + 2;
        Ok(Some(n))
    }

    fn take(&mut self, len: usize) -> Option<&'a [u8]> {
        let rest = self.remaining();
        if rest.len() < len {
            return None;
        }
        self.pos += len;
        Some(&rest[..len])
    }

    /// `Ok(false)` when the terminator is cut off
    fn crlf(&mut self) -> Result<bool, AofError> {
        let rest = self.remaining();
        if rest.len() < 2 {
            if rest.is_empty() || rest == b"\r" {
                return Ok(false);
            }
            return Err(corrupt(self.pos, "missing CRLF"));
        }
        if &rest[..2] != b"\r\n" {
            return Err(corrupt(self.pos, "missing CRLF"));
        }
        self.pos += 2;
        Ok(true)
    }
}
