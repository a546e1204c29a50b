use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::Record;
use crate::storage::freespace::Interval;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorMode {
    Read,
    Write,
    Delete,
}

/// What the caller must do with the line it just submitted.
#[derive(Debug, Clone, PartialEq)]
pub enum CursorOp {
    /// Decoded slot; `None` for a blank line.
    Read(Option<Record>),
    /// Emit `line` in place of the input. `previous` is the slot's old body.
    Write { previous: Option<Record>, line: String },
    /// Emit the blank `line` in place of the input.
    Delete { previous: Option<Record>, line: String },
    /// The active block is exhausted. Unless `terminal`, call `advance` and
    /// resubmit the same input; otherwise copy the input through.
    Next { terminal: bool },
    /// Outside every active block; copy the input through unchanged.
    Jump,
}

/// Single forward walk over a file's lines, acting only on lines inside
/// the active block.
#[derive(Debug, Clone)]
pub struct Cursor {
    mode: CursorMode,
    index: i64,
    lower: i64,
    upper: i64,
    following: usize,
    resubmit: bool,
}

impl Cursor {
    /// `following` is how many blocks come after `first`.
    pub fn new(mode: CursorMode, first: Interval, following: usize) -> Self {
        Cursor {
            mode,
            index: -1,
            lower: first.lo() as i64,
            upper: first.hi() as i64,
            following,
            resubmit: false,
        }
    }

    pub fn mode(&self) -> CursorMode {
        self.mode
    }

    /// Index of the most recently submitted line, -1 before the first.
    pub fn index(&self) -> i64 {
        self.index
    }

    pub fn bounds(&self) -> (i64, i64) {
        (self.lower, self.upper)
    }

    pub fn next(&mut self, line: &str, datum: Option<&Record>) -> Result<CursorOp> {
        self.index += 1;
        self.resubmit = false;

        if self.lower <= self.index && self.index <= self.upper {
            return self.apply(line, datum);
        }
        if self.index == self.upper + 1 {
            if self.following > 0 {
                self.resubmit = true;
                return Ok(CursorOp::Next { terminal: false });
            }
            return Ok(CursorOp::Next { terminal: true });
        }
        Ok(CursorOp::Jump)
    }

    /// Activate the next block. Directly after a non-terminal `Next` the
    /// cursor steps back so the same input can be resubmitted.
    pub fn advance(&mut self, block: Interval) {
        if self.resubmit {
            self.index -= 1;
            self.resubmit = false;
        }
        self.following = self.following.saturating_sub(1);
        self.lower = block.lo() as i64;
        self.upper = block.hi() as i64;
    }

    fn apply(&self, line: &str, datum: Option<&Record>) -> Result<CursorOp> {
        let previous = decode_line(line, self.index)?;
        match self.mode {
            CursorMode::Read => Ok(CursorOp::Read(previous)),
            CursorMode::Write => {
                let datum = datum.ok_or_else(|| {
                    Error::new(
                        ErrorKind::Internal,
                        format!("no pending record for write at line {}", self.index),
                    )
                })?;
                let line = serde_json::to_string(datum)?;
                Ok(CursorOp::Write { previous, line })
            }
            CursorMode::Delete => Ok(CursorOp::Delete { previous, line: String::new() }),
        }
    }
}

fn decode_line(line: &str, index: i64) -> Result<Option<Record>> {
    if line.trim().is_empty() {
        return Ok(None);
    }
    serde_json::from_str::<Record>(line)
        .map(Some)
        .map_err(|e| Error::decode(format!("line {}: {}", index, e)))
}
