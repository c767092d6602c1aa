//! Capped line extraction from the inbound buffer.

use bytes::{Bytes, BytesMut};

use crate::error::Parse;

/// Pulls LF-terminated lines out of a `BytesMut`, stripped of CR and LF.
///
/// A partial line leaves the reader index untouched and reports
/// need-more. The cap is enforced against bytes consumed: the
/// initial-line flavour budgets per call, the header flavour accumulates
/// across calls until [`reset`] so a whole header block shares one
/// budget.
///
/// [`reset`]: LineParser::reset
#[derive(Debug)]
pub(crate) struct LineParser {
    max_length: usize,
    consumed: usize,
    kind: Kind,
}

#[derive(Debug, Clone, Copy)]
enum Kind {
    Initial,
    Header,
}

impl LineParser {
    pub(crate) fn initial(max_length: usize) -> LineParser {
        LineParser {
            max_length,
            consumed: 0,
            kind: Kind::Initial,
        }
    }

    pub(crate) fn header(max_length: usize) -> LineParser {
        LineParser {
            max_length,
            consumed: 0,
            kind: Kind::Header,
        }
    }

    pub(crate) fn reset(&mut self) {
        self.consumed = 0;
    }

    /// Extracts the next line, or `None` when more bytes are needed.
    pub(crate) fn parse(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, Parse> {
        if let Kind::Initial = self.kind {
            self.consumed = 0;
        }
        let budget = self.max_length.saturating_sub(self.consumed);
        match src.iter().position(|&b| b == b'\n') {
            Some(lf) => {
                if lf + 1 > budget {
                    return Err(self.overflow());
                }
                let mut line = src.split_to(lf + 1);
                self.consumed += lf + 1;
                line.truncate(lf);
                if line.last() == Some(&b'\r') {
                    line.truncate(lf - 1);
                }
                Ok(Some(line.freeze()))
            }
            None => {
                if src.len() >= budget {
                    return Err(self.overflow());
                }
                Ok(None)
            }
        }
    }

    fn overflow(&self) -> Parse {
        match self.kind {
            Kind::Initial => Parse::LineTooLong,
            Kind::Header => Parse::HeaderTooLarge,
        }
    }
}
