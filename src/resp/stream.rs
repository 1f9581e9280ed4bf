//! Lazily consumed multi-bulk replies.

use crate::error::Result;
use crate::resp::parser::{parse_reply, ReplySource};
use crate::resp::types::Reply;

/// Forward-only iterator over the elements of an array reply.
///
/// Each call to `next` parses exactly one element from the underlying
/// source. The iterator borrows its source mutably, so nothing else can be
/// read from it until the iterator is drained, closed or dropped. Dropping
/// an unfinished iterator abandons the source (for a socket: disconnects),
/// because the unread elements would otherwise corrupt the next reply.
pub struct MultiBulkIter<'a, S: ReplySource + ?Sized> {
    source: &'a mut S,
    size: usize,
    position: usize,
}

impl<'a, S: ReplySource + ?Sized> MultiBulkIter<'a, S> {
    pub(crate) fn new(source: &'a mut S, size: usize) -> Self {
        Self {
            source,
            size,
            position: 0,
        }
    }

    /// Total number of elements announced by the header.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of elements consumed so far.
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn is_finished(&self) -> bool {
        self.position >= self.size
    }

    /// Read and discard every remaining element, leaving the source ready
    /// for the next reply.
    pub fn drain(mut self) -> Result<()> {
        while !self.is_finished() {
            self.advance()?;
        }
        Ok(())
    }

    /// Stop early. The source is abandoned, so a socket gets disconnected.
    pub fn close(mut self) {
        self.position = self.size;
        self.source.abandon();
    }

    fn advance(&mut self) -> Result<Reply> {
        match parse_reply(&mut *self.source) {
            Ok(reply) => {
                self.position += 1;
                Ok(reply)
            }
            Err(err) => {
                // The source has already been reset; nothing left to read.
                self.position = self.size;
                Err(err)
            }
        }
    }
}

impl<S: ReplySource + ?Sized> Iterator for MultiBulkIter<'_, S> {
    type Item = Result<Reply>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.is_finished() {
            return None;
        }
        Some(self.advance())
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.size - self.position;
        (left, Some(left))
    }
}

impl<S: ReplySource + ?Sized> Drop for MultiBulkIter<'_, S> {
    fn drop(&mut self) {
        if !self.is_finished() {
            tracing::debug!(
                position = self.position,
                size = self.size,
                "dropping unfinished multi-bulk iterator"
            );
            self.source.abandon();
        }
    }
}

/// Either a fully decoded reply or a streamed array.
pub enum Streamed<'a, S: ReplySource + ?Sized> {
    Value(Reply),
    Array(MultiBulkIter<'a, S>),
}

impl<'a, S: ReplySource + ?Sized> Streamed<'a, S> {
    /// Materialize the whole reply.
    pub fn collect(self) -> Result<Reply> {
        match self {
            Self::Value(reply) => Ok(reply),
            Self::Array(iter) => iter.collect::<Result<Vec<_>>>().map(Reply::Array),
        }
    }
}

/// Read one reply, leaving an array's elements unread.
pub fn read_streamed<S: ReplySource + ?Sized>(src: &mut S) -> Result<Streamed<'_, S>> {
    use crate::resp::parser::{read_head, Head};

    match read_head(src)? {
        Head::Value(reply) => Ok(Streamed::Value(reply)),
        Head::Array(size) => Ok(Streamed::Array(MultiBulkIter::new(src, size))),
    }
}

// ── Tests ──────────────────────────────────────────────────────────
