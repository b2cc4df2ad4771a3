//! Line-oriented abstraction over a command's output stream.
//!
//! Two backend shapes exist in the wild: a readable handle you pull bytes
//! from (a subprocess pipe, an SSH channel) and a lazy chunk producer (a
//! container runtime's demuxed exec stream). [`Flux`] hides the
//! difference behind one `next_line` method; bytes are decoded as UTF-8
//! once, at the adapter boundary, and never again downstream.

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};

use crate::error::{Error, Result};

/// A source of successive lines, trailing newline stripped.
///
/// Once `next_line` returns `Ok(None)` (EOF), every subsequent call must
/// also return `Ok(None)` — backends that wrap a one-shot stream rely on
/// this to drain safely from multiple call sites.
#[async_trait]
pub trait Flux: Send {
    async fn next_line(&mut self) -> Result<Option<String>>;

    /// The exit status of the underlying channel, if this stream exposes
    /// one directly (an SSH exec channel does; a plain subprocess pipe
    /// does not — the backend must wait on the child itself).
    fn exit_status(&self) -> Option<i32> {
        None
    }
}

/// Adapts any `AsyncBufRead` (a subprocess pipe, an SSH channel reader)
/// into a [`Flux`].
pub struct ReaderFlux<R> {
    lines: tokio::io::Lines<BufReader<R>>,
    at_eof: bool,
}

impl<R: AsyncBufRead + Unpin> ReaderFlux<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: BufReader::new(reader).lines(),
            at_eof: false,
        }
    }
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send> Flux for ReaderFlux<R> {
    async fn next_line(&mut self) -> Result<Option<String>> {
        if self.at_eof {
            return Ok(None);
        }
        match self.lines.next_line().await.map_err(Error::from)? {
            Some(line) => Ok(Some(line)),
            None => {
                self.at_eof = true;
                Ok(None)
            }
        }
    }
}

/// Adapts a lazy producer of raw byte chunks (a container exec stream)
/// into a [`Flux`] by buffering partial lines across chunk boundaries.
pub struct ChunkFlux<S> {
    chunks: S,
    buffer: Vec<u8>,
    at_eof: bool,
}

impl<S> ChunkFlux<S>
where
    S: Stream<Item = Result<Vec<u8>>> + Unpin,
{
    pub fn new(chunks: S) -> Self {
        Self {
            chunks,
            buffer: Vec::new(),
            at_eof: false,
        }
    }

    fn take_buffered_line(&mut self) -> Option<String> {
        let newline_pos = self.buffer.iter().position(|&b| b == b'\n')?;
        let rest = self.buffer.split_off(newline_pos + 1);
        let mut line = std::mem::replace(&mut self.buffer, rest);
        line.pop(); // drop the '\n'
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(String::from_utf8_lossy(&line).into_owned())
    }
}

#[async_trait]
impl<S> Flux for ChunkFlux<S>
where
    S: Stream<Item = Result<Vec<u8>>> + Unpin + Send,
{
    async fn next_line(&mut self) -> Result<Option<String>> {
        loop {
            if let Some(line) = self.take_buffered_line() {
                return Ok(Some(line));
            }
            if self.at_eof {
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                let remainder = std::mem::take(&mut self.buffer);
                return Ok(Some(String::from_utf8_lossy(&remainder).into_owned()));
            }
            match self.chunks.next().await {
                Some(chunk) => self.buffer.extend(chunk?),
                None => self.at_eof = true,
            }
        }
    }
}

/// A [`Flux`] over lines already fully materialized, used by the
/// script-capture backend (whose streams are contractually null) and in
/// tests.
pub struct VecFlux {
    lines: std::collections::VecDeque<String>,
}

impl VecFlux {
    pub fn new(lines: impl IntoIterator<Item = String>) -> Self {
        Self {
            lines: lines.into_iter().collect(),
        }
    }
}

#[async_trait]
impl Flux for VecFlux {
    async fn next_line(&mut self) -> Result<Option<String>> {
        Ok(self.lines.pop_front())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    #[tokio::test]
    async fn reader_flux_yields_lines_then_stable_eof() {
        let data: &[u8] = b"one\ntwo\nthree";
        let mut flux = ReaderFlux::new(data);
        assert_eq!(flux.next_line().await.unwrap(), Some("one".to_string()));
        assert_eq!(flux.next_line().await.unwrap(), Some("two".to_string()));
        assert_eq!(flux.next_line().await.unwrap(), Some("three".to_string()));
        assert_eq!(flux.next_line().await.unwrap(), None);
        assert_eq!(flux.next_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn chunk_flux_reassembles_lines_split_across_chunks() {
        let chunks = stream::iter(vec![
            Ok(b"hel".to_vec()),
            Ok(b"lo\nwor".to_vec()),
            Ok(b"ld\n".to_vec()),
        ]);
        let mut flux = ChunkFlux::new(chunks);
        assert_eq!(flux.next_line().await.unwrap(), Some("hello".to_string()));
        assert_eq!(flux.next_line().await.unwrap(), Some("world".to_string()));
        assert_eq!(flux.next_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn chunk_flux_flushes_trailing_partial_line_at_eof() {
        let chunks = stream::iter(vec![Ok(b"no-newline".to_vec())]);
        let mut flux = ChunkFlux::new(chunks);
        assert_eq!(
            flux.next_line().await.unwrap(),
            Some("no-newline".to_string())
        );
        assert_eq!(flux.next_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn vec_flux_replays_precomputed_lines() {
        let mut flux = VecFlux::new(["a".to_string(), "b".to_string()]);
        assert_eq!(flux.next_line().await.unwrap(), Some("a".to_string()));
        assert_eq!(flux.next_line().await.unwrap(), Some("b".to_string()));
        assert_eq!(flux.next_line().await.unwrap(), None);
    }
}
