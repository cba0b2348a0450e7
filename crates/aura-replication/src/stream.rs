//! State streams layered on the RPC channel.
//!
//! Outbound, a [`StateWriter`] turns written bytes into a `createState`,
//! `buildState`*, `finishState` call sequence sent fire-and-forget to one
//! or more members. Inbound, the handler keeps one [`StreamFeed`] per
//! (state id, sender) in the [`IncomingStreamRegistry`] and the paired
//! [`StateReader`] is drained by a background task.

use crate::address::AddressKey;
use crate::errors::StreamError;
use crate::method::{ControlOp, MethodTable};
use crate::transport::{Destination, GroupChannel, RequestOptions};
use crate::value::StateId;
use crate::wire::{CallPayload, MethodCall};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Chunked outbound state stream.
pub struct StateWriter {
    channel: Arc<dyn GroupChannel>,
    dest: Destination,
    state_id: Option<StateId>,
    build_id: u16,
    finish_id: u16,
    chunk_size: usize,
    buffer: Vec<u8>,
    sent_bytes: usize,
    closed: bool,
}

impl StateWriter {
    /// Open a stream to `dest` by sending `createState`.
    pub async fn open(
        channel: Arc<dyn GroupChannel>,
        table: &MethodTable,
        dest: Destination,
        state_id: Option<StateId>,
        chunk_size: usize,
    ) -> Result<Self, StreamError> {
        let create = MethodCall::new(
            table.control_id(ControlOp::CreateState),
            CallPayload::CreateState {
                state_id: state_id.clone(),
            },
        );
        channel
            .call_remote_methods(dest.clone(), &create, RequestOptions::get_none())
            .await?;

        Ok(Self {
            channel,
            dest,
            state_id,
            build_id: table.control_id(ControlOp::BuildState),
            finish_id: table.control_id(ControlOp::FinishState),
            chunk_size: chunk_size.max(1),
            buffer: Vec::new(),
            sent_bytes: 0,
            closed: false,
        })
    }

    /// State this stream carries
    pub fn state_id(&self) -> Option<&StateId> {
        self.state_id.as_ref()
    }

    /// Bytes handed to the transport so far
    pub fn sent_bytes(&self) -> usize {
        self.sent_bytes
    }

    /// Append bytes, sending every full chunk.
    pub async fn write(&mut self, mut bytes: &[u8]) -> Result<(), StreamError> {
        if self.closed {
            return Err(StreamError::Closed);
        }
        while !bytes.is_empty() {
            let room = self.chunk_size - self.buffer.len();
            let take = room.min(bytes.len());
            self.buffer.extend_from_slice(&bytes[..take]);
            bytes = &bytes[take..];
            if self.buffer.len() == self.chunk_size {
                self.flush().await?;
            }
        }
        Ok(())
    }

    /// Send buffered bytes as one chunk.
    pub async fn flush(&mut self) -> Result<(), StreamError> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let chunk = std::mem::take(&mut self.buffer);
        let len = chunk.len();
        let call = MethodCall::new(
            self.build_id,
            CallPayload::BuildState {
                state_id: self.state_id.clone(),
                chunk,
            },
        );
        self.channel
            .call_remote_methods(self.dest.clone(), &call, RequestOptions::get_none())
            .await?;
        self.sent_bytes += len;
        tracing::trace!(state_id = ?self.state_id, bytes = len, "sent state chunk");
        Ok(())
    }

    /// Flush and send `finishState`. Later calls are no-ops.
    ///
    /// When the final flush fails the stream is aborted instead, so
    /// receivers release their entry without applying a partial state.
    pub async fn close(&mut self) -> Result<(), StreamError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let flushed = self.flush().await;
        let finished = self.send_finish(flushed.is_err()).await;
        flushed?;
        finished
    }

    /// Drop buffered bytes and tell receivers to discard the transfer.
    pub async fn abort(&mut self) -> Result<(), StreamError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.buffer.clear();
        tracing::debug!(state_id = ?self.state_id, "aborting state stream");
        self.send_finish(true).await
    }

    async fn send_finish(&self, aborted: bool) -> Result<(), StreamError> {
        let finish = MethodCall::new(
            self.finish_id,
            CallPayload::FinishState {
                state_id: self.state_id.clone(),
                aborted,
            },
        );
        self.channel
            .call_remote_methods(self.dest.clone(), &finish, RequestOptions::get_none())
            .await?;
        Ok(())
    }
}

#[derive(Debug)]
enum Frame {
    Chunk(Vec<u8>),
    End,
}

/// Producer half of an inbound stream, held by the registry.
///
/// Dropping every feed without calling [`StreamFeed::end`] abandons the
/// stream; the reader then fails with [`StreamError::Closed`].
#[derive(Debug, Clone)]
pub struct StreamFeed {
    tx: mpsc::Sender<Frame>,
    io_timeout: Duration,
}

impl StreamFeed {
    /// Hand one chunk to the reader, waiting at most the I/O timeout for room.
    pub async fn push(&self, chunk: Vec<u8>) -> Result<(), StreamError> {
        self.send(Frame::Chunk(chunk)).await
    }

    /// Mark the stream complete after the chunks already pushed.
    pub async fn end(self) -> Result<(), StreamError> {
        self.send(Frame::End).await
    }

    async fn send(&self, frame: Frame) -> Result<(), StreamError> {
        match tokio::time::timeout(self.io_timeout, self.tx.send(frame)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(StreamError::Closed),
            Err(_) => Err(StreamError::Timeout {
                timeout_ms: self.io_timeout.as_millis() as u64,
            }),
        }
    }

    /// True once the reader is gone
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer half of an inbound stream, given to `StateAware::set_state`.
#[derive(Debug)]
pub struct StateReader {
    rx: mpsc::Receiver<Frame>,
    io_timeout: Duration,
    received_bytes: usize,
    finished: bool,
}

impl StateReader {
    /// Next chunk; `None` once the sender finished the stream.
    ///
    /// A stream abandoned before its end marker fails with
    /// [`StreamError::Closed`].
    pub async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, StreamError> {
        if self.finished {
            return Ok(None);
        }
        match tokio::time::timeout(self.io_timeout, self.rx.recv()).await {
            Ok(Some(Frame::Chunk(chunk))) => {
                self.received_bytes += chunk.len();
                Ok(Some(chunk))
            }
            Ok(Some(Frame::End)) => {
                self.finished = true;
                Ok(None)
            }
            Ok(None) => Err(StreamError::Closed),
            Err(_) => Err(StreamError::Timeout {
                timeout_ms: self.io_timeout.as_millis() as u64,
            }),
        }
    }

    /// Drain the stream into one buffer.
    pub async fn read_to_end(&mut self) -> Result<Vec<u8>, StreamError> {
        let mut out = Vec::new();
        while let Some(chunk) = self.next_chunk().await? {
            out.extend_from_slice(&chunk);
        }
        Ok(out)
    }

    /// Bytes read so far
    pub fn received_bytes(&self) -> usize {
        self.received_bytes
    }
}

/// Bounded feed/reader pair holding at most `capacity` chunks in flight.
pub fn state_stream(capacity: usize, io_timeout: Duration) -> (StreamFeed, StateReader) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        StreamFeed { tx, io_timeout },
        StateReader {
            rx,
            io_timeout,
            received_bytes: 0,
            finished: false,
        },
    )
}

/// Registry key: which state, from whom.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamKey {
    /// Streamed state
    pub state_id: Option<StateId>,
    /// Sending member
    pub sender: AddressKey,
}

impl StreamKey {
    /// Create a key
    pub fn new(state_id: Option<StateId>, sender: AddressKey) -> Self {
        Self { state_id, sender }
    }
}

#[derive(Debug)]
struct StreamEntry {
    feed: StreamFeed,
    awaiting_create: bool,
}

/// Open inbound streams keyed by (state id, sender).
///
/// A puller registers its entry before asking the holder to send, so the
/// holder's `createState` adopts that entry instead of replacing it. Any
/// other `createState` for a live key replaces the entry.
#[derive(Debug, Default)]
pub struct IncomingStreamRegistry {
    entries: Mutex<HashMap<StreamKey, StreamEntry>>,
}

impl IncomingStreamRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `feed` for `key`.
    ///
    /// A live entry under the same key is abandoned first, so its reader
    /// fails instead of applying a partial state. Returns true when that
    /// happened.
    pub fn open(&self, key: StreamKey, feed: StreamFeed) -> bool {
        self.install(key, feed, false)
    }

    /// Install `feed` for a transfer this member asked for.
    ///
    /// The next `createState` for `key` adopts the entry.
    pub fn expect(&self, key: StreamKey, feed: StreamFeed) -> bool {
        self.install(key, feed, true)
    }

    fn install(&self, key: StreamKey, feed: StreamFeed, awaiting_create: bool) -> bool {
        let mut entries = self.entries.lock();
        let stale = entries.remove(&key);
        let replaced = stale.is_some();
        drop(stale);
        entries.insert(
            key,
            StreamEntry {
                feed,
                awaiting_create,
            },
        );
        replaced
    }

    /// Claim an expected entry for an arriving `createState`.
    ///
    /// Returns false when there is no entry waiting for one.
    pub fn adopt(&self, key: &StreamKey) -> bool {
        match self.entries.lock().get_mut(key) {
            Some(entry) if entry.awaiting_create => {
                entry.awaiting_create = false;
                true
            }
            _ => false,
        }
    }

    /// Feed for `key`, if one is open.
    pub fn feed(&self, key: &StreamKey) -> Option<StreamFeed> {
        self.entries.lock().get(key).map(|entry| entry.feed.clone())
    }

    /// Remove the entry and end its stream after the pending chunks.
    ///
    /// Returns false when no entry was open.
    pub async fn finish(&self, key: &StreamKey) -> Result<bool, StreamError> {
        let entry = self.entries.lock().remove(key);
        match entry {
            Some(entry) => entry.feed.end().await.map(|()| true),
            None => Ok(false),
        }
    }

    /// Remove the entry without ending it; its reader fails.
    pub fn abort(&self, key: &StreamKey) -> bool {
        self.entries.lock().remove(key).is_some()
    }

    /// Whether `key` has an open entry
    pub fn contains(&self, key: &StreamKey) -> bool {
        self.entries.lock().contains_key(key)
    }

    /// Number of open entries
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// True when nothing is in flight
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Abandon every entry.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}
