//! Per-connection file transfer state machine.
//!
//! ```text
//!          begin(size > 0)                    received == declared
//!   Idle ─────────────────► Receiving ──────────────────────────────► Idle
//!    ▲  begin(size == 0) ─► (Completed)         │ sink write fails
//!    │                                          ▼
//!    └──────── remaining == 0 ──────────── Discarding { remaining }
//! ```
//!
//! The machine is owned by the reader task of one connection, so it needs no
//! locking.  It does not parse anything: the [`crate::FrameDecoder`] already
//! guarantees that payload bytes arrive as `BinaryChunk`s and never exceed the
//! declared size.  The machine only moves those bytes into a [`TransferSink`]
//! and reports progress.
//!
//! When a sink write fails, the transfer is aborted but the rest of the
//! declared payload still has to be consumed from the stream, so the machine
//! moves to `Discarding` and silently swallows it.

use std::io;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

/// Write-only destination of one file payload.
///
/// The peer writes into a file on disk; the server forwards every chunk to a
/// fixed set of other connections.
#[async_trait]
pub trait TransferSink: Send {
    /// Value produced once every declared byte has been written.
    type Output: Send;

    /// Writes the next slice of payload.
    async fn write_chunk(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Completes the transfer after the last chunk.
    async fn finish(&mut self) -> io::Result<Self::Output>;

    /// Releases the sink after an incomplete transfer, discarding partial data.
    async fn abort(&mut self);
}

/// Errors raised by [`TransferStateMachine`].
#[derive(Debug, Error)]
pub enum TransferError {
    /// A header arrived while a payload was still expected.
    #[error("a transfer of '{file_name}' is already in progress")]
    AlreadyReceiving { file_name: String },

    /// Payload arrived with no transfer in progress.
    #[error("received {len} payload bytes with no transfer in progress")]
    NotReceiving { len: usize },

    /// A chunk was larger than the bytes still expected.
    #[error("chunk of {len} bytes exceeds the {remaining} bytes still expected for '{file_name}'")]
    Overflow {
        file_name: String,
        len: usize,
        remaining: u64,
    },

    /// The sink rejected a write; the transfer was aborted.
    #[error("writing '{file_name}' failed: {source}")]
    SinkFailed {
        file_name: String,
        #[source]
        source: io::Error,
    },
}

/// A transfer that ran to completion.
#[derive(Debug)]
pub struct CompletedTransfer<O> {
    pub file_name: String,
    pub sender_name: String,
    pub size: u64,
    pub output: O,
}

/// A transfer cut short because its connection went away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbortedTransfer {
    pub file_name: String,
    pub sender_name: String,
    pub received: u64,
    pub declared_size: u64,
}

impl std::fmt::Display for AbortedTransfer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "'{}' from {} stopped after {} of {} bytes",
            self.file_name, self.sender_name, self.received, self.declared_size
        )
    }
}

/// Result of feeding a header or a chunk into the machine.
#[derive(Debug)]
pub enum TransferProgress<O> {
    /// More payload is expected.
    InProgress { received: u64, declared_size: u64 },
    /// The last byte arrived; the sink has been finished.
    Completed(CompletedTransfer<O>),
    /// The bytes belonged to a failed transfer and were dropped.
    Discarded { remaining: u64 },
}

struct Transfer<S> {
    file_name: String,
    sender_name: String,
    declared_size: u64,
    received: u64,
    sink: S,
}

enum TransferState<S> {
    Idle,
    Receiving(Transfer<S>),
    Discarding { remaining: u64 },
}

/// Tracks at most one in-progress transfer for one connection.
pub struct TransferStateMachine<S: TransferSink> {
    state: TransferState<S>,
}

impl<S: TransferSink> Default for TransferStateMachine<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: TransferSink> TransferStateMachine<S> {
    /// Creates an idle machine.
    pub fn new() -> Self {
        Self {
            state: TransferState::Idle,
        }
    }

    /// Returns `true` when no payload is expected.
    pub fn is_idle(&self) -> bool {
        matches!(self.state, TransferState::Idle)
    }

    /// Returns `(received, declared_size)` of the active transfer, if any.
    pub fn progress(&self) -> Option<(u64, u64)> {
        match &self.state {
            TransferState::Receiving(t) => Some((t.received, t.declared_size)),
            _ => None,
        }
    }

    /// Starts a transfer after a file header.
    ///
    /// A zero-length transfer completes immediately.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::AlreadyReceiving`] if a payload is still
    /// expected, or [`TransferError::SinkFailed`] if finishing a zero-length
    /// transfer fails.
    pub async fn begin(
        &mut self,
        file_name: impl Into<String>,
        sender_name: impl Into<String>,
        declared_size: u64,
        sink: S,
    ) -> Result<TransferProgress<S::Output>, TransferError> {
        let file_name = file_name.into();
        match &self.state {
            TransferState::Idle => {}
            TransferState::Receiving(active) => {
                return Err(TransferError::AlreadyReceiving {
                    file_name: active.file_name.clone(),
                })
            }
            TransferState::Discarding { .. } => {
                return Err(TransferError::AlreadyReceiving { file_name })
            }
        }

        debug!(file = %file_name, size = declared_size, "transfer started");
        let transfer = Transfer {
            file_name,
            sender_name: sender_name.into(),
            declared_size,
            received: 0,
            sink,
        };

        if declared_size == 0 {
            return Self::complete(transfer).await;
        }

        self.state = TransferState::Receiving(transfer);
        Ok(TransferProgress::InProgress {
            received: 0,
            declared_size,
        })
    }

    /// Writes one payload chunk into the active sink.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::NotReceiving`] when idle,
    /// [`TransferError::Overflow`] when the chunk is larger than the bytes
    /// still expected, and [`TransferError::SinkFailed`] when the sink
    /// rejects the write (the transfer is then aborted and the rest of its
    /// payload discarded).
    pub async fn consume(
        &mut self,
        chunk: &[u8],
    ) -> Result<TransferProgress<S::Output>, TransferError> {
        let len = chunk.len() as u64;

        match std::mem::replace(&mut self.state, TransferState::Idle) {
            TransferState::Idle => Err(TransferError::NotReceiving { len: chunk.len() }),

            TransferState::Discarding { remaining } => {
                let remaining = remaining.saturating_sub(len);
                if remaining > 0 {
                    self.state = TransferState::Discarding { remaining };
                }
                Ok(TransferProgress::Discarded { remaining })
            }

            TransferState::Receiving(mut transfer) => {
                let remaining = transfer.declared_size - transfer.received;
                if len > remaining {
                    let err = TransferError::Overflow {
                        file_name: transfer.file_name.clone(),
                        len: chunk.len(),
                        remaining,
                    };
                    self.state = TransferState::Receiving(transfer);
                    return Err(err);
                }

                if let Err(source) = transfer.sink.write_chunk(chunk).await {
                    warn!(file = %transfer.file_name, error = %source, "sink write failed; discarding transfer");
                    transfer.sink.abort().await;
                    let remaining = remaining - len;
                    if remaining > 0 {
                        self.state = TransferState::Discarding { remaining };
                    }
                    return Err(TransferError::SinkFailed {
                        file_name: transfer.file_name,
                        source,
                    });
                }

                transfer.received += len;
                if transfer.received == transfer.declared_size {
                    return Self::complete(transfer).await;
                }

                let progress = TransferProgress::InProgress {
                    received: transfer.received,
                    declared_size: transfer.declared_size,
                };
                self.state = TransferState::Receiving(transfer);
                Ok(progress)
            }
        }
    }

    /// Aborts the active transfer, discarding whatever the sink holds.
    ///
    /// Returns what was cut short, or `None` if nothing was in progress.
    pub async fn abort(&mut self) -> Option<AbortedTransfer> {
        match std::mem::replace(&mut self.state, TransferState::Idle) {
            TransferState::Receiving(mut transfer) => {
                transfer.sink.abort().await;
                Some(AbortedTransfer {
                    file_name: transfer.file_name,
                    sender_name: transfer.sender_name,
                    received: transfer.received,
                    declared_size: transfer.declared_size,
                })
            }
            TransferState::Idle | TransferState::Discarding { .. } => None,
        }
    }

    async fn complete(
        mut transfer: Transfer<S>,
    ) -> Result<TransferProgress<S::Output>, TransferError> {
        match transfer.sink.finish().await {
            Ok(output) => {
                debug!(file = %transfer.file_name, size = transfer.declared_size, "transfer complete");
                Ok(TransferProgress::Completed(CompletedTransfer {
                    file_name: transfer.file_name,
                    sender_name: transfer.sender_name,
                    size: transfer.declared_size,
                    output,
                }))
            }
            Err(source) => {
                transfer.sink.abort().await;
                Err(TransferError::SinkFailed {
                    file_name: transfer.file_name,
                    source,
                })
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
