//! Peer data channels.
//!
//! A [`DataChannel`] carries text frames between two connected peers. Two
//! implementations ship here: an in-process pair backed by tokio mpsc queues
//! and a TCP stream carrying newline-delimited frames of bounded length.

use std::fmt::Debug;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};

use crate::error::PeerError;
use crate::protocol::MAX_FRAME_LEN;

/// frames buffered per direction before `send` waits
const MEMORY_CHANNEL_CAPACITY: usize = 1024;

/// bidirectional frame transport between two peers
#[async_trait]
pub trait DataChannel: Send + Sync + Debug {
    /// send one frame
    ///
    /// # Errors
    ///
    /// Returns [`PeerError::ChannelClosed`] once either side has closed.
    async fn send(&self, frame: String) -> Result<(), PeerError>;

    /// next frame from the remote side, `None` once the channel is closed
    async fn recv(&self) -> Result<Option<String>, PeerError>;

    /// close the local end; the remote `recv` then yields `None`
    async fn close(&self);
}

/// one end of an in-process channel pair
#[derive(Debug)]
pub struct MemoryChannel {
    tx: Mutex<Option<mpsc::Sender<String>>>,
    rx: Mutex<mpsc::Receiver<String>>,
}

/// create two connected in-process channel ends
pub fn memory_pair() -> (MemoryChannel, MemoryChannel) {
    let (a_tx, b_rx) = mpsc::channel(MEMORY_CHANNEL_CAPACITY);
    let (b_tx, a_rx) = mpsc::channel(MEMORY_CHANNEL_CAPACITY);
    (
        MemoryChannel {
            tx: Mutex::new(Some(a_tx)),
            rx: Mutex::new(a_rx),
        },
        MemoryChannel {
            tx: Mutex::new(Some(b_tx)),
            rx: Mutex::new(b_rx),
        },
    )
}

#[async_trait]
impl DataChannel for MemoryChannel {
    async fn send(&self, frame: String) -> Result<(), PeerError> {
        let tx = self.tx.lock().await.clone().ok_or(PeerError::ChannelClosed)?;
        tx.send(frame).await.map_err(|_| PeerError::ChannelClosed)
    }

    async fn recv(&self) -> Result<Option<String>, PeerError> {
        Ok(self.rx.lock().await.recv().await)
    }

    async fn close(&self) {
        self.tx.lock().await.take();
    }
}

/// data channel over a tcp stream, one frame per line
#[derive(Debug)]
pub struct TcpChannel {
    reader: Mutex<FramedRead<OwnedReadHalf, LinesCodec>>,
    writer: Mutex<Option<OwnedWriteHalf>>,
    max_frame_len: usize,
}

impl TcpChannel {
    pub fn new(stream: TcpStream) -> Self {
        Self::with_max_frame_len(stream, MAX_FRAME_LEN)
    }

    /// a line longer than `max_frame_len` is a protocol error, not a frame
    pub fn with_max_frame_len(stream: TcpStream, max_frame_len: usize) -> Self {
        if let Err(e) = stream.set_nodelay(true) {
            tracing::warn!("Failed to set TCP_NODELAY: {}", e);
        }
        let (read, write) = stream.into_split();
        Self {
            reader: Mutex::new(FramedRead::new(
                read,
                LinesCodec::new_with_max_length(max_frame_len),
            )),
            writer: Mutex::new(Some(write)),
            max_frame_len,
        }
    }
}

#[async_trait]
impl DataChannel for TcpChannel {
    async fn send(&self, frame: String) -> Result<(), PeerError> {
        // json frames never contain a raw newline
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(PeerError::ChannelClosed)?;
        writer.write_all(frame.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
        Ok(())
    }

    async fn recv(&self) -> Result<Option<String>, PeerError> {
        match self.reader.lock().await.next().await {
            None => Ok(None),
            Some(Ok(line)) => Ok(Some(line)),
            Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                Err(PeerError::FrameTooLarge(self.max_frame_len))
            }
            Some(Err(LinesCodecError::Io(e))) => Err(e.into()),
        }
    }

    async fn close(&self) {
        if let Some(mut writer) = self.writer.lock().await.take() {
            if let Err(e) = writer.shutdown().await {
                tracing::debug!("TCP shutdown error: {}", e);
            }
        }
    }
}
