use std::future::poll_fn;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::Poll;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncBufRead, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use crate::error::{CorralError, Result};
use crate::protocol::codec;
use crate::protocol::frame::{read_frame, write_frame};

/// A framed, bidirectional channel over one TCP socket.
///
/// The connection owns its socket; dropping the last reference closes it.
/// Reads and writes are serialized independently, so one task may send while
/// another waits for a frame.
#[derive(Debug)]
pub struct Connection {
    peer: SocketAddr,
    read_timeout: Duration,
    reader: Mutex<BufReader<OwnedReadHalf>>,
    writer: Mutex<OwnedWriteHalf>,
}

impl Connection {
    /// Open an outbound connection.
    pub async fn connect(addr: SocketAddr, read_timeout: Duration) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        Self::from_stream(stream, read_timeout)
    }

    /// Wrap an accepted or connected stream.
    pub fn from_stream(stream: TcpStream, read_timeout: Duration) -> Result<Self> {
        let peer = stream.peer_addr()?;
        stream.set_nodelay(true)?;
        let (read_half, write_half) = stream.into_split();
        Ok(Self {
            peer,
            read_timeout,
            reader: Mutex::new(BufReader::new(read_half)),
            writer: Mutex::new(write_half),
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub async fn send_frame(&self, body: &[u8]) -> Result<()> {
        let mut writer = self.writer.lock().await;
        write_frame(&mut *writer, body).await
    }

    /// Send frames back to back with no other writer in between.
    pub async fn send_frames(&self, bodies: &[&[u8]]) -> Result<()> {
        let mut writer = self.writer.lock().await;
        for body in bodies {
            write_frame(&mut *writer, body).await?;
        }
        Ok(())
    }

    /// Wait up to the read timeout for one whole frame.
    pub async fn receive_frame(&self) -> Result<Vec<u8>> {
        let mut reader = self.reader.lock().await;
        match tokio::time::timeout(self.read_timeout, read_frame(&mut *reader)).await {
            Ok(result) => result,
            Err(_) => Err(CorralError::Timeout(self.read_timeout)),
        }
    }

    /// Send a text command frame.
    pub async fn send_text(&self, text: &str) -> Result<()> {
        self.send_frame(text.as_bytes()).await
    }

    pub async fn receive_text(&self) -> Result<String> {
        let body = self.receive_frame().await?;
        String::from_utf8(body)
            .map_err(|e| CorralError::Protocol(format!("text frame is not UTF-8: {}", e)))
    }

    pub async fn send_object<T>(&self, value: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        let body = codec::encode(value)?;
        self.send_frame(&body).await
    }

    pub async fn receive_object<T>(&self) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let body = self.receive_frame().await?;
        codec::decode(&body)
    }

    /// Whether at least one byte is waiting to be read. Never waits for data.
    ///
    /// A peer that closed the connection yields `ConnectionClosed`.
    pub async fn message_is_available(&self) -> Result<bool> {
        let mut reader = self.reader.lock().await;
        if !reader.buffer().is_empty() {
            return Ok(true);
        }

        let filled = poll_fn(|cx| match Pin::new(&mut *reader).poll_fill_buf(cx) {
            Poll::Ready(Ok(buf)) => Poll::Ready(Ok(Some(!buf.is_empty()))),
            Poll::Ready(Err(e)) => Poll::Ready(Err(e)),
            Poll::Pending => Poll::Ready(Ok(None)),
        })
        .await?;

        match filled {
            Some(true) => Ok(true),
            Some(false) => Err(CorralError::ConnectionClosed),
            None => Ok(false),
        }
    }
}
