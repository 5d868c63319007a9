//! Hardware channel links
//!
//! A link is a byte stream to one device. Addresses of the form
//! `tcp://host:port` (or a bare `host:port`) reach a serial-to-network bridge;
//! anything else is taken as a character device path such as `/dev/ttyUSB0`,
//! which must already be configured raw at the right baud rate.
//!
//! Reads never fail with an error value: the caller gets a [`ReadOutcome`] and
//! drives its own state machine from it. Writes carry device feedback (the
//! RFID reader's beep) and fail like any other I/O.

use async_trait::async_trait;
use std::io;
use std::time::Duration;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Result of one bounded read
#[derive(Debug)]
pub enum ReadOutcome {
    /// `n` bytes were placed at the front of the buffer
    Data(usize),
    /// Nothing arrived before the timeout
    Idle,
    /// The link is broken and must be reopened
    Fault(io::Error),
}

/// An open byte stream to a device
#[async_trait]
pub trait Link: Send {
    /// Read whatever is available, waiting at most `timeout`
    async fn read(&mut self, buf: &mut [u8], timeout: Duration) -> ReadOutcome;

    /// Send all of `data` to the device
    async fn write(&mut self, data: &[u8]) -> io::Result<()>;
}

/// Opens links by address
#[async_trait]
pub trait LinkOpener: Send + Sync {
    async fn open(&self, address: &str) -> io::Result<Box<dyn Link>>;
}

/// Map a finished read onto an outcome
fn read_outcome(result: Result<io::Result<usize>, tokio::time::error::Elapsed>) -> ReadOutcome {
    match result {
        Err(_) => ReadOutcome::Idle,
        Ok(Ok(0)) => ReadOutcome::Fault(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "link closed by peer",
        )),
        Ok(Ok(n)) => ReadOutcome::Data(n),
        Ok(Err(e)) => ReadOutcome::Fault(e),
    }
}

pub struct TcpLink {
    stream: TcpStream,
}

#[async_trait]
impl Link for TcpLink {
    async fn read(&mut self, buf: &mut [u8], timeout: Duration) -> ReadOutcome {
        read_outcome(tokio::time::timeout(timeout, self.stream.read(buf)).await)
    }

    async fn write(&mut self, data: &[u8]) -> io::Result<()> {
        self.stream.write_all(data).await
    }
}

/// Character device link
pub struct TtyLink {
    file: File,
}

#[async_trait]
impl Link for TtyLink {
    async fn read(&mut self, buf: &mut [u8], timeout: Duration) -> ReadOutcome {
        // An interrupted read stays queued inside `File` and its bytes are
        // returned by the next call
        read_outcome(tokio::time::timeout(timeout, self.file.read(buf)).await)
    }

    async fn write(&mut self, data: &[u8]) -> io::Result<()> {
        self.file.write_all(data).await?;
        self.file.flush().await
    }
}

/// Where an address points
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkAddress {
    Tcp(String),
    Device(String),
}

impl LinkAddress {
    pub fn parse(address: &str) -> io::Result<Self> {
        let address = address.trim();
        if address.is_empty() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "empty link address"));
        }
        if let Some(host) = address.strip_prefix("tcp://") {
            return Ok(LinkAddress::Tcp(host.to_string()));
        }
        let looks_like_host_port = !address.starts_with('/')
            && address
                .rsplit_once(':')
                .is_some_and(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok());
        if looks_like_host_port {
            Ok(LinkAddress::Tcp(address.to_string()))
        } else {
            Ok(LinkAddress::Device(address.to_string()))
        }
    }
}

/// Opens TCP bridges and local character devices
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemLinkOpener;

#[async_trait]
impl LinkOpener for SystemLinkOpener {
    async fn open(&self, address: &str) -> io::Result<Box<dyn Link>> {
        match LinkAddress::parse(address)? {
            LinkAddress::Tcp(host) => {
                let stream = TcpStream::connect(host.as_str()).await?;
                stream.set_nodelay(true)?;
                Ok(Box::new(TcpLink { stream }))
            }
            LinkAddress::Device(path) => {
                let file = OpenOptions::new().read(true).write(true).open(&path).await?;
                Ok(Box::new(TtyLink { file }))
            }
        }
    }
}
