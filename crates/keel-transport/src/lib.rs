// Byte-stream transport primitives: address parsing, dialing, listening.
use anyhow::{anyhow, Context, Result};
use std::fmt;
use std::io;
use std::pin::Pin;
use std::str::FromStr;
use std::task::{Context as TaskContext, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::tcp;
use tokio::net::TcpListener;
use tokio::net::TcpStream;
#[cfg(unix)]
use tokio::net::{unix, UnixListener, UnixStream};

/// Endpoint address in `scheme://address` form.
///
/// ```
/// use keel_transport::Address;
///
/// let addr: Address = "tcp://127.0.0.1:26658".parse().expect("addr");
/// assert_eq!(addr.to_string(), "tcp://127.0.0.1:26658");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    Tcp(String),
    #[cfg(unix)]
    Unix(std::path::PathBuf),
}

impl FromStr for Address {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.split_once("://") {
            Some(("tcp", rest)) if !rest.is_empty() => Ok(Address::Tcp(rest.to_string())),
            #[cfg(unix)]
            Some(("unix", rest)) if !rest.is_empty() => {
                Ok(Address::Unix(std::path::PathBuf::from(rest)))
            }
            Some((scheme, _)) => Err(anyhow!("unsupported address scheme {scheme:?}")),
            // Bare host:port is treated as TCP for convenience.
            None if !value.is_empty() => Ok(Address::Tcp(value.to_string())),
            None => Err(anyhow!("empty address")),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Tcp(addr) => write!(f, "tcp://{addr}"),
            #[cfg(unix)]
            Address::Unix(path) => write!(f, "unix://{}", path.display()),
        }
    }
}

/// Dial an address and return a connected stream.
pub async fn dial(addr: &Address) -> Result<Stream> {
    match addr {
        Address::Tcp(target) => {
            let stream = TcpStream::connect(target)
                .await
                .with_context(|| format!("connect tcp://{target}"))?;
            // The protocol coalesces its own writes; let small frames out.
            stream.set_nodelay(true).context("set TCP_NODELAY")?;
            Ok(Stream::Tcp(stream))
        }
        #[cfg(unix)]
        Address::Unix(path) => {
            let stream = UnixStream::connect(path)
                .await
                .with_context(|| format!("connect unix://{}", path.display()))?;
            Ok(Stream::Unix(stream))
        }
    }
}

/// Listening socket accepting keel connections.
#[derive(Debug)]
pub enum Listener {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(UnixListener),
}

impl Listener {
    pub async fn bind(addr: &Address) -> Result<Self> {
        match addr {
            Address::Tcp(target) => {
                let listener = TcpListener::bind(target)
                    .await
                    .with_context(|| format!("bind tcp://{target}"))?;
                Ok(Listener::Tcp(listener))
            }
            #[cfg(unix)]
            Address::Unix(path) => {
                let listener = UnixListener::bind(path)
                    .with_context(|| format!("bind unix://{}", path.display()))?;
                Ok(Listener::Unix(listener))
            }
        }
    }

    pub async fn accept(&self) -> Result<Stream> {
        match self {
            Listener::Tcp(listener) => {
                let (stream, _) = listener.accept().await.context("accept tcp connection")?;
                stream.set_nodelay(true).context("set TCP_NODELAY")?;
                Ok(Stream::Tcp(stream))
            }
            #[cfg(unix)]
            Listener::Unix(listener) => {
                let (stream, _) = listener.accept().await.context("accept unix connection")?;
                Ok(Stream::Unix(stream))
            }
        }
    }

    /// The bound address, with any wildcard port resolved.
    pub fn local_addr(&self) -> Result<Address> {
        match self {
            Listener::Tcp(listener) => {
                let addr = listener.local_addr().context("read local address")?;
                Ok(Address::Tcp(addr.to_string()))
            }
            #[cfg(unix)]
            Listener::Unix(listener) => {
                let addr = listener.local_addr().context("read local address")?;
                let path = addr
                    .as_pathname()
                    .ok_or_else(|| anyhow!("unnamed unix socket"))?;
                Ok(Address::Unix(path.to_path_buf()))
            }
        }
    }
}

/// Connected duplex byte stream over TCP or a Unix domain socket.
#[derive(Debug)]
pub enum Stream {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
}

impl Stream {
    /// Split into independently owned read and write halves.
    pub fn into_split(self) -> (ReadHalf, WriteHalf) {
        match self {
            Stream::Tcp(stream) => {
                let (read, write) = stream.into_split();
                (ReadHalf::Tcp(read), WriteHalf::Tcp(write))
            }
            #[cfg(unix)]
            Stream::Unix(stream) => {
                let (read, write) = stream.into_split();
                (ReadHalf::Unix(read), WriteHalf::Unix(write))
            }
        }
    }
}

#[derive(Debug)]
pub enum ReadHalf {
    Tcp(tcp::OwnedReadHalf),
    #[cfg(unix)]
    Unix(unix::OwnedReadHalf),
}

#[derive(Debug)]
pub enum WriteHalf {
    Tcp(tcp::OwnedWriteHalf),
    #[cfg(unix)]
    Unix(unix::OwnedWriteHalf),
}

impl AsyncRead for ReadHalf {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            ReadHalf::Tcp(inner) => Pin::new(inner).poll_read(cx, buf),
            #[cfg(unix)]
            ReadHalf::Unix(inner) => Pin::new(inner).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for WriteHalf {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            WriteHalf::Tcp(inner) => Pin::new(inner).poll_write(cx, buf),
            #[cfg(unix)]
            WriteHalf::Unix(inner) => Pin::new(inner).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            WriteHalf::Tcp(inner) => Pin::new(inner).poll_flush(cx),
            #[cfg(unix)]
            WriteHalf::Unix(inner) => Pin::new(inner).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            WriteHalf::Tcp(inner) => Pin::new(inner).poll_shutdown(cx),
            #[cfg(unix)]
            WriteHalf::Unix(inner) => Pin::new(inner).poll_shutdown(cx),
        }
    }
}
