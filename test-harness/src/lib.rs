//! In-process stub application servers for keel integration tests.
//!
//! # Purpose
//! Gives tests and demos a real socket peer without a real application:
//! each stub accepts connections, decodes request frames, and answers
//! according to a scripted behavior (well-behaved echo application,
//! protocol violations, remote exceptions, or total silence).
//!
//! # Design notes
//! Responses are written and flushed as soon as a request is decoded. The
//! pipelining under test lives entirely on the client side: the stub only
//! sees requests after the client's buffered writer has been flushed.
use anyhow::{Context, Result};
use bytes::{Bytes, BytesMut};
use keel_transport::{Address, Listener, ReadHalf, WriteHalf};
use keel_wire::{Frame, FrameHeader, InfoResult, QueryResult, Request, Response, TxResult, CODE_OK};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::task::JoinHandle;
use tracing::debug;

/// Frame cap for the stub side; tests never get near it.
const MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

/// How a stub application treats incoming requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppBehavior {
    /// Answer every request with its paired response variant.
    Normal,
    /// Answer `Echo` with a `Commit` response (pipeline desynchronization).
    MismatchEcho,
    /// Answer `DeliverTx` with an `Exception`; everything else is normal.
    ExceptionOnDeliverTx,
    /// Read and discard requests, never respond.
    Silent,
}

/// A listening stub application.
pub struct StubApp {
    addr: Address,
    accept_task: JoinHandle<()>,
}

impl StubApp {
    /// Bind an ephemeral TCP port and serve `behavior` until dropped.
    pub async fn spawn(behavior: AppBehavior) -> Result<Self> {
        Self::spawn_at("tcp://127.0.0.1:0", behavior).await
    }

    /// Bind a specific address and serve `behavior` until dropped.
    pub async fn spawn_at(addr: &str, behavior: AppBehavior) -> Result<Self> {
        let addr: Address = addr.parse()?;
        let listener = Listener::bind(&addr).await?;
        let bound = listener.local_addr()?;
        let accept_task = tokio::spawn(accept_loop(listener, behavior));
        Ok(Self {
            addr: bound,
            accept_task,
        })
    }

    /// The bound address in `scheme://address` form, for `Client::new`.
    pub fn addr(&self) -> String {
        self.addr.to_string()
    }
}

impl Drop for StubApp {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn accept_loop(listener: Listener, behavior: AppBehavior) {
    loop {
        match listener.accept().await {
            Ok(stream) => {
                debug!("stub app accepted connection");
                let (read, write) = stream.into_split();
                tokio::spawn(async move {
                    if let Err(err) = serve_connection(read, write, behavior).await {
                        debug!(error = %format!("{err:#}"), "stub app connection ended");
                    }
                });
            }
            Err(err) => {
                debug!(error = %format!("{err:#}"), "stub app accept failed");
                return;
            }
        }
    }
}

async fn serve_connection(
    mut read: ReadHalf,
    mut write: WriteHalf,
    behavior: AppBehavior,
) -> Result<()> {
    let mut scratch = BytesMut::with_capacity(64 * 1024);
    loop {
        let request = match read_request(&mut read, &mut scratch).await? {
            Some(request) => request,
            None => return Ok(()),
        };
        if behavior == AppBehavior::Silent {
            continue;
        }
        let response = respond(&request, behavior);
        write_response(&mut write, &response).await?;
        write.flush().await.context("flush response")?;
    }
}

fn respond(request: &Request, behavior: AppBehavior) -> Response {
    match (behavior, request) {
        (AppBehavior::MismatchEcho, Request::Echo { .. }) => Response::Commit(TxResult::default()),
        (AppBehavior::ExceptionOnDeliverTx, Request::DeliverTx { .. }) => Response::Exception {
            error: "boom".to_string(),
        },
        (_, Request::Echo { message }) => Response::Echo {
            message: message.clone(),
        },
        (_, Request::Flush) => Response::Flush,
        (_, Request::Info { version }) => Response::Info(InfoResult {
            data: "keel-test-harness".to_string(),
            version: version.clone(),
            last_block_height: 0,
            last_block_app_hash: Bytes::new(),
        }),
        (_, Request::SetOption { key, value }) => Response::SetOption {
            log: format!("{key}={value}"),
        },
        (_, Request::DeliverTx { tx }) => Response::DeliverTx(TxResult {
            code: CODE_OK,
            data: tx.clone(),
            log: String::new(),
        }),
        (_, Request::CheckTx { tx }) => Response::CheckTx(TxResult {
            code: CODE_OK,
            data: tx.clone(),
            log: String::new(),
        }),
        (_, Request::Commit) => Response::Commit(TxResult::default()),
        (_, Request::Query(query)) => Response::Query(QueryResult {
            code: CODE_OK,
            index: 0,
            key: Bytes::new(),
            value: query.data.clone(),
            proof: Bytes::new(),
            height: query.height,
            log: String::new(),
        }),
        (_, Request::InitChain { .. }) => Response::InitChain,
        (_, Request::BeginBlock { .. }) => Response::BeginBlock,
        (_, Request::EndBlock { .. }) => Response::EndBlock {
            validator_updates: vec![],
        },
    }
}

// Server-side frame helpers with an explicit size cap.

async fn read_request<R>(recv: &mut R, scratch: &mut BytesMut) -> Result<Option<Request>>
where
    R: AsyncRead + Unpin,
{
    let mut header_bytes = [0u8; FrameHeader::LEN];
    let n = recv.read(&mut header_bytes).await.context("read header")?;
    if n == 0 {
        return Ok(None);
    }
    recv.read_exact(&mut header_bytes[n..])
        .await
        .context("read header")?;
    let header = FrameHeader::decode(&header_bytes).context("decode frame header")?;
    let length = usize::try_from(header.length).context("frame length")?;
    if length > MAX_FRAME_BYTES {
        anyhow::bail!("frame length {length} exceeds cap {MAX_FRAME_BYTES}");
    }
    scratch.clear();
    scratch.resize(length, 0u8);
    recv.read_exact(&mut scratch[..])
        .await
        .context("read frame payload")?;
    let frame = Frame {
        header,
        payload: scratch.split().freeze(),
    };
    Ok(Some(Request::decode(frame).context("decode request")?))
}

async fn write_response<W>(send: &mut W, response: &Response) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let frame = response.encode().context("encode response")?;
    let mut header_bytes = [0u8; FrameHeader::LEN];
    frame.header.encode_into(&mut header_bytes);
    send.write_all(&header_bytes)
        .await
        .context("write frame header")?;
    send.write_all(&frame.payload)
        .await
        .context("write frame payload")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_transport::dial;

    #[tokio::test]
    async fn stub_echoes_a_request() -> Result<()> {
        let app = StubApp::spawn(AppBehavior::Normal).await?;
        let stream = dial(&app.addr().parse()?).await?;
        let (mut read, mut write) = stream.into_split();

        let request = Request::Echo {
            message: "round trip".to_string(),
        };
        let frame = request.encode()?;
        let mut header_bytes = [0u8; FrameHeader::LEN];
        frame.header.encode_into(&mut header_bytes);
        write.write_all(&header_bytes).await?;
        write.write_all(&frame.payload).await?;
        write.flush().await?;

        let mut scratch = BytesMut::new();
        let mut response_header = [0u8; FrameHeader::LEN];
        read.read_exact(&mut response_header).await?;
        let header = FrameHeader::decode(&response_header)?;
        scratch.resize(header.length as usize, 0u8);
        read.read_exact(&mut scratch[..]).await?;
        let response = Response::decode(Frame {
            header,
            payload: scratch.split().freeze(),
        })?;
        assert_eq!(
            response,
            Response::Echo {
                message: "round trip".to_string()
            }
        );
        Ok(())
    }

    #[tokio::test]
    async fn silent_stub_never_answers() -> Result<()> {
        let app = StubApp::spawn(AppBehavior::Silent).await?;
        let stream = dial(&app.addr().parse()?).await?;
        let (mut read, mut write) = stream.into_split();

        let frame = Request::Flush.encode()?;
        let mut header_bytes = [0u8; FrameHeader::LEN];
        frame.header.encode_into(&mut header_bytes);
        write.write_all(&header_bytes).await?;
        write.write_all(&frame.payload).await?;
        write.flush().await?;

        let mut byte = [0u8; 1];
        let got = tokio::time::timeout(
            std::time::Duration::from_millis(200),
            read.read(&mut byte),
        )
        .await;
        assert!(got.is_err(), "silent stub must not respond");
        Ok(())
    }
}
