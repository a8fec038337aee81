use std::future::Future;
use std::io;
use std::net::SocketAddr;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use super::manager::DictionaryHandle;
use super::protocol::{DictResponse, decode_request};

/// Longest request line accepted; a longer line is answered with `error` and
/// the connection is closed.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// Newline-delimited JSON transport in front of the command loop.
///
/// A connection may carry any number of requests; responses are written in
/// request order. Every connection is served on its own task but all of them
/// feed the same single-consumer loop.
pub struct DictionaryServer {
    listener: TcpListener,
    handle: DictionaryHandle,
}

impl DictionaryServer {
    pub async fn bind(addr: &str, handle: DictionaryHandle) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self::from_listener(listener, handle))
    }

    pub fn from_listener(listener: TcpListener, handle: DictionaryHandle) -> Self {
        Self { listener, handle }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn serve_with_shutdown(self, shutdown: impl Future<Output = ()>) -> io::Result<()> {
        let addr = self.listener.local_addr()?;
        info!(%addr, "dictionary transport listening");

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let handle = self.handle.clone();
                        tokio::spawn(async move {
                            if let Err(err) = serve_connection(stream, handle).await {
                                debug!(%peer, "dictionary connection failed: {err}");
                            }
                        });
                    }
                    Err(err) => warn!("dictionary accept failed: {err}"),
                },
            }
        }

        info!(%addr, "dictionary transport stopped");
        Ok(())
    }
}

async fn serve_connection(stream: TcpStream, handle: DictionaryHandle) -> io::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        let read = (&mut reader)
            .take(MAX_LINE_BYTES as u64 + 1)
            .read_until(b'\n', &mut buf)
            .await?;
        if read == 0 {
            break;
        }
        if buf.len() > MAX_LINE_BYTES && buf.last() != Some(&b'\n') {
            let msg = format!("request exceeds {MAX_LINE_BYTES} bytes");
            write_response(&mut writer, &DictResponse::error(None, msg)).await?;
            writer.shutdown().await?;
            break;
        }
        let Ok(line) = std::str::from_utf8(&buf) else {
            let response = DictResponse::error(None, "request is not valid UTF-8");
            write_response(&mut writer, &response).await?;
            continue;
        };
        if line.trim().is_empty() {
            continue;
        }
        let response = match decode_request(line) {
            Ok(request) => match handle.call(request).await {
                Ok(response) => response,
                // Loop is gone (SHUTDOWN); nothing else can be served here.
                Err(_) => break,
            },
            Err(response) => response,
        };
        write_response(&mut writer, &response).await?;
    }
    Ok(())
}

async fn write_response(
    writer: &mut (impl AsyncWriteExt + Unpin),
    response: &DictResponse,
) -> io::Result<()> {
    let mut bytes = serde_json::to_vec(response).map_err(io::Error::other)?;
    bytes.push(b'\n');
    writer.write_all(&bytes).await
}
