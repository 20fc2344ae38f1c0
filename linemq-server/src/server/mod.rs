//! Line-oriented TCP transport.
//!
//! The engine's contract with any transport is "accept a line of text,
//! return a line of text"; this module is the one delivery of it the server
//! ships: one task per connection, responses written in request order. The
//! health endpoint answers the sentinel's `PING` with `PONG`.

use crate::core::CommandEngine;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

/// Accept client connections forever, one session task each.
pub async fn serve_clients(listener: TcpListener, engine: Arc<CommandEngine>) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                debug!(%addr, "client connected");
                let engine = Arc::clone(&engine);
                tokio::spawn(async move {
                    if let Err(e) = client_session(stream, engine).await {
                        debug!(%addr, error = %e, "client session closed with error");
                    }
                    debug!(%addr, "client disconnected");
                });
            }
            Err(e) => warn!(error = %e, "failed to accept client connection"),
        }
    }
}

/// One client session: command line in, response line out, in order.
///
/// Protocol and state errors come back as `ERROR:` lines and keep the
/// session open; a log I/O failure means the command cannot be safely
/// acknowledged, so the session is closed without a response.
async fn client_session(stream: TcpStream, engine: Arc<CommandEngine>) -> std::io::Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        match engine.apply(&line, true).await {
            Ok(response) => {
                write_half
                    .write_all(format!("{}\n", response).as_bytes())
                    .await?;
            }
            Err(e) => {
                error!(error = %e, "durability failure, dropping client connection");
                break;
            }
        }
    }
    Ok(())
}

/// Health endpoint: a bare `PING` line is answered with a bare `PONG` line.
/// Anything else is ignored.
pub async fn serve_health(listener: TcpListener) {
    info!(addr = ?listener.local_addr().ok(), "health endpoint listening");
    loop {
        match listener.accept().await {
            Ok((stream, _addr)) => {
                tokio::spawn(async move {
                    let _ = health_session(stream).await;
                });
            }
            Err(e) => warn!(error = %e, "failed to accept health connection"),
        }
    }
}

async fn health_session(stream: TcpStream) -> std::io::Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().eq_ignore_ascii_case("PING") {
            write_half.write_all(b"PONG\n").await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn start_server() -> (tempfile::TempDir, std::net::SocketAddr) {
        let dir = tempfile::tempdir().unwrap();
        let engine = Arc::new(
            CommandEngine::open(dir.path().join("commands.log"))
                .await
                .unwrap(),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve_clients(listener, engine));
        (dir, addr)
    }

    async fn roundtrip(
        lines: &mut tokio::io::Lines<BufReader<tokio::net::tcp::OwnedReadHalf>>,
        write_half: &mut tokio::net::tcp::OwnedWriteHalf,
        command: &str,
    ) -> String {
        write_half
            .write_all(format!("{}\n", command).as_bytes())
            .await
            .unwrap();
        lines.next_line().await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_client_session_scenario() {
        let (_dir, addr) = start_server().await;
        let stream = TcpStream::connect(addr).await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();

        assert_eq!(
            roundtrip(&mut lines, &mut write_half, "CREATE a").await,
            "OK: queue created"
        );
        assert_eq!(
            roundtrip(&mut lines, &mut write_half, "PUBLISH a hello world").await,
            "OK: message published"
        );
        assert_eq!(
            roundtrip(&mut lines, &mut write_half, "CONSUME a").await,
            "MESSAGE: hello world"
        );
        assert_eq!(
            roundtrip(&mut lines, &mut write_half, "CONSUME a").await,
            "NO_MESSAGE"
        );
        assert_eq!(
            roundtrip(&mut lines, &mut write_half, "DROP a").await,
            "OK: queue deleted"
        );
        assert_eq!(
            roundtrip(&mut lines, &mut write_half, "CONSUME a").await,
            "ERROR: queue does not exist"
        );
    }

    #[tokio::test]
    async fn test_protocol_errors_keep_session_open() {
        let (_dir, addr) = start_server().await;
        let stream = TcpStream::connect(addr).await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();

        assert_eq!(
            roundtrip(&mut lines, &mut write_half, "NONSENSE a").await,
            "ERROR: unknown command"
        );
        assert_eq!(
            roundtrip(&mut lines, &mut write_half, "CREATE").await,
            "ERROR: invalid command format"
        );
        assert_eq!(
            roundtrip(&mut lines, &mut write_half, "CREATE a").await,
            "OK: queue created"
        );
    }

    #[tokio::test]
    async fn test_sessions_are_independent() {
        let (_dir, addr) = start_server().await;

        let first = TcpStream::connect(addr).await.unwrap();
        let (r1, mut w1) = first.into_split();
        let mut l1 = BufReader::new(r1).lines();
        assert_eq!(
            roundtrip(&mut l1, &mut w1, "PUBLISH shared from-first").await,
            "OK: message published"
        );
        drop(w1);

        // A second connection sees state from the first.
        let second = TcpStream::connect(addr).await.unwrap();
        let (r2, mut w2) = second.into_split();
        let mut l2 = BufReader::new(r2).lines();
        assert_eq!(
            roundtrip(&mut l2, &mut w2, "CONSUME shared").await,
            "MESSAGE: from-first"
        );
    }

    #[tokio::test]
    async fn test_health_endpoint_ignores_noise() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve_health(listener));

        let stream = TcpStream::connect(addr).await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();

        write_half.write_all(b"HELLO\nping\n").await.unwrap();
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("PONG"));
    }
}
