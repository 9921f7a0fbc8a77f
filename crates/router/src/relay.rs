//! 백엔드 연결과 양방향 릴레이

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::RouterError;

/// 릴레이 종료 사유
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayEnd {
    /// 한쪽이 연결을 닫음
    Closed,
    /// 라우터 종료로 취소됨
    Cancelled,
}

/// 릴레이 통계
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayStats {
    /// 클라이언트 → 백엔드 바이트 (스니핑된 접두어 포함)
    pub client_to_backend: u64,
    /// 백엔드 → 클라이언트 바이트
    pub backend_to_client: u64,
    /// 종료 사유
    pub end: RelayEnd,
}

/// 제한 시간 안에 백엔드에 연결합니다.
pub async fn dial_backend(addr: SocketAddr, timeout: Duration) -> Result<TcpStream, RouterError> {
    let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| RouterError::Dial {
            addr: addr.to_string(),
            reason: format!("connect timed out after {}s", timeout.as_secs()),
        })?
        .map_err(|e| RouterError::Dial {
            addr: addr.to_string(),
            reason: e.to_string(),
        })?;
    // 대화형 프로토콜(DB, ssh) 지연 방지
    let _ = stream.set_nodelay(true);
    Ok(stream)
}

/// 한 방향 복사 버퍼 크기
const COPY_BUF_SIZE: usize = 16 * 1024;

/// 스니핑된 접두어를 백엔드에 먼저 쓰고, 어느 한쪽이 닫히거나 실패할 때까지 양방향 복사합니다.
///
/// 한 방향이 끝나면 반대 방향도 즉시 중단합니다. `cancel`이 취소되어도 즉시 반환하며
/// 두 소켓은 호출자가 드롭할 때 닫힙니다.
pub async fn relay<C, B>(
    client: &mut C,
    backend: &mut B,
    prefix: &[u8],
    cancel: &CancellationToken,
) -> Result<RelayStats, RouterError>
where
    C: AsyncRead + AsyncWrite + Unpin + ?Sized,
    B: AsyncRead + AsyncWrite + Unpin + ?Sized,
{
    if !prefix.is_empty() {
        backend
            .write_all(prefix)
            .await
            .map_err(|e| RouterError::Relay(format!("failed to replay sniffed bytes: {e}")))?;
    }

    let (mut client_rd, mut client_wr) = tokio::io::split(client);
    let (mut backend_rd, mut backend_wr) = tokio::io::split(backend);
    let mut to_backend = prefix.len() as u64;
    let mut to_client = 0u64;

    let (end, result) = tokio::select! {
        r = pump(&mut client_rd, &mut backend_wr, &mut to_backend) => (RelayEnd::Closed, r),
        r = pump(&mut backend_rd, &mut client_wr, &mut to_client) => (RelayEnd::Closed, r),
        _ = cancel.cancelled() => (RelayEnd::Cancelled, Ok(())),
    };

    let stats = RelayStats {
        client_to_backend: to_backend,
        backend_to_client: to_client,
        end,
    };
    match result {
        Ok(()) => Ok(stats),
        Err(e) if is_peer_reset(&e) => {
            debug!(error = %e, "relay peer reset");
            Ok(stats)
        }
        Err(e) => Err(RouterError::Relay(e.to_string())),
    }
}

/// 상대가 연결을 끊어서 생긴 오류인지 판단합니다.
fn is_peer_reset(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted
    )
}

/// `reader`가 EOF에 닿을 때까지 `writer`로 복사하고 보낸 바이트를 `sent`에 누적합니다.
async fn pump<R, W>(reader: &mut R, writer: &mut W, sent: &mut u64) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; COPY_BUF_SIZE];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        writer.write_all(&buf[..n]).await?;
        writer.flush().await?;
        *sent += n as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn prefix_is_replayed_before_stream() {
        let (mut client, mut client_peer) = tokio::io::duplex(1024);
        let (mut backend, mut backend_peer) = tokio::io::duplex(1024);
        let cancel = CancellationToken::new();

        let relay_task = tokio::spawn(async move {
            relay(&mut client_peer, &mut backend_peer, b"HEAD", &cancel).await
        });

        client.write_all(b"-tail").await.unwrap();
        let mut got = [0u8; 9];
        backend.read_exact(&mut got).await.unwrap();
        assert_eq!(&got, b"HEAD-tail");

        backend.write_all(b"pong").await.unwrap();
        let mut reply = [0u8; 4];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(&reply, b"pong");

        drop(client);
        drop(backend);
        let stats = relay_task.await.unwrap().unwrap();
        assert_eq!(stats.client_to_backend, 9);
        assert_eq!(stats.backend_to_client, 4);
        assert_eq!(stats.end, RelayEnd::Closed);
    }

    #[tokio::test]
    async fn cancel_stops_relay() {
        let (_client, mut client_peer) = tokio::io::duplex(64);
        let (_backend, mut backend_peer) = tokio::io::duplex(64);
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let relay_task = tokio::spawn(async move {
            relay(&mut client_peer, &mut backend_peer, b"", &token).await
        });
        cancel.cancel();

        let stats = relay_task.await.unwrap().unwrap();
        assert_eq!(stats.end, RelayEnd::Cancelled);
    }

    #[tokio::test]
    async fn client_close_ends_relay_while_backend_idle() {
        // Given: 백엔드는 열린 채 아무것도 보내지 않음
        let (client, mut client_peer) = tokio::io::duplex(1024);
        let (mut backend, mut backend_peer) = tokio::io::duplex(1024);
        let cancel = CancellationToken::new();

        let relay_task = tokio::spawn(async move {
            relay(&mut client_peer, &mut backend_peer, b"GET", &cancel).await
        });

        // When: 클라이언트만 닫힘
        drop(client);

        // Then: 릴레이가 끝나고 백엔드 쪽도 닫힘
        let stats = tokio::time::timeout(Duration::from_secs(2), relay_task)
            .await
            .expect("relay should end when the client closes")
            .unwrap()
            .unwrap();
        assert_eq!(stats.end, RelayEnd::Closed);
        assert_eq!(stats.client_to_backend, 3);

        let mut rest = Vec::new();
        backend.read_to_end(&mut rest).await.unwrap();
        assert_eq!(rest, b"GET");
    }

    #[tokio::test]
    async fn backend_close_ends_relay_and_keeps_counts() {
        let (mut client, mut client_peer) = tokio::io::duplex(1024);
        let (mut backend, mut backend_peer) = tokio::io::duplex(1024);
        let cancel = CancellationToken::new();

        let relay_task = tokio::spawn(async move {
            relay(&mut client_peer, &mut backend_peer, b"", &cancel).await
        });

        backend.write_all(b"hello").await.unwrap();
        let mut got = [0u8; 5];
        client.read_exact(&mut got).await.unwrap();
        drop(backend);

        let stats = tokio::time::timeout(Duration::from_secs(2), relay_task)
            .await
            .expect("relay should end when the backend closes")
            .unwrap()
            .unwrap();
        assert_eq!(stats.backend_to_client, 5);
        assert_eq!(stats.client_to_backend, 0);
    }

    #[test]
    fn reset_kinds_are_peer_closes() {
        assert!(is_peer_reset(&io::Error::from(io::ErrorKind::BrokenPipe)));
        assert!(is_peer_reset(&io::Error::from(io::ErrorKind::ConnectionReset)));
        assert!(is_peer_reset(&io::Error::from(io::ErrorKind::ConnectionAborted)));
        assert!(!is_peer_reset(&io::Error::other("connection reset by peer")));
    }

    #[tokio::test]
    async fn dial_refused_is_dial_error() {
        // 바인드 후 즉시 닫아 사용되지 않는 포트를 얻음
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = dial_backend(addr, Duration::from_secs(2)).await.unwrap_err();
        assert!(matches!(err, RouterError::Dial { .. }));
    }

    #[tokio::test]
    async fn dial_connects() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accept = tokio::spawn(async move { listener.accept().await.map(|_| ()) });

        dial_backend(addr, Duration::from_secs(2)).await.unwrap();
        accept.await.unwrap().unwrap();
    }
}
