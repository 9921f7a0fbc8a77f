//! 라우팅 키 스니핑 -- HTTP Host 헤더, TLS SNI
//!
//! 연결의 첫 바이트들을 읽어 라우팅 키(호스트명)를 추출합니다. 읽은 바이트는
//! 버리지 않고 그대로 백엔드에 먼저 전달해야 하므로 [`Sniffed::buffered`]로 반환합니다.
//!
//! 프로토콜 판별:
//! - 첫 바이트 `0x16` (TLS handshake record) → ClientHello의 `server_name` 확장
//! - 첫 바이트 `A`..`Z` → HTTP/1.x 요청, `\r\n\r\n` 또는 `\n\n`까지 읽고 `Host` 헤더
//! - 그 외 → 거부
//!
//! 파싱 함수([`scan_http_host`], [`scan_tls_sni`])는 I/O 없이 버퍼만 검사하므로
//! 퍼저와 벤치마크에서 직접 사용할 수 있습니다.

use std::fmt;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt};

/// TLS handshake record content type
const TLS_HANDSHAKE: u8 = 0x16;
/// ClientHello handshake type
const CLIENT_HELLO: u8 = 0x01;
/// server_name 확장 타입
const EXT_SERVER_NAME: u16 = 0x0000;
/// host_name SNI 항목 타입
const SNI_HOST_NAME: u8 = 0x00;
/// TLS 레코드 헤더 길이
const TLS_RECORD_HEADER_LEN: usize = 5;
/// 한 번에 읽는 최대 바이트 수
const READ_CHUNK: usize = 1024;

/// 스니핑 에러
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SniffError {
    /// 읽기 제한 시간 초과
    #[error("sniff deadline of {0:?} exceeded")]
    Timeout(Duration),

    /// 라우팅 키를 찾기 전에 연결이 닫힘
    #[error("connection closed before routing key was found")]
    Closed,

    /// 바이트 예산 초과
    #[error("routing key not found within {limit} bytes")]
    TooLarge {
        /// 바이트 예산
        limit: usize,
    },

    /// HTTP도 TLS도 아님
    #[error("unrecognized protocol (first byte 0x{0:02x})")]
    Unrecognized(u8),

    /// HTTP 요청 형식 오류
    #[error("malformed http request: {0}")]
    MalformedHttp(&'static str),

    /// Host 헤더가 여러 개
    #[error("multiple host headers")]
    MultipleHosts,

    /// 호스트명 없음
    #[error("no host name in request")]
    NoHost,

    /// TLS ClientHello 형식 오류
    #[error("malformed tls client hello: {0}")]
    MalformedTls(&'static str),

    /// 소켓 읽기 에러
    #[error("read error: {0}")]
    Io(String),
}

impl SniffError {
    /// 메트릭 레이블용 짧은 이름
    pub fn label(&self) -> &'static str {
        match self {
            Self::Timeout(_) => "sniff_timeout",
            Self::Closed => "sniff_closed",
            Self::TooLarge { .. } => "sniff_too_large",
            Self::Unrecognized(_) => "unrecognized_protocol",
            Self::MalformedHttp(_) | Self::MultipleHosts => "malformed_http",
            Self::NoHost => "no_host",
            Self::MalformedTls(_) => "malformed_tls",
            Self::Io(_) => "sniff_io",
        }
    }
}

/// 라우팅 키를 운반한 프로토콜
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// 평문 HTTP/1.x
    Http,
    /// TLS (SNI)
    Tls,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http => f.write_str("http"),
            Self::Tls => f.write_str("tls"),
        }
    }
}

/// 버퍼 검사 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scan {
    /// 판단하려면 더 읽어야 함
    Incomplete,
    /// 라우팅 키 발견
    Found(String),
    /// 라우팅 불가
    Rejected(SniffError),
}

/// 스니핑 결과
#[derive(Debug, Clone)]
pub struct Sniffed {
    /// 라우팅 키 (호스트명, HTTP는 포트를 포함할 수 있음)
    pub host: String,
    /// 프로토콜
    pub protocol: Protocol,
    /// 스니핑 중 읽은 바이트 (백엔드에 먼저 전달)
    pub buffered: BytesMut,
}

/// 스니핑 제한
#[derive(Debug, Clone, Copy)]
pub struct SniffLimits {
    /// 읽기 제한 시간 (연결 단위)
    pub timeout: Duration,
    /// 최대 읽기 바이트
    pub max_bytes: usize,
}

impl Default for SniffLimits {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            max_bytes: 4096,
        }
    }
}

/// 첫 바이트로 프로토콜을 판별합니다.
pub fn detect_protocol(first: u8) -> Option<Protocol> {
    match first {
        TLS_HANDSHAKE => Some(Protocol::Tls),
        b'A'..=b'Z' => Some(Protocol::Http),
        _ => None,
    }
}

/// 버퍼를 검사해 라우팅 키를 찾습니다.
pub fn scan(buf: &[u8]) -> (Option<Protocol>, Scan) {
    let Some(&first) = buf.first() else {
        return (None, Scan::Incomplete);
    };
    match detect_protocol(first) {
        Some(Protocol::Tls) => (Some(Protocol::Tls), scan_tls_sni(buf)),
        Some(Protocol::Http) => (Some(Protocol::Http), scan_http_host(buf)),
        None => (None, Scan::Rejected(SniffError::Unrecognized(first))),
    }
}

/// HTTP/1.x 요청 헤더에서 Host 값을 찾습니다.
///
/// 헤더 끝(`\r\n\r\n` 또는 `\n\n`)이 나타나기 전에는 [`Scan::Incomplete`]입니다.
/// absolute-form 요청 대상(`GET http://host/path HTTP/1.1`)은 Host 헤더보다 우선합니다.
pub fn scan_http_host(buf: &[u8]) -> Scan {
    match buf.first() {
        None => return Scan::Incomplete,
        Some(b'A'..=b'Z') => {}
        Some(&other) => return Scan::Rejected(SniffError::Unrecognized(other)),
    }

    let Some(end) = find_header_end(buf) else {
        return Scan::Incomplete;
    };
    // 헤더 값 외의 비 UTF-8 바이트는 키 추출에 영향이 없음
    let head = String::from_utf8_lossy(&buf[..end]);

    let mut lines = head.split('\n').map(|line| line.strip_suffix('\r').unwrap_or(line));

    let request_line = lines.next().unwrap_or_default();
    let mut parts = request_line.split(' ');
    let (Some(method), Some(target), Some(_version), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Scan::Rejected(SniffError::MalformedHttp("bad request line"));
    };
    if method.is_empty() || !method.bytes().all(|b| b.is_ascii_uppercase()) {
        return Scan::Rejected(SniffError::MalformedHttp("bad method"));
    }

    let mut host_header: Option<&str> = None;
    for line in lines {
        if line.is_empty() || line.starts_with([' ', '\t']) {
            continue;
        }
        // 콜론 없는 줄은 건너뜀
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        if name.trim_end().eq_ignore_ascii_case("host") {
            if host_header.is_some() {
                return Scan::Rejected(SniffError::MultipleHosts);
            }
            host_header = Some(value.trim());
        }
    }

    let host = absolute_form_authority(target).or(host_header).unwrap_or_default();
    if host.is_empty() {
        Scan::Rejected(SniffError::NoHost)
    } else {
        Scan::Found(host.to_owned())
    }
}

/// 헤더 끝 위치(종료 개행 제외)를 찾습니다.
fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(2).enumerate().find_map(|(i, w)| match w {
        [b'\n', b'\n'] => Some(i),
        [b'\n', b'\r'] if buf.get(i + 2) == Some(&b'\n') => Some(i),
        _ => None,
    })
}

/// `http://authority/path` 형식이면 authority를 반환합니다.
fn absolute_form_authority(target: &str) -> Option<&str> {
    let rest = target
        .strip_prefix("http://")
        .or_else(|| target.strip_prefix("https://"))?;
    let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
    // userinfo 제거
    let authority = authority.rsplit('@').next().unwrap_or_default();
    (!authority.is_empty()).then_some(authority)
}

/// TLS ClientHello에서 SNI host_name을 찾습니다.
///
/// ClientHello는 첫 레코드 안에 완전히 들어 있어야 합니다.
pub fn scan_tls_sni(buf: &[u8]) -> Scan {
    match buf.first() {
        None => return Scan::Incomplete,
        Some(&TLS_HANDSHAKE) => {}
        Some(&other) => return Scan::Rejected(SniffError::Unrecognized(other)),
    }
    if buf.len() < TLS_RECORD_HEADER_LEN {
        return Scan::Incomplete;
    }
    if buf[1] != 0x03 {
        return Scan::Rejected(SniffError::MalformedTls("unsupported record version"));
    }
    let record_len = u16::from_be_bytes([buf[3], buf[4]]) as usize;
    let record_end = TLS_RECORD_HEADER_LEN + record_len;
    if buf.len() < record_end {
        return Scan::Incomplete;
    }

    match parse_client_hello(&buf[TLS_RECORD_HEADER_LEN..record_end]) {
        Ok(Some(host)) => Scan::Found(host),
        Ok(None) => Scan::Rejected(SniffError::NoHost),
        Err(reason) => Scan::Rejected(SniffError::MalformedTls(reason)),
    }
}

/// 바이트 커서
struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn take(&mut self, n: usize, what: &'static str) -> Result<&'a [u8], &'static str> {
        if self.buf.len() < n {
            return Err(what);
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    fn u8(&mut self, what: &'static str) -> Result<u8, &'static str> {
        Ok(self.take(1, what)?[0])
    }

    fn u16(&mut self, what: &'static str) -> Result<u16, &'static str> {
        let b = self.take(2, what)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u24(&mut self, what: &'static str) -> Result<usize, &'static str> {
        let b = self.take(3, what)?;
        Ok(((b[0] as usize) << 16) | ((b[1] as usize) << 8) | b[2] as usize)
    }

    fn vec8(&mut self, what: &'static str) -> Result<&'a [u8], &'static str> {
        let len = self.u8(what)? as usize;
        self.take(len, what)
    }

    fn vec16(&mut self, what: &'static str) -> Result<&'a [u8], &'static str> {
        let len = self.u16(what)? as usize;
        self.take(len, what)
    }

    fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

fn parse_client_hello(record: &[u8]) -> Result<Option<String>, &'static str> {
    let mut r = Reader::new(record);
    if r.u8("handshake type")? != CLIENT_HELLO {
        return Err("not a client hello");
    }
    let hello_len = r.u24("handshake length")?;
    let mut r = Reader::new(r.take(hello_len, "fragmented client hello")?);

    r.take(2, "client version")?;
    r.take(32, "random")?;
    r.vec8("session id")?;
    r.vec16("cipher suites")?;
    r.vec8("compression methods")?;
    if r.is_empty() {
        // 확장 없는 ClientHello
        return Ok(None);
    }

    let mut extensions = Reader::new(r.vec16("extensions")?);
    while !extensions.is_empty() {
        let ext_type = extensions.u16("extension type")?;
        let data = extensions.vec16("extension data")?;
        if ext_type != EXT_SERVER_NAME {
            continue;
        }

        let mut ext = Reader::new(data);
        let mut names = Reader::new(ext.vec16("server name list")?);
        while !names.is_empty() {
            let name_type = names.u8("server name type")?;
            let name = names.vec16("server name")?;
            if name_type != SNI_HOST_NAME {
                continue;
            }
            let host = std::str::from_utf8(name).map_err(|_| "non utf-8 server name")?;
            if host.is_empty() {
                return Ok(None);
            }
            return Ok(Some(host.to_owned()));
        }
        return Ok(None);
    }
    Ok(None)
}

/// 스트림에서 라우팅 키를 스니핑합니다.
///
/// `limits.timeout`은 스니핑 전체에 대한 제한입니다. 예산 안에서 키를 찾지 못하거나
/// 연결이 닫히면 에러를 반환하며, 이때 읽은 바이트는 버려집니다.
pub async fn sniff_routing_key<S>(stream: &mut S, limits: SniffLimits) -> Result<Sniffed, SniffError>
where
    S: AsyncRead + Unpin,
{
    tokio::time::timeout(limits.timeout, read_until_key(stream, limits.max_bytes))
        .await
        .map_err(|_| SniffError::Timeout(limits.timeout))?
}

async fn read_until_key<S>(stream: &mut S, max_bytes: usize) -> Result<Sniffed, SniffError>
where
    S: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(max_bytes.min(READ_CHUNK));
    loop {
        let remaining = max_bytes.saturating_sub(buf.len());
        if remaining == 0 {
            return Err(SniffError::TooLarge { limit: max_bytes });
        }

        let mut chunk = [0u8; READ_CHUNK];
        let want = remaining.min(READ_CHUNK);
        let n = stream
            .read(&mut chunk[..want])
            .await
            .map_err(|e| SniffError::Io(e.to_string()))?;
        if n == 0 {
            return Err(SniffError::Closed);
        }
        buf.extend_from_slice(&chunk[..n]);

        match scan(&buf) {
            (_, Scan::Incomplete) => continue,
            (Some(protocol), Scan::Found(host)) => {
                return Ok(Sniffed {
                    host,
                    protocol,
                    buffered: buf,
                });
            }
            (None, Scan::Found(_)) => return Err(SniffError::NoHost),
            (_, Scan::Rejected(e)) => return Err(e),
        }
    }
}
