//! Raw persistent HTTP/1.1 connection over plain TCP or rustls.
//!
//! # Design
//! A `Connection` is one socket behind a `BufReader`. Requests are written
//! through the reader's inner stream and responses are parsed from the
//! buffered side, so bytes read ahead of one response stay available for
//! the next. There is no pipelining and no reconnection: a failed write or
//! read leaves the connection unusable and the caller opens a new one.
//!
//! Bodies are framed by `Transfer-Encoding: chunked`, then `Content-Length`,
//! then connection close, in that order of precedence.

use std::fmt;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, ClientConnection, DigitallySignedStruct, RootCertStore, SignatureScheme, StreamOwned};
use url::{Host, Url};

use crate::error::HttpError;
use crate::http::{HttpMethod, HttpRequest, HttpResponse};

enum Stream {
    Plain(TcpStream),
    Tls(Box<StreamOwned<ClientConnection, TcpStream>>),
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Stream::Plain(stream) => stream.read(buf),
            Stream::Tls(stream) => stream.read(buf),
        }
    }
}

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Stream::Plain(stream) => stream.write(buf),
            Stream::Tls(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Stream::Plain(stream) => stream.flush(),
            Stream::Tls(stream) => stream.flush(),
        }
    }
}

/// One open HTTP/1.1 connection owned by a single caller.
pub struct Connection {
    reader: BufReader<Stream>,
    peer: String,
}

impl Connection {
    pub(crate) fn open(address: &str, timeout_secs: u64, skip_tls_verify: bool) -> Result<Self, HttpError> {
        let url = Url::parse(address).map_err(|source| HttpError::InvalidUrl {
            address: address.to_string(),
            source,
        })?;
        let secure = match url.scheme() {
            "https" => true,
            "http" => false,
            other => return Err(HttpError::UnsupportedScheme(other.to_string())),
        };
        let host = match url.host() {
            Some(Host::Domain(domain)) => domain.to_string(),
            Some(Host::Ipv4(ip)) => ip.to_string(),
            Some(Host::Ipv6(ip)) => ip.to_string(),
            None => return Err(HttpError::UnsupportedScheme(format!("{} without host", url.scheme()))),
        };
        let port = url.port_or_known_default().unwrap_or(if secure { 443 } else { 80 });
        let peer = format!("{host}:{port}");
        let timeout = Duration::from_secs(timeout_secs);

        let tcp = dial(&host, port, timeout)?;
        let connect_error = |source: io::Error| HttpError::Connect {
            address: peer.clone(),
            source,
        };
        tcp.set_read_timeout(Some(timeout)).map_err(connect_error)?;
        tcp.set_write_timeout(Some(timeout)).map_err(connect_error)?;

        let stream = if secure {
            Stream::Tls(Box::new(tls_stream(&host, tcp, skip_tls_verify)?))
        } else {
            Stream::Plain(tcp)
        };
        tracing::debug!(peer = %peer, tls = secure, skip_tls_verify, "opened persistent connection");

        Ok(Self {
            reader: BufReader::new(stream),
            peer,
        })
    }

    /// `host:port` this connection was dialed to.
    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn is_tls(&self) -> bool {
        matches!(self.reader.get_ref(), Stream::Tls(_))
    }

    /// Write `request` in full and flush it.
    pub fn write_request(&mut self, request: &HttpRequest) -> Result<(), HttpError> {
        let stream = self.reader.get_mut();
        stream
            .write_all(&request.to_wire())
            .and_then(|()| stream.flush())
            .map_err(|source| HttpError::ConnectionIo {
                op: "write_request",
                source,
            })
    }

    /// Block until the response to a request sent with `method` arrives,
    /// then buffer it whole. Interim 1xx responses are skipped.
    pub fn read_response(&mut self, method: HttpMethod) -> Result<HttpResponse, HttpError> {
        loop {
            let (status, reason) = self.read_status_line()?;
            let headers = self.read_headers()?;
            if (100..200).contains(&status) && status != 101 {
                continue;
            }

            let body = if status == 204 || status == 304 || (100..200).contains(&status) {
                Vec::new()
            } else if is_chunked(&headers) {
                self.read_chunked()?
            } else if let Some(length) = content_length(&headers)? {
                let mut body = Vec::new();
                self.read_exact_into(&mut body, length)?;
                body
            } else {
                let mut body = Vec::new();
                self.reader.read_to_end(&mut body).map_err(read_error)?;
                body
            };

            tracing::debug!(peer = %self.peer, %method, status, bytes = body.len(), "read response");
            return Ok(HttpResponse {
                status,
                reason,
                headers,
                body,
            });
        }
    }

    fn read_line(&mut self) -> Result<String, HttpError> {
        let mut line = String::new();
        let read = self.reader.read_line(&mut line).map_err(read_error)?;
        if read == 0 {
            return Err(read_error(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed before the response was complete",
            )));
        }
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }

    fn read_status_line(&mut self) -> Result<(u16, String), HttpError> {
        let line = self.read_line()?;
        let mut parts = line.splitn(3, ' ');
        let version = parts.next().unwrap_or_default();
        if !version.starts_with("HTTP/1.") {
            return Err(HttpError::MalformedResponse(format!("bad status line `{line}`")));
        }
        let status = parts
            .next()
            .and_then(|code| code.parse::<u16>().ok())
            .ok_or_else(|| HttpError::MalformedResponse(format!("bad status code in `{line}`")))?;
        let reason = parts.next().unwrap_or_default().to_string();
        Ok((status, reason))
    }

    fn read_headers(&mut self) -> Result<Vec<(String, String)>, HttpError> {
        let mut headers = Vec::new();
        loop {
            let line = self.read_line()?;
            if line.is_empty() {
                return Ok(headers);
            }
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| HttpError::MalformedResponse(format!("bad header line `{line}`")))?;
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }
    }

    /// Append exactly `len` bytes to `body`. Memory grows with what the peer
    /// actually sends, not with the length it announced.
    fn read_exact_into(&mut self, body: &mut Vec<u8>, len: usize) -> Result<(), HttpError> {
        let read = (&mut self.reader)
            .take(len as u64)
            .read_to_end(body)
            .map_err(read_error)?;
        if read < len {
            return Err(read_error(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("body ended after {read} of {len} bytes"),
            )));
        }
        Ok(())
    }

    fn read_chunked(&mut self) -> Result<Vec<u8>, HttpError> {
        let mut body = Vec::new();
        loop {
            let line = self.read_line()?;
            let size = line.split(';').next().unwrap_or_default().trim();
            let size = usize::from_str_radix(size, 16)
                .map_err(|_| HttpError::MalformedResponse(format!("bad chunk size `{line}`")))?;
            if size == 0 {
                // trailers
                while !self.read_line()?.is_empty() {}
                return Ok(body);
            }
            body.len()
                .checked_add(size)
                .ok_or_else(|| HttpError::MalformedResponse(format!("chunk size `{line}` overflows the body")))?;
            self.read_exact_into(&mut body, size)?;
            if !self.read_line()?.is_empty() {
                return Err(HttpError::MalformedResponse("chunk not followed by CRLF".to_string()));
            }
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("peer", &self.peer)
            .field("tls", &self.is_tls())
            .finish()
    }
}

fn read_error(source: io::Error) -> HttpError {
    HttpError::ConnectionIo {
        op: "read_response",
        source,
    }
}

fn is_chunked(headers: &[(String, String)]) -> bool {
    headers.iter().any(|(name, value)| {
        name.eq_ignore_ascii_case("transfer-encoding") && value.to_ascii_lowercase().contains("chunked")
    })
}

fn content_length(headers: &[(String, String)]) -> Result<Option<usize>, HttpError> {
    headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
        .map(|(_, value)| {
            value
                .parse::<usize>()
                .map_err(|_| HttpError::MalformedResponse(format!("bad content-length `{value}`")))
        })
        .transpose()
}

fn dial(host: &str, port: u16, timeout: Duration) -> Result<TcpStream, HttpError> {
    let address = format!("{host}:{port}");
    let connect_error = |source: io::Error| HttpError::Connect {
        address: address.clone(),
        source,
    };

    let mut last_error = io::Error::new(io::ErrorKind::NotFound, "host resolved to no addresses");
    for addr in (host, port).to_socket_addrs().map_err(connect_error)? {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) => last_error = e,
        }
    }
    Err(connect_error(last_error))
}

fn tls_stream(
    host: &str,
    mut tcp: TcpStream,
    skip_verify: bool,
) -> Result<StreamOwned<ClientConnection, TcpStream>, HttpError> {
    let tls_error = |reason: String| HttpError::Tls {
        host: host.to_string(),
        reason,
    };

    let config = tls_config(skip_verify).map_err(|e| tls_error(e.to_string()))?;
    let server_name = ServerName::try_from(host.to_string()).map_err(|e| tls_error(e.to_string()))?;
    let mut session =
        ClientConnection::new(Arc::new(config), server_name).map_err(|e| tls_error(e.to_string()))?;
    while session.is_handshaking() {
        session.complete_io(&mut tcp).map_err(|e| tls_error(e.to_string()))?;
    }
    Ok(StreamOwned::new(session, tcp))
}

fn tls_config(skip_verify: bool) -> Result<ClientConfig, rustls::Error> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let builder = ClientConfig::builder_with_provider(provider.clone()).with_safe_default_protocol_versions()?;
    let config = if skip_verify {
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoVerifier(provider)))
            .with_no_client_auth()
    } else {
        let roots = RootCertStore {
            roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
        };
        builder.with_root_certificates(roots).with_no_client_auth()
    };
    Ok(config)
}

/// Accepts any server certificate. Only installed when the caller asks to
/// skip verification.
#[derive(Debug)]
struct NoVerifier(Arc<CryptoProvider>);

impl ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::net::TcpListener;
    use std::thread;

    use rustls::pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer};
    use rustls::{ServerConfig, ServerConnection};

    use super::*;
    use crate::session::HttpSession;
    use crate::types::{Decoded, ReturnShape};

    /// Serve each canned reply in turn on one accepted connection, reading a
    /// request head (and any `Content-Length` body) before each reply.
    fn serve(replies: Vec<&'static str>) -> (String, thread::JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut writer = stream;
            let mut seen = Vec::new();
            for reply in replies {
                let mut head = String::new();
                let mut length = 0;
                loop {
                    let mut line = String::new();
                    reader.read_line(&mut line).unwrap();
                    if let Some(value) = line.to_ascii_lowercase().strip_prefix("content-length:") {
                        length = value.trim().parse().unwrap();
                    }
                    head.push_str(&line);
                    if line == "\r\n" {
                        break;
                    }
                }
                let mut body = vec![0; length];
                reader.read_exact(&mut body).unwrap();
                head.push_str(&String::from_utf8(body).unwrap());
                seen.push(head);
                writer.write_all(reply.as_bytes()).unwrap();
            }
            seen
        });
        (format!("http://{addr}"), handle)
    }

    #[test]
    fn two_cycles_on_one_connection() {
        let (base, server) = serve(vec![
            "HTTP/1.1 200 OK\r\nContent-Length: 7\r\n\r\n{\"a\":1}",
            "HTTP/1.1 201 Created\r\nTransfer-Encoding: chunked\r\n\r\n3\r\nabc\r\n2;ext=1\r\nde\r\n0\r\nX-Trailer: t\r\n\r\n",
        ]);
        let mut conn = Connection::open(&base, 30, false).unwrap();
        assert!(!conn.is_tls());

        let get = HttpRequest::new(HttpMethod::Get, &format!("{base}/first")).unwrap();
        conn.write_request(&get).unwrap();
        let first = conn.read_response(HttpMethod::Get).unwrap();
        assert_eq!(first.status, 200);
        assert_eq!(first.reason, "OK");
        assert_eq!(first.body, br#"{"a":1}"#);

        let post = HttpRequest::new(HttpMethod::Post, &format!("{base}/second"))
            .unwrap()
            .with_body("x=1");
        conn.write_request(&post).unwrap();
        let second = conn.read_response(HttpMethod::Post).unwrap();
        assert_eq!(second.status, 201);
        assert_eq!(second.body, b"abcde");

        let seen = server.join().unwrap();
        assert!(seen[0].starts_with("GET /first HTTP/1.1\r\n"));
        assert!(seen[1].starts_with("POST /second HTTP/1.1\r\n"));
        assert!(seen[1].ends_with("\r\n\r\nx=1"));
    }

    #[test]
    fn interim_continue_is_skipped() {
        let (base, _server) = serve(vec![
            "HTTP/1.1 100 Continue\r\n\r\nHTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok",
        ]);
        let mut conn = Connection::open(&base, 30, false).unwrap();
        let req = HttpRequest::new(HttpMethod::Get, &format!("{base}/")).unwrap();
        conn.write_request(&req).unwrap();
        let response = conn.read_response(HttpMethod::Get).unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.body, b"ok");
    }

    #[test]
    fn close_delimited_body() {
        let (base, _server) = serve(vec!["HTTP/1.0 200 OK\r\n\r\nuntil close"]);
        let mut conn = Connection::open(&base, 30, false).unwrap();
        let req = HttpRequest::new(HttpMethod::Get, &format!("{base}/")).unwrap();
        conn.write_request(&req).unwrap();
        let response = conn.read_response(HttpMethod::Get).unwrap();
        assert_eq!(response.body, b"until close");
    }

    #[test]
    fn garbage_status_line_is_malformed() {
        let (base, _server) = serve(vec!["SMTP ready\r\n\r\n"]);
        let mut conn = Connection::open(&base, 30, false).unwrap();
        let req = HttpRequest::new(HttpMethod::Get, &format!("{base}/")).unwrap();
        conn.write_request(&req).unwrap();
        let err = conn.read_response(HttpMethod::Get).unwrap_err();
        assert!(matches!(err, HttpError::MalformedResponse(_)));
    }

    #[test]
    fn oversized_chunk_size_is_malformed() {
        let (base, _server) = serve(vec![
            "HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n1\r\na\r\nffffffffffffffff\r\n",
        ]);
        let mut conn = Connection::open(&base, 30, false).unwrap();
        let req = HttpRequest::new(HttpMethod::Get, &format!("{base}/")).unwrap();
        conn.write_request(&req).unwrap();
        let err = conn.read_response(HttpMethod::Get).unwrap_err();
        assert!(matches!(err, HttpError::MalformedResponse(_)), "got {err:?}");
    }

    #[test]
    fn announced_length_beyond_body_is_read_error() {
        let (base, _server) = serve(vec![
            "HTTP/1.1 200 OK\r\nContent-Length: 18446744073709551615\r\n\r\nshort",
        ]);
        let mut conn = Connection::open(&base, 30, false).unwrap();
        let req = HttpRequest::new(HttpMethod::Get, &format!("{base}/")).unwrap();
        conn.write_request(&req).unwrap();
        let err = conn.read_response(HttpMethod::Get).unwrap_err();
        match err {
            HttpError::ConnectionIo { source, .. } => assert_eq!(source.kind(), io::ErrorKind::UnexpectedEof),
            other => panic!("expected read error, got {other:?}"),
        }
    }

    #[test]
    fn huge_first_chunk_fails_without_allocating() {
        let (base, _server) = serve(vec!["HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\nffffffffffffffff\r\nab"]);
        let mut conn = Connection::open(&base, 30, false).unwrap();
        let req = HttpRequest::new(HttpMethod::Get, &format!("{base}/")).unwrap();
        conn.write_request(&req).unwrap();
        let err = conn.read_response(HttpMethod::Get).unwrap_err();
        assert!(matches!(err, HttpError::ConnectionIo { .. }), "got {err:?}");
    }

    #[test]
    fn unsupported_scheme_is_rejected() {
        let err = Connection::open("ftp://localhost/", 30, false).unwrap_err();
        assert!(matches!(err, HttpError::UnsupportedScheme(scheme) if scheme == "ftp"));
    }

    #[test]
    fn refused_dial_is_connect_error() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let err = Connection::open(&format!("http://127.0.0.1:{port}/"), 30, false).unwrap_err();
        assert!(matches!(err, HttpError::Connect { .. }));
    }

    #[test]
    fn tls_configs_build_for_both_modes() {
        assert!(tls_config(false).is_ok());
        assert!(tls_config(true).is_ok());
    }

    /// Accept one TLS connection with a self-signed `localhost` certificate,
    /// read one request head and answer with `reply`. Handshake failures end
    /// the server quietly.
    fn serve_tls(reply: &'static str) -> String {
        let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let cert = certified.cert.der().clone();
        let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(certified.signing_key.serialize_der()));
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let config = ServerConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .unwrap()
            .with_no_client_auth()
            .with_single_cert(vec![cert], key)
            .unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        thread::spawn(move || {
            let (tcp, _) = listener.accept().unwrap();
            let session = ServerConnection::new(Arc::new(config)).unwrap();
            let mut reader = BufReader::new(StreamOwned::new(session, tcp));
            loop {
                let mut line = String::new();
                match reader.read_line(&mut line) {
                    Ok(0) | Err(_) => return,
                    Ok(_) if line == "\r\n" => break,
                    Ok(_) => {}
                }
            }
            let stream = reader.get_mut();
            let _ = stream.write_all(reply.as_bytes()).and_then(|()| stream.flush());
        });
        format!("https://localhost:{port}")
    }

    #[test]
    fn self_signed_certificate_is_rejected_when_verifying() {
        let base = serve_tls("HTTP/1.1 200 OK\r\nContent-Length: 3\r\n\r\nabc");
        let err = crate::client::raw_connection(&base, 5, false).unwrap_err();
        assert!(matches!(err, HttpError::Tls { ref host, .. } if host == "localhost"), "got {err:?}");
    }

    #[test]
    fn skip_verify_completes_a_tls_cycle() {
        let base = serve_tls("HTTP/1.1 200 OK\r\nContent-Length: 3\r\n\r\nabc");
        let conn = crate::client::raw_connection(&base, 5, true).unwrap();
        assert!(conn.is_tls());

        let mut session = HttpSession::new();
        session.set_connection(conn);
        session.conn_get(&format!("{base}/secure"), &HashMap::new()).unwrap();
        let decoded = session.conn_response(ReturnShape::Text).unwrap();
        assert_eq!(decoded, Decoded::Text("abc".to_string()));
    }
}
