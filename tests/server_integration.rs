//! End-to-end tests driving a bound server over cleartext (and one TLS)
//! connection with hand-built HTTP/2 frames.

use h2static::h2::codec::FrameDecoder;
use h2static::h2::frames::{self, FrameFlags, FrameType, RawFrame};
use h2static::h2::CLIENT_PREFACE;
use h2static::{Config, HttpServer, ShutdownHandle};
use std::collections::HashMap;
use std::fs;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::path::PathBuf;
use std::thread::JoinHandle;
use std::time::Duration;

struct RunningServer {
    addr: SocketAddr,
    shutdown: ShutdownHandle,
    thread: Option<JoinHandle<()>>,
}

impl RunningServer {
    fn start(mut config: Config) -> RunningServer {
        config.address = Some("127.0.0.1".to_string());
        config.port = 0;
        let mut server = HttpServer::new(config).expect("server construction");
        server.bind().expect("bind");
        let addr = server.local_addrs()[0];
        let shutdown = server.shutdown_handle();
        let thread = std::thread::spawn(move || server.run().expect("server run"));
        RunningServer {
            addr,
            shutdown,
            thread: Some(thread),
        }
    }
}

impl Drop for RunningServer {
    fn drop(&mut self) {
        self.shutdown.shutdown();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Fresh document root under the target dir.
fn make_htdocs(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("h2static-test-{}-{}", name, std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    dir
}

fn base_config(htdocs: &PathBuf) -> Config {
    let mut config = Config::default();
    config.no_tls = true;
    config.htdocs = htdocs.clone();
    config
}

#[derive(Debug, Default)]
struct Response {
    status: String,
    headers: Vec<(String, String)>,
    interim: Vec<String>,
    body: Vec<u8>,
    trailers: Vec<(String, String)>,
    reset: bool,
}

impl Response {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

struct TestClient<S: Read + Write> {
    stream: S,
    decoder: FrameDecoder,
    hpack_enc: hpack::Encoder<'static>,
    hpack_dec: hpack::Decoder<'static>,
    next_stream_id: u32,
    /// PUSH_PROMISE frames seen: promised id -> synthesised headers.
    promises: HashMap<u32, Vec<(String, String)>>,
    /// Per-stream responses under assembly.
    responses: HashMap<u32, Response>,
    finished: Vec<u32>,
}

impl TestClient<TcpStream> {
    fn connect(addr: SocketAddr) -> TestClient<TcpStream> {
        let stream = TcpStream::connect(addr).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(10)))
            .unwrap();
        TestClient::handshake(stream)
    }
}

impl<S: Read + Write> TestClient<S> {
    /// Send the preface + SETTINGS, wait for the server's SETTINGS and
    /// acknowledge it.
    fn handshake(stream: S) -> TestClient<S> {
        let mut client = TestClient {
            stream,
            decoder: FrameDecoder::new(1 << 24),
            hpack_enc: hpack::Encoder::new(),
            hpack_dec: hpack::Decoder::new(),
            next_stream_id: 1,
            promises: HashMap::new(),
            responses: HashMap::new(),
            finished: Vec::new(),
        };
        client.stream.write_all(CLIENT_PREFACE).unwrap();
        client
            .stream
            .write_all(&frames::encode_settings(&[]))
            .unwrap();
        loop {
            let frame = client.read_frame();
            if frame.kind == Some(FrameType::Settings) && !frame.flags.is_ack() {
                client
                    .stream
                    .write_all(&frames::encode_settings_ack())
                    .unwrap();
                break;
            }
        }
        client
    }

    fn read_frame(&mut self) -> RawFrame {
        loop {
            if let Some(frame) = self.decoder.next_frame().unwrap() {
                return frame;
            }
            let mut buf = [0u8; 4096];
            let n = self.stream.read(&mut buf).unwrap();
            assert!(n > 0, "server closed the connection unexpectedly");
            self.decoder.feed(&buf[..n]);
        }
    }

    fn send_headers(
        &mut self,
        path: &str,
        extra: &[(&str, &str)],
        end_stream: bool,
    ) -> u32 {
        let stream_id = self.next_stream_id;
        self.next_stream_id += 2;
        let mut headers: Vec<(&[u8], &[u8])> = vec![
            (b":method", b"GET"),
            (b":path", path.as_bytes()),
            (b":scheme", b"http"),
            (b":authority", b"localhost"),
        ];
        for (name, value) in extra {
            headers.push((name.as_bytes(), value.as_bytes()));
        }
        let block = self.hpack_enc.encode(headers.into_iter());
        let mut flags = FrameFlags::empty();
        flags.set(FrameFlags::END_HEADERS);
        if end_stream {
            flags.set(FrameFlags::END_STREAM);
        }
        let mut wire =
            frames::encode_header(FrameType::Headers, flags, stream_id, block.len()).to_vec();
        wire.extend_from_slice(&block);
        self.stream.write_all(&wire).unwrap();
        stream_id
    }

    fn send_data(&mut self, stream_id: u32, data: &[u8], end_stream: bool) {
        self.stream
            .write_all(&frames::encode_data(stream_id, data, end_stream, 0))
            .unwrap();
    }

    fn decode_headers(&mut self, block: &[u8]) -> Vec<(String, String)> {
        self.hpack_dec
            .decode(block)
            .unwrap()
            .into_iter()
            .map(|(n, v)| {
                (
                    String::from_utf8_lossy(&n).into_owned(),
                    String::from_utf8_lossy(&v).into_owned(),
                )
            })
            .collect()
    }

    /// Fold one frame into the per-stream response ledger.
    fn process_frame(&mut self, frame: RawFrame) {
        match frame.kind {
            Some(FrameType::PushPromise) => {
                let promised =
                    u32::from_be_bytes(frame.payload[0..4].try_into().unwrap()) & 0x7fff_ffff;
                let headers = self.decode_headers(&frame.payload[4..]);
                self.promises.insert(promised, headers);
            }
            Some(FrameType::Headers) => {
                let block = frames::headers_fragment(frame.payload.clone(), frame.flags).unwrap();
                let headers = self.decode_headers(&block);
                let response = self.responses.entry(frame.stream_id).or_default();
                let status = headers
                    .iter()
                    .find(|(n, _)| n == ":status")
                    .map(|(_, v)| v.clone());
                match status {
                    Some(code) if code.starts_with('1') => response.interim.push(code),
                    Some(code) => {
                        response.status = code;
                        response.headers = headers;
                    }
                    // No :status means trailers.
                    None => response.trailers = headers,
                }
                if frame.flags.is_end_stream() {
                    self.finished.push(frame.stream_id);
                }
            }
            Some(FrameType::Data) => {
                let data = frames::strip_padding(frame.payload.clone(), frame.flags).unwrap();
                let response = self.responses.entry(frame.stream_id).or_default();
                response.body.extend_from_slice(&data);
                if frame.flags.is_end_stream() {
                    self.finished.push(frame.stream_id);
                }
            }
            Some(FrameType::RstStream) => {
                self.responses.entry(frame.stream_id).or_default().reset = true;
                self.finished.push(frame.stream_id);
            }
            Some(FrameType::Goaway) => panic!("unexpected GOAWAY"),
            _ => {}
        }
    }

    /// Read frames until `stream_id` finishes (END_STREAM or RST).
    /// Frames for other streams are assembled on the side.
    fn collect_response(&mut self, stream_id: u32) -> Response {
        while !self.finished.contains(&stream_id) {
            let frame = self.read_frame();
            self.process_frame(frame);
        }
        self.finished.retain(|id| *id != stream_id);
        self.responses.remove(&stream_id).unwrap_or_default()
    }

    fn get(&mut self, path: &str, extra: &[(&str, &str)]) -> Response {
        let stream_id = self.send_headers(path, extra, true);
        self.collect_response(stream_id)
    }
}

#[test]
fn test_serves_file() {
    // S1: a 13-byte index.html.
    let htdocs = make_htdocs("s1");
    fs::write(htdocs.join("index.html"), b"Hello, world\n").unwrap();
    let server = RunningServer::start(base_config(&htdocs));

    let mut client = TestClient::connect(server.addr);
    let response = client.get("/index.html", &[]);
    assert_eq!(response.status, "200");
    assert_eq!(response.header("content-length"), Some("13"));
    assert_eq!(response.header("cache-control"), Some("max-age=3600"));
    assert!(response.header("date").is_some());
    assert!(response.header("last-modified").is_some());
    assert!(response.header("server").unwrap().starts_with("nghttpd"));
    assert_eq!(response.body, b"Hello, world\n");
}

#[test]
fn test_root_serves_index_html() {
    // S2: "/" is served as "/index.html".
    let htdocs = make_htdocs("s2");
    fs::write(htdocs.join("index.html"), b"Hello, world\n").unwrap();
    let server = RunningServer::start(base_config(&htdocs));

    let mut client = TestClient::connect(server.addr);
    let response = client.get("/", &[]);
    assert_eq!(response.status, "200");
    assert_eq!(response.body, b"Hello, world\n");
}

#[test]
fn test_missing_file_gets_html_404() {
    // S3.
    let htdocs = make_htdocs("s3");
    let server = RunningServer::start(base_config(&htdocs));

    let mut client = TestClient::connect(server.addr);
    let response = client.get("/missing", &[]);
    assert_eq!(response.status, "404");
    assert_eq!(
        response.header("content-type"),
        Some("text/html; charset=UTF-8")
    );
    let body = String::from_utf8_lossy(&response.body);
    assert!(body.contains("<h1>404</h1>"));
}

#[test]
fn test_directory_redirects_with_slash() {
    // S4.
    let htdocs = make_htdocs("s4");
    fs::create_dir(htdocs.join("sub")).unwrap();
    let server = RunningServer::start(base_config(&htdocs));

    let mut client = TestClient::connect(server.addr);
    let response = client.get("/sub", &[]);
    assert_eq!(response.status, "301");
    let location = response.header("location").unwrap();
    assert!(location.ends_with("/sub/"), "location was {}", location);
    assert!(location.starts_with("http://localhost"));
}

#[test]
fn test_if_modified_since_yields_304() {
    // S5.
    let htdocs = make_htdocs("s5");
    let file = htdocs.join("index.html");
    fs::write(&file, b"Hello, world\n").unwrap();
    let mtime = fs::metadata(&file)
        .unwrap()
        .modified()
        .unwrap()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64;
    let server = RunningServer::start(base_config(&htdocs));

    let mut client = TestClient::connect(server.addr);
    let ims = h2static::util::http_date(mtime);
    let response = client.get("/index.html", &[("if-modified-since", ims.as_str())]);
    assert_eq!(response.status, "304");
    assert!(response.body.is_empty());
}

#[test]
fn test_do_not_respond_query_leaves_stream_open() {
    // S6: no response on the marked stream, other streams keep working.
    let htdocs = make_htdocs("s6");
    fs::write(htdocs.join("index.html"), b"still alive").unwrap();
    let server = RunningServer::start(base_config(&htdocs));

    let mut client = TestClient::connect(server.addr);
    let silent = client.send_headers("/?nghttpd_do_not_respond_to_req=yes", &[], true);
    let response = client.get("/index.html", &[]);
    assert_eq!(response.status, "200");
    assert_eq!(response.body, b"still alive");
    // Nothing ever arrived for the silent stream.
    assert_ne!(silent, 0);
}

#[test]
fn test_path_escape_gets_404() {
    // S7.
    let htdocs = make_htdocs("s7");
    let server = RunningServer::start(base_config(&htdocs));

    let mut client = TestClient::connect(server.addr);
    let response = client.get("/../etc/passwd", &[]);
    assert_eq!(response.status, "404");

    let response = client.get("/%2e%2e/etc/passwd", &[]);
    assert_eq!(response.status, "404");
}

#[test]
fn test_expect_100_continue() {
    let htdocs = make_htdocs("continue");
    fs::write(htdocs.join("index.html"), b"post target").unwrap();
    let server = RunningServer::start(base_config(&htdocs));

    let mut client = TestClient::connect(server.addr);
    let stream_id = client.send_headers("/index.html", &[("expect", "100-continue")], false);
    client.send_data(stream_id, b"ignored upload", true);
    let response = client.collect_response(stream_id);
    assert_eq!(response.interim, vec!["100".to_string()]);
    assert_eq!(response.status, "200");
    assert_eq!(response.body, b"post target");
}

#[test]
fn test_early_response_before_request_body() {
    let htdocs = make_htdocs("early");
    fs::write(htdocs.join("index.html"), b"early bird").unwrap();
    let mut config = base_config(&htdocs);
    config.early_response = true;
    let server = RunningServer::start(config);

    let mut client = TestClient::connect(server.addr);
    // Request body never finishes; the response arrives anyway.
    let stream_id = client.send_headers("/index.html", &[], false);
    let response = client.collect_response(stream_id);
    assert_eq!(response.status, "200");
    assert_eq!(response.body, b"early bird");
}

#[test]
fn test_push_promise_for_configured_path() {
    let htdocs = make_htdocs("push");
    fs::write(htdocs.join("index.html"), b"root page").unwrap();
    fs::write(htdocs.join("style.css"), b"body{}").unwrap();
    let mut config = base_config(&htdocs);
    config
        .push
        .insert("/".to_string(), vec!["/style.css".to_string()]);
    let server = RunningServer::start(config);

    let mut client = TestClient::connect(server.addr);
    let response = client.get("/", &[]);
    assert_eq!(response.status, "200");
    assert_eq!(response.body, b"root page");

    let (&promised, headers) = client.promises.iter().next().expect("a push promise");
    assert_eq!(promised % 2, 0);
    assert!(headers
        .iter()
        .any(|(n, v)| n == ":path" && v == "/style.css"));
    assert!(headers.iter().any(|(n, v)| n == ":method" && v == "GET"));

    let pushed = client.collect_response(promised);
    assert_eq!(pushed.status, "200");
    assert_eq!(pushed.body, b"body{}");
}

#[test]
fn test_trailers_are_emitted() {
    let htdocs = make_htdocs("trailers");
    fs::write(htdocs.join("index.html"), b"with trailers").unwrap();
    let mut config = base_config(&htdocs);
    config.trailer = vec![
        ("digest".to_string(), "deadbeef".to_string()),
        ("x-extra".to_string(), "1".to_string()),
    ];
    let server = RunningServer::start(config);

    let mut client = TestClient::connect(server.addr);
    let response = client.get("/index.html", &[]);
    assert_eq!(response.status, "200");
    assert_eq!(response.header("trailer"), Some("digest, x-extra"));
    assert_eq!(response.body, b"with trailers");
    assert_eq!(
        response.trailers,
        vec![
            ("digest".to_string(), "deadbeef".to_string()),
            ("x-extra".to_string(), "1".to_string()),
        ]
    );
}

#[test]
fn test_error_gzip_compresses_error_body() {
    let htdocs = make_htdocs("errgzip");
    let mut config = base_config(&htdocs);
    config.error_gzip = true;
    let server = RunningServer::start(config);

    let mut client = TestClient::connect(server.addr);
    let response = client.get("/missing", &[]);
    assert_eq!(response.status, "404");
    assert_eq!(response.header("content-encoding"), Some("gzip"));

    let mut decoder = flate2::read::GzDecoder::new(&response.body[..]);
    let mut body = String::new();
    decoder.read_to_string(&mut body).unwrap();
    assert!(body.contains("<h1>404</h1>"));
}

#[test]
fn test_stream_read_timeout_resets_stream_only() {
    let htdocs = make_htdocs("timeout");
    fs::write(htdocs.join("index.html"), b"survivor").unwrap();
    let mut config = base_config(&htdocs);
    config.stream_read_timeout = Duration::from_millis(200);
    let server = RunningServer::start(config);

    let mut client = TestClient::connect(server.addr);
    // Request body never completes; the read watchdog fires.
    let stalled = client.send_headers("/index.html", &[], false);
    let response = client.collect_response(stalled);
    assert!(response.reset, "expected RST_STREAM for the stalled stream");

    // The connection itself is still healthy.
    let response = client.get("/index.html", &[]);
    assert_eq!(response.status, "200");
    assert_eq!(response.body, b"survivor");
}

#[test]
fn test_multi_worker_serves_connections() {
    let htdocs = make_htdocs("workers");
    fs::write(htdocs.join("index.html"), b"from a worker").unwrap();
    let mut config = base_config(&htdocs);
    config.num_worker = 2;
    let server = RunningServer::start(config);

    for _ in 0..4 {
        let mut client = TestClient::connect(server.addr);
        let response = client.get("/", &[]);
        assert_eq!(response.status, "200");
        assert_eq!(response.body, b"from a worker");
    }
}

#[test]
fn test_tls_alpn_h2() {
    use openssl::ssl::{SslConnector, SslMethod, SslVerifyMode};

    let htdocs = make_htdocs("tls");
    fs::write(htdocs.join("index.html"), b"over tls").unwrap();
    let (key_path, cert_path) = self_signed_cert(&htdocs);

    let mut config = Config::default();
    config.htdocs = htdocs.clone();
    config.private_key_file = Some(key_path);
    config.cert_file = Some(cert_path);
    let server = RunningServer::start(config);

    let mut builder = SslConnector::builder(SslMethod::tls()).unwrap();
    builder.set_verify(SslVerifyMode::NONE);
    builder.set_alpn_protos(b"\x02h2").unwrap();
    let connector = builder.build();

    let tcp = TcpStream::connect(server.addr).unwrap();
    tcp.set_read_timeout(Some(Duration::from_secs(10))).unwrap();
    let tls = connector
        .configure()
        .unwrap()
        .verify_hostname(false)
        .connect("localhost", tcp)
        .unwrap();
    assert_eq!(tls.ssl().selected_alpn_protocol(), Some(&b"h2"[..]));

    let mut client = TestClient::handshake(tls);
    let response = client.get("/index.html", &[]);
    assert_eq!(response.status, "200");
    assert_eq!(response.body, b"over tls");
}

fn self_signed_cert(dir: &PathBuf) -> (PathBuf, PathBuf) {
    use openssl::asn1::Asn1Time;
    use openssl::bn::BigNum;
    use openssl::hash::MessageDigest;
    use openssl::pkey::PKey;
    use openssl::rsa::Rsa;
    use openssl::x509::{X509NameBuilder, X509};

    let rsa = Rsa::generate(2048).unwrap();
    let pkey = PKey::from_rsa(rsa).unwrap();

    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_text("CN", "localhost").unwrap();
    let name = name.build();

    let mut builder = X509::builder().unwrap();
    builder.set_version(2).unwrap();
    let serial = BigNum::from_u32(1).unwrap().to_asn1_integer().unwrap();
    builder.set_serial_number(&serial).unwrap();
    builder.set_subject_name(&name).unwrap();
    builder.set_issuer_name(&name).unwrap();
    builder.set_pubkey(&pkey).unwrap();
    builder
        .set_not_before(&Asn1Time::days_from_now(0).unwrap())
        .unwrap();
    builder
        .set_not_after(&Asn1Time::days_from_now(7).unwrap())
        .unwrap();
    builder.sign(&pkey, MessageDigest::sha256()).unwrap();
    let cert = builder.build();

    let key_path = dir.join("server.key");
    let cert_path = dir.join("server.crt");
    fs::write(&key_path, pkey.private_key_to_pem_pkcs8().unwrap()).unwrap();
    fs::write(&cert_path, cert.to_pem().unwrap()).unwrap();
    (key_path, cert_path)
}
