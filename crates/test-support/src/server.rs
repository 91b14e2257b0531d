use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

const BOUNDARY: &str = "rzsync-test-boundary";

/// One request the server handled, for test assertions.
#[derive(Clone, Debug)]
pub struct RequestRecord {
    /// Request path, e.g. `/file.bin`.
    pub path: String,
    /// Verbatim `Range` header, when present.
    pub range: Option<String>,
}

#[derive(Default)]
struct Routes {
    files: HashMap<String, Vec<u8>>,
    redirects: HashMap<String, (u16, Option<String>)>,
}

struct Shared {
    routes: Mutex<Routes>,
    requests: Mutex<Vec<RequestRecord>>,
    shutdown: AtomicBool,
}

/// Minimal blocking HTTP server for hermetic tests: in-memory files,
/// byte ranges (single and `multipart/byteranges`), scripted redirects.
pub struct StaticHttpServer {
    addr: SocketAddr,
    shared: Arc<Shared>,
    handle: Option<thread::JoinHandle<()>>,
}

impl StaticHttpServer {
    /// Binds a fresh server on a loopback port and starts serving.
    #[must_use]
    pub fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind loopback");
        let addr = listener.local_addr().expect("local addr");
        let shared = Arc::new(Shared {
            routes: Mutex::new(Routes::default()),
            requests: Mutex::new(Vec::new()),
            shutdown: AtomicBool::new(false),
        });

        let worker = Arc::clone(&shared);
        let handle = thread::spawn(move || {
            for stream in listener.incoming() {
                if worker.shutdown.load(Ordering::SeqCst) {
                    break;
                }
                if let Ok(stream) = stream {
                    // Serve inline; the test suites drive one request at a
                    // time.
                    let _ = serve_one(&worker, stream);
                }
            }
        });

        Self {
            addr,
            shared,
            handle: Some(handle),
        }
    }

    /// Absolute URL for `path` (which should start with `/`).
    #[must_use]
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    /// Publishes an in-memory file at `path`.
    pub fn put_file(&self, path: &str, bytes: impl Into<Vec<u8>>) {
        self.shared
            .routes
            .lock()
            .unwrap()
            .files
            .insert(path.to_owned(), bytes.into());
    }

    /// Scripts a redirect (or a bare status when `location` is `None`).
    pub fn put_redirect(&self, path: &str, status: u16, location: Option<&str>) {
        self.shared
            .routes
            .lock()
            .unwrap()
            .redirects
            .insert(path.to_owned(), (status, location.map(str::to_owned)));
    }

    /// Every request handled so far.
    #[must_use]
    pub fn requests(&self) -> Vec<RequestRecord> {
        self.shared.requests.lock().unwrap().clone()
    }

    /// Requests whose path matches `path`.
    #[must_use]
    pub fn requests_for(&self, path: &str) -> Vec<RequestRecord> {
        self.requests()
            .into_iter()
            .filter(|r| r.path == path)
            .collect()
    }
}

impl Drop for StaticHttpServer {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        // Unblock the accept loop.
        let _ = TcpStream::connect(self.addr);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn serve_one(shared: &Shared, stream: TcpStream) -> std::io::Result<()> {
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut line = String::new();
    reader.read_line(&mut line)?;
    let mut parts = line.split_whitespace();
    let (Some(_method), Some(path)) = (parts.next(), parts.next()) else {
        return Ok(());
    };
    let path = path.to_owned();

    let mut range = None;
    loop {
        let mut header = String::new();
        if reader.read_line(&mut header)? == 0 {
            break;
        }
        let header = header.trim_end();
        if header.is_empty() {
            break;
        }
        if let Some((name, value)) = header.split_once(':')
            && name.eq_ignore_ascii_case("Range")
        {
            range = Some(value.trim().to_owned());
        }
    }

    shared.requests.lock().unwrap().push(RequestRecord {
        path: path.clone(),
        range: range.clone(),
    });

    let mut out = stream;
    let routes = shared.routes.lock().unwrap();
    if let Some((status, location)) = routes.redirects.get(&path) {
        let mut head = format!("HTTP/1.1 {status} {}\r\n", reason(*status));
        if let Some(location) = location {
            head.push_str(&format!("Location: {location}\r\n"));
        }
        head.push_str("Content-Length: 0\r\nConnection: close\r\n\r\n");
        return out.write_all(head.as_bytes());
    }

    let Some(body) = routes.files.get(&path).cloned() else {
        let head =
            "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";
        return out.write_all(head.as_bytes());
    };
    drop(routes);

    match range.as_deref().and_then(|r| parse_ranges(r, body.len() as u64)) {
        None => {
            let head = format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            );
            out.write_all(head.as_bytes())?;
            out.write_all(&body)
        }
        Some(ranges) if ranges.len() == 1 => {
            let (start, end) = ranges[0];
            let slice = &body[start as usize..=end as usize];
            let head = format!(
                "HTTP/1.1 206 Partial Content\r\nContent-Range: bytes {start}-{end}/{}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len(),
                slice.len()
            );
            out.write_all(head.as_bytes())?;
            out.write_all(slice)
        }
        Some(ranges) => {
            let mut payload = Vec::new();
            for (start, end) in ranges {
                payload.extend_from_slice(format!("\r\n--{BOUNDARY}\r\n").as_bytes());
                payload.extend_from_slice(
                    format!(
                        "Content-Type: application/octet-stream\r\nContent-Range: bytes {start}-{end}/{}\r\n\r\n",
                        body.len()
                    )
                    .as_bytes(),
                );
                payload.extend_from_slice(&body[start as usize..=end as usize]);
            }
            payload.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
            let head = format!(
                "HTTP/1.1 206 Partial Content\r\nContent-Type: multipart/byteranges; boundary={BOUNDARY}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                payload.len()
            );
            out.write_all(head.as_bytes())?;
            out.write_all(&payload)
        }
    }
}

/// Parses `bytes=a-b,c-d,...`, clamping ends to the body. Unsupported
/// forms yield `None`, which the caller serves as a plain 200.
fn parse_ranges(header: &str, total: u64) -> Option<Vec<(u64, u64)>> {
    let spec = header.strip_prefix("bytes=")?;
    let mut out = Vec::new();
    for part in spec.split(',') {
        let (start, end) = part.trim().split_once('-')?;
        let start: u64 = start.parse().ok()?;
        let end: u64 = if end.is_empty() {
            total - 1
        } else {
            end.parse().ok()?
        };
        if start >= total || start > end {
            return None;
        }
        out.push((start, end.min(total - 1)));
    }
    (!out.is_empty()).then_some(out)
}

const fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        206 => "Partial Content",
        301 => "Moved Permanently",
        302 => "Found",
        307 => "Temporary Redirect",
        404 => "Not Found",
        _ => "Response",
    }
}
