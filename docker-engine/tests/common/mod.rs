use std::io::{Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;
use std::thread::{self, JoinHandle};
use tempfile::TempDir;

/// A request as seen by the fake engine.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: String,
    pub path: String,
    pub body: String,
}

/// A unix-socket server that answers each connection with the next scripted
/// raw response and records what was asked.
pub struct FakeDaemon {
    _dir: TempDir,
    pub socket: PathBuf,
    handle: Option<JoinHandle<Vec<Recorded>>>,
}

impl FakeDaemon {
    pub fn serve(responses: Vec<Vec<u8>>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("docker.sock");
        let listener = UnixListener::bind(&socket).unwrap();

        let handle = thread::spawn(move || {
            let mut recorded = Vec::new();
            for response in responses {
                let (mut conn, _) = listener.accept().unwrap();
                recorded.push(read_request(&mut conn));
                conn.write_all(&response).unwrap();
            }
            recorded
        });

        Self {
            _dir: dir,
            socket,
            handle: Some(handle),
        }
    }

    /// Wait for every scripted response to be served.
    pub fn finish(mut self) -> Vec<Recorded> {
        self.handle.take().unwrap().join().unwrap()
    }
}

fn read_request(conn: &mut UnixStream) -> Recorded {
    let mut raw = Vec::new();
    let mut byte = [0u8; 1];
    while !raw.ends_with(b"\r\n\r\n") {
        conn.read_exact(&mut byte).unwrap();
        raw.push(byte[0]);
    }
    let head = String::from_utf8(raw).unwrap();
    let mut parts = head.lines().next().unwrap().split_whitespace();
    let method = parts.next().unwrap().to_string();
    let path = parts.next().unwrap().to_string();

    let len = head
        .lines()
        .find_map(|l| l.strip_prefix("Content-Length: "))
        .map(|v| v.trim().parse::<usize>().unwrap())
        .unwrap_or(0);
    let mut body = vec![0u8; len];
    conn.read_exact(&mut body).unwrap();

    Recorded {
        method,
        path,
        body: String::from_utf8(body).unwrap(),
    }
}

pub fn json_response(status: &str, body: &str) -> Vec<u8> {
    format!(
        "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{body}",
        body.len()
    )
    .into_bytes()
}

pub fn empty_response(status: &str) -> Vec<u8> {
    format!("HTTP/1.1 {status}\r\nContent-Length: 0\r\n\r\n").into_bytes()
}

pub fn upgrade_response(payload: &[u8]) -> Vec<u8> {
    let mut out = b"HTTP/1.1 101 UPGRADED\r\nContent-Type: application/vnd.docker.raw-stream\r\nConnection: Upgrade\r\nUpgrade: tcp\r\n\r\n".to_vec();
    out.extend_from_slice(payload);
    out
}
