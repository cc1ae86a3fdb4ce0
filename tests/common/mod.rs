//! In-process stand-in for the telemetry backend.

#![allow(dead_code)]

use std::path::PathBuf;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixListener;

pub const HELLO: &str = r#"{"type":"hello","service":"jtop","version":"4.2.12"}"#;

pub const STATS: &str = r#"{"type":"stats","ok":true,"data":{"board":{"platform":{"Machine":"aarch64"},"hardware":{"Model":"NVIDIA Jetson Orin Nano","Jetpack":"6.0","L4T":"36.3.0"}},"cpu":[{"online":true,"freq":{"cur":1510,"min":115,"max":1510},"idle":70,"user":20,"system":10}],"gpu":{"gpu":{"freq":{"cur":900,"min":200,"max":1400},"status":{"load":35.0}}},"memory":{"RAM":{"tot":8000000,"used":4000000},"SWAP":{"tot":0,"used":0,"cached":0}},"disk":{"/":{"total":32,"used":10,"available":22,"percent":31}},"uptime":3661,"temperature":{"CPU":45.2,"GPU":50.1}}}"#;

pub const UNHEALTHY: &str = r#"{"type":"stats","ok":false}"#;

/// Listens on a socket in a private temporary directory.
pub struct FakeBackend {
    // Keeps the socket directory alive.
    _dir: TempDir,
    path: PathBuf,
    listener: UnixListener,
}

/// One accepted exporter connection.
pub struct Client {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl FakeBackend {
    pub fn bind() -> Self {
        let dir = tempfile::tempdir().expect("Should create tempdir");
        let path = dir.path().join("backend.sock");
        let listener = UnixListener::bind(&path).expect("Should bind socket");
        Self {
            _dir: dir,
            path,
            listener,
        }
    }

    pub fn path(&self) -> PathBuf {
        self.path.clone()
    }

    pub async fn accept(&self) -> Client {
        let (stream, _) = self.listener.accept().await.expect("Should accept");
        let (read_half, writer) = stream.into_split();
        Client {
            lines: BufReader::new(read_half).lines(),
            writer,
        }
    }

    /// Accept and complete the handshake.
    pub async fn accept_subscriber(&self) -> Client {
        let mut client = self.accept().await;
        let request = client.read_request().await;
        assert_eq!(request["request"], "subscribe");
        client.send(HELLO).await;
        client
    }
}

impl Client {
    pub async fn read_request(&mut self) -> serde_json::Value {
        let line = self
            .lines
            .next_line()
            .await
            .expect("Should read request")
            .expect("Client sent nothing");
        serde_json::from_str(&line).expect("Request should be JSON")
    }

    pub async fn send(&mut self, frame: &str) {
        self.writer
            .write_all(frame.as_bytes())
            .await
            .expect("Should write frame");
        self.writer.write_all(b"\n").await.expect("Should write newline");
        self.writer.flush().await.expect("Should flush");
    }

    /// Resolves once the exporter has closed its end.
    pub async fn closed(&mut self) {
        while let Ok(Some(_)) = self.lines.next_line().await {}
    }
}
