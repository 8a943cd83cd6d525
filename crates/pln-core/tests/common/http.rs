//! A tiny HTTP/1.1 peer serving canned replies by path.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

pub struct Reply {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Reply {
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 200,
            headers: Vec::new(),
            body: body.into(),
        }
    }
}

#[derive(Default)]
pub struct Peer {
    pub routes: HashMap<String, Reply>,
    /// "METHOD path" of every request received, with the request body.
    pub requests: Mutex<Vec<(String, String)>>,
}

async fn handle(peer: Arc<Peer>, mut stream: TcpStream) -> Result<()> {
    let mut raw = Vec::new();
    let mut buf = [0u8; 4096];
    let header_end = loop {
        let read = stream.read(&mut buf).await?;
        if read == 0 {
            return Ok(());
        }
        raw.extend_from_slice(&buf[..read]);
        if let Some(pos) = raw.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&raw[..header_end]).into_owned();
    let mut lines = head.lines();
    let request_line = lines.next().unwrap_or_default().to_string();
    let content_length = lines
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);
    while raw.len() < header_end + content_length {
        let read = stream.read(&mut buf).await?;
        if read == 0 {
            break;
        }
        raw.extend_from_slice(&buf[..read]);
    }
    let body = String::from_utf8_lossy(&raw[header_end..]).into_owned();

    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let path = parts.next().unwrap_or_default().to_string();
    peer.requests
        .lock()
        .unwrap()
        .push((format!("{method} {path}"), body));

    let missing = Reply {
        status: 404,
        headers: Vec::new(),
        body: b"not found".to_vec(),
    };
    let reply = peer.routes.get(&path).unwrap_or(&missing);
    let mut response = format!(
        "HTTP/1.1 {} Reply\r\nContent-Length: {}\r\nConnection: close\r\n",
        reply.status,
        reply.body.len()
    );
    for (name, value) in &reply.headers {
        response.push_str(&format!("{name}: {value}\r\n"));
    }
    response.push_str("\r\n");
    stream.write_all(response.as_bytes()).await?;
    stream.write_all(&reply.body).await?;
    stream.shutdown().await?;
    Ok(())
}

pub async fn start(routes: impl FnOnce(&str) -> HashMap<String, Reply>) -> Result<(String, Arc<Peer>)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let base = format!("http://{}", listener.local_addr()?);
    let peer = Arc::new(Peer {
        routes: routes(&base),
        requests: Mutex::new(Vec::new()),
    });
    let serving = peer.clone();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let peer = serving.clone();
            tokio::spawn(async move {
                let _ = handle(peer, stream).await;
            });
        }
    });
    Ok((base, peer))
}
