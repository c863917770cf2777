//! 端到端测试：在进程内以随机端口启动服务器，用 Tokio 客户端发送真实的 TCP 请求。

use httpserver::{Config, LockPolicy, Server, ServerHandle};

use std::{net::SocketAddr, path::Path};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};

fn start_server(root: &Path, policy: LockPolicy) -> ServerHandle {
    let config = Config::new()
        .with_port(0)
        .with_www_root(root.to_str().unwrap())
        .with_worker_threads(4)
        .with_lock_policy(policy, 2);
    Server::bind(&config).unwrap().start().unwrap()
}

async fn send_request(addr: SocketAddr, request: &[u8]) -> Vec<u8> {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request).await.unwrap();
    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.unwrap();
    response
}

fn parse_response(response: &[u8]) -> (u16, Vec<(String, String)>, Vec<u8>) {
    let split = response
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .expect("响应中没有空行");
    let head = String::from_utf8_lossy(&response[..split]).to_string();
    let body = response[split + 4..].to_vec();

    let mut lines = head.split("\r\n");
    let status_code = lines
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|code| code.parse().ok())
        .unwrap_or(0);
    let headers = lines
        .filter_map(|line| line.split_once(": "))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    (status_code, headers, body)
}

fn put_request(name: &str, body: &[u8]) -> Vec<u8> {
    let mut request = format!(
        "PUT /{} HTTP/1.1\r\nContent-Length: {}\r\n\r\n",
        name,
        body.len()
    )
    .into_bytes();
    request.extend_from_slice(body);
    request
}

fn get_request(name: &str) -> Vec<u8> {
    format!("GET /{} HTTP/1.1\r\n\r\n", name).into_bytes()
}

#[cfg(test)]
mod integration_tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_put_then_get() {
        let dir = tempdir().unwrap();
        let server = start_server(dir.path(), LockPolicy::Nway);
        let addr = server.local_addr();

        let response = send_request(addr, &put_request("notes.txt", b"hello world")).await;
        let (status_code, _headers, body) = parse_response(&response);
        assert_eq!(status_code, 201);
        assert_eq!(body, b"Created\n");

        let response = send_request(addr, &put_request("notes.txt", b"bye")).await;
        let (status_code, _headers, body) = parse_response(&response);
        assert_eq!(status_code, 200);
        assert_eq!(body, b"OK\n");

        let response = send_request(addr, &get_request("notes.txt")).await;
        let (status_code, headers, body) = parse_response(&response);
        assert_eq!(status_code, 200);
        assert_eq!(body, b"bye");

        let header_map: HashMap<String, String> = headers.into_iter().collect();
        assert_eq!(header_map.get("Content-Length").map(String::as_str), Some("3"));
        assert_eq!(header_map.get("Server").map(String::as_str), Some("httpserver"));
        assert!(header_map.contains_key("Date"));

        assert!(server.registry().is_empty());
        server.shutdown();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_large_file_roundtrip() {
        let dir = tempdir().unwrap();
        let server = start_server(dir.path(), LockPolicy::Writers);
        let addr = server.local_addr();

        let content: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        let response = send_request(addr, &put_request("blob.bin", &content)).await;
        assert_eq!(parse_response(&response).0, 201);
        assert_eq!(std::fs::read(dir.path().join("blob.bin")).unwrap(), content);

        let response = send_request(addr, &get_request("blob.bin")).await;
        let (status_code, _headers, body) = parse_response(&response);
        assert_eq!(status_code, 200);
        assert_eq!(body, content);

        server.shutdown();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_rejected_requests() {
        let dir = tempdir().unwrap();
        std::fs::create_dir(dir.path().join("subdir")).unwrap();
        let server = start_server(dir.path(), LockPolicy::Readers);
        let addr = server.local_addr();

        let cases: Vec<(&[u8], u16)> = vec![
            (b"GET /index.html HTTP/1.0\r\n\r\n".as_slice(), 505),
            (b"POST /index.html HTTP/1.1\r\n\r\n".as_slice(), 501),
            (b"DELETE /index.html HTTP/1.1\r\n\r\n".as_slice(), 501),
            (b"GET /a HTTP/1.1\r\n\r\n".as_slice(), 400),
            (b"GET /dir/file HTTP/1.1\r\n\r\n".as_slice(), 400),
            (b"PUT /index.html HTTP/1.1\r\n\r\n".as_slice(), 400),
            (b"PUT /index.html HTTP/1.1\r\nContent-Length: -1\r\n\r\n".as_slice(), 400),
            (b"GET /missing.txt HTTP/1.1\r\n\r\n".as_slice(), 404),
            (b"GET /subdir HTTP/1.1\r\n\r\n".as_slice(), 403),
        ];

        for (request, expected) in cases {
            let response = send_request(addr, request).await;
            let (status_code, _headers, _body) = parse_response(&response);
            assert_eq!(
                status_code,
                expected,
                "请求 {:?} 的状态码不符",
                String::from_utf8_lossy(request)
            );
        }

        assert!(server.registry().is_empty());
        server.shutdown();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_writes_are_not_interleaved() {
        let dir = tempdir().unwrap();
        let server = start_server(dir.path(), LockPolicy::Nway);
        let addr = server.local_addr();

        let versions: Vec<Vec<u8>> = (b'a'..=b'h').map(|c| vec![c; 50_000]).collect();

        let mut writers = Vec::new();
        let mut readers = Vec::new();
        for version in versions.iter().cloned() {
            writers.push(tokio::spawn(async move {
                let response = send_request(addr, &put_request("shared.dat", &version)).await;
                parse_response(&response).0
            }));
            readers.push(tokio::spawn(async move {
                let response = send_request(addr, &get_request("shared.dat")).await;
                let (status_code, _headers, body) = parse_response(&response);
                (status_code, body)
            }));
        }

        for writer in writers {
            let status_code = writer.await.unwrap();
            assert!(status_code == 200 || status_code == 201);
        }
        for reader in readers {
            let (status_code, body) = reader.await.unwrap();
            match status_code {
                200 => assert!(versions.contains(&body), "读到了写了一半的文件"),
                404 => assert!(body == b"Not Found\n"),
                other => panic!("意外的状态码：{}", other),
            }
        }

        let content = std::fs::read(dir.path().join("shared.dat")).unwrap();
        assert!(versions.contains(&content), "文件内容被交错写入");
        assert!(server.registry().is_empty());
        server.shutdown();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_request_id_does_not_change_reply() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("data.txt"), b"payload").unwrap();
        let server = start_server(dir.path(), LockPolicy::Nway);

        let response = send_request(
            server.local_addr(),
            b"GET /data.txt HTTP/1.1\r\nRequest-Id: 77\r\nHost: localhost\r\n\r\n",
        )
        .await;
        let (status_code, _headers, body) = parse_response(&response);
        assert_eq!(status_code, 200);
        assert_eq!(body, b"payload");

        server.shutdown();
    }
}
