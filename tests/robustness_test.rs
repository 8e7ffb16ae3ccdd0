// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 异常路径回归测试套件
//!
//! 每一种连接级别的失败都应当只关闭该连接（不向客户端写任何字节），
//! 事件循环本身继续为后续连接服务。覆盖范围包括：
//! - 缺少 `Host` 的畸形请求
//! - 超出第一次读取的头部
//! - 慢速连接（报文体迟迟不到）
//! - 上游不可达、上游无响应、上游响应体不完整
//! - 溢出的 `Content-Length`

mod common;

use std::time::Duration;

use caching_proxy::{Config, SystemClock};
use common::*;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

const OK: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok";

/// 代理在失败之后仍然能正常转发
async fn assert_still_serving(proxy: std::net::SocketAddr) {
    let upstream = Upstream::fixed(OK).await;
    let request = format!("GET / HTTP/1.1\r\nHost: {}\r\n\r\n", upstream.host());
    assert_eq!(send_through(proxy, request.as_bytes()).await, OK);
}

#[tokio::test]
async fn test_missing_host_closed_without_reply() {
    let proxy = spawn_proxy(Config::new(), SystemClock);

    let response = send_through(proxy, b"GET /a HTTP/1.1\r\nAccept: */*\r\n\r\n").await;

    assert!(response.is_empty());
    assert_still_serving(proxy).await;
}

#[tokio::test]
async fn test_empty_host_closed_without_reply() {
    let proxy = spawn_proxy(Config::new(), SystemClock);

    let response = send_through(proxy, b"GET /a HTTP/1.1\r\nHost: \r\n\r\n").await;

    assert!(response.is_empty());
}

#[tokio::test]
async fn test_header_too_large() {
    let config = Config::from_toml_str("read_buffer_size = 64");
    let proxy = spawn_proxy(config, SystemClock);
    let mut request = b"GET / HTTP/1.1\r\nHost: example.com\r\n".to_vec();
    request.extend_from_slice(format!("X-Padding: {}\r\n\r\n", "a".repeat(200)).as_bytes());

    let mut stream = TcpStream::connect(proxy).await.unwrap();
    let _ = stream.write_all(&request).await;
    let response = read_until_close(&mut stream).await;

    assert!(response.is_empty());
}

#[tokio::test]
async fn test_header_without_terminator() {
    let proxy = spawn_proxy(Config::new(), SystemClock);

    let mut stream = TcpStream::connect(proxy).await.unwrap();
    stream
        .write_all(b"GET / HTTP/1.1\r\nHost: example.com\r\n")
        .await
        .unwrap();
    let response = read_until_close(&mut stream).await;

    assert!(response.is_empty());
}

#[tokio::test]
async fn test_body_timeout_forwards_nothing() {
    let upstream = Upstream::fixed(OK).await;
    let config = Config::new().with_body_timeout(Duration::from_millis(200));
    let proxy = spawn_proxy(config, SystemClock);
    let mut request = format!(
        "POST /p HTTP/1.1\r\nHost: {}\r\nContent-Length: 100\r\n\r\n",
        upstream.host()
    )
    .into_bytes();
    request.extend_from_slice(&[b'a'; 40]);

    let mut stream = TcpStream::connect(proxy).await.unwrap();
    stream.write_all(&request).await.unwrap();
    let response = read_until_close(&mut stream).await;

    assert!(response.is_empty());
    assert_eq!(upstream.hits(), 0);
    assert_still_serving(proxy).await;
}

#[tokio::test]
async fn test_incomplete_body_forwards_nothing() {
    let upstream = Upstream::fixed(OK).await;
    let proxy = spawn_proxy(Config::new(), SystemClock);
    let mut request = format!(
        "POST /p HTTP/1.1\r\nHost: {}\r\nContent-Length: 100\r\n\r\n",
        upstream.host()
    )
    .into_bytes();
    request.extend_from_slice(&[b'a'; 40]);

    let mut stream = TcpStream::connect(proxy).await.unwrap();
    stream.write_all(&request).await.unwrap();
    stream.shutdown().await.unwrap();
    let response = read_until_close(&mut stream).await;

    assert!(response.is_empty());
    assert_eq!(upstream.hits(), 0);
}

#[tokio::test]
async fn test_content_length_overflow_closed_without_reply() {
    let upstream = Upstream::fixed(OK).await;
    let proxy = spawn_proxy(Config::new(), SystemClock);
    let request = format!(
        "POST /p HTTP/1.1\r\nHost: {}\r\nContent-Length: 18446744073709551615\r\n\r\n",
        upstream.host()
    );

    let response = send_through(proxy, request.as_bytes()).await;

    assert!(response.is_empty());
    assert_eq!(upstream.hits(), 0);
    assert_still_serving(proxy).await;
}

#[tokio::test]
async fn test_upstream_body_timeout_forwards_nothing() {
    const PARTIAL: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\nhello";
    let upstream = Upstream::staged(PARTIAL, None, Duration::ZERO).await;
    let config = Config::new().with_body_timeout(Duration::from_millis(200));
    let proxy = spawn_proxy(config, SystemClock);
    let request = format!("GET / HTTP/1.1\r\nHost: {}\r\n\r\n", upstream.host());

    let response = send_through(proxy, request.as_bytes()).await;

    assert!(response.is_empty());
    assert_eq!(upstream.hits(), 1);
    assert_still_serving(proxy).await;
}

#[tokio::test]
async fn test_upstream_closes_mid_body() {
    const PARTIAL: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\nhello";
    let upstream = Upstream::staged(PARTIAL, Some(&b""[..]), Duration::from_millis(100)).await;
    let proxy = spawn_proxy(Config::new(), SystemClock);
    let request = format!("GET / HTTP/1.1\r\nHost: {}\r\n\r\n", upstream.host());

    let response = send_through(proxy, request.as_bytes()).await;

    assert!(response.is_empty());
    assert_still_serving(proxy).await;
}

#[tokio::test]
async fn test_upstream_unreachable() {
    let proxy = spawn_proxy(Config::new(), SystemClock);
    let request = format!("GET / HTTP/1.1\r\nHost: 127.0.0.1:{}\r\n\r\n", unused_port());

    let response = send_through(proxy, request.as_bytes()).await;

    assert!(response.is_empty());
    assert_still_serving(proxy).await;
}

#[tokio::test]
async fn test_upstream_timeout() {
    let upstream = Upstream::silent().await;
    let config = Config::new().with_upstream_timeout(Some(Duration::from_millis(300)));
    let proxy = spawn_proxy(config, SystemClock);
    let request = format!("GET / HTTP/1.1\r\nHost: {}\r\n\r\n", upstream.host());

    let response = send_through(proxy, request.as_bytes()).await;

    assert!(response.is_empty());
    assert_eq!(upstream.hits(), 1);
}

#[tokio::test]
async fn test_client_disconnect_before_request() {
    let proxy = spawn_proxy(Config::new(), SystemClock);

    let stream = TcpStream::connect(proxy).await.unwrap();
    drop(stream);

    assert_still_serving(proxy).await;
}
