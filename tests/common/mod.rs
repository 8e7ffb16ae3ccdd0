//! 集成测试公用的代理、上游与客户端工具。
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use caching_proxy::{Clock, Config, Server};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// 可以手动拨动的时钟，用来模拟缓存条目的老化。
#[derive(Clone)]
pub struct ManualClock {
    base: Instant,
    offset: Arc<Mutex<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: Arc::new(Mutex::new(Duration::ZERO)),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.offset.lock().unwrap() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + *self.offset.lock().unwrap()
    }
}

/// 在后台线程中启动代理，返回它的监听地址。
pub fn spawn_proxy<C: Clock + Send + 'static>(config: Config, clock: C) -> SocketAddr {
    let (tx, rx) = std::sync::mpsc::channel();
    std::thread::spawn(move || {
        let mut server = Server::with_clock(config.with_address("127.0.0.1", 0), clock).unwrap();
        tx.send(server.local_addr().unwrap()).unwrap();
        let _ = server.run();
    });
    rx.recv().unwrap()
}

pub fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// 读取一条完整的 HTTP 报文（头部 + `Content-Length` 声明的报文体）。
pub async fn read_message(stream: &mut TcpStream) -> Vec<u8> {
    let mut data = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        if let Some(pos) = find(&data, b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&data[..pos]).to_lowercase();
            let length = head
                .lines()
                .find_map(|l| l.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if data.len() >= pos + 4 + length {
                return data;
            }
        }
        let n = stream.read(&mut buf).await.unwrap();
        if n == 0 {
            return data;
        }
        data.extend_from_slice(&buf[..n]);
    }
}

/// 假的上游服务器：记录收到的每个请求，并用 `respond` 生成响应。
pub struct Upstream {
    pub addr: SocketAddr,
    hits: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl Upstream {
    pub async fn spawn<F>(respond: F) -> Self
    where
        F: Fn(&[u8]) -> Vec<u8> + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let requests = Arc::new(Mutex::new(Vec::new()));
        let respond = Arc::new(respond);

        let (hits_task, requests_task) = (Arc::clone(&hits), Arc::clone(&requests));
        tokio::spawn(async move {
            loop {
                let (mut stream, _) = match listener.accept().await {
                    Ok(pair) => pair,
                    Err(_) => return,
                };
                hits_task.fetch_add(1, Ordering::SeqCst);
                let respond = Arc::clone(&respond);
                let requests = Arc::clone(&requests_task);
                tokio::spawn(async move {
                    let request = read_message(&mut stream).await;
                    let response = (*respond)(&request);
                    requests.lock().unwrap().push(request);
                    let _ = stream.write_all(&response).await;
                    let _ = stream.shutdown().await;
                });
            }
        });

        Self {
            addr,
            hits,
            requests,
        }
    }

    /// 固定返回同一个响应。
    pub async fn fixed(response: &'static [u8]) -> Self {
        Self::spawn(move |_| response.to_vec()).await
    }

    /// 先发送 `head`，停顿 `pause` 后再发送 `tail`；`tail` 为 `None` 时保持连接但不再发送。
    pub async fn staged(head: &'static [u8], tail: Option<&'static [u8]>, pause: Duration) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let requests = Arc::new(Mutex::new(Vec::new()));

        let (hits_task, requests_task) = (Arc::clone(&hits), Arc::clone(&requests));
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                hits_task.fetch_add(1, Ordering::SeqCst);
                let requests = Arc::clone(&requests_task);
                tokio::spawn(async move {
                    let request = read_message(&mut stream).await;
                    requests.lock().unwrap().push(request);
                    let _ = stream.write_all(head).await;
                    let _ = stream.flush().await;
                    tokio::time::sleep(pause).await;
                    match tail {
                        Some(tail) => {
                            let _ = stream.write_all(tail).await;
                            let _ = stream.shutdown().await;
                        }
                        None => tokio::time::sleep(Duration::from_secs(10)).await,
                    }
                });
            }
        });

        Self {
            addr,
            hits,
            requests,
        }
    }

    /// 接受连接但永远不回复。
    pub async fn silent() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_task = Arc::clone(&hits);
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                hits_task.fetch_add(1, Ordering::SeqCst);
                held.push(stream);
            }
        });
        Self {
            addr,
            hits,
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<Vec<u8>> {
        self.requests.lock().unwrap().clone()
    }

    pub fn host(&self) -> String {
        format!("127.0.0.1:{}", self.addr.port())
    }
}

/// 通过代理发送一个完整请求，读到代理关闭连接为止。
pub async fn send_through(proxy: SocketAddr, request: &[u8]) -> Vec<u8> {
    let mut stream = TcpStream::connect(proxy).await.unwrap();
    stream.write_all(request).await.unwrap();
    read_until_close(&mut stream).await
}

pub async fn read_until_close(stream: &mut TcpStream) -> Vec<u8> {
    let mut response = Vec::new();
    // 设置硬超时限制，防止测试用例因代理挂起而永久阻塞
    let _ = tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut response))
        .await
        .expect("proxy did not close the connection in time");
    response
}

/// 一个端口上没有任何服务在监听的地址。
pub fn unused_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}
