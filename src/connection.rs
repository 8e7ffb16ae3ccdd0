// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 连接状态机
//!
//! 每个被接受的客户端连接对应一个 [`Connection`]。它持有客户端套接字、按需创建的上游套接字，
//! 以及当前状态。状态之间的推进只发生在事件循环分发就绪事件时：
//!
//! ```text
//! AwaitingRequest ──(缓存命中)──> RespondingFromCache ──> 关闭
//!        │
//!        └─(未命中)─> ConnectingUpstream ─> SendingUpstreamRequest
//!                       ─> AwaitingUpstreamResponse ─> ForwardingResponse ─> 关闭
//! ```
//!
//! 缓存查询是同步完成的，不单独占用一次事件。任何一步返回 `Err` 都意味着连接结束，
//! 由事件循环负责关闭两端套接字。

use std::io::{self, Write};
use std::net::ToSocketAddrs;
use std::time::Instant;

use bytes::{Buf, Bytes};
use log::{debug, info, warn};
use mio::{net::TcpStream, Interest, Registry, Token};

use crate::{
    cache::ResponseCache,
    config::Config,
    exception::Exception,
    reader::{MessageReader, ReadProgress},
    request::HttpRequest,
    util::{extract_header, format_byte_size, parse_max_age},
};

/// 注册表中一个令牌属于连接的哪一端。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Client,
    Upstream,
}

/// 一次事件处理之后连接的去向。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// 已经登记了下一次需要的就绪条件，等待事件循环再次分发。
    Continue,
    /// 事务正常结束，可以关闭两端。
    Close,
}

/// 状态机处理事件时需要的外部资源，由事件循环在每次分发时借出。
pub struct Context<'a> {
    pub registry: &'a Registry,
    pub cache: &'a mut ResponseCache,
    pub config: &'a Config,
    pub now: Instant,
}

enum State {
    AwaitingRequest {
        reader: MessageReader,
    },
    ConnectingUpstream {
        request: HttpRequest,
        cache_key: String,
    },
    SendingUpstreamRequest {
        pending: Bytes,
        cache_key: String,
    },
    AwaitingUpstreamResponse {
        reader: MessageReader,
        cache_key: String,
    },
    RespondingFromCache {
        pending: Bytes,
    },
    ForwardingResponse {
        pending: Bytes,
    },
    Closed,
}

pub struct Connection {
    id: u128,
    client: TcpStream,
    client_token: Token,
    upstream: Option<TcpStream>,
    upstream_token: Token,
    state: State,
    /// 当前等待的截止时间，以及到期时应当报告的异常
    deadline: Option<(Instant, Exception)>,
}

impl Connection {
    /// 包装一个刚被接受的客户端套接字，并登记读就绪。
    pub fn accept(
        id: u128,
        mut client: TcpStream,
        client_token: Token,
        upstream_token: Token,
        registry: &Registry,
        config: &Config,
    ) -> io::Result<Self> {
        registry.register(&mut client, client_token, Interest::READABLE)?;
        Ok(Self {
            id,
            client,
            client_token,
            upstream: None,
            upstream_token,
            state: State::AwaitingRequest {
                reader: MessageReader::new(config.read_buffer_size()),
            },
            deadline: None,
        })
    }

    pub fn id(&self) -> u128 {
        self.id
    }

    pub fn tokens(&self) -> (Token, Token) {
        (self.client_token, self.upstream_token)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline.map(|(at, _)| at)
    }

    /// 截止时间已过时应当报告的异常。
    pub fn expired(&self, now: Instant) -> Option<Exception> {
        match self.deadline {
            Some((at, exception)) if at <= now => Some(exception),
            _ => None,
        }
    }

    pub fn state_name(&self) -> &'static str {
        match self.state {
            State::AwaitingRequest { .. } => "AwaitingRequest",
            State::ConnectingUpstream { .. } => "ConnectingUpstream",
            State::SendingUpstreamRequest { .. } => "SendingUpstreamRequest",
            State::AwaitingUpstreamResponse { .. } => "AwaitingUpstreamResponse",
            State::RespondingFromCache { .. } => "RespondingFromCache",
            State::ForwardingResponse { .. } => "ForwardingResponse",
            State::Closed => "Closed",
        }
    }

    /// 分发一次就绪事件。
    ///
    /// 根据 (哪一端, 当前状态) 决定下一步。与当前状态无关的事件被忽略。
    pub fn ready(&mut self, side: Side, ctx: &mut Context) -> Result<Step, Exception> {
        let state = std::mem::replace(&mut self.state, State::Closed);
        match (side, state) {
            (Side::Client, State::AwaitingRequest { reader }) => self.on_client_readable(reader, ctx),
            (Side::Upstream, State::ConnectingUpstream { request, cache_key }) => {
                self.on_upstream_connected(request, cache_key, ctx)
            }
            (Side::Upstream, State::SendingUpstreamRequest { pending, cache_key }) => {
                self.send_upstream_request(pending, cache_key, ctx)
            }
            (Side::Upstream, State::AwaitingUpstreamResponse { reader, cache_key }) => {
                self.on_upstream_readable(reader, cache_key, ctx)
            }
            (Side::Client, State::RespondingFromCache { pending }) => {
                self.respond(pending, true, ctx)
            }
            (Side::Client, State::ForwardingResponse { pending }) => {
                self.respond(pending, false, ctx)
            }
            (_, state) => {
                self.state = state;
                Ok(Step::Continue)
            }
        }
    }

    fn on_client_readable(
        &mut self,
        mut reader: MessageReader,
        ctx: &mut Context,
    ) -> Result<Step, Exception> {
        let bytes = match reader.read_from(&mut self.client)? {
            ReadProgress::Pending => {
                if reader.awaiting_body() && self.deadline.is_none() {
                    debug!(
                        "[ID{}]请求体尚未收齐（已收到{}），等待剩余部分",
                        self.id,
                        format_byte_size(reader.received() as u64)
                    );
                    self.deadline =
                        Some((ctx.now + ctx.config.body_timeout(), Exception::BodyReadTimeout));
                }
                self.state = State::AwaitingRequest { reader };
                return Ok(Step::Continue);
            }
            ReadProgress::Complete(bytes) => bytes,
        };
        self.deadline = None;
        debug!("[ID{}]HTTP请求接收完毕", self.id);

        let request = HttpRequest::parse(&bytes, self.id)?;
        debug!("[ID{}]成功解析HTTP请求：{}", self.id, request.request_line());

        self.lookup_cache(request, ctx)
    }

    /// 同步的缓存查询：命中则直接回复客户端，否则开始连接上游。
    fn lookup_cache(&mut self, request: HttpRequest, ctx: &mut Context) -> Result<Step, Exception> {
        let cache_key = request.cache_key();
        match ctx.cache.lookup(&cache_key, ctx.now) {
            Some(cached) => {
                info!("[ID{}]缓存命中：{}", self.id, cache_key);
                self.respond(cached, true, ctx)
            }
            None => {
                debug!("[ID{}]缓存未命中：{}", self.id, cache_key);
                self.connect_upstream(request, cache_key, ctx)
            }
        }
    }

    fn connect_upstream(
        &mut self,
        request: HttpRequest,
        cache_key: String,
        ctx: &mut Context,
    ) -> Result<Step, Exception> {
        let host = request.host();
        let port = host.port_or_default().ok_or(Exception::MalformedRequest)?;
        let addr = (host.resolvable_name(), port)
            .to_socket_addrs()
            .ok()
            .and_then(|mut addrs| addrs.next())
            .ok_or_else(|| {
                warn!("[ID{}]无法解析上游地址：{}", self.id, host.authority());
                Exception::UpstreamResolveFailure
            })?;

        let mut upstream = TcpStream::connect(addr).map_err(|e| {
            warn!("[ID{}]连接上游{}失败：{}", self.id, addr, e);
            Exception::UpstreamConnectFailure
        })?;
        ctx.registry
            .register(&mut upstream, self.upstream_token, Interest::WRITABLE)
            .map_err(|_| Exception::ConnectionReset)?;
        self.upstream = Some(upstream);
        debug!("[ID{}]正在连接上游{}", self.id, addr);

        self.deadline = ctx
            .config
            .upstream_timeout()
            .map(|t| (ctx.now + t, Exception::UpstreamTimeout));
        self.state = State::ConnectingUpstream { request, cache_key };
        Ok(Step::Continue)
    }

    fn on_upstream_connected(
        &mut self,
        request: HttpRequest,
        cache_key: String,
        ctx: &mut Context,
    ) -> Result<Step, Exception> {
        let upstream = self.upstream.as_mut().ok_or(Exception::UpstreamConnectFailure)?;
        match upstream.take_error() {
            Ok(None) => {}
            Ok(Some(e)) | Err(e) => {
                warn!("[ID{}]上游连接失败：{}", self.id, e);
                return Err(Exception::UpstreamConnectFailure);
            }
        }
        match upstream.peer_addr() {
            Ok(_) => {}
            // 连接仍在进行中，等待下一次写就绪
            Err(e) if e.kind() == io::ErrorKind::NotConnected => {
                self.state = State::ConnectingUpstream { request, cache_key };
                return Ok(Step::Continue);
            }
            Err(e) => {
                warn!("[ID{}]上游连接失败：{}", self.id, e);
                return Err(Exception::UpstreamConnectFailure);
            }
        }
        debug!("[ID{}]上游连接已建立", self.id);

        let pending = request.serialize();
        self.send_upstream_request(pending, cache_key, ctx)
    }

    fn send_upstream_request(
        &mut self,
        mut pending: Bytes,
        cache_key: String,
        ctx: &mut Context,
    ) -> Result<Step, Exception> {
        let upstream = self.upstream.as_mut().ok_or(Exception::ConnectionReset)?;
        if !drain(upstream, &mut pending)? {
            self.state = State::SendingUpstreamRequest { pending, cache_key };
            return Ok(Step::Continue);
        }
        debug!("[ID{}]请求已发往上游", self.id);

        ctx.registry
            .reregister(upstream, self.upstream_token, Interest::READABLE)
            .map_err(|_| Exception::ConnectionReset)?;
        self.deadline = ctx
            .config
            .upstream_timeout()
            .map(|t| (ctx.now + t, Exception::UpstreamTimeout));
        self.state = State::AwaitingUpstreamResponse {
            reader: MessageReader::new(ctx.config.read_buffer_size()),
            cache_key,
        };
        Ok(Step::Continue)
    }

    fn on_upstream_readable(
        &mut self,
        mut reader: MessageReader,
        cache_key: String,
        ctx: &mut Context,
    ) -> Result<Step, Exception> {
        let upstream = self.upstream.as_mut().ok_or(Exception::ConnectionReset)?;
        let response = match reader.read_from(upstream)? {
            ReadProgress::Pending => {
                let waiting_body = matches!(self.deadline, Some((_, Exception::BodyReadTimeout)));
                if reader.awaiting_body() && !waiting_body {
                    self.deadline =
                        Some((ctx.now + ctx.config.body_timeout(), Exception::BodyReadTimeout));
                }
                self.state = State::AwaitingUpstreamResponse { reader, cache_key };
                return Ok(Step::Continue);
            }
            ReadProgress::Complete(bytes) => bytes,
        };
        self.deadline = None;
        debug!(
            "[ID{}]上游响应接收完毕，长度：{}",
            self.id,
            format_byte_size(response.len() as u64)
        );

        if let Some(max_age) = extract_header("Cache-Control", &response, parse_max_age) {
            debug!("[ID{}]缓存响应{}，max-age={}", self.id, cache_key, max_age);
            ctx.cache.store(&cache_key, max_age, response.clone(), ctx.now);
        }

        self.respond(response, false, ctx)
    }

    /// 把字节写回客户端，写完即结束事务；写不完则登记写就绪，下次继续。
    fn respond(
        &mut self,
        mut pending: Bytes,
        from_cache: bool,
        ctx: &mut Context,
    ) -> Result<Step, Exception> {
        if drain(&mut self.client, &mut pending)? {
            debug!("[ID{}]响应已发送给客户端", self.id);
            return Ok(Step::Close);
        }
        ctx.registry
            .reregister(&mut self.client, self.client_token, Interest::WRITABLE)
            .map_err(|_| Exception::ConnectionReset)?;
        self.state = if from_cache {
            State::RespondingFromCache { pending }
        } else {
            State::ForwardingResponse { pending }
        };
        Ok(Step::Continue)
    }

    /// 注销并关闭两端套接字。无论事务从哪条路径结束都必须调用。
    pub fn close(&mut self, registry: &Registry) {
        self.state = State::Closed;
        self.deadline = None;
        if let Some(mut upstream) = self.upstream.take() {
            let _ = registry.deregister(&mut upstream);
        }
        let _ = registry.deregister(&mut self.client);
    }
}

/// 尽可能把 `pending` 写入 `stream`。全部写完返回 `true`，遇到 `WouldBlock` 返回 `false`。
fn drain<W: Write>(stream: &mut W, pending: &mut Bytes) -> Result<bool, Exception> {
    while !pending.is_empty() {
        match stream.write(pending) {
            Ok(0) => return Err(Exception::ConnectionReset),
            Ok(n) => pending.advance(n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(_) => return Err(Exception::ConnectionReset),
        }
    }
    Ok(true)
}
