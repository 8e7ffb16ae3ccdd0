// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 单线程事件循环
//!
//! `Server` 是整个代理唯一的调度者：它持有监听套接字、注册表（令牌 → 连接与端）、
//! 全部在途连接以及响应缓存，在一个线程里反复执行
//! “等待就绪 → 分发给对应连接的状态机 → 处理到期的截止时间”。
//!
//! 单个连接的任何失败都在分发边界上被记录并关闭该连接，事件循环继续为其他连接服务。

use std::collections::HashMap;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use mio::{net::TcpListener, Events, Interest, Poll, Token};
use socket2::{Domain, Protocol, Socket, Type};

use crate::{
    cache::ResponseCache,
    config::Config,
    connection::{Connection, Context, Side, Step},
    exception::Exception,
    param::SERVER_NAME,
};

const LISTENER: Token = Token(0);

/// 时间来源。缓存新鲜度和各类截止时间都通过它取当前时刻。
pub trait Clock {
    fn now(&self) -> Instant;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

pub struct Server<C: Clock = SystemClock> {
    poll: Poll,
    listener: TcpListener,
    config: Config,
    cache: ResponseCache,
    clock: C,
    connections: HashMap<u128, Connection>,
    registrations: HashMap<Token, (u128, Side)>,
    next_token: usize,
    next_id: u128,
}

impl Server<SystemClock> {
    pub fn bind(config: Config) -> io::Result<Self> {
        Self::with_clock(config, SystemClock)
    }
}

impl<C: Clock> Server<C> {
    /// 绑定监听地址并创建事件循环。
    ///
    /// 监听套接字开启地址复用，积压队列长度取自配置。
    pub fn with_clock(config: Config, clock: C) -> io::Result<Self> {
        let addr = (config.address(), config.port())
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("无法解析监听地址：{}:{}", config.address(), config.port()),
                )
            })?;
        let mut listener = build_listener(addr, config.backlog())?;

        let poll = Poll::new()?;
        poll.registry()
            .register(&mut listener, LISTENER, Interest::READABLE)?;
        info!("{}已在{}上监听", SERVER_NAME, listener.local_addr()?);

        let cache = ResponseCache::from_capacity(config.cache_capacity());
        Ok(Self {
            poll,
            listener,
            config,
            cache,
            clock,
            connections: HashMap::new(),
            registrations: HashMap::new(),
            next_token: 1,
            next_id: 0,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    #[cfg(test)]
    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    #[cfg(test)]
    pub fn active_connections(&self) -> usize {
        self.connections.len()
    }

    /// 主事件循环，只有在轮询本身失败时才返回。
    pub fn run(&mut self) -> io::Result<()> {
        let mut events = Events::with_capacity(self.config.max_events());
        loop {
            self.turn(&mut events)?;
        }
    }

    /// 执行一轮：等待就绪或最近的截止时间，分发全部事件，然后处理到期连接。
    pub fn turn(&mut self, events: &mut Events) -> io::Result<()> {
        let timeout = self.next_timeout();
        match self.poll.poll(events, timeout) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(()),
            Err(e) => {
                error!("轮询失败：{}", e);
                return Err(e);
            }
        }

        for event in events.iter() {
            match event.token() {
                LISTENER => self.accept(),
                token => self.dispatch(token),
            }
        }
        self.expire();
        Ok(())
    }

    fn accept(&mut self) {
        loop {
            let (stream, addr) = match self.listener.accept() {
                Ok(pair) => pair,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!("接受连接失败：{}", e);
                    return;
                }
            };

            let id = self.next_id;
            self.next_id += 1;
            let client_token = self.allocate_token();
            let upstream_token = self.allocate_token();

            match Connection::accept(
                id,
                stream,
                client_token,
                upstream_token,
                self.poll.registry(),
                &self.config,
            ) {
                Ok(connection) => {
                    debug!("[ID{}]新的连接：{}", id, addr);
                    self.registrations.insert(client_token, (id, Side::Client));
                    self.registrations.insert(upstream_token, (id, Side::Upstream));
                    self.connections.insert(id, connection);
                }
                Err(e) => error!("[ID{}]注册客户端套接字失败：{}", id, e),
            }
        }
    }

    fn allocate_token(&mut self) -> Token {
        let token = Token(self.next_token);
        self.next_token = self.next_token.wrapping_add(1).max(1);
        token
    }

    /// 把一个就绪事件交给对应连接的状态机，并在分发边界上处理它的结果。
    fn dispatch(&mut self, token: Token) {
        let (id, side) = match self.registrations.get(&token) {
            Some(entry) => *entry,
            None => return,
        };
        let connection = match self.connections.get_mut(&id) {
            Some(c) => c,
            None => return,
        };

        let state = connection.state_name();
        let mut ctx = Context {
            registry: self.poll.registry(),
            cache: &mut self.cache,
            config: &self.config,
            now: self.clock.now(),
        };
        match connection.ready(side, &mut ctx) {
            Ok(Step::Continue) => {}
            Ok(Step::Close) => self.close(id),
            Err(e) => {
                log_exception(id, state, e);
                self.close(id);
            }
        }
    }

    fn next_timeout(&self) -> Option<Duration> {
        let now = self.clock.now();
        self.connections
            .values()
            .filter_map(|c| c.deadline())
            .min()
            .map(|deadline| deadline.saturating_duration_since(now))
    }

    fn expire(&mut self) {
        let now = self.clock.now();
        let expired: Vec<(u128, Exception)> = self
            .connections
            .values()
            .filter_map(|c| c.expired(now).map(|e| (c.id(), e)))
            .collect();
        for (id, exception) in expired {
            if let Some(connection) = self.connections.get(&id) {
                log_exception(id, connection.state_name(), exception);
            }
            self.close(id);
        }
    }

    fn close(&mut self, id: u128) {
        if let Some(mut connection) = self.connections.remove(&id) {
            let (client_token, upstream_token) = connection.tokens();
            self.registrations.remove(&client_token);
            self.registrations.remove(&upstream_token);
            connection.close(self.poll.registry());
            debug!("[ID{}]连接已关闭", id);
        }
    }
}

fn log_exception(id: u128, state: &str, exception: Exception) {
    match exception {
        Exception::PeerClosed => debug!("[ID{}]{}：{}", id, state, exception),
        Exception::UpstreamConnectFailure
        | Exception::UpstreamResolveFailure
        | Exception::UpstreamTimeout
        | Exception::BodyReadTimeout => warn!("[ID{}]{}：{}", id, state, exception),
        _ => error!("[ID{}]{}：{}", id, state, exception),
    }
}

fn build_listener(addr: SocketAddr, backlog: i32) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;
    socket.set_nonblocking(true)?;
    let std_listener: std::net::TcpListener = socket.into();
    Ok(TcpListener::from_std(std_listener))
}
