// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 代理协议参数与常量模块
//!
//! 该模块集中定义了代理在解析、改写、转发 HTTP/1.1 报文时使用的协议常量。

use lazy_static::lazy_static;
use regex::Regex;

/// 代理名称标识，用于日志
pub const SERVER_NAME: &str = "shaneyale-proxy";

/// HTTP 协议规定的换行符（Carriage Return Line Feed）
pub const CRLF: &str = "\r\n";

/// 头部与报文体之间的分隔符
pub const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

/// 追加到上游请求中的转发标头，值为客户端原始 `Host` 中的 `host_name[:port]`
pub const FORWARDED_HOST_HEADER: &str = "X-Forwarded-Host";

/// `Host` 未携带端口时使用的上游端口
pub const DEFAULT_HTTP_PORT: u16 = 80;

/// 第一次读取的缓冲区大小，头部必须完整落在这一次读取之内
pub const DEFAULT_READ_BUFFER_SIZE: usize = 8000;

/// 报文体补全读取时每次使用的缓冲区大小
pub const BODY_CHUNK_SIZE: usize = 4096;

lazy_static! {
    /// `Cache-Control` 中的 `max-age=<秒数>` 指令，大小写不敏感。
    pub static ref MAX_AGE_PATTERN: Regex = Regex::new(r"(?i)max-age=(\d+)").unwrap();
}
