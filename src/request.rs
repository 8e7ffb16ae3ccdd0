// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # HTTP 请求编解码模块
//!
//! 该模块负责把客户端发来的原始字节解析为 `HttpRequest`，以及把改写后的请求重新序列化
//! 成发往上游的字节流。涵盖：
//! 1. 请求行的原样保留（它同时是缓存键的一部分）。
//! 2. 标头解析，保留插入顺序和原始大小写，支持旧式的折行续写。
//! 3. `Host` 标头解析为主机名与可选端口。
//! 4. 追加 `X-Forwarded-Host` 后的序列化。

use bytes::{BufMut, Bytes, BytesMut};
use log::error;

use crate::{exception::Exception, param::*, util::body_offset};

/// `Host` 标头解析后的结果。
///
/// 端口为 `None` 时由调用方补上 80，这里不保存默认值。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostInfo {
    host_name: String,
    port: Option<String>,
}

impl HostInfo {
    pub fn new(host_name: &str, port: Option<&str>) -> Self {
        Self {
            host_name: host_name.to_string(),
            port: port.map(|p| p.to_string()),
        }
    }

    pub fn host_name(&self) -> &str {
        &self.host_name
    }

    pub fn port(&self) -> Option<&str> {
        self.port.as_deref()
    }

    /// 上游实际使用的端口，未指定时为 80。端口不是合法数字时返回 `None`。
    pub fn port_or_default(&self) -> Option<u16> {
        match &self.port {
            Some(p) => p.parse::<u16>().ok(),
            None => Some(DEFAULT_HTTP_PORT),
        }
    }

    /// 用于地址解析的主机名，去掉 IPv6 字面量外层的方括号。
    pub fn resolvable_name(&self) -> &str {
        self.host_name
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(&self.host_name)
    }

    /// `host_name[:port]`，即转发标头的值。
    pub fn authority(&self) -> String {
        match &self.port {
            Some(p) => format!("{}:{}", self.host_name, p),
            None => self.host_name.clone(),
        }
    }
}

/// 有序的标头表。键区分大小写、保持首次插入的位置；重复插入同一个键时原地覆盖其值。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, value: &str) {
        match self.entries.iter_mut().find(|(k, _)| k == name) {
            Some(entry) => entry.1 = value.to_string(),
            None => self.entries.push((name.to_string(), value.to_string())),
        }
    }

    /// 按原始大小写精确查找。
    #[cfg(test)]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// 忽略大小写查找，供 `Host` 之类的语义标头使用。
    pub fn get_ignore_case(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    fn append_to_last(&mut self, continuation: &str) {
        if let Some(entry) = self.entries.last_mut() {
            entry.1.push_str(continuation);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// 解析完成的客户端请求。
///
/// 只有带着可解析 `Host` 的请求才能构造出来，因此状态机拿到的请求总能确定上游地址。
#[derive(Debug, Clone)]
pub struct HttpRequest {
    /// 原样保留的请求行，例如 `GET /a HTTP/1.1`
    request_line: String,
    headers: Headers,
    body: Bytes,
    host: HostInfo,
}

impl HttpRequest {
    /// 从原始字节解析请求。
    ///
    /// # 逻辑步骤
    /// 1. 以 `\r\n\r\n` 为界切分头部和报文体，头部必须是合法 UTF-8。
    /// 2. 第一行作为请求行原样保存。
    /// 3. 逐行解析标头：以空格或制表符开头的行续写到上一个标头的值上，含冒号的行开始一个新标头。
    /// 4. 解析 `Host`，缺失、为空或端口非法时返回 `MalformedRequest`。
    pub fn parse(buffer: &[u8], id: u128) -> Result<Self, Exception> {
        let (head, body) = match body_offset(buffer) {
            Some(offset) => (&buffer[..offset - HEADER_TERMINATOR.len()], &buffer[offset..]),
            None => (buffer, &[][..]),
        };

        let head = match std::str::from_utf8(head) {
            Ok(s) => s,
            Err(_) => {
                error!("[ID{}]请求头不是合法的UTF-8", id);
                return Err(Exception::RequestIsNotUtf8);
            }
        };

        let mut lines = head.split(CRLF);
        let request_line = match lines.next() {
            Some(line) if !line.trim().is_empty() => line.to_string(),
            _ => {
                error!("[ID{}]HTTP请求行缺失", id);
                return Err(Exception::MalformedRequest);
            }
        };

        let mut headers = Headers::new();
        for line in lines {
            if line.is_empty() {
                break;
            }
            if line.starts_with(' ') || line.starts_with('\t') {
                headers.append_to_last(line);
                continue;
            }
            if let Some((name, value)) = line.split_once(':') {
                headers.insert(name.trim(), value.trim());
            }
        }

        let host = match headers.get_ignore_case("Host").and_then(parse_host) {
            Some(host) => host,
            None => {
                error!("[ID{}]请求缺少可用的Host标头：{}", id, request_line);
                return Err(Exception::MalformedRequest);
            }
        };
        if host.port_or_default().is_none() {
            error!("[ID{}]Host标头中的端口非法：{}", id, host.authority());
            return Err(Exception::MalformedRequest);
        }

        Ok(Self {
            request_line,
            headers,
            body: Bytes::copy_from_slice(body),
            host,
        })
    }

    /// 序列化为发往上游的报文：原有标头按顺序复制，末尾追加转发标头。
    ///
    /// 格式为 `request_line CRLF (header ": " value CRLF)* CRLF body`。
    pub fn serialize(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.request_line.len() + 256 + self.body.len());
        buf.put_slice(self.request_line.as_bytes());
        buf.put_slice(CRLF.as_bytes());
        for (name, value) in self.headers.iter() {
            buf.put_slice(format!("{}: {}{}", name, value, CRLF).as_bytes());
        }
        buf.put_slice(
            format!("{}: {}{}", FORWARDED_HOST_HEADER, self.host.authority(), CRLF).as_bytes(),
        );
        buf.put_slice(CRLF.as_bytes());
        buf.put_slice(&self.body);
        buf.freeze()
    }

    /// 缓存键：目标地址加上原样的请求行。
    pub fn cache_key(&self) -> String {
        format!("{} {}", self.host.authority(), self.request_line)
    }
}

// --- Getter 访问器实现 ---

impl HttpRequest {
    pub fn request_line(&self) -> &str {
        &self.request_line
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn host(&self) -> &HostInfo {
        &self.host
    }
}

/// 解析 `Host` 标头的值。
///
/// 含冒号时拆分为主机名与端口，两边都去掉空白；否则整段作为主机名、端口为空。
/// 形如 `[::1]:8080` 的 IPv6 字面量在 `]` 之后的冒号处拆分。主机名为空时返回 `None`。
pub fn parse_host(text: &str) -> Option<HostInfo> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    let (host_name, port) = if text.starts_with('[') {
        match text.find(']') {
            Some(end) => {
                let rest = &text[end + 1..];
                let port = rest.strip_prefix(':').map(|p| p.trim());
                (&text[..=end], port)
            }
            None => return None,
        }
    } else {
        match text.split_once(':') {
            Some((name, port)) => (name.trim(), Some(port.trim())),
            None => (text, None),
        }
    };

    if host_name.is_empty() {
        return None;
    }
    Some(HostInfo::new(host_name, port))
}
