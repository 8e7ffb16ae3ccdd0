// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # Exception 模块
//!
//! 该模块定义了代理在一次转发事务（客户端连接 → 上游 → 客户端）中可能遇到的各类异常。
//!
//! 所有异常都只作用于单个连接：状态机在遇到任意一种异常时关闭该连接涉及的全部套接字，
//! 事件循环本身继续为其他连接服务。

use std::fmt;

/// 代理处理一次转发事务时发生的异常类型。
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Exception {
    /// 请求头部分无法解析为合法的 UTF-8 字符串。
    RequestIsNotUtf8,
    /// 请求行缺失，或者缺少可用的 `Host` 标头（为空、端口非法）。
    MalformedRequest,
    /// 对端在发送任何数据之前关闭了连接。
    PeerClosed,
    /// 第一次读取中没有找到头部结束标记（`\r\n\r\n`）。
    HeaderTooLarge,
    /// `Content-Length` 加上头部长度超出了可表示的范围。
    ContentLengthOverflow,
    /// 对端在发送完 `Content-Length` 声明的报文体之前关闭了连接。
    IncompleteBody,
    /// 等待剩余报文体超过了配置的期限。
    BodyReadTimeout,
    /// 无法把 `Host` 解析为任何套接字地址。
    UpstreamResolveFailure,
    /// 与上游建立连接失败（连接被拒绝、不可达等）。
    UpstreamConnectFailure,
    /// 等待上游响应超过了配置的期限。
    UpstreamTimeout,
    /// 读写套接字时发生了意料之外的 I/O 错误。
    ConnectionReset,
}

use Exception::*;

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestIsNotUtf8 => write!(f, "Request head can't be parsed in UTF-8"),
            MalformedRequest => write!(f, "Malformed request (missing request line or Host)"),
            PeerClosed => write!(f, "Peer closed the connection"),
            HeaderTooLarge => write!(f, "Header block not found in the first read"),
            ContentLengthOverflow => write!(f, "Declared Content-Length is out of range"),
            IncompleteBody => write!(f, "Peer closed before the declared body was complete"),
            BodyReadTimeout => write!(f, "Timed out waiting for the rest of the body"),
            UpstreamResolveFailure => write!(f, "Couldn't resolve upstream host"),
            UpstreamConnectFailure => write!(f, "Couldn't connect to upstream"),
            UpstreamTimeout => write!(f, "Timed out waiting for upstream"),
            ConnectionReset => write!(f, "Unexpected socket error"),
        }
    }
}
