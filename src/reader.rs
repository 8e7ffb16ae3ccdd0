//! # 报文分帧读取器
//!
//! 从非阻塞套接字中读取一条完整的 HTTP 报文，客户端请求和上游响应共用同一套规则：
//! 1. 第一次读取最多取 `first_read_size` 字节，头部结束标记必须出现在这一次读取里。
//! 2. 根据 `Content-Length` 计算报文总长度（缺省为 0）。
//! 3. 报文体不完整时，在之后的可读事件中继续追加，直到长度足够或对端关闭。
//!
//! 读取器本身不会阻塞，也不会改变套接字的阻塞模式。等待剩余报文体的期限由事件循环负责，
//! 见 [`MessageReader::awaiting_body`]。

use std::io::{self, Read};

use bytes::{Bytes, BytesMut};

use crate::{
    exception::Exception,
    param::BODY_CHUNK_SIZE,
    util::{body_offset, extract_header, parse_content_length},
};

/// 一次读取尝试的结果。
#[derive(Debug, PartialEq, Eq)]
pub enum ReadProgress {
    /// 暂时没有更多数据，等待下一次可读事件。
    Pending,
    /// 报文完整，内容为读到的全部原始字节。
    Complete(Bytes),
}

pub struct MessageReader {
    buffer: BytesMut,
    first_read_size: usize,
    /// 头部分帧完成后确定的报文总长度（头部 + 报文体）
    expected_len: Option<usize>,
}

impl MessageReader {
    pub fn new(first_read_size: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(first_read_size),
            first_read_size,
            expected_len: None,
        }
    }

    /// 头部已经找到、但报文体还没收齐。
    pub fn awaiting_body(&self) -> bool {
        matches!(self.expected_len, Some(expected) if self.buffer.len() < expected)
    }

    pub fn received(&self) -> usize {
        self.buffer.len()
    }

    /// 从 `src` 读取尽可能多的数据，直到报文完整或者 `src` 返回 `WouldBlock`。
    pub fn read_from<R: Read>(&mut self, src: &mut R) -> Result<ReadProgress, Exception> {
        let expected = match self.expected_len {
            Some(expected) => expected,
            None => match self.read_head(src)? {
                Some(expected) => expected,
                None => return Ok(ReadProgress::Pending),
            },
        };

        let mut chunk = [0u8; BODY_CHUNK_SIZE];
        while self.buffer.len() < expected {
            match src.read(&mut chunk) {
                Ok(0) => return Err(Exception::IncompleteBody),
                Ok(n) => self.buffer.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(ReadProgress::Pending)
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => return Err(Exception::ConnectionReset),
            }
        }

        self.expected_len = None;
        Ok(ReadProgress::Complete(self.buffer.split().freeze()))
    }

    /// 第一次读取：找到头部结束标记并确定报文总长度。
    fn read_head<R: Read>(&mut self, src: &mut R) -> Result<Option<usize>, Exception> {
        let mut first = vec![0u8; self.first_read_size];
        let n = loop {
            match src.read(&mut first) {
                Ok(0) => return Err(Exception::PeerClosed),
                Ok(n) => break n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => return Err(Exception::ConnectionReset),
            }
        };
        self.buffer.extend_from_slice(&first[..n]);

        let offset = body_offset(&self.buffer).ok_or(Exception::HeaderTooLarge)?;
        let content_length =
            extract_header("Content-Length", &self.buffer, parse_content_length).unwrap_or(0);
        let expected = offset
            .checked_add(content_length)
            .ok_or(Exception::ContentLengthOverflow)?;
        self.expected_len = Some(expected);
        Ok(Some(expected))
    }
}
