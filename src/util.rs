use crate::param::{HEADER_TERMINATOR, MAX_AGE_PATTERN};

/// 在 `haystack` 中查找 `needle` 第一次出现的位置。
pub fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// 返回头部结束标记之后第一个字节的下标（即报文体的起始位置）。
pub fn body_offset(raw: &[u8]) -> Option<usize> {
    find_subsequence(raw, HEADER_TERMINATOR).map(|pos| pos + HEADER_TERMINATOR.len())
}

/// 从原始报文中提取指定标头的值。
///
/// 只扫描头部各行（遇到空行即停止），标头名大小写不敏感。取第一个冒号之后的文本，
/// 去掉首尾空白后交给 `value_parser`。标头不存在或者解析失败时返回 `None`。
///
/// 请求与响应共用这一个函数：`Content-Length` 使用 [`parse_content_length`]，
/// `Cache-Control` 使用 [`parse_max_age`]。
pub fn extract_header<T, F>(name: &str, raw: &[u8], value_parser: F) -> Option<T>
where
    F: Fn(&str) -> Option<T>,
{
    let head = match find_subsequence(raw, HEADER_TERMINATOR) {
        Some(pos) => &raw[..pos],
        None => raw,
    };
    let text = String::from_utf8_lossy(head);
    // 第一行是请求行/状态行，不参与匹配
    for line in text.split("\r\n").skip(1) {
        if line.is_empty() {
            break;
        }
        let (field, value) = match line.split_once(':') {
            Some(pair) => pair,
            None => continue,
        };
        if field.eq_ignore_ascii_case(name) {
            return value_parser(value.trim());
        }
    }
    None
}

pub fn parse_content_length(value: &str) -> Option<usize> {
    value.parse::<usize>().ok()
}

/// 从 `Cache-Control` 的值中取出 `max-age` 秒数。
pub fn parse_max_age(value: &str) -> Option<u64> {
    MAX_AGE_PATTERN
        .captures(value)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<u64>().ok())
}

pub fn format_byte_size(size: u64) -> String {
    let units = ["B", "KB", "MB", "GB", "TB"];
    let mut size = size as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < units.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.1} {}", size, units[unit_index])
}
