// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # HTTP 请求分类模块
//!
//! 负责把从 TCP 流中读到的原始字节归类为 `{方法, 资源名, Content-Length}`，
//! 或者给出拒绝原因：
//! 1. 请求行格式错误、标头格式错误、非 UTF-8 → 400；
//! 2. 方法不是 GET/PUT → 501；
//! 3. 版本不是 HTTP/1.1 → 505。
//!
//! 请求行要求资源名由 2 到 63 个 `[a-zA-Z0-9.-]` 字符组成，不含子目录，
//! 因此资源名天然不会越出服务根目录。

use crate::{exception::Exception, param::*};

use lazy_static::lazy_static;
use log::{debug, error};
use regex::Regex;

use std::io::{self, Read};

lazy_static! {
    static ref REQUEST_LINE: Regex =
        Regex::new(r"^([a-zA-Z]{1,8}) /([a-zA-Z0-9.-]{2,63}) (HTTP/[0-9]\.[0-9])$").unwrap();
    static ref HEADER_LINE: Regex =
        Regex::new(r"^([a-zA-Z0-9.-]{1,128}): ([^\r\n]{1,128})$").unwrap();
}

/// 一个已通过分类的请求。
#[derive(Debug, Clone)]
pub struct Request {
    method: HttpRequestMethod,
    /// 去掉开头 `/` 之后的资源名
    uri: String,
    version: HttpVersion,
    /// 请求体长度，GET 请求缺省为 0
    content_length: u64,
    /// 客户端附带的 `Request-Id`，缺省为 0，仅用于审计日志
    request_id: i64,
    /// 请求头（含结尾空行）的字节数，之后的字节属于请求体
    head_len: usize,
}

/// 从流中读取请求头。
///
/// 读到空行、流结束或缓冲区写满即停止。返回读到的全部字节，
/// 其中可能包含请求体的开头部分。
pub fn read_head<R: Read>(stream: &mut R, capacity: usize) -> io::Result<Vec<u8>> {
    let mut buffer = vec![0u8; capacity];
    let mut filled = 0;
    while filled < capacity {
        let n = match stream.read(&mut buffer[filled..]) {
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        if n == 0 {
            break;
        }
        // 终止符可能跨越两次读取
        let from = filled.saturating_sub(HEADER_TERMINATOR.len() - 1);
        filled += n;
        if find_terminator(&buffer[from..filled]).is_some() {
            break;
        }
    }
    buffer.truncate(filled);
    Ok(buffer)
}

fn find_terminator(bytes: &[u8]) -> Option<usize> {
    bytes
        .windows(HEADER_TERMINATOR.len())
        .position(|w| w == HEADER_TERMINATOR)
}

impl Request {
    /// 从原始字节缓冲区尝试构建 `Request` 实例。
    ///
    /// # 参数
    /// * `buffer` - `read_head` 读到的字节。
    /// * `id` - 连接 ID，用于在多线程环境下追踪日志。
    pub fn try_from(buffer: &[u8], id: u128) -> Result<Self, Exception> {
        let head_len = match find_terminator(buffer) {
            Some(pos) => pos + HEADER_TERMINATOR.len(),
            None => {
                error!("[ID{}]请求头不完整", id);
                return Err(Exception::MalformedRequest);
            }
        };

        let head = match std::str::from_utf8(&buffer[..head_len - HEADER_TERMINATOR.len()]) {
            Ok(s) => s,
            Err(_) => {
                error!("[ID{}]无法解析HTTP请求", id);
                return Err(Exception::RequestIsNotUtf8);
            }
        };

        let mut lines = head.split(CRLF);
        let request_line = lines.next().unwrap_or("");
        let captures = match REQUEST_LINE.captures(request_line) {
            Some(c) => c,
            None => {
                error!("[ID{}]HTTP请求行格式不正确：{}", id, request_line);
                return Err(Exception::MalformedRequest);
            }
        };

        let method = match &captures[1] {
            "GET" => HttpRequestMethod::Get,
            "PUT" => HttpRequestMethod::Put,
            other => {
                error!("[ID{}]不支持的HTTP请求方法：{}", id, other);
                return Err(Exception::UnSupportedRequestMethod);
            }
        };
        let uri = captures[2].to_string();
        let version = match &captures[3] {
            "HTTP/1.1" => HttpVersion::V1_1,
            other => {
                error!("[ID{}]不支持的HTTP协议版本：{}", id, other);
                return Err(Exception::UnsupportedHttpVersion);
            }
        };

        let mut content_length = None;
        let mut request_id = 0;
        for line in lines {
            let header = match HEADER_LINE.captures(line) {
                Some(c) => c,
                None => {
                    error!("[ID{}]HTTP标头格式不正确：{}", id, line);
                    return Err(Exception::MalformedRequest);
                }
            };
            let (key, value) = (&header[1], &header[2]);
            if key.eq_ignore_ascii_case("Content-Length") {
                match value.parse::<u64>() {
                    Ok(len) if value.bytes().all(|b| b.is_ascii_digit()) => {
                        content_length = Some(len)
                    }
                    _ => {
                        error!("[ID{}]非法的Content-Length：{}", id, value);
                        return Err(Exception::MalformedRequest);
                    }
                }
            } else if key.eq_ignore_ascii_case("Request-Id") {
                request_id = value.parse().unwrap_or(0);
            }
        }

        if method == HttpRequestMethod::Put && content_length.is_none() {
            error!("[ID{}]PUT请求缺少Content-Length", id);
            return Err(Exception::MalformedRequest);
        }

        debug!("[ID{}]请求分类完成：{} /{}", id, method, uri);
        Ok(Self {
            method,
            uri,
            version,
            content_length: content_length.unwrap_or(0),
            request_id,
            head_len,
        })
    }
}

// --- Getter 访问器实现 ---

impl Request {
    pub fn method(&self) -> HttpRequestMethod {
        self.method
    }

    /// 资源名（不含开头的 `/`）
    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn version(&self) -> HttpVersion {
        self.version
    }

    pub fn content_length(&self) -> u64 {
        self.content_length
    }

    pub fn request_id(&self) -> i64 {
        self.request_id
    }

    pub fn head_len(&self) -> usize {
        self.head_len
    }
}
