// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 协议参数与常量模块
//!
//! 该模块定义了服务器遵循的 HTTP 协议相关常量和数据结构，包括：
//! - 服务器会用到的 HTTP 状态码及其原因短语（Reason Phrase）。
//! - 请求方法、协议版本的强类型枚举，以及方法到资源访问模式的映射。
//! - 配置项缺省值。

use std::collections::HashMap;
use lazy_static::lazy_static;

/// 服务器名称标识，用于 HTTP 响应头的 `Server` 字段
pub const SERVER_NAME: &str = "httpserver";

/// HTTP 协议规定的换行符（Carriage Return Line Feed）
pub const CRLF: &str = "\r\n";

/// 请求头与请求体之间的空行
pub const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

/// 读取请求头时使用的缓冲区大小
pub const DEFAULT_REQUEST_BUFFER_SIZE: usize = 2048;

/// 文件读写时的分块大小
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// 未在配置中指定时使用的工作线程数
pub const DEFAULT_WORKER_THREADS: usize = 4;

lazy_static! {
    /// HTTP 状态码与其对应的原因短语映射表。
    ///
    /// 只收录服务器实际会发出的状态码。
    pub static ref STATUS_CODES: HashMap<u16, &'static str> = {
        let mut map = HashMap::new();
        // 2xx: 成功响应 (Successful)
        map.insert(200, "OK");
        map.insert(201, "Created");

        // 4xx: 客户端错误 (Client Error)
        map.insert(400, "Bad Request");
        map.insert(403, "Forbidden");
        map.insert(404, "Not Found");

        // 5xx: 服务端错误 (Server Error)
        map.insert(500, "Internal Server Error");
        map.insert(501, "Not Implemented");
        map.insert(505, "Version Not Supported");
        map
    };
}

/// 支持的 HTTP 协议版本
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpVersion {
    /// HTTP/1.1 版本
    V1_1,
}

/// 服务器支持的 HTTP 请求方法
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpRequestMethod {
    /// 读取资源
    Get,
    /// 写入（创建或覆盖）资源
    Put,
}

/// 对单个资源的访问模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// 共享访问，对应读锁
    Read,
    /// 独占访问，对应写锁
    Write,
}

impl HttpRequestMethod {
    /// 请求方法需要的资源访问模式
    pub fn access(&self) -> Access {
        match self {
            HttpRequestMethod::Get => Access::Read,
            HttpRequestMethod::Put => Access::Write,
        }
    }
}

use std::fmt;

impl fmt::Display for HttpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            HttpVersion::V1_1 => write!(f, "HTTP/1.1"),
        }
    }
}

impl fmt::Display for HttpRequestMethod {
    /// 将枚举格式化为 HTTP 标准大写方法名
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            HttpRequestMethod::Get => write!(f, "GET"),
            HttpRequestMethod::Put => write!(f, "PUT"),
        }
    }
}
