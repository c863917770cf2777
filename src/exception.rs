// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # Exception 模块
//!
//! 该模块定义了服务器在启动、调度与请求处理过程中可能出现的各类异常情况。
//!
//! ## 分类
//! - **契约违例**：队列已关闭、未登记的资源名、未配对的解锁。以错误值返回给调用方，内部计数保持一致。
//! - **单请求失败**：请求解析失败、文件读写失败。只影响当前连接，映射为对应的 HTTP 状态码。
//! - **初始化失败**：配置、日志、Socket、队列、线程创建失败。在 `main` 中视为致命错误。

use std::fmt;

/// 服务器运行过程中发生的异常类型。
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Exception {
    /// 请求头无法解析为合法的 UTF-8 字符串。
    RequestIsNotUtf8,
    /// 请求行或标头不符合格式要求，对应 `400 Bad Request`。
    MalformedRequest,
    /// 请求方法不是 GET/PUT，对应 `501 Not Implemented`。
    UnSupportedRequestMethod,
    /// 协议版本不是 HTTP/1.1，对应 `505 Version Not Supported`。
    UnsupportedHttpVersion,
    /// 资源不存在，对应 `404 Not Found`。
    FileNotFound,
    /// 资源是目录或无访问权限，对应 `403 Forbidden`。
    Forbidden,
    /// 文件读写失败，对应 `500 Internal Server Error`。
    InternalError,
    /// 响应头已经发出后传输中断，无法再发送第二个响应。
    TransferInterrupted,
    /// 队列已被关闭。
    QueueClosed,
    /// 队列容量必须至少为 1。
    InvalidCapacity,
    /// 注册表中不存在该资源。
    UnknownResource,
    /// 解锁前没有对应的加锁。
    UnmatchedUnlock,
    /// 配置文件无法读取。
    ConfigError,
    /// 日志系统初始化失败。
    LoggerInitFailed,
    /// 无法绑定监听端口。
    BindFailed,
    /// 无法创建工作线程。
    ThreadSpawnFailed,
}

use Exception::*;

impl Exception {
    /// 返回该异常在响应中对应的 HTTP 状态码。
    ///
    /// 不对应任何响应的异常返回 `None`。
    pub fn status_code(&self) -> Option<u16> {
        match self {
            RequestIsNotUtf8 | MalformedRequest => Some(400),
            Forbidden => Some(403),
            FileNotFound => Some(404),
            InternalError => Some(500),
            UnSupportedRequestMethod => Some(501),
            UnsupportedHttpVersion => Some(505),
            _ => None,
        }
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestIsNotUtf8 => write!(f, "Request bytes can't be parsed in UTF-8"),
            MalformedRequest => write!(f, "Malformed request (400)"),
            UnSupportedRequestMethod => write!(f, "Unsupported request method (501)"),
            UnsupportedHttpVersion => write!(f, "Unsupported HTTP version (505)"),
            FileNotFound => write!(f, "File not found (404)"),
            Forbidden => write!(f, "Forbidden (403)"),
            InternalError => write!(f, "Internal server error (500)"),
            TransferInterrupted => write!(f, "Transfer interrupted after the header was sent"),
            QueueClosed => write!(f, "Queue is closed"),
            InvalidCapacity => write!(f, "Queue capacity must be at least 1"),
            UnknownResource => write!(f, "Resource is not registered"),
            UnmatchedUnlock => write!(f, "Unlock without a matching lock"),
            ConfigError => write!(f, "Couldn't read the configuration file"),
            LoggerInitFailed => write!(f, "Couldn't initialize the logger"),
            BindFailed => write!(f, "Couldn't bind the listening socket"),
            ThreadSpawnFailed => write!(f, "Couldn't spawn a server thread"),
        }
    }
}

impl std::error::Error for Exception {}
