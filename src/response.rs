//! # HTTP 响应构建模块
//!
//! 响应格式固定为状态行加 `Content-Length`、`Date`、`Server` 三个标头。
//! 错误响应与 PUT 响应的正文是原因短语加换行；GET 成功时只构建响应头，
//! 文件内容由存储层在其后分块写出。

use crate::{exception::Exception, param::*};

use bytes::Bytes;
use chrono::prelude::*;
use log::error;

#[derive(Debug, Clone)]
pub struct Response {
    version: HttpVersion,
    status_code: u16,
    information: String,
    content_length: u64,
    date: DateTime<Utc>,
    server_name: String,
    content: Option<Bytes>,
}

impl Response {
    pub fn new() -> Self {
        Self {
            version: HttpVersion::V1_1,
            status_code: 200,
            information: "OK".to_string(),
            content_length: 0,
            date: Utc::now(),
            server_name: SERVER_NAME.to_string(),
            content: None,
        }
    }

    /// 以原因短语为正文的响应，用于错误以及 PUT 的 200/201
    pub fn from_status_code(code: u16) -> Self {
        let mut response = Self::new();
        response.set_code(code);
        let body = Bytes::from(format!("{}\n", response.information));
        response.content_length = body.len() as u64;
        response.content = Some(body);
        response
    }

    /// 只有响应头的响应，正文由调用方随后写出
    pub fn header_only(code: u16, content_length: u64) -> Self {
        let mut response = Self::new();
        response.set_code(code);
        response.content_length = content_length;
        response
    }

    /// 异常对应的错误响应；不对应状态码的异常返回 `None`
    pub fn from_exception(exception: Exception) -> Option<Self> {
        exception.status_code().map(Self::from_status_code)
    }

    fn set_code(&mut self, code: u16) -> &mut Self {
        self.status_code = code;
        self.information = match STATUS_CODES.get(&code) {
            Some(&info) => info.to_string(),
            None => {
                error!("非法的状态码：{}。这条错误说明代码编写出现了错误。", code);
                "Unknown".to_string()
            }
        };
        self
    }

    pub fn as_bytes(&self) -> Vec<u8> {
        let header = format!(
            "{} {} {}{crlf}Content-Length: {}{crlf}Date: {}{crlf}Server: {}{crlf}{crlf}",
            self.version,
            self.status_code,
            self.information,
            self.content_length,
            format_date(&self.date),
            self.server_name,
            crlf = CRLF,
        );
        let body: &[u8] = match &self.content {
            Some(c) => c.as_ref(),
            None => &[],
        };
        [header.as_bytes(), body].concat()
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new()
    }
}

impl Response {
    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    pub fn information(&self) -> &str {
        &self.information
    }

    pub fn content_length(&self) -> u64 {
        self.content_length
    }
}

fn format_date(date: &DateTime<Utc>) -> String {
    date.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}
