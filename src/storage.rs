//! # 存储层
//!
//! 调度层通过 `Storage` trait 执行 GET/PUT 的实际读写，本身不关心文件系统细节。
//! 调用方负责在调用前后加解对应资源的读写锁。
//!
//! `FileStorage` 把资源名映射为 `www_root` 下的同名文件：
//! - GET：目录或无权限 → 403，不存在 → 404，成功时写出响应头并分块发送文件；
//! - PUT：文件已存在则截断重写（200），不存在则创建（201）。

use crate::{exception::Exception, response::Response};

use log::{debug, error, warn};

use std::{
    fs::{File, OpenOptions},
    io::{self, Read, Write},
    path::{Path, PathBuf},
};

/// 一次读写的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transfer {
    pub status_code: u16,
    /// 实际传输的正文字节数
    pub bytes: u64,
}

/// 资源的后端存储
pub trait Storage: Send + Sync {
    /// 把资源内容作为完整的响应（响应头 + 正文）写入 `sink`。
    ///
    /// 返回错误时尚未写出任何字节，`TransferInterrupted` 除外。
    fn get(&self, name: &str, sink: &mut dyn Write, id: u128) -> Result<Transfer, Exception>;

    /// 从 `body` 读取 `content_length` 字节写入资源。不写响应。
    fn put(
        &self,
        name: &str,
        body: &mut dyn Read,
        content_length: u64,
        id: u128,
    ) -> Result<Transfer, Exception>;
}

/// 以本地目录为根的文件存储
pub struct FileStorage {
    root: PathBuf,
    chunk_size: usize,
}

impl FileStorage {
    pub fn new<P: AsRef<Path>>(root: P, chunk_size: usize) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn open_error(&self, e: &io::Error, name: &str, id: u128) -> Exception {
        match e.kind() {
            io::ErrorKind::NotFound => Exception::FileNotFound,
            io::ErrorKind::PermissionDenied => Exception::Forbidden,
            _ => {
                error!("[ID{}]打开{}失败：{}", id, name, e);
                Exception::InternalError
            }
        }
    }
}

impl Storage for FileStorage {
    fn get(&self, name: &str, sink: &mut dyn Write, id: u128) -> Result<Transfer, Exception> {
        let path = self.root.join(name);
        let mut file = File::open(&path).map_err(|e| self.open_error(&e, name, id))?;
        let metadata = match file.metadata() {
            Ok(m) => m,
            Err(e) => {
                error!("[ID{}]无法获取文件{}的元数据: {}", id, name, e);
                return Err(Exception::InternalError);
            }
        };
        if metadata.is_dir() {
            warn!("[ID{}]{}是目录，拒绝访问", id, name);
            return Err(Exception::Forbidden);
        }

        let file_size = metadata.len();
        let header = Response::header_only(200, file_size).as_bytes();
        if let Err(e) = sink.write_all(&header) {
            error!("[ID{}]发送响应头失败: {}", id, e);
            return Err(Exception::TransferInterrupted);
        }

        let sent = match copy_chunked(&mut file, sink, self.chunk_size) {
            Ok(n) => n,
            Err(e) => {
                error!("[ID{}]发送{}时中断: {}", id, name, e);
                return Err(Exception::TransferInterrupted);
            }
        };
        if sent != file_size {
            warn!("[ID{}]{}的大小在发送期间发生变化：{} -> {}", id, name, file_size, sent);
        }
        let _ = sink.flush();
        debug!("[ID{}]GET {}完成，共发送 {} 字节", id, name, sent);

        Ok(Transfer {
            status_code: 200,
            bytes: sent,
        })
    }

    fn put(
        &self,
        name: &str,
        body: &mut dyn Read,
        content_length: u64,
        id: u128,
    ) -> Result<Transfer, Exception> {
        let path = self.root.join(name);
        if path.is_dir() {
            warn!("[ID{}]{}是目录，拒绝写入", id, name);
            return Err(Exception::Forbidden);
        }

        // 先按已存在的文件打开，不存在时再创建，据此区分 200 与 201
        let (mut file, created) = match OpenOptions::new().write(true).truncate(true).open(&path) {
            Ok(f) => (f, false),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                match OpenOptions::new().write(true).create(true).truncate(true).open(&path) {
                    Ok(f) => (f, true),
                    Err(e) => return Err(self.open_error(&e, name, id)),
                }
            }
            Err(e) => return Err(self.open_error(&e, name, id)),
        };

        let mut limited = Read::take(body, content_length);
        let written = match copy_chunked(&mut limited, &mut file, self.chunk_size) {
            Ok(n) => n,
            Err(e) => {
                error!("[ID{}]写入{}失败: {}", id, name, e);
                return Err(Exception::InternalError);
            }
        };
        if written < content_length {
            error!(
                "[ID{}]请求体不完整：期望 {} 字节，实际 {} 字节",
                id, content_length, written
            );
            return Err(Exception::InternalError);
        }
        if let Err(e) = file.flush() {
            error!("[ID{}]写入{}失败: {}", id, name, e);
            return Err(Exception::InternalError);
        }
        debug!("[ID{}]PUT {}完成，共写入 {} 字节", id, name, written);

        Ok(Transfer {
            status_code: if created { 201 } else { 200 },
            bytes: written,
        })
    }
}

/// 以固定大小的块把 `reader` 的内容写入 `writer`，返回复制的字节数
fn copy_chunked(reader: &mut dyn Read, writer: &mut dyn Write, chunk_size: usize) -> io::Result<u64> {
    let mut buffer = vec![0u8; chunk_size];
    let mut total = 0u64;
    loop {
        let n = match reader.read(&mut buffer) {
            Ok(0) => return Ok(total),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        writer.write_all(&buffer[..n])?;
        total += n as u64;
    }
}
