//! # 连接调度
//!
//! 工作线程从队列取出连接后交给 `Dispatcher::serve`，按以下阶段处理：
//!
//! ```text
//! RECEIVED → CLASSIFIED → {LOCKED_READ | LOCKED_WRITE} → SERVED → UNLOCKED → RELEASED → CLOSED
//! ```
//!
//! 分类失败的请求直接回复错误并进入 CLOSED，不会在注册表中留下任何引用。
//! 能分类的请求严格按 `reference → 加锁 → I/O → 解锁 → release` 的顺序执行，
//! I/O 失败只影响回复的状态码，不影响加解锁与引用计数。

use crate::{
    exception::Exception,
    param::{Access, HttpRequestMethod},
    registry::LockRegistry,
    request::{read_head, Request},
    response::Response,
    storage::Storage,
};

use log::{debug, error, info, warn};

use std::{
    fmt,
    io::{Read, Write},
    sync::Arc,
    time::Instant,
};

/// 单个连接的处理阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Received,
    Classified,
    LockedRead,
    LockedWrite,
    Served,
    Unlocked,
    Released,
    Closed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Received => "RECEIVED",
            Stage::Classified => "CLASSIFIED",
            Stage::LockedRead => "LOCKED_READ",
            Stage::LockedWrite => "LOCKED_WRITE",
            Stage::Served => "SERVED",
            Stage::Unlocked => "UNLOCKED",
            Stage::Released => "RELEASED",
            Stage::Closed => "CLOSED",
        };
        write!(f, "{}", name)
    }
}

/// 一个连接的处理结果
#[derive(Debug, Clone, Default)]
pub struct Outcome {
    /// 回复给客户端的状态码；客户端未发送任何数据或传输中断时可能为 `None`
    pub status_code: Option<u16>,
    /// 依次经过的阶段
    pub stages: Vec<Stage>,
}

impl Outcome {
    fn enter(&mut self, stage: Stage, id: u128) {
        debug!("[ID{}]{}", id, stage);
        self.stages.push(stage);
    }
}

/// 按资源加锁并调用存储层完成 GET/PUT
pub struct Dispatcher {
    registry: Arc<LockRegistry>,
    storage: Arc<dyn Storage>,
    request_buffer_size: usize,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<LockRegistry>,
        storage: Arc<dyn Storage>,
        request_buffer_size: usize,
    ) -> Self {
        Self {
            registry,
            storage,
            request_buffer_size,
        }
    }

    pub fn registry(&self) -> &Arc<LockRegistry> {
        &self.registry
    }

    /// 处理一个连接上的单个请求。返回后调用方关闭连接。
    pub fn serve<S: Read + Write>(&self, stream: &mut S, id: u128) -> Outcome {
        let mut outcome = Outcome::default();
        outcome.enter(Stage::Received, id);
        let start_time = Instant::now();

        let buffer = match read_head(stream, self.request_buffer_size) {
            Ok(b) => b,
            Err(e) => {
                error!("[ID{}]读取TCPStream时遇到错误: {}", id, e);
                outcome.enter(Stage::Closed, id);
                return outcome;
            }
        };
        if buffer.is_empty() {
            debug!("[ID{}]客户端未发送数据即关闭连接", id);
            outcome.enter(Stage::Closed, id);
            return outcome;
        }

        let request = match Request::try_from(&buffer, id) {
            Ok(r) => r,
            Err(e) => {
                warn!("[ID{}]请求被拒绝：{}", id, e);
                outcome.status_code = self.reply_error(stream, e, id);
                outcome.enter(Stage::Closed, id);
                return outcome;
            }
        };
        outcome.enter(Stage::Classified, id);

        let name = request.uri();
        let access = request.method().access();
        self.registry.reference(name);

        let locked = match access {
            Access::Read => self.registry.acquire_reader(name),
            Access::Write => self.registry.acquire_writer(name),
        };
        if let Err(e) = locked {
            error!("[ID{}]无法为{}加锁：{}", id, name, e);
            outcome.status_code = self.reply_error(stream, Exception::InternalError, id);
            self.release(name, id);
            outcome.enter(Stage::Closed, id);
            return outcome;
        }
        outcome.enter(
            match access {
                Access::Read => Stage::LockedRead,
                Access::Write => Stage::LockedWrite,
            },
            id,
        );

        let status_code = self.execute(stream, &request, &buffer, id);
        outcome.status_code = status_code;
        outcome.enter(Stage::Served, id);
        info!(
            target: "audit",
            "{},/{},{},{}",
            request.method(),
            name,
            status_code.unwrap_or(500),
            request.request_id()
        );

        let unlocked = match access {
            Access::Read => self.registry.release_reader(name),
            Access::Write => self.registry.release_writer(name),
        };
        if let Err(e) = unlocked {
            error!("[ID{}]无法为{}解锁：{}", id, name, e);
        }
        outcome.enter(Stage::Unlocked, id);

        self.release(name, id);
        outcome.enter(Stage::Released, id);

        let _ = stream.flush();
        debug!(
            "[ID{}]请求处理完成，服务端用时{}ms。",
            id,
            start_time.elapsed().as_millis()
        );
        outcome.enter(Stage::Closed, id);
        outcome
    }

    /// 在持有资源锁的情况下执行读写并回复，返回回复的状态码
    fn execute<S: Read + Write>(
        &self,
        stream: &mut S,
        request: &Request,
        buffer: &[u8],
        id: u128,
    ) -> Option<u16> {
        let name = request.uri();
        let result = match request.method() {
            HttpRequestMethod::Get => self.storage.get(name, stream, id),
            HttpRequestMethod::Put => {
                // 请求头之后已经读进缓冲区的字节是请求体的开头
                let prefix = &buffer[request.head_len()..];
                let mut body = prefix.chain(&mut *stream);
                self.storage
                    .put(name, &mut body, request.content_length(), id)
            }
        };

        match result {
            Ok(transfer) => {
                if request.method() == HttpRequestMethod::Put {
                    let response = Response::from_status_code(transfer.status_code);
                    if let Err(e) = stream.write_all(&response.as_bytes()) {
                        warn!("[ID{}]发送响应失败: {}", id, e);
                    }
                }
                Some(transfer.status_code)
            }
            Err(Exception::TransferInterrupted) => None,
            Err(e) => {
                warn!("[ID{}]/{}处理失败：{}", id, name, e);
                self.reply_error(stream, e, id)
            }
        }
    }

    fn reply_error<S: Write>(&self, stream: &mut S, exception: Exception, id: u128) -> Option<u16> {
        let response = Response::from_exception(exception)?;
        if let Err(e) = stream.write_all(&response.as_bytes()) {
            warn!("[ID{}]发送错误响应失败: {}", id, e);
        }
        Some(response.status_code())
    }

    fn release(&self, name: &str, id: u128) {
        if let Err(e) = self.registry.release(name) {
            error!("[ID{}]无法释放{}的引用：{}", id, name, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rwlock::Priority;
    use crate::storage::{FileStorage, Transfer};
    use std::fs;
    use std::io::{self, Cursor};
    use tempfile::tempdir;

    /// 输入预先给定、输出写入内存的伪连接
    struct FakeStream {
        input: Cursor<Vec<u8>>,
        output: Vec<u8>,
    }

    impl FakeStream {
        fn new(input: &[u8]) -> Self {
            Self {
                input: Cursor::new(input.to_vec()),
                output: Vec::new(),
            }
        }

        fn output(&self) -> String {
            String::from_utf8_lossy(&self.output).to_string()
        }
    }

    impl Read for FakeStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for FakeStream {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.output.write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// 总是失败，并检查执行 I/O 时资源确实被引用且已加锁
    struct ProbeStorage {
        registry: Arc<LockRegistry>,
    }

    impl ProbeStorage {
        fn check(&self, name: &str, write: bool) {
            assert_eq!(self.registry.ref_count(name), Some(1));
            let lock = self.registry.reference(name);
            let stats = lock.stats();
            assert_eq!(stats.active_writer, write);
            assert_eq!(stats.active_readers, if write { 0 } else { 1 });
            self.registry.release(name).unwrap();
        }
    }

    impl Storage for ProbeStorage {
        fn get(&self, name: &str, _sink: &mut dyn Write, _id: u128) -> Result<Transfer, Exception> {
            self.check(name, false);
            Err(Exception::InternalError)
        }

        fn put(
            &self,
            name: &str,
            _body: &mut dyn Read,
            _content_length: u64,
            _id: u128,
        ) -> Result<Transfer, Exception> {
            self.check(name, true);
            Err(Exception::InternalError)
        }
    }

    fn file_dispatcher(root: &std::path::Path, buffer: usize) -> Dispatcher {
        let registry = Arc::new(LockRegistry::new(Priority::NWay(1)));
        Dispatcher::new(registry, Arc::new(FileStorage::new(root, 8)), buffer)
    }

    const FULL_READ_PATH: [Stage; 7] = [
        Stage::Received,
        Stage::Classified,
        Stage::LockedRead,
        Stage::Served,
        Stage::Unlocked,
        Stage::Released,
        Stage::Closed,
    ];

    #[test]
    fn test_get_existing_file() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"contents").unwrap();
        let dispatcher = file_dispatcher(dir.path(), 2048);

        let mut stream = FakeStream::new(b"GET /a.txt HTTP/1.1\r\nRequest-Id: 3\r\n\r\n");
        let outcome = dispatcher.serve(&mut stream, 1);

        assert_eq!(outcome.status_code, Some(200));
        assert_eq!(outcome.stages, FULL_READ_PATH);
        assert!(stream.output().ends_with("\r\n\r\ncontents"));
        assert!(dispatcher.registry().is_empty());
    }

    #[test]
    fn test_get_missing_file() {
        let dir = tempdir().unwrap();
        let dispatcher = file_dispatcher(dir.path(), 2048);

        let mut stream = FakeStream::new(b"GET /missing HTTP/1.1\r\n\r\n");
        let outcome = dispatcher.serve(&mut stream, 1);

        assert_eq!(outcome.status_code, Some(404));
        assert_eq!(outcome.stages, FULL_READ_PATH);
        assert!(stream.output().starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(dispatcher.registry().is_empty());
    }

    /// 请求体一部分随请求头读入缓冲区，其余部分仍在连接中
    #[test]
    fn test_put_body_split_across_buffer() {
        let dir = tempdir().unwrap();
        let head = "PUT /new.txt HTTP/1.1\r\nContent-Length: 26\r\n\r\n";
        let dispatcher = file_dispatcher(dir.path(), head.len() + 6);

        let raw = format!("{}abcdefghijklmnopqrstuvwxyz", head);
        let mut stream = FakeStream::new(raw.as_bytes());
        let outcome = dispatcher.serve(&mut stream, 1);

        assert_eq!(outcome.status_code, Some(201));
        assert!(outcome.stages.contains(&Stage::LockedWrite));
        assert_eq!(
            fs::read(dir.path().join("new.txt")).unwrap(),
            b"abcdefghijklmnopqrstuvwxyz"
        );
        assert!(stream.output().starts_with("HTTP/1.1 201 Created\r\n"));
        assert!(stream.output().ends_with("Created\n"));
        assert!(dispatcher.registry().is_empty());
    }

    #[test]
    fn test_put_overwrite_returns_ok() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("f.txt"), b"old content").unwrap();
        let dispatcher = file_dispatcher(dir.path(), 2048);

        let mut stream = FakeStream::new(b"PUT /f.txt HTTP/1.1\r\nContent-Length: 3\r\n\r\nnew");
        let outcome = dispatcher.serve(&mut stream, 1);

        assert_eq!(outcome.status_code, Some(200));
        assert!(stream.output().ends_with("\r\n\r\nOK\n"));
        assert_eq!(fs::read(dir.path().join("f.txt")).unwrap(), b"new");
    }

    #[test]
    fn test_classification_failures_skip_locking() {
        let dir = tempdir().unwrap();
        let dispatcher = file_dispatcher(dir.path(), 2048);
        let cases: [(&[u8], u16); 4] = [
            (b"garbage\r\n\r\n", 400),
            (b"POST /file HTTP/1.1\r\n\r\n", 501),
            (b"GET /file HTTP/1.0\r\n\r\n", 505),
            (b"PUT /file HTTP/1.1\r\n\r\n", 400),
        ];

        for (raw, code) in cases {
            let mut stream = FakeStream::new(raw);
            let outcome = dispatcher.serve(&mut stream, 1);
            assert_eq!(outcome.status_code, Some(code));
            assert_eq!(outcome.stages, vec![Stage::Received, Stage::Closed]);
            assert!(stream.output().starts_with(&format!("HTTP/1.1 {} ", code)));
        }
        assert!(dispatcher.registry().is_empty());
    }

    #[test]
    fn test_empty_connection() {
        let dir = tempdir().unwrap();
        let dispatcher = file_dispatcher(dir.path(), 2048);

        let mut stream = FakeStream::new(b"");
        let outcome = dispatcher.serve(&mut stream, 1);
        assert_eq!(outcome.status_code, None);
        assert!(stream.output.is_empty());
    }

    /// I/O 失败时加解锁与引用计数的次序不变
    #[test]
    fn test_storage_failure_keeps_lock_discipline() {
        let registry = Arc::new(LockRegistry::new(Priority::Writers));
        let storage = Arc::new(ProbeStorage {
            registry: Arc::clone(&registry),
        });
        let dispatcher = Dispatcher::new(Arc::clone(&registry), storage, 2048);

        let mut stream = FakeStream::new(b"GET /res HTTP/1.1\r\n\r\n");
        let outcome = dispatcher.serve(&mut stream, 1);
        assert_eq!(outcome.status_code, Some(500));
        assert_eq!(outcome.stages, FULL_READ_PATH);

        let mut stream = FakeStream::new(b"PUT /res HTTP/1.1\r\nContent-Length: 0\r\n\r\n");
        let outcome = dispatcher.serve(&mut stream, 2);
        assert_eq!(outcome.status_code, Some(500));
        assert!(stream.output().starts_with("HTTP/1.1 500 Internal Server Error\r\n"));

        assert!(registry.is_empty());
    }
}
