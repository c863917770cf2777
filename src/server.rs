//! # 服务器主体
//!
//! 一个接收线程加固定数量的工作线程：
//! - 接收线程只做三件事：`accept`、把连接放进有界队列、继续循环；
//! - 工作线程从队列取出连接，交给 `Dispatcher` 处理后关闭连接；
//! - 停机时先让接收线程退出并关闭队列，工作线程处理完队列中剩余的连接后退出，
//!   最后逐个 join。
//!
//! 队列、注册表和调度器在 `Server::bind` 中创建一次，以 `Arc` 显式传给每个线程。

use crate::{
    config::Config,
    dispatch::Dispatcher,
    exception::Exception,
    queue::BoundedQueue,
    registry::LockRegistry,
    storage::FileStorage,
};

use log::{debug, error, info, warn};

use std::{
    net::{IpAddr, Ipv4Addr, Shutdown, SocketAddr, SocketAddrV4, TcpListener, TcpStream},
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

const ACCEPT_BACKOFF_BASE_MS: u64 = 10;
const ACCEPT_BACKOFF_MAX_MS: u64 = 1000;

/// 接收线程交给工作线程的连接
pub struct Connection {
    id: u128,
    stream: TcpStream,
    peer: SocketAddr,
}

/// 运行状态计数
#[derive(Debug, Default)]
pub struct ServerStats {
    active_connections: AtomicUsize,
    served: AtomicU64,
}

impl ServerStats {
    /// 正在被工作线程处理的连接数
    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::SeqCst)
    }

    /// 已处理完的连接数
    pub fn served(&self) -> u64 {
        self.served.load(Ordering::SeqCst)
    }
}

/// 已绑定端口、尚未启动线程的服务器
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
    queue: Arc<BoundedQueue<Connection>>,
    dispatcher: Arc<Dispatcher>,
    worker_threads: usize,
}

impl Server {
    /// 绑定端口并创建队列、注册表与调度器。任何一步失败都属于初始化失败。
    pub fn bind(config: &Config) -> Result<Self, Exception> {
        let address = match config.local() {
            true => Ipv4Addr::new(127, 0, 0, 1),
            false => Ipv4Addr::new(0, 0, 0, 0),
        };
        let socket = SocketAddrV4::new(address, config.port());
        let listener = match TcpListener::bind(socket) {
            Ok(listener) => listener,
            Err(e) => {
                error!("无法绑定端口：{}，错误：{}", config.port(), e);
                return Err(Exception::BindFailed);
            }
        };
        let local_addr = match listener.local_addr() {
            Ok(addr) => addr,
            Err(e) => {
                error!("无法获取监听地址：{}", e);
                return Err(Exception::BindFailed);
            }
        };
        info!("服务端将在{}上监听Socket连接", local_addr);

        let queue = Arc::new(BoundedQueue::new(config.queue_capacity())?);
        let registry = Arc::new(LockRegistry::new(config.priority()));
        let storage = Arc::new(FileStorage::new(config.www_root(), config.chunk_size()));
        let dispatcher = Arc::new(Dispatcher::new(
            registry,
            storage,
            config.request_buffer_size(),
        ));
        info!(
            "工作线程数：{}，队列容量：{}，锁策略：{:?}",
            config.worker_threads(),
            config.queue_capacity(),
            config.priority()
        );

        Ok(Self {
            listener,
            local_addr,
            queue,
            dispatcher,
            worker_threads: config.worker_threads(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// 启动工作线程与接收线程
    pub fn start(self) -> Result<ServerHandle, Exception> {
        let stats = Arc::new(ServerStats::default());
        let shutdown = Arc::new(AtomicBool::new(false));

        let mut workers = Vec::with_capacity(self.worker_threads);
        for index in 0..self.worker_threads {
            let queue = Arc::clone(&self.queue);
            let dispatcher = Arc::clone(&self.dispatcher);
            let stats = Arc::clone(&stats);
            let spawned = thread::Builder::new()
                .name(format!("worker-{}", index))
                .spawn(move || worker_loop(index, &queue, &dispatcher, &stats));
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    error!("无法创建工作线程{}：{}", index, e);
                    self.queue.close();
                    join_all(workers);
                    return Err(Exception::ThreadSpawnFailed);
                }
            }
        }

        let acceptor = {
            let queue = Arc::clone(&self.queue);
            let shutdown = Arc::clone(&shutdown);
            let listener = self.listener;
            thread::Builder::new()
                .name("acceptor".to_string())
                .spawn(move || accept_loop(&listener, &queue, &shutdown))
        };
        let acceptor = match acceptor {
            Ok(handle) => handle,
            Err(e) => {
                error!("无法创建接收线程：{}", e);
                self.queue.close();
                join_all(workers);
                return Err(Exception::ThreadSpawnFailed);
            }
        };

        Ok(ServerHandle {
            local_addr: self.local_addr,
            shutdown,
            queue: self.queue,
            dispatcher: self.dispatcher,
            stats,
            acceptor,
            workers,
        })
    }
}

/// 运行中的服务器
pub struct ServerHandle {
    local_addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    queue: Arc<BoundedQueue<Connection>>,
    dispatcher: Arc<Dispatcher>,
    stats: Arc<ServerStats>,
    acceptor: JoinHandle<()>,
    workers: Vec<JoinHandle<()>>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn stats(&self) -> &ServerStats {
        &self.stats
    }

    pub fn registry(&self) -> &LockRegistry {
        self.dispatcher.registry()
    }

    /// 队列中等待处理的连接数
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// 优雅停机：停止接收新连接，处理完已入队的连接后 join 所有线程
    pub fn shutdown(self) {
        self.shutdown.store(true, Ordering::SeqCst);
        let woken = wake_acceptor(self.local_addr);
        self.stop(woken);
    }

    /// 接收线程未被唤醒时不等待它退出：先关闭队列，之后它收到的连接都会被丢弃
    fn stop(self, acceptor_woken: bool) {
        if acceptor_woken {
            if self.acceptor.join().is_err() {
                error!("接收线程异常退出");
            }
        } else {
            error!("接收线程仍阻塞在accept上，不再等待它退出，直接关闭队列");
        }
        self.queue.close();
        join_all(self.workers);
        info!("服务器已停止");
    }

    /// 阻塞直到所有线程退出
    pub fn join(self) {
        if self.acceptor.join().is_err() {
            error!("接收线程异常退出");
        }
        join_all(self.workers);
    }
}

/// 接收线程阻塞在 accept 上，用一个本地连接唤醒它
fn wake_acceptor(local_addr: SocketAddr) -> bool {
    let mut wake_addr = local_addr;
    if wake_addr.ip().is_unspecified() {
        wake_addr.set_ip(IpAddr::V4(Ipv4Addr::LOCALHOST));
    }
    match TcpStream::connect(wake_addr) {
        Ok(_) => true,
        Err(e) => {
            warn!("无法唤醒接收线程：{}", e);
            false
        }
    }
}

/// 连续第 `failures` 次 accept 失败后的等待时间，从 10ms 倍增，上限 1s
fn accept_backoff(failures: u32) -> Duration {
    let millis = ACCEPT_BACKOFF_BASE_MS.saturating_mul(1u64 << failures.saturating_sub(1).min(16));
    Duration::from_millis(millis.min(ACCEPT_BACKOFF_MAX_MS))
}

fn join_all(workers: Vec<JoinHandle<()>>) {
    for worker in workers {
        if worker.join().is_err() {
            error!("工作线程异常退出");
        }
    }
}

fn accept_loop(listener: &TcpListener, queue: &BoundedQueue<Connection>, shutdown: &AtomicBool) {
    let mut id: u128 = 0;
    let mut failures: u32 = 0;
    loop {
        match listener.accept() {
            Ok((stream, peer)) => {
                failures = 0;
                if shutdown.load(Ordering::SeqCst) {
                    info!("接收线程收到停机指令，正在退出...");
                    break;
                }
                debug!("[ID{}]新的连接：{}", id, peer);
                if queue.push(Connection { id, stream, peer }).is_err() {
                    warn!("队列已关闭，接收线程退出");
                    break;
                }
                id += 1;
            }
            Err(e) => {
                if shutdown.load(Ordering::SeqCst) {
                    break;
                }
                // 例如文件描述符耗尽（EMFILE），立即重试只会空转
                failures = failures.saturating_add(1);
                let delay = accept_backoff(failures);
                error!("接受连接失败：{}，{}ms后重试", e, delay.as_millis());
                thread::sleep(delay);
            }
        }
    }
    queue.close();
}

fn worker_loop(
    index: usize,
    queue: &BoundedQueue<Connection>,
    dispatcher: &Dispatcher,
    stats: &ServerStats,
) {
    debug!("worker-{}已启动", index);
    while let Ok(mut connection) = queue.pop() {
        stats.active_connections.fetch_add(1, Ordering::SeqCst);
        let outcome = dispatcher.serve(&mut connection.stream, connection.id);
        debug!(
            "[ID{}]{}的连接已关闭，状态码：{:?}",
            connection.id, connection.peer, outcome.status_code
        );
        stats.active_connections.fetch_sub(1, Ordering::SeqCst);
        stats.served.fetch_add(1, Ordering::SeqCst);
        let _ = connection.stream.shutdown(Shutdown::Write);
    }
    debug!("worker-{}退出", index);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::sync::mpsc;
    use tempfile::tempdir;

    fn roundtrip(addr: SocketAddr, request: &[u8]) -> String {
        let mut stream = TcpStream::connect(addr).unwrap();
        stream.write_all(request).unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).unwrap();
        response
    }

    #[test]
    fn test_start_serve_and_shutdown() {
        let dir = tempdir().unwrap();
        let config = Config::new()
            .with_port(0)
            .with_www_root(dir.path().to_str().unwrap())
            .with_worker_threads(2);
        let server = Server::bind(&config).unwrap();
        let handle = server.start().unwrap();
        let addr = handle.local_addr();

        let response = roundtrip(addr, b"PUT /hello HTTP/1.1\r\nContent-Length: 2\r\n\r\nhi");
        assert!(response.starts_with("HTTP/1.1 201 Created"));
        let response = roundtrip(addr, b"GET /hello HTTP/1.1\r\n\r\n");
        assert!(response.ends_with("\r\n\r\nhi"));

        assert!(handle.registry().is_empty());
        assert_eq!(handle.stats().served(), 2);
        handle.shutdown();
    }

    #[test]
    fn test_bind_conflict() {
        let config = Config::new().with_port(0);
        let first = Server::bind(&config).unwrap();
        let taken = Config::new().with_port(first.local_addr().port());
        assert_eq!(Server::bind(&taken).err(), Some(Exception::BindFailed));
    }

    #[test]
    fn test_accept_backoff_grows_and_caps() {
        assert_eq!(accept_backoff(1), Duration::from_millis(10));
        assert_eq!(accept_backoff(2), Duration::from_millis(20));
        assert_eq!(accept_backoff(4), Duration::from_millis(80));
        assert_eq!(accept_backoff(8), Duration::from_millis(1000));
        assert_eq!(accept_backoff(u32::MAX), Duration::from_millis(1000));
    }

    /// 唤醒连接失败时停机不能卡在 join 接收线程上
    #[test]
    fn test_stop_without_waking_acceptor() {
        let config = Config::new().with_port(0).with_worker_threads(2);
        let handle = Server::bind(&config).unwrap().start().unwrap();
        let addr = handle.local_addr();
        let queue = Arc::clone(&handle.queue);
        handle.shutdown.store(true, Ordering::SeqCst);

        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            handle.stop(false);
            tx.send(()).unwrap();
        });
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(queue.is_closed());

        // 仍阻塞的接收线程在下一个连接到来时看到停机标志并退出
        drop(TcpStream::connect(addr).unwrap());
    }
}
