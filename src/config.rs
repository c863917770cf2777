use crate::{exception::Exception, param::*, rwlock::Priority};

use num_cpus;
use serde_derive::Deserialize;
use serde_derive::Serialize;

use log::{error, warn};
use std::fs::File;
use std::io::prelude::*;

/// 资源读写锁的优先策略
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LockPolicy {
    Readers,
    Writers,
    Nway,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    www_root: String,
    port: u16,
    worker_threads: usize,
    #[serde(default)]
    queue_capacity: usize,
    local: bool,
    #[serde(default = "default_lock_policy")]
    lock_policy: LockPolicy,
    #[serde(default = "default_nway_n")]
    nway_n: u32,
    #[serde(default = "default_chunk_size")]
    chunk_size: usize,
    #[serde(default = "default_request_buffer_size")]
    request_buffer_size: usize,
}

fn default_lock_policy() -> LockPolicy {
    LockPolicy::Nway
}

fn default_nway_n() -> u32 {
    1
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_request_buffer_size() -> usize {
    DEFAULT_REQUEST_BUFFER_SIZE
}

impl Config {
    pub fn new() -> Self {
        Self {
            www_root: ".".to_string(),
            port: 7878,
            worker_threads: DEFAULT_WORKER_THREADS,
            queue_capacity: DEFAULT_WORKER_THREADS,
            local: true,
            lock_policy: default_lock_policy(),
            nway_n: default_nway_n(),
            chunk_size: default_chunk_size(),
            request_buffer_size: default_request_buffer_size(),
        }
    }

    pub fn from_toml(filename: &str) -> Result<Self, Exception> {
        let mut file = match File::open(filename) {
            Ok(f) => f,
            Err(e) => {
                error!("no such file {} exception:{}", filename, e);
                return Err(Exception::ConfigError);
            }
        };
        let mut str_val = String::new();
        if let Err(e) = file.read_to_string(&mut str_val) {
            error!("Error Reading file: {}", e);
            return Err(Exception::ConfigError);
        }
        Ok(Self::from_str(&str_val))
    }

    /// 从 TOML 文本构建配置并修正非法取值。文本无法解析时使用默认配置。
    pub fn from_str(text: &str) -> Self {
        let raw_config = match toml::from_str(text) {
            Ok(t) => t,
            Err(e) => {
                error!("无法成功从配置文件构建配置对象，使用默认配置：{}", e);
                Config::new()
            }
        };
        raw_config.normalized()
    }

    fn normalized(mut self) -> Self {
        if self.worker_threads == 0 {
            self.worker_threads = num_cpus::get();
        }
        if self.queue_capacity == 0 {
            self.queue_capacity = self.worker_threads;
        }
        if self.nway_n == 0 {
            warn!("nway_n被设置为0，但每轮至少要放行一个读者，因此该值将被改为1。");
            self.nway_n = 1;
        }
        if self.chunk_size == 0 {
            warn!("chunk_size不能为0，使用默认值{}", DEFAULT_CHUNK_SIZE);
            self.chunk_size = DEFAULT_CHUNK_SIZE;
        }
        if self.request_buffer_size == 0 {
            warn!("request_buffer_size不能为0，使用默认值{}", DEFAULT_REQUEST_BUFFER_SIZE);
            self.request_buffer_size = DEFAULT_REQUEST_BUFFER_SIZE;
        }
        self
    }

    /// 覆盖监听端口，0 表示由系统分配
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_www_root(mut self, www_root: &str) -> Self {
        self.www_root = www_root.to_string();
        self
    }

    pub fn with_worker_threads(mut self, worker_threads: usize) -> Self {
        self.worker_threads = worker_threads;
        self.queue_capacity = 0;
        self.normalized()
    }

    pub fn with_lock_policy(mut self, lock_policy: LockPolicy, nway_n: u32) -> Self {
        self.lock_policy = lock_policy;
        self.nway_n = nway_n;
        self.normalized()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn www_root(&self) -> &str {
        &self.www_root
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn worker_threads(&self) -> usize {
        self.worker_threads
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    pub fn local(&self) -> bool {
        self.local
    }

    pub fn lock_policy(&self) -> LockPolicy {
        self.lock_policy
    }

    /// 注册表为每个资源创建读写锁时使用的策略
    pub fn priority(&self) -> Priority {
        match self.lock_policy {
            LockPolicy::Readers => Priority::Readers,
            LockPolicy::Writers => Priority::Writers,
            LockPolicy::Nway => Priority::NWay(self.nway_n),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn request_buffer_size(&self) -> usize {
        self.request_buffer_size
    }
}
