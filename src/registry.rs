//! # 资源锁注册表
//!
//! 为每个正在被请求的资源名维护一个条目：`{引用计数, 读写锁}`。
//!
//! - 第一次引用某个资源时创建条目（引用计数为 1），之后每次引用加一；
//! - `release` 把引用计数减到 0 时，在注册表互斥锁内一并删除条目；
//! - 加锁/解锁操作只在注册表互斥锁内查找条目并克隆锁句柄，
//!   随后释放注册表互斥锁，再在外面阻塞于资源自己的读写锁。
//!   这样不同资源之间不会因为同一把全局锁而串行化。
//!
//! 引用计数覆盖一次请求的完整生命周期（引用 → 加锁 → I/O → 解锁 → 释放），
//! 因此条目不会在任何请求仍在使用它的锁时被删除。

use crate::{
    exception::Exception,
    rwlock::{Priority, PriorityRwLock},
};

use log::{debug, error, warn};

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

struct Entry {
    lock: Arc<PriorityRwLock>,
    ref_count: usize,
}

/// 资源名到读写锁的注册表
pub struct LockRegistry {
    entries: Mutex<HashMap<String, Entry>>,
    /// 新建条目所用的锁策略
    priority: Priority,
}

impl LockRegistry {
    pub fn new(priority: Priority) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            priority,
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("注册表锁被污染，恢复并继续");
                poisoned.into_inner()
            }
        }
    }

    /// 登记一次对 `name` 的使用，返回该资源的读写锁句柄。
    ///
    /// 句柄至少在与之配对的 `release` 之前保持有效。
    pub fn reference(&self, name: &str) -> Arc<PriorityRwLock> {
        let mut entries = self.entries();
        match entries.get_mut(name) {
            Some(entry) => {
                entry.ref_count += 1;
                Arc::clone(&entry.lock)
            }
            None => {
                debug!("注册表新建条目：{}", name);
                let lock = Arc::new(PriorityRwLock::new(self.priority));
                entries.insert(
                    name.to_string(),
                    Entry {
                        lock: Arc::clone(&lock),
                        ref_count: 1,
                    },
                );
                lock
            }
        }
    }

    /// 撤销一次对 `name` 的使用，引用计数归零时删除条目。
    pub fn release(&self, name: &str) -> Result<(), Exception> {
        let mut entries = self.entries();
        let remaining = match entries.get_mut(name) {
            Some(entry) => {
                entry.ref_count -= 1;
                entry.ref_count
            }
            None => {
                error!("release了未登记的资源：{}", name);
                return Err(Exception::UnknownResource);
            }
        };
        if remaining == 0 {
            entries.remove(name);
            debug!("注册表删除条目：{}", name);
        }
        Ok(())
    }

    /// 在注册表互斥锁内取出资源的锁句柄，不改变引用计数。
    fn lookup(&self, name: &str) -> Result<Arc<PriorityRwLock>, Exception> {
        match self.entries().get(name) {
            Some(entry) => Ok(Arc::clone(&entry.lock)),
            None => {
                error!("对未登记的资源加解锁：{}", name);
                Err(Exception::UnknownResource)
            }
        }
    }

    pub fn acquire_reader(&self, name: &str) -> Result<(), Exception> {
        let lock = self.lookup(name)?;
        lock.reader_lock();
        Ok(())
    }

    pub fn release_reader(&self, name: &str) -> Result<(), Exception> {
        self.lookup(name)?.reader_unlock()
    }

    pub fn acquire_writer(&self, name: &str) -> Result<(), Exception> {
        let lock = self.lookup(name)?;
        lock.writer_lock();
        Ok(())
    }

    pub fn release_writer(&self, name: &str) -> Result<(), Exception> {
        self.lookup(name)?.writer_unlock()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries().contains_key(name)
    }

    /// 当前在途请求数，不存在则为 `None`
    pub fn ref_count(&self, name: &str) -> Option<usize> {
        self.entries().get(name).map(|entry| entry.ref_count)
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }
}
