//! # 可配置公平性的读写锁
//!
//! 每个资源对应一把 `PriorityRwLock`，支持三种优先策略：
//! - `Readers`：读者优先。读者只等待正在写的写者；有读者在等时写者不得进入。
//! - `Writers`：写者优先。只要有写者在等待，新读者就必须等待。
//! - `NWay(n)`：有写者等待时，每一轮最多放行 `n` 个读者，然后让一个写者执行；
//!   写者解锁后轮次计数清零，若有读者在等，下一个写者须等本轮至少放行一个读者。
//!
//! 准入判断与唤醒规则集中在纯状态机 `LockState` 中，`PriorityRwLock`
//! 只负责用互斥锁保护它，并在两个条件变量上挂起/唤醒线程。

use crate::exception::Exception;

use log::{error, warn};

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

/// 读写锁的优先策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    /// 读者优先
    Readers,
    /// 写者优先
    Writers,
    /// N 路轮转，参数为每轮最多放行的读者数（0 按 1 处理）
    NWay(u32),
}

/// 解锁后需要唤醒的等待者
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    Nobody,
    OneWriter,
    AllReaders,
}

/// 锁内部计数的快照
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LockStats {
    pub waiting_readers: usize,
    pub waiting_writers: usize,
    pub active_readers: usize,
    pub active_writer: bool,
    /// 自上次写者解锁以来放行的读者数
    pub wave: u32,
}

/// 读写锁的准入状态机，不含任何同步原语。
#[derive(Debug, Clone)]
pub struct LockState {
    priority: Priority,
    stats: LockStats,
}

impl LockState {
    pub fn new(priority: Priority) -> Self {
        Self {
            priority,
            stats: LockStats::default(),
        }
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn stats(&self) -> LockStats {
        self.stats
    }

    /// 读者此刻能否进入
    pub fn can_read(&self) -> bool {
        let s = &self.stats;
        if s.active_writer {
            return false;
        }
        match self.priority {
            Priority::Readers => true,
            Priority::Writers => s.waiting_writers == 0,
            Priority::NWay(n) => !(s.wave >= n.max(1) && s.waiting_writers > 0),
        }
    }

    /// 写者此刻能否进入
    pub fn can_write(&self) -> bool {
        let s = &self.stats;
        if s.active_writer || s.active_readers > 0 {
            return false;
        }
        match self.priority {
            Priority::Readers => s.waiting_readers == 0,
            Priority::Writers => true,
            // 上一个写者之后若还没有读者进入过，就先让在等的读者走
            Priority::NWay(_) => !(s.waiting_readers > 0 && s.wave == 0),
        }
    }

    pub fn wait_reader(&mut self) {
        self.stats.waiting_readers += 1;
    }

    pub fn wait_writer(&mut self) {
        self.stats.waiting_writers += 1;
    }

    /// 把一个等待中的读者转为活跃读者。调用方须先确认 `can_read()`。
    pub fn admit_reader(&mut self) {
        self.stats.waiting_readers -= 1;
        self.stats.active_readers += 1;
        self.stats.wave = self.stats.wave.saturating_add(1);
    }

    /// 把一个等待中的写者转为活跃写者。调用方须先确认 `can_write()`。
    pub fn admit_writer(&mut self) {
        self.stats.waiting_writers -= 1;
        self.stats.active_writer = true;
    }

    /// 释放一个读者，返回需要唤醒的对象。
    pub fn release_reader(&mut self) -> Result<Wake, Exception> {
        if self.stats.active_readers == 0 {
            return Err(Exception::UnmatchedUnlock);
        }
        self.stats.active_readers -= 1;
        if self.stats.active_readers > 0 || self.stats.waiting_writers == 0 {
            return Ok(Wake::Nobody);
        }
        // 三种策略下，最后一个读者离开时都只需要放行一个写者：
        // 此时仍在等待的读者要么不存在，要么正被某个等待中的写者挡住
        Ok(Wake::OneWriter)
    }

    /// 释放写者并清零轮次计数，返回需要唤醒的对象。
    pub fn release_writer(&mut self) -> Result<Wake, Exception> {
        if !self.stats.active_writer {
            return Err(Exception::UnmatchedUnlock);
        }
        self.stats.active_writer = false;
        self.stats.wave = 0;

        let s = &self.stats;
        let wake = match self.priority {
            Priority::Readers | Priority::NWay(_) => {
                if s.waiting_readers > 0 {
                    Wake::AllReaders
                } else if s.waiting_writers > 0 {
                    Wake::OneWriter
                } else {
                    Wake::Nobody
                }
            }
            Priority::Writers => {
                if s.waiting_writers > 0 {
                    Wake::OneWriter
                } else if s.waiting_readers > 0 {
                    Wake::AllReaders
                } else {
                    Wake::Nobody
                }
            }
        };
        Ok(wake)
    }
}

/// 带优先策略的读写锁。
///
/// 不可重入；`reader_unlock`/`writer_unlock` 必须与此前的加锁配对，
/// 未配对的解锁返回 `UnmatchedUnlock` 且不改变任何计数。
pub struct PriorityRwLock {
    state: Mutex<LockState>,
    readers: Condvar,
    writers: Condvar,
}

impl PriorityRwLock {
    pub fn new(priority: Priority) -> Self {
        Self {
            state: Mutex::new(LockState::new(priority)),
            readers: Condvar::new(),
            writers: Condvar::new(),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, LockState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("读写锁内部互斥锁被污染，恢复并继续");
                poisoned.into_inner()
            }
        }
    }

    fn wake(&self, wake: Wake) {
        match wake {
            Wake::Nobody => {}
            Wake::OneWriter => self.writers.notify_one(),
            Wake::AllReaders => self.readers.notify_all(),
        }
    }

    /// 以读者身份加锁
    pub fn reader_lock(&self) {
        let mut state = self.lock_state();
        state.wait_reader();
        while !state.can_read() {
            state = self
                .readers
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        state.admit_reader();
    }

    pub fn reader_unlock(&self) -> Result<(), Exception> {
        let mut state = self.lock_state();
        let wake = state.release_reader().map_err(|e| {
            error!("reader_unlock未与reader_lock配对");
            e
        })?;
        self.wake(wake);
        Ok(())
    }

    /// 以写者身份加锁
    pub fn writer_lock(&self) {
        let mut state = self.lock_state();
        state.wait_writer();
        while !state.can_write() {
            state = self
                .writers
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        state.admit_writer();
    }

    pub fn writer_unlock(&self) -> Result<(), Exception> {
        let mut state = self.lock_state();
        let wake = state.release_writer().map_err(|e| {
            error!("writer_unlock未与writer_lock配对");
            e
        })?;
        self.wake(wake);
        Ok(())
    }

    pub fn priority(&self) -> Priority {
        self.lock_state().priority()
    }

    pub fn stats(&self) -> LockStats {
        self.lock_state().stats()
    }
}
