//! # 有界阻塞队列
//!
//! 连接接收线程与工作线程池之间的交接缓冲区。
//! 内部是容量固定的环形数组，由一把互斥锁和两个条件变量保护：
//! - 队列满时 `push` 阻塞，直到有 `pop` 腾出空位；
//! - 队列空时 `pop` 阻塞，直到有 `push` 放入元素；
//! - `close` 之后 `push` 立即失败，`pop` 取完剩余元素后失败，用于停机。

use crate::exception::Exception;

use log::{error, warn};

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

struct Ring<T> {
    slots: Box<[Option<T>]>,
    head: usize,
    tail: usize,
    len: usize,
    closed: bool,
}

/// 固定容量的多生产者多消费者 FIFO 队列。
pub struct BoundedQueue<T> {
    ring: Mutex<Ring<T>>,
    /// 队列非空时唤醒 `pop` 等待者
    not_empty: Condvar,
    /// 队列未满时唤醒 `push` 等待者
    not_full: Condvar,
    capacity: usize,
}

impl<T> BoundedQueue<T> {
    /// 创建容量为 `capacity` 的队列。容量为 0 时返回 `InvalidCapacity`。
    pub fn new(capacity: usize) -> Result<Self, Exception> {
        if capacity == 0 {
            error!("队列容量不能为0");
            return Err(Exception::InvalidCapacity);
        }
        let slots = (0..capacity).map(|_| None).collect::<Vec<_>>().into_boxed_slice();
        Ok(Self {
            ring: Mutex::new(Ring {
                slots,
                head: 0,
                tail: 0,
                len: 0,
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
        })
    }

    fn lock(&self) -> MutexGuard<'_, Ring<T>> {
        match self.ring.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("队列锁被污染，恢复并继续");
                poisoned.into_inner()
            }
        }
    }

    /// 将元素放到队尾，队列满时阻塞。
    ///
    /// 队列已关闭时返回 `QueueClosed`，元素随之被丢弃（对连接而言即关闭）。
    pub fn push(&self, item: T) -> Result<(), Exception> {
        let mut ring = self.lock();
        while ring.len == self.capacity && !ring.closed {
            ring = self
                .not_full
                .wait(ring)
                .unwrap_or_else(PoisonError::into_inner);
        }
        if ring.closed {
            return Err(Exception::QueueClosed);
        }

        let tail = ring.tail;
        ring.slots[tail] = Some(item);
        ring.tail = (tail + 1) % self.capacity;
        ring.len += 1;

        self.not_empty.notify_one();
        Ok(())
    }

    /// 取出队首元素，队列空时阻塞。
    ///
    /// 队列已关闭且为空时返回 `QueueClosed`；关闭前放入的元素仍会被依次取出。
    pub fn pop(&self) -> Result<T, Exception> {
        let mut ring = self.lock();
        while ring.len == 0 && !ring.closed {
            ring = self
                .not_empty
                .wait(ring)
                .unwrap_or_else(PoisonError::into_inner);
        }
        if ring.len == 0 {
            return Err(Exception::QueueClosed);
        }

        let head = ring.head;
        let item = match ring.slots[head].take() {
            Some(item) => item,
            None => {
                // len > 0 但槽位为空，计数已损坏，继续运行只会死锁或丢连接
                error!("队列状态损坏：head={}, len={}", head, ring.len);
                std::process::abort();
            }
        };
        ring.head = (head + 1) % self.capacity;
        ring.len -= 1;

        self.not_full.notify_one();
        Ok(item)
    }

    /// 关闭队列并唤醒所有等待者。重复调用无副作用。
    pub fn close(&self) {
        let mut ring = self.lock();
        ring.closed = true;
        drop(ring);
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }
}

impl<T> BoundedQueue<T> {
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.lock().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}
