// 该文件是 Shanan （山南西风） 项目的一部分。
// src/channel.rs - 有界帧通道
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::frame::Frame;

/// 生产者与消费者之间的定长阻塞通道
///
/// 一把锁保护缓冲区，两个条件变量分别表示“有空位”和“有数据”。
/// 关闭后 `push` 立即失败，`pop` 继续取出剩余数据，缓冲区空后返回 `None`。
pub struct BoundedFrameChannel<T = Frame> {
  state: Mutex<ChannelState<T>>,
  room_available: Condvar,
  item_available: Condvar,
  capacity: usize,
}

struct ChannelState<T> {
  queue: VecDeque<T>,
  closed: bool,
}

impl<T> BoundedFrameChannel<T> {
  pub fn new(capacity: usize) -> Self {
    Self {
      state: Mutex::new(ChannelState {
        queue: VecDeque::with_capacity(capacity),
        closed: false,
      }),
      room_available: Condvar::new(),
      item_available: Condvar::new(),
      capacity,
    }
  }

  fn lock(&self) -> MutexGuard<'_, ChannelState<T>> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// 放入一项；通道满时阻塞，关闭后返回 false
  ///
  /// 所有权随调用转移到通道内，生产者不再持有该缓冲。
  pub fn push(&self, item: T) -> bool {
    let mut state = self.lock();
    if state.closed || self.capacity == 0 {
      return false;
    }

    while state.queue.len() >= self.capacity && !state.closed {
      state = self
        .room_available
        .wait(state)
        .unwrap_or_else(PoisonError::into_inner);
    }

    if state.closed {
      return false;
    }

    state.queue.push_back(item);
    drop(state);
    self.item_available.notify_one();
    true
  }

  /// 取出一项；通道空时阻塞，关闭且取尽后返回 `None`
  pub fn pop(&self) -> Option<T> {
    let mut state = self.lock();
    while state.queue.is_empty() && !state.closed {
      state = self
        .item_available
        .wait(state)
        .unwrap_or_else(PoisonError::into_inner);
    }

    let item = state.queue.pop_front()?;
    drop(state);
    self.room_available.notify_one();
    Some(item)
  }

  /// 关闭通道并唤醒所有等待者；重复调用无副作用
  pub fn close(&self) {
    let mut state = self.lock();
    if !state.closed {
      debug!("关闭帧通道，剩余 {} 项", state.queue.len());
    }
    state.closed = true;
    drop(state);
    self.room_available.notify_all();
    self.item_available.notify_all();
  }

  pub fn is_closed(&self) -> bool {
    self.lock().closed
  }

  pub fn len(&self) -> usize {
    self.lock().queue.len()
  }

  pub fn is_empty(&self) -> bool {
    self.lock().queue.is_empty()
  }

  pub fn capacity(&self) -> usize {
    self.capacity
  }
}

impl<T> Drop for BoundedFrameChannel<T> {
  fn drop(&mut self) {
    self.close();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Arc;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::thread;
  use std::time::Duration;

  #[test]
  fn push_then_pop_preserves_order() {
    let channel = BoundedFrameChannel::new(10);
    for i in 0..5 {
      assert!(channel.push(i));
    }
    assert_eq!(channel.len(), 5);
    for i in 0..5 {
      assert_eq!(channel.pop(), Some(i));
    }
    assert!(channel.is_empty());
  }

  #[test]
  fn pop_on_closed_empty_channel_returns_none() {
    let channel = BoundedFrameChannel::<u32>::new(3);
    channel.close();
    assert!(channel.is_closed());
    assert_eq!(channel.pop(), None);
  }

  #[test]
  fn close_keeps_buffered_items_poppable() {
    let channel = BoundedFrameChannel::new(4);
    assert!(channel.push(1));
    assert!(channel.push(2));
    channel.close();
    assert!(!channel.push(3));
    assert_eq!(channel.pop(), Some(1));
    assert_eq!(channel.pop(), Some(2));
    assert_eq!(channel.pop(), None);
  }

  #[test]
  fn zero_capacity_rejects_push_and_yields_nothing() {
    let channel = BoundedFrameChannel::new(0);
    assert!(!channel.push(7u8));
    channel.close();
    assert_eq!(channel.pop(), None);
    assert!(channel.is_empty());
  }

  #[test]
  fn blocked_push_wakes_when_room_frees() {
    let channel = Arc::new(BoundedFrameChannel::new(1));
    assert!(channel.push(1));

    let producer = {
      let channel = Arc::clone(&channel);
      thread::spawn(move || channel.push(2))
    };

    thread::sleep(Duration::from_millis(50));
    assert_eq!(channel.len(), 1);
    assert_eq!(channel.pop(), Some(1));
    assert!(producer.join().unwrap());
    assert_eq!(channel.pop(), Some(2));
  }

  #[test]
  fn close_wakes_blocked_push_with_false() {
    let channel = Arc::new(BoundedFrameChannel::new(1));
    assert!(channel.push(1));

    let producer = {
      let channel = Arc::clone(&channel);
      thread::spawn(move || channel.push(2))
    };

    thread::sleep(Duration::from_millis(50));
    channel.close();
    assert!(!producer.join().unwrap());
    assert_eq!(channel.pop(), Some(1));
    assert_eq!(channel.pop(), None);
  }

  #[test]
  fn close_wakes_blocked_pop_with_none() {
    let channel = Arc::new(BoundedFrameChannel::<u32>::new(2));

    let consumers: Vec<_> = (0..2)
      .map(|_| {
        let channel = Arc::clone(&channel);
        thread::spawn(move || channel.pop())
      })
      .collect();

    thread::sleep(Duration::from_millis(50));
    channel.close();
    for consumer in consumers {
      assert_eq!(consumer.join().unwrap(), None);
    }
  }

  #[test]
  fn occupancy_never_exceeds_capacity_under_contention() {
    const CAPACITY: usize = 3;
    let channel = Arc::new(BoundedFrameChannel::new(CAPACITY));
    let max_seen = Arc::new(AtomicUsize::new(0));
    let processed = Arc::new(AtomicUsize::new(0));

    let producers: Vec<_> = (0..2)
      .map(|p| {
        let channel = Arc::clone(&channel);
        let max_seen = Arc::clone(&max_seen);
        thread::spawn(move || {
          for i in 0..50 {
            if !channel.push(p * 100 + i) {
              break;
            }
            max_seen.fetch_max(channel.len(), Ordering::SeqCst);
          }
        })
      })
      .collect();

    let consumers: Vec<_> = (0..2)
      .map(|_| {
        let channel = Arc::clone(&channel);
        let processed = Arc::clone(&processed);
        thread::spawn(move || {
          while channel.pop().is_some() {
            processed.fetch_add(1, Ordering::SeqCst);
          }
        })
      })
      .collect();

    for producer in producers {
      producer.join().unwrap();
    }
    channel.close();
    for consumer in consumers {
      consumer.join().unwrap();
    }

    assert!(max_seen.load(Ordering::SeqCst) <= CAPACITY);
    assert_eq!(processed.load(Ordering::SeqCst), 100);
    assert!(channel.is_empty());
  }
}
