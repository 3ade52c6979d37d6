//! 轮询选择器
//!
//! 为每个区分键（等级 + 策略）维护一个轮转索引，使重复的相同请求在分数打平的候选之间轮换。

use parking_lot::Mutex;
use std::collections::HashMap;

/// 轮询选择器
///
/// 与限流跟踪器生命周期相同，可在多个并发请求间共享。
#[derive(Debug, Default)]
pub struct RoundRobinSelector {
    counters: Mutex<HashMap<String, usize>>,
}

impl RoundRobinSelector {
    /// 创建新的轮询选择器
    pub fn new() -> Self {
        Self::default()
    }

    /// 生成区分键
    pub fn key_for(category: impl std::fmt::Display, strategy: impl std::fmt::Display) -> String {
        format!("{category}:{strategy}")
    }

    /// 取下一个索引并推进计数器
    ///
    /// `len` 为 0 时返回 None 且不推进。
    pub fn next_index(&self, key: &str, len: usize) -> Option<usize> {
        if len == 0 {
            return None;
        }
        let mut counters = self.counters.lock();
        let counter = counters.entry(key.to_string()).or_insert(0);
        let index = *counter % len;
        *counter = counter.wrapping_add(1);
        Some(index)
    }

    /// 从打平的候选中选出一个
    pub fn pick<'a, T>(&self, key: &str, candidates: &'a [T]) -> Option<&'a T> {
        self.next_index(key, candidates.len())
            .and_then(|index| candidates.get(index))
    }

    /// 重置所有计数器
    pub fn reset(&self) {
        self.counters.lock().clear();
    }
}
