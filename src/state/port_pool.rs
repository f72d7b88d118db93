//! 端口池
//!
//! 为运行中的工作负载分配宿主机端口。分配是单个原子操作（取最小可用端口），
//! 不存在“先检查后提交”的竞争窗口。

use std::collections::BTreeSet;
use std::sync::{Mutex, PoisonError};

/// 端口池错误
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PortPoolError {
    #[error("No available ports")]
    Exhausted,
}

/// 端口池
pub struct PortPool {
    min: u16,
    max: u16,
    available: Mutex<BTreeSet<u16>>,
}

impl PortPool {
    /// 创建 [min, max] 闭区间的端口池
    pub fn new(min: u16, max: u16) -> Self {
        let (min, max) = if min <= max { (min, max) } else { (max, min) };
        Self {
            min,
            max,
            available: Mutex::new((min..=max).collect()),
        }
    }

    /// 取出最小的可用端口
    pub fn acquire(&self) -> Result<u16, PortPoolError> {
        let mut available = self.available.lock().unwrap_or_else(PoisonError::into_inner);
        available.pop_first().ok_or(PortPoolError::Exhausted)
    }

    /// 归还端口
    ///
    /// 范围外或已在池中的端口被忽略并返回 false，重复归还不会产生副作用
    pub fn release(&self, port: u16) -> bool {
        if port < self.min || port > self.max {
            return false;
        }
        let mut available = self.available.lock().unwrap_or_else(PoisonError::into_inner);
        available.insert(port)
    }

    pub fn available_count(&self) -> usize {
        self.available
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn capacity(&self) -> usize {
        (self.max - self.min) as usize + 1
    }
}
