// ==========================================
// 住院医师排班系统 - 窗口写锁
// ==========================================
// 红线: 同一 (program, window) 单写者
//       排班生成与换班执行必须先取得覆盖其窗口的写锁
// 说明: 同一 program 下日期区间重叠即视为冲突
//       采样/推演为只读,不需要写锁
// ==========================================

use crate::domain::calendar::DateRange;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

#[derive(Debug, Clone)]
struct HeldWindow {
    id: u64,
    program_id: String,
    window: DateRange,
}

#[derive(Debug, Default)]
struct RegistryInner {
    held: Mutex<Vec<HeldWindow>>,
    notify: Notify,
    next_id: AtomicU64,
}

impl RegistryInner {
    fn try_insert(&self, program_id: &str, window: DateRange) -> Option<u64> {
        let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        if held
            .iter()
            .any(|h| h.program_id == program_id && h.window.overlaps(&window))
        {
            return None;
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        held.push(HeldWindow {
            id,
            program_id: program_id.to_string(),
            window,
        });
        Some(id)
    }

    fn release(&self, id: u64) {
        let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        held.retain(|h| h.id != id);
        drop(held);
        self.notify.notify_waiters();
    }
}

// ==========================================
// WindowLockRegistry - 窗口写锁注册表
// ==========================================
#[derive(Debug, Clone, Default)]
pub struct WindowLockRegistry {
    inner: Arc<RegistryInner>,
}

impl WindowLockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 立即尝试加锁（冲突时返回 None）
    pub fn try_acquire(&self, program_id: &str, window: DateRange) -> Option<WindowGuard> {
        self.inner.try_insert(program_id, window).map(|id| WindowGuard {
            inner: self.inner.clone(),
            id,
            program_id: program_id.to_string(),
            window,
        })
    }

    /// 加锁,冲突时等待持有者释放
    pub async fn acquire(&self, program_id: &str, window: DateRange) -> WindowGuard {
        loop {
            // 先注册通知再检查,避免漏掉检查与等待之间的释放
            let notified = self.inner.notify.notified();
            if let Some(guard) = self.try_acquire(program_id, window) {
                return guard;
            }
            tracing::debug!(program_id = %program_id, window = %window, "窗口写锁冲突，等待释放");
            notified.await;
        }
    }

    /// 当前持有的锁数量
    pub fn held_count(&self) -> usize {
        self.inner
            .held
            .lock()
            .map(|h| h.len())
            .unwrap_or_else(|e| e.into_inner().len())
    }
}

// ==========================================
// WindowGuard - 写锁守卫（Drop 时释放）
// ==========================================
#[derive(Debug)]
pub struct WindowGuard {
    inner: Arc<RegistryInner>,
    id: u64,
    program_id: String,
    window: DateRange,
}

impl WindowGuard {
    pub fn program_id(&self) -> &str {
        &self.program_id
    }

    pub fn window(&self) -> DateRange {
        self.window
    }
}

impl Drop for WindowGuard {
    fn drop(&mut self) {
        self.inner.release(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::time::Duration;

    fn range(start: u32, end: u32) -> DateRange {
        DateRange::new(
            NaiveDate::from_ymd_opt(2026, 3, start).unwrap(),
            NaiveDate::from_ymd_opt(2026, 3, end).unwrap(),
        )
    }

    #[test]
    fn test_overlapping_windows_conflict() {
        let registry = WindowLockRegistry::new();
        let guard = registry.try_acquire("IM", range(1, 7)).unwrap();
        assert!(registry.try_acquire("IM", range(7, 14)).is_none());
        assert!(registry.try_acquire("IM", range(8, 14)).is_some());
        assert!(registry.try_acquire("PEDS", range(1, 7)).is_some());
        drop(guard);
        assert!(registry.try_acquire("IM", range(3, 5)).is_some());
    }

    #[tokio::test]
    async fn test_acquire_waits_for_release() {
        let registry = WindowLockRegistry::new();
        let guard = registry.acquire("IM", range(1, 7)).await;

        let waiter = {
            let registry = registry.clone();
            tokio::spawn(async move {
                let g = registry.acquire("IM", range(5, 10)).await;
                g.window()
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());
        drop(guard);

        let acquired = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(acquired, range(5, 10));
        assert_eq!(registry.held_count(), 0);
    }
}
