// ==========================================
// 住院医师排班系统 - 日历与槽位模型
// ==========================================
// 职责: 日期窗口、排班槽位、滚动窗口切分
// ==========================================

use crate::domain::types::SubPeriod;
use chrono::{Datelike, Duration, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use std::fmt;

// ==========================================
// DateRange - 闭区间日期窗口
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate, // 含
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    /// 从起始日期和天数构造（days >= 1）
    pub fn from_start(start: NaiveDate, days: i64) -> Self {
        Self {
            start,
            end: start + Duration::days(days.max(1) - 1),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.start <= self.end
    }

    /// 天数（含首尾）
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    pub fn overlaps(&self, other: &DateRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    /// 向两侧扩展
    pub fn expand(&self, days: i64) -> DateRange {
        DateRange {
            start: self.start - Duration::days(days),
            end: self.end + Duration::days(days),
        }
    }

    pub fn iter_days(&self) -> impl Iterator<Item = NaiveDate> {
        let start = self.start;
        let n = self.days().max(0);
        (0..n).map(move |i| start + Duration::days(i))
    }

    /// 切分滚动窗口
    ///
    /// 规则:
    /// - 区间长度 >= window_days: 返回区间内全部 window_days 长度的滑动窗口
    /// - 否则: 整个区间作为单一窗口（限额由调用方按比例折算）
    pub fn rolling_windows(&self, window_days: i64) -> Vec<DateRange> {
        let window_days = window_days.max(1);
        if !self.is_valid() {
            return Vec::new();
        }
        if self.days() < window_days {
            return vec![*self];
        }
        let count = self.days() - window_days + 1;
        (0..count)
            .map(|i| DateRange::from_start(self.start + Duration::days(i), window_days))
            .collect()
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

// ==========================================
// SlotKey - 槽位标识（日期 + 时段）
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SlotKey {
    pub date: NaiveDate,
    pub period: SubPeriod,
}

impl SlotKey {
    pub fn new(date: NaiveDate, period: SubPeriod) -> Self {
        Self { date, period }
    }

    pub fn am(date: NaiveDate) -> Self {
        Self::new(date, SubPeriod::Am)
    }

    pub fn pm(date: NaiveDate) -> Self {
        Self::new(date, SubPeriod::Pm)
    }

    /// 全序序号（用于休息间隔计算）
    pub fn ordinal(&self) -> i64 {
        self.date.num_days_from_ce() as i64 * 2 + self.period.index()
    }
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.date, self.period)
    }
}

// ==========================================
// Slot - 可排班时间单元
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub date: NaiveDate,
    pub period: SubPeriod,
    pub is_weekend: bool,
    pub is_holiday: bool,
}

impl Slot {
    pub fn key(&self) -> SlotKey {
        SlotKey::new(self.date, self.period)
    }

    /// 生成窗口内全部槽位
    pub fn generate(range: &DateRange, holidays: &[NaiveDate]) -> Vec<Slot> {
        let mut slots = Vec::with_capacity((range.days().max(0) * 2) as usize);
        for date in range.iter_days() {
            let is_weekend = matches!(date.weekday(), Weekday::Sat | Weekday::Sun);
            let is_holiday = holidays.contains(&date);
            for period in SubPeriod::all() {
                slots.push(Slot {
                    date,
                    period,
                    is_weekend,
                    is_holiday,
                });
            }
        }
        slots
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_rolling_windows_long_range() {
        let range = DateRange::new(d(2026, 3, 1), d(2026, 3, 30));
        let windows = range.rolling_windows(28);
        assert_eq!(windows.len(), 3);
        assert_eq!(windows[0].start, d(2026, 3, 1));
        assert_eq!(windows[2].end, d(2026, 3, 30));
        assert!(windows.iter().all(|w| w.days() == 28));
    }

    #[test]
    fn test_rolling_windows_short_range() {
        let range = DateRange::new(d(2026, 3, 1), d(2026, 3, 7));
        let windows = range.rolling_windows(28);
        assert_eq!(windows, vec![range]);
    }

    #[test]
    fn test_slot_ordinal_is_contiguous() {
        let am = SlotKey::am(d(2026, 3, 1));
        let pm = SlotKey::pm(d(2026, 3, 1));
        let next_am = SlotKey::am(d(2026, 3, 2));
        assert_eq!(pm.ordinal() - am.ordinal(), 1);
        assert_eq!(next_am.ordinal() - pm.ordinal(), 1);
    }

    #[test]
    fn test_generate_flags_weekend() {
        // 2026-03-07 为周六
        let slots = Slot::generate(&DateRange::new(d(2026, 3, 6), d(2026, 3, 7)), &[d(2026, 3, 6)]);
        assert_eq!(slots.len(), 4);
        assert!(slots[0].is_holiday);
        assert!(!slots[0].is_weekend);
        assert!(slots[2].is_weekend);
    }
}
