// ==========================================
// 住院医师排班系统 - 缺勤领域模型
// ==========================================
// 红线: 阻断型缺勤与同人同槽位分配不可并存
// ==========================================

use crate::domain::calendar::{DateRange, SlotKey};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Absence {
    pub absence_id: String,
    pub person_id: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate, // 含
    pub absence_type: String, // VACATION / SICK / CONFERENCE / ...
    pub blocking: bool,
    /// 修改次数（冲突检测按修订号去重）
    #[serde(default)]
    pub revision: u32,
}

impl Absence {
    pub fn range(&self) -> DateRange {
        DateRange::new(self.start_date, self.end_date)
    }

    pub fn covers_date(&self, date: NaiveDate) -> bool {
        self.range().contains(date)
    }

    /// 是否阻断某人的某个槽位
    pub fn blocks(&self, person_id: &str, slot: &SlotKey) -> bool {
        self.blocking && self.person_id == person_id && self.covers_date(slot.date)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blocks_only_blocking_absence() {
        let d = |day| NaiveDate::from_ymd_opt(2026, 3, day).unwrap();
        let mut absence = Absence {
            absence_id: "A1".to_string(),
            person_id: "R1".to_string(),
            start_date: d(2),
            end_date: d(4),
            absence_type: "VACATION".to_string(),
            blocking: true,
            revision: 0,
        };
        assert!(absence.blocks("R1", &SlotKey::pm(d(4))));
        assert!(!absence.blocks("R1", &SlotKey::am(d(5))));
        assert!(!absence.blocks("R2", &SlotKey::am(d(3))));

        absence.blocking = false;
        assert!(!absence.blocks("R1", &SlotKey::am(d(3))));
    }
}
