//! Fixed-schedule timing strategy
//!
//! Replays a traced dataset's timing schedule. Entries sharing a
//! timestamp are dispatched as one burst. Two zero-offset policies:
//! *auto* makes the first entry's timestamp the zero time; *manual*
//! subtracts a user-supplied offset. Entries whose adjusted timestamp is
//! already in the past dispatch immediately.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::collections::HashMap;

use crate::clock::NANOS_PER_MILLI;
use crate::dataset::model::TimingScheduleEntry;
use crate::domain_types::ConversationId;
use crate::timing::strategy::{PhaseDriver, TimingError, TimingStrategy};

pub struct FixedScheduleStrategy {
    /// Timestamp-ordered bursts: each entry is one timestamp and every
    /// conversation scheduled at it.
    groups: Vec<(i64, Vec<ConversationId>)>,
    zero_ms: i64,
    /// Next turn index per conversation; traces repeat a conversation id
    /// once per turn.
    next_turn: HashMap<ConversationId, usize>,
}

impl FixedScheduleStrategy {
    pub fn new(
        auto_offset: bool,
        manual_offset_ms: Option<i64>,
        schedule: &[TimingScheduleEntry],
    ) -> Result<Self, TimingError> {
        if schedule.is_empty() {
            return Err(TimingError::EmptySchedule);
        }

        let mut grouped: BTreeMap<i64, Vec<ConversationId>> = BTreeMap::new();
        for entry in schedule {
            grouped
                .entry(entry.timestamp_ms)
                .or_default()
                .push(entry.conversation_id.clone());
        }
        let groups: Vec<(i64, Vec<ConversationId>)> = grouped.into_iter().collect();

        let zero_ms = if auto_offset {
            groups[0].0
        } else {
            manual_offset_ms.unwrap_or(0)
        };

        Ok(Self {
            groups,
            zero_ms,
            next_turn: HashMap::new(),
        })
    }

    pub fn total_entries(&self) -> u64 {
        self.groups.iter().map(|(_, ids)| ids.len() as u64).sum()
    }

    pub(crate) fn zero_ms(&self) -> i64 {
        self.zero_ms
    }
}

#[async_trait]
impl TimingStrategy for FixedScheduleStrategy {
    async fn run_phase(&mut self, driver: &mut PhaseDriver<'_>) -> Result<(), TimingError> {
        let origin_ns = driver.now_ns();
        for (timestamp_ms, ids) in &self.groups {
            if driver.is_cancelled() {
                break;
            }
            let offset_ms = timestamp_ms - self.zero_ms;
            let target_ns = if offset_ms <= 0 {
                origin_ns
            } else {
                origin_ns + offset_ms as u64 * NANOS_PER_MILLI
            };
            if target_ns > driver.now_ns() && !driver.sleep_until_ns(target_ns).await {
                break;
            }
            // Everything at this timestamp goes out as one burst.
            for conversation_id in ids {
                let turn_index = self.next_turn.entry(conversation_id.clone()).or_insert(0);
                let index = *turn_index;
                *turn_index += 1;
                driver.issue_to(conversation_id.clone(), index, Some(target_ns))?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(timestamp_ms: i64, id: &str) -> TimingScheduleEntry {
        TimingScheduleEntry {
            timestamp_ms,
            conversation_id: ConversationId::try_new(id.to_string()).unwrap(),
        }
    }

    #[test]
    fn empty_schedule_is_a_configuration_error() {
        assert!(matches!(
            FixedScheduleStrategy::new(false, None, &[]),
            Err(TimingError::EmptySchedule)
        ));
    }

    #[test]
    fn entries_sharing_a_timestamp_group_into_one_burst() {
        let strategy = FixedScheduleStrategy::new(
            false,
            None,
            &[
                entry(0, "a"),
                entry(100, "b"),
                entry(100, "c"),
                entry(200, "d"),
            ],
        )
        .unwrap();

        let stamps: Vec<i64> = strategy.groups.iter().map(|(ts, _)| *ts).collect();
        assert_eq!(stamps, vec![0, 100, 200]);
        assert_eq!(strategy.groups[1].1.len(), 2);
        assert_eq!(strategy.total_entries(), 4);
    }

    #[test]
    fn zero_offset_policies() {
        let schedule = [entry(1_000, "a"), entry(1_100, "b"), entry(1_200, "c")];

        let auto = FixedScheduleStrategy::new(true, None, &schedule).unwrap();
        assert_eq!(auto.zero_ms(), 1_000);

        let manual = FixedScheduleStrategy::new(false, Some(500), &schedule).unwrap();
        assert_eq!(manual.zero_ms(), 500);

        let none = FixedScheduleStrategy::new(false, None, &schedule).unwrap();
        assert_eq!(none.zero_ms(), 0);
    }

    #[test]
    fn repeated_conversation_ids_advance_the_turn_index() {
        let mut strategy = FixedScheduleStrategy::new(
            false,
            None,
            &[entry(0, "a"), entry(100, "a"), entry(200, "a")],
        )
        .unwrap();

        // Drain the counters the way run_phase would.
        for (_, ids) in &strategy.groups.clone() {
            for id in ids {
                let turn = strategy.next_turn.entry(id.clone()).or_insert(0);
                *turn += 1;
            }
        }
        let a = ConversationId::try_new("a".to_string()).unwrap();
        assert_eq!(strategy.next_turn[&a], 3);
    }
}
