//! Bounded event buffer
//!
//! Events accumulate here between responses. Each record moves through
//! three states: unselected on insertion, selected when a response context
//! picks it for a fragment, and written once the codec has encoded it.
//! `clear_written` removes written records after the peer confirms the
//! fragment; `deselect` returns everything to unselected when a send fails,
//! so no event is lost before a confirm.

use crate::config::EventMaxConfig;
use dnp3_core::{Event, EventClass, PointKind};
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecordState {
    Unselected,
    Selected,
    Written,
}

#[derive(Debug, Clone)]
struct EventRecord {
    event: Event,
    sequence: u64,
    state: RecordState,
}

/// Bounded store of point changes, grouped by kind
///
/// Capacity is enforced per kind: inserting into a full queue drops the
/// oldest record of that kind and latches the overflow flag until it is
/// explicitly cleared.
#[derive(Debug)]
pub struct EventBuffer {
    queues: [VecDeque<EventRecord>; 3],
    capacities: [usize; 3],
    next_sequence: u64,
    overflow: bool,
}

fn slot(kind: PointKind) -> Option<usize> {
    match kind {
        PointKind::Binary => Some(0),
        PointKind::Analog => Some(1),
        PointKind::Counter => Some(2),
        PointKind::ControlStatus | PointKind::SetpointStatus => None,
    }
}

impl EventBuffer {
    /// Create a buffer with the given per-kind capacities
    #[must_use]
    pub fn new(config: &EventMaxConfig) -> Self {
        Self {
            queues: [VecDeque::new(), VecDeque::new(), VecDeque::new()],
            capacities: [
                config.max_binary_events,
                config.max_analog_events,
                config.max_counter_events,
            ],
            next_sequence: 0,
            overflow: false,
        }
    }

    /// Append an event, dropping the oldest of its kind on overflow
    ///
    /// Events of non-event-producing kinds are ignored.
    pub fn insert(&mut self, event: Event) {
        let Some(i) = slot(event.kind) else {
            debug_assert!(false, "insert of non-event kind {}", event.kind);
            return;
        };
        let sequence = self.next_sequence;
        self.next_sequence += 1;

        if self.capacities[i] == 0 {
            self.overflow = true;
            return;
        }
        if self.queues[i].len() >= self.capacities[i] {
            self.queues[i].pop_front();
            self.overflow = true;
        }
        self.queues[i].push_back(EventRecord {
            event,
            sequence,
            state: RecordState::Unselected,
        });
    }

    /// Whether any unselected event of the given class exists
    #[must_use]
    pub fn has_class_data(&self, class: EventClass) -> bool {
        self.queues.iter().any(|q| {
            q.iter()
                .any(|r| r.state == RecordState::Unselected && r.event.class == class)
        })
    }

    /// Mark up to `max` oldest unselected events of one kind as selected
    ///
    /// `class` of `None` matches every class. Selection order is strictly
    /// by insertion sequence within the filtered subset. Returns the number
    /// selected.
    pub fn select(&mut self, class: Option<EventClass>, kind: PointKind, max: usize) -> usize {
        let Some(i) = slot(kind) else { return 0 };
        let mut selected = 0;
        for record in self.queues[i].iter_mut() {
            if selected >= max {
                break;
            }
            if record.state != RecordState::Unselected {
                continue;
            }
            if class.is_some_and(|c| record.event.class != c) {
                continue;
            }
            record.state = RecordState::Selected;
            selected += 1;
        }
        selected
    }

    /// Number of selected events not yet written by the codec
    #[must_use]
    pub fn num_selected(&self) -> usize {
        self.queues
            .iter()
            .map(|q| {
                q.iter()
                    .filter(|r| r.state == RecordState::Selected)
                    .count()
            })
            .sum()
    }

    /// Selected-but-unwritten events of one kind, in selection order
    #[must_use]
    pub fn selected_events(&self, kind: PointKind) -> Vec<Event> {
        let Some(i) = slot(kind) else {
            return Vec::new();
        };
        self.queues[i]
            .iter()
            .filter(|r| r.state == RecordState::Selected)
            .map(|r| r.event)
            .collect()
    }

    /// Mark the first `count` selected events of one kind as written
    pub fn mark_written(&mut self, kind: PointKind, count: usize) {
        let Some(i) = slot(kind) else { return };
        let mut remaining = count;
        for record in self.queues[i].iter_mut() {
            if remaining == 0 {
                break;
            }
            if record.state == RecordState::Selected {
                record.state = RecordState::Written;
                remaining -= 1;
            }
        }
        debug_assert_eq!(remaining, 0, "marked more events written than selected");
    }

    /// Drop every event the codec has confirmed written
    pub fn clear_written(&mut self) {
        for queue in &mut self.queues {
            queue.retain(|r| r.state != RecordState::Written);
        }
    }

    /// Return every selected or written event to the unselected state
    pub fn deselect(&mut self) {
        for queue in &mut self.queues {
            for record in queue.iter_mut() {
                record.state = RecordState::Unselected;
            }
        }
    }

    /// Whether the overflow flag is latched
    #[must_use]
    pub fn is_overflow(&self) -> bool {
        self.overflow
    }

    /// Clear the latched overflow flag
    pub fn clear_overflow(&mut self) {
        self.overflow = false;
    }

    /// Total number of buffered events of one kind
    #[must_use]
    pub fn len(&self, kind: PointKind) -> usize {
        slot(kind).map_or(0, |i| self.queues[i].len())
    }

    /// Whether the buffer holds no events at all
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queues.iter().all(VecDeque::is_empty)
    }

    /// Insertion sequence numbers of one kind, oldest first (test support)
    #[cfg(test)]
    fn sequences(&self, kind: PointKind) -> Vec<u64> {
        let i = slot(kind).unwrap();
        self.queues[i].iter().map(|r| r.sequence).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dnp3_core::{Dnp3Time, PointValue};

    fn config(capacity: usize) -> EventMaxConfig {
        EventMaxConfig {
            max_binary_events: capacity,
            max_analog_events: capacity,
            max_counter_events: capacity,
        }
    }

    fn binary_event(index: u16, class: EventClass) -> Event {
        Event {
            kind: PointKind::Binary,
            index,
            value: PointValue::Binary(true),
            quality: 0x01,
            time: Dnp3Time::from_millis(index as u64),
            class,
        }
    }

    #[test]
    fn test_selection_preserves_insertion_order() {
        let mut buffer = EventBuffer::new(&config(10));
        for i in 0..5 {
            buffer.insert(binary_event(i, EventClass::Class1));
        }
        let n = buffer.select(None, PointKind::Binary, usize::MAX);
        assert_eq!(n, 5);
        let indices: Vec<u16> = buffer
            .selected_events(PointKind::Binary)
            .iter()
            .map(|e| e.index)
            .collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_overflow_drops_oldest_and_latches() {
        let mut buffer = EventBuffer::new(&config(2));
        for i in 0..3 {
            buffer.insert(binary_event(i, EventClass::Class1));
        }
        assert!(buffer.is_overflow());
        assert_eq!(buffer.len(PointKind::Binary), 2);
        // the two newest survive
        assert_eq!(buffer.sequences(PointKind::Binary), vec![1, 2]);

        buffer.clear_overflow();
        assert!(!buffer.is_overflow());
    }

    #[test]
    fn test_select_filters_by_class() {
        let mut buffer = EventBuffer::new(&config(10));
        buffer.insert(binary_event(0, EventClass::Class1));
        buffer.insert(binary_event(1, EventClass::Class2));
        buffer.insert(binary_event(2, EventClass::Class1));

        let n = buffer.select(Some(EventClass::Class1), PointKind::Binary, usize::MAX);
        assert_eq!(n, 2);
        assert!(buffer.has_class_data(EventClass::Class2));
        assert!(!buffer.has_class_data(EventClass::Class1));
    }

    #[test]
    fn test_select_respects_max() {
        let mut buffer = EventBuffer::new(&config(10));
        for i in 0..5 {
            buffer.insert(binary_event(i, EventClass::Class1));
        }
        assert_eq!(buffer.select(None, PointKind::Binary, 3), 3);
        assert_eq!(buffer.num_selected(), 3);
        // a second select picks up where the first stopped
        assert_eq!(buffer.select(None, PointKind::Binary, 10), 2);
    }

    #[test]
    fn test_clear_written_removes_only_written() {
        let mut buffer = EventBuffer::new(&config(10));
        for i in 0..4 {
            buffer.insert(binary_event(i, EventClass::Class1));
        }
        buffer.select(None, PointKind::Binary, usize::MAX);
        buffer.mark_written(PointKind::Binary, 2);
        assert_eq!(buffer.num_selected(), 2);

        buffer.clear_written();
        assert_eq!(buffer.len(PointKind::Binary), 2);
        assert_eq!(buffer.num_selected(), 2);
    }

    #[test]
    fn test_deselect_keeps_everything() {
        let mut buffer = EventBuffer::new(&config(10));
        for i in 0..3 {
            buffer.insert(binary_event(i, EventClass::Class1));
        }
        buffer.select(None, PointKind::Binary, usize::MAX);
        buffer.mark_written(PointKind::Binary, 1);

        buffer.deselect();
        assert_eq!(buffer.len(PointKind::Binary), 3);
        assert_eq!(buffer.num_selected(), 0);
        assert!(buffer.has_class_data(EventClass::Class1));
    }

    #[test]
    fn test_zero_capacity_latches_overflow() {
        let mut buffer = EventBuffer::new(&config(0));
        buffer.insert(binary_event(0, EventClass::Class1));
        assert!(buffer.is_overflow());
        assert!(buffer.is_empty());
    }
}
