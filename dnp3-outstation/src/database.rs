//! Point database with staged updates
//!
//! Producers stage changes at any time; the session drains the staging
//! queue with `flush_updates` when it handles a data-update event. A flush
//! applies each change to the static value and, for event-producing kinds
//! whose value or quality actually changed, inserts an event into the
//! buffer under the point's configured class.

use crate::buffer::EventBuffer;
use crate::config::{DatabaseConfig, EventMaxConfig};
use dnp3_core::{Dnp3Error, Dnp3Result, Event, EventClass, PointKind, PointValue, StaticPoint, Update};
use tracing::warn;

/// The outstation's typed point database
#[derive(Debug)]
pub struct Database {
    binaries: Vec<StaticPoint>,
    analogs: Vec<StaticPoint>,
    counters: Vec<StaticPoint>,
    control_statuses: Vec<StaticPoint>,
    setpoint_statuses: Vec<StaticPoint>,
    staged: Vec<Update>,
    buffer: EventBuffer,
}

fn initial_points(count: u16, value: PointValue) -> Vec<StaticPoint> {
    (0..count).map(|_| StaticPoint::new(value)).collect()
}

impl Database {
    /// Create a database with default-valued points
    #[must_use]
    pub fn new(config: &DatabaseConfig, events: &EventMaxConfig) -> Self {
        Self {
            binaries: initial_points(config.num_binaries, PointValue::Binary(false)),
            analogs: initial_points(config.num_analogs, PointValue::Analog(0.0)),
            counters: initial_points(config.num_counters, PointValue::Counter(0)),
            control_statuses: initial_points(
                config.num_control_statuses,
                PointValue::ControlStatus(false),
            ),
            setpoint_statuses: initial_points(
                config.num_setpoint_statuses,
                PointValue::SetpointStatus(0.0),
            ),
            staged: Vec::new(),
            buffer: EventBuffer::new(events),
        }
    }

    fn points(&self, kind: PointKind) -> &[StaticPoint] {
        match kind {
            PointKind::Binary => &self.binaries,
            PointKind::Analog => &self.analogs,
            PointKind::Counter => &self.counters,
            PointKind::ControlStatus => &self.control_statuses,
            PointKind::SetpointStatus => &self.setpoint_statuses,
        }
    }

    fn points_mut(&mut self, kind: PointKind) -> &mut [StaticPoint] {
        match kind {
            PointKind::Binary => &mut self.binaries,
            PointKind::Analog => &mut self.analogs,
            PointKind::Counter => &mut self.counters,
            PointKind::ControlStatus => &mut self.control_statuses,
            PointKind::SetpointStatus => &mut self.setpoint_statuses,
        }
    }

    /// Number of points of one kind
    #[must_use]
    pub fn num_points(&self, kind: PointKind) -> usize {
        self.points(kind).len()
    }

    /// Look up one point
    #[must_use]
    pub fn point(&self, kind: PointKind, index: u16) -> Option<&StaticPoint> {
        self.points(kind).get(index as usize)
    }

    /// Assign the event class of one point
    ///
    /// # Errors
    /// Fails when the index is out of range.
    pub fn set_class(&mut self, kind: PointKind, index: u16, class: EventClass) -> Dnp3Result<()> {
        let points = self.points_mut(kind);
        let len = points.len();
        match points.get_mut(index as usize) {
            Some(point) => {
                point.class = class;
                Ok(())
            }
            None => Err(Dnp3Error::InvalidConfig(format!(
                "{} index {} out of range ({} points)",
                kind, index, len
            ))),
        }
    }

    /// Stage a change for the next flush
    pub fn stage(&mut self, update: Update) {
        self.staged.push(update);
    }

    /// Whether any staged change is pending
    #[must_use]
    pub fn has_staged(&self) -> bool {
        !self.staged.is_empty()
    }

    /// Apply every staged change, generating events for real changes
    ///
    /// Returns the number of updates applied. Updates against unknown
    /// indices are dropped with a warning.
    pub fn flush_updates(&mut self) -> usize {
        let staged = std::mem::take(&mut self.staged);
        let mut applied = 0;
        for update in staged {
            let kind = update.kind();
            let Some(point) = self.points_mut(kind).get_mut(update.index as usize) else {
                warn!(
                    kind = kind.as_str(),
                    index = update.index,
                    "update dropped, index out of range"
                );
                continue;
            };
            let changed = point.value != update.value || point.quality != update.quality;
            point.value = update.value;
            point.quality = update.quality;
            point.time = update.time;
            let class = point.class;
            applied += 1;

            if changed && kind.produces_events() {
                self.buffer.insert(Event {
                    kind,
                    index: update.index,
                    value: update.value,
                    quality: update.quality,
                    time: update.time,
                    class,
                });
            }
        }
        applied
    }

    /// Event buffer holding pending changes
    #[must_use]
    pub fn buffer(&self) -> &EventBuffer {
        &self.buffer
    }

    /// Mutable event buffer access for selection and clearing
    pub fn buffer_mut(&mut self) -> &mut EventBuffer {
        &mut self.buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dnp3_core::{quality, Dnp3Time};

    fn database() -> Database {
        Database::new(
            &DatabaseConfig {
                num_binaries: 3,
                num_analogs: 2,
                num_counters: 1,
                num_control_statuses: 1,
                num_setpoint_statuses: 1,
            },
            &EventMaxConfig::default(),
        )
    }

    #[test]
    fn test_flush_applies_and_generates_event() {
        let mut db = database();
        db.set_class(PointKind::Binary, 1, EventClass::Class2).unwrap();
        db.stage(Update::new(
            1,
            PointValue::Binary(true),
            quality::ONLINE,
            Dnp3Time::from_millis(42),
        ));
        assert!(db.has_staged());

        assert_eq!(db.flush_updates(), 1);
        let point = db.point(PointKind::Binary, 1).unwrap();
        assert_eq!(point.value, PointValue::Binary(true));
        assert_eq!(point.quality, quality::ONLINE);
        assert!(db.buffer().has_class_data(EventClass::Class2));
    }

    #[test]
    fn test_flush_without_change_emits_nothing() {
        let mut db = database();
        db.stage(Update::new(
            0,
            PointValue::Binary(true),
            quality::ONLINE,
            Dnp3Time::from_millis(1),
        ));
        db.flush_updates();
        // same value and quality again
        db.stage(Update::new(
            0,
            PointValue::Binary(true),
            quality::ONLINE,
            Dnp3Time::from_millis(2),
        ));
        db.flush_updates();
        assert_eq!(db.buffer().len(PointKind::Binary), 1);
    }

    #[test]
    fn test_flush_drops_out_of_range() {
        let mut db = database();
        db.stage(Update::new(
            9,
            PointValue::Counter(5),
            quality::ONLINE,
            Dnp3Time::from_millis(1),
        ));
        assert_eq!(db.flush_updates(), 0);
        assert!(db.buffer().is_empty());
    }

    #[test]
    fn test_static_only_kinds_never_generate_events() {
        let mut db = database();
        db.stage(Update::new(
            0,
            PointValue::SetpointStatus(2.5),
            quality::ONLINE,
            Dnp3Time::from_millis(1),
        ));
        assert_eq!(db.flush_updates(), 1);
        assert!(db.buffer().is_empty());
    }
}
