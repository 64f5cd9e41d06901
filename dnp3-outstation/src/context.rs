//! Response context
//!
//! Drives what goes into each response fragment. `configure` parses a read
//! request into event selections and static iteration records; each call to
//! `load_response` then fills one fragment with events first and static
//! data second, tracking exactly what was written so the next fragment
//! resumes where this one stopped. `load_unsol` is the unsolicited
//! counterpart: it selects by class mask and always produces a single
//! confirmed fragment.

use crate::buffer::EventBuffer;
use crate::config::DefaultVariations;
use crate::database::Database;
use dnp3_application::apdu::{Apdu, ParsedApdu};
use dnp3_application::control::ControlField;
use dnp3_application::function::FunctionCode;
use dnp3_application::iin::IINField;
use dnp3_application::objects::{self, ObjectDescriptor};
use dnp3_core::{ClassMask, Dnp3Error, Dnp3Result, EventClass, PointKind};
use std::collections::VecDeque;
use tracing::warn;

/// Which traffic the context is currently assembling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseMode {
    #[default]
    Undefined,
    Solicited,
    Unsolicited,
}

/// Default object variations resolved against the registry
#[derive(Debug, Clone, Copy)]
pub struct ResponseTypes {
    pub static_binary: &'static ObjectDescriptor,
    pub static_analog: &'static ObjectDescriptor,
    pub static_counter: &'static ObjectDescriptor,
    pub static_control_status: &'static ObjectDescriptor,
    pub static_setpoint_status: &'static ObjectDescriptor,
    pub event_binary: &'static ObjectDescriptor,
    pub event_analog: &'static ObjectDescriptor,
    pub event_counter: &'static ObjectDescriptor,
}

impl ResponseTypes {
    /// Resolve configured variation numbers against the object registry
    ///
    /// # Errors
    /// Fails when a configured variation has no registered encoder.
    pub fn from_config(variations: &DefaultVariations) -> Dnp3Result<Self> {
        let static_of = |kind: PointKind, var: u8| {
            objects::static_descriptor(kind, var).ok_or_else(|| {
                Dnp3Error::InvalidConfig(format!("no static variation {} for {}", var, kind))
            })
        };
        let event_of = |kind: PointKind, var: u8| {
            objects::event_descriptor(kind, var).ok_or_else(|| {
                Dnp3Error::InvalidConfig(format!("no event variation {} for {}", var, kind))
            })
        };
        Ok(Self {
            static_binary: static_of(PointKind::Binary, variations.static_binary)?,
            static_analog: static_of(PointKind::Analog, variations.static_analog)?,
            static_counter: static_of(PointKind::Counter, variations.static_counter)?,
            static_control_status: static_of(
                PointKind::ControlStatus,
                variations.static_control_status,
            )?,
            static_setpoint_status: static_of(
                PointKind::SetpointStatus,
                variations.static_setpoint_status,
            )?,
            event_binary: event_of(PointKind::Binary, variations.event_binary)?,
            event_analog: event_of(PointKind::Analog, variations.event_analog)?,
            event_counter: event_of(PointKind::Counter, variations.event_counter)?,
        })
    }
}

/// Cursor over one contiguous static range still to be written
#[derive(Debug)]
struct IterRecord {
    kind: PointKind,
    desc: &'static ObjectDescriptor,
    /// Next index to emit; advances as fragments fill
    next: u16,
    stop: u16,
}

/// Builds response fragments from the database and the event buffer
#[derive(Debug)]
pub struct ResponseContext {
    types: ResponseTypes,
    mode: ResponseMode,
    fir: bool,
    fin: bool,
    temp_iin: IINField,
    static_binaries: VecDeque<IterRecord>,
    static_counters: VecDeque<IterRecord>,
    static_analogs: VecDeque<IterRecord>,
    static_controls: VecDeque<IterRecord>,
    static_setpoints: VecDeque<IterRecord>,
    /// Event descriptors active for the current response; a read header of
    /// group 2 with a concrete variation overrides the binary default
    event_binary: &'static ObjectDescriptor,
    event_analog: &'static ObjectDescriptor,
    event_counter: &'static ObjectDescriptor,
}

fn load_static_queue(
    queue: &mut VecDeque<IterRecord>,
    apdu: &mut Apdu,
    db: &Database,
) -> bool {
    while let Some(record) = queue.front_mut() {
        let desc = record.desc;
        let kind = record.kind;
        let written = apdu.write_contiguous_with(desc, record.next, record.stop, |index, slot| {
            if let Some(point) = db.point(kind, index) {
                objects::encode_static(desc, point, slot);
            }
        });
        let done =
            written > 0 && record.next as usize + written - 1 == record.stop as usize;
        if done {
            queue.pop_front();
        } else {
            if written > 0 {
                record.next += written as u16;
            }
            return false;
        }
    }
    true
}

impl ResponseContext {
    #[must_use]
    pub fn new(types: ResponseTypes) -> Self {
        Self {
            types,
            mode: ResponseMode::Undefined,
            fir: true,
            fin: false,
            temp_iin: IINField::empty(),
            static_binaries: VecDeque::new(),
            static_counters: VecDeque::new(),
            static_analogs: VecDeque::new(),
            static_controls: VecDeque::new(),
            static_setpoints: VecDeque::new(),
            event_binary: types.event_binary,
            event_analog: types.event_analog,
            event_counter: types.event_counter,
        }
    }

    /// Discard all queued work and deselect the buffer
    ///
    /// Selected-but-unconfirmed events return to the unselected state, so a
    /// failed send loses nothing.
    pub fn reset(&mut self, buffer: &mut EventBuffer) {
        self.fir = true;
        self.fin = false;
        self.mode = ResponseMode::Undefined;
        self.temp_iin.zero();
        self.static_binaries.clear();
        self.static_counters.clear();
        self.static_analogs.clear();
        self.static_controls.clear();
        self.static_setpoints.clear();
        self.event_binary = self.types.event_binary;
        self.event_analog = self.types.event_analog;
        self.event_counter = self.types.event_counter;
        buffer.deselect();
    }

    /// Drop events the codec has written and the peer has confirmed
    pub fn clear_written(&mut self, buffer: &mut EventBuffer) {
        buffer.clear_written();
    }

    /// Confirm written events, then reset
    pub fn clear_and_reset(&mut self, buffer: &mut EventBuffer) {
        self.clear_written(buffer);
        self.reset(buffer);
    }

    /// Parse a read request into selections and iteration records
    ///
    /// Unknown groups and variations accumulate FUNC_NOT_SUPPORTED in the
    /// returned IIN and parsing continues with the next header.
    ///
    /// # Errors
    /// Fails only on a structurally malformed request.
    pub fn configure(&mut self, request: &ParsedApdu, db: &mut Database) -> Dnp3Result<IINField> {
        self.reset(db.buffer_mut());
        self.mode = ResponseMode::Solicited;

        for header in request.headers() {
            let header = header?;
            let limit = header.event_count_limit();
            match (header.group, header.variation) {
                // virtual terminal reads are accepted without selection
                (112 | 113, _) => continue,

                (1, 0) => self.add_integrity(PointKind::Binary, self.types.static_binary, db),
                (10, 0) => self.add_integrity(
                    PointKind::ControlStatus,
                    self.types.static_control_status,
                    db,
                ),
                (20, 0) => self.add_integrity(PointKind::Counter, self.types.static_counter, db),
                (30, 0) => self.add_integrity(PointKind::Analog, self.types.static_analog, db),
                (40, 0) => self.add_integrity(
                    PointKind::SetpointStatus,
                    self.types.static_setpoint_status,
                    db,
                ),

                (2, 0) => {
                    db.buffer_mut().select(None, PointKind::Binary, limit);
                }
                (22, 0) => {
                    db.buffer_mut().select(None, PointKind::Counter, limit);
                }
                (32, 0) => {
                    db.buffer_mut().select(None, PointKind::Analog, limit);
                }

                (2, variation @ 1..=3) => {
                    if let Some(desc) = objects::event_descriptor(PointKind::Binary, variation) {
                        self.event_binary = desc;
                    }
                    db.buffer_mut().select(None, PointKind::Binary, limit);
                }

                (60, 1) => {
                    self.add_integrity(PointKind::Binary, self.types.static_binary, db);
                    self.add_integrity(PointKind::Analog, self.types.static_analog, db);
                    self.add_integrity(PointKind::Counter, self.types.static_counter, db);
                    self.add_integrity(
                        PointKind::ControlStatus,
                        self.types.static_control_status,
                        db,
                    );
                    self.add_integrity(
                        PointKind::SetpointStatus,
                        self.types.static_setpoint_status,
                        db,
                    );
                }
                (60, 2) => self.select_class(EventClass::Class1, limit, db.buffer_mut()),
                (60, 3) => self.select_class(EventClass::Class2, limit, db.buffer_mut()),
                (60, 4) => self.select_class(EventClass::Class3, limit, db.buffer_mut()),

                (group, variation) => {
                    warn!(group, variation, "READ for unsupported object");
                    self.temp_iin.set_func_not_supported(true);
                }
            }
        }

        Ok(self.temp_iin)
    }

    fn add_integrity(&mut self, kind: PointKind, desc: &'static ObjectDescriptor, db: &Database) {
        let count = db.num_points(kind);
        if count == 0 {
            return;
        }
        let record = IterRecord {
            kind,
            desc,
            next: 0,
            stop: (count - 1) as u16,
        };
        self.queue_mut(kind).push_back(record);
    }

    fn queue_mut(&mut self, kind: PointKind) -> &mut VecDeque<IterRecord> {
        match kind {
            PointKind::Binary => &mut self.static_binaries,
            PointKind::Counter => &mut self.static_counters,
            PointKind::Analog => &mut self.static_analogs,
            PointKind::ControlStatus => &mut self.static_controls,
            PointKind::SetpointStatus => &mut self.static_setpoints,
        }
    }

    /// Select events of one class across all kinds, oldest first
    ///
    /// A latched buffer overflow is reported in the accumulated IIN.
    fn select_class(&mut self, class: EventClass, max: usize, buffer: &mut EventBuffer) {
        if buffer.is_overflow() {
            self.temp_iin.set_event_buffer_overflow(true);
        }
        let mut remain = max;
        for kind in PointKind::EVENT_KINDS {
            remain -= buffer.select(Some(class), kind, remain);
        }
    }

    fn select_unsol(&mut self, mask: ClassMask, buffer: &mut EventBuffer) -> bool {
        if mask.class1 {
            self.select_class(EventClass::Class1, usize::MAX, buffer);
        }
        if mask.class2 {
            self.select_class(EventClass::Class2, usize::MAX, buffer);
        }
        if mask.class3 {
            self.select_class(EventClass::Class3, usize::MAX, buffer);
        }
        buffer.num_selected() > 0
    }

    /// Whether any unselected event matches the mask
    #[must_use]
    pub fn has_events(&self, mask: ClassMask, buffer: &EventBuffer) -> bool {
        (mask.class1 && buffer.has_class_data(EventClass::Class1))
            || (mask.class2 && buffer.has_class_data(EventClass::Class2))
            || (mask.class3 && buffer.has_class_data(EventClass::Class3))
    }

    /// Fill one solicited fragment: events first, then static data
    pub fn load_response(&mut self, apdu: &mut Apdu, db: &mut Database) {
        apdu.start(FunctionCode::Response);

        let mut events_loaded = false;
        let mut wrote_all = self.load_events(apdu, db.buffer_mut(), &mut events_loaded);
        if wrote_all {
            wrote_all = self.load_statics(apdu, db);
        }
        self.finalize(apdu, events_loaded, wrote_all);
    }

    /// Fill one unsolicited fragment with events matching the mask
    ///
    /// The fragment always carries FIR/FIN/CON/UNS and the given IIN merged
    /// with anything selection accumulated. Returns whether any event was
    /// written; a false return is the startup null unsolicited shape.
    pub fn load_unsol(
        &mut self,
        apdu: &mut Apdu,
        iin: IINField,
        mask: ClassMask,
        db: &mut Database,
    ) -> bool {
        self.mode = ResponseMode::Unsolicited;
        self.select_unsol(mask, db.buffer_mut());

        apdu.start(FunctionCode::UnsolicitedResponse);
        apdu.set_control(ControlField {
            fir: true,
            fin: true,
            con: true,
            uns: true,
            seq: 0,
        });
        apdu.set_iin(iin | self.temp_iin);

        let mut events_loaded = false;
        self.load_events(apdu, db.buffer_mut(), &mut events_loaded);
        events_loaded
    }

    fn load_events(
        &mut self,
        apdu: &mut Apdu,
        buffer: &mut EventBuffer,
        events_loaded: &mut bool,
    ) -> bool {
        let descriptors = [
            (PointKind::Binary, self.event_binary),
            (PointKind::Analog, self.event_analog),
            (PointKind::Counter, self.event_counter),
        ];
        for (kind, desc) in descriptors {
            let selected = buffer.selected_events(kind);
            if selected.is_empty() {
                continue;
            }
            let indices: Vec<u16> = selected.iter().map(|e| e.index).collect();
            let written = apdu.write_prefixed_with(desc, &indices, |i, slot| {
                objects::encode_event(desc, &selected[i], slot);
            });
            buffer.mark_written(kind, written);
            if written > 0 {
                *events_loaded = true;
            }
            if written < selected.len() {
                return false;
            }
        }
        true
    }

    fn load_statics(&mut self, apdu: &mut Apdu, db: &Database) -> bool {
        if !load_static_queue(&mut self.static_binaries, apdu, db) {
            return false;
        }
        if !load_static_queue(&mut self.static_counters, apdu, db) {
            return false;
        }
        if !load_static_queue(&mut self.static_analogs, apdu, db) {
            return false;
        }
        if !load_static_queue(&mut self.static_controls, apdu, db) {
            return false;
        }
        if !load_static_queue(&mut self.static_setpoints, apdu, db) {
            return false;
        }
        true
    }

    /// Finalize FIR/FIN/CON on a solicited fragment
    ///
    /// Static data alone never requires a confirm; events always do, as
    /// does any non-final fragment.
    fn finalize(&mut self, apdu: &mut Apdu, has_event_data: bool, wrote_all: bool) {
        self.fin = wrote_all;
        let confirm = !wrote_all || has_event_data;
        apdu.set_control(ControlField {
            fir: self.fir,
            fin: self.fin,
            con: confirm,
            uns: false,
            seq: 0,
        });
        self.fir = false;
    }

    /// Whether every queued static range is drained and no selected event
    /// remains unwritten
    #[must_use]
    pub fn is_complete(&self, buffer: &EventBuffer) -> bool {
        self.is_static_empty() && buffer.num_selected() == 0
    }

    fn is_static_empty(&self) -> bool {
        self.static_binaries.is_empty()
            && self.static_counters.is_empty()
            && self.static_analogs.is_empty()
            && self.static_controls.is_empty()
            && self.static_setpoints.is_empty()
    }

    /// IIN bits accumulated by the last configure/selection
    #[must_use]
    pub fn temp_iin(&self) -> IINField {
        self.temp_iin
    }

    /// Current assembly mode
    #[must_use]
    pub fn mode(&self) -> ResponseMode {
        self.mode
    }
}
