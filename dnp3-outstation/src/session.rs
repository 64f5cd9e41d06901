//! Outstation session state machine
//!
//! Five states multiplex solicited request/response traffic with
//! unsolicited reporting on one application layer:
//!
//! ```text
//! Closed -> Idle                     (on lower layer up)
//! Idle -> WaitForRspSuccess          (request dispatched)
//! Idle -> WaitForUnsolSuccess        (unsolicited sent)
//! WaitForUnsolSuccess -> WaitForSolUnsolSuccess
//!                                    (non-read request while unsol in flight)
//! any open state -> Closed           (on lower layer down)
//! ```
//!
//! At most one solicited and one unsolicited send are outstanding at any
//! instant; both only in `WaitForSolUnsolSuccess`. Events a state cannot
//! act on either fail fast (the send callbacks and the layer transitions)
//! or latch a deferred flag that the session re-examines after every
//! transition, in fixed priority order: request, unknown, data update,
//! unsolicited expiration.

use crate::command::{CommandStatus, ControlHandler, Crob};
use crate::config::OutstationConfig;
use crate::context::{ResponseContext, ResponseTypes};
use crate::database::Database;
use dnp3_application::apdu::{Apdu, ParsedApdu};
use dnp3_application::control::ControlField;
use dnp3_application::function::{FunctionCode, SequenceInfo};
use dnp3_application::iin::IINField;
use dnp3_application::objects::GROUP52_VAR2;
use dnp3_core::{ClassMask, Dnp3Error, Dnp3Result, EventClass};
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlaveState {
    /// Lower layer down; only link-up and data updates are meaningful
    Closed,
    /// Link up, nothing in flight
    Idle,
    /// Solicited response sent, awaiting the transport ack
    WaitForRspSuccess,
    /// Unsolicited response sent, awaiting the confirm
    WaitForUnsolSuccess,
    /// Both channels in flight
    WaitForSolUnsolSuccess,
}

impl SlaveState {
    /// Get human-readable state name
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            SlaveState::Closed => "Closed",
            SlaveState::Idle => "Idle",
            SlaveState::WaitForRspSuccess => "WaitForRspSuccess",
            SlaveState::WaitForUnsolSuccess => "WaitForUnsolSuccess",
            SlaveState::WaitForSolUnsolSuccess => "WaitForSolUnsolSuccess",
        }
    }
}

/// Outbound seam to the application layer
///
/// Sends are fire-and-forget; the application layer must deliver exactly
/// one terminal callback per send (`on_sol_send_success`/`on_sol_failure`
/// for solicited, the unsolicited pair for unsolicited). After
/// `cancel_response` a terminal callback still follows, and it may still be
/// a success if the cancel raced the completed send.
pub trait ApplicationLayer {
    fn send(&mut self, apdu: &Apdu);
    fn send_unsolicited(&mut self, apdu: &Apdu);
    fn cancel_response(&mut self);
}

/// What a fired timer should dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerTask {
    /// Unsolicited pack delay or retry delay elapsed
    UnsolExpiration,
    /// Periodic need-time re-assert
    TimeIin,
}

/// Cancellable one-shot timer
///
/// Cancelling does not have to win a race with the callback: a stale
/// expiration delivered to the session is deferred or ignored by the state
/// dispatch.
pub trait TimerHandle {
    fn cancel(self);
}

/// Source of cancellable one-shot timers and of the session's monotonic
/// clock
pub trait TimerSource {
    type Handle: TimerHandle;

    fn start(&mut self, delay: Duration, task: TimerTask) -> Self::Handle;

    /// Current instant on the session's clock
    ///
    /// The select-before-operate window is measured against this clock, so
    /// a test timer source can move time forward deterministically.
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Discriminated outcome of a request handler
///
/// Maps onto the two recoverable IIN failures; anything else a handler
/// could produce is a bug and propagates.
#[derive(Debug)]
enum RequestError {
    Parameter(String),
    NotSupported(String),
}

#[derive(Debug)]
struct DeferredRequest {
    bytes: Vec<u8>,
    seq: SequenceInfo,
}

/// The previous fully-dispatched request, kept for retransmit detection by
/// the application layer
#[derive(Debug)]
pub struct LastRequest {
    pub bytes: Vec<u8>,
    pub seq: SequenceInfo,
}

#[derive(Debug)]
struct SelectState {
    /// Raw object data of the SELECT, compared byte-for-byte on OPERATE
    objects: Vec<u8>,
    at: Instant,
    ok: bool,
}

/// Outstation session
///
/// Owns the response context, the fragment buffers, the deferred state and
/// the timer handles; borrows nothing. All methods run on one logical
/// strand: the application layer and the timer source must deliver their
/// callbacks sequentially.
pub struct Session<A: ApplicationLayer, T: TimerSource> {
    config: OutstationConfig,
    state: SlaveState,
    app: A,
    timers: T,
    control_handler: Box<dyn ControlHandler>,
    db: Database,
    ctx: ResponseContext,
    response: Apdu,
    unsol: Apdu,
    /// Session-held IIN bits: device restart, need time
    iin: IINField,
    /// Per-request IIN bits, zeroed at every dispatch
    rsp_iin: IINField,
    /// Runtime unsolicited mask, adjusted by ENABLE/DISABLE_UNSOLICITED
    unsol_mask: ClassMask,
    startup_null_unsol: bool,
    deferred_update: bool,
    deferred_unsol: bool,
    deferred_unknown: bool,
    deferred_request: Option<DeferredRequest>,
    last_request: Option<LastRequest>,
    select: Option<SelectState>,
    unsol_timer: Option<T::Handle>,
    time_timer: Option<T::Handle>,
}

impl<A: ApplicationLayer, T: TimerSource> Session<A, T> {
    /// Create a session in the `Closed` state
    ///
    /// # Errors
    /// Fails when the configured default variations have no registered
    /// encoder.
    pub fn new(
        config: OutstationConfig,
        db: Database,
        control_handler: Box<dyn ControlHandler>,
        app: A,
        timers: T,
    ) -> Dnp3Result<Self> {
        let types = ResponseTypes::from_config(&config.variations)?;
        // headers plus at least one object of the largest variation must fit
        if config.max_fragment_size < 24 {
            return Err(Dnp3Error::InvalidConfig(format!(
                "fragment size {} is too small",
                config.max_fragment_size
            )));
        }
        let mut iin = IINField::empty();
        iin.set_device_restart(true);
        let fragment_size = config.max_fragment_size;
        let unsol_mask = config.unsol_mask;
        Ok(Self {
            config,
            state: SlaveState::Closed,
            app,
            timers,
            control_handler,
            db,
            ctx: ResponseContext::new(types),
            response: Apdu::new(fragment_size),
            unsol: Apdu::new(fragment_size),
            iin,
            rsp_iin: IINField::empty(),
            unsol_mask,
            startup_null_unsol: false,
            deferred_update: false,
            deferred_unsol: false,
            deferred_unknown: false,
            deferred_request: None,
            last_request: None,
            select: None,
            unsol_timer: None,
            time_timer: None,
        })
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> SlaveState {
        self.state
    }

    /// Whether the startup null unsolicited has been confirmed
    #[must_use]
    pub fn startup_null_unsol_sent(&self) -> bool {
        self.startup_null_unsol
    }

    /// The previous fully-dispatched request, if any
    #[must_use]
    pub fn last_request(&self) -> Option<&LastRequest> {
        self.last_request.as_ref()
    }

    #[must_use]
    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn database_mut(&mut self) -> &mut Database {
        &mut self.db
    }

    /// Application-layer access for the driving event loop
    pub fn app_mut(&mut self) -> &mut A {
        &mut self.app
    }

    // --- events from the application layer -------------------------------

    /// Lower layer came up; valid only in `Closed`
    ///
    /// # Errors
    /// Any other state is a programming error.
    pub fn on_lower_layer_up(&mut self) -> Dnp3Result<()> {
        match self.state {
            SlaveState::Closed => {
                if self.config.allow_time_sync {
                    self.iin.set_need_time(true);
                    self.restart_time_timer();
                }
                self.change_state(SlaveState::Idle);
                if !self.config.disable_unsol {
                    self.start_unsol_timer(self.config.unsol_pack_delay);
                }
                self.resolve_deferred();
                Ok(())
            }
            _ => Err(self.invalid_event("OnLowerLayerUp")),
        }
    }

    /// Lower layer dropped; valid in every open state
    ///
    /// Timers are cancelled; deferred state survives and is re-evaluated on
    /// the next link up.
    ///
    /// # Errors
    /// `Closed` is a programming error.
    pub fn on_lower_layer_down(&mut self) -> Dnp3Result<()> {
        match self.state {
            SlaveState::Closed => Err(self.invalid_event("OnLowerLayerDown")),
            _ => {
                self.change_state(SlaveState::Closed);
                Ok(())
            }
        }
    }

    /// A solicited request arrived
    ///
    /// # Errors
    /// `Closed` is a programming error.
    pub fn on_request(&mut self, fragment: &[u8], seq: SequenceInfo) -> Dnp3Result<()> {
        match self.state {
            SlaveState::Closed => return Err(self.invalid_event("OnRequest")),
            SlaveState::Idle => {
                self.do_request(SlaveState::WaitForRspSuccess, fragment, seq);
            }
            SlaveState::WaitForRspSuccess => {
                // abandon the response in flight; the terminal callback for
                // it still arrives and returns us to Idle, where the
                // deferred request is replayed
                self.app.cancel_response();
                self.defer_request(fragment, seq);
            }
            SlaveState::WaitForUnsolSuccess => match ParsedApdu::parse(fragment) {
                Ok(parsed) if parsed.function == FunctionCode::Read => {
                    // reads do not race with the unsolicited channel
                    self.defer_request(fragment, seq);
                }
                Ok(_) => {
                    self.do_request(SlaveState::WaitForSolUnsolSuccess, fragment, seq);
                }
                Err(e) => {
                    warn!(error = %e, "unparseable request while unsol in flight");
                    self.deferred_unknown = true;
                }
            },
            SlaveState::WaitForSolUnsolSuccess => {
                // both channels busy
                self.defer_request(fragment, seq);
            }
        }
        self.resolve_deferred();
        Ok(())
    }

    /// A malformed or uninterpretable request arrived; never fatal
    pub fn on_unknown(&mut self) {
        match self.state {
            SlaveState::Idle => self.handle_unknown(),
            _ => self.deferred_unknown = true,
        }
        self.resolve_deferred();
    }

    /// The solicited send completed
    ///
    /// # Errors
    /// Valid only while a solicited send is outstanding.
    pub fn on_sol_send_success(&mut self) -> Dnp3Result<()> {
        match self.state {
            SlaveState::WaitForRspSuccess => {
                self.ctx.clear_written(self.db.buffer_mut());
                if self.ctx.is_complete(self.db.buffer()) {
                    self.change_state(SlaveState::Idle);
                } else {
                    self.ctx.load_response(&mut self.response, &mut self.db);
                    self.send_response();
                }
            }
            SlaveState::WaitForSolUnsolSuccess => {
                self.change_state(SlaveState::WaitForUnsolSuccess);
            }
            _ => return Err(self.invalid_event("OnSolSendSuccess")),
        }
        self.resolve_deferred();
        Ok(())
    }

    /// The solicited send failed or was cancelled
    ///
    /// Selected-but-unconfirmed events return to the buffer unselected.
    ///
    /// # Errors
    /// Valid only while a solicited send is outstanding.
    pub fn on_sol_failure(&mut self) -> Dnp3Result<()> {
        match self.state {
            SlaveState::WaitForRspSuccess => {
                self.change_state(SlaveState::Idle);
                self.ctx.reset(self.db.buffer_mut());
            }
            SlaveState::WaitForSolUnsolSuccess => {
                self.change_state(SlaveState::WaitForUnsolSuccess);
            }
            _ => return Err(self.invalid_event("OnSolFailure")),
        }
        self.resolve_deferred();
        Ok(())
    }

    /// The unsolicited send was confirmed
    ///
    /// # Errors
    /// Valid only while an unsolicited send is outstanding.
    pub fn on_unsol_send_success(&mut self) -> Dnp3Result<()> {
        match self.state {
            SlaveState::WaitForUnsolSuccess => {
                self.change_state(SlaveState::Idle);
                self.do_unsol_success();
            }
            SlaveState::WaitForSolUnsolSuccess => {
                self.change_state(SlaveState::WaitForRspSuccess);
                self.do_unsol_success();
            }
            _ => return Err(self.invalid_event("OnUnsolSendSuccess")),
        }
        self.resolve_deferred();
        Ok(())
    }

    /// The unsolicited send failed or was not confirmed
    ///
    /// # Errors
    /// Valid only while an unsolicited send is outstanding.
    pub fn on_unsol_failure(&mut self) -> Dnp3Result<()> {
        match self.state {
            SlaveState::WaitForUnsolSuccess => {
                self.change_state(SlaveState::Idle);
                self.ctx.reset(self.db.buffer_mut());
                self.start_unsol_timer(self.config.unsol_retry_delay);
            }
            SlaveState::WaitForSolUnsolSuccess => {
                self.change_state(SlaveState::WaitForRspSuccess);
                self.ctx.reset(self.db.buffer_mut());
                if self.config.unsol_retry_delay.is_zero() {
                    // no retry delay: re-evaluate as soon as a permissive
                    // state is entered
                    self.dispatch_unsol_expiration();
                } else {
                    self.start_unsol_timer(self.config.unsol_retry_delay);
                }
            }
            _ => return Err(self.invalid_event("OnUnsolFailure")),
        }
        self.resolve_deferred();
        Ok(())
    }

    /// The database signals staged point changes; never fatal
    pub fn on_data_update(&mut self) {
        self.dispatch_data_update();
        self.resolve_deferred();
    }

    /// The unsolicited pack/retry timer fired; never fatal
    pub fn on_unsol_expiration(&mut self) {
        self.unsol_timer = None;
        self.dispatch_unsol_expiration();
        self.resolve_deferred();
    }

    /// The need-time re-assert timer fired; never fatal
    pub fn on_time_expiration(&mut self) {
        self.time_timer = None;
        if self.state != SlaveState::Closed && self.config.allow_time_sync {
            self.iin.set_need_time(true);
            self.restart_time_timer();
        }
    }

    // --- state dispatch helpers ------------------------------------------

    fn dispatch_data_update(&mut self) {
        match self.state {
            SlaveState::Closed => {
                self.db.flush_updates();
            }
            SlaveState::Idle => {
                self.db.flush_updates();
                if !self.config.disable_unsol
                    && self.startup_null_unsol
                    && self.ctx.has_events(self.unsol_mask, self.db.buffer())
                {
                    if self.config.unsol_pack_delay.is_zero() {
                        self.change_state(SlaveState::WaitForUnsolSuccess);
                        self.send_unsol(self.unsol_mask);
                    } else if self.unsol_timer.is_none() {
                        self.start_unsol_timer(self.config.unsol_pack_delay);
                    }
                }
            }
            _ => self.deferred_update = true,
        }
    }

    fn dispatch_unsol_expiration(&mut self) {
        match self.state {
            SlaveState::Idle => {
                if self.startup_null_unsol {
                    if self.ctx.has_events(self.unsol_mask, self.db.buffer()) {
                        self.change_state(SlaveState::WaitForUnsolSuccess);
                        self.send_unsol(self.unsol_mask);
                    }
                } else {
                    // the startup null unsolicited announces readiness with
                    // an empty body
                    self.change_state(SlaveState::WaitForUnsolSuccess);
                    self.send_unsol(ClassMask::NONE);
                }
            }
            _ => self.deferred_unsol = true,
        }
    }

    fn do_unsol_success(&mut self) {
        if !self.startup_null_unsol {
            self.startup_null_unsol = true;
        }
        self.ctx.clear_and_reset(self.db.buffer_mut());
        // immediately re-evaluate whether more events need reporting; the
        // deferred mechanism gives a deferred request priority
        self.deferred_unsol = true;
    }

    /// Act on the first actionable deferred flag, repeatedly, in priority
    /// order; each flag is cleared before its dispatch
    fn resolve_deferred(&mut self) {
        loop {
            if self.state == SlaveState::Idle {
                if let Some(request) = self.deferred_request.take() {
                    self.do_request(SlaveState::WaitForRspSuccess, &request.bytes, request.seq);
                    continue;
                }
                if self.deferred_unknown {
                    self.deferred_unknown = false;
                    self.handle_unknown();
                    continue;
                }
            }
            if self.deferred_update
                && matches!(self.state, SlaveState::Closed | SlaveState::Idle)
            {
                self.deferred_update = false;
                self.dispatch_data_update();
                continue;
            }
            if self.deferred_unsol && self.state == SlaveState::Idle {
                self.deferred_unsol = false;
                self.dispatch_unsol_expiration();
                continue;
            }
            break;
        }
    }

    fn defer_request(&mut self, fragment: &[u8], seq: SequenceInfo) {
        self.deferred_request = Some(DeferredRequest {
            bytes: fragment.to_vec(),
            seq,
        });
    }

    fn change_state(&mut self, next: SlaveState) {
        if next == SlaveState::Closed {
            if let Some(timer) = self.time_timer.take() {
                timer.cancel();
            }
            if let Some(timer) = self.unsol_timer.take() {
                timer.cancel();
            }
        }
        if self.state != next {
            debug!(from = self.state.name(), to = next.name(), "state change");
        }
        self.state = next;
    }

    fn invalid_event(&self, event: &'static str) -> Dnp3Error {
        error!(state = self.state.name(), event, "invalid event for state");
        Dnp3Error::InvalidState {
            state: self.state.name(),
            event,
        }
    }

    // --- request dispatch ------------------------------------------------

    fn do_request(&mut self, next: SlaveState, bytes: &[u8], seq: SequenceInfo) {
        self.rsp_iin.zero();
        let outcome = match ParsedApdu::parse(bytes) {
            Ok(parsed) => self.switch_on_function(next, &parsed, seq),
            Err(e) => Err(RequestError::Parameter(e.to_string())),
        };
        match outcome {
            Ok(()) => {}
            Err(RequestError::Parameter(msg)) => {
                error!(%msg, "request rejected with parameter error");
                self.ctx.reset(self.db.buffer_mut());
                self.rsp_iin.set_parameter_error(true);
                self.send_simple_response();
                self.change_state(next);
            }
            Err(RequestError::NotSupported(msg)) => {
                error!(%msg, "request rejected as not supported");
                self.ctx.reset(self.db.buffer_mut());
                self.rsp_iin.set_func_not_supported(true);
                self.send_simple_response();
                self.change_state(next);
            }
        }
        self.last_request = Some(LastRequest {
            bytes: bytes.to_vec(),
            seq,
        });
    }

    fn switch_on_function(
        &mut self,
        next: SlaveState,
        request: &ParsedApdu,
        seq: SequenceInfo,
    ) -> Result<(), RequestError> {
        match request.function {
            FunctionCode::Read => {
                self.ctx.reset(self.db.buffer_mut());
                self.change_state(next);
                let iin = self
                    .ctx
                    .configure(request, &mut self.db)
                    .map_err(|e| RequestError::Parameter(e.to_string()))?;
                self.rsp_iin |= iin;
                self.ctx.load_response(&mut self.response, &mut self.db);
                self.send_response();
                Ok(())
            }
            FunctionCode::Write => {
                self.change_state(next);
                self.handle_write(request)?;
                self.send_simple_response();
                Ok(())
            }
            FunctionCode::Select => {
                self.change_state(next);
                self.handle_select(request)?;
                self.send_response();
                Ok(())
            }
            FunctionCode::Operate => {
                self.change_state(next);
                self.handle_operate(request, seq)?;
                self.send_response();
                Ok(())
            }
            FunctionCode::DirectOperate => {
                self.change_state(next);
                self.handle_direct_operate(request)?;
                self.send_response();
                Ok(())
            }
            FunctionCode::DirectOperateNoAck => {
                // no acknowledgement: no response, and the caller's state is
                // kept, so a stream of these requests can interleave with
                // the deferred-work resolver
                self.handle_direct_operate_no_ack(request)?;
                Ok(())
            }
            FunctionCode::EnableUnsolicited => {
                self.change_state(next);
                self.handle_enable_unsol(request, true)?;
                self.send_simple_response();
                Ok(())
            }
            FunctionCode::DisableUnsolicited => {
                self.change_state(next);
                self.handle_enable_unsol(request, false)?;
                self.send_simple_response();
                Ok(())
            }
            FunctionCode::DelayMeasure => {
                self.change_state(next);
                self.configure_delay_measurement();
                self.send_response();
                Ok(())
            }
            other => Err(RequestError::NotSupported(format!(
                "function {} not supported",
                other
            ))),
        }
    }

    fn handle_unknown(&mut self) {
        // malformed request fields: answer with an IIN-only response
        self.rsp_iin.zero();
        self.rsp_iin.set_parameter_error(true);
        self.change_state(SlaveState::WaitForRspSuccess);
        self.send_simple_response();
    }

    fn handle_write(&mut self, request: &ParsedApdu) -> Result<(), RequestError> {
        for header in request.headers() {
            let header = header.map_err(|e| RequestError::Parameter(e.to_string()))?;
            match (header.group, header.variation) {
                (50, 1) => {
                    let time = header
                        .time48()
                        .map_err(|e| RequestError::Parameter(e.to_string()))?;
                    debug!(millis = time.as_millis(), "time write received");
                    self.iin.set_need_time(false);
                    if self.config.allow_time_sync {
                        self.restart_time_timer();
                    }
                }
                (80, 1) => {
                    for (index, bit) in header.packed_bits() {
                        if index == 7 && !bit {
                            self.iin.set_device_restart(false);
                            self.db.buffer_mut().clear_overflow();
                        } else {
                            return Err(RequestError::Parameter(format!(
                                "write to IIN index {} not allowed",
                                index
                            )));
                        }
                    }
                }
                (group, variation) => {
                    return Err(RequestError::NotSupported(format!(
                        "WRITE for group {} var {} not supported",
                        group, variation
                    )))
                }
            }
        }
        Ok(())
    }

    fn parse_crobs(request: &ParsedApdu) -> Result<Vec<(u16, Crob)>, RequestError> {
        let mut entries = Vec::new();
        for header in request.headers() {
            let header = header.map_err(|e| RequestError::Parameter(e.to_string()))?;
            if (header.group, header.variation) != (12, 1) {
                return Err(RequestError::NotSupported(format!(
                    "control for group {} var {} not supported",
                    header.group, header.variation
                )));
            }
            for (index, object) in header.prefixed() {
                let crob =
                    Crob::decode(object).map_err(|e| RequestError::Parameter(e.to_string()))?;
                entries.push((index, crob));
            }
        }
        if entries.is_empty() {
            return Err(RequestError::Parameter(
                "control request carries no objects".to_string(),
            ));
        }
        Ok(entries)
    }

    fn handle_select(&mut self, request: &ParsedApdu) -> Result<(), RequestError> {
        let entries = Self::parse_crobs(request)?;
        let mut all_ok = true;
        let statuses: Vec<CommandStatus> = entries
            .iter()
            .map(|(index, crob)| {
                let status = self.control_handler.select(crob, *index);
                if status != CommandStatus::Success {
                    all_ok = false;
                }
                status
            })
            .collect();
        self.select = Some(SelectState {
            objects: request.raw_objects().to_vec(),
            at: self.timers.now(),
            ok: all_ok,
        });
        self.build_control_echo(&entries, &statuses);
        Ok(())
    }

    fn handle_operate(
        &mut self,
        request: &ParsedApdu,
        seq: SequenceInfo,
    ) -> Result<(), RequestError> {
        let entries = Self::parse_crobs(request)?;
        let denied = if seq != SequenceInfo::Correct {
            Some(CommandStatus::NoSelect)
        } else {
            match &self.select {
                None => Some(CommandStatus::NoSelect),
                Some(select) if select.objects != request.raw_objects() => {
                    Some(CommandStatus::NoSelect)
                }
                Some(select)
                    if self.timers.now().saturating_duration_since(select.at)
                        > self.config.select_timeout =>
                {
                    Some(CommandStatus::Timeout)
                }
                Some(select) if !select.ok => Some(CommandStatus::NoSelect),
                Some(_) => None,
            }
        };
        if denied.is_none() {
            self.select = None;
        }
        let statuses: Vec<CommandStatus> = entries
            .iter()
            .map(|(index, crob)| match denied {
                Some(status) => status,
                None => self.control_handler.operate(crob, *index),
            })
            .collect();
        self.build_control_echo(&entries, &statuses);
        Ok(())
    }

    fn handle_direct_operate(&mut self, request: &ParsedApdu) -> Result<(), RequestError> {
        let entries = Self::parse_crobs(request)?;
        let statuses: Vec<CommandStatus> = entries
            .iter()
            .map(|(index, crob)| self.control_handler.operate(crob, *index))
            .collect();
        self.build_control_echo(&entries, &statuses);
        Ok(())
    }

    fn handle_direct_operate_no_ack(&mut self, request: &ParsedApdu) -> Result<(), RequestError> {
        let entries = Self::parse_crobs(request)?;
        for (index, crob) in &entries {
            self.control_handler.operate(crob, *index);
        }
        Ok(())
    }

    fn handle_enable_unsol(
        &mut self,
        request: &ParsedApdu,
        enable: bool,
    ) -> Result<(), RequestError> {
        if self.config.disable_unsol {
            return Err(RequestError::NotSupported(
                "unsolicited reporting is disabled".to_string(),
            ));
        }
        for header in request.headers() {
            let header = header.map_err(|e| RequestError::Parameter(e.to_string()))?;
            match (header.group, header.variation) {
                (60, 2) => self.unsol_mask.set(EventClass::Class1, enable),
                (60, 3) => self.unsol_mask.set(EventClass::Class2, enable),
                (60, 4) => self.unsol_mask.set(EventClass::Class3, enable),
                (group, variation) => {
                    return Err(RequestError::NotSupported(format!(
                        "unsolicited control for group {} var {} not supported",
                        group, variation
                    )))
                }
            }
        }
        Ok(())
    }

    fn configure_delay_measurement(&mut self) {
        self.response.start(FunctionCode::Response);
        self.response
            .set_control(ControlField::single(false, false, 0));
        // the processing delay is accounted for by the application layer
        let fit = self
            .response
            .write_count_of_one(&GROUP52_VAR2, &0u16.to_le_bytes());
        debug_assert!(fit);
    }

    fn build_control_echo(&mut self, entries: &[(u16, Crob)], statuses: &[CommandStatus]) {
        use dnp3_application::objects::GROUP12_VAR1;
        self.response.start(FunctionCode::Response);
        self.response
            .set_control(ControlField::single(false, false, 0));
        let indices: Vec<u16> = entries.iter().map(|(index, _)| *index).collect();
        self.response
            .write_prefixed_with(&GROUP12_VAR1, &indices, |i, slot| {
                let mut crob = entries[i].1;
                crob.status = statuses[i];
                crob.encode(slot);
            });
    }

    // --- outbound --------------------------------------------------------

    /// IIN field for the next outbound fragment: session bits, pending
    /// class data, the latched overflow, whatever selection accumulated
    /// and, for solicited traffic, the per-request bits
    fn assemble_iin(&self, solicited: bool) -> IINField {
        let mut iin = self.iin;
        let buffer = self.db.buffer();
        iin.set_class1_events(buffer.has_class_data(EventClass::Class1));
        iin.set_class2_events(buffer.has_class_data(EventClass::Class2));
        iin.set_class3_events(buffer.has_class_data(EventClass::Class3));
        if buffer.is_overflow() {
            iin.set_event_buffer_overflow(true);
        }
        iin |= self.ctx.temp_iin();
        if solicited {
            iin | self.rsp_iin
        } else {
            iin
        }
    }

    fn send_response(&mut self) {
        let iin = self.assemble_iin(true);
        self.response.set_iin(iin);
        self.app.send(&self.response);
    }

    fn send_simple_response(&mut self) {
        self.response.start(FunctionCode::Response);
        self.response
            .set_control(ControlField::single(false, false, 0));
        let iin = self.assemble_iin(true);
        self.response.set_iin(iin);
        self.app.send(&self.response);
    }

    fn send_unsol(&mut self, mask: ClassMask) {
        let iin = self.assemble_iin(false);
        self.ctx
            .load_unsol(&mut self.unsol, iin, mask, &mut self.db);
        self.app.send_unsolicited(&self.unsol);
    }

    // --- timers ----------------------------------------------------------

    /// Idempotent: an already-running unsolicited timer is left alone
    fn start_unsol_timer(&mut self, delay: Duration) {
        if self.unsol_timer.is_none() {
            self.unsol_timer = Some(self.timers.start(delay, TimerTask::UnsolExpiration));
        }
    }

    fn restart_time_timer(&mut self) {
        if let Some(timer) = self.time_timer.take() {
            timer.cancel();
        }
        self.time_timer = Some(
            self.timers
                .start(self.config.time_sync_period, TimerTask::TimeIin),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::NullControlHandler;
    use crate::config::{DatabaseConfig, EventMaxConfig};
    use dnp3_application::objects::{GROUP12_VAR1, GROUP50_VAR1};
    use dnp3_core::{quality, Dnp3Time, PointValue, Update};
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Default)]
    struct AppState {
        sol: Vec<Vec<u8>>,
        unsol: Vec<Vec<u8>>,
        cancels: usize,
    }

    #[derive(Clone, Default)]
    struct MockApp(Rc<RefCell<AppState>>);

    impl ApplicationLayer for MockApp {
        fn send(&mut self, apdu: &Apdu) {
            self.0.borrow_mut().sol.push(apdu.as_slice().to_vec());
        }

        fn send_unsolicited(&mut self, apdu: &Apdu) {
            self.0.borrow_mut().unsol.push(apdu.as_slice().to_vec());
        }

        fn cancel_response(&mut self) {
            self.0.borrow_mut().cancels += 1;
        }
    }

    struct TimerState {
        started: Vec<(Duration, TimerTask)>,
        cancelled: usize,
        now: Instant,
    }

    impl Default for TimerState {
        fn default() -> Self {
            Self {
                started: Vec::new(),
                cancelled: 0,
                now: Instant::now(),
            }
        }
    }

    #[derive(Clone, Default)]
    struct MockTimers(Rc<RefCell<TimerState>>);

    struct MockHandle(Rc<RefCell<TimerState>>);

    impl TimerHandle for MockHandle {
        fn cancel(self) {
            self.0.borrow_mut().cancelled += 1;
        }
    }

    impl TimerSource for MockTimers {
        type Handle = MockHandle;

        fn start(&mut self, delay: Duration, task: TimerTask) -> MockHandle {
            self.0.borrow_mut().started.push((delay, task));
            MockHandle(self.0.clone())
        }

        fn now(&self) -> Instant {
            self.0.borrow().now
        }
    }

    #[derive(Clone, Default)]
    struct MockControls(std::sync::Arc<std::sync::Mutex<Vec<u16>>>);

    impl ControlHandler for MockControls {
        fn select(&mut self, _crob: &Crob, _index: u16) -> CommandStatus {
            CommandStatus::Success
        }

        fn operate(&mut self, _crob: &Crob, index: u16) -> CommandStatus {
            self.0.lock().unwrap().push(index);
            CommandStatus::Success
        }
    }

    struct Fixture {
        session: Session<MockApp, MockTimers>,
        app: Rc<RefCell<AppState>>,
        timers: Rc<RefCell<TimerState>>,
        operated: std::sync::Arc<std::sync::Mutex<Vec<u16>>>,
    }

    fn fixture_with(config: OutstationConfig, db_config: DatabaseConfig) -> Fixture {
        let app = MockApp::default();
        let timers = MockTimers::default();
        let controls = MockControls::default();
        let app_state = app.0.clone();
        let timer_state = timers.0.clone();
        let operated = controls.0.clone();
        let db = Database::new(&db_config, &config.event_buffer);
        let session = Session::new(config, db, Box::new(controls), app, timers).unwrap();
        Fixture {
            session,
            app: app_state,
            timers: timer_state,
            operated,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(
            OutstationConfig::default(),
            DatabaseConfig {
                num_binaries: 3,
                num_analogs: 2,
                ..DatabaseConfig::default()
            },
        )
    }

    fn quiet_fixture() -> Fixture {
        // no unsolicited traffic to interleave with the scenario
        let config = OutstationConfig {
            disable_unsol: true,
            ..OutstationConfig::default()
        };
        fixture_with(
            config,
            DatabaseConfig {
                num_binaries: 3,
                num_analogs: 2,
                ..DatabaseConfig::default()
            },
        )
    }

    fn request(function: FunctionCode, build: impl FnOnce(&mut Apdu)) -> Vec<u8> {
        let mut apdu = Apdu::new(256);
        apdu.start(function);
        apdu.set_control(ControlField::single(false, false, 0));
        build(&mut apdu);
        apdu.as_slice().to_vec()
    }

    fn read_integrity() -> Vec<u8> {
        request(FunctionCode::Read, |apdu| {
            apdu.write_read_all(60, 1);
        })
    }

    fn write_clear_restart() -> Vec<u8> {
        request(FunctionCode::Write, |apdu| {
            apdu.write_packed_range(80, 1, 7, 7, &[false]);
        })
    }

    fn crob_request(function: FunctionCode, index: u16) -> Vec<u8> {
        request(function, |apdu| {
            let crob = Crob {
                code: 0x41,
                count: 1,
                on_time_ms: 100,
                off_time_ms: 0,
                status: CommandStatus::Success,
            };
            apdu.write_prefixed_with(&GROUP12_VAR1, &[index], |_, slot| crob.encode(slot));
        })
    }

    fn stage_binary(f: &mut Fixture, index: u16, value: bool) {
        f.session.database_mut().stage(Update::new(
            index,
            PointValue::Binary(value),
            quality::ONLINE,
            Dnp3Time::from_millis(index as u64),
        ));
    }

    /// Drive a freshly-created session through the startup null unsolicited
    fn open_with_startup(f: &mut Fixture) {
        f.session.on_lower_layer_up().unwrap();
        f.session.on_unsol_expiration();
        assert_eq!(f.session.state(), SlaveState::WaitForUnsolSuccess);
        f.session.on_unsol_send_success().unwrap();
        assert_eq!(f.session.state(), SlaveState::Idle);
    }

    fn echoed_statuses(response: &[u8]) -> Vec<u8> {
        let parsed = ParsedApdu::parse(response).unwrap();
        let header = parsed.headers().next().unwrap().unwrap();
        assert_eq!((header.group, header.variation), (12, 1));
        header.prefixed().map(|(_, object)| object[10]).collect()
    }

    #[test]
    fn test_s1_startup_null_unsol() {
        let mut f = fixture();
        f.session.on_lower_layer_up().unwrap();
        assert_eq!(f.session.state(), SlaveState::Idle);
        {
            let timers = f.timers.borrow();
            assert_eq!(
                timers.started,
                vec![(Duration::from_millis(500), TimerTask::UnsolExpiration)]
            );
        }

        f.session.on_unsol_expiration();
        assert_eq!(f.session.state(), SlaveState::WaitForUnsolSuccess);
        let unsol = f.app.borrow().unsol[0].clone();
        let parsed = ParsedApdu::parse(&unsol).unwrap();
        assert_eq!(parsed.function, FunctionCode::UnsolicitedResponse);
        assert!(parsed.control.fir && parsed.control.fin);
        assert!(parsed.control.con && parsed.control.uns);
        assert!(parsed.raw_objects().is_empty());

        f.session.on_unsol_send_success().unwrap();
        assert_eq!(f.session.state(), SlaveState::Idle);
        assert!(f.session.startup_null_unsol_sent());
    }

    #[test]
    fn test_s2_read_integrity() {
        let mut f = fixture();
        open_with_startup(&mut f);

        stage_binary(&mut f, 0, true);
        stage_binary(&mut f, 2, true);
        f.session.on_data_update();
        // pack delay is non-zero, so the events only arm the timer
        assert_eq!(f.session.state(), SlaveState::Idle);

        f.session
            .on_request(&read_integrity(), SequenceInfo::Correct)
            .unwrap();
        assert_eq!(f.session.state(), SlaveState::WaitForRspSuccess);

        let response = f.app.borrow().sol[0].clone();
        let parsed = ParsedApdu::parse(&response).unwrap();
        assert_eq!(parsed.function, FunctionCode::Response);
        assert!(parsed.control.fir && parsed.control.fin);
        let iin = parsed.iin.unwrap();
        assert!(iin.device_restart());
        assert!(iin.class1_events());

        let header = parsed.headers().next().unwrap().unwrap();
        assert_eq!((header.group, header.variation), (1, 2));
        let values: Vec<u8> = header.contiguous().map(|(_, b)| b[0]).collect();
        assert_eq!(
            values,
            vec![
                quality::ONLINE | quality::STATE,
                quality::RESTART,
                quality::ONLINE | quality::STATE
            ]
        );

        f.session.on_sol_send_success().unwrap();
        assert_eq!(f.session.state(), SlaveState::Idle);
    }

    #[test]
    fn test_s3_class_poll_with_overflow() {
        let config = OutstationConfig {
            event_buffer: EventMaxConfig {
                max_binary_events: 2,
                max_analog_events: 2,
                max_counter_events: 2,
            },
            ..OutstationConfig::default()
        };
        let mut f = fixture_with(
            config,
            DatabaseConfig {
                num_binaries: 3,
                ..DatabaseConfig::default()
            },
        );
        open_with_startup(&mut f);

        for i in 0..3 {
            stage_binary(&mut f, i, true);
        }
        f.session.on_data_update();

        let poll = request(FunctionCode::Read, |apdu| {
            apdu.write_read_count(60, 2, 10);
        });
        f.session.on_request(&poll, SequenceInfo::Correct).unwrap();

        let response = f.app.borrow().sol[0].clone();
        let parsed = ParsedApdu::parse(&response).unwrap();
        assert!(parsed.iin.unwrap().event_buffer_overflow());
        assert!(parsed.control.fin);
        assert!(parsed.control.con);
        let header = parsed.headers().next().unwrap().unwrap();
        let indices: Vec<u16> = header.prefixed().map(|(i, _)| i).collect();
        assert_eq!(indices, vec![1, 2]);

        f.session.on_sol_send_success().unwrap();
        assert_eq!(f.session.state(), SlaveState::Idle);
        assert!(f.session.database().buffer().is_empty());
        // the overflow stays latched until a master write clears it
        assert!(f.session.database().buffer().is_overflow());
    }

    #[test]
    fn test_s4_unsol_interrupted_by_write() {
        let config = OutstationConfig {
            unsol_pack_delay: Duration::ZERO,
            ..OutstationConfig::default()
        };
        let mut f = fixture_with(
            config,
            DatabaseConfig {
                num_binaries: 3,
                ..DatabaseConfig::default()
            },
        );
        open_with_startup(&mut f);

        stage_binary(&mut f, 0, true);
        f.session.on_data_update();
        assert_eq!(f.session.state(), SlaveState::WaitForUnsolSuccess);
        assert_eq!(f.app.borrow().unsol.len(), 2);

        f.session
            .on_request(&write_clear_restart(), SequenceInfo::Correct)
            .unwrap();
        assert_eq!(f.session.state(), SlaveState::WaitForSolUnsolSuccess);
        assert_eq!(f.app.borrow().sol.len(), 1);

        f.session.on_unsol_send_success().unwrap();
        assert_eq!(f.session.state(), SlaveState::WaitForRspSuccess);
        assert!(f.session.startup_null_unsol_sent());

        f.session.on_sol_send_success().unwrap();
        assert_eq!(f.session.state(), SlaveState::Idle);
    }

    #[test]
    fn test_s5_request_during_pending_response() {
        let mut f = quiet_fixture();
        f.session.on_lower_layer_up().unwrap();

        f.session
            .on_request(&read_integrity(), SequenceInfo::Correct)
            .unwrap();
        assert_eq!(f.session.state(), SlaveState::WaitForRspSuccess);
        assert_eq!(f.app.borrow().sol.len(), 1);

        f.session
            .on_request(&read_integrity(), SequenceInfo::Other)
            .unwrap();
        assert_eq!(f.app.borrow().cancels, 1);
        assert_eq!(f.session.state(), SlaveState::WaitForRspSuccess);
        assert_eq!(f.app.borrow().sol.len(), 1);

        // the cancelled send fails; the deferred request replays at once
        f.session.on_sol_failure().unwrap();
        assert_eq!(f.session.state(), SlaveState::WaitForRspSuccess);
        assert_eq!(f.app.borrow().sol.len(), 2);
    }

    #[test]
    fn test_s6_unsol_retry_after_failure() {
        let mut f = fixture();
        f.session.on_lower_layer_up().unwrap();
        f.session.on_unsol_expiration();
        assert_eq!(f.session.state(), SlaveState::WaitForUnsolSuccess);

        f.session.on_unsol_failure().unwrap();
        assert_eq!(f.session.state(), SlaveState::Idle);
        let timers = f.timers.borrow();
        assert_eq!(
            timers.started.last(),
            Some(&(Duration::from_secs(5), TimerTask::UnsolExpiration))
        );
    }

    #[test]
    fn test_invalid_events_fail_fast() {
        let mut f = quiet_fixture();
        assert!(matches!(
            f.session.on_sol_send_success(),
            Err(Dnp3Error::InvalidState { .. })
        ));
        assert!(matches!(
            f.session.on_request(&read_integrity(), SequenceInfo::Other),
            Err(Dnp3Error::InvalidState { .. })
        ));
        assert!(matches!(
            f.session.on_lower_layer_down(),
            Err(Dnp3Error::InvalidState { .. })
        ));

        f.session.on_lower_layer_up().unwrap();
        assert!(matches!(
            f.session.on_lower_layer_up(),
            Err(Dnp3Error::InvalidState { .. })
        ));
        assert!(matches!(
            f.session.on_unsol_failure(),
            Err(Dnp3Error::InvalidState { .. })
        ));
    }

    #[test]
    fn test_deferred_update_resolves_after_response() {
        let mut f = quiet_fixture();
        f.session.on_lower_layer_up().unwrap();
        f.session
            .on_request(&read_integrity(), SequenceInfo::Correct)
            .unwrap();

        stage_binary(&mut f, 1, true);
        f.session.on_data_update();
        assert!(f.session.database().has_staged());

        f.session.on_sol_send_success().unwrap();
        assert_eq!(f.session.state(), SlaveState::Idle);
        assert!(!f.session.database().has_staged());
    }

    #[test]
    fn test_deferred_read_during_unsol() {
        let mut f = fixture();
        f.session.on_lower_layer_up().unwrap();
        f.session.on_unsol_expiration();
        assert_eq!(f.session.state(), SlaveState::WaitForUnsolSuccess);

        f.session
            .on_request(&read_integrity(), SequenceInfo::Correct)
            .unwrap();
        // reads wait for the unsolicited exchange to finish
        assert_eq!(f.session.state(), SlaveState::WaitForUnsolSuccess);
        assert!(f.app.borrow().sol.is_empty());

        f.session.on_unsol_send_success().unwrap();
        assert_eq!(f.session.state(), SlaveState::WaitForRspSuccess);
        assert_eq!(f.app.borrow().sol.len(), 1);
    }

    #[test]
    fn test_direct_operate_no_ack_keeps_state_and_silence() {
        let mut f = quiet_fixture();
        f.session.on_lower_layer_up().unwrap();

        f.session
            .on_request(
                &crob_request(FunctionCode::DirectOperateNoAck, 3),
                SequenceInfo::Other,
            )
            .unwrap();
        assert_eq!(f.session.state(), SlaveState::Idle);
        assert!(f.app.borrow().sol.is_empty());
        assert_eq!(*f.operated.lock().unwrap(), vec![3]);
    }

    #[test]
    fn test_select_then_operate() {
        let mut f = quiet_fixture();
        f.session.on_lower_layer_up().unwrap();

        f.session
            .on_request(&crob_request(FunctionCode::Select, 1), SequenceInfo::Correct)
            .unwrap();
        let select_echo = f.app.borrow().sol[0].clone();
        assert_eq!(echoed_statuses(&select_echo), vec![0]);
        assert!(f.operated.lock().unwrap().is_empty());
        f.session.on_sol_send_success().unwrap();

        f.session
            .on_request(&crob_request(FunctionCode::Operate, 1), SequenceInfo::Correct)
            .unwrap();
        let operate_echo = f.app.borrow().sol[1].clone();
        assert_eq!(echoed_statuses(&operate_echo), vec![0]);
        assert_eq!(*f.operated.lock().unwrap(), vec![1]);
    }

    #[test]
    fn test_operate_without_select_is_rejected() {
        let mut f = quiet_fixture();
        f.session.on_lower_layer_up().unwrap();

        f.session
            .on_request(&crob_request(FunctionCode::Operate, 1), SequenceInfo::Correct)
            .unwrap();
        let echo = f.app.borrow().sol[0].clone();
        assert_eq!(
            echoed_statuses(&echo),
            vec![CommandStatus::NoSelect.as_u8()]
        );
        assert!(f.operated.lock().unwrap().is_empty());
    }

    #[test]
    fn test_operate_after_select_window_expires() {
        let mut f = quiet_fixture();
        f.session.on_lower_layer_up().unwrap();

        f.session
            .on_request(&crob_request(FunctionCode::Select, 1), SequenceInfo::Correct)
            .unwrap();
        f.session.on_sol_send_success().unwrap();

        // the operate arrives after the select window has elapsed
        f.timers.borrow_mut().now += Duration::from_secs(6);
        f.session
            .on_request(&crob_request(FunctionCode::Operate, 1), SequenceInfo::Correct)
            .unwrap();
        let echo = f.app.borrow().sol[1].clone();
        assert_eq!(
            echoed_statuses(&echo),
            vec![CommandStatus::Timeout.as_u8()]
        );
        assert!(f.operated.lock().unwrap().is_empty());
    }

    #[test]
    fn test_write_unsupported_group_rejected() {
        let mut f = quiet_fixture();
        f.session.on_lower_layer_up().unwrap();

        let bytes = request(FunctionCode::Write, |apdu| {
            apdu.write_read_all(1, 0);
        });
        f.session.on_request(&bytes, SequenceInfo::Correct).unwrap();
        assert_eq!(f.session.state(), SlaveState::WaitForRspSuccess);
        let response = f.app.borrow().sol[0].clone();
        let parsed = ParsedApdu::parse(&response).unwrap();
        assert!(parsed.iin.unwrap().func_not_supported());
        assert!(parsed.raw_objects().is_empty());
    }

    #[test]
    fn test_write_to_other_iin_index_rejected() {
        let mut f = quiet_fixture();
        f.session.on_lower_layer_up().unwrap();

        let bytes = request(FunctionCode::Write, |apdu| {
            apdu.write_packed_range(80, 1, 4, 4, &[false]);
        });
        f.session.on_request(&bytes, SequenceInfo::Correct).unwrap();
        assert_eq!(f.session.state(), SlaveState::WaitForRspSuccess);
        let response = f.app.borrow().sol[0].clone();
        let parsed = ParsedApdu::parse(&response).unwrap();
        assert!(parsed.iin.unwrap().parameter_error());
        // the restart bit was not touched
        assert!(parsed.iin.unwrap().device_restart());
    }

    #[test]
    fn test_control_for_unsupported_group_rejected() {
        let mut f = quiet_fixture();
        f.session.on_lower_layer_up().unwrap();

        let bytes = request(FunctionCode::Select, |apdu| {
            apdu.write_count_of_one(&GROUP50_VAR1, &[0; 6]);
        });
        f.session.on_request(&bytes, SequenceInfo::Correct).unwrap();
        assert_eq!(f.session.state(), SlaveState::WaitForRspSuccess);
        let response = f.app.borrow().sol[0].clone();
        let parsed = ParsedApdu::parse(&response).unwrap();
        assert!(parsed.iin.unwrap().func_not_supported());
        assert!(f.operated.lock().unwrap().is_empty());
    }

    #[test]
    fn test_empty_control_request_rejected() {
        let mut f = quiet_fixture();
        f.session.on_lower_layer_up().unwrap();

        let bytes = request(FunctionCode::Select, |_| {});
        f.session.on_request(&bytes, SequenceInfo::Correct).unwrap();
        assert_eq!(f.session.state(), SlaveState::WaitForRspSuccess);
        let response = f.app.borrow().sol[0].clone();
        let parsed = ParsedApdu::parse(&response).unwrap();
        assert!(parsed.iin.unwrap().parameter_error());
    }

    #[test]
    fn test_enable_unsolicited_unsupported_object_rejected() {
        let mut f = fixture();
        open_with_startup(&mut f);

        let bytes = request(FunctionCode::EnableUnsolicited, |apdu| {
            apdu.write_read_all(60, 1);
        });
        f.session.on_request(&bytes, SequenceInfo::Correct).unwrap();
        assert_eq!(f.session.state(), SlaveState::WaitForRspSuccess);
        let response = f.app.borrow().sol[0].clone();
        let parsed = ParsedApdu::parse(&response).unwrap();
        assert!(parsed.iin.unwrap().func_not_supported());
    }

    #[test]
    fn test_write_clears_restart_and_overflow() {
        let mut f = quiet_fixture();
        f.session.on_lower_layer_up().unwrap();

        f.session
            .on_request(&write_clear_restart(), SequenceInfo::Correct)
            .unwrap();
        let response = f.app.borrow().sol[0].clone();
        let parsed = ParsedApdu::parse(&response).unwrap();
        assert!(!parsed.iin.unwrap().device_restart());
        assert!(parsed.raw_objects().is_empty());
    }

    #[test]
    fn test_unsupported_function_gets_iin_response() {
        let mut f = quiet_fixture();
        f.session.on_lower_layer_up().unwrap();

        let bytes = request(FunctionCode::Response, |_| {});
        f.session.on_request(&bytes, SequenceInfo::Other).unwrap();
        assert_eq!(f.session.state(), SlaveState::WaitForRspSuccess);
        let response = f.app.borrow().sol[0].clone();
        let parsed = ParsedApdu::parse(&response).unwrap();
        assert!(parsed.iin.unwrap().func_not_supported());
    }

    #[test]
    fn test_unknown_request_builds_error_response() {
        let mut f = quiet_fixture();
        f.session.on_lower_layer_up().unwrap();

        f.session.on_unknown();
        assert_eq!(f.session.state(), SlaveState::WaitForRspSuccess);
        let response = f.app.borrow().sol[0].clone();
        let parsed = ParsedApdu::parse(&response).unwrap();
        assert!(parsed.iin.unwrap().parameter_error());
        assert!(parsed.raw_objects().is_empty());
    }

    #[test]
    fn test_delay_measure_response() {
        let mut f = quiet_fixture();
        f.session.on_lower_layer_up().unwrap();

        let bytes = request(FunctionCode::DelayMeasure, |_| {});
        f.session.on_request(&bytes, SequenceInfo::Correct).unwrap();
        let response = f.app.borrow().sol[0].clone();
        let parsed = ParsedApdu::parse(&response).unwrap();
        let header = parsed.headers().next().unwrap().unwrap();
        assert_eq!((header.group, header.variation), (52, 2));
        assert_eq!(header.raw_objects(), &[0, 0]);
    }

    #[test]
    fn test_disable_unsolicited_narrows_mask() {
        let config = OutstationConfig {
            unsol_pack_delay: Duration::ZERO,
            ..OutstationConfig::default()
        };
        let mut f = fixture_with(
            config,
            DatabaseConfig {
                num_binaries: 3,
                ..DatabaseConfig::default()
            },
        );
        open_with_startup(&mut f);

        let bytes = request(FunctionCode::DisableUnsolicited, |apdu| {
            apdu.write_read_all(60, 2);
        });
        f.session.on_request(&bytes, SequenceInfo::Correct).unwrap();
        f.session.on_sol_send_success().unwrap();

        // class 1 events no longer trigger unsolicited reporting
        let sent_before = f.app.borrow().unsol.len();
        stage_binary(&mut f, 0, true);
        f.session.on_data_update();
        assert_eq!(f.session.state(), SlaveState::Idle);
        assert_eq!(f.app.borrow().unsol.len(), sent_before);
    }

    #[test]
    fn test_write_time_clears_need_time() {
        let config = OutstationConfig {
            allow_time_sync: true,
            disable_unsol: true,
            ..OutstationConfig::default()
        };
        let mut f = fixture_with(config, DatabaseConfig::default());
        f.session.on_lower_layer_up().unwrap();
        assert_eq!(
            f.timers.borrow().started,
            vec![(Duration::from_secs(600), TimerTask::TimeIin)]
        );

        let bytes = request(FunctionCode::Write, |apdu| {
            apdu.write_count_of_one(&GROUP50_VAR1, &[1, 2, 3, 4, 5, 6]);
        });
        f.session.on_request(&bytes, SequenceInfo::Correct).unwrap();
        let response = f.app.borrow().sol[0].clone();
        let parsed = ParsedApdu::parse(&response).unwrap();
        assert!(!parsed.iin.unwrap().need_time());
        // the periodic re-assert timer restarts
        assert_eq!(f.timers.borrow().cancelled, 1);
        assert_eq!(f.timers.borrow().started.len(), 2);
    }

    #[test]
    fn test_lower_layer_down_cancels_timers() {
        let mut f = fixture();
        f.session.on_lower_layer_up().unwrap();
        assert_eq!(f.timers.borrow().started.len(), 1);

        f.session.on_lower_layer_down().unwrap();
        assert_eq!(f.session.state(), SlaveState::Closed);
        assert_eq!(f.timers.borrow().cancelled, 1);
    }

    #[test]
    fn test_multi_fragment_read_drives_continuation() {
        let config = OutstationConfig {
            disable_unsol: true,
            max_fragment_size: 64,
            ..OutstationConfig::default()
        };
        let mut f = fixture_with(
            config,
            DatabaseConfig {
                num_analogs: 30,
                ..DatabaseConfig::default()
            },
        );
        f.session.on_lower_layer_up().unwrap();

        let bytes = request(FunctionCode::Read, |apdu| {
            apdu.write_read_all(30, 0);
        });
        f.session.on_request(&bytes, SequenceInfo::Correct).unwrap();
        let first = f.app.borrow().sol[0].clone();
        let parsed = ParsedApdu::parse(&first).unwrap();
        assert!(parsed.control.fir);
        assert!(!parsed.control.fin);
        assert!(parsed.control.con);

        // each confirm releases the next fragment until the range drains
        let mut fragments = 1;
        while f.session.state() == SlaveState::WaitForRspSuccess {
            f.session.on_sol_send_success().unwrap();
            fragments = f.app.borrow().sol.len();
            if fragments > 10 {
                break;
            }
        }
        assert_eq!(f.session.state(), SlaveState::Idle);
        let last = f.app.borrow().sol.last().unwrap().clone();
        let parsed = ParsedApdu::parse(&last).unwrap();
        assert!(!parsed.control.fir);
        assert!(parsed.control.fin);
        assert!(fragments >= 3);
    }
}
