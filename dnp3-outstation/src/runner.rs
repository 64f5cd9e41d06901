//! Tokio event loop for one outstation session
//!
//! The session state machine is synchronous and runtime-free; this module
//! gives it the single-threaded strand the concurrency model requires. All
//! inbound traffic, timer expirations and database updates arrive as
//! [`SessionEvent`]s on one mpsc queue drained by [`OutstationTask::run`],
//! so no two session handlers ever run concurrently. Outbound fragments
//! queue inside the session's application layer and are transmitted, one at
//! a time, between event dispatches.

use crate::command::ControlHandler;
use crate::config::OutstationConfig;
use crate::database::Database;
use crate::session::{
    ApplicationLayer, Session, SlaveState, TimerHandle, TimerSource, TimerTask,
};
use async_trait::async_trait;
use dnp3_application::apdu::Apdu;
use dnp3_application::function::SequenceInfo;
use dnp3_core::{Dnp3Error, Dnp3Result, Update};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, warn};

/// Events delivered to the session strand
#[derive(Debug)]
pub enum SessionEvent {
    LowerLayerUp,
    LowerLayerDown,
    Request {
        fragment: Vec<u8>,
        seq: SequenceInfo,
    },
    Unknown,
    DataUpdate(Vec<Update>),
    UnsolExpiration,
    TimeExpiration,
    Shutdown,
}

/// Transport seam below the session
///
/// `transmit` must resolve only when the application-layer exchange for the
/// fragment has completed: transport ack for a plain response, confirm for
/// a fragment that requested one. An error (or timeout mapped to an error)
/// becomes the corresponding failure callback, so the session observes
/// exactly one terminal outcome per send.
#[async_trait]
pub trait LowerLayer: Send {
    async fn transmit(&mut self, fragment: &[u8]) -> Dnp3Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Channel {
    Solicited,
    Unsolicited,
}

#[derive(Debug)]
pub(crate) struct Transmission {
    channel: Channel,
    bytes: Vec<u8>,
    cancelled: bool,
}

/// Application layer that queues outbound fragments for the runner
#[derive(Debug, Default)]
pub(crate) struct QueuedAppLayer {
    outgoing: VecDeque<Transmission>,
}

impl QueuedAppLayer {
    fn pop(&mut self) -> Option<Transmission> {
        self.outgoing.pop_front()
    }
}

impl ApplicationLayer for QueuedAppLayer {
    fn send(&mut self, apdu: &Apdu) {
        self.outgoing.push_back(Transmission {
            channel: Channel::Solicited,
            bytes: apdu.as_slice().to_vec(),
            cancelled: false,
        });
    }

    fn send_unsolicited(&mut self, apdu: &Apdu) {
        self.outgoing.push_back(Transmission {
            channel: Channel::Unsolicited,
            bytes: apdu.as_slice().to_vec(),
            cancelled: false,
        });
    }

    fn cancel_response(&mut self) {
        // best effort: a fragment already handed to the transport completes
        // on its own and reports success, which the session tolerates
        if let Some(tx) = self
            .outgoing
            .iter_mut()
            .find(|t| t.channel == Channel::Solicited)
        {
            tx.cancelled = true;
        }
    }
}

/// Timer source that feeds expirations back into the strand
pub struct TokioTimerSource {
    tx: mpsc::UnboundedSender<SessionEvent>,
}

/// Aborts the sleeping task on cancel
///
/// An expiration that raced the abort is still delivered through the queue;
/// the session defers or ignores stale expirations by state, so the race is
/// harmless.
pub struct TokioTimerHandle {
    handle: tokio::task::JoinHandle<()>,
}

impl TimerHandle for TokioTimerHandle {
    fn cancel(self) {
        self.handle.abort();
    }
}

impl TimerSource for TokioTimerSource {
    type Handle = TokioTimerHandle;

    fn start(&mut self, delay: Duration, task: TimerTask) -> TokioTimerHandle {
        let tx = self.tx.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let event = match task {
                TimerTask::UnsolExpiration => SessionEvent::UnsolExpiration,
                TimerTask::TimeIin => SessionEvent::TimeExpiration,
            };
            let _ = tx.send(event);
        });
        TokioTimerHandle { handle }
    }
}

/// Cloneable handle for feeding events to a running outstation task
#[derive(Clone)]
pub struct OutstationHandle {
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl OutstationHandle {
    fn send(&self, event: SessionEvent) -> Dnp3Result<()> {
        self.tx
            .send(event)
            .map_err(|_| Dnp3Error::Protocol("outstation task has stopped".to_string()))
    }

    pub fn lower_layer_up(&self) -> Dnp3Result<()> {
        self.send(SessionEvent::LowerLayerUp)
    }

    pub fn lower_layer_down(&self) -> Dnp3Result<()> {
        self.send(SessionEvent::LowerLayerDown)
    }

    pub fn request(&self, fragment: Vec<u8>, seq: SequenceInfo) -> Dnp3Result<()> {
        self.send(SessionEvent::Request { fragment, seq })
    }

    pub fn unknown(&self) -> Dnp3Result<()> {
        self.send(SessionEvent::Unknown)
    }

    /// Stage point updates and signal the session
    pub fn update(&self, updates: Vec<Update>) -> Dnp3Result<()> {
        self.send(SessionEvent::DataUpdate(updates))
    }

    pub fn shutdown(&self) -> Dnp3Result<()> {
        self.send(SessionEvent::Shutdown)
    }
}

/// One outstation session bound to its event queue and transport
pub struct OutstationTask<L: LowerLayer> {
    session: Session<QueuedAppLayer, TokioTimerSource>,
    rx: mpsc::UnboundedReceiver<SessionEvent>,
    lower: L,
}

impl<L: LowerLayer> OutstationTask<L> {
    /// Create the task and its handle
    ///
    /// # Errors
    /// Fails when the session configuration is invalid.
    pub fn new(
        config: OutstationConfig,
        db: Database,
        control_handler: Box<dyn ControlHandler>,
        lower: L,
    ) -> Dnp3Result<(Self, OutstationHandle)> {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = Session::new(
            config,
            db,
            control_handler,
            QueuedAppLayer::default(),
            TokioTimerSource { tx: tx.clone() },
        )?;
        Ok((Self { session, rx, lower }, OutstationHandle { tx }))
    }

    /// Current session state
    #[must_use]
    pub fn state(&self) -> SlaveState {
        self.session.state()
    }

    /// Drain the event queue until shutdown or every handle is dropped
    pub async fn run(mut self) {
        while let Some(event) = self.rx.recv().await {
            if matches!(event, SessionEvent::Shutdown) {
                break;
            }
            if let Err(e) = self.dispatch(event) {
                // invalid-state events indicate a bug in the driving layer
                error!(error = %e, "session rejected event");
            }
            if let Err(e) = self.flush_outgoing().await {
                error!(error = %e, "session callback failed");
            }
        }
    }

    fn dispatch(&mut self, event: SessionEvent) -> Dnp3Result<()> {
        match event {
            SessionEvent::LowerLayerUp => self.session.on_lower_layer_up(),
            SessionEvent::LowerLayerDown => self.session.on_lower_layer_down(),
            SessionEvent::Request { fragment, seq } => self.session.on_request(&fragment, seq),
            SessionEvent::Unknown => {
                self.session.on_unknown();
                Ok(())
            }
            SessionEvent::DataUpdate(updates) => {
                for update in updates {
                    self.session.database_mut().stage(update);
                }
                self.session.on_data_update();
                Ok(())
            }
            SessionEvent::UnsolExpiration => {
                self.session.on_unsol_expiration();
                Ok(())
            }
            SessionEvent::TimeExpiration => {
                self.session.on_time_expiration();
                Ok(())
            }
            SessionEvent::Shutdown => Ok(()),
        }
    }

    /// Transmit queued fragments in order, feeding each terminal outcome
    /// back into the session before the next fragment goes out
    async fn flush_outgoing(&mut self) -> Dnp3Result<()> {
        while let Some(tx) = self.session.app_mut().pop() {
            match tx.channel {
                Channel::Solicited => {
                    if tx.cancelled {
                        self.session.on_sol_failure()?;
                        continue;
                    }
                    match self.lower.transmit(&tx.bytes).await {
                        Ok(()) => self.session.on_sol_send_success()?,
                        Err(e) => {
                            warn!(error = %e, "solicited transmit failed");
                            self.session.on_sol_failure()?;
                        }
                    }
                }
                Channel::Unsolicited => match self.lower.transmit(&tx.bytes).await {
                    Ok(()) => self.session.on_unsol_send_success()?,
                    Err(e) => {
                        warn!(error = %e, "unsolicited transmit failed");
                        self.session.on_unsol_failure()?;
                    }
                },
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::NullControlHandler;
    use crate::config::DatabaseConfig;
    use dnp3_application::apdu::ParsedApdu;
    use dnp3_application::control::ControlField;
    use dnp3_application::function::FunctionCode;
    use dnp3_core::{quality, Dnp3Time, PointValue};
    use std::sync::{Arc, Mutex};

    struct MockLower {
        sent: Arc<Mutex<Vec<Vec<u8>>>>,
    }

    #[async_trait]
    impl LowerLayer for MockLower {
        async fn transmit(&mut self, fragment: &[u8]) -> Dnp3Result<()> {
            self.sent.lock().unwrap().push(fragment.to_vec());
            Ok(())
        }
    }

    fn read_integrity() -> Vec<u8> {
        let mut apdu = Apdu::new(64);
        apdu.start(FunctionCode::Read);
        apdu.set_control(ControlField::single(false, false, 0));
        apdu.write_read_all(60, 1);
        apdu.as_slice().to_vec()
    }

    #[tokio::test]
    async fn test_strand_round_trip() {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let config = OutstationConfig {
            disable_unsol: true,
            ..OutstationConfig::default()
        };
        let db = Database::new(
            &DatabaseConfig {
                num_binaries: 2,
                ..DatabaseConfig::default()
            },
            &config.event_buffer,
        );
        let (task, handle) = OutstationTask::new(
            config,
            db,
            Box::new(NullControlHandler),
            MockLower { sent: sent.clone() },
        )
        .unwrap();

        handle.lower_layer_up().unwrap();
        handle
            .update(vec![Update::new(
                0,
                PointValue::Binary(true),
                quality::ONLINE,
                Dnp3Time::from_millis(1),
            )])
            .unwrap();
        handle.request(read_integrity(), SequenceInfo::Correct).unwrap();
        handle.shutdown().unwrap();
        task.run().await;

        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        let parsed = ParsedApdu::parse(&sent[0]).unwrap();
        assert_eq!(parsed.function, FunctionCode::Response);
        let header = parsed.headers().next().unwrap().unwrap();
        assert_eq!((header.group, header.variation), (1, 2));
        let values: Vec<u8> = header.contiguous().map(|(_, b)| b[0]).collect();
        assert_eq!(values, vec![quality::ONLINE | quality::STATE, quality::RESTART]);
    }

    #[tokio::test]
    async fn test_strand_reports_events_unsolicited() {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let config = OutstationConfig {
            unsol_pack_delay: Duration::ZERO,
            ..OutstationConfig::default()
        };
        let db = Database::new(
            &DatabaseConfig {
                num_binaries: 1,
                ..DatabaseConfig::default()
            },
            &config.event_buffer,
        );
        let (task, handle) = OutstationTask::new(
            config,
            db,
            Box::new(NullControlHandler),
            MockLower { sent: sent.clone() },
        )
        .unwrap();
        let runner = tokio::spawn(task.run());

        handle.lower_layer_up().unwrap();
        // the zero pack delay lets the startup null unsol go out at once
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle
            .update(vec![Update::new(
                0,
                PointValue::Binary(true),
                quality::ONLINE,
                Dnp3Time::from_millis(5),
            )])
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.shutdown().unwrap();
        runner.await.unwrap();

        let sent = sent.lock().unwrap();
        let unsol: Vec<_> = sent
            .iter()
            .map(|bytes| ParsedApdu::parse(bytes).unwrap())
            .filter(|p| p.function == FunctionCode::UnsolicitedResponse)
            .collect();
        // the startup null unsol, then the event report
        assert_eq!(unsol.len(), 2);
        assert!(unsol[0].control.uns && unsol[0].control.con);
        assert!(unsol[0].raw_objects().is_empty());
        assert!(!unsol[1].raw_objects().is_empty());
    }
}
