use crate::backend::Backend;
use crate::config_channel::ConfigRecord;
use crate::consumer::{run_consumer, ConsumerReport, ReadErrorPolicy};
use crate::error::ControllerError;
use crate::probe::{release_all, Attachment, ProbeTarget};
use crate::sink::EventSink;
use crate::stream::EventStream;
use std::future::Future;
use std::time::Duration;
use sysprobe_common::CONFIG_KEY;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    Configured,
    Attached,
    Running,
    Draining,
    Stopped,
}

#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub config_key: u32,
    pub config: ConfigRecord,
    pub probes: Vec<ProbeTarget>,
    pub buffer_capacity_bytes: usize,
    pub drain_grace: Duration,
    pub read_error_policy: ReadErrorPolicy,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            config_key: CONFIG_KEY,
            config: ConfigRecord::default(),
            probes: ProbeTarget::default_targets(),
            buffer_capacity_bytes: 4096,
            drain_grace: Duration::from_millis(100),
            read_error_policy: ReadErrorPolicy::Abort,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Signal,
    /// 消费任务自行退出（读错误），按收到关闭信号处理
    ConsumerEnded,
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub stop_reason: StopReason,
    /// `None` when the consumer missed the grace period or panicked.
    pub report: Option<ConsumerReport>,
    pub drained_in_time: bool,
    pub released: usize,
}

/// Owns the probe lifecycle from configuration to teardown.
pub struct Controller<B: Backend> {
    backend: B,
    settings: ControllerSettings,
    state: ControllerState,
    attachments: Vec<Box<dyn Attachment>>,
}

impl<B: Backend> Controller<B> {
    pub fn new(backend: B, settings: ControllerSettings) -> Self {
        Self {
            backend,
            settings,
            state: ControllerState::Idle,
            attachments: Vec::new(),
        }
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn attachment_count(&self) -> usize {
        self.attachments.len()
    }

    fn transition(&mut self, next: ControllerState) {
        debug!("[Controller] {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    /// Idle -> Configured. The kernel must see its config before any probe fires.
    pub fn configure(&mut self) -> Result<(), ControllerError> {
        debug_assert_eq!(self.state, ControllerState::Idle);
        let mut channel = self.backend.config_channel()?;
        channel.set(self.settings.config_key, &self.settings.config)?;
        drop(channel);

        info!(
            "[Controller] Configuration written (verbose: {}).",
            self.settings.config.verbosity.as_str()
        );
        self.transition(ControllerState::Configured);
        Ok(())
    }

    /// Configured -> Attached. All listed probes or none; an empty list is an error.
    pub fn attach_probes(&mut self) -> Result<(), ControllerError> {
        debug_assert_eq!(self.state, ControllerState::Configured);
        if self.settings.probes.is_empty() {
            error!("[Controller] Probe list is empty, nothing to attach.");
            return Err(ControllerError::NoProbes);
        }
        for target in &self.settings.probes {
            match self.backend.attach(target) {
                Ok(attachment) => self.attachments.push(attachment),
                Err(e) => {
                    error!("[Controller] {}. Rolling back {} attachment(s).", e, self.attachments.len());
                    release_all(&mut self.attachments);
                    return Err(e.into());
                }
            }
        }
        info!(
            "[Controller] All {} probes attached, monitoring started.",
            self.attachments.len()
        );
        self.transition(ControllerState::Attached);
        Ok(())
    }

    /// Runs the whole lifecycle. Returns once `shutdown` resolves (or the
    /// consumer stops by itself) and every probe has been released.
    pub async fn run<F>(mut self, sink: EventSink, shutdown: F) -> Result<RunSummary, ControllerError>
    where
        F: Future<Output = ()>,
    {
        self.configure()?;
        self.attach_probes()?;

        let stream = match self.backend.open_stream(self.settings.buffer_capacity_bytes) {
            Ok(stream) => stream,
            Err(e) => {
                error!("[Controller] Failed to open event stream: {}", e);
                release_all(&mut self.attachments);
                return Err(e.into());
            }
        };
        let closer = stream.closer();
        let mut consumer = tokio::spawn(run_consumer(stream, sink, self.settings.read_error_policy));
        self.transition(ControllerState::Running);

        tokio::pin!(shutdown);
        let (stop_reason, finished) = tokio::select! {
            _ = &mut shutdown => (StopReason::Signal, None),
            joined = &mut consumer => (StopReason::ConsumerEnded, Some(joined)),
        };
        self.transition(ControllerState::Draining);

        // 关闭流是让消费者退出的唯一手段
        closer.close();
        let (joined, drained_in_time) = match finished {
            Some(joined) => (Some(joined), true),
            None => match tokio::time::timeout(self.settings.drain_grace, &mut consumer).await {
                Ok(joined) => (Some(joined), true),
                Err(_) => {
                    warn!(
                        "[Controller] Consumer did not stop within {:?}, aborting it.",
                        self.settings.drain_grace
                    );
                    consumer.abort();
                    (None, false)
                }
            },
        };
        let report = match joined {
            Some(Ok(report)) => Some(report),
            Some(Err(e)) => {
                error!("[Controller] Consumer task failed: {}", e);
                None
            }
            None => None,
        };

        let released = release_all(&mut self.attachments);
        self.transition(ControllerState::Stopped);
        info!("[Controller] Shutdown complete, {} probe(s) released.", released);

        Ok(RunSummary {
            stop_reason,
            report,
            drained_in_time,
            released,
        })
    }
}

impl<B: Backend> Drop for Controller<B> {
    fn drop(&mut self) {
        if !self.attachments.is_empty() {
            warn!("[Controller] Dropped with live attachments, releasing them.");
            release_all(&mut self.attachments);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::simulated::{KernelStep, SimulatedBackend};
    use crate::config_channel::Verbosity;
    use crate::error::AttachFailure;

    fn settings() -> ControllerSettings {
        ControllerSettings {
            config: ConfigRecord::new(Verbosity::Enabled, "hi"),
            ..ControllerSettings::default()
        }
    }

    #[test]
    fn setup_steps_advance_state() {
        let (backend, handle) = SimulatedBackend::with_default_probes();
        let mut controller = Controller::new(backend, settings());
        assert_eq!(controller.state(), ControllerState::Idle);

        controller.configure().unwrap();
        assert_eq!(controller.state(), ControllerState::Configured);
        controller.attach_probes().unwrap();
        assert_eq!(controller.state(), ControllerState::Attached);
        assert_eq!(controller.attachment_count(), 2);

        let journal = handle.journal();
        assert_eq!(journal[0], KernelStep::ConfigWritten { key: 0 });
        assert!(matches!(journal[1], KernelStep::Attached { .. }));
        assert!(matches!(journal[2], KernelStep::Attached { .. }));

        drop(controller);
        assert!(handle.active_attachments().is_empty());
    }

    #[test]
    fn second_attach_failure_rolls_back_first() {
        let (backend, handle) = SimulatedBackend::with_default_probes();
        let backend = backend.fail_attach("__x64_sys_write", AttachFailure::PermissionDenied);
        let mut controller = Controller::new(backend, settings());

        controller.configure().unwrap();
        let err = controller.attach_probes().unwrap_err();
        assert!(matches!(
            err,
            ControllerError::Attach(ref e) if e.reason == AttachFailure::PermissionDenied
        ));
        assert_eq!(controller.attachment_count(), 0);
        assert_eq!(controller.state(), ControllerState::Configured);
        assert!(handle.active_attachments().is_empty());
    }

    #[test]
    fn empty_probe_list_is_rejected() {
        let (backend, handle) = SimulatedBackend::with_default_probes();
        let mut controller = Controller::new(
            backend,
            ControllerSettings {
                probes: Vec::new(),
                ..settings()
            },
        );

        controller.configure().unwrap();
        assert!(matches!(
            controller.attach_probes(),
            Err(ControllerError::NoProbes)
        ));
        assert_eq!(controller.state(), ControllerState::Configured);
        assert!(!handle
            .journal()
            .iter()
            .any(|step| matches!(step, KernelStep::Attached { .. })));
    }
}
