use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{debug, error, info, warn};
use parking_lot::Mutex;

use crate::models::audio_models::{DataFlow, DeviceRole, DeviceState, KeeperStatus, TopologyEvent};
use crate::models::config::{DeviceScope, KeeperConfig, PlatformQuirks, StreamConfig};
use crate::models::error::KeeperError;
use crate::session::device_session::DeviceSession;
use crate::session::signals::{ControlSignal, KeeperSignals};
use crate::traits::platform::{AudioEndpoint, DeviceEnumerator, PowerMonitor, TopologyCallback};
use crate::traits::session_owner::SessionOwner;

/// Sessions and flags guarded together; shared with the topology callback.
///
/// Only held for short bookkeeping, never across a blocking session start
/// or stop.
struct KeeperState {
    config: KeeperConfig,
    sessions: Vec<Arc<DeviceSession>>,
    is_started: bool,
    is_retry_required: bool,
}

impl KeeperState {
    /// A live (valid) session exists for `device_id`.
    fn has_session(&self, device_id: &str) -> bool {
        self.sessions
            .iter()
            .any(|session| session.is_valid() && session.device_id() == device_id)
    }
}

/// Whether a topology change invalidates the current session set.
pub fn restart_required(scope: DeviceScope, event: &TopologyEvent, has_session: impl Fn(&str) -> bool) -> bool {
    match event {
        TopologyEvent::DefaultDeviceChanged { flow, role, .. } => {
            scope == DeviceScope::Primary && *flow == DataFlow::Render && *role == DeviceRole::Console
        }
        TopologyEvent::DeviceAdded { .. } => scope != DeviceScope::Primary,
        TopologyEvent::DeviceRemoved { device_id } => has_session(device_id),
        TopologyEvent::DeviceStateChanged { device_id, state } => {
            *state == DeviceState::Active || has_session(device_id)
        }
    }
}

/// Keeps the selected render endpoints awake, one [`DeviceSession`] each.
///
/// ```text
/// [DeviceEnumerator] ──► SoundKeeper::start ──► DeviceSession × N
///        │ topology                 ▲
///        └──────► KeeperSignals ◄───┴── sessions (retry / restart / shutdown)
///                       │
///                 SoundKeeper::run ◄── PowerMonitor
/// ```
pub struct SoundKeeper {
    enumerator: Arc<dyn DeviceEnumerator>,
    quirks: PlatformQuirks,
    signals: Arc<KeeperSignals>,
    state: Arc<Mutex<KeeperState>>,
    /// Serialises start, retry and stop.
    lifecycle: Mutex<()>,
}

impl SoundKeeper {
    pub fn new(config: KeeperConfig, quirks: PlatformQuirks, enumerator: Arc<dyn DeviceEnumerator>) -> Self {
        info!(
            "sound keeper for {:?} devices, {} stream, quirks {:?}",
            config.device_scope,
            config.stream.kind.name(),
            quirks
        );
        Self {
            enumerator,
            quirks,
            signals: Arc::new(KeeperSignals::new()),
            state: Arc::new(Mutex::new(KeeperState {
                config,
                sessions: Vec::new(),
                is_started: false,
                is_retry_required: false,
            })),
            lifecycle: Mutex::new(()),
        }
    }

    /// Signals of the control loop; raise `Stop` on it to end [`run`](Self::run).
    pub fn signals(&self) -> Arc<KeeperSignals> {
        Arc::clone(&self.signals)
    }

    pub fn config(&self) -> KeeperConfig {
        self.state.lock().config.clone()
    }

    /// Create and start sessions for every endpoint in scope.
    ///
    /// Sessions that fail to start are kept and flagged for a later
    /// [`retry`](Self::retry). Fails only when the endpoints cannot be
    /// enumerated, leaving the keeper stopped.
    pub fn start(&self) -> Result<(), KeeperError> {
        let _lifecycle = self.lifecycle.lock();
        let config = {
            let state = self.state.lock();
            if state.is_started {
                return Ok(());
            }
            state.config.clone()
        };

        let endpoints = self.endpoints_in_scope(&config)?;
        let owner: Arc<dyn SessionOwner> = self.signals.clone();

        // Published before starting so device removals during start are seen.
        let sessions = {
            let mut state = self.state.lock();
            let settings = state.config.session_settings(self.quirks);
            let stream = state.config.stream;
            state.sessions = endpoints
                .into_iter()
                .map(|endpoint| Arc::new(DeviceSession::new(endpoint, stream, settings, Arc::clone(&owner))))
                .collect();
            state.is_started = true;
            state.sessions.clone()
        };

        let mut retry_required = false;
        for session in &sessions {
            if !session.start() {
                warn!("session on '{}' did not start", session.device_id());
                retry_required = true;
            }
        }

        info!("started {} session(s)", sessions.len());
        self.state.lock().is_retry_required = retry_required;
        Ok(())
    }

    fn endpoints_in_scope(&self, config: &KeeperConfig) -> Result<Vec<Arc<dyn AudioEndpoint>>, KeeperError> {
        match config.device_scope {
            DeviceScope::None => Ok(Vec::new()),
            DeviceScope::Primary => match self.enumerator.default_render_endpoint() {
                Ok(Some(endpoint)) => Ok(vec![endpoint]),
                Ok(None) => {
                    info!("no default render device, waiting for one");
                    Ok(Vec::new())
                }
                Err(err) => {
                    error!("unable to get default render device: {}", err);
                    Err(err)
                }
            },
            scope => {
                let endpoints = self.enumerator.active_render_endpoints().map_err(|err| {
                    error!("unable to enumerate render devices: {}", err);
                    err
                })?;
                Ok(endpoints
                    .into_iter()
                    .filter(|endpoint| endpoint_in_scope(endpoint.as_ref(), scope, config.allow_remote))
                    .collect())
            }
        }
    }

    /// Start again every valid session that is not running.
    ///
    /// Returns true when all of them are now running.
    pub fn retry(&self) -> bool {
        let _lifecycle = self.lifecycle.lock();
        let pending: Vec<Arc<DeviceSession>> = {
            let state = self.state.lock();
            if !state.is_started {
                return false;
            }
            state
                .sessions
                .iter()
                .filter(|session| session.is_valid() && !session.is_started())
                .cloned()
                .collect()
        };

        let mut all_started = true;
        for session in &pending {
            info!("retrying session on '{}'", session.device_id());
            if !session.start() {
                all_started = false;
            }
        }
        self.state.lock().is_retry_required = !all_started;
        all_started
    }

    /// Stop and drop every session.
    pub fn stop(&self) {
        let _lifecycle = self.lifecycle.lock();
        let sessions = {
            let mut state = self.state.lock();
            if !state.is_started {
                return;
            }
            state.is_started = false;
            state.is_retry_required = false;
            std::mem::take(&mut state.sessions)
        };
        for session in sessions {
            if let Err(err) = session.stop() {
                error!("failed to stop session on '{}': {}", session.device_id(), err);
            }
        }
        info!("stopped all sessions");
    }

    /// Rebuild the session set from the current device topology.
    pub fn restart(&self) -> Result<(), KeeperError> {
        info!("restarting sessions");
        self.stop();
        self.start()
    }

    pub fn is_started(&self) -> bool {
        self.state.lock().is_started
    }

    pub fn is_retry_required(&self) -> bool {
        self.state.lock().is_retry_required
    }

    pub fn has_session(&self, device_id: &str) -> bool {
        self.state.lock().has_session(device_id)
    }

    /// Apply new stream parameters to the configuration and every session.
    pub fn set_stream_config(&self, stream: StreamConfig) {
        let mut state = self.state.lock();
        state.config.stream = stream;
        for session in &state.sessions {
            session.set_stream_config(stream);
        }
    }

    /// Request a restart if `event` affects the sessions in use.
    pub fn handle_topology_event(&self, event: &TopologyEvent) {
        on_topology_event(&self.state, &self.signals, event);
    }

    pub fn status(&self) -> KeeperStatus {
        let state = self.state.lock();
        KeeperStatus {
            is_started: state.is_started,
            is_retry_required: state.is_retry_required,
            sessions: state.sessions.iter().map(|session| session.status()).collect(),
        }
    }

    /// Control loop: keep sessions running, stop them while the system is
    /// about to sleep, react to retry and restart requests. Returns after a
    /// shutdown or stop request with all sessions stopped.
    pub fn run(&self, power: &mut dyn PowerMonitor) {
        let timings = self.state.lock().config.timings;
        if self.state.lock().config.device_scope == DeviceScope::None {
            info!("no device scope selected, nothing to keep awake");
            return;
        }

        let state = Arc::clone(&self.state);
        let signals = Arc::clone(&self.signals);
        let callback: TopologyCallback = Arc::new(move |event: TopologyEvent| on_topology_event(&state, &signals, &event));
        let _topology = match self.enumerator.register_topology_listener(callback) {
            Ok(registration) => Some(registration),
            Err(err) => {
                warn!("device changes will go unnoticed: {}", err);
                None
            }
        };

        loop {
            let seconds_to_sleep = power.seconds_to_sleep();
            debug!("seconds to sleep: {:?}", seconds_to_sleep);

            if matches!(seconds_to_sleep, Some(seconds) if seconds <= 0) {
                if self.is_started() {
                    info!("system is going to sleep, stopping sessions");
                    self.stop();
                }
            } else if !self.is_started() {
                if let Err(err) = self.start() {
                    error!("unable to start sessions: {}", err);
                }
            } else if self.is_retry_required() {
                self.retry();
            }

            let sleep_is_near = matches!(seconds_to_sleep, Some(seconds) if seconds <= timings.sleep_threshold_secs);
            let timeout = if sleep_is_near || self.is_retry_required() {
                timings.fast_poll()
            } else {
                timings.slow_poll()
            };

            match self.signals.wait_any(timeout) {
                Some(ControlSignal::Retry) => {
                    self.debounce(ControlSignal::Retry, timings.debounce());
                    self.state.lock().is_retry_required = true;
                }
                Some(ControlSignal::Restart) => {
                    self.debounce(ControlSignal::Restart, timings.debounce());
                    if let Err(err) = self.restart() {
                        error!("unable to restart sessions: {}", err);
                    }
                }
                Some(signal @ (ControlSignal::Shutdown | ControlSignal::Stop)) => {
                    info!("leaving control loop on {:?}", signal);
                    break;
                }
                None => {}
            }
        }

        self.stop();
    }

    /// Wait until `signal` stays quiet for a whole `period`.
    fn debounce(&self, signal: ControlSignal, period: Duration) {
        while self.signals.wait_one(signal, period) {
            thread::sleep(period);
        }
    }
}

impl Drop for SoundKeeper {
    fn drop(&mut self) {
        self.stop();
    }
}

fn endpoint_in_scope(endpoint: &dyn AudioEndpoint, scope: DeviceScope, allow_remote: bool) -> bool {
    let form_factor = match endpoint.form_factor() {
        Ok(form_factor) => form_factor,
        Err(err) => {
            warn!("skipping '{}', unknown form factor: {}", endpoint.id(), err);
            return false;
        }
    };
    if form_factor.is_remote() && !allow_remote {
        debug!("skipping remote device '{}'", endpoint.id());
        return false;
    }
    match scope {
        DeviceScope::Digital => form_factor.is_digital(),
        DeviceScope::Analog => !form_factor.is_digital(),
        _ => true,
    }
}

fn on_topology_event(state: &Mutex<KeeperState>, signals: &KeeperSignals, event: &TopologyEvent) {
    let required = {
        let state = state.lock();
        restart_required(state.config.device_scope, event, |device_id| state.has_session(device_id))
    };
    if required {
        info!("device topology changed: {:?}", event);
        signals.request_restart();
    } else {
        debug!("ignoring device change: {:?}", event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::audio_models::FormFactor;
    use crate::models::config::{ControlTimings, StreamKind};
    use crate::testing::{fast_settings, wait_until, MockEndpoint, MockEnumerator, MockLog, ScriptedPower};
    use std::sync::atomic::Ordering;

    const PATIENCE: Duration = Duration::from_secs(5);

    fn fast_config(scope: DeviceScope) -> KeeperConfig {
        KeeperConfig {
            device_scope: scope,
            buffer_ms: 20,
            retry: fast_settings(false).retry,
            timings: ControlTimings {
                fast_poll_ms: 5,
                slow_poll_ms: 20,
                debounce_ms: 1,
                sleep_threshold_secs: 30,
            },
            ..KeeperConfig::default()
        }
    }

    fn keeper(scope: DeviceScope, enumerator: &Arc<MockEnumerator>) -> SoundKeeper {
        SoundKeeper::new(
            fast_config(scope),
            PlatformQuirks::default(),
            Arc::clone(enumerator) as Arc<dyn DeviceEnumerator>,
        )
    }

    fn enumerator_with(endpoints: Vec<Arc<MockEndpoint>>) -> Arc<MockEnumerator> {
        let enumerator = Arc::new(MockEnumerator::default());
        *enumerator.default_endpoint.lock() = endpoints.first().cloned();
        *enumerator.endpoints.lock() = endpoints;
        enumerator
    }

    fn removed(device_id: &str) -> TopologyEvent {
        TopologyEvent::DeviceRemoved {
            device_id: device_id.to_string(),
        }
    }

    #[test]
    fn restart_rules() {
        let none = |_: &str| false;
        let any = |_: &str| true;
        let default_changed = |flow, role| TopologyEvent::DefaultDeviceChanged {
            flow,
            role,
            device_id: Some("x".into()),
        };

        let console = default_changed(DataFlow::Render, DeviceRole::Console);
        assert!(restart_required(DeviceScope::Primary, &console, none));
        assert!(!restart_required(DeviceScope::All, &console, none));
        let multimedia = default_changed(DataFlow::Render, DeviceRole::Multimedia);
        assert!(!restart_required(DeviceScope::Primary, &multimedia, none));
        let capture = default_changed(DataFlow::Capture, DeviceRole::Console);
        assert!(!restart_required(DeviceScope::Primary, &capture, none));

        let added = TopologyEvent::DeviceAdded { device_id: "x".into() };
        assert!(!restart_required(DeviceScope::Primary, &added, none));
        assert!(restart_required(DeviceScope::Digital, &added, none));

        assert!(!restart_required(DeviceScope::All, &removed("x"), none));
        assert!(restart_required(DeviceScope::All, &removed("x"), any));

        let activated = TopologyEvent::DeviceStateChanged {
            device_id: "x".into(),
            state: DeviceState::Active,
        };
        let unplugged = TopologyEvent::DeviceStateChanged {
            device_id: "x".into(),
            state: DeviceState::Unplugged,
        };
        assert!(restart_required(DeviceScope::Primary, &activated, none));
        assert!(!restart_required(DeviceScope::Primary, &unplugged, none));
        assert!(restart_required(DeviceScope::Primary, &unplugged, any));
    }

    #[test]
    fn topology_events_are_handled_while_a_session_starts() {
        let speakers = Arc::new(MockEndpoint::new("speakers"));
        speakers.hold_activation();
        let enumerator = enumerator_with(vec![Arc::clone(&speakers)]);
        let keeper = keeper(DeviceScope::All, &enumerator);
        let signals = keeper.signals();

        thread::scope(|scope| {
            let starter = scope.spawn(|| keeper.start());
            assert!(wait_until(PATIENCE, || MockLog::count(&speakers.log.activations) == 1));

            keeper.handle_topology_event(&removed("speakers"));
            assert!(signals.is_pending(ControlSignal::Restart));
            assert_eq!(keeper.status().sessions.len(), 1);

            speakers.release_activation();
            starter.join().unwrap().unwrap();
        });

        assert!(keeper.is_started());
        assert!(!keeper.is_retry_required());
        keeper.stop();
    }

    #[test]
    fn primary_scope_keeps_only_the_default_device() {
        let speakers = Arc::new(MockEndpoint::new("speakers"));
        let hdmi = Arc::new(MockEndpoint::new("hdmi").with_form_factor(FormFactor::DigitalAudioDisplayDevice));
        let enumerator = enumerator_with(vec![Arc::clone(&speakers), Arc::clone(&hdmi)]);
        let keeper = keeper(DeviceScope::Primary, &enumerator);

        keeper.start().unwrap();
        assert!(keeper.is_started());
        assert!(!keeper.is_retry_required());
        assert!(keeper.has_session("speakers"));
        assert!(!keeper.has_session("hdmi"));
        assert_eq!(MockLog::count(&hdmi.log.activations), 0);

        keeper.stop();
        assert!(!keeper.is_started());
        assert!(!keeper.has_session("speakers"));
        assert_eq!(speakers.log.active_registrations.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn missing_default_device_runs_without_sessions() {
        let enumerator = enumerator_with(Vec::new());
        let keeper = keeper(DeviceScope::Primary, &enumerator);

        keeper.start().unwrap();
        assert!(keeper.is_started());
        assert!(keeper.status().sessions.is_empty());
    }

    #[test]
    fn scope_filters_by_form_factor() {
        let speakers = Arc::new(MockEndpoint::new("speakers"));
        let spdif = Arc::new(MockEndpoint::new("spdif").with_form_factor(FormFactor::Spdif));
        let remote = Arc::new(MockEndpoint::new("remote").with_form_factor(FormFactor::RemoteNetworkDevice));
        let all = vec![Arc::clone(&speakers), Arc::clone(&spdif), Arc::clone(&remote)];
        let enumerator = enumerator_with(all);

        let digital = keeper(DeviceScope::Digital, &enumerator);
        digital.start().unwrap();
        assert!(digital.has_session("spdif"));
        assert!(!digital.has_session("speakers"));
        digital.stop();

        let analog = keeper(DeviceScope::Analog, &enumerator);
        analog.start().unwrap();
        assert!(analog.has_session("speakers"));
        assert!(!analog.has_session("spdif"));
        assert!(!analog.has_session("remote"));
        analog.stop();

        let mut config = fast_config(DeviceScope::All);
        config.allow_remote = true;
        let everything = SoundKeeper::new(
            config,
            PlatformQuirks::default(),
            Arc::clone(&enumerator) as Arc<dyn DeviceEnumerator>,
        );
        everything.start().unwrap();
        assert_eq!(everything.status().sessions.len(), 3);
    }

    #[test]
    fn enumeration_failure_leaves_keeper_stopped() {
        let enumerator = enumerator_with(vec![Arc::new(MockEndpoint::new("speakers"))]);
        *enumerator.enumeration_failure.lock() = Some(KeeperError::platform("EnumAudioEndpoints", 0x8000_4005));

        let keeper = keeper(DeviceScope::All, &enumerator);
        assert!(keeper.start().is_err());
        assert!(!keeper.is_started());
    }

    #[test]
    fn invalid_sessions_are_flagged_but_never_retried() {
        let broken = Arc::new(MockEndpoint::new("broken"));
        broken.fail_activation(KeeperError::platform("Activate", 0x8889_0004));
        let enumerator = enumerator_with(vec![Arc::clone(&broken)]);
        let keeper = keeper(DeviceScope::All, &enumerator);

        keeper.start().unwrap();
        assert!(keeper.is_retry_required());
        assert!(!keeper.has_session("broken"));

        assert!(keeper.retry());
        assert!(!keeper.is_retry_required());
        assert_eq!(MockLog::count(&broken.log.activations), 1);
    }

    #[test]
    fn stream_changes_reach_running_sessions() {
        let speakers = Arc::new(MockEndpoint::new("speakers"));
        let enumerator = enumerator_with(vec![Arc::clone(&speakers)]);
        let keeper = keeper(DeviceScope::Primary, &enumerator);

        keeper.start().unwrap();
        let sine = StreamConfig::with_defaults(StreamKind::Sine);
        keeper.set_stream_config(sine);
        assert_eq!(keeper.config().stream, sine);
        keeper.restart().unwrap();
        assert_eq!(MockLog::count(&speakers.log.activations), 2);
    }

    #[test]
    fn topology_events_raise_restart_requests() {
        let speakers = Arc::new(MockEndpoint::new("speakers"));
        let enumerator = enumerator_with(vec![Arc::clone(&speakers)]);
        let keeper = keeper(DeviceScope::All, &enumerator);
        let signals = keeper.signals();
        keeper.start().unwrap();

        keeper.handle_topology_event(&removed("headphones"));
        assert!(!signals.is_pending(ControlSignal::Restart));
        keeper.handle_topology_event(&removed("speakers"));
        assert!(signals.is_pending(ControlSignal::Restart));
    }

    #[test]
    fn run_returns_at_once_for_no_scope() {
        let speakers = Arc::new(MockEndpoint::new("speakers"));
        let enumerator = enumerator_with(vec![Arc::clone(&speakers)]);
        let keeper = keeper(DeviceScope::None, &enumerator);

        keeper.run(&mut ScriptedPower::new([None]));
        assert!(!keeper.is_started());
        assert_eq!(MockLog::count(&speakers.log.activations), 0);
    }

    #[test]
    fn run_stops_sessions_when_asked() {
        let speakers = Arc::new(MockEndpoint::new("speakers"));
        let enumerator = enumerator_with(vec![Arc::clone(&speakers)]);
        let keeper = keeper(DeviceScope::Primary, &enumerator);
        keeper.signals().request_stop();

        keeper.run(&mut ScriptedPower::new([None]));
        assert!(!keeper.is_started());
        assert_eq!(MockLog::count(&speakers.log.stream_starts), 1);
        assert_eq!(MockLog::count(&speakers.log.stream_stops), 1);
        assert_eq!(enumerator.active_listeners.load(Ordering::SeqCst), 0);
    }

    /// Predicts sleep after the first reading and stops the loop on the third.
    struct SleepyPower {
        calls: usize,
        signals: Arc<KeeperSignals>,
    }

    impl PowerMonitor for SleepyPower {
        fn seconds_to_sleep(&mut self) -> Option<i64> {
            self.calls += 1;
            match self.calls {
                1 => Some(600),
                2 => Some(0),
                _ => {
                    self.signals.request_stop();
                    Some(0)
                }
            }
        }
    }

    #[test]
    fn run_releases_devices_before_sleep() {
        let speakers = Arc::new(MockEndpoint::new("speakers"));
        let enumerator = enumerator_with(vec![Arc::clone(&speakers)]);
        let keeper = keeper(DeviceScope::Primary, &enumerator);
        let mut power = SleepyPower {
            calls: 0,
            signals: keeper.signals(),
        };

        keeper.run(&mut power);
        assert_eq!(power.calls, 3);
        assert_eq!(MockLog::count(&speakers.log.stream_starts), 1);
        assert_eq!(MockLog::count(&speakers.log.stream_stops), 1);
        assert!(!keeper.is_started());
    }

    #[test]
    fn run_restarts_after_device_removal() {
        let speakers = Arc::new(MockEndpoint::new("speakers"));
        let enumerator = enumerator_with(vec![Arc::clone(&speakers)]);
        let keeper = keeper(DeviceScope::All, &enumerator);
        let signals = keeper.signals();

        thread::scope(|scope| {
            let runner = scope.spawn(|| keeper.run(&mut ScriptedPower::new([None])));

            assert!(wait_until(PATIENCE, || MockLog::count(&speakers.log.stream_starts) == 1));
            assert!(wait_until(PATIENCE, || enumerator.active_listeners.load(Ordering::SeqCst) == 1));
            enumerator.fire(removed("speakers"));
            assert!(wait_until(PATIENCE, || MockLog::count(&speakers.log.stream_starts) == 2));

            signals.request_stop();
            runner.join().unwrap();
        });

        assert!(!keeper.is_started());
        assert_eq!(speakers.log.active_registrations.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn session_retry_request_is_picked_up_by_run() {
        let speakers = Arc::new(MockEndpoint::new("speakers"));
        let enumerator = enumerator_with(vec![Arc::clone(&speakers)]);
        let keeper = keeper(DeviceScope::Primary, &enumerator);
        let signals = keeper.signals();
        signals.request_retry();
        signals.request_stop();

        keeper.run(&mut ScriptedPower::new([None]));
        assert!(!keeper.is_started());
        assert!(!signals.is_pending(ControlSignal::Stop));
    }
}
