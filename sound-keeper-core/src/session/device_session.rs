use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use chrono::Utc;
use log::{debug, error, info, trace, warn};
use parking_lot::{Condvar, Mutex};

use crate::models::audio_models::{AudioSessionState, DisconnectReason, SessionDiagnostics, SessionStatus};
use crate::models::config::{MutePolicy, SessionSettings, StreamConfig, StreamKind};
use crate::models::error::KeeperError;
use crate::models::state::{AtomicMode, RenderingMode};
use crate::processing::signal_generator::{BufferFill, SignalGenerator};
use crate::processing::wave_format::{MixFormat, SampleEncoding};
use crate::session::mailbox::ModeMailbox;
use crate::session::state_machine::{Counters, ModeDriver, RenderingStateMachine};
use crate::traits::platform::{AudioEndpoint, RenderClient, StreamClient};
use crate::traits::session_events::SessionEvents;
use crate::traits::session_owner::SessionOwner;

/// Noise is generated at this rate and converted by the engine.
pub const NOISE_SAMPLE_RATE: u32 = 48_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ThreadPhase {
    Idle,
    Starting,
    Running,
    Exited,
}

/// State shared between the session handle, its rendering thread and the
/// session event listener.
struct SessionShared {
    device_id: String,
    settings: SessionSettings,
    owner: Arc<dyn SessionOwner>,
    mode: AtomicMode,
    mailbox: ModeMailbox,
    phase: Mutex<ThreadPhase>,
    phase_changed: Condvar,
    invalid: AtomicBool,
    restart_requested: AtomicBool,
    stream: Mutex<StreamConfig>,
    /// Bumped under the `stream` lock on every configuration change.
    generation: AtomicU64,
    diagnostics: Mutex<SessionDiagnostics>,
}

impl SessionShared {
    fn phase(&self) -> ThreadPhase {
        *self.phase.lock()
    }

    fn set_phase(&self, phase: ThreadPhase) {
        *self.phase.lock() = phase;
        self.phase_changed.notify_all();
    }

    fn signal_started(&self) {
        let mut phase = self.phase.lock();
        if *phase == ThreadPhase::Starting {
            *phase = ThreadPhase::Running;
            self.phase_changed.notify_all();
        }
    }

    /// Block until the thread has either started playing or exited.
    fn wait_until_launched(&self) -> ThreadPhase {
        let mut phase = self.phase.lock();
        while *phase == ThreadPhase::Starting {
            self.phase_changed.wait(&mut phase);
        }
        *phase
    }

    fn wait_exited(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut phase = self.phase.lock();
        while *phase != ThreadPhase::Exited {
            if self.phase_changed.wait_until(&mut phase, deadline).timed_out() {
                return *phase == ThreadPhase::Exited;
            }
        }
        true
    }

    fn invalidate(&self) {
        self.invalid.store(true, Ordering::Release);
    }

    fn record_failure(&self, context: &str, err: &KeeperError) {
        let mut diagnostics = self.diagnostics.lock();
        diagnostics.last_failure = Some(Utc::now());
        diagnostics.last_error = Some(format!("{}: {}", context, err));
    }
}

/// Marks the rendering thread as exited however it leaves.
struct ExitGuard<'a>(&'a SessionShared);

impl Drop for ExitGuard<'_> {
    fn drop(&mut self) {
        self.0.set_phase(ThreadPhase::Exited);
    }
}

/// Keeps one render endpoint busy from a dedicated rendering thread.
///
/// ```text
/// start() ──► [render thread] ──► RenderingStateMachine ──► RenderWorker
///                                        ▲                      │
///                 SessionListener ── ModeMailbox ◄──── stop() ──┘
/// ```
pub struct DeviceSession {
    endpoint: Arc<dyn AudioEndpoint>,
    shared: Arc<SessionShared>,
    thread: Mutex<Option<thread::JoinHandle<()>>>,
}

impl DeviceSession {
    pub fn new(
        endpoint: Arc<dyn AudioEndpoint>,
        stream: StreamConfig,
        settings: SessionSettings,
        owner: Arc<dyn SessionOwner>,
    ) -> Self {
        let device_id = endpoint.id().to_string();
        let invalid = device_id.is_empty();
        if invalid {
            error!("endpoint has no device id, session is unusable");
        }

        Self {
            endpoint,
            shared: Arc::new(SessionShared {
                device_id,
                settings,
                owner,
                mode: AtomicMode::new(if invalid { RenderingMode::Invalid } else { RenderingMode::Stop }),
                mailbox: ModeMailbox::new(),
                phase: Mutex::new(ThreadPhase::Idle),
                phase_changed: Condvar::new(),
                invalid: AtomicBool::new(invalid),
                restart_requested: AtomicBool::new(false),
                stream: Mutex::new(stream),
                generation: AtomicU64::new(0),
                diagnostics: Mutex::new(SessionDiagnostics::default()),
            }),
            thread: Mutex::new(None),
        }
    }

    pub fn device_id(&self) -> &str {
        &self.shared.device_id
    }

    /// Launch the rendering thread and wait until it plays or gives up.
    ///
    /// Returns true right away if the thread is already running.
    pub fn start(&self) -> bool {
        let mut thread_slot = self.thread.lock();

        if !self.is_valid() {
            return false;
        }
        if self.is_started() {
            return true;
        }
        if let Err(err) = self.stop_thread(&mut thread_slot) {
            error!("cannot restart session on '{}': {}", self.shared.device_id, err);
            return false;
        }

        self.shared.mailbox.clear();
        self.shared.set_phase(ThreadPhase::Starting);

        let shared = Arc::clone(&self.shared);
        let endpoint = Arc::clone(&self.endpoint);
        let spawned = thread::Builder::new()
            .name("render-session".into())
            .spawn(move || rendering_thread(shared, endpoint));

        match spawned {
            Ok(handle) => *thread_slot = Some(handle),
            Err(err) => {
                let err = KeeperError::ThreadSpawn(err.to_string());
                error!("{} for '{}'", err, self.shared.device_id);
                self.shared.record_failure("start", &err);
                self.shared.set_phase(ThreadPhase::Idle);
                return false;
            }
        }

        if self.shared.wait_until_launched() == ThreadPhase::Running {
            return true;
        }

        error!("unable to start rendering on '{}'", self.shared.device_id);
        if let Err(err) = self.stop_thread(&mut thread_slot) {
            error!("{} on '{}'", err, self.shared.device_id);
        }
        false
    }

    /// Stop the rendering thread and wait for it to release the stream.
    ///
    /// Gives up after the configured stop timeout and reports
    /// [`KeeperError::StopTimeout`]; the thread is then left detached from
    /// further `start` calls until it exits.
    pub fn stop(&self) -> Result<(), KeeperError> {
        let mut thread_slot = self.thread.lock();
        self.stop_thread(&mut thread_slot)
    }

    fn stop_thread(&self, thread_slot: &mut Option<thread::JoinHandle<()>>) -> Result<(), KeeperError> {
        let Some(handle) = thread_slot.take() else {
            return Ok(());
        };

        self.shared.mailbox.post(RenderingMode::Stop);
        let timeout = self.shared.settings.retry.stop_timeout();
        if !self.shared.wait_exited(timeout) {
            error!(
                "rendering thread for '{}' did not stop within {:?}",
                self.shared.device_id, timeout
            );
            *thread_slot = Some(handle);
            return Err(KeeperError::StopTimeout);
        }

        if handle.join().is_err() {
            error!("rendering thread for '{}' panicked", self.shared.device_id);
        }
        self.shared.mailbox.clear();
        self.shared.set_phase(ThreadPhase::Idle);
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.shared.phase() == ThreadPhase::Running
    }

    /// False for good once the endpoint turned out to be unusable.
    pub fn is_valid(&self) -> bool {
        !self.shared.invalid.load(Ordering::Acquire)
    }

    pub fn rendering_mode(&self) -> RenderingMode {
        self.shared.mode.load()
    }

    pub fn stream_config(&self) -> StreamConfig {
        *self.shared.stream.lock()
    }

    /// Replace all stream parameters. The running generator restarts from
    /// phase zero at its next buffer.
    pub fn set_stream_config(&self, config: StreamConfig) {
        self.update_stream(|stream| *stream = config);
    }

    pub fn set_stream_kind(&self, kind: StreamKind) {
        self.update_stream(|stream| stream.kind = kind);
    }

    pub fn set_frequency(&self, hz: f64) {
        self.update_stream(|stream| stream.set_frequency(hz));
    }

    pub fn set_amplitude(&self, amplitude: f64) {
        self.update_stream(|stream| stream.set_amplitude(amplitude));
    }

    pub fn set_play_seconds(&self, seconds: f64) {
        self.update_stream(|stream| stream.set_play_seconds(seconds));
    }

    pub fn set_wait_seconds(&self, seconds: f64) {
        self.update_stream(|stream| stream.set_wait_seconds(seconds));
    }

    pub fn set_fade_seconds(&self, seconds: f64) {
        self.update_stream(|stream| stream.set_fade_seconds(seconds));
    }

    fn update_stream(&self, change: impl FnOnce(&mut StreamConfig)) {
        let reopen = {
            let mut stream = self.shared.stream.lock();
            let previous = stream.kind;
            change(&mut stream);
            self.shared.generation.fetch_add(1, Ordering::AcqRel);
            needs_reopen(previous, stream.kind)
        };
        if reopen && self.shared.mode.load() == RenderingMode::Render {
            debug!("stream kind change on '{}' needs a new stream", self.shared.device_id);
            self.shared.mailbox.post(RenderingMode::Retry);
        }
    }

    pub fn diagnostics(&self) -> SessionDiagnostics {
        self.shared.diagnostics.lock().clone()
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            device_id: Some(self.shared.device_id.clone()).filter(|id| !id.is_empty()),
            is_started: self.is_started(),
            is_valid: self.is_valid(),
            diagnostics: self.diagnostics(),
        }
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            error!("dropping session on '{}': {}", self.shared.device_id, err);
        }
    }
}

fn rendering_thread(shared: Arc<SessionShared>, endpoint: Arc<dyn AudioEndpoint>) {
    let _exit = ExitGuard(&shared);
    info!("enter rendering thread for '{}'", shared.device_id);

    let _scope = match endpoint.enter_render_thread() {
        Ok(scope) => scope,
        Err(err) => {
            error!("unable to prepare rendering thread for '{}': {}", shared.device_id, err);
            shared.record_failure("prepare rendering thread", &err);
            return;
        }
    };

    let listener: Arc<dyn SessionEvents> = Arc::new(SessionListener {
        shared: Arc::clone(&shared),
    });
    let mut worker = RenderWorker {
        shared: &shared,
        endpoint: endpoint.as_ref(),
        listener,
        generator: None,
        generation: 0,
    };

    let machine = RenderingStateMachine::new(shared.settings.retry, shared.settings.quirks);
    let exit = machine.run(&mut worker, &shared.mode);
    if exit == RenderingMode::Invalid {
        shared.invalidate();
    }
    info!("leave rendering thread for '{}' in mode {:?}", shared.device_id, exit);
}

/// Whether an open stream cannot carry on with the new kind: a `None`
/// stream never wakes to pump, and noise opens at its own sample rate.
fn needs_reopen(previous: StreamKind, next: StreamKind) -> bool {
    previous != next && (previous == StreamKind::None || previous.is_noise() != next.is_noise())
}

/// Seed for the noise generator, taken once per stream opening from the
/// wall clock's nanoseconds.
fn noise_seed() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos() as u64)
        .unwrap_or(0x9E37_79B9_7F4A_7C15)
}

/// Mode handlers running on the rendering thread.
struct RenderWorker<'a> {
    shared: &'a SessionShared,
    endpoint: &'a dyn AudioEndpoint,
    listener: Arc<dyn SessionEvents>,
    generator: Option<SignalGenerator>,
    generation: u64,
}

impl RenderWorker<'_> {
    fn fail(&self, next: RenderingMode, context: &str, err: &KeeperError) -> RenderingMode {
        error!("{} on '{}': {}", context, self.shared.device_id, err);
        self.shared.record_failure(context, err);
        next
    }

    /// Snapshot the stream parameters, restarting the generator phase if
    /// they changed since the last look.
    fn refresh_stream(&mut self) -> StreamConfig {
        let stream = self.shared.stream.lock();
        let generation = self.shared.generation.load(Ordering::Acquire);
        if generation != self.generation {
            self.generation = generation;
            if let Some(generator) = self.generator.as_mut() {
                debug!("stream parameters changed, restarting signal phase");
                generator.reconfigure(*stream);
            }
        }
        *stream
    }

    fn prepare_generator(
        &mut self,
        stream: StreamConfig,
        mix: &MixFormat,
        output: SampleEncoding,
    ) -> Result<(), KeeperError> {
        let seed = noise_seed();
        match self.generator.as_mut() {
            Some(generator) if generator.renders_to(mix, output) => generator.reseed(seed),
            _ => self.generator = Some(SignalGenerator::new(stream, mix, output, seed)?),
        }
        Ok(())
    }

    /// One pass of open, pre-roll, start and pump.
    fn play(&mut self, counters: &mut Counters) -> RenderingMode {
        self.shared.diagnostics.lock().render_attempts += 1;
        let stream = self.refresh_stream();

        // Failures before the stream is initialised make the endpoint unusable.
        let mut client = match self.endpoint.activate_client() {
            Ok(client) => client,
            Err(err) => return self.fail(RenderingMode::Invalid, "activate audio client", &err),
        };

        let output = match self.endpoint.device_format() {
            Some(format) => format.encoding(),
            None => {
                warn!("unable to get output format of '{}'", self.shared.device_id);
                SampleEncoding::Unknown
            }
        };

        let mut format = match client.mix_format() {
            Ok(format) => format,
            Err(err) => return self.fail(RenderingMode::Invalid, "get mix format", &err),
        };
        if format.encoding() == SampleEncoding::Unknown {
            let err = KeeperError::UnsupportedFormat(format!("{:?}", format.as_bytes()));
            return self.fail(RenderingMode::Invalid, "parse mix format", &err);
        }
        if stream.kind.is_noise() {
            debug!("using {} Hz for noise generation", NOISE_SAMPLE_RATE);
            format.with_sample_rate(NOISE_SAMPLE_RATE);
        }
        let mix = format.mix_format();

        if let Err(err) = client.initialize(&format, self.shared.settings.buffer_duration()) {
            let next = if err.is_device_in_use() {
                RenderingMode::WaitExclusive
            } else {
                RenderingMode::Invalid
            };
            return self.fail(next, "initialize audio client", &err);
        }

        // From here on the stream exists and failures are worth a retry.
        let buffer_frames = match client.buffer_frames() {
            Ok(frames) => frames,
            Err(err) => return self.fail(RenderingMode::Retry, "get buffer size", &err),
        };
        let mut render = match client.render_client() {
            Ok(render) => render,
            Err(err) => return self.fail(RenderingMode::Retry, "get render client", &err),
        };
        let control = match client.session_control() {
            Ok(control) => control,
            Err(err) => return self.fail(RenderingMode::Retry, "get session control", &err),
        };
        let _registration = match control.register(Arc::clone(&self.listener)) {
            Ok(registration) => registration,
            Err(err) => return self.fail(RenderingMode::Retry, "register session notifications", &err),
        };

        if let Err(err) = self.prepare_generator(stream, &mix, output) {
            return self.fail(RenderingMode::Invalid, "prepare signal generator", &err);
        }
        self.shared.diagnostics.lock().mix_format = mix.to_string();

        if let Err(err) = self.pump(client.as_ref(), render.as_mut(), buffer_frames) {
            return self.fail(RenderingMode::Retry, "render initial buffer", &err);
        }
        if let Err(err) = client.start() {
            return self.fail(RenderingMode::Retry, "start audio client", &err);
        }

        counters.play_attempts = 0;
        self.shared.diagnostics.lock().last_playback_started = Some(Utc::now());
        self.shared.signal_started();
        info!("playing {} into '{}' ({})", stream.kind.name(), self.shared.device_id, mix);

        let exit = self.pump_loop(client.as_ref(), render.as_mut(), buffer_frames, stream.kind);

        debug!("leave rendering loop, stopping audio client");
        if let Err(err) = client.stop() {
            warn!("stop audio client on '{}': {}", self.shared.device_id, err);
        }
        exit
    }

    fn pump_loop(
        &mut self,
        client: &dyn StreamClient,
        render: &mut dyn RenderClient,
        buffer_frames: u32,
        kind: StreamKind,
    ) -> RenderingMode {
        let interval = self.shared.settings.pump_interval();
        loop {
            let request = if kind == StreamKind::None {
                Some(self.shared.mailbox.wait_forever())
            } else {
                self.shared.mailbox.wait(interval)
            };
            if let Some(next) = request {
                return next;
            }
            if let Err(err) = self.pump(client, render, buffer_frames) {
                return self.fail(RenderingMode::Retry, "render buffer", &err);
            }
        }
    }

    /// Top the engine buffer up with freshly generated frames.
    fn pump(
        &mut self,
        client: &dyn StreamClient,
        render: &mut dyn RenderClient,
        buffer_frames: u32,
    ) -> Result<(), KeeperError> {
        let stream = self.refresh_stream();
        if stream.kind == StreamKind::None {
            return Ok(());
        }
        let Some(generator) = self.generator.as_mut() else {
            return Ok(());
        };

        let padding = client.current_padding()?;
        let frames = buffer_frames.saturating_sub(padding);
        if frames == 0 {
            warn!("no frames consumed on '{}', was the system sleeping?", self.shared.device_id);
            self.shared.diagnostics.lock().skipped_ticks += 1;
            return Ok(());
        }

        let fill = render.write(frames, &mut |buffer: &mut [u8]| generator.fill(buffer, frames as usize))?;
        trace!("submitted {} frames ({:?})", frames, fill);

        let mut diagnostics = self.shared.diagnostics.lock();
        diagnostics.buffers_submitted += 1;
        diagnostics.frames_submitted += u64::from(frames);
        if fill == BufferFill::Silent {
            diagnostics.silent_buffers += 1;
        }
        Ok(())
    }
}

impl ModeDriver for RenderWorker<'_> {
    fn render(&mut self, counters: &mut Counters) -> RenderingMode {
        counters.play_attempts += 1;
        let next = self.play(counters);
        if !next.is_terminal() {
            // Recoverable outcomes still count as a started session.
            self.shared.signal_started();
        }
        next
    }

    fn wait_exclusive(&mut self, counters: &mut Counters) -> RenderingMode {
        let sessions = match self.endpoint.audio_sessions() {
            Ok(sessions) => sessions,
            Err(err) => return self.fail(RenderingMode::Invalid, "enumerate audio sessions", &err),
        };

        let mut active = None;
        for (index, session) in sessions.into_iter().enumerate() {
            match session.state() {
                Ok(AudioSessionState::Active) => {
                    active = Some(session);
                    break;
                }
                Ok(_) => {}
                Err(err) => {
                    return self.fail(RenderingMode::Retry, &format!("get state of session #{}", index), &err);
                }
            }
        }

        let Some(session) = active else {
            counters.wait_attempts += 1;
            if counters.wait_attempts < self.shared.settings.retry.max_wait_attempts {
                debug!("no active session on '{}', polling again", self.shared.device_id);
                return RenderingMode::WaitExclusive;
            }
            info!(
                "no active session on '{}' after {} polls, trying to play",
                self.shared.device_id, counters.wait_attempts
            );
            counters.wait_attempts = 0;
            return RenderingMode::Retry;
        };

        counters.wait_attempts = 0;
        let _registration = match session.register(Arc::clone(&self.listener)) {
            Ok(registration) => registration,
            Err(err) => return self.fail(RenderingMode::Retry, "register exclusive session notifications", &err),
        };
        debug!("waiting for the exclusive session on '{}' to end", self.shared.device_id);
        self.shared.mailbox.wait_forever()
    }

    fn wait_request(&mut self, delay: Duration) -> Option<RenderingMode> {
        if delay.is_zero() {
            self.shared.mailbox.take()
        } else {
            self.shared.mailbox.wait(delay)
        }
    }

    fn gave_up(&mut self) {
        warn!("giving up on '{}' until the next retry", self.shared.device_id);
        self.shared.owner.request_retry();
    }
}

/// Turns platform session events into mode requests.
struct SessionListener {
    shared: Arc<SessionShared>,
}

impl SessionEvents for SessionListener {
    fn on_state_changed(&self, state: AudioSessionState) {
        if self.shared.mode.load() != RenderingMode::WaitExclusive {
            return;
        }
        debug!("exclusive session on '{}' is now {:?}", self.shared.device_id, state);
        self.shared.mailbox.post(RenderingMode::Retry);
    }

    fn on_disconnected(&self, reason: DisconnectReason) {
        if self.shared.mode.load() != RenderingMode::Render {
            return;
        }
        match reason {
            DisconnectReason::FormatChanged => {
                info!("session on '{}' disconnected ({:?}), retrying", self.shared.device_id, reason);
                self.shared.mailbox.post(RenderingMode::Retry);
            }
            DisconnectReason::ExclusiveModeOverride => {
                info!("session on '{}' overridden by exclusive mode", self.shared.device_id);
                self.shared.mailbox.post(RenderingMode::WaitExclusive);
            }
            _ => {
                warn!("session on '{}' disconnected ({:?}), restarting", self.shared.device_id, reason);
                self.shared.invalidate();
                self.shared.mailbox.post(RenderingMode::Invalid);
                if !self.shared.restart_requested.swap(true, Ordering::AcqRel) {
                    self.shared.owner.request_restart();
                }
            }
        }
    }

    fn on_volume_changed(&self, volume: f32, muted: bool) {
        if !muted {
            return;
        }
        match self.shared.settings.mute_policy {
            MutePolicy::Ignore => debug!("'{}' muted at volume {}", self.shared.device_id, volume),
            MutePolicy::Shutdown => {
                info!("'{}' muted, shutting down", self.shared.device_id);
                self.shared.owner.request_shutdown();
            }
            MutePolicy::Restart => {
                info!("'{}' muted, restarting", self.shared.device_id);
                self.shared.owner.request_restart();
            }
        }
    }
}
