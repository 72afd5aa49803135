//! Scripted platform used by the session and keeper tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicIsize, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::models::audio_models::{AudioSessionState, DeviceState, FormFactor, TopologyEvent};
use crate::models::config::{PlatformQuirks, RetryPolicy, SessionSettings};
use crate::models::error::KeeperError;
use crate::processing::signal_generator::BufferFill;
use crate::processing::wave_format::{SampleEncoding, WaveFormat};
use crate::traits::platform::{
    AudioEndpoint, DeviceEnumerator, NotificationRegistration, PowerMonitor, RenderClient, SessionControl,
    StreamClient, ThreadScope, TopologyCallback,
};
use crate::traits::session_events::SessionEvents;
use crate::traits::session_owner::SessionOwner;

pub const BUFFER_FRAMES: u32 = 480;

/// Session settings with short delays so scenarios finish quickly.
pub fn fast_settings(leaky_wasapi: bool) -> SessionSettings {
    SessionSettings {
        buffer_ms: 20,
        retry: RetryPolicy {
            playing_retry_ms: 5,
            failing_retry_ms: 5,
            exclusive_settle_ms: 1,
            exclusive_poll_ms: 5,
            stop_timeout_ms: 2000,
            ..RetryPolicy::default()
        },
        quirks: PlatformQuirks { leaky_wasapi },
        ..SessionSettings::default()
    }
}

/// Poll `condition` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    condition()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Submission {
    pub frames: u32,
    pub fill: BufferFill,
}

/// Everything the scripted platform observed.
#[derive(Default)]
pub struct MockLog {
    pub activations: AtomicUsize,
    pub initializations: AtomicUsize,
    pub active_registrations: AtomicIsize,
    pub total_registrations: AtomicUsize,
    pub stream_starts: AtomicUsize,
    pub stream_stops: AtomicUsize,
    pub open_thread_scopes: AtomicIsize,
    pub initialized_rates: Mutex<Vec<u32>>,
    pub submissions: Mutex<Vec<Submission>>,
    pub listeners: Mutex<Vec<Arc<dyn SessionEvents>>>,
}

impl MockLog {
    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    pub fn submissions(&self) -> Vec<Submission> {
        self.submissions.lock().clone()
    }

    pub fn latest_listener(&self) -> Option<Arc<dyn SessionEvents>> {
        self.listeners.lock().last().cloned()
    }
}

#[derive(Default)]
struct Script {
    activate_failures: VecDeque<KeeperError>,
    initialize_results: VecDeque<Result<(), KeeperError>>,
    padding: VecDeque<u32>,
    foreign_sessions: Vec<AudioSessionState>,
    activation_held: bool,
}

pub struct MockEndpoint {
    id: String,
    form_factor: FormFactor,
    mix: WaveFormat,
    device_format: Option<WaveFormat>,
    script: Arc<Mutex<Script>>,
    activation_released: Condvar,
    pub log: Arc<MockLog>,
}

impl MockEndpoint {
    /// Stereo float speakers at 44.1 kHz.
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            form_factor: FormFactor::Speakers,
            mix: WaveFormat::extensible(SampleEncoding::Float32, 2, 44100),
            device_format: Some(WaveFormat::extensible(SampleEncoding::Int24, 2, 48000)),
            script: Arc::new(Mutex::new(Script::default())),
            activation_released: Condvar::new(),
            log: Arc::new(MockLog::default()),
        }
    }

    pub fn with_form_factor(mut self, form_factor: FormFactor) -> Self {
        self.form_factor = form_factor;
        self
    }

    pub fn with_mix_format(mut self, mix: WaveFormat) -> Self {
        self.mix = mix;
        self
    }

    pub fn fail_activation(&self, error: KeeperError) {
        self.script.lock().activate_failures.push_back(error);
    }

    /// Block `activate_client` until [`release_activation`](Self::release_activation).
    pub fn hold_activation(&self) {
        self.script.lock().activation_held = true;
    }

    pub fn release_activation(&self) {
        self.script.lock().activation_held = false;
        self.activation_released.notify_all();
    }

    pub fn script_initialize(&self, result: Result<(), KeeperError>) {
        self.script.lock().initialize_results.push_back(result);
    }

    /// Padding values returned by successive `current_padding` calls; once
    /// exhausted the buffer reads as fully drained.
    pub fn script_padding(&self, values: impl IntoIterator<Item = u32>) {
        self.script.lock().padding.extend(values);
    }

    pub fn set_foreign_sessions(&self, states: Vec<AudioSessionState>) {
        self.script.lock().foreign_sessions = states;
    }
}

struct ScopeToken(Arc<MockLog>);

impl Drop for ScopeToken {
    fn drop(&mut self) {
        self.0.open_thread_scopes.fetch_sub(1, Ordering::SeqCst);
    }
}

impl AudioEndpoint for MockEndpoint {
    fn id(&self) -> &str {
        &self.id
    }

    fn state(&self) -> Result<DeviceState, KeeperError> {
        Ok(DeviceState::Active)
    }

    fn form_factor(&self) -> Result<FormFactor, KeeperError> {
        Ok(self.form_factor)
    }

    fn device_format(&self) -> Option<WaveFormat> {
        self.device_format.clone()
    }

    fn enter_render_thread(&self) -> Result<ThreadScope, KeeperError> {
        self.log.open_thread_scopes.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScopeToken(Arc::clone(&self.log))))
    }

    fn activate_client(&self) -> Result<Box<dyn StreamClient>, KeeperError> {
        self.log.activations.fetch_add(1, Ordering::SeqCst);
        let mut script = self.script.lock();
        while script.activation_held {
            self.activation_released.wait(&mut script);
        }
        if let Some(error) = script.activate_failures.pop_front() {
            return Err(error);
        }
        drop(script);
        Ok(Box::new(MockStreamClient {
            mix: self.mix.clone(),
            script: Arc::clone(&self.script),
            log: Arc::clone(&self.log),
            initialized: None,
        }))
    }

    fn audio_sessions(&self) -> Result<Vec<Box<dyn SessionControl>>, KeeperError> {
        let states = self.script.lock().foreign_sessions.clone();
        Ok(states
            .into_iter()
            .map(|state| {
                Box::new(MockSessionControl {
                    state,
                    log: Arc::clone(&self.log),
                }) as Box<dyn SessionControl>
            })
            .collect())
    }
}

struct MockStreamClient {
    mix: WaveFormat,
    script: Arc<Mutex<Script>>,
    log: Arc<MockLog>,
    initialized: Option<WaveFormat>,
}

impl StreamClient for MockStreamClient {
    fn mix_format(&self) -> Result<WaveFormat, KeeperError> {
        Ok(self.mix.clone())
    }

    fn initialize(&mut self, format: &WaveFormat, _buffer_duration: Duration) -> Result<(), KeeperError> {
        self.log.initializations.fetch_add(1, Ordering::SeqCst);
        if let Some(result) = self.script.lock().initialize_results.pop_front() {
            result?;
        }
        self.log.initialized_rates.lock().push(format.sample_rate());
        self.initialized = Some(format.clone());
        Ok(())
    }

    fn buffer_frames(&self) -> Result<u32, KeeperError> {
        Ok(BUFFER_FRAMES)
    }

    fn current_padding(&self) -> Result<u32, KeeperError> {
        Ok(self.script.lock().padding.pop_front().unwrap_or(0))
    }

    fn render_client(&self) -> Result<Box<dyn RenderClient>, KeeperError> {
        let stride = self
            .initialized
            .as_ref()
            .map(|format| usize::from(format.block_align()))
            .ok_or_else(|| KeeperError::platform("GetService", 0x8889_0001))?;
        Ok(Box::new(MockRenderClient {
            stride,
            log: Arc::clone(&self.log),
        }))
    }

    fn session_control(&self) -> Result<Box<dyn SessionControl>, KeeperError> {
        Ok(Box::new(MockSessionControl {
            state: AudioSessionState::Active,
            log: Arc::clone(&self.log),
        }))
    }

    fn start(&mut self) -> Result<(), KeeperError> {
        self.log.stream_starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), KeeperError> {
        self.log.stream_stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct MockRenderClient {
    stride: usize,
    log: Arc<MockLog>,
}

impl RenderClient for MockRenderClient {
    fn write(
        &mut self,
        frames: u32,
        fill: &mut dyn FnMut(&mut [u8]) -> BufferFill,
    ) -> Result<BufferFill, KeeperError> {
        let mut buffer = vec![0u8; frames as usize * self.stride];
        let result = fill(&mut buffer);
        self.log.submissions.lock().push(Submission { frames, fill: result });
        Ok(result)
    }
}

struct MockSessionControl {
    state: AudioSessionState,
    log: Arc<MockLog>,
}

impl SessionControl for MockSessionControl {
    fn state(&self) -> Result<AudioSessionState, KeeperError> {
        Ok(self.state)
    }

    fn register(&self, events: Arc<dyn SessionEvents>) -> Result<NotificationRegistration, KeeperError> {
        self.log.active_registrations.fetch_add(1, Ordering::SeqCst);
        self.log.total_registrations.fetch_add(1, Ordering::SeqCst);
        self.log.listeners.lock().push(events);
        let log = Arc::clone(&self.log);
        Ok(NotificationRegistration::new(move || {
            log.active_registrations.fetch_sub(1, Ordering::SeqCst);
        }))
    }
}

/// Records owner requests raised by sessions.
#[derive(Default)]
pub struct RecordingOwner {
    pub retries: AtomicUsize,
    pub restarts: AtomicUsize,
    pub shutdowns: AtomicUsize,
}

impl SessionOwner for RecordingOwner {
    fn request_retry(&self) {
        self.retries.fetch_add(1, Ordering::SeqCst);
    }

    fn request_restart(&self) {
        self.restarts.fetch_add(1, Ordering::SeqCst);
    }

    fn request_shutdown(&self) {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct MockEnumerator {
    pub default_endpoint: Mutex<Option<Arc<MockEndpoint>>>,
    pub endpoints: Mutex<Vec<Arc<MockEndpoint>>>,
    pub enumeration_failure: Mutex<Option<KeeperError>>,
    callbacks: Mutex<Vec<TopologyCallback>>,
    pub active_listeners: Arc<AtomicIsize>,
}

impl MockEnumerator {
    pub fn fire(&self, event: TopologyEvent) {
        let callbacks = self.callbacks.lock().clone();
        for callback in callbacks {
            callback(event.clone());
        }
    }
}

impl DeviceEnumerator for MockEnumerator {
    fn default_render_endpoint(&self) -> Result<Option<Arc<dyn AudioEndpoint>>, KeeperError> {
        if let Some(error) = self.enumeration_failure.lock().clone() {
            return Err(error);
        }
        Ok(self
            .default_endpoint
            .lock()
            .clone()
            .map(|endpoint| endpoint as Arc<dyn AudioEndpoint>))
    }

    fn active_render_endpoints(&self) -> Result<Vec<Arc<dyn AudioEndpoint>>, KeeperError> {
        if let Some(error) = self.enumeration_failure.lock().clone() {
            return Err(error);
        }
        Ok(self
            .endpoints
            .lock()
            .iter()
            .map(|endpoint| Arc::clone(endpoint) as Arc<dyn AudioEndpoint>)
            .collect())
    }

    fn register_topology_listener(&self, callback: TopologyCallback) -> Result<NotificationRegistration, KeeperError> {
        self.callbacks.lock().push(callback);
        self.active_listeners.fetch_add(1, Ordering::SeqCst);
        let active = Arc::clone(&self.active_listeners);
        Ok(NotificationRegistration::new(move || {
            active.fetch_sub(1, Ordering::SeqCst);
        }))
    }
}

/// Replays sleep predictions, repeating the last one.
pub struct ScriptedPower {
    readings: VecDeque<Option<i64>>,
    last: Option<i64>,
}

impl ScriptedPower {
    pub fn new(readings: impl IntoIterator<Item = Option<i64>>) -> Self {
        Self {
            readings: readings.into_iter().collect(),
            last: None,
        }
    }
}

impl PowerMonitor for ScriptedPower {
    fn seconds_to_sleep(&mut self) -> Option<i64> {
        if let Some(reading) = self.readings.pop_front() {
            self.last = reading;
        }
        self.last
    }
}
