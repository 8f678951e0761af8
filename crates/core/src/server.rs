use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::congestion::{LogOnly, RateSelector};
use crate::demux::{InputStream, Resource};
use crate::error::{PlayoutError, Result};
use crate::media::DEFAULT_MTU;
use crate::registry::PluginRegistry;
use crate::scheduler::{Scheduler, SlotId};
use crate::session::RtpSession;

/// Delivery core configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Slot-table capacity: sessions one dispatcher drives at once.
    pub max_sessions: usize,
    /// Largest RTP payload a media parser may emit, in bytes.
    pub mtu: usize,
    /// Pause between dispatch passes.
    pub tick_interval: Duration,
    /// Period of RTCP sender reports per session.
    pub rtcp_interval: Duration,
    /// Run the congestion check and notify the rate selector every tick.
    pub rate_selection: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_sessions: 100,
            mtu: DEFAULT_MTU,
            tick_interval: Duration::from_millis(1),
            rtcp_interval: Duration::from_secs(5),
            rate_selection: true,
        }
    }
}

/// High-level delivery orchestrator.
///
/// Owns the plugin registry, the slot-table scheduler and its dispatch
/// thread. The session-control layer calls [`add_session`](Self::add_session),
/// [`play`](Self::play), [`pause`](Self::pause) and
/// [`remove_session`](Self::remove_session) with the [`SlotId`] it got back.
pub struct Server {
    config: ServerConfig,
    registry: Arc<PluginRegistry>,
    scheduler: Arc<Scheduler>,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Server {
    /// Server with the built-in plugins and the logging rate selector.
    pub fn new(config: ServerConfig) -> Self {
        Self::with_parts(config, PluginRegistry::with_defaults(), Arc::new(LogOnly))
    }

    /// Server with a custom plugin registry and rate selector.
    pub fn with_parts(
        config: ServerConfig,
        registry: PluginRegistry,
        rate_selector: Arc<dyn RateSelector>,
    ) -> Self {
        let mut scheduler = Scheduler::with_rate_selector(config.max_sessions, rate_selector);
        scheduler.set_rtcp_interval(config.rtcp_interval);
        scheduler.set_rate_selection(config.rate_selection);
        Self {
            config,
            registry: Arc::new(registry),
            scheduler: Arc::new(scheduler),
            running: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }

    /// Spawn the dispatch thread.
    pub fn start(&mut self) -> Result<()> {
        if self.running.load(Ordering::SeqCst) {
            return Err(PlayoutError::AlreadyRunning);
        }
        self.running.store(true, Ordering::SeqCst);
        self.handle = Some(
            self.scheduler
                .spawn(self.config.tick_interval, self.running.clone()),
        );
        tracing::info!(
            max_sessions = self.config.max_sessions,
            mtu = self.config.mtu,
            "server started"
        );
        Ok(())
    }

    /// Clear the running flag and wait for the dispatch thread.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::warn!("dispatch thread panicked");
            }
            tracing::info!("server stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Open a media file and bind it to the first demuxer that accepts it.
    pub fn open_resource(&self, path: impl AsRef<Path>) -> Result<Resource> {
        Resource::open(InputStream::open(path)?, &self.registry, self.config.mtu)
    }

    /// Bind an already opened input (memory, pipe, ...).
    pub fn open_input(&self, input: InputStream) -> Result<Resource> {
        Resource::open(input, &self.registry, self.config.mtu)
    }

    pub fn add_session(&self, session: RtpSession) -> Result<SlotId> {
        self.scheduler.add(session)
    }

    pub fn remove_session(&self, id: SlotId) -> Result<()> {
        self.scheduler.remove(id)
    }

    pub fn stop_session(&self, id: SlotId) -> Result<()> {
        self.scheduler.stop(id)
    }

    /// Start playback of a session, or resume it when paused.
    pub fn play(&self, id: SlotId) -> Result<()> {
        self.scheduler.with_session(id, |session| {
            if session.is_started() && session.is_paused() {
                session.resume();
            } else if !session.is_started() {
                session.start();
            }
        })
    }

    pub fn pause(&self, id: SlotId) -> Result<()> {
        self.scheduler.pause(id)
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.stop();
    }
}
