//! Built-in modules the driver registers with every substrate.
//!
//! `Heartbeat` sends a buffered heartbeat event every few ticks and answers
//! the `heartbeat.count` command. Each beat is woven as the `Beat` operation
//! through the installed substrate, so configured hooks can observe it.
//! `FrameStats` listens for heartbeats and periodically reports scheduler
//! and bus counters.

use frame_core::{context, host_object, IdListener, Module, ModuleScheduler, SchedulerError, TypeKey};
use serde_json::{json, Value};
use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const HEARTBEAT_MODULE: &str = "Heartbeat";
pub const FRAME_STATS_MODULE: &str = "FrameStats";

/// Event identifier carried by heartbeats; the single argument is the beat number
pub const HEARTBEAT_EVENT: i32 = 1;

pub const HEARTBEAT_COUNT_COMMAND: &str = "heartbeat.count";

/// Woven operation name for a single beat
pub const BEAT_OPERATION: &str = "Beat";

/// Sends [`HEARTBEAT_EVENT`] every `every_ticks` update passes
pub struct HeartbeatModule {
    every_ticks: u64,
    ticks: u64,
    beats: Arc<AtomicU64>,
}

impl HeartbeatModule {
    pub fn new(every_ticks: u64) -> Self {
        Self {
            every_ticks: every_ticks.max(1),
            ticks: 0,
            beats: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn beats(&self) -> u64 {
        self.beats.load(Ordering::Relaxed)
    }
}

host_object!(HeartbeatModule => HEARTBEAT_MODULE);

impl Module for HeartbeatModule {
    fn name(&self) -> &str {
        HEARTBEAT_MODULE
    }

    fn startup(&mut self, scheduler: &ModuleScheduler) {
        let beats = self.beats.clone();
        let handler = Arc::new(move |_args: &frame_core::CommandArgs| -> Option<Value> {
            Some(json!(beats.load(Ordering::Relaxed)))
        });
        if let Err(e) = scheduler.commands().register(HEARTBEAT_COUNT_COMMAND, handler) {
            warn!("⚠️ Heartbeat command unavailable: {}", e);
        }
    }

    fn update(&mut self, scheduler: &ModuleScheduler) {
        self.ticks += 1;
        if self.ticks % self.every_ticks != 0 {
            return;
        }

        let beats = self.beats.clone();
        let events = scheduler.events().clone();
        let beat = move || -> Result<u64, String> {
            let beat = beats.fetch_add(1, Ordering::Relaxed) + 1;
            events.send(HEARTBEAT_EVENT, vec![json!(beat)]);
            Ok(beat)
        };

        let beat = match context::global() {
            Some(substrate) => substrate.weaver().invoke_returning(&*self, BEAT_OPERATION, beat),
            None => beat().unwrap_or_default(),
        };
        debug!("💓 Heartbeat {}", beat);
    }

    fn shutdown(&mut self, scheduler: &ModuleScheduler) {
        scheduler.commands().unregister(HEARTBEAT_COUNT_COMMAND);
        info!("💓 Heartbeat stopped after {} beat(s)", self.beats());
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Counts late-update passes and heard heartbeats, reporting every
/// `report_every_ticks` passes
pub struct FrameStatsModule {
    report_every_ticks: u64,
    frames: u64,
    heartbeats: Arc<AtomicU64>,
    listener: Option<IdListener>,
}

impl FrameStatsModule {
    pub fn new(report_every_ticks: u64) -> Self {
        Self {
            report_every_ticks: report_every_ticks.max(1),
            frames: 0,
            heartbeats: Arc::new(AtomicU64::new(0)),
            listener: None,
        }
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn heartbeats_heard(&self) -> u64 {
        self.heartbeats.load(Ordering::Relaxed)
    }

    fn report(&self, scheduler: &ModuleScheduler) {
        let modules = scheduler.stats();
        let bus = scheduler.events().stats();
        info!(
            "📊 Frame {} | {} module(s) | {} heartbeat(s) | {} event(s) sent, {} delivered | {} task(s) pending",
            self.frames,
            modules.modules,
            self.heartbeats_heard(),
            bus.sent,
            bus.delivered,
            modules.tasks_pending
        );
    }
}

impl Module for FrameStatsModule {
    fn name(&self) -> &str {
        FRAME_STATS_MODULE
    }

    fn startup(&mut self, scheduler: &ModuleScheduler) {
        let heartbeats = self.heartbeats.clone();
        let listener: IdListener = Arc::new(move |_id: i32, _args: &[Value]| {
            heartbeats.fetch_add(1, Ordering::Relaxed);
        });
        match scheduler.events().subscribe(HEARTBEAT_EVENT, listener.clone()) {
            Ok(()) => self.listener = Some(listener),
            Err(e) => warn!("⚠️ Frame stats cannot hear heartbeats: {}", e),
        }
    }

    fn late_update(&mut self, scheduler: &ModuleScheduler) {
        self.frames += 1;
        if self.frames % self.report_every_ticks == 0 {
            self.report(scheduler);
        }
    }

    fn shutdown(&mut self, scheduler: &ModuleScheduler) {
        if let Some(listener) = self.listener.take() {
            if let Err(e) = scheduler.events().unsubscribe(HEARTBEAT_EVENT, &listener) {
                debug!("📋 Heartbeat listener already gone: {}", e);
            }
        }
        self.report(scheduler);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Register factories for the built-in modules
pub fn register_builtin_modules(
    scheduler: &ModuleScheduler,
    heartbeat_every_ticks: u64,
    stats_interval_ticks: u64,
) -> Result<(), SchedulerError> {
    scheduler.register_module(TypeKey::new(HEARTBEAT_MODULE), move || {
        Box::new(HeartbeatModule::new(heartbeat_every_ticks)) as Box<dyn Module>
    })?;
    scheduler.register_module(TypeKey::new(FRAME_STATS_MODULE), move || {
        Box::new(FrameStatsModule::new(stats_interval_ticks)) as Box<dyn Module>
    })?;
    Ok(())
}
