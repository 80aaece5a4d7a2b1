//! Stand-in devices for development boards without the real peripherals.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{Display, Indicator, PowerMeter, Relay, TagReader};
use crate::domain::ConnectorStatus;

/// Relay that only tracks its state.
#[derive(Debug, Default)]
pub struct DummyRelay {
    pin: u32,
    inverse_logic: bool,
    enabled: AtomicBool,
    enable_count: AtomicUsize,
    disable_count: AtomicUsize,
}

impl DummyRelay {
    pub fn new(pin: u32, inverse_logic: bool) -> Self {
        Self {
            pin,
            inverse_logic,
            ..Default::default()
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn enable_count(&self) -> usize {
        self.enable_count.load(Ordering::SeqCst)
    }

    pub fn disable_count(&self) -> usize {
        self.disable_count.load(Ordering::SeqCst)
    }

    fn set(&self, on: bool) {
        self.enabled.store(on, Ordering::SeqCst);
        let level = on != self.inverse_logic;
        debug!(pin = self.pin, on, level, "relay switched");
    }
}

impl Relay for DummyRelay {
    fn enable(&self) {
        self.enable_count.fetch_add(1, Ordering::SeqCst);
        self.set(true);
    }

    fn disable(&self) {
        self.disable_count.fetch_add(1, Ordering::SeqCst);
        self.set(false);
    }
}

#[derive(Debug)]
struct MeterState {
    energy_wh: f64,
    last_read: Instant,
}

/// Meter reporting a constant load; energy integrates that load over time.
#[derive(Debug)]
pub struct DummyPowerMeter {
    voltage: f64,
    current: f64,
    state: Mutex<MeterState>,
}

impl DummyPowerMeter {
    pub const DEFAULT_VOLTAGE: f64 = 230.0;
    pub const DEFAULT_CURRENT: f64 = 16.0;

    pub fn new(voltage: f64, current: f64) -> Self {
        Self {
            voltage,
            current,
            state: Mutex::new(MeterState {
                energy_wh: 0.0,
                last_read: Instant::now(),
            }),
        }
    }
}

impl Default for DummyPowerMeter {
    fn default() -> Self {
        Self::new(Self::DEFAULT_VOLTAGE, Self::DEFAULT_CURRENT)
    }
}

impl PowerMeter for DummyPowerMeter {
    fn reset(&self) {
        let mut state = self.state.lock();
        state.energy_wh = 0.0;
        state.last_read = Instant::now();
    }

    fn get_energy(&self) -> f64 {
        let mut state = self.state.lock();
        let now = Instant::now();
        let hours = now.duration_since(state.last_read).as_secs_f64() / 3600.0;
        state.energy_wh += self.get_power() * hours;
        state.last_read = now;
        state.energy_wh
    }

    fn get_power(&self) -> f64 {
        self.voltage * self.current
    }

    fn get_current(&self) -> f64 {
        self.current
    }

    fn get_voltage(&self) -> f64 {
        self.voltage
    }
}

/// Reader that presents the configured tags one after another, forever.
#[derive(Debug)]
pub struct DummyTagReader {
    tag_ids: Vec<String>,
    poll_interval: Duration,
    active: Mutex<Option<CancellationToken>>,
}

impl DummyTagReader {
    pub fn new(tag_ids: Vec<String>, poll_interval: Duration) -> Self {
        Self {
            tag_ids,
            poll_interval,
            active: Mutex::new(None),
        }
    }
}

impl TagReader for DummyTagReader {
    /// Must be called from within a Tokio runtime.
    fn listen_for_tags(&self, cancel: CancellationToken) -> mpsc::Receiver<String> {
        let token = cancel.child_token();
        if let Some(previous) = self.active.lock().replace(token.clone()) {
            previous.cancel();
        }

        let (tx, rx) = mpsc::channel(16);
        let tag_ids = self.tag_ids.clone();
        let poll_interval = self.poll_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            let mut next = tag_ids.iter().cycle();
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(tag) = next.next() else { continue };
                        debug!(tag_id = %tag, "tag presented");
                        if tx.send(tag.clone()).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });
        rx
    }

    fn reset(&self) {
        debug!("tag reader reset");
    }

    fn cleanup(&self) {
        if let Some(token) = self.active.lock().take() {
            token.cancel();
        }
    }
}

/// Display that writes to the log.
#[derive(Debug, Default)]
pub struct LogDisplay;

impl Display for LogDisplay {
    fn show(&self, lines: &[String]) {
        info!(lines = ?lines, "display");
    }

    fn clear(&self) {
        debug!("display cleared");
    }
}

/// Indicator that writes to the log.
#[derive(Debug, Default)]
pub struct LogIndicator;

impl Indicator for LogIndicator {
    fn indicate(&self, evse_id: i32, connector_id: i32, status: ConnectorStatus) {
        info!(evse_id, connector_id, %status, "indicator");
    }
}
