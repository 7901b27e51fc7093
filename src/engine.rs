//! Acquisition engine control loop
//!
//! Single cooperative loop servicing console commands and the liveness
//! heartbeat. Sweeps and TDOA captures run as spawned tasks so a hop read
//! or a subprocess drain never stalls command handling; the heavy lifting
//! inside those tasks is offloaded again per hop.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use anyhow::Result;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::commands::{Command, ScanSettings, TdoaSettings, TriggerSettings};
use crate::config::{Config, SpectroFormat};
use crate::device::{Arbiter, DeviceConfig, DeviceSession, SampleSource};
use crate::dsp::scanner::{run_sweep_pass, ScanConfig, SweepOutcome, SweepPlan};
use crate::dsp::spectrogram::{capture_spectrogram, render_png};
use crate::dsp::trigger::TriggerConfig;
use crate::link::DataLink;
use crate::stream::{send_scan_result, send_tdoa_bytes, ScanResult, SpectroFrame};
use crate::tdoa::{run_capture, TdoaConfig, TdoaJob};

/// Counters reported on the heartbeat.
#[derive(Debug, Default)]
pub struct EngineStats {
    pub sweeps_completed: AtomicU64,
    pub triggers_fired: AtomicU64,
    pub tdoa_jobs: AtomicU64,
    pub send_failures: AtomicU64,
}

/// The acquisition engine. Owns the arbiter, the config cells and the
/// outbound link; driven entirely by the inbound command channel.
pub struct Engine {
    config: Config,
    device_config: DeviceConfig,
    link: Arc<dyn DataLink>,
    arbiter: Arc<Arbiter<DeviceSession>>,
    scan_config: Arc<Mutex<ScanConfig>>,
    trigger_config: Arc<Mutex<TriggerConfig>>,
    tdoa_config: Arc<Mutex<TdoaConfig>>,
    stats: Arc<EngineStats>,
    sweep_running: Arc<AtomicBool>,
}

impl Engine {
    pub fn new(config: Config, link: Arc<dyn DataLink>) -> Self {
        let device_config = DeviceConfig {
            device_index: config.device_index,
            sample_rate: config.sample_rate,
            gain_db: config.gain_db,
            ppm_error: config.ppm_error,
        };

        Self {
            config,
            device_config,
            link,
            arbiter: Arc::new(Arbiter::new()),
            scan_config: Arc::new(Mutex::new(ScanConfig::default())),
            trigger_config: Arc::new(Mutex::new(TriggerConfig::default())),
            tdoa_config: Arc::new(Mutex::new(TdoaConfig::default())),
            stats: Arc::new(EngineStats::default()),
            sweep_running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn stats(&self) -> Arc<EngineStats> {
        self.stats.clone()
    }

    /// Service commands until the channel closes.
    pub async fn run(self, mut commands: mpsc::Receiver<Command>) -> Result<()> {
        info!("Acquisition engine ready");

        let mut heartbeat = tokio::time::interval(tokio::time::Duration::from_secs(
            self.config.heartbeat_secs.max(1),
        ));
        let started = Instant::now();

        loop {
            tokio::select! {
                cmd = commands.recv() => {
                    match cmd {
                        Some(cmd) => self.handle_command(cmd),
                        None => {
                            info!("Command channel closed");
                            break;
                        }
                    }
                }
                _ = heartbeat.tick() => {
                    info!(
                        "[Heartbeat] up {}s | sweeps: {} | triggers: {} | tdoa jobs: {} | dropped sends: {} | ts {}",
                        started.elapsed().as_secs(),
                        self.stats.sweeps_completed.load(Ordering::Relaxed),
                        self.stats.triggers_fired.load(Ordering::Relaxed),
                        self.stats.tdoa_jobs.load(Ordering::Relaxed),
                        self.stats.send_failures.load(Ordering::Relaxed),
                        chrono::Utc::now().timestamp_millis(),
                    );
                }
            }
        }

        // stop any sweep still running before the engine winds down
        self.arbiter.cancel_token().cancel();
        Ok(())
    }

    fn handle_command(&self, cmd: Command) {
        match cmd {
            Command::StartScan => self.start_scan(),
            Command::StartTdoa => self.start_tdoa(),
            Command::ChangeScanSettings(s) => {
                let mut config = self.scan_config.lock().unwrap();
                apply_scan_settings(&mut config, &s);
                info!(
                    "Scan settings: center {:.3} MHz, bandwidth {:.3} MHz",
                    config.center_freq / 1e6,
                    config.bandwidth / 1e6
                );
            }
            Command::ChangeTdoaSettings(s) => {
                let mut config = self.tdoa_config.lock().unwrap();
                apply_tdoa_settings(&mut config, &s);
                info!(
                    "TDOA settings: target {:?}, reference {:?}, {} samples",
                    config.target_freq, config.reference_freq, config.sample_count
                );
            }
            Command::SetTriggerSettings(s) => {
                let mut config = self.trigger_config.lock().unwrap();
                apply_trigger_settings(&mut config, &s);
                info!(
                    "Trigger settings: target {:?}, bandwidth {:?}, threshold {} dB",
                    config.target_freq, config.bandwidth, config.threshold_db
                );
            }
            Command::ActivateTrigger => {
                self.trigger_config.lock().unwrap().active = true;
                info!("Trigger activated");
            }
            Command::DeactivateTrigger => {
                self.trigger_config.lock().unwrap().active = false;
                info!("Trigger deactivated");
            }
            Command::ChannelOpen => {
                info!("Data channel open");
                self.link.set_open(true);
            }
            Command::ChannelClose => {
                info!("Data channel closed, stopping sweep");
                self.link.set_open(false);
                self.arbiter.cancel_token().cancel();
            }
        }
    }

    /// Spawn the sweep loop unless one is already running.
    fn start_scan(&self) {
        if self.sweep_running.swap(true, Ordering::SeqCst) {
            debug!("Sweep already running, ignoring startScan");
            return;
        }
        self.arbiter.cancel_token().reset();

        let arbiter = self.arbiter.clone();
        let scan_config = self.scan_config.clone();
        let trigger_config = self.trigger_config.clone();
        let link = self.link.clone();
        let stats = self.stats.clone();
        let sweep_running = self.sweep_running.clone();
        let device_config = self.device_config.clone();
        let spectro_format = self.config.spectro_format;

        tokio::spawn(async move {
            run_sweep_loop(
                arbiter,
                device_config,
                scan_config,
                trigger_config,
                link,
                stats,
                spectro_format,
            )
            .await;
            sweep_running.store(false, Ordering::SeqCst);
        });
    }

    /// Cancel any sweep (bounding our wait for the permit) and run one
    /// TDOA capture. Not cancellable once the tool is launched.
    fn start_tdoa(&self) {
        let job = match TdoaJob::from_config(&self.tdoa_config.lock().unwrap()) {
            Ok(job) => job,
            Err(e) => {
                warn!("Skipping TDOA capture: {}", e);
                return;
            }
        };

        self.arbiter.cancel_token().cancel();

        let arbiter = self.arbiter.clone();
        let link = self.link.clone();
        let stats = self.stats.clone();
        let tool = self.config.tdoa_tool_path.clone();
        let device_index = self.config.device_index;

        tokio::spawn(async move {
            let mut slot = arbiter.acquire().await;
            // the external tool needs the USB device to itself
            if let Some(mut session) = slot.take() {
                session.close();
                info!("Released device session for external tool");
            }

            stats.tdoa_jobs.fetch_add(1, Ordering::Relaxed);
            match run_capture(&tool, device_index, &job).await {
                Ok(raw) => {
                    if send_tdoa_bytes(link.as_ref(), &raw).is_err() {
                        stats.send_failures.fetch_add(1, Ordering::Relaxed);
                    }
                }
                Err(e) => error!("TDOA capture failed: {}", e),
            }
        });
    }
}

/// Sweep passes back-to-back until cancellation. The permit is taken per
/// pass, so a TDOA request gets the device between passes, or sooner once
/// cancellation is noticed at a hop boundary.
async fn run_sweep_loop(
    arbiter: Arc<Arbiter<DeviceSession>>,
    device_config: DeviceConfig,
    scan_config: Arc<Mutex<ScanConfig>>,
    trigger_config: Arc<Mutex<TriggerConfig>>,
    link: Arc<dyn DataLink>,
    stats: Arc<EngineStats>,
    spectro_format: SpectroFormat,
) {
    info!("Starting wideband sweep");
    let cancel = arbiter.cancel_token();

    while !cancel.is_cancelled() {
        let plan = SweepPlan::new(&scan_config.lock().unwrap().clone());
        let trigger_snapshot = {
            let trigger_config = trigger_config.clone();
            move || trigger_config.lock().unwrap().armed()
        };

        let mut slot = arbiter.acquire().await;

        if slot.is_none() {
            let config = device_config.clone();
            let opened =
                tokio::task::spawn_blocking(move || DeviceSession::open(&config)).await;
            match opened {
                Ok(Ok(session)) => *slot = Some(session),
                Ok(Err(e)) => {
                    error!("Cannot open device, sweep aborted: {}", e);
                    break;
                }
                Err(e) => {
                    error!("Device open worker failed: {}", e);
                    break;
                }
            }
        }

        match run_sweep_pass(&mut slot, &plan, trigger_snapshot, &cancel).await {
            Ok(SweepOutcome::Psd(psd)) => {
                stats.sweeps_completed.fetch_add(1, Ordering::Relaxed);
                if send_scan_result(link.as_ref(), &ScanResult::Psd(psd)).is_err() {
                    stats.send_failures.fetch_add(1, Ordering::Relaxed);
                }
            }
            Ok(SweepOutcome::Triggered {
                target_freq,
                bandwidth,
            }) => {
                stats.triggers_fired.fetch_add(1, Ordering::Relaxed);
                match capture_spectrogram(&mut slot, target_freq, bandwidth, None).await {
                    Ok(matrix) => {
                        let frame = match spectro_format {
                            SpectroFormat::Matrix => SpectroFrame::Matrix(matrix),
                            SpectroFormat::Png => SpectroFrame::Raster(render_png(&matrix)),
                        };
                        if send_scan_result(link.as_ref(), &ScanResult::Spectrogram(frame))
                            .is_err()
                        {
                            stats.send_failures.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                    Err(e) => {
                        error!("Spectrogram capture failed: {}", e);
                        teardown(&mut slot);
                        break;
                    }
                }
            }
            Ok(SweepOutcome::Cancelled) => break,
            Err(e) => {
                error!("Sweep pass failed: {}", e);
                teardown(&mut slot);
                break;
            }
        }

        drop(slot);
        tokio::task::yield_now().await;
    }

    info!("Sweep loop exited");
}

fn teardown(slot: &mut Option<DeviceSession>) {
    if let Some(mut session) = slot.take() {
        session.close();
    }
}

fn mhz(value: f64) -> f64 {
    value * 1e6
}

fn apply_scan_settings(config: &mut ScanConfig, s: &ScanSettings) {
    if let Some(center) = s.center_freq {
        config.center_freq = mhz(center);
    }
    if let Some(bandwidth) = s.bandwidth {
        config.bandwidth = mhz(bandwidth);
    }
}

fn apply_tdoa_settings(config: &mut TdoaConfig, s: &TdoaSettings) {
    if let Some(target) = s.target_frequency {
        config.target_freq = Some(mhz(target));
    }
    if let Some(reference) = s.reference_frequency {
        config.reference_freq = Some(mhz(reference));
    }
    if let Some(samples) = s.samples {
        // console counts samples in millions
        config.sample_count = (samples * 1e6) as u64;
    }
}

fn apply_trigger_settings(config: &mut TriggerConfig, s: &TriggerSettings) {
    if let Some(level) = s.db_level {
        config.threshold_db = level as f32;
    }
    if let Some(bandwidth) = s.bandwidth {
        config.bandwidth = Some(mhz(bandwidth));
    }
    if let Some(target) = s.target_frequency {
        config.target_freq = Some(mhz(target));
    }
}
