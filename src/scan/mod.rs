pub mod advertised_device;
pub mod results;

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, RwLock,
    },
    time::Duration,
};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};

use advertised_device::AdvertisedDevice;
use results::ScanResults;

use crate::{
    error::BleError,
    gap::event::ScanInfo,
    radio::{Radio, ScanParams, ScanType},
};

/// Receives every advertising report while the scanner is alive.
///
/// The device handed to `on_result` only lives for the duration of the call.
pub trait AdvertisedDeviceCallbacks: Send + Sync {
    fn on_result(&self, device: &AdvertisedDevice);
}

impl<F> AdvertisedDeviceCallbacks for F
where
    F: Fn(&AdvertisedDevice) + Send + Sync,
{
    fn on_result(&self, device: &AdvertisedDevice) {
        self(device)
    }
}

/// Why a running scan ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanEnd {
    Elapsed,
    Stopped,
    Cancelled,
    ControllerIdle,
}

const MIN_SCAN_UNITS: u32 = 0x0004;
const MAX_SCAN_UNITS: u32 = 0x4000;

#[derive(Clone)]
pub struct Scan(pub Arc<ScanInner>);

pub struct ScanInner {
    radio: Arc<dyn Radio>,
    params: RwLock<ScanParams>,
    want_duplicates: AtomicBool,
    callbacks: RwLock<Option<Arc<dyn AdvertisedDeviceCallbacks>>>,
    results: RwLock<ScanResults>,

    in_progress: AtomicBool,
    // Set once the controller reports this scan as starting or active
    controller_active: AtomicBool,
    end_tx: Sender<ScanEnd>,
    end_rx: Receiver<ScanEnd>,
}

impl Scan {
    pub(crate) fn new(radio: Arc<dyn Radio>) -> Self {
        let (end_tx, end_rx) = bounded(1);
        let scan = ScanInner {
            radio,
            params: RwLock::new(ScanParams::default()),
            want_duplicates: AtomicBool::new(false),
            callbacks: RwLock::new(None),
            results: RwLock::new(ScanResults::default()),
            in_progress: AtomicBool::new(false),
            controller_active: AtomicBool::new(false),
            end_tx,
            end_rx,
        };

        Self(Arc::new(scan))
    }

    pub fn set_active_scan(&self, active: bool) -> anyhow::Result<()> {
        self.0
            .params
            .write()
            .map_err(|_| anyhow::anyhow!("Failed to write scan params"))?
            .scan_type = if active {
            ScanType::Active
        } else {
            ScanType::Passive
        };

        Ok(())
    }

    /// Interval between scan windows in milliseconds, 2.5 ms to 10.24 s.
    pub fn set_interval(&self, interval_ms: u16) -> anyhow::Result<()> {
        let units = ms_to_scan_units("interval", interval_ms)?;
        self.0
            .params
            .write()
            .map_err(|_| anyhow::anyhow!("Failed to write scan params"))?
            .interval = units;

        Ok(())
    }

    /// Length of one scan window in milliseconds, 2.5 ms to 10.24 s.
    pub fn set_window(&self, window_ms: u16) -> anyhow::Result<()> {
        let units = ms_to_scan_units("window", window_ms)?;
        self.0
            .params
            .write()
            .map_err(|_| anyhow::anyhow!("Failed to write scan params"))?
            .window = units;

        Ok(())
    }

    pub fn params(&self) -> anyhow::Result<ScanParams> {
        Ok(*self
            .0
            .params
            .read()
            .map_err(|_| anyhow::anyhow!("Failed to read scan params"))?)
    }

    /// Registers the per-report callback.
    ///
    /// The callback fires for every report. Retained results stay first-seen-wins
    /// regardless of `want_duplicates`; the flag is recorded and exposed through
    /// [`Scan::wants_duplicates`].
    pub fn set_advertised_device_callbacks(
        &self,
        callbacks: impl AdvertisedDeviceCallbacks + 'static,
        want_duplicates: bool,
    ) -> anyhow::Result<()> {
        *self
            .0
            .callbacks
            .write()
            .map_err(|_| anyhow::anyhow!("Failed to write scan callbacks"))? =
            Some(Arc::new(callbacks));
        self.0
            .want_duplicates
            .store(want_duplicates, Ordering::SeqCst);

        Ok(())
    }

    pub fn wants_duplicates(&self) -> bool {
        self.0.want_duplicates.load(Ordering::SeqCst)
    }

    pub fn is_scanning(&self) -> bool {
        self.0.in_progress.load(Ordering::SeqCst)
    }

    /// Starts a scan and returns immediately. `on_complete` runs once with the
    /// accumulated results after `duration_ms` (0 scans until [`Scan::stop`]).
    ///
    /// Returns false if a scan is already running or the controller refused to start.
    pub fn start<F>(&self, duration_ms: u32, on_complete: F, is_continue: bool) -> bool
    where
        F: FnOnce(ScanResults) + Send + 'static,
    {
        if let Err(err) = self.0.begin(is_continue) {
            log::warn!("Failed to start scan: {:?}", err);
            return false;
        }

        let scan = self.0.clone();
        let spawned = std::thread::Builder::new()
            .name("ble-scan".into())
            .stack_size(8 * 1024)
            .spawn(move || {
                let end = scan.wait(duration_ms);
                let results = scan.finish(end);
                on_complete(results);
            });

        if let Err(err) = spawned {
            log::error!("Failed to spawn scan thread: {:?}", err);
            self.0.finish(ScanEnd::Elapsed);
            return false;
        }

        true
    }

    /// Scans for `duration_ms` on the calling thread and returns what was found.
    /// The call parks the thread until the time elapses or the scan is stopped.
    pub fn start_blocking(&self, duration_ms: u32, is_continue: bool) -> anyhow::Result<ScanResults> {
        self.0.begin(is_continue)?;
        let end = self.0.wait(duration_ms);
        Ok(self.0.finish(end))
    }

    /// Ends a running scan early. Results gathered so far are kept.
    pub fn stop(&self) -> anyhow::Result<()> {
        if !self.is_scanning() {
            return Ok(());
        }

        self.0.radio.scan_stop()?;
        self.0.signal(ScanEnd::Stopped);
        Ok(())
    }

    /// Ends a running scan and throws its results away.
    pub(crate) fn cancel(&self) -> anyhow::Result<()> {
        if !self.is_scanning() {
            return Ok(());
        }

        self.0.radio.scan_stop()?;
        self.0.clear()?;
        self.0.signal(ScanEnd::Cancelled);
        Ok(())
    }

    /// Only valid while no scan is running.
    pub fn clear_results(&self) -> anyhow::Result<()> {
        if self.is_scanning() {
            return Err(BleError::ScanInProgress.into());
        }
        self.0.clear()
    }

    pub fn results(&self) -> anyhow::Result<ScanResults> {
        Ok(self
            .0
            .results
            .read()
            .map_err(|_| anyhow::anyhow!("Failed to read scan results"))?
            .clone())
    }

    /// The controller picked up the running scan.
    pub(crate) fn on_controller_active(&self) {
        if self.is_scanning() {
            self.0.controller_active.store(true, Ordering::SeqCst);
        }
    }

    /// The controller dropped back to idle. Only ends a scan the controller had reported
    /// as running; an idle edge left over from the previous scan is ignored.
    pub(crate) fn on_controller_idle(&self) {
        if !self.is_scanning() {
            return;
        }

        if self.0.controller_active.swap(false, Ordering::SeqCst) {
            log::debug!("Controller stopped scanning, finishing scan");
            self.0.signal(ScanEnd::ControllerIdle);
        } else {
            log::debug!("Ignoring idle edge from an earlier scan");
        }
    }

    pub(crate) fn ingest(&self, info: &ScanInfo) {
        let address = info.address();
        log::debug!(
            "GAP_MSG_LE_SCAN_INFO: adv_type 0x{:x}, bd_addr {}, remote_addr_type {}, rssi {}, data_len {}",
            info.adv_type,
            address,
            info.remote_addr_type,
            info.rssi,
            info.data.len()
        );

        let mut device = AdvertisedDevice::new(
            address,
            info.remote_addr_type.into(),
            info.rssi,
            info.adv_type,
        );
        if let Err(err) = device.parse_advertisement(&info.data) {
            log::warn!("Malformed advertisement from {}: {}", address, err);
        }

        if self.is_scanning() {
            match self.0.results.write() {
                Ok(mut results) => {
                    if results.retain_first(&device) {
                        log::debug!("New device {}", address);
                    }
                }
                Err(_) => log::error!("Failed to write scan results"),
            }
        }

        let callbacks = match self.0.callbacks.read() {
            Ok(callbacks) => callbacks.clone(),
            Err(_) => {
                log::error!("Failed to read scan callbacks");
                None
            }
        };

        if let Some(callbacks) = callbacks {
            callbacks.on_result(&device);
        }
    }
}

impl ScanInner {
    fn begin(&self, is_continue: bool) -> anyhow::Result<()> {
        if self
            .in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(BleError::ScanInProgress.into());
        }

        // A stop signal left over from an earlier scan must not end this one.
        while self.end_rx.try_recv().is_ok() {}
        self.controller_active.store(false, Ordering::SeqCst);

        let result = (|| {
            if !is_continue {
                self.clear()?;
            }

            let params = *self
                .params
                .read()
                .map_err(|_| anyhow::anyhow!("Failed to read scan params"))?;
            self.radio.set_scan_params(&params)?;
            self.radio.scan_start()?;

            log::info!(
                "Scan started: {:?}, interval 0x{:x}, window 0x{:x}",
                params.scan_type,
                params.interval,
                params.window
            );
            Ok(())
        })();

        if result.is_err() {
            self.in_progress.store(false, Ordering::SeqCst);
        }

        result
    }

    fn wait(&self, duration_ms: u32) -> ScanEnd {
        let received = if duration_ms == 0 {
            self.end_rx.recv().map_err(|_| RecvTimeoutError::Disconnected)
        } else {
            self.end_rx
                .recv_timeout(Duration::from_millis(duration_ms as u64))
        };

        match received {
            Ok(end) => end,
            Err(RecvTimeoutError::Timeout) => ScanEnd::Elapsed,
            Err(RecvTimeoutError::Disconnected) => ScanEnd::Stopped,
        }
    }

    fn finish(&self, end: ScanEnd) -> ScanResults {
        if end == ScanEnd::Elapsed {
            if let Err(err) = self.radio.scan_stop() {
                log::error!("Failed to stop scan: {:?}", err);
            }
        }
        if end == ScanEnd::Cancelled {
            if let Err(err) = self.clear() {
                log::error!("Failed to discard scan results: {:?}", err);
            }
        }

        self.in_progress.store(false, Ordering::SeqCst);

        let results = match self.results.read() {
            Ok(results) => results.clone(),
            Err(_) => {
                log::error!("Failed to read scan results");
                ScanResults::default()
            }
        };
        log::info!("Scan finished ({:?}), {} devices", end, results.count());

        results
    }

    fn signal(&self, end: ScanEnd) {
        if self.end_tx.try_send(end).is_err() {
            log::debug!("Scan end already signalled");
        }
    }

    fn clear(&self) -> anyhow::Result<()> {
        self.results
            .write()
            .map_err(|_| anyhow::anyhow!("Failed to write scan results"))?
            .clear();
        Ok(())
    }
}

fn ms_to_scan_units(name: &'static str, ms: u16) -> Result<u16, BleError> {
    let units = ms as u32 * 1000 / 625;
    if !(MIN_SCAN_UNITS..=MAX_SCAN_UNITS).contains(&units) {
        return Err(BleError::InvalidParameter {
            name,
            value: ms as u32,
        });
    }
    Ok(units as u16)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn milliseconds_convert_to_controller_units() {
        assert_eq!(ms_to_scan_units("interval", 40), Ok(0x40));
        assert_eq!(ms_to_scan_units("window", 30), Ok(0x30));
        assert_eq!(ms_to_scan_units("window", 10240), Ok(0x4000));
        assert!(ms_to_scan_units("window", 2).is_err());
        assert!(ms_to_scan_units("interval", 10241).is_err());
    }
}
