// Thermal backpressure for long generation runs.
//
// Every decode iteration asks the governor for clearance before it
// touches the model. Below the high threshold that is a plain read and
// an immediate return; at or above it the calling thread sleeps and
// polls until the temperature falls to threshold minus hysteresis.
// Coarse on purpose: this protects shared hardware from sustained
// load, it is not part of generation correctness.
//
// One governor instance serves the whole process and is shared by
// reference across concurrent requests. The sensor is injected so
// tests can substitute a fake; the production sensor reads the GPU
// temperature through `nvidia-smi`.
//
// A sensor that cannot be read must never kill a request: the governor
// logs one warning and degrades to a no-op.

use std::fmt;
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

/// How often to re-read the temperature while waiting for cooldown.
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// A hardware temperature reading failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorError(pub String);

impl fmt::Display for SensorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "temperature sensor read failed: {}", self.0)
    }
}

impl std::error::Error for SensorError {}

/// Reads the current hardware temperature in degrees Celsius.
pub trait TempSensor {
    fn read_temp(&self) -> Result<f32, SensorError>;
}

/// Production sensor: queries the first GPU through `nvidia-smi`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NvidiaSmiSensor;

impl TempSensor for NvidiaSmiSensor {
    fn read_temp(&self) -> Result<f32, SensorError> {
        let output = Command::new("nvidia-smi")
            .args(["--query-gpu=temperature.gpu", "--format=csv,noheader"])
            .output()
            .map_err(|e| SensorError(format!("failed to run nvidia-smi: {e}")))?;
        if !output.status.success() {
            return Err(SensorError(format!("nvidia-smi exited with {}", output.status)));
        }
        let text = String::from_utf8_lossy(&output.stdout);
        let first_line = text.lines().next().unwrap_or("").trim();
        first_line
            .parse::<f32>()
            .map_err(|e| SensorError(format!("unparseable temperature {first_line:?}: {e}")))
    }
}

/// Blocks generation while the hardware runs hot.
#[derive(Debug)]
pub struct ThermalGovernor<S: TempSensor> {
    sensor: S,
    high_threshold: f32,
    hysteresis: f32,
    poll_interval: Duration,
    warned: AtomicBool,
}

impl Default for ThermalGovernor<NvidiaSmiSensor> {
    /// The served configuration: pause at 64 °C, resume at 61 °C.
    fn default() -> Self {
        ThermalGovernor::new(NvidiaSmiSensor, 64.0, 3.0)
    }
}

impl<S: TempSensor> ThermalGovernor<S> {
    pub fn new(sensor: S, high_threshold: f32, hysteresis: f32) -> Self {
        ThermalGovernor {
            sensor,
            high_threshold,
            hysteresis,
            poll_interval: POLL_INTERVAL,
            warned: AtomicBool::new(false),
        }
    }

    /// Override the poll interval (tests use a near-zero interval).
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Return immediately when the temperature is below the high
    /// threshold; otherwise block, polling, until it has fallen to
    /// threshold minus hysteresis. A failed read degrades to a no-op
    /// with a single warning for the governor's lifetime.
    pub fn cooldown(&self) {
        match self.sensor.read_temp() {
            Ok(temp) if temp < self.high_threshold => {}
            Ok(_) => loop {
                thread::sleep(self.poll_interval);
                match self.sensor.read_temp() {
                    Ok(temp) if temp <= self.high_threshold - self.hysteresis => break,
                    Ok(_) => {}
                    Err(e) => {
                        self.warn_once(&e);
                        break;
                    }
                }
            },
            Err(e) => self.warn_once(&e),
        }
    }

    fn warn_once(&self, error: &SensorError) {
        if !self.warned.swap(true, Ordering::Relaxed) {
            eprintln!("thermal governor disabled: {error}");
        }
    }
}
