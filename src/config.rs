use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::pipeline::{PipelineSettings, DEFAULT_CHANNEL_DEPTH};
use crate::risk::{ModelVariant, RiskModel, DEFAULT_TEMPERATURE};
use crate::source::ble::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_DEVICE_NAME};
use crate::source::simulated::DEFAULT_INTERVAL;
use crate::source::{BleSource, HeartRateSource, SimulatedSource};

pub const DEFAULT_STORE_PATH: &str = "heart_rate_readings.db";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum SourceKind {
    #[default]
    Ble,
    Simulated,
}

/// Stream heart rate from a BLE strap, store every reading and score hemorrhage risk.
#[derive(Debug, Clone, Parser)]
#[command(name = "bthr-risk", version)]
pub struct Config {
    /// Where samples come from.
    #[arg(long, value_enum, default_value_t = SourceKind::Ble)]
    pub source: SourceKind,

    /// Connect to the first device whose advertised name contains this.
    #[arg(long, default_value = DEFAULT_DEVICE_NAME)]
    pub device_name: String,

    /// SQLite database holding the readings table.
    #[arg(long, default_value = DEFAULT_STORE_PATH)]
    pub store: PathBuf,

    /// Keep readings in memory only.
    #[arg(long)]
    pub no_persist: bool,

    #[arg(long, value_enum, default_value_t = ModelVariant::HrOnly)]
    pub model: ModelVariant,

    /// Body temperature in °C used by the hr-temperature model.
    #[arg(long, default_value_t = DEFAULT_TEMPERATURE)]
    pub temperature: f64,

    /// Simulated source sample interval.
    #[arg(long, default_value_t = DEFAULT_INTERVAL.as_millis() as u64)]
    pub interval_ms: u64,

    /// Upper bound on scan, connect, discovery and subscribe together.
    #[arg(long, default_value_t = DEFAULT_CONNECT_TIMEOUT.as_secs())]
    pub connect_timeout_secs: u64,

    /// Samples buffered between the source and the pipeline; once full the oldest is dropped.
    #[arg(long, default_value_t = DEFAULT_CHANNEL_DEPTH)]
    pub channel_depth: usize,

    /// Start streaming without waiting for a `start` command.
    #[arg(long)]
    pub autostart: bool,

    /// Print each snapshot as a JSON line instead of a status line.
    #[arg(long)]
    pub json: bool,
}

impl Config {
    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            model: RiskModel::new(self.model),
            temperature: self.temperature,
            channel_depth: self.channel_depth,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// A fresh source per start; a BLE source is single-use.
    pub fn build_source(&self) -> Box<dyn HeartRateSource> {
        match self.source {
            SourceKind::Ble => Box::new(BleSource::new(self.device_name.clone(), self.connect_timeout())),
            SourceKind::Simulated => Box::new(SimulatedSource::random(self.interval())),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::parse_from(["bthr-risk"])
    }
}
