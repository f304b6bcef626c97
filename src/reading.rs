use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

pub const LOW_BPM_THRESHOLD: i32 = 60;
pub const HIGH_BPM_THRESHOLD: i32 = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    Low,
    Normal,
    High,
}

impl Status {
    /// Both thresholds are inclusive on the Normal side.
    pub fn classify(heart_rate: i32) -> Self {
        if heart_rate < LOW_BPM_THRESHOLD {
            Status::Low
        } else if heart_rate > HIGH_BPM_THRESHOLD {
            Status::High
        } else {
            Status::Normal
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Low => "Low",
            Status::Normal => "Normal",
            Status::High => "High",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Low" => Some(Status::Low),
            "Normal" => Some(Status::Normal),
            "High" => Some(Status::High),
            _ => None,
        }
    }

    pub fn is_out_of_range(&self) -> bool {
        *self != Status::Normal
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A reading before the store has assigned it an id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewReading {
    pub timestamp: i64,
    pub heart_rate: i32,
    pub status: Status,
}

impl NewReading {
    pub fn new(timestamp: i64, heart_rate: i32) -> Self {
        NewReading {
            timestamp,
            heart_rate,
            status: Status::classify(heart_rate),
        }
    }

    pub fn now(heart_rate: i32) -> Self {
        NewReading::new(now_millis(), heart_rate)
    }

    pub fn with_id(self, id: u64) -> Reading {
        Reading {
            id,
            timestamp: self.timestamp,
            heart_rate: self.heart_rate,
            status: self.status,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reading {
    pub id: u64,
    pub timestamp: i64,
    #[serde(rename = "heartRate")]
    pub heart_rate: i32,
    pub status: Status,
}

pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}
