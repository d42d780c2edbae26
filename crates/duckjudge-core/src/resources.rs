// src/resources.rs
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of filesystem image an environment boots from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFamily {
    /// javac plus the grading classpath.
    Compiler,
    /// A JRE only; runs already compiled classes.
    Executor,
}

impl ImageFamily {
    pub const ALL: [ImageFamily; 2] = [ImageFamily::Compiler, ImageFamily::Executor];

    pub fn as_str(self) -> &'static str {
        match self {
            ImageFamily::Compiler => "compiler",
            ImageFamily::Executor => "executor",
        }
    }
}

impl fmt::Display for ImageFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// CPU and memory, either allocated to an environment or reserved by jobs.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resources {
    pub vcpus: f64,
    pub memory_mb: u64,
}

impl Resources {
    pub const ZERO: Resources = Resources {
        vcpus: 0.0,
        memory_mb: 0,
    };

    pub fn new(vcpus: f64, memory_mb: u64) -> Self {
        Self { vcpus, memory_mb }
    }

    pub fn is_zero(&self) -> bool {
        self.vcpus <= f64::EPSILON && self.memory_mb == 0
    }

    pub fn saturating_add(self, other: Resources) -> Resources {
        Resources {
            vcpus: self.vcpus + other.vcpus,
            memory_mb: self.memory_mb.saturating_add(other.memory_mb),
        }
    }

    pub fn saturating_sub(self, other: Resources) -> Resources {
        Resources {
            vcpus: (self.vcpus - other.vcpus).max(0.0),
            memory_mb: self.memory_mb.saturating_sub(other.memory_mb),
        }
    }

    /// True when `self` plus `extra` stays within `limit`.
    pub fn fits(self, extra: Resources, limit: Resources) -> bool {
        let total = self.saturating_add(extra);
        total.vcpus <= limit.vcpus + 1e-9 && total.memory_mb <= limit.memory_mb
    }

    pub fn scaled(self, factor: f64) -> Resources {
        Resources {
            vcpus: self.vcpus * factor,
            memory_mb: (self.memory_mb as f64 * factor).floor() as u64,
        }
    }
}
