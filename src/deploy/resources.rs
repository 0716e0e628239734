use crate::{
    Error, Result,
    config::{MemorySpec, ResourceConfig},
};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr, time::Duration};

const MAX_GPUS: u32 = 8;
const MAX_TIMEOUT_SECS: u64 = 24 * 60 * 60;

#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GpuKind {
    T4,
    L4,
    A10G,
    A100,
    A100_80GB,
    H100,
    Any,
}

impl GpuKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::T4 => "T4",
            Self::L4 => "L4",
            Self::A10G => "A10G",
            Self::A100 => "A100",
            Self::A100_80GB => "A100-80GB",
            Self::H100 => "H100",
            Self::Any => "any",
        }
    }
}

impl FromStr for GpuKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().replace('_', "-").as_str() {
            "T4" => Ok(Self::T4),
            "L4" => Ok(Self::L4),
            "A10G" => Ok(Self::A10G),
            "A100" | "A100-40GB" => Ok(Self::A100),
            "A100-80GB" => Ok(Self::A100_80GB),
            "H100" => Ok(Self::H100),
            "ANY" => Ok(Self::Any),
            other => Err(Error::validation(format!("unknown GPU type '{other}'"))),
        }
    }
}

impl fmt::Display for GpuKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpuSpec {
    pub count: u32,
    pub kind: GpuKind,
}

/// Validated compute profile of one app.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceProfile {
    pub cpu: f32,
    pub memory_mib: u64,
    pub gpu: Option<GpuSpec>,
    pub timeout: Duration,
}

impl ResourceProfile {
    pub fn from_config(config: &ResourceConfig) -> Result<Self> {
        if !(config.cpu.is_finite() && config.cpu > 0.0) {
            return Err(Error::validation(format!(
                "resources.cpu must be positive, got {}",
                config.cpu
            )));
        }

        let memory_mib = parse_memory(&config.memory)?;
        if memory_mib == 0 {
            return Err(Error::validation("resources.memory must be positive"));
        }

        let gpu = match &config.gpu {
            Some(gpu) => {
                if gpu.count == 0 || gpu.count > MAX_GPUS {
                    return Err(Error::validation(format!(
                        "resources.gpu.count must be between 1 and {MAX_GPUS}, got {}",
                        gpu.count
                    )));
                }
                Some(GpuSpec {
                    count: gpu.count,
                    kind: gpu.kind.parse()?,
                })
            }
            None => None,
        };

        if config.timeout == 0 || config.timeout > MAX_TIMEOUT_SECS {
            return Err(Error::validation(format!(
                "resources.timeout must be between 1 and {MAX_TIMEOUT_SECS} seconds, got {}",
                config.timeout
            )));
        }

        Ok(Self {
            cpu: config.cpu,
            memory_mib,
            gpu,
            timeout: Duration::from_secs(config.timeout),
        })
    }

    pub fn summary(&self) -> String {
        let gpu = match &self.gpu {
            Some(gpu) => format!("{}x {}", gpu.count, gpu.kind),
            None => "none".to_string(),
        };
        format!(
            "cpu={} memory={}MiB gpu={} timeout={}s",
            self.cpu,
            self.memory_mib,
            gpu,
            self.timeout.as_secs()
        )
    }
}

/// Converts a memory declaration to MiB. Binary suffixes (`Ki`, `Mi`, `Gi`,
/// `Ti`) and decimal ones (`K`, `M`, `G`, `T`, optionally followed by `B`)
/// are accepted; a bare number is MiB.
pub fn parse_memory(spec: &MemorySpec) -> Result<u64> {
    let text = match spec {
        MemorySpec::Mebibytes(mib) => return Ok(*mib),
        MemorySpec::Text(text) => text.trim(),
    };

    let split = text
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(text.len());
    let (number, unit) = text.split_at(split);
    let value: f64 = number
        .parse()
        .map_err(|_| Error::validation(format!("resources.memory '{text}' is not a size")))?;

    let bytes_per_unit: f64 = match unit.trim().to_ascii_lowercase().as_str() {
        "" | "mi" | "mib" => 1024.0 * 1024.0,
        "ki" | "kib" => 1024.0,
        "gi" | "gib" => 1024.0 * 1024.0 * 1024.0,
        "ti" | "tib" => 1024.0 * 1024.0 * 1024.0 * 1024.0,
        "k" | "kb" => 1e3,
        "m" | "mb" => 1e6,
        "g" | "gb" => 1e9,
        "t" | "tb" => 1e12,
        other => {
            return Err(Error::validation(format!(
                "resources.memory unit '{other}' is not supported"
            )));
        }
    };

    Ok((value * bytes_per_unit / (1024.0 * 1024.0)).round() as u64)
}
