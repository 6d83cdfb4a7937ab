//! The aggregate record handed back to the caller once a measured task run
//! completes (§3 "Artifact"). Plain serialisable structs; rendering (the
//! HTML "card") is an orthogonal external collaborator per §9 and is not
//! modelled here.

use serde::Serialize;

use crate::counter::Implementation;
use crate::table::Table;

#[derive(Debug, Clone, Serialize)]
pub struct ResourceTrackerInfo {
    pub version: String,
    pub implementation: &'static str,
}

impl ResourceTrackerInfo {
    pub fn new(implementation: Implementation) -> ResourceTrackerInfo {
        ResourceTrackerInfo {
            version: env!("CARGO_PKG_VERSION").to_string(),
            implementation: implementation.as_str(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct CloudInfo {
    pub vendor: String,
    pub instance_type: String,
    pub region: String,
}

impl CloudInfo {
    pub fn unknown() -> CloudInfo {
        CloudInfo {
            vendor: "unknown".to_string(),
            instance_type: "unknown".to_string(),
            region: "unknown".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct ServerInfo {
    pub vcpus: usize,
    pub memory_mb: u64,
    pub gpu_count: usize,
    pub gpu_memory_mb: u64,
    pub gpu_names: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct MeanMax {
    pub mean: f64,
    pub max: f64,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct Traffic {
    pub inbound: u64,
    pub outbound: u64,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct Recommendation {
    pub cpu: u64,
    pub memory_mb: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gpu: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vram_gb: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Stats {
    pub duration: f64,
    pub cpu_usage: MeanMax,
    pub memory_usage: MeanMax,
    pub gpu_usage: MeanMax,
    pub gpu_vram: MeanMax,
    pub gpu_utilized: MeanMax,
    pub disk_space_used_gb_max: f64,
    pub traffic: Traffic,
    pub recommendation: Recommendation,
    pub allocation: &'static str,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum HistoricalStats {
    Available {
        cpu_usage_mean: f64,
        memory_max: f64,
        gpu_usage_mean: f64,
        gpu_vram_max: f64,
        gpu_utilized_max: f64,
        duration_mean: f64,
    },
    Unavailable {
        available: bool,
    },
}

impl HistoricalStats {
    pub fn unavailable() -> HistoricalStats {
        HistoricalStats::Unavailable { available: false }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorDetail {
    pub error_type: String,
    pub error_message: String,
    pub traceback: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Artifact {
    Ok {
        resource_tracker: ResourceTrackerInfo,
        pid_tracker: Table,
        system_tracker: Table,
        cloud_info: CloudInfo,
        server_info: ServerInfo,
        #[serde(skip_serializing_if = "Option::is_none")]
        hourly_price_usd: Option<f64>,
        stats: Stats,
        historical_stats: HistoricalStats,
    },
    Error {
        error: ErrorDetail,
    },
}

impl Artifact {
    pub fn error(error_type: &str, message: impl Into<String>) -> Artifact {
        Artifact::Error {
            error: ErrorDetail {
                error_type: error_type.to_string(),
                error_message: message.into(),
                traceback: String::new(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn historical_stats_unavailable_serialises_with_available_false() {
        let json = serde_json_lite(&HistoricalStats::unavailable());
        assert!(json.contains("\"available\":false"));
    }

    // A tiny hand-rolled serialiser so this test doesn't need serde_json as
    // an extra dev-dependency just to check one field's shape.
    fn serde_json_lite(h: &HistoricalStats) -> String {
        match h {
            HistoricalStats::Unavailable { available } => format!("{{\"available\":{available}}}"),
            HistoricalStats::Available { .. } => "{}".to_string(),
        }
    }
}
