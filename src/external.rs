//! External-interface glue (§4.G): contracts for the pieces of the artifact
//! that come from outside this process — cloud metadata, server inventory,
//! pricing, and historical-run lookup. Each is a trait so the Supervisor can
//! be tested against a mock instead of a real cloud/network environment,
//! mirroring the teacher's trait+mock split for `ProcfsAPI`.

use std::time::Duration;

use crate::artifact::{CloudInfo, HistoricalStats, ServerInfo};
use crate::gpuprobe;

const EXTERNAL_CALL_TIMEOUT: Duration = Duration::from_secs(2);

pub trait CloudMetadataProbe {
    fn detect_cloud(&self) -> CloudInfo;
}

/// Tries, in sequence, the well-known link-local metadata endpoints for the
/// major providers. All failures collapse to "unknown" (§4.G, §7
/// CloudMetadataFailure).
pub struct RealCloudMetadataProbe;

impl CloudMetadataProbe for RealCloudMetadataProbe {
    fn detect_cloud(&self) -> CloudInfo {
        if let Some(info) = try_aws() {
            return info;
        }
        if let Some(info) = try_gcp() {
            return info;
        }
        if let Some(info) = try_azure() {
            return info;
        }
        if let Some(info) = try_hetzner() {
            return info;
        }
        if let Some(info) = try_upcloud() {
            return info;
        }
        CloudInfo::unknown()
    }
}

fn get_with_timeout(url: &str, headers: &[(&str, &str)]) -> Option<String> {
    let agent = ureq::AgentBuilder::new()
        .timeout(EXTERNAL_CALL_TIMEOUT)
        .build();
    let mut request = agent.get(url);
    for (name, value) in headers {
        request = request.set(name, value);
    }
    request.call().ok()?.into_string().ok()
}

fn try_aws() -> Option<CloudInfo> {
    let token = get_with_timeout_put("http://169.254.169.254/latest/api/token")?;
    let headers = [("X-aws-ec2-metadata-token", token.as_str())];
    let instance_type = get_with_timeout(
        "http://169.254.169.254/latest/meta-data/instance-type",
        &headers,
    )?;
    let region = get_with_timeout(
        "http://169.254.169.254/latest/meta-data/placement/region",
        &headers,
    )
    .unwrap_or_else(|| "unknown".to_string());
    Some(CloudInfo {
        vendor: "aws".to_string(),
        instance_type,
        region,
    })
}

fn get_with_timeout_put(url: &str) -> Option<String> {
    let agent = ureq::AgentBuilder::new().timeout(EXTERNAL_CALL_TIMEOUT).build();
    agent
        .put(url)
        .set("X-aws-ec2-metadata-token-ttl-seconds", "60")
        .call()
        .ok()?
        .into_string()
        .ok()
}

fn try_gcp() -> Option<CloudInfo> {
    let headers = [("Metadata-Flavor", "Google")];
    let machine_type = get_with_timeout(
        "http://metadata.google.internal/computeMetadata/v1/instance/machine-type",
        &headers,
    )?;
    let instance_type = machine_type.rsplit('/').next().unwrap_or(&machine_type).to_string();
    let zone = get_with_timeout(
        "http://metadata.google.internal/computeMetadata/v1/instance/zone",
        &headers,
    )
    .unwrap_or_else(|| "unknown".to_string());
    let region = zone.rsplit('/').next().unwrap_or(&zone).to_string();
    Some(CloudInfo {
        vendor: "gcp".to_string(),
        instance_type,
        region,
    })
}

fn try_azure() -> Option<CloudInfo> {
    let headers = [("Metadata", "true")];
    let body = get_with_timeout(
        "http://169.254.169.254/metadata/instance?api-version=2021-02-01",
        &headers,
    )?;
    // Minimal scrape: avoid pulling in a JSON dependency for two fields.
    let instance_type = scrape_json_string(&body, "\"vmSize\"").unwrap_or_else(|| "unknown".to_string());
    let region = scrape_json_string(&body, "\"location\"").unwrap_or_else(|| "unknown".to_string());
    Some(CloudInfo {
        vendor: "azure".to_string(),
        instance_type,
        region,
    })
}

fn try_hetzner() -> Option<CloudInfo> {
    let instance_type = get_with_timeout("http://169.254.169.254/hetzner/v1/metadata/instance-id", &[])?;
    let region = get_with_timeout("http://169.254.169.254/hetzner/v1/metadata/region", &[])
        .unwrap_or_else(|| "unknown".to_string());
    Some(CloudInfo {
        vendor: "hetzner".to_string(),
        instance_type,
        region,
    })
}

fn try_upcloud() -> Option<CloudInfo> {
    let body = get_with_timeout("http://169.254.169.254/metadata/v1.json", &[])?;
    let instance_type = scrape_json_string(&body, "\"plan\"").unwrap_or_else(|| "unknown".to_string());
    let region = scrape_json_string(&body, "\"zone\"").unwrap_or_else(|| "unknown".to_string());
    Some(CloudInfo {
        vendor: "upcloud".to_string(),
        instance_type,
        region,
    })
}

fn scrape_json_string(body: &str, key: &str) -> Option<String> {
    let ix = body.find(key)?;
    let after_key = &body[ix + key.len()..];
    let colon = after_key.find(':')?;
    let after_colon = after_key[colon + 1..].trim_start();
    let after_colon = after_colon.strip_prefix('"')?;
    let end = after_colon.find('"')?;
    Some(after_colon[..end].to_string())
}

pub trait ServerInventory {
    fn server_info(&self) -> ServerInfo;
}

pub struct RealServerInventory;

impl ServerInventory for RealServerInventory {
    fn server_info(&self) -> ServerInfo {
        let mut system = sysinfo::System::new_all();
        system.refresh_all();
        let vcpus = system.cpus().len();
        let memory_mb = system.total_memory() / (1024 * 1024);

        let (gpu_count, gpu_memory_mb, gpu_names) = query_nvidia_inventory();

        ServerInfo {
            vcpus,
            memory_mb,
            gpu_count,
            gpu_memory_mb,
            gpu_names,
        }
    }
}

fn query_nvidia_inventory() -> (usize, u64, Vec<String>) {
    if gpuprobe::nvidia_smi_absent() {
        return (0, 0, Vec::new());
    }
    let cmd = "nvidia-smi --query-gpu=name,memory.total --format=csv,noheader,nounits";
    match crate::command::safe_command(cmd, EXTERNAL_CALL_TIMEOUT) {
        Ok(stdout) => {
            let mut names = Vec::new();
            let mut total_mb: u64 = 0;
            for line in stdout.lines() {
                let parts: Vec<&str> = line.split(',').map(|s| s.trim()).collect();
                if parts.len() < 2 {
                    continue;
                }
                names.push(parts[0].to_string());
                total_mb += parts[1].parse::<u64>().unwrap_or(0);
            }
            (names.len(), total_mb, names)
        }
        Err(_) => (0, 0, Vec::new()),
    }
}

pub trait PricingLookup {
    /// Pure HTTP GET against the remote server-pricing catalogue; failures
    /// return `None` (§4.G, §7).
    fn hourly_price_usd(&self, vendor: &str, region: &str, instance_type: &str) -> Option<f64>;
}

pub struct RealPricingLookup;

impl PricingLookup for RealPricingLookup {
    fn hourly_price_usd(&self, vendor: &str, region: &str, instance_type: &str) -> Option<f64> {
        let url = format!("https://keeper.sparecores.net/server/{vendor}/{instance_type}/prices");
        let agent = ureq::AgentBuilder::new().timeout(EXTERNAL_CALL_TIMEOUT).build();
        let body = agent
            .get(&url)
            .set("User-Agent", "taskgauge")
            .call()
            .ok()?
            .into_string()
            .ok()?;
        find_ondemand_linux_price(&body, region)
    }
}

/// Splits a flat JSON array of objects into the substring of each `{...}`
/// element. Only handles the shapes the pricing catalogue actually returns
/// (no nested objects, no braces inside string values) — the same scope of
/// "just enough scraping" as `scrape_json_string`/`scrape_json_number`.
fn split_json_objects(body: &str) -> Vec<&str> {
    let mut objects = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    for (i, c) in body.char_indices() {
        match c {
            '{' => {
                if depth == 0 {
                    start = i;
                }
                depth += 1;
            }
            '}' => {
                if depth > 0 {
                    depth -= 1;
                    if depth == 0 {
                        objects.push(&body[start..=i]);
                    }
                }
            }
            _ => {}
        }
    }
    objects
}

fn is_ondemand_linux(item: &str) -> bool {
    scrape_json_string(item, "\"allocation\"").as_deref() == Some("ondemand")
        && scrape_json_string(item, "\"operating_system\"").as_deref() == Some("Linux")
}

/// Prefers an on-demand Linux price in `region`, falling back to the first
/// on-demand Linux price in any region (`get_instance_price` in
/// `examples/original_source/.../helpers.py`).
fn find_ondemand_linux_price(body: &str, region: &str) -> Option<f64> {
    let items = split_json_objects(body);
    for item in &items {
        if is_ondemand_linux(item) && scrape_json_string(item, "\"region_id\"").as_deref() == Some(region) {
            if let Some(price) = scrape_json_number(item, "\"price\"") {
                return Some(price);
            }
        }
    }
    for item in &items {
        if is_ondemand_linux(item) {
            if let Some(price) = scrape_json_number(item, "\"price\"") {
                return Some(price);
            }
        }
    }
    None
}

fn scrape_json_number(body: &str, key: &str) -> Option<f64> {
    let ix = body.find(key)?;
    let after_key = &body[ix + key.len()..];
    let colon = after_key.find(':')?;
    let after_colon = after_key[colon + 1..].trim_start();
    let end = after_colon.find(|c: char| c == ',' || c == '}').unwrap_or(after_colon.len());
    after_colon[..end].trim().parse().ok()
}

/// The supervisor calls into the host workflow system to enumerate previous
/// successful runs of the same step (§4.G, §4.F "Historical"). Kept as a
/// trait purely for testability — there is no host workflow system in this
/// crate to call into, so the real run always returns `Unavailable`.
pub trait HistoricalLookup {
    fn historical_stats(&self, step_name: &str) -> HistoricalStats;
}

pub struct NoHistoricalLookup;

impl HistoricalLookup for NoHistoricalLookup {
    fn historical_stats(&self, _step_name: &str) -> HistoricalStats {
        HistoricalStats::unavailable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MockHistoricalLookup {
        result: HistoricalStats,
    }

    impl HistoricalLookup for MockHistoricalLookup {
        fn historical_stats(&self, _step_name: &str) -> HistoricalStats {
            self.result.clone()
        }
    }

    #[test]
    fn no_historical_lookup_is_always_unavailable() {
        let lookup = NoHistoricalLookup;
        match lookup.historical_stats("train") {
            HistoricalStats::Unavailable { available } => assert!(!available),
            HistoricalStats::Available { .. } => panic!("expected Unavailable"),
        }
    }

    #[test]
    fn mock_historical_lookup_can_report_available_data() {
        let lookup = MockHistoricalLookup {
            result: HistoricalStats::Available {
                cpu_usage_mean: 0.5,
                memory_max: 1024.0,
                gpu_usage_mean: 0.0,
                gpu_vram_max: 0.0,
                gpu_utilized_max: 0.0,
                duration_mean: 10.0,
            },
        };
        match lookup.historical_stats("train") {
            HistoricalStats::Available { cpu_usage_mean, .. } => assert_eq!(cpu_usage_mean, 0.5),
            HistoricalStats::Unavailable { .. } => panic!("expected Available"),
        }
    }

    #[test]
    fn scrape_json_string_extracts_value() {
        let body = r#"{"vmSize": "Standard_D2s_v3", "location": "westeurope"}"#;
        assert_eq!(scrape_json_string(body, "\"vmSize\""), Some("Standard_D2s_v3".to_string()));
    }

    #[test]
    fn scrape_json_number_extracts_value() {
        let body = r#"{"price": 0.096, "currency": "USD"}"#;
        assert_eq!(scrape_json_number(body, "\"price\""), Some(0.096));
    }

    const PRICING_CATALOGUE: &str = r#"[
        {"region_id": "us-east-1", "allocation": "spot", "operating_system": "Linux", "price": 0.01},
        {"region_id": "eu-west-1", "allocation": "ondemand", "operating_system": "Linux", "price": 0.2},
        {"region_id": "us-east-1", "allocation": "ondemand", "operating_system": "Linux", "price": 0.096},
        {"region_id": "us-east-1", "allocation": "ondemand", "operating_system": "Windows", "price": 0.18}
    ]"#;

    #[test]
    fn find_ondemand_linux_price_prefers_matching_region() {
        assert_eq!(find_ondemand_linux_price(PRICING_CATALOGUE, "us-east-1"), Some(0.096));
    }

    #[test]
    fn find_ondemand_linux_price_falls_back_to_any_region() {
        assert_eq!(find_ondemand_linux_price(PRICING_CATALOGUE, "ap-south-1"), Some(0.2));
    }

    #[test]
    fn find_ondemand_linux_price_is_none_when_no_match() {
        let body = r#"[{"region_id": "us-east-1", "allocation": "spot", "operating_system": "Linux", "price": 0.01}]"#;
        assert_eq!(find_ondemand_linux_price(body, "us-east-1"), None);
    }

    struct StubPricingLookup {
        price: Option<f64>,
    }

    impl PricingLookup for StubPricingLookup {
        fn hourly_price_usd(&self, _vendor: &str, _region: &str, _instance_type: &str) -> Option<f64> {
            self.price
        }
    }

    #[test]
    fn stub_pricing_lookup_returns_configured_price() {
        let lookup = StubPricingLookup { price: Some(0.096) };
        assert_eq!(lookup.hourly_price_usd("aws", "us-east-1", "m5.large"), Some(0.096));
    }
}
