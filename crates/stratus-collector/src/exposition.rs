//! Plain-text exposition parsing
//!
//! Recognised metrics (one sample per line, `#` lines ignored):
//!
//! | Metric                              | Meaning                         |
//! |-------------------------------------|---------------------------------|
//! | `node_cpu_used_millicores`          | CPU in use                      |
//! | `node_cpu_used_cores`               | CPU in use, whole cores         |
//! | `node_memory_used_bytes`            | Memory in use                   |
//! | `gpu_utilization_percent{gpu="N"}`  | Device utilization, 0-100       |
//! | `gpu_memory_used_bytes{gpu="N"}`    | Device memory in use            |
//! | `gpu_memory_total_bytes{gpu="N"}`   | Device memory size              |
//! | `DCGM_FI_DEV_GPU_UTIL{gpu="N"}`     | DCGM utilization, 0-100         |
//! | `DCGM_FI_DEV_FB_USED{gpu="N"}`      | DCGM framebuffer used, MiB      |
//! | `DCGM_FI_DEV_FB_FREE{gpu="N"}`      | DCGM framebuffer free, MiB      |
//!
//! Unknown metrics are skipped. When both a native metric and its DCGM alias
//! are present, the native one wins.

use crate::error::{CollectError, Result};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use stratus_core::{GpuDevice, Snapshot};

const MIB: f64 = 1024.0 * 1024.0;

/// One `name{labels} value` line
#[derive(Debug, Clone, PartialEq)]
struct Sample<'a> {
    name: &'a str,
    labels: Vec<(&'a str, String)>,
    value: f64,
}

impl Sample<'_> {
    fn label(&self, key: &str) -> Option<&str> {
        self.labels
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Default)]
struct DeviceFields {
    utilization: Option<f64>,
    used: Option<u64>,
    total: Option<u64>,
    dcgm_utilization: Option<f64>,
    dcgm_used: Option<u64>,
    dcgm_free: Option<u64>,
}

impl DeviceFields {
    fn finish(self, index: u32) -> std::result::Result<GpuDevice, String> {
        let utilization_percent = self
            .utilization
            .or(self.dcgm_utilization)
            .ok_or_else(|| format!("gpu {} has no utilization sample", index))?;
        let memory_used_bytes = self
            .used
            .or(self.dcgm_used)
            .ok_or_else(|| format!("gpu {} has no memory used sample", index))?;
        let memory_total_bytes = match (self.total, self.dcgm_free) {
            (Some(total), _) => total,
            (None, Some(free)) => memory_used_bytes.saturating_add(free),
            (None, None) => return Err(format!("gpu {} has no memory total sample", index)),
        };

        if memory_used_bytes > memory_total_bytes {
            return Err(format!(
                "gpu {} reports {} bytes used of {} total",
                index, memory_used_bytes, memory_total_bytes
            ));
        }

        Ok(GpuDevice {
            index,
            utilization_percent,
            memory_used_bytes,
            memory_total_bytes,
        })
    }
}

/// Parse an exposition body into a snapshot stamped with `timestamp`
///
/// Missing CPU or memory samples are a parse failure. Missing GPU samples mean
/// the node has no GPUs. Every GPU sample must carry a `gpu` label with the
/// device index; devices are never inferred from sample order.
pub fn parse_snapshot(node_id: &str, body: &str, timestamp: DateTime<Utc>) -> Result<Snapshot> {
    let fail = |message: String| CollectError::parse_failure(node_id, message);

    let mut cpu_used_millicores = None;
    let mut cpu_used_cores = None;
    let mut memory_used_bytes = None;
    let mut devices: BTreeMap<u32, DeviceFields> = BTreeMap::new();

    for (line_no, line) in body.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let sample = parse_line(line).map_err(|e| fail(format!("line {}: {}", line_no + 1, e)))?;

        match sample.name {
            "node_cpu_used_millicores" => {
                cpu_used_millicores = Some(non_negative(&sample).map_err(fail)?.round() as u64);
            }
            "node_cpu_used_cores" => {
                cpu_used_cores = Some((non_negative(&sample).map_err(fail)? * 1000.0).round() as u64);
            }
            "node_memory_used_bytes" => {
                memory_used_bytes = Some(non_negative(&sample).map_err(fail)?.round() as u64);
            }
            "gpu_utilization_percent" | "DCGM_FI_DEV_GPU_UTIL" => {
                let value = percent(&sample).map_err(fail)?;
                let device = devices.entry(device_index(&sample).map_err(fail)?).or_default();
                if sample.name.starts_with("DCGM") {
                    device.dcgm_utilization = Some(value);
                } else {
                    device.utilization = Some(value);
                }
            }
            "gpu_memory_used_bytes" => {
                let value = non_negative(&sample).map_err(fail)?.round() as u64;
                devices.entry(device_index(&sample).map_err(fail)?).or_default().used = Some(value);
            }
            "gpu_memory_total_bytes" => {
                let value = non_negative(&sample).map_err(fail)?.round() as u64;
                devices.entry(device_index(&sample).map_err(fail)?).or_default().total = Some(value);
            }
            "DCGM_FI_DEV_FB_USED" => {
                let value = (non_negative(&sample).map_err(fail)? * MIB).round() as u64;
                devices.entry(device_index(&sample).map_err(fail)?).or_default().dcgm_used =
                    Some(value);
            }
            "DCGM_FI_DEV_FB_FREE" => {
                let value = (non_negative(&sample).map_err(fail)? * MIB).round() as u64;
                devices.entry(device_index(&sample).map_err(fail)?).or_default().dcgm_free =
                    Some(value);
            }
            _ => {}
        }
    }

    let cpu_used_millicores = cpu_used_millicores
        .or(cpu_used_cores)
        .ok_or_else(|| fail("missing node_cpu_used_millicores".to_string()))?;
    let memory_used_bytes =
        memory_used_bytes.ok_or_else(|| fail("missing node_memory_used_bytes".to_string()))?;

    let gpu_devices = devices
        .into_iter()
        .map(|(index, fields)| fields.finish(index))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(fail)?;

    Ok(Snapshot {
        timestamp,
        cpu_used_millicores,
        memory_used_bytes,
        gpu_devices,
    })
}

fn non_negative(sample: &Sample<'_>) -> std::result::Result<f64, String> {
    if !sample.value.is_finite() || sample.value < 0.0 {
        return Err(format!("{} has invalid value {}", sample.name, sample.value));
    }
    Ok(sample.value)
}

fn percent(sample: &Sample<'_>) -> std::result::Result<f64, String> {
    let value = non_negative(sample)?;
    if value > 100.0 {
        return Err(format!("{} is {} which exceeds 100", sample.name, value));
    }
    Ok(value)
}

fn device_index(sample: &Sample<'_>) -> std::result::Result<u32, String> {
    let raw = sample
        .label("gpu")
        .ok_or_else(|| format!("{} sample has no gpu label", sample.name))?;
    raw.parse::<u32>()
        .map_err(|_| format!("{} has invalid gpu label '{}'", sample.name, raw))
}

fn parse_line(line: &str) -> std::result::Result<Sample<'_>, String> {
    let name_end = line
        .find(|c: char| c == '{' || c.is_whitespace())
        .ok_or_else(|| "sample has no value".to_string())?;
    let name = &line[..name_end];
    if name.is_empty() {
        return Err("sample has no metric name".to_string());
    }

    let mut rest = &line[name_end..];
    let mut labels = Vec::new();
    if let Some(after_brace) = rest.strip_prefix('{') {
        let (parsed, remainder) = parse_labels(after_brace)?;
        labels = parsed;
        rest = remainder;
    }

    // Value, optionally followed by a timestamp which is ignored
    let raw_value = rest
        .split_whitespace()
        .next()
        .ok_or_else(|| format!("{} has no value", name))?;
    let value = match raw_value {
        "+Inf" => f64::INFINITY,
        "-Inf" => f64::NEG_INFINITY,
        other => other
            .parse::<f64>()
            .map_err(|_| format!("{} has non-numeric value '{}'", name, other))?,
    };

    Ok(Sample {
        name,
        labels,
        value,
    })
}

/// Parse `key="value",...}` and return the labels plus the text after `}`
fn parse_labels(input: &str) -> std::result::Result<(Vec<(&str, String)>, &str), String> {
    let mut labels = Vec::new();
    let mut rest = input.trim_start();

    loop {
        if let Some(after) = rest.strip_prefix('}') {
            return Ok((labels, after));
        }

        let eq = rest
            .find('=')
            .ok_or_else(|| "label without '='".to_string())?;
        let key = rest[..eq].trim();
        if key.is_empty() {
            return Err("empty label name".to_string());
        }

        let after_eq = rest[eq + 1..].trim_start();
        let quoted = after_eq
            .strip_prefix('"')
            .ok_or_else(|| format!("label '{}' value is not quoted", key))?;

        let mut value = String::new();
        let mut chars = quoted.char_indices();
        let mut closed_at = None;
        while let Some((i, c)) = chars.next() {
            match c {
                '\\' => match chars.next() {
                    Some((_, 'n')) => value.push('\n'),
                    Some((_, escaped)) => value.push(escaped),
                    None => break,
                },
                '"' => {
                    closed_at = Some(i);
                    break;
                }
                other => value.push(other),
            }
        }
        let closed_at = closed_at.ok_or_else(|| format!("label '{}' value is unterminated", key))?;
        labels.push((key, value));

        rest = quoted[closed_at + 1..].trim_start();
        if let Some(after_comma) = rest.strip_prefix(',') {
            rest = after_comma.trim_start();
        } else if !rest.starts_with('}') {
            return Err("expected ',' or '}' after label".to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NATIVE: &str = r#"
# HELP node_cpu_used_millicores CPU in use
# TYPE node_cpu_used_millicores gauge
node_cpu_used_millicores 1500
node_memory_used_bytes 4294967296
gpu_utilization_percent{gpu="1"} 80
gpu_utilization_percent{gpu="0"} 12.5
gpu_memory_used_bytes{gpu="0"} 2147483648
gpu_memory_total_bytes{gpu="0"} 17179869184
gpu_memory_used_bytes{gpu="1"} 8589934592
gpu_memory_total_bytes{gpu="1"} 17179869184
some_unrelated_metric{job="x"} 3
"#;

    #[test]
    fn test_parse_native_exposition() {
        let now = Utc::now();
        let snap = parse_snapshot("n1", NATIVE, now).unwrap();

        assert_eq!(snap.timestamp, now);
        assert_eq!(snap.cpu_used_millicores, 1500);
        assert_eq!(snap.memory_used_bytes, 4 << 30);
        assert_eq!(snap.gpu_devices.len(), 2);
        // Ordered by the gpu label, not by line order
        assert_eq!(snap.gpu_devices[0].index, 0);
        assert_eq!(snap.gpu_devices[0].utilization_percent, 12.5);
        assert_eq!(snap.gpu_devices[1].index, 1);
        assert_eq!(snap.gpu_devices[1].memory_used_bytes, 8 << 30);
    }

    #[test]
    fn test_missing_gpu_metrics_means_no_gpus() {
        let body = "node_cpu_used_millicores 100\nnode_memory_used_bytes 1024\n";
        let snap = parse_snapshot("n1", body, Utc::now()).unwrap();
        assert!(snap.gpu_devices.is_empty());
    }

    #[test]
    fn test_cpu_cores_alias() {
        let body = "node_cpu_used_cores 2.25\nnode_memory_used_bytes 1024\n";
        let snap = parse_snapshot("n1", body, Utc::now()).unwrap();
        assert_eq!(snap.cpu_used_millicores, 2250);
    }

    #[test]
    fn test_dcgm_aliases() {
        let body = r#"
node_cpu_used_millicores 100
node_memory_used_bytes 1024
DCGM_FI_DEV_GPU_UTIL{gpu="0",UUID="GPU-abc",modelName="A100"} 40
DCGM_FI_DEV_FB_USED{gpu="0",UUID="GPU-abc"} 1024
DCGM_FI_DEV_FB_FREE{gpu="0",UUID="GPU-abc"} 3072
"#;
        let snap = parse_snapshot("n1", body, Utc::now()).unwrap();
        let gpu = &snap.gpu_devices[0];
        assert_eq!(gpu.utilization_percent, 40.0);
        assert_eq!(gpu.memory_used_bytes, 1 << 30);
        assert_eq!(gpu.memory_total_bytes, 4 << 30);
    }

    #[test]
    fn test_native_wins_over_dcgm() {
        let body = r#"
node_cpu_used_millicores 100
node_memory_used_bytes 1024
DCGM_FI_DEV_GPU_UTIL{gpu="0"} 40
gpu_utilization_percent{gpu="0"} 55
gpu_memory_used_bytes{gpu="0"} 10
gpu_memory_total_bytes{gpu="0"} 100
"#;
        let snap = parse_snapshot("n1", body, Utc::now()).unwrap();
        assert_eq!(snap.gpu_devices[0].utilization_percent, 55.0);
    }

    #[test]
    fn test_missing_cpu_is_parse_failure() {
        let err = parse_snapshot("n1", "node_memory_used_bytes 1024\n", Utc::now()).unwrap_err();
        assert!(matches!(err, CollectError::ParseFailure { .. }));
    }

    #[test]
    fn test_gpu_sample_without_label_is_parse_failure() {
        let body = "node_cpu_used_millicores 1\nnode_memory_used_bytes 1\ngpu_utilization_percent 50\n";
        let err = parse_snapshot("n1", body, Utc::now()).unwrap_err();
        assert!(err.to_string().contains("no gpu label"));
    }

    #[test]
    fn test_incomplete_device_is_parse_failure() {
        let body = "node_cpu_used_millicores 1\nnode_memory_used_bytes 1\ngpu_utilization_percent{gpu=\"0\"} 50\n";
        let err = parse_snapshot("n1", body, Utc::now()).unwrap_err();
        assert!(matches!(err, CollectError::ParseFailure { .. }));
    }

    #[test]
    fn test_garbage_is_parse_failure() {
        let err = parse_snapshot("n1", "<html>502 Bad Gateway</html>", Utc::now()).unwrap_err();
        assert!(matches!(err, CollectError::ParseFailure { .. }));
    }

    #[test]
    fn test_rejects_negative_and_out_of_range_values() {
        let negative = "node_cpu_used_millicores -5\nnode_memory_used_bytes 1\n";
        assert!(parse_snapshot("n1", negative, Utc::now()).is_err());

        let over = "node_cpu_used_millicores 1\nnode_memory_used_bytes 1\n\
                    gpu_utilization_percent{gpu=\"0\"} 130\n";
        assert!(parse_snapshot("n1", over, Utc::now()).is_err());
    }

    #[test]
    fn test_parse_line_labels_and_timestamp() {
        let sample = parse_line(r#"metric{a="x\"y",b="z"} 3.5 1700000000000"#).unwrap();
        assert_eq!(sample.name, "metric");
        assert_eq!(sample.label("a"), Some("x\"y"));
        assert_eq!(sample.label("b"), Some("z"));
        assert_eq!(sample.value, 3.5);
    }

    #[test]
    fn test_parse_line_trailing_comma() {
        let sample = parse_line(r#"metric{gpu="3",} 1"#).unwrap();
        assert_eq!(sample.label("gpu"), Some("3"));
    }
}
