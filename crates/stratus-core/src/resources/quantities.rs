use crate::{Result, StratusError};

const KIB: u64 = 1024;
const MIB: u64 = 1024 * KIB;
const GIB: u64 = 1024 * MIB;
const TIB: u64 = 1024 * GIB;

/// Parsed CPU and memory quantities
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceQuantities {
    /// CPU in millicores (1000 = 1 core)
    pub cpu_millicores: u64,
    /// Memory in bytes
    pub memory_bytes: u64,
}

impl ResourceQuantities {
    /// Parse both quantities at once
    pub fn parse(cpu: &str, memory: &str) -> Result<Self> {
        Ok(Self {
            cpu_millicores: Self::parse_cpu(cpu)?,
            memory_bytes: Self::parse_memory(memory)?,
        })
    }

    /// Parse CPU string (e.g., "2", "1000m", "0.5")
    pub fn parse_cpu(s: &str) -> Result<u64> {
        let s = s.trim();
        if let Some(m) = s.strip_suffix('m') {
            // Millicores
            m.parse::<u64>().map_err(|e| {
                StratusError::invalid_quantity(s, format!("invalid CPU millicore value: {}", e))
            })
        } else if let Ok(cores) = s.parse::<f64>() {
            if !cores.is_finite() || cores < 0.0 {
                return Err(StratusError::invalid_quantity(
                    s,
                    "CPU must be a non-negative number",
                ));
            }
            Ok((cores * 1000.0).round() as u64)
        } else {
            Err(StratusError::invalid_quantity(s, "invalid CPU format"))
        }
    }

    /// Parse memory string (e.g., "128Mi", "1Gi", "1024")
    pub fn parse_memory(s: &str) -> Result<u64> {
        let s = s.trim();
        let (num, multiplier) = if let Some(num) = s.strip_suffix("Ki") {
            (num, KIB)
        } else if let Some(num) = s.strip_suffix("Mi") {
            (num, MIB)
        } else if let Some(num) = s.strip_suffix("Gi") {
            (num, GIB)
        } else if let Some(num) = s.strip_suffix("Ti") {
            (num, TIB)
        } else {
            // Plain bytes
            (s, 1)
        };

        let value = num
            .parse::<u64>()
            .map_err(|e| StratusError::invalid_quantity(s, e.to_string()))?;

        value
            .checked_mul(multiplier)
            .ok_or_else(|| StratusError::invalid_quantity(s, "memory quantity overflows u64"))
    }

    /// Render bytes with the largest clean binary suffix (Gi/Mi/Ki)
    pub fn format_memory(bytes: u64) -> String {
        if bytes > 0 && bytes % GIB == 0 {
            format!("{}Gi", bytes / GIB)
        } else if bytes > 0 && bytes % MIB == 0 {
            format!("{}Mi", bytes / MIB)
        } else if bytes > 0 && bytes % KIB == 0 {
            format!("{}Ki", bytes / KIB)
        } else {
            format!("{}", bytes)
        }
    }
}
