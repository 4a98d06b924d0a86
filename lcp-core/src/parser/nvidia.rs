//! NVIDIA GPU information parser
//!
//! Parses the CSV query output of `nvidia-smi`, with a fallback for the
//! default table output when the query flags are unsupported.

use once_cell::sync::Lazy;
use regex::Regex;

use super::{GpuDevice, GpuMemoryInfo};

/// Query arguments producing one `name, total, free` row per GPU
pub const QUERY_ARGS: [&str; 2] = [
    "--query-gpu=name,memory.total,memory.free",
    "--format=csv,noheader,nounits",
];

/// Parser for nvidia-smi command output
pub struct NvidiaSmiParser;

impl NvidiaSmiParser {
    /// Parse every GPU row of the CSV query output.
    ///
    /// Expected input (one line per GPU):
    /// ```text
    /// NVIDIA GeForce RTX 4090, 24564, 23456
    /// NVIDIA GeForce RTX 3080, 10240, 9800
    /// ```
    ///
    /// Rows that do not carry a name and two numeric memory fields are skipped.
    pub fn parse_csv(output: &str) -> Vec<GpuDevice> {
        output.lines().filter_map(Self::parse_csv_row).collect()
    }

    fn parse_csv_row(line: &str) -> Option<GpuDevice> {
        let parts: Vec<&str> = line.trim().split(',').map(|s| s.trim()).collect();
        if parts.len() < 3 || parts[0].is_empty() {
            return None;
        }

        Some(GpuDevice {
            name: parts[0].to_string(),
            memory: GpuMemoryInfo {
                total_mb: parts[1].parse().ok()?,
                free_mb: parts[2].parse().ok()?,
            },
        })
    }

    /// Parse the default `nvidia-smi` table.
    ///
    /// Names come from the `| <index>  <name>  On/Off |` rows and memory from the
    /// `used MiB / total MiB` cells; they are paired in order of appearance.
    pub fn parse_table(output: &str) -> Vec<GpuDevice> {
        static NAME_REGEX: Lazy<Regex> = Lazy::new(|| {
            Regex::new(r"(?m)^\|\s+\d+\s+(.+?)\s+(?:On|Off)\s+\|").expect("Invalid GPU row regex")
        });

        let names = NAME_REGEX
            .captures_iter(output)
            .filter_map(|caps| caps.get(1))
            .map(|m| m.as_str().trim().to_string());

        names
            .zip(Self::parse_memory(output))
            .map(|(name, memory)| GpuDevice { name, memory })
            .collect()
    }

    /// Parse every `used / total` memory cell.
    ///
    /// Handles formats like:
    /// - "1234MiB / 24564MiB"
    /// - "1234 MiB / 24564 MiB"
    /// - "1234 MB / 24564 MB"
    pub fn parse_memory(output: &str) -> Vec<GpuMemoryInfo> {
        static MEMORY_REGEX: Lazy<Regex> = Lazy::new(|| {
            Regex::new(r"(\d+)\s*Mi?B\s*/\s*(\d+)\s*Mi?B").expect("Invalid memory regex")
        });

        MEMORY_REGEX
            .captures_iter(output)
            .filter_map(|caps| {
                let used: u64 = caps.get(1)?.as_str().parse().ok()?;
                let total: u64 = caps.get(2)?.as_str().parse().ok()?;
                Some(GpuMemoryInfo {
                    total_mb: total,
                    free_mb: total.saturating_sub(used),
                })
            })
            .collect()
    }
}
