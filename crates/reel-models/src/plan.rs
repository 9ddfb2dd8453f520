//! Plan tiers and their limits.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::project::ResolutionPreset;

const GIB: u64 = 1024 * 1024 * 1024;

/// Storage limits in bytes for each plan tier.
pub const FREE_STORAGE_LIMIT_BYTES: u64 = 2 * GIB;
pub const PRO_STORAGE_LIMIT_BYTES: u64 = 50 * GIB;
pub const STUDIO_STORAGE_LIMIT_BYTES: u64 = 500 * GIB;

/// Plan tier enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "lowercase")]
pub enum PlanTier {
    #[default]
    Free,
    Pro,
    Studio,
}

impl PlanTier {
    /// Parse from string (case-insensitive). Unknown plans fall back to free.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "pro" => PlanTier::Pro,
            "studio" => PlanTier::Studio,
            _ => PlanTier::Free,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PlanTier::Free => "free",
            PlanTier::Pro => "pro",
            PlanTier::Studio => "studio",
        }
    }

    pub fn limits(&self) -> TierLimits {
        TierLimits::for_tier(*self)
    }
}

impl std::fmt::Display for PlanTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Resource ceilings for a tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TierLimits {
    pub tier: PlanTier,
    /// Total bytes of stored media.
    pub storage_bytes: u64,
    /// Rendered output seconds per calendar month.
    pub monthly_render_seconds: u64,
    pub max_resolution: ResolutionPreset,
    /// Clips used from a project per compile.
    pub max_clips: u32,
}

impl Default for TierLimits {
    fn default() -> Self {
        Self::for_tier(PlanTier::Free)
    }
}

impl TierLimits {
    pub fn for_tier(tier: PlanTier) -> Self {
        match tier {
            PlanTier::Free => Self {
                tier,
                storage_bytes: FREE_STORAGE_LIMIT_BYTES,
                monthly_render_seconds: 600,
                max_resolution: ResolutionPreset::P720,
                max_clips: 10,
            },
            PlanTier::Pro => Self {
                tier,
                storage_bytes: PRO_STORAGE_LIMIT_BYTES,
                monthly_render_seconds: 7_200,
                max_resolution: ResolutionPreset::P1080,
                max_clips: 50,
            },
            PlanTier::Studio => Self {
                tier,
                storage_bytes: STUDIO_STORAGE_LIMIT_BYTES,
                monthly_render_seconds: 36_000,
                max_resolution: ResolutionPreset::P2160,
                max_clips: 200,
            },
        }
    }
}

/// Storage usage information.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct StorageUsage {
    /// Total storage used in bytes.
    pub used_bytes: u64,
    /// Storage limit in bytes.
    pub limit_bytes: u64,
    /// Bytes still available.
    pub remaining_bytes: u64,
}

impl StorageUsage {
    pub fn new(used_bytes: u64, limit_bytes: u64) -> Self {
        Self {
            used_bytes,
            limit_bytes,
            remaining_bytes: limit_bytes.saturating_sub(used_bytes),
        }
    }

    /// Get usage as a percentage (0-100).
    pub fn percentage(&self) -> f64 {
        if self.limit_bytes == 0 {
            return 0.0;
        }
        (self.used_bytes as f64 / self.limit_bytes as f64) * 100.0
    }

    /// Check if adding bytes would exceed the limit.
    pub fn would_exceed(&self, additional_bytes: u64) -> bool {
        self.used_bytes.saturating_add(additional_bytes) > self.limit_bytes
    }

    pub fn format_remaining(&self) -> String {
        format_bytes(self.remaining_bytes)
    }
}

/// Format bytes as human-readable string (KB, MB, GB).
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;

    if bytes >= GIB {
        format!("{:.2} GB", bytes as f64 / GIB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_defaults() {
        let free = TierLimits::for_tier(PlanTier::Free);
        assert_eq!(free.storage_bytes, 2 * GIB);
        assert_eq!(free.monthly_render_seconds, 600);
        assert_eq!(free.max_resolution, ResolutionPreset::P720);
        assert_eq!(free.max_clips, 10);

        let pro = PlanTier::Pro.limits();
        assert_eq!(pro.monthly_render_seconds, 7_200);
        assert_eq!(pro.max_clips, 50);

        let studio = PlanTier::Studio.limits();
        assert_eq!(studio.storage_bytes, 500 * GIB);
        assert_eq!(studio.max_resolution, ResolutionPreset::P2160);
    }

    #[test]
    fn test_parse_unknown_plan_is_free() {
        assert_eq!(PlanTier::parse("STUDIO"), PlanTier::Studio);
        assert_eq!(PlanTier::parse("enterprise"), PlanTier::Free);
    }

    #[test]
    fn test_storage_usage_saturates() {
        let usage = StorageUsage::new(3 * GIB, 2 * GIB);
        assert_eq!(usage.remaining_bytes, 0);
        assert!(usage.would_exceed(1));

        let usage = StorageUsage::new(GIB, 2 * GIB);
        assert_eq!(usage.remaining_bytes, GIB);
        assert!(!usage.would_exceed(GIB));
        assert!((usage.percentage() - 50.0).abs() < 0.01);
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(500), "500 B");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(2 * GIB), "2.00 GB");
    }
}
