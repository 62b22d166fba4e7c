use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use anyhow::{Context as AnyhowContext, Result};
use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::detector::DetectorParams;
use crate::dense_flow::FlowParams;
use crate::error::SessionError;
use crate::optical_flow::LkParams;

#[derive(Clone, Debug, PartialEq, Parser, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// seed of the synthetic frame source
    #[clap(long, default_value = "0")]
    pub seed: u64,

    // corner detection
    #[clap(long, default_value = "100")]
    pub max_corners: usize,
    #[clap(long, default_value = "0.3")]
    pub quality_level: f64,
    #[clap(long, default_value = "7")]
    pub min_distance: f64,
    #[clap(long, default_value = "7")]
    pub block_size: usize,

    /// reseed when fewer tracks survive; 0 means 10% of max_corners
    #[clap(long, default_value = "0")]
    pub min_tracks: usize,

    // sparse pyramidal tracking
    #[clap(long, default_value = "15")]
    pub lk_window: usize,
    #[clap(long, default_value = "2")]
    pub lk_max_level: usize,
    #[clap(long, default_value = "10")]
    pub lk_iters: usize,
    #[clap(long, default_value = "0.03")]
    pub lk_epsilon: f64,
    #[clap(long, default_value = "0.0001")]
    pub lk_min_eig: f64,

    // dense flow
    #[clap(long, default_value = "0.5")]
    pub pyr_scale: f64,
    #[clap(long, default_value = "3")]
    pub flow_levels: usize,
    #[clap(long, default_value = "15")]
    pub flow_window: usize,
    #[clap(long, default_value = "3")]
    pub flow_iters: usize,
    #[clap(long, default_value = "5")]
    pub poly_n: usize,
    #[clap(long, default_value = "1.2")]
    pub poly_sigma: f64,
    /// grid step of the native dense estimator
    #[clap(long, default_value = "8")]
    pub dense_stride: usize,

    // drawing
    #[clap(long, default_value = "2")]
    pub track_thickness: usize,
    #[clap(long, default_value = "5")]
    pub marker_radius: usize,
    /// clear the track canvas every N frames, 0 keeps the whole history
    #[clap(long, default_value = "0")]
    pub overlay_clear_interval: u64,

    /// cancellation poll timeout of the display sink
    #[clap(long, default_value = "1")]
    pub poll_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config::parse_from(["flow-tracker"])
    }
}

impl Config {
    /// Read a JSON config; missing keys keep their defaults.
    pub fn load(path: &Path) -> Result<Config> {
        let file = File::open(path).with_context(|| format!("open config {}", path.display()))?;
        let config: Config = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("JSON deserialization failed for {}", path.display()))?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), SessionError> {
        let invalid = |msg: &str| Err(SessionError::InvalidConfig(msg.to_string()));
        if self.max_corners == 0 {
            return invalid("max_corners must be positive");
        }
        if !(self.quality_level > 0. && self.quality_level <= 1.) {
            return invalid("quality_level must be in (0, 1]");
        }
        if self.block_size < 3 || self.block_size % 2 == 0 {
            return invalid("block_size must be odd and at least 3");
        }
        if self.min_tracks > self.max_corners {
            return invalid("min_tracks cannot exceed max_corners");
        }
        if self.lk_window < 3 || self.lk_window % 2 == 0 {
            return invalid("lk_window must be odd and at least 3");
        }
        if self.lk_iters == 0 || self.flow_iters == 0 {
            return invalid("iteration counts must be positive");
        }
        if !(self.pyr_scale > 0. && self.pyr_scale < 1.) {
            return invalid("pyr_scale must be in (0, 1)");
        }
        if self.flow_window < 3 || self.flow_levels == 0 {
            return invalid("flow_window must be at least 3 and flow_levels positive");
        }
        if self.dense_stride == 0 {
            return invalid("dense_stride must be positive");
        }
        if self.track_thickness == 0 {
            return invalid("track_thickness must be positive");
        }
        Ok(())
    }

    /// Surviving-track count below which the point set is re-detected.
    pub fn reseed_threshold(&self) -> usize {
        if self.min_tracks > 0 {
            self.min_tracks
        } else {
            (self.max_corners / 10).max(1)
        }
    }

    pub fn detector_params(&self) -> DetectorParams {
        DetectorParams {
            max_count: self.max_corners,
            quality_level: self.quality_level,
            min_distance: self.min_distance,
            block_size: self.block_size,
        }
    }

    pub fn lk_params(&self) -> LkParams {
        LkParams {
            win_size: self.lk_window,
            max_level: self.lk_max_level,
            iters: self.lk_iters,
            epsilon: self.lk_epsilon,
            min_eig: self.lk_min_eig,
        }
    }

    pub fn flow_params(&self) -> FlowParams {
        FlowParams {
            pyr_scale: self.pyr_scale,
            levels: self.flow_levels,
            win_size: self.flow_window,
            iterations: self.flow_iters,
            poly_n: self.poly_n,
            poly_sigma: self.poly_sigma,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.max_corners, 100);
        assert_eq!(config.reseed_threshold(), 10);
        assert_eq!(config.lk_params().win_size, 15);
        assert_eq!(config.flow_params().poly_n, 5);
        assert_eq!(config.overlay_clear_interval, 0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_json_keeps_missing_defaults() {
        let config: Config = serde_json::from_str(r#"{"max_corners": 40, "min_tracks": 3}"#).unwrap();
        assert_eq!(config.max_corners, 40);
        assert_eq!(config.reseed_threshold(), 3);
        assert_eq!(config.block_size, 7);
    }

    #[test]
    fn test_validate() {
        let config = Config {
            lk_window: 14,
            ..Config::default()
        };
        assert!(matches!(
            config.validate(),
            Err(SessionError::InvalidConfig(_))
        ));
        let config = Config {
            min_tracks: 200,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }
}
