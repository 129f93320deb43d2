use serde::{Deserialize, Serialize};

use crate::config::VolNoiseStatsConfig;
use crate::prelude::{Channel, ChannelValues};
use crate::processing::RayNoise;

/// Mean of the per-ray median noise for one channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChannelNoiseMean {
    pub mean_dbm: f64,
    pub n_rays: usize,
}

/// Dispatcher-side accumulator of per-ray median noise over a volume.
#[derive(Debug, Clone)]
pub struct VolumeNoiseStats {
    config: VolNoiseStatsConfig,
    sums: ChannelValues<f64>,
    counts: ChannelValues<usize>,
}

impl VolumeNoiseStats {
    pub fn new(config: &VolNoiseStatsConfig) -> Self {
        Self {
            config: config.clone(),
            sums: ChannelValues::splat(0.0),
            counts: ChannelValues::splat(0),
        }
    }

    /// Adds one ray's medians if the ray lies in the configured elevation
    /// band. Unresolved channels are skipped.
    pub fn add(&mut self, elevation_deg: f64, noise: &RayNoise) {
        if !self.config.enabled || !self.config.contains(elevation_deg) {
            return;
        }
        for channel in Channel::ALL {
            if let Some(median) = noise.median_dbm.get(channel) {
                self.sums.set(channel, self.sums.get(channel) + median);
                self.counts.set(channel, self.counts.get(channel) + 1);
            }
        }
    }

    /// Per-channel means; `None` for channels with no samples.
    pub fn means(&self) -> ChannelValues<Option<ChannelNoiseMean>> {
        let mut means = ChannelValues::splat(None);
        for channel in Channel::ALL {
            let n_rays = self.counts.get(channel);
            if n_rays > 0 {
                means.set(
                    channel,
                    Some(ChannelNoiseMean {
                        mean_dbm: self.sums.get(channel) / n_rays as f64,
                        n_rays,
                    }),
                );
            }
        }
        means
    }

    pub fn reset(&mut self) {
        self.sums = ChannelValues::splat(0.0);
        self.counts = ChannelValues::splat(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noise(hc: Option<f64>, vc: Option<f64>) -> RayNoise {
        let mut noise = RayNoise::default();
        noise.median_dbm.hc = hc;
        noise.median_dbm.vc = vc;
        noise
    }

    fn enabled() -> VolNoiseStatsConfig {
        VolNoiseStatsConfig {
            enabled: true,
            min_elev_deg: 0.0,
            max_elev_deg: 10.0,
        }
    }

    #[test]
    fn channels_without_samples_are_excluded() {
        let mut stats = VolumeNoiseStats::new(&enabled());
        stats.add(1.0, &noise(Some(-110.0), None));
        stats.add(2.0, &noise(Some(-112.0), None));
        let means = stats.means();
        let hc = means.hc.unwrap();
        assert_eq!(hc.n_rays, 2);
        assert!((hc.mean_dbm + 111.0).abs() < 1e-12);
        assert_eq!(means.vc, None);
        assert_eq!(means.hx, None);
    }

    #[test]
    fn rays_outside_band_are_ignored() {
        let mut stats = VolumeNoiseStats::new(&enabled());
        stats.add(15.0, &noise(Some(-100.0), Some(-100.0)));
        assert_eq!(stats.means(), ChannelValues::splat(None));

        let mut disabled = VolumeNoiseStats::new(&VolNoiseStatsConfig::default());
        disabled.add(1.0, &noise(Some(-100.0), None));
        assert_eq!(disabled.means().hc, None);
    }
}
