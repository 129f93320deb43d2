pub struct StatsHelper;

impl StatsHelper {
    pub fn mean(samples: &[f64]) -> Option<f64> {
        if samples.is_empty() {
            return None;
        }
        Some(samples.iter().sum::<f64>() / samples.len() as f64)
    }

    /// Upper median: element `len / 2` of the sorted values.
    pub fn median(samples: &[f64]) -> Option<f64> {
        if samples.is_empty() {
            return None;
        }
        let mut sorted = samples.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));
        Some(sorted[sorted.len() / 2])
    }

    /// Population standard deviation; needs more than two samples.
    pub fn sdev(samples: &[f64]) -> Option<f64> {
        if samples.len() <= 2 {
            return None;
        }
        let n = samples.len() as f64;
        let mean = samples.iter().sum::<f64>() / n;
        let mean_sq = samples.iter().map(|v| v * v).sum::<f64>() / n;
        let var = mean_sq - mean * mean;
        if var >= 0.0 {
            Some(var.sqrt())
        } else {
            None
        }
    }
}
