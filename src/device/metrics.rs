//! Performance metrics for deflate engines

use std::fmt;

/// Staging-window residency of the accelerator.
///
/// Each request starts by evicting the whole window, so every page a request
/// needs faults once and is a hit for the rest of that request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResidencyMetrics {
    /// Requests run, each on a freshly evicted window
    pub requests: u64,

    /// Resident pages dropped by those evictions
    pub evicted: u64,

    /// Page touches that found the page resident
    pub hits: u64,

    /// Page touches that had to fault
    pub misses: u64,
}

impl ResidencyMetrics {
    /// Share of page touches served without a fault
    pub fn hit_ratio(&self) -> f32 {
        let total = self.hits + self.misses;
        if total > 0 {
            self.hits as f32 / total as f32
        } else {
            0.0
        }
    }

    /// Faulting touches per request
    pub fn misses_per_request(&self) -> f32 {
        if self.requests > 0 {
            self.misses as f32 / self.requests as f32
        } else {
            0.0
        }
    }
}

/// Counters kept by every engine
#[derive(Debug, Clone, Default)]
pub struct EngineMetrics {
    /// Codec steps executed
    pub jobs: u64,

    /// Bytes consumed by the codec
    pub bytes_in: u64,

    /// Bytes produced by the codec
    pub bytes_out: u64,

    /// Output/input ratio
    pub ratio: f32,

    /// Faults dispatched through the fault chain
    pub faults_raised: u64,

    /// Faults the chain resolved
    pub faults_resolved: u64,

    pub residency: ResidencyMetrics,
}

impl EngineMetrics {
    /// Account one step
    pub fn record_step(&mut self, consumed: u64, produced: u64) {
        self.jobs += 1;
        self.bytes_in += consumed;
        self.bytes_out += produced;
    }

    /// Calculate output/input ratio
    pub fn calculate_ratio(&mut self) {
        self.ratio = if self.bytes_in > 0 {
            self.bytes_out as f32 / self.bytes_in as f32
        } else {
            1.0
        };
    }
}

impl fmt::Display for EngineMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Engine Metrics:\n\
            Jobs: {}\n\
            Consumed: {} bytes\n\
            Produced: {} bytes\n\
            Ratio: {:.2}\n\
            Faults: {} raised, {} resolved\n\
            Residency: {} requests, {} pages evicted, {:.1} misses/request, {:.2}% hits",
            self.jobs,
            self.bytes_in,
            self.bytes_out,
            self.ratio,
            self.faults_raised,
            self.faults_resolved,
            self.residency.requests,
            self.residency.evicted,
            self.residency.misses_per_request(),
            self.residency.hit_ratio() * 100.0
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ratios() {
        let mut metrics = EngineMetrics::default();
        metrics.calculate_ratio();
        assert_eq!(metrics.ratio, 1.0);

        metrics.record_step(1000, 250);
        metrics.calculate_ratio();
        assert_eq!(metrics.jobs, 1);
        assert!((metrics.ratio - 0.25).abs() < f32::EPSILON);

        assert_eq!(metrics.residency.hit_ratio(), 0.0);
        metrics.residency = ResidencyMetrics {
            requests: 2,
            evicted: 5,
            hits: 9,
            misses: 3,
        };
        assert!((metrics.residency.hit_ratio() - 0.75).abs() < f32::EPSILON);
        assert!((metrics.residency.misses_per_request() - 1.5).abs() < f32::EPSILON);
        assert!(metrics
            .to_string()
            .contains("Residency: 2 requests, 5 pages evicted, 1.5 misses/request, 75.00% hits"));
    }
}
