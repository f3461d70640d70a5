/// Network-adjusted time from peer clock samples.
///
/// Each connected peer contributes one sample (its advertised time minus our
/// clock). The median of the samples is applied as an offset, unless it is
/// implausibly large.
use std::collections::{HashSet, VecDeque};
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use tracing::{debug, warn};

/// Maximum number of samples retained.
pub const MAX_ALLOWED_SAMPLES: usize = 200;

/// Offsets beyond this are ignored.
pub const MAX_ALLOWED_OFFSET_SECS: i64 = 70 * 60;

/// Samples needed before an offset is applied.
pub const MIN_SAMPLES: usize = 5;

#[derive(Debug, Default)]
struct Samples {
    sources: HashSet<String>,
    // Oldest first; `sources` holds exactly the ids present here.
    offsets: VecDeque<(String, i64)>,
    offset: i64,
}

#[derive(Debug, Default)]
pub struct MedianTime {
    samples: Mutex<Samples>,
}

impl MedianTime {
    pub fn new() -> Self {
        Self::default()
    }

    fn local_now() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or_default()
    }

    /// Record the time advertised by `source`. Repeated sources are ignored.
    pub fn add_time_sample(&self, source: &str, remote_secs: u64) {
        self.add_sample_at(source, remote_secs, Self::local_now());
    }

    fn add_sample_at(&self, source: &str, remote_secs: u64, local_secs: i64) {
        let Some(offset) = i64::try_from(remote_secs)
            .ok()
            .and_then(|remote| remote.checked_sub(local_secs))
        else {
            debug!(source, remote_secs, "Ignoring out of range time sample");
            return;
        };

        let mut samples = self.samples.lock();
        if !samples.sources.insert(source.to_owned()) {
            return;
        }

        if samples.offsets.len() == MAX_ALLOWED_SAMPLES {
            if let Some((evicted, _)) = samples.offsets.pop_front() {
                samples.sources.remove(&evicted);
            }
        }
        samples.offsets.push_back((source.to_owned(), offset));

        if samples.offsets.len() < MIN_SAMPLES {
            return;
        }

        let mut sorted: Vec<i64> = samples.offsets.iter().map(|(_, offset)| *offset).collect();
        sorted.sort_unstable();
        let median = sorted[sorted.len() / 2];

        if median.unsigned_abs() > MAX_ALLOWED_OFFSET_SECS.unsigned_abs() {
            warn!(median, "Ignoring implausible network time offset");
            samples.offset = 0;
        } else {
            samples.offset = median;
        }
        debug!(source, offset, median = samples.offset, "Added time sample");
    }

    /// Current median offset in seconds.
    pub fn offset(&self) -> i64 {
        self.samples.lock().offset
    }

    /// Local time adjusted by the median offset.
    pub fn adjusted_time(&self) -> i64 {
        Self::local_now().saturating_add(self.offset())
    }
}
