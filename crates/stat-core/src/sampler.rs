//! Adaptive per-key sampling engine.
//!
//! Every metric key owns a [`Bucket`]. A bucket starts out observing and
//! counts arrivals per flush window; once a window sees more than
//! `threshold` observations the bucket trips into the sampling state and
//! begins absorbing lines into windowed accumulators (plus, for timers, a
//! reservoir and running extrema). At flush time the accumulators are
//! reconstructed into synthetic lines whose `@rate` lets the downstream
//! collector recover the true totals. A window that closes at or below the
//! threshold drops the bucket back to observing, and observing buckets
//! idle past the TTL are expired.
//!
//! Admission is bounded: a key first seen while the map is at the
//! cardinality limit is refused with [`Verdict::Flagged`] and never
//! tracked, so map growth is capped no matter what clients send.

use std::collections::HashMap;

use anyhow::{bail, Result};

use crate::clock;
use crate::parse::{MetricType, ParsedLine, MAX_UDP_LENGTH};
use crate::reservoir::{Lcg48, Rand48, Reservoir};

/// Verdict returned by the `consider_*` family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Bucket is observing; the caller forwards the line unmodified.
    NotSampling,
    /// Line was absorbed; flush will emit a reconstruction.
    Sampling,
    /// Key refused (over cardinality); the caller decides bypass or drop.
    Flagged,
}

/// `upper` extremum sentinel: still at this value means "never set".
const UPPER_SENTINEL: f64 = f64::MIN_POSITIVE;
/// `lower` extremum sentinel.
const LOWER_SENTINEL: f64 = f64::MAX;

/// Initial key-map capacity; the real ceiling is the cardinality limit.
const INITIAL_MAP_CAPACITY: usize = 32768;

struct TimerState {
    upper: f64,
    lower: f64,
    upper_sample_rate: f64,
    lower_sample_rate: f64,
    reservoir: Reservoir,
}

impl TimerState {
    fn new(reservoir_size: usize) -> TimerState {
        TimerState {
            upper: UPPER_SENTINEL,
            lower: LOWER_SENTINEL,
            upper_sample_rate: 1.0,
            lower_sample_rate: 1.0,
            reservoir: Reservoir::new(reservoir_size),
        }
    }
}

enum BucketKind {
    Counter,
    Gauge,
    Timer(TimerState),
}

impl BucketKind {
    fn metric_type(&self) -> MetricType {
        match self {
            BucketKind::Counter => MetricType::Counter,
            BucketKind::Gauge => MetricType::Gauge,
            BucketKind::Timer(_) => MetricType::Timer,
        }
    }
}

/// Per-key aggregation state. The kind never changes after admission.
struct Bucket {
    kind: BucketKind,
    sampling: bool,
    /// Observations since the last window roll.
    last_window_count: u64,
    /// Sample-rate-compensated value accumulator (raw sum for timers).
    sum: f64,
    /// Sample-rate-compensated event count.
    count: f64,
    last_modified_at: u64,
}

impl Bucket {
    fn new(kind: BucketKind, now: u64) -> Bucket {
        Bucket {
            kind,
            sampling: false,
            last_window_count: 1,
            sum: 0.0,
            count: 0.0,
            last_modified_at: now,
        }
    }
}

/// Counts from one flush pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushSummary {
    /// Lines handed to the sink.
    pub lines: u64,
    /// Emissions skipped because the formatted line exceeded the datagram
    /// limit.
    pub oversize: u64,
}

pub struct Sampler {
    buckets: HashMap<Vec<u8>, Bucket>,
    threshold: u64,
    window: u64,
    cardinality: usize,
    reservoir_size: usize,
    flush_min_max: bool,
    expiry_ttl: u64,
    rng: Box<dyn Rand48>,
    /// Reusable flush scratch; aliased by the slices handed to the sink.
    scratch: Vec<u8>,
}

impl Sampler {
    pub fn new(
        threshold: i64,
        window: u64,
        cardinality: usize,
        reservoir_size: usize,
        flush_min_max: bool,
        expiry_ttl: u64,
    ) -> Result<Sampler> {
        if threshold < 0 {
            bail!("sampling threshold must be non-negative, got {}", threshold);
        }
        if window == 0 {
            bail!("flush window must be at least one second");
        }
        Ok(Sampler {
            buckets: HashMap::with_capacity(INITIAL_MAP_CAPACITY.min(cardinality)),
            threshold: threshold as u64,
            window,
            cardinality,
            reservoir_size,
            flush_min_max,
            expiry_ttl,
            rng: Box::new(Lcg48::from_time(clock::now_secs())),
            scratch: Vec::with_capacity(MAX_UDP_LENGTH),
        })
    }

    /// Swap the PRNG. Tests pin a seed to get deterministic reservoirs.
    pub fn set_rng(&mut self, rng: Box<dyn Rand48>) {
        self.rng = rng;
    }

    /// Flush cadence in seconds; the event loop arms its timer from this.
    pub fn window(&self) -> u64 {
        self.window
    }

    /// Number of tracked keys.
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// True only if the key is tracked with the same type and currently
    /// sampling.
    pub fn is_sampling(&self, key: &[u8], metric_type: MetricType) -> bool {
        self.buckets
            .get(key)
            .map_or(false, |b| b.sampling && b.kind.metric_type() == metric_type)
    }

    pub fn consider_counter(&mut self, parsed: &ParsedLine<'_>, now: u64) -> Verdict {
        let bucket = match touch(
            &mut self.buckets,
            parsed.key,
            MetricType::Counter,
            || BucketKind::Counter,
            self.threshold,
            self.cardinality,
            now,
        ) {
            Touched::Flagged => return Verdict::Flagged,
            Touched::New | Touched::Mismatch => return Verdict::NotSampling,
            Touched::Existing(b) => b,
        };
        if !bucket.sampling {
            return Verdict::NotSampling;
        }
        let s = effective_rate(parsed.presample);
        bucket.sum += parsed.value / s;
        bucket.count += 1.0 / s;
        Verdict::Sampling
    }

    pub fn consider_gauge(&mut self, parsed: &ParsedLine<'_>, now: u64) -> Verdict {
        let bucket = match touch(
            &mut self.buckets,
            parsed.key,
            MetricType::Gauge,
            || BucketKind::Gauge,
            self.threshold,
            self.cardinality,
            now,
        ) {
            Touched::Flagged => return Verdict::Flagged,
            Touched::New | Touched::Mismatch => return Verdict::NotSampling,
            Touched::Existing(b) => b,
        };
        if !bucket.sampling {
            return Verdict::NotSampling;
        }
        // Gauges carry instantaneous state; no pre-sampling compensation.
        bucket.sum += parsed.value;
        bucket.count += 1.0;
        Verdict::Sampling
    }

    pub fn consider_timer(&mut self, parsed: &ParsedLine<'_>, now: u64) -> Verdict {
        let reservoir_size = self.reservoir_size;
        let bucket = match touch(
            &mut self.buckets,
            parsed.key,
            MetricType::Timer,
            || BucketKind::Timer(TimerState::new(reservoir_size)),
            self.threshold,
            self.cardinality,
            now,
        ) {
            Touched::Flagged => return Verdict::Flagged,
            Touched::New | Touched::Mismatch => return Verdict::NotSampling,
            Touched::Existing(b) => b,
        };
        if !bucket.sampling {
            return Verdict::NotSampling;
        }

        let s = effective_rate(parsed.presample);
        // Accumulate before the extrema handling: a window whose only
        // observations become extrema still needs a nonzero count so the
        // extremum lines flush.
        bucket.count += 1.0 / s;
        bucket.sum += parsed.value;

        let BucketKind::Timer(timer) = &mut bucket.kind else {
            return Verdict::Sampling;
        };

        let mut value = parsed.value;
        if value > timer.upper {
            timer.upper_sample_rate = parsed.presample;
            if timer.upper == UPPER_SENTINEL {
                // First extremum is held out of the reservoir entirely.
                timer.upper = value;
                return Verdict::Sampling;
            }
            // Displaced previous maximum falls through to the reservoir.
            let displaced = timer.upper;
            timer.upper = value;
            value = displaced;
        }
        if value < timer.lower {
            timer.lower_sample_rate = parsed.presample;
            if timer.lower == LOWER_SENTINEL {
                timer.lower = value;
                return Verdict::Sampling;
            }
            let displaced = timer.lower;
            timer.lower = value;
            value = displaced;
        }
        timer
            .reservoir
            .offer(value, bucket.last_window_count, self.rng.as_mut());
        Verdict::Sampling
    }

    /// Emit reconstructions for every sampling bucket with observations,
    /// then roll every bucket's window.
    ///
    /// The line slice handed to `sink` aliases an internal scratch buffer
    /// that is overwritten on the next emission; the sink must consume it
    /// before returning.
    pub fn flush<F: FnMut(&[u8], &[u8])>(&mut self, sink: &mut F) -> FlushSummary {
        let mut scratch = std::mem::take(&mut self.scratch);
        let mut summary = FlushSummary::default();
        let threshold = self.threshold;
        let flush_min_max = self.flush_min_max;

        for (key, bucket) in self.buckets.iter_mut() {
            if bucket.sampling && bucket.count > 0.0 {
                match &mut bucket.kind {
                    BucketKind::Counter => {
                        emit(
                            &mut scratch,
                            &mut summary,
                            sink,
                            key,
                            bucket.sum / bucket.count,
                            "c",
                            Some(1.0 / bucket.count),
                        );
                    }
                    BucketKind::Gauge => {
                        emit(
                            &mut scratch,
                            &mut summary,
                            sink,
                            key,
                            bucket.sum / bucket.count,
                            "g",
                            None,
                        );
                    }
                    BucketKind::Timer(timer) => {
                        if flush_min_max && timer.upper > UPPER_SENTINEL {
                            emit(
                                &mut scratch,
                                &mut summary,
                                sink,
                                key,
                                timer.upper,
                                "ms",
                                Some(timer.upper_sample_rate),
                            );
                        }
                        if flush_min_max && timer.lower < LOWER_SENTINEL {
                            emit(
                                &mut scratch,
                                &mut summary,
                                sink,
                                key,
                                timer.lower,
                                "ms",
                                Some(timer.lower_sample_rate),
                            );
                        }
                        timer.upper = UPPER_SENTINEL;
                        timer.lower = LOWER_SENTINEL;

                        let occupied = timer.reservoir.occupied();
                        if occupied > 0 {
                            let rate = occupied as f64 / bucket.count;
                            for j in 0..timer.reservoir.capacity() {
                                if let Some(v) = timer.reservoir.take(j) {
                                    emit(
                                        &mut scratch,
                                        &mut summary,
                                        sink,
                                        key,
                                        v,
                                        "ms",
                                        Some(rate),
                                    );
                                }
                            }
                        }
                    }
                }
                bucket.sum = 0.0;
                bucket.count = 0.0;
            }
            roll_window(key, bucket, threshold);
        }

        self.scratch = scratch;
        summary
    }

    /// Drop observing buckets idle past the TTL. Sampling buckets are never
    /// expired; they must first fall out of sampling on a window roll.
    pub fn expire(&mut self, now: u64) -> usize {
        let ttl = self.expiry_ttl;
        let before = self.buckets.len();
        self.buckets.retain(|key, bucket| {
            let stale =
                !bucket.sampling && now.saturating_sub(bucket.last_modified_at) > ttl;
            if stale {
                tracing::debug!(
                    key = %String::from_utf8_lossy(key),
                    idle = now.saturating_sub(bucket.last_modified_at),
                    "expiring idle bucket"
                );
            }
            !stale
        });
        before - self.buckets.len()
    }
}

enum Touched<'a> {
    Existing(&'a mut Bucket),
    New,
    Flagged,
    /// Key already tracked under a different metric type; leave it alone.
    Mismatch,
}

/// Admission and window accounting shared by the `consider_*` family.
fn touch<'a>(
    buckets: &'a mut HashMap<Vec<u8>, Bucket>,
    key: &[u8],
    expected: MetricType,
    make_kind: impl FnOnce() -> BucketKind,
    threshold: u64,
    cardinality: usize,
    now: u64,
) -> Touched<'a> {
    if !buckets.contains_key(key) {
        if buckets.len() >= cardinality {
            return Touched::Flagged;
        }
        buckets.insert(key.to_vec(), Bucket::new(make_kind(), now));
        return Touched::New;
    }
    let Some(bucket) = buckets.get_mut(key) else {
        return Touched::New;
    };
    if bucket.kind.metric_type() != expected {
        return Touched::Mismatch;
    }
    bucket.last_modified_at = now;
    bucket.last_window_count += 1;
    if !bucket.sampling && bucket.last_window_count > threshold {
        bucket.sampling = true;
        // The window count restarts with the tripping observation, so the
        // next roll judges the bucket on post-transition volume only.
        bucket.last_window_count = 1;
        tracing::debug!(
            key = %String::from_utf8_lossy(key),
            threshold,
            "bucket entering sampling"
        );
    }
    Touched::Existing(bucket)
}

/// Post-flush window roll: re-arm or leave the sampling state, then zero
/// the window counter.
fn roll_window(key: &[u8], bucket: &mut Bucket, threshold: u64) {
    if bucket.last_window_count > threshold {
        bucket.sampling = true;
    } else if bucket.sampling {
        bucket.sampling = false;
        if let BucketKind::Timer(timer) = &mut bucket.kind {
            timer.reservoir.reset_fill();
        }
        tracing::debug!(
            key = %String::from_utf8_lossy(key),
            window_count = bucket.last_window_count,
            "bucket leaving sampling"
        );
    }
    bucket.last_window_count = 0;
}

/// Effective pre-sampling rate: anything outside (0, 1) means "not
/// client-sampled" and compensates as 1.
fn effective_rate(presample: f64) -> f64 {
    if presample > 0.0 && presample < 1.0 {
        presample
    } else {
        1.0
    }
}

fn emit<F: FnMut(&[u8], &[u8])>(
    scratch: &mut Vec<u8>,
    summary: &mut FlushSummary,
    sink: &mut F,
    key: &[u8],
    value: f64,
    tag: &str,
    rate: Option<f64>,
) {
    use std::io::Write;

    scratch.clear();
    scratch.extend_from_slice(key);
    scratch.push(b':');
    match rate {
        Some(r) => {
            let _ = write!(scratch, "{}|{}@{}", fmt_g(value), tag, fmt_g(r));
        }
        None => {
            let _ = write!(scratch, "{}|{}", fmt_g(value), tag);
        }
    }
    if scratch.len() > MAX_UDP_LENGTH {
        summary.oversize += 1;
        tracing::warn!(
            key = %String::from_utf8_lossy(key),
            len = scratch.len(),
            "flush line exceeds datagram limit, skipping"
        );
        return;
    }
    summary.lines += 1;
    sink(key, scratch.as_slice());
}

/// Format a double the way C's `%g` does at its default precision: six
/// significant digits, trailing zeros stripped, switching to exponent
/// notation outside [1e-4, 1e6).
pub fn fmt_g(v: f64) -> String {
    if v == 0.0 {
        return if v.is_sign_negative() { "-0".into() } else { "0".into() };
    }
    if v.is_nan() {
        return "nan".into();
    }
    if v.is_infinite() {
        return if v < 0.0 { "-inf".into() } else { "inf".into() };
    }

    // Decimal exponent after rounding to six significant digits: format
    // once in scientific notation and read it back.
    let sci = format!("{:.5e}", v);
    let Some((mantissa, exp_str)) = sci.split_once('e') else {
        return sci;
    };
    let exp: i32 = exp_str.parse().unwrap_or(0);

    if (-4..6).contains(&exp) {
        let prec = (5 - exp).max(0) as usize;
        trim_fraction(format!("{:.*}", prec, v))
    } else {
        format!(
            "{}e{}{:02}",
            trim_fraction(mantissa.to_string()),
            if exp < 0 { '-' } else { '+' },
            exp.abs()
        )
    }
}

fn trim_fraction(s: String) -> String {
    if !s.contains('.') {
        return s;
    }
    s.trim_end_matches('0').trim_end_matches('.').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reservoir::SeqRand;

    fn parsed(key: &[u8], value: f64, metric_type: MetricType, presample: f64) -> ParsedLine<'_> {
        ParsedLine {
            key,
            value,
            metric_type,
            presample,
        }
    }

    fn counter(key: &[u8], value: f64) -> ParsedLine<'_> {
        parsed(key, value, MetricType::Counter, 1.0)
    }

    fn timer(key: &[u8], value: f64) -> ParsedLine<'_> {
        parsed(key, value, MetricType::Timer, 1.0)
    }

    fn sampler(threshold: i64, reservoir: usize, flush_min_max: bool) -> Sampler {
        let mut s = Sampler::new(threshold, 10, 32768, reservoir, flush_min_max, 300)
            .expect("valid config");
        s.set_rng(Box::new(Lcg48::with_seed(42)));
        s
    }

    fn collect_flush(s: &mut Sampler) -> Vec<String> {
        let mut lines = Vec::new();
        s.flush(&mut |_key, line| lines.push(String::from_utf8_lossy(line).into_owned()));
        lines
    }

    #[test]
    fn test_new_rejects_negative_threshold() {
        assert!(Sampler::new(-1, 10, 32768, 100, false, 300).is_err());
    }

    #[test]
    fn test_counter_threshold_transition_and_flush() {
        let mut s = sampler(2, 100, false);
        let now = 1000;

        assert_eq!(s.consider_counter(&counter(b"foo", 1.0), now), Verdict::NotSampling);
        assert_eq!(s.consider_counter(&counter(b"foo", 1.0), now), Verdict::NotSampling);
        assert_eq!(s.consider_counter(&counter(b"foo", 1.0), now), Verdict::Sampling);
        assert!(s.is_sampling(b"foo", MetricType::Counter));

        let lines = collect_flush(&mut s);
        assert_eq!(lines, vec!["foo:1|c@1"]);

        // One post-transition observation is below the threshold, so the
        // roll drops the bucket back to observing.
        assert!(!s.is_sampling(b"foo", MetricType::Counter));
    }

    #[test]
    fn test_counter_presample_compensation() {
        let mut s = sampler(0, 100, false);
        let now = 1000;

        // threshold 0: the second observation trips sampling.
        assert_eq!(s.consider_counter(&counter(b"c", 1.0), now), Verdict::NotSampling);
        for _ in 0..4 {
            let p = parsed(b"c", 1.0, MetricType::Counter, 0.5);
            assert_eq!(s.consider_counter(&p, now), Verdict::Sampling);
        }

        // Each @0.5 observation contributes value 2 and count 2:
        // sum = 8, count = 8, so value 1 at rate 1/8. Expanding
        // (1 / (1/8)) recovers the true total of 8 raw events.
        let lines = collect_flush(&mut s);
        assert_eq!(lines, vec!["c:1|c@0.125"]);
    }

    #[test]
    fn test_gauge_flush_has_no_rate() {
        let mut s = sampler(1, 100, false);
        let now = 1000;
        let g = |v| parsed(b"mem", v, MetricType::Gauge, 1.0);

        assert_eq!(s.consider_gauge(&g(10.0), now), Verdict::NotSampling);
        assert_eq!(s.consider_gauge(&g(20.0), now), Verdict::Sampling);
        assert_eq!(s.consider_gauge(&g(30.0), now), Verdict::Sampling);

        // Mean of the absorbed values only (20, 30).
        let lines = collect_flush(&mut s);
        assert_eq!(lines, vec!["mem:25|g"]);
    }

    #[test]
    fn test_timer_extrema_and_min_max_flush() {
        let mut s = sampler(2, 2, true);
        let now = 1000;

        assert_eq!(s.consider_timer(&timer(b"lat", 10.0), now), Verdict::NotSampling);
        assert_eq!(s.consider_timer(&timer(b"lat", 20.0), now), Verdict::NotSampling);
        // Trips sampling; 30 becomes the held maximum, not a reservoir entry.
        assert_eq!(s.consider_timer(&timer(b"lat", 30.0), now), Verdict::Sampling);
        // 5 becomes the held minimum.
        assert_eq!(s.consider_timer(&timer(b"lat", 5.0), now), Verdict::Sampling);

        let lines = collect_flush(&mut s);
        assert_eq!(lines, vec!["lat:30|ms@1", "lat:5|ms@1"]);
    }

    #[test]
    fn test_timer_reservoir_lines_carry_aggregate_rate() {
        let mut s = sampler(2, 2, true);
        let now = 1000;

        for v in [10.0, 20.0, 30.0, 5.0] {
            s.consider_timer(&timer(b"lat", v), now);
        }
        // Neither extremum moves; both land in the reservoir fill slots.
        assert_eq!(s.consider_timer(&timer(b"lat", 15.0), now), Verdict::Sampling);
        assert_eq!(s.consider_timer(&timer(b"lat", 25.0), now), Verdict::Sampling);

        // count = 4 sampled observations, 2 occupied slots: rate 0.5.
        let lines = collect_flush(&mut s);
        assert_eq!(
            lines,
            vec!["lat:30|ms@1", "lat:5|ms@1", "lat:15|ms@0.5", "lat:25|ms@0.5"]
        );
    }

    #[test]
    fn test_timer_displaced_maximum_enters_reservoir() {
        let mut s = sampler(1, 4, true);
        let now = 1000;

        s.consider_timer(&timer(b"t", 10.0), now);
        // Trips sampling; 20 held as maximum.
        s.consider_timer(&timer(b"t", 20.0), now);
        // 40 displaces 20; 20 falls through, becomes the held minimum.
        s.consider_timer(&timer(b"t", 40.0), now);
        // 50 displaces 40; 40 is above the minimum, so it lands in a slot.
        s.consider_timer(&timer(b"t", 50.0), now);

        let lines = collect_flush(&mut s);
        // count = 3, one occupied slot: rate 1/3.
        assert_eq!(
            lines,
            vec!["t:50|ms@1", "t:20|ms@1", "t:40|ms@0.333333"]
        );
    }

    #[test]
    fn test_timer_extrema_reset_even_without_min_max_flush() {
        let mut s = sampler(1, 2, false);
        let now = 1000;

        s.consider_timer(&timer(b"t", 10.0), now);
        s.consider_timer(&timer(b"t", 20.0), now);
        s.consider_timer(&timer(b"t", 5.0), now);

        // Extremum lines suppressed; only reservoir contents go out.
        let lines = collect_flush(&mut s);
        assert!(lines.is_empty());

        // Next window starts from clean sentinels: a smaller maximum is
        // still accepted as the new held extremum.
        s.consider_timer(&timer(b"t", 2.0), now);
        s.consider_timer(&timer(b"t", 3.0), now);
        assert!(s.is_sampling(b"t", MetricType::Timer));
    }

    #[test]
    fn test_timer_replacement_uses_window_count_modulus() {
        let mut s = sampler(0, 1, false);
        let now = 1000;

        s.consider_timer(&timer(b"t", 10.0), now);
        // Sampling from here. 20 held max, 5 held min, 7 fills slot 0.
        s.consider_timer(&timer(b"t", 20.0), now);
        s.consider_timer(&timer(b"t", 5.0), now);
        s.consider_timer(&timer(b"t", 7.0), now);
        // Replacement draws r = 4: window count is 4, k = 0, so slot 0
        // becomes 8. Then r = 3: window count 5, k = 3 >= 1, 9 discarded.
        s.set_rng(Box::new(SeqRand { values: vec![4, 3], at: 0 }));
        s.consider_timer(&timer(b"t", 8.0), now);
        s.consider_timer(&timer(b"t", 9.0), now);

        let lines = collect_flush(&mut s);
        // 5 sampled observations, 1 slot: rate 0.2.
        assert_eq!(lines, vec!["t:8|ms@0.2"]);
    }

    #[test]
    fn test_flush_zeroes_accumulators_and_keeps_sticky_sampling() {
        let mut s = sampler(1, 100, false);
        let now = 1000;

        for _ in 0..4 {
            s.consider_counter(&counter(b"hot", 2.0), now);
        }
        assert_eq!(collect_flush(&mut s), vec!["hot:2|c@0.333333"]);
        // Window had 3 post-transition observations > threshold 1: sticky.
        assert!(s.is_sampling(b"hot", MetricType::Counter));

        // Nothing absorbed since the flush: the next flush emits nothing
        // for this key but still rolls the window, ending the episode.
        assert!(collect_flush(&mut s).is_empty());
        assert!(!s.is_sampling(b"hot", MetricType::Counter));
    }

    #[test]
    fn test_cardinality_limit_flags_new_keys() {
        let mut s = Sampler::new(2, 10, 1, 100, false, 300).expect("valid config");
        let now = 1000;

        assert_eq!(s.consider_counter(&counter(b"a", 1.0), now), Verdict::NotSampling);
        assert_eq!(s.consider_counter(&counter(b"b", 1.0), now), Verdict::Flagged);
        assert_eq!(s.len(), 1);
        // Existing keys keep working at the limit.
        assert_eq!(s.consider_counter(&counter(b"a", 1.0), now), Verdict::NotSampling);
    }

    #[test]
    fn test_type_mismatch_leaves_bucket_alone() {
        let mut s = sampler(0, 100, false);
        let now = 1000;

        s.consider_counter(&counter(b"k", 1.0), now);
        assert_eq!(s.consider_timer(&timer(b"k", 1.0), now), Verdict::NotSampling);
        assert!(!s.is_sampling(b"k", MetricType::Timer));
        assert_eq!(s.len(), 1);
    }

    #[test]
    fn test_expire_skips_sampling_buckets() {
        let mut s = sampler(1, 100, false);

        s.consider_counter(&counter(b"idle", 1.0), 1000);
        for _ in 0..3 {
            s.consider_counter(&counter(b"hot", 1.0), 1000);
        }
        assert!(s.is_sampling(b"hot", MetricType::Counter));

        // Both idle past the TTL (300), but the sampling bucket survives.
        assert_eq!(s.expire(2000), 1);
        assert_eq!(s.len(), 1);
        assert!(s.is_sampling(b"hot", MetricType::Counter));

        // After it falls out of sampling, expiry may take it.
        collect_flush(&mut s);
        collect_flush(&mut s);
        assert!(!s.is_sampling(b"hot", MetricType::Counter));
        assert_eq!(s.expire(2000), 1);
        assert!(s.is_empty());
    }

    #[test]
    fn test_expire_respects_ttl_boundary() {
        let mut s = sampler(10, 100, false);
        s.consider_counter(&counter(b"k", 1.0), 1000);
        // Idle exactly ttl seconds is not yet stale.
        assert_eq!(s.expire(1300), 0);
        assert_eq!(s.expire(1301), 1);
    }

    #[test]
    fn test_oversize_emission_is_skipped_and_counted() {
        let mut s = sampler(0, 100, false);
        let now = 1000;
        let long_key = vec![b'k'; MAX_UDP_LENGTH];

        s.consider_counter(&counter(&long_key, 1.0), now);
        s.consider_counter(&counter(&long_key, 1.0), now);
        s.consider_counter(&counter(b"ok", 1.0), now);
        s.consider_counter(&counter(b"ok", 1.0), now);

        let mut lines = Vec::new();
        let summary =
            s.flush(&mut |_key, line| lines.push(String::from_utf8_lossy(line).into_owned()));
        assert_eq!(summary.oversize, 1);
        assert_eq!(summary.lines, 1);
        assert_eq!(lines, vec!["ok:1|c@1"]);
    }

    #[test]
    fn test_fmt_g_matches_c_defaults() {
        assert_eq!(fmt_g(0.0), "0");
        assert_eq!(fmt_g(1.0), "1");
        assert_eq!(fmt_g(42.0), "42");
        assert_eq!(fmt_g(0.2), "0.2");
        assert_eq!(fmt_g(2.5), "2.5");
        assert_eq!(fmt_g(-3.5), "-3.5");
        assert_eq!(fmt_g(1.0 / 3.0), "0.333333");
        assert_eq!(fmt_g(123456.7), "123457");
        assert_eq!(fmt_g(1234567.0), "1.23457e+06");
        assert_eq!(fmt_g(0.0001), "0.0001");
        assert_eq!(fmt_g(0.00001), "1e-05");
        assert_eq!(fmt_g(999999.6), "1e+06");
    }
}
