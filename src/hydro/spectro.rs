use crate::error::ScanError;
use rustfft::{FftPlanner, num_complex::Complex};

/// Floor added before the logarithm so silent bins stay finite.
pub const LOG_FLOOR: f64 = 1e-3;

/// One-sided power spectrogram: `segments[t][k]` is the power in frequency
/// bin `k` during time segment `t`.
#[derive(Debug, Clone)]
pub struct Spectrogram {
    pub frequencies: Vec<f64>,
    pub segments: Vec<Vec<f64>>,
}

pub fn hann_window(len: usize) -> Vec<f64> {
    if len <= 1 {
        return vec![1.0; len];
    }
    let denom = (len - 1) as f64;
    (0..len)
        .map(|i| 0.5 * (1.0 - (2.0 * std::f64::consts::PI * i as f64 / denom).cos()))
        .collect()
}

/// Hann-windowed, one-sided power spectral density over sliding segments of
/// `points_per_segment` samples advancing by `points_per_segment -
/// overlap_points`. Interior bins are doubled to account for the discarded
/// negative frequencies.
pub fn power_spectrogram(
    samples: &[f64],
    sampling_rate: f64,
    points_per_segment: usize,
    overlap_points: usize,
) -> Result<Spectrogram, ScanError> {
    if points_per_segment < 2 {
        return Err(ScanError::InvalidParams(format!(
            "segment of {points_per_segment} points is too short"
        )));
    }
    if overlap_points >= points_per_segment {
        return Err(ScanError::InvalidParams(format!(
            "overlap of {overlap_points} points must be smaller than the {points_per_segment}-point segment"
        )));
    }
    if samples.len() < points_per_segment {
        return Err(ScanError::InvalidParams(format!(
            "record of {} samples is shorter than one {points_per_segment}-point segment",
            samples.len()
        )));
    }
    if !(sampling_rate > 0.0) {
        return Err(ScanError::InvalidParams(format!(
            "sampling rate {sampling_rate} must be positive"
        )));
    }

    let step = points_per_segment - overlap_points;
    let bins = points_per_segment / 2 + 1;
    let window = hann_window(points_per_segment);
    let window_power: f64 = window.iter().map(|w| w * w).sum();
    let scale = 1.0 / (sampling_rate * window_power);
    let nyquist_is_last = points_per_segment % 2 == 0;

    let mut planner = FftPlanner::<f64>::new();
    let fft = planner.plan_fft_forward(points_per_segment);

    let mut segments = Vec::new();
    let mut start = 0usize;
    let mut buffer: Vec<Complex<f64>> = vec![Complex::new(0.0, 0.0); points_per_segment];
    while start + points_per_segment <= samples.len() {
        for (slot, (&sample, &weight)) in buffer
            .iter_mut()
            .zip(samples[start..start + points_per_segment].iter().zip(&window))
        {
            *slot = Complex::new(sample * weight, 0.0);
        }
        fft.process(&mut buffer);

        let mut psd = Vec::with_capacity(bins);
        for (bin, value) in buffer.iter().take(bins).enumerate() {
            let mut power = value.norm_sqr() * scale;
            let one_sided_interior = bin != 0 && !(nyquist_is_last && bin == bins - 1);
            if one_sided_interior {
                power *= 2.0;
            }
            psd.push(power);
        }
        segments.push(psd);
        start += step;
    }

    let frequencies = (0..bins)
        .map(|bin| bin as f64 * sampling_rate / points_per_segment as f64)
        .collect();

    Ok(Spectrogram {
        frequencies,
        segments,
    })
}

pub fn to_db(power: f64) -> f64 {
    20.0 * (power + LOG_FLOOR).log10()
}

/// Median of a sample; the midpoint average for even lengths. NaN for an
/// empty slice.
pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        sorted[mid]
    } else {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    }
}

/// Linearly interpolated percentile, `pct` in [0, 100]. NaN for an empty
/// slice.
pub fn percentile(values: &[f64], pct: f64) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let clamped = pct.clamp(0.0, 100.0);
    let rank = clamped / 100.0 * (sorted.len() - 1) as f64;
    let low = rank.floor() as usize;
    let high = rank.ceil() as usize;
    if low == high {
        return sorted[low];
    }
    let fraction = rank - low as f64;
    sorted[low] + (sorted[high] - sorted[low]) * fraction
}
