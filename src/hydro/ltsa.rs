use crate::error::ScanError;
use crate::hydro::loader::RecordLoader;
use crate::hydro::spectro::{self, median, to_db};
use crate::hydro::store::IndexEntry;
use chrono::NaiveDateTime;
use serde::Serialize;

/// One recording reduced to a single spectrum: the per-bin median of its
/// dB-scaled spectrogram.
#[derive(Debug, Clone, Serialize)]
pub struct SpectralRow {
    pub start_time: NaiveDateTime,
    pub power_db: Vec<f64>,
}

/// The long-term spectral average: one row per input entry, in input order,
/// all rows sharing the frequency-bin vector of the first entry.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LtsaMatrix {
    pub frequency_bins: Vec<f64>,
    pub rows: Vec<SpectralRow>,
}

#[derive(Debug, Clone, Copy)]
pub struct LtsaParams {
    pub segment_seconds: f64,
    pub percent_overlap: f64,
    pub decimation_factor: Option<u32>,
}

/// Build the LTSA matrix for `entries`, in order.
///
/// The first entry's post-decimation sampling rate fixes the segment length
/// for the whole run; all entries are assumed to share a common native rate,
/// and a mismatch in a later entry is not detected. A loader failure for any
/// entry aborts the run.
pub fn build_ltsa(
    entries: &[IndexEntry],
    loader: &dyn RecordLoader,
    params: &LtsaParams,
) -> Result<LtsaMatrix, ScanError> {
    if !(params.segment_seconds > 0.0) {
        return Err(ScanError::InvalidParams(format!(
            "segment seconds {} must be positive",
            params.segment_seconds
        )));
    }
    if !(0.0..100.0).contains(&params.percent_overlap) {
        return Err(ScanError::InvalidParams(format!(
            "percent overlap {} must be in [0, 100)",
            params.percent_overlap
        )));
    }

    let mut matrix = LtsaMatrix {
        frequency_bins: Vec::new(),
        rows: Vec::with_capacity(entries.len()),
    };
    let Some(first) = entries.first() else {
        return Ok(matrix);
    };

    let sized = loader.load(first, params.decimation_factor)?;
    let points_per_segment = (params.segment_seconds * sized.sampling_rate).floor() as usize;
    if points_per_segment == 0 {
        return Err(ScanError::InvalidParams(format!(
            "segment of {}s holds no samples at {} Hz",
            params.segment_seconds, sized.sampling_rate
        )));
    }
    let overlap_points =
        (points_per_segment as f64 * params.percent_overlap / 100.0).floor() as usize;

    for entry in entries {
        let record = loader.load(entry, params.decimation_factor)?;
        let spectrogram = spectro::power_spectrogram(
            &record.samples,
            record.sampling_rate,
            points_per_segment,
            overlap_points,
        )?;

        if matrix.frequency_bins.is_empty() {
            matrix.frequency_bins = spectrogram.frequencies.clone();
        }

        let bins = spectrogram.frequencies.len();
        let power_db: Vec<f64> = (0..bins)
            .map(|bin| {
                let column: Vec<f64> = spectrogram
                    .segments
                    .iter()
                    .map(|segment| to_db(segment[bin]))
                    .collect();
                median(&column)
            })
            .collect();

        matrix.rows.push(SpectralRow {
            start_time: entry.start_time,
            power_db,
        });
    }

    Ok(matrix)
}

/// The 5th and 95th percentile of all dB values in the matrix; the useful
/// display range when the matrix is plotted downstream.
pub fn dynamic_range_db(matrix: &LtsaMatrix) -> Option<(f64, f64)> {
    let all: Vec<f64> = matrix
        .rows
        .iter()
        .flat_map(|row| row.power_db.iter().copied())
        .collect();
    if all.is_empty() {
        return None;
    }
    Some((
        spectro::percentile(&all, 5.0),
        spectro::percentile(&all, 95.0),
    ))
}
