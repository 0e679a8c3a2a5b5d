//! Read-only projections of vibration feature rows into chartable series.

use crate::models::FeatureRow;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Time-domain statistics, `(short name, backend field)`.
pub const TIME_DOMAIN_FEATURES: [(&str, &str); 12] = [
    ("rms", "timeRms"),
    ("skewness", "timeSkewness"),
    ("kurtosis", "timeKurtosis"),
    ("crestFactor", "timeCrestFactor"),
    ("shapeFactor", "timeShapeFactor"),
    ("mean", "timeMean"),
    ("std", "timeStd"),
    ("peak", "timePeak"),
    ("meanDiff", "timeMeanDiff"),
    ("stdDiff", "timeStdDiff"),
    ("minDiff", "timeMinDiff"),
    ("maxDiff", "timeMaxDiff"),
];

pub const FFT_FEATURES: [(&str, &str); 9] = [
    ("centroid", "fftCentroid"),
    ("bandwidth", "fftBandwidth"),
    ("peakFreq", "fftPeakFreq"),
    ("overEnv", "fftOverEnv"),
    ("amp1x", "fftAmp1x"),
    ("amp2x", "fftAmp2x"),
    ("amp3x", "fftAmp3x"),
    ("amp4x", "fftAmp4x"),
    ("amp5x", "fftAmp5x"),
];

/// Detail coefficient levels of the wavelet decomposition (`cD1`..`cD7`).
pub const WAVELET_LEVELS: u8 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureGroup {
    Time,
    Fft,
    Wavelet,
}

impl FromStr for FeatureGroup {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "time" | "time-domain" => Ok(FeatureGroup::Time),
            "fft" | "frequency" => Ok(FeatureGroup::Fft),
            "wavelet" | "dwt" => Ok(FeatureGroup::Wavelet),
            other => Err(format!("unknown feature group {other:?}")),
        }
    }
}

impl fmt::Display for FeatureGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeatureGroup::Time => f.write_str("time"),
            FeatureGroup::Fft => f.write_str("fft"),
            FeatureGroup::Wavelet => f.write_str("wavelet"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureSeries {
    pub name: &'static str,
    pub values: Vec<Option<f64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WaveletBand {
    pub band: String,
    pub rms: Vec<Option<f64>>,
    pub kurtosis: Vec<Option<f64>>,
}

/// Oldest row first: by timestamp when the backend sends one, then by id.
pub fn sort_chronologically(rows: &mut [FeatureRow]) {
    rows.sort_by(|a, b| a.ts.cmp(&b.ts).then(a.id.cmp(&b.id)));
}

pub fn series(rows: &[FeatureRow], feature: &str) -> Vec<Option<f64>> {
    rows.iter().map(|row| row.value(feature)).collect()
}

fn named_series(rows: &[FeatureRow], table: &[(&'static str, &'static str)]) -> Vec<FeatureSeries> {
    table
        .iter()
        .map(|&(name, field)| FeatureSeries {
            name,
            values: series(rows, field),
        })
        .collect()
}

pub fn time_domain(rows: &[FeatureRow]) -> Vec<FeatureSeries> {
    named_series(rows, &TIME_DOMAIN_FEATURES)
}

pub fn fft(rows: &[FeatureRow]) -> Vec<FeatureSeries> {
    named_series(rows, &FFT_FEATURES)
}

pub fn wavelet(rows: &[FeatureRow]) -> Vec<WaveletBand> {
    (1..=WAVELET_LEVELS)
        .map(|level| {
            let band = format!("cD{level}");
            WaveletBand {
                rms: series(rows, &format!("{band}Rms")),
                kurtosis: series(rows, &format!("{band}Kurtosis")),
                band,
            }
        })
        .collect()
}
