//! 音訊能量峰值分析
//!
//! 以固定速率（預設每秒 10 個樣本）計算波形的平均絕對振幅，
//! 正規化到 [0, 1] 後做移動平均，再找出高於 `平均 + k × 標準差` 的局部極大值。

use super::summary::AudioPeak;
use crate::error::AnalysisResult;
use crate::tools::{PcmBuffer, format_timestamp};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnergyConfig {
    /// 每秒能量樣本數
    pub energy_rate: u32,
    /// 平滑視窗（秒）
    pub window_size: f64,
    pub std_multiplier: f64,
}

impl Default for EnergyConfig {
    fn default() -> Self {
        Self {
            energy_rate: 10,
            window_size: 1.0,
            std_multiplier: 1.5,
        }
    }
}

impl EnergyConfig {
    /// 平滑視窗寬度（樣本數），至少為 1
    #[must_use]
    pub fn smoothing_width(&self) -> usize {
        let width = (self.window_size * f64::from(self.energy_rate)).round();
        if width.is_finite() && width >= 1.0 {
            width as usize
        } else {
            1
        }
    }
}

/// 逐樣本累加的能量計算
///
/// 每 `1 / energy_rate` 秒一塊，記錄每塊的平均絕對振幅，不保留原始波形。
/// 設定長度上限後，超過上限的樣本不再計入。
#[derive(Debug, Clone)]
pub struct EnergyAccumulator {
    sample_rate: u32,
    chunk_len: usize,
    sum: f64,
    filled: usize,
    samples_seen: u64,
    max_samples: Option<u64>,
    series: Vec<f64>,
}

impl EnergyAccumulator {
    #[must_use]
    pub fn new(sample_rate: u32, energy_rate: u32) -> Self {
        let chunk_len = if sample_rate == 0 || energy_rate == 0 {
            0
        } else {
            ((f64::from(sample_rate) / f64::from(energy_rate)).round() as usize).max(1)
        };
        Self {
            sample_rate,
            chunk_len,
            sum: 0.0,
            filled: 0,
            samples_seen: 0,
            max_samples: None,
            series: Vec::new(),
        }
    }

    /// 只計入前 `seconds` 秒的樣本
    #[must_use]
    pub fn with_limit(mut self, seconds: f64) -> Self {
        let limit = (seconds.max(0.0) * f64::from(self.sample_rate)).ceil();
        self.max_samples = Some(if limit.is_finite() { limit as u64 } else { u64::MAX });
        self
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.chunk_len == 0 || self.max_samples.is_some_and(|max| self.samples_seen >= max)
    }

    pub fn push(&mut self, sample: f32) {
        if self.is_full() {
            return;
        }
        self.sum += f64::from(sample.abs());
        self.filled += 1;
        self.samples_seen += 1;
        if self.filled == self.chunk_len {
            self.flush();
        }
    }

    fn flush(&mut self) {
        if self.filled > 0 {
            self.series.push(self.sum / self.filled as f64);
        }
        self.sum = 0.0;
        self.filled = 0;
    }

    /// 已計入樣本的長度（秒）
    #[must_use]
    pub fn duration_seconds(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples_seen as f64 / f64::from(self.sample_rate)
    }

    /// 結束累加，回傳能量序列與實際計入的長度（秒）
    ///
    /// 最後一塊不足長度時以實際樣本數平均。
    #[must_use]
    pub fn finish(mut self) -> (Vec<f64>, f64) {
        self.flush();
        let duration = self.duration_seconds();
        (self.series, duration)
    }
}

/// 將波形切成每 `1 / energy_rate` 秒一塊，回傳每塊的平均絕對振幅
#[must_use]
pub fn energy_series(pcm: &PcmBuffer, energy_rate: u32) -> Vec<f64> {
    let mut accumulator = EnergyAccumulator::new(pcm.sample_rate, energy_rate);
    for &sample in &pcm.samples {
        accumulator.push(sample);
    }
    accumulator.finish().0
}

/// 最小值-最大值正規化；數列為常數時全部回傳 0
#[must_use]
pub fn normalize(series: &[f64]) -> Vec<f64> {
    let min = series.iter().copied().fold(f64::INFINITY, f64::min);
    let max = series.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let range = max - min;

    if series.is_empty() || range <= 0.0 || !range.is_finite() {
        return vec![0.0; series.len()];
    }
    series.iter().map(|v| (v - min) / range).collect()
}

/// 與輸入等長的移動平均，視窗置中，邊界以 0 補齊
#[must_use]
pub fn moving_average(series: &[f64], width: usize) -> Vec<f64> {
    let width = width.max(1);
    let n = series.len();
    let offset = (width - 1) / 2;

    let mut prefix = Vec::with_capacity(n + 1);
    prefix.push(0.0);
    for value in series {
        prefix.push(prefix[prefix.len() - 1] + value);
    }

    (0..n)
        .map(|i| {
            let end = (i + offset + 1).min(n);
            let start = (i + offset + 1).saturating_sub(width).min(end);
            (prefix[end] - prefix[start]) / width as f64
        })
        .collect()
}

fn mean_and_std(series: &[f64]) -> (f64, f64) {
    if series.is_empty() {
        return (0.0, 0.0);
    }
    let n = series.len() as f64;
    let mean = series.iter().sum::<f64>() / n;
    let variance = series.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, variance.sqrt())
}

/// 在平滑後的能量序列中找出峰值
///
/// 峰值必須嚴格大於左右相鄰樣本，且高於 `平均 + std_multiplier × 標準差`。
#[must_use]
pub fn find_energy_peaks(smoothed: &[f64], config: &EnergyConfig, duration: f64) -> Vec<AudioPeak> {
    if smoothed.len() < 3 || config.energy_rate == 0 {
        return Vec::new();
    }

    let (mean, std) = mean_and_std(smoothed);
    let threshold = mean + config.std_multiplier * std;

    (1..smoothed.len() - 1)
        .filter(|&i| {
            let value = smoothed[i];
            value > smoothed[i - 1] && value > smoothed[i + 1] && value > threshold
        })
        .map(|i| {
            let timestamp = (i as f64 / f64::from(config.energy_rate)).min(duration.max(0.0));
            AudioPeak {
                timestamp,
                timestamp_str: format_timestamp(timestamp),
                energy: smoothed[i],
            }
        })
        .collect()
}

/// 正規化、平滑後找出峰值，時間戳不超過 `duration`
#[must_use]
pub fn peaks_from_energy(energy: &[f64], duration: f64, config: &EnergyConfig) -> Vec<AudioPeak> {
    let smoothed = moving_average(&normalize(energy), config.smoothing_width());
    find_energy_peaks(&smoothed, config, duration)
}

/// 從 PCM 波形計算能量峰值
#[must_use]
pub fn analyze_pcm(pcm: &PcmBuffer, config: &EnergyConfig) -> Vec<AudioPeak> {
    peaks_from_energy(
        &energy_series(pcm, config.energy_rate),
        pcm.duration_seconds(),
        config,
    )
}

/// 從樣本串流計算能量峰值
///
/// 有 `max_duration` 時（通常是影片長度），之後的音訊不參與計算，
/// 峰值也不會超過這個時間點。
pub fn analyze_samples(
    samples: impl IntoIterator<Item = AnalysisResult<f32>>,
    sample_rate: u32,
    config: &EnergyConfig,
    max_duration: Option<f64>,
) -> AnalysisResult<Vec<AudioPeak>> {
    let mut accumulator = EnergyAccumulator::new(sample_rate, config.energy_rate);
    if let Some(limit) = max_duration {
        accumulator = accumulator.with_limit(limit);
    }

    for sample in samples {
        if accumulator.is_full() {
            break;
        }
        accumulator.push(sample?);
    }

    let (energy, duration) = accumulator.finish();
    Ok(peaks_from_energy(&energy, duration, config))
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: u32 = 1000;

    /// 以每 0.1 秒一段的振幅組成波形
    fn pcm_from_levels(levels: &[f32]) -> PcmBuffer {
        let chunk = (RATE / 10) as usize;
        let samples = levels
            .iter()
            .flat_map(|&level| {
                (0..chunk).map(move |i| if i % 2 == 0 { level } else { -level })
            })
            .collect();
        PcmBuffer::new(samples, RATE)
    }

    #[test]
    fn test_smoothing_width() {
        let mut config = EnergyConfig::default();
        assert_eq!(config.smoothing_width(), 10);
        config.window_size = 0.0;
        assert_eq!(config.smoothing_width(), 1);
        config.window_size = 0.26;
        assert_eq!(config.smoothing_width(), 3);
    }

    #[test]
    fn test_energy_series_uses_nominal_rate() {
        let pcm = pcm_from_levels(&[0.5, 0.25, 0.0]);
        let series = energy_series(&pcm, 10);
        assert_eq!(series.len(), 3);
        assert!((series[0] - 0.5).abs() < 1e-6);
        assert!((series[1] - 0.25).abs() < 1e-6);
        assert!(series[2].abs() < 1e-6);
    }

    #[test]
    fn test_normalize_constant_series() {
        assert_eq!(normalize(&[0.3, 0.3, 0.3]), vec![0.0, 0.0, 0.0]);
        assert!(normalize(&[]).is_empty());
        assert_eq!(normalize(&[1.0, 3.0, 2.0]), vec![0.0, 1.0, 0.5]);
    }

    #[test]
    fn test_moving_average_keeps_length() {
        let series = [0.0, 0.0, 3.0, 0.0, 0.0];
        let smoothed = moving_average(&series, 3);
        assert_eq!(smoothed.len(), series.len());
        assert!((smoothed[1] - 1.0).abs() < 1e-9);
        assert!((smoothed[2] - 1.0).abs() < 1e-9);
        assert!((smoothed[3] - 1.0).abs() < 1e-9);
        assert!(smoothed[0].abs() < 1e-9);

        // 偶數寬度時視窗偏左
        let smoothed = moving_average(&[0.0, 4.0, 0.0, 0.0], 2);
        assert_eq!(smoothed, vec![0.0, 2.0, 2.0, 0.0]);

        assert_eq!(moving_average(&series, 1), series.to_vec());
    }

    #[test]
    fn test_silent_audio_has_no_peaks() {
        let pcm = PcmBuffer::new(vec![0.0; RATE as usize * 20], RATE);
        let peaks = analyze_pcm(&pcm, &EnergyConfig::default());
        assert!(peaks.is_empty());
    }

    #[test]
    fn test_empty_audio_has_no_peaks() {
        let pcm = PcmBuffer::new(Vec::new(), RATE);
        assert!(analyze_pcm(&pcm, &EnergyConfig::default()).is_empty());
    }

    #[test]
    fn test_single_burst_yields_one_peak() {
        let mut levels = vec![0.01_f32; 200];
        levels[100] = 0.9;
        let pcm = pcm_from_levels(&levels);
        let config = EnergyConfig {
            window_size: 0.1,
            ..EnergyConfig::default()
        };

        let peaks = analyze_pcm(&pcm, &config);

        assert_eq!(peaks.len(), 1);
        assert!((peaks[0].timestamp - 10.0).abs() < 1e-9);
        assert_eq!(peaks[0].timestamp_str, "0:00:10");
        assert!((peaks[0].energy - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_plateau_is_not_a_peak() {
        let mut smoothed = vec![0.0; 50];
        smoothed[20] = 1.0;
        smoothed[21] = 1.0;
        let peaks = find_energy_peaks(&smoothed, &EnergyConfig::default(), 5.0);
        assert!(peaks.is_empty());
    }

    #[test]
    fn test_peak_timestamp_is_clamped_to_duration() {
        let mut smoothed = vec![0.0; 50];
        smoothed[40] = 1.0;
        let peaks = find_energy_peaks(&smoothed, &EnergyConfig::default(), 3.5);
        assert_eq!(peaks.len(), 1);
        assert!((peaks[0].timestamp - 3.5).abs() < 1e-9);
    }

    #[test]
    fn test_accumulator_matches_in_memory_series() {
        let pcm = pcm_from_levels(&[0.5, 0.25, 0.0, 0.75]);
        let mut accumulator = EnergyAccumulator::new(RATE, 10);
        for &s in &pcm.samples {
            accumulator.push(s);
        }
        let (series, duration) = accumulator.finish();
        assert_eq!(series, energy_series(&pcm, 10));
        assert!((duration - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_accumulator_limit_stops_counting() {
        let mut accumulator = EnergyAccumulator::new(RATE, 10).with_limit(0.25);
        for _ in 0..RATE {
            accumulator.push(0.5);
        }
        assert!(accumulator.is_full());
        let (series, duration) = accumulator.finish();
        // 兩整塊加上半塊
        assert_eq!(series.len(), 3);
        assert!((duration - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_audio_longer_than_video_is_cut_at_video_end() {
        // 10 秒音訊，爆音在第 5 秒，但影片只有 2 秒
        let mut levels = vec![0.01_f32; 100];
        levels[12] = 0.3;
        levels[50] = 0.9;
        let pcm = pcm_from_levels(&levels);
        let config = EnergyConfig {
            window_size: 0.1,
            ..EnergyConfig::default()
        };

        let unbounded =
            analyze_samples(pcm.samples.iter().map(|&s| Ok(s)), RATE, &config, None).unwrap();
        assert!(unbounded.iter().any(|p| (p.timestamp - 5.0).abs() < 1e-9));

        let peaks =
            analyze_samples(pcm.samples.iter().map(|&s| Ok(s)), RATE, &config, Some(2.0)).unwrap();
        assert!(!peaks.is_empty());
        assert!(peaks.iter().all(|p| p.timestamp <= 2.0));
        assert!((peaks[0].timestamp - 1.2).abs() < 1e-9);
    }

    #[test]
    fn test_analyze_samples_propagates_read_errors() {
        let samples = vec![
            Ok(0.1),
            Err(crate::error::AnalysisError::ExternalToolFailure("truncated".to_string())),
        ];
        assert!(analyze_samples(samples, RATE, &EnergyConfig::default(), None).is_err());
    }
}
