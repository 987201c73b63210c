use super::summary::{KeyFrame, StageOutcome};
use crate::config::AnalyzerSettings;
use crate::error::AnalysisError;
use crate::tools::{FrameStream, format_timestamp};
use image::GrayImage;
use image::imageops::grayscale;
use log::{debug, warn};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// 場景偵測設定
#[derive(Debug, Clone)]
pub struct SceneDetectorConfig {
    /// 每 N 幀取樣一次
    pub sample_stride: u64,
    /// 亮度差超過此值的像素視為變化
    pub pixel_threshold: u8,
    /// 門檻基準（變化像素百分比）
    pub threshold_base: f64,
    /// 0.0–1.0，越高接受越多幀
    pub sensitivity: f64,
    pub max_frames: usize,
}

impl SceneDetectorConfig {
    #[must_use]
    pub fn from_settings(settings: &AnalyzerSettings, sensitivity: f64, max_frames: usize) -> Self {
        Self {
            sample_stride: settings.scene_sample_stride.max(1),
            pixel_threshold: settings.scene_pixel_threshold,
            threshold_base: settings.scene_threshold_base,
            sensitivity,
            max_frames,
        }
    }

    /// 變化百分比需超過的門檻，敏感度越低門檻越高
    #[must_use]
    pub fn acceptance_threshold(&self) -> f64 {
        self.threshold_base * (1.0 - self.sensitivity.clamp(0.0, 1.0))
    }
}

impl Default for SceneDetectorConfig {
    fn default() -> Self {
        Self::from_settings(&AnalyzerSettings::default(), 0.5, 20)
    }
}

/// 兩張亮度圖之間，差異超過門檻的像素比例
#[must_use]
pub fn change_score(reference: &GrayImage, frame: &GrayImage, pixel_threshold: u8) -> f64 {
    if reference.dimensions() != frame.dimensions() {
        return 1.0;
    }

    let total = frame.as_raw().len();
    if total == 0 {
        return 0.0;
    }

    let changed = reference
        .as_raw()
        .iter()
        .zip(frame.as_raw())
        .filter(|(a, b)| a.abs_diff(**b) > pixel_threshold)
        .count();

    changed as f64 / total as f64
}

/// 從畫面串流找出場景變換幀
///
/// 以第一幀為參考，每 `sample_stride` 幀比較一次；被接受的幀會成為新的參考，
/// 並以 JPEG 寫入 `output_dir`。結束後依分數由高到低排序並截斷到 `max_frames`，
/// 被截掉的候選幀圖檔會一併刪除。
pub fn detect_key_frames(
    stream: &mut impl FrameStream,
    config: &SceneDetectorConfig,
    output_dir: &Path,
    shutdown_signal: &Arc<AtomicBool>,
) -> StageOutcome<KeyFrame> {
    let info = stream.info().clone();
    let threshold = config.acceptance_threshold();

    let first = match stream.read_next_frame() {
        Ok(Some(frame)) => frame,
        Ok(None) => {
            return StageOutcome::failed(&AnalysisError::DecodeFailure(
                "cannot read the first frame".to_string(),
            ));
        }
        Err(e) => return StageOutcome::failed(&e),
    };

    let mut reference = grayscale(&first.image);
    let mut key_frames: Vec<KeyFrame> = Vec::new();
    let mut interruption: Option<AnalysisError> = None;

    loop {
        if shutdown_signal.load(Ordering::SeqCst) {
            interruption = Some(AnalysisError::Cancelled);
            break;
        }

        let frame = match stream.read_next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(e) => {
                interruption = Some(e);
                break;
            }
        };

        if frame.index == 0 || frame.index % config.sample_stride != 0 {
            continue;
        }

        let gray = grayscale(&frame.image);
        let score = change_score(&reference, &gray, config.pixel_threshold);
        if score * 100.0 <= threshold {
            continue;
        }

        let path = output_dir.join(format!("frame_{:06}.jpg", frame.index));
        if let Err(e) = frame.image.save(&path) {
            warn!("無法儲存關鍵幀 {}: {e}", path.display());
            interruption = Some(AnalysisError::from(e));
        } else {
            let timestamp = info.frame_timestamp(frame.index);
            debug!(
                "關鍵幀 {} @ {:.2}s, score={:.3}",
                frame.index, timestamp, score
            );
            key_frames.push(KeyFrame {
                frame_number: frame.index,
                timestamp,
                timestamp_str: format_timestamp(timestamp),
                path,
                score,
            });
        }

        reference = gray;
    }

    key_frames.sort_by(|a, b| b.score.total_cmp(&a.score));
    for dropped in key_frames.iter().skip(config.max_frames) {
        let _ = fs::remove_file(&dropped.path);
    }
    key_frames.truncate(config.max_frames);

    match interruption {
        Some(e) => StageOutcome::interrupted(key_frames, &e),
        None => StageOutcome::ok(key_frames),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::video_analyzer::summary::StageStatus;
    use crate::tools::{InMemoryFrames, VideoInfo};
    use image::{Luma, Rgb, RgbImage};
    use std::path::PathBuf;

    fn info(frame_count: u64) -> VideoInfo {
        VideoInfo {
            path: PathBuf::from("/memory.mp4"),
            fps: 30.0,
            frame_count,
            width: 16,
            height: 9,
        }
    }

    fn no_shutdown() -> Arc<AtomicBool> {
        Arc::new(AtomicBool::new(false))
    }

    #[test]
    fn test_acceptance_threshold() {
        let mut config = SceneDetectorConfig::default();
        assert!((config.acceptance_threshold() - 17.5).abs() < 1e-9);
        config.sensitivity = 0.7;
        assert!((config.acceptance_threshold() - 10.5).abs() < 1e-9);
        config.sensitivity = 1.0;
        assert!(config.acceptance_threshold().abs() < 1e-9);
    }

    #[test]
    fn test_change_score() {
        let a = GrayImage::from_pixel(10, 10, Luma([100]));
        let mut b = a.clone();
        assert!(change_score(&a, &b, 25).abs() < f64::EPSILON);

        for x in 0..10 {
            b.put_pixel(x, 0, Luma([200]));
            b.put_pixel(x, 1, Luma([120]));
        }
        // 第二列只差 20，不超過門檻
        assert!((change_score(&a, &b, 25) - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_single_cut_at_thirty_seconds() {
        let dir = tempfile::tempdir().unwrap();
        let frames = (0..1800).map(|i| {
            let color = if i < 900 { [20, 20, 20] } else { [230, 230, 230] };
            RgbImage::from_pixel(16, 9, Rgb(color))
        });
        let mut stream = InMemoryFrames::new(info(1800), frames);
        let config = SceneDetectorConfig {
            sensitivity: 0.7,
            ..SceneDetectorConfig::default()
        };

        let outcome = detect_key_frames(&mut stream, &config, dir.path(), &no_shutdown());

        assert_eq!(outcome.status, StageStatus::Ok);
        assert_eq!(outcome.items.len(), 1);
        let key_frame = &outcome.items[0];
        assert_eq!(key_frame.frame_number, 900);
        assert!((key_frame.timestamp - 30.0).abs() < 1e-9);
        assert_eq!(key_frame.timestamp_str, "0:00:30");
        assert!((key_frame.score - 1.0).abs() < 1e-9);
        assert!(key_frame.path.exists());
    }

    #[test]
    fn test_static_video_has_no_key_frames() {
        let dir = tempfile::tempdir().unwrap();
        let frames = (0..300).map(|_| RgbImage::from_pixel(16, 9, Rgb([50, 60, 70])));
        let mut stream = InMemoryFrames::new(info(300), frames);

        let outcome = detect_key_frames(
            &mut stream,
            &SceneDetectorConfig::default(),
            dir.path(),
            &no_shutdown(),
        );
        assert_eq!(outcome.status, StageStatus::Ok);
        assert!(outcome.items.is_empty());
    }

    #[test]
    fn test_results_are_ranked_and_capped() {
        let dir = tempfile::tempdir().unwrap();
        // 每 15 幀切換一次，變化範圍逐步擴大，分數各不相同
        let frames = (0..(15 * 12)).map(|i: u32| {
            let segment = i / 15;
            let mut img = RgbImage::from_pixel(16, 9, Rgb([0, 0, 0]));
            if segment % 2 == 1 {
                for y in 0..9 {
                    for x in 0..(4 + segment).min(16) {
                        img.put_pixel(x, y, Rgb([255, 255, 255]));
                    }
                }
            }
            img
        });
        let mut stream = InMemoryFrames::new(info(180), frames);
        let config = SceneDetectorConfig {
            sensitivity: 0.5,
            max_frames: 3,
            ..SceneDetectorConfig::default()
        };

        let outcome = detect_key_frames(&mut stream, &config, dir.path(), &no_shutdown());

        assert_eq!(outcome.items.len(), 3);
        for pair in outcome.items.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
        for key_frame in &outcome.items {
            assert!((0.0..=1.0).contains(&key_frame.score));
            assert!(key_frame.path.exists());
        }
        let written = fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(written, 3);
    }

    #[test]
    fn test_empty_stream_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut stream = InMemoryFrames::new(info(0), Vec::new());
        let outcome = detect_key_frames(
            &mut stream,
            &SceneDetectorConfig::default(),
            dir.path(),
            &no_shutdown(),
        );
        assert!(outcome.items.is_empty());
        assert!(matches!(outcome.status, StageStatus::Failed(_)));
    }

    #[test]
    fn test_shutdown_signal_stops_scan() {
        let dir = tempfile::tempdir().unwrap();
        let frames = (0..60).map(|_| RgbImage::from_pixel(4, 4, Rgb([0, 0, 0])));
        let mut stream = InMemoryFrames::new(info(60), frames);
        let signal = Arc::new(AtomicBool::new(true));

        let outcome =
            detect_key_frames(&mut stream, &SceneDetectorConfig::default(), dir.path(), &signal);
        assert!(matches!(outcome.status, StageStatus::Degraded(_)));
    }
}
