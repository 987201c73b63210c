use super::summary::StageOutcome;
use crate::error::AnalysisError;
use crate::tools::FrameSeek;
use image::DynamicImage;
use image::imageops::FilterType;
use log::{debug, warn};
use std::path::{Path, PathBuf};

/// 計算縮圖的時間位置（秒）
///
/// 只取一張時取影片正中間；多張時略過頭尾 `edge_margin` 比例，
/// 在剩餘區間內平均分布（包含區間兩端）。
#[must_use]
pub fn thumbnail_positions(duration: f64, count: usize, edge_margin: f64) -> Vec<f64> {
    if count == 0 || !duration.is_finite() || duration <= 0.0 {
        return Vec::new();
    }
    if count == 1 {
        return vec![duration / 2.0];
    }

    let margin = edge_margin.clamp(0.0, 0.49);
    let start = duration * margin;
    let span = duration * (1.0 - 2.0 * margin);
    let step = span / (count - 1) as f64;

    (0..count).map(|i| start + i as f64 * step).collect()
}

/// 在指定位置擷取縮圖，維持長寬比縮放到 `size` 範圍內
///
/// 檔名依序為 `thumbnail_1.jpg`、`thumbnail_2.jpg`…；讀不到的位置直接略過。
pub fn generate_thumbnails(
    source: &impl FrameSeek,
    output_dir: &Path,
    count: usize,
    size: (u32, u32),
    edge_margin: f64,
) -> StageOutcome<PathBuf> {
    let info = source.info();
    let Some(duration) = info.duration() else {
        return StageOutcome::failed(&AnalysisError::DecodeFailure(format!(
            "unknown duration for {}",
            info.path.display()
        )));
    };

    let (width, height) = (size.0.max(1), size.1.max(1));
    let mut thumbnails = Vec::new();
    let mut last_error: Option<AnalysisError> = None;

    for (i, position) in thumbnail_positions(duration, count, edge_margin)
        .into_iter()
        .enumerate()
    {
        let index = (position * info.fps).round() as u64;
        let frame = match source.seek_frame(index) {
            Ok(frame) => frame,
            Err(e) => {
                debug!("略過縮圖位置 {position:.2}s: {e}");
                last_error = Some(e);
                continue;
            }
        };

        let path = output_dir.join(format!("thumbnail_{}.jpg", i + 1));
        let thumbnail = DynamicImage::ImageRgb8(frame.image).resize(width, height, FilterType::Triangle);
        match thumbnail.save(&path) {
            Ok(()) => thumbnails.push(path),
            Err(e) => {
                warn!("無法儲存縮圖 {}: {e}", path.display());
                last_error = Some(AnalysisError::from(e));
            }
        }
    }

    match last_error {
        Some(e) => StageOutcome::interrupted(thumbnails, &e),
        None => StageOutcome::ok(thumbnails),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::video_analyzer::summary::StageStatus;
    use crate::tools::{InMemoryFrames, VideoInfo};
    use image::{Rgb, RgbImage};

    fn stream(frame_count: u64, available: u32) -> InMemoryFrames {
        let info = VideoInfo {
            path: PathBuf::from("/memory.mp4"),
            fps: 10.0,
            frame_count,
            width: 64,
            height: 36,
        };
        let frames = (0..available).map(|i| RgbImage::from_pixel(64, 36, Rgb([(i % 256) as u8, 0, 0])));
        InMemoryFrames::new(info, frames)
    }

    #[test]
    fn test_single_thumbnail_at_midpoint() {
        assert_eq!(thumbnail_positions(10.0, 1, 0.05), vec![5.0]);
    }

    #[test]
    fn test_positions_stay_inside_margins() {
        let positions = thumbnail_positions(100.0, 5, 0.05);
        assert_eq!(positions.len(), 5);
        assert!((positions[0] - 5.0).abs() < 1e-9);
        assert!((positions[4] - 95.0).abs() < 1e-9);
        for pair in positions.windows(2) {
            assert!((pair[1] - pair[0] - 22.5).abs() < 1e-9);
        }
    }

    #[test]
    fn test_no_positions_for_empty_request() {
        assert!(thumbnail_positions(100.0, 0, 0.05).is_empty());
        assert!(thumbnail_positions(0.0, 3, 0.05).is_empty());
    }

    #[test]
    fn test_generate_thumbnails_fits_box() {
        let dir = tempfile::tempdir().unwrap();
        let source = stream(100, 100);

        let outcome = generate_thumbnails(&source, dir.path(), 5, (32, 32), 0.05);

        assert_eq!(outcome.status, StageStatus::Ok);
        assert_eq!(outcome.items.len(), 5);
        assert_eq!(outcome.items[0], dir.path().join("thumbnail_1.jpg"));
        let img = image::open(&outcome.items[2]).unwrap();
        assert_eq!((img.width(), img.height()), (32, 18));
    }

    #[test]
    fn test_unreadable_positions_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        // 宣稱 100 幀但只有 60 幀可讀
        let source = stream(100, 60);

        let outcome = generate_thumbnails(&source, dir.path(), 5, (32, 32), 0.05);

        assert_eq!(outcome.items.len(), 3);
        assert!(matches!(outcome.status, StageStatus::Degraded(_)));
        assert!(!dir.path().join("thumbnail_4.jpg").exists());
    }
}
