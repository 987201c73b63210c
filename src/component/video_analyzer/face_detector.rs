use super::haar_cascade::{CascadeParams, HaarCascade};
use super::summary::{FaceObservation, StageOutcome};
use crate::config::AnalyzerSettings;
use crate::error::{AnalysisError, AnalysisResult};
use crate::tools::{FrameStream, format_timestamp};
use image::imageops::grayscale;
use log::{debug, info};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

pub const FACE_CASCADE_FILE: &str = "haarcascade_frontalface_default.xml";

/// 系統內常見的 OpenCV cascade 安裝位置
const SYSTEM_CASCADE_DIRS: [&str; 3] = [
    "/usr/share/opencv4/haarcascades",
    "/usr/share/opencv/haarcascades",
    "/usr/local/share/opencv4/haarcascades",
];

impl CascadeParams {
    #[must_use]
    pub const fn from_settings(settings: &AnalyzerSettings) -> Self {
        Self {
            scale_factor: settings.face_scale_factor,
            min_neighbors: settings.face_min_neighbors,
            min_size: settings.face_min_size,
        }
    }
}

/// 依序列出可能的模型路徑：先找設定的模型目錄，再找系統目錄
#[must_use]
pub fn cascade_candidates(models_path: &Path) -> Vec<PathBuf> {
    std::iter::once(models_path.join(FACE_CASCADE_FILE))
        .chain(
            SYSTEM_CASCADE_DIRS
                .iter()
                .map(|dir| Path::new(dir).join(FACE_CASCADE_FILE)),
        )
        .collect()
}

/// 載入人臉模型，找不到或格式不符時回傳 `ModelUnavailable`
pub fn load_face_cascade(models_path: &Path) -> AnalysisResult<HaarCascade> {
    let candidates = cascade_candidates(models_path);
    let Some(path) = candidates.iter().find(|p| p.is_file()) else {
        return Err(AnalysisError::ModelUnavailable(format!(
            "{FACE_CASCADE_FILE} not found in {} or system OpenCV directories",
            models_path.display()
        )));
    };

    let cascade = HaarCascade::load(path)?;
    info!("已載入人臉模型: {}", path.display());
    Ok(cascade)
}

/// 每 `sample_rate` 幀對灰階畫面執行一次人臉偵測
///
/// 只有偵測到至少一張臉的幀會產生 `FaceObservation`。
/// 一幀都讀不到時回報失敗，與「沒有人臉」區分。
pub fn detect_faces(
    stream: &mut impl FrameStream,
    cascade: &HaarCascade,
    params: &CascadeParams,
    sample_rate: u64,
    shutdown_signal: &Arc<AtomicBool>,
) -> StageOutcome<FaceObservation> {
    let sample_rate = sample_rate.max(1);
    let info = stream.info().clone();
    let mut observations = Vec::new();
    let mut frames_read: u64 = 0;

    loop {
        if shutdown_signal.load(Ordering::SeqCst) {
            return StageOutcome::interrupted(observations, &AnalysisError::Cancelled);
        }

        let frame = match stream.read_next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(e) => return StageOutcome::interrupted(observations, &e),
        };
        frames_read += 1;

        if frame.index == 0 || frame.index % sample_rate != 0 {
            continue;
        }

        let faces = cascade.detect_multi_scale(&grayscale(&frame.image), params);
        if faces.is_empty() {
            continue;
        }

        let timestamp = info.frame_timestamp(frame.index);
        debug!("第 {} 幀偵測到 {} 張人臉", frame.index, faces.len());
        observations.push(FaceObservation {
            frame_number: frame.index,
            timestamp,
            timestamp_str: format_timestamp(timestamp),
            num_faces: faces.len(),
            faces,
        });
    }

    if frames_read == 0 {
        return StageOutcome::failed(&AnalysisError::DecodeFailure(
            "no frames could be decoded".to_string(),
        ));
    }

    StageOutcome::ok(observations)
}
