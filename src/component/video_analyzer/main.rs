use super::audio_energy::{EnergyConfig, analyze_samples};
use super::face_detector::{detect_faces, load_face_cascade};
use super::haar_cascade::{CascadeParams, HaarCascade};
use super::metadata_extractor::{MetadataMap, extract_metadata};
use super::scene_detector::{SceneDetectorConfig, detect_key_frames};
use super::summary::{
    AnalysisStreams, AudioPeak, FaceObservation, KeyFrame, StageOutcome, StageReports,
    VideoMetadata, VideoSummary,
};
use super::thumbnail_generator::generate_thumbnails;
use crate::config::AnalyzerSettings;
use crate::error::{AnalysisError, AnalysisResult};
use crate::tools::{
    AudioExtractor, VideoSource, create_scratch_dir, dedup_by_min_gap, format_timestamp,
    get_video_info,
};
use chrono::{Local, SecondsFormat};
use log::{debug, error, info, warn};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use tempfile::TempDir;

/// 影片內容分析管線
///
/// 摘要流程的狀態依序為：
/// Opening → MetadataCollected → KeyFramesExtracted → FacesDetected → AudioAnalyzed → Assembled
///
/// 只有 Opening 失敗會中止整個流程；其餘階段失敗只會讓該階段的結果為空，
/// 並在 `VideoSummary.stages` 記錄原因。每次呼叫使用獨立的暫存目錄，
/// 可在不同執行緒上同時分析多部影片。
pub struct VideoAnalyzer {
    settings: AnalyzerSettings,
    face_cascade: Option<HaarCascade>,
    shutdown_signal: Arc<AtomicBool>,
}

fn log_failure(stage: &str, path: &Path, err: &AnalysisError) {
    match err {
        AnalysisError::FileNotFound(_) | AnalysisError::DecodeFailure(_) => {
            error!("{stage}失敗 {}: {err}", path.display());
        }
        AnalysisError::ModelUnavailable(_) => debug!("{stage}略過 {}: {err}", path.display()),
        _ => warn!("{stage}未完成 {}: {err}", path.display()),
    }
}

fn log_outcome<T>(stage: &str, path: &Path, outcome: &StageOutcome<T>) {
    if !outcome.status.is_ok() {
        debug!("{stage}狀態 {}: {:?}", path.display(), outcome.status);
    }
}

/// 偵測結果為空時刪除輸出目錄，否則交給呼叫端保存
fn keep_if_non_empty<T>(scratch: TempDir, outcome: &StageOutcome<T>) {
    if outcome.items.is_empty() {
        drop(scratch);
    } else {
        let path = scratch.keep();
        debug!("輸出保留於 {}", path.display());
    }
}

impl VideoAnalyzer {
    /// 建立分析管線，人臉模型只在這裡載入一次
    ///
    /// 模型無法載入時，人臉偵測在整個物件生命週期內停用。
    #[must_use]
    pub fn new(settings: AnalyzerSettings, shutdown_signal: Arc<AtomicBool>) -> Self {
        let face_cascade = match load_face_cascade(&settings.models_path) {
            Ok(cascade) => Some(cascade),
            Err(e) => {
                warn!("人臉偵測已停用: {e}");
                None
            }
        };
        Self::with_face_cascade(settings, face_cascade, shutdown_signal)
    }

    /// 使用已載入（或刻意停用）的人臉模型建立分析管線
    #[must_use]
    pub const fn with_face_cascade(
        settings: AnalyzerSettings,
        face_cascade: Option<HaarCascade>,
        shutdown_signal: Arc<AtomicBool>,
    ) -> Self {
        Self {
            settings,
            face_cascade,
            shutdown_signal,
        }
    }

    #[must_use]
    pub const fn settings(&self) -> &AnalyzerSettings {
        &self.settings
    }

    #[must_use]
    pub const fn face_detection_available(&self) -> bool {
        self.face_cascade.is_some()
    }

    fn open(&self, path: &Path) -> AnalysisResult<VideoSource> {
        VideoSource::open(&self.settings.ffprobe_bin, &self.settings.ffmpeg_bin, path)
    }

    fn scratch(prefix: &str) -> AnalysisResult<TempDir> {
        create_scratch_dir(prefix).map_err(|e| {
            AnalysisError::ExternalToolFailure(format!("cannot create scratch directory: {e}"))
        })
    }

    /// 場景變換偵測，保留狀態
    pub fn key_frames_outcome(
        &self,
        path: &Path,
        sensitivity: f64,
        max_frames: usize,
    ) -> StageOutcome<KeyFrame> {
        let attempt = || -> AnalysisResult<StageOutcome<KeyFrame>> {
            let mut source = self.open(path)?;
            let scratch = Self::scratch("key_frames")?;
            let config = SceneDetectorConfig::from_settings(&self.settings, sensitivity, max_frames);
            let outcome =
                detect_key_frames(&mut source, &config, scratch.path(), &self.shutdown_signal);
            keep_if_non_empty(scratch, &outcome);
            Ok(outcome)
        };

        let outcome = attempt().unwrap_or_else(|e| {
            log_failure("關鍵幀擷取", path, &e);
            StageOutcome::failed(&e)
        });
        log_outcome("關鍵幀擷取", path, &outcome);
        outcome
    }

    /// 人臉偵測，保留狀態
    pub fn faces_outcome(&self, path: &Path, sample_rate: u64) -> StageOutcome<FaceObservation> {
        let attempt = || -> AnalysisResult<StageOutcome<FaceObservation>> {
            let cascade = self.face_cascade.as_ref().ok_or_else(|| {
                AnalysisError::ModelUnavailable("face detection is disabled".to_string())
            })?;
            let mut source = self.open(path)?;
            Ok(detect_faces(
                &mut source,
                cascade,
                &CascadeParams::from_settings(&self.settings),
                sample_rate,
                &self.shutdown_signal,
            ))
        };

        let outcome = attempt().unwrap_or_else(|e| {
            log_failure("人臉偵測", path, &e);
            StageOutcome::failed(&e)
        });
        log_outcome("人臉偵測", path, &outcome);
        outcome
    }

    /// 音訊能量分析，保留狀態
    ///
    /// 音軌比影片長時只分析到影片結尾。
    pub fn audio_outcome(&self, path: &Path, window_size: f64) -> StageOutcome<AudioPeak> {
        let video_duration = get_video_info(&self.settings.ffprobe_bin, path)
            .ok()
            .and_then(|video_info| video_info.duration());
        self.audio_outcome_within(path, window_size, video_duration)
    }

    fn audio_outcome_within(
        &self,
        path: &Path,
        window_size: f64,
        video_duration: Option<f64>,
    ) -> StageOutcome<AudioPeak> {
        let extractor = AudioExtractor::new(
            &self.settings.ffmpeg_bin,
            self.settings.audio_sample_rate,
            self.settings.transcoder_timeout(),
            Arc::clone(&self.shutdown_signal),
        );
        let config = EnergyConfig {
            energy_rate: self.settings.energy_rate,
            window_size,
            std_multiplier: self.settings.peak_std_multiplier,
        };

        let peaks = extractor.extract_with(path, |samples| {
            let sample_rate = samples.sample_rate();
            analyze_samples(samples, sample_rate, &config, video_duration)
        });

        let outcome = match peaks {
            Ok(peaks) => StageOutcome::ok(peaks),
            Err(e) => {
                log_failure("音訊分析", path, &e);
                StageOutcome::failed(&e)
            }
        };
        log_outcome("音訊分析", path, &outcome);
        outcome
    }

    /// 縮圖擷取，保留狀態
    pub fn thumbnails_outcome(
        &self,
        path: &Path,
        output_dir: Option<&Path>,
        count: usize,
        size: (u32, u32),
    ) -> StageOutcome<PathBuf> {
        let attempt = || -> AnalysisResult<StageOutcome<PathBuf>> {
            let source = self.open(path)?;
            let margin = self.settings.thumbnail_edge_margin;

            if let Some(dir) = output_dir {
                fs::create_dir_all(dir).map_err(|e| {
                    AnalysisError::PartialReadFailure(format!(
                        "cannot create {}: {e}",
                        dir.display()
                    ))
                })?;
                return Ok(generate_thumbnails(&source, dir, count, size, margin));
            }

            let scratch = Self::scratch("thumbnails")?;
            let outcome = generate_thumbnails(&source, scratch.path(), count, size, margin);
            keep_if_non_empty(scratch, &outcome);
            Ok(outcome)
        };

        let outcome = attempt().unwrap_or_else(|e| {
            log_failure("縮圖擷取", path, &e);
            StageOutcome::failed(&e)
        });
        log_outcome("縮圖擷取", path, &outcome);
        outcome
    }

    #[must_use]
    pub fn extract_key_frames(
        &self,
        path: &Path,
        sensitivity: f64,
        max_frames: usize,
    ) -> Vec<KeyFrame> {
        self.key_frames_outcome(path, sensitivity, max_frames).items
    }

    #[must_use]
    pub fn detect_faces(&self, path: &Path, sample_rate: u64) -> Vec<FaceObservation> {
        self.faces_outcome(path, sample_rate).items
    }

    #[must_use]
    pub fn analyze_audio_energy(&self, path: &Path, window_size: f64) -> Vec<AudioPeak> {
        self.audio_outcome(path, window_size).items
    }

    #[must_use]
    pub fn generate_thumbnails(
        &self,
        path: &Path,
        output_dir: Option<&Path>,
        count: usize,
        size: (u32, u32),
    ) -> Vec<PathBuf> {
        self.thumbnails_outcome(path, output_dir, count, size).items
    }

    /// 取得技術資訊，無法讀取時回傳空的對照表
    #[must_use]
    pub fn extract_metadata_from_video(&self, path: &Path) -> MetadataMap {
        let probe = || get_video_info(&self.settings.ffprobe_bin, path);
        extract_metadata(&self.settings.mediainfo_bin, path, probe).unwrap_or_else(|e| {
            log_failure("技術資訊擷取", path, &e);
            MetadataMap::new()
        })
    }

    /// 產生完整的影片摘要
    ///
    /// 影片不存在或 ffprobe 無法讀取時回傳 `None`（序列化為 `{}`）。
    #[must_use]
    pub fn summarize_video(&self, path: &Path) -> Option<VideoSummary> {
        info!("開始分析: {}", path.display());

        let video_info = match get_video_info(&self.settings.ffprobe_bin, path) {
            Ok(video_info) => video_info,
            Err(e) => {
                log_failure("開啟影片", path, &e);
                return None;
            }
        };

        let video_duration = video_info.duration();
        let duration = video_duration.unwrap_or(0.0);
        let metadata = VideoMetadata {
            path: path.display().to_string(),
            filename: path
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .unwrap_or_default(),
            fps: video_info.fps,
            total_frames: video_info.frame_count,
            width: video_info.width,
            height: video_info.height,
            duration,
            duration_str: format_timestamp(duration),
        };
        info!(
            "[1/4] 影片資訊: {}x{} @ {:.2} fps, {}",
            metadata.width, metadata.height, metadata.fps, metadata.duration_str
        );

        let params = &self.settings.summary;

        let key_frames =
            self.key_frames_outcome(path, params.sensitivity, params.max_key_frames);
        info!("[2/4] 關鍵幀: {} 個", key_frames.items.len());

        let faces = self.faces_outcome(path, params.face_sample_rate);
        let unique_faces = dedup_by_min_gap(&faces.items, self.settings.face_min_gap);
        info!("[3/4] 人臉出現: {} 次", unique_faces.len());

        let audio = self.audio_outcome_within(path, params.audio_window_size, video_duration);
        let unique_peaks = dedup_by_min_gap(&audio.items, self.settings.audio_min_gap);
        info!("[4/4] 音訊峰值: {} 個", unique_peaks.len());

        let summary = VideoSummary {
            metadata,
            analysis: AnalysisStreams {
                key_frames: key_frames.items,
                faces: unique_faces,
                audio_peaks: unique_peaks,
            },
            stages: StageReports {
                key_frames: key_frames.status,
                faces: faces.status,
                audio_peaks: audio.status,
            },
            generated: Local::now().to_rfc3339_opts(SecondsFormat::Micros, false),
        };

        info!("分析完成: {}", path.display());
        Some(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::video_analyzer::summary::StageStatus;

    fn analyzer_without_model() -> VideoAnalyzer {
        let settings = AnalyzerSettings {
            models_path: PathBuf::from("/no/such/models"),
            ..AnalyzerSettings::default()
        };
        VideoAnalyzer::with_face_cascade(settings, None, Arc::new(AtomicBool::new(false)))
    }

    #[test]
    fn test_missing_file_yields_empty_results() {
        let analyzer = analyzer_without_model();
        let missing = Path::new("/no/such/clip.mp4");

        assert!(analyzer.summarize_video(missing).is_none());
        assert!(analyzer.extract_key_frames(missing, 0.5, 20).is_empty());
        assert!(analyzer.detect_faces(missing, 30).is_empty());
        assert!(analyzer.analyze_audio_energy(missing, 1.0).is_empty());
        assert!(analyzer.generate_thumbnails(missing, None, 5, (320, 180)).is_empty());
        assert!(analyzer.extract_metadata_from_video(missing).is_empty());
    }

    #[test]
    fn test_missing_file_status_is_failed() {
        let analyzer = analyzer_without_model();
        let missing = Path::new("/no/such/clip.mp4");

        let outcome = analyzer.key_frames_outcome(missing, 0.5, 20);
        assert!(matches!(outcome.status, StageStatus::Failed(_)));
        let outcome = analyzer.audio_outcome(missing, 1.0);
        assert!(matches!(outcome.status, StageStatus::Failed(_)));
    }

    #[test]
    fn test_disabled_face_detection_reports_model_unavailable() {
        let analyzer = analyzer_without_model();
        assert!(!analyzer.face_detection_available());

        let outcome = analyzer.faces_outcome(Path::new("/any/clip.mp4"), 30);
        assert!(outcome.items.is_empty());
        match outcome.status {
            StageStatus::Failed(reason) => assert!(reason.contains("face model unavailable")),
            other => panic!("unexpected status {other:?}"),
        }
    }

    #[test]
    fn test_new_without_model_disables_faces() {
        let settings = AnalyzerSettings {
            models_path: PathBuf::from("/no/such/models"),
            ..AnalyzerSettings::default()
        };
        let analyzer = VideoAnalyzer::new(settings, Arc::new(AtomicBool::new(false)));
        // 系統目錄可能裝有 OpenCV，只確認建構不會失敗
        let _ = analyzer.face_detection_available();
        assert_eq!(analyzer.settings().face_min_neighbors, 5);
    }

    #[cfg(unix)]
    mod with_fake_tools {
        use super::*;
        use std::os::unix::fs::PermissionsExt;

        /// 回報 64x48、30fps、60 幀（2 秒）的 ffprobe
        const FFPROBE_SCRIPT: &str = r#"cat <<'JSON'
{"streams":[{"codec_type":"video","width":64,"height":48,"avg_frame_rate":"30/1","nb_frames":"60"}],"format":{"duration":"2.0"}}
JSON"#;

        const MINIMAL_CASCADE: &str = r#"<?xml version="1.0"?>
<opencv_storage>
<cascade>
  <stageType>BOOST</stageType>
  <featureType>HAAR</featureType>
  <height>24</height>
  <width>24</width>
  <stages>
    <_>
      <stageThreshold>0.5</stageThreshold>
      <weakClassifiers>
        <_>
          <internalNodes>0 -1 0 0.</internalNodes>
          <leafValues>1. 1.</leafValues></_></weakClassifiers></_></stages>
  <features>
    <_>
      <rects>
        <_>0 0 24 24 -1.</_>
        <_>0 0 12 24 2.</_></rects></_></features></cascade>
</opencv_storage>
"#;

        fn fake_tool(dir: &Path, name: &str, script: &str) -> String {
            let path = dir.join(name);
            fs::write(&path, format!("#!/bin/sh\n{script}\n")).unwrap();
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
            path.display().to_string()
        }

        fn analyzer_with_tools(dir: &Path, ffmpeg_script: &str) -> VideoAnalyzer {
            let settings = AnalyzerSettings {
                ffprobe_bin: fake_tool(dir, "fake-ffprobe", FFPROBE_SCRIPT),
                ffmpeg_bin: fake_tool(dir, "fake-ffmpeg", ffmpeg_script),
                ..AnalyzerSettings::default()
            };
            let cascade = HaarCascade::parse(MINIMAL_CASCADE).unwrap();
            VideoAnalyzer::with_face_cascade(
                settings,
                Some(cascade),
                Arc::new(AtomicBool::new(false)),
            )
        }

        #[test]
        fn test_failing_decoder_is_not_reported_as_ok() {
            let dir = tempfile::tempdir().unwrap();
            let video = dir.path().join("clip.mp4");
            fs::write(&video, b"placeholder").unwrap();
            let analyzer =
                analyzer_with_tools(dir.path(), "echo 'Decoder not found' >&2; exit 1");

            let faces = analyzer.faces_outcome(&video, 24);
            assert!(faces.items.is_empty());
            match faces.status {
                StageStatus::Failed(reason) => assert!(reason.contains("Decoder not found")),
                other => panic!("unexpected face status {other:?}"),
            }

            let key_frames = analyzer.key_frames_outcome(&video, 0.5, 20);
            assert!(matches!(key_frames.status, StageStatus::Failed(_)));
        }

        #[test]
        fn test_audio_peaks_stay_within_video_duration() {
            let dir = tempfile::tempdir().unwrap();
            let video = dir.path().join("clip.mp4");
            fs::write(&video, b"placeholder").unwrap();

            // 10 秒音軌：1.2 秒與 5 秒各有一段爆音，影片本身只有 2 秒
            let wav = dir.path().join("long_track.wav");
            let spec = hound::WavSpec {
                channels: 1,
                sample_rate: 8000,
                bits_per_sample: 16,
                sample_format: hound::SampleFormat::Int,
            };
            let mut writer = hound::WavWriter::create(&wav, spec).unwrap();
            for i in 0..80_000u32 {
                let sample: i16 = match i / 800 {
                    12 => 9830,
                    50 => 29490,
                    _ => 327,
                };
                writer.write_sample(sample).unwrap();
            }
            writer.finalize().unwrap();

            let copy_to_last_arg =
                format!("for last; do :; done\ncp '{}' \"$last\"", wav.display());
            let analyzer = analyzer_with_tools(dir.path(), &copy_to_last_arg);

            let outcome = analyzer.audio_outcome(&video, 0.1);

            assert_eq!(outcome.status, StageStatus::Ok);
            assert!(!outcome.items.is_empty());
            assert!(outcome.items.iter().all(|peak| peak.timestamp <= 2.0));
            assert!((outcome.items[0].timestamp - 1.2).abs() < 1e-9);
        }
    }
}
