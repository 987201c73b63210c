//! 影片內容分析元件
//!
//! 從單一影片推導出帶時間戳的結構化資訊：
//! A. 場景變換候選幀
//! B. 人臉出現紀錄
//! C. 音訊能量峰值
//! D. 縮圖與技術資訊

mod audio_energy;
mod face_detector;
mod haar_cascade;
mod main;
mod metadata_extractor;
mod scene_detector;
mod summary;
mod thumbnail_generator;

pub use audio_energy::{
    EnergyAccumulator, EnergyConfig, analyze_pcm, analyze_samples, energy_series,
    find_energy_peaks, moving_average, normalize, peaks_from_energy,
};
pub use face_detector::{FACE_CASCADE_FILE, cascade_candidates, detect_faces, load_face_cascade};
pub use haar_cascade::{CascadeParams, HaarCascade, group_rectangles};
pub use main::VideoAnalyzer;
pub use metadata_extractor::{
    FALLBACK_KEYS, MetadataMap, extract_metadata, fallback_metadata, parse_mediainfo_json,
    probe_rich_metadata,
};
pub use scene_detector::{SceneDetectorConfig, change_score, detect_key_frames};
pub use summary::{
    AnalysisStreams, AudioPeak, FaceBox, FaceObservation, KeyFrame, StageOutcome, StageReports,
    StageStatus, VideoMetadata, VideoSummary,
};
pub use thumbnail_generator::{generate_thumbnails, thumbnail_positions};
