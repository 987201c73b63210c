use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const MAX_RECENT_PATHS: usize = 10;

/// 分析管線的所有可調參數
///
/// 預設值即為各偵測器的標準參數。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerSettings {
    /// 場景偵測：每 N 幀取樣一次
    pub scene_sample_stride: u64,
    /// 場景偵測：亮度差超過此值（0–255）的像素視為變化
    pub scene_pixel_threshold: u8,
    /// 場景偵測：門檻 = base × (1 - sensitivity)，單位為變化像素百分比
    pub scene_threshold_base: f64,

    /// 人臉偵測：影像金字塔縮放倍率
    pub face_scale_factor: f64,
    /// 人臉偵測：合併候選框時需要的最少鄰居數
    pub face_min_neighbors: usize,
    /// 人臉偵測：最小人臉邊長（像素）
    pub face_min_size: u32,
    /// 人臉偵測：預設每 N 幀取樣一次
    pub face_sample_rate: u64,
    /// 人臉模型（Haar cascade XML）所在目錄
    pub models_path: PathBuf,

    /// 音訊：擷取波形的取樣率
    pub audio_sample_rate: u32,
    /// 音訊：每秒產生的能量樣本數
    pub energy_rate: u32,
    /// 音訊：峰值門檻 = 平均 + multiplier × 標準差
    pub peak_std_multiplier: f64,
    /// 外部轉檔程式的逾時秒數
    pub transcoder_timeout_secs: u64,

    /// 去重：人臉事件最小間隔（秒）
    pub face_min_gap: f64,
    /// 去重：音訊峰值最小間隔（秒）
    pub audio_min_gap: f64,

    /// 縮圖：略過影片開頭與結尾的比例
    pub thumbnail_edge_margin: f64,
    pub thumbnail_width: u32,
    pub thumbnail_height: u32,
    pub thumbnail_count: usize,

    /// 摘要流程使用的參數
    pub summary: SummarySettings,

    pub ffmpeg_bin: String,
    pub ffprobe_bin: String,
    pub mediainfo_bin: String,
}

impl Default for AnalyzerSettings {
    fn default() -> Self {
        Self {
            scene_sample_stride: 15,
            scene_pixel_threshold: 25,
            scene_threshold_base: 35.0,
            face_scale_factor: 1.1,
            face_min_neighbors: 5,
            face_min_size: 30,
            face_sample_rate: 30,
            models_path: PathBuf::from("resources/models"),
            audio_sample_rate: 44_100,
            energy_rate: 10,
            peak_std_multiplier: 1.5,
            transcoder_timeout_secs: 600,
            face_min_gap: 3.0,
            audio_min_gap: 2.0,
            thumbnail_edge_margin: 0.05,
            thumbnail_width: 320,
            thumbnail_height: 180,
            thumbnail_count: 5,
            summary: SummarySettings::default(),
            ffmpeg_bin: "ffmpeg".to_string(),
            ffprobe_bin: "ffprobe".to_string(),
            mediainfo_bin: "mediainfo".to_string(),
        }
    }
}

impl AnalyzerSettings {
    #[must_use]
    pub const fn transcoder_timeout(&self) -> Duration {
        Duration::from_secs(self.transcoder_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SummarySettings {
    pub sensitivity: f64,
    pub max_key_frames: usize,
    pub face_sample_rate: u64,
    pub audio_window_size: f64,
}

impl Default for SummarySettings {
    fn default() -> Self {
        Self {
            sensitivity: 0.7,
            max_key_frames: 10,
            face_sample_rate: 24,
            audio_window_size: 1.0,
        }
    }
}

/// 儲存在 settings.json 的使用者設定
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserSettings {
    pub analyzer: AnalyzerSettings,
    pub recent_paths: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub settings: UserSettings,
}
