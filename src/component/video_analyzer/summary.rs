use crate::error::AnalysisError;
use crate::tools::Timestamped;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// 場景變換候選幀
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyFrame {
    pub frame_number: u64,
    pub timestamp: f64,
    pub timestamp_str: String,
    /// 擷取出的靜態圖路徑
    pub path: PathBuf,
    /// 變化像素比例 [0, 1]
    pub score: f64,
}

/// 人臉框，序列化為 `[x, y, w, h]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "[u32; 4]", into = "[u32; 4]")]
pub struct FaceBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl From<[u32; 4]> for FaceBox {
    fn from([x, y, width, height]: [u32; 4]) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

impl From<FaceBox> for [u32; 4] {
    fn from(face: FaceBox) -> Self {
        [face.x, face.y, face.width, face.height]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceObservation {
    pub frame_number: u64,
    pub timestamp: f64,
    pub timestamp_str: String,
    pub num_faces: usize,
    pub faces: Vec<FaceBox>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioPeak {
    pub timestamp: f64,
    pub timestamp_str: String,
    /// 平滑後的正規化能量 [0, 1]
    pub energy: f64,
}

impl Timestamped for KeyFrame {
    fn timestamp(&self) -> f64 {
        self.timestamp
    }
}

impl Timestamped for FaceObservation {
    fn timestamp(&self) -> f64 {
        self.timestamp
    }
}

impl Timestamped for AudioPeak {
    fn timestamp(&self) -> f64 {
        self.timestamp
    }
}

/// 單一階段的執行狀態
///
/// 用來區分「確實沒有偵測到東西」與「無法分析」。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum StageStatus {
    Ok,
    /// 部分資料無法讀取，結果不完整
    Degraded(String),
    /// 階段沒有產生任何結果
    Failed(String),
}

impl StageStatus {
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }
}

impl From<&AnalysisError> for StageStatus {
    /// 部分讀取失敗與中斷視為結果不完整，其餘為失敗
    fn from(err: &AnalysisError) -> Self {
        match err {
            AnalysisError::PartialReadFailure(_) | AnalysisError::Cancelled => {
                Self::Degraded(err.to_string())
            }
            _ => Self::Failed(err.to_string()),
        }
    }
}

/// 偵測器的輸出：結果與狀態
#[derive(Debug, Clone, PartialEq)]
pub struct StageOutcome<T> {
    pub items: Vec<T>,
    pub status: StageStatus,
}

impl<T> StageOutcome<T> {
    #[must_use]
    pub const fn ok(items: Vec<T>) -> Self {
        Self {
            items,
            status: StageStatus::Ok,
        }
    }

    #[must_use]
    pub fn failed(err: &AnalysisError) -> Self {
        Self {
            items: Vec::new(),
            status: StageStatus::from(err),
        }
    }

    /// 中途出錯時保留已取得的結果
    #[must_use]
    pub fn interrupted(items: Vec<T>, err: &AnalysisError) -> Self {
        let status = if items.is_empty() {
            StageStatus::from(err)
        } else {
            StageStatus::Degraded(err.to_string())
        };
        Self { items, status }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoMetadata {
    pub path: String,
    pub filename: String,
    pub fps: f64,
    pub total_frames: u64,
    pub width: u32,
    pub height: u32,
    pub duration: f64,
    pub duration_str: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisStreams {
    pub key_frames: Vec<KeyFrame>,
    pub faces: Vec<FaceObservation>,
    pub audio_peaks: Vec<AudioPeak>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageReports {
    pub key_frames: StageStatus,
    pub faces: StageStatus,
    pub audio_peaks: StageStatus,
}

/// 影片分析摘要，交給呼叫端後管線不再持有
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoSummary {
    pub metadata: VideoMetadata,
    pub analysis: AnalysisStreams,
    pub stages: StageReports,
    /// ISO-8601
    pub generated: String,
}
