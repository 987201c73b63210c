//! 影片技術資訊
//!
//! 優先以 `mediainfo --Output=JSON` 取得容器、編碼、聲道與位元深度等資訊；
//! mediainfo 不存在或失敗時，改用 ffprobe 取得的基本串流資訊。

use crate::error::{AnalysisError, AnalysisResult};
use crate::tools::VideoInfo;
use chrono::{DateTime, Local, SecondsFormat};
use log::debug;
use serde::Deserialize;
use serde_json::{Number, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::process::Command;
use std::time::SystemTime;

pub type MetadataMap = BTreeMap<String, Value>;

/// 備援路徑會輸出的欄位，皆為 mediainfo 欄位的子集
pub const FALLBACK_KEYS: [&str; 5] = ["width", "height", "fps", "frame_count", "duration"];

#[derive(Debug, Deserialize)]
struct MediaInfoOutput {
    media: Option<MediaInfoMedia>,
}

#[derive(Debug, Deserialize)]
struct MediaInfoMedia {
    #[serde(default)]
    track: Vec<BTreeMap<String, Value>>,
}

/// (輸出欄位, mediainfo 欄位)
const GENERAL_FIELDS: [(&str, &str); 6] = [
    ("format", "Format"),
    ("format_profile", "Format_Profile"),
    ("codec_id", "CodecID"),
    ("file_size", "FileSize"),
    ("duration", "Duration"),
    ("overall_bit_rate", "OverallBitRate"),
];

const VIDEO_FIELDS: [(&str, &str); 11] = [
    ("video_format", "Format"),
    ("video_format_profile", "Format_Profile"),
    ("video_codec", "CodecID"),
    ("width", "Width"),
    ("height", "Height"),
    ("aspect_ratio", "DisplayAspectRatio"),
    ("frame_rate", "FrameRate"),
    ("fps", "FrameRate"),
    ("frame_count", "FrameCount"),
    ("bit_depth", "BitDepth"),
    ("color_space", "ColorSpace"),
];

const AUDIO_FIELDS: [(&str, &str); 5] = [
    ("audio_format", "Format"),
    ("audio_codec", "CodecID"),
    ("audio_channels", "Channels"),
    ("audio_sampling_rate", "SamplingRate"),
    ("audio_bit_rate", "BitRate"),
];

/// 數字字串轉為 JSON 數字，其餘維持字串
fn to_json_value(raw: &Value) -> Option<Value> {
    match raw {
        Value::String(text) => {
            let text = text.trim();
            if text.is_empty() {
                return None;
            }
            if let Ok(int) = text.parse::<i64>() {
                return Some(Value::from(int));
            }
            if let Some(number) = text
                .parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
            {
                return Some(Value::Number(number));
            }
            Some(Value::String(text.to_string()))
        }
        Value::Null | Value::Object(_) | Value::Array(_) => None,
        other => Some(other.clone()),
    }
}

fn copy_fields(
    metadata: &mut MetadataMap,
    track: &BTreeMap<String, Value>,
    fields: &[(&str, &str)],
) {
    for (key, source) in fields {
        if let Some(value) = track.get(*source).and_then(to_json_value) {
            metadata.insert((*key).to_string(), value);
        }
    }
}

/// 解析 mediainfo 的 JSON 輸出，只取第一條視訊與音訊軌
pub fn parse_mediainfo_json(json: &str) -> AnalysisResult<MetadataMap> {
    let output: MediaInfoOutput = serde_json::from_str(json)
        .map_err(|e| AnalysisError::ExternalToolFailure(format!("invalid mediainfo output: {e}")))?;
    let tracks = output.media.map(|m| m.track).unwrap_or_default();

    let find_track = |kind: &str| {
        tracks
            .iter()
            .find(|t| t.get("@type").and_then(Value::as_str) == Some(kind))
    };

    let mut metadata = MetadataMap::new();
    if let Some(general) = find_track("General") {
        copy_fields(&mut metadata, general, &GENERAL_FIELDS);
    }
    if let Some(video) = find_track("Video") {
        copy_fields(&mut metadata, video, &VIDEO_FIELDS);
    }
    if let Some(audio) = find_track("Audio") {
        copy_fields(&mut metadata, audio, &AUDIO_FIELDS);
    }

    if metadata.is_empty() {
        return Err(AnalysisError::ExternalToolFailure(
            "mediainfo reported no tracks".to_string(),
        ));
    }
    Ok(metadata)
}

/// 呼叫 mediainfo 取得完整的技術資訊
pub fn probe_rich_metadata(mediainfo_bin: &str, path: &Path) -> AnalysisResult<MetadataMap> {
    if !path.exists() {
        return Err(AnalysisError::FileNotFound(path.to_path_buf()));
    }

    let output = Command::new(mediainfo_bin)
        .arg("--Output=JSON")
        .arg(path)
        .output()
        .map_err(|e| AnalysisError::ExternalToolFailure(format!("cannot run {mediainfo_bin}: {e}")))?;

    if !output.status.success() {
        return Err(AnalysisError::ExternalToolFailure(format!(
            "{mediainfo_bin} exited with {}",
            output.status
        )));
    }

    let mut metadata = parse_mediainfo_json(&String::from_utf8_lossy(&output.stdout))?;
    insert_file_times(&mut metadata, path);
    Ok(metadata)
}

fn format_system_time(time: SystemTime) -> String {
    DateTime::<Local>::from(time).to_rfc3339_opts(SecondsFormat::Secs, false)
}

fn insert_file_times(metadata: &mut MetadataMap, path: &Path) {
    let Ok(file_meta) = fs::metadata(path) else {
        return;
    };
    if let Ok(created) = file_meta.created() {
        metadata.insert("created".to_string(), Value::from(format_system_time(created)));
    }
    if let Ok(modified) = file_meta.modified() {
        metadata.insert("modified".to_string(), Value::from(format_system_time(modified)));
    }
}

/// 以 ffprobe 的基本資訊組成最小欄位集
#[must_use]
pub fn fallback_metadata(info: &VideoInfo) -> MetadataMap {
    let mut metadata = MetadataMap::new();
    if info.width > 0 {
        metadata.insert("width".to_string(), Value::from(info.width));
    }
    if info.height > 0 {
        metadata.insert("height".to_string(), Value::from(info.height));
    }
    if let Some(fps) = Number::from_f64(info.fps).filter(|_| info.fps > 0.0) {
        metadata.insert("fps".to_string(), Value::Number(fps));
    }
    if info.frame_count > 0 {
        metadata.insert("frame_count".to_string(), Value::from(info.frame_count));
    }
    if let Some(duration) = info.duration().and_then(Number::from_f64) {
        metadata.insert("duration".to_string(), Value::Number(duration));
    }
    metadata
}

/// 先試 mediainfo，失敗時改用基本串流資訊
pub fn extract_metadata(
    mediainfo_bin: &str,
    path: &Path,
    probe_info: impl FnOnce() -> AnalysisResult<VideoInfo>,
) -> AnalysisResult<MetadataMap> {
    match probe_rich_metadata(mediainfo_bin, path) {
        Ok(metadata) => Ok(metadata),
        Err(AnalysisError::FileNotFound(p)) => Err(AnalysisError::FileNotFound(p)),
        Err(e) => {
            debug!("mediainfo 無法使用，改用基本資訊: {e}");
            probe_info().map(|info| fallback_metadata(&info))
        }
    }
}
