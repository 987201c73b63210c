use crate::error::{AnalysisError, AnalysisResult};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Command;

/// 影片串流的基本資訊（對應一次分析期間持有的影片控制代碼）
#[derive(Debug, Clone, PartialEq)]
pub struct VideoInfo {
    pub path: PathBuf,
    /// 無法判斷時為 0
    pub fps: f64,
    pub frame_count: u64,
    pub width: u32,
    pub height: u32,
}

impl VideoInfo {
    /// 影片長度（秒）= 幀數 / FPS，FPS 無效時為 `None`
    #[must_use]
    pub fn duration(&self) -> Option<f64> {
        (self.fps > 0.0).then(|| self.frame_count as f64 / self.fps)
    }

    /// 可解碼的影片必須有正的 FPS 與幀數
    pub fn ensure_decodable(&self) -> AnalysisResult<()> {
        if self.fps <= 0.0 || self.frame_count == 0 {
            return Err(AnalysisError::DecodeFailure(format!(
                "cannot determine fps or frame count for {} (fps={}, frames={})",
                self.path.display(),
                self.fps,
                self.frame_count
            )));
        }
        Ok(())
    }

    /// 將幀索引轉為秒數，並確保不超過影片長度
    #[must_use]
    pub fn frame_timestamp(&self, frame_index: u64) -> f64 {
        if self.fps <= 0.0 {
            return 0.0;
        }
        let timestamp = frame_index as f64 / self.fps;
        self.duration().map_or(timestamp, |d| timestamp.min(d))
    }
}

#[derive(Deserialize)]
struct FfprobeOutput {
    format: Option<FormatInfo>,
    streams: Option<Vec<StreamInfo>>,
}

#[derive(Deserialize)]
struct FormatInfo {
    duration: Option<String>,
}

#[derive(Deserialize)]
struct StreamInfo {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    avg_frame_rate: Option<String>,
    r_frame_rate: Option<String>,
    nb_frames: Option<String>,
    duration: Option<String>,
}

/// 使用 ffprobe 取得影片資訊
pub fn get_video_info(ffprobe_bin: &str, path: &Path) -> AnalysisResult<VideoInfo> {
    if !path.exists() {
        return Err(AnalysisError::FileNotFound(path.to_path_buf()));
    }

    let output = Command::new(ffprobe_bin)
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
            "-select_streams",
            "v:0",
        ])
        .arg(path)
        .output()
        .map_err(|e| AnalysisError::DecodeFailure(format!("cannot run {ffprobe_bin}: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(AnalysisError::DecodeFailure(format!(
            "{ffprobe_bin} failed on {}: {}",
            path.display(),
            stderr.trim()
        )));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    parse_ffprobe_output(path, &stdout)
}

/// 解析 ffprobe JSON 輸出
fn parse_ffprobe_output(path: &Path, json: &str) -> AnalysisResult<VideoInfo> {
    let probe: FfprobeOutput = serde_json::from_str(json)
        .map_err(|e| AnalysisError::DecodeFailure(format!("unparsable ffprobe output: {e}")))?;

    let video_stream = probe
        .streams
        .as_ref()
        .and_then(|streams| {
            streams
                .iter()
                .find(|s| s.codec_type.as_deref() == Some("video"))
        })
        .ok_or_else(|| {
            AnalysisError::DecodeFailure(format!("no video stream: {}", path.display()))
        })?;

    let fps = video_stream
        .avg_frame_rate
        .as_deref()
        .and_then(parse_frame_rate)
        .or_else(|| video_stream.r_frame_rate.as_deref().and_then(parse_frame_rate))
        .unwrap_or(0.0);

    // 容器未記錄幀數時（例如 mkv），以長度 × FPS 估算
    let frame_count = video_stream
        .nb_frames
        .as_deref()
        .and_then(|n| n.parse::<u64>().ok())
        .filter(|&n| n > 0)
        .or_else(|| {
            let duration = video_stream
                .duration
                .as_ref()
                .or_else(|| probe.format.as_ref().and_then(|f| f.duration.as_ref()))
                .and_then(|d| d.parse::<f64>().ok())?;
            (fps > 0.0 && duration > 0.0).then(|| (duration * fps).round() as u64)
        })
        .unwrap_or(0);

    Ok(VideoInfo {
        path: path.to_path_buf(),
        fps,
        frame_count,
        width: video_stream.width.unwrap_or(0),
        height: video_stream.height.unwrap_or(0),
    })
}

/// 解析幀率字串（例如 "30/1" 或 "30000/1001"）
fn parse_frame_rate(rate: &str) -> Option<f64> {
    if let Some((num_str, den_str)) = rate.split_once('/') {
        let num: f64 = num_str.parse().ok()?;
        let den: f64 = den_str.parse().ok()?;
        if den > 0.0 && num > 0.0 {
            return Some(num / den);
        }
        return None;
    }
    rate.parse::<f64>().ok().filter(|&r| r > 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_frame_rate_fraction() {
        assert!((parse_frame_rate("30/1").unwrap() - 30.0).abs() < 0.01);
        assert!((parse_frame_rate("30000/1001").unwrap() - 29.97).abs() < 0.01);
        assert!((parse_frame_rate("24/1").unwrap() - 24.0).abs() < 0.01);
    }

    #[test]
    fn test_parse_frame_rate_invalid() {
        assert!(parse_frame_rate("invalid").is_none());
        assert!(parse_frame_rate("30/0").is_none());
        assert!(parse_frame_rate("0/0").is_none());
    }

    #[test]
    fn test_parse_ffprobe_output_with_nb_frames() {
        let json = r#"{
            "streams": [
                {"codec_type": "video", "width": 640, "height": 360,
                 "avg_frame_rate": "30/1", "r_frame_rate": "30/1", "nb_frames": "1800"}
            ],
            "format": {"duration": "60.000000"}
        }"#;
        let info = parse_ffprobe_output(Path::new("/v.mp4"), json).unwrap();
        assert_eq!(info.width, 640);
        assert_eq!(info.height, 360);
        assert_eq!(info.frame_count, 1800);
        assert!((info.duration().unwrap() - 60.0).abs() < 1e-9);
    }

    #[test]
    fn test_parse_ffprobe_output_estimates_frame_count() {
        let json = r#"{
            "streams": [
                {"codec_type": "video", "width": 1920, "height": 1080,
                 "avg_frame_rate": "0/0", "r_frame_rate": "25/1"}
            ],
            "format": {"duration": "10.0"}
        }"#;
        let info = parse_ffprobe_output(Path::new("/v.mkv"), json).unwrap();
        assert!((info.fps - 25.0).abs() < 1e-9);
        assert_eq!(info.frame_count, 250);
    }

    #[test]
    fn test_parse_ffprobe_output_without_video_stream() {
        let json = r#"{"streams": [{"codec_type": "audio"}], "format": {}}"#;
        let err = parse_ffprobe_output(Path::new("/a.wav"), json).unwrap_err();
        assert!(matches!(err, AnalysisError::DecodeFailure(_)));
    }

    #[test]
    fn test_zero_fps_is_not_decodable() {
        let info = VideoInfo {
            path: PathBuf::from("/v.mp4"),
            fps: 0.0,
            frame_count: 100,
            width: 10,
            height: 10,
        };
        assert!(info.duration().is_none());
        assert!(info.ensure_decodable().is_err());
        assert!((info.frame_timestamp(50) - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_frame_timestamp_is_clamped_to_duration() {
        let info = VideoInfo {
            path: PathBuf::from("/v.mp4"),
            fps: 30.0,
            frame_count: 300,
            width: 10,
            height: 10,
        };
        assert!((info.frame_timestamp(150) - 5.0).abs() < 1e-9);
        assert!((info.frame_timestamp(400) - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_missing_file_is_reported() {
        let err = get_video_info("ffprobe", Path::new("/definitely/not/here.mp4")).unwrap_err();
        assert!(matches!(err, AnalysisError::FileNotFound(_)));
    }
}
