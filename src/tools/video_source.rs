use super::ffprobe_info::{VideoInfo, get_video_info};
use crate::error::{AnalysisError, AnalysisResult};
use image::RgbImage;
use log::debug;
use std::io::{BufReader, ErrorKind, Read};
use std::path::Path;
use std::process::{Child, ChildStdout, Command, Stdio};
use std::thread::{self, JoinHandle};

/// 解碼後的單一畫面
#[derive(Debug, Clone)]
pub struct Frame {
    /// 從 0 起算的幀索引
    pub index: u64,
    pub image: RgbImage,
}

/// 依序讀取畫面的來源
pub trait FrameStream {
    fn info(&self) -> &VideoInfo;

    /// 讀取下一幀，串流結束時回傳 `Ok(None)`
    fn read_next_frame(&mut self) -> AnalysisResult<Option<Frame>>;
}

/// 可依幀索引隨機讀取的來源
pub trait FrameSeek: FrameStream {
    /// 讀取指定幀，索引超出範圍時取最後一幀
    fn seek_frame(&self, index: u64) -> AnalysisResult<Frame>;

    /// 依影片長度比例（0.0–1.0）跳轉並讀取最接近的幀
    fn seek_fraction(&self, fraction: f64) -> AnalysisResult<Frame> {
        let frame_count = self.info().frame_count;
        let index = (fraction.clamp(0.0, 1.0) * frame_count as f64).round() as u64;
        self.seek_frame(index)
    }
}

/// 以 ffmpeg 解碼的影片來源
///
/// 解碼器在第一次讀取時才啟動，以 rgb24 rawvideo 經由管線輸出；
/// 管線結束時檢查 ffmpeg 的結束狀態，非正常結束回報 `DecodeFailure`。
/// 物件被丟棄時終止並回收 ffmpeg 子程序。
pub struct VideoSource {
    info: VideoInfo,
    ffmpeg_bin: String,
    decoder: Option<Child>,
    reader: Option<BufReader<ChildStdout>>,
    stderr_reader: Option<JoinHandle<String>>,
    finished: bool,
    next_index: u64,
}

impl VideoSource {
    /// 開啟影片，檔案不存在或無法判斷 FPS／幀數時失敗
    pub fn open(ffprobe_bin: &str, ffmpeg_bin: &str, path: &Path) -> AnalysisResult<Self> {
        let info = get_video_info(ffprobe_bin, path)?;
        info.ensure_decodable()?;
        if info.width == 0 || info.height == 0 {
            return Err(AnalysisError::DecodeFailure(format!(
                "unknown frame size for {}",
                path.display()
            )));
        }

        debug!(
            "開啟影片 {}: {}x{} @ {:.3} fps, {} 幀",
            path.display(),
            info.width,
            info.height,
            info.fps,
            info.frame_count
        );

        Ok(Self::from_info(info, ffmpeg_bin))
    }

    fn from_info(info: VideoInfo, ffmpeg_bin: &str) -> Self {
        Self {
            info,
            ffmpeg_bin: ffmpeg_bin.to_string(),
            decoder: None,
            reader: None,
            stderr_reader: None,
            finished: false,
            next_index: 0,
        }
    }

    fn frame_len(&self) -> usize {
        self.info.width as usize * self.info.height as usize * 3
    }

    fn decode_command(&self, start_seconds: Option<f64>) -> Command {
        let mut cmd = Command::new(&self.ffmpeg_bin);
        cmd.args(["-hide_banner", "-nostdin", "-loglevel", "error", "-noautorotate"]);
        if let Some(start) = start_seconds.filter(|&s| s > 0.0) {
            cmd.args(["-ss", &format!("{start:.3}")]);
        }
        cmd.arg("-i")
            .arg(&self.info.path)
            .args(["-map", "0:v:0", "-an", "-sn", "-dn"]);
        if start_seconds.is_some() {
            cmd.args(["-frames:v", "1"]);
        }
        cmd.args(["-f", "rawvideo", "-pix_fmt", "rgb24", "-"]);
        cmd
    }

    fn start_decoder(&mut self) -> AnalysisResult<()> {
        let mut child = self
            .decode_command(None)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                AnalysisError::DecodeFailure(format!("cannot start {}: {e}", self.ffmpeg_bin))
            })?;

        let stdout = child.stdout.take().ok_or_else(|| {
            AnalysisError::DecodeFailure("decoder stdout unavailable".to_string())
        })?;

        // stderr 由背景執行緒讀完，避免管線塞滿讓解碼器卡住
        self.stderr_reader = child.stderr.take().map(|mut stderr| {
            thread::spawn(move || {
                let mut buffer = String::new();
                let _ = stderr.read_to_string(&mut buffer);
                buffer
            })
        });
        self.reader = Some(BufReader::with_capacity(self.frame_len(), stdout));
        self.decoder = Some(child);
        Ok(())
    }

    /// 管線讀到結尾後等待解碼器結束，非零結束碼視為解碼失敗
    fn finish_decoder(&mut self) -> AnalysisResult<()> {
        self.finished = true;
        self.reader = None;

        let Some(mut child) = self.decoder.take() else {
            return Ok(());
        };
        let status = child.wait().map_err(|e| {
            AnalysisError::DecodeFailure(format!("cannot wait for {}: {e}", self.ffmpeg_bin))
        })?;
        let stderr = self
            .stderr_reader
            .take()
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default();

        if status.success() {
            debug!("解碼結束: {} 幀", self.next_index);
            return Ok(());
        }
        Err(AnalysisError::DecodeFailure(format!(
            "{} exited with {status} after {} frames: {}",
            self.ffmpeg_bin,
            self.next_index,
            stderr.trim()
        )))
    }

    fn image_from_raw(&self, buffer: Vec<u8>) -> AnalysisResult<RgbImage> {
        RgbImage::from_raw(self.info.width, self.info.height, buffer).ok_or_else(|| {
            AnalysisError::PartialReadFailure("frame buffer size mismatch".to_string())
        })
    }
}

impl FrameStream for VideoSource {
    fn info(&self) -> &VideoInfo {
        &self.info
    }

    fn read_next_frame(&mut self) -> AnalysisResult<Option<Frame>> {
        if self.finished {
            return Ok(None);
        }
        if self.reader.is_none() {
            self.start_decoder()?;
        }

        let mut buffer = vec![0u8; self.frame_len()];
        let Some(reader) = self.reader.as_mut() else {
            return Ok(None);
        };

        match reader.read_exact(&mut buffer) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                self.finish_decoder()?;
                return Ok(None);
            }
            Err(e) => return Err(AnalysisError::PartialReadFailure(e.to_string())),
        }

        let frame = Frame {
            index: self.next_index,
            image: self.image_from_raw(buffer)?,
        };
        self.next_index += 1;
        Ok(Some(frame))
    }
}

impl FrameSeek for VideoSource {
    /// 以獨立的 ffmpeg 呼叫讀取，不影響循序讀取的位置
    fn seek_frame(&self, index: u64) -> AnalysisResult<Frame> {
        let index = index.min(self.info.frame_count.saturating_sub(1));
        let timestamp = index as f64 / self.info.fps;

        let output = self
            .decode_command(Some(timestamp))
            .stdin(Stdio::null())
            .output()
            .map_err(|e| {
                AnalysisError::PartialReadFailure(format!("cannot start {}: {e}", self.ffmpeg_bin))
            })?;

        let mut buffer = output.stdout;
        if buffer.len() < self.frame_len() {
            return Err(AnalysisError::PartialReadFailure(format!(
                "no frame at {timestamp:.3}s ({}): {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        buffer.truncate(self.frame_len());

        Ok(Frame {
            index,
            image: self.image_from_raw(buffer)?,
        })
    }
}

impl Drop for VideoSource {
    fn drop(&mut self) {
        self.reader = None;
        if let Some(mut child) = self.decoder.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
        if let Some(handle) = self.stderr_reader.take() {
            let _ = handle.join();
        }
    }
}

/// 記憶體中的畫面序列，可用於已解碼的畫面或合成測試資料
pub struct InMemoryFrames {
    info: VideoInfo,
    frames: Vec<RgbImage>,
    cursor: usize,
}

impl InMemoryFrames {
    #[must_use]
    pub fn new(info: VideoInfo, frames: impl IntoIterator<Item = RgbImage>) -> Self {
        Self {
            info,
            frames: frames.into_iter().collect(),
            cursor: 0,
        }
    }
}

impl FrameStream for InMemoryFrames {
    fn info(&self) -> &VideoInfo {
        &self.info
    }

    fn read_next_frame(&mut self) -> AnalysisResult<Option<Frame>> {
        let Some(image) = self.frames.get(self.cursor) else {
            return Ok(None);
        };
        let frame = Frame {
            index: self.cursor as u64,
            image: image.clone(),
        };
        self.cursor += 1;
        Ok(Some(frame))
    }
}

impl FrameSeek for InMemoryFrames {
    fn seek_frame(&self, index: u64) -> AnalysisResult<Frame> {
        let index = index.min(self.info.frame_count.saturating_sub(1));
        let image = self.frames.get(index as usize).ok_or_else(|| {
            AnalysisError::PartialReadFailure(format!("frame {index} is not available"))
        })?;
        Ok(Frame {
            index,
            image: image.clone(),
        })
    }
}
