use super::process_runner::run_with_timeout;
use super::scratch_dir::create_scratch_dir;
use crate::error::{AnalysisError, AnalysisResult};
use log::{debug, warn};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

/// 單聲道 PCM 波形，樣本已正規化到 [-1.0, 1.0]
#[derive(Debug, Clone, PartialEq)]
pub struct PcmBuffer {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl PcmBuffer {
    #[must_use]
    pub const fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    #[must_use]
    pub fn duration_seconds(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / f64::from(self.sample_rate)
    }
}

type RawSamples = Box<dyn Iterator<Item = Result<f32, hound::Error>>>;

/// 逐樣本讀取 WAV 檔，多聲道時取各聲道平均
///
/// 不會把整段波形載入記憶體，長影片的音軌也只佔用讀取緩衝區。
pub struct MonoSamples {
    raw: RawSamples,
    channels: usize,
    sample_rate: u32,
}

impl MonoSamples {
    pub fn open(path: &Path) -> AnalysisResult<Self> {
        let reader = hound::WavReader::open(path)?;
        let spec = reader.spec();

        let raw: RawSamples = match spec.sample_format {
            hound::SampleFormat::Int => {
                let max_val = (1i64 << (spec.bits_per_sample.max(1) - 1)) as f32;
                Box::new(
                    reader
                        .into_samples::<i32>()
                        .map(move |s| s.map(|sample| sample as f32 / max_val)),
                )
            }
            hound::SampleFormat::Float => Box::new(reader.into_samples::<f32>()),
        };

        Ok(Self {
            raw,
            channels: usize::from(spec.channels.max(1)),
            sample_rate: spec.sample_rate,
        })
    }

    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

impl Iterator for MonoSamples {
    type Item = AnalysisResult<f32>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut sum = 0.0_f32;
        for taken in 0..self.channels {
            match self.raw.next() {
                Some(Ok(sample)) => sum += sample,
                Some(Err(e)) => return Some(Err(e.into())),
                // 最後一個不完整的音框以實際聲道數平均
                None if taken == 0 => return None,
                None => return Some(Ok(sum / taken as f32)),
            }
        }
        Some(Ok(sum / self.channels as f32))
    }
}

/// 呼叫 ffmpeg 將影片的音軌轉為暫存的單聲道 PCM 波形
///
/// 波形檔放在單次呼叫專用的暫存目錄中，讀取完畢後無論成功與否都會刪除。
pub struct AudioExtractor {
    ffmpeg_bin: String,
    sample_rate: u32,
    timeout: Duration,
    shutdown_signal: Arc<AtomicBool>,
}

impl AudioExtractor {
    #[must_use]
    pub fn new(
        ffmpeg_bin: &str,
        sample_rate: u32,
        timeout: Duration,
        shutdown_signal: Arc<AtomicBool>,
    ) -> Self {
        Self {
            ffmpeg_bin: ffmpeg_bin.to_string(),
            sample_rate,
            timeout,
            shutdown_signal,
        }
    }

    fn build_command(&self, video_path: &Path, wav_path: &Path) -> Command {
        let mut cmd = Command::new(&self.ffmpeg_bin);
        cmd.args(["-hide_banner", "-nostdin", "-loglevel", "error", "-y", "-i"])
            .arg(video_path)
            .args([
                "-vn",
                "-acodec",
                "pcm_s16le",
                "-ar",
                &self.sample_rate.to_string(),
                "-ac",
                "1",
            ])
            .arg(wav_path);
        cmd
    }

    /// 擷取音軌並交給 `consume` 逐樣本處理，回傳其結果
    pub fn extract_with<T>(
        &self,
        video_path: &Path,
        consume: impl FnOnce(MonoSamples) -> AnalysisResult<T>,
    ) -> AnalysisResult<T> {
        if !video_path.exists() {
            return Err(AnalysisError::FileNotFound(video_path.to_path_buf()));
        }

        let scratch = create_scratch_dir("audio").map_err(|e| {
            AnalysisError::ExternalToolFailure(format!("cannot create scratch directory: {e}"))
        })?;
        let wav_path: PathBuf = scratch.path().join("audio.wav");

        debug!("擷取音軌: {} -> {}", video_path.display(), wav_path.display());

        let output = run_with_timeout(
            self.build_command(video_path, &wav_path),
            self.timeout,
            &self.shutdown_signal,
        )?;

        if !output.status.success() {
            warn!("ffmpeg 擷取音軌失敗: {}", output.stderr.trim());
            return Err(AnalysisError::ExternalToolFailure(format!(
                "{} exited with {}: {}",
                self.ffmpeg_bin,
                output.status,
                output.stderr.trim()
            )));
        }

        if !wav_path.exists() {
            return Err(AnalysisError::ExternalToolFailure(
                "audio extraction produced no waveform".to_string(),
            ));
        }

        consume(MonoSamples::open(&wav_path)?)
    }
}
