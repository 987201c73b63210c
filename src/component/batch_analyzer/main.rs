use crate::component::video_analyzer::{VideoAnalyzer, VideoSummary};
use crate::tools::{
    VideoFileInfo, ensure_directory_exists, scan_video_files, validate_directory_exists,
};
use anyhow::{Context, Result};
use console::style;
use dialoguer::Input;
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info, warn};
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// 批次分析結果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchResult {
    pub total_videos: usize,
    pub successful: usize,
    pub failed: usize,
    pub skipped: usize,
}

enum VideoOutcome {
    Written,
    Skipped,
    Failed,
}

/// 批次影片分析
///
/// 掃描資料夾內所有影片並平行產生摘要，每部影片寫出 `<檔名>.summary.json`。
/// 已存在的摘要會跳過；收到中斷信號後不再開始新的影片。
pub struct BatchAnalyzer {
    analyzer: Arc<VideoAnalyzer>,
    shutdown_signal: Arc<AtomicBool>,
}

impl BatchAnalyzer {
    pub const fn new(analyzer: Arc<VideoAnalyzer>, shutdown_signal: Arc<AtomicBool>) -> Self {
        Self {
            analyzer,
            shutdown_signal,
        }
    }

    pub fn run(&self) -> Result<()> {
        println!("{}", style("=== 批次影片分析 ===").cyan().bold());

        let input_path: String = Input::new()
            .with_prompt("請輸入影片資料夾路徑")
            .interact_text()?;
        let input_dir = PathBuf::from(input_path.trim());
        validate_directory_exists(&input_dir)?;

        let output_path: String = Input::new()
            .with_prompt("請輸入摘要輸出資料夾路徑")
            .default(input_dir.join("summaries").display().to_string())
            .interact_text()?;
        let output_dir = PathBuf::from(output_path.trim());

        let result = self.analyze_folder(&input_dir, &output_dir)?;
        Self::print_summary(&result);
        Ok(())
    }

    /// 分析資料夾內所有影片，將摘要寫入 `output_dir`
    pub fn analyze_folder(&self, input_dir: &Path, output_dir: &Path) -> Result<BatchResult> {
        validate_directory_exists(input_dir)?;
        ensure_directory_exists(output_dir)
            .with_context(|| format!("無法建立輸出資料夾: {}", output_dir.display()))?;

        let videos = scan_video_files(input_dir)?;
        info!("找到 {} 個影片檔案: {}", videos.len(), input_dir.display());
        if videos.is_empty() {
            return Ok(BatchResult::default());
        }

        let progress_bar = ProgressBar::new(videos.len() as u64);
        progress_bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        progress_bar.set_message("分析影片中...");

        let successful = AtomicUsize::new(0);
        let failed = AtomicUsize::new(0);
        let skipped = AtomicUsize::new(0);

        videos.par_iter().for_each(|video| {
            if self.shutdown_signal.load(Ordering::SeqCst) {
                return;
            }

            let counter = match self.analyze_one(video, output_dir) {
                VideoOutcome::Written => &successful,
                VideoOutcome::Skipped => &skipped,
                VideoOutcome::Failed => &failed,
            };
            counter.fetch_add(1, Ordering::SeqCst);
            progress_bar.inc(1);
        });

        if self.shutdown_signal.load(Ordering::SeqCst) {
            warn!("收到中斷信號，停止批次分析");
            progress_bar.abandon_with_message("已中斷");
        } else {
            progress_bar.finish_with_message("完成");
        }

        Ok(BatchResult {
            total_videos: videos.len(),
            successful: successful.into_inner(),
            failed: failed.into_inner(),
            skipped: skipped.into_inner(),
        })
    }

    #[must_use]
    pub fn summary_path(output_dir: &Path, video: &Path) -> PathBuf {
        let stem = video
            .file_stem()
            .map_or_else(|| "video".to_string(), |s| s.to_string_lossy().to_string());
        output_dir.join(format!("{stem}.summary.json"))
    }

    fn analyze_one(&self, video: &VideoFileInfo, output_dir: &Path) -> VideoOutcome {
        let output_path = Self::summary_path(output_dir, &video.path);
        if output_path.exists() {
            info!("摘要已存在，跳過: {}", output_path.display());
            return VideoOutcome::Skipped;
        }

        let Some(summary) = self.analyzer.summarize_video(&video.path) else {
            error!("無法分析影片: {}", video.path.display());
            return VideoOutcome::Failed;
        };

        match write_summary(&summary, &output_path) {
            Ok(()) => VideoOutcome::Written,
            Err(e) => {
                error!("寫入摘要失敗 {}: {e:#}", output_path.display());
                VideoOutcome::Failed
            }
        }
    }

    fn print_summary(result: &BatchResult) {
        println!();
        println!("{}", style("=== 分析完成 ===").green().bold());
        println!("  總計: {}", result.total_videos);
        println!("  {} 成功: {}", style("✓").green(), result.successful);
        println!("  {} 跳過: {}", style("⤳").dim(), result.skipped);
        println!("  {} 失敗: {}", style("✗").red(), result.failed);
    }
}

pub fn write_summary(summary: &VideoSummary, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(summary).context("無法序列化摘要")?;
    fs::write(path, json).with_context(|| format!("無法寫入 {}", path.display()))?;
    Ok(())
}
