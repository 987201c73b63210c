use crate::component::VideoAnalyzer;
use crate::config::Config;
use crate::menu::handlers::{
    run_audio_peaks, run_batch_analyzer, run_face_detection, run_key_frames, run_metadata,
    run_summarize, run_thumbnails,
};
use anyhow::Result;
use console::{Term, style};
use dialoguer::Select;
use dialoguer::theme::ColorfulTheme;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

/// 顯示主選單並執行選擇的功能，回傳 `false` 表示離開程式
pub fn show_main_menu(
    term: &Term,
    shutdown_signal: &Arc<AtomicBool>,
    config: &mut Config,
    analyzer: &Arc<VideoAnalyzer>,
) -> Result<bool> {
    term.clear_screen()?;

    println!("{}", style("=== 影片素材分析 ===").cyan().bold());
    println!("{}", style("按 ESC 離開").dim());

    let options = [
        "影片摘要（JSON）",
        "關鍵幀擷取",
        "人臉偵測",
        "音訊峰值分析",
        "縮圖產生",
        "技術資訊",
        "批次分析資料夾",
        "離開",
    ];

    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("請選擇功能")
        .items(&options)
        .default(0)
        .interact_on_opt(term)?;

    match selection {
        Some(0) => run_summarize(term, config, analyzer)?,
        Some(1) => run_key_frames(term, config, analyzer)?,
        Some(2) => run_face_detection(term, config, analyzer)?,
        Some(3) => run_audio_peaks(term, config, analyzer)?,
        Some(4) => run_thumbnails(term, config, analyzer)?,
        Some(5) => run_metadata(term, config, analyzer)?,
        Some(6) => run_batch_analyzer(term, shutdown_signal, analyzer)?,
        _ => return Ok(false),
    }

    Ok(true)
}
