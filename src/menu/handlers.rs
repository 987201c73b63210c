use crate::component::{BatchAnalyzer, VideoAnalyzer};
use crate::config::Config;
use crate::config::save::{add_recent_path, save_settings};
use crate::pause;
use crate::tools::validate_file_exists;
use anyhow::Result;
use console::{Term, style};
use dialoguer::theme::ColorfulTheme;
use dialoguer::{Input, Select};
use log::warn;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

const NEW_PATH_OPTION: &str = "輸入新路徑...";

pub fn print_json(value: &impl Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// 選擇要分析的影片：可從最近使用的路徑中挑選，或輸入新路徑
///
/// 按 ESC 時回傳 `None`。選定的路徑會記錄到 settings.json。
fn prompt_video_path(term: &Term, config: &mut Config) -> Result<Option<PathBuf>> {
    let recent = &config.settings.recent_paths;

    let raw_path = if recent.is_empty() {
        Input::<String>::new()
            .with_prompt("請輸入影片路徑")
            .interact_text_on(term)?
    } else {
        let mut items = recent.clone();
        items.push(NEW_PATH_OPTION.to_string());

        let selection = Select::with_theme(&ColorfulTheme::default())
            .with_prompt("請選擇影片")
            .items(&items)
            .default(0)
            .interact_on_opt(term)?;

        match selection {
            None => return Ok(None),
            Some(index) if index < recent.len() => recent[index].clone(),
            Some(_) => Input::<String>::new()
                .with_prompt("請輸入影片路徑")
                .interact_text_on(term)?,
        }
    };

    let path = PathBuf::from(raw_path.trim());
    validate_file_exists(&path)?;

    add_recent_path(&mut config.settings, &path.display().to_string());
    if let Err(e) = save_settings(&config.settings) {
        warn!("無法儲存最近使用的路徑: {e:#}");
    }

    Ok(Some(path))
}

/// 選擇影片後執行指定動作，錯誤只顯示不中止主選單
fn with_video(
    term: &Term,
    config: &mut Config,
    action: impl FnOnce(&Path) -> Result<()>,
) -> Result<()> {
    match prompt_video_path(term, config) {
        Ok(Some(path)) => {
            if let Err(e) = action(&path) {
                eprintln!("{} {}", style("錯誤:").red().bold(), e);
            }
        }
        Ok(None) => return Ok(()),
        Err(e) => eprintln!("{} {}", style("錯誤:").red().bold(), e),
    }

    pause(term)?;
    Ok(())
}

pub fn run_summarize(term: &Term, config: &mut Config, analyzer: &VideoAnalyzer) -> Result<()> {
    with_video(term, config, |path| {
        println!("{}", style("分析中，請稍候...").dim());
        match analyzer.summarize_video(path) {
            Some(summary) => print_json(&summary),
            None => {
                println!("{{}}");
                Ok(())
            }
        }
    })
}

pub fn run_key_frames(term: &Term, config: &mut Config, analyzer: &VideoAnalyzer) -> Result<()> {
    with_video(term, config, |path| {
        let sensitivity: f64 = Input::new()
            .with_prompt("敏感度 (0.0 - 1.0)")
            .default(0.5)
            .interact_text_on(term)?;
        let max_frames: usize = Input::new()
            .with_prompt("最多擷取幾幀")
            .default(20)
            .interact_text_on(term)?;

        let key_frames = analyzer.extract_key_frames(path, sensitivity.clamp(0.0, 1.0), max_frames);
        println!(
            "{}",
            style(format!("找到 {} 個關鍵幀", key_frames.len())).green()
        );
        for key_frame in &key_frames {
            println!(
                "  {} #{} score={:.3} {}",
                key_frame.timestamp_str,
                key_frame.frame_number,
                key_frame.score,
                key_frame.path.display()
            );
        }
        Ok(())
    })
}

pub fn run_face_detection(
    term: &Term,
    config: &mut Config,
    analyzer: &VideoAnalyzer,
) -> Result<()> {
    if !analyzer.face_detection_available() {
        println!(
            "{}",
            style("找不到人臉模型，人臉偵測已停用（請將 haarcascade_frontalface_default.xml 放入模型目錄）")
                .yellow()
        );
    }

    let default_rate = analyzer.settings().face_sample_rate;
    with_video(term, config, |path| {
        let sample_rate: u64 = Input::new()
            .with_prompt("每幾幀取樣一次")
            .default(default_rate)
            .interact_text_on(term)?;

        let observations = analyzer.detect_faces(path, sample_rate.max(1));
        println!(
            "{}",
            style(format!("{} 個畫面偵測到人臉", observations.len())).green()
        );
        for observation in &observations {
            println!(
                "  {} #{}: {} 張",
                observation.timestamp_str, observation.frame_number, observation.num_faces
            );
        }
        Ok(())
    })
}

pub fn run_audio_peaks(term: &Term, config: &mut Config, analyzer: &VideoAnalyzer) -> Result<()> {
    with_video(term, config, |path| {
        let window_size: f64 = Input::new()
            .with_prompt("平滑視窗（秒）")
            .default(1.0)
            .interact_text_on(term)?;

        let peaks = analyzer.analyze_audio_energy(path, window_size);
        println!("{}", style(format!("找到 {} 個音訊峰值", peaks.len())).green());
        for peak in &peaks {
            println!("  {} energy={:.3}", peak.timestamp_str, peak.energy);
        }
        Ok(())
    })
}

pub fn run_thumbnails(term: &Term, config: &mut Config, analyzer: &VideoAnalyzer) -> Result<()> {
    let settings = analyzer.settings().clone();
    with_video(term, config, |path| {
        let output: String = Input::new()
            .with_prompt("輸出資料夾（留空使用暫存目錄）")
            .allow_empty(true)
            .interact_text_on(term)?;
        let count: usize = Input::new()
            .with_prompt("縮圖數量")
            .default(settings.thumbnail_count)
            .interact_text_on(term)?;

        let output = output.trim();
        let output_dir = (!output.is_empty()).then(|| PathBuf::from(output));
        let thumbnails = analyzer.generate_thumbnails(
            path,
            output_dir.as_deref(),
            count,
            (settings.thumbnail_width, settings.thumbnail_height),
        );

        println!("{}", style(format!("產生 {} 張縮圖", thumbnails.len())).green());
        for thumbnail in &thumbnails {
            println!("  {}", thumbnail.display());
        }
        Ok(())
    })
}

pub fn run_metadata(term: &Term, config: &mut Config, analyzer: &VideoAnalyzer) -> Result<()> {
    with_video(term, config, |path| {
        print_json(&analyzer.extract_metadata_from_video(path))
    })
}

pub fn run_batch_analyzer(
    term: &Term,
    shutdown_signal: &Arc<AtomicBool>,
    analyzer: &Arc<VideoAnalyzer>,
) -> Result<()> {
    let batch = BatchAnalyzer::new(Arc::clone(analyzer), Arc::clone(shutdown_signal));

    if let Err(e) = batch.run() {
        eprintln!("{} {}", style("錯誤:").red().bold(), e);
    }

    pause(term)?;
    Ok(())
}
