use anyhow::Result;
use console::{Term, style};
use footage_triage::component::VideoAnalyzer;
use footage_triage::config::Config;
use footage_triage::init;
use footage_triage::menu::{print_json, show_main_menu};
use footage_triage::signal::{is_shutdown_requested, setup_shutdown_signal};
use log::{info, warn};
use std::path::Path;
use std::sync::Arc;

fn main() -> Result<()> {
    init::init();
    let shutdown_signal = setup_shutdown_signal()?;
    let mut config = Config::new()?;

    let analyzer = Arc::new(VideoAnalyzer::new(
        config.settings.analyzer.clone(),
        Arc::clone(&shutdown_signal),
    ));

    // 指定影片路徑時直接輸出摘要
    if let Some(path) = std::env::args().nth(1) {
        match analyzer.summarize_video(Path::new(&path)) {
            Some(summary) => print_json(&summary)?,
            None => println!("{{}}"),
        }
        return Ok(());
    }

    let term = Term::stdout();
    loop {
        if is_shutdown_requested(&shutdown_signal) {
            info!("收到中斷信號，結束程式");
            break;
        }

        match show_main_menu(&term, &shutdown_signal, &mut config, &analyzer) {
            Ok(true) => {}
            Ok(false) => {
                term.clear_screen()?;
                println!("\n{}", style("再見！").green().bold());
                info!("Program exited normally");
                break;
            }
            Err(e) => {
                warn!("Program error: {e}");
                eprintln!("{} {}", style("錯誤:").red().bold(), e);
                break;
            }
        }
    }

    Ok(())
}
