//! 批次影片分析元件
//!
//! 掃描資料夾、平行產生每部影片的摘要並寫成 JSON 檔

mod main;

pub use main::{BatchAnalyzer, BatchResult, write_summary};
