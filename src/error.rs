//! 分析管線的錯誤分類
//!
//! 管線內部以 `AnalysisError` 傳遞失敗原因，公開入口一律轉成空結果，
//! 並透過 `StageStatus` 讓呼叫端分辨「真的沒有資料」與「無法分析」。

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum AnalysisError {
    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("decode failure: {0}")]
    DecodeFailure(String),

    #[error("face model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("external tool failure: {0}")]
    ExternalToolFailure(String),

    #[error("partial read failure: {0}")]
    PartialReadFailure(String),

    #[error("analysis cancelled")]
    Cancelled,
}

impl From<image::ImageError> for AnalysisError {
    fn from(err: image::ImageError) -> Self {
        Self::PartialReadFailure(err.to_string())
    }
}

impl From<hound::Error> for AnalysisError {
    fn from(err: hound::Error) -> Self {
        Self::ExternalToolFailure(format!("unreadable waveform: {err}"))
    }
}

pub type AnalysisResult<T> = std::result::Result<T, AnalysisError>;
