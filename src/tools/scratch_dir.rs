use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tempfile::{Builder, TempDir};

/// 所有暫存目錄共用的根目錄
#[must_use]
pub fn scratch_root() -> PathBuf {
    std::env::temp_dir().join("footage_triage")
}

/// 建立單次分析專用的暫存目錄 `footage_triage/<prefix>_XXXXXX`
///
/// 名稱隨機，同時進行的多個分析不會互相覆蓋。`TempDir` 離開作用域時
/// （包含錯誤路徑）自動刪除；要保留時呼叫 [`TempDir::keep`]。
pub fn create_scratch_dir(prefix: &str) -> io::Result<TempDir> {
    create_scratch_dir_in(&scratch_root(), prefix)
}

pub fn create_scratch_dir_in(root: &Path, prefix: &str) -> io::Result<TempDir> {
    fs::create_dir_all(root)?;
    Builder::new().prefix(&format!("{prefix}_")).tempdir_in(root)
}
