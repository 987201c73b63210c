mod audio_extractor;
mod ffprobe_info;
mod path_validator;
mod process_runner;
mod scratch_dir;
mod temporal_dedup;
mod timestamp_format;
mod video_scanner;
mod video_source;

pub use audio_extractor::{AudioExtractor, MonoSamples, PcmBuffer};
pub use ffprobe_info::{VideoInfo, get_video_info};
pub use path_validator::{ensure_directory_exists, validate_directory_exists, validate_file_exists};
pub use process_runner::{ToolOutput, run_with_timeout};
pub use scratch_dir::{create_scratch_dir, create_scratch_dir_in, scratch_root};
pub use temporal_dedup::{Timestamped, dedup_by_min_gap};
pub use timestamp_format::format_timestamp;
pub use video_scanner::{VideoFileInfo, scan_video_files};
pub use video_source::{Frame, FrameSeek, FrameStream, InMemoryFrames, VideoSource};
