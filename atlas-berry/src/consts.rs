//! 全局常量.

/// 图谱支持的分辨率 (微米).
pub const ALLOWED_RESOLUTIONS: [u32; 4] = [10, 25, 50, 100];

/// 反向投影时代表整个图谱 (而非某个结构 mask) 的名字.
pub const ATLAS_VOLUME_NAME: &str = "atlas";

/// 对齐目录元数据文件名.
pub const METADATA_FILE_NAME: &str = "metadata.json";
