//! 持久化与路径解析.
//!
//! 每张组织学切片对应一份 JSON 对齐记录, 文件名取原图文件名的 md5
//! (32 位十六进制), 同一张图的重新保存自然覆盖旧记录. 目录级元数据
//! 记录切片的人工排序. 图谱与结构 mask 的本地路径统一从用户数据目录
//! 解析, 文件是否存在由调用方检查, 下载本身不在本 crate 职责内.

use std::fs;
use std::path::{Path, PathBuf};

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::consts::METADATA_FILE_NAME;
use crate::models::{AlignmentRecord, Resolution};

/// 组织学图像读取错误.
#[derive(Debug)]
pub enum ImageReadError {
    /// 打开或解码失败.
    Decode(image::ImageError),
}

impl From<image::ImageError> for ImageReadError {
    fn from(value: image::ImageError) -> Self {
        Self::Decode(value)
    }
}

/// 持久化错误.
#[derive(Debug)]
pub enum PersistError {
    /// 文件系统操作失败.
    Io(std::io::Error),

    /// JSON 编解码失败.
    Json(serde_json::Error),
}

impl From<std::io::Error> for PersistError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for PersistError {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}

/// 用户数据根目录.
pub fn data_root() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("atlas-berry")
}

/// 给定分辨率的本地图谱路径.
pub fn atlas_path(resolution: Resolution) -> PathBuf {
    data_root()
        .join("atlases")
        .join(format!("atlas_{}um.npy", resolution.microns()))
}

/// 结构 mask 的本地路径. 名字做大小写与空白归一化后直接成为文件名.
pub fn structure_mask_path(name: &str, resolution: Resolution) -> PathBuf {
    let normalised = name.trim().to_lowercase().replace([' ', '/'], "-");
    data_root()
        .join("structure_masks")
        .join(format!("{}um", resolution.microns()))
        .join(format!("{}.npy", normalised))
}

/// 读入灰度组织学图像 (PNG/TIFF, 8 或 16 位).
///
/// 8 位图像按 `image` 的约定放大到 16 位数值范围, 返回行优先的
/// `f32` 数组.
pub fn load_image<P: AsRef<Path>>(path: P) -> Result<Array2<f32>, ImageReadError> {
    let image = image::open(path.as_ref())?.to_luma16();
    let (width, height) = image.dimensions();
    Ok(Array2::from_shape_fn(
        (height as usize, width as usize),
        |(i, j)| f32::from(image.get_pixel(j as u32, i as u32)[0]),
    ))
}

/// 组织学图像对应的对齐记录文件名.
pub fn alignment_file_name(histology_path: &Path) -> String {
    let name = histology_path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!("{:x}.json", md5::compute(name.as_bytes()))
}

/// 保存对齐记录, 返回写入的路径. 同名旧记录被覆盖.
pub fn save_alignment(directory: &Path, record: &AlignmentRecord) -> Result<PathBuf, PersistError> {
    fs::create_dir_all(directory)?;
    let path = directory.join(alignment_file_name(&record.histology_file_path));
    let file = fs::File::create(&path)?;
    serde_json::to_writer_pretty(file, record)?;
    Ok(path)
}

/// 读回一份对齐记录.
pub fn load_alignment<P: AsRef<Path>>(path: P) -> Result<AlignmentRecord, PersistError> {
    let file = fs::File::open(path.as_ref())?;
    Ok(serde_json::from_reader(file)?)
}

/// 枚举目录下所有对齐记录路径 (排除元数据文件), 按文件名排序.
pub fn gather_alignment_paths(directory: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for entry in fs::read_dir(directory)? {
        let path = entry?.path();
        if path.extension().and_then(|extension| extension.to_str()) != Some("json") {
            continue;
        }
        if path.file_name().and_then(|name| name.to_str()) == Some(METADATA_FILE_NAME) {
            continue;
        }
        paths.push(path);
    }
    paths.sort();
    Ok(paths)
}

/// 图像目录的元数据: 切片的人工排序.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DirectoryMetadata {
    /// 按用户调整后的顺序排列的图像路径.
    pub image_paths: Vec<PathBuf>,
}

impl DirectoryMetadata {
    /// 保存到目录下的元数据文件.
    pub fn save(&self, directory: &Path) -> Result<PathBuf, PersistError> {
        fs::create_dir_all(directory)?;
        let path = directory.join(METADATA_FILE_NAME);
        let file = fs::File::create(&path)?;
        serde_json::to_writer_pretty(file, self)?;
        Ok(path)
    }

    /// 从目录下的元数据文件读回.
    pub fn load(directory: &Path) -> Result<Self, PersistError> {
        let file = fs::File::open(directory.join(METADATA_FILE_NAME))?;
        Ok(serde_json::from_reader(file)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{HistologySettings, Orientation, VolumeSettings};

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("atlas-berry-io-{}-{}", tag, std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn record(histology_name: &str) -> AlignmentRecord {
        AlignmentRecord {
            volume_file_path: PathBuf::from("/data/atlas_25um.npy"),
            volume_settings: VolumeSettings {
                orientation: Orientation::Sagittal,
                pitch: -4,
                yaw: 9,
                offset: -30,
                resolution: Resolution::Micron25,
                shape: (528, 320, 456),
            },
            volume_scaling_factor: 0.5,
            volume_pixel_width: 160,
            volume_pixel_height: 264,
            histology_file_path: PathBuf::from("/data").join(histology_name),
            histology_settings: HistologySettings {
                rotation: -7,
                translation_x: 12,
                translation_y: 0,
                scale_x: 0.95,
                scale_y: 1.05,
                shear_x: 0.0,
                shear_y: 0.02,
            },
            histology_scaling_factor: 0.25,
            histology_pixel_width: 800,
            histology_pixel_height: 600,
            downsampling_factor: 1.0,
        }
    }

    /// 记录文件名: 原图文件名的 md5, 32 位十六进制.
    #[test]
    fn alignment_file_name_is_md5_of_file_name() {
        let name = alignment_file_name(Path::new("/some/where/slice_042.png"));
        assert!(name.ends_with(".json"));
        let stem = name.trim_end_matches(".json");
        assert_eq!(stem.len(), 32);
        assert!(stem.chars().all(|c| c.is_ascii_hexdigit()));

        // 仅取决于文件名, 与所在目录无关.
        assert_eq!(
            name,
            alignment_file_name(Path::new("/elsewhere/slice_042.png"))
        );
        assert_ne!(
            name,
            alignment_file_name(Path::new("/some/where/slice_043.png"))
        );
    }

    #[test]
    fn save_load_round_trip_and_overwrite() {
        let dir = temp_dir("round-trip");

        let record = record("slice_001.png");
        let path = save_alignment(&dir, &record).unwrap();
        assert_eq!(load_alignment(&path).unwrap(), record);

        // 同一张图重新保存: 路径不变, 内容被覆盖.
        let mut updated = record.clone();
        updated.histology_settings.rotation = 3;
        let second_path = save_alignment(&dir, &updated).unwrap();
        assert_eq!(path, second_path);
        assert_eq!(load_alignment(&path).unwrap(), updated);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn gather_skips_metadata_and_sorts() {
        let dir = temp_dir("gather");

        let first = save_alignment(&dir, &record("a.png")).unwrap();
        let second = save_alignment(&dir, &record("b.png")).unwrap();
        DirectoryMetadata {
            image_paths: vec![PathBuf::from("/data/b.png"), PathBuf::from("/data/a.png")],
        }
        .save(&dir)
        .unwrap();
        std::fs::write(dir.join("notes.txt"), "irrelevant").unwrap();

        let mut expected = vec![first, second];
        expected.sort();
        assert_eq!(gather_alignment_paths(&dir).unwrap(), expected);

        let metadata = DirectoryMetadata::load(&dir).unwrap();
        assert_eq!(metadata.image_paths.len(), 2);
        assert_eq!(metadata.image_paths[0], PathBuf::from("/data/b.png"));

        std::fs::remove_dir_all(&dir).unwrap();
    }

    /// 8 位灰度 PNG 往返: 数值放大 257 倍, 形状为 (高, 宽).
    #[test]
    fn load_image_preserves_layout_and_scale() {
        let dir = temp_dir("image");
        let path = dir.join("slice.png");
        image::GrayImage::from_fn(7, 5, |x, y| image::Luma([(x * 10 + y) as u8]))
            .save(&path)
            .unwrap();

        let loaded = load_image(&path).unwrap();
        assert_eq!(loaded.dim(), (5, 7));
        assert_eq!(loaded[(0, 0)], 0.0);
        assert_eq!(loaded[(4, 6)], (64 * 257) as f32);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn structure_mask_path_is_normalised() {
        let path = structure_mask_path(" Primary Motor Area ", Resolution::Micron10);
        assert!(path.ends_with("structure_masks/10um/primary-motor-area.npy"));
    }

    #[test]
    fn atlas_path_encodes_resolution() {
        let path = atlas_path(Resolution::Micron50);
        assert!(path.ends_with("atlases/atlas_50um.npy"));
    }

    #[test]
    fn missing_image_is_an_error() {
        assert!(matches!(
            load_image("/nonexistent/slice.png"),
            Err(ImageReadError::Decode(_))
        ));
    }
}
