//! 正向/反向配准管线.
//!
//! 正向: 把显示分辨率下的组织学图像对齐到图谱切面坐标系 (交互与重建用).
//! 反向: 把图谱或结构 mask 的切面投影回组织学图像原生分辨率 (定量用).
//! 两个方向共用同一个矩阵组合, 区别仅在 [`Mapping`] 方向、平移换算系数
//! 与前后的重采样/裁剪步骤.

pub mod transform;
pub mod warp;
pub mod worker;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use ndarray::{s, Array2};

pub use transform::{compose_transform, inverted, NonInvertibleTransform};
pub use warp::{rescale, warp_affine, Mapping};

use crate::consts::ATLAS_VOLUME_NAME;
use crate::io::{self, ImageReadError};
use crate::models::AlignmentRecord;
use crate::slicer::{self, Volume, VolumeReadError};
use crate::{Idx2d, Interpolation};

/// 配准管线错误.
#[derive(Debug)]
pub enum RegistrationError {
    /// 对齐参数组合出奇异矩阵 (配置错误).
    NonInvertibleTransform,

    /// 图谱体数据在记录路径与数据目录下都不存在 (资源缺失).
    VolumeNotFound(PathBuf),

    /// 无法把名字解析为已有的结构 mask (资源缺失).
    UnknownStructure(String),

    /// 裁剪目标形状超过来源形状.
    ShapeMismatch {
        /// 来源形状.
        larger: Idx2d,
        /// 目标形状.
        smaller: Idx2d,
    },

    /// 体数据读取失败.
    VolumeRead(VolumeReadError),

    /// 组织学图像读取失败.
    ImageRead(ImageReadError),
}

impl RegistrationError {
    /// 是否为资源缺失类错误 (批处理中逐条跳过即可, 不中断整体).
    #[inline]
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            RegistrationError::VolumeNotFound(_) | RegistrationError::UnknownStructure(_)
        )
    }
}

impl From<NonInvertibleTransform> for RegistrationError {
    fn from(_: NonInvertibleTransform) -> Self {
        Self::NonInvertibleTransform
    }
}

impl From<VolumeReadError> for RegistrationError {
    fn from(value: VolumeReadError) -> Self {
        Self::VolumeRead(value)
    }
}

impl From<ImageReadError> for RegistrationError {
    fn from(value: ImageReadError) -> Self {
        Self::ImageRead(value)
    }
}

/// 正向路径的组织学重采样系数: 显示分辨率相对图谱切面的比值.
#[inline]
pub fn histology_scaling_factor(record: &AlignmentRecord) -> f64 {
    record.histology_scaling_factor
        / (record.volume_scaling_factor * record.downsampling_factor)
}

/// 反向路径的切面重采样系数, 恰为正向系数的倒数.
#[inline]
pub fn volume_scaling_factor(record: &AlignmentRecord) -> f64 {
    record.volume_scaling_factor / record.histology_scaling_factor * record.downsampling_factor
}

/// 反向路径的平移换算系数: 显示分辨率下记录的平移量换算到全分辨率.
#[inline]
pub fn translation_scaling(record: &AlignmentRecord) -> f64 {
    record.volume_scaling_factor * record.downsampling_factor / record.histology_scaling_factor
}

/// 从大图中裁出小图时的左上角.
///
/// 长宽比差距更大的轴居中 (向下取整), 另一轴紧贴 0. 目标在任一轴上
/// 超过来源都是错误.
pub fn top_left_point(larger: Idx2d, smaller: Idx2d) -> Result<Idx2d, RegistrationError> {
    if smaller.0 > larger.0 || smaller.1 > larger.1 {
        return Err(RegistrationError::ShapeMismatch { larger, smaller });
    }

    let ratio_rows = larger.0 as f64 / smaller.0 as f64;
    let ratio_cols = larger.1 as f64 / smaller.1 as f64;

    if ratio_rows >= ratio_cols {
        Ok(((larger.0 - smaller.0) / 2, 0))
    } else {
        Ok((0, (larger.1 - smaller.1) / 2))
    }
}

/// 居中裁剪到目标形状.
pub fn crop_to_shape(
    image: &Array2<f32>,
    target: Idx2d,
) -> Result<Array2<f32>, RegistrationError> {
    let top_left = top_left_point(image.dim(), target)?;
    Ok(image
        .slice(s![
            top_left.0..top_left.0 + target.0,
            top_left.1..top_left.1 + target.1
        ])
        .to_owned())
}

/// 居中补零到目标形状. 奇数余量多出的一行/列补在下侧/右侧.
///
/// 某轴上图像已不小于目标时, 该轴保持原样 (从不裁剪).
pub fn pad_to_shape(image: &Array2<f32>, target: Idx2d) -> Array2<f32> {
    let (rows, cols) = image.dim();
    let pad_rows = target.0.saturating_sub(rows);
    let pad_cols = target.1.saturating_sub(cols);

    let mut output = Array2::zeros((rows + pad_rows, cols + pad_cols));
    output
        .slice_mut(s![
            pad_rows / 2..pad_rows / 2 + rows,
            pad_cols / 2..pad_cols / 2 + cols
        ])
        .assign(image);
    output
}

/// 按最近使用序淘汰的体数据缓存.
///
/// 由调用方持有并注入 [`Registrator`], 缓存命中期间同一路径至多触发
/// 一次磁盘读取. 解析失败的名字不会写入缓存.
#[derive(Debug, Clone)]
pub struct VolumeCache {
    capacity: usize,
    entries: Vec<(PathBuf, Arc<Volume>)>,
}

impl Default for VolumeCache {
    /// 容量 2: 反向投影通常在图谱与单个结构 mask 之间交替.
    fn default() -> Self {
        Self::new(2)
    }
}

impl VolumeCache {
    /// 指定容量的空缓存.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity >= 1, "缓存容量必须至少为 1");
        Self {
            capacity,
            entries: Vec::new(),
        }
    }

    /// 取出缓存的体数据, 未命中时从磁盘载入并淘汰最久未用项.
    pub fn get_or_load(&mut self, path: &Path) -> Result<Arc<Volume>, VolumeReadError> {
        if let Some(position) = self.entries.iter().position(|(entry, _)| entry == path) {
            let entry = self.entries.remove(position);
            let volume = entry.1.clone();
            self.entries.insert(0, entry);
            return Ok(volume);
        }

        let volume = Arc::new(Volume::open(path)?);
        self.entries.insert(0, (path.to_path_buf(), volume.clone()));
        self.entries.truncate(self.capacity);
        Ok(volume)
    }

    /// 是否缓存了该路径.
    #[inline]
    pub fn contains(&self, path: &Path) -> bool {
        self.entries.iter().any(|(entry, _)| entry == path)
    }

    /// 当前缓存条目数.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// 缓存是否为空.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// 正向投影: 组织学图像 -> 图谱切面坐标系.
///
/// 重采样固定使用最近邻 (与交互视图的显示链一致), 仿射变换使用
/// 调用方选择的插值.
pub fn forward_image(
    image: &Array2<f32>,
    record: &AlignmentRecord,
    interpolation: Interpolation,
) -> Result<Array2<f32>, RegistrationError> {
    let image = rescale(
        image,
        histology_scaling_factor(record),
        Interpolation::Nearest,
    );

    let target = slicer::plane_shape(&record.volume_settings);

    // 重采样结果偶尔比目标大一像素, 先截掉多余部分再补齐.
    let (rows, cols) = image.dim();
    let image = image
        .slice(s![..rows.min(target.0), ..cols.min(target.1)])
        .to_owned();
    let image = pad_to_shape(&image, target);

    let matrix = compose_transform(&record.histology_settings, target.1, target.0, 1.0);
    Ok(warp_affine(
        &image,
        &matrix,
        Mapping::Forward,
        interpolation,
    )?)
}

/// 正反双向投影器.
///
/// 插值偏好在构建时固定: 结构 mask 用最近邻, 灰度图用双线性.
#[derive(Debug, Clone)]
pub struct Registrator {
    interpolation: Interpolation,
    cache: VolumeCache,
}

impl Registrator {
    /// 使用缺省容量缓存构建.
    pub fn new(interpolation: Interpolation) -> Self {
        Self::with_cache(interpolation, VolumeCache::default())
    }

    /// 注入外部缓存构建, 以便多个投影器共享已载入的体数据.
    pub fn with_cache(interpolation: Interpolation, cache: VolumeCache) -> Self {
        Self {
            interpolation,
            cache,
        }
    }

    /// 当前缓存.
    #[inline]
    pub fn cache(&self) -> &VolumeCache {
        &self.cache
    }

    /// 正向投影. 见 [`forward_image`].
    pub fn forward(
        &self,
        image: &Array2<f32>,
        record: &AlignmentRecord,
    ) -> Result<Array2<f32>, RegistrationError> {
        forward_image(image, record, self.interpolation)
    }

    /// 反向投影: 图谱或结构 mask -> 组织学原生分辨率.
    ///
    /// `volume_name` 为 `"atlas"` (不区分大小写) 时使用记录中的图谱
    /// 路径, 路径失效则回退到数据目录; 其余名字解析为结构 mask.
    /// `histology` 给定时仅用其形状, 省去一次原图读取.
    pub fn reverse(
        &mut self,
        record: &AlignmentRecord,
        volume_name: &str,
        histology: Option<&Array2<f32>>,
    ) -> Result<Array2<f32>, RegistrationError> {
        let path = resolve_volume_path(record, volume_name)?;
        let volume = self.cache.get_or_load(&path)?;

        let histology_shape = match histology {
            Some(image) => image.dim(),
            None => io::load_image(&record.histology_file_path)?.dim(),
        };

        let cut = slicer::slice_volume(&volume, &record.volume_settings, self.interpolation);
        let cut = rescale(&cut, volume_scaling_factor(record), self.interpolation);

        let (rows, cols) = cut.dim();
        let matrix = compose_transform(
            &record.histology_settings,
            cols,
            rows,
            translation_scaling(record),
        );
        // 同一矩阵: 正向时取逆使用, 反向时原样作为回拉映射.
        let warped = warp_affine(&cut, &matrix, Mapping::Pullback, self.interpolation)?;

        crop_to_shape(&warped, histology_shape)
    }
}

/// 把体数据名解析为本地路径. 失败时不产生任何副作用.
fn resolve_volume_path(
    record: &AlignmentRecord,
    volume_name: &str,
) -> Result<PathBuf, RegistrationError> {
    if volume_name.eq_ignore_ascii_case(ATLAS_VOLUME_NAME) {
        if record.volume_file_path.exists() {
            return Ok(record.volume_file_path.clone());
        }

        log::warn!(
            "记录中的图谱路径 {} 在当前文件系统上不存在, 回退到数据目录.",
            record.volume_file_path.display()
        );
        let fallback = io::atlas_path(record.volume_settings.resolution);
        if fallback.exists() {
            Ok(fallback)
        } else {
            Err(RegistrationError::VolumeNotFound(fallback))
        }
    } else {
        let path = io::structure_mask_path(volume_name, record.volume_settings.resolution);
        if path.exists() {
            Ok(path)
        } else {
            Err(RegistrationError::UnknownStructure(volume_name.to_string()))
        }
    }
}
