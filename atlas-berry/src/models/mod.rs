//! 配准数据模型: 切片方向、图谱分辨率、体数据/组织学参数与对齐记录.
//!
//! 所有结构均可由 `serde_json` 持久化; 字段名即磁盘 JSON 格式, 不可随意改动.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::consts::ALLOWED_RESOLUTIONS;
use crate::Idx3d;

/// 体数据切片方向.
///
/// 三个变体穷举了所有支持的方向, 下游一律 `match` 分发, 不留缺省分支.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    /// 冠状面. 切片轴为 0 (AP 轴).
    Coronal,

    /// 水平面. 切片轴为 1 (DV 轴).
    Horizontal,

    /// 矢状面. 切片轴为 2 (LR 轴).
    Sagittal,
}

impl Orientation {
    /// 被切片轴在 `(轴0, 轴1, 轴2)` 索引序中的下标.
    #[inline]
    pub fn slicing_axis(self) -> usize {
        match self {
            Orientation::Coronal => 0,
            Orientation::Horizontal => 1,
            Orientation::Sagittal => 2,
        }
    }
}

/// 图谱分辨率 (各向同性体素边长, 微米).
///
/// 序列化为整数微米值, 非法数值在反序列化时报错.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum Resolution {
    /// 10 微米.
    Micron10,

    /// 25 微米.
    Micron25,

    /// 50 微米.
    Micron50,

    /// 100 微米.
    Micron100,
}

impl Resolution {
    /// 微米数值.
    #[inline]
    pub fn microns(self) -> u32 {
        match self {
            Resolution::Micron10 => 10,
            Resolution::Micron25 => 25,
            Resolution::Micron50 => 50,
            Resolution::Micron100 => 100,
        }
    }
}

impl From<Resolution> for u32 {
    #[inline]
    fn from(value: Resolution) -> u32 {
        value.microns()
    }
}

impl TryFrom<u32> for Resolution {
    type Error = String;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            10 => Ok(Resolution::Micron10),
            25 => Ok(Resolution::Micron25),
            50 => Ok(Resolution::Micron50),
            100 => Ok(Resolution::Micron100),
            other => Err(format!(
                "无效分辨率 {} 微米 (合法值: {:?})",
                other, ALLOWED_RESOLUTIONS
            )),
        }
    }
}

/// 参数校验错误.
#[derive(Debug, Clone, PartialEq)]
pub enum SettingsError {
    /// `offset` 超出切片轴合法范围.
    OffsetOutOfRange {
        /// 给定的 offset.
        offset: i32,
        /// 合法闭区间.
        bounds: (i64, i64),
    },

    /// 缩放系数非正.
    NonPositiveScale(f64),
}

/// 体数据切片参数.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeSettings {
    /// 切片方向.
    pub orientation: Orientation,

    /// 俯仰角 (度).
    pub pitch: i32,

    /// 偏航角 (度).
    pub yaw: i32,

    /// 沿切片轴的体素偏移, 0 表示体数据中心.
    pub offset: i32,

    /// 图谱分辨率.
    pub resolution: Resolution,

    /// 体数据形状, `(轴0, 轴1, 轴2)`.
    #[serde(rename = "volume_shape")]
    pub shape: Idx3d,
}

impl VolumeSettings {
    /// 切片轴长度.
    #[inline]
    pub fn axis_len(&self) -> usize {
        let (n0, n1, n2) = self.shape;
        match self.orientation.slicing_axis() {
            0 => n0,
            1 => n1,
            _ => n2,
        }
    }

    /// `offset` 的合法闭区间 `[-⌈n/2⌉, ⌊n/2⌋ - (n 为偶数)]`.
    ///
    /// 偶数轴长 `n` 得到 `[-n/2, n/2 - 1]`, 奇数轴长得到
    /// `[-(n+1)/2, (n-1)/2]`.
    pub fn offset_bounds(&self) -> (i64, i64) {
        let n = self.axis_len() as i64;
        (-((n + 1) / 2), n / 2 - i64::from(n % 2 == 0))
    }

    /// 检查 `offset` 是否落在合法区间内.
    pub fn validate(&self) -> Result<(), SettingsError> {
        let bounds = self.offset_bounds();
        let offset = i64::from(self.offset);
        if offset < bounds.0 || offset > bounds.1 {
            return Err(SettingsError::OffsetOutOfRange {
                offset: self.offset,
                bounds,
            });
        }
        Ok(())
    }
}

/// 组织学图像的七参数 2D 仿射配置.
///
/// 全部参数描述的是把 (已重采样并补齐的) 组织学图像变换到图谱切面坐标系
/// 的正向映射; 反向投影使用同一矩阵的真逆.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistologySettings {
    /// 旋转角 (度). 屏幕坐标 (y 向下) 中顺时针为正.
    #[serde(rename = "rotation_angle")]
    pub rotation: i32,

    /// X 方向平移 (显示分辨率像素).
    #[serde(rename = "x_translation")]
    pub translation_x: i32,

    /// Y 方向平移 (显示分辨率像素).
    #[serde(rename = "y_translation")]
    pub translation_y: i32,

    /// X 方向缩放. 必须为正.
    #[serde(rename = "x_scale")]
    pub scale_x: f64,

    /// Y 方向缩放. 必须为正.
    #[serde(rename = "y_scale")]
    pub scale_y: f64,

    /// X 方向错切 (坐标偏移比例, `x' = x + shear_x·y`).
    #[serde(rename = "x_shear")]
    pub shear_x: f64,

    /// Y 方向错切 (坐标偏移比例, `y' = y + shear_y·x`).
    #[serde(rename = "y_shear")]
    pub shear_y: f64,
}

impl Default for HistologySettings {
    /// 恒等变换参数.
    fn default() -> Self {
        Self {
            rotation: 0,
            translation_x: 0,
            translation_y: 0,
            scale_x: 1.0,
            scale_y: 1.0,
            shear_x: 0.0,
            shear_y: 0.0,
        }
    }
}

impl HistologySettings {
    /// 检查缩放系数为正.
    pub fn validate(&self) -> Result<(), SettingsError> {
        for scale in [self.scale_x, self.scale_y] {
            if scale <= 0.0 {
                return Err(SettingsError::NonPositiveScale(scale));
            }
        }
        Ok(())
    }
}

/// 一张组织学切片的完整对齐记录.
///
/// 该记录 (加上可重新读入的体数据与原图) 足以完整复现正反两个方向的
/// 投影结果, 无需任何运行时状态.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignmentRecord {
    /// 配准时使用的图谱体数据路径.
    pub volume_file_path: PathBuf,

    /// 体数据切片参数.
    #[serde(flatten)]
    pub volume_settings: VolumeSettings,

    /// 体数据缩放系数 (显示分辨率 / 图谱原生分辨率).
    pub volume_scaling_factor: f64,

    /// 配准时图谱切面的显示宽度 (像素).
    pub volume_pixel_width: usize,

    /// 配准时图谱切面的显示高度 (像素).
    pub volume_pixel_height: usize,

    /// 组织学图像路径.
    pub histology_file_path: PathBuf,

    /// 组织学仿射参数.
    #[serde(flatten)]
    pub histology_settings: HistologySettings,

    /// 组织学缩放系数 (显示分辨率 / 组织学原生分辨率).
    pub histology_scaling_factor: f64,

    /// 配准时组织学图像的显示宽度 (像素).
    pub histology_pixel_width: usize,

    /// 配准时组织学图像的显示高度 (像素).
    pub histology_pixel_height: usize,

    /// 组织学图像读入时的降采样系数.
    pub downsampling_factor: f64,
}
