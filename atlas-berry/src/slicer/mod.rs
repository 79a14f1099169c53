//! 任意方向体数据切片.
//!
//! 给定 [`VolumeSettings`], 从 3D 体数据中提取一张 2D 斜切面:
//! 切面原点为体数据精确中心 (偶数轴长时取半体素位置) 沿切片轴平移
//! `offset`, 法向量与面内基向量由方向查找表经 pitch/yaw 旋转得到,
//! 输出自动裁剪到切面与体数据包围盒交集的紧致范围.
//!
//! 采样在体素整数网格上进行, 越界处取 0.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use itertools::iproduct;
use nalgebra::Vector3;
use ndarray::{Array2, Array3};
use nifti::{IntoNdArray, NiftiObject, ReaderOptions};

use crate::maths::{self, orientation_frame, unit_axis};
use crate::models::VolumeSettings;
use crate::{Idx2d, Idx2dF, Idx3d, Interpolation};

/// 直线与平面相交参数 `t` 的容差.
const EDGE_EPSILON: f64 = 1e-9;

/// 体数据读取错误.
#[derive(Debug)]
pub enum VolumeReadError {
    /// nifti 文件读取失败.
    Nifti(nifti::NiftiError),

    /// npy 文件读取失败.
    Npy(ndarray_npy::ReadNpyError),

    /// 文件扩展名无法识别 (支持 `.npy`, `.nii`, `.nii.gz`).
    UnknownFormat(PathBuf),

    /// 数据维数不是 3.
    UnsupportedDims(usize),
}

impl From<nifti::NiftiError> for VolumeReadError {
    fn from(value: nifti::NiftiError) -> Self {
        Self::Nifti(value)
    }
}

impl From<ndarray_npy::ReadNpyError> for VolumeReadError {
    fn from(value: ndarray_npy::ReadNpyError) -> Self {
        Self::Npy(value)
    }
}

/// 切片错误.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SliceError {
    /// 尚未载入体数据.
    VolumeMissing,
}

/// 一份常驻内存的 3D 体数据 (图谱或结构 mask), 统一为 `f32`.
#[derive(Debug, Clone)]
pub struct Volume {
    data: Array3<f32>,
}

impl Volume {
    /// 按扩展名打开本地体数据文件.
    ///
    /// `.npy` 文件假定已预转换为 8-bit; `.nii` / `.nii.gz` 按 nifti
    /// 惯例从 \[W, H, z\] 重排为 \[z, H, W\].
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, VolumeReadError> {
        let path = path.as_ref();
        match path.extension().and_then(|extension| extension.to_str()) {
            Some("npy") => Self::open_npy(path),
            Some("nii") | Some("gz") => Self::open_nifti(path),
            _ => Err(VolumeReadError::UnknownFormat(path.to_path_buf())),
        }
    }

    fn open_npy(path: &Path) -> Result<Self, VolumeReadError> {
        // 优先按 8-bit 读取, 兼容未预转换的 f32 数据.
        match ndarray_npy::read_npy::<_, Array3<u8>>(path) {
            Ok(data) => Ok(Self {
                data: data.mapv(f32::from),
            }),
            Err(_) => {
                let data: Array3<f32> = ndarray_npy::read_npy(path)?;
                Ok(Self { data })
            }
        }
    }

    fn open_nifti(path: &Path) -> Result<Self, VolumeReadError> {
        let obj = ReaderOptions::new().read_file(path)?;

        let data = obj.into_volume().into_ndarray::<f32>()?;
        if data.ndim() != 3 {
            return Err(VolumeReadError::UnsupportedDims(data.ndim()));
        }
        let shape = (data.shape()[2], data.shape()[1], data.shape()[0]);

        // [W, H, z] -> [z, H, W].
        let data = data.permuted_axes([2, 1, 0].as_slice());

        // The nature of nifti data field layout.
        debug_assert!(data.is_standard_layout());

        // 该操作不会生成 `Err`, 可直接 unwrap.
        let data = Array3::<f32>::from_shape_vec(shape, data.into_raw_vec()).unwrap();

        Ok(Self { data })
    }

    /// 从现成数组构建.
    #[inline]
    pub fn from_array(data: Array3<f32>) -> Self {
        Self { data }
    }

    /// 体数据形状.
    #[inline]
    pub fn shape(&self) -> Idx3d {
        let shape = self.data.shape();
        (shape[0], shape[1], shape[2])
    }

    /// 底层数组视图.
    #[inline]
    pub fn data(&self) -> &Array3<f32> {
        &self.data
    }

    /// 最近邻采样, 越界取 0.
    fn sample_nearest(&self, point: &Vector3<f64>) -> f32 {
        let (n0, n1, n2) = self.shape();
        let i = point[0].round();
        let j = point[1].round();
        let k = point[2].round();
        if i < 0.0 || j < 0.0 || k < 0.0 {
            return 0.0;
        }
        let (i, j, k) = (i as usize, j as usize, k as usize);
        if i >= n0 || j >= n1 || k >= n2 {
            return 0.0;
        }
        self.data[(i, j, k)]
    }

    /// 三线性采样, 越界的相邻体素按 0 参与加权.
    fn sample_trilinear(&self, point: &Vector3<f64>) -> f32 {
        let base = point.map(f64::floor);
        let frac = point - base;

        let mut accumulator = 0.0;
        for (di, dj, dk) in iproduct!(0..2usize, 0..2usize, 0..2usize) {
            let weight = (if di == 0 { 1.0 - frac[0] } else { frac[0] })
                * (if dj == 0 { 1.0 - frac[1] } else { frac[1] })
                * (if dk == 0 { 1.0 - frac[2] } else { frac[2] });
            if weight == 0.0 {
                continue;
            }
            accumulator += weight
                * f64::from(self.at_or_zero(
                    base[0] + di as f64,
                    base[1] + dj as f64,
                    base[2] + dk as f64,
                ));
        }
        accumulator as f32
    }

    #[inline]
    fn at_or_zero(&self, i: f64, j: f64, k: f64) -> f32 {
        let (n0, n1, n2) = self.shape();
        if i < 0.0 || j < 0.0 || k < 0.0 {
            return 0.0;
        }
        let (i, j, k) = (i as usize, j as usize, k as usize);
        if i >= n0 || j >= n1 || k >= n2 {
            return 0.0;
        }
        self.data[(i, j, k)]
    }
}

/// 一张切面的完整几何描述.
///
/// `point` 把切面像素坐标映射回体数据体素坐标, 切片与正向投影的
/// 网格写回共用同一映射, 保证两者像素对齐.
#[derive(Debug, Clone)]
pub struct CutPlane {
    origin: Vector3<f64>,
    normal: Vector3<f64>,
    row_dir: Vector3<f64>,
    col_dir: Vector3<f64>,
    row_start: f64,
    col_start: f64,
    rows: usize,
    cols: usize,
}

impl CutPlane {
    /// 由切片参数构建切面几何.
    pub fn from_settings(settings: &VolumeSettings) -> Self {
        let frame = orientation_frame(settings.orientation);
        let rotation = maths::view_rotation(settings.pitch, settings.yaw, settings.orientation);

        let origin = maths::compute_origin(maths::compute_centre(settings.shape), settings);
        let normal = rotation * unit_axis(frame.normal_axis);
        let row_dir = rotation * unit_axis(frame.row_axis);
        let col_dir = rotation * unit_axis(frame.col_axis);

        let corners = plane_box_intersections(settings.shape, &origin, &normal);

        let (mut row_start, mut col_start) = (0.0, 0.0);
        let (mut rows, mut cols) = (0, 0);
        if !corners.is_empty() {
            let mut row_range = (f64::INFINITY, f64::NEG_INFINITY);
            let mut col_range = (f64::INFINITY, f64::NEG_INFINITY);
            for corner in &corners {
                let delta = corner - origin;
                let row = delta.dot(&row_dir);
                let col = delta.dot(&col_dir);
                row_range = (row_range.0.min(row), row_range.1.max(row));
                col_range = (col_range.0.min(col), col_range.1.max(col));
            }
            row_start = row_range.0;
            col_start = col_range.0;
            rows = ((row_range.1 - row_range.0) + EDGE_EPSILON).floor() as usize + 1;
            cols = ((col_range.1 - col_range.0) + EDGE_EPSILON).floor() as usize + 1;
        }

        Self {
            origin,
            normal,
            row_dir,
            col_dir,
            row_start,
            col_start,
            rows,
            cols,
        }
    }

    /// 切面像素坐标 (行, 列) 对应的体素坐标.
    #[inline]
    pub fn point(&self, pixel: Idx2dF) -> Vector3<f64> {
        self.origin
            + self.row_dir * (self.row_start + pixel.0)
            + self.col_dir * (self.col_start + pixel.1)
    }

    /// 切面输出形状 (行, 列).
    #[inline]
    pub fn shape(&self) -> Idx2d {
        (self.rows, self.cols)
    }

    /// 切面法向量.
    #[inline]
    pub fn normal(&self) -> &Vector3<f64> {
        &self.normal
    }
}

/// 切面与体数据包围盒 12 条棱的交点.
fn plane_box_intersections(
    shape: Idx3d,
    origin: &Vector3<f64>,
    normal: &Vector3<f64>,
) -> Vec<Vector3<f64>> {
    let (n0, n1, n2) = shape;
    let extent = [n0 as f64 - 1.0, n1 as f64 - 1.0, n2 as f64 - 1.0];

    let mut points = Vec::new();
    for axis in 0..3 {
        let (other1, other2) = match axis {
            0 => (1, 2),
            1 => (0, 2),
            _ => (0, 1),
        };
        for (v1, v2) in iproduct!([0.0, extent[other1]], [0.0, extent[other2]]) {
            let mut start = Vector3::zeros();
            start[other1] = v1;
            start[other2] = v2;
            let mut direction = Vector3::zeros();
            direction[axis] = extent[axis];

            let denominator = normal.dot(&direction);
            if denominator.abs() < EDGE_EPSILON {
                // 棱与切面平行. 若整条棱落在切面内则两端点都参与包络.
                if normal.dot(&(start - origin)).abs() < EDGE_EPSILON {
                    points.push(start);
                    points.push(start + direction);
                }
                continue;
            }

            let t = normal.dot(&(origin - start)) / denominator;
            if (-EDGE_EPSILON..=1.0 + EDGE_EPSILON).contains(&t) {
                points.push(start + direction * t);
            }
        }
    }
    points
}

/// 不校验持有状态, 直接对给定体数据切片.
pub fn slice_volume(
    volume: &Volume,
    settings: &VolumeSettings,
    interpolation: Interpolation,
) -> Array2<f32> {
    assert_eq!(
        volume.shape(),
        settings.shape,
        "体数据形状与切片参数中记录的形状不一致"
    );

    let plane = CutPlane::from_settings(settings);
    let mut cut = Array2::zeros(plane.shape());
    for ((i, j), value) in cut.indexed_iter_mut() {
        let point = plane.point((i as f64, j as f64));
        *value = match interpolation {
            Interpolation::Nearest => volume.sample_nearest(&point),
            Interpolation::Bilinear => volume.sample_trilinear(&point),
        };
    }
    cut
}

/// 不读体素数据即可得到的切面输出形状.
#[inline]
pub fn plane_shape(settings: &VolumeSettings) -> Idx2d {
    CutPlane::from_settings(settings).shape()
}

/// 切面像素坐标到体素坐标的换算 (鼠标拾取用).
#[inline]
pub fn pixel_to_voxel(pixel: Idx2dF, settings: &VolumeSettings) -> Vector3<f64> {
    CutPlane::from_settings(settings).point(pixel)
}

/// 持有可替换体数据的切片器.
#[derive(Debug, Clone, Default)]
pub struct VolumeSlicer {
    volume: Option<Arc<Volume>>,
}

impl VolumeSlicer {
    /// 空切片器, 尚无体数据.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// 从体数据构建.
    #[inline]
    pub fn from_volume(volume: Arc<Volume>) -> Self {
        Self {
            volume: Some(volume),
        }
    }

    /// 替换持有的体数据.
    #[inline]
    pub fn set_volume(&mut self, volume: Arc<Volume>) {
        self.volume = Some(volume);
    }

    /// 当前体数据.
    #[inline]
    pub fn volume(&self) -> Option<&Volume> {
        self.volume.as_deref()
    }

    /// 对持有的体数据切片. 未载入体数据是配置错误, 必须显式报告.
    pub fn slice(
        &self,
        settings: &VolumeSettings,
        interpolation: Interpolation,
    ) -> Result<Array2<f32>, SliceError> {
        let volume = self.volume.as_deref().ok_or(SliceError::VolumeMissing)?;
        Ok(slice_volume(volume, settings, interpolation))
    }
}
