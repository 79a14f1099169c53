//! 对齐体数据重建: 把一批已配准的组织学切片写回 3D 数组.
//!
//! 每条记录正向投影到其切面坐标系后, 沿切面网格把像素值以 `max`
//! 方式累积进共享体数据. 单条记录失败只记日志并跳过, 批处理继续;
//! 取消标志在记录之间检查. 启用 `rayon` 特性时投影阶段并行执行,
//! 写回阶段保持顺序以避免体素竞争.

use std::sync::atomic::{AtomicBool, Ordering};

use ndarray::{Array2, Array3};

use crate::io;
use crate::models::AlignmentRecord;
use crate::registration;
use crate::slicer::CutPlane;
use crate::Interpolation;

/// 重建错误.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildError {
    /// 记录列表为空, 无从确定目标体数据形状.
    EmptyAlignment,
}

/// 重建结果.
#[derive(Debug)]
pub enum BuildOutcome {
    /// 所有记录处理完毕.
    Completed(Array3<u16>),

    /// 中途被取消, 携带已累积的部分结果.
    Cancelled(Array3<u16>),
}

/// 重建对齐体数据.
///
/// 目标形状取自首条记录的体数据形状. `progress` 在每条记录处理完后
/// 以 `(已完成, 总数)` 调用一次; `cancel` 置位后在下一条记录前停止.
pub fn build_aligned_volume<F>(
    records: &[AlignmentRecord],
    interpolation: Interpolation,
    cancel: &AtomicBool,
    mut progress: F,
) -> Result<BuildOutcome, BuildError>
where
    F: FnMut(usize, usize),
{
    if records.is_empty() {
        return Err(BuildError::EmptyAlignment);
    }

    let (n0, n1, n2) = records[0].volume_settings.shape;
    let mut volume = Array3::<u16>::zeros([n0, n1, n2]);

    let projections = project_all(records, interpolation, cancel);

    let total = records.len();
    for (index, (record, projection)) in records.iter().zip(projections).enumerate() {
        if cancel.load(Ordering::Acquire) {
            log::debug!("重建在第 {}/{} 条记录前被取消.", index + 1, total);
            return Ok(BuildOutcome::Cancelled(volume));
        }

        if let Some(projection) = projection {
            splat(&mut volume, record, &projection);
            log::debug!(
                "已写回 {} ({}/{}).",
                record.histology_file_path.display(),
                index + 1,
                total
            );
        }
        progress(index + 1, total);
    }

    Ok(BuildOutcome::Completed(volume))
}

/// 单条记录的读图与正向投影. 失败返回 `None` 并记日志.
fn project_one(record: &AlignmentRecord, interpolation: Interpolation) -> Option<Array2<f32>> {
    let image = match io::load_image(&record.histology_file_path) {
        Ok(image) => image,
        Err(error) => {
            log::warn!(
                "跳过 {}: 图像读取失败 ({:?}).",
                record.histology_file_path.display(),
                error
            );
            return None;
        }
    };

    match registration::forward_image(&image, record, interpolation) {
        Ok(projection) => Some(projection),
        Err(error) => {
            log::warn!(
                "跳过 {}: 正向投影失败 ({:?}).",
                record.histology_file_path.display(),
                error
            );
            None
        }
    }
}

cfg_if::cfg_if! {
    if #[cfg(feature = "rayon")] {
        fn project_all(
            records: &[AlignmentRecord],
            interpolation: Interpolation,
            cancel: &AtomicBool,
        ) -> Vec<Option<Array2<f32>>> {
            use rayon::prelude::*;

            records
                .par_iter()
                .map(|record| {
                    if cancel.load(Ordering::Acquire) {
                        return None;
                    }
                    project_one(record, interpolation)
                })
                .collect()
        }
    } else {
        fn project_all(
            records: &[AlignmentRecord],
            interpolation: Interpolation,
            cancel: &AtomicBool,
        ) -> Vec<Option<Array2<f32>>> {
            records
                .iter()
                .map(|record| {
                    if cancel.load(Ordering::Acquire) {
                        return None;
                    }
                    project_one(record, interpolation)
                })
                .collect()
        }
    }
}

/// 沿切面网格把投影结果以 `max` 方式累积进体数据.
fn splat(volume: &mut Array3<u16>, record: &AlignmentRecord, projection: &Array2<f32>) {
    let plane = CutPlane::from_settings(&record.volume_settings);
    assert_eq!(
        projection.dim(),
        plane.shape(),
        "正向投影结果与切面网格形状不一致"
    );

    let shape = volume.dim();
    for ((i, j), &value) in projection.indexed_iter() {
        if value <= 0.0 {
            continue;
        }

        let point = plane.point((i as f64, j as f64));
        let (v0, v1, v2) = (point[0].round(), point[1].round(), point[2].round());
        if v0 < 0.0 || v1 < 0.0 || v2 < 0.0 {
            continue;
        }
        let voxel = (v0 as usize, v1 as usize, v2 as usize);
        if voxel.0 >= shape.0 || voxel.1 >= shape.1 || voxel.2 >= shape.2 {
            continue;
        }

        let quantised = value.round().clamp(0.0, f32::from(u16::MAX)) as u16;
        volume[voxel] = volume[voxel].max(quantised);
    }
}
