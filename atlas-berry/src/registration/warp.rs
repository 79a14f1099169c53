//! 2D 重采样原语: 仿射变换施加与等比缩放.
//!
//! 仿射矩阵按像素坐标 `(x, y, 1)` 的列向量约定解释. [`Mapping`] 显式
//! 声明矩阵的方向, 调用方不再依赖 "矩阵是否已预先取逆" 的隐式约定.

use nalgebra::{Matrix3, Vector3};
use ndarray::Array2;
use num::Float;

use super::transform::{inverted, NonInvertibleTransform};
use crate::Interpolation;

/// 仿射矩阵相对重采样的方向.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mapping {
    /// 矩阵把输入像素映射到输出像素. 重采样内部对其取逆 (带检查).
    Forward,

    /// 矩阵已经把输出像素映射回输入像素, 原样使用.
    Pullback,
}

#[inline]
fn cast<T: Float>(value: f64) -> T {
    // f64 -> Float 在 f32/f64 上不会失败.
    T::from(value).unwrap()
}

#[inline]
fn at_or_zero<T: Float>(image: &Array2<T>, row: f64, col: f64) -> T {
    let (rows, cols) = image.dim();
    if row < 0.0 || col < 0.0 {
        return T::zero();
    }
    let (row, col) = (row as usize, col as usize);
    if row >= rows || col >= cols {
        return T::zero();
    }
    image[(row, col)]
}

fn sample<T: Float>(image: &Array2<T>, x: f64, y: f64, interpolation: Interpolation) -> T {
    match interpolation {
        Interpolation::Nearest => at_or_zero(image, y.round(), x.round()),
        Interpolation::Bilinear => {
            let (x0, y0) = (x.floor(), y.floor());
            let (fx, fy) = (x - x0, y - y0);

            let blend = |weight: f64, row: f64, col: f64| -> T {
                if weight == 0.0 {
                    T::zero()
                } else {
                    cast::<T>(weight) * at_or_zero(image, row, col)
                }
            };

            blend((1.0 - fx) * (1.0 - fy), y0, x0)
                + blend(fx * (1.0 - fy), y0, x0 + 1.0)
                + blend((1.0 - fx) * fy, y0 + 1.0, x0)
                + blend(fx * fy, y0 + 1.0, x0 + 1.0)
        }
    }
}

/// 对图像施加仿射变换. 输出形状与输入一致, 越界处填 0.
pub fn warp_affine<T: Float>(
    image: &Array2<T>,
    matrix: &Matrix3<f64>,
    mapping: Mapping,
    interpolation: Interpolation,
) -> Result<Array2<T>, NonInvertibleTransform> {
    let pullback = match mapping {
        Mapping::Forward => inverted(matrix)?,
        Mapping::Pullback => *matrix,
    };

    let mut output = Array2::from_elem(image.dim(), T::zero());
    for ((i, j), value) in output.indexed_iter_mut() {
        let source = pullback * Vector3::new(j as f64, i as f64, 1.0);
        *value = sample(image, source[0], source[1], interpolation);
    }
    Ok(output)
}

/// 等比缩放. 输出形状为 `round(形状 · factor)` (至少 1), 采样点按
/// 像素中心对齐: 输出像素 `i` 对应输入坐标 `(i + 0.5) / factor - 0.5`.
pub fn rescale<T: Float>(
    image: &Array2<T>,
    factor: f64,
    interpolation: Interpolation,
) -> Array2<T> {
    assert!(
        factor.is_finite() && factor > 0.0,
        "缩放系数必须为正有限值, 实为 {}",
        factor
    );

    let (rows, cols) = image.dim();
    let out_rows = ((rows as f64 * factor).round() as usize).max(1);
    let out_cols = ((cols as f64 * factor).round() as usize).max(1);

    let mut output = Array2::from_elem((out_rows, out_cols), T::zero());
    for ((i, j), value) in output.indexed_iter_mut() {
        let y = (i as f64 + 0.5) / factor - 0.5;
        let x = (j as f64 + 0.5) / factor - 0.5;
        *value = sample(image, x, y, interpolation);
    }
    output
}
