//! 七参数 2D 仿射变换的矩阵组合.
//!
//! 全部矩阵为列向量约定的 3x3 齐次矩阵, 作用于 `(x, y, 1)`, 其中
//! `x` 为列坐标, `y` 为行坐标 (屏幕坐标系, y 向下). 组合次序固定
//! 且不可交换; 反方向一律取组合结果的真逆, 绝不对参数逐项取负.

use nalgebra::{Matrix3, Vector3};

use crate::models::HistologySettings;
use crate::Idx2dF;

/// 仿射矩阵不可逆 (配置错误, 通常由缩放为 0 引起).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NonInvertibleTransform;

/// 平移矩阵.
#[inline]
pub fn translation(dx: f64, dy: f64) -> Matrix3<f64> {
    Matrix3::new(1.0, 0.0, dx, 0.0, 1.0, dy, 0.0, 0.0, 1.0)
}

/// 缩放矩阵.
#[inline]
pub fn scaling(sx: f64, sy: f64) -> Matrix3<f64> {
    Matrix3::new(sx, 0.0, 0.0, 0.0, sy, 0.0, 0.0, 0.0, 1.0)
}

/// 错切矩阵: `x' = x + shx·y`, `y' = y + shy·x`.
///
/// 参数是坐标偏移比例而非角度.
#[inline]
pub fn shearing(shx: f64, shy: f64) -> Matrix3<f64> {
    Matrix3::new(1.0, shx, 0.0, shy, 1.0, 0.0, 0.0, 0.0, 1.0)
}

/// 旋转矩阵, 角度为度. 屏幕坐标系 (y 向下) 中顺时针为正.
#[inline]
pub fn rotation_deg(degrees: f64) -> Matrix3<f64> {
    let (sin, cos) = degrees.to_radians().sin_cos();
    Matrix3::new(cos, -sin, 0.0, sin, cos, 0.0, 0.0, 0.0, 1.0)
}

/// 组合组织学对齐参数为单个正向仿射矩阵.
///
/// `width` / `height` 为被变换图像的像素尺寸, `translation_scaling`
/// 把显示分辨率下记录的平移量换算到目标分辨率 (显示路径取 1).
///
/// 组合次序 (左乘在先, 即最后施加):
/// 绕图像中心旋转, 平移, 缩放锚定修正, 缩放, 错切锚定修正, 错切.
/// 两处锚定修正让缩放与错切在视觉上以图像中心为基准, 与交互视图中
/// 场景坐标系的行为逐像素一致.
pub fn compose_transform(
    settings: &HistologySettings,
    width: usize,
    height: usize,
    translation_scaling: f64,
) -> Matrix3<f64> {
    let width = width as f64;
    let height = height as f64;

    let centre_x = width / 2.0;
    let centre_y = height / 2.0;

    // 缩放后的等效尺寸.
    let scaled_width = settings.scale_x * width;
    let scaled_height = settings.scale_y * height;

    translation(centre_x, centre_y)
        * rotation_deg(f64::from(settings.rotation))
        * translation(-centre_x, -centre_y)
        * translation(
            f64::from(settings.translation_x) * translation_scaling,
            f64::from(settings.translation_y) * translation_scaling,
        )
        * translation(
            -(scaled_width - width) / 2.0,
            -(scaled_height - height) / 2.0,
        )
        * scaling(settings.scale_x, settings.scale_y)
        * translation(
            -settings.shear_x * scaled_height / 2.0,
            -settings.shear_y * scaled_width / 2.0,
        )
        * shearing(settings.shear_x, settings.shear_y)
}

/// 矩阵真逆. 奇异矩阵返回 `Err`.
#[inline]
pub fn inverted(matrix: &Matrix3<f64>) -> Result<Matrix3<f64>, NonInvertibleTransform> {
    matrix.try_inverse().ok_or(NonInvertibleTransform)
}

/// 用仿射矩阵变换一个 (行, 列) 像素坐标.
#[inline]
pub fn apply_to_pixel(matrix: &Matrix3<f64>, pixel: Idx2dF) -> Idx2dF {
    let mapped = matrix * Vector3::new(pixel.1, pixel.0, 1.0);
    (mapped[1], mapped[0])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matrix_eq(a: &Matrix3<f64>, b: &Matrix3<f64>) -> bool {
        (a - b).abs().max() < 1e-10
    }

    /// 缺省参数组合出严格的单位矩阵.
    #[test]
    fn identity_settings_compose_to_identity() {
        let matrix = compose_transform(&HistologySettings::default(), 200, 150, 1.0);
        assert_eq!(matrix, Matrix3::identity());
    }

    /// 旋转以图像中心为锚点: 中心在变换下不动.
    #[test]
    fn rotation_is_anchored_at_image_centre() {
        let settings = HistologySettings {
            rotation: 37,
            ..Default::default()
        };
        let matrix = compose_transform(&settings, 200, 150, 1.0);
        let (row, col) = apply_to_pixel(&matrix, (75.0, 100.0));
        assert!((row - 75.0).abs() < 1e-9);
        assert!((col - 100.0).abs() < 1e-9);
    }

    /// 屏幕坐标系中正角度为顺时针: 中心正右方的点向下方偏转.
    #[test]
    fn positive_rotation_is_clockwise_on_screen() {
        let settings = HistologySettings {
            rotation: 90,
            ..Default::default()
        };
        let matrix = compose_transform(&settings, 100, 100, 1.0);
        let (row, col) = apply_to_pixel(&matrix, (50.0, 80.0));
        assert!((row - 80.0).abs() < 1e-9);
        assert!((col - 50.0).abs() < 1e-9);
    }

    /// 缩放锚定修正让缩放同样以图像中心为基准.
    #[test]
    fn scaling_is_anchored_at_image_centre() {
        let settings = HistologySettings {
            scale_x: 2.0,
            scale_y: 0.5,
            ..Default::default()
        };
        let matrix = compose_transform(&settings, 200, 150, 1.0);
        let (row, col) = apply_to_pixel(&matrix, (75.0, 100.0));
        assert!((row - 75.0).abs() < 1e-9);
        assert!((col - 100.0).abs() < 1e-9);

        // 中心右侧 10 像素在 x 方向放大一倍.
        let (_, col) = apply_to_pixel(&matrix, (75.0, 110.0));
        assert!((col - 120.0).abs() < 1e-9);
    }

    /// 平移量随 `translation_scaling` 线性换算.
    #[test]
    fn translation_scaling_rescales_pan() {
        let settings = HistologySettings {
            translation_x: 10,
            translation_y: -4,
            ..Default::default()
        };
        let display = compose_transform(&settings, 64, 64, 1.0);
        let full = compose_transform(&settings, 64, 64, 8.0);
        let (row, col) = apply_to_pixel(&display, (0.0, 0.0));
        assert!((row + 4.0).abs() < 1e-9 && (col - 10.0).abs() < 1e-9);
        let (row, col) = apply_to_pixel(&full, (0.0, 0.0));
        assert!((row + 32.0).abs() < 1e-9 && (col - 80.0).abs() < 1e-9);
    }

    /// 真逆与原矩阵相乘得单位矩阵.
    #[test]
    fn inverse_is_true_matrix_inverse() {
        let settings = HistologySettings {
            rotation: 10,
            translation_x: 5,
            translation_y: -3,
            scale_x: 1.2,
            scale_y: 0.9,
            shear_x: 0.05,
            shear_y: 0.0,
        };
        let matrix = compose_transform(&settings, 256, 256, 1.0);
        let inverse = inverted(&matrix).unwrap();
        assert!(matrix_eq(&(matrix * inverse), &Matrix3::identity()));
    }

    /// 缩放为 0 导致奇异矩阵, 报告为配置错误而非 panic.
    #[test]
    fn singular_matrix_is_rejected() {
        let settings = HistologySettings {
            scale_x: 0.0,
            ..Default::default()
        };
        let matrix = compose_transform(&settings, 64, 64, 1.0);
        assert_eq!(inverted(&matrix), Err(NonInvertibleTransform));
    }

    /// 组合次序不可交换: 旋转与错切交换会得到不同矩阵.
    #[test]
    fn composition_order_matters() {
        let settings = HistologySettings {
            rotation: 30,
            shear_x: 0.3,
            ..Default::default()
        };
        let matrix = compose_transform(&settings, 100, 100, 1.0);
        let swapped = shearing(0.3, 0.0) * rotation_deg(30.0);
        // 只比较线性部分即可说明问题.
        let linear = matrix.fixed_view::<2, 2>(0, 0);
        let swapped_linear = swapped.fixed_view::<2, 2>(0, 0);
        assert!((linear - swapped_linear).abs().max() > 1e-3);
    }
}
