//! 几何工具: 切面法向量、原点与旋转的计算.
//!
//! 体数据索引序固定为 `(轴0, 轴1, 轴2)`, 向量分量 i 与索引轴 i 一一对应.
//! 所有旋转均为右手系, 角度以度为单位.

use nalgebra::{Rotation3, Unit, Vector3};

use crate::models::{Orientation, VolumeSettings};
use crate::Idx3d;

/// 单个切片方向的几何查找表项.
///
/// 三个方向的全部几何差异 (切片轴、规范法向量、欧拉轴对、面内行列轴)
/// 集中于此, 其余代码不再对方向做特判.
#[derive(Debug, Clone, Copy)]
pub struct OrientationFrame {
    /// 切片轴下标.
    pub axis: usize,

    /// 未旋转时的切面法向量所在轴下标 (与 `axis` 相同).
    pub normal_axis: usize,

    /// 内旋欧拉轴对: 先绕 `.0` 转 pitch, 再绕 (新) `.1` 转 yaw.
    pub euler_axes: (usize, usize),

    /// 切面行方向对应的体数据轴.
    pub row_axis: usize,

    /// 切面列方向对应的体数据轴.
    pub col_axis: usize,
}

/// 方向查找表.
#[inline]
pub fn orientation_frame(orientation: Orientation) -> OrientationFrame {
    match orientation {
        Orientation::Coronal => OrientationFrame {
            axis: 0,
            normal_axis: 0,
            euler_axes: (2, 1),
            row_axis: 1,
            col_axis: 2,
        },
        Orientation::Horizontal => OrientationFrame {
            axis: 1,
            normal_axis: 1,
            euler_axes: (2, 0),
            row_axis: 0,
            col_axis: 2,
        },
        Orientation::Sagittal => OrientationFrame {
            axis: 2,
            normal_axis: 2,
            euler_axes: (0, 1),
            row_axis: 0,
            col_axis: 1,
        },
    }
}

/// 轴 `index` 方向的单位向量.
#[inline]
pub fn unit_axis(index: usize) -> Vector3<f64> {
    assert!(index < 3, "三维向量轴下标必须小于 3, 实为 {}", index);
    let mut vector = Vector3::zeros();
    vector[index] = 1.0;
    vector
}

/// 由 pitch/yaw 重建视图旋转.
pub fn view_rotation(pitch: i32, yaw: i32, orientation: Orientation) -> Rotation3<f64> {
    let frame = orientation_frame(orientation);
    let pitch_axis = Unit::new_unchecked(unit_axis(frame.euler_axes.0));
    let yaw_axis = Unit::new_unchecked(unit_axis(frame.euler_axes.1));

    // 内旋欧拉组合: 先 pitch 后 yaw, 矩阵按此左乘.
    Rotation3::from_axis_angle(&pitch_axis, f64::from(pitch).to_radians())
        * Rotation3::from_axis_angle(&yaw_axis, f64::from(yaw).to_radians())
}

/// 对向量施加对齐参数描述的旋转.
#[inline]
pub fn apply_rotation(
    vector: Vector3<f64>,
    pitch: i32,
    yaw: i32,
    orientation: Orientation,
) -> Vector3<f64> {
    view_rotation(pitch, yaw, orientation) * vector
}

/// 体数据精确中心坐标 `(n-1)/2` (逐轴).
///
/// 偶数轴长时落在两个中间体素的正中, 不做取整, 保证 `offset = 0`
/// 的切面在三个方向上都无偏.
#[inline]
pub fn compute_centre(shape: Idx3d) -> Vector3<f64> {
    let (n0, n1, n2) = shape;
    Vector3::new(
        (n0 as f64 - 1.0) / 2.0,
        (n1 as f64 - 1.0) / 2.0,
        (n2 as f64 - 1.0) / 2.0,
    )
}

/// 向下取整的体数据中心索引.
#[inline]
pub fn compute_centre_floored(shape: Idx3d) -> Idx3d {
    let centre = compute_centre(shape);
    (
        centre[0].floor() as usize,
        centre[1].floor() as usize,
        centre[2].floor() as usize,
    )
}

/// 切面法向量 (已按 pitch/yaw 旋转).
pub fn compute_normal(settings: &VolumeSettings) -> Vector3<f64> {
    let frame = orientation_frame(settings.orientation);
    apply_rotation(
        unit_axis(frame.normal_axis),
        settings.pitch,
        settings.yaw,
        settings.orientation,
    )
}

/// 切面原点: 体数据中心沿切片轴平移 `offset`.
pub fn compute_origin(centre: Vector3<f64>, settings: &VolumeSettings) -> Vector3<f64> {
    let mut origin = centre;
    origin[orientation_frame(settings.orientation).axis] += f64::from(settings.offset);
    origin
}

/// 两个向量间的带符号夹角 (度), 符号按右手定则由 `axis` 决定.
pub fn signed_vector_angle(
    vector1: &Vector3<f64>,
    vector2: &Vector3<f64>,
    axis: &Vector3<f64>,
) -> f64 {
    vector1
        .cross(vector2)
        .dot(axis)
        .atan2(vector1.dot(vector2))
        .to_degrees()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Resolution;

    fn float_eq(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-10
    }

    fn vec_eq(a: &Vector3<f64>, b: &Vector3<f64>) -> bool {
        (a - b).norm() < 1e-10
    }

    fn settings(orientation: Orientation, pitch: i32, yaw: i32, offset: i32) -> VolumeSettings {
        VolumeSettings {
            orientation,
            pitch,
            yaw,
            offset,
            resolution: Resolution::Micron25,
            shape: (528, 320, 456),
        }
    }

    /// pitch = yaw = 0 时法向量即规范轴向量.
    #[test]
    fn canonical_normals() {
        for (orientation, axis) in [
            (Orientation::Coronal, 0),
            (Orientation::Horizontal, 1),
            (Orientation::Sagittal, 2),
        ] {
            let normal = compute_normal(&settings(orientation, 0, 0, 0));
            assert!(vec_eq(&normal, &unit_axis(axis)));
        }
    }

    /// 冠状面 pitch 90 度: e0 绕 e2 右手旋转 90 度得到 e1.
    #[test]
    fn coronal_pitch_quarter_turn() {
        let normal = compute_normal(&settings(Orientation::Coronal, 90, 0, 0));
        assert!(vec_eq(&normal, &unit_axis(1)));
    }

    /// 冠状面 yaw 90 度: e0 绕 e1 右手旋转 90 度得到 -e2.
    #[test]
    fn coronal_yaw_quarter_turn() {
        let normal = compute_normal(&settings(Orientation::Coronal, 0, 90, 0));
        assert!(vec_eq(&normal, &(-unit_axis(2))));
    }

    /// 旋转保持向量模长.
    #[test]
    fn rotation_preserves_norm() {
        let vector = Vector3::new(1.5, -2.0, 0.25);
        for orientation in [
            Orientation::Coronal,
            Orientation::Horizontal,
            Orientation::Sagittal,
        ] {
            let rotated = apply_rotation(vector, 37, -12, orientation);
            assert!(float_eq(rotated.norm(), vector.norm()));
        }
    }

    #[test]
    fn centre_is_half_voxel_for_even_axes() {
        let centre = compute_centre((16, 17, 2));
        assert!(float_eq(centre[0], 7.5));
        assert!(float_eq(centre[1], 8.0));
        assert!(float_eq(centre[2], 0.5));
        assert_eq!(compute_centre_floored((16, 17, 2)), (7, 8, 0));
    }

    /// offset 只作用于切片轴.
    #[test]
    fn origin_offsets_along_slicing_axis() {
        let shape = (528, 320, 456);
        let centre = compute_centre(shape);
        for (orientation, axis) in [
            (Orientation::Coronal, 0),
            (Orientation::Horizontal, 1),
            (Orientation::Sagittal, 2),
        ] {
            let mut settings = settings(orientation, 5, -5, 12);
            settings.shape = shape;
            let origin = compute_origin(centre, &settings);
            for i in 0..3 {
                let expected = centre[i] + if i == axis { 12.0 } else { 0.0 };
                assert!(float_eq(origin[i], expected));
            }
        }
    }

    #[test]
    fn signed_angle_follows_right_hand_rule() {
        let e0 = unit_axis(0);
        let e1 = unit_axis(1);
        let e2 = unit_axis(2);
        assert!(float_eq(signed_vector_angle(&e0, &e1, &e2), 90.0));
        assert!(float_eq(signed_vector_angle(&e1, &e0, &e2), -90.0));
        assert!(float_eq(signed_vector_angle(&e0, &e0, &e2), 0.0));
    }
}
