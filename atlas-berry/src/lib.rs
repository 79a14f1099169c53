#![warn(missing_docs)] // <= 合适时移除它.

//! 核心库. 提供 2D 组织学切片与 3D 脑图谱体数据之间的仿射配准能力:
//! 任意方向体数据切片、七参数 2D 仿射变换的正反向组合、以及把图谱结构
//! mask 反向投影回原分辨率组织学图像的完整管线.
//!
//! 该 crate 目前仅提供 `safe` 接口.
//!
//! # 注意
//!
//! 1. 正向配准 (交互/降采样分辨率) 与反向投影 (全分辨率, 批量定量) 共用
//!    同一套矩阵组合代码, 两个方向必须逐像素一致, 否则定量结果会被悄悄破坏.
//! 2. 在非期望情况下 (内部逻辑错误), 程序会直接 panic, 而不会导致内存错误.
//!    As what Rust promises. 可恢复的失败 (文件缺失等) 以 `Result` 返回.
//!
//! # 功能地图
//!
//! ### 任意方向体数据切片 ✅
//!
//! 给定 orientation/pitch/yaw/offset, 从 3D 体数据提取 2D 斜切面,
//! 自动裁剪到切面与体数据的紧致相交范围.
//!
//! 实现位于 `atlas-berry/src/slicer`.
//!
//! ### 七参数仿射组合及其逆 ✅
//!
//! 旋转/平移/缩放/错切按固定的不可交换次序组合为 3x3 齐次矩阵,
//! 逆向使用矩阵的真逆而非参数取负.
//!
//! 实现位于 `atlas-berry/src/registration/transform.rs`.
//!
//! ### 正向/反向投影 ✅
//!
//! 正向: 组织学图像重采样、补齐到图谱切面形状后施加仿射变换.
//! 反向: 图谱/mask 切面重采样到组织学原生分辨率, 施加逆变换后居中裁剪.
//!
//! 实现位于 `atlas-berry/src/registration`.
//!
//! ### 配准参数持久化 ✅
//!
//! 每张切片一份 JSON 记录, 文件名取原图文件名的 md5. 记录自身
//! (加上重新读入的体数据与图像) 足以完整复现正反两个方向的结果.
//!
//! 实现位于 `atlas-berry/src/io`.
//!
//! ### 对齐体数据重建 ✅
//!
//! 将多张已配准切片以 `max` 方式累积回 3D 数组, 可取消, 逐条报告进度.
//!
//! 实现位于 `atlas-berry/src/builder`.

/// 二维索引, 同时也可一定程度上用作非负整数向量. 次序为 (行, 列).
pub type Idx2d = (usize, usize);

/// 三维索引, 同时也可一定程度上用作非负整数向量.
pub type Idx3d = (usize, usize, usize);

/// 高精度二维坐标 (行, 列), 用于亚像素定位.
pub type Idx2dF = (f64, f64);

/// 重采样使用的插值方式.
///
/// 标签 mask 必须使用 [`Interpolation::Nearest`] 以保持标签值不被混合;
/// 灰度图像通常使用 [`Interpolation::Bilinear`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interpolation {
    /// 最近邻.
    Nearest,

    /// 双线性 (体数据切片时为三线性).
    Bilinear,
}

pub mod consts;

pub mod models;

pub mod maths;

pub mod slicer;

pub mod registration;

pub mod builder;

pub mod io;

pub mod prelude;
