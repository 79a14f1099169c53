//! 后台结构 mask 投影线程.
//!
//! 每个请求占用一个一次性线程, 各自持有独立的 [`Registrator`], 因而
//! 无需为跨线程共享体数据缓存付出锁的代价. 结果只在共享的
//! `should_emit` 标志仍然置位时经 `mpsc` 通道发出, 过期结果静默丢弃.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use ndarray::Array2;

use super::Registrator;
use crate::models::AlignmentRecord;
use crate::{Idx2d, Interpolation};

/// 启动一个后台线程, 对 `structure` 做反向投影.
///
/// mask 固定使用最近邻插值, 避免标签值被混合. 资源缺失类失败记入
/// 日志后吞掉 (逐条可恢复), 其余失败同样只记日志, 线程不会 panic.
pub fn spawn_mask_worker(
    record: AlignmentRecord,
    structure: String,
    sender: Sender<(String, Array2<f32>)>,
    should_emit: Arc<AtomicBool>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        let mut registrator = Registrator::new(Interpolation::Nearest);

        match registrator.reverse(&record, &structure, None) {
            Ok(mask) => {
                if should_emit.load(Ordering::Acquire) {
                    // 接收端已析构时结果同样丢弃.
                    let _ = sender.send((structure, mask));
                }
            }
            Err(error) if error.is_not_found() => {
                log::error!("无法找到 '{}' 对应的体数据文件: {:?}", structure, error);
            }
            Err(error) => {
                log::error!("'{}' 的反向投影失败: {:?}", structure, error);
            }
        }
    })
}

/// 提取 mask 前景 (值 > 0) 的边界像素.
///
/// 边界定义为 4 邻域内存在背景或贴着图像边缘的前景像素, 返回其
/// (行, 列) 坐标, 供 QA 视图叠加轮廓.
pub fn outline(mask: &Array2<f32>) -> Vec<Idx2d> {
    let (rows, cols) = mask.dim();
    let mut points = Vec::new();

    for ((i, j), &value) in mask.indexed_iter() {
        if value <= 0.0 {
            continue;
        }
        let on_boundary = i == 0
            || j == 0
            || i == rows - 1
            || j == cols - 1
            || mask[(i - 1, j)] <= 0.0
            || mask[(i + 1, j)] <= 0.0
            || mask[(i, j - 1)] <= 0.0
            || mask[(i, j + 1)] <= 0.0;
        if on_boundary {
            points.push((i, j));
        }
    }
    points
}
