// 该文件是 Shanan （山南西风） 项目的一部分。
// src/bbox.rs - 轴对齐边界框
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

/// 像素坐标系下的边界框，(x, y) 为左上角
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BBox {
  pub x: f32,
  pub y: f32,
  pub w: f32,
  pub h: f32,
}

impl BBox {
  pub fn new(x: f32, y: f32, w: f32, h: f32) -> Self {
    Self { x, y, w, h }
  }

  /// 由中心点与宽高构造
  pub fn from_center(cx: f32, cy: f32, w: f32, h: f32) -> Self {
    Self {
      x: cx - w / 2.0,
      y: cy - h / 2.0,
      w,
      h,
    }
  }

  /// 由左上角与右下角构造
  pub fn from_corners(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
    Self {
      x: x1,
      y: y1,
      w: x2 - x1,
      h: y2 - y1,
    }
  }

  pub fn right(&self) -> f32 {
    self.x + self.w
  }

  pub fn bottom(&self) -> f32 {
    self.y + self.h
  }

  pub fn area(&self) -> f32 {
    self.w * self.h
  }

  pub fn center(&self) -> (f32, f32) {
    (self.x + self.w / 2.0, self.y + self.h / 2.0)
  }

  /// 交并比；不相交或任一面积非正时为 0
  pub fn iou(&self, other: &BBox) -> f32 {
    if self.w <= 0.0 || self.h <= 0.0 || other.w <= 0.0 || other.h <= 0.0 {
      return 0.0;
    }

    let x1 = self.x.max(other.x);
    let y1 = self.y.max(other.y);
    let x2 = self.right().min(other.right());
    let y2 = self.bottom().min(other.bottom());

    if x2 <= x1 || y2 <= y1 {
      return 0.0;
    }

    let intersection = (x2 - x1) * (y2 - y1);
    let union = self.area() + other.area() - intersection;

    if union > 0.0 {
      intersection / union
    } else {
      0.0
    }
  }

  /// 逐坐标的指数平滑：alpha * self + (1 - alpha) * previous
  pub fn blend(&self, previous: &BBox, alpha: f32) -> BBox {
    let mix = |new: f32, old: f32| alpha * new + (1.0 - alpha) * old;
    BBox {
      x: mix(self.x, previous.x),
      y: mix(self.y, previous.y),
      w: mix(self.w, previous.w),
      h: mix(self.h, previous.h),
    }
  }
}
