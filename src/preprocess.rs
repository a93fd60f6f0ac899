// 该文件是 Shanan （山南西风） 项目的一部分。
// src/preprocess.rs - Letterbox 预处理
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

use image::{RgbImage, imageops::FilterType};
use thiserror::Error;
use tracing::debug;

use crate::{bbox::BBox, frame::RGB_CHANNELS};

#[derive(Error, Debug)]
pub enum PreprocessError {
  #[error("输入图像为空: {0}x{1}")]
  EmptyImage(u32, u32),
  #[error("目标尺寸无效: {0}x{1}")]
  InvalidTarget(u32, u32),
}

/// NCHW 排布的归一化浮点张量（batch 固定为 1）
#[derive(Debug, Clone)]
pub struct Blob {
  data: Box<[f32]>,
  channels: usize,
  height: usize,
  width: usize,
}

impl Blob {
  pub fn new(data: Vec<f32>, channels: usize, height: usize, width: usize) -> Self {
    debug_assert_eq!(data.len(), channels * height * width);
    Self {
      data: data.into_boxed_slice(),
      channels,
      height,
      width,
    }
  }

  pub fn empty() -> Self {
    Self::new(Vec::new(), 0, 0, 0)
  }

  pub fn as_slice(&self) -> &[f32] {
    &self.data
  }

  pub fn len(&self) -> usize {
    self.data.len()
  }

  pub fn is_empty(&self) -> bool {
    self.data.is_empty()
  }

  /// [N, C, H, W]
  pub fn shape(&self) -> [usize; 4] {
    [1, self.channels, self.height, self.width]
  }

  pub fn channels(&self) -> usize {
    self.channels
  }

  pub fn height(&self) -> usize {
    self.height
  }

  pub fn width(&self) -> usize {
    self.width
  }
}

/// 网络输入空间与原图空间之间的映射
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LetterboxTransform {
  pub scale: f32,
  pub pad_x: u32,
  pub pad_y: u32,
}

impl LetterboxTransform {
  /// 网络输入与原图同尺寸、无填充
  pub fn identity() -> Self {
    Self {
      scale: 1.0,
      pad_x: 0,
      pad_y: 0,
    }
  }

  /// 网络空间 -> 原图空间：先去掉填充，再除以缩放
  pub fn to_source(&self, bbox: &BBox) -> BBox {
    BBox {
      x: (bbox.x - self.pad_x as f32) / self.scale,
      y: (bbox.y - self.pad_y as f32) / self.scale,
      w: bbox.w / self.scale,
      h: bbox.h / self.scale,
    }
  }

  /// 原图空间 -> 网络空间
  pub fn to_network(&self, bbox: &BBox) -> BBox {
    BBox {
      x: bbox.x * self.scale + self.pad_x as f32,
      y: bbox.y * self.scale + self.pad_y as f32,
      w: bbox.w * self.scale,
      h: bbox.h * self.scale,
    }
  }
}

impl Default for LetterboxTransform {
  fn default() -> Self {
    Self::identity()
  }
}

/// 预处理结果
#[derive(Debug, Clone)]
pub struct Preprocessed {
  pub blob: Blob,
  pub transform: LetterboxTransform,
}

/// 保持宽高比缩放并居中填充到网络输入尺寸
#[derive(Debug, Clone)]
pub struct Letterbox {
  target_width: u32,
  target_height: u32,
}

impl Letterbox {
  pub fn new(target_width: u32, target_height: u32) -> Result<Self, PreprocessError> {
    if target_width == 0 || target_height == 0 {
      return Err(PreprocessError::InvalidTarget(target_width, target_height));
    }

    Ok(Self {
      target_width,
      target_height,
    })
  }

  pub fn target_size(&self) -> (u32, u32) {
    (self.target_width, self.target_height)
  }

  /// 计算给定原图尺寸下的变换与缩放后的内容尺寸
  pub fn geometry(&self, src_width: u32, src_height: u32) -> (LetterboxTransform, u32, u32) {
    let src_w = src_width.max(1);
    let src_h = src_height.max(1);

    let scale = (self.target_width as f32 / src_w as f32)
      .min(self.target_height as f32 / src_h as f32);

    let new_w = ((src_w as f32 * scale).round() as u32).clamp(1, self.target_width);
    let new_h = ((src_h as f32 * scale).round() as u32).clamp(1, self.target_height);

    let pad_x = (self.target_width - new_w) / 2;
    let pad_y = (self.target_height - new_h) / 2;

    (LetterboxTransform { scale, pad_x, pad_y }, new_w, new_h)
  }

  pub fn process(&self, image: &RgbImage) -> Result<Preprocessed, PreprocessError> {
    let (src_w, src_h) = image.dimensions();
    if src_w == 0 || src_h == 0 {
      return Err(PreprocessError::EmptyImage(src_w, src_h));
    }

    let (transform, new_w, new_h) = self.geometry(src_w, src_h);
    debug!(
      "Letterbox: {}x{} -> {}x{}, 缩放 {:.4}, 填充 ({}, {})",
      src_w, src_h, new_w, new_h, transform.scale, transform.pad_x, transform.pad_y
    );

    let mut canvas = RgbImage::new(self.target_width, self.target_height);
    if (new_w, new_h) == (src_w, src_h) {
      image::imageops::replace(
        &mut canvas,
        image,
        transform.pad_x as i64,
        transform.pad_y as i64,
      );
    } else {
      let resized = image::imageops::resize(image, new_w, new_h, FilterType::Triangle);
      image::imageops::replace(
        &mut canvas,
        &resized,
        transform.pad_x as i64,
        transform.pad_y as i64,
      );
    }

    let blob = to_nchw_blob(&canvas);
    Ok(Preprocessed { blob, transform })
  }
}

/// RGB 图像转为按通道分平面、归一化到 [0, 1] 的张量
fn to_nchw_blob(image: &RgbImage) -> Blob {
  let (width, height) = image.dimensions();
  let (width, height) = (width as usize, height as usize);
  let plane = width * height;
  let mut data = vec![0.0f32; RGB_CHANNELS * plane];

  for (x, y, pixel) in image.enumerate_pixels() {
    let idx = (y as usize) * width + (x as usize);
    for c in 0..RGB_CHANNELS {
      data[c * plane + idx] = pixel[c] as f32 / 255.0;
    }
  }

  Blob::new(data, RGB_CHANNELS, height, width)
}
