// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model.rs - 模型
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use crate::{bbox::BBox, preprocess::Blob};

/// 推理引擎接口
///
/// 引擎只负责张量计算，输入为预处理后的 blob，输出为原始预测矩阵。
pub trait Model {
  type Error: std::error::Error + Send + Sync + 'static;

  /// 模型要求的输入尺寸 (宽, 高)
  fn input_size(&self) -> (u32, u32);

  fn infer(&self, input: &Blob) -> Result<RawOutput, Self::Error>;
}

/// 模型原始输出，形状为 (4 + 类别数, 锚点数)，行优先存储
#[derive(Debug, Clone, Default)]
pub struct RawOutput {
  data: Box<[f32]>,
  rows: usize,
  cols: usize,
}

impl RawOutput {
  /// 数据长度与形状不符时返回 `None`
  pub fn new(data: Vec<f32>, rows: usize, cols: usize) -> Option<Self> {
    if data.len() != rows * cols {
      return None;
    }

    Some(Self {
      data: data.into_boxed_slice(),
      rows,
      cols,
    })
  }

  pub fn empty() -> Self {
    Self::default()
  }

  /// 由按锚点组织的预测构造，每个锚点为 [cx, cy, w, h, score_0, score_1, ...]
  pub fn from_anchors(anchors: &[Vec<f32>]) -> Option<Self> {
    let rows = anchors.first().map(Vec::len)?;
    if anchors.iter().any(|anchor| anchor.len() != rows) {
      return None;
    }

    let cols = anchors.len();
    let mut data = vec![0.0f32; rows * cols];
    for (col, anchor) in anchors.iter().enumerate() {
      for (row, value) in anchor.iter().enumerate() {
        data[row * cols + col] = *value;
      }
    }
    Self::new(data, rows, cols)
  }

  pub fn is_empty(&self) -> bool {
    self.data.is_empty()
  }

  pub fn rows(&self) -> usize {
    self.rows
  }

  pub fn cols(&self) -> usize {
    self.cols
  }

  pub fn num_anchors(&self) -> usize {
    self.cols
  }

  pub fn num_classes(&self) -> usize {
    self.rows.saturating_sub(4)
  }

  #[inline]
  pub fn at(&self, row: usize, col: usize) -> f32 {
    self.data[row * self.cols + col]
  }
}

/// 单个检测结果，坐标为原图像素
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
  pub bbox: BBox,
  pub confidence: f32,
  pub class_id: usize,
}

impl Detection {
  pub fn new(bbox: BBox, confidence: f32, class_id: usize) -> Self {
    Self {
      bbox,
      confidence,
      class_id,
    }
  }

  pub fn label(&self) -> String {
    label_name(self.class_id)
  }
}

/// COCO 数据集类别名称
pub const COCO_CLASSES: [&str; 80] = [
  "person",
  "bicycle",
  "car",
  "motorcycle",
  "airplane",
  "bus",
  "train",
  "truck",
  "boat",
  "traffic light",
  "fire hydrant",
  "stop sign",
  "parking meter",
  "bench",
  "bird",
  "cat",
  "dog",
  "horse",
  "sheep",
  "cow",
  "elephant",
  "bear",
  "zebra",
  "giraffe",
  "backpack",
  "umbrella",
  "handbag",
  "tie",
  "suitcase",
  "frisbee",
  "skis",
  "snowboard",
  "sports ball",
  "kite",
  "baseball bat",
  "baseball glove",
  "skateboard",
  "surfboard",
  "tennis racket",
  "bottle",
  "wine glass",
  "cup",
  "fork",
  "knife",
  "spoon",
  "bowl",
  "banana",
  "apple",
  "sandwich",
  "orange",
  "broccoli",
  "carrot",
  "hot dog",
  "pizza",
  "donut",
  "cake",
  "chair",
  "couch",
  "potted plant",
  "bed",
  "dining table",
  "toilet",
  "tv",
  "laptop",
  "mouse",
  "remote",
  "keyboard",
  "cell phone",
  "microwave",
  "oven",
  "toaster",
  "sink",
  "refrigerator",
  "book",
  "clock",
  "vase",
  "scissors",
  "teddy bear",
  "hair drier",
  "toothbrush",
];

pub fn label_name(class_id: usize) -> String {
  COCO_CLASSES
    .get(class_id)
    .map(|name| name.to_string())
    .unwrap_or_else(|| format!("class_{}", class_id))
}

#[cfg(feature = "model_onnx")]
mod onnx;
#[cfg(feature = "model_onnx")]
pub use self::onnx::{OnnxModel, OnnxModelBuilder, OnnxModelError};
