// 该文件是 Shanan （山南西风） 项目的一部分。
// src/detector.rs - YOLO 输出解码与非极大值抑制
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use tracing::debug;

use crate::{
  bbox::BBox,
  model::{Detection, RawOutput},
  preprocess::LetterboxTransform,
};

pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.25;
pub const DEFAULT_NMS_THRESHOLD: f32 = 0.45;

/// 解码参数
#[derive(Debug, Clone, Copy)]
pub struct DecoderConfig {
  /// 置信度阈值
  pub confidence_threshold: f32,
  /// NMS IOU 阈值
  pub nms_threshold: f32,
}

impl Default for DecoderConfig {
  fn default() -> Self {
    Self {
      confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
      nms_threshold: DEFAULT_NMS_THRESHOLD,
    }
  }
}

/// YOLO 检测头解码器
#[derive(Debug, Clone, Default)]
pub struct YoloDecoder {
  config: DecoderConfig,
}

impl YoloDecoder {
  pub fn new(config: DecoderConfig) -> Self {
    Self { config }
  }

  pub fn config(&self) -> &DecoderConfig {
    &self.config
  }

  pub fn decode(
    &self,
    raw: &RawOutput,
    original_size: (u32, u32),
    transform: &LetterboxTransform,
  ) -> Vec<Detection> {
    decode(
      raw,
      original_size,
      transform,
      self.config.confidence_threshold,
      self.config.nms_threshold,
    )
  }
}

/// 将 (4 + 类别数, 锚点数) 的原始输出解码为原图坐标下的检测结果
pub fn decode(
  raw: &RawOutput,
  original_size: (u32, u32),
  transform: &LetterboxTransform,
  confidence_threshold: f32,
  iou_threshold: f32,
) -> Vec<Detection> {
  if raw.is_empty() || raw.num_classes() == 0 {
    return Vec::new();
  }

  let (image_w, image_h) = (original_size.0 as f32, original_size.1 as f32);
  let mut detections = Vec::new();

  for anchor in 0..raw.num_anchors() {
    let mut max_score = raw.at(4, anchor);
    let mut class_id = 0usize;
    for row in 5..raw.rows() {
      let score = raw.at(row, anchor);
      if score > max_score {
        max_score = score;
        class_id = row - 4;
      }
    }

    // NaN 分数同样丢弃
    if !(max_score >= confidence_threshold) {
      continue;
    }

    let network_box = BBox::from_center(
      raw.at(0, anchor),
      raw.at(1, anchor),
      raw.at(2, anchor),
      raw.at(3, anchor),
    );
    let source_box = transform.to_source(&network_box);

    let x1 = source_box.x.clamp(0.0, image_w);
    let y1 = source_box.y.clamp(0.0, image_h);
    let x2 = source_box.right().clamp(0.0, image_w);
    let y2 = source_box.bottom().clamp(0.0, image_h);
    let bbox = BBox::from_corners(x1, y1, x2, y2);

    if bbox.w <= 0.0 || bbox.h <= 0.0 {
      continue;
    }

    detections.push(Detection::new(bbox, max_score, class_id));
  }

  debug!(
    "{} 个锚点中 {} 个通过置信度阈值",
    raw.num_anchors(),
    detections.len()
  );

  nms(detections, iou_threshold)
}

/// 按类别的贪心非极大值抑制
///
/// 先按置信度降序稳定排序，同分保持输入顺序；与已保留的同类框 IoU 超过阈值者被抑制。
pub fn nms(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
  detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

  let mut kept: Vec<Detection> = Vec::with_capacity(detections.len());
  for det in detections {
    let suppressed = kept
      .iter()
      .any(|k| k.class_id == det.class_id && k.bbox.iou(&det.bbox) > iou_threshold);
    if !suppressed {
      kept.push(det);
    }
  }

  kept
}

#[cfg(test)]
mod tests {
  use super::*;

  fn det(x: f32, y: f32, w: f32, h: f32, confidence: f32, class_id: usize) -> Detection {
    Detection::new(BBox::new(x, y, w, h), confidence, class_id)
  }

  #[test]
  fn single_anchor_above_threshold_is_decoded() {
    let raw = RawOutput::from_anchors(&[vec![5.0, 5.0, 10.0, 10.0, 0.9]]).unwrap();
    let result = decode(&raw, (640, 480), &LetterboxTransform::identity(), 0.5, 0.5);

    assert_eq!(result.len(), 1);
    assert_eq!(result[0].class_id, 0);
    assert!((result[0].confidence - 0.9).abs() < 1e-6);
    assert_eq!(result[0].bbox, BBox::new(0.0, 0.0, 10.0, 10.0));
  }

  #[test]
  fn empty_output_yields_nothing() {
    let result = decode(
      &RawOutput::empty(),
      (640, 480),
      &LetterboxTransform::identity(),
      0.25,
      0.45,
    );
    assert!(result.is_empty());
  }

  #[test]
  fn output_without_class_rows_yields_nothing() {
    let raw = RawOutput::from_anchors(&[vec![5.0, 5.0, 10.0, 10.0]]).unwrap();
    let result = decode(&raw, (640, 480), &LetterboxTransform::identity(), 0.0, 0.5);
    assert!(result.is_empty());
  }

  #[test]
  fn nothing_above_threshold_yields_nothing() {
    let raw = RawOutput::from_anchors(&[
      vec![50.0, 50.0, 10.0, 10.0, 0.1, 0.2],
      vec![80.0, 80.0, 10.0, 10.0, 0.3, 0.05],
    ])
    .unwrap();
    let result = decode(&raw, (640, 480), &LetterboxTransform::identity(), 0.5, 0.5);
    assert!(result.is_empty());
  }

  #[test]
  fn nan_score_is_rejected() {
    let raw = RawOutput::from_anchors(&[
      vec![50.0, 50.0, 10.0, 10.0, f32::NAN],
      vec![80.0, 80.0, 10.0, 10.0, 0.9],
    ])
    .unwrap();
    let result = decode(&raw, (640, 480), &LetterboxTransform::identity(), 0.5, 0.5);

    assert_eq!(result.len(), 1);
    assert!((result[0].confidence - 0.9).abs() < 1e-6);
    assert!(result.iter().all(|d| !d.confidence.is_nan()));
  }

  #[test]
  fn best_class_is_selected_per_anchor() {
    let raw = RawOutput::from_anchors(&[vec![50.0, 50.0, 10.0, 10.0, 0.1, 0.2, 0.8]]).unwrap();
    let result = decode(&raw, (640, 480), &LetterboxTransform::identity(), 0.5, 0.5);
    assert_eq!(result.len(), 1);
    assert_eq!(result[0].class_id, 2);
  }

  #[test]
  fn letterbox_inverse_is_applied() {
    // 1280x720 原图 -> 640x640，缩放 0.5，上下填充 140
    let transform = LetterboxTransform {
      scale: 0.5,
      pad_x: 0,
      pad_y: 140,
    };
    // 网络空间中心 (100, 240)，大小 40x20
    let raw = RawOutput::from_anchors(&[vec![100.0, 240.0, 40.0, 20.0, 0.9]]).unwrap();
    let result = decode(&raw, (1280, 720), &transform, 0.5, 0.5);

    assert_eq!(result.len(), 1);
    let bbox = result[0].bbox;
    assert!((bbox.x - 160.0).abs() < 1e-3);
    assert!((bbox.y - 180.0).abs() < 1e-3);
    assert!((bbox.w - 80.0).abs() < 1e-3);
    assert!((bbox.h - 40.0).abs() < 1e-3);
  }

  #[test]
  fn boxes_inside_padding_are_discarded() {
    // 640x480 原图上下各有 80 行填充，该框完全落在上方填充内
    let transform = LetterboxTransform {
      scale: 1.0,
      pad_x: 0,
      pad_y: 80,
    };
    let raw = RawOutput::from_anchors(&[vec![5.0, 5.0, 10.0, 10.0, 0.9]]).unwrap();
    let result = decode(&raw, (640, 480), &transform, 0.5, 0.5);
    assert!(result.is_empty());
  }

  #[test]
  fn boxes_are_clipped_to_image_bounds() {
    let raw = RawOutput::from_anchors(&[vec![630.0, 470.0, 40.0, 40.0, 0.9]]).unwrap();
    let result = decode(&raw, (640, 480), &LetterboxTransform::identity(), 0.5, 0.5);
    assert_eq!(result.len(), 1);
    assert_eq!(result[0].bbox, BBox::new(610.0, 450.0, 30.0, 30.0));
  }

  #[test]
  fn same_class_overlap_keeps_higher_confidence() {
    let a = det(10.0, 10.0, 100.0, 100.0, 0.8, 0);
    let b = det(12.0, 12.0, 100.0, 100.0, 0.9, 0);
    assert!(a.bbox.iou(&b.bbox) > 0.5);

    let kept = nms(vec![a, b], 0.5);
    assert_eq!(kept.len(), 1);
    assert!((kept[0].confidence - 0.9).abs() < 1e-6);
  }

  #[test]
  fn different_classes_survive_identical_geometry() {
    let a = det(10.0, 10.0, 100.0, 100.0, 0.9, 0);
    let b = det(10.0, 10.0, 100.0, 100.0, 0.8, 1);
    let kept = nms(vec![a, b], 0.5);
    assert_eq!(kept.len(), 2);
  }

  #[test]
  fn equal_confidence_preserves_input_order() {
    let a = det(0.0, 0.0, 10.0, 10.0, 0.7, 0);
    let b = det(100.0, 100.0, 10.0, 10.0, 0.7, 0);
    let c = det(1.0, 1.0, 10.0, 10.0, 0.7, 0);

    let kept = nms(vec![a, b, c], 0.5);
    // c 与 a 重叠，a 在前所以保留 a
    assert_eq!(kept, vec![a, b]);
  }

  #[test]
  fn kept_boxes_never_overlap_above_threshold() {
    let mut dets = Vec::new();
    for i in 0..20 {
      let offset = (i % 5) as f32 * 3.0;
      dets.push(det(offset, offset, 50.0, 50.0, 0.5 + i as f32 * 0.01, i % 2));
    }
    let kept = nms(dets, 0.45);
    for (i, a) in kept.iter().enumerate() {
      for b in kept.iter().skip(i + 1) {
        if a.class_id == b.class_id {
          assert!(a.bbox.iou(&b.bbox) <= 0.45);
        }
      }
    }
  }

  #[test]
  fn decoder_uses_configured_thresholds() {
    let decoder = YoloDecoder::new(DecoderConfig {
      confidence_threshold: 0.5,
      nms_threshold: 0.5,
    });
    let raw = RawOutput::from_anchors(&[
      vec![50.0, 50.0, 20.0, 20.0, 0.8],
      vec![51.0, 51.0, 20.0, 20.0, 0.9],
      vec![300.0, 300.0, 20.0, 20.0, 0.4],
    ])
    .unwrap();
    let result = decoder.decode(&raw, (640, 640), &LetterboxTransform::identity());
    assert_eq!(result.len(), 1);
    assert!((result[0].confidence - 0.9).abs() < 1e-6);
  }
}
