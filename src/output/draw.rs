// 该文件是 Shanan （山南西风） 项目的一部分。
// src/output/draw.rs - 检测与跟踪结果可视化
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::{
  drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut},
  rect::Rect,
};
use tracing::warn;

use crate::{bbox::BBox, model::label_name, output::FrameResult};

const PALETTE_SIZE: usize = 80;
const DETECTION_COLOR: [u8; 3] = [160, 160, 160];
const TEXT_COLOR: [u8; 3] = [255, 255, 255];

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 14.0;
const LABEL_TEXT_HEIGHT: u32 = 16;
const LABEL_CHAR_WIDTH: f32 = 8.0; // 每字符平均宽度（粗略估计）
const LABEL_TEXT_PADDING: i32 = 2;

/// 在图像上绘制检测框（细灰框）与可见轨迹（按轨迹编号着色的粗框），
/// 框上方附带 "类别 置信度" 标签
pub struct Draw {
  colors: Vec<Rgb<u8>>,
  track_thickness: u32,
  font: Option<FontArc>,
  font_scale: PxScale,
}

impl Default for Draw {
  fn default() -> Self {
    let colors = (0..PALETTE_SIZE)
      .map(|i| {
        // 黄金角跳跃，让相邻编号颜色区分明显
        let hue = (i as f32 * 137.508) % 360.0;
        hsv_to_rgb(hue, 0.8, 0.9)
      })
      .collect();

    let font_data = include_bytes!("../../assets/DejaVuSans.ttf");
    let font = match FontArc::try_from_slice(font_data) {
      Ok(font) => Some(font),
      Err(e) => {
        warn!("无法加载字体, 将不绘制标签: {}", e);
        None
      }
    };

    Self {
      colors,
      track_thickness: 2,
      font,
      font_scale: PxScale::from(LABEL_FONT_SIZE),
    }
  }
}

impl Draw {
  pub fn track_color(&self, track_id: u64) -> Rgb<u8> {
    self.colors[(track_id as usize) % self.colors.len()]
  }

  pub fn draw_result(&self, image: &mut RgbImage, result: &FrameResult) {
    for detection in &result.detections {
      let color = Rgb(DETECTION_COLOR);
      if let Some(rect) = draw_box(image, &detection.bbox, color, 1) {
        let label = format!(
          "{} {:.2}",
          label_name(detection.class_id),
          detection.confidence
        );
        self.draw_label(image, rect, color, &label);
      }
    }

    for track in &result.tracks {
      let color = self.track_color(track.id);
      if let Some(rect) = draw_box(image, &track.smoothed_box, color, self.track_thickness) {
        let label = format!(
          "#{} {} {:.2}",
          track.id,
          label_name(track.class_id),
          track.confidence
        );
        self.draw_label(image, rect, color, &label);
      }
    }
  }

  pub fn draw_on_copy(&self, image: &RgbImage, result: &FrameResult) -> RgbImage {
    let mut canvas = image.clone();
    self.draw_result(&mut canvas, result);
    canvas
  }

  // 标签放在框上方，上方空间不足时放进框内顶部
  fn draw_label(&self, image: &mut RgbImage, bbox: Rect, color: Rgb<u8>, label: &str) {
    let Some(font) = &self.font else {
      return;
    };

    let text_width = (label.chars().count() as f32 * LABEL_CHAR_WIDTH) as u32
      + 2 * LABEL_TEXT_PADDING as u32;
    let label_x = bbox.left();
    let label_y = if bbox.top() >= LABEL_TEXT_HEIGHT as i32 {
      bbox.top() - LABEL_TEXT_HEIGHT as i32
    } else {
      bbox.top()
    };

    let max_width = image.width().saturating_sub(label_x as u32);
    let label_width = text_width.min(max_width);
    if label_width == 0 {
      return;
    }

    let background = Rect::at(label_x, label_y).of_size(label_width, LABEL_TEXT_HEIGHT);
    draw_filled_rect_mut(image, background, color);
    draw_text_mut(
      image,
      Rgb(TEXT_COLOR),
      label_x + LABEL_TEXT_PADDING,
      label_y + 1,
      self.font_scale,
      font,
      label,
    );
  }
}

/// 绘制裁剪到图像范围内的框，返回实际绘制的外框
fn draw_box(image: &mut RgbImage, bbox: &BBox, color: Rgb<u8>, thickness: u32) -> Option<Rect> {
  let (img_w, img_h) = (image.width() as f32, image.height() as f32);
  let x1 = bbox.x.clamp(0.0, img_w).floor();
  let y1 = bbox.y.clamp(0.0, img_h).floor();
  let x2 = bbox.right().clamp(0.0, img_w).ceil();
  let y2 = bbox.bottom().clamp(0.0, img_h).ceil();
  if x2 - x1 < 1.0 || y2 - y1 < 1.0 {
    return None;
  }

  for t in 0..thickness {
    let t = t as f32;
    let width = x2 - x1 - 2.0 * t;
    let height = y2 - y1 - 2.0 * t;
    if width < 1.0 || height < 1.0 {
      break;
    }
    let rect = Rect::at((x1 + t) as i32, (y1 + t) as i32).of_size(width as u32, height as u32);
    draw_hollow_rect_mut(image, rect, color);
  }

  Some(Rect::at(x1 as i32, y1 as i32).of_size((x2 - x1) as u32, (y2 - y1) as u32))
}

/// HSV 转 RGB
fn hsv_to_rgb(h: f32, s: f32, v: f32) -> Rgb<u8> {
  let c = v * s;
  let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
  let m = v - c;

  let (r, g, b) = if h < 60.0 {
    (c, x, 0.0)
  } else if h < 120.0 {
    (x, c, 0.0)
  } else if h < 180.0 {
    (0.0, c, x)
  } else if h < 240.0 {
    (0.0, x, c)
  } else if h < 300.0 {
    (x, 0.0, c)
  } else {
    (c, 0.0, x)
  };

  Rgb([
    ((r + m) * 255.0) as u8,
    ((g + m) * 255.0) as u8,
    ((b + m) * 255.0) as u8,
  ])
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{model::Detection, tracker::Track};

  #[test]
  fn primary_hues_convert() {
    assert_eq!(hsv_to_rgb(0.0, 1.0, 1.0), Rgb([255, 0, 0]));
    assert_eq!(hsv_to_rgb(120.0, 1.0, 1.0), Rgb([0, 255, 0]));
    assert_eq!(hsv_to_rgb(240.0, 1.0, 1.0), Rgb([0, 0, 255]));
  }

  #[test]
  fn track_outline_is_drawn_in_track_color() {
    let draw = Draw::default();
    let track = Track::spawn(7, &Detection::new(BBox::new(10.0, 30.0, 20.0, 20.0), 0.9, 0));
    let result = FrameResult::new(Vec::new(), vec![track]);

    let mut image = RgbImage::new(64, 64);
    draw.draw_result(&mut image, &result);

    let color = draw.track_color(7);
    assert_eq!(*image.get_pixel(10, 30), color);
    assert_eq!(*image.get_pixel(11, 31), color);
    // 内部不填充
    assert_eq!(*image.get_pixel(20, 40), Rgb([0, 0, 0]));
  }

  #[test]
  fn label_is_drawn_above_box() {
    let draw = Draw::default();
    assert!(draw.font.is_some());
    let detection = Detection::new(BBox::new(10.0, 30.0, 40.0, 20.0), 0.87, 0);
    let result = FrameResult::new(vec![detection], Vec::new());

    let mut image = RgbImage::new(128, 64);
    draw.draw_result(&mut image, &result);

    // 标签背景占据框上方 16 行，左侧留白处为背景色
    assert_eq!(*image.get_pixel(10, 14), Rgb(DETECTION_COLOR));
    assert_eq!(*image.get_pixel(10, 29), Rgb(DETECTION_COLOR));
    assert_eq!(*image.get_pixel(10, 13), Rgb([0, 0, 0]));
    // 文字像素
    let text_pixels = (12..100)
      .flat_map(|x| (15..30).map(move |y| (x, y)))
      .filter(|&(x, y)| *image.get_pixel(x, y) != Rgb(DETECTION_COLOR))
      .count();
    assert!(text_pixels > 0);
  }

  #[test]
  fn label_moves_inside_box_at_top_edge() {
    let draw = Draw::default();
    let track = Track::spawn(3, &Detection::new(BBox::new(0.0, 0.0, 60.0, 40.0), 0.5, 2));
    let result = FrameResult::new(Vec::new(), vec![track]);

    let mut image = RgbImage::new(64, 64);
    draw.draw_result(&mut image, &result);

    // 框内顶部一行被标签覆盖，标签以下仍为空
    let covered = (2..58)
      .filter(|&x| *image.get_pixel(x, 8) != Rgb([0, 0, 0]))
      .count();
    assert_eq!(covered, 56);
    assert_eq!(*image.get_pixel(5, 24), Rgb([0, 0, 0]));
  }

  #[test]
  fn boxes_outside_image_are_ignored() {
    let draw = Draw::default();
    let detection = Detection::new(BBox::new(100.0, 100.0, 20.0, 20.0), 0.9, 0);
    let result = FrameResult::new(vec![detection], Vec::new());

    let mut image = RgbImage::new(32, 32);
    draw.draw_result(&mut image, &result);
    assert!(image.pixels().all(|p| *p == Rgb([0, 0, 0])));
  }
}
