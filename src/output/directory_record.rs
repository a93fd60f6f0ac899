// 该文件是 Shanan （山南西风） 项目的一部分。
// src/output/directory_record.rs - 目录记录输出
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::{
  fs::{File, OpenOptions},
  io::{BufWriter, Write},
  path::{Path, PathBuf},
};

use chrono::{DateTime, Datelike, Utc};
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, info};

use crate::{
  FromUrl, FromUrlWithScheme,
  bbox::BBox,
  frame::Frame,
  model::label_name,
  output::{FrameResult, Render, draw::Draw},
};

const RECORDS_FILE: &str = "records.jsonl";

#[derive(Error, Debug)]
pub enum DirectoryRecordOutputError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("记录序列化错误: {0}")]
  JsonError(#[from] serde_json::Error),
}

/// 按日期目录保存标注帧，并在根目录追加 JSON 行记录
///
/// 图片保存在 `<dir>/YYYY/MM/DD/HH-MM-SS-XXXX.png`，
/// 未带 `always` 参数时只保存有检测或可见轨迹的帧。
pub struct DirectoryRecordOutput {
  directory: PathBuf,
  draw: Draw,
  records: BufWriter<File>,
  frame_counter: u16,
  always: bool,
  saved: u64,
}

impl FromUrlWithScheme for DirectoryRecordOutput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(DirectoryRecordOutputError::SchemeMismatch(
        uri.scheme().to_string(),
      ));
    }

    let always = uri.query_pairs().any(|(k, _)| k == "always");
    Self::new(crate::decoded_path(uri), always)
  }
}

impl DirectoryRecordOutput {
  pub fn new(directory: impl AsRef<Path>, always: bool) -> Result<Self, DirectoryRecordOutputError> {
    let directory = directory.as_ref().to_path_buf();
    std::fs::create_dir_all(&directory)?;

    let records = OpenOptions::new()
      .create(true)
      .append(true)
      .open(directory.join(RECORDS_FILE))?;

    info!(
      "记录目录: {} (保存全部帧: {})",
      directory.display(),
      always
    );

    Ok(Self {
      directory,
      draw: Draw::default(),
      records: BufWriter::new(records),
      frame_counter: 0,
      always,
      saved: 0,
    })
  }

  fn frame_id(&mut self) -> u16 {
    self.frame_counter = self.frame_counter.wrapping_add(1);
    self.frame_counter
  }

  fn frame_path(&mut self, now: &DateTime<Utc>) -> Result<PathBuf, DirectoryRecordOutputError> {
    let directory = self
      .directory
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()));
    std::fs::create_dir_all(&directory)?;

    let id = self.frame_id();
    Ok(directory.join(format!("{}-{:04X}.png", now.format("%H-%M-%S"), id)))
  }

  fn record(
    &mut self,
    frame: &Frame,
    result: &FrameResult,
    image_path: Option<&Path>,
    now: &DateTime<Utc>,
  ) -> Result<(), DirectoryRecordOutputError> {
    let detections: Vec<Value> = result
      .detections
      .iter()
      .map(|d| {
        json!({
          "class_id": d.class_id,
          "label": label_name(d.class_id),
          "confidence": d.confidence,
          "bbox": bbox_json(&d.bbox),
        })
      })
      .collect();

    let tracks: Vec<Value> = result
      .tracks
      .iter()
      .map(|t| {
        json!({
          "id": t.id,
          "class_id": t.class_id,
          "label": label_name(t.class_id),
          "confidence": t.confidence,
          "age": t.age,
          "bbox": bbox_json(&t.smoothed_box),
        })
      })
      .collect();

    let line = json!({
      "time": now.to_rfc3339(),
      "frame": frame.index,
      "timestamp_ms": frame.timestamp_ms,
      "image": image_path.map(|p| p.display().to_string()),
      "detections": detections,
      "tracks": tracks,
    });

    serde_json::to_writer(&mut self.records, &line)?;
    self.records.write_all(b"\n")?;
    Ok(())
  }
}

fn bbox_json(bbox: &BBox) -> Value {
  json!([bbox.x, bbox.y, bbox.w, bbox.h])
}

impl Render for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn render_result(&mut self, frame: &Frame, result: &FrameResult) -> Result<(), Self::Error> {
    let now = Utc::now();

    let image_path = if self.always || !result.is_empty() {
      let path = self.frame_path(&now)?;
      self.draw.draw_on_copy(&frame.image, result).save(&path)?;
      debug!("保存帧 {} 到 {}", frame.index, path.display());
      self.saved += 1;
      Some(path)
    } else {
      None
    };

    self.record(frame, result, image_path.as_deref(), &now)
  }

  fn finish(&mut self) -> Result<(), Self::Error> {
    self.records.flush()?;
    info!(
      "记录输出结束, 共保存 {} 张图片到 {}",
      self.saved,
      self.directory.display()
    );
    Ok(())
  }
}
