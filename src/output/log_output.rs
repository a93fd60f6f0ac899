// 该文件是 Shanan （山南西风） 项目的一部分。
// src/output/log_output.rs - 日志输出
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

use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::Frame,
  model::label_name,
  output::{FrameResult, Render},
};

#[derive(Error, Debug)]
pub enum LogOutputError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

/// 将每帧结果写入日志
///
/// 有可见轨迹的帧以 info 级别输出，其余帧以 debug 级别输出。
#[derive(Debug, Default)]
pub struct LogOutput {
  frames: u64,
}

impl FromUrlWithScheme for LogOutput {
  const SCHEME: &'static str = "log";
}

impl FromUrl for LogOutput {
  type Error = LogOutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(LogOutputError::SchemeMismatch(url.scheme().to_string()));
    }
    Ok(Self::default())
  }
}

impl Render for LogOutput {
  type Error = LogOutputError;

  fn render_result(&mut self, frame: &Frame, result: &FrameResult) -> Result<(), Self::Error> {
    self.frames += 1;

    if result.tracks.is_empty() {
      debug!(
        "第 {} 帧: {} 个检测, 无可见轨迹",
        frame.index,
        result.detections.len()
      );
      return Ok(());
    }

    let tracks = result
      .tracks
      .iter()
      .map(|t| {
        format!(
          "#{} {} {:.2} ({:.0},{:.0},{:.0},{:.0})",
          t.id,
          label_name(t.class_id),
          t.confidence,
          t.smoothed_box.x,
          t.smoothed_box.y,
          t.smoothed_box.w,
          t.smoothed_box.h
        )
      })
      .collect::<Vec<_>>()
      .join(", ");

    info!(
      "第 {} 帧: {} 个检测, 轨迹 [{}]",
      frame.index,
      result.detections.len(),
      tracks
    );
    Ok(())
  }

  fn finish(&mut self) -> Result<(), Self::Error> {
    info!("日志输出结束, 共 {} 帧", self.frames);
    Ok(())
  }
}
