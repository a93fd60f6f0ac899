// 该文件是 Shanan （山南西风） 项目的一部分。
// src/input/video_source.rs - GStreamer 视频文件输入
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

//! # 视频文件输入
//!
//! 通过 GStreamer 解码任意容器格式的视频文件，管道为
//! `filesrc ! decodebin ! videoconvert ! video/x-raw,format=RGB ! appsink`。
//!
//! 使用前需要安装 GStreamer 开发库：
//!
//! ```bash
//! sudo apt-get install libgstreamer1.0-dev libgstreamer-plugins-base1.0-dev
//! ```

use std::{
  path::Path,
  time::{Duration, Instant},
};

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use image::RgbImage;
use tracing::{debug, info, warn};
use url::Url;

use super::{InputError, InputSource, InputSourceType};
use crate::{FromUrl, FromUrlWithScheme, frame::Frame};

const POLL_INTERVAL_MS: u64 = 100;
const PREROLL_TIMEOUT: Duration = Duration::from_secs(10);
const STALL_TIMEOUT: Duration = Duration::from_secs(10);

fn video_error(e: impl std::fmt::Display) -> InputError {
  InputError::VideoError(e.to_string())
}

/// 视频文件输入源
///
/// 解码结束返回 `None`，解码出错返回 `Some(Err(_))` 并结束。
pub struct VideoFileSource {
  pipeline: gst::Pipeline,
  appsink: gst_app::AppSink,
  width: u32,
  height: u32,
  fps: Option<f64>,
  frame_index: u64,
  finished: bool,
}

impl FromUrlWithScheme for VideoFileSource {
  const SCHEME: &'static str = "video";
}

impl FromUrl for VideoFileSource {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(InputError::SchemeMismatch(url.scheme().to_string()));
    }
    Self::new(crate::decoded_path(url))
  }
}

impl VideoFileSource {
  pub fn new(path: impl AsRef<Path>) -> Result<Self, InputError> {
    let path = path.as_ref();
    if !path.is_file() {
      return Err(InputError::IoError(std::io::Error::new(
        std::io::ErrorKind::NotFound,
        format!("视频文件不存在: {}", path.display()),
      )));
    }

    gst::init().map_err(video_error)?;

    let location = path
      .display()
      .to_string()
      .replace('\\', "\\\\")
      .replace('"', "\\\"");
    let description = format!(
      "filesrc location=\"{}\" ! decodebin ! videoconvert ! video/x-raw,format=RGB ! \
       appsink name=sink sync=false max-buffers=4",
      location
    );
    info!("GStreamer 管道: {}", description);

    let pipeline = gst::parse::launch(&description)
      .map_err(video_error)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| video_error("无法创建管道"))?;
    let appsink = pipeline
      .by_name("sink")
      .ok_or_else(|| video_error("找不到 appsink 元素"))?
      .downcast::<gst_app::AppSink>()
      .map_err(|_| video_error("无法转换为 appsink"))?;

    let mut source = Self {
      pipeline,
      appsink,
      width: 0,
      height: 0,
      fps: None,
      frame_index: 0,
      finished: false,
    };

    // 预卷第一帧以获取尺寸与帧率，预卷帧随后仍会由 pull_sample 返回
    source
      .pipeline
      .set_state(gst::State::Paused)
      .map_err(video_error)?;
    let preroll = source.wait_preroll()?;
    let video_info = sample_info(&preroll)?;
    source.width = video_info.width();
    source.height = video_info.height();
    let fps = video_info.fps();
    source.fps = (fps.numer() > 0 && fps.denom() > 0)
      .then(|| fps.numer() as f64 / fps.denom() as f64);

    source
      .pipeline
      .set_state(gst::State::Playing)
      .map_err(video_error)?;

    info!(
      "视频已打开: {} ({}x{}, fps {:?})",
      path.display(),
      source.width,
      source.height,
      source.fps
    );
    Ok(source)
  }

  fn wait_preroll(&self) -> Result<gst::Sample, InputError> {
    let deadline = Instant::now() + PREROLL_TIMEOUT;
    loop {
      if let Some(sample) = self
        .appsink
        .try_pull_preroll(gst::ClockTime::from_mseconds(POLL_INTERVAL_MS))
      {
        return Ok(sample);
      }
      if let Some(error) = self.bus_error() {
        return Err(error);
      }
      if self.appsink.is_eos() {
        return Err(video_error("视频中没有可解码的帧"));
      }
      if Instant::now() >= deadline {
        return Err(video_error("等待首帧超时"));
      }
    }
  }

  fn bus_error(&self) -> Option<InputError> {
    let bus = self.pipeline.bus()?;
    let message = bus.pop_filtered(&[gst::MessageType::Error])?;
    match message.view() {
      gst::MessageView::Error(err) => {
        debug!("GStreamer 调试信息: {:?}", err.debug());
        Some(video_error(err.error()))
      }
      _ => None,
    }
  }

  fn sample_to_frame(&mut self, sample: &gst::Sample) -> Result<Frame, InputError> {
    let video_info = sample_info(sample)?;
    let buffer = sample
      .buffer()
      .ok_or_else(|| InputError::InvalidFrame("采样中没有缓冲区".to_string()))?;
    let map = buffer.map_readable().map_err(video_error)?;

    let image = rgb_from_plane(
      map.as_slice(),
      video_info.width(),
      video_info.height(),
      video_info.stride()[0] as usize,
    )?;

    let timestamp_ms = match buffer.pts() {
      Some(pts) => pts.mseconds(),
      None => self
        .fps
        .map(|fps| (self.frame_index as f64 * 1000.0 / fps) as u64)
        .unwrap_or(0),
    };

    let frame = Frame::new(image, self.frame_index, timestamp_ms);
    self.frame_index += 1;
    Ok(frame)
  }

  fn stop(&mut self) {
    self.finished = true;
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("无法停止 GStreamer 管道: {}", e);
    }
  }
}

fn sample_info(sample: &gst::Sample) -> Result<gst_video::VideoInfo, InputError> {
  let caps = sample
    .caps()
    .ok_or_else(|| InputError::InvalidFrame("采样中没有 caps".to_string()))?;
  let video_info = gst_video::VideoInfo::from_caps(caps).map_err(video_error)?;
  if video_info.format() != gst_video::VideoFormat::Rgb {
    return Err(InputError::InvalidFrame(format!(
      "不支持的像素格式: {:?}",
      video_info.format()
    )));
  }
  Ok(video_info)
}

/// 按行拷贝 RGB 平面，去掉每行末尾的对齐填充
fn rgb_from_plane(data: &[u8], width: u32, height: u32, stride: usize) -> Result<RgbImage, InputError> {
  let row_bytes = width as usize * 3;
  let expected = stride * height.saturating_sub(1) as usize + row_bytes;
  if stride < row_bytes || data.len() < expected {
    return Err(InputError::InvalidFrame(format!(
      "缓冲区大小与 {}x{} 不符: {} 字节, 行跨度 {}",
      width,
      height,
      data.len(),
      stride
    )));
  }

  let mut rgb = Vec::with_capacity(row_bytes * height as usize);
  for row in data.chunks(stride).take(height as usize) {
    rgb.extend_from_slice(&row[..row_bytes]);
  }
  RgbImage::from_raw(width, height, rgb)
    .ok_or_else(|| InputError::InvalidFrame(format!("无法构造 {}x{} 图像", width, height)))
}

impl Drop for VideoFileSource {
  fn drop(&mut self) {
    if !self.finished {
      self.stop();
    }
  }
}

impl Iterator for VideoFileSource {
  type Item = Result<Frame, InputError>;

  fn next(&mut self) -> Option<Self::Item> {
    if self.finished {
      return None;
    }

    let stalled_at = Instant::now() + STALL_TIMEOUT;
    loop {
      if let Some(sample) = self
        .appsink
        .try_pull_sample(gst::ClockTime::from_mseconds(POLL_INTERVAL_MS))
      {
        let frame = self.sample_to_frame(&sample);
        if frame.is_err() {
          self.stop();
        }
        return Some(frame);
      }

      if let Some(error) = self.bus_error() {
        warn!("视频解码失败: {}", error);
        self.stop();
        return Some(Err(error));
      }

      if self.appsink.is_eos() {
        info!("视频结束, 共 {} 帧", self.frame_index);
        self.stop();
        return None;
      }

      if Instant::now() >= stalled_at {
        self.stop();
        return Some(Err(video_error("解码停滞")));
      }
    }
  }
}

impl InputSource for VideoFileSource {
  fn source_type(&self) -> InputSourceType {
    InputSourceType::Video
  }

  fn width(&self) -> u32 {
    self.width
  }

  fn height(&self) -> u32 {
    self.height
  }

  fn fps(&self) -> Option<f64> {
    self.fps
  }

  fn release(&mut self) {
    if !self.finished {
      self.stop();
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn padded_rows_are_compacted() {
    // 2x2 RGB，每行 6 字节数据加 2 字节填充
    let data = [
      1, 2, 3, 4, 5, 6, 0, 0, //
      7, 8, 9, 10, 11, 12, 0, 0,
    ];
    let image = rgb_from_plane(&data, 2, 2, 8).unwrap();
    assert_eq!(image.into_raw(), vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12]);
  }

  #[test]
  fn short_buffer_is_invalid_frame() {
    let data = [0u8; 10];
    assert!(matches!(
      rgb_from_plane(&data, 2, 2, 8),
      Err(InputError::InvalidFrame(_))
    ));
  }

  #[test]
  fn missing_file_is_io_error() {
    assert!(matches!(
      VideoFileSource::new("/nonexistent/clip.mp4"),
      Err(InputError::IoError(_))
    ));
  }

  #[test]
  fn wrong_scheme_is_rejected() {
    let url = Url::parse("image:///tmp/clip.mp4").unwrap();
    assert!(matches!(
      VideoFileSource::from_url(&url),
      Err(InputError::SchemeMismatch(_))
    ));
  }

  #[test]
  fn undecodable_file_fails_to_open() {
    let path = std::env::temp_dir().join(format!("shanan-not-a-video-{}.mp4", std::process::id()));
    std::fs::write(&path, b"definitely not a video stream").unwrap();

    let result = VideoFileSource::new(&path);
    std::fs::remove_file(&path).unwrap();
    assert!(matches!(result, Err(InputError::VideoError(_))));
  }
}
