// 该文件是 Shanan （山南西风） 项目的一部分。
// src/input.rs - 视频/图像输入
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

use std::path::Path;

use thiserror::Error;
use tracing::info;
use url::Url;

use crate::{FromUrl, frame::Frame};

#[cfg(feature = "read_image_file")]
mod image_source;
#[cfg(feature = "read_image_file")]
pub use self::image_source::{ImageSequenceSource, ImageSource};

#[cfg(feature = "v4l_input")]
mod v4l2_source;
#[cfg(feature = "v4l_input")]
pub use self::v4l2_source::V4l2Source;

#[cfg(feature = "gstreamer_input")]
mod video_source;
#[cfg(feature = "gstreamer_input")]
pub use self::video_source::VideoFileSource;

#[derive(Error, Debug)]
pub enum InputError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("不支持的输入源: {0}")]
  UnsupportedSource(String),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像加载错误: {0}")]
  ImageLoadError(#[from] image::ImageError),
  #[error("目录中没有可读取的图片: {0}")]
  EmptySequence(String),
  #[error("V4L2 错误: {0}")]
  V4lError(String),
  #[error("视频解码错误: {0}")]
  VideoError(String),
  #[error("帧数据无效: {0}")]
  InvalidFrame(String),
}

/// 输入源类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputSourceType {
  /// 单张图片
  Image,
  /// 图片序列（目录）
  ImageSequence,
  /// V4L2 摄像头
  V4l2,
  /// 视频文件
  Video,
}

/// 输入源
///
/// `next()` 返回 `None` 表示流结束，返回 `Some(Err(_))` 表示读取失败。
pub trait InputSource: Iterator<Item = Result<Frame, InputError>> + Send {
  /// 获取输入源类型
  fn source_type(&self) -> InputSourceType;

  /// 获取帧宽度
  fn width(&self) -> u32;

  /// 获取帧高度
  fn height(&self) -> u32;

  /// 获取帧率（如果适用）
  fn fps(&self) -> Option<f64>;

  /// 释放底层设备，之后不再产生帧
  fn release(&mut self) {}
}

impl<S: InputSource + ?Sized> InputSource for Box<S> {
  fn source_type(&self) -> InputSourceType {
    (**self).source_type()
  }

  fn width(&self) -> u32 {
    (**self).width()
  }

  fn height(&self) -> u32 {
    (**self).height()
  }

  fn fps(&self) -> Option<f64> {
    (**self).fps()
  }

  fn release(&mut self) {
    (**self).release()
  }
}

/// 根据标识打开输入源
///
/// 支持的形式:
/// - 摄像头: `0`、`/dev/video0`、`v4l2:///dev/video0`
/// - 图片: `image:///path/a.jpg` 或图片文件路径
/// - 图片序列: `folder:///path/frames` 或目录路径
/// - 视频文件: `video:///path/clip.mp4` 或其他已存在的文件路径
pub fn open_source(source: &str) -> Result<Box<dyn InputSource>, InputError> {
  if !source.is_empty() && source.chars().all(|c| c.is_ascii_digit()) {
    return open_camera(&format!("/dev/video{}", source));
  }

  if source.starts_with("/dev/video") {
    return open_camera(source);
  }

  // 单字母方案视为 Windows 盘符而非 URL
  if let Ok(url) = Url::parse(source)
    && url.scheme().len() > 1
  {
    return open_url(&url);
  }

  open_path(Path::new(source))
}

fn open_url(url: &Url) -> Result<Box<dyn InputSource>, InputError> {
  match url.scheme() {
    "v4l2" => open_camera(&crate::decoded_path(url)),
    #[cfg(feature = "read_image_file")]
    "image" => Ok(Box::new(ImageSource::from_url(url)?)),
    #[cfg(feature = "read_image_file")]
    "folder" => Ok(Box::new(ImageSequenceSource::from_url(url)?)),
    "video" => open_video(Path::new(&crate::decoded_path(url))),
    scheme => Err(InputError::SchemeMismatch(scheme.to_string())),
  }
}

fn open_path(path: &Path) -> Result<Box<dyn InputSource>, InputError> {
  #[cfg(feature = "read_image_file")]
  {
    if path.is_dir() {
      info!("以图片序列打开目录: {}", path.display());
      return Ok(Box::new(ImageSequenceSource::new(path)?));
    }

    if image_source::is_image_file(path) {
      info!("以单张图片打开: {}", path.display());
      return Ok(Box::new(ImageSource::new(path)?));
    }
  }

  if path.is_file() {
    return open_video(path);
  }

  Err(InputError::UnsupportedSource(path.display().to_string()))
}

#[cfg(feature = "gstreamer_input")]
fn open_video(path: &Path) -> Result<Box<dyn InputSource>, InputError> {
  info!("以视频文件打开: {}", path.display());
  Ok(Box::new(VideoFileSource::new(path)?))
}

#[cfg(not(feature = "gstreamer_input"))]
fn open_video(path: &Path) -> Result<Box<dyn InputSource>, InputError> {
  Err(InputError::UnsupportedSource(format!(
    "{} (需要启用 gstreamer_input 特性)",
    path.display()
  )))
}

#[cfg(feature = "v4l_input")]
fn open_camera(device_path: &str) -> Result<Box<dyn InputSource>, InputError> {
  info!("打开摄像头: {}", device_path);
  Ok(Box::new(V4l2Source::new(device_path)?))
}

#[cfg(not(feature = "v4l_input"))]
fn open_camera(device_path: &str) -> Result<Box<dyn InputSource>, InputError> {
  Err(InputError::UnsupportedSource(format!(
    "{} (需要启用 v4l_input 特性)",
    device_path
  )))
}
