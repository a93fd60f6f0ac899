// 该文件是 Shanan （山南西风） 项目的一部分。
// src/input/v4l2_source.rs - V4L2 摄像头输入源
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

use std::{pin::Pin, time::Instant};

use image::RgbImage;
use tracing::{info, warn};
use url::Url;
use v4l::{
  FourCC, buffer::Type, io::mmap::Stream, io::traits::CaptureStream, prelude::*, video::Capture,
};

use super::{InputError, InputSource, InputSourceType};
use crate::{FromUrl, FromUrlWithScheme, frame::Frame};

const CAPTURE_WIDTH: u32 = 640;
const CAPTURE_HEIGHT: u32 = 480;
const CAPTURE_BUFFERS: u32 = 4;
const DEFAULT_DEVICE: &str = "/dev/video0";

fn v4l_error(e: impl std::fmt::Display) -> InputError {
  InputError::V4lError(e.to_string())
}

/// V4L2 摄像头输入源
///
/// Stream 借用 Device，Device 通过 Pin<Box> 固定在堆上以保证地址稳定。
pub struct V4l2Source {
  device: Pin<Box<Device>>,
  /// 生命周期实际与 device 绑定，必须先于 device 释放
  stream: Option<Stream<'static>>,
  frame_index: u64,
  width: u32,
  height: u32,
  start_time: Instant,
}

impl FromUrlWithScheme for V4l2Source {
  const SCHEME: &'static str = "v4l2";
}

impl FromUrl for V4l2Source {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(InputError::SchemeMismatch(url.scheme().to_string()));
    }

    let path = crate::decoded_path(url);
    if path.is_empty() || path == "/" {
      Self::new(DEFAULT_DEVICE)
    } else {
      Self::new(&path)
    }
  }
}

impl V4l2Source {
  pub fn new(device_path: &str) -> Result<Self, InputError> {
    let device = Box::pin(Device::with_path(device_path).map_err(|e| {
      InputError::UnsupportedSource(format!("无法打开设备 {}: {}", device_path, e))
    })?);

    let mut format = device.format().map_err(v4l_error)?;
    format.width = CAPTURE_WIDTH;
    format.height = CAPTURE_HEIGHT;
    format.fourcc = FourCC::new(b"YUYV");
    let format = device.set_format(&format).map_err(v4l_error)?;

    if format.fourcc != FourCC::new(b"YUYV") {
      return Err(InputError::V4lError(format!(
        "设备不支持 YUYV 格式: {}",
        format.fourcc
      )));
    }

    info!(
      "摄像头 {} 已打开, 分辨率 {}x{}",
      device_path, format.width, format.height
    );

    let mut source = Self {
      device,
      stream: None,
      frame_index: 0,
      width: format.width,
      height: format.height,
      start_time: Instant::now(),
    };

    let device_ref: &Device = &source.device;
    // SAFETY: device 被 Pin<Box> 固定且与 stream 同属一个结构体，
    // Drop 中先释放 stream，因此引用在 stream 存活期间始终有效
    let stream = unsafe {
      let device_static: &'static Device = std::mem::transmute(device_ref);
      Stream::with_buffers(device_static, Type::VideoCapture, CAPTURE_BUFFERS)
        .map_err(v4l_error)?
    };

    source.stream = Some(stream);
    Ok(source)
  }

  /// YUYV (4:2:2) 转 RGB，每 4 字节对应两个像素
  fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Vec<u8> {
    let mut rgb = Vec::with_capacity((width * height * 3) as usize);

    for chunk in yuyv.chunks_exact(4) {
      let u = chunk[1] as f32 - 128.0;
      let v = chunk[3] as f32 - 128.0;

      for y in [chunk[0] as f32, chunk[2] as f32] {
        let r = (y + 1.402 * v).clamp(0.0, 255.0) as u8;
        let g = (y - 0.344 * u - 0.714 * v).clamp(0.0, 255.0) as u8;
        let b = (y + 1.772 * u).clamp(0.0, 255.0) as u8;
        rgb.extend_from_slice(&[r, g, b]);
      }
    }

    rgb
  }
}

impl Drop for V4l2Source {
  fn drop(&mut self) {
    self.stream.take();
  }
}

impl Iterator for V4l2Source {
  type Item = Result<Frame, InputError>;

  fn next(&mut self) -> Option<Self::Item> {
    let stream = self.stream.as_mut()?;

    let buffer = match stream.next() {
      Ok((buffer, _meta)) => buffer,
      Err(e) => {
        warn!("无法捕获帧: {}", e);
        return Some(Err(v4l_error(e)));
      }
    };

    let rgb = Self::yuyv_to_rgb(buffer, self.width, self.height);
    let Some(image) = RgbImage::from_raw(self.width, self.height, rgb) else {
      return Some(Err(InputError::InvalidFrame(format!(
        "缓冲区大小与 {}x{} 不符",
        self.width, self.height
      ))));
    };

    let frame = Frame::new(
      image,
      self.frame_index,
      self.start_time.elapsed().as_millis() as u64,
    );
    self.frame_index += 1;
    Some(Ok(frame))
  }
}

impl InputSource for V4l2Source {
  fn source_type(&self) -> InputSourceType {
    InputSourceType::V4l2
  }

  fn width(&self) -> u32 {
    self.width
  }

  fn height(&self) -> u32 {
    self.height
  }

  fn fps(&self) -> Option<f64> {
    Some(30.0)
  }

  fn release(&mut self) {
    if self.stream.take().is_some() {
      info!("摄像头已释放");
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn yuyv_gray_maps_to_gray() {
    // U = V = 128 时无色度
    let yuyv = [100u8, 128, 200, 128];
    let rgb = V4l2Source::yuyv_to_rgb(&yuyv, 2, 1);
    assert_eq!(rgb, vec![100, 100, 100, 200, 200, 200]);
  }

  #[test]
  fn missing_device_is_unsupported() {
    assert!(matches!(
      V4l2Source::new("/dev/video-does-not-exist"),
      Err(InputError::UnsupportedSource(_))
    ));
  }
}
