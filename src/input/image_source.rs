// 该文件是 Shanan （山南西风） 项目的一部分。
// src/input/image_source.rs - 图片与图片序列输入源
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

use std::{
  collections::VecDeque,
  path::{Path, PathBuf},
  time::Instant,
};

use image::{ImageReader, RgbImage};
use tracing::{debug, error, info};
use url::Url;

use super::{InputError, InputSource, InputSourceType};
use crate::{FromUrl, FromUrlWithScheme, frame::Frame};

const IMAGE_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "bmp", "gif", "webp"];

pub(super) fn is_image_file(path: &Path) -> bool {
  path
    .extension()
    .and_then(|ext| ext.to_str())
    .map(|ext| {
      let ext = ext.to_ascii_lowercase();
      IMAGE_EXTENSIONS.contains(&ext.as_str())
    })
    .unwrap_or(false)
}

fn load_rgb(path: &Path) -> Result<RgbImage, InputError> {
  Ok(ImageReader::open(path)?.decode()?.to_rgb8())
}

fn check_scheme<T: FromUrlWithScheme>(url: &Url) -> Result<(), InputError> {
  if url.scheme() != T::SCHEME {
    error!(
      "URI 方案不匹配: 期望 '{}', 实际 '{}'",
      T::SCHEME,
      url.scheme()
    );
    return Err(InputError::SchemeMismatch(url.scheme().to_string()));
  }
  Ok(())
}

/// 单张图片输入源，只产生一帧
pub struct ImageSource {
  image: Option<RgbImage>,
  width: u32,
  height: u32,
}

impl FromUrlWithScheme for ImageSource {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageSource {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    check_scheme::<Self>(url)?;
    Self::new(crate::decoded_path(url))
  }
}

impl ImageSource {
  pub fn new(path: impl AsRef<Path>) -> Result<Self, InputError> {
    let image = load_rgb(path.as_ref())?;
    Ok(Self::from_image(image))
  }

  pub fn from_image(image: RgbImage) -> Self {
    let (width, height) = image.dimensions();
    Self {
      image: Some(image),
      width,
      height,
    }
  }
}

impl Iterator for ImageSource {
  type Item = Result<Frame, InputError>;

  fn next(&mut self) -> Option<Self::Item> {
    self.image.take().map(|image| Ok(Frame::new(image, 0, 0)))
  }
}

impl InputSource for ImageSource {
  fn source_type(&self) -> InputSourceType {
    InputSourceType::Image
  }

  fn width(&self) -> u32 {
    self.width
  }

  fn height(&self) -> u32 {
    self.height
  }

  fn fps(&self) -> Option<f64> {
    None
  }

  fn release(&mut self) {
    self.image = None;
  }
}

/// 图片序列输入源
///
/// 目录中的图片按文件名排序后依次作为帧输出，子目录与非图片文件被忽略。
pub struct ImageSequenceSource {
  pending: VecDeque<PathBuf>,
  frame_index: u64,
  width: u32,
  height: u32,
  start_time: Instant,
}

impl FromUrlWithScheme for ImageSequenceSource {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for ImageSequenceSource {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    check_scheme::<Self>(url)?;
    Self::new(crate::decoded_path(url))
  }
}

impl ImageSequenceSource {
  pub fn new(dir: impl AsRef<Path>) -> Result<Self, InputError> {
    let dir = dir.as_ref();
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
      .filter_map(|entry| entry.ok().map(|e| e.path()))
      .filter(|path| path.is_file() && is_image_file(path))
      .collect();
    files.sort();

    let first = files
      .first()
      .ok_or_else(|| InputError::EmptySequence(dir.display().to_string()))?;
    let (width, height) = image::image_dimensions(first)?;

    info!(
      "图片序列 {}: {} 帧, 首帧尺寸 {}x{}",
      dir.display(),
      files.len(),
      width,
      height
    );

    Ok(Self {
      pending: files.into(),
      frame_index: 0,
      width,
      height,
      start_time: Instant::now(),
    })
  }

  /// 剩余未读取的帧数
  pub fn remaining(&self) -> usize {
    self.pending.len()
  }
}

impl Iterator for ImageSequenceSource {
  type Item = Result<Frame, InputError>;

  fn next(&mut self) -> Option<Self::Item> {
    let path = self.pending.pop_front()?;
    debug!("读取图片: {}", path.display());

    let image = match load_rgb(&path) {
      Ok(image) => image,
      Err(e) => return Some(Err(e)),
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

impl InputSource for ImageSequenceSource {
  fn source_type(&self) -> InputSourceType {
    InputSourceType::ImageSequence
  }

  fn width(&self) -> u32 {
    self.width
  }

  fn height(&self) -> u32 {
    self.height
  }

  fn fps(&self) -> Option<f64> {
    None
  }

  fn release(&mut self) {
    self.pending.clear();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::Rgb;

  fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
      "shanan-track-{}-{}",
      name,
      std::process::id()
    ));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
  }

  #[test]
  fn extension_check_is_case_insensitive() {
    assert!(is_image_file(Path::new("a/b/frame.PNG")));
    assert!(is_image_file(Path::new("frame.jpeg")));
    assert!(!is_image_file(Path::new("video.mp4")));
    assert!(!is_image_file(Path::new("noext")));
  }

  #[test]
  fn single_image_yields_exactly_one_frame() {
    let mut source = ImageSource::from_image(RgbImage::new(8, 6));
    assert_eq!((source.width(), source.height()), (8, 6));

    let frame = source.next().unwrap().unwrap();
    assert_eq!(frame.index, 0);
    assert_eq!(frame.size(), (8, 6));
    assert!(source.next().is_none());
  }

  #[test]
  fn sequence_is_read_in_name_order() {
    let dir = scratch_dir("sequence");
    for (name, value) in [("002.png", 20u8), ("001.png", 10u8), ("003.png", 30u8)] {
      RgbImage::from_pixel(4, 4, Rgb([value, 0, 0]))
        .save(dir.join(name))
        .unwrap();
    }
    std::fs::write(dir.join("notes.txt"), "not an image").unwrap();

    let source = ImageSequenceSource::new(&dir).unwrap();
    assert_eq!(source.remaining(), 3);

    let frames: Vec<Frame> = source.map(|f| f.unwrap()).collect();
    let reds: Vec<u8> = frames.iter().map(|f| f.image.get_pixel(0, 0)[0]).collect();
    let indices: Vec<u64> = frames.iter().map(|f| f.index).collect();
    assert_eq!(reds, vec![10, 20, 30]);
    assert_eq!(indices, vec![0, 1, 2]);

    std::fs::remove_dir_all(&dir).unwrap();
  }

  #[test]
  fn empty_directory_is_rejected() {
    let dir = scratch_dir("empty");
    assert!(matches!(
      ImageSequenceSource::new(&dir),
      Err(InputError::EmptySequence(_))
    ));
    std::fs::remove_dir_all(&dir).unwrap();
  }

  #[test]
  fn release_stops_the_sequence() {
    let dir = scratch_dir("release");
    for name in ["a.png", "b.png"] {
      RgbImage::new(2, 2).save(dir.join(name)).unwrap();
    }

    let mut source = ImageSequenceSource::new(&dir).unwrap();
    assert!(source.next().is_some());
    source.release();
    assert!(source.next().is_none());

    std::fs::remove_dir_all(&dir).unwrap();
  }

  #[test]
  fn wrong_scheme_is_rejected() {
    let url = Url::parse("folder:///tmp/frames").unwrap();
    assert!(matches!(
      ImageSource::from_url(&url),
      Err(InputError::SchemeMismatch(_))
    ));
  }
}
