// 该文件是 Shanan （山南西风） 项目的一部分。
// src/args.rs - 项目参数配置
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use clap::{Parser, error::ErrorKind};
use thiserror::Error;

use shanan_track::{
  detector::DecoderConfig,
  task::PipelineConfig,
  tracker::TrackerConfig,
};

#[derive(Error, Debug, PartialEq)]
pub enum ArgsError {
  #[error("{name} 必须在 [0, 1] 区间内, 实际为 {value}")]
  ThresholdOutOfRange { name: &'static str, value: f32 },
  #[error("模型输入尺寸不能为 0: {0}x{1}")]
  ZeroInputSize(u32, u32),
  #[error("模型路径不能为空")]
  EmptyModelPath,
  #[error("帧通道容量不能为 0")]
  ZeroQueueSize,
}

/// 命令行解析失败时的退出码：帮助与版本信息为 0，其余为 1
pub fn parse_error_exit_code(err: &clap::Error) -> u8 {
  match err.kind() {
    ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
    _ => 1,
  }
}

/// Shanan 检测跟踪参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// ONNX 模型文件路径（也可写作 onnx:///path/model.onnx）
  #[arg(long, value_name = "FILE")]
  pub model: String,

  /// 输入来源
  /// 支持格式:
  /// - 摄像头: 0, /dev/video0 或 v4l2:///dev/video0
  /// - 图片: *.jpg, *.png 等，或 image:///path/a.jpg
  /// - 图片序列: 目录路径，或 folder:///path/frames
  /// - 视频文件: 其他文件路径，或 video:///path/clip.mp4（需 gstreamer_input 特性）
  #[arg(long, default_value = "0", value_name = "SOURCE")]
  pub input: String,

  /// 输出方式
  /// 支持格式:
  /// - log: 仅写日志
  /// - folder:///path/out[?always] 保存标注帧与 JSON 记录
  #[arg(long, default_value = "log:", value_name = "OUTPUT")]
  pub output: String,

  /// 置信度阈值 (0.0 - 1.0)
  #[arg(long, default_value = "0.25", value_name = "THRESHOLD")]
  pub confidence: f32,

  /// NMS IOU 阈值 (0.0 - 1.0)
  #[arg(long, default_value = "0.45", value_name = "THRESHOLD")]
  pub nms_threshold: f32,

  /// 帧通道容量
  #[arg(long, default_value = "24", value_name = "COUNT")]
  pub queue_size: usize,

  /// 模型输入宽度
  #[arg(long, default_value = "640", value_name = "PIXELS")]
  pub input_width: u32,

  /// 模型输入高度
  #[arg(long, default_value = "640", value_name = "PIXELS")]
  pub input_height: u32,

  /// 参与跟踪的类别编号，逗号分隔，缺省为全部类别
  #[arg(long, value_delimiter = ',', value_name = "IDS")]
  pub track_classes: Vec<usize>,

  /// 最大处理帧数（0 表示无限制）
  #[arg(long, default_value = "0", value_name = "COUNT")]
  pub max_frames: u64,

  /// 日志级别 (trace, debug, info, warn, error)
  #[arg(long, default_value = "info", value_name = "LEVEL")]
  pub log_level: tracing::Level,
}

impl Args {
  pub fn validate(&self) -> Result<(), ArgsError> {
    if self.model.trim().is_empty() {
      return Err(ArgsError::EmptyModelPath);
    }

    for (name, value) in [
      ("confidence", self.confidence),
      ("nms-threshold", self.nms_threshold),
    ] {
      if !(0.0..=1.0).contains(&value) {
        return Err(ArgsError::ThresholdOutOfRange { name, value });
      }
    }

    if self.input_width == 0 || self.input_height == 0 {
      return Err(ArgsError::ZeroInputSize(self.input_width, self.input_height));
    }

    if self.queue_size == 0 {
      return Err(ArgsError::ZeroQueueSize);
    }

    Ok(())
  }

  pub fn pipeline_config(&self) -> PipelineConfig {
    PipelineConfig {
      queue_size: self.queue_size,
      decoder: DecoderConfig {
        confidence_threshold: self.confidence,
        nms_threshold: self.nms_threshold,
      },
      tracker: TrackerConfig::default().with_trackable_classes(Some(self.track_classes.clone())),
      max_frames: (self.max_frames > 0).then_some(self.max_frames),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn parse(extra: &[&str]) -> Args {
    let mut argv = vec!["shanan-track", "--model", "yolov8n.onnx"];
    argv.extend_from_slice(extra);
    Args::try_parse_from(argv).unwrap()
  }

  #[test]
  fn defaults_match_documented_values() {
    let args = parse(&[]);
    assert_eq!(args.input, "0");
    assert_eq!(args.output, "log:");
    assert_eq!(args.confidence, 0.25);
    assert_eq!(args.nms_threshold, 0.45);
    assert_eq!(args.queue_size, 24);
    assert_eq!((args.input_width, args.input_height), (640, 640));
    assert!(args.track_classes.is_empty());
    assert_eq!(args.log_level, tracing::Level::INFO);
    assert_eq!(args.validate(), Ok(()));

    let config = args.pipeline_config();
    assert_eq!(config.max_frames, None);
    assert_eq!(config.tracker.trackable_classes, None);
  }

  #[test]
  fn model_is_required() {
    assert!(Args::try_parse_from(["shanan-track"]).is_err());
  }

  #[test]
  fn track_classes_are_comma_separated() {
    let args = parse(&["--track-classes", "0,2,7"]);
    assert_eq!(args.track_classes, vec![0, 2, 7]);
    assert_eq!(
      args.pipeline_config().tracker.trackable_classes,
      Some(vec![0, 2, 7])
    );
  }

  #[test]
  fn out_of_range_threshold_is_rejected() {
    let args = parse(&["--confidence", "1.5"]);
    assert!(matches!(
      args.validate(),
      Err(ArgsError::ThresholdOutOfRange {
        name: "confidence",
        ..
      })
    ));
  }

  #[test]
  fn zero_input_size_is_rejected() {
    let args = parse(&["--input-width", "0"]);
    assert_eq!(args.validate(), Err(ArgsError::ZeroInputSize(0, 640)));
  }

  #[test]
  fn zero_queue_size_is_rejected() {
    let args = parse(&["--queue-size", "0"]);
    assert_eq!(args.validate(), Err(ArgsError::ZeroQueueSize));
  }

  #[test]
  fn parse_errors_map_to_exit_codes() {
    let exit_code = |argv: &[&str]| {
      let err = Args::try_parse_from(argv).unwrap_err();
      parse_error_exit_code(&err)
    };

    assert_eq!(exit_code(&["shanan-track", "--help"]), 0);
    assert_eq!(exit_code(&["shanan-track", "--version"]), 0);
    assert_eq!(exit_code(&["shanan-track"]), 1);
    assert_eq!(
      exit_code(&["shanan-track", "--model", "m.onnx", "--confidence", "abc"]),
      1
    );
    assert_eq!(exit_code(&["shanan-track", "--model", "m.onnx", "--bogus"]), 1);
  }

  #[test]
  fn max_frames_maps_to_limit() {
    let args = parse(&["--max-frames", "10"]);
    assert_eq!(args.pipeline_config().max_frames, Some(10));
  }
}
