// 该文件是 Shanan （山南西风） 项目的一部分。
// src/main.rs - 检测跟踪主程序
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

mod args;

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};
use url::Url;

use shanan_track::{
  FromUrl,
  input::open_source,
  model::{OnnxModel, OnnxModelBuilder},
  output::OutputWrapper,
  task::{CancellationToken, PipelineTask, Task},
};

fn load_model(model: &str, width: u32, height: u32) -> Result<OnnxModel> {
  let builder = match Url::parse(model) {
    Ok(url) if url.scheme() == "onnx" => OnnxModelBuilder::from_url(&url)?,
    _ => OnnxModelBuilder::new(model),
  };
  Ok(builder.input_size(width, height).build()?)
}

fn run(args: args::Args) -> Result<()> {
  info!("模型文件路径: {}", args.model);
  info!("输入来源: {}", args.input);
  info!("输出方式: {}", args.output);
  info!(
    "置信度阈值: {}, NMS 阈值: {}",
    args.confidence, args.nms_threshold
  );

  let model = load_model(&args.model, args.input_width, args.input_height)
    .with_context(|| format!("无法加载模型: {}", args.model))?;
  let input =
    open_source(&args.input).with_context(|| format!("无法打开输入源: {}", args.input))?;
  info!(
    "输入源已打开: {:?} {}x{}",
    input.source_type(),
    input.width(),
    input.height()
  );
  let output =
    OutputWrapper::parse(&args.output).with_context(|| format!("无法创建输出: {}", args.output))?;

  let token = CancellationToken::new();
  {
    let token = token.clone();
    ctrlc::set_handler(move || {
      warn!("收到中断信号, 准备退出...");
      token.cancel();
    })
    .context("无法设置中断信号处理")?;
  }

  let report = PipelineTask::new(args.pipeline_config(), token).run_task(input, model, output)?;

  info!("采集帧数: {}", report.frames_captured);
  info!("处理帧数: {}", report.frames_processed);
  info!("跳过帧数: {}", report.frames_skipped);
  info!("检测总数: {}", report.total_detections);
  info!("轨迹总数: {}", report.tracks_created);
  Ok(())
}

fn main() -> ExitCode {
  let args = match args::Args::try_parse() {
    Ok(args) => args,
    Err(e) => {
      let _ = e.print();
      return ExitCode::from(args::parse_error_exit_code(&e));
    }
  };

  tracing_subscriber::fmt()
    .with_max_level(args.log_level)
    .init();

  if let Err(e) = args.validate() {
    error!("参数错误: {}", e);
    return ExitCode::FAILURE;
  }

  match run(args) {
    Ok(()) => ExitCode::SUCCESS,
    Err(e) => {
      error!("{:#}", e);
      ExitCode::FAILURE
    }
  }
}
