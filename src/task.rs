// 该文件是 Shanan （山南西风） 项目的一部分。
// src/task.rs - 采集/处理流水线
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
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
  },
  thread,
  time::Instant,
};

use anyhow::Context;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  channel::BoundedFrameChannel,
  detector::{DecoderConfig, YoloDecoder},
  frame::Frame,
  input::InputSource,
  model::Model,
  output::{FrameResult, Render},
  preprocess::{Letterbox, PreprocessError},
  tracker::{Tracker, TrackerConfig},
};

pub const DEFAULT_QUEUE_SIZE: usize = 24;

const PRODUCER_LOG_INTERVAL: u64 = 100;
const CONSUMER_LOG_INTERVAL: u64 = 50;

pub trait Task<I, M, O>: Sized {
  type Output;
  type Error;
  fn run_task(self, input: I, model: M, output: O) -> Result<Self::Output, Self::Error>;
}

/// 跨线程共享的取消标志
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn cancel(&self) {
    self.0.store(true, Ordering::SeqCst);
  }

  pub fn is_cancelled(&self) -> bool {
    self.0.load(Ordering::SeqCst)
  }
}

/// 流水线参数
#[derive(Debug, Clone)]
pub struct PipelineConfig {
  /// 帧通道容量
  pub queue_size: usize,
  pub decoder: DecoderConfig,
  pub tracker: TrackerConfig,
  /// 消费者最多处理的帧数，`None` 表示不限
  pub max_frames: Option<u64>,
}

impl Default for PipelineConfig {
  fn default() -> Self {
    Self {
      queue_size: DEFAULT_QUEUE_SIZE,
      decoder: DecoderConfig::default(),
      tracker: TrackerConfig::default(),
      max_frames: None,
    }
  }
}

/// 运行统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineReport {
  /// 成功送入通道的帧数
  pub frames_captured: u64,
  /// 完整处理并输出的帧数
  pub frames_processed: u64,
  /// 因预处理/推理失败或输出为空而跳过的帧数
  pub frames_skipped: u64,
  /// NMS 之后的检测总数
  pub total_detections: u64,
  pub tracks_created: u64,
}

/// 单帧被跳过的原因
#[derive(Error, Debug)]
pub enum FrameSkip {
  #[error("预处理失败: {0}")]
  Preprocess(#[from] PreprocessError),
  #[error("推理失败: {0}")]
  Inference(String),
  #[error("模型输出为空")]
  EmptyOutput,
}

/// 单帧处理：预处理、推理、解码、跟踪
///
/// 由消费者线程独占，跟踪状态跨帧保留。
pub struct FrameProcessor<M> {
  model: M,
  letterbox: Letterbox,
  decoder: YoloDecoder,
  tracker: Tracker,
}

impl<M: Model> FrameProcessor<M> {
  pub fn new(
    model: M,
    decoder: DecoderConfig,
    tracker: TrackerConfig,
  ) -> Result<Self, PreprocessError> {
    let (width, height) = model.input_size();
    Ok(Self {
      letterbox: Letterbox::new(width, height)?,
      model,
      decoder: YoloDecoder::new(decoder),
      tracker: Tracker::new(tracker),
    })
  }

  pub fn tracker(&self) -> &Tracker {
    &self.tracker
  }

  pub fn process(&mut self, frame: &Frame) -> Result<FrameResult, FrameSkip> {
    let preprocessed = self.letterbox.process(&frame.image)?;

    let raw = self
      .model
      .infer(&preprocessed.blob)
      .map_err(|e| FrameSkip::Inference(e.to_string()))?;
    if raw.is_empty() {
      return Err(FrameSkip::EmptyOutput);
    }

    let detections = self
      .decoder
      .decode(&raw, frame.size(), &preprocessed.transform);
    let tracks = self.tracker.update(&detections);

    Ok(FrameResult::new(detections, tracks))
  }
}

/// 消费者退出（包括 panic 展开）时取消并关闭通道，唤醒阻塞在 push 的生产者
struct ShutdownGuard<'a> {
  channel: &'a BoundedFrameChannel<Frame>,
  token: &'a CancellationToken,
}

impl Drop for ShutdownGuard<'_> {
  fn drop(&mut self) {
    self.token.cancel();
    self.channel.close();
  }
}

#[derive(Debug, Default)]
struct ConsumerStats {
  processed: u64,
  skipped: u64,
  detections: u64,
  tracks_created: u64,
}

/// 生产者/消费者双线程流水线
#[derive(Debug, Default)]
pub struct PipelineTask {
  config: PipelineConfig,
  token: CancellationToken,
}

impl PipelineTask {
  pub fn new(config: PipelineConfig, token: CancellationToken) -> Self {
    Self { config, token }
  }

  pub fn with_frame_number(mut self, frame_number: Option<u64>) -> Self {
    self.config.max_frames = frame_number.filter(|n| *n > 0);
    self
  }

  pub fn token(&self) -> &CancellationToken {
    &self.token
  }
}

fn produce<I: InputSource>(
  mut input: I,
  channel: &BoundedFrameChannel<Frame>,
  token: &CancellationToken,
) -> u64 {
  info!(
    "生产者启动, 输入 {:?} {}x{}",
    input.source_type(),
    input.width(),
    input.height()
  );

  let mut captured = 0u64;
  while !token.is_cancelled() {
    match input.next() {
      None => {
        info!("输入流结束");
        break;
      }
      Some(Err(e)) => {
        error!("读取帧失败: {}", e);
        break;
      }
      Some(Ok(frame)) => {
        if !channel.push(frame) {
          debug!("通道已关闭, 生产者停止");
          break;
        }
        captured += 1;
        if captured % PRODUCER_LOG_INTERVAL == 0 {
          info!("已采集 {} 帧", captured);
        }
      }
    }
  }

  input.release();
  info!("生产者退出, 共采集 {} 帧", captured);
  captured
}

fn consume<M, O>(
  mut processor: FrameProcessor<M>,
  mut output: O,
  channel: &BoundedFrameChannel<Frame>,
  token: &CancellationToken,
  max_frames: Option<u64>,
) -> anyhow::Result<ConsumerStats>
where
  M: Model,
  O: Render,
  O::Error: std::error::Error + Send + Sync + 'static,
{
  let _guard = ShutdownGuard { channel, token };
  let mut stats = ConsumerStats::default();
  let mut last_log = Instant::now();

  loop {
    if token.is_cancelled() {
      info!("收到取消信号, 消费者停止");
      break;
    }

    let Some(frame) = channel.pop() else {
      debug!("通道已关闭且为空, 消费者停止");
      break;
    };

    match processor.process(&frame) {
      Ok(result) => {
        stats.detections += result.detections.len() as u64;
        output
          .render_result(&frame, &result)
          .with_context(|| format!("输出第 {} 帧失败", frame.index))?;
        stats.processed += 1;
      }
      Err(FrameSkip::EmptyOutput) => {
        debug!("第 {} 帧模型输出为空, 跳过", frame.index);
        stats.skipped += 1;
      }
      Err(e) => {
        warn!("第 {} 帧被跳过: {}", frame.index, e);
        stats.skipped += 1;
      }
    }

    let handled = stats.processed + stats.skipped;
    if handled % CONSUMER_LOG_INTERVAL == 0 {
      info!(
        "已处理 {} 帧, 最近 {} 帧耗时 {:.2?}, 活跃轨迹 {}",
        handled,
        CONSUMER_LOG_INTERVAL,
        last_log.elapsed(),
        processor.tracker().tracks().len()
      );
      last_log = Instant::now();
    }

    if max_frames.is_some_and(|n| handled >= n) {
      info!("达到指定帧数 {}, 消费者停止", handled);
      break;
    }
  }

  stats.tracks_created = processor.tracker().tracks_created();
  output.finish().context("结束输出失败")?;
  info!(
    "消费者退出, 处理 {} 帧, 跳过 {} 帧",
    stats.processed, stats.skipped
  );
  Ok(stats)
}

impl<I, M, O> Task<I, M, O> for PipelineTask
where
  I: InputSource,
  M: Model + Send,
  O: Render + Send,
  O::Error: std::error::Error + Send + Sync + 'static,
{
  type Output = PipelineReport;
  type Error = anyhow::Error;

  fn run_task(self, input: I, model: M, output: O) -> Result<Self::Output, Self::Error> {
    info!(
      "开始任务, 通道容量 {}, 置信度阈值 {}, NMS 阈值 {}",
      self.config.queue_size,
      self.config.decoder.confidence_threshold,
      self.config.decoder.nms_threshold
    );

    let processor = FrameProcessor::new(model, self.config.decoder, self.config.tracker.clone())
      .context("无法创建预处理器")?;
    let channel = BoundedFrameChannel::<Frame>::new(self.config.queue_size);
    let max_frames = self.config.max_frames;
    let started = Instant::now();

    let (captured, consumed) = thread::scope(|s| {
      let channel = &channel;
      let token = &self.token;

      let producer = s.spawn(move || produce(input, channel, token));
      let consumer = s.spawn(move || consume(processor, output, channel, token, max_frames));

      let captured = producer.join().unwrap_or_else(|_| {
        error!("生产者线程异常退出");
        token.cancel();
        0
      });
      // 生产者结束后关闭通道，消费者把剩余帧处理完
      channel.close();

      let consumed = consumer
        .join()
        .unwrap_or_else(|_| Err(anyhow::anyhow!("消费者线程异常退出")));
      (captured, consumed)
    });

    let consumed = consumed?;
    let report = PipelineReport {
      frames_captured: captured,
      frames_processed: consumed.processed,
      frames_skipped: consumed.skipped,
      total_detections: consumed.detections,
      tracks_created: consumed.tracks_created,
    };

    info!("任务完成, 耗时 {:.2?}: {:?}", started.elapsed(), report);
    Ok(report)
  }
}
