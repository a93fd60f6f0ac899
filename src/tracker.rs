// 该文件是 Shanan （山南西风） 项目的一部分。
// src/tracker.rs - 多目标跟踪
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

//! 贪心 IoU 关联 + 指数平滑的轻量多目标跟踪器。
//!
//! 每帧按创建顺序遍历已有轨迹，为其挑选 IoU 最大的同类未匹配检测；
//! 不做运动预测，也不做全局最优匹配。

use tracing::debug;

use crate::{bbox::BBox, model::Detection};

/// 跟踪参数
#[derive(Debug, Clone)]
pub struct TrackerConfig {
  /// 关联所需的最小 IoU（严格大于）
  pub match_iou: f32,
  /// 已匹配过的轨迹接受的最低检测置信度
  pub keep_conf: f32,
  /// 新建轨迹、以及从未匹配过的轨迹接受的最低检测置信度
  pub enter_conf: f32,
  /// 平滑系数，越大越贴近当前检测
  pub alpha: f32,
  /// 连续丢失超过该帧数后删除轨迹
  pub grace_lost: u32,
  /// 连续匹配次数达到该值后才对外可见
  pub min_age_to_draw: u32,
  /// 参与跟踪的类别；`None` 表示全部类别
  pub trackable_classes: Option<Vec<usize>>,
}

impl Default for TrackerConfig {
  fn default() -> Self {
    Self {
      match_iou: 0.4,
      keep_conf: 0.3,
      enter_conf: 0.5,
      alpha: 0.7,
      grace_lost: 3,
      min_age_to_draw: 2,
      trackable_classes: None,
    }
  }
}

impl TrackerConfig {
  pub fn with_trackable_classes(mut self, classes: Option<Vec<usize>>) -> Self {
    self.trackable_classes = classes.filter(|classes| !classes.is_empty());
    self
  }

  fn is_trackable(&self, class_id: usize) -> bool {
    self
      .trackable_classes
      .as_ref()
      .is_none_or(|classes| classes.contains(&class_id))
  }
}

/// 单条轨迹
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
  pub id: u64,
  /// 最近一次匹配到的检测框
  pub raw_box: BBox,
  /// 平滑后的框，用于显示
  pub smoothed_box: BBox,
  pub confidence: f32,
  pub class_id: usize,
  /// 连续成功匹配次数
  pub age: u32,
  pub frames_since_last_match: u32,
}

impl Track {
  pub(crate) fn spawn(id: u64, detection: &Detection) -> Self {
    Self {
      id,
      raw_box: detection.bbox,
      smoothed_box: detection.bbox,
      confidence: detection.confidence,
      class_id: detection.class_id,
      age: 0,
      frames_since_last_match: 0,
    }
  }

  fn correct(&mut self, detection: &Detection, alpha: f32) {
    self.raw_box = detection.bbox;
    self.smoothed_box = detection.bbox.blend(&self.smoothed_box, alpha);
    self.confidence = detection.confidence;
    self.age += 1;
    self.frames_since_last_match = 0;
  }

  fn mark_missed(&mut self) {
    self.frames_since_last_match += 1;
  }
}

/// 多目标跟踪器，由消费者线程独占
#[derive(Debug)]
pub struct Tracker {
  config: TrackerConfig,
  tracks: Vec<Track>,
  next_id: u64,
}

impl Default for Tracker {
  fn default() -> Self {
    Self::new(TrackerConfig::default())
  }
}

impl Tracker {
  pub fn new(config: TrackerConfig) -> Self {
    Self {
      config,
      tracks: Vec::new(),
      next_id: 1,
    }
  }

  pub fn config(&self) -> &TrackerConfig {
    &self.config
  }

  /// 全部存活轨迹（含尚不可见的），按创建顺序
  pub fn tracks(&self) -> &[Track] {
    &self.tracks
  }

  /// 当前可见轨迹
  pub fn visible(&self) -> impl Iterator<Item = &Track> {
    let min_age = self.config.min_age_to_draw;
    self.tracks.iter().filter(move |track| track.age >= min_age)
  }

  /// 已分配的轨迹总数
  pub fn tracks_created(&self) -> u64 {
    self.next_id - 1
  }

  /// 处理一帧检测，返回可见轨迹的快照
  pub fn update(&mut self, detections: &[Detection]) -> Vec<Track> {
    let config = &self.config;
    let candidates: Vec<&Detection> = detections
      .iter()
      .filter(|det| config.is_trackable(det.class_id) && det.confidence >= config.keep_conf)
      .collect();

    let mut detection_used = vec![false; candidates.len()];

    for track in self.tracks.iter_mut() {
      let min_conf = if track.age > 0 {
        config.keep_conf
      } else {
        config.enter_conf
      };

      let mut best: Option<(usize, f32)> = None;
      for (idx, det) in candidates.iter().enumerate() {
        if detection_used[idx] || det.class_id != track.class_id || det.confidence < min_conf {
          continue;
        }
        let iou = track.raw_box.iou(&det.bbox);
        if iou <= config.match_iou {
          continue;
        }
        if best.is_none_or(|(_, best_iou)| iou > best_iou) {
          best = Some((idx, iou));
        }
      }

      match best {
        Some((idx, _)) => {
          detection_used[idx] = true;
          track.correct(candidates[idx], config.alpha);
        }
        None => track.mark_missed(),
      }
    }

    for (idx, det) in candidates.iter().enumerate() {
      if detection_used[idx] || det.confidence < config.enter_conf {
        continue;
      }
      let track = Track::spawn(self.next_id, det);
      debug!(
        "新建轨迹 #{} (类别 {}, 置信度 {:.2})",
        track.id, track.class_id, track.confidence
      );
      self.next_id += 1;
      self.tracks.push(track);
    }

    let grace_lost = config.grace_lost;
    self.tracks.retain(|track| {
      let alive = track.frames_since_last_match <= grace_lost;
      if !alive {
        debug!("移除轨迹 #{}，已丢失 {} 帧", track.id, track.frames_since_last_match);
      }
      alive
    });

    self.visible().cloned().collect()
  }
}
