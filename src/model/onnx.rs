// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/onnx.rs - ONNX 模型推理
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};
use tract_onnx::prelude::{tract_ndarray::Array4, *};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::{Model, RawOutput},
  preprocess::Blob,
};

const ONNX_DEFAULT_INPUT_W: u32 = 640;
const ONNX_DEFAULT_INPUT_H: u32 = 640;
const ONNX_INPUT_CHANNELS: usize = 3;

type OnnxPlan = RunnableModel<TypedFact, Box<dyn TypedOp>, TypedModel>;

#[derive(Error, Debug)]
pub enum OnnxModelError {
  #[error("模型文件不存在: {0}")]
  NotFound(String),
  #[error("模型加载错误: {0}")]
  Load(String),
  #[error("输入形状不匹配: 期望 {expected:?}, 实际 {actual:?}")]
  InputShape {
    expected: [usize; 4],
    actual: [usize; 4],
  },
  #[error("推理错误: {0}")]
  Inference(String),
  #[error("模型输出维度异常: {0:?}")]
  OutputShape(Vec<usize>),
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
}

pub struct OnnxModelBuilder {
  model_path: PathBuf,
  input_width: u32,
  input_height: u32,
}

impl FromUrlWithScheme for OnnxModelBuilder {
  const SCHEME: &'static str = "onnx";
}

impl FromUrl for OnnxModelBuilder {
  type Error = OnnxModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(OnnxModelError::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    Ok(Self::new(crate::decoded_path(url)))
  }
}

impl OnnxModelBuilder {
  pub fn new(model_path: impl AsRef<Path>) -> Self {
    Self {
      model_path: model_path.as_ref().to_path_buf(),
      input_width: ONNX_DEFAULT_INPUT_W,
      input_height: ONNX_DEFAULT_INPUT_H,
    }
  }

  pub fn input_size(mut self, width: u32, height: u32) -> Self {
    self.input_width = width;
    self.input_height = height;
    self
  }

  pub fn build(self) -> Result<OnnxModel, OnnxModelError> {
    if !self.model_path.is_file() {
      return Err(OnnxModelError::NotFound(
        self.model_path.display().to_string(),
      ));
    }

    info!("加载模型文件: {}", self.model_path.display());
    let (w, h) = (self.input_width as usize, self.input_height as usize);
    let plan = tract_onnx::onnx()
      .model_for_path(&self.model_path)
      .and_then(|model| {
        model.with_input_fact(
          0,
          InferenceFact::dt_shape(f32::datum_type(), tvec!(1, ONNX_INPUT_CHANNELS, h, w)),
        )
      })
      .and_then(|model| model.into_optimized())
      .and_then(|model| model.into_runnable())
      .map_err(|e| OnnxModelError::Load(e.to_string()))?;

    info!("模型加载完成，输入尺寸: {}x{}", w, h);

    Ok(OnnxModel {
      plan,
      input_width: self.input_width,
      input_height: self.input_height,
    })
  }
}

pub struct OnnxModel {
  plan: OnnxPlan,
  input_width: u32,
  input_height: u32,
}

impl Model for OnnxModel {
  type Error = OnnxModelError;

  fn input_size(&self) -> (u32, u32) {
    (self.input_width, self.input_height)
  }

  fn infer(&self, input: &Blob) -> Result<RawOutput, Self::Error> {
    if input.is_empty() {
      return Ok(RawOutput::empty());
    }

    let expected = [
      1,
      ONNX_INPUT_CHANNELS,
      self.input_height as usize,
      self.input_width as usize,
    ];
    if input.shape() != expected {
      return Err(OnnxModelError::InputShape {
        expected,
        actual: input.shape(),
      });
    }

    debug!("设置模型输入");
    let array = Array4::from_shape_vec(
      (expected[0], expected[1], expected[2], expected[3]),
      input.as_slice().to_vec(),
    )
    .map_err(|e| OnnxModelError::Inference(e.to_string()))?;
    let tensor: Tensor = array.into();

    debug!("执行模型推理");
    let outputs = self
      .plan
      .run(tvec!(tensor.into_tvalue()))
      .map_err(|e| OnnxModelError::Inference(e.to_string()))?;

    let output = outputs
      .first()
      .ok_or_else(|| OnnxModelError::Inference("模型未返回输出".to_string()))?
      .to_array_view::<f32>()
      .map_err(|e| OnnxModelError::Inference(e.to_string()))?;

    let dims = output.shape().to_vec();
    let (rows, cols) = match dims.as_slice() {
      [1, rows, cols] => (*rows, *cols),
      [rows, cols] => (*rows, *cols),
      _ => return Err(OnnxModelError::OutputShape(dims)),
    };
    debug!("模型输出形状: {}x{}", rows, cols);

    let data: Vec<f32> = output.iter().copied().collect();
    RawOutput::new(data, rows, cols).ok_or(OnnxModelError::OutputShape(dims))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn missing_model_file_is_reported() {
    let result = OnnxModelBuilder::new("/nonexistent/model.onnx").build();
    assert!(matches!(result, Err(OnnxModelError::NotFound(_))));
  }

  #[test]
  fn url_scheme_must_be_onnx() {
    let url = Url::parse("rknn:///tmp/model.rknn").unwrap();
    assert!(OnnxModelBuilder::from_url(&url).is_err());

    let url = Url::parse("onnx:///tmp/yolov8n.onnx").unwrap();
    let builder = OnnxModelBuilder::from_url(&url).unwrap();
    assert_eq!(builder.model_path, PathBuf::from("/tmp/yolov8n.onnx"));
  }
}
