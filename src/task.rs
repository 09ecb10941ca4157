// 该文件是 Xunying （巡鹰） 项目的一部分。
// src/task.rs - 任务编排
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

use std::fmt::Display;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  config::{DecodeConfig, PipelineConfig},
  decode::DetectionDecodePipeline,
  detection::DetectionResultSet,
  model::Model,
  output::{FrameInfo, Render},
  source::{BufferSource, CheckedOut},
  tracker::Tracker,
};

mod stream;
pub use self::stream::{
  DEFAULT_STOP_GRACE, PipelineStatus, StopResult, StreamHandle, StreamOutcome, StreamTask,
};

pub trait Task<S, M, T, O>: Sized {
  type Output;
  type Error;
  fn run_task(self, source: S, model: M, tracker: T, output: O) -> Result<Self::Output, Self::Error>;
}

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Error, Debug)]
pub enum TaskError {
  #[error("绑定通道失败: {0}")]
  Bind(#[source] BoxError),
  #[error("启动数据流失败: {0}")]
  StartFlow(#[source] BoxError),
  #[error("无法创建工作线程: {0}")]
  WorkerSpawn(#[from] std::io::Error),
  #[error("工作线程异常退出")]
  WorkerPanicked,
  #[error("工作线程已被回收")]
  AlreadyJoined,
}

/// 单帧处理的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
  /// 缓冲区为空或尺寸无效
  Invalid,
  /// 推理失败，按无检测处理
  InferenceFailed,
  Processed { detections: usize },
}

/// 推理 → 解码 → 跟踪 → 归一化 → 渲染
///
/// 持有本会话的解码流水线和逐帧覆盖的结果集。
pub(crate) struct FrameProcessor {
  pipeline: DetectionDecodePipeline,
  detections: DetectionResultSet,
  render_empty: bool,
}

impl FrameProcessor {
  pub(crate) fn new(config: DecodeConfig, render_empty: bool) -> Self {
    let detections = DetectionResultSet::new(config.policy.confidence_scale());
    Self {
      pipeline: DetectionDecodePipeline::new(config),
      detections,
      render_empty,
    }
  }

  pub(crate) fn detections(&self) -> &DetectionResultSet {
    &self.detections
  }

  pub(crate) fn process<S, M, T, O>(
    &mut self,
    index: u64,
    checked: &CheckedOut<'_, S>,
    model: &M,
    tracker: &mut T,
    output: &O,
  ) -> FrameOutcome
  where
    S: BufferSource,
    M: Model,
    M::Error: Display,
    T: Tracker,
    T::Error: Display,
    O: Render,
    O::Error: Display,
  {
    let scale = self.pipeline.policy().confidence_scale();
    self.detections.reset(scale);

    let Some((data, width, height)) = checked.frame() else {
      warn!("第 {} 帧缓冲区为空或尺寸无效，跳过", index);
      return FrameOutcome::Invalid;
    };

    let now = std::time::Instant::now();
    let outcome = match model.infer(data, width, height) {
      Ok(inference) => {
        let elapsed = now.elapsed();
        match self
          .pipeline
          .decode(&inference.tensors(), width, height, &mut self.detections)
        {
          Ok(stats) => debug!("第 {} 帧推理耗时 {:.2?}, 解码统计: {:?}", index, elapsed, stats),
          Err(e) => error!("第 {} 帧解码失败，丢弃结果: {}", index, e),
        }
        FrameOutcome::Processed {
          detections: self.detections.len(),
        }
      }
      Err(e) => {
        warn!("第 {} 帧推理失败，按无检测处理: {}", index, e);
        FrameOutcome::InferenceFailed
      }
    };

    if self.detections.is_empty() && !self.render_empty {
      return outcome;
    }

    if !self.detections.is_empty() {
      if let Err(e) = tracker.update(&mut self.detections) {
        warn!("第 {} 帧跟踪器更新失败: {}", index, e);
      }
      // 结果已映射到原始帧像素，按帧尺寸归一化等价于模型空间按模型尺寸归一化
      self.detections.normalize(width, height);
    }

    let frame = FrameInfo {
      index,
      width,
      height,
    };
    if let Err(e) = output.render_result(&frame, &self.detections) {
      warn!("第 {} 帧渲染失败: {}", index, e);
    }
    outcome
  }
}

/// 取一帧、处理、归还，返回该帧的检测结果
#[derive(Debug, Default, Clone)]
pub struct OneShotTask {
  config: PipelineConfig,
}

impl OneShotTask {
  pub fn new(config: PipelineConfig) -> Self {
    Self { config }
  }
}

impl<'a, S, M, T, O> Task<&'a S, &'a M, &'a mut T, &'a O> for OneShotTask
where
  S: BufferSource,
  M: Model,
  M::Error: Display,
  T: Tracker,
  T::Error: Display,
  O: Render,
  O::Error: Display,
{
  type Output = DetectionResultSet;
  type Error = anyhow::Error;

  fn run_task(
    self,
    source: &'a S,
    model: &'a M,
    tracker: &'a mut T,
    output: &'a O,
  ) -> Result<Self::Output, Self::Error> {
    info!("开始任务...");
    let channel = self.config.channel;
    source.start_flow(&channel)?;

    let buffer = source.acquire(&channel, self.config.recovery.acquisition_timeout());
    let buffer = match buffer {
      Ok(buffer) => buffer,
      Err(e) => {
        if let Err(e) = source.stop_flow(&channel) {
          warn!("停止数据流失败: {}", e);
        }
        return Err(anyhow::anyhow!("没有输入帧: {}", e));
      }
    };
    let checked = CheckedOut::new(source, buffer);
    info!("输入帧获取成功，开始推理...");

    let mut processor = FrameProcessor::new(self.config.decode, true);
    let outcome = processor.process(1, &checked, model, tracker, output);
    checked.release()?;
    if let Err(e) = source.stop_flow(&channel) {
      warn!("停止数据流失败: {}", e);
    }

    match outcome {
      FrameOutcome::Invalid => anyhow::bail!("输入帧无效"),
      FrameOutcome::InferenceFailed => anyhow::bail!("推理失败"),
      FrameOutcome::Processed { detections } => {
        info!("任务完成，检测到 {} 个目标", detections);
        Ok(processor.detections().clone())
      }
    }
  }
}
