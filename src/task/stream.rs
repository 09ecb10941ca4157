// 该文件是 Xunying （巡鹰） 项目的一部分。
// src/task/stream.rs - 连续检测任务
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

//! 连续检测：单工作线程的取帧/推理/输出循环。
//!
//! 停止是协作式的。停止标志在每轮循环开始时检查，
//! 取帧成功后、处理之前再检查一次，迟到的缓冲区直接归还而不处理。
//! 帧一旦进入推理就会处理完毕。

use std::{
  fmt::Display,
  sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicBool, Ordering},
  },
  thread::{self, JoinHandle},
  time::{Duration, Instant},
};

use tracing::{error, info, warn};

use super::{FrameOutcome, FrameProcessor, Task, TaskError};
use crate::{
  config::PipelineConfig,
  detection::DetectionResultSet,
  model::Model,
  output::Render,
  recovery::{AcquisitionRecovery, HealthSnapshot, RecoveryAction, RecoveryState},
  source::{BufferSource, PipelineChannel},
  tracker::Tracker,
};

const WORKER_NAME: &str = "xunying-stream";
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(10);
pub const DEFAULT_STOP_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
  /// 收到停止请求或达到帧数上限
  Stopped,
  /// 连续取帧失败超过上限，需要外部重新启动
  Exhausted,
}

/// 供其他线程读取的状态快照
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineStatus {
  pub health: HealthSnapshot,
  pub state: RecoveryState,
  pub frame_index: u64,
  pub last_frame: Option<FrameOutcome>,
  pub detections: DetectionResultSet,
  pub outcome: Option<StreamOutcome>,
}

impl PipelineStatus {
  fn new(config: &PipelineConfig) -> Self {
    Self {
      health: HealthSnapshot::default(),
      state: RecoveryState::Normal,
      frame_index: 0,
      last_frame: None,
      detections: DetectionResultSet::new(config.decode.policy.confidence_scale()),
      outcome: None,
    }
  }
}

pub struct StreamTask {
  config: PipelineConfig,
  stop: Arc<AtomicBool>,
  status: Arc<Mutex<PipelineStatus>>,
  frame_number: Option<u64>,
}

impl StreamTask {
  pub fn new(config: PipelineConfig) -> Self {
    let status = PipelineStatus::new(&config);
    Self {
      config,
      stop: Arc::new(AtomicBool::new(false)),
      status: Arc::new(Mutex::new(status)),
      frame_number: None,
    }
  }

  /// 处理指定数量的帧后停止
  pub fn with_frame_number(mut self, frame_number: Option<u64>) -> Self {
    self.frame_number = frame_number;
    self
  }

  pub fn stop_flag(&self) -> Arc<AtomicBool> {
    self.stop.clone()
  }

  pub fn status(&self) -> PipelineStatus {
    read_status(&self.status)
  }

  fn stop_requested(&self) -> bool {
    self.stop.load(Ordering::SeqCst)
  }

  /// 在当前线程运行采集循环直到停止或耗尽
  ///
  /// 开始时绑定通道并启动数据流，退出时停止数据流。
  pub fn run<S, M, T, O>(
    &self,
    source: &S,
    model: &M,
    tracker: &mut T,
    output: &O,
  ) -> Result<StreamOutcome, TaskError>
  where
    S: BufferSource,
    M: Model,
    M::Error: Display,
    T: Tracker,
    T::Error: Display,
    O: Render,
    O::Error: Display,
  {
    let channel = self.config.channel;
    info!("开始连续检测任务: {}", channel);
    source
      .bind(&channel)
      .map_err(|e| TaskError::Bind(Box::new(e)))?;
    source
      .start_flow(&channel)
      .map_err(|e| TaskError::StartFlow(Box::new(e)))?;

    let outcome = self.run_loop(source, model, tracker, output);

    if let Err(e) = source.stop_flow(&channel) {
      warn!("停止数据流失败: {}", e);
    }
    if let Ok(mut status) = self.status.lock() {
      status.outcome = Some(outcome);
    }
    info!("任务结束: {:?}", outcome);
    Ok(outcome)
  }

  fn run_loop<S, M, T, O>(&self, source: &S, model: &M, tracker: &mut T, output: &O) -> StreamOutcome
  where
    S: BufferSource,
    M: Model,
    M::Error: Display,
    T: Tracker,
    T::Error: Display,
    O: Render,
    O::Error: Display,
  {
    let mut recovery = AcquisitionRecovery::new(self.config.recovery.clone(), self.config.channel);
    let mut processor = FrameProcessor::new(self.config.decode.clone(), false);
    let mut frame_index: u64 = 0;

    loop {
      if self.stop_requested() {
        info!("收到停止请求，退出任务循环");
        return StreamOutcome::Stopped;
      }

      let checked = match recovery.checkout(source) {
        Ok(checked) => checked,
        Err(e) => {
          if self.stop_requested() {
            info!("停止过程中取帧失败，退出任务循环: {}", e);
            return StreamOutcome::Stopped;
          }
          let action = recovery.on_acquire_failure(source, &e);
          self.publish(&recovery, frame_index, None, None);
          if action == RecoveryAction::Terminate {
            error!("采集失败次数耗尽，任务终止");
            return StreamOutcome::Exhausted;
          }
          continue;
        }
      };

      if self.stop_requested() {
        info!("停止请求到达，归还迟到的缓冲区");
        if let Err(e) = checked.release() {
          warn!("归还缓冲区失败: {}", e);
        }
        self.publish(&recovery, frame_index, None, None);
        return StreamOutcome::Stopped;
      }

      recovery.record_acquired();
      frame_index += 1;
      let now = Instant::now();
      let outcome = processor.process(frame_index, &checked, model, tracker, output);
      if let Err(e) = checked.release() {
        warn!("归还缓冲区失败: {}", e);
      }
      info!("第 {} 帧处理完成 {:?}，耗时: {:.2?}", frame_index, outcome, now.elapsed());
      self.publish(&recovery, frame_index, Some(outcome), Some(processor.detections()));

      if self.frame_number.is_some_and(|n| frame_index >= n) {
        info!("达到指定帧数 {}, 退出任务循环", frame_index);
        return StreamOutcome::Stopped;
      }
    }
  }

  fn publish(
    &self,
    recovery: &AcquisitionRecovery,
    frame_index: u64,
    last_frame: Option<FrameOutcome>,
    detections: Option<&DetectionResultSet>,
  ) {
    if let Ok(mut status) = self.status.lock() {
      status.health = recovery.health().snapshot();
      status.state = recovery.state();
      status.frame_index = frame_index;
      if last_frame.is_some() {
        status.last_frame = last_frame;
      }
      if let Some(detections) = detections {
        status.detections.clone_from(detections);
      }
    }
  }

  /// 在独立工作线程中运行
  pub fn spawn<S, M, T, O>(
    self,
    source: Arc<S>,
    model: M,
    mut tracker: T,
    output: O,
  ) -> Result<StreamHandle<S>, TaskError>
  where
    S: BufferSource + Send + Sync + 'static,
    M: Model + Send + 'static,
    M::Error: Display,
    T: Tracker + Send + 'static,
    T::Error: Display,
    O: Render + Send + 'static,
    O::Error: Display,
  {
    let channel = self.config.channel;
    let stop = self.stop.clone();
    let status = self.status.clone();
    let worker_source = source.clone();
    let worker = thread::Builder::new()
      .name(WORKER_NAME.to_string())
      .spawn(move || self.run(worker_source.as_ref(), &model, &mut tracker, &output))?;

    Ok(StreamHandle {
      source,
      channel,
      stop,
      status,
      worker: Some(worker),
    })
  }
}

impl<S, M, T, O> Task<Arc<S>, M, T, O> for StreamTask
where
  S: BufferSource + Send + Sync + 'static,
  M: Model + Send + 'static,
  M::Error: Display,
  T: Tracker + Send + 'static,
  T::Error: Display,
  O: Render + Send + 'static,
  O::Error: Display,
{
  type Output = StreamHandle<S>;
  type Error = TaskError;

  fn run_task(self, source: Arc<S>, model: M, tracker: T, output: O) -> Result<Self::Output, Self::Error> {
    self.spawn(source, model, tracker, output)
  }
}

#[derive(Debug)]
pub enum StopResult {
  Exited(Result<StreamOutcome, TaskError>),
  /// 工作线程仍在处理帧，可以再次等待
  TimedOut,
}

/// 运行中的连续任务
pub struct StreamHandle<S: BufferSource> {
  source: Arc<S>,
  channel: PipelineChannel,
  stop: Arc<AtomicBool>,
  status: Arc<Mutex<PipelineStatus>>,
  worker: Option<JoinHandle<Result<StreamOutcome, TaskError>>>,
}

impl<S: BufferSource> StreamHandle<S> {
  pub fn status(&self) -> PipelineStatus {
    read_status(&self.status)
  }

  pub fn is_finished(&self) -> bool {
    self.worker.as_ref().is_none_or(JoinHandle::is_finished)
  }

  /// 先停止数据流，再设置停止标志，最多等待 `grace`
  pub fn stop(&mut self, grace: Duration) -> StopResult {
    if let Err(e) = self.source.stop_flow(&self.channel) {
      warn!("停止数据流失败: {}", e);
    }
    self.stop.store(true, Ordering::SeqCst);
    self.wait(grace)
  }

  /// 等待工作线程退出，超时不强制结束
  pub fn wait(&mut self, grace: Duration) -> StopResult {
    let deadline = Instant::now() + grace;
    while !self.is_finished() {
      let now = Instant::now();
      if now >= deadline {
        warn!("工作线程未在 {:.2?} 内退出", grace);
        return StopResult::TimedOut;
      }
      thread::sleep(STOP_POLL_INTERVAL.min(deadline - now));
    }
    StopResult::Exited(self.join())
  }

  /// 阻塞直到工作线程退出
  pub fn join(&mut self) -> Result<StreamOutcome, TaskError> {
    let worker = self.worker.take().ok_or(TaskError::AlreadyJoined)?;
    worker.join().map_err(|_| TaskError::WorkerPanicked)?
  }
}

impl<S: BufferSource> Drop for StreamHandle<S> {
  fn drop(&mut self) {
    self.stop.store(true, Ordering::SeqCst);
  }
}

fn read_status(status: &Mutex<PipelineStatus>) -> PipelineStatus {
  status.lock().unwrap_or_else(PoisonError::into_inner).clone()
}
