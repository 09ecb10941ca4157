// 该文件是 Xunying （巡鹰） 项目的一部分。
// src/source/scripted.rs - 脚本驱动的缓冲源
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

//! 按预设脚本产出帧的缓冲源，用于回放与测试。
//!
//! 每次 `acquire` 消费一个 [`ScriptStep`]；脚本耗尽后等待 `timeout` 并返回超时。
//! 所有调用都会被记录，便于检查取帧/归还的配对关系。

use std::{
  collections::{HashMap, VecDeque},
  sync::{Mutex, MutexGuard, PoisonError},
  thread,
  time::Duration,
};

use thiserror::Error;
use tracing::trace;

use super::{BufferSource, FrameBuffer, PipelineChannel};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScriptedSourceError {
  #[error("取帧超时")]
  Timeout,
  #[error("取帧失败（脚本注入）")]
  Injected,
  #[error("上一个缓冲区尚未归还")]
  DoubleCheckout,
  #[error("归还了未知的缓冲区: {0}")]
  UnknownBuffer(u64),
  #[error("{0:?} 调用失败（脚本注入）")]
  CallFailed(SourceCall),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceCall {
  Acquire,
  Release,
  StartFlow,
  StopFlow,
  Unbind,
  Bind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptStep {
  Frame { data: Vec<u8>, width: u32, height: u32 },
  /// 取帧成功但缓冲区为空
  Empty,
  Timeout,
  Fail,
}

impl ScriptStep {
  pub fn frame(data: Vec<u8>, width: u32, height: u32) -> Self {
    ScriptStep::Frame {
      data,
      width,
      height,
    }
  }

  /// 按尺寸生成填充固定字节的 RGB 帧
  pub fn filled(width: u32, height: u32, value: u8) -> Self {
    let len = width as usize * height as usize * 3;
    Self::frame(vec![value; len], width, height)
  }
}

#[derive(Debug)]
pub struct ScriptedBuffer {
  id: u64,
  data: Option<Vec<u8>>,
  width: u32,
  height: u32,
}

impl ScriptedBuffer {
  pub fn id(&self) -> u64 {
    self.id
  }
}

impl FrameBuffer for ScriptedBuffer {
  fn data(&self) -> Option<&[u8]> {
    self.data.as_deref()
  }

  fn width(&self) -> u32 {
    self.width
  }

  fn height(&self) -> u32 {
    self.height
  }
}

#[derive(Default)]
struct ScriptState {
  steps: VecDeque<ScriptStep>,
  calls: Vec<SourceCall>,
  call_counts: HashMap<SourceCall, usize>,
  fail_after: HashMap<SourceCall, usize>,
  outstanding: Option<u64>,
  next_id: u64,
  acquired: usize,
  released: usize,
  violations: usize,
}

impl ScriptState {
  fn record(&mut self, call: SourceCall) -> Result<(), ScriptedSourceError> {
    self.calls.push(call);
    let count = self.call_counts.entry(call).or_insert(0);
    *count += 1;
    match self.fail_after.get(&call) {
      Some(&limit) if *count > limit => Err(ScriptedSourceError::CallFailed(call)),
      _ => Ok(()),
    }
  }
}

type AcquireHook = Box<dyn Fn(usize) + Send + Sync>;

pub struct ScriptedSource {
  state: Mutex<ScriptState>,
  on_acquire: Option<AcquireHook>,
}

impl ScriptedSource {
  pub fn new(steps: impl IntoIterator<Item = ScriptStep>) -> Self {
    Self {
      state: Mutex::new(ScriptState {
        steps: steps.into_iter().collect(),
        ..Default::default()
      }),
      on_acquire: None,
    }
  }

  /// 前 `successes` 次 `call` 调用成功，之后全部失败
  pub fn fail_after(self, call: SourceCall, successes: usize) -> Self {
    self.lock().fail_after.insert(call, successes);
    self
  }

  /// 每次取帧前调用，参数为本次取帧的序号（从 1 开始）
  pub fn with_acquire_hook(mut self, hook: impl Fn(usize) + Send + Sync + 'static) -> Self {
    self.on_acquire = Some(Box::new(hook));
    self
  }

  pub fn push(&self, step: ScriptStep) {
    self.lock().steps.push_back(step);
  }

  pub fn calls(&self) -> Vec<SourceCall> {
    self.lock().calls.clone()
  }

  pub fn call_count(&self, call: SourceCall) -> usize {
    self.lock().call_counts.get(&call).copied().unwrap_or(0)
  }

  /// 成功取出的缓冲区数量
  pub fn acquired(&self) -> usize {
    self.lock().acquired
  }

  pub fn released(&self) -> usize {
    self.lock().released
  }

  pub fn outstanding(&self) -> bool {
    self.lock().outstanding.is_some()
  }

  /// 违反单消费者约定的次数
  pub fn violations(&self) -> usize {
    self.lock().violations
  }

  fn lock(&self) -> MutexGuard<'_, ScriptState> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

impl BufferSource for ScriptedSource {
  type Buffer = ScriptedBuffer;
  type Error = ScriptedSourceError;

  fn acquire(&self, _channel: &PipelineChannel, timeout: Duration) -> Result<Self::Buffer, Self::Error> {
    let attempt = {
      let mut state = self.lock();
      state.record(SourceCall::Acquire)?;
      state.call_counts[&SourceCall::Acquire]
    };
    if let Some(hook) = &self.on_acquire {
      hook(attempt);
    }

    let step = self.lock().steps.pop_front();
    let (data, width, height) = match step {
      Some(ScriptStep::Frame {
        data,
        width,
        height,
      }) => (Some(data), width, height),
      Some(ScriptStep::Empty) => (None, 0, 0),
      Some(ScriptStep::Timeout) => return Err(ScriptedSourceError::Timeout),
      Some(ScriptStep::Fail) => return Err(ScriptedSourceError::Injected),
      None => {
        thread::sleep(timeout);
        return Err(ScriptedSourceError::Timeout);
      }
    };

    let mut state = self.lock();
    if state.outstanding.is_some() {
      state.violations += 1;
      return Err(ScriptedSourceError::DoubleCheckout);
    }
    let id = state.next_id;
    state.next_id += 1;
    state.outstanding = Some(id);
    state.acquired += 1;
    trace!("脚本源取出缓冲区 {}", id);
    Ok(ScriptedBuffer {
      id,
      data,
      width,
      height,
    })
  }

  fn release(&self, buffer: Self::Buffer) -> Result<(), Self::Error> {
    let mut state = self.lock();
    state.record(SourceCall::Release)?;
    if state.outstanding != Some(buffer.id) {
      state.violations += 1;
      return Err(ScriptedSourceError::UnknownBuffer(buffer.id));
    }
    state.outstanding = None;
    state.released += 1;
    Ok(())
  }

  fn start_flow(&self, _channel: &PipelineChannel) -> Result<(), Self::Error> {
    self.lock().record(SourceCall::StartFlow)
  }

  fn stop_flow(&self, _channel: &PipelineChannel) -> Result<(), Self::Error> {
    self.lock().record(SourceCall::StopFlow)
  }

  fn unbind(&self, _channel: &PipelineChannel) -> Result<(), Self::Error> {
    self.lock().record(SourceCall::Unbind)
  }

  fn bind(&self, _channel: &PipelineChannel) -> Result<(), Self::Error> {
    self.lock().record(SourceCall::Bind)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn steps_are_consumed_in_order() {
    let source = ScriptedSource::new([
      ScriptStep::Timeout,
      ScriptStep::filled(2, 2, 7),
      ScriptStep::Fail,
    ]);
    let channel = PipelineChannel::default();

    assert_eq!(
      source.acquire(&channel, Duration::ZERO).unwrap_err(),
      ScriptedSourceError::Timeout
    );
    let buffer = source.acquire(&channel, Duration::ZERO).unwrap();
    assert_eq!(buffer.data().map(<[u8]>::len), Some(12));
    source.release(buffer).unwrap();
    assert_eq!(
      source.acquire(&channel, Duration::ZERO).unwrap_err(),
      ScriptedSourceError::Injected
    );
    assert_eq!(
      source.acquire(&channel, Duration::ZERO).unwrap_err(),
      ScriptedSourceError::Timeout
    );
    assert_eq!(source.acquired(), 1);
    assert_eq!(source.released(), 1);
  }

  #[test]
  fn second_checkout_is_refused() {
    let source = ScriptedSource::new([ScriptStep::filled(1, 1, 0), ScriptStep::filled(1, 1, 0)]);
    let channel = PipelineChannel::default();
    let first = source.acquire(&channel, Duration::ZERO).unwrap();
    assert_eq!(
      source.acquire(&channel, Duration::ZERO).unwrap_err(),
      ScriptedSourceError::DoubleCheckout
    );
    assert_eq!(source.violations(), 1);
    source.release(first).unwrap();
    assert!(!source.outstanding());
  }

  #[test]
  fn injected_call_failures() {
    let source = ScriptedSource::new([]).fail_after(SourceCall::StartFlow, 1);
    let channel = PipelineChannel::default();
    assert!(source.start_flow(&channel).is_ok());
    assert_eq!(
      source.start_flow(&channel).unwrap_err(),
      ScriptedSourceError::CallFailed(SourceCall::StartFlow)
    );
    assert_eq!(source.call_count(SourceCall::StartFlow), 2);
  }
}
