// 该文件是 Xunying （巡鹰） 项目的一部分。
// src/recovery.rs - 采集故障恢复状态机
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

//! 帧采集故障恢复。
//!
//! 只有连续失败计数驱动状态转换：
//!
//! | 连续失败 `f`        | 状态           | 动作                                   |
//! |---------------------|----------------|----------------------------------------|
//! | `0`                 | Normal         | 正常取帧                               |
//! | `0 < f`，其余情况   | Retrying       | 短暂退避后重试                         |
//! | `f == R`            | SoftRecovery   | 停止数据流，等待，重启数据流           |
//! | `f == 3R`           | HardRecovery   | 停流，解绑，等待，重绑，等待，重启     |
//! | `f > S`             | Fatal          | 终止采集循环                           |
//!
//! 单调时钟只用于日志中的诊断数值。

use std::{
  thread,
  time::{Duration, Instant},
};

use tracing::{debug, error, info, warn};

use crate::{
  config::RecoveryConfig,
  source::{BufferSource, CheckedOut, PipelineChannel},
};

/// 一次采集会话内的健康计数，由编排器独占
#[derive(Debug, Clone)]
pub struct PipelineHealth {
  consecutive_failures: u32,
  total_frames: u64,
  last_success: Instant,
  start: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct HealthSnapshot {
  pub consecutive_failures: u32,
  /// 进入处理流程的成功取帧数，包括无效帧，不含停止时归还的迟到缓冲区
  pub total_frames: u64,
  pub since_last_success: Duration,
  pub runtime: Duration,
}

impl Default for PipelineHealth {
  fn default() -> Self {
    Self::new()
  }
}

impl PipelineHealth {
  pub fn new() -> Self {
    let now = Instant::now();
    Self {
      consecutive_failures: 0,
      total_frames: 0,
      last_success: now,
      start: now,
    }
  }

  pub fn consecutive_failures(&self) -> u32 {
    self.consecutive_failures
  }

  pub fn total_frames(&self) -> u64 {
    self.total_frames
  }

  pub fn record_success(&mut self) {
    self.consecutive_failures = 0;
    self.total_frames += 1;
    self.last_success = Instant::now();
  }

  /// 返回累加后的连续失败次数
  pub fn record_failure(&mut self) -> u32 {
    self.consecutive_failures = self.consecutive_failures.saturating_add(1);
    self.consecutive_failures
  }

  /// 硬恢复成功时清零，不计入帧数
  pub fn reset_streak(&mut self) {
    self.consecutive_failures = 0;
    self.last_success = Instant::now();
  }

  pub fn since_last_success(&self) -> Duration {
    self.last_success.elapsed()
  }

  pub fn runtime(&self) -> Duration {
    self.start.elapsed()
  }

  pub fn snapshot(&self) -> HealthSnapshot {
    HealthSnapshot {
      consecutive_failures: self.consecutive_failures,
      total_frames: self.total_frames,
      since_last_success: self.since_last_success(),
      runtime: self.runtime(),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecoveryState {
  #[default]
  Normal,
  Retrying,
  SoftRecovery,
  HardRecovery,
  Fatal,
}

impl RecoveryState {
  pub fn classify(failures: u32, config: &RecoveryConfig) -> Self {
    if failures == 0 {
      RecoveryState::Normal
    } else if failures > config.stop_threshold {
      RecoveryState::Fatal
    } else if failures == config.hard_recovery_threshold() {
      RecoveryState::HardRecovery
    } else if failures == config.restart_threshold {
      RecoveryState::SoftRecovery
    } else {
      RecoveryState::Retrying
    }
  }
}

/// 一次失败之后执行的动作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
  Backoff,
  SoftRestart { restarted: bool },
  HardRecovery { restarted: bool },
  Terminate,
}

pub struct AcquisitionRecovery {
  config: RecoveryConfig,
  channel: PipelineChannel,
  health: PipelineHealth,
}

impl AcquisitionRecovery {
  pub fn new(config: RecoveryConfig, channel: PipelineChannel) -> Self {
    Self {
      config,
      channel,
      health: PipelineHealth::new(),
    }
  }

  pub fn channel(&self) -> &PipelineChannel {
    &self.channel
  }

  pub fn health(&self) -> &PipelineHealth {
    &self.health
  }

  pub fn state(&self) -> RecoveryState {
    RecoveryState::classify(self.health.consecutive_failures, &self.config)
  }

  /// 带超时取帧；成功时清零连续失败计数
  pub fn acquire<'a, S: BufferSource>(
    &mut self,
    source: &'a S,
  ) -> Result<CheckedOut<'a, S>, S::Error> {
    let checked = self.checkout(source)?;
    self.record_acquired();
    Ok(checked)
  }

  /// 只取帧，不更新健康计数
  ///
  /// 调用方确认要处理该缓冲区后再调用 [`Self::record_acquired`]。
  pub fn checkout<'a, S: BufferSource>(
    &self,
    source: &'a S,
  ) -> Result<CheckedOut<'a, S>, S::Error> {
    let buffer = source.acquire(&self.channel, self.config.acquisition_timeout())?;
    Ok(CheckedOut::new(source, buffer))
  }

  /// 记录一次成功取帧
  pub fn record_acquired(&mut self) {
    if self.health.consecutive_failures > 0 {
      info!(
        "采集恢复: 连续失败 {} 次后取帧成功",
        self.health.consecutive_failures
      );
    }
    self.health.record_success();
  }

  /// 记录一次取帧失败并执行对应的恢复动作
  pub fn on_acquire_failure<S: BufferSource>(
    &mut self,
    source: &S,
    error: &S::Error,
  ) -> RecoveryAction {
    let failures = self.health.record_failure();
    let since_last_success = self.health.since_last_success().as_secs_f32();
    let runtime = self.health.runtime().as_secs_f32();

    match RecoveryState::classify(failures, &self.config) {
      RecoveryState::Fatal => {
        error!(
          failures,
          since_last_success, runtime, "连续取帧失败超过 {} 次，停止采集: {}", self.config.stop_threshold, error
        );
        RecoveryAction::Terminate
      }
      RecoveryState::HardRecovery => {
        warn!(
          failures,
          since_last_success, runtime, "连续取帧失败，执行硬恢复: {}", error
        );
        let restarted = self.hard_recover(source);
        RecoveryAction::HardRecovery { restarted }
      }
      RecoveryState::SoftRecovery => {
        warn!(
          failures,
          since_last_success, runtime, "连续取帧失败，重启数据流: {}", error
        );
        let restarted = self.soft_restart(source);
        RecoveryAction::SoftRestart { restarted }
      }
      RecoveryState::Retrying | RecoveryState::Normal => {
        debug!(
          failures,
          since_last_success, runtime, "取帧失败，稍后重试: {}", error
        );
        pause(self.config.retry_backoff());
        RecoveryAction::Backoff
      }
    }
  }

  /// 无论重启是否成功都继续重试
  fn soft_restart<S: BufferSource>(&mut self, source: &S) -> bool {
    if let Err(e) = source.stop_flow(&self.channel) {
      warn!("停止数据流失败: {}", e);
    }
    pause(self.config.soft_restart_pause());
    match source.start_flow(&self.channel) {
      Ok(()) => {
        info!("数据流已重启: {}", self.channel);
        true
      }
      Err(e) => {
        warn!("重启数据流失败: {}", e);
        false
      }
    }
  }

  fn hard_recover<S: BufferSource>(&mut self, source: &S) -> bool {
    if let Err(e) = source.stop_flow(&self.channel) {
      warn!("停止数据流失败: {}", e);
    }
    if let Err(e) = source.unbind(&self.channel) {
      warn!("解绑通道失败: {}", e);
    }
    pause(self.config.hard_unbind_pause());
    if let Err(e) = source.bind(&self.channel) {
      warn!("重新绑定通道失败: {}", e);
    }
    pause(self.config.hard_rebind_pause());
    match source.start_flow(&self.channel) {
      Ok(()) => {
        info!("硬恢复完成，清零失败计数: {}", self.channel);
        self.health.reset_streak();
        true
      }
      Err(e) => {
        error!("硬恢复后重启数据流失败: {}", e);
        false
      }
    }
  }
}

fn pause(duration: Duration) {
  if !duration.is_zero() {
    thread::sleep(duration);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::source::scripted::{ScriptStep, ScriptedSource, SourceCall};

  fn instant_config() -> RecoveryConfig {
    RecoveryConfig {
      acquisition_timeout_ms: 0,
      ..RecoveryConfig::default()
    }
    .without_pauses()
  }

  fn recovery() -> AcquisitionRecovery {
    AcquisitionRecovery::new(instant_config(), PipelineChannel::default())
  }

  fn fail(recovery: &mut AcquisitionRecovery, source: &ScriptedSource, times: usize) -> Vec<RecoveryAction> {
    (0..times)
      .map(|_| match recovery.acquire(source) {
        Ok(_) => panic!("预期取帧失败"),
        Err(e) => recovery.on_acquire_failure(source, &e),
      })
      .collect()
  }

  fn succeed(recovery: &mut AcquisitionRecovery, source: &ScriptedSource) {
    source.push(ScriptStep::filled(2, 2, 1));
    let checked = recovery.acquire(source).unwrap();
    checked.release().unwrap();
  }

  #[test]
  fn classify_boundaries() {
    let config = RecoveryConfig::default();
    assert_eq!(RecoveryState::classify(0, &config), RecoveryState::Normal);
    assert_eq!(RecoveryState::classify(3, &config), RecoveryState::Retrying);
    assert_eq!(RecoveryState::classify(4, &config), RecoveryState::SoftRecovery);
    assert_eq!(RecoveryState::classify(8, &config), RecoveryState::Retrying);
    assert_eq!(RecoveryState::classify(12, &config), RecoveryState::HardRecovery);
    assert_eq!(RecoveryState::classify(50, &config), RecoveryState::Retrying);
    assert_eq!(RecoveryState::classify(51, &config), RecoveryState::Fatal);
  }

  #[test]
  fn three_timeouts_then_success_triggers_nothing() {
    let source = ScriptedSource::new([ScriptStep::Timeout, ScriptStep::Timeout, ScriptStep::Timeout]);
    let mut recovery = recovery();

    let actions = fail(&mut recovery, &source, 3);
    assert!(actions.iter().all(|a| *a == RecoveryAction::Backoff));
    assert_eq!(recovery.health().consecutive_failures(), 3);

    succeed(&mut recovery, &source);
    assert_eq!(recovery.health().consecutive_failures(), 0);
    assert_eq!(recovery.health().total_frames(), 1);
    assert_eq!(recovery.state(), RecoveryState::Normal);
    assert_eq!(source.call_count(SourceCall::StopFlow), 0);
    assert_eq!(source.call_count(SourceCall::StartFlow), 0);
  }

  #[test]
  fn soft_restart_exactly_at_restart_threshold() {
    let source = ScriptedSource::new([]);
    let mut recovery = recovery();

    let actions = fail(&mut recovery, &source, 4);
    assert_eq!(&actions[..3], &[RecoveryAction::Backoff; 3]);
    assert_eq!(actions[3], RecoveryAction::SoftRestart { restarted: true });
    assert_eq!(
      source.calls().into_iter().filter(|c| *c != SourceCall::Acquire).collect::<Vec<_>>(),
      vec![SourceCall::StopFlow, SourceCall::StartFlow]
    );
    // 软恢复不清零
    assert_eq!(recovery.health().consecutive_failures(), 4);
  }

  #[test]
  fn soft_restart_failure_keeps_retrying() {
    let source = ScriptedSource::new([]).fail_after(SourceCall::StartFlow, 0);
    let mut recovery = recovery();

    let actions = fail(&mut recovery, &source, 5);
    assert_eq!(actions[3], RecoveryAction::SoftRestart { restarted: false });
    assert_eq!(actions[4], RecoveryAction::Backoff);
  }

  #[test]
  fn hard_recovery_exactly_at_three_times_threshold() {
    let source = ScriptedSource::new([]).fail_after(SourceCall::StartFlow, 0);
    let mut recovery = recovery();

    let actions = fail(&mut recovery, &source, 12);
    for (idx, action) in actions.iter().enumerate() {
      let expected = match idx + 1 {
        4 => RecoveryAction::SoftRestart { restarted: false },
        12 => RecoveryAction::HardRecovery { restarted: false },
        _ => RecoveryAction::Backoff,
      };
      assert_eq!(*action, expected, "第 {} 次失败", idx + 1);
    }
    assert_eq!(source.call_count(SourceCall::Unbind), 1);
    assert_eq!(source.call_count(SourceCall::Bind), 1);
    assert_eq!(recovery.health().consecutive_failures(), 12);

    let tail: Vec<_> = source
      .calls()
      .into_iter()
      .filter(|c| *c != SourceCall::Acquire)
      .skip(2)
      .collect();
    assert_eq!(
      tail,
      vec![
        SourceCall::StopFlow,
        SourceCall::Unbind,
        SourceCall::Bind,
        SourceCall::StartFlow
      ]
    );
  }

  #[test]
  fn terminates_exactly_after_stop_threshold() {
    let source = ScriptedSource::new([]).fail_after(SourceCall::StartFlow, 0);
    let mut recovery = recovery();

    let actions = fail(&mut recovery, &source, 50);
    assert!(!actions.contains(&RecoveryAction::Terminate));
    assert_eq!(
      actions.iter().filter(|a| matches!(a, RecoveryAction::SoftRestart { .. })).count(),
      1
    );
    assert_eq!(
      actions.iter().filter(|a| matches!(a, RecoveryAction::HardRecovery { .. })).count(),
      1
    );

    let actions = fail(&mut recovery, &source, 1);
    assert_eq!(actions, vec![RecoveryAction::Terminate]);
    assert_eq!(recovery.state(), RecoveryState::Fatal);
  }

  #[test]
  fn successful_hard_recovery_clears_streak() {
    let source = ScriptedSource::new([]);
    let mut recovery = recovery();

    let actions = fail(&mut recovery, &source, 12);
    assert_eq!(actions[11], RecoveryAction::HardRecovery { restarted: true });
    assert_eq!(recovery.health().consecutive_failures(), 0);
    assert_eq!(recovery.health().total_frames(), 0);

    let actions = fail(&mut recovery, &source, 4);
    assert_eq!(actions[3], RecoveryAction::SoftRestart { restarted: true });
  }

  #[test]
  fn success_in_between_resets_counter() {
    let source = ScriptedSource::new([]);
    let mut recovery = recovery();

    fail(&mut recovery, &source, 3);
    succeed(&mut recovery, &source);
    let actions = fail(&mut recovery, &source, 3);
    assert!(actions.iter().all(|a| *a == RecoveryAction::Backoff));

    succeed(&mut recovery, &source);
    fail(&mut recovery, &source, 11);
    succeed(&mut recovery, &source);
    let actions = fail(&mut recovery, &source, 12);
    assert_eq!(actions[3], RecoveryAction::SoftRestart { restarted: true });
    assert!(matches!(actions[11], RecoveryAction::HardRecovery { .. }));
    assert_eq!(recovery.health().total_frames(), 3);
  }
}
