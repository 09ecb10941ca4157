// 该文件是 Xunying （巡鹰） 项目的一部分。
// src/bin/stream_detect.rs - 连续检测程序
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

use std::{sync::Arc, sync::mpsc, time::Duration};

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};
use url::Url;

use xunying::{
  FromUrl,
  args::PipelineArgs,
  model::ReplayModel,
  output::OutputWrapper,
  source::GStreamerSourceBuilder,
  task::{StopResult, StreamOutcome, StreamTask, Task},
  tracker::NullTracker,
};

/// 巡鹰连续检测
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 帧来源，例如 gst://camera/dev/video0?width=640&height=480
  #[arg(long, value_name = "SOURCE")]
  pub source: Url,

  /// 推理输出来源，例如 replay:///data/heads
  #[arg(long, value_name = "MODEL")]
  pub model: Url,

  /// 结果输出，例如 log://detections 或 folder:///var/lib/xunying
  #[arg(long, value_name = "OUTPUT", default_value = "log://detections")]
  pub output: Url,

  /// 最大处理帧数，0 表示无限制
  #[arg(long, value_name = "COUNT", default_value_t = 0)]
  pub frame_number: u64,

  /// 停止时等待当前帧完成的时间（毫秒）
  #[arg(long, value_name = "MS", default_value_t = 500)]
  pub stop_grace_ms: u64,

  #[command(flatten)]
  pub pipeline: PipelineArgs,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();
  let config = args.pipeline.load_config()?;

  info!("帧来源: {}", args.source);
  info!("推理输出: {}", args.model);
  info!("结果输出: {}", args.output);
  info!("解码策略: {}", config.decode.policy);

  let source = GStreamerSourceBuilder::from_url(&args.source)?
    .with_channel(config.channel)
    .build()?;
  let model = ReplayModel::from_url(&args.model)?;
  let output = OutputWrapper::from_url(&args.output)?;

  let (tx, rx) = mpsc::channel();
  ctrlc::set_handler(move || {
    info!("收到中断信号，准备退出...");
    let _ = tx.send(());
  })
  .expect("Error setting Ctrl-C handler");

  let frame_number = (args.frame_number > 0).then_some(args.frame_number);
  let task = StreamTask::new(config).with_frame_number(frame_number);
  let mut handle = task.run_task(Arc::new(source), model, NullTracker, output)?;

  while !handle.is_finished() {
    if rx.recv_timeout(Duration::from_millis(200)).is_ok() {
      break;
    }
  }

  let grace = Duration::from_millis(args.stop_grace_ms);
  let outcome = loop {
    match handle.stop(grace) {
      StopResult::Exited(outcome) => break outcome?,
      StopResult::TimedOut => warn!("当前帧尚未完成，继续等待..."),
    }
  };

  let status = handle.status();
  info!(
    "共处理 {} 帧，运行 {:.2?}",
    status.health.total_frames, status.health.runtime
  );

  match outcome {
    StreamOutcome::Stopped => Ok(()),
    StreamOutcome::Exhausted => {
      anyhow::bail!("连续取帧失败次数耗尽，需要重新启动数据流")
    }
  }
}
