// 该文件是 Xunying （巡鹰） 项目的一部分。
// src/bin/decode_replay.rs - 回放解码程序
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

use anyhow::Result;
use clap::Parser;
use tracing::info;
use url::Url;

use xunying::{
  FromUrl,
  args::PipelineArgs,
  model::ReplayModel,
  output::OutputWrapper,
  source::scripted::{ScriptStep, ScriptedSource},
  task::{OneShotTask, Task},
  tracker::NullTracker,
};

/// 对录制的检测头输出做一次解码，并以 JSON 打印结果
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 录制数据目录，例如 replay:///data/heads
  #[arg(long, value_name = "MODEL")]
  pub model: Url,

  /// 原始帧宽度
  #[arg(long, value_name = "PIXELS", default_value_t = 640)]
  pub width: u32,

  /// 原始帧高度
  #[arg(long, value_name = "PIXELS", default_value_t = 640)]
  pub height: u32,

  /// 结果输出
  #[arg(long, value_name = "OUTPUT", default_value = "log://replay")]
  pub output: Url,

  #[command(flatten)]
  pub pipeline: PipelineArgs,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();
  let config = args.pipeline.load_config()?;

  info!("回放数据: {}", args.model);
  info!("原始帧尺寸: {}x{}", args.width, args.height);
  info!("解码策略: {}", config.decode.policy);

  let model = ReplayModel::from_url(&args.model)?;
  let output = OutputWrapper::from_url(&args.output)?;
  let source = ScriptedSource::new([ScriptStep::filled(args.width, args.height, 0)]);

  let result = OneShotTask::new(config).run_task(&source, &model, &mut NullTracker, &output)?;
  println!("{}", serde_json::to_string_pretty(&result)?);

  Ok(())
}
