// 该文件是 Xunying （巡鹰） 项目的一部分。
// src/output/directory_record.rs - 目录记录输出
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

//! 按日期分目录，把每帧检测结果追加为一行 JSON：
//! `<dir>/YYYY/MM/DD/detections-HH.jsonl`

use std::{
  fs::OpenOptions,
  io::Write,
  path::{Path, PathBuf},
  sync::{Mutex, PoisonError},
};

use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::{
  FromUrl, FromUrlWithScheme,
  detection::{ConfidenceScale, DetectionResult, DetectionResultSet},
  output::{FrameInfo, Render},
};

#[derive(Error, Debug)]
pub enum DirectoryRecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("序列化错误: {0}")]
  JsonError(#[from] serde_json::Error),
}

#[derive(Serialize)]
struct RecordLine<'a> {
  time: String,
  sequence: u64,
  frame: &'a FrameInfo,
  confidence_scale: ConfidenceScale,
  detections: &'a [DetectionResult],
}

pub struct DirectoryRecordOutput {
  directory: PathBuf,
  sequence: Mutex<u64>,
  always: bool,
}

impl FromUrlWithScheme for DirectoryRecordOutput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(DirectoryRecordOutputError::SchemeMismatch);
    }

    let always = uri.query_pairs().any(|(k, _)| k == "always");
    Ok(Self::new(uri.path(), always))
  }
}

impl DirectoryRecordOutput {
  pub fn new(directory: impl AsRef<Path>, always: bool) -> Self {
    Self {
      directory: directory.as_ref().to_path_buf(),
      sequence: Mutex::new(0),
      always,
    }
  }

  fn next_sequence(&self) -> u64 {
    let mut counter = self.sequence.lock().unwrap_or_else(PoisonError::into_inner);
    *counter += 1;
    *counter
  }

  fn record_path(&self, now: &DateTime<Utc>) -> Result<PathBuf, DirectoryRecordOutputError> {
    let directory = self
      .directory
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()));
    if !directory.exists() {
      std::fs::create_dir_all(&directory)?;
    }
    Ok(directory.join(format!("detections-{:02}.jsonl", now.hour())))
  }
}

impl Render for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn render_result(&self, frame: &FrameInfo, result: &DetectionResultSet) -> Result<(), Self::Error> {
    if !self.always && result.is_empty() {
      return Ok(());
    }

    let now = Utc::now();
    let line = RecordLine {
      time: now.to_rfc3339(),
      sequence: self.next_sequence(),
      frame,
      confidence_scale: result.confidence_scale(),
      detections: result.as_slice(),
    };
    let mut encoded = serde_json::to_vec(&line)?;
    encoded.push(b'\n');

    let path = self.record_path(&now)?;
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(&encoded)?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::detection::{DetectionBox, NormalizedBox};

  fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("xunying-record-{}-{}", name, std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    dir
  }

  fn read_lines(dir: &Path) -> Vec<serde_json::Value> {
    let mut lines = Vec::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(path) = stack.pop() {
      if path.is_dir() {
        for entry in std::fs::read_dir(&path).unwrap() {
          stack.push(entry.unwrap().path());
        }
      } else {
        let content = std::fs::read_to_string(&path).unwrap();
        lines.extend(content.lines().map(|l| serde_json::from_str(l).unwrap()));
      }
    }
    lines
  }

  fn one_detection() -> DetectionResultSet {
    let mut set = DetectionResultSet::new(ConfidenceScale::Percent);
    set
      .push(DetectionResult {
        bbox: DetectionBox {
          left: 1,
          top: 2,
          right: 30,
          bottom: 40,
        },
        normalized: NormalizedBox::default(),
        class_id: 7,
        confidence: 88.0,
        track_id: Some(3),
      })
      .unwrap();
    set
  }

  #[test]
  fn appends_json_lines() {
    let dir = scratch_dir("append");
    let url = url::Url::from_directory_path(&dir).unwrap();
    let url = url::Url::parse(&url.as_str().replacen("file", "folder", 1)).unwrap();
    let output = DirectoryRecordOutput::from_url(&url).unwrap();
    let frame = FrameInfo {
      index: 5,
      width: 1280,
      height: 720,
    };

    output.render_result(&frame, &one_detection()).unwrap();
    output
      .render_result(&frame, &DetectionResultSet::new(ConfidenceScale::Percent))
      .unwrap();
    output.render_result(&frame, &one_detection()).unwrap();

    let mut lines = read_lines(&dir);
    lines.sort_by_key(|l| l["sequence"].as_u64());
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["sequence"], 1);
    assert_eq!(lines[1]["sequence"], 2);
    assert_eq!(lines[0]["frame"]["width"], 1280);
    assert_eq!(lines[0]["confidence_scale"], "percent");
    assert_eq!(lines[0]["detections"][0]["class_id"], 7);
    assert_eq!(lines[0]["detections"][0]["track_id"], 3);
    std::fs::remove_dir_all(&dir).unwrap();
  }

  #[test]
  fn always_records_empty_frames() {
    let dir = scratch_dir("always");
    let output = DirectoryRecordOutput::new(&dir, true);
    output
      .render_result(&FrameInfo::default(), &DetectionResultSet::new(ConfidenceScale::Probability))
      .unwrap();
    let lines = read_lines(&dir);
    assert_eq!(lines.len(), 1);
    assert!(lines[0]["detections"].as_array().unwrap().is_empty());
    std::fs::remove_dir_all(&dir).unwrap();
  }
}
