// 该文件是 Xunying （巡鹰） 项目的一部分。
// src/decode/candidate.rs - 候选框集合
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

use super::DecodeError;

/// 模型输入空间中的候选框（左上角 + 宽高）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
  pub x: f32,
  pub y: f32,
  pub w: f32,
  pub h: f32,
  pub score: f32,
  pub class_id: u32,
}

impl Candidate {
  pub fn xmax(&self) -> f32 {
    self.x + self.w
  }

  pub fn ymax(&self) -> f32 {
    self.y + self.h
  }
}

/// 三个检测头共享的候选框集合
///
/// 插入顺序即扫描顺序，是策略 A 的决胜顺序，不允许重排。
#[derive(Debug, Clone, Default)]
pub struct CandidateSet {
  items: Vec<Candidate>,
}

impl CandidateSet {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn push(&mut self, candidate: Candidate) -> Result<(), DecodeError> {
    self.items.try_reserve(1)?;
    self.items.push(candidate);
    Ok(())
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn get(&self, index: usize) -> Option<&Candidate> {
    self.items.get(index)
  }

  pub fn as_slice(&self) -> &[Candidate] {
    &self.items
  }

  pub fn iter(&self) -> std::slice::Iter<'_, Candidate> {
    self.items.iter()
  }
}

impl std::ops::Index<usize> for CandidateSet {
  type Output = Candidate;

  fn index(&self, index: usize) -> &Self::Output {
    &self.items[index]
  }
}

impl FromIterator<Candidate> for CandidateSet {
  fn from_iter<I: IntoIterator<Item = Candidate>>(iter: I) -> Self {
    Self {
      items: iter.into_iter().collect(),
    }
  }
}
