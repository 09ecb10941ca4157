// 该文件是 Xunying （巡鹰） 项目的一部分。
// src/decode/nms.rs - 非极大值抑制
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

use std::collections::BTreeSet;

use crate::config::DecodePolicy;

use super::{Candidate, CandidateSet};

/// 交并比，沿用包含像素的 “+1” 约定计算交集与面积
pub fn iou(a: &Candidate, b: &Candidate) -> f32 {
  let w = (a.xmax().min(b.xmax()) - a.x.max(b.x) + 1.0).max(0.0);
  let h = (a.ymax().min(b.ymax()) - a.y.max(b.y) + 1.0).max(0.0);
  let overlap = w * h;
  let area_a = (a.w + 1.0) * (a.h + 1.0);
  let area_b = (b.w + 1.0) * (b.h + 1.0);
  let union = area_a + area_b - overlap;
  if union <= 0.0 { 0.0 } else { overlap / union }
}

/// 按解码策略对候选框执行 NMS
pub struct Suppressor {
  policy: DecodePolicy,
  nms_threshold: f32,
}

impl Suppressor {
  pub fn new(policy: DecodePolicy, nms_threshold: f32) -> Self {
    Self {
      policy,
      nms_threshold,
    }
  }

  /// 返回幸存候选框的下标，按最终优先级排列
  pub fn suppress(&self, candidates: &CandidateSet) -> Vec<usize> {
    match self.policy {
      DecodePolicy::ObjectnessGlobal => self.global_scan_order(candidates),
      DecodePolicy::JointPerClass => self.per_class_score_order(candidates),
    }
  }

  /// 策略 A：不排序、不区分类别，先插入者胜出
  fn global_scan_order(&self, candidates: &CandidateSet) -> Vec<usize> {
    let items = candidates.as_slice();
    let mut alive = vec![true; items.len()];
    for i in 0..items.len() {
      if !alive[i] {
        continue;
      }
      for j in (i + 1)..items.len() {
        if alive[j] && iou(&items[i], &items[j]) > self.nms_threshold {
          alive[j] = false;
        }
      }
    }
    (0..items.len()).filter(|&k| alive[k]).collect()
  }

  /// 策略 B：按 (分数降序, 原始下标升序) 排序后，逐类贪心抑制
  fn per_class_score_order(&self, candidates: &CandidateSet) -> Vec<usize> {
    let items = candidates.as_slice();
    let mut order: Vec<usize> = (0..items.len()).collect();
    order.sort_by(|&a, &b| {
      items[b]
        .score
        .total_cmp(&items[a].score)
        .then(a.cmp(&b))
    });

    let classes: BTreeSet<u32> = items.iter().map(|c| c.class_id).collect();
    let mut alive = vec![true; items.len()];
    for class_id in classes {
      let members: Vec<usize> = order
        .iter()
        .copied()
        .filter(|&k| items[k].class_id == class_id)
        .collect();
      for (pos, &i) in members.iter().enumerate() {
        if !alive[i] {
          continue;
        }
        for &j in &members[pos + 1..] {
          if alive[j] && iou(&items[i], &items[j]) > self.nms_threshold {
            alive[j] = false;
          }
        }
      }
    }

    order.into_iter().filter(|&k| alive[k]).collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use approx::assert_relative_eq;

  fn cand(x: f32, y: f32, w: f32, h: f32, score: f32, class_id: u32) -> Candidate {
    Candidate {
      x,
      y,
      w,
      h,
      score,
      class_id,
    }
  }

  #[test]
  fn iou_uses_inclusive_pixels() {
    let a = cand(0.0, 0.0, 9.0, 9.0, 1.0, 0);
    assert_relative_eq!(iou(&a, &a), 1.0);
    // 交集 5x10，面积各 10x10
    let b = cand(5.0, 0.0, 9.0, 9.0, 1.0, 0);
    assert_relative_eq!(iou(&a, &b), 50.0 / 150.0);
    // 相邻但不重叠的框在 +1 约定下仍有 1 像素宽的交集
    let c = cand(9.0, 0.0, 9.0, 9.0, 1.0, 0);
    assert_relative_eq!(iou(&a, &c), 10.0 / 190.0);
    let far = cand(100.0, 100.0, 5.0, 5.0, 1.0, 0);
    assert_eq!(iou(&a, &far), 0.0);
  }

  #[test]
  fn iou_is_symmetric() {
    let boxes = [
      cand(0.0, 0.0, 30.0, 20.0, 0.9, 0),
      cand(12.5, 3.0, 40.0, 8.0, 0.4, 1),
      cand(-5.0, 10.0, 12.0, 50.0, 0.7, 2),
      cand(29.0, 19.0, 1.0, 1.0, 0.1, 0),
    ];
    for a in &boxes {
      for b in &boxes {
        assert_eq!(iou(a, b), iou(b, a));
      }
    }
  }

  #[test]
  fn global_policy_keeps_earlier_candidate_regardless_of_score() {
    let set: CandidateSet = [
      cand(0.0, 0.0, 100.0, 100.0, 0.3, 0),
      cand(2.0, 2.0, 100.0, 100.0, 0.9, 1),
      cand(300.0, 300.0, 50.0, 50.0, 0.5, 0),
    ]
    .into_iter()
    .collect();
    let kept = Suppressor::new(DecodePolicy::ObjectnessGlobal, 0.5).suppress(&set);
    assert_eq!(kept, vec![0, 2]);
  }

  #[test]
  fn per_class_policy_keeps_higher_score() {
    // 两个同类框，IoU 为 0.9
    let a = cand(0.0, 0.0, 99.0, 99.0, 0.6, 3);
    let b = cand(0.0, 0.0, 99.0, 89.0, 0.8, 3);
    assert_relative_eq!(iou(&a, &b), 0.9);
    let set: CandidateSet = [a, b].into_iter().collect();
    let kept = Suppressor::new(DecodePolicy::JointPerClass, 0.6).suppress(&set);
    assert_eq!(kept, vec![1]);
  }

  #[test]
  fn per_class_policy_does_not_cross_classes() {
    let set: CandidateSet = [
      cand(0.0, 0.0, 50.0, 50.0, 0.7, 0),
      cand(0.0, 0.0, 50.0, 50.0, 0.9, 1),
      cand(1.0, 1.0, 50.0, 50.0, 0.8, 0),
    ]
    .into_iter()
    .collect();
    let kept = Suppressor::new(DecodePolicy::JointPerClass, 0.5).suppress(&set);
    assert_eq!(kept, vec![1, 2]);
  }

  #[test]
  fn equal_scores_break_ties_by_insertion() {
    let set: CandidateSet = [
      cand(0.0, 0.0, 50.0, 50.0, 0.5, 0),
      cand(0.0, 0.0, 50.0, 50.0, 0.5, 0),
    ]
    .into_iter()
    .collect();
    let kept = Suppressor::new(DecodePolicy::JointPerClass, 0.5).suppress(&set);
    assert_eq!(kept, vec![0]);
  }

  #[test]
  fn suppression_is_idempotent() {
    let boxes: Vec<Candidate> = (0..40)
      .map(|k| {
        let f = k as f32;
        cand((f * 7.0) % 90.0, (f * 13.0) % 70.0, 30.0, 25.0, 1.0 - f / 50.0, k % 3)
      })
      .collect();
    let set: CandidateSet = boxes.iter().copied().collect();
    for policy in [DecodePolicy::ObjectnessGlobal, DecodePolicy::JointPerClass] {
      let suppressor = Suppressor::new(policy, 0.45);
      let kept = suppressor.suppress(&set);
      let survivors: CandidateSet = kept.iter().map(|&k| set[k]).collect();
      let again = suppressor.suppress(&survivors);
      assert_eq!(again, (0..survivors.len()).collect::<Vec<_>>());
    }
  }
}
