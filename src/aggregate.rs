use serde::Serialize;
use std::collections::BTreeMap;

pub const EPSILON: f64 = 1e-9;

/// One copy's share in a weighted average: a mark on the common scale and its coefficient.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Contribution {
    pub value: f64,
    pub weight: f64,
}

/// Running `Σ value·weight / Σ weight` that never rescans its inputs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeightedAverage {
    pub points_sum: f64,
    pub weight_total: f64,
    pub count: i64,
}

impl WeightedAverage {
    pub fn add(&mut self, c: Contribution) {
        self.points_sum += c.value * c.weight;
        self.weight_total += c.weight;
        self.count += 1;
    }

    pub fn remove(&mut self, c: Contribution) {
        self.count = (self.count - 1).max(0);
        if self.count == 0 {
            // Drop accumulated float residue along with the last contribution.
            self.points_sum = 0.0;
            self.weight_total = 0.0;
            return;
        }
        self.points_sum -= c.value * c.weight;
        self.weight_total -= c.weight;
    }

    pub fn replace(&mut self, old: Option<Contribution>, new: Option<Contribution>) {
        if let Some(c) = old {
            self.remove(c);
        }
        if let Some(c) = new {
            self.add(c);
        }
    }

    /// `None` once no contribution is present; an empty average is absent, not zero.
    pub fn average(&self) -> Option<f64> {
        if self.count == 0 || self.weight_total <= EPSILON {
            None
        } else {
            Some(self.points_sum / self.weight_total)
        }
    }

    pub fn rebuild<I>(contributions: I) -> Self
    where
        I: IntoIterator<Item = Contribution>,
    {
        let mut out = Self::default();
        for c in contributions {
            out.add(c);
        }
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    Clean,
    /// The removed value was the current min or max; bounds must be rescanned.
    RescanBounds,
}

/// Count, sum and bounds of the marks of one evaluation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RunningStats {
    pub count: i64,
    pub sum: f64,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl RunningStats {
    pub fn add(&mut self, v: f64) {
        self.count += 1;
        self.sum += v;
        self.min = Some(self.min.map_or(v, |m| m.min(v)));
        self.max = Some(self.max.map_or(v, |m| m.max(v)));
    }

    pub fn remove(&mut self, v: f64) -> Removal {
        self.count = (self.count - 1).max(0);
        if self.count == 0 {
            *self = Self::default();
            return Removal::Clean;
        }
        self.sum -= v;
        let on_min = self.min.map(|m| (m - v).abs() <= EPSILON).unwrap_or(true);
        let on_max = self.max.map(|m| (m - v).abs() <= EPSILON).unwrap_or(true);
        if on_min || on_max {
            Removal::RescanBounds
        } else {
            Removal::Clean
        }
    }

    pub fn set_bounds(&mut self, min: Option<f64>, max: Option<f64>) {
        self.min = min;
        self.max = max;
    }

    pub fn mean(&self) -> Option<f64> {
        if self.count > 0 {
            Some(self.sum / self.count as f64)
        } else {
            None
        }
    }

    pub fn rebuild<I>(values: I) -> Self
    where
        I: IntoIterator<Item = f64>,
    {
        let mut out = Self::default();
        for v in values {
            out.add(v);
        }
        out
    }
}

/// Per-exercise point sums (categories and criteria) over the copies of one evaluation.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ItemSums(pub BTreeMap<String, f64>);

impl ItemSums {
    pub fn add(&mut self, items: &[(String, f64)]) {
        for (id, points) in items {
            *self.0.entry(id.clone()).or_insert(0.0) += points;
        }
    }

    pub fn remove(&mut self, items: &[(String, f64)]) {
        for (id, points) in items {
            *self.0.entry(id.clone()).or_insert(0.0) -= points;
        }
    }

    pub fn sum(&self, id: &str) -> f64 {
        self.0.get(id).copied().unwrap_or(0.0)
    }

    pub fn mean(&self, id: &str, count: i64) -> Option<f64> {
        if count > 0 {
            Some(self.sum(id) / count as f64)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn c(value: f64, weight: f64) -> Contribution {
        Contribution { value, weight }
    }

    #[test]
    fn weighted_average_uses_coefficients() {
        let mut avg = WeightedAverage::default();
        avg.add(c(10.0, 1.0));
        avg.add(c(16.0, 2.0));
        assert_eq!(avg.average(), Some(14.0));
        avg.replace(Some(c(16.0, 2.0)), Some(c(13.0, 2.0)));
        assert_eq!(avg.average(), Some(12.0));
        assert_eq!(avg.count, 2);
    }

    #[test]
    fn removing_last_contribution_removes_average() {
        let mut avg = WeightedAverage::default();
        avg.add(c(12.3, 0.7));
        avg.remove(c(12.3, 0.7));
        assert_eq!(avg.average(), None);
        assert_eq!(avg, WeightedAverage::default());
    }

    #[test]
    fn running_stats_flags_boundary_removals() {
        let mut s = RunningStats::rebuild([8.0, 12.0, 15.0]);
        assert_eq!(s.remove(12.0), Removal::Clean);
        assert_eq!(s.min, Some(8.0));
        assert_eq!(s.remove(15.0), Removal::RescanBounds);
        s.set_bounds(Some(8.0), Some(8.0));
        assert_eq!(s.mean(), Some(8.0));
        assert_eq!(s.remove(8.0), Removal::Clean);
        assert_eq!(s, RunningStats::default());
    }

    #[test]
    fn item_sums_track_adds_and_removes() {
        let mut sums = ItemSums::default();
        sums.add(&[("ex1".into(), 3.0), ("c1".into(), 3.0)]);
        sums.add(&[("ex1".into(), 1.0), ("c1".into(), 1.0)]);
        sums.remove(&[("ex1".into(), 3.0), ("c1".into(), 3.0)]);
        assert_eq!(sums.sum("ex1"), 1.0);
        assert_eq!(sums.mean("c1", 1), Some(1.0));
        assert_eq!(sums.mean("c1", 0), None);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Upsert(usize, f64, f64),
        Delete(usize),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0usize..6, 0.0f64..20.0, 0.5f64..4.0).prop_map(|(k, v, w)| Op::Upsert(k, v, w)),
            (0usize..6).prop_map(Op::Delete),
        ]
    }

    proptest! {
        #[test]
        fn incremental_matches_rebuild(ops in proptest::collection::vec(op(), 0..60)) {
            let mut present: BTreeMap<usize, Contribution> = BTreeMap::new();
            let mut avg = WeightedAverage::default();
            for op in ops {
                match op {
                    Op::Upsert(k, v, w) => {
                        let new = c(v, w);
                        let old = present.insert(k, new);
                        avg.replace(old, Some(new));
                    }
                    Op::Delete(k) => {
                        if let Some(old) = present.remove(&k) {
                            avg.replace(Some(old), None);
                        }
                    }
                }
                let fresh = WeightedAverage::rebuild(present.values().copied());
                prop_assert_eq!(avg.count, fresh.count);
                match (avg.average(), fresh.average()) {
                    (None, None) => {}
                    (Some(a), Some(b)) => prop_assert!((a - b).abs() < 1e-6),
                    (a, b) => prop_assert!(false, "{:?} vs {:?}", a, b),
                }
            }
        }
    }
}
