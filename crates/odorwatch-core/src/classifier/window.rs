use std::collections::VecDeque;

/// Fixed-capacity sample window. Inserting into a full window evicts the oldest value.
#[derive(Debug, Clone)]
pub struct Window {
    values: VecDeque<f64>,
    capacity: usize,
}

impl Window {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            values: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, value: f64) {
        if self.values.len() == self.capacity {
            self.values.pop_front();
        }
        self.values.push_back(value);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    /// Arithmetic mean of the current contents, `None` when empty.
    pub fn mean(&self) -> Option<f64> {
        if self.values.is_empty() {
            return None;
        }
        Some(self.values.iter().sum::<f64>() / self.values.len() as f64)
    }

    /// Value at `percentile` (0.0..=1.0) of the sorted contents.
    ///
    /// Uses index `floor(len * percentile)` clamped to the last element.
    pub fn percentile(&self, percentile: f64) -> Option<f64> {
        if self.values.is_empty() {
            return None;
        }
        let mut sorted: Vec<f64> = self.values.iter().copied().collect();
        sorted.sort_by(f64::total_cmp);
        let idx = (sorted.len() as f64 * percentile) as usize;
        Some(sorted[idx.min(sorted.len() - 1)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_evicts_oldest() {
        let mut w = Window::new(3);
        for v in [1.0, 2.0, 3.0, 4.0] {
            w.push(v);
        }
        assert_eq!(w.len(), 3);
        assert_eq!(w.mean(), Some(3.0));
    }

    #[test]
    fn test_window_partial_mean() {
        let mut w = Window::new(5);
        assert_eq!(w.mean(), None);
        w.push(10.0);
        w.push(20.0);
        assert_eq!(w.mean(), Some(15.0));
    }

    #[test]
    fn test_percentile_index() {
        let mut w = Window::new(10);
        for v in 1..=10 {
            w.push(v as f64);
        }
        // floor(10 * 0.9) = 9 -> the largest value
        assert_eq!(w.percentile(0.9), Some(10.0));
        assert_eq!(w.percentile(0.5), Some(6.0));
        assert_eq!(w.percentile(0.0), Some(1.0));
        assert_eq!(w.percentile(1.0), Some(10.0));
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let mut w = Window::new(0);
        w.push(1.0);
        w.push(2.0);
        assert_eq!(w.capacity(), 1);
        assert_eq!(w.mean(), Some(2.0));
    }
}
