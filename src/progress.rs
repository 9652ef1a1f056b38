/// Which step of a conversion just finished. Page numbers are 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Measure { page: usize },
    Allocate,
    Paste { page: usize },
    Save,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub current: usize,
    pub total: usize,
    pub stage: Stage,
}

impl Progress {
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.current as f64 / self.total as f64
        }
    }
}

/// Receives one notification per finished step, synchronously on the
/// converting thread.
pub trait ProgressSink {
    fn on_progress(&mut self, progress: Progress);
}

impl<F: FnMut(Progress)> ProgressSink for F {
    fn on_progress(&mut self, progress: Progress) {
        self(progress)
    }
}

/// Sink that drops every notification.
pub fn ignore_progress(_: Progress) {}

/// Counts steps for one conversion of `pages` pages: one per page per pass,
/// plus canvas allocation and save.
pub(crate) struct StepCounter<'a> {
    sink: &'a mut dyn ProgressSink,
    current: usize,
    total: usize,
}

impl<'a> StepCounter<'a> {
    pub(crate) fn new(sink: &'a mut dyn ProgressSink, pages: usize) -> Self {
        Self {
            sink,
            current: 0,
            total: pages * 2 + 2,
        }
    }

    /// Continue a conversion whose first `done` steps were reported by an
    /// earlier call, e.g. saving a canvas returned from `composite`.
    pub(crate) fn resume(sink: &'a mut dyn ProgressSink, pages: usize, done: usize) -> Self {
        let mut counter = Self::new(sink, pages);
        counter.current = done.min(counter.total);
        counter
    }

    pub(crate) fn step(&mut self, stage: Stage) {
        self.current = (self.current + 1).min(self.total);
        self.sink.on_progress(Progress {
            current: self.current,
            total: self.total,
            stage,
        });
    }

    #[cfg(test)]
    pub(crate) fn current(&self) -> usize {
        self.current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_counter_totals_two_per_page_plus_two() {
        let mut seen = Vec::new();
        let mut sink = |p: Progress| seen.push((p.current, p.total));
        {
            let mut counter = StepCounter::new(&mut sink, 3);
            counter.step(Stage::Measure { page: 1 });
            counter.step(Stage::Allocate);
            assert_eq!(counter.current(), 2);
        }
        assert_eq!(seen, vec![(1, 8), (2, 8)]);
    }

    #[test]
    fn resumed_counter_continues_after_composite_steps() {
        let mut seen = Vec::new();
        let mut sink = |p: Progress| seen.push((p.current, p.total, p.stage));
        {
            let mut counter = StepCounter::resume(&mut sink, 2, 5);
            assert_eq!(counter.current(), 5);
            counter.step(Stage::Save);
        }
        assert_eq!(seen, vec![(6, 6, Stage::Save)]);
    }

    #[test]
    fn fraction_of_empty_total_is_complete() {
        let p = Progress {
            current: 0,
            total: 0,
            stage: Stage::Allocate,
        };
        assert_eq!(p.fraction(), 1.0);
    }
}
