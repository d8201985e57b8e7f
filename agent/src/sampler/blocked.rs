use std::sync::Arc;

use crossbeam::channel::select;
use flamegraph::{Builder, Sample, BLOCKED_LABEL};

use crate::runtime::TaskSource;
use crate::sampler::{interval, Sampler, SamplerTask};

/// Approximates scheduler contention as `total - running` tasks, floored at
/// zero, and emits the count as a `(Blocked)` pseudo-sample when positive.
/// This is an intentionally coarse heuristic; sources with better knowledge
/// of wait states can fold it into `running`.
pub struct BlockedSampler<S: TaskSource + 'static> {
    builder: Arc<Builder>,
    hz: u32,
    source: Option<S>,
    task: SamplerTask,
}

impl<S: TaskSource + 'static> BlockedSampler<S> {
    /// `hz` is clamped to [5, 500].
    pub fn new(builder: Arc<Builder>, source: S, hz: u32) -> Self {
        BlockedSampler {
            builder,
            hz: hz.clamp(5, 500),
            source: Some(source),
            task: SamplerTask::new(),
        }
    }
}

impl<S: TaskSource + 'static> Sampler for BlockedSampler<S> {
    fn start(&mut self) {
        let mut source = match self.source.take() {
            Some(source) => source,
            None => return,
        };
        let builder = self.builder.clone();
        let tick_every = interval(self.hz);

        self.task.launch("blocked-sampler", move |quit| {
            let ticker = crossbeam::channel::tick(tick_every);
            loop {
                select! {
                    recv(ticker) -> _ => {
                        let counts = source.counts();
                        let blocked = (counts.total - counts.running).max(0);
                        if blocked > 0 {
                            builder.add(Sample::new(
                                vec![BLOCKED_LABEL.to_string()],
                                blocked,
                            ));
                        }
                    }
                    recv(quit) -> _ => break,
                }
            }
        });
    }

    fn stop(&mut self) {
        self.task.shutdown();
    }
}
