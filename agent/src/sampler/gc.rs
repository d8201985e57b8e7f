use std::sync::Arc;

use crossbeam::channel::select;
use flamegraph::{Builder, Sample, GC_LABEL};

use crate::runtime::GcSource;
use crate::sampler::{interval, Sampler, SamplerTask};

/// Watches the runtime's GC counters and emits one `(GC)` pseudo-sample per
/// completed cycle, weighted by the pause duration in nanoseconds.
///
/// The cycle counter may wrap; the loop walks from the previously seen count
/// to the current one with wrapping arithmetic, reading each pause from the
/// source's ring.
pub struct GcSampler<S: GcSource + 'static> {
    builder: Arc<Builder>,
    hz: u32,
    source: Option<S>,
    task: SamplerTask,
}

impl<S: GcSource + 'static> GcSampler<S> {
    /// `hz` is clamped to [1, 1000]; 0 selects the 10 Hz default — GC does
    /// not need high granularity.
    pub fn new(builder: Arc<Builder>, source: S, hz: u32) -> Self {
        let hz = if hz == 0 { 10 } else { hz.clamp(1, 1000) };
        GcSampler {
            builder,
            hz,
            source: Some(source),
            task: SamplerTask::new(),
        }
    }
}

impl<S: GcSource + 'static> Sampler for GcSampler<S> {
    fn start(&mut self) {
        let mut source = match self.source.take() {
            Some(source) => source,
            None => return,
        };
        let builder = self.builder.clone();
        let tick_every = interval(self.hz);

        self.task.launch("gc-sampler", move |quit| {
            let mut last = source.read().count;
            let ticker = crossbeam::channel::tick(tick_every);
            loop {
                select! {
                    recv(ticker) -> _ => {
                        let stats = source.read();
                        if stats.count == last {
                            continue;
                        }
                        let slots = stats.pause_ns.len() as u32;
                        let mut cycle = last;
                        while cycle != stats.count {
                            let pause = stats.pause_ns[(cycle % slots) as usize];
                            if pause != 0 {
                                builder.add(Sample::new(
                                    vec![GC_LABEL.to_string()],
                                    pause as i64,
                                ));
                            }
                            cycle = cycle.wrapping_add(1);
                        }
                        last = stats.count;
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
