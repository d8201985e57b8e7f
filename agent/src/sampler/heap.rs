use std::sync::Arc;

use crossbeam::channel::select;
use flamegraph::{Builder, Sample, HEAP_LABEL};

use crate::runtime::HeapSource;
use crate::sampler::{interval, Sampler, SamplerTask};

/// Polls the live heap size and emits the signed delta since the previous
/// poll as a `(Heap)` pseudo-sample, so the flamegraph shows a growing or
/// shrinking heap band. Negative deltas follow collections.
pub struct HeapSampler<S: HeapSource + 'static> {
    builder: Arc<Builder>,
    hz: u32,
    source: Option<S>,
    task: SamplerTask,
}

impl<S: HeapSource + 'static> HeapSampler<S> {
    /// `hz` is clamped to [1, 4]; higher rates rarely add value for heap
    /// trends.
    pub fn new(builder: Arc<Builder>, source: S, hz: u32) -> Self {
        HeapSampler {
            builder,
            hz: hz.clamp(1, 4),
            source: Some(source),
            task: SamplerTask::new(),
        }
    }
}

impl<S: HeapSource + 'static> Sampler for HeapSampler<S> {
    fn start(&mut self) {
        let mut source = match self.source.take() {
            Some(source) => source,
            None => return,
        };
        let builder = self.builder.clone();
        let tick_every = interval(self.hz);

        self.task.launch("heap-sampler", move |quit| {
            let mut prev = source.heap_bytes();
            let ticker = crossbeam::channel::tick(tick_every);
            loop {
                select! {
                    recv(ticker) -> _ => {
                        let cur = source.heap_bytes();
                        let delta = cur as i64 - prev as i64;
                        prev = cur;
                        if delta == 0 {
                            continue;
                        }
                        builder.add(Sample::new(vec![HEAP_LABEL.to_string()], delta));
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::thread;
    use std::time::Duration;

    struct ScriptedHeap(Arc<Mutex<u64>>);

    impl HeapSource for ScriptedHeap {
        fn heap_bytes(&mut self) -> u64 {
            *self.0.lock().unwrap()
        }
    }

    #[test]
    fn emits_signed_deltas_and_skips_flat_polls() {
        let bytes = Arc::new(Mutex::new(1_000u64));
        let builder = Arc::new(Builder::new("root"));
        let mut sampler = HeapSampler::new(builder.clone(), ScriptedHeap(bytes.clone()), 4);
        sampler.start();

        thread::sleep(Duration::from_millis(300));
        *bytes.lock().unwrap() = 1_500;
        thread::sleep(Duration::from_millis(300));
        *bytes.lock().unwrap() = 1_200;
        thread::sleep(Duration::from_millis(300));
        sampler.stop();

        // +500 then -300; flat polls in between contribute nothing.
        assert_eq!(builder.snapshot_and_reset().child(HEAP_LABEL).unwrap().value, 200);
    }

    #[test]
    fn clamps_frequency() {
        let builder = Arc::new(Builder::new("root"));
        let s = HeapSampler::new(builder.clone(), ScriptedHeap(Arc::new(Mutex::new(0))), 0);
        assert_eq!(s.hz, 1);
        let s = HeapSampler::new(builder, ScriptedHeap(Arc::new(Mutex::new(0))), 99);
        assert_eq!(s.hz, 4);
    }
}
