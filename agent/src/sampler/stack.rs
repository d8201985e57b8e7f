use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::select;
use flamegraph::{Builder, Sample};

use crate::runtime::StackSource;
use crate::sampler::{interval, Sampler, SamplerTask};

/// Thread-entry wrapper frames dropped from every captured stack. Both are
/// configurable through [`StackSamplerConfig::drop_frames`].
pub const DEFAULT_DROP_FRAMES: [&str; 2] = [
    "std::sys::backtrace::__rust_begin_short_backtrace",
    "std::rt::lang_start",
];

#[derive(Debug, Clone)]
pub struct StackSamplerConfig {
    /// Polling frequency, clamped to [10, 200] Hz.
    pub hz: u32,
    /// Fully-qualified (hash-stripped) symbol names to drop from stacks.
    pub drop_frames: Vec<String>,
}

impl Default for StackSamplerConfig {
    fn default() -> Self {
        StackSamplerConfig {
            hz: 100,
            drop_frames: DEFAULT_DROP_FRAMES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Samples the stacks of every live execution context and merges them into
/// the builder with weight 1, so the flamegraph shows how many contexts
/// share each call path in real time.
pub struct StackSampler<S: StackSource + 'static> {
    builder: Arc<Builder>,
    cfg: StackSamplerConfig,
    source: Option<S>,
    task: SamplerTask,
}

impl<S: StackSource + 'static> StackSampler<S> {
    pub fn new(builder: Arc<Builder>, source: S, mut cfg: StackSamplerConfig) -> Self {
        cfg.hz = cfg.hz.clamp(10, 200);
        StackSampler {
            builder,
            cfg,
            source: Some(source),
            task: SamplerTask::new(),
        }
    }
}

impl<S: StackSource + 'static> Sampler for StackSampler<S> {
    fn start(&mut self) {
        let mut source = match self.source.take() {
            Some(source) => source,
            None => return,
        };
        let builder = self.builder.clone();
        let drop_frames = self.cfg.drop_frames.clone();
        let tick_every = interval(self.cfg.hz);

        self.task.launch("stack-sampler", move |quit| {
            let ticker = crossbeam::channel::tick(tick_every);
            loop {
                select! {
                    recv(ticker) -> _ => {
                        for raw in source.capture() {
                            let stack = prepare_stack(&raw, &drop_frames);
                            if stack.is_empty() {
                                continue;
                            }
                            builder.add(Sample::new(stack, 1));
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

/// Turns a raw leaf→root capture into a root→leaf stack of trimmed names,
/// dropping the configured wrapper frames.
fn prepare_stack(raw: &[String], drop_frames: &[String]) -> Vec<String> {
    let mut stack = Vec::with_capacity(raw.len());
    for name in raw.iter().rev() {
        let stripped = strip_hash_suffix(name);
        if drop_frames.iter().any(|d| d == stripped) {
            continue;
        }
        stack.push(trim_module_path(stripped));
    }
    stack
}

/// Removes the trailing `::h0123456789abcdef` disambiguator rustc appends.
fn strip_hash_suffix(name: &str) -> &str {
    if let Some(idx) = name.rfind("::") {
        let tail = &name[idx + 2..];
        if tail.len() == 17
            && tail.starts_with('h')
            && tail[1..].bytes().all(|b| b.is_ascii_hexdigit())
        {
            return &name[..idx];
        }
    }
    name
}

/// Trims leading path components, leaving `module::function`.
fn trim_module_path(name: &str) -> String {
    let segments: Vec<&str> = name.rsplitn(3, "::").collect();
    match segments.as_slice() {
        [last, parent, _rest] => format!("{parent}::{last}"),
        _ => name.to_string(),
    }
}
