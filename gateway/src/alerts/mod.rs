//! Alert rules and their evaluation loop.
//!
//! A rule owns a compiled predicate, a stabilization duration and a sink
//! set. Evaluation runs once per ingested snapshot: a rule goes
//! inactive→pending when its predicate first holds, pending→firing once the
//! predicate has held for the stabilization duration without interruption,
//! and firing→inactive on the first false evaluation. Sinks are notified on
//! the transition into firing only.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::debug;

pub mod expr;
pub mod metrics;
mod sinks;

pub use expr::{Expr, ExprError};
pub use sinks::{Notification, Sink};

#[derive(Debug)]
pub struct Rule {
    name: String,
    source: String,
    expr: Expr,
    stabilization: Duration,
    sinks: Vec<Sink>,
}

impl Rule {
    pub fn new(
        name: impl Into<String>,
        expr_src: &str,
        stabilization: Duration,
        sinks: Vec<Sink>,
    ) -> Result<Self, ExprError> {
        Ok(Rule {
            name: name.into(),
            source: expr_src.to_string(),
            expr: Expr::compile(expr_src)?,
            stabilization,
            sinks,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn fire(&self) {
        let message = format!(
            "condition `{}` held for {:?}",
            self.source, self.stabilization
        );
        for sink in &self.sinks {
            sink.notify(&self.name, &message);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RuleState {
    Inactive,
    Pending { since: Instant },
    Firing,
}

/// Evaluates every registered rule against successive metric maps.
#[derive(Debug, Default)]
pub struct AlertEngine {
    rules: Vec<(Rule, RuleState)>,
}

impl AlertEngine {
    pub fn new() -> Self {
        AlertEngine::default()
    }

    pub fn add_rule(&mut self, rule: Rule) {
        self.rules.push((rule, RuleState::Inactive));
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Evaluates all rules against one derived-metric snapshot.
    pub fn observe(&mut self, metrics: &HashMap<String, f64>) {
        self.observe_at(metrics, Instant::now());
    }

    pub fn observe_at(&mut self, metrics: &HashMap<String, f64>, now: Instant) {
        for (rule, state) in &mut self.rules {
            let holds = rule.expr.matches(metrics);
            *state = match (*state, holds) {
                (RuleState::Inactive, true) => {
                    if rule.stabilization.is_zero() {
                        rule.fire();
                        RuleState::Firing
                    } else {
                        debug!(rule = %rule.name, "alert pending");
                        RuleState::Pending { since: now }
                    }
                }
                (RuleState::Pending { since }, true) => {
                    if now.duration_since(since) >= rule.stabilization {
                        rule.fire();
                        RuleState::Firing
                    } else {
                        RuleState::Pending { since }
                    }
                }
                (RuleState::Firing, true) => RuleState::Firing,
                (_, false) => RuleState::Inactive,
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel::Receiver;

    fn metrics(blocked: f64) -> HashMap<String, f64> {
        let mut m = HashMap::new();
        m.insert("blocked_goroutines".to_string(), blocked);
        m
    }

    fn engine_with_rule(stabilization: Duration) -> (AlertEngine, Receiver<Notification>) {
        let (tx, rx) = crossbeam::channel::unbounded();
        let mut engine = AlertEngine::new();
        engine.add_rule(
            Rule::new(
                "blocked-high",
                "blocked_goroutines > 150",
                stabilization,
                vec![Sink::Channel(tx)],
            )
            .unwrap(),
        );
        (engine, rx)
    }

    #[test]
    fn fires_once_after_stabilization() {
        let (mut engine, rx) = engine_with_rule(Duration::from_secs(1));
        let t0 = Instant::now();

        engine.observe_at(&metrics(200.0), t0);
        assert!(rx.try_recv().is_err());

        engine.observe_at(&metrics(200.0), t0 + Duration::from_millis(500));
        assert!(rx.try_recv().is_err());

        engine.observe_at(&metrics(200.0), t0 + Duration::from_millis(1100));
        let fired = rx.try_recv().unwrap();
        assert_eq!(fired.rule, "blocked-high");

        // Back below the threshold: no new notification, state resets.
        engine.observe_at(&metrics(100.0), t0 + Duration::from_millis(1300));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn firing_does_not_renotify_every_tick() {
        let (mut engine, rx) = engine_with_rule(Duration::ZERO);
        let t0 = Instant::now();
        for i in 0..5 {
            engine.observe_at(&metrics(400.0), t0 + Duration::from_millis(i * 100));
        }
        assert_eq!(rx.try_iter().count(), 1);
    }

    #[test]
    fn interrupted_true_window_restarts_pending() {
        let (mut engine, rx) = engine_with_rule(Duration::from_secs(1));
        let t0 = Instant::now();

        engine.observe_at(&metrics(200.0), t0);
        engine.observe_at(&metrics(0.0), t0 + Duration::from_millis(600));
        // A fresh true-window must wait out the full stabilization again.
        engine.observe_at(&metrics(200.0), t0 + Duration::from_millis(700));
        engine.observe_at(&metrics(200.0), t0 + Duration::from_millis(1500));
        assert!(rx.try_recv().is_err());

        engine.observe_at(&metrics(200.0), t0 + Duration::from_millis(1800));
        assert_eq!(rx.try_iter().count(), 1);
    }

    #[test]
    fn fires_again_for_each_maximal_true_window() {
        let (mut engine, rx) = engine_with_rule(Duration::from_millis(100));
        let t0 = Instant::now();

        engine.observe_at(&metrics(200.0), t0);
        engine.observe_at(&metrics(200.0), t0 + Duration::from_millis(150));
        engine.observe_at(&metrics(0.0), t0 + Duration::from_millis(200));
        engine.observe_at(&metrics(200.0), t0 + Duration::from_millis(250));
        engine.observe_at(&metrics(200.0), t0 + Duration::from_millis(400));
        assert_eq!(rx.try_iter().count(), 2);
    }

    #[test]
    fn multiple_sinks_all_notified() {
        let (tx1, rx1) = crossbeam::channel::unbounded();
        let (tx2, rx2) = crossbeam::channel::unbounded();
        let mut engine = AlertEngine::new();
        engine.add_rule(
            Rule::new(
                "r",
                "x > 0",
                Duration::ZERO,
                vec![Sink::Channel(tx1), Sink::Log, Sink::Channel(tx2)],
            )
            .unwrap(),
        );
        let mut m = HashMap::new();
        m.insert("x".to_string(), 1.0);
        engine.observe(&m);
        assert_eq!(rx1.try_iter().count(), 1);
        assert_eq!(rx2.try_iter().count(), 1);
    }

    #[test]
    fn invalid_expression_fails_rule_construction() {
        assert!(Rule::new("r", "x >", Duration::ZERO, vec![]).is_err());
    }
}
