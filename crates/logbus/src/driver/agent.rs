// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Cooperative agents and their runners.
//!
//! Each driver role (conductor, sender, receiver) is an [`Agent`] duty
//! cycled by an [`AgentRunner`] thread with a pluggable idle strategy.
//! [`CompositeAgent`] folds several roles onto one thread for the shared
//! threading modes.

use crate::concurrent::idle::IdleStrategy;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// A cooperatively scheduled duty-cycle worker.
pub trait Agent: Send {
    /// Thread/diagnostic name.
    fn role_name(&self) -> &'static str;

    /// Called once on the agent thread before the first duty cycle.
    fn on_start(&mut self) {}

    /// One duty cycle; returns the amount of work done (0 idles).
    fn do_work(&mut self) -> usize;

    /// Called once on the agent thread after the stop signal.
    fn on_close(&mut self) {}
}

/// Runs an agent on its own thread until closed.
pub struct AgentRunner {
    role_name: String,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl AgentRunner {
    /// Spawn the agent thread.
    ///
    /// # Errors
    ///
    /// Propagates thread spawn failure.
    pub fn start(
        mut agent: Box<dyn Agent>,
        idle_strategy: IdleStrategy,
    ) -> std::io::Result<Self> {
        let role_name = agent.role_name().to_string();
        let running = Arc::new(AtomicBool::new(true));
        let running_for_thread = Arc::clone(&running);

        let thread = std::thread::Builder::new()
            .name(role_name.clone())
            .spawn(move || {
                agent.on_start();
                let mut idle_state = idle_strategy.new_state();

                while running_for_thread.load(Ordering::Acquire) {
                    let work_count = agent.do_work();
                    idle_strategy.idle(&mut idle_state, work_count);
                }

                agent.on_close();
            })?;

        log::debug!("[AgentRunner] started '{}'", role_name);

        Ok(Self {
            role_name,
            running,
            thread: Some(thread),
        })
    }

    /// Signal the stop flag and join the agent thread.
    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("[AgentRunner] '{}' panicked", self.role_name);
            } else {
                log::debug!("[AgentRunner] '{}' stopped", self.role_name);
            }
        }
    }
}

impl Drop for AgentRunner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Several agents duty cycled in turn on one thread.
pub struct CompositeAgent {
    role_name: &'static str,
    agents: Vec<Box<dyn Agent>>,
}

impl CompositeAgent {
    #[must_use]
    pub fn new(role_name: &'static str, agents: Vec<Box<dyn Agent>>) -> Self {
        Self { role_name, agents }
    }
}

impl Agent for CompositeAgent {
    fn role_name(&self) -> &'static str {
        self.role_name
    }

    fn on_start(&mut self) {
        for agent in &mut self.agents {
            agent.on_start();
        }
    }

    fn do_work(&mut self) -> usize {
        self.agents.iter_mut().map(|agent| agent.do_work()).sum()
    }

    fn on_close(&mut self) {
        for agent in &mut self.agents {
            agent.on_close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct CountingAgent {
        cycles: Arc<AtomicUsize>,
        started: Arc<AtomicBool>,
        closed: Arc<AtomicBool>,
    }

    impl Agent for CountingAgent {
        fn role_name(&self) -> &'static str {
            "counting-agent"
        }

        fn on_start(&mut self) {
            self.started.store(true, Ordering::SeqCst);
        }

        fn do_work(&mut self) -> usize {
            self.cycles.fetch_add(1, Ordering::SeqCst);
            0
        }

        fn on_close(&mut self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_runner_cycles_and_closes() {
        let cycles = Arc::new(AtomicUsize::new(0));
        let started = Arc::new(AtomicBool::new(false));
        let closed = Arc::new(AtomicBool::new(false));

        let runner = AgentRunner::start(
            Box::new(CountingAgent {
                cycles: Arc::clone(&cycles),
                started: Arc::clone(&started),
                closed: Arc::clone(&closed),
            }),
            IdleStrategy::Yielding,
        )
        .expect("start");

        while cycles.load(Ordering::SeqCst) < 10 {
            std::thread::sleep(Duration::from_millis(1));
        }

        runner.close();
        assert!(started.load(Ordering::SeqCst));
        assert!(closed.load(Ordering::SeqCst));
    }

    #[test]
    fn test_composite_sums_work() {
        struct FixedWork(usize);
        impl Agent for FixedWork {
            fn role_name(&self) -> &'static str {
                "fixed"
            }
            fn do_work(&mut self) -> usize {
                self.0
            }
        }

        let mut composite = CompositeAgent::new(
            "driver-shared",
            vec![Box::new(FixedWork(2)), Box::new(FixedWork(3))],
        );
        assert_eq!(composite.do_work(), 5);
    }
}
