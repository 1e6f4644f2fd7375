use super::{ProbeError, Prober};
use async_trait::async_trait;
use rand::Rng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Scripted prober for tests. Each url answers from its script in order and
/// repeats the last entry once the script runs out; unscripted urls succeed.
#[derive(Default)]
pub struct FakeProber {
    scripts: HashMap<String, Vec<Result<u16, ProbeError>>>,
    calls: Mutex<HashMap<String, usize>>,
    total: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    min_delay_ms: u64,
    max_delay_ms: u64,
}

impl FakeProber {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(mut self, url: &str, outcomes: Vec<Result<u16, ProbeError>>) -> Self {
        self.scripts.insert(url.to_string(), outcomes);
        self
    }

    pub fn with_random_delay_ms(mut self, max_delay_ms: u64) -> Self {
        self.min_delay_ms = 1;
        self.max_delay_ms = max_delay_ms;
        self
    }

    pub fn with_fixed_delay_ms(mut self, delay_ms: u64) -> Self {
        self.min_delay_ms = delay_ms;
        self.max_delay_ms = delay_ms;
        self
    }

    pub fn calls(&self, url: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .get(url)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Prober for FakeProber {
    async fn probe(&self, url: &str) -> Result<u16, ProbeError> {
        let attempt = {
            let mut calls = self.calls.lock().unwrap();
            let entry = calls.entry(url.to_string()).or_default();
            *entry += 1;
            *entry
        };
        self.total.fetch_add(1, Ordering::SeqCst);

        let now_in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now_in_flight, Ordering::SeqCst);
        if self.max_delay_ms > 0 {
            let delay = rand::thread_rng()
                .gen_range(self.min_delay_ms.max(1)..=self.max_delay_ms);
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match self.scripts.get(url) {
            Some(script) if !script.is_empty() => {
                let idx = (attempt - 1).min(script.len() - 1);
                script[idx].clone()
            }
            _ => Ok(200),
        }
    }
}
