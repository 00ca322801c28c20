// src/dispatch/cache.rs
//
// Per-handler last-published cache. The cache is written as soon as a publish
// decision is made, whether or not the transport later accepts the message.

use std::collections::HashMap;

#[derive(Debug, Default, Clone)]
pub struct StateCache {
    text: HashMap<String, String>,
    numbers: HashMap<String, f64>,
}

impl StateCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// True (and cached) when `value` differs from the last value for `key`.
    pub fn changed(&mut self, key: &str, value: impl AsRef<str>) -> bool {
        let value = value.as_ref();
        if self.text.get(key).map(String::as_str) == Some(value) {
            return false;
        }
        self.text.insert(key.to_string(), value.to_string());
        true
    }

    /// True (and cached) on the first value, or when the absolute difference from
    /// the cached value is strictly greater than `threshold`.
    pub fn changed_by(&mut self, key: &str, value: f64, threshold: f64) -> bool {
        if let Some(last) = self.numbers.get(key) {
            if (value - last).abs() <= threshold {
                return false;
            }
        }
        self.numbers.insert(key.to_string(), value);
        true
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.text.get(key).map(String::as_str)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.numbers.get(key).copied()
    }

    pub fn forget(&mut self, key: &str) {
        self.text.remove(key);
        self.numbers.remove(key);
    }
}
