/// Runtime configuration for an access engine instance.
#[derive(Debug, Clone)]
pub struct RowgateConfig {
    /// Bound on the per-document session evaluator side-table. Evaluators for
    /// the least recently active sessions are dropped once the bound is hit;
    /// a dropped evaluator is rebuilt on next use.
    pub session_cache_capacity: usize,
    pub max_rule_count: usize,
    pub max_attribute_rules: usize,
    /// Log predicate failures at warn. Failures are treated as non-matching
    /// either way; this only controls the noise.
    pub log_rule_errors: bool,
}

impl Default for RowgateConfig {
    fn default() -> Self {
        Self {
            session_cache_capacity: 1024,
            max_rule_count: 2048,
            max_attribute_rules: 64,
            log_rule_errors: true,
        }
    }
}

impl RowgateConfig {
    pub fn with_session_cache_capacity(mut self, capacity: usize) -> Self {
        self.session_cache_capacity = capacity.max(1);
        self
    }

    pub fn with_max_rule_count(mut self, count: usize) -> Self {
        self.max_rule_count = count;
        self
    }

    pub fn with_max_attribute_rules(mut self, count: usize) -> Self {
        self.max_attribute_rules = count;
        self
    }

    pub fn quiet() -> Self {
        Self {
            log_rule_errors: false,
            ..Self::default()
        }
    }
}
