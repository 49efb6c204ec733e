use fail::FailScenario;

/// Failpoint configuration active for the lifetime of the value.
///
/// Scenarios are serialized process wide, so tests configuring failpoints never overlap.
pub struct FailpointScenario<'a> {
    _scenario: FailScenario<'a>,
    failpoints: Vec<String>,
}

impl<'a> FailpointScenario<'a> {
    /// Configures every `(failpoint, action)` pair, e.g. `("load_driver.before_row_count",
    /// "return(graceful)")`.
    pub fn setup(failpoints: &[(&str, &str)]) -> FailpointScenario<'a> {
        let scenario = FailScenario::setup();

        for (failpoint, action) in failpoints {
            if let Err(err) = fail::cfg(*failpoint, action) {
                panic!("invalid action '{action}' for failpoint '{failpoint}': {err}");
            }
        }

        Self {
            _scenario: scenario,
            failpoints: failpoints
                .iter()
                .map(|(failpoint, _)| failpoint.to_string())
                .collect(),
        }
    }
}

impl Drop for FailpointScenario<'_> {
    fn drop(&mut self) {
        for failpoint in &self.failpoints {
            fail::remove(failpoint);
        }
    }
}
