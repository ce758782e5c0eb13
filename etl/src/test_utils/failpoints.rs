use fail::FailScenario;

/// Configures fail points for as long as the value lives.
///
/// Holding the [`FailScenario`] serializes the tests that use fail points. Dropping the value
/// turns every configured fail point off, which also resumes runs paused on one of them.
pub struct CustomFailScenario<'a> {
    _scenario: FailScenario<'a>,
    names: Vec<String>,
}

impl CustomFailScenario<'_> {
    /// Applies each `(fail point, action)` pair, e.g. `("load.before_commit", "return(quota)")`.
    pub fn setup(failpoints: &[(&str, &str)]) -> Self {
        let scenario = FailScenario::setup();
        for (name, action) in failpoints {
            if let Err(err) = fail::cfg(*name, action) {
                panic!("invalid action `{action}` for fail point `{name}`: {err}");
            }
        }

        Self {
            _scenario: scenario,
            names: failpoints.iter().map(|(name, _)| name.to_string()).collect(),
        }
    }

    pub fn teardown(self) {}
}

impl Drop for CustomFailScenario<'_> {
    fn drop(&mut self) {
        for name in &self.names {
            let _ = fail::cfg(name.as_str(), "off");
        }
    }
}
