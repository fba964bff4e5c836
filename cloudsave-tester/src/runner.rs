use colored::Colorize;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use crate::scenario::Scenario;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioResult {
    pub scenario_name: String,
    pub seed: u64,
    pub passed: bool,
    pub iterations_run: usize,
    pub successful_iterations: usize,
    pub failures: Vec<String>,
    #[serde(with = "duration_serde")]
    pub average_duration: Duration,
}

pub struct ScenarioRunner {
    verbose: bool,
}

impl ScenarioRunner {
    pub const fn new(verbose: bool) -> Self {
        Self { verbose }
    }

    pub async fn run_scenario(
        &self,
        scenario: &dyn Scenario,
        seeds: &[u64],
        iterations: usize,
    ) -> Vec<ScenarioResult> {
        let mut results = Vec::with_capacity(seeds.len());
        for &seed in seeds {
            if self.verbose {
                println!(
                    "🧪 Testing scenario: {} (seed: {seed})",
                    scenario.name().bright_white()
                );
            }
            results.push(self.run_single(scenario, seed, iterations).await);
        }
        results
    }

    async fn run_single(
        &self,
        scenario: &dyn Scenario,
        seed: u64,
        iterations: usize,
    ) -> ScenarioResult {
        let mut successes = 0;
        let mut failures = Vec::new();
        let mut durations = Vec::new();

        for i in 0..iterations {
            let iteration_seed = seed.wrapping_add(u64::try_from(i).unwrap_or(u64::MAX));
            let mut rng = ChaCha20Rng::seed_from_u64(iteration_seed);
            let start = Instant::now();
            match scenario.run(&mut rng).await {
                Ok(()) => {
                    successes += 1;
                    let duration = start.elapsed();
                    durations.push(duration);
                    if self.verbose {
                        println!("  ✅ Iteration {}/{iterations} passed ({duration:?})", i + 1);
                    }
                }
                Err(err) => {
                    log::debug!("{} failed at seed {iteration_seed}: {err:#}", scenario.name());
                    if self.verbose {
                        println!(
                            "  ❌ Iteration {}/{iterations} failed: {}",
                            i + 1,
                            format!("{err:#}").red()
                        );
                    }
                    failures.push(format!(
                        "Iteration {} (seed {iteration_seed}): {err:#}",
                        i + 1
                    ));
                }
            }
        }

        let average_duration = if durations.is_empty() {
            Duration::ZERO
        } else {
            durations.iter().sum::<Duration>() / u32::try_from(durations.len()).unwrap_or(1)
        };

        ScenarioResult {
            scenario_name: scenario.name().to_string(),
            seed,
            passed: failures.is_empty(),
            iterations_run: iterations,
            successful_iterations: successes,
            failures,
            average_duration,
        }
    }
}

mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_micros().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let micros = u128::deserialize(deserializer)?;
        Ok(Duration::from_micros(u64::try_from(micros).unwrap_or(0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{Result, bail};
    use rand::Rng;

    struct AlwaysPasses;

    #[async_trait::async_trait]
    impl Scenario for AlwaysPasses {
        fn name(&self) -> &'static str {
            "Always Passes"
        }

        async fn run(&self, rng: &mut ChaCha20Rng) -> Result<()> {
            let _ = rng.r#gen::<u8>();
            Ok(())
        }
    }

    struct AlwaysFails;

    #[async_trait::async_trait]
    impl Scenario for AlwaysFails {
        fn name(&self) -> &'static str {
            "Always Fails"
        }

        async fn run(&self, _rng: &mut ChaCha20Rng) -> Result<()> {
            bail!("boom")
        }
    }

    #[tokio::test]
    async fn passing_scenario_reports_every_iteration() {
        let runner = ScenarioRunner::new(false);
        let results = runner.run_scenario(&AlwaysPasses, &[1, 2], 3).await;
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.passed));
        assert_eq!(results[0].successful_iterations, 3);
        assert_eq!(results[1].seed, 2);
    }

    #[tokio::test]
    async fn failures_name_the_replay_seed() {
        let runner = ScenarioRunner::new(false);
        let results = runner.run_scenario(&AlwaysFails, &[40], 2).await;
        let result = &results[0];
        assert!(!result.passed);
        assert_eq!(result.successful_iterations, 0);
        assert_eq!(result.average_duration, Duration::ZERO);
        assert_eq!(result.failures[1], "Iteration 2 (seed 41): boom");
    }

    #[test]
    fn result_serializes_duration_as_micros() {
        let result = ScenarioResult {
            scenario_name: "x".to_string(),
            seed: 1,
            passed: true,
            iterations_run: 1,
            successful_iterations: 1,
            failures: Vec::new(),
            average_duration: Duration::from_millis(2),
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["average_duration"], 2000);
    }
}
