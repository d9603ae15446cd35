//! Request target selection.

use rand::Rng;
use reqwest::Method;

use crate::config::{parse_method, TestConfiguration, WEIGHT_TOTAL};
use crate::error::EngineResult;

/// One resolved request destination.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestTarget {
    /// Endpoint string or scenario name; keys per-target statistics.
    pub id: String,
    pub url: String,
    pub method: Method,
}

/// Picks the target for each issued request.
#[derive(Debug, Clone)]
pub enum TargetSelector {
    /// Uniform-random over endpoints (no weights configured).
    Uniform(Vec<RequestTarget>),
    /// Cumulative-weight draw over scenarios.
    Weighted {
        targets: Vec<RequestTarget>,
        cumulative: Vec<f64>,
    },
}

impl TargetSelector {
    /// Build a selector from a configuration.
    ///
    /// Scenarios take precedence over plain endpoints when both are set.
    pub fn from_config(config: &TestConfiguration) -> EngineResult<Self> {
        if config.scenarios.is_empty() {
            let method = parse_method(&config.method)?;
            let targets = config
                .endpoints
                .iter()
                .map(|endpoint| RequestTarget {
                    id: endpoint.clone(),
                    url: config.resolve_url(endpoint),
                    method: method.clone(),
                })
                .collect();
            return Ok(TargetSelector::Uniform(targets));
        }

        let mut targets = Vec::with_capacity(config.scenarios.len());
        let mut cumulative = Vec::with_capacity(config.scenarios.len());
        let mut sum = 0.0;
        for scenario in &config.scenarios {
            let method = parse_method(scenario.method.as_deref().unwrap_or(&config.method))?;
            targets.push(RequestTarget {
                id: scenario.name.clone(),
                url: config.resolve_url(&scenario.endpoint),
                method,
            });
            sum += scenario.weight;
            cumulative.push(sum);
        }
        Ok(TargetSelector::Weighted {
            targets,
            cumulative,
        })
    }

    pub fn targets(&self) -> &[RequestTarget] {
        match self {
            TargetSelector::Uniform(targets) => targets,
            TargetSelector::Weighted { targets, .. } => targets,
        }
    }

    /// Draw the next target.
    pub fn pick<R: Rng + ?Sized>(&self, rng: &mut R) -> &RequestTarget {
        match self {
            TargetSelector::Uniform(targets) => &targets[rng.gen_range(0..targets.len())],
            TargetSelector::Weighted {
                targets,
                cumulative,
            } => {
                let draw = rng.gen::<f64>() * WEIGHT_TOTAL;
                &targets[weighted_index(cumulative, draw)]
            }
        }
    }
}

/// Index of the first bucket whose cumulative weight exceeds `draw`.
///
/// Draws past the final cumulative weight fall back to index 0.
pub fn weighted_index(cumulative: &[f64], draw: f64) -> usize {
    cumulative
        .iter()
        .position(|&cum| draw < cum)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScenarioConfig;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn scenario(name: &str, weight: f64) -> ScenarioConfig {
        ScenarioConfig {
            name: name.to_string(),
            endpoint: format!("/{}", name),
            weight,
            method: None,
        }
    }

    #[test]
    fn test_weighted_index_boundaries() {
        let cumulative = [80.0, 100.0];
        assert_eq!(weighted_index(&cumulative, 0.0), 0);
        assert_eq!(weighted_index(&cumulative, 79.99), 0);
        assert_eq!(weighted_index(&cumulative, 80.0), 1);
        assert_eq!(weighted_index(&cumulative, 99.99), 1);
    }

    #[test]
    fn test_weighted_index_falls_back_to_first() {
        // Weights summing to 60 leave draws in [60, 100) uncovered.
        let cumulative = [30.0, 60.0];
        assert_eq!(weighted_index(&cumulative, 75.0), 0);
        assert_eq!(weighted_index(&[], 10.0), 0);
    }

    #[test]
    fn test_weighted_frequencies_match_weights() {
        let config = TestConfiguration {
            scenarios: vec![
                scenario("browse", 50.0),
                scenario("search", 30.0),
                scenario("checkout", 15.0),
                scenario("login", 5.0),
            ],
            ..Default::default()
        };
        let selector = TargetSelector::from_config(&config).unwrap();
        let mut rng = StdRng::seed_from_u64(42);

        let draws = 100_000;
        let mut counts = [0usize; 4];
        for _ in 0..draws {
            let target = selector.pick(&mut rng);
            let idx = selector
                .targets()
                .iter()
                .position(|t| t.id == target.id)
                .unwrap();
            counts[idx] += 1;
        }

        for (count, expected) in counts.iter().zip([50.0, 30.0, 15.0, 5.0]) {
            let observed = *count as f64 / draws as f64 * 100.0;
            assert!(
                (observed - expected).abs() <= 2.0,
                "observed {:.2}% for weight {}",
                observed,
                expected
            );
        }
    }

    #[test]
    fn test_uniform_selection_covers_all_endpoints() {
        let config = TestConfiguration {
            base_url: Some("http://localhost:9000".to_string()),
            endpoints: vec!["/a".to_string(), "/b".to_string(), "/c".to_string()],
            ..Default::default()
        };
        let selector = TargetSelector::from_config(&config).unwrap();
        assert!(matches!(selector, TargetSelector::Uniform(_)));

        let mut rng = StdRng::seed_from_u64(7);
        let mut seen = std::collections::HashSet::new();
        for _ in 0..1_000 {
            seen.insert(selector.pick(&mut rng).url.clone());
        }
        assert_eq!(seen.len(), 3);
        assert!(seen.contains("http://localhost:9000/b"));
    }

    #[test]
    fn test_scenario_method_overrides_default() {
        let mut post = scenario("submit", 100.0);
        post.method = Some("post".to_string());
        let config = TestConfiguration {
            scenarios: vec![post],
            ..Default::default()
        };
        let selector = TargetSelector::from_config(&config).unwrap();
        assert_eq!(selector.targets()[0].method, Method::POST);
    }
}
