//! Selection strategies over a candidate set.
//!
//! A strategy takes the candidates for one `(component, method)` pair and
//! picks exactly one, or fails. Strategies are pure; ties break by insertion
//! order because the comparisons below keep the first maximum.

use std::sync::Arc;

use crate::error::RegistryError;
use crate::registration::Registration;

/// A selection policy over method candidates.
pub trait Strategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn select(
        &self,
        candidates: &[Arc<Registration>],
    ) -> Result<Arc<Registration>, RegistryError>;
}

fn no_candidate(candidates: &[Arc<Registration>]) -> RegistryError {
    // All built-ins receive a non-empty candidate slice from the registry;
    // an empty one can only come from direct strategy use.
    match candidates.first() {
        Some(first) => RegistryError::NoCandidate {
            component: first.component.clone(),
            method: first.method.clone(),
        },
        None => RegistryError::NoCandidate {
            component: String::new(),
            method: String::new(),
        },
    }
}

/// Keeps the first maximum under `key`, so insertion order breaks ties.
fn max_by_key<K: Ord>(
    candidates: impl Iterator<Item = Arc<Registration>>,
    key: impl Fn(&Registration) -> K,
) -> Option<Arc<Registration>> {
    let mut best: Option<(K, Arc<Registration>)> = None;
    for cand in candidates {
        let k = key(&cand);
        match &best {
            Some((bk, _)) if *bk >= k => {}
            _ => best = Some((k, cand)),
        }
    }
    best.map(|(_, c)| c)
}

/// Non-deprecated candidates, falling back to the full set when everything
/// is deprecated (a fully deprecated method is still callable).
fn active(candidates: &[Arc<Registration>]) -> Vec<Arc<Registration>> {
    let live: Vec<Arc<Registration>> = candidates
        .iter()
        .filter(|c| !c.deprecated)
        .cloned()
        .collect();
    if live.is_empty() {
        candidates.to_vec()
    } else {
        live
    }
}

/// `default`: priority desc, then version desc, then non-deprecated first.
pub struct DefaultStrategy;

impl Strategy for DefaultStrategy {
    fn name(&self) -> &'static str {
        "default"
    }

    fn select(
        &self,
        candidates: &[Arc<Registration>],
    ) -> Result<Arc<Registration>, RegistryError> {
        max_by_key(active(candidates).into_iter(), |r| {
            (r.priority, r.version.clone(), !r.deprecated)
        })
        .ok_or_else(|| no_candidate(candidates))
    }
}

/// `latest`: highest version, deprecated excluded.
pub struct LatestStrategy;

impl Strategy for LatestStrategy {
    fn name(&self) -> &'static str {
        "latest"
    }

    fn select(
        &self,
        candidates: &[Arc<Registration>],
    ) -> Result<Arc<Registration>, RegistryError> {
        max_by_key(active(candidates).into_iter(), |r| r.version.clone())
            .ok_or_else(|| no_candidate(candidates))
    }
}

/// `stable`: pre-release versions excluded, then the default rule.
pub struct StableStrategy;

impl Strategy for StableStrategy {
    fn name(&self) -> &'static str {
        "stable"
    }

    fn select(
        &self,
        candidates: &[Arc<Registration>],
    ) -> Result<Arc<Registration>, RegistryError> {
        let released: Vec<Arc<Registration>> = candidates
            .iter()
            .filter(|c| !c.version.is_prerelease())
            .cloned()
            .collect();
        let pool = if released.is_empty() {
            candidates.to_vec()
        } else {
            released
        };
        DefaultStrategy.select(&pool)
    }
}

/// `priority`: strictly by priority, version as tiebreak.
pub struct PriorityStrategy;

impl Strategy for PriorityStrategy {
    fn name(&self) -> &'static str {
        "priority"
    }

    fn select(
        &self,
        candidates: &[Arc<Registration>],
    ) -> Result<Arc<Registration>, RegistryError> {
        max_by_key(candidates.iter().cloned(), |r| {
            (r.priority, r.version.clone())
        })
        .ok_or_else(|| no_candidate(candidates))
    }
}

/// `engine_override`: the candidate whose engine matches the caller's tag.
pub struct EngineOverrideStrategy {
    pub engine: String,
}

impl Strategy for EngineOverrideStrategy {
    fn name(&self) -> &'static str {
        "engine_override"
    }

    fn select(
        &self,
        candidates: &[Arc<Registration>],
    ) -> Result<Arc<Registration>, RegistryError> {
        candidates
            .iter()
            .find(|c| c.engine == self.engine)
            .cloned()
            .ok_or_else(|| match candidates.first() {
                Some(first) => RegistryError::EngineNotFound {
                    component: first.component.clone(),
                    engine: self.engine.clone(),
                    method: first.method.clone(),
                },
                None => no_candidate(candidates),
            })
    }
}

/// Resolves a strategy by name. `engine_override` requires the preferred
/// engine tag.
pub fn resolve_strategy(
    name: &str,
    preferred_engine: Option<&str>,
) -> Result<Box<dyn Strategy>, RegistryError> {
    match name {
        "default" => Ok(Box::new(DefaultStrategy)),
        "latest" => Ok(Box::new(LatestStrategy)),
        "stable" => Ok(Box::new(StableStrategy)),
        "priority" => Ok(Box::new(PriorityStrategy)),
        "engine_override" => match preferred_engine {
            Some(engine) => Ok(Box::new(EngineOverrideStrategy {
                engine: engine.to_string(),
            })),
            None => Err(RegistryError::UnknownStrategy {
                name: "engine_override (missing engine tag)".to_string(),
            }),
        },
        other => Err(RegistryError::UnknownStrategy {
            name: other.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registration::fn_method;
    use strata_core::Value;

    fn reg(engine: &str, version: &str, priority: i32, deprecated: bool) -> Arc<Registration> {
        let mut r = Registration::new("t", "m", engine, fn_method(|_| Ok(Value::Null)))
            .with_version(version)
            .with_priority(priority);
        if deprecated {
            r = r.deprecated();
        }
        Arc::new(r)
    }

    #[test]
    fn default_prefers_priority_then_version() {
        let cands = vec![
            reg("a", "3.0.0", 1, false),
            reg("b", "1.0.0", 5, false),
            reg("c", "2.0.0", 5, false),
        ];
        assert_eq!(DefaultStrategy.select(&cands).unwrap().engine, "c");
    }

    #[test]
    fn default_excludes_deprecated_when_possible() {
        let cands = vec![reg("a", "1.0.0", 10, true), reg("b", "1.0.0", 1, false)];
        assert_eq!(DefaultStrategy.select(&cands).unwrap().engine, "b");
        // all deprecated -> still selectable
        let cands = vec![reg("a", "1.0.0", 10, true), reg("b", "1.0.0", 1, true)];
        assert_eq!(DefaultStrategy.select(&cands).unwrap().engine, "a");
    }

    #[test]
    fn default_breaks_ties_by_insertion_order() {
        let cands = vec![reg("first", "1.0.0", 1, false), reg("second", "1.0.0", 1, false)];
        assert_eq!(DefaultStrategy.select(&cands).unwrap().engine, "first");
    }

    #[test]
    fn latest_ignores_priority() {
        let cands = vec![reg("a", "1.5.0", 99, false), reg("b", "2.0.0", 0, false)];
        assert_eq!(LatestStrategy.select(&cands).unwrap().engine, "b");
    }

    #[test]
    fn stable_excludes_prerelease() {
        let cands = vec![reg("a", "2.0.0-rc.1", 9, false), reg("b", "1.0.0", 0, false)];
        assert_eq!(StableStrategy.select(&cands).unwrap().engine, "b");
        // only prereleases -> fall back to the full set
        let cands = vec![reg("a", "2.0.0-rc.1", 0, false)];
        assert_eq!(StableStrategy.select(&cands).unwrap().engine, "a");
    }

    #[test]
    fn priority_includes_deprecated() {
        let cands = vec![reg("a", "1.0.0", 10, true), reg("b", "1.0.0", 1, false)];
        assert_eq!(PriorityStrategy.select(&cands).unwrap().engine, "a");
    }

    #[test]
    fn engine_override_exact_match() {
        let cands = vec![reg("a", "1.0.0", 0, false), reg("b", "1.0.0", 0, false)];
        let strat = EngineOverrideStrategy {
            engine: "b".to_string(),
        };
        assert_eq!(strat.select(&cands).unwrap().engine, "b");
        let strat = EngineOverrideStrategy {
            engine: "zzz".to_string(),
        };
        assert!(matches!(
            strat.select(&cands),
            Err(RegistryError::EngineNotFound { .. })
        ));
    }

    #[test]
    fn resolve_by_name() {
        assert!(resolve_strategy("default", None).is_ok());
        assert!(resolve_strategy("latest", None).is_ok());
        assert!(resolve_strategy("engine_override", Some("x")).is_ok());
        assert!(matches!(
            resolve_strategy("engine_override", None),
            Err(RegistryError::UnknownStrategy { .. })
        ));
        assert!(matches!(
            resolve_strategy("fastest", None),
            Err(RegistryError::UnknownStrategy { .. })
        ));
    }

    #[test]
    fn strategy_totality_with_one_live_candidate() {
        let cands = vec![reg("only", "0.1.0", 0, false)];
        for name in ["default", "latest", "stable", "priority"] {
            let strat = resolve_strategy(name, None).unwrap();
            assert_eq!(strat.select(&cands).unwrap().engine, "only", "{name}");
        }
    }
}
