use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;

use klaxon_core::CheckResult;

use crate::error::CheckError;

/// A health probe. Implementations collect one observation of one local
/// resource (CPU, memory, disk, a process, a port) and report it as a
/// [`CheckResult`].
#[async_trait]
pub trait Checker: Send + Sync {
    /// Unique name of this checker within the registry.
    fn name(&self) -> &str;

    /// Execute the probe once.
    async fn run(&self) -> Result<CheckResult, CheckError>;
}

/// Process-wide checker registry.
///
/// Built at startup -- register every checker, then share behind `Arc`; the
/// registry is immutable afterwards. The skip list removes checkers from the
/// default set without unregistering them, so an explicit `include` in stage
/// config can still select them.
#[derive(Default)]
pub struct CheckerRegistry {
    checkers: Vec<Arc<dyn Checker>>,
    skip: HashSet<String>,
}

impl CheckerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a checker. Last registration wins on duplicate names.
    pub fn register(&mut self, checker: Arc<dyn Checker>) {
        self.checkers.retain(|c| c.name() != checker.name());
        self.checkers.push(checker);
    }

    /// Set the names excluded from the default enabled set.
    pub fn set_skip_list(&mut self, skip: impl IntoIterator<Item = String>) {
        self.skip = skip.into_iter().collect();
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Checker>> {
        self.checkers.iter().find(|c| c.name() == name).cloned()
    }

    /// All registered checkers, skipped or not.
    #[must_use]
    pub fn all(&self) -> Vec<Arc<dyn Checker>> {
        self.checkers.clone()
    }

    /// The default checker set: everything registered minus the skip list.
    #[must_use]
    pub fn enabled(&self) -> Vec<Arc<dyn Checker>> {
        self.checkers
            .iter()
            .filter(|c| !self.skip.contains(c.name()))
            .cloned()
            .collect()
    }

    /// Resolve the checker set for one execution. An explicit include list
    /// selects by name (bypassing the skip list); otherwise the enabled set
    /// is used. Unknown names in the include list are silently dropped; the
    /// caller decides what an empty resolution means.
    #[must_use]
    pub fn resolve(&self, include: Option<&[String]>) -> Vec<Arc<dyn Checker>> {
        match include {
            Some(names) => names
                .iter()
                .filter_map(|name| self.get(name))
                .collect(),
            None => self.enabled(),
        }
    }
}

impl std::fmt::Debug for CheckerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckerRegistry")
            .field(
                "checkers",
                &self.checkers.iter().map(|c| c.name().to_owned()).collect::<Vec<_>>(),
            )
            .field("skip", &self.skip)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::mock::StaticChecker;

    use super::*;

    fn registry() -> CheckerRegistry {
        let mut registry = CheckerRegistry::new();
        registry.register(Arc::new(StaticChecker::ok("cpu")));
        registry.register(Arc::new(StaticChecker::ok("memory")));
        registry.register(Arc::new(StaticChecker::ok("disk")));
        registry
    }

    #[test]
    fn skip_list_filters_enabled() {
        let mut registry = registry();
        registry.set_skip_list(["memory".to_owned()]);

        let enabled: Vec<_> = registry.enabled().iter().map(|c| c.name().to_owned()).collect();
        assert_eq!(enabled, vec!["cpu", "disk"]);
    }

    #[test]
    fn include_bypasses_skip_list() {
        let mut registry = registry();
        registry.set_skip_list(["memory".to_owned()]);

        let include = vec!["memory".to_owned(), "nonexistent".to_owned()];
        let resolved: Vec<_> = registry
            .resolve(Some(&include))
            .iter()
            .map(|c| c.name().to_owned())
            .collect();
        assert_eq!(resolved, vec!["memory"]);
    }

    #[test]
    fn duplicate_registration_replaces() {
        let mut registry = registry();
        registry.register(Arc::new(StaticChecker::critical("cpu", "cpu pegged")));
        assert_eq!(registry.all().len(), 3);
    }
}
