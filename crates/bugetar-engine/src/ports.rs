//! Boundaries between the engine and the systems it reads from.
//!
//! Exchange rates come through [`bugetar_query::RateSource`]; the two ports
//! here cover the aggregated rows themselves and classification names.

use std::future::Future;
use std::sync::Arc;

use bugetar_core::{ClassificationKind, Dataset};
use bugetar_query::{QueryPlan, RawAggregateRow};

use crate::error::StorageError;

/// Read-only access to the aggregated fact table.
///
/// Implementations run [`QueryPlan::statement`] and
/// [`QueryPlan::count_statement`] (or evaluate the plan directly) and must not
/// mutate anything. The engine issues both calls concurrently.
pub trait StoragePort: Send + Sync {
    /// Rows of the plan, already filtered, sorted and paginated by storage.
    /// Yearly plans return one unsorted row per group and year.
    fn execute(
        &self,
        plan: &QueryPlan,
    ) -> impl Future<Output = Result<Vec<RawAggregateRow>, StorageError>> + Send;

    /// Number of groups the plan matches, ignoring pagination.
    fn execute_count(&self, plan: &QueryPlan) -> impl Future<Output = Result<u64, StorageError>> + Send;
}

/// Classification code to name lookup.
pub trait LookupPort: Send + Sync {
    /// The name of `code` in the given scheme.
    fn classification_name(&self, kind: ClassificationKind, code: &str) -> Option<String>;
}

/// A lookup that knows no names.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLookup;

impl LookupPort for NoLookup {
    fn classification_name(&self, _kind: ClassificationKind, _code: &str) -> Option<String> {
        None
    }
}

impl LookupPort for Dataset {
    fn classification_name(&self, kind: ClassificationKind, code: &str) -> Option<String> {
        let table = match kind {
            ClassificationKind::Functional => &self.functional,
            ClassificationKind::Economic => &self.economic,
        };
        table.name(code).map(str::to_owned)
    }
}

impl<T: LookupPort + ?Sized> LookupPort for Arc<T> {
    fn classification_name(&self, kind: ClassificationKind, code: &str) -> Option<String> {
        (**self).classification_name(kind, code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dataset_lookup_picks_scheme() {
        let mut ds = Dataset::new();
        ds.functional.insert("65.02", "Invatamant");
        ds.economic.insert("10.01", "Salarii");

        assert_eq!(
            ds.classification_name(ClassificationKind::Functional, "65.02").as_deref(),
            Some("Invatamant")
        );
        assert_eq!(ds.classification_name(ClassificationKind::Economic, "65.02"), None);
        assert_eq!(
            Arc::new(ds).classification_name(ClassificationKind::Economic, "10.01").as_deref(),
            Some("Salarii")
        );
        assert_eq!(NoLookup.classification_name(ClassificationKind::Functional, "65.02"), None);
    }
}
