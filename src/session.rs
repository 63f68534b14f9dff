//! Request-scoped entry point tying sources, aggregation and comparison
//! together.
//!
//! A session fetches the hierarchy, the itinerary catalogue and each
//! itinerary's submissions at most once and computes every result at most
//! once. Nothing is shared between sessions.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{EngineError, EngineResult};
use crate::hierarchy::{EntityId, Hierarchy, RejectedEntity};
use crate::indicators::aggregate::{Aggregator, ResultSet};
use crate::indicators::compare::{BreakdownRow, Comparator, ResultStore, TrendPoint};
use crate::indicators::registry::Registry;
use crate::indicators::types::IndicatorResult;
use crate::services::source::{HierarchyProvider, SubmissionSource};
use crate::snapshot::{RejectedSubmission, Snapshot};
use crate::submission::{Itinerary, ItineraryId};

pub struct ReportSession {
    source: Arc<dyn SubmissionSource>,
    hierarchy_provider: Arc<dyn HierarchyProvider>,
    registry: Arc<Registry>,
    scope: Option<EntityId>,
    fetch_timeout: Duration,
    hierarchy: Option<Arc<Hierarchy>>,
    catalogue_loaded: bool,
    snapshots: HashMap<ItineraryId, Arc<Snapshot>>,
    store: ResultStore,
}

impl ReportSession {
    pub fn new(
        source: Arc<dyn SubmissionSource>,
        hierarchy_provider: Arc<dyn HierarchyProvider>,
        registry: Arc<Registry>,
    ) -> Self {
        Self {
            source,
            hierarchy_provider,
            registry,
            scope: None,
            fetch_timeout: Duration::from_secs(30),
            hierarchy: None,
            catalogue_loaded: false,
            snapshots: HashMap::new(),
            store: ResultStore::default(),
        }
    }

    /// Restricts every fetch to the subtree of `scope`.
    pub fn with_scope(mut self, scope: EntityId) -> Self {
        self.scope = Some(scope);
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Value of one indicator for one entity and itinerary.
    #[tracing::instrument(skip(self))]
    pub async fn get_indicator_result(
        &mut self,
        itinerary: &ItineraryId,
        indicator_key: &str,
        entity: &EntityId,
    ) -> EngineResult<IndicatorResult> {
        self.ensure_computed(itinerary, indicator_key, entity).await?;
        self.store
            .get(itinerary, indicator_key, entity)
            .cloned()
            .ok_or_else(|| EngineError::EntityNotFound { id: entity.clone() })
    }

    /// Children of `parent` ranked by the indicator's value.
    #[tracing::instrument(skip(self))]
    pub async fn get_breakdown(
        &mut self,
        itinerary: &ItineraryId,
        indicator_key: &str,
        parent: &EntityId,
    ) -> EngineResult<Vec<BreakdownRow>> {
        self.ensure_computed(itinerary, indicator_key, parent).await?;
        let hierarchy = self.hierarchy().await?;
        Comparator::new(&self.store, &hierarchy).breakdown(itinerary, indicator_key, parent)
    }

    /// The indicator for `entity` across the `limit` most recent itineraries.
    #[tracing::instrument(skip(self))]
    pub async fn get_trend(
        &mut self,
        indicator_key: &str,
        entity: &EntityId,
        limit: usize,
    ) -> EngineResult<Vec<TrendPoint>> {
        self.registry.get(indicator_key)?;
        let recent: Vec<ItineraryId> = {
            let catalogue = self.itineraries().await?;
            let skip = catalogue.len().saturating_sub(limit);
            catalogue[skip..].iter().map(|itinerary| itinerary.id.clone()).collect()
        };

        for itinerary in &recent {
            self.ensure_computed(itinerary, indicator_key, entity).await?;
        }

        let hierarchy = self.hierarchy().await?;
        Ok(Comparator::new(&self.store, &hierarchy).trend(indicator_key, entity, limit))
    }

    /// Every registered indicator for `entity` and its descendants.
    #[tracing::instrument(skip(self))]
    pub async fn report(
        &mut self,
        itinerary: &ItineraryId,
        entity: &EntityId,
    ) -> EngineResult<Vec<ResultSet>> {
        let snapshot = self.snapshot(itinerary).await?;
        let registry = self.registry.clone();
        let aggregator = Aggregator::new(&registry, &snapshot);

        let mut sets = Vec::with_capacity(registry.len());
        for definition in registry.iter() {
            let set = aggregator.compute(&definition.key, entity)?;
            self.store.insert(set.clone());
            sets.push(set);
        }

        info!(indicators = sets.len(), "Report computed");
        Ok(sets)
    }

    /// Submissions of `itinerary` left out of the snapshot, with the reason.
    pub async fn rejected(&mut self, itinerary: &ItineraryId) -> EngineResult<Vec<RejectedSubmission>> {
        Ok(self.snapshot(itinerary).await?.rejected().to_vec())
    }

    /// Hierarchy records left out of the tree, with the reason.
    pub async fn rejected_entities(&mut self) -> EngineResult<Vec<RejectedEntity>> {
        Ok(self.hierarchy().await?.rejected().to_vec())
    }

    /// Itinerary catalogue, oldest first.
    pub async fn itineraries(&mut self) -> EngineResult<&[Itinerary]> {
        if !self.catalogue_loaded {
            let source = self.source.clone();
            let itineraries = self
                .bounded("fetching itineraries", source.fetch_itineraries())
                .await?;
            debug!(count = itineraries.len(), "Itinerary catalogue loaded");
            self.store = ResultStore::new(itineraries);
            self.catalogue_loaded = true;
        }
        Ok(self.store.itineraries())
    }

    async fn hierarchy(&mut self) -> EngineResult<Arc<Hierarchy>> {
        if let Some(hierarchy) = &self.hierarchy {
            return Ok(hierarchy.clone());
        }

        let provider = self.hierarchy_provider.clone();
        let records = self
            .bounded(
                "fetching hierarchy",
                provider.fetch_hierarchy(self.scope.as_ref()),
            )
            .await?;
        let hierarchy = Arc::new(Hierarchy::build(records)?);
        debug!(
            entities = hierarchy.len(),
            rejected = hierarchy.rejected().len(),
            "Hierarchy loaded"
        );

        self.hierarchy = Some(hierarchy.clone());
        Ok(hierarchy)
    }

    async fn snapshot(&mut self, itinerary: &ItineraryId) -> EngineResult<Arc<Snapshot>> {
        if let Some(snapshot) = self.snapshots.get(itinerary) {
            return Ok(snapshot.clone());
        }

        self.itineraries().await?;
        if self.store.itinerary(itinerary).is_none() {
            return Err(EngineError::UnknownItinerary {
                id: itinerary.clone(),
            });
        }

        let hierarchy = self.hierarchy().await?;
        let source = self.source.clone();
        let submissions = self
            .bounded(
                "fetching submissions",
                source.fetch_submissions(itinerary, self.scope.as_ref(), None),
            )
            .await?;

        let snapshot = Arc::new(Snapshot::new(itinerary.clone(), hierarchy, submissions));
        self.snapshots.insert(itinerary.clone(), snapshot.clone());
        Ok(snapshot)
    }

    async fn ensure_computed(
        &mut self,
        itinerary: &ItineraryId,
        indicator_key: &str,
        entity: &EntityId,
    ) -> EngineResult<()> {
        self.registry.get(indicator_key)?;
        let snapshot = self.snapshot(itinerary).await?;
        if self.store.contains(itinerary, indicator_key, entity) {
            return Ok(());
        }

        let set = Aggregator::new(&self.registry, &snapshot).compute(indicator_key, entity)?;
        self.store.insert(set);
        Ok(())
    }

    /// Runs one external fetch under the session's timeout.
    async fn bounded<T>(
        &self,
        context: &str,
        fetch: impl Future<Output = anyhow::Result<T>>,
    ) -> EngineResult<T> {
        match tokio::time::timeout(self.fetch_timeout, fetch).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(source)) => Err(EngineError::Source {
                context: context.to_string(),
                source,
            }),
            Err(_) => Err(EngineError::Timeout {
                context: context.to_string(),
                timeout: self.fetch_timeout,
            }),
        }
    }
}
