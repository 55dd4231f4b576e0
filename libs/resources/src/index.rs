use crate::category::{ProviderId, ResourceCategory};
use crate::inventory::{Inventory, InventoryError, InventoryQuery, TaggedResource};
use crate::tags::DiscoveryTag;
use membrane_telemetry::{DISCOVERY_TOTAL, TelemetryLabels, record_counter};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, info, warn};

/// Resources requested per inventory page.
pub const PAGE_SIZE: i32 = 100;

/// Type tag value marking an API as a transparent HTTP proxy.
pub const HTTP_PROXY_KIND: &str = "http-proxy";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRecord {
    pub logical_name: String,
    pub provider_id: String,
    /// Value of the deployment's type tag, when present.
    pub kind: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiMode {
    /// Every request goes to the generic HTTP handler with its path untouched.
    Proxy,
    DeclaredRoutes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiTarget {
    pub name: String,
    pub mode: ApiMode,
}

#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("resource discovery failed: {source}")]
    Discovery {
        #[source]
        source: InventoryError,
    },
    #[error("{category} name {name:?} is claimed by both {first} and {second}")]
    AmbiguousName {
        category: ResourceCategory,
        name: String,
        first: String,
        second: String,
    },
    #[error("no {category} resource matches {reference}")]
    NotFound {
        category: ResourceCategory,
        reference: String,
    },
}

impl ResourceError {
    pub fn kind(&self) -> &'static str {
        match self {
            ResourceError::Discovery { .. } => "discovery",
            ResourceError::AmbiguousName { .. } => "ambiguous_name",
            ResourceError::NotFound { .. } => "not_found",
        }
    }

    fn not_found(category: ResourceCategory, reference: &str) -> Self {
        ResourceError::NotFound {
            category,
            reference: reference.to_string(),
        }
    }
}

/// A fully populated, immutable view of the deployment's resources.
#[derive(Debug, Default)]
pub struct Snapshot {
    by_category: BTreeMap<ResourceCategory, BTreeMap<String, ResourceRecord>>,
    by_provider_id: HashMap<String, (ResourceCategory, String)>,
}

impl Snapshot {
    pub fn records(&self, category: ResourceCategory) -> BTreeMap<String, ResourceRecord> {
        self.by_category.get(&category).cloned().unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.by_provider_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_provider_id.is_empty()
    }

    /// Logical name of the resource with this provider identifier.
    pub fn logical_name(&self, provider_id: &str) -> Result<&str, ResourceError> {
        let category = ResourceCategory::from_provider_id(provider_id);
        match self.by_provider_id.get(provider_id) {
            Some((found, name)) if *found == category => Ok(name.as_str()),
            _ => Err(ResourceError::not_found(category, provider_id)),
        }
    }

    /// Finds the API whose identifier ends in `/{api_id}`.
    pub fn api_by_id(&self, api_id: &str) -> Result<ApiTarget, ResourceError> {
        self.by_category
            .get(&ResourceCategory::Api)
            .into_iter()
            .flat_map(|records| records.values())
            .find(|record| {
                ProviderId::parse(&record.provider_id)
                    .is_some_and(|id| !api_id.is_empty() && id.resource_tail() == api_id)
            })
            .map(|record| ApiTarget {
                name: record.logical_name.clone(),
                mode: if record.kind.as_deref() == Some(HTTP_PROXY_KIND) {
                    ApiMode::Proxy
                } else {
                    ApiMode::DeclaredRoutes
                },
            })
            .ok_or_else(|| ResourceError::not_found(ResourceCategory::Api, api_id))
    }

    fn insert(
        &mut self,
        category: ResourceCategory,
        record: ResourceRecord,
    ) -> Result<(), ResourceError> {
        let names = self.by_category.entry(category).or_default();
        if let Some(existing) = names.get(&record.logical_name) {
            if existing.provider_id == record.provider_id {
                return Ok(());
            }
            return Err(ResourceError::AmbiguousName {
                category,
                name: record.logical_name,
                first: existing.provider_id.clone(),
                second: record.provider_id,
            });
        }
        self.by_provider_id.insert(
            record.provider_id.clone(),
            (category, record.logical_name.clone()),
        );
        names.insert(record.logical_name.clone(), record);
        Ok(())
    }
}

/// Lazily populated cache of the deployment's tagged resources.
///
/// Population happens at most once per successful attempt and holds the lock
/// for its whole duration, so readers never see a partial snapshot. Any
/// failure leaves the cache empty and the next lookup starts over.
pub struct ResourceIndex {
    inventory: Arc<dyn Inventory>,
    tag: DiscoveryTag,
    cache: Mutex<Option<Arc<Snapshot>>>,
}

impl ResourceIndex {
    pub fn new(inventory: Arc<dyn Inventory>, tag: DiscoveryTag) -> Self {
        Self {
            inventory,
            tag,
            cache: Mutex::new(None),
        }
    }

    /// Returns the cached snapshot, populating it first if needed.
    ///
    /// `deadline` bounds each inventory request; exceeding it is a discovery error.
    pub async fn snapshot(&self, deadline: Option<Instant>) -> Result<Arc<Snapshot>, ResourceError> {
        let mut cache = self.cache.lock().await;
        if let Some(snapshot) = cache.as_ref() {
            return Ok(snapshot.clone());
        }

        match self.populate(deadline).await {
            Ok(snapshot) => {
                info!(
                    resources = snapshot.len(),
                    stack = self.tag.stack_id().unwrap_or("-"),
                    "resource index populated"
                );
                record_counter(DISCOVERY_TOTAL, 1, &TelemetryLabels::new().outcome("ok"));
                let snapshot = Arc::new(snapshot);
                *cache = Some(snapshot.clone());
                Ok(snapshot)
            }
            Err(err) => {
                warn!(error = %err, kind = err.kind(), "resource discovery failed; index left empty");
                record_counter(
                    DISCOVERY_TOTAL,
                    1,
                    &TelemetryLabels::new().outcome(err.kind()),
                );
                Err(err)
            }
        }
    }

    pub async fn resolve(
        &self,
        category: ResourceCategory,
    ) -> Result<BTreeMap<String, ResourceRecord>, ResourceError> {
        Ok(self.snapshot(None).await?.records(category))
    }

    pub async fn resolve_by_provider_id(&self, provider_id: &str) -> Result<String, ResourceError> {
        let snapshot = self.snapshot(None).await?;
        snapshot.logical_name(provider_id).map(str::to_string)
    }

    pub async fn resolve_api_by_id(&self, api_id: &str) -> Result<ApiTarget, ResourceError> {
        self.snapshot(None).await?.api_by_id(api_id)
    }

    /// Drops the cached snapshot; the next lookup queries the inventory again.
    pub async fn invalidate(&self) {
        self.cache.lock().await.take();
    }

    fn query(&self) -> InventoryQuery {
        InventoryQuery {
            tag_key: self.tag.name_key(),
            resource_types: ResourceCategory::KNOWN
                .iter()
                .filter_map(|c| c.inventory_filter())
                .map(str::to_string)
                .collect(),
            page_size: PAGE_SIZE,
        }
    }

    async fn populate(&self, deadline: Option<Instant>) -> Result<Snapshot, ResourceError> {
        let query = self.query();
        let name_key = self.tag.name_key();
        let type_key = self.tag.type_key();
        let mut snapshot = Snapshot::default();
        let mut token = None;
        let mut pages = 0usize;

        loop {
            let request = self.inventory.page(&query, token.take());
            let page = match deadline {
                Some(deadline) => timeout_at(deadline, request)
                    .await
                    .unwrap_or(Err(InventoryError::Timeout)),
                None => request.await,
            }
            .map_err(|source| ResourceError::Discovery { source })?;
            pages += 1;

            for resource in page.resources {
                index_resource(&mut snapshot, resource, &name_key, &type_key)?;
            }

            match page.next_token {
                Some(next) if !next.is_empty() => token = Some(next),
                _ => break,
            }
        }

        debug!(pages, "inventory listing exhausted");
        Ok(snapshot)
    }
}

fn index_resource(
    snapshot: &mut Snapshot,
    resource: TaggedResource,
    name_key: &str,
    type_key: &str,
) -> Result<(), ResourceError> {
    let Some(logical_name) = resource.tags.get(name_key).cloned() else {
        debug!(provider_id = %resource.provider_id, "skipping resource without a name tag");
        return Ok(());
    };
    let category = ResourceCategory::from_provider_id(&resource.provider_id);
    if category == ResourceCategory::Unknown {
        warn!(
            provider_id = %resource.provider_id,
            name = %logical_name,
            "ignoring tagged resource of unknown category"
        );
        return Ok(());
    }
    snapshot.insert(
        category,
        ResourceRecord {
            logical_name,
            kind: resource.tags.get(type_key).cloned(),
            provider_id: resource.provider_id,
        },
    )
}
