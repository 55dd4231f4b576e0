use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;
use tokio::sync::Mutex;

/// Filters applied to one inventory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InventoryQuery {
    /// Only resources carrying this tag key are returned.
    pub tag_key: String,
    pub resource_types: Vec<String>,
    pub page_size: i32,
}

/// A provider resource and all of its tags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedResource {
    pub provider_id: String,
    pub tags: BTreeMap<String, String>,
}

impl TaggedResource {
    pub fn new<I, K, V>(provider_id: impl Into<String>, tags: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            provider_id: provider_id.into(),
            tags: tags
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InventoryPage {
    pub resources: Vec<TaggedResource>,
    /// Token for the next page; `None` once the listing is exhausted.
    pub next_token: Option<String>,
}

#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("inventory request failed: {0}")]
    Request(#[source] anyhow::Error),
    #[error("inventory request exceeded the invocation deadline")]
    Timeout,
}

/// Paginated, tag-filtered listing of provider resources.
#[async_trait]
pub trait Inventory: Send + Sync {
    async fn page(
        &self,
        query: &InventoryQuery,
        token: Option<String>,
    ) -> Result<InventoryPage, InventoryError>;
}

/// In-memory inventory used in tests. Each inner vector is served as one page.
#[derive(Default)]
pub struct InMemoryInventory {
    pages: Mutex<Vec<Vec<TaggedResource>>>,
    fail_on_call: Mutex<Option<usize>>,
    calls: AtomicUsize,
}

impl InMemoryInventory {
    pub fn new(pages: Vec<Vec<TaggedResource>>) -> Self {
        Self {
            pages: Mutex::new(pages),
            ..Default::default()
        }
    }

    /// Replaces the listing served by later calls.
    pub async fn set_pages(&self, pages: Vec<Vec<TaggedResource>>) {
        *self.pages.lock().await = pages;
    }

    /// Makes the `n`th call from now (1-based) fail once.
    pub async fn fail_on_call(&self, n: usize) {
        *self.fail_on_call.lock().await = Some(self.calls() + n);
    }

    /// Number of page requests served so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Inventory for InMemoryInventory {
    async fn page(
        &self,
        query: &InventoryQuery,
        token: Option<String>,
    ) -> Result<InventoryPage, InventoryError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        {
            let mut fail = self.fail_on_call.lock().await;
            if *fail == Some(call) {
                *fail = None;
                return Err(InventoryError::Request(anyhow::anyhow!(
                    "injected inventory failure"
                )));
            }
        }

        let index = match token {
            Some(token) => token.parse::<usize>().map_err(|_| {
                InventoryError::Request(anyhow::anyhow!("unknown pagination token {token}"))
            })?,
            None => 0,
        };
        let pages = self.pages.lock().await;
        let resources = pages
            .get(index)
            .map(|page| {
                page.iter()
                    .filter(|r| r.tags.contains_key(&query.tag_key))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        let next_token = (index + 1 < pages.len()).then(|| (index + 1).to_string());
        Ok(InventoryPage {
            resources,
            next_token,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query() -> InventoryQuery {
        InventoryQuery {
            tag_key: "x-membrane-name".into(),
            resource_types: vec!["sns:topic".into()],
            page_size: 100,
        }
    }

    #[tokio::test]
    async fn serves_pages_and_filters_by_tag_key() {
        let inventory = InMemoryInventory::new(vec![
            vec![
                TaggedResource::new("arn:aws:sns:us-east-1:1:a", [("x-membrane-name", "a")]),
                TaggedResource::new("arn:aws:sns:us-east-1:1:b", [("other", "b")]),
            ],
            vec![TaggedResource::new(
                "arn:aws:sns:us-east-1:1:c",
                [("x-membrane-name", "c")],
            )],
        ]);

        let first = inventory.page(&query(), None).await.unwrap();
        assert_eq!(first.resources.len(), 1);
        assert_eq!(first.next_token.as_deref(), Some("1"));

        let second = inventory.page(&query(), first.next_token).await.unwrap();
        assert_eq!(second.resources[0].provider_id, "arn:aws:sns:us-east-1:1:c");
        assert_eq!(second.next_token, None);
        assert_eq!(inventory.calls(), 2);
    }

    #[tokio::test]
    async fn injected_failure_fires_once() {
        let inventory = InMemoryInventory::new(vec![vec![]]);
        inventory.fail_on_call(1).await;
        assert!(inventory.page(&query(), None).await.is_err());
        assert!(inventory.page(&query(), None).await.is_ok());
    }
}
