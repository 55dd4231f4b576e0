use crate::inventory::{Inventory, InventoryError, InventoryPage, InventoryQuery, TaggedResource};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_resourcegroupstagging as tagging;
use aws_sdk_resourcegroupstagging::error::DisplayErrorContext;

/// Inventory backed by the Resource Groups Tagging API.
#[derive(Clone)]
pub struct TaggingInventory {
    client: tagging::Client,
}

impl TaggingInventory {
    pub fn new(client: tagging::Client) -> Self {
        Self { client }
    }

    /// Builds a client from the default credential and region chain.
    pub async fn from_env() -> Self {
        let config = aws_config::load_defaults(BehaviorVersion::latest()).await;
        Self::new(tagging::Client::new(&config))
    }
}

#[async_trait]
impl Inventory for TaggingInventory {
    async fn page(
        &self,
        query: &InventoryQuery,
        token: Option<String>,
    ) -> Result<InventoryPage, InventoryError> {
        let tag_filter = tagging::types::TagFilter::builder()
            .key(query.tag_key.clone())
            .build();
        let output = self
            .client
            .get_resources()
            .tag_filters(tag_filter)
            .set_resource_type_filters(Some(query.resource_types.clone()))
            .resources_per_page(query.page_size)
            .set_pagination_token(token)
            .send()
            .await
            .map_err(|err| {
                InventoryError::Request(anyhow::anyhow!("{}", DisplayErrorContext(&err)))
            })?;

        let resources = output
            .resource_tag_mapping_list
            .unwrap_or_default()
            .into_iter()
            .filter_map(|mapping| {
                let provider_id = mapping.resource_arn?;
                let tags = mapping
                    .tags
                    .unwrap_or_default()
                    .into_iter()
                    .map(|tag| (tag.key, tag.value));
                Some(TaggedResource::new(provider_id, tags))
            })
            .collect();

        // The API signals the last page with an empty token rather than none.
        let next_token = output.pagination_token.filter(|t| !t.is_empty());
        Ok(InventoryPage {
            resources,
            next_token,
        })
    }
}
