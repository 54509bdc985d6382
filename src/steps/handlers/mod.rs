//! Step handlers
//!
//! One handler per catalog step. Handlers call the provider, convert what
//! comes back into entities, add them to the job state and link them through
//! the resolvers. Listings are walked one page at a time; a page is fully
//! stored before the next one is requested.
//!
//! # Module Structure
//!
//! - [`account`] - the directory account every other entity hangs off
//! - [`directory`] - users, groups, service principals and group members
//! - [`subscriptions`] - the configured subscription and its resource groups
//! - [`resources`] - catalog-driven resource listings and storage containers
//! - [`policy`] - policy assignments and the definitions they use

pub mod account;
pub mod directory;
pub mod policy;
pub mod resources;
pub mod subscriptions;

use super::catalog::StepCatalog;
use super::scheduler::{HandlerMap, StepContext, StepHandler};
use crate::error::{IngestError, Result};
use crate::graph::{Entity, JobState};
use crate::provider::client::strip_query;
use crate::provider::{Api, ProviderClient};
use serde_json::Value;
use std::sync::Arc;

/// Build the handler for every step this crate implements.
///
/// Steps that carry a `listing` in the catalog share the generic
/// [`resources::ResourceListStep`].
pub fn default_handlers(client: Arc<ProviderClient>, catalog: &StepCatalog) -> HandlerMap {
    let mut handlers = HandlerMap::new();

    let mut register = |id: &str, handler: Arc<dyn StepHandler>| {
        handlers.insert(id.to_string(), handler);
    };

    register("fetch-account", Arc::new(account::AccountStep::new(client.clone())));
    register(
        "fetch-users",
        Arc::new(directory::DirectoryListStep::users(client.clone())),
    );
    register(
        "fetch-groups",
        Arc::new(directory::DirectoryListStep::groups(client.clone())),
    );
    register(
        "fetch-service-principals",
        Arc::new(directory::DirectoryListStep::service_principals(client.clone())),
    );
    register(
        "fetch-group-members",
        Arc::new(directory::GroupMembersStep::new(client.clone())),
    );
    register(
        "fetch-subscriptions",
        Arc::new(subscriptions::SubscriptionStep::new(client.clone())),
    );
    register(
        "fetch-resource-groups",
        Arc::new(subscriptions::ResourceGroupsStep::new(client.clone())),
    );
    register(
        "fetch-storage-containers",
        Arc::new(resources::StorageContainersStep::new(client.clone())),
    );
    register(
        "fetch-policy-assignments",
        Arc::new(policy::PolicyAssignmentsStep::new(client.clone())),
    );
    register(
        "fetch-policy-definitions",
        Arc::new(policy::PolicyDefinitionsStep::new(client.clone())),
    );

    for step in catalog.steps() {
        if let Some(listing) = &step.listing {
            register(
                &step.id,
                Arc::new(resources::ResourceListStep::new(client.clone(), listing.clone())),
            );
        }
    }

    handlers
}

/// Walk a listing page by page, handing each page to `on_page`.
///
/// A permission-denied answer ends the listing with a warning and whatever
/// pages were already stored, as does a next page link to another origin.
/// Returns the number of items seen.
pub(crate) async fn for_each_page<F>(
    ctx: &StepContext,
    client: &ProviderClient,
    api: Api,
    url: String,
    mut on_page: F,
) -> Result<usize>
where
    F: FnMut(Vec<Value>) -> Result<()> + Send,
{
    let mut pager = client.pager(api, url);
    let mut seen = 0;

    loop {
        match pager.next_page().await {
            Ok(Some(items)) => {
                seen += items.len();
                on_page(items)?;
            }
            Ok(None) => break,
            Err(err) => {
                ctx.record_missing_permission(err)?;
                break;
            }
        }
    }

    if let Some(link) = pager.rejected_link() {
        ctx.warn(format!(
            "listing truncated, next page link points to another origin: {}",
            strip_query(link)
        ));
    }

    Ok(seen)
}

/// Every entity of `entity_type` currently in the job state
pub(crate) fn entities_of(job_state: &dyn JobState, entity_type: &str) -> Vec<Entity> {
    let mut entities = Vec::new();
    job_state.iterate_entities(entity_type, &mut |e| entities.push(e.clone()));
    entities
}

/// The configured subscription, required by every subscription-scoped step
pub(crate) fn required_subscription(ctx: &StepContext) -> Result<String> {
    ctx.config
        .subscription()
        .map(|s| s.to_string())
        .ok_or_else(|| IngestError::config("no subscription id configured"))
}
