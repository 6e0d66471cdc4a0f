//! Maintenance of the three instance views.
//!
//! An instance is stored three times: its own record (`{Id}_instance`), an
//! entry in the global list (`instances`) and an entry in its owner's list
//! (`{User}_instances`). List entries are matched by `ContainerId`. Every
//! mutation of instance state goes through [`apply`], one view at a time,
//! each under that view's key lock.

use crate::error::Result;
use crate::store::{keys, Store};
use crate::types::Instance;

/// One of the persisted copies of an instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum View {
    Record,
    Global,
    Owner,
}

pub const ALL_VIEWS: [View; 3] = [View::Record, View::Global, View::Owner];

#[derive(Debug, Clone)]
pub enum Mutation {
    /// Insert, or replace the entry with the same `ContainerId`
    Upsert,
    /// Drop every copy
    Remove,
    /// Flip the suspension flag
    SetSuspended(bool),
}

/// Apply `mutation` for `instance` to each of `views`, in order.
pub async fn apply(store: &Store, instance: &Instance, mutation: &Mutation, views: &[View]) -> Result<()> {
    for view in views {
        match view {
            View::Record => apply_record(store, instance, mutation).await?,
            View::Global => apply_list(store, keys::INSTANCES, instance, mutation).await?,
            View::Owner => {
                apply_list(store, &keys::user_instances(&instance.user), instance, mutation).await?
            }
        }
    }
    Ok(())
}

async fn apply_record(store: &Store, instance: &Instance, mutation: &Mutation) -> Result<()> {
    let key = keys::instance(&instance.id);
    match mutation {
        Mutation::Upsert => store.set(&key, instance).await,
        Mutation::Remove => store.delete(&key).await,
        Mutation::SetSuspended(flag) => {
            let flag = *flag;
            store
                .update_existing::<Instance, _, _>(&key, |record| record.suspended = flag)
                .await?;
            Ok(())
        }
    }
}

async fn apply_list(store: &Store, key: &str, instance: &Instance, mutation: &Mutation) -> Result<()> {
    let container_id = instance.container_id.as_str();
    store
        .update::<Vec<Instance>, _, _>(key, |list| match mutation {
            Mutation::Upsert => {
                match list.iter_mut().find(|i| i.container_id == container_id) {
                    Some(existing) => *existing = instance.clone(),
                    None => list.push(instance.clone()),
                }
            }
            Mutation::Remove => list.retain(|i| i.container_id != container_id),
            Mutation::SetSuspended(flag) => {
                for entry in list.iter_mut().filter(|i| i.container_id == container_id) {
                    entry.suspended = *flag;
                }
            }
        })
        .await
}
