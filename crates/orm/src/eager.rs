//! Eager loading of relations named with `with(...)`.
//!
//! A list of records loads each relation with one `IN (...)` statement and
//! groups the children in memory by the key read from each child row.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use anyhow::{Result, bail};
use tracing::instrument;

use crate::error::Error;
use crate::filter::Filter;
use crate::record::Record;
use crate::relation::{PARENT_KEY, Plan, fetch, key_of};
use crate::value::Value;

/// Loads each relation on a single record through its single-record path.
pub(crate) async fn load_one(record: &mut Record, with: &[String]) -> Result<()> {
    for name in with {
        record.relation(name).await?;
    }
    Ok(())
}

/// Loads each relation on every record with at most one statement per
/// relation, however often it is named. Relations declared with a condition closure fall back to one
/// statement per record.
#[instrument(level = "debug", skip_all, fields(parents = records.len()))]
pub(crate) async fn load_many(records: &mut [Record], with: &[String]) -> Result<()> {
    let Some(first) = records.first() else {
        return Ok(());
    };
    let def = Arc::clone(&first.def);

    let mut requested = BTreeSet::new();
    for name in with.iter().filter(|name| requested.insert(name.as_str())) {
        let Some(spec) = def.describe(name) else {
            bail!(Error::Relation(format!("{} has no relation '{name}'", def.name())));
        };
        let mut target = records[0].related(spec.target().def()).await?;

        match spec.plan(&records[0], &target).await? {
            Plan::Batched(batch) => {
                let mut seen = BTreeSet::new();
                let keys: Vec<Value> = records
                    .iter()
                    .filter_map(|record| record.columns.get(&batch.parent_key))
                    .filter(|value| value.group_key().is_some_and(|key| seen.insert(key)))
                    .cloned()
                    .collect();

                let mut groups: HashMap<String, Vec<Record>> = HashMap::new();
                let mut children = 0;
                if !keys.is_empty() {
                    let select = batch.select.r#where(Filter::r#in(batch.filter, keys.iter().cloned()));
                    for mut child in fetch(&mut target, select).await? {
                        let Some(key) = key_of(&child, &batch.child_key) else {
                            continue;
                        };
                        if batch.child_key == PARENT_KEY {
                            child.joined.remove(PARENT_KEY);
                        }
                        children += 1;
                        groups.entry(key).or_default().push(child);
                    }
                }

                tracing::debug!(
                    relation = %name,
                    parents = records.len(),
                    children,
                    query_count = usize::from(!keys.is_empty()),
                    "eager loaded relation"
                );

                for record in records.iter_mut() {
                    let group = key_of(record, &batch.parent_key)
                        .and_then(|key| groups.get(&key))
                        .cloned()
                        .unwrap_or_default();
                    record.joined.insert(name.clone(), spec.collect(group));
                }
            }
            Plan::PerRecord => {
                tracing::debug!(
                    relation = %name,
                    parents = records.len(),
                    query_count = records.len(),
                    "loading relation per record"
                );
                for record in records.iter_mut() {
                    record.relation(name).await?;
                }
            }
            Plan::Unresolvable => {
                for record in records.iter_mut() {
                    record.joined.insert(name.clone(), spec.collect(Vec::new()));
                }
            }
        }
    }
    Ok(())
}
