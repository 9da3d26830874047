// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The group table.
//!
//! A group is a list of buckets, each an action list, plus a type
//! deciding which buckets a packet sent to the group runs through.
//! Flow entries reference groups by id only; whether a group may go
//! away while referenced is decided by the pipeline.

use super::action::Action;
use super::action::ActionList;
use super::action::is_valid_output_port;
use super::packet::PacketMatches;
use super::stat::ShardedCounter;
use crate::api::GROUP_ALL;
use crate::api::GROUP_ANY;
use crate::api::GROUP_MAX;
use crate::api::GroupModError;
use crate::api::GroupStatsEntry;
use crate::api::GroupType;
use crate::api::OfVersion;
use crate::api::PORT_ANY;
use crate::api::PORT_TABLE;
use crate::api::ValidationError;
use crate::ddi::sync::KRwLock;
use core::fmt;
use core::fmt::Display;
use serde::Deserialize;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A bucket as requested by a group-mod.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct Bucket {
    /// Relative share of traffic in a select group. Zero elsewhere.
    pub weight: u16,
    /// Port whose liveness gates this bucket in a fast-failover group.
    pub watch_port: u32,
    /// Group whose liveness gates this bucket in a fast-failover
    /// group.
    pub watch_group: u32,
    pub actions: ActionList,
}

impl Default for Bucket {
    fn default() -> Self {
        Self {
            weight: 0,
            watch_port: PORT_ANY,
            watch_group: GROUP_ANY,
            actions: ActionList::new(),
        }
    }
}

impl Bucket {
    pub fn new(actions: impl Into<ActionList>) -> Self {
        Self { actions: actions.into(), ..Default::default() }
    }

    pub fn with_weight(mut self, weight: u16) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_watch_port(mut self, port: u32) -> Self {
        self.watch_port = port;
        self
    }

    pub fn with_watch_group(mut self, group: u32) -> Self {
        self.watch_group = group;
        self
    }
}

impl Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "weight={} actions={}", self.weight, self.actions)
    }
}

/// A group as requested by a group-mod.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct GroupDesc {
    pub group_id: u32,
    pub group_type: GroupType,
    #[serde(default)]
    pub buckets: Vec<Bucket>,
}

impl GroupDesc {
    pub fn new(group_id: u32, group_type: GroupType, buckets: Vec<Bucket>) -> Self {
        Self { group_id, group_type, buckets }
    }
}

#[derive(Debug)]
pub struct InstalledBucket {
    pub bucket: Bucket,
    pub stats: ShardedCounter,
}

/// An installed group.
#[derive(Debug)]
pub struct Group {
    id: u32,
    group_type: GroupType,
    buckets: Vec<InstalledBucket>,
    stats: ShardedCounter,
}

impl Group {
    fn new(desc: GroupDesc, shards: usize) -> Self {
        let buckets = desc
            .buckets
            .into_iter()
            .map(|bucket| InstalledBucket {
                bucket,
                stats: ShardedCounter::new(shards),
            })
            .collect();

        Self {
            id: desc.group_id,
            group_type: desc.group_type,
            buckets,
            stats: ShardedCounter::new(shards),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn group_type(&self) -> GroupType {
        self.group_type
    }

    pub fn buckets(&self) -> &[InstalledBucket] {
        &self.buckets
    }

    pub fn stats(&self) -> &ShardedCounter {
        &self.stats
    }

    /// Is any bucket of this group usable? A bucket is usable when
    /// it watches nothing or its watched port is live.
    fn is_live(&self, port_live: &dyn Fn(u32) -> bool) -> bool {
        self.buckets.iter().any(|b| {
            b.bucket.watch_port == PORT_ANY || port_live(b.bucket.watch_port)
        })
    }

    fn to_desc(&self) -> GroupDesc {
        GroupDesc {
            group_id: self.id,
            group_type: self.group_type,
            buckets: self.buckets.iter().map(|b| b.bucket.clone()).collect(),
        }
    }
}

impl Display for Group {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "group {} type={}", self.id, self.group_type)
    }
}

/// Pick a bucket index in `weights` for a flow, proportionally to the
/// weights. `None` if every weight is zero.
fn weighted_choice(weights: impl Iterator<Item = u16> + Clone, hash: u32) -> Option<usize> {
    let total: u64 = weights.clone().map(u64::from).sum();
    if total == 0 {
        return None;
    }

    let mut point = u64::from(hash) % total;
    for (i, w) in weights.enumerate() {
        let w = u64::from(w);
        if point < w {
            return Some(i);
        }
        point -= w;
    }

    None
}

pub struct GroupTable {
    version: OfVersion,
    stat_shards: usize,
    groups: KRwLock<BTreeMap<u32, Arc<Group>>>,
}

impl GroupTable {
    pub fn new(version: OfVersion, stat_shards: usize) -> Self {
        Self { version, stat_shards, groups: KRwLock::new(BTreeMap::new()) }
    }

    pub fn len(&self) -> usize {
        self.groups.read().len()
    }

    pub fn contains(&self, id: u32) -> bool {
        self.groups.read().contains_key(&id)
    }

    pub fn get(&self, id: u32) -> Option<Arc<Group>> {
        self.groups.read().get(&id).cloned()
    }

    /// Every installed group in id order.
    pub fn groups(&self) -> Vec<Arc<Group>> {
        self.groups.read().values().cloned().collect()
    }

    pub fn desc(&self, id: u32) -> Option<GroupDesc> {
        self.get(id).map(|g| g.to_desc())
    }

    fn validate(&self, desc: &GroupDesc) -> Result<(), GroupModError> {
        let group_id = desc.group_id;
        if group_id > GROUP_MAX {
            return Err(GroupModError::InvalidId(group_id));
        }

        if desc.group_type == GroupType::Indirect && desc.buckets.len() > 1 {
            return Err(GroupModError::InvalidBucket {
                group_id,
                reason: "an indirect group has a single bucket",
            });
        }

        for b in &desc.buckets {
            if b.weight != 0 && desc.group_type != GroupType::Select {
                return Err(GroupModError::InvalidBucket {
                    group_id,
                    reason: "weight is only meaningful in a select group",
                });
            }

            if desc.group_type == GroupType::FastFailover
                && b.watch_port == PORT_ANY
                && b.watch_group == GROUP_ANY
            {
                return Err(GroupModError::InvalidBucket {
                    group_id,
                    reason: "fast failover bucket watches nothing",
                });
            }

            for a in b.actions.iter() {
                let kind = a.kind();
                if !kind.supported_by(self.version) {
                    return Err(ValidationError::VersionMismatch {
                        what: kind.name(),
                        version: self.version,
                    }
                    .into());
                }

                match a {
                    Action::Group(_) => {
                        return Err(GroupModError::Chaining { group_id });
                    }
                    Action::Output { port, .. }
                        if *port == PORT_TABLE || !is_valid_output_port(*port) =>
                    {
                        return Err(ValidationError::InvalidOutputPort(*port).into());
                    }
                    _ => {}
                }
            }
        }

        Ok(())
    }

    /// Install a new group.
    pub fn add(&self, desc: GroupDesc) -> Result<(), GroupModError> {
        self.validate(&desc)?;
        let mut groups = self.groups.write();
        if groups.contains_key(&desc.group_id) {
            return Err(GroupModError::Exists(desc.group_id));
        }

        let id = desc.group_id;
        groups.insert(id, Arc::new(Group::new(desc, self.stat_shards)));
        Ok(())
    }

    /// Replace the type and buckets of an existing group. Counters
    /// start over.
    pub fn modify(&self, desc: GroupDesc) -> Result<(), GroupModError> {
        self.validate(&desc)?;
        let mut groups = self.groups.write();
        let Some(slot) = groups.get_mut(&desc.group_id) else {
            return Err(GroupModError::UnknownGroup(desc.group_id));
        };

        *slot = Arc::new(Group::new(desc, self.stat_shards));
        Ok(())
    }

    /// Delete a group, or every group for [`GROUP_ALL`]. Returns the
    /// ids deleted; deleting an unknown group deletes nothing.
    pub fn delete(&self, id: u32) -> Vec<u32> {
        let mut groups = self.groups.write();
        if id == GROUP_ALL {
            let ids = groups.keys().copied().collect();
            groups.clear();
            return ids;
        }

        groups.remove(&id).map(|g| g.id).into_iter().collect()
    }

    /// The buckets a packet sent to group `id` runs through, charging
    /// the group and those buckets `bytes`. `port_live` reports the
    /// liveness of watched ports.
    pub fn select(
        &self,
        id: u32,
        pkt: &PacketMatches,
        bytes: u64,
        port_live: &dyn Fn(u32) -> bool,
    ) -> Option<Vec<ActionList>> {
        let group = self.get(id)?;
        group.stats.hit(bytes);

        let picked: Vec<&InstalledBucket> = match group.group_type {
            GroupType::All => group.buckets.iter().collect(),

            GroupType::Indirect => group.buckets.first().into_iter().collect(),

            GroupType::Select => {
                let weights = group.buckets.iter().map(|b| b.bucket.weight);
                weighted_choice(weights, pkt.flow_hash())
                    .map(|i| &group.buckets[i])
                    .into_iter()
                    .collect()
            }

            GroupType::FastFailover => group
                .buckets
                .iter()
                .find(|b| self.bucket_live(&b.bucket, port_live))
                .into_iter()
                .collect(),
        };

        Some(
            picked
                .into_iter()
                .map(|b| {
                    b.stats.hit(bytes);
                    b.bucket.actions.clone()
                })
                .collect(),
        )
    }

    fn bucket_live(&self, b: &Bucket, port_live: &dyn Fn(u32) -> bool) -> bool {
        let port_ok = b.watch_port == PORT_ANY || port_live(b.watch_port);
        let group_ok = b.watch_group == GROUP_ANY
            || self.get(b.watch_group).is_some_and(|g| g.is_live(port_live));
        port_ok && group_ok
    }

    /// Statistics of group `id`, or of every group for [`GROUP_ALL`].
    /// `ref_count` reports how many flow entries reference a group.
    pub fn stats(
        &self,
        id: u32,
        ref_count: impl Fn(u32) -> u32,
    ) -> Vec<GroupStatsEntry> {
        let groups = if id == GROUP_ALL {
            self.groups()
        } else {
            self.get(id).into_iter().collect()
        };

        groups
            .iter()
            .map(|g| {
                let total = g.stats.read();
                GroupStatsEntry {
                    group_id: g.id,
                    group_type: g.group_type,
                    ref_count: ref_count(g.id),
                    packet_count: total.packets,
                    byte_count: total.bytes,
                    buckets: g.buckets.iter().map(|b| b.stats.read()).collect(),
                }
            })
            .collect()
    }
}
