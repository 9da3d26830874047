// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Flow entries and the comparison algebra used by flow-mods.
//!
//! A [`FlowEntry`] is the detached form a caller builds and hands to a
//! table. Installing it moves it into the table, which turns it into a
//! [`TableEntry`]: the match set, priority and cookie become immutable,
//! the instructions sit behind the entry lock, and statistics are
//! attached.

use super::arena::EntryHandle;
use super::instruction::InstructionSet;
use super::predicate::FlowMatch;
use super::stat::FlowStats;
use crate::api::FlowStatsEntry;
use crate::api::GROUP_ANY;
use crate::api::PORT_ANY;
use crate::ddi::sync::KRwLock;
use crate::ddi::sync::KRwLockReadGuard;
use crate::ddi::sync::KRwLockWriteGuard;
use crate::ddi::time::Moment;
use core::cmp::Ordering;
use core::fmt;
use core::fmt::Display;
use core::sync::atomic;
use core::sync::atomic::AtomicU64;
use serde::Deserialize;
use serde::Serialize;

/// A flow entry that is not installed in any table.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct FlowEntry {
    pub priority: u32,
    pub matches: FlowMatch,
    pub instructions: InstructionSet,
    pub cookie: u64,
    /// Only meaningful on a template: selects the cookie bits that must
    /// agree with an installed entry's cookie.
    pub cookie_mask: u64,
    /// Seconds without a matching packet before removal, zero for
    /// never.
    pub idle_timeout: u32,
    /// Seconds after install before removal, zero for never.
    pub hard_timeout: u32,
    pub notify_on_removal: bool,
}

impl FlowEntry {
    pub fn new(
        priority: u32,
        matches: FlowMatch,
        instructions: InstructionSet,
    ) -> Self {
        Self { priority, matches, instructions, ..Default::default() }
    }

    pub fn with_cookie(mut self, cookie: u64, cookie_mask: u64) -> Self {
        self.cookie = cookie;
        self.cookie_mask = cookie_mask;
        self
    }

    pub fn with_idle_timeout(mut self, secs: u32) -> Self {
        self.idle_timeout = secs;
        self
    }

    pub fn with_hard_timeout(mut self, secs: u32) -> Self {
        self.hard_timeout = secs;
        self
    }

    pub fn with_notify(mut self) -> Self {
        self.notify_on_removal = true;
        self
    }
}

impl Display for FlowEntry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "priority={} {} => {}",
            self.priority, self.matches, self.instructions
        )
    }
}

/// The position of an entry in its table.
///
/// Higher keys are consulted first: higher priority, then the larger
/// match set, then the older entry. Every matching algorithm returns
/// the matching entry with the largest key.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct OrderKey {
    pub priority: u32,
    pub num_matches: u32,
    /// Install sequence number, inverted so that older entries sort
    /// higher.
    seq_rev: u64,
}

impl OrderKey {
    pub fn new(priority: u32, num_matches: usize, seq: u64) -> Self {
        Self {
            priority,
            num_matches: u32::try_from(num_matches).unwrap_or(u32::MAX),
            seq_rev: u64::MAX - seq,
        }
    }

    pub fn seq(&self) -> u64 {
        u64::MAX - self.seq_rev
    }
}

impl Ord for OrderKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then(self.num_matches.cmp(&other.num_matches))
            .then(self.seq_rev.cmp(&other.seq_rev))
    }
}

impl PartialOrd for OrderKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// The read-only view of an entry the comparison algebra works on.
///
/// Implemented by both detached and installed entries, so templates
/// and table contents go through the same checks.
pub trait EntryView {
    fn priority(&self) -> u32;
    fn matches(&self) -> &FlowMatch;
    fn cookie(&self) -> u64;

    /// Do the entry's actions satisfy the out-port and out-group
    /// filters? `PORT_ANY` and `GROUP_ANY` disable a filter.
    fn references(&self, out_port: u32, out_group: u32) -> bool;
}

impl EntryView for FlowEntry {
    fn priority(&self) -> u32 {
        self.priority
    }

    fn matches(&self) -> &FlowMatch {
        &self.matches
    }

    fn cookie(&self) -> u64 {
        self.cookie
    }

    fn references(&self, out_port: u32, out_group: u32) -> bool {
        refs_ok(&self.instructions, out_port, out_group)
    }
}

fn refs_ok(insts: &InstructionSet, out_port: u32, out_group: u32) -> bool {
    (out_port == PORT_ANY || insts.has_output(out_port))
        && (out_group == GROUP_ANY || insts.has_group(out_group))
}

fn cookie_ok(entry: &impl EntryView, tmpl: &FlowEntry) -> bool {
    entry.cookie() & tmpl.cookie_mask == tmpl.cookie & tmpl.cookie_mask
}

/// Is `entry` the entry `tmpl` describes exactly?
///
/// Same priority and identical match sets, the cookie agreeing under
/// the template's cookie mask when `check_cookie` is set, and the
/// out-port/out-group filters satisfied.
pub fn check_equal(
    entry: &impl EntryView,
    tmpl: &FlowEntry,
    out_port: u32,
    out_group: u32,
    check_cookie: bool,
) -> bool {
    entry.priority() == tmpl.priority
        && entry.matches().is_equal(&tmpl.matches)
        && (!check_cookie || cookie_ok(entry, tmpl))
        && entry.references(out_port, out_group)
}

/// Does `tmpl` select `entry` for a non-strict operation?
///
/// Every predicate of the template must be refined by the entry's
/// predicate on the same field, so every packet the entry matches is
/// also matched by the template. An empty template selects
/// everything. `strict` additionally demands an equal priority.
pub fn check_contained(
    entry: &impl EntryView,
    tmpl: &FlowEntry,
    strict: bool,
    out_port: u32,
    out_group: u32,
    check_cookie: bool,
) -> bool {
    (!strict || entry.priority() == tmpl.priority)
        && entry.matches().refines(&tmpl.matches)
        && (!check_cookie || cookie_ok(entry, tmpl))
        && entry.references(out_port, out_group)
}

/// The priority a controller asked for, without the OpenFlow 1.0
/// non-wildcarded flag.
pub fn wire_priority(priority: u32) -> u32 {
    priority & 0xffff
}

/// Could `a` and `b` both match some packet? With `check_priority` the
/// two must also share a wire priority to count as overlapping.
pub fn check_overlap(
    a: &impl EntryView,
    b: &impl EntryView,
    check_priority: bool,
) -> bool {
    let same_priority =
        wire_priority(a.priority()) == wire_priority(b.priority());
    (!check_priority || same_priority) && a.matches().overlaps(b.matches())
}

/// A flow entry owned by a table.
#[derive(Debug)]
pub struct TableEntry {
    handle: EntryHandle,
    key: OrderKey,
    table_id: u8,
    matches: FlowMatch,
    cookie: u64,
    idle_timeout: u32,
    hard_timeout: u32,
    notify_on_removal: bool,
    instructions: KRwLock<InstructionSet>,
    stats: FlowStats,
    /// The packet count seen by the last idle check.
    last_packet_count: AtomicU64,
}

impl TableEntry {
    /// Take ownership of `entry` for installation under `handle`.
    pub(crate) fn new(
        entry: FlowEntry,
        handle: EntryHandle,
        table_id: u8,
        seq: u64,
        stats: FlowStats,
    ) -> Self {
        let key = OrderKey::new(entry.priority, entry.matches.len(), seq);
        let last = stats.counter.packets();

        Self {
            handle,
            key,
            table_id,
            matches: entry.matches,
            cookie: entry.cookie,
            idle_timeout: entry.idle_timeout,
            hard_timeout: entry.hard_timeout,
            notify_on_removal: entry.notify_on_removal,
            instructions: KRwLock::new(entry.instructions),
            stats,
            last_packet_count: AtomicU64::new(last),
        }
    }

    pub fn handle(&self) -> EntryHandle {
        self.handle
    }

    pub fn key(&self) -> OrderKey {
        self.key
    }

    pub fn table_id(&self) -> u8 {
        self.table_id
    }

    pub fn priority(&self) -> u32 {
        self.key.priority
    }

    pub fn matches(&self) -> &FlowMatch {
        &self.matches
    }

    pub fn cookie(&self) -> u64 {
        self.cookie
    }

    pub fn idle_timeout(&self) -> u32 {
        self.idle_timeout
    }

    pub fn hard_timeout(&self) -> u32 {
        self.hard_timeout
    }

    pub fn notify_on_removal(&self) -> bool {
        self.notify_on_removal
    }

    /// Hold the entry for the duration of instruction execution. A
    /// concurrent modify or delete of the entry waits for the guard
    /// to drop.
    pub fn instructions(&self) -> KRwLockReadGuard<'_, InstructionSet> {
        self.instructions.read()
    }

    pub(crate) fn instructions_mut(
        &self,
    ) -> KRwLockWriteGuard<'_, InstructionSet> {
        self.instructions.write()
    }

    pub fn stats(&self) -> &FlowStats {
        &self.stats
    }

    /// Record a packet matching this entry.
    #[inline]
    pub fn hit(&self, bytes: u64) {
        self.stats.counter.hit(bytes);
    }

    /// Compare the current packet count with the one seen at the last
    /// idle check and remember the new value. Returns true when no
    /// packet has matched in between.
    pub(crate) fn idle_check(&self) -> bool {
        let now = self.stats.counter.packets();
        let prev = self.last_packet_count.swap(now, atomic::Ordering::Relaxed);
        now == prev
    }

    /// Fold the counters of the entry this one replaced into its own.
    /// Carried packets do not count as traffic for the idle check.
    pub(crate) fn carry_stats(&self, old: &TableEntry) {
        let c = old.stats.counter.read();
        self.stats.counter.add(c.packets, c.bytes);
        self.last_packet_count.fetch_add(c.packets, atomic::Ordering::Relaxed);
    }

    pub(crate) fn reset_stats(&self) {
        self.stats.counter.reset();
        self.last_packet_count.store(0, atomic::Ordering::Relaxed);
    }

    /// A detached copy of the entry, as handed to removal hooks.
    pub fn to_flow_entry(&self) -> FlowEntry {
        FlowEntry {
            priority: self.priority(),
            matches: self.matches.clone(),
            instructions: self.instructions.read().clone(),
            cookie: self.cookie,
            cookie_mask: 0,
            idle_timeout: self.idle_timeout,
            hard_timeout: self.hard_timeout,
            notify_on_removal: self.notify_on_removal,
        }
    }

    pub fn stats_entry(&self, now: Moment) -> FlowStatsEntry {
        let age = now.delta(self.stats.created_at);
        let counts = self.stats.counter.read();

        FlowStatsEntry {
            table_id: self.table_id,
            priority: self.priority(),
            cookie: self.cookie,
            idle_timeout: self.idle_timeout,
            hard_timeout: self.hard_timeout,
            duration_sec: age.as_secs(),
            duration_nsec: age.subsec_nanos(),
            packet_count: counts.packets,
            byte_count: counts.bytes,
            matches: self.matches.dump(),
            instructions: self.instructions.read().dump(),
        }
    }
}

impl EntryView for TableEntry {
    fn priority(&self) -> u32 {
        self.key.priority
    }

    fn matches(&self) -> &FlowMatch {
        &self.matches
    }

    fn cookie(&self) -> u64 {
        self.cookie
    }

    fn references(&self, out_port: u32, out_group: u32) -> bool {
        if out_port == PORT_ANY && out_group == GROUP_ANY {
            return true;
        }
        refs_ok(&self.instructions.read(), out_port, out_group)
    }
}

impl Display for TableEntry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "table={} priority={} {} => {}",
            self.table_id,
            self.priority(),
            self.matches,
            &*self.instructions.read()
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::api::MacAddr;
    use crate::api::OF10_NON_WILDCARDED_PRIORITY_FLAG;
    use crate::engine::action::Action;
    use crate::engine::predicate::Match;

    const MAC1: MacAddr = MacAddr::from_const([0xa8, 0x40, 0x25, 0, 0, 1]);

    fn entry(priority: u32, matches: Vec<Match>) -> FlowEntry {
        FlowEntry::new(
            priority,
            FlowMatch::from(matches),
            InstructionSet::apply(vec![Action::output(1)]),
        )
    }

    #[test]
    fn order_key() {
        let a = OrderKey::new(10, 1, 5);
        let b = OrderKey::new(10, 2, 6);
        let c = OrderKey::new(11, 0, 7);
        let d = OrderKey::new(10, 2, 9);
        assert!(c > b);
        assert!(b > a);
        // Older entries win ties.
        assert!(b > d);
        assert_eq!(d.seq(), 9);
    }

    #[test]
    fn equal() {
        let a = entry(10, vec![Match::eth_dst(MAC1), Match::in_port(1)])
            .with_cookie(0xab, 0);
        let tmpl = entry(10, vec![Match::in_port(1), Match::eth_dst(MAC1)])
            .with_cookie(0xab, u64::MAX);

        assert!(check_equal(&a, &tmpl, PORT_ANY, GROUP_ANY, true));
        assert!(check_equal(&a, &tmpl, 1, GROUP_ANY, true));
        assert!(!check_equal(&a, &tmpl, 2, GROUP_ANY, true));
        assert!(!check_equal(&a, &tmpl, PORT_ANY, 3, true));

        let other_cookie = tmpl.clone().with_cookie(0xac, u64::MAX);
        assert!(!check_equal(&a, &other_cookie, PORT_ANY, GROUP_ANY, true));
        assert!(check_equal(&a, &other_cookie, PORT_ANY, GROUP_ANY, false));

        let other_prio = entry(11, vec![Match::in_port(1), Match::eth_dst(MAC1)]);
        assert!(!check_equal(&a, &other_prio, PORT_ANY, GROUP_ANY, false));
    }

    #[test]
    fn contained() {
        let specific = entry(10, vec![Match::in_port(1), Match::tcp_dst(80)]);
        let broad = entry(5, vec![Match::in_port(1)]);
        let empty = entry(0, vec![]);

        assert!(check_contained(&specific, &broad, false, PORT_ANY, GROUP_ANY, false));
        assert!(check_contained(&specific, &empty, false, PORT_ANY, GROUP_ANY, false));
        assert!(!check_contained(&broad, &specific, false, PORT_ANY, GROUP_ANY, false));
        // Strict needs the same priority.
        assert!(!check_contained(&specific, &broad, true, PORT_ANY, GROUP_ANY, false));
    }

    #[test]
    fn overlap_symmetry() {
        let a = entry(10, vec![Match::in_port(1)]);
        let b = entry(10, vec![Match::tcp_dst(80)]);
        let c = entry(10, vec![Match::in_port(2), Match::tcp_dst(80)]);
        let d = entry(9, vec![Match::tcp_dst(80)]);

        for (x, y, want) in [(&a, &b, true), (&a, &c, false), (&b, &c, true)] {
            assert_eq!(check_overlap(x, y, true), want);
            assert_eq!(check_overlap(y, x, true), want);
        }
        assert!(!check_overlap(&a, &d, true));
        assert!(check_overlap(&a, &d, false));

        // The OpenFlow 1.0 exact-match flag does not change the
        // priority an entry is compared at.
        let exact = entry(
            10 | OF10_NON_WILDCARDED_PRIORITY_FLAG,
            vec![Match::in_port(1)],
        );
        assert!(check_overlap(&exact, &a, true));
        assert!(check_overlap(&a, &exact, true));
        assert_eq!(wire_priority(exact.priority), 10);
    }
}
