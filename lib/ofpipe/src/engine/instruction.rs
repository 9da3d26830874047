// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The instruction ladder of a flow entry.
//!
//! An entry holds at most one instruction of each kind. Whatever the
//! order they were given in, they execute in ladder order: apply,
//! clear, write, write-metadata, goto, meter, experimenter.

use super::action::Action;
use super::action::ActionList;
use bitflags::bitflags;
use core::fmt;
use core::fmt::Display;
use core::str::FromStr;
use serde::Deserialize;
use serde::Serialize;

bitflags! {
    /// The instruction kinds a table accepts.
    #[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
    #[derive(Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct InstructionKinds: u8 {
        const APPLY_ACTIONS  = 1 << 0;
        const CLEAR_ACTIONS  = 1 << 1;
        const WRITE_ACTIONS  = 1 << 2;
        const WRITE_METADATA = 1 << 3;
        const GOTO_TABLE     = 1 << 4;
        const METER          = 1 << 5;
        const EXPERIMENTER   = 1 << 6;
    }
}

pub const NUM_INSTRUCTION_KINDS: usize = 7;

#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum Instruction {
    ApplyActions(ActionList),
    ClearActions,
    WriteActions(ActionList),
    WriteMetadata { value: u64, mask: u64 },
    GotoTable(u8),
    Meter(u32),
    Experimenter(u32),
}

impl Instruction {
    /// Position on the ladder.
    fn slot(&self) -> usize {
        match self {
            Self::ApplyActions(_) => 0,
            Self::ClearActions => 1,
            Self::WriteActions(_) => 2,
            Self::WriteMetadata { .. } => 3,
            Self::GotoTable(_) => 4,
            Self::Meter(_) => 5,
            Self::Experimenter(_) => 6,
        }
    }

    pub fn kind(&self) -> InstructionKinds {
        InstructionKinds::from_bits_truncate(1 << self.slot())
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::ApplyActions(_) => "APPLY_ACTIONS",
            Self::ClearActions => "CLEAR_ACTIONS",
            Self::WriteActions(_) => "WRITE_ACTIONS",
            Self::WriteMetadata { .. } => "WRITE_METADATA",
            Self::GotoTable(_) => "GOTO_TABLE",
            Self::Meter(_) => "METER",
            Self::Experimenter(_) => "EXPERIMENTER",
        }
    }

    /// The action list carried by this instruction, if any.
    pub fn actions(&self) -> Option<&ActionList> {
        match self {
            Self::ApplyActions(l) | Self::WriteActions(l) => Some(l),
            _ => None,
        }
    }
}

impl Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::ApplyActions(l) => write!(f, "apply:{l}"),
            Self::ClearActions => write!(f, "clear"),
            Self::WriteActions(l) => write!(f, "write:{l}"),
            Self::WriteMetadata { value, mask } => {
                write!(f, "meta:{value:#x}/{mask:#x}")
            }
            Self::GotoTable(t) => write!(f, "goto:{t}"),
            Self::Meter(m) => write!(f, "meter:{m}"),
            Self::Experimenter(id) => write!(f, "experimenter:{id:#x}"),
        }
    }
}

fn parse_u64(s: &str) -> Result<u64, String> {
    let s = s.trim();
    let res = match s.strip_prefix("0x") {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse::<u64>(),
    };
    res.map_err(|e| format!("bad integer {s}: {e}"))
}

impl FromStr for Instruction {
    type Err = String;

    /// Parse the `Display` form: `apply:output:1,pop_vlan`, `clear`,
    /// `write:group:3`, `meta:0x10/0xff`, `goto:2`, `meter:1`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (name, arg) = match s.split_once(':') {
            Some((n, a)) => (n, a),
            None => (s, ""),
        };

        let actions = |a: &str| -> Result<ActionList, String> {
            a.split(',')
                .filter(|p| !p.trim().is_empty())
                .map(|p| p.parse::<Action>())
                .collect::<Result<Vec<_>, _>>()
                .map(ActionList::from)
        };

        match name.to_ascii_lowercase().as_str() {
            "apply" => Ok(Self::ApplyActions(actions(arg)?)),
            "clear" => Ok(Self::ClearActions),
            "write" => Ok(Self::WriteActions(actions(arg)?)),
            "meta" => {
                let (v, m) = match arg.split_once('/') {
                    Some((v, m)) => (parse_u64(v)?, parse_u64(m)?),
                    None => (parse_u64(arg)?, u64::MAX),
                };
                Ok(Self::WriteMetadata { value: v, mask: m })
            }
            "goto" => {
                let t = parse_u64(arg)?;
                let t = u8::try_from(t).map_err(|e| e.to_string())?;
                Ok(Self::GotoTable(t))
            }
            "meter" => {
                let m = u32::try_from(parse_u64(arg)?);
                Ok(Self::Meter(m.map_err(|e| e.to_string())?))
            }
            "experimenter" => {
                let id = u32::try_from(parse_u64(arg)?);
                Ok(Self::Experimenter(id.map_err(|e| e.to_string())?))
            }
            _ => Err(format!("unknown instruction: {name}")),
        }
    }
}

/// The instructions of one flow entry, at most one per kind.
#[derive(Clone, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(from = "Vec<Instruction>", into = "Vec<Instruction>")]
pub struct InstructionSet {
    ladder: [Option<Instruction>; NUM_INSTRUCTION_KINDS],
}

impl From<Vec<Instruction>> for InstructionSet {
    fn from(insts: Vec<Instruction>) -> Self {
        let mut set = Self::new();
        for i in insts {
            set.insert(i);
        }
        set
    }
}

impl From<InstructionSet> for Vec<Instruction> {
    fn from(set: InstructionSet) -> Self {
        set.ladder.into_iter().flatten().collect()
    }
}

impl InstructionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// An instruction set made of a single apply-actions.
    pub fn apply(actions: impl Into<ActionList>) -> Self {
        Self::new().with(Instruction::ApplyActions(actions.into()))
    }

    /// Place `inst` on the ladder, returning the instruction of the
    /// same kind it displaced.
    pub fn insert(&mut self, inst: Instruction) -> Option<Instruction> {
        let slot = inst.slot();
        self.ladder[slot].replace(inst)
    }

    pub fn with(mut self, inst: Instruction) -> Self {
        self.insert(inst);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.ladder.iter().all(Option::is_none)
    }

    pub fn len(&self) -> usize {
        self.ladder.iter().flatten().count()
    }

    /// The instructions in execution order.
    pub fn iter(&self) -> impl Iterator<Item = &Instruction> + '_ {
        self.ladder.iter().flatten()
    }

    pub fn kinds(&self) -> InstructionKinds {
        self.iter().fold(InstructionKinds::empty(), |acc, i| acc | i.kind())
    }

    pub fn apply_actions(&self) -> Option<&ActionList> {
        match &self.ladder[0] {
            Some(Instruction::ApplyActions(l)) => Some(l),
            _ => None,
        }
    }

    pub fn write_actions(&self) -> Option<&ActionList> {
        match &self.ladder[2] {
            Some(Instruction::WriteActions(l)) => Some(l),
            _ => None,
        }
    }

    pub fn goto_table(&self) -> Option<u8> {
        match self.ladder[4] {
            Some(Instruction::GotoTable(t)) => Some(t),
            _ => None,
        }
    }

    fn action_lists(&self) -> impl Iterator<Item = &ActionList> + '_ {
        self.iter().filter_map(Instruction::actions)
    }

    /// Does any action list output to `port`? `PORT_ANY` always
    /// matches.
    pub fn has_output(&self, port: u32) -> bool {
        port == crate::api::PORT_ANY
            || self.action_lists().any(|l| l.has_output(port))
    }

    /// Does any action list reference group `id`? `GROUP_ANY` always
    /// matches.
    pub fn has_group(&self, id: u32) -> bool {
        id == crate::api::GROUP_ANY
            || self.action_lists().any(|l| l.has_group(id))
    }

    /// Every group referenced by the set.
    pub fn groups(&self) -> impl Iterator<Item = u32> + '_ {
        self.action_lists().flat_map(|l| l.groups())
    }

    /// The total of output and group actions across all lists.
    pub fn num_outputs(&self) -> u32 {
        self.action_lists().map(|l| l.num_outputs()).sum()
    }

    pub fn dump(&self) -> Vec<String> {
        self.iter().map(|i| i.to_string()).collect()
    }
}

impl Display for InstructionSet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "drop");
        }

        let mut first = true;
        for i in self.iter() {
            if !first {
                write!(f, " ")?;
            }
            write!(f, "{i}")?;
            first = false;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::api::GROUP_ANY;
    use crate::api::PORT_ANY;

    #[test]
    fn ladder_order() {
        let set = InstructionSet::from(vec![
            Instruction::GotoTable(3),
            Instruction::WriteActions(ActionList::new().with(Action::output(2))),
            Instruction::ApplyActions(ActionList::new().with(Action::PopVlan)),
            Instruction::ClearActions,
        ]);

        let names: Vec<_> = set.iter().map(|i| i.name()).collect();
        assert_eq!(
            names,
            vec!["APPLY_ACTIONS", "CLEAR_ACTIONS", "WRITE_ACTIONS", "GOTO_TABLE"]
        );
        assert_eq!(set.goto_table(), Some(3));
        assert_eq!(
            set.kinds(),
            InstructionKinds::APPLY_ACTIONS
                | InstructionKinds::CLEAR_ACTIONS
                | InstructionKinds::WRITE_ACTIONS
                | InstructionKinds::GOTO_TABLE
        );
    }

    #[test]
    fn insert_replaces() {
        let mut set = InstructionSet::new().with(Instruction::GotoTable(1));
        let old = set.insert(Instruction::GotoTable(2));
        assert_eq!(old, Some(Instruction::GotoTable(1)));
        assert_eq!(set.len(), 1);
        assert_eq!(set.goto_table(), Some(2));
    }

    #[test]
    fn references() {
        let set = InstructionSet::apply(vec![Action::output(4)]).with(
            Instruction::WriteActions(ActionList::from(vec![Action::Group(9)])),
        );
        assert!(set.has_output(4));
        assert!(set.has_output(PORT_ANY));
        assert!(!set.has_output(5));
        assert!(set.has_group(9));
        assert!(set.has_group(GROUP_ANY));
        assert!(!set.has_group(8));
        assert_eq!(set.groups().collect::<Vec<_>>(), vec![9]);
        assert_eq!(set.num_outputs(), 2);
    }

    #[test]
    fn parse_and_display() {
        let i: Instruction = "apply:output:1,pop_vlan".parse().unwrap();
        assert_eq!(
            i,
            Instruction::ApplyActions(ActionList::from(vec![
                Action::output(1),
                Action::PopVlan
            ]))
        );
        assert_eq!(i.to_string(), "apply:output:1,pop_vlan");

        let i: Instruction = "meta:0x10/0xff".parse().unwrap();
        assert_eq!(i, Instruction::WriteMetadata { value: 0x10, mask: 0xff });
        assert_eq!("goto:2".parse::<Instruction>(), Ok(Instruction::GotoTable(2)));
        assert!("goto:300".parse::<Instruction>().is_err());
        assert_eq!(InstructionSet::new().to_string(), "drop");
    }
}
