// -------------------------------------------------------------------------------------------------
//  Copyright (C) 2015-2026 Nautech Systems Pty Ltd. All rights reserved.
//  https://nautechsystems.io
//
//  Licensed under the GNU Lesser General Public License Version 3.0 (the "License");
//  You may not use this file except in compliance with the License.
//  You may obtain a copy of the License at https://www.gnu.org/licenses/lgpl-3.0.en.html
//
//  Unless required by applicable law or agreed to in writing, software
//  distributed under the License is distributed on an "AS IS" BASIS,
//  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//  See the License for the specific language governing permissions and
//  limitations under the License.
// -------------------------------------------------------------------------------------------------

//! Per-field version upgrades.
//!
//! Classes accumulate rename and type-change upgrades over their version
//! history. When a document stores an older version, the handler walks each
//! field's applicable chain, taking the step that reaches the highest
//! version each time. A rename applies before a type change at the same
//! step, so the converter addresses the field by its new name.

use std::collections::BTreeMap;
use std::rc::Rc;

use ustr::Ustr;
use velcro_core::{TypeUuid, crc::crc32};

use super::{context::SerializeContext, element::DataElementNode, error::ErrorHandler};

/// Kind of one upgrade step. Ordering places renames ahead of type changes
/// at the same target version.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum UpgradeKind {
    Rename,
    TypeChange,
}

pub(crate) type NodeConvertFn =
    Rc<dyn Fn(&SerializeContext, &mut DataElementNode, &mut ErrorHandler) -> bool>;

/// One registered upgrade step for a field.
pub struct FieldUpgrade {
    pub kind: UpgradeKind,
    pub from_version: u32,
    pub to_version: u32,
    /// Name addressing the field when this step applies.
    pub field_name: Ustr,
    /// Rename target; equals `field_name` for type changes.
    pub new_name: Ustr,
    pub from_uuid: TypeUuid,
    pub to_uuid: TypeUuid,
    pub(crate) convert: Option<NodeConvertFn>,
}

impl FieldUpgrade {
    /// Creates a rename step.
    #[must_use]
    pub fn rename(old_name: &str, new_name: &str, from_version: u32, to_version: u32) -> Self {
        Self {
            kind: UpgradeKind::Rename,
            from_version,
            to_version,
            field_name: Ustr::from(old_name),
            new_name: Ustr::from(new_name),
            from_uuid: TypeUuid::NIL,
            to_uuid: TypeUuid::NIL,
            convert: None,
        }
    }

    /// Creates a type-change step. The field is addressed by its
    /// post-rename name at the same step.
    #[must_use]
    pub(crate) fn type_change(
        field_name: &str,
        from_version: u32,
        to_version: u32,
        from_uuid: TypeUuid,
        to_uuid: TypeUuid,
        convert: NodeConvertFn,
    ) -> Self {
        Self {
            kind: UpgradeKind::TypeChange,
            from_version,
            to_version,
            field_name: Ustr::from(field_name),
            new_name: Ustr::from(field_name),
            from_uuid,
            to_uuid,
            convert: Some(convert),
        }
    }
}

/// The per-class upgrade table: field CRC → from-version → ordered steps.
#[derive(Default)]
pub struct UpgradeHandler {
    upgrades: BTreeMap<u32, BTreeMap<u32, Vec<FieldUpgrade>>>,
}

impl UpgradeHandler {
    /// Creates an empty [`UpgradeHandler`] instance.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns whether any upgrade is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.upgrades.is_empty()
    }

    /// Registers one step. Duplicates (same kind, field and from-version)
    /// are rejected.
    pub(crate) fn add(&mut self, upgrade: FieldUpgrade) -> bool {
        if upgrade.to_version <= upgrade.from_version {
            log::error!(
                "UpgradeHandler: step for '{}' must raise the version ({} -> {})",
                upgrade.field_name,
                upgrade.from_version,
                upgrade.to_version,
            );
            return false;
        }
        let steps = self
            .upgrades
            .entry(crc32(upgrade.field_name.as_str()))
            .or_default()
            .entry(upgrade.from_version)
            .or_default();
        if steps.iter().any(|existing| existing.kind == upgrade.kind) {
            log::error!(
                "UpgradeHandler: duplicate {:?} upgrade for '{}' from version {}",
                upgrade.kind,
                upgrade.field_name,
                upgrade.from_version,
            );
            return false;
        }
        // Higher target first; renames ahead of type changes at equal target
        let position = steps.iter().position(|existing| {
            upgrade.to_version > existing.to_version
                || (upgrade.to_version == existing.to_version && upgrade.kind < existing.kind)
        });
        match position {
            Some(index) => steps.insert(index, upgrade),
            None => steps.push(upgrade),
        }
        true
    }

    /// Upgrades every child of `parent`, whose class was stored at
    /// `stored_version`, to the newest version each chain reaches.
    pub(crate) fn apply(
        &self,
        ctx: &SerializeContext,
        parent: &mut DataElementNode,
        stored_version: u32,
        errors: &mut ErrorHandler,
    ) {
        for index in 0..parent.children.len() {
            let mut version = stored_version;
            loop {
                let name_crc = parent.children[index].element.name_crc;
                let target = self.best_step(name_crc, version);
                let Some(target) = target else {
                    break;
                };

                // Renames at the chosen step, addressed by the current name
                if let Some(per_field) = self.upgrades.get(&name_crc) {
                    for (_, steps) in per_field.range(..=version) {
                        for step in steps {
                            if step.to_version == target && step.kind == UpgradeKind::Rename {
                                let child = &mut parent.children[index];
                                child.element.name = step.new_name;
                                child.element.name_crc = crc32(step.new_name.as_str());
                            }
                        }
                    }
                }

                // Type changes at the same step address the post-rename name
                let current_crc = parent.children[index].element.name_crc;
                if let Some(per_field) = self.upgrades.get(&current_crc) {
                    for (_, steps) in per_field.range(..=version) {
                        for step in steps {
                            if step.to_version == target && step.kind == UpgradeKind::TypeChange {
                                if let Some(convert) = &step.convert {
                                    if !convert(ctx, &mut parent.children[index], errors) {
                                        errors.report_error(&format!(
                                            "type upgrade of '{}' to version {target} failed",
                                            parent.children[index].element.name,
                                        ));
                                    }
                                }
                            }
                        }
                    }
                }

                version = target;
            }
        }
    }

    /// Highest version reachable in one step for the field at `name_crc`
    /// stored at `version`.
    fn best_step(&self, name_crc: u32, version: u32) -> Option<u32> {
        let per_field = self.upgrades.get(&name_crc)?;
        let mut best = None;
        for (_, steps) in per_field.range(..=version) {
            for step in steps {
                if step.to_version > version {
                    best = Some(best.map_or(step.to_version, |b: u32| b.max(step.to_version)));
                }
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    fn test_add_rejects_non_raising_step() {
        let mut handler = UpgradeHandler::new();
        assert!(!handler.add(FieldUpgrade::rename("a", "b", 2, 2)));
        assert!(handler.is_empty());
    }

    #[rstest]
    fn test_add_rejects_duplicate() {
        let mut handler = UpgradeHandler::new();
        assert!(handler.add(FieldUpgrade::rename("a", "b", 1, 2)));
        assert!(!handler.add(FieldUpgrade::rename("a", "c", 1, 3)));
    }

    #[rstest]
    fn test_best_step_maximizes_target() {
        let mut handler = UpgradeHandler::new();
        handler.add(FieldUpgrade::rename("a", "b", 1, 2));
        handler.add(FieldUpgrade::rename("b", "c", 2, 4));

        assert_eq!(handler.best_step(crc32("a"), 1), Some(2));
        assert_eq!(handler.best_step(crc32("b"), 2), Some(4));
        assert_eq!(handler.best_step(crc32("b"), 4), None);
        assert_eq!(handler.best_step(crc32("missing"), 1), None);
    }
}
