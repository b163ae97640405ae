use std::collections::VecDeque;

use crate::check::report::{Finding, FindingKind, Findings};
use crate::raw::{RawBundle, RawRef};
use crate::schema::SchemaRegistry;
use crate::types::Iid;

/// Walks the owning structure of a raw bundle.
///
/// Reports instances owned twice (as schema mismatches, since the bundle no
/// longer says which parent is authoritative), owned references leaving the
/// bundle, instances only reachable through weak references, and instances
/// that cannot be reached from any root.
pub fn check_ownership(registry: &SchemaRegistry, raw: &RawBundle, findings: &mut Findings) {
    let len = raw.instances.len();
    let mut owners: Vec<Vec<(Iid, &str)>> = vec![Vec::new(); len];
    let mut owned_edges: Vec<Vec<Iid>> = vec![Vec::new(); len];
    let mut weak_targets = vec![false; len];

    for (idx, inst) in raw.instances.iter().enumerate() {
        let holder = Iid(idx as u32);
        let Ok(class) = registry.lookup(&inst.class_name) else {
            continue;
        };
        for (name, value) in &inst.fields {
            let Some(spec) = class.field(name) else {
                continue;
            };
            let owning = spec.is_owning();
            value.visit_refs(&mut |reference| match reference {
                RawRef::Local(target) if target.index() < len => {
                    if owning {
                        owners[target.index()].push((holder, name.as_str()));
                        owned_edges[idx].push(target);
                    } else {
                        weak_targets[target.index()] = true;
                    }
                }
                RawRef::Cross(addr) if owning => findings.push(
                    Finding::warning(
                        FindingKind::Ownership,
                        format!("owned reference leaves the bundle to {addr}"),
                    )
                    .at(holder, &inst.uuid)
                    .in_field(name),
                ),
                _ => {}
            });
        }
    }

    for (idx, parents) in owners.iter().enumerate() {
        if parents.len() > 1 {
            let list = parents
                .iter()
                .map(|(iid, field)| format!("{iid}.{field}"))
                .collect::<Vec<_>>()
                .join(", ");
            findings.push(
                Finding::error(
                    FindingKind::SchemaMismatch,
                    format!("instance has {} owners: {list}", parents.len()),
                )
                .at(Iid(idx as u32), &raw.instances[idx].uuid),
            );
        }
    }

    let mut owned = vec![false; len];
    let mut queue = VecDeque::new();
    for root in &raw.roots {
        if root.index() >= len {
            continue;
        }
        if let Some((parent, field)) = owners[root.index()].first() {
            findings.push(
                Finding::info(
                    FindingKind::Ownership,
                    format!("root is also owned by {parent}.{field}"),
                )
                .at(*root, &raw.instances[root.index()].uuid),
            );
        }
        if !owned[root.index()] {
            owned[root.index()] = true;
            queue.push_back(*root);
        }
    }
    while let Some(iid) = queue.pop_front() {
        for child in &owned_edges[iid.index()] {
            if !owned[child.index()] {
                owned[child.index()] = true;
                queue.push_back(*child);
            }
        }
    }

    let reachable = raw.reachable();
    for (idx, inst) in raw.instances.iter().enumerate() {
        if owned[idx] {
            continue;
        }
        let iid = Iid(idx as u32);
        if reachable.contains(&iid) && weak_targets[idx] {
            findings.push(
                Finding::error(
                    FindingKind::Ownership,
                    "instance is weakly referenced but not owned by anything reachable",
                )
                .at(iid, &inst.uuid),
            );
        } else if reachable.contains(&iid) {
            findings.push(
                Finding::warning(
                    FindingKind::Ownership,
                    "instance is only reachable through unowned instances",
                )
                .at(iid, &inst.uuid),
            );
        } else {
            findings.push(
                Finding::warning(FindingKind::Ownership, "instance is unreachable from the roots")
                    .at(iid, &inst.uuid),
            );
        }
    }
}
