// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{config::Project, errors::DependencyCycle};
use std::collections::{BTreeMap, HashSet};

/// Depth-first post-order walk over `also_build` edges from each root in turn.
///
/// Every project appears at most once, after all of its dependencies. Names that aren't in the
/// table are treated as projects with no dependencies.
pub(crate) fn build_order<'g>(
    projects: &'g BTreeMap<String, Project>,
    roots: impl IntoIterator<Item = &'g str>,
) -> Result<Vec<String>, DependencyCycle> {
    let mut walk = Walk {
        projects,
        visited: HashSet::new(),
        stack: Vec::new(),
        order: Vec::new(),
    };
    for root in roots {
        walk.visit(root)?;
    }
    Ok(walk.order)
}

struct Walk<'g> {
    projects: &'g BTreeMap<String, Project>,
    visited: HashSet<&'g str>,
    // Projects currently being visited, outermost first.
    stack: Vec<&'g str>,
    order: Vec<String>,
}

impl<'g> Walk<'g> {
    fn visit(&mut self, name: &'g str) -> Result<(), DependencyCycle> {
        if let Some(pos) = self.stack.iter().position(|entry| *entry == name) {
            let cycle = self.stack[pos..]
                .iter()
                .chain(std::iter::once(&name))
                .map(|entry| (*entry).to_owned())
                .collect();
            return Err(DependencyCycle::new(cycle));
        }
        if !self.visited.insert(name) {
            return Ok(());
        }

        let projects = self.projects;
        self.stack.push(name);
        if let Some(project) = projects.get(name) {
            for dep in &project.also_build {
                self.visit(dep)?;
            }
        }
        self.stack.pop();

        self.order.push(name.to_owned());
        Ok(())
    }
}
