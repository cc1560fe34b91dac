//! The dependency resolver.
//!
//! Given requirements, fixed entries and a preservation policy, chooses one
//! version per transitively reachable package such that every compat edge of
//! every selected version is satisfied.
//!
//! The solver expands the reachable graph, filters candidates per policy,
//! prunes by constraint propagation to a fixed point, then assigns versions
//! highest-first with chronological backtracking, re-propagating after each
//! choice. The resolver never suspends; everything here is synchronous.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use anyhow::Result;
use semver::Version;
use tracing::{debug, trace};

pub use policy::{PreservePolicy, PreserveTier, UpgradeLevel};

use crate::core::uuid::JULIA_UUID;
use crate::core::{PackageName, ResolverError, TreeHash, Uuid, VersionSpec};
use crate::registry::RegistrySet;

pub mod policy;

/// A package whose version (and edges) the resolver must take as given:
/// path-tracked, repo-tracked and pinned entries.
#[derive(Clone, Debug)]
pub struct FixedPackage {
    pub name: PackageName,
    /// Path-tracked packages without a project version have `None`; compat
    /// edges pointing at them are then unenforceable and accepted as-is.
    pub version: Option<Version>,
    pub deps: BTreeMap<PackageName, Uuid>,
    pub compat: BTreeMap<PackageName, VersionSpec>,
}

/// Everything the resolver needs for one run.
pub struct ResolveRequest<'a> {
    pub registries: &'a RegistrySet,
    /// Direct requirements: `uuid → (name, spec)`.
    pub requirements: BTreeMap<Uuid, (PackageName, VersionSpec)>,
    pub fixed: BTreeMap<Uuid, FixedPackage>,
    pub policy: PreservePolicy,
    /// Versions from the previous manifest, consulted by preservation tiers.
    pub previous: BTreeMap<Uuid, Version>,
    pub julia_version: Version,
    /// Which tree hashes are already materialized; consulted by the
    /// `*_INSTALLED` policies.
    pub installed: Option<&'a dyn Fn(&PackageName, TreeHash) -> bool>,
}

/// One package of a complete assignment.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ResolvedPackage {
    pub name: PackageName,
    pub version: Option<Version>,
    pub tree_hash: Option<TreeHash>,
    pub deps: BTreeMap<PackageName, Uuid>,
    /// Whether this entry was fixed on input; the environment layer keeps the
    /// existing source identity of fixed entries untouched.
    pub fixed: bool,
}

/// A complete assignment `uuid → version` for every reachable package.
#[derive(Clone, Debug, Default)]
pub struct Resolution {
    pub packages: BTreeMap<Uuid, ResolvedPackage>,
}

#[tracing::instrument(level = "debug", skip_all, fields(policy = ?request.policy))]
pub fn resolve(request: &ResolveRequest<'_>) -> Result<Resolution> {
    let graph = Graph::expand(request)?;
    graph.check_fixed_cycles()?;

    let mut last_err: Option<ResolverError> = None;
    for tier in request.policy.tiers() {
        debug!(?tier, "attempting resolution tier");
        match graph.solve(request, tier) {
            Ok(resolution) => return Ok(resolution),
            Err(err @ ResolverError::Unsatisfiable { .. }) => last_err = Some(err),
            Err(err) => return Err(err.into()),
        }
    }
    Err(last_err.expect("every policy has at least one tier").into())
}

/// Per-version dependency edges: dep uuid → allowed spec.
type Edges = BTreeMap<Uuid, VersionSpec>;

struct Node {
    name: PackageName,
    /// Candidate versions in ascending order, before policy filtering.
    versions: Vec<Version>,
    /// All registry versions, for error reporting.
    available: Vec<Version>,
    /// Keyed by version; versionless fixed nodes keep a single sentinel row.
    edges: HashMap<Version, Edges>,
    /// Optional-extension edges: they never pull a package into the graph,
    /// but constrain its version when something else already did.
    weak_edges: HashMap<Version, Edges>,
    tree_hashes: HashMap<Version, TreeHash>,
    fixed: bool,
    /// Fixed package without a version; edges to it are unenforceable.
    versionless: bool,
}

struct Graph {
    nodes: BTreeMap<Uuid, Node>,
    roots: BTreeSet<Uuid>,
    requirement_specs: BTreeMap<Uuid, VersionSpec>,
}

impl Graph {
    /// Discovers every reachable package and collects per-version edge specs.
    fn expand(request: &ResolveRequest<'_>) -> Result<Graph> {
        let mut nodes: BTreeMap<Uuid, Node> = BTreeMap::new();
        let mut queue: VecDeque<(Uuid, PackageName)> = VecDeque::new();

        nodes.insert(
            JULIA_UUID,
            Node {
                name: PackageName::JULIA,
                versions: vec![request.julia_version.clone()],
                available: vec![request.julia_version.clone()],
                edges: HashMap::new(),
                weak_edges: HashMap::new(),
                tree_hashes: HashMap::new(),
                fixed: true,
                versionless: false,
            },
        );

        for (uuid, fixed) in &request.fixed {
            let mut edges = Edges::new();
            for (dep_name, dep_uuid) in &fixed.deps {
                let spec = fixed
                    .compat
                    .get(dep_name)
                    .cloned()
                    .unwrap_or_else(VersionSpec::any);
                edges.insert(*dep_uuid, spec);
                queue.push_back((*dep_uuid, dep_name.clone()));
            }
            let versions: Vec<Version> = fixed.version.clone().into_iter().collect();
            let sentinel = fixed
                .version
                .clone()
                .unwrap_or_else(|| Version::new(0, 0, 0));
            nodes.insert(
                *uuid,
                Node {
                    name: fixed.name.clone(),
                    available: versions.clone(),
                    versions,
                    edges: HashMap::from([(sentinel, edges)]),
                    weak_edges: HashMap::new(),
                    tree_hashes: HashMap::new(),
                    fixed: true,
                    versionless: fixed.version.is_none(),
                },
            );
        }

        for (uuid, (name, _)) in &request.requirements {
            if !nodes.contains_key(uuid) {
                queue.push_back((*uuid, name.clone()));
            }
        }

        while let Some((uuid, name)) = queue.pop_front() {
            if nodes.contains_key(&uuid) {
                continue;
            }
            // Stdlib packages ship with the runtime: fixed, versionless, no
            // edges, and never looked up in a registry.
            if let Some(stdlib_name) = crate::core::stdlib::stdlib_name(uuid) {
                nodes.insert(
                    uuid,
                    Node {
                        name: stdlib_name.clone(),
                        versions: Vec::new(),
                        available: Vec::new(),
                        edges: HashMap::from([(Version::new(0, 0, 0), Edges::new())]),
                        weak_edges: HashMap::new(),
                        tree_hashes: HashMap::new(),
                        fixed: true,
                        versionless: true,
                    },
                );
                continue;
            }
            let view = request.registries.query(uuid)?.ok_or_else(|| {
                ResolverError::UnknownPackage {
                    name: name.clone(),
                    uuid: Some(uuid),
                }
            })?;

            let mut versions = Vec::new();
            let mut available = Vec::new();
            let mut edges = HashMap::new();
            let mut weak_edges = HashMap::new();
            let mut tree_hashes = HashMap::new();
            for (version, info) in &view.versions {
                available.push(version.clone());
                if info.yanked {
                    continue;
                }
                let deps = view.deps_for(version);
                let compat = view.compat_for(version);
                let mut edge_map = Edges::new();
                for (dep_name, dep_uuid) in deps {
                    let spec = compat
                        .get(&dep_name)
                        .cloned()
                        .unwrap_or_else(VersionSpec::any);
                    edge_map.insert(dep_uuid, spec);
                    if !nodes.contains_key(&dep_uuid) {
                        queue.push_back((dep_uuid, dep_name));
                    }
                }
                edges.insert(version.clone(), edge_map);

                // Weak deps are not enqueued: they never pull a package in.
                let weak_compat = view.weak_compat_for(version);
                let mut weak_map = Edges::new();
                for (dep_name, dep_uuid) in view.weak_deps_for(version) {
                    let spec = weak_compat
                        .get(&dep_name)
                        .cloned()
                        .unwrap_or_else(VersionSpec::any);
                    weak_map.insert(dep_uuid, spec);
                }
                if !weak_map.is_empty() {
                    weak_edges.insert(version.clone(), weak_map);
                }

                tree_hashes.insert(version.clone(), info.tree_hash);
                versions.push(version.clone());
            }
            versions.sort();
            available.sort();

            nodes.insert(
                uuid,
                Node {
                    name: view.name,
                    versions,
                    available,
                    edges,
                    weak_edges,
                    tree_hashes,
                    fixed: false,
                    versionless: false,
                },
            );
        }

        let roots = request
            .requirements
            .keys()
            .chain(request.fixed.keys())
            .copied()
            .chain([JULIA_UUID])
            .collect();

        let requirement_specs = request
            .requirements
            .iter()
            .map(|(uuid, (_, spec))| (*uuid, spec.clone()))
            .collect();

        Ok(Graph {
            nodes,
            roots,
            requirement_specs,
        })
    }

    fn edges_of<'g>(&'g self, uuid: Uuid, version: &Version) -> Option<&'g Edges> {
        let node = &self.nodes[&uuid];
        if node.versionless {
            node.edges.values().next()
        } else {
            node.edges.get(version)
        }
    }

    /// Detects contradictory requirements among mutually-reachable fixed
    /// packages; ordinary dep cycles are legal because selection is by
    /// version, not by build order.
    fn check_fixed_cycles(&self) -> Result<(), ResolverError> {
        let fixed: BTreeSet<Uuid> = self
            .nodes
            .iter()
            .filter(|(_, n)| n.fixed)
            .map(|(u, _)| *u)
            .collect();
        for &a in &fixed {
            let node_a = &self.nodes[&a];
            for edges in node_a.edges.values() {
                for (&b, spec) in edges {
                    if !fixed.contains(&b) || b == a {
                        continue;
                    }
                    let node_b = &self.nodes[&b];
                    if node_b.versionless {
                        continue;
                    }
                    let violated = !node_b.versions.iter().any(|v| spec.contains(v));
                    if violated && self.fixed_reaches(b, a, &fixed) {
                        return Err(ResolverError::Cycle {
                            names: format!("{} <-> {}", node_a.name, node_b.name),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    fn fixed_reaches(&self, from: Uuid, to: Uuid, fixed: &BTreeSet<Uuid>) -> bool {
        let mut seen = BTreeSet::new();
        let mut queue = VecDeque::from([from]);
        while let Some(uuid) = queue.pop_front() {
            if uuid == to {
                return true;
            }
            if !seen.insert(uuid) {
                continue;
            }
            for edges in self.nodes[&uuid].edges.values() {
                queue.extend(edges.keys().filter(|u| fixed.contains(u)).copied());
            }
        }
        false
    }

    fn solve(
        &self,
        request: &ResolveRequest<'_>,
        tier: PreserveTier,
    ) -> Result<Resolution, ResolverError> {
        let mut candidates: BTreeMap<Uuid, Vec<Version>> = BTreeMap::new();

        for (&uuid, node) in &self.nodes {
            let mut versions = node.versions.clone();

            if !node.fixed {
                if let Some((_, spec)) = request.requirements.get(&uuid) {
                    versions.retain(|v| spec.contains(v));
                }
                let is_root = request.requirements.contains_key(&uuid);
                if let Some(previous) = request.previous.get(&uuid) {
                    if let Some(restriction) = tier.restriction(previous, is_root) {
                        versions.retain(|v| restriction.contains(v));
                    }
                }
                if request.policy.installed_only() {
                    if let Some(installed) = request.installed {
                        versions.retain(|v| {
                            node.tree_hashes
                                .get(v)
                                .is_some_and(|hash| installed(&node.name, *hash))
                        });
                    }
                }
            }

            if versions.is_empty() && !node.versionless {
                candidates.insert(uuid, versions);
                return Err(self.unsatisfiable(uuid, &candidates));
            }
            candidates.insert(uuid, versions);
        }

        self.apply_fixed_constraints(request, &mut candidates)?;
        self.propagate(&mut candidates)?;

        let assigned: BTreeMap<Uuid, Version> = self
            .nodes
            .iter()
            .filter(|(_, n)| n.fixed && !n.versionless)
            .map(|(&u, n)| (u, n.versions[0].clone()))
            .collect();

        let assignment = self.select(candidates, assigned)?;
        Ok(self.materialize(&assignment))
    }

    /// Fixed packages are certainly part of the solution, so their edges
    /// constrain children unconditionally. Also rejects a fixed version that
    /// violates a requirement or another fixed package's compat.
    fn apply_fixed_constraints(
        &self,
        request: &ResolveRequest<'_>,
        candidates: &mut BTreeMap<Uuid, Vec<Version>>,
    ) -> Result<(), ResolverError> {
        for (&uuid, node) in &self.nodes {
            if !node.fixed || node.versionless {
                continue;
            }
            if let Some((_, spec)) = request.requirements.get(&uuid) {
                if !node.versions.iter().any(|v| spec.contains(v)) {
                    return Err(self.unsatisfiable(uuid, candidates));
                }
            }
        }

        let mut constraints: Vec<(Uuid, VersionSpec)> = Vec::new();
        for (&uuid, node) in &self.nodes {
            if !node.fixed {
                continue;
            }
            for edges in node.edges.values() {
                for (&dep_uuid, spec) in edges {
                    if dep_uuid == uuid {
                        continue;
                    }
                    constraints.push((dep_uuid, spec.clone()));
                }
            }
        }
        for (dep_uuid, spec) in constraints {
            let Some(dep_node) = self.nodes.get(&dep_uuid) else {
                continue;
            };
            if dep_node.versionless {
                continue;
            }
            if dep_node.fixed {
                if !dep_node.versions.iter().any(|v| spec.contains(v)) {
                    return Err(self.unsatisfiable(dep_uuid, candidates));
                }
                continue;
            }
            let set = candidates.get_mut(&dep_uuid).expect("node has candidates");
            set.retain(|v| spec.contains(v));
            if candidates[&dep_uuid].is_empty() {
                return Err(self.unsatisfiable(dep_uuid, candidates));
            }
        }
        Ok(())
    }

    /// Drops versions whose dependency edges cannot be satisfied by any
    /// remaining candidate, until nothing shrinks.
    fn propagate(
        &self,
        candidates: &mut BTreeMap<Uuid, Vec<Version>>,
    ) -> Result<(), ResolverError> {
        loop {
            let mut changed = false;
            for (&uuid, node) in &self.nodes {
                if node.fixed {
                    continue;
                }
                let before = candidates[&uuid].len();
                if before == 0 {
                    return Err(self.unsatisfiable(uuid, candidates));
                }
                let retained: Vec<Version> = candidates[&uuid]
                    .iter()
                    .filter(|version| self.version_viable(uuid, version, candidates))
                    .cloned()
                    .collect();
                if retained.is_empty() {
                    return Err(self.unsatisfiable(uuid, candidates));
                }
                if retained.len() != before {
                    changed = true;
                    candidates.insert(uuid, retained);
                }
            }
            if !changed {
                return Ok(());
            }
        }
    }

    fn version_viable(
        &self,
        uuid: Uuid,
        version: &Version,
        candidates: &BTreeMap<Uuid, Vec<Version>>,
    ) -> bool {
        let strong_ok = match self.edges_of(uuid, version) {
            None => true,
            Some(edges) => edges.iter().all(|(dep_uuid, spec)| {
                let Some(dep_node) = self.nodes.get(dep_uuid) else {
                    return false;
                };
                if dep_node.versionless {
                    return true;
                }
                candidates
                    .get(dep_uuid)
                    .is_some_and(|versions| versions.iter().any(|v| spec.contains(v)))
            }),
        };
        if !strong_ok {
            return false;
        }
        // Weak edges apply only to packages something else already reached.
        match self.nodes[&uuid].weak_edges.get(version) {
            None => true,
            Some(edges) => edges.iter().all(|(dep_uuid, spec)| {
                let Some(dep_node) = self.nodes.get(dep_uuid) else {
                    return true;
                };
                if dep_node.versionless {
                    return true;
                }
                candidates
                    .get(dep_uuid)
                    .map_or(true, |versions| versions.iter().any(|v| spec.contains(v)))
            }),
        }
    }

    /// Highest-first assignment with chronological backtracking.
    ///
    /// Only packages reachable from the roots through already-chosen edges are
    /// assigned; a package no chosen version depends on never blocks the
    /// search. Trying candidates from the top makes the first full assignment
    /// maximal: no single package could be raised with the rest held fixed.
    fn select(
        &self,
        candidates: BTreeMap<Uuid, Vec<Version>>,
        assigned: BTreeMap<Uuid, Version>,
    ) -> Result<BTreeMap<Uuid, Version>, ResolverError> {
        let Some(next) = self.next_unassigned(&candidates, &assigned) else {
            return Ok(assigned);
        };

        let options = candidates[&next].clone();
        for version in options.iter().rev() {
            trace!(uuid = %next, %version, "trying candidate");
            let mut forked = candidates.clone();
            forked.insert(next, vec![version.clone()]);
            if self.propagate(&mut forked).is_err() {
                continue;
            }
            let mut assigned = assigned.clone();
            assigned.insert(next, version.clone());
            match self.select(forked, assigned) {
                Ok(solution) => return Ok(solution),
                Err(ResolverError::Unsatisfiable { .. }) => continue,
                Err(err) => return Err(err),
            }
        }

        Err(self.unsatisfiable(next, &candidates))
    }

    /// The first package reachable through chosen edges that still lacks an
    /// assignment, in deterministic order.
    fn next_unassigned(
        &self,
        candidates: &BTreeMap<Uuid, Vec<Version>>,
        assigned: &BTreeMap<Uuid, Version>,
    ) -> Option<Uuid> {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<Uuid> = self.roots.iter().copied().collect();
        let mut frontier: BTreeSet<Uuid> = BTreeSet::new();
        while let Some(uuid) = queue.pop_front() {
            if !seen.insert(uuid) {
                continue;
            }
            let node = &self.nodes[&uuid];
            if node.versionless {
                for edges in node.edges.values() {
                    queue.extend(edges.keys().copied());
                }
            } else if let Some(version) = assigned.get(&uuid) {
                if let Some(edges) = self.edges_of(uuid, version) {
                    queue.extend(edges.keys().copied());
                }
            } else if candidates.contains_key(&uuid) {
                frontier.insert(uuid);
            }
        }
        frontier.into_iter().next()
    }

    fn unsatisfiable(
        &self,
        uuid: Uuid,
        candidates: &BTreeMap<Uuid, Vec<Version>>,
    ) -> ResolverError {
        let node = &self.nodes[&uuid];
        // The tightest constraint: the requirement spec intersected with
        // every live parent edge pointing at this package.
        let mut requested = self
            .requirement_specs
            .get(&uuid)
            .cloned()
            .unwrap_or_else(VersionSpec::any);
        for (&parent, parent_node) in &self.nodes {
            if parent == uuid {
                continue;
            }
            let live: &[Version] = candidates
                .get(&parent)
                .map(Vec::as_slice)
                .unwrap_or(&parent_node.versions);
            let mut parent_spec: Option<VersionSpec> = None;
            for version in live {
                if let Some(edges) = self.edges_of(parent, version) {
                    if let Some(spec) = edges.get(&uuid) {
                        parent_spec = Some(match parent_spec {
                            None => spec.clone(),
                            Some(acc) => acc.union(spec),
                        });
                    }
                }
            }
            if parent_node.versionless {
                if let Some(edges) = parent_node.edges.values().next() {
                    if let Some(spec) = edges.get(&uuid) {
                        parent_spec = Some(spec.clone());
                    }
                }
            }
            if let Some(spec) = parent_spec {
                requested = requested.intersect(&spec);
            }
        }
        ResolverError::Unsatisfiable {
            uuid,
            name: node.name.clone(),
            requested,
            available: node.available.clone(),
        }
    }

    /// Builds the final resolution from the assignment, keeping only packages
    /// reachable through chosen edges and stripping the host-language anchor.
    fn materialize(&self, assignment: &BTreeMap<Uuid, Version>) -> Resolution {
        let mut packages = BTreeMap::new();
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<Uuid> = self.roots.iter().copied().collect();
        while let Some(uuid) = queue.pop_front() {
            if !seen.insert(uuid) || uuid == JULIA_UUID {
                continue;
            }
            let node = &self.nodes[&uuid];
            let version = assignment.get(&uuid);

            let mut deps = BTreeMap::new();
            let edges = match version {
                Some(version) => self.edges_of(uuid, version),
                None if node.versionless => node.edges.values().next(),
                None => None,
            };
            if let Some(edges) = edges {
                for &dep_uuid in edges.keys() {
                    queue.push_back(dep_uuid);
                    if dep_uuid == JULIA_UUID {
                        continue;
                    }
                    deps.insert(self.nodes[&dep_uuid].name.clone(), dep_uuid);
                }
            }

            let tree_hash = version.and_then(|v| node.tree_hashes.get(v).copied());
            packages.insert(
                uuid,
                ResolvedPackage {
                    name: node.name.clone(),
                    version: version.cloned(),
                    tree_hash,
                    deps,
                    fixed: node.fixed,
                },
            );
        }
        Resolution { packages }
    }
}

#[cfg(test)]
mod tests;
