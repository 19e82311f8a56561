// src/solver/mod.rs

//! Constraint-based dependency resolution
//!
//! The solver treats every candidate package as a boolean variable: true
//! means "must end up installed", false means "must end up absent".
//! Dependency edges impose implications (a true package forces its
//! dependencies true), conflict edges impose mutual exclusion, requested
//! packages are forced true, and already-installed packages are retained
//! true unless a conflict forces them out.
//!
//! Resolution is deterministic: identical inputs produce identical
//! solutions under both execution strategies. The parallel strategy only
//! parallelizes closure discovery over independent request roots; the
//! merge and propagation phases are sequential and keyed by fingerprint.

use crate::error::{Error, Result};
use crate::package::Package;
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use tracing::debug;

/// Execution strategy for resolution
///
/// Both strategies implement the same contract and return identical
/// solutions for identical inputs; `Parallel` is a performance
/// optimization over independent subtrees of the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolverStrategy {
    Sequential,
    /// Bounded concurrency with an explicit worker count
    Parallel(usize),
}

/// The solver's atomic output: one boolean decision about one package
#[derive(Debug, Clone, PartialEq)]
pub struct PackageAssert {
    pub package: Package,
    pub value: bool,
}

/// An ordered collection of assertions, unique by package fingerprint
#[derive(Debug, Clone, PartialEq)]
pub struct Solution {
    asserts: Vec<PackageAssert>,
    by_fingerprint: HashMap<String, usize>,
    /// World priority rank per fingerprint, used as the ordering tie-break
    rank: HashMap<String, usize>,
}

impl Solution {
    fn new(asserts: Vec<PackageAssert>, rank: HashMap<String, usize>) -> Self {
        let by_fingerprint = asserts
            .iter()
            .enumerate()
            .map(|(i, a)| (a.package.fingerprint(), i))
            .collect();
        Self {
            asserts,
            by_fingerprint,
            rank,
        }
    }

    pub fn asserts(&self) -> &[PackageAssert] {
        &self.asserts
    }

    pub fn len(&self) -> usize {
        self.asserts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.asserts.is_empty()
    }

    pub fn get(&self, fingerprint: &str) -> Option<&PackageAssert> {
        self.by_fingerprint
            .get(fingerprint)
            .map(|&i| &self.asserts[i])
    }

    /// The subset of this solution reachable from `fingerprint` through
    /// dependency edges, ordered so that every dependency assertion
    /// precedes the assertions of the packages depending on it.
    ///
    /// Ties are broken by world priority rank, then by fingerprint.
    pub fn order(&self, fingerprint: &str) -> Result<Vec<PackageAssert>> {
        if !self.by_fingerprint.contains_key(fingerprint) {
            return Err(Error::NotFoundError(format!(
                "Fingerprint {} is not part of the solution",
                fingerprint
            )));
        }

        // Restrict to the subgraph reachable through dependency edges
        let mut reachable: BTreeMap<String, &Package> = BTreeMap::new();
        let mut queue = VecDeque::new();
        queue.push_back(fingerprint.to_string());
        while let Some(fp) = queue.pop_front() {
            if reachable.contains_key(&fp) {
                continue;
            }
            let Some(assert) = self.get(&fp) else { continue };
            reachable.insert(fp, &assert.package);
            for dep in &assert.package.requires {
                let dep_fp = dep.fingerprint();
                if self.by_fingerprint.contains_key(&dep_fp) {
                    queue.push_back(dep_fp);
                }
            }
        }

        let sorted = topo_sort_deps_first(&reachable, &self.rank)?;
        Ok(sorted
            .into_iter()
            .map(|fp| self.get(&fp).expect("sorted entries come from the solution").clone())
            .collect())
    }
}

/// Topological sort over dependency edges restricted to `subset`
///
/// Returns fingerprints dependencies-first. Ready candidates are drained
/// in (rank, fingerprint) order so the result is deterministic.
fn topo_sort_deps_first(
    subset: &BTreeMap<String, &Package>,
    rank: &HashMap<String, usize>,
) -> Result<Vec<String>> {
    let key = |fp: &str| (rank.get(fp).copied().unwrap_or(usize::MAX), fp.to_string());

    let mut in_degree: HashMap<String, usize> = HashMap::new();
    let mut dependents: HashMap<String, Vec<String>> = HashMap::new();

    for (fp, pkg) in subset {
        let mut degree = 0;
        for dep in &pkg.requires {
            let dep_fp = dep.fingerprint();
            if subset.contains_key(&dep_fp) {
                degree += 1;
                dependents.entry(dep_fp).or_default().push(fp.clone());
            }
        }
        in_degree.insert(fp.clone(), degree);
    }

    let mut ready: BTreeSet<(usize, String)> = in_degree
        .iter()
        .filter(|&(_, &d)| d == 0)
        .map(|(fp, _)| key(fp))
        .collect();

    let mut result = Vec::with_capacity(subset.len());
    while let Some(entry) = ready.pop_first() {
        let fp = entry.1;
        if let Some(deps) = dependents.get(&fp) {
            for dependent in deps {
                let degree = in_degree
                    .get_mut(dependent)
                    .expect("dependent tracked in in_degree");
                *degree -= 1;
                if *degree == 0 {
                    ready.insert(key(dependent));
                }
            }
        }
        result.push(fp);
    }

    if result.len() != subset.len() {
        return Err(Error::ResolutionError(
            "Circular dependency detected in package graph".to_string(),
        ));
    }

    Ok(result)
}

/// Dependency/conflict resolver over an installed set and a world
pub struct Solver<'a> {
    installed: &'a [Package],
    world: &'a [Package],
    strategy: SolverStrategy,
}

impl<'a> Solver<'a> {
    pub fn new(installed: &'a [Package], world: &'a [Package], strategy: SolverStrategy) -> Self {
        Self {
            installed,
            world,
            strategy,
        }
    }

    /// Assign a value to every package reachable from `wanted` through
    /// dependency and conflict edges, retaining installed packages.
    ///
    /// Fails with `ResolutionError` when a dependency is missing from the
    /// world or when constraints are mutually unsatisfiable.
    pub fn install(&self, wanted: &[Package]) -> Result<Solution> {
        let (index, rank) = self.world_index();

        // Installed specs are expected to be world-resolved by the caller;
        // unmatched ones are kept as-is.
        let installed: Vec<Package> = self
            .installed
            .iter()
            .map(|p| index.get(&p.fingerprint()).cloned().cloned().unwrap_or_else(|| p.clone()))
            .collect();
        let installed_index: HashMap<String, Package> = installed
            .iter()
            .map(|p| (p.fingerprint(), p.clone()))
            .collect();

        let roots: Vec<Package> = wanted
            .iter()
            .map(|p| index.get(&p.fingerprint()).cloned().cloned().unwrap_or_else(|| p.clone()))
            .collect();

        // Closure discovery: everything reachable from the request roots.
        // Independent subtrees may be discovered concurrently; the merge is
        // keyed by fingerprint so the outcome is strategy-independent.
        let closures: Vec<BTreeMap<String, Package>> = match self.strategy {
            SolverStrategy::Sequential => roots
                .iter()
                .map(|r| self.closure_of(r, &index, &installed_index, true))
                .collect::<Result<_>>()?,
            SolverStrategy::Parallel(workers) => {
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(workers.max(1))
                    .build()
                    .map_err(|e| Error::InitError(format!("Failed building solver pool: {}", e)))?;
                pool.install(|| {
                    roots
                        .par_iter()
                        .map(|r| self.closure_of(r, &index, &installed_index, true))
                        .collect::<Result<_>>()
                })?
            }
        };

        let mut candidates: BTreeMap<String, Package> = BTreeMap::new();
        for closure in closures {
            candidates.extend(closure);
        }
        // Installed packages participate with their own closures so the
        // solution stays dependency-closed around retained entries.
        for pkg in &installed {
            candidates.extend(self.closure_of(pkg, &index, &installed_index, false)?);
        }

        // Constraint propagation, request roots first
        let mut values: HashMap<String, bool> = HashMap::new();
        for root in &roots {
            propagate_true(&root.fingerprint(), &candidates, &mut values)?;
        }

        // Stability: installed packages stay true unless that contradicts
        // the request, in which case they are asserted out.
        for pkg in &installed {
            let fp = pkg.fingerprint();
            if values.contains_key(&fp) {
                continue;
            }
            let mut tentative = values.clone();
            match propagate_true(&fp, &candidates, &mut tentative) {
                Ok(()) => values = tentative,
                Err(e) => {
                    debug!("Retaining {} is unsatisfiable ({}), asserting removal", fp, e);
                    values.insert(fp, false);
                }
            }
        }

        // Remaining candidates were only reached through conflict edges and
        // are not needed by anything: assert them absent.
        let asserts: Vec<PackageAssert> = candidates
            .iter()
            .map(|(fp, pkg)| PackageAssert {
                package: pkg.clone(),
                value: values.get(fp).copied().unwrap_or(false),
            })
            .collect();

        Ok(self.into_solution(asserts, rank))
    }

    /// Compute the set of installed packages that must be removed to
    /// remove `target`, including orphaned dependencies.
    ///
    /// Closed world: the installed set doubles as the world. A dependency
    /// of the target is only removed when no installed package outside
    /// the target's dependency closure still reaches it.
    pub fn uninstall(&self, target: &Package) -> Result<Solution> {
        let target_fp = target.fingerprint();
        let installed: BTreeMap<String, &Package> = self
            .installed
            .iter()
            .map(|p| (p.fingerprint(), p))
            .collect();

        if !installed.contains_key(&target_fp) {
            return Err(Error::NotInstalledError(target_fp));
        }

        let rank: HashMap<String, usize> = self
            .installed
            .iter()
            .enumerate()
            .map(|(i, p)| (p.fingerprint(), i))
            .collect();

        // Dependency closure of the target within the installed set:
        // removal candidates
        let mut closure: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<String> = VecDeque::from([target_fp.clone()]);
        while let Some(fp) = queue.pop_front() {
            if !closure.insert(fp.clone()) {
                continue;
            }
            if let Some(pkg) = installed.get(&fp) {
                for dep in &pkg.requires {
                    let dep_fp = dep.fingerprint();
                    if installed.contains_key(&dep_fp) {
                        queue.push_back(dep_fp);
                    }
                }
            }
        }

        let remaining: BTreeMap<&String, &Package> = installed
            .iter()
            .filter(|(fp, _)| **fp != target_fp)
            .map(|(fp, p)| (fp, *p))
            .collect();

        // Roots: installed packages outside the closure. Closure members
        // they can still reach are kept; the rest is orphaned.
        let mut reachable: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<String> = remaining
            .keys()
            .filter(|fp| !closure.contains(**fp))
            .map(|fp| (*fp).clone())
            .collect();
        while let Some(fp) = queue.pop_front() {
            if !reachable.insert(fp.clone()) {
                continue;
            }
            if let Some(pkg) = remaining.get(&fp) {
                for dep in &pkg.requires {
                    let dep_fp = dep.fingerprint();
                    if remaining.contains_key(&dep_fp) {
                        queue.push_back(dep_fp);
                    }
                }
            }
        }

        let removal: BTreeMap<String, &Package> = installed
            .iter()
            .filter(|(fp, _)| closure.contains(*fp) && !reachable.contains(*fp))
            .map(|(fp, p)| (fp.clone(), *p))
            .collect();

        // Dependents are removed before their dependencies
        let mut sorted = topo_sort_deps_first(&removal, &rank)?;
        sorted.reverse();

        let asserts = sorted
            .into_iter()
            .map(|fp| PackageAssert {
                package: (*removal.get(&fp).expect("sorted entries come from removal set")).clone(),
                value: false,
            })
            .collect();
        Ok(Solution::new(asserts, rank))
    }

    /// World index by fingerprint; the first occurrence wins so repository
    /// priority order is preserved.
    fn world_index(&self) -> (HashMap<String, &'a Package>, HashMap<String, usize>) {
        let mut index = HashMap::new();
        let mut rank = HashMap::new();
        for (pos, pkg) in self.world.iter().enumerate() {
            let fp = pkg.fingerprint();
            index.entry(fp.clone()).or_insert(pkg);
            rank.entry(fp).or_insert(pos);
        }
        (index, rank)
    }

    /// Everything reachable from `root` through dependency and conflict
    /// edges. With `strict` set, a dependency that resolves against
    /// neither the world nor the installed set is a resolution error;
    /// otherwise it is skipped (installed specs without world
    /// counterparts keep dangling edges).
    fn closure_of(
        &self,
        root: &Package,
        index: &HashMap<String, &Package>,
        installed_index: &HashMap<String, Package>,
        strict: bool,
    ) -> Result<BTreeMap<String, Package>> {
        let resolve = |fp: &str| -> Option<Package> {
            index
                .get(fp)
                .map(|p| (*p).clone())
                .or_else(|| installed_index.get(fp).cloned())
        };

        let mut closure: BTreeMap<String, Package> = BTreeMap::new();
        let mut stack = vec![root.clone()];
        while let Some(pkg) = stack.pop() {
            let fp = pkg.fingerprint();
            if closure.contains_key(&fp) {
                continue;
            }
            for dep in &pkg.requires {
                let dep_fp = dep.fingerprint();
                if closure.contains_key(&dep_fp) {
                    continue;
                }
                match resolve(&dep_fp) {
                    Some(dep_pkg) => stack.push(dep_pkg),
                    None if strict => {
                        return Err(Error::ResolutionError(format!(
                            "Package {} requires {} which is not present in the world",
                            fp, dep_fp
                        )));
                    }
                    None => debug!("Skipping unresolvable dependency {} of {}", dep_fp, fp),
                }
            }
            // Conflict targets only constrain the problem when they exist
            // somewhere; a conflict with an unknown identity is vacuous.
            for conflict in &pkg.conflicts {
                let conflict_fp = conflict.fingerprint();
                if closure.contains_key(&conflict_fp) {
                    continue;
                }
                if let Some(conflict_pkg) = resolve(&conflict_fp) {
                    stack.push(conflict_pkg);
                }
            }
            closure.insert(fp, pkg);
        }
        Ok(closure)
    }

    fn into_solution(&self, asserts: Vec<PackageAssert>, rank: HashMap<String, usize>) -> Solution {
        let mut sorted = asserts;
        sorted.sort_by(|a, b| {
            let ka = (
                rank.get(&a.package.fingerprint()).copied().unwrap_or(usize::MAX),
                a.package.fingerprint(),
            );
            let kb = (
                rank.get(&b.package.fingerprint()).copied().unwrap_or(usize::MAX),
                b.package.fingerprint(),
            );
            ka.cmp(&kb)
        });
        Solution::new(sorted, rank)
    }
}

/// Force `fp` true, its dependencies true, and its conflicts false,
/// recursively. Fails when a previous assignment contradicts the new one.
fn propagate_true(
    fp: &str,
    candidates: &BTreeMap<String, Package>,
    values: &mut HashMap<String, bool>,
) -> Result<()> {
    match values.get(fp) {
        Some(true) => return Ok(()),
        Some(false) => {
            return Err(Error::ResolutionError(format!(
                "Package {} is required but excluded by a conflict",
                fp
            )));
        }
        None => {}
    }
    values.insert(fp.to_string(), true);

    let Some(pkg) = candidates.get(fp) else {
        // Bare reference with no definition anywhere; nothing to propagate.
        return Ok(());
    };

    for conflict in &pkg.conflicts {
        let conflict_fp = conflict.fingerprint();
        match values.get(&conflict_fp) {
            Some(true) => {
                return Err(Error::ResolutionError(format!(
                    "Package {} conflicts with {}",
                    fp, conflict_fp
                )));
            }
            Some(false) => {}
            None => {
                values.insert(conflict_fp, false);
            }
        }
    }

    for dep in &pkg.requires {
        let dep_fp = dep.fingerprint();
        if candidates.contains_key(&dep_fp) {
            propagate_true(&dep_fp, candidates, values)?;
        }
    }

    Ok(())
}
