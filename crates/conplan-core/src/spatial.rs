//! # Spatial Matcher
//!
//! Matches fine-resolution units (connectivity units) to planning units and
//! produces the area-weighted [`RescalingMapping`] used to rescale
//! connectivity matrices.
//!
//! Both unit sets must share one projected, area-preserving coordinate
//! system. Reprojection is the caller's job; a CRS label mismatch is refused.
//!
//! ## Edge rules
//!
//! | Rule | Weight of fine unit `f` in planning unit `p` |
//! |------|-----------------------------------------------|
//! | `Split` (default) | `area(f ∩ p) / area(f)` |
//! | `Include` | `area(f ∩ p) / area(f ∩ region)` (renormalized over the covered part) |
//! | `Exclude` | as `Split`, but `f` is dropped unless fully covered |
//! | `Majority` | `1` for the planning unit with the greatest overlap |
//!
//! Fine units that overlap no planning unit are orphans: they are reported
//! as a geometry warning and their connectivity is dropped (weight 0).

use crate::formats::GeometryDocument;
use crate::primitives::{SPATIAL_INDEX_THRESHOLD, SUM_TOLERANCE};
use crate::progress::Progress;
use crate::{ConplanError, Outcome, UnitId, Warning, WarningKind};
use geo::algorithm::line_intersection::line_intersection;
use geo::{Area, BooleanOps, BoundingRect, LineString, MultiPolygon};
use rstar::primitives::{GeomWithData, Rectangle};
use rstar::{AABB, RTree};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

// =============================================================================
// UNITS
// =============================================================================

/// A polygonal unit (planning unit or connectivity unit) with its area flags.
#[derive(Debug, Clone, PartialEq)]
pub struct SpatialUnit {
    /// Unit identifier, unique within its set.
    pub id: UnitId,
    /// Projected geometry.
    pub geometry: MultiPolygon<f64>,
    /// Overlaps a focus area.
    pub in_focus_area: bool,
    /// Overlaps an avoidance area.
    pub in_avoidance_area: bool,
}

impl SpatialUnit {
    /// Create an unflagged unit.
    #[must_use]
    pub fn new(id: UnitId, geometry: MultiPolygon<f64>) -> Self {
        Self {
            id,
            geometry,
            in_focus_area: false,
            in_avoidance_area: false,
        }
    }
}

/// A validated set of units sharing one coordinate reference system.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitSet {
    /// CRS label shared by every unit.
    pub crs: String,
    /// Units in document order.
    pub units: Vec<SpatialUnit>,
}

impl UnitSet {
    /// Build and validate a unit set from a geometry document.
    ///
    /// Fails with a `Geometry` error on duplicate ids, empty or zero-area
    /// geometry and self-intersecting rings.
    pub fn from_document(doc: &GeometryDocument) -> Result<Self, ConplanError> {
        let mut seen = BTreeSet::new();
        let mut units = Vec::with_capacity(doc.units.len());
        for raw in &doc.units {
            if !seen.insert(raw.id) {
                return Err(ConplanError::Geometry(format!(
                    "Unit id {} appears more than once",
                    raw.id
                )));
            }
            let geometry = raw.to_multi_polygon()?;
            validate_geometry(raw.id, &geometry)?;
            units.push(SpatialUnit::new(raw.id, geometry));
        }
        Ok(Self {
            crs: doc.crs.clone(),
            units,
        })
    }

    /// Ids of all units.
    #[must_use]
    pub fn ids(&self) -> BTreeSet<UnitId> {
        self.units.iter().map(|u| u.id).collect()
    }

    /// Ids of units flagged as inside a focus area.
    #[must_use]
    pub fn focus_units(&self) -> BTreeSet<UnitId> {
        self.units
            .iter()
            .filter(|u| u.in_focus_area)
            .map(|u| u.id)
            .collect()
    }

    /// Ids of units flagged as inside an avoidance area.
    #[must_use]
    pub fn avoidance_units(&self) -> BTreeSet<UnitId> {
        self.units
            .iter()
            .filter(|u| u.in_avoidance_area)
            .map(|u| u.id)
            .collect()
    }

    /// Flag units that overlap (with positive area) any focus or avoidance
    /// polygon. Flags are recomputed from scratch for every unit.
    pub fn annotate_areas(
        &mut self,
        focus: Option<&UnitSet>,
        avoidance: Option<&UnitSet>,
    ) -> Result<(), ConplanError> {
        for areas in [focus, avoidance].into_iter().flatten() {
            ensure_same_crs(&self.crs, &areas.crs)?;
        }
        for unit in &mut self.units {
            unit.in_focus_area = focus.is_some_and(|a| overlaps_any(&unit.geometry, a));
            unit.in_avoidance_area = avoidance.is_some_and(|a| overlaps_any(&unit.geometry, a));
        }
        Ok(())
    }

    fn envelopes(&self) -> Vec<Option<AABB<[f64; 2]>>> {
        self.units.iter().map(|u| envelope(&u.geometry)).collect()
    }
}

fn ensure_same_crs(a: &str, b: &str) -> Result<(), ConplanError> {
    if a.trim().eq_ignore_ascii_case(b.trim()) {
        Ok(())
    } else {
        Err(ConplanError::Configuration(format!(
            "Geometry sets use different coordinate systems ('{}' vs '{}'); reproject before matching",
            a, b
        )))
    }
}

fn envelope(geometry: &MultiPolygon<f64>) -> Option<AABB<[f64; 2]>> {
    geometry.bounding_rect().map(|r| {
        let (min, max) = (r.min(), r.max());
        AABB::from_corners([min.x, min.y], [max.x, max.y])
    })
}

fn overlaps_any(geometry: &MultiPolygon<f64>, areas: &UnitSet) -> bool {
    let Some(env) = envelope(geometry) else {
        return false;
    };
    areas.units.iter().any(|area| {
        envelope(&area.geometry).is_some_and(|a| boxes_intersect(&env, &a))
            && geometry.intersection(&area.geometry).unsigned_area() > 0.0
    })
}

fn boxes_intersect(a: &AABB<[f64; 2]>, b: &AABB<[f64; 2]>) -> bool {
    let (al, au) = (a.lower(), a.upper());
    let (bl, bu) = (b.lower(), b.upper());
    al[0] <= bu[0] && bl[0] <= au[0] && al[1] <= bu[1] && bl[1] <= au[1]
}

// =============================================================================
// VALIDATION
// =============================================================================

fn ring_self_intersects(ring: &LineString<f64>) -> bool {
    let segments: Vec<_> = ring.lines().collect();
    let n = segments.len();
    for i in 0..n {
        for j in (i + 2)..n {
            // first and last segments of a closed ring share a vertex
            if i == 0 && j == n - 1 {
                continue;
            }
            if line_intersection(segments[i], segments[j]).is_some() {
                return true;
            }
        }
    }
    false
}

/// Check that a geometry is a usable polygon set: non-empty, positive
/// area, rings of at least three distinct vertices, no self-intersections.
pub fn validate_geometry(id: UnitId, geometry: &MultiPolygon<f64>) -> Result<(), ConplanError> {
    if geometry.0.is_empty() {
        return Err(ConplanError::Geometry(format!("Unit {} has no polygons", id)));
    }
    for polygon in geometry {
        for ring in std::iter::once(polygon.exterior()).chain(polygon.interiors()) {
            // closed rings repeat the first vertex
            if ring.0.len() < 4 {
                return Err(ConplanError::Geometry(format!(
                    "Unit {} has a ring with fewer than three vertices",
                    id
                )));
            }
            if ring_self_intersects(ring) {
                return Err(ConplanError::Geometry(format!(
                    "Unit {} has a self-intersecting ring",
                    id
                )));
            }
        }
    }
    if geometry.unsigned_area() <= 0.0 {
        return Err(ConplanError::Geometry(format!("Unit {} has zero area", id)));
    }
    Ok(())
}

// =============================================================================
// RESCALING MAPPING
// =============================================================================

/// Policy for fine units that straddle planning-unit boundaries or the
/// edge of the planning region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeRule {
    /// Fractional contribution by overlap area.
    #[default]
    Split,
    /// Fractional contribution renormalized over the covered area.
    Include,
    /// Units not fully inside the planning region are dropped.
    Exclude,
    /// Whole unit assigned to the planning unit of greatest overlap.
    Majority,
}

impl FromStr for EdgeRule {
    type Err = ConplanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "split" => Ok(Self::Split),
            "include" => Ok(Self::Include),
            "exclude" => Ok(Self::Exclude),
            "majority" | "majority_rule" | "majority rule" => Ok(Self::Majority),
            other => Err(ConplanError::Configuration(format!(
                "Unknown edge rule '{}'. Use: split, include, exclude, majority",
                other
            ))),
        }
    }
}

/// Sparse mapping fine unit -> (planning unit -> weight).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RescalingMapping {
    weights: BTreeMap<UnitId, BTreeMap<UnitId, f64>>,
    planning_units: BTreeSet<UnitId>,
}

impl RescalingMapping {
    /// Create a mapping with the given planning-unit universe and no weights.
    #[must_use]
    pub fn new(planning_units: impl IntoIterator<Item = UnitId>) -> Self {
        Self {
            weights: BTreeMap::new(),
            planning_units: planning_units.into_iter().collect(),
        }
    }

    /// Mapping for identical grids: every unit maps onto itself.
    #[must_use]
    pub fn identity(ids: impl IntoIterator<Item = UnitId>) -> Self {
        let mut mapping = Self::default();
        for id in ids {
            mapping.set(id, id, 1.0);
        }
        mapping
    }

    /// Set the weight of `fine` in `planning`.
    pub fn set(&mut self, fine: UnitId, planning: UnitId, weight: f64) {
        self.planning_units.insert(planning);
        self.weights.entry(fine).or_default().insert(planning, weight);
    }

    /// Planning units a fine unit contributes to, with weights.
    pub fn targets(&self, fine: UnitId) -> impl Iterator<Item = (UnitId, f64)> + '_ {
        self.weights
            .get(&fine)
            .into_iter()
            .flat_map(|t| t.iter().map(|(k, v)| (*k, *v)))
    }

    /// Sum of a fine unit's weights (1 inside a fully covered region,
    /// 0 for dropped units).
    #[must_use]
    pub fn total(&self, fine: UnitId) -> f64 {
        self.targets(fine).map(|(_, w)| w).sum()
    }

    /// Fine units with at least one weight.
    pub fn fine_units(&self) -> impl Iterator<Item = UnitId> + '_ {
        self.weights.keys().copied()
    }

    /// Planning-unit universe.
    #[must_use]
    pub fn planning_units(&self) -> &BTreeSet<UnitId> {
        &self.planning_units
    }
}

// =============================================================================
// MATCHER
// =============================================================================

/// Computes rescaling mappings between two unit sets.
#[derive(Debug, Clone)]
pub struct SpatialMatcher {
    rule: EdgeRule,
    index_threshold: usize,
}

impl Default for SpatialMatcher {
    fn default() -> Self {
        Self::new(EdgeRule::default())
    }
}

impl SpatialMatcher {
    /// Create a matcher with the given edge rule.
    #[must_use]
    pub fn new(rule: EdgeRule) -> Self {
        Self {
            rule,
            index_threshold: SPATIAL_INDEX_THRESHOLD,
        }
    }

    /// Override the planning-unit count above which the R-tree is used.
    #[must_use]
    pub fn with_index_threshold(mut self, threshold: usize) -> Self {
        self.index_threshold = threshold;
        self
    }

    /// Match every fine unit against the planning units.
    pub fn match_units(
        &self,
        fine: &UnitSet,
        planning: &UnitSet,
        progress: &dyn Progress,
    ) -> Result<Outcome<RescalingMapping>, ConplanError> {
        ensure_same_crs(&fine.crs, &planning.crs)?;

        let pu_envelopes = planning.envelopes();
        let tree = (planning.units.len() > self.index_threshold).then(|| {
            RTree::bulk_load(
                pu_envelopes
                    .iter()
                    .enumerate()
                    .filter_map(|(i, env)| {
                        env.map(|e| GeomWithData::new(Rectangle::from_aabb(e), i))
                    })
                    .collect(),
            )
        });

        let mut mapping = RescalingMapping::new(planning.units.iter().map(|u| u.id));
        let mut orphans = Vec::new();
        let mut excluded = Vec::new();
        let total = fine.units.len();

        for (n, unit) in fine.units.iter().enumerate() {
            let area = unit.geometry.unsigned_area();
            let candidates: Vec<usize> = match (&tree, envelope(&unit.geometry)) {
                (_, None) => Vec::new(),
                (Some(tree), Some(env)) => {
                    let mut c: Vec<usize> = tree
                        .locate_in_envelope_intersecting(&env)
                        .map(|g| g.data)
                        .collect();
                    c.sort_unstable();
                    c
                }
                (None, Some(env)) => pu_envelopes
                    .iter()
                    .enumerate()
                    .filter(|(_, e)| e.as_ref().is_some_and(|e| boxes_intersect(&env, e)))
                    .map(|(i, _)| i)
                    .collect(),
            };

            let overlaps: Vec<(UnitId, f64)> = candidates
                .into_iter()
                .map(|i| {
                    let pu = &planning.units[i];
                    (pu.id, unit.geometry.intersection(&pu.geometry).unsigned_area())
                })
                .filter(|(_, a)| *a > area * f64::EPSILON)
                .collect();

            if overlaps.is_empty() {
                orphans.push(unit.id);
            } else {
                let covered: f64 = overlaps.iter().map(|(_, a)| a).sum();
                match self.rule {
                    EdgeRule::Split => {
                        for (pu, a) in &overlaps {
                            mapping.set(unit.id, *pu, a / area);
                        }
                    }
                    EdgeRule::Include => {
                        for (pu, a) in &overlaps {
                            mapping.set(unit.id, *pu, a / covered);
                        }
                    }
                    EdgeRule::Exclude => {
                        if covered / area < 1.0 - SUM_TOLERANCE {
                            excluded.push(unit.id);
                        } else {
                            for (pu, a) in &overlaps {
                                mapping.set(unit.id, *pu, a / area);
                            }
                        }
                    }
                    EdgeRule::Majority => {
                        // ties resolve to the lowest planning-unit id
                        let best = overlaps.iter().fold(None::<(UnitId, f64)>, |best, &(pu, a)| {
                            match best {
                                Some((bp, ba)) if ba > a || (ba == a && bp < pu) => Some((bp, ba)),
                                _ => Some((pu, a)),
                            }
                        });
                        if let Some((pu, _)) = best {
                            mapping.set(unit.id, pu, 1.0);
                        }
                    }
                }
            }
            progress.report("spatial match", n + 1, total);
        }

        let mut warnings = Vec::new();
        if !orphans.is_empty() {
            warnings.push(Warning::new(
                WarningKind::Geometry,
                format!(
                    "{} connectivity units do not overlap any planning unit and were dropped: {}",
                    orphans.len(),
                    sample(&orphans)
                ),
            ));
        }
        if !excluded.is_empty() {
            warnings.push(Warning::new(
                WarningKind::Geometry,
                format!(
                    "{} connectivity units straddle the planning region edge and were excluded: {}",
                    excluded.len(),
                    sample(&excluded)
                ),
            ));
        }
        tracing::info!(
            fine_units = total,
            planning_units = planning.units.len(),
            indexed = tree.is_some(),
            "spatial match complete"
        );
        Ok(Outcome::with_warnings(mapping, warnings))
    }
}

fn sample(ids: &[UnitId]) -> String {
    let mut s: Vec<String> = ids.iter().take(10).map(ToString::to_string).collect();
    if ids.len() > 10 {
        s.push("...".to_string());
    }
    s.join(", ")
}

// =============================================================================
// TESTS
// =============================================================================
