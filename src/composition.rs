pub mod decay;

use std::cmp::Ordering;
use std::fmt;
use std::sync::{Arc, OnceLock};

use ordered_float::OrderedFloat;

use crate::error::{SimResult, ValueError};
use crate::impl_display_primitive;
use crate::nuclide::data::{NuclideData, bundled};
use crate::nuclide::NucId;
use crate::sorted_vec_map::SortedVecMap;

/// Normalized nuclide → fraction vector.
pub type CompMap = SortedVecMap<NucId, f64>;

/// Shared handle to an immutable composition.
///
/// Compositions are freely shared by reference; decay lineage reuse relies
/// on handing out the *same* `Arc` for the same `(root, elapsed)` pair.
pub type CompRef = Arc<Composition>;

/// Persistent composition id, assigned on first recording.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
pub struct QualId(pub u64);
impl_display_primitive!(QualId);

/// Tolerance for fraction normalization checks.
pub const COMP_EPS: f64 = 1e-12;

/// An immutable, normalized isotopic vector held in both bases.
///
/// Both the mass and atom bases are stored normalized to sum 1; the
/// mass-to-atom ratio (grams per mole of the mixture) is cached at
/// construction. A composition produced by decay points back at its parent,
/// forming a lineage rooted at the first recorded composition.
pub struct Composition {
    mass: CompMap,
    atom: CompMap,
    /// Grams per mole of the mixture; converts between the two bases.
    grams_per_mol: f64,
    /// Assigned once, on first recording.
    qual: OnceLock<QualId>,
    /// Decay lineage: the composition this one was decayed from.
    parent: Option<CompRef>,
    /// Timesteps elapsed between `parent` and this composition.
    decay_time: u32,
}

impl Composition {
    /// Builds a composition from mass fractions.
    ///
    /// Fractions are validated (finite, non-negative) and normalized; the
    /// atom basis is derived through the bundled atomic-mass table.
    pub fn from_mass<I>(map: I) -> SimResult<CompRef>
    where
        I: IntoIterator<Item = (NucId, f64)>,
    {
        let mass = validate_and_normalize(map)?;
        let data = bundled();

        // atoms_i ∝ mass_i / M_i
        let mut atom = CompMap::new();
        let mut mol_per_gram = 0.0;
        for (&nuc, &frac) in mass.iter() {
            let moles = frac / data.atomic_mass(nuc);
            atom.insert(nuc, moles);
            mol_per_gram += moles;
        }
        for v in atom.values_mut() {
            *v /= mol_per_gram;
        }

        Ok(Arc::new(Self {
            mass,
            atom,
            grams_per_mol: 1.0 / mol_per_gram,
            qual: OnceLock::new(),
            parent: None,
            decay_time: 0,
        }))
    }

    /// Builds a composition from atom fractions.
    pub fn from_atom<I>(map: I) -> SimResult<CompRef>
    where
        I: IntoIterator<Item = (NucId, f64)>,
    {
        let atom = validate_and_normalize(map)?;
        let data = bundled();

        // mass_i ∝ atom_i * M_i
        let mut mass = CompMap::new();
        let mut grams_per_mol = 0.0;
        for (&nuc, &frac) in atom.iter() {
            let grams = frac * data.atomic_mass(nuc);
            mass.insert(nuc, grams);
            grams_per_mol += grams;
        }
        for v in mass.values_mut() {
            *v /= grams_per_mol;
        }

        Ok(Arc::new(Self {
            mass,
            atom,
            grams_per_mol,
            qual: OnceLock::new(),
            parent: None,
            decay_time: 0,
        }))
    }

    /// Mass-weighted combination of several compositions.
    ///
    /// `parts` pairs a composition with the mass it contributes; this is the
    /// mixing rule behind `Material::absorb` and buffer squashing.
    pub fn mix<'a, I>(parts: I) -> SimResult<CompRef>
    where
        I: IntoIterator<Item = (&'a CompRef, f64)>,
    {
        let mut mixed = CompMap::new();
        for (comp, mass) in parts {
            if mass < 0.0 {
                return Err(ValueError::NegativeQuantity(mass).into());
            }
            for (&nuc, &frac) in comp.mass.iter() {
                mixed.update(nuc, 0.0, |v| *v += frac * mass);
            }
        }
        Self::from_mass(mixed)
    }

    pub(crate) fn with_lineage(
        child: CompRef,
        parent: CompRef,
        decay_time: u32,
    ) -> CompRef {
        Arc::new(Self {
            mass: child.mass.clone(),
            atom: child.atom.clone(),
            grams_per_mol: child.grams_per_mol,
            qual: OnceLock::new(),
            parent: Some(parent),
            decay_time,
        })
    }

    /// Normalized mass fractions.
    pub fn mass(&self) -> &CompMap {
        &self.mass
    }

    /// Normalized atom fractions.
    pub fn atom(&self) -> &CompMap {
        &self.atom
    }

    /// Mass fraction of a single nuclide, 0 if absent.
    pub fn mass_frac(&self, nuc: NucId) -> f64 {
        self.mass.get(&nuc).copied().unwrap_or(0.0)
    }

    /// Atom fraction of a single nuclide, 0 if absent.
    pub fn atom_frac(&self, nuc: NucId) -> f64 {
        self.atom.get(&nuc).copied().unwrap_or(0.0)
    }

    /// Grams per mole of the mixture.
    pub fn grams_per_mol(&self) -> f64 {
        self.grams_per_mol
    }

    /// The persistent id, if this composition has been recorded.
    pub fn qual(&self) -> Option<QualId> {
        self.qual.get().copied()
    }

    /// Whether this composition has been recorded.
    pub fn recorded(&self) -> bool {
        self.qual.get().is_some()
    }

    /// Assigns the persistent id; returns false if one was already set.
    pub(crate) fn assign_qual(&self, id: QualId) -> bool {
        self.qual.set(id).is_ok()
    }

    /// The composition this one was decayed from, if any.
    pub fn parent(&self) -> Option<&CompRef> {
        self.parent.as_ref()
    }

    /// Timesteps elapsed between the parent and this composition.
    pub fn decay_time(&self) -> u32 {
        self.decay_time
    }

    /// Walks the lineage to its root.
    pub fn root(mut comp: &CompRef) -> &CompRef {
        while let Some(parent) = comp.parent() {
            comp = parent;
        }
        comp
    }

    /// Total elapsed decay time from the lineage root to this composition.
    pub fn root_decay_time(comp: &CompRef) -> u32 {
        let mut total = comp.decay_time;
        let mut cur = comp;
        while let Some(parent) = cur.parent() {
            total += parent.decay_time;
            cur = parent;
        }
        total
    }
}

fn validate_and_normalize<I>(map: I) -> SimResult<CompMap>
where
    I: IntoIterator<Item = (NucId, f64)>,
{
    let mut out = CompMap::new();
    let mut sum = 0.0;
    for (nuc, frac) in map {
        if !frac.is_finite() || frac < 0.0 {
            return Err(ValueError::InvalidFraction {
                nuclide: nuc.name(),
                fraction: frac,
            }
            .into());
        }
        if frac == 0.0 {
            continue;
        }
        out.update(nuc, 0.0, |v| *v += frac);
        sum += frac;
    }
    if out.is_empty() || sum <= 0.0 {
        return Err(ValueError::EmptyComposition.into());
    }
    for v in out.values_mut() {
        *v /= sum;
    }
    Ok(out)
}

// Structural equality and ordering: recorded ids play no part, so two
// unrecorded compositions never collapse into one map key.
impl PartialEq for Composition {
    fn eq(&self, other: &Self) -> bool {
        self.cmp_structural(other) == Ordering::Equal
    }
}

impl Eq for Composition {}

impl PartialOrd for Composition {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp_structural(other))
    }
}

impl Ord for Composition {
    fn cmp(&self, other: &Self) -> Ordering {
        self.cmp_structural(other)
    }
}

impl Composition {
    fn cmp_structural(&self, other: &Self) -> Ordering {
        let lhs = self.mass.iter().map(|(k, v)| (*k, OrderedFloat(*v)));
        let rhs = other.mass.iter().map(|(k, v)| (*k, OrderedFloat(*v)));
        lhs.cmp(rhs)
    }
}

impl fmt::Debug for Composition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut dbg = f.debug_struct("Composition");
        dbg.field("qual", &self.qual());
        for (nuc, frac) in self.mass.iter() {
            dbg.field(&nuc.name(), frac);
        }
        dbg.finish()
    }
}
