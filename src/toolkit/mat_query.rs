use crate::composition::Composition;
use crate::nuclide::NucId;
use crate::nuclide::data::NuclideData;
use crate::resource::ResourceLike;
use crate::resource::material::Material;

/// Read-only interrogation of a material's isotopics.
///
/// Thin sugar over quantity × fraction arithmetic; used by preference
/// functions and tests.
pub struct MatQuery<'a> {
    mat: &'a Material,
}

impl<'a> MatQuery<'a> {
    pub fn new(mat: &'a Material) -> Self {
        Self { mat }
    }

    /// Total mass in kg.
    pub fn qty(&self) -> f64 {
        self.mat.quantity()
    }

    /// Mass of one nuclide in kg.
    pub fn mass(&self, nuc: NucId) -> f64 {
        self.qty() * self.mat.comp().mass_frac(nuc)
    }

    /// Moles of one nuclide.
    pub fn moles(&self, nuc: NucId) -> f64 {
        // kg -> g, divided by grams per mole.
        self.mass(nuc) * 1e3 / crate::nuclide::data::bundled().atomic_mass(nuc)
    }

    pub fn mass_frac(&self, nuc: NucId) -> f64 {
        self.mat.comp().mass_frac(nuc)
    }

    pub fn atom_frac(&self, nuc: NucId) -> f64 {
        self.mat.comp().atom_frac(nuc)
    }

    /// The largest quantity of `comp` extractable from this material.
    pub fn amt(&self, comp: &Composition) -> f64 {
        comp.mass()
            .iter()
            .map(|(nuc, frac)| self.mass(*nuc) / frac)
            .fold(f64::INFINITY, f64::min)
    }
}
