use std::sync::OnceLock;

use crate::nuclide::NucId;

/// Pure lookup interface over the nuclear-data table.
///
/// The engine consumes exactly three facts per nuclide: its atomic mass,
/// its half-life, and its decay children with branch ratios. Everything
/// else about nuclear data lives outside the core.
pub trait NuclideData {
    /// Atomic mass in grams per mole. Falls back to the mass number for
    /// nuclides absent from the table.
    fn atomic_mass(&self, nuc: NucId) -> f64;

    /// Half-life in seconds; `f64::INFINITY` for stable nuclides.
    ///
    /// A nuclide missing from the table is treated as stable.
    fn half_life(&self, nuc: NucId) -> f64;

    /// Decay children as `(child, branch ratio)` pairs. Empty for stable
    /// or unknown nuclides.
    fn decay_children(&self, nuc: NucId) -> Vec<(NucId, f64)>;

    /// Decay constant in `1/s`; zero for stable nuclides.
    fn decay_constant(&self, nuc: NucId) -> f64 {
        let hl = self.half_life(nuc);
        if hl.is_finite() {
            std::f64::consts::LN_2 / hl
        } else {
            0.0
        }
    }
}

const fn id(z: u32, a: u32) -> u32 {
    z * 10_000_000 + a * 10_000
}

/// Seconds per Julian year.
const YEAR: f64 = 3.155_76e7;
/// Seconds per day.
const DAY: f64 = 8.64e4;
/// Seconds per hour.
const HOUR: f64 = 3.6e3;

struct NucEntry {
    id: u32,
    mass: f64,
    half_life: f64,
    children: &'static [(u32, f64)],
}

/// The bundled table: light nuclides, the main fission products, and the
/// actinides the fuel cycle actually moves. Nuclides outside the table are
/// stable with mass ≈ A.
static TABLE: &[NucEntry] = &[
    NucEntry { id: id(1, 1), mass: 1.007_825, half_life: f64::INFINITY, children: &[] },
    NucEntry { id: id(1, 2), mass: 2.014_102, half_life: f64::INFINITY, children: &[] },
    NucEntry { id: id(1, 3), mass: 3.016_049, half_life: 12.32 * YEAR, children: &[(id(2, 3), 1.0)] },
    NucEntry { id: id(2, 3), mass: 3.016_029, half_life: f64::INFINITY, children: &[] },
    NucEntry { id: id(2, 4), mass: 4.002_602, half_life: f64::INFINITY, children: &[] },
    NucEntry { id: id(6, 12), mass: 12.0, half_life: f64::INFINITY, children: &[] },
    NucEntry { id: id(6, 14), mass: 14.003_242, half_life: 5_730.0 * YEAR, children: &[(id(7, 14), 1.0)] },
    NucEntry { id: id(7, 14), mass: 14.003_074, half_life: f64::INFINITY, children: &[] },
    NucEntry { id: id(38, 90), mass: 89.907_73, half_life: 28.79 * YEAR, children: &[(id(39, 90), 1.0)] },
    NucEntry { id: id(39, 90), mass: 89.907_14, half_life: 64.05 * HOUR, children: &[(id(40, 90), 1.0)] },
    NucEntry { id: id(40, 90), mass: 89.904_70, half_life: f64::INFINITY, children: &[] },
    NucEntry { id: id(53, 131), mass: 130.906_13, half_life: 8.0252 * DAY, children: &[(id(54, 131), 1.0)] },
    NucEntry { id: id(54, 131), mass: 130.905_08, half_life: f64::INFINITY, children: &[] },
    NucEntry { id: id(55, 137), mass: 136.907_09, half_life: 30.08 * YEAR, children: &[(id(56, 137), 1.0)] },
    NucEntry { id: id(56, 137), mass: 136.905_83, half_life: f64::INFINITY, children: &[] },
    NucEntry { id: id(90, 230), mass: 230.033_13, half_life: 7.54e4 * YEAR, children: &[(id(88, 226), 1.0)] },
    NucEntry { id: id(90, 231), mass: 231.036_30, half_life: 25.52 * HOUR, children: &[(id(91, 231), 1.0)] },
    NucEntry { id: id(90, 232), mass: 232.038_06, half_life: 1.405e10 * YEAR, children: &[(id(88, 228), 1.0)] },
    NucEntry { id: id(90, 234), mass: 234.043_60, half_life: 24.10 * DAY, children: &[(id(91, 234), 1.0)] },
    NucEntry { id: id(91, 231), mass: 231.035_88, half_life: 3.276e4 * YEAR, children: &[(id(89, 227), 1.0)] },
    NucEntry { id: id(91, 233), mass: 233.040_25, half_life: 26.98 * DAY, children: &[(id(92, 233), 1.0)] },
    NucEntry { id: id(91, 234), mass: 234.043_31, half_life: 6.70 * HOUR, children: &[(id(92, 234), 1.0)] },
    NucEntry { id: id(92, 232), mass: 232.037_16, half_life: 68.9 * YEAR, children: &[(id(90, 228), 1.0)] },
    NucEntry { id: id(92, 233), mass: 233.039_64, half_life: 1.592e5 * YEAR, children: &[(id(90, 229), 1.0)] },
    NucEntry { id: id(92, 234), mass: 234.040_95, half_life: 2.455e5 * YEAR, children: &[(id(90, 230), 1.0)] },
    NucEntry { id: id(92, 235), mass: 235.043_93, half_life: 7.04e8 * YEAR, children: &[(id(90, 231), 1.0)] },
    NucEntry { id: id(92, 236), mass: 236.045_57, half_life: 2.342e7 * YEAR, children: &[(id(90, 232), 1.0)] },
    NucEntry { id: id(92, 238), mass: 238.050_79, half_life: 4.468e9 * YEAR, children: &[(id(90, 234), 1.0)] },
    NucEntry { id: id(93, 237), mass: 237.048_17, half_life: 2.144e6 * YEAR, children: &[(id(91, 233), 1.0)] },
    NucEntry { id: id(94, 238), mass: 238.049_56, half_life: 87.7 * YEAR, children: &[(id(92, 234), 1.0)] },
    NucEntry { id: id(94, 239), mass: 239.052_16, half_life: 2.411e4 * YEAR, children: &[(id(92, 235), 1.0)] },
    NucEntry { id: id(94, 240), mass: 240.053_81, half_life: 6_561.0 * YEAR, children: &[(id(92, 236), 1.0)] },
    NucEntry { id: id(94, 241), mass: 241.056_85, half_life: 14.29 * YEAR, children: &[(id(95, 241), 1.0)] },
    NucEntry { id: id(95, 241), mass: 241.056_83, half_life: 432.6 * YEAR, children: &[(id(93, 237), 1.0)] },
];

/// The table bundled with the crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct BundledNuclideData;

impl BundledNuclideData {
    fn entry(&self, nuc: NucId) -> Option<&'static NucEntry> {
        TABLE.iter().find(|e| e.id == nuc.raw())
    }
}

impl NuclideData for BundledNuclideData {
    fn atomic_mass(&self, nuc: NucId) -> f64 {
        match self.entry(nuc) {
            Some(e) => e.mass,
            None => nuc.a() as f64,
        }
    }

    fn half_life(&self, nuc: NucId) -> f64 {
        match self.entry(nuc) {
            Some(e) => e.half_life,
            None => f64::INFINITY,
        }
    }

    fn decay_children(&self, nuc: NucId) -> Vec<(NucId, f64)> {
        match self.entry(nuc) {
            Some(e) => e
                .children
                .iter()
                .map(|&(raw, br)| (NucId::new(raw / 10_000_000, raw / 10_000 % 1_000, 0).expect("table ids are canonical"), br))
                .collect(),
            None => Vec::new(),
        }
    }
}

/// Shared process-wide handle to the bundled table.
///
/// The only global state in the crate; initialize-once and immutable.
pub fn bundled() -> &'static BundledNuclideData {
    static INSTANCE: OnceLock<BundledNuclideData> = OnceLock::new();
    INSTANCE.get_or_init(BundledNuclideData::default)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn u235() -> NucId {
        NucId::new(92, 235, 0).unwrap()
    }

    #[test]
    fn grams_per_mol_lookup() {
        let data = bundled();
        assert!((data.atomic_mass(u235()) - 235.043_93).abs() < 1e-5);
        // Unknown nuclides fall back to the mass number.
        let tc99 = NucId::new(43, 99, 0).unwrap();
        assert_eq!(data.atomic_mass(tc99), 99.0);
    }

    #[test]
    fn missing_nuclides_are_stable() {
        let data = bundled();
        let tc99 = NucId::new(43, 99, 0).unwrap();
        assert!(data.half_life(tc99).is_infinite());
        assert_eq!(data.decay_constant(tc99), 0.0);
        assert!(data.decay_children(tc99).is_empty());
    }

    #[test]
    fn decay_constant_matches_half_life() {
        let data = bundled();
        let cs137 = NucId::new(55, 137, 0).unwrap();
        let lambda = data.decay_constant(cs137);
        let hl = data.half_life(cs137);
        assert!((lambda * hl - std::f64::consts::LN_2).abs() < 1e-12);
    }
}
