pub mod data;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{KeyError, SimResult};

/// Canonical nuclide identifier: `Z * 10_000_000 + A * 10_000 + S`.
///
/// `Z` is the proton number, `A` the mass number, and `S` the metastable
/// state (0 for ground). Every legacy form (ZZAAAM, MCNP, serpent,
/// element + mass number) canonicalizes into this encoding on entry;
/// downstream code stores and compares `NucId` only.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct NucId(u32);

impl NucId {
    /// Builds the canonical id from its parts, validating ranges.
    pub fn new(z: u32, a: u32, s: u32) -> SimResult<Self> {
        if z == 0 || z > 118 || a < z || a >= 300 || s > 9 {
            return Err(KeyError::Nuclide(format!("Z={z} A={a} S={s}")).into());
        }
        Ok(Self(z * 10_000_000 + a * 10_000 + s))
    }

    /// The raw canonical encoding.
    #[inline]
    pub fn raw(self) -> u32 {
        self.0
    }

    /// Proton number.
    #[inline]
    pub fn z(self) -> u32 {
        self.0 / 10_000_000
    }

    /// Mass number.
    #[inline]
    pub fn a(self) -> u32 {
        self.0 / 10_000 % 1_000
    }

    /// Metastable state (0 = ground).
    #[inline]
    pub fn s(self) -> u32 {
        self.0 % 10_000
    }

    /// Legacy `ZZAAAM` form: `Z * 10_000 + A * 10 + M`.
    pub fn zzaaam(self) -> u32 {
        self.z() * 10_000 + self.a() * 10 + self.s()
    }

    /// Canonicalizes a legacy `ZZAAAM` integer (e.g. `922350`).
    pub fn from_zzaaam(zzaaam: u32) -> SimResult<Self> {
        Self::new(zzaaam / 10_000, zzaaam / 10 % 1_000, zzaaam % 10)
    }

    /// Canonicalizes an MCNP nuclide (`ZZZAAA`; metastables encode the mass
    /// field as `A + 300 + 100 * S`, e.g. `95642` for Am-242m).
    pub fn from_mcnp(mcnp: u32) -> SimResult<Self> {
        let z = mcnp / 1_000;
        let field = mcnp % 1_000;
        if field > 300 {
            for s in 1..=4 {
                let a = field.checked_sub(300 + 100 * s);
                if let Some(a) = a
                    && a < 300
                    && a >= z
                {
                    return Self::new(z, a, s);
                }
            }
            return Err(KeyError::Nuclide(format!("mcnp:{mcnp}")).into());
        }
        Self::new(z, field, 0)
    }

    /// Canonicalizes a serpent-style name: `"U-235"`, `"Am-242m"`.
    pub fn from_serpent(name: &str) -> SimResult<Self> {
        let (sym, rest) = name
            .split_once('-')
            .ok_or_else(|| KeyError::Nuclide(name.to_string()))?;
        let (a_str, s) = match rest.strip_suffix(['m', 'M']) {
            Some(stripped) => (stripped, 1),
            None => (rest, 0),
        };
        let z = z_of_symbol(sym).ok_or_else(|| KeyError::Nuclide(name.to_string()))?;
        let a = a_str
            .parse::<u32>()
            .map_err(|_| KeyError::Nuclide(name.to_string()))?;
        Self::new(z, a, s)
    }

    /// Canonicalizes a compact name: `"U235"`, `"u235m"`, or a raw canonical
    /// integer rendered as a string.
    pub fn from_name(name: &str) -> SimResult<Self> {
        if let Ok(raw) = name.parse::<u32>() {
            return Self::new(raw / 10_000_000, raw / 10_000 % 1_000, raw % 10_000);
        }
        let split = name
            .find(|c: char| c.is_ascii_digit())
            .ok_or_else(|| KeyError::Nuclide(name.to_string()))?;
        let (sym, rest) = name.split_at(split);
        let (a_str, s) = match rest.strip_suffix(['m', 'M']) {
            Some(stripped) => (stripped, 1),
            None => (rest, 0),
        };
        let z = z_of_symbol(sym).ok_or_else(|| KeyError::Nuclide(name.to_string()))?;
        let a = a_str
            .parse::<u32>()
            .map_err(|_| KeyError::Nuclide(name.to_string()))?;
        Self::new(z, a, s)
    }

    /// Human-readable compact name, e.g. `"U235"` or `"Am242m"`.
    pub fn name(self) -> String {
        let sym = SYMBOLS
            .get(self.z() as usize - 1)
            .copied()
            .unwrap_or("??");
        match self.s() {
            0 => format!("{}{}", sym, self.a()),
            _ => format!("{}{}m", sym, self.a()),
        }
    }
}

impl fmt::Display for NucId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for NucId {
    type Err = crate::error::SimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.contains('-') {
            Self::from_serpent(s)
        } else {
            Self::from_name(s)
        }
    }
}

/// Element symbols indexed by `Z - 1`.
const SYMBOLS: [&str; 118] = [
    "H", "He", "Li", "Be", "B", "C", "N", "O", "F", "Ne", "Na", "Mg", "Al", "Si", "P", "S", "Cl",
    "Ar", "K", "Ca", "Sc", "Ti", "V", "Cr", "Mn", "Fe", "Co", "Ni", "Cu", "Zn", "Ga", "Ge", "As",
    "Se", "Br", "Kr", "Rb", "Sr", "Y", "Zr", "Nb", "Mo", "Tc", "Ru", "Rh", "Pd", "Ag", "Cd", "In",
    "Sn", "Sb", "Te", "I", "Xe", "Cs", "Ba", "La", "Ce", "Pr", "Nd", "Pm", "Sm", "Eu", "Gd", "Tb",
    "Dy", "Ho", "Er", "Tm", "Yb", "Lu", "Hf", "Ta", "W", "Re", "Os", "Ir", "Pt", "Au", "Hg", "Tl",
    "Pb", "Bi", "Po", "At", "Rn", "Fr", "Ra", "Ac", "Th", "Pa", "U", "Np", "Pu", "Am", "Cm", "Bk",
    "Cf", "Es", "Fm", "Md", "No", "Lr", "Rf", "Db", "Sg", "Bh", "Hs", "Mt", "Ds", "Rg", "Cn",
    "Nh", "Fl", "Mc", "Lv", "Ts", "Og",
];

fn z_of_symbol(sym: &str) -> Option<u32> {
    SYMBOLS
        .iter()
        .position(|s| s.eq_ignore_ascii_case(sym))
        .map(|i| i as u32 + 1)
}
