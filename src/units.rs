//! Scaling of magnitudes into human-readable units (e.g. 2_500_000
//! "B/s" into 2.5 "MB/s"). Units come in families where each step is
//! `MULTIPLIER` times the previous one (decimal SI prefixes, never
//! 1024).

/// Factor between two neighbouring units of a family.
pub const MULTIPLIER: f64 = 1000.;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ScaleError {
    #[error("unknown unit {0:?}")]
    InvalidUnit(String),
    #[error("no values given to scale")]
    EmptyValues,
}

/// Ordered from the smallest to the largest unit.
const FAMILIES: &[&[&str]] = &[
    &["B", "KB", "MB", "GB", "TB", "PB", "EB"],
    &["B/s", "KB/s", "MB/s", "GB/s", "TB/s", "PB/s", "EB/s"],
    &["ns", "us", "ms", "s"],
];

/// A unit out of one of the known families.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Unit {
    family: &'static [&'static str],
    index: usize,
}

impl Unit {
    pub fn parse(s: &str) -> Result<Self, ScaleError> {
        FAMILIES
            .iter()
            .find_map(|family| {
                let index = family.iter().position(|u| *u == s)?;
                Some(Unit { family, index })
            })
            .ok_or_else(|| ScaleError::InvalidUnit(s.into()))
    }

    pub fn as_str(self) -> &'static str {
        self.family[self.index]
    }

    /// How many of the smallest unit of the family make up one of
    /// this unit.
    pub fn multiplier(self) -> f64 {
        MULTIPLIER.powi(self.index as i32)
    }

    fn with_index(self, index: usize) -> Self {
        Unit {
            family: self.family,
            index,
        }
    }

    fn max_index(self) -> usize {
        self.family.len() - 1
    }
}

impl std::fmt::Display for Unit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Scaled {
    pub unit: Unit,
    pub values: Vec<f64>,
}

/// Scale `values`, given in `base_unit`, into the unit that brings
/// the first value into `[1, MULTIPLIER)`, as far as the family of
/// the unit reaches. All values are scaled by the same factor. A
/// first value that is zero or not finite leaves everything
/// unscaled.
pub fn scale(base_unit: &str, values: &[f64]) -> Result<Scaled, ScaleError> {
    let base = Unit::parse(base_unit)?;
    let first = *values.first().ok_or(ScaleError::EmptyValues)?;

    if first == 0. || !first.is_finite() {
        return Ok(Scaled {
            unit: base,
            values: values.to_vec(),
        });
    }

    let mut magnitude = first.abs();
    let mut index = base.index;
    while magnitude >= MULTIPLIER && index < base.max_index() {
        magnitude /= MULTIPLIER;
        index += 1;
    }
    while magnitude < 1. && index > 0 {
        magnitude *= MULTIPLIER;
        index -= 1;
    }

    let unit = base.with_index(index);
    let factor = unit.multiplier() / base.multiplier();
    Ok(Scaled {
        unit,
        values: values.iter().map(|v| v / factor).collect(),
    })
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    fn scale1(unit: &str, v: f64) -> (&'static str, f64) {
        let Scaled { unit, values } = scale(unit, &[v]).expect("valid unit");
        (unit.as_str(), values[0])
    }

    #[test]
    fn t_scale_up() {
        assert_eq!(scale1("B/s", 999.), ("B/s", 999.));
        assert_eq!(scale1("B/s", 1000.), ("KB/s", 1.));
        assert_eq!(scale1("B/s", 2_500_000.), ("MB/s", 2.5));
        assert_eq!(scale1("B", 3e12), ("TB", 3.));
    }

    #[test]
    fn t_scale_down() {
        assert_eq!(scale1("s", 0.5), ("ms", 500.));
        assert_eq!(scale1("KB/s", 0.25), ("B/s", 250.));
        // Below the smallest unit there is nothing to go to
        assert_eq!(scale1("B/s", 0.5), ("B/s", 0.5));
    }

    #[test]
    fn t_saturates_at_largest() {
        let (unit, v) = scale1("B/s", 5e21);
        assert_eq!(unit, "EB/s");
        assert_relative_eq!(v, 5000.);
    }

    #[test]
    fn t_zero_and_non_finite_bypass() {
        assert_eq!(scale1("B/s", 0.), ("B/s", 0.));
        let (unit, v) = scale1("B/s", f64::INFINITY);
        assert_eq!(unit, "B/s");
        assert!(v.is_infinite());
    }

    #[test]
    fn t_batch_uses_first_value() {
        let Scaled { unit, values } = scale("B/s", &[2000., 500., 3_000_000.]).unwrap();
        assert_eq!(unit.as_str(), "KB/s");
        assert_eq!(values, vec![2., 0.5, 3000.]);
    }

    #[test]
    fn t_negative_values() {
        assert_eq!(scale1("B", -4000.), ("KB", -4.));
    }

    #[test]
    fn t_errors() {
        assert_eq!(
            scale("furlongs", &[1.]),
            Err(ScaleError::InvalidUnit("furlongs".into()))
        );
        assert_eq!(scale("B/s", &[]), Err(ScaleError::EmptyValues));
    }

    #[test]
    fn t_roundtrip_and_range() {
        let base = Unit::parse("B/s").unwrap();
        let mut v = 1.;
        while v < 1e18 {
            for x in [v, v * 1.7, v * 3.3, v * 9.99] {
                let Scaled { unit, values } = scale("B/s", &[x]).unwrap();
                let s = values[0];
                assert_relative_eq!(s * unit.multiplier() / base.multiplier(), x, max_relative = 1e-12);
                assert!((1. ..MULTIPLIER).contains(&s), "{x} -> {s} {unit}");
            }
            v *= 10.;
        }
    }
}
