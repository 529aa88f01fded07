/*! Isotopic patterns densely indexed by nominal mass offset */
use std::ops::{Index, IndexMut};
use std::slice;

use mzpeaks::{CentroidPeak, MZPeakSetType};

/// The mass of an electron in Daltons
pub const ELECTRON_MASS: f64 = 0.00054858;

/// The mass assigned to a peak that carries no abundance and only exists to keep a
/// [`Pattern`] aligned to unit mass increments.
pub const GAP_MASS: f64 = -10000000.0;

/// A single isotopic peak
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Peak {
    pub mass: f64,
    pub relative_area: f64,
}

impl Peak {
    pub fn new(mass: f64, relative_area: f64) -> Self {
        Self {
            mass,
            relative_area,
        }
    }

    /// A zero abundance placeholder peak
    pub const fn gap() -> Self {
        Self {
            mass: GAP_MASS,
            relative_area: 0.0,
        }
    }

    #[inline]
    pub fn is_gap(&self) -> bool {
        self.mass == GAP_MASS
    }
}

impl From<(f64, f64)> for Peak {
    fn from(value: (f64, f64)) -> Self {
        Self::new(value.0, value.1)
    }
}

/// An isotopic distribution where position `i` holds the peak `i` nominal mass units
/// above the lightest member. Missing positions are filled with [`Peak::gap`] so that
/// two patterns can be convolved as dense coefficient arrays.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Pattern {
    pub peaks: Vec<Peak>,
}

impl Pattern {
    pub fn new(peaks: Vec<Peak>) -> Self {
        Self { peaks }
    }

    /// The identity element of convolution, a single peak of mass zero and abundance one
    pub fn unit() -> Self {
        Self::new(vec![Peak::new(0.0, 1.0)])
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self::new(Vec::with_capacity(capacity))
    }

    pub fn push(&mut self, peak: Peak) {
        self.peaks.push(peak)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.peaks.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.peaks.is_empty()
    }

    pub fn iter(&self) -> slice::Iter<'_, Peak> {
        self.peaks.iter()
    }

    pub fn iter_mut(&mut self) -> slice::IterMut<'_, Peak> {
        self.peaks.iter_mut()
    }

    pub fn as_slice(&self) -> &[Peak] {
        &self.peaks
    }

    /// Combine this pattern with `other`, see [`convolve`]
    pub fn convolve(&self, other: &Pattern) -> Pattern {
        convolve(&self.peaks, &other.peaks)
    }

    /// Remove peaks whose abundance is at or below `limit` from both ends of the
    /// pattern. Interior peaks are never removed, however small.
    pub fn prune(&mut self, limit: f64) {
        let start = self
            .peaks
            .iter()
            .position(|p| p.relative_area > limit)
            .unwrap_or(self.peaks.len());
        self.peaks.drain(..start);

        while let Some(last) = self.peaks.last() {
            if last.relative_area > limit {
                break;
            }
            self.peaks.pop();
        }
    }

    pub fn pruned(mut self, limit: f64) -> Self {
        self.prune(limit);
        self
    }

    /// Convert neutral masses into the m/z observed at `charge`, accounting for the
    /// electrons removed or added. A charge of zero leaves the neutral masses alone.
    pub fn apply_charge(&mut self, charge: i32) {
        if charge == 0 {
            return;
        }
        let z = charge.unsigned_abs() as f64;
        let electrons = if charge > 0 {
            -ELECTRON_MASS
        } else {
            ELECTRON_MASS
        };
        self.peaks
            .iter_mut()
            .filter(|p| !p.is_gap())
            .for_each(|p| p.mass = p.mass / z + electrons);
    }

    pub fn charged(mut self, charge: i32) -> Self {
        self.apply_charge(charge);
        self
    }

    pub fn max_area(&self) -> f64 {
        self.iter()
            .map(|p| p.relative_area)
            .fold(0.0, f64::max)
    }

    pub fn total_area(&self) -> f64 {
        self.iter().map(|p| p.relative_area).sum()
    }

    pub fn most_abundant(&self) -> Option<&Peak> {
        self.iter()
            .filter(|p| !p.is_gap())
            .max_by(|a, b| a.relative_area.total_cmp(&b.relative_area))
    }

    /// The abundance weighted mean mass, skipping gap peaks
    pub fn average_mass(&self) -> Option<f64> {
        let (weighted, total) = self
            .iter()
            .filter(|p| !p.is_gap() && p.relative_area > 0.0)
            .fold((0.0, 0.0), |(weighted, total), p| {
                (weighted + p.mass * p.relative_area, total + p.relative_area)
            });
        if total > 0.0 {
            Some(weighted / total)
        } else {
            None
        }
    }

    pub fn scale_by(mut self, factor: f64) -> Self {
        self.iter_mut().for_each(|p| p.relative_area *= factor);
        self
    }

    /// Convert the non-gap peaks into a centroid peak list for comparison with
    /// experimental spectra
    pub fn to_peak_set(&self) -> MZPeakSetType<CentroidPeak> {
        self.iter()
            .filter(|p| !p.is_gap())
            .enumerate()
            .map(|(i, p)| CentroidPeak::new(p.mass, p.relative_area as f32, i as u32))
            .collect()
    }
}

/// Merge two patterns into one.
///
/// Output position `k` collects every pair `g[i]`, `f[k - i]`, weighting each pair by the
/// product of the abundances. The output mass is the weighted average of the pairs' summed
/// masses and the output abundance is the summed weight. A position with zero total
/// weight becomes a [`Peak::gap`].
pub fn convolve(g: &[Peak], f: &[Peak]) -> Pattern {
    let ng = g.len();
    let nf = f.len();
    if ng == 0 || nf == 0 {
        return Pattern::default();
    }
    let mut h = Pattern::with_capacity(ng + nf - 1);
    for k in 0..(ng + nf - 1) {
        let start = k.saturating_sub(nf - 1);
        let end = k.min(ng - 1);
        let mut sum_weight = 0.0;
        let mut sum_mass = 0.0;
        for (a, b) in g[start..=end].iter().zip(f[(k - end)..=(k - start)].iter().rev()) {
            let weight = a.relative_area * b.relative_area;
            sum_weight += weight;
            sum_mass += weight * (a.mass + b.mass);
        }
        if sum_weight == 0.0 {
            h.push(Peak::gap());
        } else {
            h.push(Peak::new(sum_mass / sum_weight, sum_weight));
        }
    }
    h
}

impl Index<usize> for Pattern {
    type Output = Peak;

    fn index(&self, index: usize) -> &Self::Output {
        &self.peaks[index]
    }
}

impl IndexMut<usize> for Pattern {
    fn index_mut(&mut self, index: usize) -> &mut Self::Output {
        &mut self.peaks[index]
    }
}

impl IntoIterator for Pattern {
    type Item = Peak;

    type IntoIter = std::vec::IntoIter<Peak>;

    fn into_iter(self) -> Self::IntoIter {
        self.peaks.into_iter()
    }
}

impl<'a> IntoIterator for &'a Pattern {
    type Item = &'a Peak;

    type IntoIter = slice::Iter<'a, Peak>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl FromIterator<Peak> for Pattern {
    fn from_iter<T: IntoIterator<Item = Peak>>(iter: T) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl From<Vec<Peak>> for Pattern {
    fn from(value: Vec<Peak>) -> Self {
        Self::new(value)
    }
}

impl From<Vec<(f64, f64)>> for Pattern {
    fn from(value: Vec<(f64, f64)>) -> Self {
        value.into_iter().map(Peak::from).collect()
    }
}
