/*! A minimal representation of molecular formulas as signed element counts */
use std::collections::btree_map::{self, BTreeMap};
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};

/// The dense integer identifying an element in an [`IsotopeTable`](crate::table::IsotopeTable)
pub type ElementIndex = usize;

/// The signed number of times an element occurs in a [`Formula`]
pub type ElementCount = i64;

/// A mapping from element index to the number of times that element occurs.
///
/// Counts may be negative while a formula is being composed by subtraction, but
/// only formulas where [`Formula::is_real`] holds can be turned into an isotopic
/// pattern. Zero counts never survive a mutation, and iteration always proceeds in
/// ascending element index order so that downstream floating point arithmetic is
/// reproducible.
#[derive(Debug, Default, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Formula(BTreeMap<ElementIndex, ElementCount>);

impl Extend<(ElementIndex, ElementCount)> for Formula {
    fn extend<T: IntoIterator<Item = (ElementIndex, ElementCount)>>(&mut self, iter: T) {
        for (element, count) in iter {
            *self.0.entry(element).or_default() += count;
        }
        self.clean_up();
    }
}

impl FromIterator<(ElementIndex, ElementCount)> for Formula {
    fn from_iter<T: IntoIterator<Item = (ElementIndex, ElementCount)>>(iter: T) -> Self {
        let mut this = Self::default();
        this.extend(iter);
        this
    }
}

impl From<Vec<(ElementIndex, ElementCount)>> for Formula {
    fn from(value: Vec<(ElementIndex, ElementCount)>) -> Self {
        value.into_iter().collect()
    }
}

impl From<BTreeMap<ElementIndex, ElementCount>> for Formula {
    fn from(value: BTreeMap<ElementIndex, ElementCount>) -> Self {
        let mut this = Self(value);
        this.clean_up();
        this
    }
}

impl Formula {
    pub fn new() -> Self {
        Self::default()
    }

    /// The count of `element`, zero if it is absent
    #[inline]
    pub fn get(&self, element: ElementIndex) -> ElementCount {
        self.0.get(&element).copied().unwrap_or_default()
    }

    /// Set the count of `element`, removing it if `count` is zero
    pub fn set(&mut self, element: ElementIndex, count: ElementCount) {
        if count == 0 {
            self.0.remove(&element);
        } else {
            self.0.insert(element, count);
        }
    }

    #[inline]
    pub fn iter(&self) -> btree_map::Iter<'_, ElementIndex, ElementCount> {
        self.0.iter()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, element: ElementIndex) -> bool {
        self.0.contains_key(&element)
    }

    /// Remove all elements with a zero count
    pub fn clean_up(&mut self) {
        self.0.retain(|_, count| *count != 0);
    }

    /// Add each element count from `other` to this formula
    pub fn add_formula(&mut self, other: &Formula) {
        for (element, count) in other.iter() {
            *self.0.entry(*element).or_default() += *count;
        }
        self.clean_up();
    }

    /// Subtract each element count in `other` from this formula
    pub fn subtract_formula(&mut self, other: &Formula) {
        let mut tmp = other.clone();
        tmp.negate();
        self.add_formula(&tmp);
    }

    /// Flip the sign of every element count
    pub fn negate(&mut self) {
        self.0.iter_mut().for_each(|(_, count)| *count = -*count);
    }

    /// Check that no element count is negative, a requirement for the formula
    /// to describe something physically realizable.
    pub fn is_real(&self) -> bool {
        self.0.values().all(|count| *count >= 0)
    }

    /// The first element, in index order, whose count is negative
    pub fn first_negative(&self) -> Option<(ElementIndex, ElementCount)> {
        self.iter()
            .find(|(_, count)| **count < 0)
            .map(|(element, count)| (*element, *count))
    }

    /// The total number of atoms, treating negative counts as removals
    pub fn atom_count(&self) -> ElementCount {
        self.0.values().sum()
    }
}

impl<'a> IntoIterator for &'a Formula {
    type Item = (&'a ElementIndex, &'a ElementCount);

    type IntoIter = btree_map::Iter<'a, ElementIndex, ElementCount>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl AddAssign<&Formula> for Formula {
    fn add_assign(&mut self, rhs: &Formula) {
        self.add_formula(rhs);
    }
}

impl AddAssign for Formula {
    fn add_assign(&mut self, rhs: Self) {
        self.add_formula(&rhs);
    }
}

impl Add for Formula {
    type Output = Formula;

    fn add(self, rhs: Self) -> Self::Output {
        let mut dup = self;
        dup += rhs;
        dup
    }
}

impl SubAssign<&Formula> for Formula {
    fn sub_assign(&mut self, rhs: &Formula) {
        self.subtract_formula(rhs);
    }
}

impl SubAssign for Formula {
    fn sub_assign(&mut self, rhs: Self) {
        self.subtract_formula(&rhs);
    }
}

impl Sub for Formula {
    type Output = Formula;

    fn sub(self, rhs: Self) -> Self::Output {
        let mut dup = self;
        dup -= rhs;
        dup
    }
}

impl Neg for Formula {
    type Output = Formula;

    fn neg(self) -> Self::Output {
        let mut dup = self;
        dup.negate();
        dup
    }
}
