//! Points in the coordinate space.

use std::fmt;
use std::ops::Index;

use crate::Element;

/// A fixed-length tuple of elements, one per dimension.
///
/// Used both as a routing target and as a zone corner.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Coordinate {
    elements: Vec<Element>,
}

impl Coordinate {
    /// Create a coordinate from its elements.
    pub fn new(elements: Vec<Element>) -> Self {
        Self { elements }
    }

    /// Create a coordinate from one string per dimension.
    pub fn from_strs(values: &[&str]) -> Self {
        Self::new(values.iter().map(|v| Element::new(v)).collect())
    }

    /// The same element repeated on every dimension.
    pub fn uniform(element: &Element, dimensions: usize) -> Self {
        Self::new(vec![element.clone(); dimensions])
    }

    /// Number of dimensions.
    pub fn dimensions(&self) -> usize {
        self.elements.len()
    }

    /// Element on a dimension, if the dimension exists.
    pub fn get(&self, dimension: usize) -> Option<&Element> {
        self.elements.get(dimension)
    }

    /// All elements in dimension order.
    pub fn elements(&self) -> &[Element] {
        &self.elements
    }

    /// Copy of this coordinate with one element replaced.
    ///
    /// # Panics
    ///
    /// Panics if `dimension` is out of range.
    #[must_use]
    pub fn with(&self, dimension: usize, element: Element) -> Self {
        let mut elements = self.elements.clone();
        elements[dimension] = element;
        Self { elements }
    }

    /// Iterate over the elements.
    pub fn iter(&self) -> impl Iterator<Item = &Element> {
        self.elements.iter()
    }
}

impl Index<usize> for Coordinate {
    type Output = Element;

    #[inline]
    fn index(&self, dimension: usize) -> &Element {
        &self.elements[dimension]
    }
}

impl From<Vec<Element>> for Coordinate {
    fn from(elements: Vec<Element>) -> Self {
        Self::new(elements)
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, e) in self.elements.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{e}")?;
        }
        write!(f, ")")
    }
}
