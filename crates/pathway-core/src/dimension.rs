use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Accessibility,
    Academic,
    SubjectFocus,
    Format,
}

impl Dimension {
    pub const ALL: [Self; 4] =
        [Self::Accessibility, Self::Academic, Self::SubjectFocus, Self::Format];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Accessibility => "accessibility",
            Self::Academic => "academic",
            Self::SubjectFocus => "subject_focus",
            Self::Format => "format",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "accessibility" => Some(Self::Accessibility),
            "academic" => Some(Self::Academic),
            "subject_focus" => Some(Self::SubjectFocus),
            "format" => Some(Self::Format),
            _ => None,
        }
    }
}

/// One value per dimension, serialized as a map keyed by dimension name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DimensionMap<T> {
    pub accessibility: T,
    pub academic: T,
    pub subject_focus: T,
    pub format: T,
}

impl<T> DimensionMap<T> {
    #[must_use]
    pub fn get(&self, dimension: Dimension) -> &T {
        match dimension {
            Dimension::Accessibility => &self.accessibility,
            Dimension::Academic => &self.academic,
            Dimension::SubjectFocus => &self.subject_focus,
            Dimension::Format => &self.format,
        }
    }

    pub fn get_mut(&mut self, dimension: Dimension) -> &mut T {
        match dimension {
            Dimension::Accessibility => &mut self.accessibility,
            Dimension::Academic => &mut self.academic,
            Dimension::SubjectFocus => &mut self.subject_focus,
            Dimension::Format => &mut self.format,
        }
    }

    /// Build a map by evaluating `build` once per dimension, in [`Dimension::ALL`] order.
    ///
    /// # Errors
    /// Returns the first error produced by `build`.
    pub fn try_build<E>(mut build: impl FnMut(Dimension) -> Result<T, E>) -> Result<Self, E> {
        Ok(Self {
            accessibility: build(Dimension::Accessibility)?,
            academic: build(Dimension::Academic)?,
            subject_focus: build(Dimension::SubjectFocus)?,
            format: build(Dimension::Format)?,
        })
    }

    pub fn map<U>(&self, mut apply: impl FnMut(Dimension, &T) -> U) -> DimensionMap<U> {
        DimensionMap {
            accessibility: apply(Dimension::Accessibility, &self.accessibility),
            academic: apply(Dimension::Academic, &self.academic),
            subject_focus: apply(Dimension::SubjectFocus, &self.subject_focus),
            format: apply(Dimension::Format, &self.format),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Dimension, &T)> {
        Dimension::ALL.into_iter().map(move |dimension| (dimension, self.get(dimension)))
    }
}
