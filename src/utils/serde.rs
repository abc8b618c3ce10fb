use serde::{Deserialize, Serialize};

/// Upstream APIs freely switch between a scalar and an array for the same
/// field depending on how many annotations a variant carries.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum StringOrVec {
    #[default]
    None,
    Single(String),
    Multiple(Vec<String>),
}

impl StringOrVec {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            Self::None => Vec::new(),
            Self::Single(value) => vec![value],
            Self::Multiple(values) => values,
        }
    }

    pub fn first(&self) -> Option<&str> {
        match self {
            Self::None => None,
            Self::Single(value) => Some(value.as_str()),
            Self::Multiple(values) => values.first().map(|value| value.as_str()),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum FloatOrVec {
    Single(f64),
    Multiple(Vec<f64>),
}

impl FloatOrVec {
    pub fn first(&self) -> Option<f64> {
        match self {
            Self::Single(v) => Some(*v),
            Self::Multiple(v) => v.first().copied(),
        }
    }
}
