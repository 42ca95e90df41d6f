//! Input normalization applied to host-side batches before tensor upload.

use serde::{Deserialize, Serialize};

/// How raw 0..255 intensities are mapped before entering the network.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
pub enum PreprocessMode {
    /// Pass values through unchanged.
    #[default]
    None,
    /// Scale into [-1, 1] (`x / 127.5 - 1`).
    Normalize,
}

impl PreprocessMode {
    pub fn apply(&self, values: &mut [f32]) {
        match self {
            PreprocessMode::None => {}
            PreprocessMode::Normalize => {
                for v in values.iter_mut() {
                    *v = *v / 127.5 - 1.0;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_maps_byte_range_to_unit_interval() {
        let mut values = vec![0.0, 127.5, 255.0];
        PreprocessMode::Normalize.apply(&mut values);
        assert_eq!(values, vec![-1.0, 0.0, 1.0]);
    }

    #[test]
    fn none_is_identity() {
        let mut values = vec![3.0, 200.0];
        PreprocessMode::None.apply(&mut values);
        assert_eq!(values, vec![3.0, 200.0]);
    }
}
