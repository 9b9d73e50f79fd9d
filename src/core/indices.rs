use ndarray::{Array2, Zip};

use crate::error::{Error, Result};
use crate::types::{REFLECTANCE_SCALE, SpectralIndex};

// All kernels share one invalid-value policy: division by zero produces
// an infinity which is immediately replaced with NaN, so invalid cells
// never reach downstream statistics or get written as infinities.
fn invalidate(value: f64) -> f32 {
    let v = value as f32;
    if v.is_finite() { v } else { f32::NAN }
}

fn check_dims(arrays: &[&Array2<f64>]) -> Result<()> {
    let (rows, cols) = arrays[0].dim();
    for array in &arrays[1..] {
        if array.dim() != (rows, cols) {
            return Err(Error::DimensionMismatch {
                expected_rows: rows,
                expected_cols: cols,
                rows: array.nrows(),
                cols: array.ncols(),
            });
        }
    }
    Ok(())
}

/// Normalized difference index (NDVI, NDWI, ...):
/// `(b1 - b2) / (b1 + b2)`, bounded to [-1, 1]; anything outside the
/// bound or non-finite becomes NaN.
pub fn normalized_difference(b1: &Array2<f64>, b2: &Array2<f64>) -> Result<Array2<f32>> {
    check_dims(&[b1, b2])?;
    let mut result = Array2::<f32>::zeros(b1.dim());
    Zip::from(&mut result).and(b1).and(b2).for_each(|out, &a, &b| {
        let v = invalidate((a - b) / (a + b));
        *out = if (-1.0..=1.0).contains(&v) { v } else { f32::NAN };
    });
    Ok(result)
}

/// Visible difference vegetation index (Wang et al. 2005):
/// `((2·green) - red - blue) / ((2·green) + red + blue)`
pub fn vdvi(blue: &Array2<f64>, green: &Array2<f64>, red: &Array2<f64>) -> Result<Array2<f32>> {
    check_dims(&[blue, green, red])?;
    let mut result = Array2::<f32>::zeros(blue.dim());
    Zip::from(&mut result)
        .and(blue)
        .and(green)
        .and(red)
        .for_each(|out, &b, &g, &r| {
            *out = invalidate((2.0 * g - r - b) / (2.0 * g + r + b));
        });
    Ok(result)
}

/// Bare soil index:
/// `((swir + red) - (nir + blue)) / ((swir + red) + (nir + blue))`
pub fn bare_soil(
    blue: &Array2<f64>,
    red: &Array2<f64>,
    nir: &Array2<f64>,
    swir: &Array2<f64>,
) -> Result<Array2<f32>> {
    check_dims(&[blue, red, nir, swir])?;
    let mut result = Array2::<f32>::zeros(blue.dim());
    Zip::from(&mut result)
        .and(blue)
        .and(red)
        .and(nir)
        .and(swir)
        .for_each(|out, &b, &r, &n, &s| {
            *out = invalidate(((s + r) - (n + b)) / ((s + r) + (n + b)));
        });
    Ok(result)
}

/// Bare soil ratio variant: `(swir - red) / (nir + blue)`, computed on
/// raw digital numbers.
pub fn bare_soil_ratio(
    blue: &Array2<f64>,
    red: &Array2<f64>,
    nir: &Array2<f64>,
    swir: &Array2<f64>,
) -> Result<Array2<f32>> {
    check_dims(&[blue, red, nir, swir])?;
    let mut result = Array2::<f32>::zeros(blue.dim());
    Zip::from(&mut result)
        .and(blue)
        .and(red)
        .and(nir)
        .and(swir)
        .for_each(|out, &b, &r, &n, &s| {
            *out = invalidate((s - r) / (n + b));
        });
    Ok(result)
}

/// Compute one index from raw band arrays given in
/// [`SpectralIndex::required_bands`] order. Digital numbers are scaled
/// to reflectance first, except for [`SpectralIndex::Bsi2`].
pub fn compute_index(kind: SpectralIndex, arrays: &[Array2<f64>]) -> Result<Array2<f32>> {
    let expected = kind.required_bands().len();
    if arrays.len() != expected {
        return Err(Error::Processing(format!(
            "index {} needs {} bands, got {}",
            kind,
            expected,
            arrays.len()
        )));
    }

    let scaled: Vec<Array2<f64>>;
    let inputs: Vec<&Array2<f64>> = if kind == SpectralIndex::Bsi2 {
        arrays.iter().collect()
    } else {
        scaled = arrays.iter().map(|a| a / REFLECTANCE_SCALE).collect();
        scaled.iter().collect()
    };

    match kind {
        SpectralIndex::Ndvi | SpectralIndex::Ndwi | SpectralIndex::Ndti | SpectralIndex::Crc => {
            normalized_difference(inputs[0], inputs[1])
        }
        SpectralIndex::Vdvi => vdvi(inputs[0], inputs[1], inputs[2]),
        SpectralIndex::Bsi => bare_soil(inputs[0], inputs[1], inputs[2], inputs[3]),
        SpectralIndex::Bsi2 => bare_soil_ratio(inputs[0], inputs[1], inputs[2], inputs[3]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn normalized_difference_of_identical_inputs() {
        let band = array![[2000.0, 0.0], [4000.0, 1.0]];
        let result = normalized_difference(&band, &band).unwrap();
        // zero everywhere both inputs are non-zero, NaN where the sum is zero
        assert_relative_eq!(result[[0, 0]], 0.0);
        assert!(result[[0, 1]].is_nan());
        assert_relative_eq!(result[[1, 0]], 0.0);
        assert_relative_eq!(result[[1, 1]], 0.0);
    }

    #[test]
    fn normalized_difference_values() {
        let nir = array![[6000.0]];
        let red = array![[2000.0]];
        let result = normalized_difference(&nir, &red).unwrap();
        assert_relative_eq!(result[[0, 0]], 0.5);
    }

    #[test]
    fn normalized_difference_masks_out_of_range() {
        // a negative summand can push the ratio outside [-1, 1]
        let b1 = array![[1.0]];
        let b2 = array![[-3.0]];
        let result = normalized_difference(&b1, &b2).unwrap();
        assert!(result[[0, 0]].is_nan());
    }

    #[test]
    fn dimension_mismatch_is_an_error() {
        let a = Array2::<f64>::zeros((2, 2));
        let b = Array2::<f64>::zeros((2, 3));
        assert!(matches!(
            normalized_difference(&a, &b),
            Err(Error::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn vdvi_values() {
        let blue = array![[0.1]];
        let green = array![[0.3]];
        let red = array![[0.2]];
        let result = vdvi(&blue, &green, &red).unwrap();
        // (0.6 - 0.2 - 0.1) / (0.6 + 0.2 + 0.1)
        assert_relative_eq!(result[[0, 0]], 0.3 / 0.9, epsilon = 1e-6);
    }

    #[test]
    fn bare_soil_variants_differ() {
        let blue = array![[1000.0]];
        let red = array![[2000.0]];
        let nir = array![[3000.0]];
        let swir = array![[4000.0]];
        let primary = compute_index(
            SpectralIndex::Bsi,
            &[blue.clone(), red.clone(), nir.clone(), swir.clone()],
        )
        .unwrap();
        let ratio = compute_index(SpectralIndex::Bsi2, &[blue, red, nir, swir]).unwrap();
        // ((0.4+0.2)-(0.3+0.1)) / ((0.4+0.2)+(0.3+0.1)) = 0.2
        assert_relative_eq!(primary[[0, 0]], 0.2, epsilon = 1e-6);
        // (4000-2000) / (3000+1000) = 0.5
        assert_relative_eq!(ratio[[0, 0]], 0.5, epsilon = 1e-6);
    }

    #[test]
    fn division_by_zero_becomes_nan() {
        let zeros = array![[0.0]];
        let ratio =
            bare_soil_ratio(&zeros, &array![[1.0]], &zeros.clone(), &array![[5.0]]).unwrap();
        assert!(ratio[[0, 0]].is_nan());
    }

    #[test]
    fn compute_index_rejects_wrong_arity() {
        let band = Array2::<f64>::zeros((1, 1));
        assert!(compute_index(SpectralIndex::Ndvi, &[band]).is_err());
    }
}
