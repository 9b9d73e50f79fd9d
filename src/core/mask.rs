use ndarray::{Array2, Zip};

/// Binary inclusion mask from a classification raster: 1 where the class
/// value is one of `keep_codes`, 0 elsewhere. Codes accumulate by union.
pub fn binary_mask(class_array: &Array2<f64>, keep_codes: &[u8]) -> Array2<u8> {
    class_array.mapv(|value| {
        u8::from(keep_codes.iter().any(|&code| value == f64::from(code)))
    })
}

/// Zero out every pixel outside the mask, leave the rest unchanged.
pub fn apply_mask(mask: &Array2<u8>, array: &Array2<f64>) -> Array2<f64> {
    let mut masked = array.clone();
    Zip::from(&mut masked).and(mask).for_each(|value, &keep| {
        if keep == 0 {
            *value = 0.0;
        }
    });
    masked
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn keep_codes_accumulate_by_union() {
        let classes = array![[4.0, 5.0], [9.0, 4.0]];
        let mask = binary_mask(&classes, &[4, 5]);
        assert_eq!(mask, array![[1, 1], [0, 1]]);
    }

    #[test]
    fn empty_keep_codes_exclude_everything() {
        let classes = array![[4.0, 5.0]];
        let mask = binary_mask(&classes, &[]);
        assert_eq!(mask, array![[0, 0]]);
    }

    #[test]
    fn masked_pixels_are_zero_filled() {
        let mask = array![[1, 0], [0, 1]];
        let values = array![[10.0, 20.0], [30.0, 40.0]];
        let masked = apply_mask(&mask, &values);
        assert_eq!(masked, array![[10.0, 0.0], [0.0, 40.0]]);
    }

    #[test]
    fn masking_is_idempotent() {
        let mask = array![[1, 0], [1, 0]];
        let values = array![[1.5, 2.5], [3.5, 4.5]];
        let once = apply_mask(&mask, &values);
        let twice = apply_mask(&mask, &once);
        assert_eq!(once, twice);
    }
}
