use burn::tensor::{backend::Backend, Bool, Data, Int, Shape, Tensor};

/// Splits `x` along `dim` into consecutive pieces of the given sizes.
///
/// A negative `dim` counts from the last dimension. The sizes must add up to the
/// length of `dim`.
pub fn split<B: Backend, const D: usize>(
    x: Tensor<B, D>,
    sizes: &[usize],
    dim: i32,
) -> Vec<Tensor<B, D>> {
    let dim: usize = if dim < 0 {
        (D as i32 + dim) as usize
    } else {
        dim as usize
    };
    let dim_size = x.dims()[dim];

    assert!(
        sizes.iter().sum::<usize>() == dim_size,
        "split sizes {:?} do not cover dimension {} of size {}",
        sizes,
        dim,
        dim_size
    );

    let mut start = 0;
    sizes
        .iter()
        .map(|size| {
            let mut ranges = x.dims().map(|len| 0..len);
            ranges[dim] = start..start + size;
            start += size;
            x.clone().slice(ranges)
        })
        .collect()
}

/// Keeps the last `steps` entries of the time axis of a `[batch, time, channels]` tensor.
pub fn last_steps<B: Backend>(x: Tensor<B, 3>, steps: usize) -> Tensor<B, 3> {
    let [batch, time, channels] = x.dims();
    x.slice([0..batch, time - steps..time, 0..channels])
}

pub fn float_tensor<B: Backend, const D: usize>(
    values: Vec<f32>,
    shape: [usize; D],
    device: &B::Device,
) -> Tensor<B, D> {
    let data = Data::new(values, Shape::new(shape));
    Tensor::from_data_device(data.convert::<B::FloatElem>(), device)
}

pub fn int_tensor<B: Backend, const D: usize>(
    values: Vec<i64>,
    shape: [usize; D],
    device: &B::Device,
) -> Tensor<B, D, Int> {
    let data = Data::new(values, Shape::new(shape));
    Tensor::from_data_device(data.convert::<B::IntElem>(), device)
}

/// Attention mask of shape `[batch, rows, cols]` hiding every column after the row
/// index (`true` means masked), i.e. an upper triangle above the main diagonal.
pub fn upper_triangular_mask<B: Backend>(
    batch_size: usize,
    rows: usize,
    cols: usize,
    device: &B::Device,
) -> Tensor<B, 3, Bool> {
    let values: Vec<i64> = (0..batch_size)
        .flat_map(|_| (0..rows).flat_map(move |row| (0..cols).map(move |col| (col > row) as i64)))
        .collect();

    int_tensor::<B, 3>(values, [batch_size, rows, cols], device).equal_elem(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn split_covers_requested_sizes() {
        let device = Default::default();
        let x = float_tensor::<TestBackend, 3>((0..24).map(|v| v as f32).collect(), [2, 6, 2], &device);

        let parts = split(x, &[4, 2], 1);

        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].dims(), [2, 4, 2]);
        assert_eq!(parts[1].dims(), [2, 2, 2]);
        let first = parts[1].clone().into_data().convert::<f32>().value;
        assert_eq!(first[0], 8.0);
    }

    #[test]
    #[should_panic]
    fn split_rejects_partial_cover() {
        let device = Default::default();
        let x = float_tensor::<TestBackend, 2>(vec![0.0; 6], [2, 3], &device);
        split(x, &[1, 1], -1);
    }

    #[test]
    fn upper_triangular_mask_hides_future_columns() {
        let device = Default::default();
        let mask = upper_triangular_mask::<TestBackend>(1, 2, 3, &device);

        let values = mask.into_data().value;
        assert_eq!(values, vec![false, true, true, false, false, true]);
    }
}
