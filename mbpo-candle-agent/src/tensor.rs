//! Conversion between ndarray arrays and candle tensors.
use anyhow::Result;
use candle_core::{Device, Tensor};
use ndarray::{Array2, ArrayView2};

/// Converts a 2-D array into an `f32` tensor of the same shape.
pub fn array2_to_tensor(a: ArrayView2<f32>, device: &Device) -> Result<Tensor> {
    let (n, d) = a.dim();
    let data: Vec<f32> = a.iter().copied().collect();
    Ok(Tensor::from_vec(data, (n, d), device)?)
}

/// Converts a 2-D tensor into an array.
pub fn tensor_to_array2(t: &Tensor) -> Result<Array2<f32>> {
    let (n, d) = t.dims2()?;
    let data = t.flatten_all()?.to_vec1::<f32>()?;
    Ok(Array2::from_shape_vec((n, d), data)?)
}

/// Converts a vector into a 1-D tensor.
pub fn vec_to_tensor(v: &[f32], device: &Device) -> Result<Tensor> {
    Ok(Tensor::from_slice(v, (v.len(),), device)?)
}

#[cfg(test)]
mod test {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_array2_tensor_layout() -> Result<()> {
        let a = array![[1f32, 2., 3.], [4., 5., 6.]];
        let t = array2_to_tensor(a.view(), &Device::Cpu)?;
        assert_eq!(t.dims(), &[2, 3]);
        assert_eq!(t.to_vec2::<f32>()?[1], vec![4., 5., 6.]);
        assert_eq!(tensor_to_array2(&t)?, a);
        Ok(())
    }

    #[test]
    fn test_transposed_view() -> Result<()> {
        let a = array![[1f32, 2.], [3., 4.]];
        let t = array2_to_tensor(a.t(), &Device::Cpu)?;
        assert_eq!(t.to_vec2::<f32>()?, vec![vec![1., 3.], vec![2., 4.]]);
        Ok(())
    }
}
