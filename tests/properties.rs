//! Property-based tests for the tensor views and the 2D windowed kernels.

use briny_nn::ops::dispatch::{convolve2d, convolve2d_full, correlate2d, rotate180};
use briny_nn::tensors::Tensor;
use proptest::prelude::*;

/// A plane of `(h, w)` with `h, w` in `1..=max` and values in `[-4, 4]`.
fn plane(max: usize) -> impl Strategy<Value = Tensor> {
    (1..=max, 1..=max).prop_flat_map(|(h, w)| {
        prop::collection::vec(-4.0f64..4.0, h * w)
            .prop_map(move |data| Tensor::from_vec(&[h, w], data).unwrap())
    })
}

/// An input plane and a kernel that fits inside it.
fn plane_and_kernel() -> impl Strategy<Value = (Tensor, Tensor)> {
    plane(7).prop_flat_map(|x| {
        let (h, w) = (x.shape()[0], x.shape()[1]);
        (1..=h, 1..=w).prop_flat_map(move |(kh, kw)| {
            let x = x.clone();
            prop::collection::vec(-4.0f64..4.0, kh * kw)
                .prop_map(move |data| (x.clone(), Tensor::from_vec(&[kh, kw], data).unwrap()))
        })
    })
}

fn dot(a: &Tensor, b: &Tensor) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

proptest! {
    /// Property: convolution equals correlation with the kernel rotated 180°
    #[test]
    fn prop_convolution_duality((x, k) in plane_and_kernel()) {
        let conv = convolve2d(&x, &k).unwrap();
        let corr = correlate2d(&x, &rotate180(&k).unwrap()).unwrap();
        prop_assert_eq!(conv, corr);
    }

    /// Property: <corr(x, k), g> == <x, full_conv(g, k)>
    #[test]
    fn prop_full_convolution_is_adjoint(
        (x, k) in plane_and_kernel(),
        seed in prop::collection::vec(-4.0f64..4.0, 49),
    ) {
        let y = correlate2d(&x, &k).unwrap();
        let g = Tensor::from_vec(y.shape(), seed[..y.len()].to_vec()).unwrap();

        let lhs = dot(&y, &g);
        let rhs = dot(&x, &convolve2d_full(&g, &k).unwrap());
        prop_assert!((lhs - rhs).abs() <= 1e-9 * (1.0 + lhs.abs()), "{} vs {}", lhs, rhs);
    }

    /// Property: element count always equals the shape product
    #[test]
    fn prop_shape_invariant(
        x in plane(8),
        r0 in 0usize..8, r1 in 1usize..9,
        c0 in 0usize..8, c1 in 1usize..9,
    ) {
        let (h, w) = (x.shape()[0], x.shape()[1]);
        let (start, end) = ([r0.min(h - 1), c0.min(w - 1)], [r1.min(h), c1.min(w)]);
        prop_assume!(start[0] < end[0] && start[1] < end[1]);

        let s = x.slice(&start, &end).unwrap();
        prop_assert_eq!(s.to_vec().len(), s.shape().iter().product::<usize>());

        let t = s.transpose();
        prop_assert_eq!(t.to_vec().len(), t.len());
        prop_assert_eq!(t.shape(), &[s.shape()[1], s.shape()[0]][..]);

        let mut sum = s.clone();
        sum.add(&s).unwrap();
        prop_assert_eq!(sum.to_vec().len(), sum.len());

        let flat = t.reshaped(&[t.len()]).unwrap();
        prop_assert_eq!(flat.to_vec(), t.to_vec());
    }

    /// Property: writes through a slice land on the source cell
    #[test]
    fn prop_slice_aliases(x in plane(6), i in 0usize..6, j in 0usize..6) {
        let (h, w) = (x.shape()[0], x.shape()[1]);
        let (i, j) = (i % h, j % w);
        let mut s = x.slice(&[i, j], &[h, w]).unwrap();
        s.set(123.0, &[0, 0]).unwrap();
        prop_assert_eq!(x.get(&[i, j]).unwrap(), 123.0);
    }
}
