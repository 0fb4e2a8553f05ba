//! The `tensor!` literal macro.

/// Builds the `(shape, data)` pair of a nested array literal.
#[doc(hidden)]
#[macro_export]
macro_rules! __tensor_parts {
    ([ $( [ $($inner:tt)* ] ),+ $(,)? ]) => {{
        let children = ::std::vec![ $( $crate::__tensor_parts!([ $($inner)* ]) ),+ ];
        let first = children[0].0.clone();
        assert!(
            children.iter().all(|(shape, _)| *shape == first),
            "ragged tensor literal: rows have different shapes"
        );
        let mut shape = ::std::vec![children.len()];
        shape.extend_from_slice(&first);
        let mut data = ::std::vec::Vec::new();
        for (_, values) in children {
            data.extend(values);
        }
        (shape, data)
    }};
    ([ $( $x:expr ),+ $(,)? ]) => {{
        let data: ::std::vec::Vec<f64> = ::std::vec![ $( ($x) as f64 ),+ ];
        (::std::vec![data.len()], data)
    }};
    ($x:expr) => {
        (::std::vec![1usize], ::std::vec![($x) as f64])
    };
}

/// Creates a [`Tensor`](crate::tensors::Tensor) from a nested array literal.
///
/// A bare number yields a `[1]` tensor.
///
/// # Panics
/// Panics if rows of the literal have different shapes.
///
/// # Example
/// ```rust
/// use briny_nn::tensor;
///
/// let t = tensor!([[1.0, -2.0], [3.0, 4.0]]);
/// assert_eq!(t.shape(), &[2, 2]);
/// assert_eq!(t.get(&[0, 1]).unwrap(), -2.0);
/// ```
#[macro_export]
macro_rules! tensor {
    ($($t:tt)+) => {{
        let (shape, data) = $crate::__tensor_parts!($($t)+);
        match $crate::tensors::Tensor::from_vec(&shape, data) {
            ::core::result::Result::Ok(t) => t,
            ::core::result::Result::Err(e) => panic!("invalid tensor literal: {e}"),
        }
    }};
}

#[cfg(test)]
mod tests {
    #[test]
    fn nested_literals() {
        let t = crate::tensor!([[[1.0], [2.0]], [[3.0], [4.0]]]);
        assert_eq!(t.shape(), &[2, 2, 1]);
        assert_eq!(t.to_vec(), vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(crate::tensor!(3.5).shape(), &[1]);
        assert_eq!(crate::tensor!([1, 2, 3]).to_vec(), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    #[should_panic(expected = "ragged")]
    fn ragged_literal_panics() {
        let _ = crate::tensor!([[1.0, 2.0], [3.0]]);
    }
}
