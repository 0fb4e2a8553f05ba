use briny_nn::tensor;
use briny_nn::tensors::Tensor;
use briny_nn::Error;

#[test]
fn test_tensor_creation() {
    let t = Tensor::from_vec(&[2, 2], vec![1.0, 2.0, 3.0, 4.0]).unwrap();
    assert_eq!(t.shape(), &[2, 2]);
    assert_eq!(t.to_vec(), vec![1.0, 2.0, 3.0, 4.0]);
    assert_eq!(t.strides(), vec![2, 1]);
}

#[test]
fn test_tensor_creation_validates_shape() {
    assert!(matches!(
        Tensor::from_vec(&[2, 2], vec![1.0, 2.0, 3.0]),
        Err(Error::SizeMismatch { expected: 4, actual: 3, .. })
    ));
    assert!(matches!(Tensor::zeros(&[2, 0]), Err(Error::InvalidShape { .. })));
    assert!(matches!(Tensor::zeros(&[]), Err(Error::InvalidShape { .. })));
}

#[test]
fn test_tensor_macro() {
    let t = tensor!([[1.0, 2.0], [3.0, 4.0]]);
    assert_eq!(t.shape(), &[2, 2]);
    assert_eq!(t.to_vec(), vec![1.0, 2.0, 3.0, 4.0]);
}

#[test]
fn test_copy_does_not_alias() {
    let mut a = Tensor::zeros(&[2, 2]).unwrap();
    let mut b = tensor!([[1.0, 2.0], [3.0, 4.0]]);
    a.copy_from(&b).unwrap();
    b.set(100.0, &[0, 0]).unwrap();
    assert_eq!(a.get(&[0, 0]).unwrap(), 1.0);

    let mut c = a.clone();
    c.fill(0.0);
    assert_eq!(a.to_vec(), vec![1.0, 2.0, 3.0, 4.0]);
}

#[test]
fn test_slice_aliases_source() {
    let t = tensor!([[1.0, 2.0, 3.0], [4.0, 5.0, 6.0], [7.0, 8.0, 9.0]]);
    let mut s = t.slice(&[1, 1], &[3, 3]).unwrap();
    assert_eq!(s.shape(), &[2, 2]);
    assert_eq!(s.to_vec(), vec![5.0, 6.0, 8.0, 9.0]);

    s.set(-1.0, &[1, 0]).unwrap();
    assert_eq!(t.get(&[2, 1]).unwrap(), -1.0);

    let mut row = t.sub_tensor(0).unwrap();
    row.mul_scalar(10.0);
    assert_eq!(t.get(&[0, 2]).unwrap(), 30.0);
}

#[test]
fn test_slice_bounds() {
    let t = Tensor::zeros(&[2, 3]).unwrap();
    assert!(matches!(t.slice(&[0, 0], &[3, 3]), Err(Error::IndexOutOfRange { .. })));
    assert!(matches!(t.slice(&[1, 0], &[1, 3]), Err(Error::InvalidShape { .. })));
    assert!(matches!(t.get(&[2, 0]), Err(Error::IndexOutOfRange { .. })));
    assert!(matches!(t.get(&[0]), Err(Error::ShapeMismatch { .. })));
}

#[test]
fn test_views_share_and_clones_do_not() {
    let t = tensor!([1.0, 2.0]);
    let v = t.view();
    assert!(v.shares_storage(&t));
    assert!(!t.clone().shares_storage(&t));
}

#[test]
fn test_transpose_is_a_view() {
    let t = tensor!([[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]);
    let mut tt = t.transpose();
    assert_eq!(tt.shape(), &[3, 2]);
    assert_eq!(tt.to_vec(), vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
    tt.set(0.0, &[2, 1]).unwrap();
    assert_eq!(t.get(&[1, 2]).unwrap(), 0.0);
}

#[test]
fn test_shape_invariant_across_ops() {
    let mut t = Tensor::zeros(&[2, 3, 4]).unwrap();
    t.fill_counter(true);
    assert_eq!(t.to_vec().len(), 24);

    t.reshape(&[4, 6]).unwrap();
    assert_eq!(t.len(), 24);
    assert!(matches!(t.reshape(&[5, 5]), Err(Error::SizeMismatch { .. })));

    let s = t.slice(&[1, 2], &[3, 5]).unwrap();
    assert_eq!(s.len(), s.shape().iter().product::<usize>());
    assert_eq!(s.to_vec().len(), 6);

    let tt = s.transpose();
    assert_eq!(tt.to_vec().len(), tt.len());
}

#[test]
fn test_display() {
    let t = tensor!([[1.0, 2.0], [3.0, 4.0]]).with_name("w");
    assert_eq!(t.to_string(), "w [2, 2] = [[1, 2], [3, 4]]");
}
