//! Sparse matrix types and operations.
//!
//! Every matrix handed to the solvers is a CSC (Compressed Sparse Column)
//! `sprs` matrix. The helpers here cover the handful of kernels the IPM and
//! Newton loops need: products with a vector, transposition, linear
//! combinations, norms and block assembly through triplets.

use sprs::{CsMat, TriMat};

/// Sparse matrix in CSC format (general, not necessarily symmetric).
pub type SparseCsc = CsMat<f64>;

/// Triplet format sparse matrix builder.
pub type SparseTriMat = TriMat<f64>;

/// Build a sparse CSC matrix from triplets (row, col, value).
///
/// Duplicate entries are summed.
pub fn from_triplets<I>(nrows: usize, ncols: usize, triplets: I) -> SparseCsc
where
    I: IntoIterator<Item = (usize, usize, f64)>,
{
    let mut tri = TriMat::new((nrows, ncols));
    for (i, j, v) in triplets {
        tri.add_triplet(i, j, v);
    }
    tri.to_csc()
}

/// Create a diagonal matrix in CSC format.
pub fn diagonal(diag: &[f64]) -> SparseCsc {
    let n = diag.len();
    let triplets = diag.iter().enumerate().map(|(i, &v)| (i, i, v));
    from_triplets(n, n, triplets)
}

/// Create an identity matrix in CSC format.
pub fn identity(n: usize) -> SparseCsc {
    diagonal(&vec![1.0; n])
}

/// Sparse matrix-vector product: y = alpha * A * x + beta * y
pub fn spmv(a: &SparseCsc, x: &[f64], y: &mut [f64], alpha: f64, beta: f64) {
    assert_eq!(a.cols(), x.len());
    assert_eq!(a.rows(), y.len());

    scale_in_place(y, beta);

    if alpha != 0.0 {
        for (val, (row, col)) in a.iter() {
            y[row] += alpha * (*val) * x[col];
        }
    }
}

/// Transpose-vector product: y = alpha * A^T * x + beta * y
pub fn spmv_transpose(a: &SparseCsc, x: &[f64], y: &mut [f64], alpha: f64, beta: f64) {
    assert_eq!(a.rows(), x.len());
    assert_eq!(a.cols(), y.len());

    scale_in_place(y, beta);

    if alpha != 0.0 {
        for (val, (row, col)) in a.iter() {
            y[col] += alpha * (*val) * x[row];
        }
    }
}

fn scale_in_place(y: &mut [f64], beta: f64) {
    if beta == 0.0 {
        y.fill(0.0);
    } else if beta != 1.0 {
        for yi in y.iter_mut() {
            *yi *= beta;
        }
    }
}

/// Explicit transpose, returned in CSC storage.
pub fn transpose(a: &SparseCsc) -> SparseCsc {
    a.transpose_view().to_csc()
}

/// Linear combination `alpha * A + beta * B` of two matrices of equal shape.
pub fn add(alpha: f64, a: &SparseCsc, beta: f64, b: &SparseCsc) -> SparseCsc {
    assert_eq!(a.shape(), b.shape(), "Matrices must have the same shape");

    let mut tri = TriMat::new(a.shape());
    for (val, (row, col)) in a.iter() {
        tri.add_triplet(row, col, alpha * *val);
    }
    for (val, (row, col)) in b.iter() {
        tri.add_triplet(row, col, beta * *val);
    }
    tri.to_csc()
}

/// Multiply row `i` of `a` by `scale[i]`, i.e. `diag(scale) * A`.
pub fn scale_rows(a: &SparseCsc, scale: &[f64]) -> SparseCsc {
    assert_eq!(a.rows(), scale.len());

    let mut tri = TriMat::new(a.shape());
    for (val, (row, col)) in a.iter() {
        tri.add_triplet(row, col, scale[row] * *val);
    }
    tri.to_csc()
}

/// Entry-wise symmetry test up to an absolute tolerance.
pub fn is_symmetric(a: &SparseCsc, tol: f64) -> bool {
    if a.rows() != a.cols() {
        return false;
    }
    a.iter().all(|(val, (row, col))| {
        let mirrored = a.get(col, row).copied().unwrap_or(0.0);
        (val - mirrored).abs() <= tol
    })
}

/// Matrix 1-norm: largest absolute column sum.
pub fn norm_1(a: &SparseCsc) -> f64 {
    let mut col_sums = vec![0.0; a.cols()];
    for (val, (_, col)) in a.iter() {
        col_sums[col] += val.abs();
    }
    col_sums.into_iter().fold(0.0, f64::max)
}

/// Matrix inf-norm: largest absolute row sum.
pub fn norm_inf(a: &SparseCsc) -> f64 {
    let mut row_sums = vec![0.0; a.rows()];
    for (val, (row, _)) in a.iter() {
        row_sums[row] += val.abs();
    }
    row_sums.into_iter().fold(0.0, f64::max)
}

/// Copy `scale * A` into `tri` with its top-left corner at `(row_off, col_off)`.
pub fn push_block(tri: &mut SparseTriMat, a: &SparseCsc, row_off: usize, col_off: usize, scale: f64) {
    for (val, (row, col)) in a.iter() {
        tri.add_triplet(row + row_off, col + col_off, scale * *val);
    }
}

/// Copy `scale * A^T` into `tri` with its top-left corner at `(row_off, col_off)`.
pub fn push_block_transpose(
    tri: &mut SparseTriMat,
    a: &SparseCsc,
    row_off: usize,
    col_off: usize,
    scale: f64,
) {
    for (val, (row, col)) in a.iter() {
        tri.add_triplet(col + row_off, row + col_off, scale * *val);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_by_two() -> SparseCsc {
        // [[1, 2], [3, 4]]
        from_triplets(2, 2, vec![(0, 0, 1.0), (0, 1, 2.0), (1, 0, 3.0), (1, 1, 4.0)])
    }

    #[test]
    fn test_from_triplets_sums_duplicates() {
        let mat = from_triplets(2, 2, vec![(0, 0, 1.0), (0, 0, 2.0), (1, 1, 4.0)]);

        assert_eq!(mat.nnz(), 2);
        assert_eq!(mat.get(0, 0).copied(), Some(3.0));
    }

    #[test]
    fn test_identity() {
        let mat = identity(5);

        assert_eq!(mat.rows(), 5);
        assert_eq!(mat.cols(), 5);
        assert_eq!(mat.nnz(), 5);
    }

    #[test]
    fn test_spmv() {
        let mat = two_by_two();
        let x = vec![1.0, 2.0];
        let mut y = vec![1.0; 2];

        spmv(&mat, &x, &mut y, 1.0, 0.0);

        // y = [[1, 2], [3, 4]] * [1, 2] = [5, 11]
        assert!((y[0] - 5.0).abs() < 1e-10);
        assert!((y[1] - 11.0).abs() < 1e-10);
    }

    #[test]
    fn test_spmv_transpose_accumulates() {
        let mat = two_by_two();
        let x = vec![1.0, 1.0];
        let mut y = vec![1.0, 1.0];

        spmv_transpose(&mat, &x, &mut y, 2.0, 1.0);

        // A^T [1, 1] = [4, 6]
        assert!((y[0] - 9.0).abs() < 1e-12, "y[0] = {}", y[0]);
        assert!((y[1] - 13.0).abs() < 1e-12, "y[1] = {}", y[1]);
    }

    #[test]
    fn test_transpose_and_symmetry() {
        let mat = two_by_two();
        let mt = transpose(&mat);

        assert_eq!(mt.get(0, 1).copied(), Some(3.0));
        assert!(!is_symmetric(&mat, 1e-12));

        let sym = add(0.5, &mat, 0.5, &mt);
        assert!(is_symmetric(&sym, 1e-12));
        assert_eq!(sym.get(1, 0).copied(), Some(2.5));
    }

    #[test]
    fn test_norms() {
        let mat = two_by_two();

        assert_eq!(norm_1(&mat), 6.0);
        assert_eq!(norm_inf(&mat), 7.0);
    }

    #[test]
    fn test_scale_rows() {
        let scaled = scale_rows(&two_by_two(), &[1.0, 0.5]);

        assert_eq!(scaled.get(1, 0).copied(), Some(1.5));
        assert_eq!(scaled.get(0, 1).copied(), Some(2.0));
    }

    #[test]
    fn test_push_block_transpose() {
        let mut tri = SparseTriMat::new((4, 4));
        push_block_transpose(&mut tri, &two_by_two(), 2, 0, -1.0);
        let mat: SparseCsc = tri.to_csc();

        assert_eq!(mat.get(2, 1).copied(), Some(-3.0));
        assert_eq!(mat.get(3, 0).copied(), Some(-2.0));
    }
}
