//! A sparse matrix keyed by linear index `i * cols + j`, backed by a hash
//! map for `O(1)` expected access. Used both as the graph's adjacency bitmap
//! and as an itinerary's next-hop bitmap.

use std::collections::HashMap;

use crate::error::{GraphError, GraphResult};

/// Sparse matrix over index pairs `(row, col)` with `row < rows`, `col <
/// cols`. Stores pairs `(row * cols + col, value)`.
#[derive(Clone, Debug)]
pub struct SparseMatrix<T> {
    rows: usize,
    cols: usize,
    data: HashMap<usize, T>,
}

impl<T> SparseMatrix<T> {
    pub fn new(rows: usize, cols: usize) -> Self {
        Self { rows, cols, data: HashMap::new() }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn linear_index(&self, row: usize, col: usize) -> GraphResult<usize> {
        if row >= self.rows || col >= self.cols {
            return Err(GraphError::IndexOutOfRange(format!(
                "({row}, {col}) out of range for {}x{} matrix",
                self.rows, self.cols
            )));
        }
        Ok(row * self.cols + col)
    }

    /// Insert `value` at `(row, col)`. Fails if an entry already exists
    /// there; use [`SparseMatrix::insert_or_assign`] to overwrite.
    pub fn insert(&mut self, row: usize, col: usize, value: T) -> GraphResult<()> {
        let idx = self.linear_index(row, col)?;
        if self.data.contains_key(&idx) {
            return Err(GraphError::InvalidArgument(format!(
                "entry ({row}, {col}) already present"
            )));
        }
        self.data.insert(idx, value);
        Ok(())
    }

    pub fn insert_or_assign(&mut self, row: usize, col: usize, value: T) -> GraphResult<()> {
        let idx = self.linear_index(row, col)?;
        self.data.insert(idx, value);
        Ok(())
    }

    pub fn erase(&mut self, row: usize, col: usize) -> GraphResult<Option<T>> {
        let idx = self.linear_index(row, col)?;
        Ok(self.data.remove(&idx))
    }

    pub fn contains(&self, row: usize, col: usize) -> GraphResult<bool> {
        let idx = self.linear_index(row, col)?;
        Ok(self.data.contains_key(&idx))
    }

    pub fn get(&self, row: usize, col: usize) -> GraphResult<Option<&T>> {
        let idx = self.linear_index(row, col)?;
        Ok(self.data.get(&idx))
    }

    /// Entries `(linear_index, value)` for row `row`.
    ///
    /// `keep_id = true` preserves the original linear index (`row * cols +
    /// col`); `keep_id = false` returns indices equal to the column number,
    /// as if the row were extracted into its own `1 x cols` matrix.
    pub fn get_row(&self, row: usize, keep_id: bool) -> Vec<(usize, &T)> {
        let start = row * self.cols;
        let end = start + self.cols;
        self.data
            .iter()
            .filter(|(&idx, _)| idx >= start && idx < end)
            .map(|(&idx, v)| if keep_id { (idx, v) } else { (idx - start, v) })
            .collect()
    }

    /// Entries `(linear_index, value)` for column `col`.
    ///
    /// `keep_id = true` preserves the original linear index; `keep_id =
    /// false` returns indices equal to the row number.
    pub fn get_col(&self, col: usize, keep_id: bool) -> Vec<(usize, &T)> {
        self.data
            .iter()
            .filter(|(&idx, _)| idx % self.cols == col)
            .map(|(&idx, v)| if keep_id { (idx, v) } else { (idx / self.cols, v) })
            .collect()
    }

    /// Remove every entry in row `row`.
    pub fn empty_row(&mut self, row: usize) {
        let start = row * self.cols;
        let end = start + self.cols;
        self.data.retain(|&idx, _| !(idx >= start && idx < end));
    }

    /// Remove every entry in column `col`.
    pub fn empty_column(&mut self, col: usize) {
        let cols = self.cols;
        self.data.retain(|&idx, _| idx % cols != col);
    }

    /// Change the logical shape of the matrix. Entries whose linear index no
    /// longer fits within `new_rows * new_cols` are dropped.
    pub fn reshape(&mut self, new_rows: usize, new_cols: usize) {
        let limit = new_rows * new_cols;
        self.data.retain(|&idx, _| idx < limit);
        self.rows = new_rows;
        self.cols = new_cols;
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, usize, &T)> {
        let cols = self.cols;
        self.data.iter().map(move |(&idx, v)| (idx / cols, idx % cols, v))
    }
}

impl SparseMatrix<bool> {
    /// Row-sum (number of `true` entries) — used for node degree.
    pub fn row_degree(&self, row: usize) -> usize {
        self.get_row(row, true).iter().filter(|(_, &v)| v).count()
    }

    /// Column-sum (number of `true` entries).
    pub fn col_degree(&self, col: usize) -> usize {
        self.get_col(col, true).iter().filter(|(_, &v)| v).count()
    }

    /// Sum of every entry's value, interpreting `true` as 1.
    pub fn degree_vector(&self) -> Vec<usize> {
        (0..self.rows).map(|r| self.row_degree(r)).collect()
    }

    /// Transpose: `(i, j) -> (j, i)`. Requires a square matrix.
    pub fn transpose(&self) -> SparseMatrix<bool> {
        let mut out = SparseMatrix::new(self.cols, self.rows);
        for (r, c, &v) in self.iter() {
            if v {
                let _ = out.insert_or_assign(c, r, v);
            }
        }
        out
    }

    /// Matrix with every row's `true` entries rescaled to sum to 1. Empty
    /// rows stay empty.
    pub fn normalize_rows(&self) -> SparseMatrix<f64> {
        let mut out = SparseMatrix::new(self.rows, self.cols);
        for r in 0..self.rows {
            let deg = self.row_degree(r);
            if deg == 0 {
                continue;
            }
            for (idx, &v) in self.get_row(r, true) {
                if v {
                    let _ = out.insert_or_assign(idx / self.cols, idx % self.cols, 1.0 / deg as f64);
                }
            }
        }
        out
    }

    /// Matrix with every column's `true` entries rescaled to sum to 1. Empty
    /// columns stay empty.
    pub fn normalize_cols(&self) -> SparseMatrix<f64> {
        let mut out = SparseMatrix::new(self.rows, self.cols);
        for c in 0..self.cols {
            let deg = self.col_degree(c);
            if deg == 0 {
                continue;
            }
            for (idx, &v) in self.get_col(c, true) {
                if v {
                    let _ = out.insert_or_assign(idx / self.cols, idx % self.cols, 1.0 / deg as f64);
                }
            }
        }
        out
    }

    /// Graph Laplacian `D - A`: off-diagonal entries are `-1` where an edge
    /// exists, the diagonal holds each row's degree. Requires a square matrix.
    pub fn laplacian(&self) -> GraphResult<SparseMatrix<i64>> {
        if self.rows != self.cols {
            return Err(GraphError::InvalidArgument(
                "laplacian requires a square matrix".into(),
            ));
        }
        let mut out = SparseMatrix::new(self.rows, self.cols);
        for (r, c, &v) in self.iter() {
            if v {
                out.insert_or_assign(r, c, -1)?;
            }
        }
        for r in 0..self.rows {
            out.insert_or_assign(r, r, self.row_degree(r) as i64)?;
        }
        Ok(out)
    }
}

impl<T> SparseMatrix<T>
where
    T: Copy + Default + std::ops::Add<Output = T>,
{
    /// Elementwise sum. Entries absent from one operand are treated as
    /// `T::default()`. Fails if the two matrices' shapes don't match.
    pub fn add(&self, other: &SparseMatrix<T>) -> GraphResult<SparseMatrix<T>> {
        if self.rows != other.rows || self.cols != other.cols {
            return Err(GraphError::InvalidArgument(format!(
                "cannot add a {}x{} matrix to a {}x{} matrix",
                other.rows, other.cols, self.rows, self.cols
            )));
        }
        let mut out = SparseMatrix::new(self.rows, self.cols);
        let indices: HashMap<usize, ()> =
            self.data.keys().chain(other.data.keys()).map(|&idx| (idx, ())).collect();
        for &idx in indices.keys() {
            let a = self.data.get(&idx).copied().unwrap_or_default();
            let b = other.data.get(&idx).copied().unwrap_or_default();
            out.data.insert(idx, a + b);
        }
        Ok(out)
    }
}

impl<T> SparseMatrix<T>
where
    T: Copy + Default + std::ops::Sub<Output = T>,
{
    /// Elementwise difference. Entries absent from one operand are treated
    /// as `T::default()`. Fails if the two matrices' shapes don't match.
    pub fn sub(&self, other: &SparseMatrix<T>) -> GraphResult<SparseMatrix<T>> {
        if self.rows != other.rows || self.cols != other.cols {
            return Err(GraphError::InvalidArgument(format!(
                "cannot subtract a {}x{} matrix from a {}x{} matrix",
                other.rows, other.cols, self.rows, self.cols
            )));
        }
        let mut out = SparseMatrix::new(self.rows, self.cols);
        let indices: HashMap<usize, ()> =
            self.data.keys().chain(other.data.keys()).map(|&idx| (idx, ())).collect();
        for &idx in indices.keys() {
            let a = self.data.get(&idx).copied().unwrap_or_default();
            let b = other.data.get(&idx).copied().unwrap_or_default();
            out.data.insert(idx, a - b);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_contains() {
        let mut m: SparseMatrix<bool> = SparseMatrix::new(4, 4);
        m.insert(1, 2, true).unwrap();
        assert!(m.contains(1, 2).unwrap());
        assert!(!m.contains(2, 1).unwrap());
    }

    #[test]
    fn out_of_range_errs() {
        let m: SparseMatrix<bool> = SparseMatrix::new(2, 2);
        assert!(matches!(m.contains(5, 0), Err(GraphError::IndexOutOfRange(_))));
    }

    #[test]
    fn get_row_keep_id_vs_compact() {
        let mut m: SparseMatrix<bool> = SparseMatrix::new(3, 3);
        m.insert(1, 2, true).unwrap();
        let kept = m.get_row(1, true);
        assert_eq!(kept, vec![(1 * 3 + 2, &true)]);
        let compact = m.get_row(1, false);
        assert_eq!(compact, vec![(2, &true)]);
    }

    #[test]
    fn insert_twice_fails_insert_or_assign_succeeds() {
        let mut m: SparseMatrix<i32> = SparseMatrix::new(2, 2);
        m.insert(0, 0, 1).unwrap();
        assert!(m.insert(0, 0, 2).is_err());
        m.insert_or_assign(0, 0, 2).unwrap();
        assert_eq!(*m.get(0, 0).unwrap().unwrap(), 2);
    }

    #[test]
    fn add_and_sub_overlay_disjoint_and_shared_entries() {
        let mut a: SparseMatrix<i32> = SparseMatrix::new(2, 2);
        a.insert(0, 0, 3).unwrap();
        a.insert(0, 1, 5).unwrap();
        let mut b: SparseMatrix<i32> = SparseMatrix::new(2, 2);
        b.insert(0, 0, 2).unwrap();
        b.insert(1, 1, 7).unwrap();

        let sum = a.add(&b).unwrap();
        assert_eq!(*sum.get(0, 0).unwrap().unwrap(), 5);
        assert_eq!(*sum.get(0, 1).unwrap().unwrap(), 5);
        assert_eq!(*sum.get(1, 1).unwrap().unwrap(), 7);

        let diff = a.sub(&b).unwrap();
        assert_eq!(*diff.get(0, 0).unwrap().unwrap(), 1);
        assert_eq!(*diff.get(1, 1).unwrap().unwrap(), -7);
    }

    #[test]
    fn add_rejects_mismatched_shapes() {
        let a: SparseMatrix<i32> = SparseMatrix::new(2, 2);
        let b: SparseMatrix<i32> = SparseMatrix::new(3, 2);
        assert!(matches!(a.add(&b), Err(GraphError::InvalidArgument(_))));
    }

    #[test]
    fn normalize_rows_and_cols_sum_to_one() {
        let mut m: SparseMatrix<bool> = SparseMatrix::new(2, 3);
        m.insert(0, 0, true).unwrap();
        m.insert(0, 1, true).unwrap();
        m.insert(1, 2, true).unwrap();

        let rows = m.normalize_rows();
        assert_eq!(*rows.get(0, 0).unwrap().unwrap(), 0.5);
        assert_eq!(*rows.get(0, 1).unwrap().unwrap(), 0.5);
        assert_eq!(*rows.get(1, 2).unwrap().unwrap(), 1.0);
        assert!(rows.get(1, 0).unwrap().is_none());

        let cols = m.normalize_cols();
        assert_eq!(*cols.get(0, 0).unwrap().unwrap(), 1.0);
        assert_eq!(*cols.get(1, 2).unwrap().unwrap(), 1.0);
    }

    #[test]
    fn laplacian_matches_degree_minus_adjacency() {
        let mut m: SparseMatrix<bool> = SparseMatrix::new(3, 3);
        m.insert(0, 1, true).unwrap();
        m.insert(0, 2, true).unwrap();
        let l = m.laplacian().unwrap();
        assert_eq!(*l.get(0, 0).unwrap().unwrap(), 2);
        assert_eq!(*l.get(0, 1).unwrap().unwrap(), -1);
        assert_eq!(*l.get(0, 2).unwrap().unwrap(), -1);
        assert_eq!(*l.get(1, 1).unwrap().unwrap(), 0);
    }

    #[test]
    fn laplacian_requires_square_matrix() {
        let m: SparseMatrix<bool> = SparseMatrix::new(2, 3);
        assert!(matches!(m.laplacian(), Err(GraphError::InvalidArgument(_))));
    }

    #[test]
    fn reshape_drops_out_of_bounds_entries() {
        let mut m: SparseMatrix<bool> = SparseMatrix::new(4, 4);
        m.insert(3, 3, true).unwrap();
        m.reshape(2, 2);
        assert_eq!(m.len(), 0);
    }

    #[test]
    fn empty_row_and_column() {
        let mut m: SparseMatrix<bool> = SparseMatrix::new(3, 3);
        m.insert(0, 0, true).unwrap();
        m.insert(0, 1, true).unwrap();
        m.insert(1, 0, true).unwrap();
        m.empty_row(0);
        assert_eq!(m.len(), 1);
        m.empty_column(0);
        assert_eq!(m.len(), 0);
    }
}
