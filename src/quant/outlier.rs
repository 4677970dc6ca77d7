use crate::config::{validate_threshold, OutlierPolicy};
use crate::error::Result;
use crate::matrix::DenseMatrix;
use serde::{Deserialize, Serialize};

/// One full-precision value routed around the int8 path.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OutlierEntry {
    pub row: usize,
    pub col: usize,
    pub value: f32,
}

/// Sparse full-precision values removed from a matrix before quantization.
///
/// Entries are kept sorted by `(row, col)`. `columns` lists every column that
/// triggered extraction, even if all its surviving values were zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutlierSet {
    rows: usize,
    cols: usize,
    columns: Vec<usize>,
    entries: Vec<OutlierEntry>,
}

impl OutlierSet {
    pub fn empty(rows: usize, cols: usize) -> Self {
        Self { rows, cols, columns: Vec::new(), entries: Vec::new() }
    }

    /// Assemble from parts; entries are sorted and columns deduplicated.
    pub fn from_entries(rows: usize, cols: usize, mut columns: Vec<usize>, mut entries: Vec<OutlierEntry>) -> Self {
        columns.extend(entries.iter().map(|e| e.col));
        columns.sort_unstable();
        columns.dedup();
        entries.sort_by_key(|e| (e.row, e.col));
        Self { rows, cols, columns, entries }
    }

    #[inline] pub fn shape(&self) -> (usize, usize) { (self.rows, self.cols) }
    #[inline] pub fn columns(&self) -> &[usize] { &self.columns }
    #[inline] pub fn entries(&self) -> &[OutlierEntry] { &self.entries }
    #[inline] pub fn len(&self) -> usize { self.entries.len() }
    #[inline] pub fn is_empty(&self) -> bool { self.entries.is_empty() && self.columns.is_empty() }

    /// Rows holding at least one stored value.
    pub fn row_indices(&self) -> Vec<usize> {
        let mut rows: Vec<usize> = self.entries.iter().map(|e| e.row).collect();
        rows.dedup();
        rows
    }

    /// Entries of row `i`, relying on the `(row, col)` ordering.
    pub fn row_entries(&self, i: usize) -> &[OutlierEntry] {
        let lo = self.entries.partition_point(|e| e.row < i);
        let hi = self.entries.partition_point(|e| e.row <= i);
        &self.entries[lo..hi]
    }

    pub fn to_dense(&self) -> DenseMatrix {
        let mut m = DenseMatrix::zeros(self.rows, self.cols);
        for e in &self.entries { m.set(e.row, e.col, e.value); }
        m
    }

    /// The same values seen from the transposed matrix.
    pub fn transposed(&self) -> Self {
        let entries = self.entries.iter().map(|e| OutlierEntry { row: e.col, col: e.row, value: e.value }).collect();
        let columns = self.row_indices();
        Self::from_entries(self.cols, self.rows, columns, entries)
    }
}

/// Move outliers of `m` into an [`OutlierSet`], zeroing them in place.
pub fn extract_outliers_in_place(m: &mut DenseMatrix, threshold: f32, policy: OutlierPolicy) -> Result<OutlierSet> {
    validate_threshold(threshold)?;
    let (rows, cols) = m.shape();
    if threshold <= 0.0 {
        return Ok(OutlierSet::empty(rows, cols));
    }
    let mut entries = Vec::new();
    let columns = match policy {
        OutlierPolicy::Column => {
            let mut hit = vec![false; cols];
            for i in 0..rows {
                for (j, v) in m.row(i).iter().enumerate() {
                    if v.abs() >= threshold { hit[j] = true; }
                }
            }
            let columns: Vec<usize> = (0..cols).filter(|&j| hit[j]).collect();
            for i in 0..rows {
                let row = m.row_mut(i);
                for &j in &columns {
                    if row[j] != 0.0 { entries.push(OutlierEntry { row: i, col: j, value: row[j] }); }
                    row[j] = 0.0;
                }
            }
            columns
        }
        OutlierPolicy::Element => {
            let mut columns = Vec::new();
            for i in 0..rows {
                let row = m.row_mut(i);
                for (j, v) in row.iter_mut().enumerate() {
                    if v.abs() >= threshold {
                        entries.push(OutlierEntry { row: i, col: j, value: *v });
                        columns.push(j);
                        *v = 0.0;
                    }
                }
            }
            columns
        }
    };
    if !entries.is_empty() {
        log::debug!("extracted {} outliers over {} columns (threshold {})", entries.len(), columns.len(), threshold);
    }
    Ok(OutlierSet::from_entries(rows, cols, columns, entries))
}

/// Split `m` into the part left for int8 quantization and its outliers.
pub fn extract_outliers(m: &DenseMatrix, threshold: f32, policy: OutlierPolicy) -> Result<(DenseMatrix, OutlierSet)> {
    let mut retained = m.clone();
    let set = extract_outliers_in_place(&mut retained, threshold, policy)?;
    Ok((retained, set))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_entries_slices_by_row() {
        let set = OutlierSet::from_entries(3, 3, vec![], vec![
            OutlierEntry { row: 2, col: 0, value: 1.0 },
            OutlierEntry { row: 0, col: 1, value: 2.0 },
            OutlierEntry { row: 2, col: 2, value: 3.0 },
        ]);
        assert_eq!(set.row_entries(0).len(), 1);
        assert!(set.row_entries(1).is_empty());
        assert_eq!(set.row_entries(2).len(), 2);
        assert_eq!(set.columns(), &[0, 1, 2]);
    }
}
