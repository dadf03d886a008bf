//! Quantile binning of feature matrices for histogram-based split search
//!
//! Each feature is mapped to at most `max_bins` ordered bins. A split "at bin
//! b" sends every value `<= cut[b]` left, so the real-valued threshold stored
//! in a tree is `cut[b]` and trees stay valid on unbinned inputs.

use ndarray::Array2;

/// Default number of bins per feature
pub const DEFAULT_MAX_BINS: usize = 255;

/// Cut points for a single feature
#[derive(Debug, Clone, PartialEq)]
pub struct BinMapper {
    /// Sorted upper bounds; value v maps to the number of cuts strictly below v
    cuts: Vec<f64>,
}

impl BinMapper {
    /// Build cuts from the observed values of one feature
    pub fn fit(values: &[f64], max_bins: usize) -> Self {
        let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        sorted.dedup();

        let max_bins = max_bins.max(2);
        let cuts = if sorted.len() <= max_bins {
            sorted.windows(2).map(|w| (w[0] + w[1]) / 2.0).collect()
        } else {
            let mut cuts = Vec::with_capacity(max_bins - 1);
            for b in 1..max_bins {
                let pos = b * (sorted.len() - 1) / max_bins;
                let cut = (sorted[pos] + sorted[pos + 1]) / 2.0;
                if cuts.last().map_or(true, |&last| cut > last) {
                    cuts.push(cut);
                }
            }
            cuts
        };
        Self { cuts }
    }

    /// Bin index for a raw value
    pub fn bin(&self, value: f64) -> u8 {
        self.cuts.partition_point(|&c| c < value) as u8
    }

    pub fn n_bins(&self) -> usize {
        self.cuts.len() + 1
    }

    /// Real-valued threshold for a split that keeps bins `0..=bin` on the left
    pub fn threshold(&self, bin: usize) -> f64 {
        self.cuts.get(bin).copied().unwrap_or(f64::INFINITY)
    }
}

/// Column-major binned copy of a feature matrix
#[derive(Debug, Clone)]
pub struct BinnedMatrix {
    bins: Vec<u8>,
    mappers: Vec<BinMapper>,
    n_rows: usize,
}

impl BinnedMatrix {
    pub fn from_array(x: &Array2<f64>, max_bins: usize) -> Self {
        let max_bins = max_bins.clamp(2, 256);
        let n_rows = x.nrows();
        let n_features = x.ncols();
        let mut bins = Vec::with_capacity(n_rows * n_features);
        let mut mappers = Vec::with_capacity(n_features);

        for column in x.columns() {
            let values: Vec<f64> = column.iter().copied().collect();
            let mapper = BinMapper::fit(&values, max_bins);
            bins.extend(values.iter().map(|&v| mapper.bin(v)));
            mappers.push(mapper);
        }

        Self { bins, mappers, n_rows }
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn n_features(&self) -> usize {
        self.mappers.len()
    }

    /// Binned values of one feature, indexed by row
    pub fn column(&self, feature: usize) -> &[u8] {
        &self.bins[feature * self.n_rows..(feature + 1) * self.n_rows]
    }

    pub fn mapper(&self, feature: usize) -> &BinMapper {
        &self.mappers[feature]
    }

    /// True when `row` goes left for a split at `bin` of `feature`
    pub fn goes_left(&self, row: usize, feature: usize, bin: usize) -> bool {
        (self.column(feature)[row] as usize) <= bin
    }
}

/// Per-bin gradient statistics
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GradBin {
    pub grad: f64,
    pub hess: f64,
    pub count: usize,
}

/// Accumulate gradient/hessian sums per bin for the given rows
pub fn build_histogram(
    binned: &BinnedMatrix,
    feature: usize,
    rows: &[usize],
    grad: &[f64],
    hess: &[f64],
) -> Vec<GradBin> {
    let column = binned.column(feature);
    let mut hist = vec![GradBin::default(); binned.mapper(feature).n_bins()];
    for &r in rows {
        let slot = &mut hist[column[r] as usize];
        slot.grad += grad[r];
        slot.hess += hess[r];
        slot.count += 1;
    }
    hist
}

/// Split `rows` into (left, right) for a split at `bin` of `feature`
pub fn partition_rows(
    binned: &BinnedMatrix,
    feature: usize,
    bin: usize,
    rows: &[usize],
) -> (Vec<usize>, Vec<usize>) {
    rows.iter().partition(|&&r| binned.goes_left(r, feature, bin))
}
