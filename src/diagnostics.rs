/*!
# Convergence diagnostics over traces

Each diagnostic works on the series of a trace empirical. Those are the tagged variables
(in order of first appearance), followed by the most frequent controlled addresses. The
result is returned as a table. If [`PlotOptions::file_name`] is set, the table is also
written to `<file_name>.csv` and, with [`PlotOptions::plot`], drawn to `<file_name>.svg`.

```rust
use mini_ppl::diagnostics::{autocorrelations, PlotOptions};
use mini_ppl::gum_marsaglia::GaussianUnknownMean;
use mini_ppl::model::Model;
use mini_ppl::trace::ObserveMap;

let model = GaussianUnknownMean::default();
let prior = model.prior_traces(100, &ObserveMap::new(), 1).unwrap();
let acf = autocorrelations(&prior, 2, &PlotOptions::default()).unwrap();
assert_eq!(acf.column("mu").unwrap()[0], Some(1.0));
```
*/

use csv::Writer;
use plotters::prelude::*;
use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::empirical::Empirical;
use crate::error::{PplError, Result};
use crate::io::csv::csv_path;
use crate::stats::{self, GelmanRubin, Histogram};
use crate::trace::Trace;

/// Number of prefixes R-hat is evaluated at.
const GELMAN_RUBIN_CHECKPOINTS: usize = 50;

/// Where, and whether, a diagnostic is persisted.
#[derive(Debug, Clone)]
pub struct PlotOptions {
    /// Also draw an SVG next to the CSV.
    pub plot: bool,
    /// Path without extension.
    pub file_name: Option<PathBuf>,
}

impl Default for PlotOptions {
    fn default() -> Self {
        Self {
            plot: true,
            file_name: None,
        }
    }
}

impl PlotOptions {
    pub fn new(file_name: impl Into<PathBuf>, plot: bool) -> Self {
        Self {
            plot,
            file_name: Some(file_name.into()),
        }
    }
}

/// Columns sharing one x axis. A missing cell is `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct DiagnosticTable {
    pub x_label: &'static str,
    pub x: Vec<f64>,
    pub columns: Vec<(String, Vec<Option<f64>>)>,
}

impl DiagnosticTable {
    pub fn column(&self, name: &str) -> Option<&[Option<f64>]> {
        self.columns
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, c)| c.as_slice())
    }

    fn write_csv(&self, path: &Path) -> Result<()> {
        let mut wtr = Writer::from_writer(File::create(path)?);
        let mut header = vec![self.x_label.to_string()];
        header.extend(self.columns.iter().map(|(name, _)| name.clone()));
        wtr.write_record(&header)?;

        for (row, x) in self.x.iter().enumerate() {
            let mut record = vec![x.to_string()];
            record.extend(self.columns.iter().map(|(_, column)| {
                column
                    .get(row)
                    .copied()
                    .flatten()
                    .map(|v| v.to_string())
                    .unwrap_or_default()
            }));
            wtr.write_record(&record)?;
        }
        wtr.flush()?;
        Ok(())
    }

    fn persist(&self, caption: &str, options: &PlotOptions) -> Result<()> {
        let Some(file_name) = &options.file_name else {
            return Ok(());
        };
        let path = csv_path(file_name);
        self.write_csv(&path)?;
        debug!(path = %path.display(), "Saved {caption}");
        if options.plot {
            let path = svg_path(file_name);
            plot_lines(self, caption, &path)?;
            debug!(path = %path.display(), "Plotted {caption}");
        }
        Ok(())
    }
}

/// Histograms of one series, one per empirical, over shared bin edges.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesHistogram {
    pub series: String,
    pub ground_truth: Option<f64>,
    pub histograms: Vec<(String, Histogram)>,
}

/// `path` with `.svg` appended.
pub fn svg_path(path: &Path) -> PathBuf {
    let mut s = path.as_os_str().to_owned();
    s.push(".svg");
    PathBuf::from(s)
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Series {
    Tagged(String),
    Address(String),
}

impl Series {
    fn label(&self) -> &str {
        match self {
            Series::Tagged(name) | Series::Address(name) => name,
        }
    }

    fn value_in(&self, trace: &Trace) -> Option<f64> {
        match self {
            Series::Tagged(name) => trace
                .tagged()
                .find(|v| v.name.as_deref() == Some(name.as_str()))
                .map(|v| v.value),
            Series::Address(address) => trace.at_address(address).map(|v| v.value),
        }
    }

    fn values(&self, empirical: &Empirical<Trace>) -> Vec<f64> {
        empirical
            .values()
            .iter()
            .filter_map(|t| self.value_in(t))
            .collect()
    }

    /// Values with their log weights.
    fn weighted(&self, empirical: &Empirical<Trace>) -> (Vec<f64>, Vec<f64>) {
        empirical
            .values()
            .iter()
            .zip(empirical.log_weights())
            .filter_map(|(t, &w)| self.value_in(t).map(|v| (v, w)))
            .unzip()
    }
}

/// Tagged names first, then up to `n_most_frequent` controlled addresses pooled over
/// `empiricals` (all of them when `None`).
fn select_series(empiricals: &[&Empirical<Trace>], n_most_frequent: Option<usize>) -> Vec<Series> {
    let mut series: Vec<Series> = Vec::new();
    for e in empiricals {
        for name in e.tagged_names() {
            let s = Series::Tagged(name);
            if !series.contains(&s) {
                series.push(s);
            }
        }
    }

    let mut counts: HashMap<String, usize> = HashMap::new();
    for e in empiricals {
        for (address, count) in e.address_frequencies() {
            *counts.entry(address).or_insert(0) += count;
        }
    }
    let mut addresses: Vec<(String, usize)> = counts.into_iter().collect();
    addresses.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    let take = n_most_frequent.unwrap_or(addresses.len());
    series.extend(
        addresses
            .into_iter()
            .take(take)
            .map(|(address, _)| Series::Address(address)),
    );
    series
}

/// Autocorrelation of every series of `empirical`, by lag.
pub fn autocorrelations(
    empirical: &Empirical<Trace>,
    n_most_frequent: usize,
    options: &PlotOptions,
) -> Result<DiagnosticTable> {
    if empirical.is_empty() {
        return Err(PplError::EmptyEmpirical);
    }
    let mut columns = Vec::new();
    for series in select_series(&[empirical], Some(n_most_frequent)) {
        let values = series.values(empirical);
        if values.is_empty() {
            continue;
        }
        let acf = stats::autocorrelation(&values)?;
        columns.push((series.label().to_string(), acf.into_iter().map(Some).collect()));
    }
    let table = DiagnosticTable {
        x_label: "lag",
        x: (0..empirical.len()).map(|lag| lag as f64).collect(),
        columns,
    };
    table.persist(&format!("Autocorrelation, {}", empirical.name()), options)?;
    Ok(table)
}

/// Prefix lengths R-hat is reported at: evenly spaced from 2 to `n`.
fn checkpoints(n: usize) -> Vec<usize> {
    let count = GELMAN_RUBIN_CHECKPOINTS.min(n - 1);
    let mut out: Vec<usize> = if count <= 1 {
        vec![n]
    } else {
        (0..count).map(|k| 2 + k * (n - 2) / (count - 1)).collect()
    };
    out.dedup();
    out
}

/// R-hat of every series across `chains`, over growing prefixes of the chains.
pub fn gelman_rubin(
    chains: &[&Empirical<Trace>],
    n_most_frequent: usize,
    options: &PlotOptions,
) -> Result<DiagnosticTable> {
    if chains.len() < 2 {
        return Err(PplError::ChainMismatch(format!(
            "Gelman-Rubin needs at least 2 chains, got {}",
            chains.len()
        )));
    }
    let n = chains[0].len();
    if let Some(bad) = chains.iter().find(|c| c.len() != n) {
        return Err(PplError::ChainMismatch(format!(
            "chains must have equal lengths, got {n} and {}",
            bad.len()
        )));
    }
    if n < 2 {
        return Err(PplError::ChainMismatch(
            "Gelman-Rubin needs at least 2 samples per chain".into(),
        ));
    }

    let points = checkpoints(n);
    let mut columns = Vec::new();
    for series in select_series(chains, Some(n_most_frequent)) {
        let values: Vec<Vec<f64>> = chains.iter().map(|c| series.values(c)).collect();
        let available = values.iter().map(Vec::len).min().unwrap_or(0);

        let mut psr = GelmanRubin::new(chains.len(), 1);
        let mut column = Vec::with_capacity(points.len());
        let mut next = points.iter().peekable();
        for t in 0..available {
            let draw: Vec<f64> = values.iter().map(|v| v[t]).collect();
            psr.step(&draw)?;
            if next.peek().is_some_and(|&&p| p == t + 1) {
                column.push(psr.all()?.get(0).copied());
                next.next();
            }
        }
        column.resize(points.len(), None);
        columns.push((series.label().to_string(), column));
    }

    let table = DiagnosticTable {
        x_label: "iteration",
        x: points.iter().map(|&p| p as f64).collect(),
        columns,
    };
    table.persist("Gelman-Rubin R-hat", options)?;
    Ok(table)
}

/// The trace log-probabilities of every chain, by iteration.
pub fn log_prob(chains: &[&Empirical<Trace>], options: &PlotOptions) -> Result<DiagnosticTable> {
    let n = chains.iter().map(|c| c.len()).max().ok_or(PplError::EmptyEmpirical)?;
    let columns = chains
        .iter()
        .map(|c| {
            (
                c.name().to_string(),
                c.log_probs().into_iter().map(Some).collect(),
            )
        })
        .collect();
    let table = DiagnosticTable {
        x_label: "iteration",
        x: (0..n).map(|i| i as f64).collect(),
        columns,
    };
    table.persist("Trace log-probability", options)?;
    Ok(table)
}

/// Weighted histograms of every tagged and controlled series of `empiricals`.
pub fn address_histograms(
    empiricals: &[&Empirical<Trace>],
    ground_truth: Option<&Trace>,
    bins: usize,
    options: &PlotOptions,
) -> Result<Vec<SeriesHistogram>> {
    if empiricals.is_empty() {
        return Err(PplError::EmptyEmpirical);
    }
    let mut out = Vec::new();
    for series in select_series(empiricals, None) {
        let data: Vec<(&str, Vec<f64>, Vec<f64>)> = empiricals
            .iter()
            .map(|e| {
                let (values, log_weights) = series.weighted(e);
                (e.name(), values, log_weights)
            })
            .filter(|(_, values, _)| !values.is_empty())
            .collect();
        let truth = ground_truth.and_then(|t| series.value_in(t));

        let all = data
            .iter()
            .flat_map(|(_, values, _)| values.iter().copied())
            .chain(truth)
            .filter(|v| v.is_finite());
        let (low, high) = all.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(v), hi.max(v))
        });
        if low > high {
            continue;
        }
        let edges = stats::bin_edges(low, high, bins)?;

        let histograms = data
            .iter()
            .map(|(name, values, log_weights)| {
                Ok((
                    name.to_string(),
                    stats::weighted_histogram(values, log_weights, &edges)?,
                ))
            })
            .collect::<Result<Vec<_>>>()?;
        out.push(SeriesHistogram {
            series: series.label().to_string(),
            ground_truth: truth,
            histograms,
        });
    }

    if let Some(file_name) = &options.file_name {
        let path = csv_path(file_name);
        write_histograms_csv(&out, &path)?;
        debug!(path = %path.display(), "Saved address histograms");
        if options.plot {
            let path = svg_path(file_name);
            plot_histograms(&out, &path)?;
            debug!(path = %path.display(), "Plotted address histograms");
        }
    }
    Ok(out)
}

fn write_histograms_csv(histograms: &[SeriesHistogram], path: &Path) -> Result<()> {
    let mut wtr = Writer::from_writer(File::create(path)?);
    wtr.write_record(["series", "empirical", "bin_low", "bin_high", "density"])?;
    for h in histograms {
        for (name, hist) in &h.histograms {
            for (edge, density) in hist.edges.windows(2).zip(&hist.density) {
                wtr.write_record([
                    h.series.clone(),
                    name.clone(),
                    edge[0].to_string(),
                    edge[1].to_string(),
                    density.to_string(),
                ])?;
            }
        }
        if let Some(truth) = h.ground_truth {
            wtr.write_record([
                h.series.clone(),
                "ground_truth".to_string(),
                truth.to_string(),
                String::new(),
                String::new(),
            ])?;
        }
    }
    wtr.flush()?;
    Ok(())
}

fn plot_err<E: std::fmt::Display>(e: E) -> PplError {
    PplError::Plot(e.to_string())
}

/// Min and max of the finite values, padded by 5%. Falls back to `0..1`.
fn padded_range(values: impl Iterator<Item = f64>) -> (f64, f64) {
    let (lo, hi) = values
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(v), hi.max(v))
        });
    if lo > hi {
        return (0.0, 1.0);
    }
    if lo == hi {
        return (lo - 0.5, hi + 0.5);
    }
    let pad = 0.05 * (hi - lo);
    (lo - pad, hi + pad)
}

fn plot_lines(table: &DiagnosticTable, caption: &str, path: &Path) -> Result<()> {
    let root = SVGBackend::new(path, (1024, 640)).into_drawing_area();
    root.fill(&WHITE).map_err(plot_err)?;

    let (x_min, x_max) = padded_range(table.x.iter().copied());
    let (y_min, y_max) = padded_range(
        table
            .columns
            .iter()
            .flat_map(|(_, column)| column.iter().flatten().copied()),
    );
    let mut chart = ChartBuilder::on(&root)
        .caption(caption, ("sans-serif", 20))
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(x_min..x_max, y_min..y_max)
        .map_err(plot_err)?;
    chart
        .configure_mesh()
        .x_desc(table.x_label)
        .draw()
        .map_err(plot_err)?;

    for (i, (name, column)) in table.columns.iter().enumerate() {
        let color = Palette99::pick(i).to_rgba();
        let points = table
            .x
            .iter()
            .zip(column)
            .filter_map(|(&x, y)| y.filter(|y| y.is_finite()).map(|y| (x, y)));
        chart
            .draw_series(LineSeries::new(points, color))
            .map_err(plot_err)?
            .label(name.as_str())
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color));
    }
    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()
        .map_err(plot_err)?;
    root.present().map_err(plot_err)?;
    Ok(())
}

fn plot_histograms(histograms: &[SeriesHistogram], path: &Path) -> Result<()> {
    if histograms.is_empty() {
        return Ok(());
    }
    let height = 240 * histograms.len() as u32;
    let root = SVGBackend::new(path, (1024, height)).into_drawing_area();
    root.fill(&WHITE).map_err(plot_err)?;
    let panels = root.split_evenly((histograms.len(), 1));

    for (panel, h) in panels.iter().zip(histograms) {
        let Some(edges) = h.histograms.first().map(|(_, hist)| &hist.edges) else {
            continue;
        };
        let (low, high) = (edges[0], edges[edges.len() - 1]);
        let y_max = h
            .histograms
            .iter()
            .flat_map(|(_, hist)| hist.density.iter().copied())
            .fold(0.0, f64::max);
        let y_max = if y_max > 0.0 { 1.1 * y_max } else { 1.0 };

        let mut chart = ChartBuilder::on(panel)
            .caption(&h.series, ("sans-serif", 16))
            .margin(8)
            .x_label_area_size(30)
            .y_label_area_size(60)
            .build_cartesian_2d(low..high, 0.0..y_max)
            .map_err(plot_err)?;
        chart.configure_mesh().draw().map_err(plot_err)?;

        for (i, (name, hist)) in h.histograms.iter().enumerate() {
            let color = Palette99::pick(i).to_rgba();
            chart
                .draw_series(
                    hist.edges
                        .windows(2)
                        .zip(&hist.density)
                        .map(|(e, &d)| Rectangle::new([(e[0], 0.0), (e[1], d)], color.mix(0.3).filled())),
                )
                .map_err(plot_err)?
                .label(name.as_str())
                .legend(move |(x, y)| Rectangle::new([(x, y - 5), (x + 20, y + 5)], color.filled()));
        }
        if let Some(truth) = h.ground_truth {
            chart
                .draw_series(LineSeries::new(
                    vec![(truth, 0.0), (truth, y_max)],
                    BLACK.stroke_width(2),
                ))
                .map_err(plot_err)?
                .label("ground truth")
                .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], BLACK));
        }
        chart
            .configure_series_labels()
            .background_style(WHITE.mix(0.8))
            .border_style(BLACK)
            .draw()
            .map_err(plot_err)?;
    }
    root.present().map_err(plot_err)?;
    Ok(())
}
