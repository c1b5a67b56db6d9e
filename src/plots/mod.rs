//! Study plots rendered to PNG.
//!
//! Three figures come out of a finished study:
//!
//! - `ite_<hparam>.png` / `ate_<hparam>.png`: individual and average
//!   treatment effects of one hyperparameter on the predicted class.
//! - `base_model_accuracies.png`: train/test accuracy distributions of the
//!   whole zoo per checkpoint.
//! - `heatmap_results_for_meta_model.png`: meta-model accuracy pivoted over
//!   (train_fraction, checkpoint).
//!
//! Distribution panels draw each group as a jittered column of points with a
//! horizontal median bar; the jitter is seeded so reruns produce identical
//! pixels.

use std::path::Path;

use anyhow::{ensure, Context, Result};
use plotters::prelude::*;
use rand::prelude::*;

use crate::config::{self, Config, CHECKPOINTS, FINAL_CHECKPOINT, NUM_HPARAMS};
use crate::extraction::store::{ExperimentStore, ResultRow};
use crate::extraction::ExtractedData;
use crate::zoo::MetricsTable;

const FIGURE_SIZE: (u32, u32) = (1800, 600);
const JITTER_WIDTH: f64 = 0.12;

/// Round each value to the nearest marker.
///
/// With `use_log_rounding`, nearest is measured in log10 space, which is the
/// right metric for hyperparameters sampled log-uniformly.
pub fn round_to_markers(values: &[f64], markers: &[f64], use_log_rounding: bool) -> Vec<f64> {
    let marker_space: Vec<f64> = if use_log_rounding {
        markers.iter().map(|m| m.log10()).collect()
    } else {
        markers.to_vec()
    };
    values
        .iter()
        .map(|&v| {
            let v_space = if use_log_rounding { v.log10() } else { v };
            let mut best = 0;
            for (i, m) in marker_space.iter().enumerate() {
                if (m - v_space).abs() < (marker_space[best] - v_space).abs() {
                    best = i;
                }
            }
            markers[best]
        })
        .collect()
}

/// One hyperparameter column, binned to plottable group labels.
///
/// Categorical columns pass through verbatim. Numeric columns are rounded to
/// the configured markers first; hyperparameters were sampled continuously,
/// so without binning every model lands in its own group.
fn processed_hparam_column(config: &Config, table: &MetricsTable, column: &str) -> Result<Vec<String>> {
    let n = table.num_rows();
    if !NUM_HPARAMS.contains(&column) {
        return (0..n)
            .map(|row| table.str_at(row, column).map(|s| s.to_string()))
            .collect();
    }

    let values: Vec<f64> = (0..n)
        .map(|row| table.f64_at(row, column))
        .collect::<Result<_>>()?;
    let rounded = match config.markers_for(column) {
        Some(markers) => {
            let use_log = config::LOG_SCALE_HPARAMS.contains(&column);
            round_to_markers(&values, markers, use_log)
        }
        None => values,
    };
    Ok(rounded.iter().map(|v| format!("{}", v)).collect())
}

fn argmax_row(row: ndarray::ArrayView1<f32>) -> usize {
    let mut best = 0;
    for (i, &v) in row.iter().enumerate() {
        if v > row[best] {
            best = i;
        }
    }
    best
}

/// Per-(sample, hparam-bin) group of predicted classes.
struct TreatmentGroup {
    sample_idx: usize,
    hparam_value: String,
    preds: Vec<usize>,
}

/// Group predicted classes by shared sample and hyperparameter bin.
///
/// Sample k of every base model's block is the same image (identical-samples
/// extraction), so striding through the rows with the per-model block size
/// collects one shared image's predictions across all base models.
fn collect_treatment_effects(
    config: &Config,
    data: &ExtractedData,
    hparam_values: &[String],
) -> Result<(Vec<TreatmentGroup>, Vec<usize>)> {
    let block = config.num_samples_per_base_model;
    let num_rows = data.num_rows();
    let num_plotted = config.num_samples_to_plot_te_for.min(block);

    let mut groups = Vec::new();
    let mut true_labels = Vec::with_capacity(num_plotted);

    for sample_idx in 0..num_plotted {
        let rows: Vec<usize> = (sample_idx..num_rows).step_by(block).collect();

        let trues: Vec<usize> = rows.iter().map(|&r| argmax_row(data.y_trues.row(r))).collect();
        ensure!(
            trues.iter().all(|&t| t == trues[0]),
            "sample {} has differing true labels across base models; \
             extraction was not run with identical samples",
            sample_idx
        );
        true_labels.push(trues[0]);

        let mut values: Vec<&String> = rows.iter().map(|&r| &hparam_values[r]).collect();
        values.sort();
        values.dedup();
        for value in values {
            let preds: Vec<usize> = rows
                .iter()
                .filter(|&&r| &hparam_values[r] == value)
                .map(|&r| argmax_row(data.y_preds.row(r)))
                .collect();
            groups.push(TreatmentGroup {
                sample_idx,
                hparam_value: value.clone(),
                preds,
            });
        }
    }
    Ok((groups, true_labels))
}

/// Draw one jittered point column with a median bar.
fn draw_distribution_column<DB: DrawingBackend>(
    chart: &mut ChartContext<'_, DB, Cartesian2d<plotters::coord::types::RangedCoordf64, plotters::coord::types::RangedCoordf64>>,
    center: f64,
    values: &[f64],
    color: &RGBColor,
    rng: &mut StdRng,
) -> Result<()>
where
    DB::ErrorType: 'static,
{
    let points: Vec<(f64, f64)> = values
        .iter()
        .map(|&v| (center + rng.gen_range(-JITTER_WIDTH..JITTER_WIDTH), v))
        .collect();
    chart
        .draw_series(points.iter().map(|&(x, y)| Circle::new((x, y), 3, color.mix(0.4).filled())))
        .map_err(|e| anyhow::anyhow!("failed to draw points: {}", e))?;

    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    if !sorted.is_empty() {
        let median = sorted[sorted.len() / 2];
        chart
            .draw_series(std::iter::once(PathElement::new(
                vec![(center - 2.0 * JITTER_WIDTH, median), (center + 2.0 * JITTER_WIDTH, median)],
                color.stroke_width(3),
            )))
            .map_err(|e| anyhow::anyhow!("failed to draw median bar: {}", e))?;
    }
    Ok(())
}

/// Render `ite_<hparam>.png` and `ate_<hparam>.png` for every hyperparameter.
///
/// Only valid on an identical-samples extraction: the ITE panel compares how
/// differently-configured models classify the SAME image, so the image must
/// be shared across models.
pub fn plot_treatment_effects(config: &Config, store: &ExperimentStore) -> Result<()> {
    ensure!(
        config.use_identical_samples,
        "treatment-effect plots require an identical-samples extraction"
    );

    let data = store.load_extraction(config, FINAL_CHECKPOINT)?;
    data.assert_aligned()?;

    let plots_dir = config.plots_dir();
    std::fs::create_dir_all(&plots_dir)
        .with_context(|| format!("failed to create {}", plots_dir.display()))?;

    for column in config::all_hparams() {
        log::info!("Plotting ITE and ATE for hparam `{}`...", column);
        let hparam_values = processed_hparam_column(config, &data.hparams, column)?;
        let (groups, true_labels) = collect_treatment_effects(config, &data, &hparam_values)?;

        let slug = column.rsplit('.').next().unwrap_or(column);
        plot_ite(config, &groups, &true_labels, &plots_dir.join(format!("ite_{}.png", slug)))?;
        plot_ate(config, &groups, &plots_dir.join(format!("ate_{}.png", slug)))?;
    }
    Ok(())
}

fn sorted_group_values(groups: &[TreatmentGroup]) -> Vec<String> {
    let mut values: Vec<String> = groups.iter().map(|g| g.hparam_value.clone()).collect();
    values.sort();
    values.dedup();
    values
}

fn plot_ite(
    config: &Config,
    groups: &[TreatmentGroup],
    true_labels: &[usize],
    path: &Path,
) -> Result<()> {
    let num_classes = config.dataset.num_classes();
    let num_samples = true_labels.len();
    let values = sorted_group_values(groups);

    let root = BitMapBackend::new(path, FIGURE_SIZE).into_drawing_area();
    root.fill(&WHITE).map_err(|e| anyhow::anyhow!("failed to fill canvas: {}", e))?;

    let caption = format!(
        "Predicted class per shared sample (models with test acc > %{})",
        100.0 * config.keep_models_above_test_accuracy
    );
    let mut chart = ChartBuilder::on(&root)
        .caption(caption, ("sans-serif", 24))
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d(-0.5..(num_samples as f64 - 0.5), -0.5..(num_classes as f64 - 0.5))
        .map_err(|e| anyhow::anyhow!("failed to build chart: {}", e))?;
    chart
        .configure_mesh()
        .x_desc("sample")
        .y_desc("predicted class")
        .x_label_formatter(&|x| format!("x{}", x.round() as i64))
        .draw()
        .map_err(|e| anyhow::anyhow!("failed to draw mesh: {}", e))?;

    let mut rng = StdRng::seed_from_u64(config.random_seed);
    for group in groups {
        let hue = values.iter().position(|v| v == &group.hparam_value).unwrap_or(0);
        // Spread hue groups around the sample's tick mark.
        let spread = 0.8 / values.len() as f64;
        let center = group.sample_idx as f64 - 0.4 + spread * (hue as f64 + 0.5);
        let preds: Vec<f64> = group.preds.iter().map(|&p| p as f64).collect();
        let color = Palette99::pick(hue).to_rgba();
        let color = RGBColor(color.0, color.1, color.2);
        draw_distribution_column(&mut chart, center, &preds, &color, &mut rng)?;
    }

    // Mark every sample's true label.
    chart
        .draw_series(true_labels.iter().enumerate().map(|(i, &label)| {
            Cross::new((i as f64, label as f64), 8, BLACK.stroke_width(3))
        }))
        .map_err(|e| anyhow::anyhow!("failed to draw true-label marks: {}", e))?;

    for (hue, value) in values.iter().enumerate() {
        let color = Palette99::pick(hue).to_rgba();
        let color = RGBColor(color.0, color.1, color.2);
        chart
            .draw_series(std::iter::once(Circle::new((-10.0, -10.0), 3, color.filled())))
            .map_err(|e| anyhow::anyhow!("failed to draw legend: {}", e))?
            .label(value.clone())
            .legend(move |(x, y)| Circle::new((x + 10, y), 4, color.filled()));
    }
    chart
        .configure_series_labels()
        .position(SeriesLabelPosition::UpperRight)
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()
        .map_err(|e| anyhow::anyhow!("failed to draw legend box: {}", e))?;

    root.present().map_err(|e| anyhow::anyhow!("failed to write {}: {}", path.display(), e))?;
    log::info!("Saved {}", path.display());
    Ok(())
}

fn plot_ate(config: &Config, groups: &[TreatmentGroup], path: &Path) -> Result<()> {
    let num_classes = config.dataset.num_classes();
    let values = sorted_group_values(groups);

    let root = BitMapBackend::new(path, FIGURE_SIZE).into_drawing_area();
    root.fill(&WHITE).map_err(|e| anyhow::anyhow!("failed to fill canvas: {}", e))?;

    let mut chart = ChartBuilder::on(&root)
        .caption("Predicted class per hparam value, pooled over samples", ("sans-serif", 24))
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d(-0.5..(values.len() as f64 - 0.5), -0.5..(num_classes as f64 - 0.5))
        .map_err(|e| anyhow::anyhow!("failed to build chart: {}", e))?;
    let labels = values.clone();
    chart
        .configure_mesh()
        .x_desc("hparam value")
        .y_desc("predicted class")
        .x_label_formatter(&move |x| {
            let idx = x.round() as i64;
            if idx >= 0 && (idx as usize) < labels.len() {
                labels[idx as usize].clone()
            } else {
                String::new()
            }
        })
        .draw()
        .map_err(|e| anyhow::anyhow!("failed to draw mesh: {}", e))?;

    let mut rng = StdRng::seed_from_u64(config.random_seed);
    for (hue, value) in values.iter().enumerate() {
        // The ATE column pools every sample's predictions for this value.
        let preds: Vec<f64> = groups
            .iter()
            .filter(|g| &g.hparam_value == value)
            .flat_map(|g| g.preds.iter().map(|&p| p as f64))
            .collect();
        let color = Palette99::pick(hue).to_rgba();
        let color = RGBColor(color.0, color.1, color.2);
        draw_distribution_column(&mut chart, hue as f64, &preds, &color, &mut rng)?;
    }

    root.present().map_err(|e| anyhow::anyhow!("failed to write {}: {}", path.display(), e))?;
    log::info!("Saved {}", path.display());
    Ok(())
}

/// Render `base_model_accuracies.png`: the zoo's train/test accuracy
/// distributions at every checkpoint.
pub fn plot_base_model_accuracies(config: &Config, zoo_metrics: &MetricsTable) -> Result<()> {
    log::info!("Analyzing base model accuracies...");

    let plots_dir = config.plots_dir();
    std::fs::create_dir_all(&plots_dir)
        .with_context(|| format!("failed to create {}", plots_dir.display()))?;
    let path = plots_dir.join("base_model_accuracies.png");

    let root = BitMapBackend::new(&path, FIGURE_SIZE).into_drawing_area();
    root.fill(&WHITE).map_err(|e| anyhow::anyhow!("failed to fill canvas: {}", e))?;

    let mut chart = ChartBuilder::on(&root)
        .caption("Base model accuracies per checkpoint", ("sans-serif", 24))
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d(-0.5..(CHECKPOINTS.len() as f64 - 0.5), 0.0..1.0)
        .map_err(|e| anyhow::anyhow!("failed to build chart: {}", e))?;
    chart
        .configure_mesh()
        .x_desc("checkpoint")
        .y_desc("accuracy")
        .x_label_formatter(&|x| {
            let idx = x.round() as i64;
            if idx >= 0 && (idx as usize) < CHECKPOINTS.len() {
                CHECKPOINTS[idx as usize].to_string()
            } else {
                String::new()
            }
        })
        .draw()
        .map_err(|e| anyhow::anyhow!("failed to draw mesh: {}", e))?;

    let mut rng = StdRng::seed_from_u64(config.random_seed);
    for (tick, &chkpt) in CHECKPOINTS.iter().enumerate() {
        let rows = zoo_metrics.rows_where_step(chkpt)?;
        for (hue, column) in ["train_accuracy", "test_accuracy"].iter().enumerate() {
            let accuracies: Vec<f64> = rows
                .iter()
                .map(|&r| zoo_metrics.f64_at(r, column))
                .collect::<Result<_>>()?;
            let center = tick as f64 + if hue == 0 { -0.18 } else { 0.18 };
            let color = if hue == 0 { BLUE } else { RED };
            draw_distribution_column(&mut chart, center, &accuracies, &color, &mut rng)?;
        }
    }

    for (hue, name) in ["train", "test"].iter().enumerate() {
        let color = if hue == 0 { BLUE } else { RED };
        chart
            .draw_series(std::iter::once(Circle::new((-10.0, -10.0), 3, color.filled())))
            .map_err(|e| anyhow::anyhow!("failed to draw legend: {}", e))?
            .label(*name)
            .legend(move |(x, y)| Circle::new((x + 10, y), 4, color.filled()));
    }
    chart
        .configure_series_labels()
        .position(SeriesLabelPosition::LowerRight)
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()
        .map_err(|e| anyhow::anyhow!("failed to draw legend box: {}", e))?;

    root.present().map_err(|e| anyhow::anyhow!("failed to write {}: {}", path.display(), e))?;
    log::info!("Saved {}", path.display());
    Ok(())
}

/// Pivot the results table into a (train_fraction x chkpt) accuracy grid.
///
/// Returns sorted fractions (rows), sorted checkpoints (columns, the
/// hparams pseudo-checkpoint -1 first) and the grid with NaN for cells that
/// were never trained.
pub fn pivot_results(
    results: &[ResultRow],
    accuracy: impl Fn(&ResultRow) -> f64,
) -> (Vec<f64>, Vec<i32>, Vec<Vec<f64>>) {
    let mut fractions: Vec<f64> = results.iter().map(|r| r.train_fraction).collect();
    fractions.sort_by(|a, b| a.total_cmp(b));
    fractions.dedup();
    let mut chkpts: Vec<i32> = results.iter().map(|r| r.chkpt).collect();
    chkpts.sort();
    chkpts.dedup();

    let mut grid = vec![vec![f64::NAN; chkpts.len()]; fractions.len()];
    for row in results {
        let i = fractions.iter().position(|&f| f == row.train_fraction).unwrap_or(0);
        let j = chkpts.iter().position(|&c| c == row.chkpt).unwrap_or(0);
        grid[i][j] = accuracy(row);
    }
    (fractions, chkpts, grid)
}

fn heat_color(value: f64, min: f64, max: f64) -> RGBColor {
    if value.is_nan() {
        return RGBColor(210, 210, 210);
    }
    let span = (max - min).max(1e-9);
    let t = ((value - min) / span).clamp(0.0, 1.0);
    // Dark blue to warm yellow.
    let lerp = |a: f64, b: f64| (a + t * (b - a)) as u8;
    RGBColor(lerp(40.0, 250.0), lerp(50.0, 200.0), lerp(120.0, 60.0))
}

fn draw_heatmap<DB: DrawingBackend>(
    area: &DrawingArea<DB, plotters::coord::Shift>,
    title: &str,
    fractions: &[f64],
    chkpts: &[i32],
    grid: &[Vec<f64>],
) -> Result<()>
where
    DB::ErrorType: 'static,
{
    let (min, max) = grid
        .iter()
        .flatten()
        .filter(|v| !v.is_nan())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));

    let mut chart = ChartBuilder::on(area)
        .caption(title, ("sans-serif", 20))
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(0.0..chkpts.len() as f64, 0.0..fractions.len() as f64)
        .map_err(|e| anyhow::anyhow!("failed to build heatmap: {}", e))?;
    let chkpt_labels: Vec<String> = chkpts.iter().map(|c| c.to_string()).collect();
    let fraction_labels: Vec<String> = fractions.iter().map(|f| format!("{}", f)).collect();
    chart
        .configure_mesh()
        .disable_mesh()
        .x_desc("chkpt")
        .y_desc("train_fraction")
        .x_labels(chkpts.len())
        .y_labels(fractions.len())
        .x_label_formatter(&move |x| {
            let idx = x.floor() as usize;
            chkpt_labels.get(idx).cloned().unwrap_or_default()
        })
        .y_label_formatter(&move |y| {
            let idx = y.floor() as usize;
            fraction_labels.get(idx).cloned().unwrap_or_default()
        })
        .draw()
        .map_err(|e| anyhow::anyhow!("failed to draw heatmap mesh: {}", e))?;

    for (i, row) in grid.iter().enumerate() {
        for (j, &value) in row.iter().enumerate() {
            let (x0, y0) = (j as f64, i as f64);
            chart
                .draw_series(std::iter::once(Rectangle::new(
                    [(x0, y0), (x0 + 1.0, y0 + 1.0)],
                    heat_color(value, min, max).filled(),
                )))
                .map_err(|e| anyhow::anyhow!("failed to draw cell: {}", e))?;
            if !value.is_nan() {
                chart
                    .draw_series(std::iter::once(Text::new(
                        format!("{:.2}", value),
                        (x0 + 0.35, y0 + 0.55),
                        ("sans-serif", 16).into_font().color(&BLACK),
                    )))
                    .map_err(|e| anyhow::anyhow!("failed to annotate cell: {}", e))?;
            }
        }
    }
    Ok(())
}

/// Render `heatmap_results_for_meta_model.png`: train and test accuracy
/// grids side by side.
pub fn plot_results_heatmap(config: &Config, store: &ExperimentStore) -> Result<()> {
    let results = store.load_results()?;
    ensure!(!results.is_empty(), "no meta-model results recorded yet");

    let plots_dir = config.plots_dir();
    std::fs::create_dir_all(&plots_dir)
        .with_context(|| format!("failed to create {}", plots_dir.display()))?;
    let path = plots_dir.join("heatmap_results_for_meta_model.png");

    let root = BitMapBackend::new(&path, FIGURE_SIZE).into_drawing_area();
    root.fill(&WHITE).map_err(|e| anyhow::anyhow!("failed to fill canvas: {}", e))?;
    let panels = root.split_evenly((1, 2));

    let (fractions, chkpts, train_grid) = pivot_results(&results, |r| r.train_accuracy);
    let (_, _, test_grid) = pivot_results(&results, |r| r.test_accuracy);

    draw_heatmap(
        &panels[0],
        "train_results (smaller train_fraction = more overfit = higher perf)",
        &fractions,
        &chkpts,
        &train_grid,
    )?;
    draw_heatmap(
        &panels[1],
        "test_results (larger train_fraction = less overfit = higher perf)",
        &fractions,
        &chkpts,
        &test_grid,
    )?;

    root.present().map_err(|e| anyhow::anyhow!("failed to write {}: {}", path.display(), e))?;
    log::info!("Saved {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_to_markers_linear() {
        let rounded = round_to_markers(&[0.12, 0.48, 0.91], &[0.0, 0.5, 1.0], false);
        assert_eq!(rounded, vec![0.0, 0.5, 1.0]);
    }

    #[test]
    fn test_round_to_markers_log() {
        // 3e-4 is linearly closer to 1e-3 than to 1e-4, but in log space it
        // sits below the midpoint and must round down.
        let rounded = round_to_markers(&[3e-4], &[1e-4, 1e-3], true);
        assert_eq!(rounded, vec![1e-4]);

        let rounded = round_to_markers(&[4e-4], &[1e-4, 1e-3], true);
        assert_eq!(rounded, vec![1e-3]);
    }

    #[test]
    fn test_round_to_markers_exact_values_unchanged() {
        let markers = [1e-4, 1e-3, 1e-2];
        let rounded = round_to_markers(&markers, &markers, true);
        assert_eq!(rounded.to_vec(), markers.to_vec());
    }

    #[test]
    fn test_pivot_results_grid() {
        let results = vec![
            ResultRow { chkpt: -1, train_fraction: 0.1, train_accuracy: 0.9, test_accuracy: 0.5 },
            ResultRow { chkpt: 20, train_fraction: 0.1, train_accuracy: 0.8, test_accuracy: 0.6 },
            ResultRow { chkpt: 20, train_fraction: 0.8, train_accuracy: 0.7, test_accuracy: 0.7 },
        ];
        let (fractions, chkpts, grid) = pivot_results(&results, |r| r.train_accuracy);
        assert_eq!(fractions, vec![0.1, 0.8]);
        assert_eq!(chkpts, vec![-1, 20]);
        assert_eq!(grid[0][0], 0.9);
        assert_eq!(grid[0][1], 0.8);
        assert_eq!(grid[1][1], 0.7);
        assert!(grid[1][0].is_nan(), "untrained cell must stay NaN");
    }

    #[test]
    fn test_heat_color_extremes_differ() {
        let lo = heat_color(0.0, 0.0, 1.0);
        let hi = heat_color(1.0, 0.0, 1.0);
        assert_ne!((lo.0, lo.1, lo.2), (hi.0, hi.1, hi.2));
        let nan = heat_color(f64::NAN, 0.0, 1.0);
        assert_eq!((nan.0, nan.1, nan.2), (210, 210, 210));
    }

    #[test]
    fn test_argmax_row() {
        let row = ndarray::arr1(&[0.1f32, 0.7, 0.2]);
        assert_eq!(argmax_row(row.view()), 1);
    }

    #[test]
    fn test_processed_hparam_column_bins_numeric() {
        let config = Config::default();
        let table = MetricsTable::new(
            vec!["config.learning_rate".into(), "config.optimizer".into()],
            vec![
                vec!["0.00012".into(), "adam".into()],
                vec!["0.0009".into(), "sgd".into()],
            ],
        )
        .unwrap();

        let lr = processed_hparam_column(&config, &table, "config.learning_rate").unwrap();
        // Both bins are markers, never the raw sampled values.
        assert_ne!(lr[0], "0.00012");
        let opt = processed_hparam_column(&config, &table, "config.optimizer").unwrap();
        assert_eq!(opt, vec!["adam".to_string(), "sgd".to_string()]);
    }
}
