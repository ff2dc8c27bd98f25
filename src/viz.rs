//! Report printing and the feature-importance chart (Plotters)

use crate::error::ChurnError;
use crate::evaluate::{ClassMetrics, ModelReport, VariantOutcome};
use crate::pipeline::TrainingRun;
use plotters::prelude::*;

const BAR_COLOR: RGBColor = RGBColor(31, 119, 180);

fn plot_error(e: impl std::fmt::Display) -> ChurnError {
    ChurnError::Plot(e.to_string())
}

/// Draw ranked feature importances as a horizontal bar chart
///
/// # Arguments
/// * `ranked` - `(feature, importance)` pairs, highest first
/// * `output_path` - Path to save the PNG chart
/// * `title` - Chart caption
pub fn create_feature_importance_chart(
    ranked: &[(String, f64)],
    output_path: &str,
    title: &str,
) -> crate::Result<()> {
    if ranked.is_empty() {
        return Err(ChurnError::Plot("no feature importances to draw".to_string()));
    }

    let n = ranked.len();
    let max_score = ranked.iter().map(|(_, s)| *s).fold(0.0f64, f64::max).max(1e-9);
    // top-ranked feature is drawn at the top
    let name_at = |y: &f64| -> String {
        let slot = y.round();
        if (y - slot).abs() > 1e-6 || slot < 0.0 || slot as usize >= n {
            return String::new();
        }
        ranked[n - 1 - slot as usize].0.clone()
    };

    let height = (120 + 40 * n).max(400) as u32;
    let root = BitMapBackend::new(output_path, (900, height)).into_drawing_area();
    root.fill(&WHITE).map_err(plot_error)?;

    let mut chart = ChartBuilder::on(&root)
        .caption(title, ("sans-serif", 30))
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(240)
        .build_cartesian_2d(0f64..(max_score * 1.1), -0.5f64..(n as f64 - 0.5))
        .map_err(plot_error)?;

    chart
        .configure_mesh()
        .disable_y_mesh()
        .y_labels(n)
        .y_label_formatter(&name_at)
        .x_desc("Importance")
        .axis_desc_style(("sans-serif", 15))
        .draw()
        .map_err(plot_error)?;

    chart
        .draw_series(ranked.iter().enumerate().map(|(rank, (_, score))| {
            let y = (n - 1 - rank) as f64;
            Rectangle::new([(0.0, y - 0.35), (*score, y + 0.35)], BAR_COLOR.filled())
        }))
        .map_err(plot_error)?;

    root.present().map_err(plot_error)?;
    println!("Feature importance chart saved to: {}", output_path);

    Ok(())
}

fn print_class_row(label: &str, m: &ClassMetrics) {
    println!(
        "  {:>12} | {:>9.2} | {:>6.2} | {:>8.2} | {:>7}",
        label, m.precision, m.recall, m.f1, m.support
    );
}

/// Print the confusion matrix, classification report, ROC-AUC and
/// cross-validation scores of one variant
pub fn print_model_report(report: &ModelReport) {
    println!("\n=== {} ===", report.kind);

    let [[tn, fp], [fn_, tp]] = report.confusion.matrix();
    println!("Confusion matrix (rows = actual, columns = predicted):");
    println!("  [[{:5} {:5}]", tn, fp);
    println!("   [{:5} {:5}]]", fn_, tp);

    println!("\nClassification report:");
    println!("  {:>12} | precision | recall | f1-score | support", "");
    println!("  -------------|-----------|--------|----------|--------");
    print_class_row("0 (stayed)", &report.report.classes[0]);
    print_class_row("1 (churned)", &report.report.classes[1]);
    println!(
        "  {:>12} |           |        | {:>8.2} | {:>7}",
        "accuracy",
        report.report.accuracy,
        report.confusion.total()
    );
    print_class_row("macro avg", &report.report.macro_avg);
    print_class_row("weighted avg", &report.report.weighted_avg);

    match report.roc_auc {
        Some(auc) => println!("\nROC-AUC: {:.4}", auc),
        None => println!("\nROC-AUC: undefined (single class in test split)"),
    }

    let folds: Vec<String> = report
        .cross_validation
        .fold_scores
        .iter()
        .map(|s| format!("{:.4}", s))
        .collect();
    println!("Cross-validation F1 scores: [{}]", folds.join(", "));
    println!("Mean CV F1: {:.4}", report.cross_validation.mean);

    if let Some(ranked) = &report.feature_importance {
        println!("\nFeature importance:");
        for (name, score) in ranked {
            println!("  {:<32} {:.4}", name, score);
        }
    }
}

/// Print balancing statistics followed by every variant's outcome
pub fn print_run_summary(run: &TrainingRun) {
    println!("\n=== Class Balance ===");
    println!(
        "Before SMOTE: {} stayed / {} churned",
        run.original_counts[0], run.original_counts[1]
    );
    let [stayed, churned] = run.balanced.class_counts();
    println!(
        "After SMOTE:  {} stayed / {} churned ({} synthetic rows)",
        stayed, churned, run.balanced.synthetic
    );
    println!("Reference columns ({}): {}", run.schema.width(), run.schema.columns.join(", "));

    for outcome in &run.outcomes {
        match outcome {
            VariantOutcome::Evaluated { report, .. } => print_model_report(report),
            VariantOutcome::Failed { kind, reason } => {
                println!("\n=== {} ===", kind);
                println!("✗ Failed: {}", reason);
            }
        }
    }
}
