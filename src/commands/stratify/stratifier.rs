use anyhow::Result;

use crate::config::{NOT_NOVEL_COLUMN, StratificationConfig};
use crate::error::StratifyError;
use crate::model::MaxSimilarityTable;
use crate::report::{ReportLevel, Reporter};

/// Column index and strict upper bound for each metric of one category.
#[derive(Debug, Clone)]
struct CategoryRule {
    name: String,
    bounds: Vec<(usize, f64)>,
}

fn resolve_rules(
    table: &MaxSimilarityTable,
    config: &StratificationConfig,
) -> Result<Vec<CategoryRule>> {
    config
        .categories
        .iter()
        .map(|category| -> Result<CategoryRule> {
            let bounds = category
                .metrics
                .iter()
                .map(|metric| -> Result<(usize, f64)> {
                    let index = table.metric_index(metric).ok_or_else(|| {
                        StratifyError::configuration(format!(
                            "novelty category {} references metric {metric} missing from the aggregated table",
                            category.name
                        ))
                    })?;
                    let threshold = config.threshold(metric).ok_or_else(|| {
                        StratifyError::configuration(format!(
                            "novelty category {} uses metric {metric} which has no threshold",
                            category.name
                        ))
                    })?;
                    Ok((index, threshold))
                })
                .collect::<Result<Vec<(usize, f64)>>>()?;
            Ok(CategoryRule {
                name: category.name.clone(),
                bounds,
            })
        })
        .collect()
}

/// Labels every row with one flag per category and the `not_novel`
/// complement.
///
/// A row is in a category when each of the category's metrics is strictly
/// below its threshold. Categories may overlap. All category references are
/// checked before any row is touched.
pub fn stratify_test_set(
    table: &mut MaxSimilarityTable,
    config: &StratificationConfig,
    reporter: &dyn Reporter,
) -> Result<()> {
    let rules = resolve_rules(table, config)?;

    for row in &mut table.rows {
        row.categories = rules
            .iter()
            .map(|rule| {
                rule.bounds
                    .iter()
                    .all(|(index, threshold)| row.similarities[*index] < *threshold)
            })
            .collect();
        row.not_novel = row.categories.iter().all(|in_category| !in_category);
    }
    table.categories = rules.iter().map(|rule| rule.name.clone()).collect();

    for (index, rule) in rules.iter().enumerate() {
        let (systems, passing) = count_labelled(table, |categories, _| categories[index]);
        reporter.emit(
            ReportLevel::Info,
            &format!("novelty.{}", rule.name),
            &[("systems", systems), ("passing_quality", passing)],
        );
    }

    let (systems, passing) = count_labelled(table, |_, not_novel| not_novel);
    reporter.emit(
        ReportLevel::Info,
        &format!("novelty.{NOT_NOVEL_COLUMN}"),
        &[("systems", systems), ("passing_quality", passing)],
    );

    Ok(())
}

fn count_labelled<F>(table: &MaxSimilarityTable, labelled: F) -> (usize, usize)
where
    F: Fn(&[bool], bool) -> bool,
{
    table
        .rows
        .iter()
        .filter(|row| labelled(&row.categories, row.not_novel))
        .fold((0, 0), |(systems, passing), row| {
            (systems + 1, passing + usize::from(row.passes_quality))
        })
}
