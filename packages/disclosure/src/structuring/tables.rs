//! Heuristic table extraction from text-cell geometry.
//!
//! Cells with bounding boxes are clustered into rows by vertical alignment;
//! consecutive multi-cell rows with a stable column count form a table
//! region. No ML models and no external table engine.

use std::collections::BTreeMap;
use std::path::Path;

use tracing::{debug, info};

use super::text::run_blocking;
use crate::error::Result;
use crate::pdf::{self, TextCell};
use crate::types::Table;

/// Tunables for table detection.
#[derive(Debug, Clone)]
pub struct TableDetectConfig {
    /// Vertical tolerance (points) for two cells to share a row.
    pub row_tolerance: f32,
    /// Minimum cells for a row to count as tabular.
    pub min_cols: usize,
    /// Minimum consecutive tabular rows to form a table.
    pub min_rows: usize,
}

impl Default for TableDetectConfig {
    fn default() -> Self {
        Self {
            row_tolerance: 5.0,
            min_cols: 2,
            min_rows: 2,
        }
    }
}

/// Extracts tables from every page of a PDF.
pub struct TableExtractor {
    config: TableDetectConfig,
}

impl Default for TableExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl TableExtractor {
    pub fn new() -> Self {
        Self {
            config: TableDetectConfig::default(),
        }
    }

    pub fn with_config(mut self, config: TableDetectConfig) -> Self {
        self.config = config;
        self
    }

    /// Extract all tables. Failures here are non-fatal to the pipeline; the
    /// orchestrator records them and proceeds with an empty list.
    pub async fn extract(&self, pdf_path: &Path) -> Result<Vec<Table>> {
        let path = pdf_path.to_path_buf();
        let cells_by_page = run_blocking(move || pdf::read_text_cells(&path)).await?;

        let mut tables = Vec::new();
        for (page_number, cells) in cells_by_page {
            let page_tables = detect_page_tables(page_number, &cells, &self.config);
            debug!(page_number, count = page_tables.len(), "tables detected");
            tables.extend(page_tables);
        }

        info!(path = %pdf_path.display(), table_count = tables.len(), "table extraction complete");
        Ok(tables)
    }
}

fn detect_page_tables(page_number: u32, cells: &[TextCell], config: &TableDetectConfig) -> Vec<Table> {
    let rows = cluster_rows(cells, config.row_tolerance);
    let regions = find_table_regions(&rows, config);

    regions
        .into_iter()
        .enumerate()
        .filter_map(|(table_index, region)| build_table(page_number, table_index, &region))
        .collect()
}

/// Cluster cells into rows by vertical center alignment, then sort each row
/// left to right and the rows top to bottom.
fn cluster_rows(cells: &[TextCell], tolerance: f32) -> Vec<Vec<TextCell>> {
    let mut rows: Vec<Vec<TextCell>> = Vec::new();

    for cell in cells {
        let found = rows.iter_mut().find(|row| {
            row.first()
                .map(|first| (cell.center_y() - first.center_y()).abs() <= tolerance)
                .unwrap_or(false)
        });

        match found {
            Some(row) => row.push(cell.clone()),
            None => rows.push(vec![cell.clone()]),
        }
    }

    for row in &mut rows {
        row.sort_by(|a, b| a.x.partial_cmp(&b.x).unwrap_or(std::cmp::Ordering::Equal));
    }
    rows.sort_by(|a, b| {
        let ay = a.first().map(|c| c.y).unwrap_or(0.0);
        let by = b.first().map(|c| c.y).unwrap_or(0.0);
        ay.partial_cmp(&by).unwrap_or(std::cmp::Ordering::Equal)
    });

    rows
}

/// Group consecutive rows with a stable multi-cell column count.
fn find_table_regions(rows: &[Vec<TextCell>], config: &TableDetectConfig) -> Vec<Vec<Vec<String>>> {
    let mut regions = Vec::new();
    let mut current: Vec<Vec<String>> = Vec::new();
    let mut expected_cols: Option<usize> = None;

    for row in rows {
        let cols = row.len();

        if cols < config.min_cols {
            flush_region(&mut regions, &mut current, config.min_rows);
            expected_cols = None;
            continue;
        }

        // A jump in column count ends the region; off-by-one wobble is
        // tolerated since merged cells are common in disclosure tables.
        if let Some(expected) = expected_cols {
            if cols.abs_diff(expected) > 1 {
                flush_region(&mut regions, &mut current, config.min_rows);
            }
        }

        expected_cols = Some(cols);
        current.push(row.iter().map(|c| c.text.clone()).collect());
    }

    flush_region(&mut regions, &mut current, config.min_rows);
    regions
}

fn flush_region(regions: &mut Vec<Vec<Vec<String>>>, current: &mut Vec<Vec<String>>, min_rows: usize) {
    if current.len() >= min_rows {
        regions.push(std::mem::take(current));
    } else {
        current.clear();
    }
}

/// Build a [`Table`] from a region: header detection, row alignment, the
/// row-as-record view and the numeric flag.
fn build_table(page_number: u32, table_index: usize, region: &[Vec<String>]) -> Option<Table> {
    // First non-empty row with at least two cells is the header.
    let header_pos = region
        .iter()
        .position(|row| row.iter().filter(|c| !c.is_empty()).count() >= 2)?;

    let header: Vec<String> = region[header_pos].clone();
    let data_rows: Vec<Vec<String>> = region[header_pos + 1..].to_vec();

    if data_rows.is_empty() {
        return None;
    }

    let records: Vec<BTreeMap<String, String>> = data_rows
        .iter()
        .map(|row| {
            row.iter()
                .enumerate()
                .map(|(col, cell)| {
                    let key = header
                        .get(col)
                        .filter(|h| !h.is_empty())
                        .cloned()
                        .unwrap_or_else(|| format!("column_{col}"));
                    (key, cell.clone())
                })
                .collect()
        })
        .collect();

    let is_numerical = numeric_cell_ratio(&data_rows) >= 0.3;

    Some(Table {
        page_number,
        table_index,
        column_count: header.len(),
        row_count: data_rows.len(),
        header,
        rows: data_rows,
        records,
        is_numerical,
    })
}

/// Share of non-empty data cells containing at least one digit.
fn numeric_cell_ratio(rows: &[Vec<String>]) -> f32 {
    let mut numeric = 0usize;
    let mut total = 0usize;

    for row in rows {
        for cell in row {
            if cell.is_empty() {
                continue;
            }
            total += 1;
            if cell.chars().any(|c| c.is_ascii_digit()) {
                numeric += 1;
            }
        }
    }

    if total == 0 {
        return 0.0;
    }
    numeric as f32 / total as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cell(text: &str, x: f32, y: f32) -> TextCell {
        TextCell {
            text: text.into(),
            x,
            y,
            width: 40.0,
            height: 10.0,
        }
    }

    fn config() -> TableDetectConfig {
        TableDetectConfig::default()
    }

    #[test]
    fn grid_of_cells_becomes_a_table_with_header() {
        let cells = vec![
            cell("項目", 0.0, 0.0),
            cell("当期", 100.0, 0.0),
            cell("前期", 200.0, 0.0),
            cell("売上高", 0.0, 20.0),
            cell("1,200", 100.0, 20.0),
            cell("1,100", 200.0, 20.0),
            cell("営業利益", 0.0, 40.0),
            cell("300", 100.0, 40.0),
            cell("280", 200.0, 40.0),
        ];

        let tables = detect_page_tables(3, &cells, &config());
        assert_eq!(tables.len(), 1);

        let table = &tables[0];
        assert_eq!(table.page_number, 3);
        assert_eq!(table.header, vec!["項目", "当期", "前期"]);
        assert_eq!(table.row_count, 2);
        assert_eq!(table.column_count, 3);
        assert!(table.is_numerical);
        assert_eq!(table.records[0]["項目"], "売上高");
        assert_eq!(table.records[0]["当期"], "1,200");
    }

    #[test]
    fn prose_lines_do_not_become_tables() {
        let cells = vec![
            cell("当社は、デジタルトランスフォーメーションを推進しています。", 0.0, 0.0),
            cell("また、持続可能な成長を目指します。", 0.0, 20.0),
        ];
        assert!(detect_page_tables(1, &cells, &config()).is_empty());
    }

    #[test]
    fn short_regions_are_discarded() {
        // A single two-cell row is below min_rows.
        let cells = vec![cell("a", 0.0, 0.0), cell("b", 100.0, 0.0)];
        assert!(detect_page_tables(1, &cells, &config()).is_empty());
    }

    #[test]
    fn mostly_text_table_is_not_numerical() {
        let cells = vec![
            cell("区分", 0.0, 0.0),
            cell("内容", 100.0, 0.0),
            cell("方針", 0.0, 20.0),
            cell("安定配当", 100.0, 20.0),
            cell("戦略", 0.0, 40.0),
            cell("海外展開", 100.0, 40.0),
        ];
        let tables = detect_page_tables(1, &cells, &config());
        assert_eq!(tables.len(), 1);
        assert!(!tables[0].is_numerical);
    }

    #[test]
    fn rows_cluster_across_small_y_wobble() {
        let cells = vec![
            cell("h1", 0.0, 0.0),
            cell("h2", 100.0, 2.0), // within tolerance of row 1
            cell("a", 0.0, 20.0),
            cell("1", 100.0, 21.0),
            cell("b", 0.0, 40.0),
            cell("2", 100.0, 39.0),
        ];
        let rows = cluster_rows(&cells, 5.0);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].len(), 2);
    }
}
