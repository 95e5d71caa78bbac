//! Biacore table ingest.
//!
//! Input files are numeric tables without a header, one sample per row:
//!
//! ```text
//! concentration  index  time  response
//! ```
//!
//! `index` is the 1-based concentration group. Rows of a group keep file
//! order; the same [`TimeWindow`] of row positions is cut out of every group.
//! The time grid of the dataset is taken from the last group.
//!
//! Every problem with the file content is an input error (exit code 3) raised
//! before any fitting starts.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use csv::StringRecord;
use nalgebra::DMatrix;

use crate::domain::{Dataset, ExperimentKind, ExperimentSource, FitConfig, TimeWindow};
use crate::error::AppError;

/// One parsed row of a biacore table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BiacoreRow {
    pub concentration: f64,
    /// 1-based concentration group.
    pub index: usize,
    pub time: f64,
    pub response: f64,
}

/// A dataset plus what was read to build it.
#[derive(Debug, Clone)]
pub struct IngestedExperiment {
    pub dataset: Dataset,
    pub rows_read: usize,
    /// Row count of every concentration group, in index order.
    pub group_rows: Vec<usize>,
}

/// Load one experiment as configured in `config`.
pub fn load_experiment(kind: ExperimentKind, config: &FitConfig) -> Result<IngestedExperiment, AppError> {
    let source: &ExperimentSource = config.source(kind);
    let rows = read_rows(&source.path, config.delimiter)?;
    let rows_read = rows.len();
    let groups = group_rows(&rows).map_err(|e| prefix_path(e, &source.path))?;
    let group_rows = groups.iter().map(Vec::len).collect();
    let dataset = build_dataset(kind, &groups, &config.window, source.ta, config.eps)
        .map_err(|e| prefix_path(e, &source.path))?;
    Ok(IngestedExperiment {
        dataset,
        rows_read,
        group_rows,
    })
}

fn prefix_path(err: AppError, path: &Path) -> AppError {
    AppError::new(err.exit_code(), format!("{}: {}", path.display(), err.message()))
}

/// Read every data row of a table file.
pub fn read_rows(path: &Path, delimiter: char) -> Result<Vec<BiacoreRow>, AppError> {
    let file = File::open(path).map_err(|e| AppError::io("open input table", path, e))?;
    let rows = parse_rows(file, delimiter).map_err(|e| prefix_path(e, path))?;
    if rows.is_empty() {
        return Err(AppError::new(3, format!("Input table '{}' has no data rows.", path.display())));
    }
    Ok(rows)
}

/// Parse rows from any reader; `#` starts a comment line.
///
/// A whitespace delimiter (the default tab, or a space) splits on any run of
/// spaces and tabs. Any other character is a strict single-character delimiter.
pub fn parse_rows<R: Read>(mut input: R, delimiter: char) -> Result<Vec<BiacoreRow>, AppError> {
    let delimiter = u8::try_from(delimiter)
        .map_err(|_| AppError::new(2, "Input delimiter must be a single ASCII character."))?;
    if delimiter.is_ascii_whitespace() {
        let mut text = String::new();
        input
            .read_to_string(&mut text)
            .map_err(|e| AppError::new(3, format!("Table read error: {e}")))?;
        // One tab between fields; line numbers are preserved.
        let normalized: Vec<String> = text
            .lines()
            .map(|line| line.split_whitespace().collect::<Vec<_>>().join("\t"))
            .collect();
        return parse_delimited(normalized.join("\n").as_bytes(), b'\t');
    }
    parse_delimited(input, delimiter)
}

fn parse_delimited<R: Read>(input: R, delimiter: u8) -> Result<Vec<BiacoreRow>, AppError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .delimiter(delimiter)
        .comment(Some(b'#'))
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(input);

    let mut rows = Vec::new();
    for result in reader.records() {
        let record = result.map_err(|e| AppError::new(3, format!("Table parse error: {e}")))?;
        let line = record.position().map(|p| p.line()).unwrap_or(0);
        if let Some(row) = parse_record(&record).map_err(|e| AppError::new(3, format!("line {line}: {e}")))? {
            rows.push(row);
        }
    }
    Ok(rows)
}

/// `Ok(None)` for blank lines.
fn parse_record(record: &StringRecord) -> Result<Option<BiacoreRow>, String> {
    // Repeated delimiters (aligned columns) produce empty fields.
    let fields: Vec<&str> = record.iter().filter(|f| !f.is_empty()).collect();
    if fields.is_empty() {
        return Ok(None);
    }
    if fields.len() != 4 {
        return Err(format!("expected 4 columns (concentration, index, time, response), found {}", fields.len()));
    }

    let mut values = [0.0; 4];
    for (v, (name, s)) in values
        .iter_mut()
        .zip(["concentration", "index", "time", "response"].iter().zip(&fields))
    {
        *v = s
            .parse::<f64>()
            .map_err(|_| format!("invalid {name} value '{s}'"))?;
        if !v.is_finite() {
            return Err(format!("non-finite {name} value '{s}'"));
        }
    }

    let idx = values[1];
    if idx < 1.0 || idx.fract() != 0.0 {
        return Err(format!("concentration index must be a positive integer, found {idx}"));
    }

    Ok(Some(BiacoreRow {
        concentration: values[0],
        index: idx as usize,
        time: values[2],
        response: values[3],
    }))
}

/// Split rows by concentration index; indices must cover `1..=N` without gaps.
pub fn group_rows(rows: &[BiacoreRow]) -> Result<Vec<Vec<BiacoreRow>>, AppError> {
    let n_groups = rows.iter().map(|r| r.index).max().unwrap_or(0);
    if n_groups > rows.len() {
        return Err(AppError::new(
            3,
            format!("Concentration index {n_groups} exceeds the number of rows ({}).", rows.len()),
        ));
    }
    let mut groups: Vec<Vec<BiacoreRow>> = vec![Vec::new(); n_groups];
    for row in rows {
        groups[row.index - 1].push(*row);
    }
    if let Some(missing) = groups.iter().position(Vec::is_empty) {
        return Err(AppError::new(
            3,
            format!("Concentration indices must run 1..={n_groups} without gaps; index {} has no rows.", missing + 1),
        ));
    }
    Ok(groups)
}

/// Cut the window out of every group and assemble the dataset.
pub fn build_dataset(
    kind: ExperimentKind,
    groups: &[Vec<BiacoreRow>],
    window: &TimeWindow,
    ta: f64,
    eps: f64,
) -> Result<Dataset, AppError> {
    window.validate()?;
    let positions = window.positions();
    let Some(&last_pos) = positions.last() else {
        return Err(AppError::new(2, "Time window selects no rows."));
    };
    let Some(last_group) = groups.last() else {
        return Err(AppError::new(3, "Input table has no concentration groups."));
    };

    for (c, g) in groups.iter().enumerate() {
        if g.len() <= last_pos {
            return Err(AppError::new(
                3,
                format!(
                    "Concentration group {} has {} rows; the time window needs at least {}.",
                    c + 1,
                    g.len(),
                    last_pos + 1
                ),
            ));
        }
    }

    let concentrations: Vec<f64> = groups.iter().map(|g| g[0].concentration).collect();
    let times: Vec<f64> = positions.iter().map(|&i| last_group[i].time).collect();
    let observed = DMatrix::from_fn(positions.len(), groups.len(), |i, c| groups[c][positions[i]].response);

    Dataset::new(kind, concentrations, times, ta, eps, observed)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn table(groups: &[(f64, usize)], n_rows: usize) -> String {
        let mut s = String::from("# conc\tidx\ttime\tresponse\n");
        for (g, &(conc, idx)) in groups.iter().enumerate() {
            for i in 0..n_rows {
                let t = i as f64 * 0.5 - 1.0;
                let resp = 100.0 * g as f64 + i as f64;
                s.push_str(&format!("{conc}\t{idx}\t{t}\t{resp}\n"));
            }
        }
        s
    }

    fn window() -> TimeWindow {
        TimeWindow { start: 2, end: 11, stride: 3 }
    }

    #[test]
    fn groups_and_windows_rows() {
        let text = table(&[(5.0, 1), (20.0, 2), (80.0, 3)], 12);
        let rows = parse_rows(text.as_bytes(), '\t').unwrap();
        assert_eq!(rows.len(), 36);
        let groups = group_rows(&rows).unwrap();
        let d = build_dataset(ExperimentKind::Half, &groups, &window(), 90.0, 10.0).unwrap();

        assert_eq!(d.concentrations, vec![5.0, 20.0, 80.0]);
        // positions 2, 5, 8
        assert_eq!(d.times, vec![0.0, 1.5, 3.0]);
        assert_eq!(d.observed.shape(), (3, 3));
        assert_eq!(d.observed[(0, 0)], 2.0);
        assert_eq!(d.observed[(2, 1)], 108.0);
        assert_eq!(d.observed[(1, 2)], 205.0);
        assert_eq!(d.ta, 90.0);
    }

    #[test]
    fn interleaved_groups_keep_file_order() {
        let text = "1\t2\t0\t10\n1\t1\t0\t1\n1\t2\t1\t20\n1\t1\t1\t2\n";
        let rows = parse_rows(text.as_bytes(), '\t').unwrap();
        let groups = group_rows(&rows).unwrap();
        assert_eq!(groups[0].iter().map(|r| r.response).collect::<Vec<_>>(), vec![1.0, 2.0]);
        assert_eq!(groups[1].iter().map(|r| r.response).collect::<Vec<_>>(), vec![10.0, 20.0]);
    }

    #[test]
    fn aligned_space_separated_columns_parse() {
        let text = "  5.0   1   0.0   1.5\n  5.0   1   0.5   2.5\n";
        let rows = parse_rows(text.as_bytes(), ' ').unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].time, 0.5);
        assert_eq!(rows[1].response, 2.5);
    }

    #[test]
    fn default_delimiter_accepts_any_whitespace() {
        let delimiter = FitConfig::default().delimiter;

        let spaced = "5.0 1 0.0 1.5\n5.0 1 0.5 2.5\n";
        let rows = parse_rows(spaced.as_bytes(), delimiter).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].concentration, 5.0);
        assert_eq!(rows[1].response, 2.5);

        let mixed = "# header line\n5.0\t 1  0.0\t1.5\r\n\n  20.0 \t2\t\t0.5   7.25\n";
        let rows = parse_rows(mixed.as_bytes(), ' ').unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].index, 1);
        assert_eq!(rows[0].response, 1.5);
        assert_eq!(rows[1].index, 2);
        assert_eq!(rows[1].time, 0.5);
        assert_eq!(rows[1].response, 7.25);
    }

    #[test]
    fn explicit_delimiter_stays_strict() {
        let rows = parse_rows("5.0;1;0.0;1.5\n".as_bytes(), ';').unwrap();
        assert_eq!(rows[0].response, 1.5);
        let err = parse_rows("5.0 1 0.0 1.5\n".as_bytes(), ';').unwrap_err();
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn short_group_is_an_input_error() {
        let mut text = table(&[(5.0, 1)], 12);
        text.push_str(&table(&[(20.0, 2)], 6).replace("# conc\tidx\ttime\tresponse\n", ""));
        let rows = parse_rows(text.as_bytes(), '\t').unwrap();
        let groups = group_rows(&rows).unwrap();
        let err = build_dataset(ExperimentKind::Full, &groups, &window(), 90.0, 10.0).unwrap_err();
        assert_eq!(err.exit_code(), 3);
        assert!(err.message().contains("group 2"));
    }

    #[test]
    fn index_gap_is_an_input_error() {
        let text = table(&[(5.0, 1), (20.0, 3)], 4);
        let rows = parse_rows(text.as_bytes(), '\t').unwrap();
        let err = group_rows(&rows).unwrap_err();
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn malformed_rows_are_rejected() {
        assert_eq!(parse_rows("1\t1\tabc\t2\n".as_bytes(), '\t').unwrap_err().exit_code(), 3);
        assert_eq!(parse_rows("1\t1\t2\n".as_bytes(), '\t').unwrap_err().exit_code(), 3);
        assert_eq!(parse_rows("1\t0\t2\t3\n".as_bytes(), '\t').unwrap_err().exit_code(), 3);
        assert_eq!(parse_rows("1\t1.5\t2\t3\n".as_bytes(), '\t').unwrap_err().exit_code(), 3);
    }

    #[test]
    fn load_experiment_reads_configured_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(table(&[(5.0, 1), (50.0, 2)], 12).as_bytes()).unwrap();

        let mut config = FitConfig::default();
        config.full.path = file.path().to_path_buf();
        config.full.ta = 2.0;
        config.window = window();

        let ingested = load_experiment(ExperimentKind::Full, &config).unwrap();
        assert_eq!(ingested.rows_read, 24);
        assert_eq!(ingested.group_rows, vec![12, 12]);
        assert_eq!(ingested.dataset.kind, ExperimentKind::Full);
        assert_eq!(ingested.dataset.ta, 2.0);
        assert_eq!(ingested.dataset.n_points(), 6);
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_rows(&dir.path().join("absent.txt"), '\t').unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn empty_file_is_an_input_error() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let err = read_rows(file.path(), '\t').unwrap_err();
        assert_eq!(err.exit_code(), 3);
    }
}
