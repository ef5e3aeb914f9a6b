//! run_info.json writer: summary statistics for a query run.

use std::path::Path;

use anyhow::Result;

/// All parameters needed to write a run_info.json file.
pub struct RunInfoParams<'a> {
    pub path: &'a Path,
    pub num_queries: u64,
    pub num_classified: u64,
    pub elapsed_secs: f64,
    pub version: &'a str,
    pub num_threads: usize,
    pub database_path: &'a Path,
    pub num_targets: usize,
    pub coverage_pass: bool,
}

/// Write a run_info.json file with classification statistics and run
/// metadata.
pub fn write_run_info(params: &RunInfoParams) -> Result<()> {
    let percent_classified = if params.num_queries > 0 {
        (params.num_classified as f64 / params.num_queries as f64) * 100.0
    } else {
        0.0
    };

    let cmdline: Vec<String> = std::env::args().collect();

    let info = serde_json::json!({
        "version": params.version,
        "database_path": params.database_path.display().to_string(),
        "num_targets": params.num_targets,
        "num_threads": params.num_threads,
        "coverage_pass": params.coverage_pass,
        "num_queries": params.num_queries,
        "num_classified": params.num_classified,
        "percent_classified": format!("{:.2}", percent_classified),
        "runtime_seconds": format!("{:.2}", params.elapsed_secs),
        "cmdline": cmdline.join(" "),
    });

    let file = std::fs::File::create(params.path)?;
    let writer = std::io::BufWriter::new(file);
    serde_json::to_writer_pretty(writer, &info)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_run_info() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run_info.json");
        let db_path = std::path::PathBuf::from("/tmp/test.db");

        write_run_info(&RunInfoParams {
            path: &path,
            num_queries: 1000,
            num_classified: 800,
            elapsed_secs: 12.5,
            version: "0.1.0",
            num_threads: 8,
            database_path: &db_path,
            num_targets: 50,
            coverage_pass: true,
        })
        .unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let val: serde_json::Value = serde_json::from_str(&content).unwrap();
        assert_eq!(val["num_queries"], 1000);
        assert_eq!(val["num_classified"], 800);
        assert_eq!(val["percent_classified"], "80.00");
        assert_eq!(val["num_targets"], 50);
        assert_eq!(val["coverage_pass"], true);
    }
}
