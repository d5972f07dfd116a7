use std::io::{self, Write};
use std::path::Path;

use serde::Serialize;

use crate::collector::RunReport;
use crate::store::PersistedTest;

/// Machine-readable report: the collector's output plus deleted tests.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonReport<'a> {
    #[serde(flatten)]
    pub report: &'a RunReport,
    pub deleted_tests: &'a [PersistedTest],
}

pub fn write_json<W: Write>(out: &mut W, report: &RunReport, deleted: &[PersistedTest]) -> io::Result<()> {
    let document = JsonReport {
        report,
        deleted_tests: deleted,
    };
    serde_json::to_writer_pretty(&mut *out, &document).map_err(io::Error::other)?;
    writeln!(out)
}

/// Write the JSON report to `path`, creating parent directories.
pub fn write_json_report(path: &Path, report: &RunReport, deleted: &[PersistedTest]) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = io::BufWriter::new(std::fs::File::create(path)?);
    write_json(&mut file, report, deleted)?;
    file.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::ResultCollector;

    #[test]
    fn writes_reporter_contract_shape() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("report.json");
        let report = ResultCollector::default().get_results();

        write_json_report(&path, &report, &[]).unwrap();
        let value: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();

        for key in ["suites", "summary", "governance", "security", "metadata", "deletedTests"] {
            assert!(value.get(key).is_some(), "missing `{key}`");
        }
        assert!(value["governance"]["violations"].is_array());
        assert!(value["governance"]["warnings"].is_array());
        assert!(value["security"]["findings"].is_array());
        assert_eq!(value["summary"]["total"], 0);
    }
}
